// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use asic_db::{
    Asic, Bitfield, Discoverable, GcaGeometry, IpBlock, RegClass, Register, CONFIG_DATA_CAP,
    FAMILY_AI,
};
use rumr_protocol::buffer::FramedBuffer;
use rumr_protocol::serial::*;
use rumr_protocol::{Error, ProtocolError};

fn four_bitfields() -> Vec<Bitfield> {
    [(0u32, 3u32), (4, 7), (8, 15), (16, 31)]
        .iter()
        .enumerate()
        .map(|(i, &(start, stop))| Bitfield {
            name: format!("FIELD_{i}"),
            start,
            stop,
        })
        .collect()
}

fn block(name: &str, base: u64) -> IpBlock {
    let regs = (0..3)
        .map(|i| Register {
            name: format!("mm{name}_REG{i}"),
            class: RegClass::Mmio,
            addr: base + (i as u64) * 4,
            bit64: false,
            bits: four_bitfields(),
        })
        .collect();

    IpBlock {
        name: name.to_string(),
        discoverable: Discoverable {
            die: 0,
            maj: 9,
            min: 0,
            rev: 2,
            instance: 0,
            logical_inst: 0,
        },
        regs,
    }
}

fn test_asic() -> Asic {
    let mut asic = Asic::new("vega20", 0x66A0, FAMILY_AI);
    asic.vgpr_granularity = 2;
    asic.is_apu = false;
    asic.config.data = GcaGeometry {
        version: 3,
        max_shader_engines: 4,
        max_sh_per_se: 1,
        max_cu_per_sh: 16,
        ..Default::default()
    }
    .to_blob();
    asic.config.vram_size = 16 << 30;
    asic.config.vis_vram_size = 256 << 20;
    asic.config.gtt_size = 16 << 30;
    asic.blocks = vec![block("GC", 0x8000), block("MMHUB", 0x1400)];
    asic
}

#[test]
fn serialized_asic_round_trip() {
    let before = test_asic();

    let mut bytes = serialize_asic(&before).unwrap();
    let after = parse_serialized_asic(&mut bytes).unwrap();

    assert_eq!(before, after);

    assert_eq!(2, after.blocks.len());
    for block in &after.blocks {
        assert_eq!(3, block.regs.len());
        for reg in &block.regs {
            assert_eq!(RegClass::Mmio, reg.class);
            assert_eq!(4, reg.bits.len());
            let ranges: Vec<(u32, u32)> = reg.bits.iter().map(|b| (b.start, b.stop)).collect();
            assert_eq!(vec![(0, 3), (4, 7), (8, 15), (16, 31)], ranges);
            for (i, bits) in reg.bits.iter().enumerate() {
                assert_eq!(format!("FIELD_{i}"), bits.name);
            }
        }
    }
}

#[test]
fn parse_derives_geometry_from_config() {
    let before = test_asic();

    let mut bytes = serialize_asic(&before).unwrap();
    let after = parse_serialized_asic(&mut bytes).unwrap();

    let geometry = after.geometry.expect("config blob should scan");
    assert_eq!(4, geometry.max_shader_engines);
    assert_eq!(16, geometry.max_cu_per_sh);
}

#[test]
fn oversized_name_is_rejected_not_truncated() {
    let mut asic = test_asic();
    asic.blocks[0].regs[0].name = "X".repeat(128);

    match serialize_asic(&asic) {
        Err(Error::Protocol(ProtocolError::NameTooLong)) => {}
        other => panic!("expected NameTooLong, got {other:?}"),
    }
}

#[test]
fn oversized_config_is_rejected() {
    let mut asic = test_asic();
    asic.config.data = vec![0; CONFIG_DATA_CAP + 1];

    match serialize_asic(&asic) {
        Err(Error::Protocol(ProtocolError::ConfigTooLarge)) => {}
        other => panic!("expected ConfigTooLarge, got {other:?}"),
    }
}

#[test]
fn truncated_frame_is_discarded() {
    let full = serialize_asic(&test_asic()).unwrap();

    // Chop the frame anywhere inside the block tree; every cut must fail
    // cleanly rather than produce a partial model.
    for cut in [full.woffset() - 1, full.woffset() / 2, 100] {
        let mut short = FramedBuffer::from_vec(full.as_slice()[..cut].to_vec());
        assert!(
            parse_serialized_asic(&mut short).is_err(),
            "cut at {cut} parsed"
        );
    }
}

#[test]
fn absurd_block_count_is_rejected() {
    let mut buf = FramedBuffer::new();
    buf.add_bytes(&[0u8; 64]); // asicname
    buf.add_u32(0x1234); // did
    buf.add_u32(FAMILY_AI); // family
    buf.add_u32(2); // vgpr granularity
    buf.add_u32(0); // empty config
    buf.add_u64(0); // vram
    buf.add_u64(0); // vis vram
    buf.add_u64(0); // gtt
    buf.add_u32(0); // apu
    buf.add_u32(u32::MAX); // block count nowhere near the frame length

    assert!(parse_serialized_asic(&mut buf).is_err());
}

fn one_reg_frame(class: u32, addr: u64, bit64: u32, start: u32, stop: u32) -> FramedBuffer {
    let mut buf = FramedBuffer::new();
    buf.add_bytes(&[0u8; 64]); // asicname
    buf.add_u32(0x1234);
    buf.add_u32(FAMILY_AI);
    buf.add_u32(2);
    buf.add_u32(0); // empty config
    buf.add_u64(0);
    buf.add_u64(0);
    buf.add_u64(0);
    buf.add_u32(0);
    buf.add_u32(1); // one block

    buf.add_bytes(&[0u8; 64]); // ipname
    buf.add_u32(1); // one register
    for _ in 0..6 {
        buf.add_u32(0); // discoverable
    }

    buf.add_bytes(&[0u8; 128]); // regname
    buf.add_u32(class);
    buf.add_u64(addr);
    buf.add_u32(bit64);
    buf.add_u32(1); // one bitfield

    buf.add_bytes(&[0u8; 128]); // bitfield name
    buf.add_u32(start);
    buf.add_u32(stop);
    buf
}

#[test]
fn unknown_register_class_is_rejected() {
    let mut buf = one_reg_frame(9, 0x2000, 0, 0, 3);
    assert!(parse_serialized_asic(&mut buf).is_err());
}

#[test]
fn misaligned_mmio_address_is_rejected() {
    let mut buf = one_reg_frame(0, 0x2001, 0, 0, 3);
    assert!(parse_serialized_asic(&mut buf).is_err());
}

#[test]
fn inverted_bit_range_is_rejected() {
    let mut buf = one_reg_frame(0, 0x2000, 0, 7, 3);
    assert!(parse_serialized_asic(&mut buf).is_err());
}

#[test]
fn bit_range_must_fit_register_width() {
    // stop == 35 is fine for a 64-bit register, fatal for a 32-bit one.
    let mut buf = one_reg_frame(0, 0x2000, 1, 32, 35);
    assert!(parse_serialized_asic(&mut buf).is_ok());

    let mut buf = one_reg_frame(0, 0x2000, 0, 30, 35);
    assert!(parse_serialized_asic(&mut buf).is_err());
}

#[test]
fn sasic_file_round_trip() {
    let asic = test_asic();
    let bytes = serialize_asic(&asic).unwrap();

    let dir = std::env::temp_dir();
    let path = save_serialized_asic(&dir, asic.did, &bytes).unwrap();
    assert!(path.ends_with("0x66a0.sasic"));

    let mut loaded = load_serialized_asic(&path).unwrap();
    assert_eq!(bytes.as_slice(), loaded.as_slice());

    let parsed = parse_serialized_asic(&mut loaded).unwrap();
    assert_eq!(asic, parsed);

    let _ = std::fs::remove_file(path);
}
