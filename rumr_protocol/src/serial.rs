// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

// Serializer for the ASIC description. The field order is the wire
// contract: name[64], did, family, vgpr_granularity, config (length,
// bytes, three u64 memory sizes), is_apu, then the counted block /
// register / bitfield tree. All integers little-endian, u64 split
// low-word-first. Names travel in fixed-width zero-padded fields and must
// fit with their terminator; oversized names fail serialization rather
// than truncate.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use asic_db::{
    scan_config_gca_data, Asic, AsicConfig, Bitfield, Discoverable, IpBlock, RegClass, Register,
    CONFIG_DATA_CAP,
};

use crate::buffer::FramedBuffer;
use crate::{Error, ProtocolError};

/// Field width for ASIC and IP-block names.
pub const NAME_WIDTH_BLOCK: usize = 64;

/// Field width for register, bitfield, and ring names.
pub const NAME_WIDTH_REG: usize = 128;

// Smallest possible wire footprint of each counted record, used to bounce
// absurd counts before allocating for them.
const MIN_BLOCK_BYTES: usize = NAME_WIDTH_BLOCK + 4 + 6 * 4;
const MIN_REG_BYTES: usize = NAME_WIDTH_REG + 4 + 8 + 4 + 4;
const MIN_BIT_BYTES: usize = NAME_WIDTH_REG + 4 + 4;

fn add_name(buf: &mut FramedBuffer, name: &str, width: usize) -> Result<(), ProtocolError> {
    let bytes = name.as_bytes();
    if bytes.len() >= width {
        return Err(ProtocolError::NameTooLong);
    }
    let mut field = vec![0u8; width];
    field[..bytes.len()].copy_from_slice(bytes);
    buf.add_bytes(&field);
    Ok(())
}

fn read_name(buf: &mut FramedBuffer, width: usize) -> String {
    let mut field = vec![0u8; width];
    buf.read_bytes(&mut field);
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Serialize an ASIC description into a fresh buffer.
pub fn serialize_asic(asic: &Asic) -> Result<FramedBuffer, Error> {
    let mut buf = FramedBuffer::new();

    if asic.config.data.len() > CONFIG_DATA_CAP {
        return Err(Error::Protocol(ProtocolError::ConfigTooLarge));
    }

    add_name(&mut buf, &asic.name, NAME_WIDTH_BLOCK)?;
    buf.add_u32(asic.did);
    buf.add_u32(asic.family);
    buf.add_u32(asic.vgpr_granularity);
    buf.add_u32(asic.config.data.len() as u32);
    buf.add_bytes(&asic.config.data);
    buf.add_u64(asic.config.vram_size);
    buf.add_u64(asic.config.vis_vram_size);
    buf.add_u64(asic.config.gtt_size);
    buf.add_u32(u32::from(asic.is_apu));
    buf.add_u32(asic.blocks.len() as u32);

    for block in &asic.blocks {
        add_name(&mut buf, &block.name, NAME_WIDTH_BLOCK)?;
        buf.add_u32(block.regs.len() as u32);
        buf.add_u32(block.discoverable.die);
        buf.add_u32(block.discoverable.maj);
        buf.add_u32(block.discoverable.min);
        buf.add_u32(block.discoverable.rev);
        buf.add_u32(block.discoverable.instance);
        buf.add_u32(block.discoverable.logical_inst);

        for reg in &block.regs {
            add_name(&mut buf, &reg.name, NAME_WIDTH_REG)?;
            buf.add_u32(reg.class as u32);
            buf.add_u64(reg.addr);
            buf.add_u32(u32::from(reg.bit64));
            buf.add_u32(reg.bits.len() as u32);

            for bits in &reg.bits {
                add_name(&mut buf, &bits.name, NAME_WIDTH_REG)?;
                buf.add_u32(bits.start);
                buf.add_u32(bits.stop);
            }
        }
    }

    if buf.failed() {
        return Err(Error::Protocol(ProtocolError::Decode));
    }
    Ok(buf)
}

fn check_count(count: u32, min_bytes: usize, buf: &FramedBuffer) -> Result<usize, Error> {
    let count = count as usize;
    if count.saturating_mul(min_bytes) > buf.remaining() {
        return Err(Error::Protocol(ProtocolError::Decode));
    }
    Ok(count)
}

fn parse_bitfield(buf: &mut FramedBuffer, bit64: bool) -> Result<Bitfield, Error> {
    let name = read_name(buf, NAME_WIDTH_REG);
    let start = buf.read_u32();
    let stop = buf.read_u32();

    let limit = if bit64 { 64 } else { 32 };
    if stop < start || stop >= limit {
        return Err(Error::Protocol(ProtocolError::Decode));
    }

    Ok(Bitfield { name, start, stop })
}

fn parse_register(buf: &mut FramedBuffer) -> Result<Register, Error> {
    let name = read_name(buf, NAME_WIDTH_REG);
    let class_raw = buf.read_u32();
    let addr = buf.read_u64();
    let bit64 = buf.read_u32() != 0;
    let no_bits = check_count(buf.read_u32(), MIN_BIT_BYTES, buf)?;

    let class = RegClass::from_u32(class_raw)
        .ok_or(Error::Protocol(ProtocolError::Decode))?;
    if class == RegClass::Mmio && addr % 4 != 0 {
        return Err(Error::Protocol(ProtocolError::Decode));
    }

    let mut bits = Vec::with_capacity(no_bits);
    for _ in 0..no_bits {
        bits.push(parse_bitfield(buf, bit64)?);
    }

    Ok(Register {
        name,
        class,
        addr,
        bit64,
        bits,
    })
}

fn parse_block(buf: &mut FramedBuffer) -> Result<IpBlock, Error> {
    let name = read_name(buf, NAME_WIDTH_BLOCK);
    let no_regs = check_count(buf.read_u32(), MIN_REG_BYTES, buf)?;
    let discoverable = Discoverable {
        die: buf.read_u32(),
        maj: buf.read_u32(),
        min: buf.read_u32(),
        rev: buf.read_u32(),
        instance: buf.read_u32(),
        logical_inst: buf.read_u32(),
    };

    let mut regs = Vec::with_capacity(no_regs);
    for _ in 0..no_regs {
        regs.push(parse_register(buf)?);
    }

    Ok(IpBlock {
        name,
        discoverable,
        regs,
    })
}

/// Reconstruct an ASIC description from a serialized buffer.
///
/// Counts are sanity-checked against the remaining frame length before
/// allocating, and the buffer's sticky flag is checked once at the end;
/// either failure discards the whole model. No hardware backend is
/// attached to the result.
pub fn parse_serialized_asic(buf: &mut FramedBuffer) -> Result<Asic, Error> {
    let name = read_name(buf, NAME_WIDTH_BLOCK);
    let did = buf.read_u32();
    let family = buf.read_u32();
    let vgpr_granularity = buf.read_u32();

    let config_len = buf.read_u32() as usize;
    if config_len > CONFIG_DATA_CAP {
        return Err(Error::Protocol(ProtocolError::ConfigTooLarge));
    }
    if config_len > buf.remaining() {
        return Err(Error::Protocol(ProtocolError::Decode));
    }
    let config_data = buf.read_vec(config_len);

    let vram_size = buf.read_u64();
    let vis_vram_size = buf.read_u64();
    let gtt_size = buf.read_u64();
    let is_apu = buf.read_u32() != 0;
    let no_blocks = check_count(buf.read_u32(), MIN_BLOCK_BYTES, buf)?;

    let mut asic = Asic::new(&name, did, family);
    asic.vgpr_granularity = vgpr_granularity;
    asic.is_apu = is_apu;
    asic.config = AsicConfig {
        data: config_data,
        vram_size,
        vis_vram_size,
        gtt_size,
    };

    let mut blocks = Vec::with_capacity(no_blocks);
    for _ in 0..no_blocks {
        blocks.push(parse_block(buf)?);
    }
    asic.blocks = blocks;

    if buf.failed() {
        return Err(Error::Protocol(ProtocolError::Decode));
    }

    scan_config_gca_data(&mut asic);
    Ok(asic)
}

/// File name a serialized ASIC is saved under: `0x<did>.sasic`.
pub fn sasic_file_name(did: u32) -> String {
    format!("{did:#x}.sasic")
}

/// Save a serialized ASIC to `dir`. The file holds the exact wire bytes of
/// a DISCOVER reply body, no enclosing frame header.
pub fn save_serialized_asic(dir: &Path, did: u32, buf: &FramedBuffer) -> io::Result<PathBuf> {
    let path = dir.join(sasic_file_name(did));
    fs::write(&path, buf.as_slice())?;
    Ok(path)
}

/// Load a previously saved serialized ASIC.
pub fn load_serialized_asic(path: &Path) -> io::Result<FramedBuffer> {
    Ok(FramedBuffer::from_vec(fs::read(path)?))
}
