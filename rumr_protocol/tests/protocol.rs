// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

// Client/server exchanges over an in-process socketpair.

use std::thread::{self, JoinHandle};

use asic_db::harness::{demo_asic, demo_asic_with_harness, TestHarness};
use asic_db::{
    Asic, Bank, MemXfer, RegClass, RingData, WaveSelect, REG_READ_SENTINEL,
};
use rumr_protocol::buffer::FramedBuffer;
use rumr_protocol::client;
use rumr_protocol::comm::pipe::{pipe, PipeComm};
use rumr_protocol::comm::Comm;
use rumr_protocol::server::{Server, Session};
use rumr_protocol::{pack_header, Error, Opcode, ProtocolError, RUMR_VERSION};

/// Bind a server over one end of a pipe and serve a single session on a
/// thread; the other end is returned for the client.
fn start_server(asic: Asic) -> (JoinHandle<Result<Session, Error>>, Box<PipeComm>) {
    let (a, b) = pipe().unwrap();
    let mut server = Server::bind(Box::new(PipeComm::new(a)), asic, "pipe").unwrap();

    let handle = thread::spawn(move || loop {
        server.accept()?;
        loop {
            match server.handle_request()? {
                Session::Continue => {}
                Session::Disconnected => return Ok(Session::Disconnected),
            }
        }
    });

    (handle, Box::new(PipeComm::new(b)))
}

fn start_demo_server() -> (
    JoinHandle<Result<Session, Error>>,
    TestHarness,
    Asic,
) {
    let (asic, harness) = demo_asic_with_harness();
    let (handle, comm) = start_server(asic);
    let remote = client::connect(comm, "pipe").unwrap();
    (handle, harness, remote)
}

fn expect_goodbye(remote: Asic, handle: JoinHandle<Result<Session, Error>>) {
    drop(remote);
    match handle.join().unwrap() {
        Ok(Session::Disconnected) => {}
        other => panic!("server should see a GOODBYE, got {other:?}"),
    }
}

#[test]
fn discover_reconstructs_the_model() {
    let (handle, _harness, remote) = start_demo_server();

    // Structurally identical to the model the server serialized.
    assert_eq!(demo_asic(), remote);

    assert_eq!(0x6860, remote.did);
    assert_eq!(2, remote.blocks.len());
    assert_eq!("gfx900", remote.blocks[0].name);
    assert_eq!("mmhub1_0", remote.blocks[1].name);
    assert!(remote.geometry.is_some());
    assert!(remote.has_hw());

    // Family defaults: gfx9+ swaps LS/ES in for HS/GS.
    assert!(remote.options.shader_enable.vs);
    assert!(remote.options.shader_enable.es_ls_swap);
    assert!(!remote.options.shader_enable.gs);

    // The lookup accelerator was built from the reconstructed tree.
    assert!(remote.find_reg_by_name("mmGRBM_STATUS").is_some());
    assert!(remote.find_reg_by_addr(0x1440).is_some());

    expect_goodbye(remote, handle);
}

#[test]
fn register_read_round_trip() {
    let (handle, harness, mut remote) = start_demo_server();

    harness.set_reg(0x2000, 0xCAFEBABE);
    assert_eq!(0xCAFEBABE, remote.read_reg(0x2000, RegClass::Mmio));

    expect_goodbye(remote, handle);
}

#[test]
fn failed_register_read_yields_sentinel() {
    let (handle, harness, mut remote) = start_demo_server();

    // Nothing scripted at this address; the server answers status 0 and
    // the session survives.
    assert_eq!(REG_READ_SENTINEL, remote.read_reg(0xDEAD0, RegClass::Mmio));

    harness.set_reg(0xDEAD0, 0xCAFE);
    assert_eq!(0xCAFE, remote.read_reg(0xDEAD0, RegClass::Mmio));

    expect_goodbye(remote, handle);
}

#[test]
fn grbm_banked_write_reaches_hardware_banked() {
    let (handle, harness, mut remote) = start_demo_server();

    remote.options.bank = Bank::Grbm {
        se: 1,
        sh: 0,
        instance: 2,
    };
    remote.write_reg(0x8010, 0x1234, RegClass::Mmio).unwrap();

    assert_eq!(
        Bank::Grbm {
            se: 1,
            sh: 0,
            instance: 2
        },
        harness.last_bank()
    );
    assert_eq!(Some(0x1234), harness.get_reg(0x8010));

    // The server must have dropped its bank selection after the op: an
    // unbanked access now observes no banking.
    remote.options.bank = Bank::None;
    let _ = remote.read_reg(0x8010, RegClass::Mmio);
    assert_eq!(Bank::None, harness.last_bank());

    expect_goodbye(remote, handle);
}

#[test]
fn srbm_banked_read() {
    let (handle, harness, mut remote) = start_demo_server();

    remote.options.bank = Bank::Srbm {
        me: 1,
        pipe: 2,
        queue: 3,
        vmid: 8,
    };
    let v = remote.read_reg(0xC100, RegClass::Mmio);
    assert_eq!(0x0040_0000, v);
    assert_eq!(
        Bank::Srbm {
            me: 1,
            pipe: 2,
            queue: 3,
            vmid: 8
        },
        harness.last_bank()
    );

    expect_goodbye(remote, handle);
}

#[test]
fn bank_is_reset_even_when_the_access_fails() {
    let (handle, harness, mut remote) = start_demo_server();

    remote.options.bank = Bank::Grbm {
        se: 3,
        sh: 1,
        instance: 0,
    };
    assert_eq!(REG_READ_SENTINEL, remote.read_reg(0xFFF0, RegClass::Mmio));

    remote.options.bank = Bank::None;
    let _ = remote.read_reg(0x8010, RegClass::Mmio);
    assert_eq!(Bank::None, harness.last_bank());

    expect_goodbye(remote, handle);
}

#[test]
fn vram_read_round_trip() {
    let (handle, harness, mut remote) = start_demo_server();

    let pattern: Vec<u8> = (0..16u8).map(|i| 0xDE ^ i).collect();
    harness.set_vram(0x10000, &pattern);

    let mut dst = [0u8; 16];
    remote
        .access_linear_vram(0x10000, MemXfer::Read(&mut dst))
        .unwrap();
    assert_eq!(pattern.as_slice(), dst);

    expect_goodbye(remote, handle);
}

#[test]
fn vram_and_sram_write_round_trip() {
    let (handle, harness, mut remote) = start_demo_server();

    let data = [0x11u8, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    remote
        .access_linear_vram(0x4000, MemXfer::Write(&data))
        .unwrap();
    assert_eq!(data.to_vec(), harness.get_vram(0x4000, data.len()));

    remote.access_sram(0x9000, MemXfer::Write(&data)).unwrap();
    assert_eq!(data.to_vec(), harness.get_sram(0x9000, data.len()));

    let mut back = [0u8; 8];
    remote
        .access_sram(0x9000, MemXfer::Read(&mut back))
        .unwrap();
    assert_eq!(data, back);

    expect_goodbye(remote, handle);
}

#[test]
fn dma_translation() {
    let (handle, _harness, mut remote) = start_demo_server();

    // Scripted in the demo harness.
    assert_eq!(
        0x1_2345_6000,
        remote.gpu_bus_to_cpu_address(0x4000_0000).unwrap()
    );

    // Unmapped: the server answers status 0, the session survives.
    assert!(remote.gpu_bus_to_cpu_address(0x5000_0000).is_err());
    assert_eq!(
        0x1_2345_6000,
        remote.gpu_bus_to_cpu_address(0x4000_0000).unwrap()
    );

    expect_goodbye(remote, handle);
}

#[test]
fn goodbye_ends_the_session_without_a_reply() {
    let (handle, _harness, remote) = start_demo_server();
    expect_goodbye(remote, handle);
}

#[test]
fn wave_status_and_gpr_reads() {
    let (asic, harness) = demo_asic_with_harness();
    let sel = WaveSelect {
        se: 0,
        sh: 0,
        cu_wgp: 1,
        simd: 0,
        wave: 2,
    };

    // Word order matches the model: STATUS, PC_LO, PC_HI, EXEC_LO,
    // EXEC_HI, GPR_ALLOC.
    let status = (1 << 6) | (1 << 16); // TRAP_EN | VALID
    let gpr_alloc = (1 << 24) | (2 << 8); // SGPR_SIZE=1, VGPR_SIZE=2
    harness.set_wave(sel, vec![status, 0x100, 0, 0xF, 0, gpr_alloc]);

    let sgprs: Vec<u32> = (0..124).map(|i| 0x5000 + i).collect();
    harness.set_sgprs(sel, sgprs);
    harness.set_vgprs(sel, 1, (0..12).map(|i| 0x7000 + i).collect());

    let (handle, comm) = start_server(asic);
    let mut remote = client::connect(comm, "pipe").unwrap();

    let wd = remote.get_wave_status(sel).unwrap();
    assert_eq!(6, wd.words.len());
    assert!(wd.valid(&remote));
    assert!(wd.trap_en(&remote));
    assert!(!wd.halt(&remote));
    assert_eq!(Some(0x100), wd.pc(&remote));
    assert_eq!(Some(1), wd.sgpr_alloc(&remote));
    assert_eq!(Some(2), wd.vgpr_alloc(&remote));

    // Family AI allocates SGPRs in 16-dword blocks: (1+1)<<4 == 32 words,
    // and the trap state forces the second read at word 0x6C.
    let sgpr_data = remote.read_sgprs(&wd).unwrap();
    assert_eq!(0x6C + 16, sgpr_data.len());
    assert_eq!(0x5000, sgpr_data[0]);
    assert_eq!(0x5000 + 31, sgpr_data[31]);
    assert_eq!(0, sgpr_data[32]); // between allocation and trap block
    assert_eq!(0x5000 + 0x6C, sgpr_data[0x6C]);
    assert_eq!(0x5000 + 0x6C + 15, sgpr_data[0x6C + 15]);

    // vgpr_granularity == 2: (2+1)<<2 == 12 words for thread 1.
    let vgpr_data = remote.read_vgprs(&wd, 1).unwrap();
    assert_eq!(12, vgpr_data.len());
    assert_eq!(0x7000, vgpr_data[0]);
    assert_eq!(0x700B, vgpr_data[11]);

    // A wave the hardware does not know about fails without killing the
    // session.
    let missing = WaveSelect {
        wave: 9,
        ..sel
    };
    assert!(remote.get_wave_status(missing).is_err());

    expect_goodbye(remote, handle);
}

#[test]
fn sgpr_read_without_trap_state_is_single_shot() {
    let (asic, harness) = demo_asic_with_harness();
    let sel = WaveSelect {
        se: 0,
        sh: 0,
        cu_wgp: 0,
        simd: 0,
        wave: 0,
    };
    let status = 1 << 16; // VALID only
    let gpr_alloc = 1 << 24; // SGPR_SIZE=1
    harness.set_wave(sel, vec![status, 0, 0, 0, 0, gpr_alloc]);
    harness.set_sgprs(sel, (0..32).collect());

    let (handle, comm) = start_server(asic);
    let mut remote = client::connect(comm, "pipe").unwrap();

    let wd = remote.get_wave_status(sel).unwrap();
    let sgpr_data = remote.read_sgprs(&wd).unwrap();
    assert_eq!(32, sgpr_data.len());
    assert_eq!((0..32).collect::<Vec<u32>>(), sgpr_data);

    expect_goodbye(remote, handle);
}

#[test]
fn ring_read_round_trip() {
    let (asic, harness) = demo_asic_with_harness();
    let contents: Vec<u8> = (0..64).collect();
    harness.set_ring("sdma0", RingData::new(0x10, 0x20, 0x10, &contents));

    let (handle, comm) = start_server(asic);
    let mut remote = client::connect(comm, "pipe").unwrap();

    let ring = remote.read_ring_data("sdma0").unwrap();
    assert_eq!(64, ring.ringsize());
    assert_eq!(0x10, ring.rptr());
    assert_eq!(0x20, ring.wptr());
    assert_eq!(0x10, ring.cached_rptr());
    assert_eq!(contents.as_slice(), ring.contents());

    assert!(remote.read_ring_data("nonexistent").is_err());

    expect_goodbye(remote, handle);
}

#[test]
fn misaligned_memory_access_is_a_protocol_error() {
    let (asic, harness) = demo_asic_with_harness();
    let (handle, comm) = start_server(asic);
    let mut remote = client::connect(comm, "pipe").unwrap();

    // Neither size nor address may stray off 4-byte alignment; the server
    // drops the session before touching hardware.
    let r = remote.access_linear_vram(0x10000, MemXfer::Write(&[1, 2, 3, 4, 5, 6]));
    assert!(r.is_err());

    match handle.join().unwrap() {
        Err(Error::Protocol(ProtocolError::BadAlignment)) => {}
        other => panic!("expected BadAlignment, got {other:?}"),
    }

    // No hardware side effect.
    assert_eq!(vec![0u8; 8], harness.get_vram(0x10000, 8));
}

#[test]
fn misaligned_address_is_a_protocol_error() {
    let (asic, _harness) = demo_asic_with_harness();
    let (handle, comm) = start_server(asic);
    let mut remote = client::connect(comm, "pipe").unwrap();

    let mut dst = [0u8; 4];
    assert!(remote
        .access_linear_vram(0x10002, MemXfer::Read(&mut dst))
        .is_err());

    match handle.join().unwrap() {
        Err(Error::Protocol(ProtocolError::BadAlignment)) => {}
        other => panic!("expected BadAlignment, got {other:?}"),
    }
}

#[test]
fn wrong_version_is_rejected_by_the_server() {
    let (asic, _harness) = demo_asic_with_harness();
    let (handle, mut comm) = start_server(asic);

    let mut frame = FramedBuffer::new();
    frame.add_u32((Opcode::Discover as u32) << 10 | (99 << 1));
    comm.tx(&frame).unwrap();

    match handle.join().unwrap() {
        Err(Error::Protocol(ProtocolError::WrongVersion)) => {}
        other => panic!("expected WrongVersion, got {other:?}"),
    }
}

#[test]
fn server_bit_on_a_request_is_rejected() {
    let (asic, _harness) = demo_asic_with_harness();
    let (handle, mut comm) = start_server(asic);

    let mut frame = FramedBuffer::new();
    frame.add_u32(pack_header(Opcode::Discover, true));
    comm.tx(&frame).unwrap();

    match handle.join().unwrap() {
        Err(Error::Protocol(ProtocolError::WrongDirection)) => {}
        other => panic!("expected WrongDirection, got {other:?}"),
    }
}

#[test]
fn unknown_opcode_is_rejected() {
    let (asic, _harness) = demo_asic_with_harness();
    let (handle, mut comm) = start_server(asic);

    let mut frame = FramedBuffer::new();
    frame.add_u32(RUMR_VERSION << 1); // opcode 0 is never assigned
    comm.tx(&frame).unwrap();

    match handle.join().unwrap() {
        Err(Error::Protocol(ProtocolError::UnknownOpcode(0))) => {}
        other => panic!("expected UnknownOpcode, got {other:?}"),
    }
}

#[test]
fn invalid_memory_subcommand_is_rejected() {
    let (asic, _harness) = demo_asic_with_harness();
    let (handle, mut comm) = start_server(asic);

    let mut frame = FramedBuffer::new();
    frame.add_u32(pack_header(Opcode::MemAccess, false));
    frame.add_u64(0); // addr
    frame.add_u32(3); // reserved subcommand
    frame.add_u32(0); // size
    comm.tx(&frame).unwrap();

    match handle.join().unwrap() {
        Err(Error::Protocol(ProtocolError::InvalidSubcommand(3))) => {}
        other => panic!("expected InvalidSubcommand, got {other:?}"),
    }
}

#[test]
fn client_rejects_reply_without_server_bit() {
    let (a, b) = pipe().unwrap();

    let fake = thread::spawn(move || {
        let mut comm = PipeComm::new(a);
        let _req = comm.rx().unwrap();
        let mut reply = FramedBuffer::new();
        reply.add_u32(pack_header(Opcode::Discover, false)); // SERVER bit clear
        comm.tx(&reply).unwrap();
    });

    match client::connect(Box::new(PipeComm::new(b)), "pipe") {
        Err(Error::Protocol(ProtocolError::WrongDirection)) => {}
        other => panic!("expected WrongDirection, got {other:?}"),
    }
    fake.join().unwrap();
}

#[test]
fn client_rejects_reply_with_wrong_version() {
    let (a, b) = pipe().unwrap();

    let fake = thread::spawn(move || {
        let mut comm = PipeComm::new(a);
        let _req = comm.rx().unwrap();
        let mut reply = FramedBuffer::new();
        reply.add_u32((Opcode::Discover as u32) << 10 | (7 << 1) | 1);
        comm.tx(&reply).unwrap();
    });

    match client::connect(Box::new(PipeComm::new(b)), "pipe") {
        Err(Error::Protocol(ProtocolError::WrongVersion)) => {}
        other => panic!("expected WrongVersion, got {other:?}"),
    }
    fake.join().unwrap();
}
