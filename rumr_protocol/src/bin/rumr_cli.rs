// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::path::Path;

use clap::{Parser, Subcommand};

use asic_db::{mmio, MemXfer, WaveSelect};
use rumr_protocol::client;
use rumr_protocol::comm::TcpComm;
use rumr_protocol::serial;

#[derive(Debug, Parser)]
struct Cli {
    #[arg(long, default_value = "localhost")]
    hostname: String,

    #[arg(long, default_value_t = 9099)]
    port: u16,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the discovered ASIC, optionally saving it as a .sasic file.
    Discover {
        #[arg(long)]
        save: bool,
    },

    /// Read a register by name and decode its bitfields.
    ReadReg { name: String },

    /// Write a register by name.
    WriteReg { name: String, value: String },

    /// Read memory; VRAM by default, system RAM with --sram.
    ReadMem {
        addr: String,
        size: u32,
        #[arg(long)]
        sram: bool,
    },

    /// Translate a GPU DMA address to a CPU physical address.
    Translate { addr: String },

    /// Show a ring buffer's pointers and contents.
    Ring { name: String },

    /// Show one wavefront's raw status words.
    Wave {
        se: u32,
        sh: u32,
        cu: u32,
        simd: u32,
        wave: u32,
    },
}

fn parse_num(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let address = format!("{}:{}", args.hostname, args.port);
    let mut asic = client::connect(Box::new(TcpComm::new()), &address)?;

    match args.command {
        Command::Discover { save } => {
            println!(
                "{} (did {:#x}, family {}, {} blocks, vram {} MiB, gtt {} MiB)",
                asic.name,
                asic.did,
                asic.family,
                asic.blocks.len(),
                asic.config.vram_size >> 20,
                asic.config.gtt_size >> 20,
            );
            for block in &asic.blocks {
                println!(
                    "  {} ({}.{}.{}): {} registers",
                    block.name,
                    block.discoverable.maj,
                    block.discoverable.min,
                    block.discoverable.rev,
                    block.regs.len()
                );
            }

            if save {
                let buf = serial::serialize_asic(&asic)?;
                let path = serial::save_serialized_asic(Path::new("."), asic.did, &buf)?;
                println!("saved {}", path.display());
            }
        }

        Command::ReadReg { name } => {
            let reg = asic
                .find_reg_by_name(&name)
                .map(|(_, r)| r.clone())
                .ok_or_else(|| format!("no register named {name}"))?;

            let value = asic.read_reg(reg.addr, reg.class);
            println!("{} ({:#x}) = {:#010x}", reg.name, reg.addr, value);
            for bits in &reg.bits {
                let v = mmio::bitslice(&reg, &bits.name, u64::from(value)).unwrap();
                println!("  {}[{}:{}] = {:#x}", bits.name, bits.stop, bits.start, v);
            }
        }

        Command::WriteReg { name, value } => {
            let (addr, class) = asic
                .find_reg_by_name(&name)
                .map(|(_, r)| (r.addr, r.class))
                .ok_or_else(|| format!("no register named {name}"))?;

            asic.write_reg(addr, parse_num(&value)?, class)?;
        }

        Command::ReadMem { addr, size, sram } => {
            let addr = parse_num(&addr)?;
            let mut data = vec![0u8; size as usize];
            if sram {
                asic.access_sram(addr, MemXfer::Read(&mut data))?;
            } else {
                asic.access_linear_vram(addr, MemXfer::Read(&mut data))?;
            }

            for (i, chunk) in data.chunks(16).enumerate() {
                print!("{:#010x}:", addr + (i as u64) * 16);
                for b in chunk {
                    print!(" {b:02x}");
                }
                println!();
            }
        }

        Command::Translate { addr } => {
            let dma = parse_num(&addr)?;
            let phys = asic.gpu_bus_to_cpu_address(dma)?;
            println!("{dma:#x} -> {phys:#x}");
        }

        Command::Ring { name } => {
            let ring = asic.read_ring_data(&name)?;
            println!(
                "{name}: {} bytes, rptr {:#x}, wptr {:#x}, cached rptr {:#x}",
                ring.ringsize(),
                ring.rptr(),
                ring.wptr(),
                ring.cached_rptr()
            );
        }

        Command::Wave { se, sh, cu, simd, wave } => {
            let sel = WaveSelect {
                se,
                sh,
                cu_wgp: cu,
                simd,
                wave,
            };
            let wd = asic.get_wave_status(sel)?;
            println!(
                "wave {se}.{sh}.{cu}.{simd}.{wave}: valid={} halt={}",
                wd.valid(&asic),
                wd.halt(&asic)
            );
            for (i, w) in wd.words.iter().enumerate() {
                println!("  [{i:3}] {w:#010x}");
            }
        }
    }

    Ok(())
}
