// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::path::PathBuf;

use clap::Parser;

use asic_db::harness::{self, TestHarness};
use rumr_protocol::comm::{Comm, TcpComm, UnixComm};
use rumr_protocol::serial;
use rumr_protocol::server::Server;

/// Serve an ASIC to remote debug clients. Without --sasic the built-in
/// demo model is served; either way the hardware behind it is a scripted
/// harness.
#[derive(Debug, Parser)]
struct Cli {
    /// TCP address to listen on.
    #[arg(long, default_value = "0.0.0.0:9099")]
    bind: String,

    /// Listen on a UNIX socket path instead of TCP.
    #[arg(long)]
    unix: Option<String>,

    /// Serve a previously saved ASIC description instead of the demo one.
    #[arg(long)]
    sasic: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let asic = match args.sasic {
        Some(path) => {
            let mut bytes = serial::load_serialized_asic(&path)?;
            let mut asic = serial::parse_serialized_asic(&mut bytes)?;
            asic.attach_hw(Box::new(TestHarness::new()));
            asic.create_mmio_accel();
            asic
        }
        None => harness::demo_asic_with_harness().0,
    };

    let (comm, addr): (Box<dyn Comm>, String) = match args.unix {
        Some(path) => (Box::new(UnixComm::new()), path),
        None => (Box::new(TcpComm::new()), args.bind),
    };

    let mut server = Server::bind(comm, asic, &addr)?;
    server.run()?;

    Ok(())
}
