// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod buffer;
pub mod client;
pub mod comm;
pub mod serial;
pub mod server;

use std::fmt;

/// Only supported version of the remote-debug protocol.
pub const RUMR_VERSION: u32 = 1;

/// The request/reply operations of the protocol. The set is closed; codes
/// are stable and 0 is never assigned, so an all-zero header is always an
/// unknown opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    /// Download the serialized ASIC description.
    Discover = 1,
    /// Read or write one MMIO/SMC/PCIE/SMN register.
    RegAccess = 2,
    /// Read/write VRAM or system memory, or translate a DMA address.
    MemAccess = 3,
    /// Read one wavefront's status block.
    WaveAccess = 4,
    /// Read one wavefront's SGPRs or one thread's VGPRs.
    GprAccess = 5,
    /// Read a named ring buffer plus its pointer header.
    RingAccess = 6,
    /// Client disconnecting; no reply.
    Goodbye = 7,
}

impl Opcode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Discover),
            2 => Some(Self::RegAccess),
            3 => Some(Self::MemAccess),
            4 => Some(Self::WaveAccess),
            5 => Some(Self::GprAccess),
            6 => Some(Self::RingAccess),
            7 => Some(Self::Goodbye),
            _ => None,
        }
    }
}

/// Bit 0 of the header word: set on every server-originated frame, clear
/// on every client-originated frame.
pub const HDR_SERVER_BIT: u32 = 1;

/// Pack a frame header word: `[opcode << 10 | version << 1 | server]`.
pub fn pack_header(opcode: Opcode, server: bool) -> u32 {
    ((opcode as u32) << 10) | (RUMR_VERSION << 1) | u32::from(server)
}

pub fn header_version(header: u32) -> u32 {
    (header >> 1) & 0xFF
}

pub fn header_opcode(header: u32) -> u32 {
    (header >> 10) & 0xFF
}

pub fn header_is_server(header: u32) -> bool {
    header & HDR_SERVER_BIT != 0
}

/// The possible errors that can arise from carrying a debug request or
/// reply across the transport.
#[derive(Debug)]
pub enum Error {
    /// Protocol errors are detected before any hardware operation runs;
    /// the peer that sees one drops the connection.
    Protocol(ProtocolError),

    /// The hardware operation itself failed; the connection survives.
    Hw(asic_db::HwError),

    /// Errors returned by I/O failures.
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Hw(e) => write!(f, "Hardware error: {e}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<asic_db::HwError> for Error {
    fn from(e: asic_db::HwError) -> Self {
        Self::Hw(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Generic decoding error: a frame was shorter or shaped differently
    /// than its opcode requires.
    Decode,

    /// Frame version did not match RUMR_VERSION.
    WrongVersion,

    /// The SERVER bit was set on a request, or clear on a reply.
    WrongDirection,

    /// Opcode outside the defined set.
    UnknownOpcode(u32),

    /// Memory-access subcommand outside the defined set, or an illegal
    /// combination (write with translate).
    InvalidSubcommand(u32),

    /// GRBM and SRBM banking requested at once.
    BankConflict,

    /// Memory size or address not a multiple of 4.
    BadAlignment,

    /// A write payload did not match the declared size.
    LengthMismatch,

    /// A name does not fit its fixed-width wire field.
    NameTooLong,

    /// The serialized config blob exceeds the model's capacity.
    ConfigTooLarge,

    /// A counted or sized field exceeds what the peer will carry.
    Oversize,

    /// The server reported failure for this request.
    RemoteFault,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode => write!(f, "Error decoding"),
            Self::WrongVersion => {
                write!(f, "Only protocol version {RUMR_VERSION} is supported")
            }
            Self::WrongDirection => write!(f, "SERVER bit set on the wrong side"),
            Self::UnknownOpcode(op) => write!(f, "Unknown opcode {op:#x}"),
            Self::InvalidSubcommand(sc) => write!(f, "Invalid memory subcommand {sc}"),
            Self::BankConflict => write!(f, "Cannot set both GRBM and SRBM index"),
            Self::BadAlignment => write!(f, "Size and address must be multiples of 4"),
            Self::LengthMismatch => write!(f, "Write payload does not match declared size"),
            Self::NameTooLong => write!(f, "Name does not fit its wire field"),
            Self::ConfigTooLarge => write!(f, "Config blob exceeds capacity"),
            Self::Oversize => write!(f, "Field exceeds carrier bound"),
            Self::RemoteFault => write!(f, "Server reported failure"),
        }
    }
}
