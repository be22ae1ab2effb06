// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};

use crate::buffer::FramedBuffer;

/// Upper bound on one frame; anything larger is treated as a corrupt
/// length prefix.
pub const MAX_FRAME_BYTES: usize = 1 << 26;

/// A bidirectional, message-framed byte channel.
///
/// Within one connection `rx` returns frames in the order `tx` sent them;
/// both block. A server calls `bind` then `accept`; a client calls
/// `connect`. `closeconn` drops the current session but keeps the bind
/// alive, `close` drops everything. Adapters cross thread boundaries when
/// a server is spawned, hence `Send`.
pub trait Comm: Send {
    fn bind(&mut self, addr: &str) -> io::Result<()>;
    fn accept(&mut self) -> io::Result<()>;
    fn connect(&mut self, addr: &str) -> io::Result<()>;
    fn tx(&mut self, frame: &FramedBuffer) -> io::Result<()>;
    fn rx(&mut self) -> io::Result<FramedBuffer>;
    fn closeconn(&mut self);
    fn close(&mut self);
}

/// Send one frame on a byte stream: a 4-byte little-endian length prefix,
/// then the frame bytes.
fn write_frame<S: Write>(stream: &mut S, frame: &FramedBuffer) -> io::Result<()> {
    let len = frame.woffset();
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }

    stream.write_all(&(len as u32).to_le_bytes())?;
    stream.write_all(frame.as_slice())?;
    stream.flush()
}

/// Receive one frame from a byte stream into a fresh buffer.
fn read_frame<S: Read>(stream: &mut S) -> io::Result<FramedBuffer> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame length prefix out of range",
        ));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data)?;
    Ok(FramedBuffer::from_vec(data))
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "no active session")
}

/// TCP transport; the address syntax is `host:port`.
#[derive(Default)]
pub struct TcpComm {
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

impl TcpComm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Comm for TcpComm {
    fn bind(&mut self, addr: &str) -> io::Result<()> {
        self.listener = Some(TcpListener::bind(addr)?);
        Ok(())
    }

    fn accept(&mut self) -> io::Result<()> {
        let listener = self.listener.as_ref().ok_or_else(not_connected)?;
        let (stream, _) = listener.accept()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn connect(&mut self, addr: &str) -> io::Result<()> {
        self.stream = Some(TcpStream::connect(addr)?);
        Ok(())
    }

    fn tx(&mut self, frame: &FramedBuffer) -> io::Result<()> {
        write_frame(self.stream.as_mut().ok_or_else(not_connected)?, frame)
    }

    fn rx(&mut self) -> io::Result<FramedBuffer> {
        read_frame(self.stream.as_mut().ok_or_else(not_connected)?)
    }

    fn closeconn(&mut self) {
        self.stream = None;
    }

    fn close(&mut self) {
        self.stream = None;
        self.listener = None;
    }
}

/// UNIX-domain-socket transport; the address is a filesystem path.
#[derive(Default)]
pub struct UnixComm {
    listener: Option<UnixListener>,
    stream: Option<UnixStream>,
}

impl UnixComm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Comm for UnixComm {
    fn bind(&mut self, addr: &str) -> io::Result<()> {
        // ENOENT from the removal is expected; any real problem shows up
        // in bind().
        let _ = std::fs::remove_file(addr);
        self.listener = Some(UnixListener::bind(addr)?);
        Ok(())
    }

    fn accept(&mut self) -> io::Result<()> {
        let listener = self.listener.as_ref().ok_or_else(not_connected)?;
        let (stream, _) = listener.accept()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn connect(&mut self, addr: &str) -> io::Result<()> {
        self.stream = Some(UnixStream::connect(addr)?);
        Ok(())
    }

    fn tx(&mut self, frame: &FramedBuffer) -> io::Result<()> {
        write_frame(self.stream.as_mut().ok_or_else(not_connected)?, frame)
    }

    fn rx(&mut self) -> io::Result<FramedBuffer> {
        read_frame(self.stream.as_mut().ok_or_else(not_connected)?)
    }

    fn closeconn(&mut self) {
        self.stream = None;
    }

    fn close(&mut self) {
        self.stream = None;
        self.listener = None;
    }
}

/// An in-process "pipe", constructed using socketpair(2), that can be used
/// for testing client and server behavior without a listener.
pub mod pipe {
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    use std::io;

    use super::{not_connected, read_frame, write_frame, Comm};
    use crate::buffer::FramedBuffer;

    pub struct Endpoint {
        fd: std::os::fd::OwnedFd,
    }

    pub fn pipe() -> io::Result<(Endpoint, Endpoint)> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )?;

        Ok((Endpoint { fd: a }, Endpoint { fd: b }))
    }

    impl io::Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            Ok(nix::unistd::read(&self.fd, buf)?)
        }
    }

    impl io::Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(nix::unistd::write(&self.fd, buf)?)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A [`Comm`] over one end of a socketpair. The session is already
    /// established, so bind/accept/connect are immediate.
    pub struct PipeComm {
        endpoint: Option<Endpoint>,
    }

    impl PipeComm {
        pub fn new(endpoint: Endpoint) -> Self {
            Self {
                endpoint: Some(endpoint),
            }
        }
    }

    impl Comm for PipeComm {
        fn bind(&mut self, _addr: &str) -> io::Result<()> {
            Ok(())
        }

        fn accept(&mut self) -> io::Result<()> {
            if self.endpoint.is_some() {
                Ok(())
            } else {
                Err(not_connected())
            }
        }

        fn connect(&mut self, _addr: &str) -> io::Result<()> {
            self.accept()
        }

        fn tx(&mut self, frame: &FramedBuffer) -> io::Result<()> {
            write_frame(self.endpoint.as_mut().ok_or_else(not_connected)?, frame)
        }

        fn rx(&mut self) -> io::Result<FramedBuffer> {
            read_frame(self.endpoint.as_mut().ok_or_else(not_connected)?)
        }

        fn closeconn(&mut self) {
            self.endpoint = None;
        }

        fn close(&mut self) {
            self.endpoint = None;
        }
    }
}
