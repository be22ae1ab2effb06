// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use asic_db::{Asic, Bank, GprBank, GprSelect, MemXfer, RegClass, WaveSelect};

use crate::buffer::FramedBuffer;
use crate::comm::Comm;
use crate::serial::{self, NAME_WIDTH_REG};
use crate::{
    header_is_server, header_opcode, header_version, Error, Opcode, ProtocolError, HDR_SERVER_BIT,
    RUMR_VERSION,
};

/// Largest GPR block one request may ask for, in bytes.
const GPR_BLOCK_MAX_BYTES: u32 = 4096;

/// Outcome of one request on an open session.
#[derive(Debug, PartialEq, Eq)]
pub enum Session {
    /// Reply sent (or deliberately dropped); keep the session.
    Continue,
    /// The client said GOODBYE; go back to accepting.
    Disconnected,
}

/// The server side of the protocol: one ASIC with a local hardware
/// backend, served to one client at a time.
///
/// The serialized ASIC is produced once at bind time and shared by every
/// DISCOVER reply.
pub struct Server {
    comm: Box<dyn Comm>,
    asic: Asic,
    serialized_asic: FramedBuffer,
}

impl Server {
    /// Serialize the ASIC, then delegate to the transport's bind.
    pub fn bind(mut comm: Box<dyn Comm>, asic: Asic, addr: &str) -> Result<Self, Error> {
        let serialized_asic = serial::serialize_asic(&asic)?;
        debug!(
            "serialized ASIC is {} bytes long",
            serialized_asic.woffset()
        );

        comm.bind(addr)?;
        Ok(Self {
            comm,
            asic,
            serialized_asic,
        })
    }

    /// Block until a client attaches.
    pub fn accept(&mut self) -> Result<(), Error> {
        debug!("accepting a new client...");
        self.comm.accept()?;
        Ok(())
    }

    pub fn asic(&self) -> &Asic {
        &self.asic
    }

    pub fn asic_mut(&mut self) -> &mut Asic {
        &mut self.asic
    }

    /// Serve sessions until the transport itself fails. Per-session errors
    /// drop that client and go back to accepting.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.accept()?;
            loop {
                match self.handle_request() {
                    Ok(Session::Continue) => {}
                    Ok(Session::Disconnected) => break,
                    Err(e) => {
                        warn!("client session ended: {e}");
                        self.comm.closeconn();
                        break;
                    }
                }
            }
        }
    }

    /// Receive, dispatch, and answer a single request.
    pub fn handle_request(&mut self) -> Result<Session, Error> {
        let mut req = self.comm.rx().inspect_err(|e| {
            warn!("could not receive client packet: {e}");
        })?;

        let header = req.read_u32();

        // Only accept packets from clients.
        if header_is_server(header) {
            warn!("packet header must not set SERVER bit");
            return Err(Error::Protocol(ProtocolError::WrongDirection));
        }
        if header_version(header) != RUMR_VERSION {
            warn!("packet header version number does not match what we are expecting");
            return Err(Error::Protocol(ProtocolError::WrongVersion));
        }

        let opcode_raw = header_opcode(header);
        let Some(opcode) = Opcode::from_u32(opcode_raw) else {
            warn!("invalid packet opcode ({opcode_raw:#x})");
            return Err(Error::Protocol(ProtocolError::UnknownOpcode(opcode_raw)));
        };

        // Reserve the first word of the reply for the echoed header.
        let mut reply = FramedBuffer::new();
        reply.add_u32(0);

        match opcode {
            Opcode::Discover => reply.add_buffer(&self.serialized_asic),
            Opcode::RegAccess => self.handle_reg_access(&mut req, &mut reply)?,
            Opcode::MemAccess => self.handle_mem_access(&mut req, &mut reply)?,
            Opcode::WaveAccess => self.handle_wave_access(&mut req, &mut reply)?,
            Opcode::GprAccess => self.handle_gpr_access(&mut req, &mut reply)?,
            Opcode::RingAccess => self.handle_ring_access(&mut req, &mut reply)?,
            Opcode::Goodbye => {
                self.comm.closeconn();
                return Ok(Session::Disconnected);
            }
        }

        // A reply the buffer could not hold is a bug worth logging, not a
        // reason to drop the client.
        if reply.failed() {
            error!("failed to create output buffer");
            return Ok(Session::Continue);
        }

        reply.patch_u32(0, header | HDR_SERVER_BIT);

        self.comm.tx(&reply).inspect_err(|e| {
            warn!("could not send response buffer to client: {e}");
        })?;

        Ok(Session::Continue)
    }

    fn handle_reg_access(
        &mut self,
        req: &mut FramedBuffer,
        reply: &mut FramedBuffer,
    ) -> Result<(), Error> {
        let addr = req.read_u64();
        let access_bank = req.read_u32();
        let read_en = access_bank & 1 != 0;
        let grbm_index = (access_bank >> 1) & 1 != 0;
        let srbm_index = (access_bank >> 2) & 1 != 0;
        let class_raw = (access_bank >> 3) & 0xFF;
        let se_or_me = req.read_u32();
        let sh_or_pipe = req.read_u32();
        let instance_or_queue = req.read_u32();
        let vmid = req.read_u32();
        let value = if read_en { 0 } else { req.read_u64() };

        if req.failed() {
            return Err(Error::Protocol(ProtocolError::Decode));
        }
        if grbm_index && srbm_index {
            warn!("cannot set both GRBM and SRBM index");
            return Err(Error::Protocol(ProtocolError::BankConflict));
        }
        let class =
            RegClass::from_u32(class_raw).ok_or(Error::Protocol(ProtocolError::Decode))?;

        self.asic.options.bank = if grbm_index {
            Bank::Grbm {
                se: se_or_me,
                sh: sh_or_pipe,
                instance: instance_or_queue,
            }
        } else if srbm_index {
            Bank::Srbm {
                me: se_or_me,
                pipe: sh_or_pipe,
                queue: instance_or_queue,
                vmid,
            }
        } else {
            Bank::None
        };

        let result = if read_en {
            self.asic.try_read_reg(addr, class).map(Some)
        } else {
            self.asic.write_reg(addr, value, class).map(|()| None)
        };

        // Turn off bank selection, on the failure path too.
        self.asic.options.bank = Bank::None;

        match result {
            Ok(readval) => {
                reply.add_u32(1);
                if let Some(v) = readval {
                    reply.add_u64(v);
                }
            }
            Err(e) => {
                warn!("register access at {addr:#x} failed: {e}");
                reply.add_u32(0);
            }
        }
        Ok(())
    }

    fn handle_mem_access(
        &mut self,
        req: &mut FramedBuffer,
        reply: &mut FramedBuffer,
    ) -> Result<(), Error> {
        let addr_lo = req.read_u32();
        let addr_hi = req.read_u32();
        let addr = u64::from(addr_lo) | (u64::from(addr_hi) << 32);
        let options = req.read_u32();
        let subcommand = options & 3;
        let write_en = (options >> 2) & 1 != 0;
        let size = req.read_u32();

        if req.failed() {
            return Err(Error::Protocol(ProtocolError::Decode));
        }
        if subcommand == 3 {
            warn!("invalid mem access subcommand");
            return Err(Error::Protocol(ProtocolError::InvalidSubcommand(subcommand)));
        }
        if size % 4 != 0 || addr % 4 != 0 {
            warn!("invalid size or address request (must be multiple of 4)");
            return Err(Error::Protocol(ProtocolError::BadAlignment));
        }
        if write_en && subcommand == 2 {
            warn!("cannot specify write with IOMMU translate");
            return Err(Error::Protocol(ProtocolError::InvalidSubcommand(subcommand)));
        }

        if subcommand == 2 {
            // Translating an IOMMU address: the reply echoes the physical
            // address in place of the request's.
            match self.asic.gpu_bus_to_cpu_address(addr) {
                Ok(phys) => {
                    reply.add_u32(1);
                    reply.add_u64(phys);
                }
                Err(e) => {
                    warn!("translation of {addr:#x} failed: {e}");
                    reply.add_u32(0);
                    reply.add_u32(addr_lo);
                    reply.add_u32(addr_hi);
                }
            }
            return Ok(());
        }

        if write_en {
            if size as usize != req.remaining() {
                warn!("write buffer size does not match remaining packet size");
                return Err(Error::Protocol(ProtocolError::LengthMismatch));
            }
            let payload = req.read_vec(size as usize);

            let r = if subcommand == 0 {
                self.asic.access_linear_vram(addr, MemXfer::Write(&payload))
            } else {
                self.asic.access_sram(addr, MemXfer::Write(&payload))
            };

            reply.add_u32(u32::from(r.is_ok()));
            reply.add_u32(addr_lo);
            reply.add_u32(addr_hi);
            if let Err(e) = r {
                warn!("memory write at {addr:#x} failed: {e}");
            }
        } else {
            let mut payload = vec![0u8; size as usize];

            let r = if subcommand == 0 {
                self.asic
                    .access_linear_vram(addr, MemXfer::Read(&mut payload))
            } else {
                self.asic.access_sram(addr, MemXfer::Read(&mut payload))
            };

            reply.add_u32(u32::from(r.is_ok()));
            reply.add_u32(addr_lo);
            reply.add_u32(addr_hi);
            match r {
                Ok(()) => reply.add_bytes(&payload),
                Err(e) => warn!("memory read at {addr:#x} failed: {e}"),
            }
        }
        Ok(())
    }

    fn handle_wave_access(
        &mut self,
        req: &mut FramedBuffer,
        reply: &mut FramedBuffer,
    ) -> Result<(), Error> {
        let sel = WaveSelect {
            se: req.read_u32(),
            sh: req.read_u32(),
            cu_wgp: req.read_u32(),
            simd: req.read_u32(),
            wave: req.read_u32(),
        };

        if req.failed() {
            return Err(Error::Protocol(ProtocolError::Decode));
        }

        match self.asic.get_wave_status(sel) {
            Ok(wd) => {
                reply.add_u32(1);
                reply.add_u32((wd.words.len() * 4) as u32);
                for w in &wd.words {
                    reply.add_u32(*w);
                }
            }
            Err(e) => {
                debug!("wave status read for {sel:?} failed: {e}");
                reply.add_u32(0);
            }
        }
        Ok(())
    }

    fn handle_gpr_access(
        &mut self,
        req: &mut FramedBuffer,
        reply: &mut FramedBuffer,
    ) -> Result<(), Error> {
        let wave = WaveSelect {
            se: req.read_u32(),
            sh: req.read_u32(),
            cu_wgp: req.read_u32(),
            simd: req.read_u32(),
            wave: req.read_u32(),
        };
        let thread = req.read_u32();
        let which_raw = req.read_u32();
        let offset = req.read_u32();
        let size = req.read_u32();

        if req.failed() {
            return Err(Error::Protocol(ProtocolError::Decode));
        }
        let which =
            GprBank::from_u32(which_raw).ok_or(Error::Protocol(ProtocolError::Decode))?;
        if size > GPR_BLOCK_MAX_BYTES {
            return Err(Error::Protocol(ProtocolError::Oversize));
        }
        if offset % 4 != 0 || size % 4 != 0 {
            return Err(Error::Protocol(ProtocolError::BadAlignment));
        }

        let sel = GprSelect {
            wave,
            thread,
            which,
            offset,
            size,
        };

        match self.asic.read_gpr_raw(&sel) {
            Ok(words) => {
                reply.add_u32(1);
                reply.add_u32((words.len() * 4) as u32);
                for w in &words {
                    reply.add_u32(*w);
                }
            }
            Err(e) => {
                debug!("GPR read for {sel:?} failed: {e}");
                reply.add_u32(0);
            }
        }
        Ok(())
    }

    fn handle_ring_access(
        &mut self,
        req: &mut FramedBuffer,
        reply: &mut FramedBuffer,
    ) -> Result<(), Error> {
        let mut namebuf = [0u8; NAME_WIDTH_REG];
        req.read_bytes(&mut namebuf);
        if req.failed() {
            return Err(Error::Protocol(ProtocolError::Decode));
        }

        namebuf[NAME_WIDTH_REG - 1] = 0;
        let end = namebuf.iter().position(|&b| b == 0).unwrap();
        let ringname = String::from_utf8_lossy(&namebuf[..end]).into_owned();

        // The blob carries a 12-byte RPTR/WPTR/cached-RPTR header ahead of
        // the contents; ringsize counts the contents only.
        match self.asic.read_ring_data(&ringname) {
            Ok(ring) => {
                reply.add_u32(1);
                reply.add_u32(ring.ringsize());
                reply.add_bytes(ring.as_bytes());
            }
            Err(e) => {
                debug!("ring read for {ringname:?} failed: {e}");
                reply.add_u32(0);
            }
        }
        Ok(())
    }

    /// Close down the server.
    pub fn close(mut self) {
        self.comm.close();
    }
}
