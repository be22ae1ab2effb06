// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

// The client side. Connecting downloads the serialized ASIC, rebuilds the
// model, and attaches a remote hardware backend whose every operation is a
// protocol round-trip, so callers cannot tell the hardware is elsewhere.

use log::*;

use asic_db::{
    Asic, Bank, GprSelect, HwAccess, HwError, MemXfer, Options, RegClass, RingData, WaveSelect,
    FAMILY_VI, WAVE_STATUS_WORDS_MAX,
};

use crate::buffer::FramedBuffer;
use crate::comm::Comm;
use crate::serial::{self, NAME_WIDTH_REG};
use crate::{
    header_is_server, header_version, pack_header, Error, Opcode, ProtocolError, RUMR_VERSION,
};

/// Hardware backend that forwards every operation to a server.
///
/// Dropping it sends the one-way GOODBYE and closes the transport, so
/// freeing the remote-backed [`Asic`] is how a session ends.
pub struct RemoteHw {
    comm: Box<dyn Comm>,
    connected: bool,
}

impl RemoteHw {
    /// Transmit one request frame and receive the validated reply, leaving
    /// the reply cursor just past the header word.
    fn roundtrip(&mut self, frame: &FramedBuffer) -> Result<FramedBuffer, Error> {
        if let Err(e) = self.comm.tx(frame) {
            error!("could not transmit opcode to server");
            return Err(e.into());
        }

        let mut reply = self.comm.rx()?;

        let header = reply.read_u32();
        if header_version(header) != RUMR_VERSION {
            error!("incorrect server version returned from server");
            return Err(Error::Protocol(ProtocolError::WrongVersion));
        }
        if !header_is_server(header) {
            error!("incorrect server flag returned from server");
            return Err(Error::Protocol(ProtocolError::WrongDirection));
        }

        Ok(reply)
    }

    fn send_opcode(&mut self, opcode: Opcode, params: &[u32]) -> Result<FramedBuffer, Error> {
        let mut frame = FramedBuffer::new();
        frame.add_u32(pack_header(opcode, false));
        for &p in params {
            frame.add_u32(p);
        }
        self.roundtrip(&frame)
    }

    fn send_opcode_buf(&mut self, opcode: Opcode, body: &FramedBuffer) -> Result<FramedBuffer, Error> {
        let mut frame = FramedBuffer::new();
        frame.add_u32(pack_header(opcode, false));
        frame.add_buffer(body);
        self.roundtrip(&frame)
    }

    // There is no return packet for GOODBYE.
    fn send_goodbye(&mut self) {
        let mut frame = FramedBuffer::new();
        frame.add_u32(pack_header(Opcode::Goodbye, false));
        let _ = self.comm.tx(&frame);
        self.connected = false;
    }

    /// One memory operation: read, write, or (with no transfer) a DMA
    /// address translation. The echoed address is written back through
    /// `addr`; for translations it carries the physical address.
    fn mem_op(
        &mut self,
        addr: &mut u64,
        xfer: Option<MemXfer<'_>>,
        vram_en: bool,
    ) -> Result<(), HwError> {
        let size = xfer.as_ref().map_or(0, |x| x.len());
        let write_en = xfer.as_ref().is_some_and(|x| x.is_write());
        let subcommand: u32 = match &xfer {
            None => 2,
            Some(_) if vram_en => 0,
            Some(_) => 1,
        };

        let mut body = FramedBuffer::new();
        body.add_u64(*addr);
        body.add_u32(u32::from(write_en) << 2 | subcommand);
        body.add_u32(size as u32);
        if let Some(MemXfer::Write(src)) = &xfer {
            body.add_bytes(src);
        }

        let mut reply = self
            .send_opcode_buf(Opcode::MemAccess, &body)
            .map_err(|e| {
                error!("could not transmit memory opcode: {e}");
                HwError::Remote
            })?;

        if reply.read_u32() != 1 {
            error!("memory access at {addr:#x} refused by server");
            return Err(HwError::Remote);
        }

        *addr = reply.read_u64();
        if let Some(MemXfer::Read(dst)) = xfer {
            reply.read_bytes(dst);
        }

        if reply.failed() {
            return Err(HwError::Remote);
        }
        Ok(())
    }

    /// One register operation; the request body shape follows the bank
    /// selection in `opt`.
    fn reg_op(
        &mut self,
        opt: &Options,
        addr: u64,
        class: RegClass,
        value: Option<u64>,
    ) -> Result<u64, HwError> {
        let read_en = value.is_none();
        let (bank_bits, b0, b1, b2, b3) = match opt.bank {
            Bank::None => (0, 0, 0, 0, 0),
            Bank::Grbm { se, sh, instance } => (1 << 1, se, sh, instance, 0),
            Bank::Srbm {
                me,
                pipe,
                queue,
                vmid,
            } => (1 << 2, me, pipe, queue, vmid),
        };
        let access_bank = u32::from(read_en) | bank_bits | ((class as u32) << 3);

        let mut params = vec![
            addr as u32,
            (addr >> 32) as u32,
            access_bank,
            b0,
            b1,
            b2,
            b3,
        ];
        if let Some(v) = value {
            params.push(v as u32);
            params.push((v >> 32) as u32);
        }

        let mut reply = self.send_opcode(Opcode::RegAccess, &params).map_err(|e| {
            error!("could not transmit register opcode: {e}");
            HwError::Remote
        })?;

        if reply.read_u32() != 1 {
            error!("register access at {addr:#x} refused by server");
            return Err(HwError::Remote);
        }

        if read_en {
            let v = reply.read_u64();
            if reply.failed() {
                return Err(HwError::Remote);
            }
            Ok(v)
        } else {
            Ok(0)
        }
    }
}

impl HwAccess for RemoteHw {
    fn read_reg(&mut self, opt: &Options, addr: u64, class: RegClass) -> Result<u64, HwError> {
        self.reg_op(opt, addr, class, None)
    }

    fn write_reg(
        &mut self,
        opt: &Options,
        addr: u64,
        value: u64,
        class: RegClass,
    ) -> Result<(), HwError> {
        self.reg_op(opt, addr, class, Some(value)).map(|_| ())
    }

    fn access_sram(&mut self, _opt: &Options, addr: u64, xfer: MemXfer<'_>) -> Result<(), HwError> {
        let mut addr = addr;
        self.mem_op(&mut addr, Some(xfer), false)
    }

    fn access_linear_vram(
        &mut self,
        _opt: &Options,
        addr: u64,
        xfer: MemXfer<'_>,
    ) -> Result<(), HwError> {
        let mut addr = addr;
        self.mem_op(&mut addr, Some(xfer), true)
    }

    fn gpu_bus_to_cpu_address(&mut self, _opt: &Options, dma_addr: u64) -> Result<u64, HwError> {
        let mut addr = dma_addr;
        self.mem_op(&mut addr, None, false)?;
        Ok(addr)
    }

    fn get_wave_status_raw(
        &mut self,
        _opt: &Options,
        sel: &WaveSelect,
    ) -> Result<Vec<u32>, HwError> {
        let mut reply = self
            .send_opcode(
                Opcode::WaveAccess,
                &[sel.se, sel.sh, sel.cu_wgp, sel.simd, sel.wave],
            )
            .map_err(|e| {
                error!("could not transmit wavestatus opcode: {e}");
                HwError::Remote
            })?;

        if reply.read_u32() != 1 {
            return Err(HwError::Remote);
        }

        let byte_size = reply.read_u32() as usize;
        if byte_size > WAVE_STATUS_WORDS_MAX * 4 || byte_size % 4 != 0 {
            return Err(HwError::BadRequest("wave status block too large"));
        }

        let mut words = Vec::with_capacity(byte_size / 4);
        for _ in 0..byte_size / 4 {
            words.push(reply.read_u32());
        }

        if reply.failed() {
            return Err(HwError::Remote);
        }
        Ok(words)
    }

    fn read_gpr_raw(&mut self, _opt: &Options, sel: &GprSelect) -> Result<Vec<u32>, HwError> {
        let mut reply = self
            .send_opcode(
                Opcode::GprAccess,
                &[
                    sel.wave.se,
                    sel.wave.sh,
                    sel.wave.cu_wgp,
                    sel.wave.simd,
                    sel.wave.wave,
                    sel.thread,
                    sel.which as u32,
                    sel.offset,
                    sel.size,
                ],
            )
            .map_err(|e| {
                error!("could not transmit GPR opcode: {e}");
                HwError::Remote
            })?;

        if reply.read_u32() != 1 {
            return Err(HwError::Remote);
        }

        let byte_size = reply.read_u32();
        if byte_size > sel.size || byte_size % 4 != 0 {
            return Err(HwError::BadRequest("GPR block larger than requested"));
        }

        let mut words = Vec::with_capacity((byte_size / 4) as usize);
        for _ in 0..byte_size / 4 {
            words.push(reply.read_u32());
        }

        if reply.failed() {
            return Err(HwError::Remote);
        }
        Ok(words)
    }

    fn read_ring_data(&mut self, _opt: &Options, ring: &str) -> Result<RingData, HwError> {
        if ring.len() >= NAME_WIDTH_REG {
            return Err(HwError::BadRequest("ring name too long"));
        }
        let mut namebuf = [0u8; NAME_WIDTH_REG];
        namebuf[..ring.len()].copy_from_slice(ring.as_bytes());

        let mut body = FramedBuffer::new();
        body.add_bytes(&namebuf);

        let mut reply = self
            .send_opcode_buf(Opcode::RingAccess, &body)
            .map_err(|e| {
                error!("could not transmit ring opcode: {e}");
                HwError::Remote
            })?;

        if reply.read_u32() != 1 {
            return Err(HwError::Remote);
        }

        let ringsize = reply.read_u32() as usize;
        let data = reply.read_vec(ringsize + 12);
        if reply.failed() {
            return Err(HwError::Remote);
        }

        RingData::from_bytes(data).ok_or(HwError::Remote)
    }
}

impl Drop for RemoteHw {
    fn drop(&mut self) {
        if self.connected {
            self.send_goodbye();
        }
        self.comm.close();
    }
}

/// Establish a session and discover the ASIC on the other end.
///
/// On success the returned model has the remote backend attached, family
/// defaults applied, and the MMIO lookup accelerator built; every debug
/// operation on it is a protocol round-trip. Dropping the model ends the
/// session.
pub fn connect(mut comm: Box<dyn Comm>, addr: &str) -> Result<Asic, Error> {
    if let Err(e) = comm.connect(addr) {
        error!("could not establish connection to <{addr}>");
        return Err(e.into());
    }

    let mut hw = RemoteHw {
        comm,
        connected: true,
    };

    let mut reply = hw.send_opcode(Opcode::Discover, &[]).inspect_err(|_| {
        error!("could not transmit discover opcode");
    })?;

    let mut asic = serial::parse_serialized_asic(&mut reply).inspect_err(|_| {
        error!("could not discover ASIC");
    })?;

    asic.attach_hw(Box::new(hw));

    // Default shader options; on gfx9+ HS/GS are opaque and LS/ES take
    // their place.
    let family = asic.family;
    let shaders = &mut asic.options.shader_enable;
    shaders.vs = true;
    shaders.ps = true;
    shaders.es = true;
    shaders.ls = true;
    shaders.comp = true;
    if family <= FAMILY_VI {
        shaders.gs = true;
        shaders.hs = true;
    } else {
        shaders.es_ls_swap = true;
    }

    asic.options.vm_partition = -1;

    asic.create_mmio_accel();

    Ok(asic)
}
