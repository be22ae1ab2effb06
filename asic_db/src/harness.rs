// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

// A scripted hardware backend. Register, memory, wave, GPR, and ring
// contents are all staged in plain maps, so servers and tests can run
// without a GPU. Handles are cheap clones over shared state, which lets a
// test keep a handle while the server side owns the attached copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::GcaGeometry;
use crate::waves::WaveSelect;
use crate::{
    Asic, Bank, Bitfield, Discoverable, GprBank, GprSelect, HwAccess, HwError, IpBlock, MemXfer,
    Options, RegClass, Register, RingData, FAMILY_AI,
};

#[derive(Default)]
struct HarnessState {
    regs: HashMap<u64, u64>,
    sram: HashMap<u64, u32>,
    vram: HashMap<u64, u32>,
    dma_map: HashMap<u64, u64>,
    waves: HashMap<WaveSelect, Vec<u32>>,
    sgprs: HashMap<WaveSelect, Vec<u32>>,
    vgprs: HashMap<(WaveSelect, u32), Vec<u32>>,
    rings: HashMap<String, RingData>,

    /// Bank selection observed on the most recent register access.
    last_bank: Bank,
}

#[derive(Clone, Default)]
pub struct TestHarness {
    state: Arc<Mutex<HarnessState>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reg(&self, addr: u64, value: u64) {
        self.state.lock().unwrap().regs.insert(addr, value);
    }

    pub fn get_reg(&self, addr: u64) -> Option<u64> {
        self.state.lock().unwrap().regs.get(&addr).copied()
    }

    pub fn set_sram(&self, addr: u64, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        store_words(&mut state.sram, addr, bytes);
    }

    pub fn set_vram(&self, addr: u64, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        store_words(&mut state.vram, addr, bytes);
    }

    pub fn get_vram(&self, addr: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        load_words(&state.vram, addr, len)
    }

    pub fn get_sram(&self, addr: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        load_words(&state.sram, addr, len)
    }

    pub fn set_translation(&self, dma_addr: u64, phys: u64) {
        self.state.lock().unwrap().dma_map.insert(dma_addr, phys);
    }

    pub fn set_wave(&self, sel: WaveSelect, words: Vec<u32>) {
        self.state.lock().unwrap().waves.insert(sel, words);
    }

    pub fn set_sgprs(&self, sel: WaveSelect, words: Vec<u32>) {
        self.state.lock().unwrap().sgprs.insert(sel, words);
    }

    pub fn set_vgprs(&self, sel: WaveSelect, thread: u32, words: Vec<u32>) {
        self.state
            .lock()
            .unwrap()
            .vgprs
            .insert((sel, thread), words);
    }

    pub fn set_ring(&self, name: &str, ring: RingData) {
        self.state.lock().unwrap().rings.insert(name.into(), ring);
    }

    /// Bank selection seen by the most recent register access.
    pub fn last_bank(&self) -> Bank {
        self.state.lock().unwrap().last_bank
    }
}

fn store_words(map: &mut HashMap<u64, u32>, addr: u64, bytes: &[u8]) {
    assert!(addr % 4 == 0 && bytes.len() % 4 == 0);
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        map.insert(addr + (i as u64) * 4, u32::from_le_bytes(chunk.try_into().unwrap()));
    }
}

fn load_words(map: &HashMap<u64, u32>, addr: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for i in 0..(len / 4) {
        let word = map.get(&(addr + (i as u64) * 4)).copied().unwrap_or(0);
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

fn check_mem_args(addr: u64, len: usize) -> Result<(), HwError> {
    if addr % 4 != 0 || len % 4 != 0 {
        return Err(HwError::BadRequest("memory access must be 4-aligned"));
    }
    Ok(())
}

fn mem_access(
    map: &mut HashMap<u64, u32>,
    addr: u64,
    xfer: MemXfer<'_>,
) -> Result<(), HwError> {
    check_mem_args(addr, xfer.len())?;
    match xfer {
        MemXfer::Read(dst) => {
            let got = load_words(map, addr, dst.len());
            dst.copy_from_slice(&got);
        }
        MemXfer::Write(src) => store_words(map, addr, src),
    }
    Ok(())
}

impl HwAccess for TestHarness {
    fn read_reg(&mut self, opt: &Options, addr: u64, _class: RegClass) -> Result<u64, HwError> {
        let mut state = self.state.lock().unwrap();
        state.last_bank = opt.bank;
        state.regs.get(&addr).copied().ok_or(HwError::Unmapped(addr))
    }

    fn write_reg(
        &mut self,
        opt: &Options,
        addr: u64,
        value: u64,
        _class: RegClass,
    ) -> Result<(), HwError> {
        let mut state = self.state.lock().unwrap();
        state.last_bank = opt.bank;
        state.regs.insert(addr, value);
        Ok(())
    }

    fn access_sram(&mut self, _opt: &Options, addr: u64, xfer: MemXfer<'_>) -> Result<(), HwError> {
        mem_access(&mut self.state.lock().unwrap().sram, addr, xfer)
    }

    fn access_linear_vram(
        &mut self,
        _opt: &Options,
        addr: u64,
        xfer: MemXfer<'_>,
    ) -> Result<(), HwError> {
        mem_access(&mut self.state.lock().unwrap().vram, addr, xfer)
    }

    fn gpu_bus_to_cpu_address(&mut self, _opt: &Options, dma_addr: u64) -> Result<u64, HwError> {
        self.state
            .lock()
            .unwrap()
            .dma_map
            .get(&dma_addr)
            .copied()
            .ok_or(HwError::Unmapped(dma_addr))
    }

    fn get_wave_status_raw(
        &mut self,
        _opt: &Options,
        sel: &WaveSelect,
    ) -> Result<Vec<u32>, HwError> {
        self.state
            .lock()
            .unwrap()
            .waves
            .get(sel)
            .cloned()
            .ok_or(HwError::BadRequest("no such wave"))
    }

    fn read_gpr_raw(&mut self, _opt: &Options, sel: &GprSelect) -> Result<Vec<u32>, HwError> {
        let state = self.state.lock().unwrap();
        let words = match sel.which {
            GprBank::Sgpr => state.sgprs.get(&sel.wave),
            GprBank::Vgpr => state.vgprs.get(&(sel.wave, sel.thread)),
        }
        .ok_or(HwError::BadRequest("no such wave"))?;

        let start = (sel.offset / 4) as usize;
        let end = (start + (sel.size / 4) as usize).min(words.len());
        if start >= words.len() {
            return Ok(Vec::new());
        }
        Ok(words[start..end].to_vec())
    }

    fn read_ring_data(&mut self, _opt: &Options, ring: &str) -> Result<RingData, HwError> {
        self.state
            .lock()
            .unwrap()
            .rings
            .get(ring)
            .cloned()
            .ok_or(HwError::BadRequest("no such ring"))
    }
}

fn bit(name: &str, start: u32, stop: u32) -> Bitfield {
    Bitfield {
        name: name.into(),
        start,
        stop,
    }
}

fn reg(name: &str, addr: u64, bits: Vec<Bitfield>) -> Register {
    Register {
        name: name.into(),
        class: RegClass::Mmio,
        addr,
        bit64: false,
        bits,
    }
}

/// A small but complete model for servers and tests: a GC block with the
/// wave-status registers and a handful of command-processor registers, and
/// an MMHUB block. The wave registers follow the gfx9 field layout.
pub fn demo_asic() -> Asic {
    let gc = IpBlock {
        name: "gfx900".into(),
        discoverable: Discoverable {
            die: 0,
            maj: 9,
            min: 0,
            rev: 0,
            instance: 0,
            logical_inst: 0,
        },
        regs: vec![
            reg(
                "ixSQ_WAVE_STATUS",
                0x0408,
                vec![
                    bit("SCC", 0, 0),
                    bit("PRIV", 5, 5),
                    bit("TRAP_EN", 6, 6),
                    bit("EXECZ", 9, 9),
                    bit("VCCZ", 10, 10),
                    bit("HALT", 13, 13),
                    bit("VALID", 16, 16),
                ],
            ),
            reg("ixSQ_WAVE_PC_LO", 0x040C, vec![]),
            reg("ixSQ_WAVE_PC_HI", 0x0410, vec![]),
            reg("ixSQ_WAVE_EXEC_LO", 0x0414, vec![]),
            reg("ixSQ_WAVE_EXEC_HI", 0x0418, vec![]),
            reg(
                "ixSQ_WAVE_GPR_ALLOC",
                0x041C,
                vec![
                    bit("VGPR_BASE", 0, 5),
                    bit("VGPR_SIZE", 8, 13),
                    bit("SGPR_BASE", 16, 21),
                    bit("SGPR_SIZE", 24, 27),
                ],
            ),
            reg(
                "mmGRBM_STATUS",
                0x8010,
                vec![bit("ME0PIPE0_CMDFIFO_AVAIL", 0, 3), bit("GUI_ACTIVE", 31, 31)],
            ),
            reg("mmCP_RB0_BASE", 0xC100, vec![]),
            reg(
                "mmCP_RB0_CNTL",
                0xC104,
                vec![bit("RB_BUFSZ", 0, 5), bit("RB_BLKSZ", 8, 13)],
            ),
        ],
    };

    let mmhub = IpBlock {
        name: "mmhub1_0".into(),
        discoverable: Discoverable {
            die: 0,
            maj: 1,
            min: 0,
            rev: 0,
            instance: 0,
            logical_inst: 0,
        },
        regs: vec![
            reg(
                "mmVM_L2_PROTECTION_FAULT_STATUS",
                0x1440,
                vec![
                    bit("MORE_FAULTS", 0, 0),
                    bit("WALKER_ERROR", 1, 3),
                    bit("PERMISSION_FAULTS", 4, 7),
                    bit("MAPPING_ERROR", 8, 8),
                ],
            ),
            reg("mmVM_L2_PROTECTION_FAULT_ADDR_LO32", 0x1444, vec![]),
            reg("mmVM_L2_PROTECTION_FAULT_ADDR_HI32", 0x1448, vec![]),
        ],
    };

    let mut asic = Asic::new("vega10", 0x6860, FAMILY_AI);
    asic.vgpr_granularity = 2;
    asic.is_apu = false;
    asic.config.data = GcaGeometry {
        version: 3,
        max_shader_engines: 4,
        max_tile_pipes: 8,
        max_cu_per_sh: 16,
        max_sh_per_se: 1,
        max_backends_per_se: 4,
        max_texture_channel_caches: 16,
        max_gprs: 256,
        max_gs_threads: 32,
        max_hw_contexts: 8,
    }
    .to_blob();
    asic.config.vram_size = 8 << 30;
    asic.config.vis_vram_size = 256 << 20;
    asic.config.gtt_size = 8 << 30;
    asic.blocks = vec![gc, mmhub];
    asic
}

/// [`demo_asic`] with a freshly scripted harness attached. The returned
/// handle shares state with the attached backend.
pub fn demo_asic_with_harness() -> (Asic, TestHarness) {
    let mut asic = demo_asic();
    let harness = TestHarness::new();

    harness.set_reg(0x8010, 0x8000_0001);
    harness.set_reg(0xC100, 0x0040_0000);
    harness.set_reg(0xC104, 0x0000_0A08);
    harness.set_vram(0x0, &[0u8; 64]);
    harness.set_translation(0x4000_0000, 0x1_2345_6000);
    harness.set_ring(
        "gfx",
        RingData::new(0x10, 0x20, 0x10, &[0u8; 256]),
    );

    asic.attach_hw(Box::new(harness.clone()));
    asic.create_mmio_accel();
    (asic, harness)
}
