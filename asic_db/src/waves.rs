// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

// Wave-status decoding. The raw block a backend returns is the sequence of
// ixSQ_WAVE_* registers in model order, one word each, matching what the
// kernel's wave-data readers produce. All field access goes through the
// register model so new families only need new register descriptions.

use crate::{mmio, Asic, Register};

/// Prefix shared by the per-wave status registers in the model.
pub const WAVE_REG_PREFIX: &str = "ixSQ_WAVE_";

/// Word offset of the trap registers within an SGPR read, and how many
/// words they occupy.
pub const TRAP_GPR_OFFSET_WORDS: usize = 0x6C;
pub const TRAP_GPR_WORDS: usize = 16;

/// Coordinates of one wavefront slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WaveSelect {
    pub se: u32,
    pub sh: u32,
    pub cu_wgp: u32,
    pub simd: u32,
    pub wave: u32,
}

/// One wavefront's raw status words plus the slot they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveData {
    pub sel: WaveSelect,
    pub words: Vec<u32>,
}

/// Position of a wave register's word within the raw block: its rank among
/// the ixSQ_WAVE_* registers of the model, in declaration order.
fn wave_reg_offset<'a>(asic: &'a Asic, regname: &str) -> Option<(usize, &'a Register)> {
    let mut index = 0;
    for block in &asic.blocks {
        for reg in &block.regs {
            if !reg.name.starts_with(WAVE_REG_PREFIX) {
                continue;
            }
            if reg.name == regname {
                return Some((index, reg));
            }
            index += 1;
        }
    }
    None
}

impl WaveData {
    /// The whole word of one wave register, if present in this block.
    pub fn get_value(&self, asic: &Asic, regname: &str) -> Option<u32> {
        let (offset, _) = wave_reg_offset(asic, regname)?;
        self.words.get(offset).copied()
    }

    /// One named bitfield of one wave register.
    pub fn get_bits(&self, asic: &Asic, regname: &str, bitname: &str) -> Option<u32> {
        let (offset, reg) = wave_reg_offset(asic, regname)?;
        let value = *self.words.get(offset)?;
        mmio::bitslice(reg, bitname, u64::from(value)).map(|v| v as u32)
    }

    fn status_flag(&self, asic: &Asic, bitname: &str) -> bool {
        self.get_bits(asic, "ixSQ_WAVE_STATUS", bitname)
            .is_some_and(|v| v != 0)
    }

    pub fn valid(&self, asic: &Asic) -> bool {
        self.status_flag(asic, "VALID")
    }

    pub fn halt(&self, asic: &Asic) -> bool {
        self.status_flag(asic, "HALT")
    }

    pub fn trap_en(&self, asic: &Asic) -> bool {
        self.status_flag(asic, "TRAP_EN")
    }

    pub fn priv_flag(&self, asic: &Asic) -> bool {
        self.status_flag(asic, "PRIV")
    }

    /// SGPR allocation field, in units the family's shift turns into words.
    pub fn sgpr_alloc(&self, asic: &Asic) -> Option<u32> {
        self.get_bits(asic, "ixSQ_WAVE_GPR_ALLOC", "SGPR_SIZE")
    }

    /// VGPR allocation field, in units of `vgpr_granularity` blocks.
    pub fn vgpr_alloc(&self, asic: &Asic) -> Option<u32> {
        self.get_bits(asic, "ixSQ_WAVE_GPR_ALLOC", "VGPR_SIZE")
    }

    /// Program counter assembled from the PC_LO/PC_HI wave registers.
    pub fn pc(&self, asic: &Asic) -> Option<u64> {
        let lo = self.get_value(asic, "ixSQ_WAVE_PC_LO")?;
        let hi = self.get_value(asic, "ixSQ_WAVE_PC_HI")?;
        Some(u64::from(lo) | (u64::from(hi) << 32))
    }
}
