// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

// Register lookup and bit slicing against the block tree.

use std::collections::HashMap;

use crate::{Bitfield, IpBlock, Register};

/// Lookup accelerator mapping register byte addresses and names to their
/// position in the block tree. Built once per model; indexes go stale if
/// the tree is rebuilt, so build again after mutating it.
#[derive(Debug, Default)]
pub struct MmioAccel {
    by_addr: HashMap<u64, (usize, usize)>,
    by_name: HashMap<String, (usize, usize)>,
}

impl MmioAccel {
    pub fn build(blocks: &[IpBlock]) -> Self {
        let mut accel = Self::default();
        for (bi, block) in blocks.iter().enumerate() {
            for (ri, reg) in block.regs.iter().enumerate() {
                accel.by_addr.entry(reg.addr).or_insert((bi, ri));
                accel.by_name.entry(reg.name.clone()).or_insert((bi, ri));
            }
        }
        accel
    }

    pub fn find_by_addr<'a>(
        &self,
        blocks: &'a [IpBlock],
        addr: u64,
    ) -> Option<(&'a IpBlock, &'a Register)> {
        let &(bi, ri) = self.by_addr.get(&addr)?;
        let block = blocks.get(bi)?;
        Some((block, block.regs.get(ri)?))
    }

    pub fn find_by_name<'a>(
        &self,
        blocks: &'a [IpBlock],
        name: &str,
    ) -> Option<(&'a IpBlock, &'a Register)> {
        let &(bi, ri) = self.by_name.get(name)?;
        let block = blocks.get(bi)?;
        Some((block, block.regs.get(ri)?))
    }
}

fn field_mask(bits: &Bitfield) -> u64 {
    let width = bits.stop - bits.start + 1;
    if width >= 64 {
        u64::MAX
    } else {
        ((1u64 << width) - 1) << bits.start
    }
}

/// Extract the named bitfield from a register value, shifted down to the
/// LSB. None if the register has no such field.
pub fn bitslice(reg: &Register, bitname: &str, value: u64) -> Option<u64> {
    let bits = reg.bits.iter().find(|b| b.name == bitname)?;
    Some((value & field_mask(bits)) >> bits.start)
}

/// Replace the named bitfield in `regvalue` with `fieldvalue`.
pub fn bitslice_compose(
    reg: &Register,
    bitname: &str,
    regvalue: u64,
    fieldvalue: u64,
) -> Option<u64> {
    let bits = reg.bits.iter().find(|b| b.name == bitname)?;
    let mask = field_mask(bits);
    Some((regvalue & !mask) | ((fieldvalue << bits.start) & mask))
}
