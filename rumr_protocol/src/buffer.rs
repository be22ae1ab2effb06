// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

/// A byte buffer with independent append and consume cursors and a sticky
/// failure flag.
///
/// Appends never store partial values: if growth fails, the flag is set
/// and the value is dropped. Reads never return partial values: on
/// underflow the destination is zeroed, the flag is set, and the cursor
/// moves to the end. Once set the flag stays set, but cursor arithmetic
/// keeps running, so a parser can stay linear and check the flag exactly
/// once at the end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FramedBuffer {
    data: Vec<u8>,
    roffset: usize,
    failed: bool,
}

impl FramedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap received bytes for consumption; the write cursor sits at the
    /// end.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            roffset: 0,
            failed: false,
        }
    }

    /// Write offset: total bytes appended so far.
    pub fn woffset(&self) -> usize {
        self.data.len()
    }

    /// Bytes left between the read cursor and the write cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.roffset
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn set_failed(&mut self) {
        self.failed = true;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn grow(&mut self, additional: usize) -> bool {
        if self.data.try_reserve(additional).is_err() {
            self.failed = true;
            return false;
        }
        true
    }

    pub fn add_u32(&mut self, v: u32) {
        if self.grow(4) {
            self.data.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Append a u64 as two u32 halves, low word first.
    pub fn add_u64(&mut self, v: u64) {
        self.add_u32(v as u32);
        self.add_u32((v >> 32) as u32);
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        if self.grow(bytes.len()) {
            self.data.extend_from_slice(bytes);
        }
    }

    /// Append the full contents of another buffer (its read cursor is not
    /// consulted).
    pub fn add_buffer(&mut self, other: &FramedBuffer) {
        self.add_bytes(other.as_slice());
        if other.failed {
            self.failed = true;
        }
    }

    /// Overwrite 4 bytes previously appended, e.g. a header slot reserved
    /// at the front of a reply.
    pub fn patch_u32(&mut self, offset: usize, v: u32) {
        if offset + 4 > self.data.len() {
            self.failed = true;
            return;
        }
        self.data[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn read_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.read_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    /// Consume a u64 stored as two u32 halves, low word first.
    pub fn read_u64(&mut self) -> u64 {
        let lo = self.read_u32();
        let hi = self.read_u32();
        u64::from(lo) | (u64::from(hi) << 32)
    }

    pub fn read_bytes(&mut self, dst: &mut [u8]) {
        if self.remaining() < dst.len() {
            dst.fill(0);
            self.roffset = self.data.len();
            self.failed = true;
            return;
        }
        dst.copy_from_slice(&self.data[self.roffset..self.roffset + dst.len()]);
        self.roffset += dst.len();
    }

    /// Consume `len` bytes into a fresh vector.
    pub fn read_vec(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_bytes(&mut out);
        out
    }
}
