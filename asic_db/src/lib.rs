// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod config;
pub mod harness;
pub mod mmio;
pub mod waves;

use std::fmt;

pub use config::{scan_config_gca_data, GcaGeometry, CONFIG_DATA_CAP};
pub use mmio::MmioAccel;
pub use waves::{WaveData, WaveSelect};

/// Chip families, as reported by the kernel. Ordering matters: several
/// behaviors key off "at or before" a given family.
pub const FAMILY_SI: u32 = 110;
pub const FAMILY_CIK: u32 = 120;
pub const FAMILY_VI: u32 = 130;
pub const FAMILY_AI: u32 = 141;
pub const FAMILY_RV: u32 = 142;
pub const FAMILY_NV: u32 = 143;

/// Sentinel returned by [`Asic::read_reg`] when the access fails, since that
/// signature returns a bare u32.
pub const REG_READ_SENTINEL: u32 = 0xBEBEBEEF;

/// Upper bound, in u32 words, on a raw wave-status block. Applied by both
/// the reader and any transport that carries wave data.
pub const WAVE_STATUS_WORDS_MAX: usize = 256;

/// How a register is addressed by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegClass {
    Mmio = 0,
    Didt = 1,
    Smc = 2,
    Pcie = 3,
    Smn = 4,
}

impl RegClass {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Mmio),
            1 => Some(Self::Didt),
            2 => Some(Self::Smc),
            3 => Some(Self::Pcie),
            4 => Some(Self::Smn),
            _ => None,
        }
    }
}

/// One named bit range within a register. `start`/`stop` are inclusive bit
/// positions, `stop >= start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    pub name: String,
    pub start: u32,
    pub stop: u32,
}

/// One register within an IP block. `addr` is a byte address; MMIO byte
/// addresses are 4-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub name: String,
    pub class: RegClass,
    pub addr: u64,
    pub bit64: bool,
    pub bits: Vec<Bitfield>,
}

/// Identifiers assigned to an IP block by hardware discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Discoverable {
    pub die: u32,
    pub maj: u32,
    pub min: u32,
    pub rev: u32,
    pub instance: u32,
    pub logical_inst: u32,
}

/// A functional unit of the GPU with its own register file.
#[derive(Debug, Clone, PartialEq)]
pub struct IpBlock {
    pub name: String,
    pub discoverable: Discoverable,
    pub regs: Vec<Register>,
}

/// Memory sizes and the opaque GCA configuration dump for an ASIC.
///
/// `data` is bounded by [`CONFIG_DATA_CAP`]; the interesting fields are
/// derived from it by [`scan_config_gca_data`] after the model is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsicConfig {
    pub data: Vec<u8>,
    pub vram_size: u64,
    pub vis_vram_size: u64,
    pub gtt_size: u64,
}

/// Register bank selection applied before a banked register access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Bank {
    #[default]
    None,
    /// Select a shader engine / shader array / instance.
    Grbm { se: u32, sh: u32, instance: u32 },
    /// Select a micro engine / pipe / queue / VMID.
    Srbm { me: u32, pipe: u32, queue: u32, vmid: u32 },
}

/// Which shader types a debugger front-end wants decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShaderEnable {
    pub vs: bool,
    pub ps: bool,
    pub es: bool,
    pub ls: bool,
    pub gs: bool,
    pub hs: bool,
    pub comp: bool,
    pub es_ls_swap: bool,
}

/// Runtime options that steer hardware accesses. The bank selection is
/// transient: it is set before a banked register access and cleared after.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub bank: Bank,
    pub vm_partition: i32,
    pub shader_enable: ShaderEnable,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bank: Bank::None,
            vm_partition: -1,
            shader_enable: ShaderEnable::default(),
        }
    }
}

/// Direction and payload of a memory access.
pub enum MemXfer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl MemXfer<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Read(d) => d.len(),
            Self::Write(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

/// Whether a GPR read targets scalar or vector registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GprBank {
    Sgpr = 0,
    Vgpr = 1,
}

impl GprBank {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Sgpr),
            1 => Some(Self::Vgpr),
            _ => None,
        }
    }
}

/// A raw GPR block read: `offset` and `size` are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GprSelect {
    pub wave: WaveSelect,
    pub thread: u32,
    pub which: GprBank,
    pub offset: u32,
    pub size: u32,
}

/// A ring-buffer snapshot: a 12-byte RPTR/WPTR/cached-RPTR header followed
/// by the ring contents. `ringsize` counts the contents only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingData {
    data: Vec<u8>,
}

impl RingData {
    pub fn new(rptr: u32, wptr: u32, cached_rptr: u32, contents: &[u8]) -> Self {
        let mut data = Vec::with_capacity(12 + contents.len());
        data.extend_from_slice(&rptr.to_le_bytes());
        data.extend_from_slice(&wptr.to_le_bytes());
        data.extend_from_slice(&cached_rptr.to_le_bytes());
        data.extend_from_slice(contents);
        Self { data }
    }

    /// Rebuild from raw header + contents bytes, e.g. off the wire. The
    /// input must carry at least the 12-byte header.
    pub fn from_bytes(data: Vec<u8>) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }
        Some(Self { data })
    }

    pub fn ringsize(&self) -> u32 {
        (self.data.len() - 12) as u32
    }

    pub fn rptr(&self) -> u32 {
        u32::from_le_bytes(self.data[0..4].try_into().unwrap())
    }

    pub fn wptr(&self) -> u32 {
        u32::from_le_bytes(self.data[4..8].try_into().unwrap())
    }

    pub fn cached_rptr(&self) -> u32 {
        u32::from_le_bytes(self.data[8..12].try_into().unwrap())
    }

    pub fn contents(&self) -> &[u8] {
        &self.data[12..]
    }

    /// Header and contents as one byte run, the shape carried on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// The possible failures of a hardware access, local or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwError {
    /// The ASIC model has no hardware backend attached.
    NoBackend,

    /// The address is not backed by anything the backend knows about.
    Unmapped(u64),

    /// The request itself was malformed (bad selector, missing wave field,
    /// oversized block, ...).
    BadRequest(&'static str),

    /// A remote backend could not complete the operation.
    Remote,
}

impl std::error::Error for HwError {}

impl fmt::Display for HwError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoBackend => write!(f, "no hardware backend attached"),
            Self::Unmapped(a) => write!(f, "address {a:#x} is not mapped"),
            Self::BadRequest(what) => write!(f, "bad request: {what}"),
            Self::Remote => write!(f, "remote hardware access failed"),
        }
    }
}

/// The capability surface an ASIC model needs from its hardware backend.
///
/// A local implementation binds these to kernel debugfs / MMIO; a remote
/// one to protocol round-trips. Register accesses honor the bank selection
/// carried in `opt`; the other operations take `opt` for uniformity (e.g.
/// the VM partition for VRAM walks). Backends cross thread boundaries when
/// a server is spawned, hence `Send`.
pub trait HwAccess: Send {
    fn read_reg(&mut self, opt: &Options, addr: u64, class: RegClass) -> Result<u64, HwError>;

    fn write_reg(
        &mut self,
        opt: &Options,
        addr: u64,
        value: u64,
        class: RegClass,
    ) -> Result<(), HwError>;

    /// Access system RAM at a GPU-bus-relative address.
    fn access_sram(&mut self, opt: &Options, addr: u64, xfer: MemXfer<'_>) -> Result<(), HwError>;

    /// Access VRAM at an address relative to the start of VRAM.
    fn access_linear_vram(
        &mut self,
        opt: &Options,
        addr: u64,
        xfer: MemXfer<'_>,
    ) -> Result<(), HwError>;

    /// Translate a GPU-bound DMA address to a CPU physical address.
    fn gpu_bus_to_cpu_address(&mut self, opt: &Options, dma_addr: u64) -> Result<u64, HwError>;

    /// Read one wavefront's raw status block, at most
    /// [`WAVE_STATUS_WORDS_MAX`] words, in the order the kernel returns it.
    fn get_wave_status_raw(
        &mut self,
        opt: &Options,
        sel: &WaveSelect,
    ) -> Result<Vec<u32>, HwError>;

    /// Read a raw block of SGPRs or VGPRs for one wave.
    fn read_gpr_raw(&mut self, opt: &Options, sel: &GprSelect) -> Result<Vec<u32>, HwError>;

    /// Read a named ring buffer plus its pointer header.
    fn read_ring_data(&mut self, opt: &Options, ring: &str) -> Result<RingData, HwError>;
}

/// In-memory description of one ASIC: identity, memory sizes, and the
/// block → register → bitfield tree, plus the runtime options and an
/// optional hardware backend that makes the debug operations live.
pub struct Asic {
    pub name: String,
    pub did: u32,
    pub family: u32,
    pub vgpr_granularity: u32,
    pub is_apu: bool,
    pub config: AsicConfig,
    pub blocks: Vec<IpBlock>,

    /// Geometry derived from `config.data` by [`scan_config_gca_data`].
    pub geometry: Option<GcaGeometry>,

    pub options: Options,

    accel: Option<MmioAccel>,
    hw: Option<Box<dyn HwAccess>>,
}

impl Asic {
    pub fn new(name: &str, did: u32, family: u32) -> Self {
        Self {
            name: name.to_string(),
            did,
            family,
            vgpr_granularity: 0,
            is_apu: false,
            config: AsicConfig::default(),
            blocks: Vec::new(),
            geometry: None,
            options: Options::default(),
            accel: None,
            hw: None,
        }
    }

    pub fn attach_hw(&mut self, hw: Box<dyn HwAccess>) {
        self.hw = Some(hw);
    }

    pub fn has_hw(&self) -> bool {
        self.hw.is_some()
    }

    /// Build the MMIO lookup accelerator from the current block tree. Call
    /// again after mutating the tree.
    pub fn create_mmio_accel(&mut self) {
        self.accel = Some(MmioAccel::build(&self.blocks));
    }

    pub fn find_reg_by_addr(&self, addr: u64) -> Option<(&IpBlock, &Register)> {
        match &self.accel {
            Some(accel) => accel.find_by_addr(&self.blocks, addr),
            None => self
                .blocks
                .iter()
                .find_map(|b| b.regs.iter().find(|r| r.addr == addr).map(|r| (b, r))),
        }
    }

    pub fn find_reg_by_name(&self, name: &str) -> Option<(&IpBlock, &Register)> {
        match &self.accel {
            Some(accel) => accel.find_by_name(&self.blocks, name),
            None => self
                .blocks
                .iter()
                .find_map(|b| b.regs.iter().find(|r| r.name == name).map(|r| (b, r))),
        }
    }

    /// Read a 32-bit register by byte address. Returns
    /// [`REG_READ_SENTINEL`] on failure.
    pub fn read_reg(&mut self, addr: u64, class: RegClass) -> u32 {
        match self.try_read_reg(addr, class) {
            Ok(v) => v as u32,
            Err(_) => REG_READ_SENTINEL,
        }
    }

    pub fn try_read_reg(&mut self, addr: u64, class: RegClass) -> Result<u64, HwError> {
        let hw = self.hw.as_mut().ok_or(HwError::NoBackend)?;
        hw.read_reg(&self.options, addr, class)
    }

    pub fn write_reg(&mut self, addr: u64, value: u64, class: RegClass) -> Result<(), HwError> {
        let hw = self.hw.as_mut().ok_or(HwError::NoBackend)?;
        hw.write_reg(&self.options, addr, value, class)
    }

    pub fn access_sram(&mut self, addr: u64, xfer: MemXfer<'_>) -> Result<(), HwError> {
        let hw = self.hw.as_mut().ok_or(HwError::NoBackend)?;
        hw.access_sram(&self.options, addr, xfer)
    }

    pub fn access_linear_vram(&mut self, addr: u64, xfer: MemXfer<'_>) -> Result<(), HwError> {
        let hw = self.hw.as_mut().ok_or(HwError::NoBackend)?;
        hw.access_linear_vram(&self.options, addr, xfer)
    }

    pub fn gpu_bus_to_cpu_address(&mut self, dma_addr: u64) -> Result<u64, HwError> {
        let hw = self.hw.as_mut().ok_or(HwError::NoBackend)?;
        hw.gpu_bus_to_cpu_address(&self.options, dma_addr)
    }

    /// Read and wrap one wavefront's status block.
    pub fn get_wave_status(&mut self, sel: WaveSelect) -> Result<WaveData, HwError> {
        let hw = self.hw.as_mut().ok_or(HwError::NoBackend)?;
        let words = hw.get_wave_status_raw(&self.options, &sel)?;
        if words.len() > WAVE_STATUS_WORDS_MAX {
            return Err(HwError::BadRequest("wave status block too large"));
        }
        Ok(WaveData { sel, words })
    }

    pub fn read_gpr_raw(&mut self, sel: &GprSelect) -> Result<Vec<u32>, HwError> {
        let hw = self.hw.as_mut().ok_or(HwError::NoBackend)?;
        hw.read_gpr_raw(&self.options, sel)
    }

    /// Read the SGPRs allocated to a wave. When the wave is in trap or
    /// privileged state the trap registers are fetched with a second raw
    /// read and placed at word [`waves::TRAP_GPR_OFFSET_WORDS`].
    pub fn read_sgprs(&mut self, wd: &WaveData) -> Result<Vec<u32>, HwError> {
        // SI..CIK allocate SGPRs in 8-dword blocks, VI and up in 16-dword
        // blocks.
        let shift = if self.family <= FAMILY_CIK { 3 } else { 4 };
        let alloc = wd
            .sgpr_alloc(self)
            .ok_or(HwError::BadRequest("wave data carries no SGPR_SIZE field"))?;
        let words = ((alloc + 1) << shift) as usize;
        let want_trap = wd.trap_en(self) || wd.priv_flag(self);

        let len = if want_trap {
            words.max(waves::TRAP_GPR_OFFSET_WORDS + waves::TRAP_GPR_WORDS)
        } else {
            words
        };
        let mut dst = vec![0u32; len];

        let sel = GprSelect {
            wave: wd.sel,
            thread: 0,
            which: GprBank::Sgpr,
            offset: 0,
            size: (words * 4) as u32,
        };
        let got = self.read_gpr_raw(&sel)?;
        let n = got.len().min(words);
        dst[..n].copy_from_slice(&got[..n]);

        if want_trap {
            let sel = GprSelect {
                wave: wd.sel,
                thread: 0,
                which: GprBank::Sgpr,
                offset: (waves::TRAP_GPR_OFFSET_WORDS * 4) as u32,
                size: (waves::TRAP_GPR_WORDS * 4) as u32,
            };
            let got = self.read_gpr_raw(&sel)?;
            let n = got.len().min(waves::TRAP_GPR_WORDS);
            dst[waves::TRAP_GPR_OFFSET_WORDS..waves::TRAP_GPR_OFFSET_WORDS + n]
                .copy_from_slice(&got[..n]);
        }

        Ok(dst)
    }

    /// Read the VGPRs allocated to a wave for one thread.
    pub fn read_vgprs(&mut self, wd: &WaveData, thread: u32) -> Result<Vec<u32>, HwError> {
        let alloc = wd
            .vgpr_alloc(self)
            .ok_or(HwError::BadRequest("wave data carries no VGPR_SIZE field"))?;
        let words = ((alloc + 1) << self.vgpr_granularity) as usize;
        let mut dst = vec![0u32; words];

        let sel = GprSelect {
            wave: wd.sel,
            thread,
            which: GprBank::Vgpr,
            offset: 0,
            size: (words * 4) as u32,
        };
        let got = self.read_gpr_raw(&sel)?;
        let n = got.len().min(words);
        dst[..n].copy_from_slice(&got[..n]);

        Ok(dst)
    }

    pub fn read_ring_data(&mut self, ring: &str) -> Result<RingData, HwError> {
        let hw = self.hw.as_mut().ok_or(HwError::NoBackend)?;
        hw.read_ring_data(&self.options, ring)
    }
}

impl fmt::Debug for Asic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Asic")
            .field("name", &self.name)
            .field("did", &self.did)
            .field("family", &self.family)
            .field("vgpr_granularity", &self.vgpr_granularity)
            .field("is_apu", &self.is_apu)
            .field("config", &self.config)
            .field("blocks", &self.blocks)
            .field("geometry", &self.geometry)
            .field("options", &self.options)
            .field("hw", &self.hw.is_some())
            .finish()
    }
}

// Structural equality over the serializable description only; runtime
// options and the attached backend do not participate.
impl PartialEq for Asic {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.did == other.did
            && self.family == other.family
            && self.vgpr_granularity == other.vgpr_granularity
            && self.is_apu == other.is_apu
            && self.config == other.config
            && self.blocks == other.blocks
    }
}
