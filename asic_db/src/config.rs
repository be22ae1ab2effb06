// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use crate::Asic;

/// Capacity of the opaque GCA configuration blob. A serialized ASIC whose
/// config length exceeds this is rejected outright.
pub const CONFIG_DATA_CAP: usize = 1024;

/// Shader geometry derived from the kernel's `gca_config` dump: a run of
/// little-endian u32 fields led by a format version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcaGeometry {
    pub version: u32,
    pub max_shader_engines: u32,
    pub max_tile_pipes: u32,
    pub max_cu_per_sh: u32,
    pub max_sh_per_se: u32,
    pub max_backends_per_se: u32,
    pub max_texture_channel_caches: u32,
    pub max_gprs: u32,
    pub max_gs_threads: u32,
    pub max_hw_contexts: u32,
}

const GEOMETRY_WORDS: usize = 10;

impl GcaGeometry {
    /// Encode back into blob form, for building models by hand.
    pub fn to_blob(&self) -> Vec<u8> {
        let words = [
            self.version,
            self.max_shader_engines,
            self.max_tile_pipes,
            self.max_cu_per_sh,
            self.max_sh_per_se,
            self.max_backends_per_se,
            self.max_texture_channel_caches,
            self.max_gprs,
            self.max_gs_threads,
            self.max_hw_contexts,
        ];
        let mut blob = Vec::with_capacity(GEOMETRY_WORDS * 4);
        for w in words {
            blob.extend_from_slice(&w.to_le_bytes());
        }
        blob
    }
}

/// Derive per-ASIC parameters from the opaque config blob. Called once
/// after a serialized ASIC is parsed. A blob that is too short or carries
/// an unrecognized version is left undecoded; the model stays usable.
pub fn scan_config_gca_data(asic: &mut Asic) {
    let data = &asic.config.data;
    if data.len() < GEOMETRY_WORDS * 4 {
        debug!(
            "config blob too short to scan ({} bytes), skipping",
            data.len()
        );
        return;
    }

    let word = |i: usize| u32::from_le_bytes(data[i * 4..i * 4 + 4].try_into().unwrap());

    let version = word(0);
    if version == 0 || version > 5 {
        debug!("unrecognized gca_config version {version}, skipping");
        return;
    }

    asic.geometry = Some(GcaGeometry {
        version,
        max_shader_engines: word(1),
        max_tile_pipes: word(2),
        max_cu_per_sh: word(3),
        max_sh_per_se: word(4),
        max_backends_per_se: word(5),
        max_texture_channel_caches: word(6),
        max_gprs: word(7),
        max_gs_threads: word(8),
        max_hw_contexts: word(9),
    });
}
