//! Tunables for behavior the source left as magic numbers.
//!
//! Populated from a `config::Config` the same way `render-gl`'s window
//! setup threads one through; `AgpConfig::default()` reproduces the
//! hardcoded constants from the source untouched.

use config::Config;

/// Number of buffered color stores in a rendertarget's swap chain.
///
/// Kept at 4, matching the source. Exposed as a named constant rather than
/// a config field: changing it changes the external dirty-tracking
/// contract (S2), so it is not something a deployment should tune at
/// runtime.
pub const SWAP_CHAIN_LEN: usize = 4;

/// Fixed size, in slots, of the shader manager's program table.
pub const SHADER_SLOT_COUNT: usize = 256;

/// Number of fixed environment uniforms (the ABI table in spec §4.4).
pub const ENV_UNIFORM_COUNT: usize = 14;

/// Number of fixed vertex attribute semantics.
pub const VERTEX_ATTRIBUTE_COUNT: usize = 9;

/// Byte size of a uniform group entry's payload (enough for a mat4).
pub const UNIFORM_PAYLOAD_BYTES: usize = 64;

/// Hard cap on uniform groups per shader slot.
pub const MAX_UNIFORM_GROUPS: u32 = 65_535;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgpConfig {
    /// Ratio (0.0-1.0) above which `stream_prepare` treats a dirty
    /// sub-rect as a full upload rather than a partial one.
    pub sub_rect_upload_threshold: f32,

    /// "Conservative" mode from the source: when `true`, a vstore's
    /// CPU-side backing buffer is freed after a successful upload to
    /// save memory; when `false`, it is retained (needed if the caller
    /// will read it back, e.g. via `copy_region`, without a GPU
    /// readback).
    pub conservative_backing: bool,

    /// Upload-buffer pool size in bytes used by the PBO streaming path.
    pub upload_buffer_size: usize,
}

impl Default for AgpConfig {
    fn default() -> AgpConfig {
        AgpConfig {
            sub_rect_upload_threshold: 0.5,
            conservative_backing: false,
            upload_buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl AgpConfig {
    /// Overlay values found under the `agp.*` keys of `cfg` on top of the
    /// defaults. Missing keys keep their default value.
    pub fn from_config(cfg: &Config) -> AgpConfig {
        let mut out = AgpConfig::default();
        if let Ok(v) = cfg.get_float("agp.sub_rect_upload_threshold") {
            out.sub_rect_upload_threshold = v as f32;
        }
        if let Ok(v) = cfg.get_bool("agp.conservative_backing") {
            out.conservative_backing = v;
        }
        if let Ok(v) = cfg.get_int("agp.upload_buffer_size") {
            out.upload_buffer_size = v as usize;
        }
        out
    }
}
