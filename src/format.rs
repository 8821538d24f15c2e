//! Pixel format tags and their mapping onto GL upload parameters.
//!
//! The table shape (tag -> internal/upload format triple) is grounded on
//! `GlFormatInfo`/`from_format` in the teacher's `backend_gl::format`
//! module; the tag set itself comes from `agp_empty_vstoreext`'s
//! `VSTORE_HINT_*` switch in the source.

use crate::fenv::raw;

/// Format hint passed to `Vstore::empty_ext`, mirroring the source's
/// `enum txstore_hint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatHint {
    Normal,
    /// RGB565, no alpha channel.
    LoDefNoAlpha,
    /// RGB565 variant retained for parity with the source's naming; same
    /// storage as `LoDefNoAlpha` on backends without a dedicated RGBA4444.
    LoDef,
    /// RGB10A2.
    HiDef,
    /// Half-float RGBA16F.
    F16,
    /// Full-float RGBA32F.
    F32,
    Depth,
}

#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    pub internal_format: u32,
    pub upload_format: u32,
    pub upload_type: u32,
    pub bytes_per_pixel: u8,
    pub has_alpha: bool,
}

pub fn lookup(hint: FormatHint) -> FormatInfo {
    match hint {
        FormatHint::Normal => FormatInfo {
            internal_format: raw::RGBA8,
            upload_format: raw::RGBA,
            upload_type: raw::UNSIGNED_BYTE,
            bytes_per_pixel: 4,
            has_alpha: true,
        },
        FormatHint::LoDef => FormatInfo {
            internal_format: raw::RGB565,
            upload_format: raw::RGB,
            upload_type: raw::UNSIGNED_SHORT_5_6_5,
            bytes_per_pixel: 2,
            has_alpha: false,
        },
        FormatHint::LoDefNoAlpha => FormatInfo {
            internal_format: raw::RGB565,
            upload_format: raw::RGB,
            upload_type: raw::UNSIGNED_SHORT_5_6_5,
            bytes_per_pixel: 2,
            has_alpha: false,
        },
        FormatHint::HiDef => FormatInfo {
            internal_format: raw::RGB10_A2,
            upload_format: raw::RGBA,
            upload_type: raw::UNSIGNED_INT_2_10_10_10_REV,
            bytes_per_pixel: 4,
            has_alpha: true,
        },
        FormatHint::F16 => FormatInfo {
            internal_format: raw::RGBA16F,
            upload_format: raw::RGBA,
            upload_type: raw::HALF_FLOAT,
            bytes_per_pixel: 8,
            has_alpha: true,
        },
        FormatHint::F32 => FormatInfo {
            internal_format: raw::RGBA32F,
            upload_format: raw::RGBA,
            upload_type: raw::FLOAT,
            bytes_per_pixel: 16,
            has_alpha: true,
        },
        FormatHint::Depth => FormatInfo {
            internal_format: raw::DEPTH_COMPONENT24,
            upload_format: raw::DEPTH_COMPONENT,
            upload_type: raw::UNSIGNED_INT,
            bytes_per_pixel: 4,
            has_alpha: false,
        },
    }
}

/// Optional HDR metadata block attached to a vstore's content.
///
/// Pure passthrough state: the source treats this as opaque data for the
/// compositor below AGP to interpret, so there are no verbs beyond
/// construction and field access.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HdrMetadata {
    pub eotf: Eotf,
    pub primaries: [(f32, f32); 3],
    pub white_point: (f32, f32),
    pub min_luminance: f32,
    pub max_luminance: f32,
    pub max_content_light_level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eotf {
    Sdr,
    Pq,
    Hlg,
}
