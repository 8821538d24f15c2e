//! VSTORE — refcounted GPU texture storage.
//!
//! The `Vstore` type here is data-only; the operations in §4.2 are
//! implemented as `Context` methods in `context.rs` since most of them
//! need the active `Fenv` and, for slice/cube/copy operations, access to
//! sibling stores. Grounded on `struct storage_info_t`
//! (`arcan_videoint.h`, superseded in the newer source by the anonymous
//! vstore struct threaded through `glshared.c`'s `agp_empty_vstore` /
//! `agp_update_vstore` / `agp_slice_vstore` / `agp_vstore_copyreg`).

use crate::context::VstoreId;
use crate::format::{FormatHint, HdrMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    None,
    Linear,
    Bilinear,
    Trilinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    ClampToEdge,
    Repeat,
}

/// `state` tag from the data model (§3). `glid_proxy` elsewhere is
/// modeled as `Vstore::glid_proxy: Option<VstoreId>` rather than folded
/// into this tag, since proxying is orthogonal to storage shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VstoreKind {
    Off,
    Tex2D,
    Depth,
    /// Six Tex2D slice sources, indexed face order +X -X +Y -Y +Z -Z.
    Cube { faces: [Option<VstoreId>; 6] },
    /// Power-of-two slices along the third axis.
    Tex3D { slices: Vec<VstoreId> },
    TextureAtlas,
}

/// Opaque handle supplied by the platform layer's buffer-mapping
/// callback for an imported external image (e.g. a DMA-BUF EGLImage).
/// `-1` signals "release", matching the source's drop notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalHandle(pub i64);

/// One plane of an externally allocated multi-plane image handed to
/// `stream_prepare`'s `HandleImport` kind, mirroring `struct
/// agp_buffer_plane` (`platform_video_map_buffer`'s `planes` argument in
/// `egl-dri/video.c`): a dma-buf fd plus the geometry/modifier needed to
/// import it as an EGLImage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlane {
    pub fd: i32,
    pub w: u16,
    pub h: u16,
    pub stride: u32,
    pub offset: u32,
    pub modifier: u64,
}

/// Platform capability behind §6's "Buffer-mapping callback": imports an
/// externally supplied multi-plane image into a vstore's 2D GPU id, and
/// is notified when that import is no longer referenced. Mirrors
/// `platform_video_map_buffer`/`platform_video_map_handle`
/// (`egl-dri/video.c`, `glshared.c`).
pub trait BufferMapHook {
    /// Bind `planes` into `vstore`'s texture. Returns the opaque handle
    /// to retain for the later release notification, or `None` if the
    /// import failed (the caller keeps whatever GL id it already
    /// allocated and may retry on a later frame).
    fn map(&self, vstore: VstoreId, planes: &[BufferPlane]) -> Option<ExternalHandle>;

    /// Notifies the importer that `handle` is no longer referenced.
    /// Invoked with `ExternalHandle(-1)` on drop, matching
    /// `platform_video_map_handle(s, -1)`.
    fn release(&self, vstore: VstoreId, handle: ExternalHandle);
}

pub struct Vstore {
    pub kind: VstoreKind,
    pub refcount: u32,
    pub w: u16,
    pub h: u16,
    pub bpp: u8,
    pub src_format: FormatHint,
    pub dst_format: FormatHint,
    pub filter: FilterMode,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub glid: u32,
    /// Handle+lookup indirection replacing the source's `glid_proxy`
    /// pointer-into-sibling (§9). When set, `resolve_texid` dereferences
    /// through `Context::vstores` instead of following a raw pointer.
    pub glid_proxy: Option<VstoreId>,
    pub backing: Option<Vec<u8>>,
    pub read_pbo: Option<u32>,
    pub write_pbo: Option<u32>,
    pub external: Option<ExternalHandle>,
    pub updated_ts: u64,
    pub hdr: Option<HdrMetadata>,
}

impl Vstore {
    pub(crate) fn new(w: u16, h: u16, format: FormatHint) -> Vstore {
        let info = crate::format::lookup(format);
        Vstore {
            kind: VstoreKind::Off,
            refcount: 1,
            w,
            h,
            bpp: info.bytes_per_pixel,
            src_format: format,
            dst_format: format,
            filter: FilterMode::Linear,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            glid: 0,
            glid_proxy: None,
            backing: None,
            read_pbo: None,
            write_pbo: None,
            external: None,
            updated_ts: 0,
            hdr: None,
        }
    }

    pub fn has_gpu_id(&self) -> bool {
        self.glid != 0
    }
}

/// `slice_backing` target shape (§4.2). Dimensions for both variants
/// must be powers of two per the §3 invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceMode {
    Cube,
    Tex3D { slices: u8 },
}

/// Stream kind sum type from §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Raw,
    RawCopy,
    RawDirect,
    RawDirectCopy,
    RawDirectSync,
    ExtResync,
    HandleImport,
}

impl StreamKind {
    pub fn keeps_cpu_copy(self) -> bool {
        matches!(self, StreamKind::RawCopy | StreamKind::RawDirectCopy)
    }
}

/// Dirty sub-rect metadata passed to `stream_prepare`. `planes` is only
/// populated for `StreamKind::HandleImport`, where it carries the
/// externally supplied multi-plane image (§4.2's `meta.planes`/
/// `meta.used` in the source).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMeta {
    pub x1: u16,
    pub y1: u16,
    pub w: u16,
    pub h: u16,
    pub dirty: bool,
    pub planes: Vec<BufferPlane>,
}

impl StreamMeta {
    pub fn full(w: u16, h: u16) -> StreamMeta {
        StreamMeta {
            x1: 0,
            y1: 0,
            w,
            h,
            dirty: true,
            planes: Vec::new(),
        }
    }

    /// Builds the meta used with `StreamKind::HandleImport`: no CPU-side
    /// rect, just the plane list to hand to the buffer-map hook.
    pub fn for_import(planes: Vec<BufferPlane>) -> StreamMeta {
        StreamMeta {
            x1: 0,
            y1: 0,
            w: 0,
            h: 0,
            dirty: false,
            planes,
        }
    }

    fn area(&self) -> u64 {
        u64::from(self.w) * u64::from(self.h)
    }

    /// Whether the dirty sub-rect covers enough of the store that a full
    /// upload is cheaper than a sub-rect one (§4.2, S4).
    pub fn exceeds_threshold(&self, store_w: u16, store_h: u16, threshold: f32) -> bool {
        let total = u64::from(store_w) * u64::from(store_h);
        if total == 0 {
            return true;
        }
        (self.area() as f64 / total as f64) as f32 > threshold
    }
}

/// Result of `poll_readback`: dimensions, a pointer valid only until
/// `release` is invoked, matching the async readback contract in §5.
pub struct ReadbackMeta {
    pub w: u16,
    pub h: u16,
    pub ptr: *const u8,
    pub len: usize,
}

impl ReadbackMeta {
    pub fn empty() -> ReadbackMeta {
        ReadbackMeta {
            w: 0,
            h: 0,
            ptr: std::ptr::null(),
            len: 0,
        }
    }
}
