//! Rendertarget — FBO, attachments, and color swap chain.
//!
//! Data-only; the operations in §4.3 live on `Context` (`context.rs`)
//! since they need the active `Fenv` and the `Vstore` slotmap. Grounded
//! on `struct rendertarget` (`arcan_videoint.h`) and the newer anonymous
//! rendertarget struct threaded through `agp_setup_rendertarget`,
//! `alloc_fbo`, `agp_rendertarget_swap`, `agp_resize_rendertarget`,
//! `agp_rendertarget_dirty` in `glshared.c`.

use crate::config::SWAP_CHAIN_LEN;
use crate::context::VstoreId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendertargetMode {
    DepthOnly,
    Color,
    ColorDepth,
    ColorDepthStencil,
    Msaa,
}

bitflags::bitflags! {
    pub struct RendertargetFlags: u8 {
        const RETAIN_ALPHA = 0b1;
    }
}

/// One parked former swap-chain entry, retained until `dirty_flip`
/// drains to zero (§3, §9's "VecDeque of retiring stores with a TTL").
pub struct ShadowSlot {
    pub store: VstoreId,
    pub ttl: u32,
}

/// One dirty rectangle as produced by `DirtyReset`. The source's dirty
/// tracking only ever reports a single full-frame rectangle repeated
/// `decay` times (§4.3); the type still carries bounds so a future
/// sub-rect tracker has somewhere to put them without changing the
/// external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x1: u16,
    pub y1: u16,
    pub x2: u16,
    pub y2: u16,
}

impl Region {
    pub fn full() -> Region {
        Region { x1: 0, y1: 0, x2: u16::MAX, y2: u16::MAX }
    }
}

/// Callback queried on activation to decide whether an external consumer
/// (direct scanout) takes over the rendertarget's output.
pub trait ProxyHook {
    fn wants_scanout(&self, tag: u64) -> bool;
}

/// Callback used during swap-chain allocation/free so a rendertarget can
/// be backed by scanout-capable memory.
pub trait AllocatorHook {
    fn alloc(&self, tag: u64, w: u16, h: u16) -> VstoreId;
    fn free(&self, tag: u64, store: VstoreId);
}

pub struct Rendertarget {
    pub fbo: u32,
    pub depth_rb: u32,
    pub msaa_fbo: u32,
    pub msaa_color_rb: u32,
    pub msaa_depth_rb: u32,
    pub mode: RendertargetMode,
    pub flags: RendertargetFlags,

    /// Borrowed reference (not owned): the original color attachment
    /// before any swap chain existed.
    pub reference_store: VstoreId,

    /// Up to `SWAP_CHAIN_LEN` owned stores cycled front-to-back.
    /// `n_stores == 0` means no swap chain configured yet.
    pub swap_chain: [Option<VstoreId>; SWAP_CHAIN_LEN],
    pub n_stores: u8,
    pub store_ind: u8,
    pub shadows: Vec<ShadowSlot>,

    pub dirty_flip: u32,
    pub dirty_region: u32,
    pub dirty_decay: u32,
    pub resize_ack: bool,

    pub viewport: (i32, i32, u32, u32),
    pub clear_color: (f32, f32, f32, f32),

    pub proxy: Option<(Box<dyn ProxyHook>, u64)>,
    pub allocator: Option<(Box<dyn AllocatorHook>, u64)>,
}

impl Rendertarget {
    pub(crate) fn new(reference_store: VstoreId, mode: RendertargetMode, w: u16, h: u16) -> Rendertarget {
        Rendertarget {
            fbo: 0,
            depth_rb: 0,
            msaa_fbo: 0,
            msaa_color_rb: 0,
            msaa_depth_rb: 0,
            mode,
            flags: RendertargetFlags::empty(),
            reference_store,
            swap_chain: [None; SWAP_CHAIN_LEN],
            n_stores: 0,
            store_ind: 0,
            shadows: Vec::new(),
            dirty_flip: 0,
            dirty_region: 0,
            dirty_decay: 0,
            resize_ack: false,
            viewport: (0, 0, u32::from(w), u32::from(h)),
            clear_color: (0.05, 0.05, 0.05, 1.0),
            proxy: None,
            allocator: None,
        }
    }

    pub fn has_swap_chain(&self) -> bool {
        self.n_stores > 0
    }

    pub fn current_front(&self) -> Option<VstoreId> {
        if self.has_swap_chain() {
            self.swap_chain[self.store_ind as usize]
        } else {
            None
        }
    }
}
