//! FENV — the late-bound GL function dispatch table.
//!
//! Grounded on `struct agp_fenv` (`glfun.h`) and `agp_alloc_fenv` /
//! `agp_glinit_fenv` / `agp_init` (`glshared.c`): a table of GL entry
//! points resolved once at startup through a caller-supplied lookup
//! function, plus a small amount of tracking state so draw-state
//! transitions can be skipped when nothing changed.
//!
//! The table itself is generated at build time by `gl_generator`, the
//! idiomatic Rust analogue of hand-rolling `dlsym`/`eglGetProcAddress`
//! calls per entry point the way the source's `lookup_fun` helper does.

use std::os::raw::c_void;

/// Generated GL entry points and enum constants. Kept in its own module
/// (rather than inlined into `Fenv`) so call sites read `raw::BLEND` the
/// way the source reads `GL_BLEND`.
#[allow(
    non_upper_case_globals,
    non_snake_case,
    non_camel_case_types,
    dead_code,
    clippy::all
)]
pub mod raw {
    include!(concat!(env!("OUT_DIR"), "/gl21_bindings.rs"));
}

/// Magic cookie values from `agp_alloc_fenv` / `agp_dropenv`, used to
/// detect use-after-free of a `Fenv`.
const COOKIE_LIVE: u32 = 0xfeed_face;
const COOKIE_DEAD: u32 = 0xdead_beef;

/// Which of the three backend flavors a `Fenv` was loaded for. Behavior
/// forks the source gates behind `#if defined(GLES2)` are gated on this
/// instead (§9: "a trait / interface for the subset of FENV that
/// genuinely differs, with the backend chosen once per Context").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenvBackend {
    Gl21,
    Gles2,
    Gles3,
}

/// Resolves a single GL entry point by name.
///
/// `tag` identifies which loaded environment the symbol is being
/// resolved for (the source threads an opaque `tag` through so a
/// multi-context engine can keep more than one FENV alive at once).
/// `required = false` means the symbol is an optional-extension probe;
/// absence is not an error.
pub trait Loader {
    fn lookup(&self, tag: &str, name: &str, required: bool) -> Option<*const c_void>;
}

bitflags::bitflags! {
    pub struct Features: u32 {
        const MSAA        = 0b0001;
        const TEX_3D      = 0b0010;
        const PBO         = 0b0100;
        const ROBUSTNESS  = 0b1000;
    }
}

/// Tracks which blend factors / pipeline mode / bound texture target were
/// last applied, mirroring the source's `model_flags`,
/// `blend_src_alpha`/`blend_dst_alpha`, and `last_store_mode` fields so
/// redundant state-changing GL calls can be skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelFlags {
    pub cull_enabled: bool,
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub wireframe: bool,
    pub blend_src_alpha: u32,
    pub blend_dst_alpha: u32,
    pub last_store_mode: u32,
}

pub struct Fenv {
    cookie: u32,
    pub backend: FenvBackend,
    pub gl: raw::Gl,
    pub features: Features,
    pub model_flags: ModelFlags,
}

impl Fenv {
    /// Resolves every required entry point via `loader`, probes the
    /// optional ones, and returns a table with the live cookie set.
    /// Mirrors `agp_alloc_fenv` + `agp_glinit_fenv`.
    pub fn load(backend: FenvBackend, loader: &dyn Loader, tag: &str) -> Fenv {
        let gl = raw::Gl::load_with(|name| {
            // Every entry point is resolved through the same callback;
            // gl_generator's Fallbacks::All keeps `gl` usable even when a
            // core function is missing by routing to a no-op stub, so we
            // always treat the probe as optional here and derive
            // capability flags from a handful of representative symbols
            // rather than failing the whole load.
            loader
                .lookup(tag, name, false)
                .unwrap_or(std::ptr::null()) as *const c_void
        });

        let mut features = Features::empty();
        if loader.lookup(tag, "glGenBuffers", false).is_some() && backend != FenvBackend::Gles2 {
            features.insert(Features::PBO);
        }
        if loader
            .lookup(tag, "glRenderbufferStorageMultisample", false)
            .is_some()
        {
            features.insert(Features::MSAA);
        }
        if loader.lookup(tag, "glTexImage3D", false).is_some() {
            features.insert(Features::TEX_3D);
        }
        if loader.lookup(tag, "glGetGraphicsResetStatus", false).is_some() {
            features.insert(Features::ROBUSTNESS);
        }

        let mut env = Fenv {
            cookie: COOKIE_LIVE,
            backend,
            gl,
            features,
            model_flags: ModelFlags::default(),
        };
        env.init();
        env
    }

    /// True once `drop_cookie` has been called; any further use is a
    /// programmer error logged and turned into a no-op by callers.
    pub fn is_live(&self) -> bool {
        self.cookie == COOKIE_LIVE
    }

    /// Invalidates the cookie. Mirrors `agp_dropenv`; does not attempt to
    /// free the generated `Gl` table itself, since ownership of the
    /// underlying driver context belongs to the platform layer.
    pub fn drop_cookie(&mut self) {
        if self.cookie != COOKIE_LIVE {
            log::warn!("drop_cookie on an already-dead or foreign Fenv");
            return;
        }
        self.cookie = COOKIE_DEAD;
    }

    /// Applies the default pipeline state from `agp_init`: scissor on,
    /// depth off, separate alpha blend func, CW front face, cull back,
    /// seamless cubemap if available, blend on, clear color black.
    pub fn init(&mut self) {
        unsafe {
            let gl = &self.gl;
            gl.Enable(raw::SCISSOR_TEST);
            gl.Disable(raw::DEPTH_TEST);
            gl.BlendFuncSeparate(
                raw::SRC_ALPHA,
                raw::ONE_MINUS_SRC_ALPHA,
                raw::ONE,
                raw::ONE,
            );
            gl.FrontFace(raw::CW);
            gl.CullFace(raw::BACK);
            gl.Enable(raw::TEXTURE_CUBE_MAP_SEAMLESS);
            gl.Enable(raw::BLEND);
            gl.ClearColor(0.0, 0.0, 0.0, 1.0);
        }
        self.model_flags = ModelFlags {
            cull_enabled: false,
            depth_test_enabled: false,
            depth_write_enabled: true,
            wireframe: false,
            blend_src_alpha: raw::ONE,
            blend_dst_alpha: raw::ONE,
            last_store_mode: 0,
        };
    }

    /// Probe for context loss / GPU reset. Backends without
    /// `GL_KHR_robustness` always report ok, matching the source's
    /// "function returning 0" fallback.
    pub fn status_ok(&self) -> bool {
        if !self.features.contains(Features::ROBUSTNESS) {
            return true;
        }
        unsafe { self.gl.GetGraphicsResetStatus() == raw::NO_ERROR }
    }
}

impl Drop for Fenv {
    fn drop(&mut self) {
        if self.cookie == COOKIE_LIVE {
            self.drop_cookie();
        }
    }
}
