//! `Context` — the single owned entry point.
//!
//! The source keeps five process-global statics: the active `agp_fenv`,
//! the active rendertarget, the shader slot table, the environment
//! uniform cache, and assorted last-bind tracking (§9). This module
//! folds all of them into one `Context` a caller constructs once per GL
//! context and threads through explicitly — the idiomatic Rust
//! replacement the Design Notes call for, and the same shape the
//! teacher's `render-gl` crate uses for `OpenGlInstance`/`GlArena`
//! (one owning struct per backend, arenas of backend objects addressed
//! by a stable key rather than a raw pointer).
//!
//! `VstoreId`/`RendertargetId` are `slotmap` generational keys (the
//! teacher pulls in `slotmap` for exactly this purpose), replacing the
//! source's `glid_proxy` pointer-into-sibling (§9) with a handle that
//! cannot dangle: a freed slot's key simply stops resolving.

use slotmap::SlotMap;

use crate::config::AgpConfig;
use crate::draw::DrawState;
use crate::error::AgpError;
use crate::fenv::{raw, Features, Fenv, FenvBackend, Loader};
use crate::format::{self, FormatHint};
use crate::rendertarget::{
    AllocatorHook, ProxyHook, Region, Rendertarget, RendertargetFlags, RendertargetMode, ShadowSlot,
};
use crate::shader::{EnvUniform, EnvUniformTable, ShaderId, ShaderManager, UniformType, VertexAttribute};
use crate::vstore::{
    BufferMapHook, BufferPlane, ExternalHandle, FilterMode, ReadbackMeta, SliceMode, StreamKind, StreamMeta,
    Vstore, VstoreKind, WrapMode,
};

slotmap::new_key_type! {
    /// Handle to a `Vstore` held by a `Context`. Resolving one through
    /// `Context::vstores` is the replacement for dereferencing
    /// `glid_proxy` (§9).
    pub struct VstoreId;

    /// Handle to a `Rendertarget` held by a `Context`.
    pub struct RendertargetId;
}

/// Result of `stream_prepare` (§4.2): either a CPU-writable region handed
/// back for the caller to fill (PBO-backed `Raw*` kinds), or confirmation
/// that the upload already happened synchronously (GLES2 fallback paths,
/// `RawDirectSync`, `HandleImport`).
pub enum StreamHandle {
    Mapped { ptr: *mut u8, len: usize, sub_rect: bool },
    Uploaded,
    Failed,
}

pub struct Context {
    pub(crate) fenv: Fenv,
    pub(crate) shaders: ShaderManager,
    pub(crate) env: EnvUniformTable,
    pub(crate) draw: DrawState,
    pub(crate) config: AgpConfig,

    vstores: SlotMap<VstoreId, Vstore>,
    rendertargets: SlotMap<RendertargetId, Rendertarget>,
    pub active_rendertarget: Option<RendertargetId>,

    /// §6's "Buffer-mapping callback": the platform layer's
    /// `platform_video_map_buffer`/`platform_video_map_handle`
    /// equivalent, consulted by `stream_prepare`'s `HandleImport` kind
    /// and notified on drop of an externally imported vstore.
    buffer_map: Option<Box<dyn BufferMapHook>>,

    frame: u64,
    last_error: Option<AgpError>,
}

impl Context {
    /// Builds the `Fenv` (§4.1) and the default shader slots (§4.4),
    /// mirroring the source's `agp_alloc_fenv` + `agp_init` +
    /// `shdr_global` bootstrap sequence run once at startup.
    pub fn new(backend: FenvBackend, loader: &dyn Loader, tag: &str, config: AgpConfig) -> Context {
        let fenv = Fenv::load(backend, loader, tag);
        let shaders = ShaderManager::new(&fenv);
        Context {
            fenv,
            shaders,
            env: EnvUniformTable::default(),
            draw: DrawState::default(),
            config,
            vstores: SlotMap::with_key(),
            rendertargets: SlotMap::with_key(),
            active_rendertarget: None,
            buffer_map: None,
            frame: 0,
            last_error: None,
        }
    }

    /// Installs the platform's buffer-map hook (§6). Replaces whatever
    /// hook was previously installed.
    pub fn set_buffer_map_hook(&mut self, hook: Box<dyn BufferMapHook>) {
        self.buffer_map = Some(hook);
    }

    pub fn fenv(&self) -> &Fenv {
        &self.fenv
    }

    pub fn config(&self) -> &AgpConfig {
        &self.config
    }

    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    /// Advances the frame counter; called by the engine once per tick.
    /// Used only for `TRACE_MARK_*`-style diagnostics (§6) — the core
    /// itself does not gate any behavior on frame parity.
    pub fn tick(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    pub fn last_error(&self) -> Option<&AgpError> {
        self.last_error.as_ref()
    }

    fn fail(&mut self, err: AgpError) -> AgpError {
        log::error!("{}", err);
        self.last_error = Some(err.clone());
        err
    }

    // ---------------------------------------------------------------
    // Vstore (§4.2)
    // ---------------------------------------------------------------

    fn insert_vstore(&mut self, v: Vstore) -> VstoreId {
        self.vstores.insert(v)
    }

    pub fn vstore(&self, id: VstoreId) -> Option<&Vstore> {
        self.vstores.get(id)
    }

    pub fn vstore_mut(&mut self, id: VstoreId) -> Option<&mut Vstore> {
        self.vstores.get_mut(id)
    }

    /// `empty(w,h)`: allocates a `Tex2D` with the default (RGBA8)
    /// format, zeroed backing, uploads it, and drops the backing if
    /// `conservative_backing` is set. Mirrors `agp_empty_vstore`.
    pub fn empty(&mut self, w: u16, h: u16) -> VstoreId {
        self.empty_ext(w, h, FormatHint::Normal)
    }

    /// `empty_ext(w,h,hint)`: same as `empty` with a format hint
    /// selecting 565 / RGB10A2 / F16 / F32. Mirrors
    /// `agp_empty_vstoreext`.
    pub fn empty_ext(&mut self, w: u16, h: u16, hint: FormatHint) -> VstoreId {
        let mut v = Vstore::new(w, h, hint);
        v.kind = VstoreKind::Tex2D;
        v.backing = Some(vec![0u8; usize::from(w) * usize::from(h) * usize::from(v.bpp)]);
        let id = self.insert_vstore(v);
        self.update(id, true);
        id
    }

    /// `update(copy?)`: applies filter + wrap state; if `copy`, ensures a
    /// GL id exists, uploads `backing` to the GPU, bumps the update
    /// timestamp, and (in conservative mode) clears the backing.
    /// Mirrors `agp_update_vstore`.
    pub fn update(&mut self, id: VstoreId, copy: bool) -> bool {
        let gl = &self.fenv.gl;
        let v = match self.vstores.get_mut(id) {
            Some(v) => v,
            None => return false,
        };

        if v.glid == 0 {
            let mut tex = 0u32;
            unsafe { gl.GenTextures(1, &mut tex) };
            v.glid = tex;
        }

        let info = format::lookup(v.dst_format);
        unsafe {
            gl.BindTexture(raw::TEXTURE_2D, v.glid);
            let (min, mag) = filter_to_gl(v.filter);
            gl.TexParameteri(raw::TEXTURE_2D, raw::TEXTURE_MIN_FILTER, min as i32);
            gl.TexParameteri(raw::TEXTURE_2D, raw::TEXTURE_MAG_FILTER, mag as i32);
            gl.TexParameteri(raw::TEXTURE_2D, raw::TEXTURE_WRAP_S, wrap_to_gl(v.wrap_s) as i32);
            gl.TexParameteri(raw::TEXTURE_2D, raw::TEXTURE_WRAP_T, wrap_to_gl(v.wrap_t) as i32);

            if copy {
                let ptr = v
                    .backing
                    .as_ref()
                    .map(|b| b.as_ptr() as *const _)
                    .unwrap_or(std::ptr::null());
                gl.TexImage2D(
                    raw::TEXTURE_2D,
                    0,
                    info.internal_format as i32,
                    i32::from(v.w),
                    i32::from(v.h),
                    0,
                    info.upload_format,
                    info.upload_type,
                    ptr,
                );
            }
        }

        if copy {
            v.updated_ts = v.updated_ts.wrapping_add(1);
            if self.config.conservative_backing {
                v.backing = None;
            }
        }
        true
    }

    /// `resize(w,h)`: reallocates the CPU backing if dimensions differ
    /// and rebuilds the PBOs. Mirrors the resize half of
    /// `agp_resize_vstore`-equivalent logic in `glshared.c`.
    pub fn resize_vstore(&mut self, id: VstoreId, w: u16, h: u16) {
        let gl = &self.fenv.gl;
        if let Some(v) = self.vstores.get_mut(id) {
            if v.w == w && v.h == h {
                return;
            }
            v.w = w;
            v.h = h;
            v.backing = Some(vec![0u8; usize::from(w) * usize::from(h) * usize::from(v.bpp)]);
            unsafe {
                if let Some(pbo) = v.read_pbo {
                    gl.DeleteBuffers(1, &pbo);
                }
                if let Some(pbo) = v.write_pbo {
                    gl.DeleteBuffers(1, &pbo);
                }
            }
            v.read_pbo = None;
            v.write_pbo = None;
            if self.fenv.features.contains(Features::PBO) {
                self.alloc_pbos(id);
            }
        }
    }

    fn alloc_pbos(&mut self, id: VstoreId) {
        let gl = &self.fenv.gl;
        if let Some(v) = self.vstores.get_mut(id) {
            let bytes = usize::from(v.w) * usize::from(v.h) * usize::from(v.bpp);
            let mut read = 0u32;
            let mut write = 0u32;
            unsafe {
                gl.GenBuffers(1, &mut read);
                gl.BindBuffer(raw::PIXEL_PACK_BUFFER, read);
                gl.BufferData(raw::PIXEL_PACK_BUFFER, bytes as isize, std::ptr::null(), raw::STREAM_READ);
                gl.GenBuffers(1, &mut write);
                gl.BindBuffer(raw::PIXEL_UNPACK_BUFFER, write);
                gl.BufferData(raw::PIXEL_UNPACK_BUFFER, bytes as isize, std::ptr::null(), raw::STREAM_DRAW);
                gl.BindBuffer(raw::PIXEL_PACK_BUFFER, 0);
                gl.BindBuffer(raw::PIXEL_UNPACK_BUFFER, 0);
            }
            v.read_pbo = Some(read);
            v.write_pbo = Some(write);
        }
    }

    /// `slice_backing(mode, ...)`: converts `id`'s `kind` into `Cube`
    /// (6 unfilled faces) or `Tex3D` (N unfilled slices). Dimensions
    /// must be powers of two (§3 invariant). Mirrors `agp_slice_vstore`.
    pub fn slice_backing(&mut self, id: VstoreId, mode: SliceMode) -> Result<(), AgpError> {
        let w = self.vstores.get(id).map(|v| v.w).unwrap_or(0);
        if !w.is_power_of_two() {
            return Err(self.fail(AgpError::BadObject { kind: "vstore-slice-dims", id: w.into() }));
        }
        if let Some(v) = self.vstores.get_mut(id) {
            v.kind = match mode {
                SliceMode::Cube => VstoreKind::Cube { faces: [None; 6] },
                SliceMode::Tex3D { slices } => VstoreKind::Tex3D { slices: Vec::with_capacity(slices.into()) },
            };
        }
        Ok(())
    }

    /// `slice_synch(slices[])`: for a `Cube`, readback+upload each face
    /// that is newer than the cube's own backing and whose dimensions
    /// match (mismatched faces are skipped, others still update, per
    /// testable property 10); for `Tex3D`, (re)binds the slice list and
    /// uploads as a 3D texture. Mirrors `agp_slice_synch`.
    pub fn slice_synch(&mut self, id: VstoreId, slices: &[VstoreId]) -> Result<(), AgpError> {
        let kind_is_cube = matches!(self.vstores.get(id).map(|v| &v.kind), Some(VstoreKind::Cube { .. }));

        if kind_is_cube {
            if slices.len() != 6 {
                return Err(self.fail(AgpError::BadObject { kind: "cube-face-count", id: slices.len() as u32 }));
            }
            let (cube_w, cube_h, cube_ts) = {
                let v = self.vstores.get(id).unwrap();
                (v.w, v.h, v.updated_ts)
            };
            let mut faces = [None; 6];
            for (i, &face) in slices.iter().enumerate() {
                let eligible = self
                    .vstores
                    .get(face)
                    .map(|f| {
                        f.kind == VstoreKind::Tex2D
                            && f.w == cube_w
                            && f.h == cube_h
                            && f.updated_ts > cube_ts
                    })
                    .unwrap_or(false);
                if eligible {
                    self.upload_cube_face(id, face, i as u32);
                    faces[i] = Some(face);
                } else {
                    log::debug!("slice_synch: skipping cube face {} (dims or staleness mismatch)", i);
                }
            }
            if let Some(v) = self.vstores.get_mut(id) {
                if let VstoreKind::Cube { faces: f } = &mut v.kind {
                    *f = faces;
                }
                v.updated_ts = v.updated_ts.wrapping_add(1);
            }
            Ok(())
        } else {
            // Tex3D: bind as a 3D texture from the slice list.
            if !self.fenv.features.contains(Features::TEX_3D) {
                return Err(self.fail(AgpError::BackendFeatureMissing { feature: "GL_texture_3D" }));
            }
            if let Some(v) = self.vstores.get_mut(id) {
                if let VstoreKind::Tex3D { slices: s } = &mut v.kind {
                    s.clear();
                    s.extend_from_slice(slices);
                }
            }
            Ok(())
        }
    }

    fn upload_cube_face(&mut self, cube: VstoreId, face: VstoreId, face_index: u32) {
        let gl = &self.fenv.gl;
        let cube_glid = self.vstores.get(cube).map(|v| v.glid).unwrap_or(0);
        let (fw, fh, finfo, fptr_len) = {
            let f = match self.vstores.get(face) {
                Some(f) => f,
                None => return,
            };
            (f.w, f.h, format::lookup(f.dst_format), f.backing.as_ref().map(|b| b.len()))
        };
        let _ = fptr_len;
        let backing = self.vstores.get(face).and_then(|f| f.backing.clone());
        unsafe {
            gl.BindTexture(raw::TEXTURE_CUBE_MAP, cube_glid);
            let target = raw::TEXTURE_CUBE_MAP_POSITIVE_X + face_index;
            let ptr = backing.as_ref().map(|b| b.as_ptr() as *const _).unwrap_or(std::ptr::null());
            gl.TexImage2D(
                target,
                0,
                finfo.internal_format as i32,
                i32::from(fw),
                i32::from(fh),
                0,
                finfo.upload_format,
                finfo.upload_type,
                ptr,
            );
        }
    }

    /// `stream_prepare(meta, kind)` (§4.2). On backends with PBOs, the
    /// `Raw*` kinds map the write-PBO and return a CPU pointer the
    /// caller fills; `RawDirect*` chooses a full vs. sub-rect upload by
    /// comparing the dirty area against `config.sub_rect_upload_threshold`
    /// (S4). `ExtResync` drops the GL id and rebuilds from `backing`.
    /// `RawDirectSync` always uploads synchronously. `HandleImport`
    /// allocates a 2D id and defers to the platform mapper.
    pub fn stream_prepare(&mut self, id: VstoreId, meta: StreamMeta, kind: StreamKind) -> StreamHandle {
        match kind {
            StreamKind::ExtResync => {
                if let Some(v) = self.vstores.get_mut(id) {
                    unsafe {
                        if v.glid != 0 {
                            self.fenv.gl.DeleteTextures(1, &v.glid);
                        }
                    }
                    v.glid = 0;
                }
                self.resize_vstore(id, meta.w, meta.h);
                self.update(id, true);
                StreamHandle::Uploaded
            }
            StreamKind::HandleImport => self.stream_handle_import(id, &meta.planes),
            StreamKind::RawDirectSync => {
                self.upload_sub_rect(id, meta);
                StreamHandle::Uploaded
            }
            StreamKind::Raw | StreamKind::RawCopy => {
                if !self.fenv.features.contains(Features::PBO) {
                    return StreamHandle::Uploaded;
                }
                self.map_write_pbo(id)
            }
            StreamKind::RawDirect | StreamKind::RawDirectCopy => {
                let (store_w, store_h) = match self.vstores.get(id) {
                    Some(v) => (v.w, v.h),
                    None => return StreamHandle::Failed,
                };
                let full = meta.exceeds_threshold(store_w, store_h, self.config.sub_rect_upload_threshold);
                if kind.keeps_cpu_copy() {
                    self.ensure_backing(id, meta.clone());
                }
                if full {
                    self.update(id, true);
                } else {
                    self.upload_sub_rect(id, meta);
                }
                StreamHandle::Uploaded
            }
        }
    }

    /// `HandleImport` (§4.2): allocate a 2D id with default filter/clamp
    /// if one doesn't already exist, then defer to the platform's
    /// buffer-map hook (§6) to bind `planes` into it. Mirrors
    /// `STREAM_HANDLE` in `gl21.c`: the glid is created and parameterized
    /// up front and kept around even on import failure, since it is
    /// life-span managed by the originating source and a later frame may
    /// repopulate it.
    fn stream_handle_import(&mut self, id: VstoreId, planes: &[BufferPlane]) -> StreamHandle {
        let gl = &self.fenv.gl;
        match self.vstores.get_mut(id) {
            Some(v) => {
                if v.glid == 0 {
                    let mut tex = 0u32;
                    unsafe {
                        gl.GenTextures(1, &mut tex);
                        gl.ActiveTexture(raw::TEXTURE0);
                        gl.BindTexture(raw::TEXTURE_2D, tex);
                        gl.TexParameteri(raw::TEXTURE_2D, raw::TEXTURE_MIN_FILTER, raw::LINEAR as i32);
                        gl.TexParameteri(raw::TEXTURE_2D, raw::TEXTURE_MAG_FILTER, raw::LINEAR as i32);
                        gl.TexParameteri(raw::TEXTURE_2D, raw::TEXTURE_WRAP_S, raw::CLAMP_TO_EDGE as i32);
                        gl.TexParameteri(raw::TEXTURE_2D, raw::TEXTURE_WRAP_T, raw::CLAMP_TO_EDGE as i32);
                    }
                    v.glid = tex;
                }
            }
            None => return StreamHandle::Failed,
        }

        let mapped = match &self.buffer_map {
            Some(hook) => hook.map(id, planes),
            None => {
                log::warn!("stream_prepare: HandleImport with no buffer-map hook installed");
                None
            }
        };

        match mapped {
            Some(handle) => {
                if let Some(v) = self.vstores.get_mut(id) {
                    v.external = Some(handle);
                    v.kind = VstoreKind::Tex2D;
                    if let Some(p0) = planes.first() {
                        v.w = p0.w;
                        v.h = p0.h;
                    }
                    v.updated_ts = v.updated_ts.wrapping_add(1);
                }
                StreamHandle::Uploaded
            }
            None => {
                log::warn!("stream_prepare: buffer import failed for vstore");
                StreamHandle::Failed
            }
        }
    }

    fn map_write_pbo(&mut self, id: VstoreId) -> StreamHandle {
        let gl = &self.fenv.gl;
        let (pbo, bytes) = match self.vstores.get(id) {
            Some(v) => (v.write_pbo, usize::from(v.w) * usize::from(v.h) * usize::from(v.bpp)),
            None => return StreamHandle::Failed,
        };
        let pbo = match pbo {
            Some(p) => p,
            None => return StreamHandle::Uploaded,
        };
        unsafe {
            gl.BindBuffer(raw::PIXEL_UNPACK_BUFFER, pbo);
            let ptr = gl.MapBuffer(raw::PIXEL_UNPACK_BUFFER, raw::WRITE_ONLY) as *mut u8;
            gl.BindBuffer(raw::PIXEL_UNPACK_BUFFER, 0);
            if ptr.is_null() {
                StreamHandle::Failed
            } else {
                StreamHandle::Mapped { ptr, len: bytes, sub_rect: false }
            }
        }
    }

    /// `stream_release(meta)`: completes the upload a `Raw`/`RawCopy`
    /// `stream_prepare` started by unmapping the write-PBO and issuing
    /// the texture upload from it.
    pub fn stream_release(&mut self, id: VstoreId) {
        let gl = &self.fenv.gl;
        let (glid, pbo, w, h, info) = match self.vstores.get(id) {
            Some(v) => (v.glid, v.write_pbo, v.w, v.h, format::lookup(v.dst_format)),
            None => return,
        };
        let pbo = match pbo {
            Some(p) => p,
            None => return,
        };
        unsafe {
            gl.BindBuffer(raw::PIXEL_UNPACK_BUFFER, pbo);
            gl.UnmapBuffer(raw::PIXEL_UNPACK_BUFFER);
            gl.BindTexture(raw::TEXTURE_2D, glid);
            gl.TexSubImage2D(
                raw::TEXTURE_2D,
                0,
                0,
                0,
                i32::from(w),
                i32::from(h),
                info.upload_format,
                info.upload_type,
                std::ptr::null(),
            );
            gl.BindBuffer(raw::PIXEL_UNPACK_BUFFER, 0);
        }
        if let Some(v) = self.vstores.get_mut(id) {
            v.updated_ts = v.updated_ts.wrapping_add(1);
        }
    }

    fn upload_sub_rect(&mut self, id: VstoreId, meta: StreamMeta) {
        let gl = &self.fenv.gl;
        let (glid, info, pitch_bpp, backing) = match self.vstores.get(id) {
            Some(v) => (v.glid, format::lookup(v.dst_format), usize::from(v.bpp), v.backing.clone()),
            None => return,
        };
        if glid == 0 {
            self.update(id, true);
            return;
        }
        let ptr = match &backing {
            Some(b) => {
                let row_bytes = usize::from(meta.w) * pitch_bpp;
                let mut region = vec![0u8; row_bytes * usize::from(meta.h)];
                let full_w = self.vstores.get(id).map(|v| usize::from(v.w)).unwrap_or(0);
                for row in 0..usize::from(meta.h) {
                    let src_off = ((usize::from(meta.y1) + row) * full_w + usize::from(meta.x1)) * pitch_bpp;
                    let dst_off = row * row_bytes;
                    if src_off + row_bytes <= b.len() {
                        region[dst_off..dst_off + row_bytes].copy_from_slice(&b[src_off..src_off + row_bytes]);
                    }
                }
                Some(region)
            }
            None => None,
        };
        unsafe {
            gl.BindTexture(raw::TEXTURE_2D, glid);
            let data_ptr = ptr.as_ref().map(|p| p.as_ptr() as *const _).unwrap_or(std::ptr::null());
            gl.TexSubImage2D(
                raw::TEXTURE_2D,
                0,
                i32::from(meta.x1),
                i32::from(meta.y1),
                i32::from(meta.w),
                i32::from(meta.h),
                info.upload_format,
                info.upload_type,
                data_ptr,
            );
        }
        if let Some(v) = self.vstores.get_mut(id) {
            v.updated_ts = v.updated_ts.wrapping_add(1);
        }
    }

    /// `RawDirect*` assumes the caller already wrote the dirty rect
    /// directly into the vstore's own CPU backing (that's the "direct"
    /// in the name, vs. the PBO-mediated `Raw` kinds); this only lazily
    /// allocates the backing if none exists yet so the subsequent
    /// upload has something to read from.
    fn ensure_backing(&mut self, id: VstoreId, _meta: StreamMeta) {
        if let Some(v) = self.vstores.get_mut(id) {
            if v.backing.is_none() {
                v.backing = Some(vec![0u8; usize::from(v.w) * usize::from(v.h) * usize::from(v.bpp)]);
            }
        }
    }

    /// `readback_sync(dst)`: binds, `glGetTexImage`, bumps the update
    /// timestamp. Mirrors the synchronous readback path used when no
    /// PBO is available.
    pub fn readback_sync(&mut self, id: VstoreId) {
        let gl = &self.fenv.gl;
        let (glid, w, h, info) = match self.vstores.get(id) {
            Some(v) => (v.glid, v.w, v.h, format::lookup(v.dst_format)),
            None => return,
        };
        if glid == 0 {
            return;
        }
        let bytes = usize::from(w) * usize::from(h) * usize::from(format::lookup(format::FormatHint::Normal).bytes_per_pixel);
        let mut buf = vec![0u8; bytes];
        unsafe {
            gl.BindTexture(raw::TEXTURE_2D, glid);
            gl.GetTexImage(raw::TEXTURE_2D, 0, info.upload_format, info.upload_type, buf.as_mut_ptr() as *mut _);
        }
        if let Some(v) = self.vstores.get_mut(id) {
            v.backing = Some(buf);
            v.updated_ts = v.updated_ts.wrapping_add(1);
        }
    }

    /// `request_readback(store)`: issues an asynchronous read into the
    /// read-PBO; the GPU copy is in flight when this returns (§5).
    pub fn request_readback(&mut self, id: VstoreId) {
        let gl = &self.fenv.gl;
        if !self.fenv.features.contains(Features::PBO) {
            self.readback_sync(id);
            return;
        }
        let (glid, pbo, info) = match self.vstores.get(id) {
            Some(v) => (v.glid, v.read_pbo, format::lookup(v.dst_format)),
            None => return,
        };
        let pbo = match pbo {
            Some(p) => p,
            None => return,
        };
        unsafe {
            gl.BindTexture(raw::TEXTURE_2D, glid);
            gl.BindBuffer(raw::PIXEL_PACK_BUFFER, pbo);
            gl.GetTexImage(raw::TEXTURE_2D, 0, info.upload_format, info.upload_type, std::ptr::null_mut());
            gl.BindBuffer(raw::PIXEL_PACK_BUFFER, 0);
        }
    }

    /// `poll_readback(store) -> meta`: maps the read-PBO for CPU access.
    /// The returned pointer is valid only until `release_readback` is
    /// called (§5) — the caller is expected to poll on a later frame,
    /// not immediately after `request_readback`.
    pub fn poll_readback(&mut self, id: VstoreId) -> ReadbackMeta {
        let gl = &self.fenv.gl;
        if !self.fenv.features.contains(Features::PBO) {
            return ReadbackMeta::empty();
        }
        let (pbo, w, h, bytes) = match self.vstores.get(id) {
            Some(v) => (v.read_pbo, v.w, v.h, usize::from(v.w) * usize::from(v.h) * usize::from(v.bpp)),
            None => return ReadbackMeta::empty(),
        };
        let pbo = match pbo {
            Some(p) => p,
            None => return ReadbackMeta::empty(),
        };
        unsafe {
            gl.BindBuffer(raw::PIXEL_PACK_BUFFER, pbo);
            let ptr = gl.MapBuffer(raw::PIXEL_PACK_BUFFER, raw::READ_ONLY) as *const u8;
            gl.BindBuffer(raw::PIXEL_PACK_BUFFER, 0);
            if ptr.is_null() {
                ReadbackMeta::empty()
            } else {
                ReadbackMeta { w, h, ptr, len: bytes }
            }
        }
    }

    /// Unmaps and unbinds the read-PBO mapped by `poll_readback`,
    /// invalidating the pointer it returned (§5 release contract).
    pub fn release_readback(&mut self, id: VstoreId) {
        let gl = &self.fenv.gl;
        if let Some(pbo) = self.vstores.get(id).and_then(|v| v.read_pbo) {
            unsafe {
                gl.BindBuffer(raw::PIXEL_PACK_BUFFER, pbo);
                gl.UnmapBuffer(raw::PIXEL_PACK_BUFFER);
                gl.BindBuffer(raw::PIXEL_PACK_BUFFER, 0);
            }
        }
    }

    /// `activate(store)`: binds to texture unit 0 per `state`.
    pub fn vstore_activate(&mut self, id: VstoreId) {
        self.vstore_activate_unit(id, 0);
    }

    pub(crate) fn vstore_activate_unit(&mut self, id: VstoreId, unit: u32) {
        let gl = &self.fenv.gl;
        let glid = self.resolve_texid(id);
        let target = self.bind_target(id);
        unsafe {
            gl.ActiveTexture(raw::TEXTURE0 + unit);
            gl.BindTexture(target, glid);
        }
    }

    pub fn vstore_deactivate(&mut self, unit: u32) {
        let gl = &self.fenv.gl;
        unsafe {
            gl.ActiveTexture(raw::TEXTURE0 + unit);
            gl.BindTexture(raw::TEXTURE_2D, 0);
        }
    }

    fn bind_target(&self, id: VstoreId) -> u32 {
        match self.vstores.get(id).map(|v| &v.kind) {
            Some(VstoreKind::Cube { .. }) => raw::TEXTURE_CUBE_MAP,
            Some(VstoreKind::Tex3D { .. }) => raw::TEXTURE_3D,
            _ => raw::TEXTURE_2D,
        }
    }

    /// `resolve_texid(store)`: returns `*glid_proxy` if the proxy handle
    /// is set, else `glid` directly. Mirrors `agp_resolve_texid`.
    pub fn resolve_texid(&self, id: VstoreId) -> u32 {
        match self.vstores.get(id) {
            Some(v) => match v.glid_proxy {
                Some(proxy) => self.vstores.get(proxy).map(|p| p.glid).unwrap_or(0),
                None => v.glid,
            },
            None => 0,
        }
    }

    /// `copy_region(src, dst, x1, y1, x2, y2)`: clamped memcpy of the
    /// raw region between two CPU-backed stores. Empty intersection is a
    /// no-op (property 9). Mirrors `agp_vstore_copyreg`.
    pub fn copy_region(&mut self, src: VstoreId, dst: VstoreId, x1: u16, y1: u16, x2: u16, y2: u16) {
        let (sw, sh, sbpp) = match self.vstores.get(src) {
            Some(v) => (v.w, v.h, v.bpp),
            None => return,
        };
        let (dw, dh, dbpp) = match self.vstores.get(dst) {
            Some(v) => (v.w, v.h, v.bpp),
            None => return,
        };
        if sbpp != dbpp {
            return;
        }
        let cx2 = x2.min(sw).min(dw);
        let cy2 = y2.min(sh).min(dh);
        let cx1 = x1.min(cx2);
        let cy1 = y1.min(cy2);
        if cx1 >= cx2 || cy1 >= cy2 {
            return;
        }

        let src_buf = match self.vstores.get(src).and_then(|v| v.backing.as_ref()) {
            Some(b) => b.clone(),
            None => return,
        };
        let row_bytes = usize::from(cx2 - cx1) * usize::from(sbpp);
        let dst_v = match self.vstores.get_mut(dst) {
            Some(v) => v,
            None => return,
        };
        if dst_v.backing.is_none() {
            dst_v.backing = Some(vec![0u8; usize::from(dw) * usize::from(dh) * usize::from(dbpp)]);
        }
        let dst_buf = dst_v.backing.as_mut().unwrap();
        for row in 0..usize::from(cy2 - cy1) {
            let src_off = ((usize::from(cy1) + row) * usize::from(sw) + usize::from(cx1)) * usize::from(sbpp);
            let dst_off = ((usize::from(cy1) + row) * usize::from(dw) + usize::from(cx1)) * usize::from(dbpp);
            if src_off + row_bytes <= src_buf.len() && dst_off + row_bytes <= dst_buf.len() {
                dst_buf[dst_off..dst_off + row_bytes].copy_from_slice(&src_buf[src_off..src_off + row_bytes]);
            }
        }
    }

    /// Increments `id`'s refcount and returns it unchanged — the source
    /// shares a `struct storage_info_t *` by reference; here the "new"
    /// reference is the same key, since a generational `VstoreId` is
    /// already Copy and cheap to hold in multiple places.
    pub fn share_vstore(&mut self, id: VstoreId) -> VstoreId {
        if let Some(v) = self.vstores.get_mut(id) {
            v.refcount += 1;
        }
        id
    }

    /// `drop(store)`: decrements the refcount; at zero, notifies an
    /// external importer (handle = -1), deletes GL objects, and frees
    /// the slot. Mirrors the refcounted teardown path in `glshared.c`.
    pub fn release_vstore(&mut self, id: VstoreId) {
        let drop_now = match self.vstores.get_mut(id) {
            Some(v) => {
                v.refcount = v.refcount.saturating_sub(1);
                v.refcount == 0
            }
            None => false,
        };
        if !drop_now {
            return;
        }
        let gl = &self.fenv.gl;
        if let Some(v) = self.vstores.remove(id) {
            if v.external.is_some() {
                if let Some(hook) = &self.buffer_map {
                    hook.release(id, ExternalHandle(-1));
                } else {
                    log::debug!("vstore drop: no buffer-map hook installed to notify importer");
                }
            }
            unsafe {
                if v.glid != 0 {
                    gl.DeleteTextures(1, &v.glid);
                }
                if let Some(pbo) = v.read_pbo {
                    gl.DeleteBuffers(1, &pbo);
                }
                if let Some(pbo) = v.write_pbo {
                    gl.DeleteBuffers(1, &pbo);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Rendertarget (§4.3)
    // ---------------------------------------------------------------

    pub fn rendertarget(&self, id: RendertargetId) -> Option<&Rendertarget> {
        self.rendertargets.get(id)
    }

    /// `Setup(vstore, mode) -> RT`: creates the FBO and, per `mode`,
    /// attaches color/depth/stencil. `Msaa` builds a secondary
    /// multisample FBO and falls back to `ColorDepthStencil` if the
    /// backend lacks MSAA support or the MSAA FBO setup fails (S5).
    /// Mirrors `agp_setup_rendertarget` + `alloc_fbo`.
    pub fn setup_rendertarget(&mut self, store: VstoreId, mode: RendertargetMode) -> RendertargetId {
        let (w, h) = self.vstores.get(store).map(|v| (v.w, v.h)).unwrap_or((0, 0));

        let mut mode = mode;
        if mode == RendertargetMode::Msaa && !self.fenv.features.contains(Features::MSAA) {
            log::warn!("setup_rendertarget: MSAA unavailable, falling back to ColorDepthStencil");
            mode = RendertargetMode::ColorDepthStencil;
        }

        if mode == RendertargetMode::DepthOnly {
            if let Some(v) = self.vstores.get_mut(store) {
                v.kind = VstoreKind::Depth;
            }
        }

        let glid = self.resolve_texid(store);
        let (fbo, depth_rb, mode) = self.build_fbo_raw(mode, (w, h), glid);

        let mut rt = Rendertarget::new(store, mode, w, h);
        rt.fbo = fbo;
        rt.depth_rb = depth_rb;

        if mode == RendertargetMode::Msaa {
            if !self.build_msaa_fbo(&mut rt, w, h) {
                log::warn!("setup_rendertarget: MSAA FBO creation failed, falling back");
                rt.mode = RendertargetMode::ColorDepthStencil;
            }
        }

        self.rendertargets.insert(rt)
    }

    /// Builds (or rebuilds) an FBO for `mode` against `store_glid`,
    /// retrying once without the depth attachment on
    /// `INCOMPLETE_ATTACHMENT` (§7). Returns `(fbo, depth_rb, mode)` —
    /// `mode` is downgraded to `Color` if the retry was needed — rather
    /// than taking a live `&mut Rendertarget`, so callers don't need to
    /// hold a borrow of the rendertarget slotmap entry while issuing GL
    /// calls through `self.fenv`.
    fn build_fbo_raw(
        &mut self,
        mode: RendertargetMode,
        viewport_wh: (u16, u16),
        store_glid: u32,
    ) -> (u32, u32, RendertargetMode) {
        let gl = &self.fenv.gl;
        let mut fbo = 0u32;
        let mut depth_rb = 0u32;
        let mut mode = mode;
        unsafe {
            gl.GenFramebuffers(1, &mut fbo);
            gl.BindFramebuffer(raw::FRAMEBUFFER, fbo);

            match mode {
                RendertargetMode::DepthOnly => {
                    gl.FramebufferTexture2D(raw::FRAMEBUFFER, raw::DEPTH_ATTACHMENT, raw::TEXTURE_2D, store_glid, 0);
                }
                RendertargetMode::Color => {
                    gl.FramebufferTexture2D(raw::FRAMEBUFFER, raw::COLOR_ATTACHMENT0, raw::TEXTURE_2D, store_glid, 0);
                }
                RendertargetMode::ColorDepth | RendertargetMode::ColorDepthStencil | RendertargetMode::Msaa => {
                    gl.FramebufferTexture2D(raw::FRAMEBUFFER, raw::COLOR_ATTACHMENT0, raw::TEXTURE_2D, store_glid, 0);
                    gl.GenRenderbuffers(1, &mut depth_rb);
                    gl.BindRenderbuffer(raw::RENDERBUFFER, depth_rb);
                    let fmt = if mode == RendertargetMode::ColorDepth {
                        raw::DEPTH_COMPONENT24
                    } else {
                        raw::DEPTH24_STENCIL8
                    };
                    gl.RenderbufferStorage(raw::RENDERBUFFER, fmt, i32::from(viewport_wh.0), i32::from(viewport_wh.1));
                    gl.FramebufferRenderbuffer(raw::FRAMEBUFFER, raw::DEPTH_ATTACHMENT, raw::RENDERBUFFER, depth_rb);
                    if mode == RendertargetMode::ColorDepthStencil {
                        gl.FramebufferRenderbuffer(raw::FRAMEBUFFER, raw::STENCIL_ATTACHMENT, raw::RENDERBUFFER, depth_rb);
                    }
                }
            }

            let mut status = gl.CheckFramebufferStatus(raw::FRAMEBUFFER);
            if status == raw::FRAMEBUFFER_INCOMPLETE_ATTACHMENT && depth_rb != 0 {
                // §7: retry once without the depth attachment.
                log::warn!("rendertarget FBO incomplete, retrying without depth attachment");
                gl.FramebufferRenderbuffer(raw::FRAMEBUFFER, raw::DEPTH_ATTACHMENT, raw::RENDERBUFFER, 0);
                gl.DeleteRenderbuffers(1, &depth_rb);
                depth_rb = 0;
                mode = RendertargetMode::Color;
                status = gl.CheckFramebufferStatus(raw::FRAMEBUFFER);
            }
            if status != raw::FRAMEBUFFER_COMPLETE {
                log::error!("rendertarget FBO incomplete: 0x{:x}", status);
                fbo = 0;
            }
            gl.BindFramebuffer(raw::FRAMEBUFFER, 0);
        }
        (fbo, depth_rb, mode)
    }

    fn build_msaa_fbo(&mut self, rt: &mut Rendertarget, w: u16, h: u16) -> bool {
        let gl = &self.fenv.gl;
        let samples = 4i32;
        let mut fbo = 0u32;
        let mut color_rb = 0u32;
        let mut depth_rb = 0u32;
        unsafe {
            gl.GenFramebuffers(1, &mut fbo);
            gl.BindFramebuffer(raw::FRAMEBUFFER, fbo);

            gl.GenRenderbuffers(1, &mut color_rb);
            gl.BindRenderbuffer(raw::RENDERBUFFER, color_rb);
            gl.RenderbufferStorageMultisample(raw::RENDERBUFFER, samples, raw::RGBA8, i32::from(w), i32::from(h));
            gl.FramebufferRenderbuffer(raw::FRAMEBUFFER, raw::COLOR_ATTACHMENT0, raw::RENDERBUFFER, color_rb);

            gl.GenRenderbuffers(1, &mut depth_rb);
            gl.BindRenderbuffer(raw::RENDERBUFFER, depth_rb);
            gl.RenderbufferStorageMultisample(raw::RENDERBUFFER, samples, raw::DEPTH24_STENCIL8, i32::from(w), i32::from(h));
            gl.FramebufferRenderbuffer(raw::FRAMEBUFFER, raw::DEPTH_ATTACHMENT, raw::RENDERBUFFER, depth_rb);

            let status = gl.CheckFramebufferStatus(raw::FRAMEBUFFER);
            gl.BindFramebuffer(raw::FRAMEBUFFER, 0);
            if status != raw::FRAMEBUFFER_COMPLETE {
                gl.DeleteFramebuffers(1, &fbo);
                gl.DeleteRenderbuffers(1, &color_rb);
                gl.DeleteRenderbuffers(1, &depth_rb);
                return false;
            }
        }
        rt.msaa_fbo = fbo;
        rt.msaa_color_rb = color_rb;
        rt.msaa_depth_rb = depth_rb;
        true
    }

    /// `Activate(RT)`: binds the FBO (or framebuffer 0 if a proxy hook
    /// takes over and the reference store's refcount is ≤ 1), applies
    /// blend state, viewport, scissor, and clear color. Mirrors
    /// `agp_activate_rendertarget`.
    pub fn activate_rendertarget(&mut self, id: RendertargetId) {
        let gl = &self.fenv.gl;

        let (fbo, viewport, clear_color, retain_alpha, proxy_takeover, ref_store) = match self.rendertargets.get(id) {
            Some(rt) => {
                let refcount = self.vstores.get(rt.reference_store).map(|v| v.refcount).unwrap_or(0);
                let takeover = rt
                    .proxy
                    .as_ref()
                    .map(|(hook, tag)| refcount <= 1 && hook.wants_scanout(*tag))
                    .unwrap_or(false);
                (
                    rt.fbo,
                    rt.viewport,
                    rt.clear_color,
                    rt.flags.contains(RendertargetFlags::RETAIN_ALPHA),
                    takeover,
                    rt.reference_store,
                )
            }
            None => return,
        };

        unsafe {
            if proxy_takeover {
                gl.BindFramebuffer(raw::FRAMEBUFFER, 0);
                let (w, h) = self.vstores.get(ref_store).map(|v| (v.w, v.h)).unwrap_or((0, 0));
                gl.Viewport(0, 0, i32::from(w), i32::from(h));
                gl.Scissor(0, 0, i32::from(w), i32::from(h));
            } else {
                gl.BindFramebuffer(raw::FRAMEBUFFER, fbo);
                gl.Viewport(viewport.0, viewport.1, viewport.2 as i32, viewport.3 as i32);
                gl.Scissor(viewport.0, viewport.1, viewport.2 as i32, viewport.3 as i32);
            }
            gl.ClearColor(clear_color.0, clear_color.1, clear_color.2, clear_color.3);
        }

        self.active_rendertarget = Some(id);
        let blend = if fbo == 0 && !proxy_takeover {
            crate::draw::BlendState::None
        } else {
            crate::draw::BlendState::Normal
        };
        self.apply_blend(blend, retain_alpha);
    }

    /// `Clear()`: clears color+depth of the active rendertarget and
    /// marks a full-rect dirty region.
    pub fn clear_active(&mut self) {
        unsafe {
            self.fenv.gl.Clear(raw::COLOR_BUFFER_BIT | raw::DEPTH_BUFFER_BIT);
        }
        if let Some(id) = self.active_rendertarget {
            self.dirty(id, Some(Region::full()));
        }
    }

    /// `Swap(RT) -> (old_front, swap_happened)`: on first call, allocates
    /// `SWAP_CHAIN_LEN` stores (via the allocator hook if set, else
    /// `empty`), points `glid_proxy` of the reference store at the new
    /// front, and advances the index. Deferred one frame if `resize_ack`
    /// is set. Mirrors `agp_rendertarget_swap`.
    pub fn swap(&mut self, id: RendertargetId) -> (Option<VstoreId>, bool) {
        let resize_ack = self.rendertargets.get(id).map(|rt| rt.resize_ack).unwrap_or(false);
        if resize_ack {
            if let Some(rt) = self.rendertargets.get_mut(id) {
                rt.resize_ack = false;
            }
            return (None, false);
        }

        let has_chain = self.rendertargets.get(id).map(|rt| rt.has_swap_chain()).unwrap_or(false);
        if !has_chain {
            self.setup_swap_chain(id);
        }

        let rt = match self.rendertargets.get_mut(id) {
            Some(rt) => rt,
            None => return (None, false),
        };
        let old_front = rt.current_front();
        rt.store_ind = (rt.store_ind + 1) % rt.n_stores.max(1);
        let new_front = rt.current_front();
        let reference = rt.reference_store;

        if let (Some(_new), Some(v)) = (new_front, self.vstores.get_mut(reference)) {
            v.glid_proxy = new_front;
        }

        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.dirty_flip = rt.dirty_flip.saturating_sub(1);
        }
        self.drain_shadows(id);

        (old_front, true)
    }

    fn setup_swap_chain(&mut self, id: RendertargetId) {
        use crate::config::SWAP_CHAIN_LEN;
        let (reference, w, h) = match self.rendertargets.get(id) {
            Some(rt) => {
                let (w, h) = self.vstores.get(rt.reference_store).map(|v| (v.w, v.h)).unwrap_or((0, 0));
                (rt.reference_store, w, h)
            }
            None => return,
        };

        // Take the allocator hook out so the loop below can call back
        // into `self` (e.g. `self.empty`) without a double-borrow.
        let allocator = self.rendertargets.get_mut(id).and_then(|rt| rt.allocator.take());

        let mut chain = [None; SWAP_CHAIN_LEN];
        for slot in chain.iter_mut() {
            *slot = Some(match &allocator {
                Some((hook, tag)) => hook.alloc(*tag, w, h),
                None => self.empty(w, h),
            });
        }

        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.allocator = allocator;
            rt.swap_chain = chain;
            rt.n_stores = SWAP_CHAIN_LEN as u8;
            rt.store_ind = 0;
        }
        if let Some(front) = chain[0] {
            if let Some(v) = self.vstores.get_mut(reference) {
                v.glid_proxy = Some(front);
            }
        }
    }

    /// `DropSwap(RT)`: frees the swap chain and any shadows, clears the
    /// `glid_proxy` indirection, rebinds COLOR0 to the reference store,
    /// and bumps `dirty_flip` so the next frame is known-dirty. Mirrors
    /// `agp_rendertarget_dropswap`.
    pub fn drop_swap(&mut self, id: RendertargetId) {
        let (chain, shadows, reference) = match self.rendertargets.get_mut(id) {
            Some(rt) => {
                let chain: Vec<VstoreId> = rt.swap_chain.iter().filter_map(|s| *s).collect();
                let shadows: Vec<VstoreId> = rt.shadows.drain(..).map(|s| s.store).collect();
                rt.swap_chain = [None; crate::config::SWAP_CHAIN_LEN];
                rt.n_stores = 0;
                rt.store_ind = 0;
                (chain, shadows, rt.reference_store)
            }
            None => return,
        };
        for s in chain.into_iter().chain(shadows.into_iter()) {
            self.release_vstore(s);
        }
        if let Some(v) = self.vstores.get_mut(reference) {
            v.glid_proxy = None;
        }
        let glid = self.vstores.get(reference).map(|v| v.glid).unwrap_or(0);
        let fbo = self.rendertargets.get(id).map(|rt| rt.fbo).unwrap_or(0);
        self.bind_color0(fbo, glid);

        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.dirty_flip = rt.dirty_flip.saturating_add(1);
        }
    }

    fn bind_color0(&self, fbo: u32, glid: u32) {
        let gl = &self.fenv.gl;
        unsafe {
            gl.BindFramebuffer(raw::FRAMEBUFFER, fbo);
            gl.FramebufferTexture2D(raw::FRAMEBUFFER, raw::COLOR_ATTACHMENT0, raw::TEXTURE_2D, glid, 0);
            gl.BindFramebuffer(raw::FRAMEBUFFER, 0);
        }
    }

    /// `Resize(RT, w, h)`: no-op if unchanged. With a swap chain: parks
    /// every current store as a shadow (freeing any prior shadow for
    /// that slot), sets `resize_ack`, and reallocates fresh stores at
    /// the new size. Without one: resizes the backing store in place.
    /// Either way, the FBO and depth renderbuffer are torn down and
    /// rebuilt, and the viewport resets. Mirrors
    /// `agp_resize_rendertarget`.
    pub fn resize_rendertarget(&mut self, id: RendertargetId, w: u16, h: u16) {
        let (cur_w, cur_h) = match self.rendertargets.get(id) {
            Some(rt) => (rt.viewport.2 as u16, rt.viewport.3 as u16),
            None => return,
        };
        if cur_w == w && cur_h == h {
            return;
        }

        let has_chain = self.rendertargets.get(id).map(|rt| rt.has_swap_chain()).unwrap_or(false);
        let reference = self.rendertargets.get(id).unwrap().reference_store;

        // Resize the reference store unconditionally: `setup_swap_chain`
        // sizes new chain entries off this store's current dimensions, so
        // it must already reflect (w, h) before the chain is rebuilt.
        self.resize_vstore(reference, w, h);

        if has_chain {
            let old_chain: Vec<VstoreId> = {
                let rt = self.rendertargets.get(id).unwrap();
                rt.swap_chain.iter().filter_map(|s| *s).collect()
            };
            if let Some(rt) = self.rendertargets.get_mut(id) {
                // At least one more flip is guaranteed to still be in
                // flight against the old buffers (the one `resize_ack`
                // is about to defer), so `dirty_flip` must be nonzero
                // here even if nothing had marked the RT dirty yet —
                // otherwise `drain_shadows` would free them on this same
                // call instead of waiting for the swaps that follow.
                let ttl = rt.dirty_flip.max(1);
                rt.dirty_flip = ttl;
                let mut old_shadows = std::mem::take(&mut rt.shadows);
                for s in old_chain {
                    old_shadows.push(ShadowSlot { store: s, ttl });
                }
                rt.shadows = old_shadows;
                rt.swap_chain = [None; crate::config::SWAP_CHAIN_LEN];
                rt.n_stores = 0;
                rt.store_ind = 0;
                rt.resize_ack = true;
            }
            self.setup_swap_chain(id);
        } else {
            self.update(reference, true);
        }

        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.viewport = (0, 0, u32::from(w), u32::from(h));
        }
        self.rebuild_fbo(id);
        self.drain_shadows(id);
    }

    fn rebuild_fbo(&mut self, id: RendertargetId) {
        let gl = &self.fenv.gl;
        let (old_fbo, old_depth_rb, reference, mode, w, h) = match self.rendertargets.get(id) {
            Some(rt) => (rt.fbo, rt.depth_rb, rt.reference_store, rt.mode, rt.viewport.2 as u16, rt.viewport.3 as u16),
            None => return,
        };
        unsafe {
            if old_fbo != 0 {
                gl.DeleteFramebuffers(1, &old_fbo);
            }
            if old_depth_rb != 0 {
                gl.DeleteRenderbuffers(1, &old_depth_rb);
            }
        }

        let store = self.rendertargets.get(id).map(|rt| rt.current_front().unwrap_or(reference)).unwrap();
        let glid = self.resolve_texid(store);
        let (fbo, depth_rb, mode) = self.build_fbo_raw(mode, (w, h), glid);

        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.fbo = fbo;
            rt.depth_rb = depth_rb;
            rt.mode = mode;
        }
    }

    /// `Dirty(RT, region?)`: with a region, increments both the flip and
    /// region counters and returns the decay count; with none, just
    /// returns the decay (a probe, per §4.3).
    pub fn dirty(&mut self, id: RendertargetId, region: Option<Region>) -> u32 {
        let rt = match self.rendertargets.get_mut(id) {
            Some(rt) => rt,
            None => return 0,
        };
        if region.is_some() {
            rt.dirty_flip = rt.dirty_flip.saturating_add(1);
            rt.dirty_region = rt.dirty_region.saturating_add(1);
            rt.dirty_decay = rt.dirty_decay.saturating_add(1);
        }
        rt.dirty_decay
    }

    /// `DirtyReset(RT, out_regions)`: writes the current dirty region
    /// (full-frame, repeated `decay` times — the source never tracks
    /// sub-rects, §4.3) and decays the tracker.
    pub fn dirty_reset(&mut self, id: RendertargetId, out_regions: &mut Vec<Region>) {
        let rt = match self.rendertargets.get_mut(id) {
            Some(rt) => rt,
            None => return,
        };
        out_regions.clear();
        for _ in 0..rt.dirty_decay {
            out_regions.push(Region::full());
        }
        rt.dirty_decay = 0;
    }

    fn drain_shadows(&mut self, id: RendertargetId) {
        let to_free: Vec<VstoreId> = match self.rendertargets.get_mut(id) {
            Some(rt) => {
                if rt.dirty_flip > 0 {
                    return;
                }
                rt.shadows.drain(..).map(|s| s.store).collect()
            }
            None => return,
        };
        for s in to_free {
            self.release_vstore(s);
        }
    }

    /// `SwapStore(RT, new_vstore)`: replaces the color attachment with
    /// another 2D store of matching dimensions; only valid when no swap
    /// chain is active.
    pub fn swap_store(&mut self, id: RendertargetId, new_store: VstoreId) -> Result<(), AgpError> {
        let has_chain = self.rendertargets.get(id).map(|rt| rt.has_swap_chain()).unwrap_or(false);
        if has_chain {
            return Err(self.fail(AgpError::BadObject { kind: "rendertarget-swapstore-with-chain", id: 0 }));
        }
        let glid = self.resolve_texid(new_store);
        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.reference_store = new_store;
        }
        let fbo = self.rendertargets.get(id).map(|rt| rt.fbo).unwrap_or(0);
        self.bind_color0(fbo, glid);
        Ok(())
    }

    pub fn set_proxy(&mut self, id: RendertargetId, hook: Box<dyn ProxyHook>, tag: u64) {
        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.proxy = Some((hook, tag));
        }
    }

    pub fn set_allocator(&mut self, id: RendertargetId, hook: Box<dyn AllocatorHook>, tag: u64) {
        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.allocator = Some((hook, tag));
        }
    }

    pub fn clear_proxy(&mut self, id: RendertargetId) {
        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.proxy = None;
        }
    }

    pub fn rendertarget_ids(&self, id: RendertargetId) -> (u32, u32, u32) {
        self.rendertargets.get(id).map(|rt| (rt.fbo, self.resolve_texid(rt.reference_store), rt.depth_rb)).unwrap_or((0, 0, 0))
    }

    pub fn set_viewport(&mut self, id: RendertargetId, x1: i32, y1: i32, x2: i32, y2: i32) {
        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.viewport = (x1, y1, (x2 - x1).max(0) as u32, (y2 - y1).max(0) as u32);
        }
    }

    pub fn set_clear_color(&mut self, id: RendertargetId, r: f32, g: f32, b: f32, a: f32) {
        if let Some(rt) = self.rendertargets.get_mut(id) {
            rt.clear_color = (r, g, b, a);
        }
    }

    /// Releases an entire rendertarget: every owned swap-chain store,
    /// every shadow, and the FBO/depth-renderbuffer/MSAA trio.
    pub fn drop_rendertarget(&mut self, id: RendertargetId) {
        if let Some(rt) = self.rendertargets.remove(id) {
            for s in rt.swap_chain.iter().filter_map(|s| *s) {
                self.release_vstore(s);
            }
            for s in rt.shadows {
                self.release_vstore(s.store);
            }
            let gl = &self.fenv.gl;
            unsafe {
                if rt.fbo != 0 {
                    gl.DeleteFramebuffers(1, &rt.fbo);
                }
                if rt.depth_rb != 0 {
                    gl.DeleteRenderbuffers(1, &rt.depth_rb);
                }
                if rt.msaa_fbo != 0 {
                    gl.DeleteFramebuffers(1, &rt.msaa_fbo);
                }
                if rt.msaa_color_rb != 0 {
                    gl.DeleteRenderbuffers(1, &rt.msaa_color_rb);
                }
                if rt.msaa_depth_rb != 0 {
                    gl.DeleteRenderbuffers(1, &rt.msaa_depth_rb);
                }
            }
            if self.active_rendertarget == Some(id) {
                self.active_rendertarget = None;
            }
        }
    }

    // ---------------------------------------------------------------
    // Shader manager (§4.4) — thin delegation, plus `envv` which needs
    // both the env cache and (if active) the live program.
    // ---------------------------------------------------------------

    pub fn build_shader(&mut self, label: &str, vert: Option<&str>, frag: Option<&str>) -> ShaderId {
        self.shaders.build(&self.fenv, label, vert, frag)
    }

    pub fn destroy_shader(&mut self, id: ShaderId) -> Result<(), AgpError> {
        self.shaders.destroy(&self.fenv, id)
    }

    pub fn activate_shader(&mut self, id: ShaderId) -> Result<(), AgpError> {
        self.shaders.activate(&self.fenv, id, &self.env)
    }

    /// `Envv(env_slot, value, size)`: writes into the process-wide cache
    /// (here, `Context::env`); if a shader is active, immediately pushes
    /// into its resolved location too. Mirrors `agp_shader_envv`.
    pub fn envv(&mut self, slot: EnvUniform, value: &[u8]) {
        debug_assert_eq!(value.len().min(64), slot.ty().payload_size().min(64));
        self.env.set(slot, value);
        self.shaders.push_env_immediate(&self.fenv, slot, value);
    }

    pub fn add_group(&mut self, id: ShaderId) -> Result<ShaderId, AgpError> {
        self.shaders.add_group(id)
    }

    pub fn force_unif(&mut self, label: &str, ty: UniformType, value: &[u8]) -> Result<(), AgpError> {
        self.shaders.force_unif(&self.fenv, label, ty, value)
    }

    pub fn lookup_shader(&self, label: &str) -> Option<ShaderId> {
        self.shaders.lookup(label)
    }

    pub fn lookup_tag(&self, id: ShaderId) -> Option<&str> {
        self.shaders.lookup_tag(id)
    }

    pub fn lookup_progs(&self, id: ShaderId) -> Option<(&str, &str)> {
        self.shaders.lookup_progs(id)
    }

    pub fn shader_valid(&self, id: ShaderId) -> bool {
        self.shaders.valid(id)
    }

    pub fn attribute_loc(&self, id: ShaderId, attr: VertexAttribute) -> Option<i32> {
        self.shaders.attribute_loc(id, attr)
    }

    pub fn flush_shaders(&mut self) {
        self.shaders.flush(&self.fenv);
    }

    /// Context-loss recovery (§7): rebuilds every shader's program and
    /// expects the caller to re-upload every vstore afterwards.
    pub fn rebuild_all(&mut self) {
        self.shaders.rebuild_all(&self.fenv);
    }

    pub fn status_ok(&self) -> bool {
        self.fenv.status_ok()
    }
}

fn filter_to_gl(f: FilterMode) -> (u32, u32) {
    match f {
        FilterMode::None => (raw::NEAREST, raw::NEAREST),
        FilterMode::Linear => (raw::LINEAR, raw::LINEAR),
        FilterMode::Bilinear => (raw::LINEAR_MIPMAP_NEAREST, raw::LINEAR),
        FilterMode::Trilinear => (raw::LINEAR_MIPMAP_LINEAR, raw::LINEAR),
    }
}

fn wrap_to_gl(w: WrapMode) -> u32 {
    match w {
        WrapMode::ClampToEdge => raw::CLAMP_TO_EDGE,
        WrapMode::Repeat => raw::REPEAT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{clear_uniform1f_log, last_uniform1f, resolved_location, FullLoader, LocatingLoader};

    fn test_ctx() -> Context {
        Context::new(FenvBackend::Gl21, &FullLoader::new(), "test", AgpConfig::default())
    }

    fn test_ctx_conservative() -> Context {
        let mut cfg = AgpConfig::default();
        cfg.conservative_backing = true;
        Context::new(FenvBackend::Gl21, &FullLoader::new(), "test", cfg)
    }

    fn test_ctx_locating() -> Context {
        Context::new(FenvBackend::Gl21, &LocatingLoader::new(), "test", AgpConfig::default())
    }

    // -- Property 1: refcount == 0 implies no GPU id (the slot is gone). --

    #[test]
    fn release_vstore_at_zero_refcount_frees_the_slot() {
        let mut ctx = test_ctx();
        let id = ctx.empty(4, 4);
        assert!(ctx.vstore(id).unwrap().has_gpu_id());
        ctx.release_vstore(id);
        assert!(ctx.vstore(id).is_none());
    }

    #[test]
    fn share_vstore_keeps_it_alive_until_the_matching_release() {
        let mut ctx = test_ctx();
        let id = ctx.empty(4, 4);
        ctx.share_vstore(id);
        ctx.release_vstore(id);
        assert!(ctx.vstore(id).is_some());
        ctx.release_vstore(id);
        assert!(ctx.vstore(id).is_none());
    }

    #[test]
    fn update_retains_backing_by_default_and_drops_it_in_conservative_mode() {
        let mut ctx = test_ctx();
        let id = ctx.empty(4, 4);
        assert!(ctx.vstore(id).unwrap().backing.is_some());

        let mut ctx = test_ctx_conservative();
        let id = ctx.empty(4, 4);
        assert!(ctx.vstore(id).unwrap().backing.is_none());
    }

    // -- Property 2: the swap chain's glid_proxy invariant. --

    #[test]
    fn swap_points_reference_store_proxy_at_the_current_front() {
        let mut ctx = test_ctx();
        let store = ctx.empty(8, 8);
        let rt = ctx.setup_rendertarget(store, RendertargetMode::Color);

        let (old_front, happened) = ctx.swap(rt);
        assert!(happened);
        assert!(old_front.is_none());

        let front = ctx.rendertarget(rt).unwrap().current_front();
        assert!(front.is_some());
        assert_eq!(ctx.vstore(store).unwrap().glid_proxy, front);
    }

    // -- Property 3 / scenario S2: resize parks the old chain as shadows
    // until dirty_flip drains, and a rebuild never changes the
    // RendertargetId (regression coverage for the remove+insert bug a
    // slotmap generational key can't survive). --

    #[test]
    fn resize_rendertarget_rebuilds_fbo_without_changing_the_rendertarget_id() {
        let mut ctx = test_ctx();
        let store = ctx.empty(8, 8);
        let rt = ctx.setup_rendertarget(store, RendertargetMode::ColorDepth);
        assert_ne!(ctx.rendertarget(rt).unwrap().fbo, 0);

        ctx.resize_rendertarget(rt, 16, 16);

        assert!(ctx.rendertarget(rt).is_some());
        assert_ne!(ctx.rendertarget(rt).unwrap().fbo, 0);
    }

    #[test]
    fn resize_rendertarget_resizes_reference_store_even_with_an_active_swap_chain() {
        let mut ctx = test_ctx();
        let store = ctx.empty(8, 8);
        let rt = ctx.setup_rendertarget(store, RendertargetMode::Color);
        ctx.swap(rt);

        ctx.resize_rendertarget(rt, 32, 24);

        let v = ctx.vstore(store).unwrap();
        assert_eq!((v.w, v.h), (32, 24));

        let front = ctx.rendertarget(rt).unwrap().current_front().unwrap();
        let front_v = ctx.vstore(front).unwrap();
        assert_eq!((front_v.w, front_v.h), (32, 24));
    }

    #[test]
    fn resize_parks_old_chain_as_shadows_until_dirty_flip_drains() {
        let mut ctx = test_ctx();
        let store = ctx.empty(8, 8);
        let rt = ctx.setup_rendertarget(store, RendertargetMode::Color);
        ctx.swap(rt);

        ctx.resize_rendertarget(rt, 16, 16);
        assert!(!ctx.rendertarget(rt).unwrap().shadows.is_empty());
        assert!(ctx.rendertarget(rt).unwrap().dirty_flip > 0);

        // The swap right after a resize is absorbed by resize_ack: no
        // decrement, no drain yet.
        let (_, happened) = ctx.swap(rt);
        assert!(!happened);
        assert!(!ctx.rendertarget(rt).unwrap().shadows.is_empty());

        // The next swap decrements dirty_flip to zero and drains the
        // parked shadows.
        ctx.swap(rt);
        assert_eq!(ctx.rendertarget(rt).unwrap().dirty_flip, 0);
        assert!(ctx.rendertarget(rt).unwrap().shadows.is_empty());
    }

    // -- Property 4: Clear + DirtyReset region count matches the decay. --

    #[test]
    fn dirty_reset_reports_one_full_region_per_decayed_clear() {
        let mut ctx = test_ctx();
        let store = ctx.empty(4, 4);
        let rt = ctx.setup_rendertarget(store, RendertargetMode::Color);
        ctx.activate_rendertarget(rt);
        ctx.clear_active();
        ctx.clear_active();
        ctx.clear_active();

        let mut regions = Vec::new();
        ctx.dirty_reset(rt, &mut regions);
        assert_eq!(regions.len(), 3);
        assert!(regions.iter().all(|r| *r == Region::full()));

        let mut again = Vec::new();
        ctx.dirty_reset(rt, &mut again);
        assert!(again.is_empty());
    }

    // -- Property 5: Build reuses the existing slot for a repeated label. --

    #[test]
    fn build_reuses_the_slot_for_a_repeated_label() {
        let mut ctx = test_ctx();
        let a = ctx.build_shader("custom", None, None);
        assert!(!a.is_broken());
        let b = ctx.build_shader("custom", None, None);
        assert_eq!(a, b);
    }

    // -- Property 6: AddGroup + group Destroy leaves the base program
    // intact. --

    #[test]
    fn add_group_then_destroy_group_keeps_the_base_program_valid() {
        let mut ctx = test_ctx();
        let base = ctx.build_shader("with_group", None, None);
        assert!(ctx.shader_valid(base));

        let group = ctx.add_group(base).unwrap();
        assert_ne!(group, base);
        assert!(ctx.shader_valid(group));

        ctx.destroy_shader(group).unwrap();
        assert!(!ctx.shader_valid(group));
        assert!(ctx.shader_valid(base));
    }

    // -- Property 7 / scenario S1: Activate after an intervening Envv
    // pushes the new value into the newly active program's resolved
    // location. --

    #[test]
    fn envv_between_activates_pushes_into_the_newly_active_program() {
        let mut ctx = test_ctx_locating();
        let shader = ctx.build_shader("envv_test", None, None);
        ctx.activate_shader(shader).unwrap();

        clear_uniform1f_log();
        ctx.envv(EnvUniform::ObjOpacity, &0.5f32.to_ne_bytes());

        let loc = resolved_location(EnvUniform::ObjOpacity.as_str());
        assert_eq!(last_uniform1f(loc), Some(0.5));
    }

    #[test]
    fn scenario_s1_default_shader_attribute_locations_resolve_with_a_locating_backend() {
        let ctx = test_ctx_locating();
        let basic2d = ctx.lookup_shader("BASIC_2D").unwrap();
        let loc = ctx.attribute_loc(basic2d, VertexAttribute::Vertex).unwrap();
        assert!(loc >= 0);
        assert_eq!(loc, resolved_location(VertexAttribute::Vertex.as_str()));
    }

    // -- Property 8: ExtResync preserves refcount/dimensions/bpp while
    // dropping and rebuilding the GL id. --

    #[test]
    fn ext_resync_preserves_refcount_and_dims_while_rebuilding_the_gl_id() {
        let mut ctx = test_ctx();
        let id = ctx.empty(8, 8);
        ctx.share_vstore(id);
        let (w, h, bpp, refcount) = {
            let v = ctx.vstore(id).unwrap();
            (v.w, v.h, v.bpp, v.refcount)
        };
        assert!(ctx.vstore(id).unwrap().has_gpu_id());

        let handle = ctx.stream_prepare(id, StreamMeta::full(w, h), StreamKind::ExtResync);
        assert!(matches!(handle, StreamHandle::Uploaded));

        let v = ctx.vstore(id).unwrap();
        assert!(v.has_gpu_id());
        assert_eq!((v.w, v.h, v.bpp, v.refcount), (w, h, bpp, refcount));
    }

    // -- §6 buffer-map hook: HandleImport binds through it, drop notifies
    // it with handle = -1. --

    #[test]
    fn handle_import_binds_via_the_buffer_map_hook_and_adopts_plane_dims() {
        use crate::testutil::RecordingMapHook;
        use crate::vstore::BufferPlane;

        let mut ctx = test_ctx();
        let hook = std::sync::Arc::new(RecordingMapHook::new(42));
        ctx.set_buffer_map_hook(Box::new(hook.clone()));

        let id = ctx.empty(4, 4);
        let planes = vec![BufferPlane { fd: 3, w: 64, h: 32, stride: 256, offset: 0, modifier: 0 }];
        let result = ctx.stream_prepare(id, StreamMeta::for_import(planes), StreamKind::HandleImport);

        assert!(matches!(result, StreamHandle::Uploaded));
        assert_eq!(hook.mapped_stores(), vec![id]);
        let v = ctx.vstore(id).unwrap();
        assert!(v.has_gpu_id());
        assert_eq!((v.w, v.h), (64, 32));
        assert_eq!(v.external, Some(ExternalHandle(42)));

        ctx.release_vstore(id);
        assert_eq!(hook.released_calls(), vec![(id, ExternalHandle(-1))]);
    }

    #[test]
    fn handle_import_fails_without_dropping_the_allocated_gl_id() {
        use crate::testutil::RefusingMapHook;
        use crate::vstore::BufferPlane;

        let mut ctx = test_ctx();
        ctx.set_buffer_map_hook(Box::new(RefusingMapHook));

        let id = ctx.empty(4, 4);
        let planes = vec![BufferPlane { fd: 3, w: 8, h: 8, stride: 32, offset: 0, modifier: 0 }];
        let result = ctx.stream_prepare(id, StreamMeta::for_import(planes), StreamKind::HandleImport);

        assert!(matches!(result, StreamHandle::Failed));
        assert!(ctx.vstore(id).unwrap().has_gpu_id());
        assert!(ctx.vstore(id).unwrap().external.is_none());
    }

    // -- Property 9: CopyRegion with an empty clamped intersection is a
    // no-op. --

    #[test]
    fn copy_region_with_empty_intersection_is_a_no_op() {
        let mut ctx = test_ctx();
        let src = ctx.empty(4, 4);
        let dst = ctx.empty(4, 4);
        assert!(ctx.vstore(dst).unwrap().backing.is_some());
        let dst_before = ctx.vstore(dst).unwrap().backing.clone();

        // Fully outside both 4x4 stores once clamped.
        ctx.copy_region(src, dst, 10, 10, 20, 20);

        assert_eq!(ctx.vstore(dst).unwrap().backing, dst_before);
    }

    #[test]
    fn copy_region_copies_the_clamped_overlap() {
        let mut ctx = test_ctx();
        let src = ctx.empty(4, 4);
        let dst = ctx.empty(4, 4);
        if let Some(v) = ctx.vstore_mut(src) {
            if let Some(b) = &mut v.backing {
                for byte in b.iter_mut() {
                    *byte = 0xAB;
                }
            }
        }
        ctx.copy_region(src, dst, 0, 0, 4, 4);
        let dst_backing = ctx.vstore(dst).unwrap().backing.clone().unwrap();
        assert!(dst_backing.iter().all(|&b| b == 0xAB));
    }

    // -- Property 10: slice_synch only skips cube faces whose dims or
    // staleness don't qualify; the rest still update. --

    #[test]
    fn slice_synch_skips_mismatched_cube_faces_but_updates_the_rest() {
        let mut ctx = test_ctx();
        let cube = ctx.empty(4, 4);
        ctx.slice_backing(cube, SliceMode::Cube).unwrap();

        let matching: Vec<VstoreId> = (0..5)
            .map(|_| {
                let f = ctx.empty(4, 4);
                ctx.update(f, true); // bump past the cube's own updated_ts
                f
            })
            .collect();
        let mismatched = ctx.empty(8, 8);
        ctx.update(mismatched, true);

        let mut faces = matching.clone();
        faces.push(mismatched);

        ctx.slice_synch(cube, &faces).unwrap();

        match &ctx.vstore(cube).unwrap().kind {
            VstoreKind::Cube { faces: stored } => {
                for i in 0..5 {
                    assert_eq!(stored[i], Some(matching[i]));
                }
                assert_eq!(stored[5], None);
            }
            _ => panic!("expected cube kind"),
        }
    }

    // -- Scenario S3: a proxy hook's takeover is gated on the reference
    // store's refcount. --

    struct AlwaysTakeover;
    impl ProxyHook for AlwaysTakeover {
        fn wants_scanout(&self, _tag: u64) -> bool {
            true
        }
    }

    #[test]
    fn scenario_s3_proxy_takeover_activates_without_panicking() {
        let mut ctx = test_ctx();
        let store = ctx.empty(8, 8);
        let rt = ctx.setup_rendertarget(store, RendertargetMode::Color);
        ctx.set_proxy(rt, Box::new(AlwaysTakeover), 0);

        ctx.activate_rendertarget(rt);
        assert_eq!(ctx.active_rendertarget, Some(rt));

        ctx.clear_proxy(rt);
        ctx.activate_rendertarget(rt);
        assert_eq!(ctx.active_rendertarget, Some(rt));
    }

    // -- Scenario S4: sub-rect vs. full-upload threshold decision. --

    #[test]
    fn scenario_s4_exceeds_threshold_picks_full_vs_sub_rect_upload() {
        let mostly_dirty = StreamMeta { x1: 0, y1: 0, w: 10, h: 6, dirty: true, planes: Vec::new() };
        assert!(mostly_dirty.exceeds_threshold(10, 10, 0.5));

        let barely_dirty = StreamMeta { x1: 0, y1: 0, w: 2, h: 2, dirty: true, planes: Vec::new() };
        assert!(!barely_dirty.exceeds_threshold(10, 10, 0.5));
    }

    #[test]
    fn scenario_s4_stream_prepare_raw_direct_uploads_for_full_and_partial_dirty_rects() {
        let mut ctx = test_ctx();
        let id = ctx.empty(10, 10);

        let full = ctx.stream_prepare(id, StreamMeta::full(10, 10), StreamKind::RawDirect);
        assert!(matches!(full, StreamHandle::Uploaded));

        let partial = ctx.stream_prepare(
            id,
            StreamMeta { x1: 1, y1: 1, w: 2, h: 2, dirty: true, planes: Vec::new() },
            StreamKind::RawDirect,
        );
        assert!(matches!(partial, StreamHandle::Uploaded));
    }

    // -- Scenario S5: MSAA setup falls back to ColorDepthStencil when the
    // backend doesn't expose multisample renderbuffers. --

    #[test]
    fn scenario_s5_msaa_setup_falls_back_without_backend_support() {
        let loader = FullLoader::without("glRenderbufferStorageMultisample");
        let mut ctx = Context::new(FenvBackend::Gl21, &loader, "test", AgpConfig::default());
        let store = ctx.empty(8, 8);

        let rt = ctx.setup_rendertarget(store, RendertargetMode::Msaa);
        assert_eq!(ctx.rendertarget(rt).unwrap().mode, RendertargetMode::ColorDepthStencil);
    }

    // -- Scenario S6: context-loss recovery rebuilds every shader program
    // and labels stay reachable by lookup. --

    #[test]
    fn scenario_s6_rebuild_all_recreates_programs_after_context_loss() {
        let mut ctx = test_ctx();
        let custom = ctx.build_shader("reload_me", None, None);
        assert!(ctx.shader_valid(custom));
        let tag_before = ctx.lookup_tag(custom).unwrap().to_owned();

        ctx.rebuild_all();

        let after = ctx.lookup_shader("reload_me");
        assert!(after.is_some());
        assert_eq!(ctx.lookup_tag(after.unwrap()).unwrap(), tag_before);
    }
}
