//! Test-only GL stand-in: a `Loader` that resolves every entry point to a
//! trivial no-op (or scripted) extern function, so `Context` can be built
//! and exercised without a real GL context.
//!
//! Status-query entry points (`glGetShaderiv`, `glGetProgramiv`) always
//! report success; location queries always report "unresolved" (-1) so
//! the uniform-push paths, which all gate on `loc >= 0`, stay inert.
//! `glCheckFramebufferStatus` is the one scripted exception, used by the
//! FBO-incomplete-retry test.

use crate::fenv::Loader;
use std::collections::HashMap;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicU32, Ordering};

const GL_TRUE: i32 = 1;
const FRAMEBUFFER_COMPLETE: u32 = 0x8cd5;
const FRAMEBUFFER_INCOMPLETE_ATTACHMENT: u32 = 0x8cd6;

extern "system" fn no_args() {}
extern "system" fn one_u32(_a: u32) {}
extern "system" fn two_u32(_a: u32, _b: u32) {}
extern "system" fn three_u32(_a: u32, _b: u32, _c: u32) {}
extern "system" fn four_u32(_a: u32, _b: u32, _c: u32, _d: u32) {}
extern "system" fn four_f32(_a: f32, _b: f32, _c: f32, _d: f32) {}
extern "system" fn four_i32(_a: i32, _b: i32, _c: i32, _d: i32) {}
extern "system" fn four_u8(_a: u8, _b: u8, _c: u8, _d: u8) {}
extern "system" fn gen_one(_n: i32, out: *mut u32) {
    unsafe { *out = 1 };
}
extern "system" fn bind_two(_target: u32, _id: u32) {}
extern "system" fn tex_param_i(_target: u32, _pname: u32, _param: i32) {}
#[allow(clippy::too_many_arguments)]
extern "system" fn tex_image_2d(
    _target: u32,
    _level: i32,
    _internalformat: i32,
    _width: i32,
    _height: i32,
    _border: i32,
    _format: u32,
    _ty: u32,
    _pixels: *const c_void,
) {
}
#[allow(clippy::too_many_arguments)]
extern "system" fn tex_sub_image_2d(
    _target: u32,
    _level: i32,
    _x: i32,
    _y: i32,
    _w: i32,
    _h: i32,
    _format: u32,
    _ty: u32,
    _pixels: *const c_void,
) {
}
extern "system" fn renderbuffer_storage(_target: u32, _internalformat: u32, _w: i32, _h: i32) {}
extern "system" fn renderbuffer_storage_multisample(_target: u32, _samples: i32, _internalformat: u32, _w: i32, _h: i32) {}
extern "system" fn framebuffer_texture_2d(_target: u32, _attachment: u32, _textarget: u32, _texture: u32, _level: i32) {}
extern "system" fn framebuffer_renderbuffer(_target: u32, _attachment: u32, _rbtarget: u32, _rb: u32) {}
extern "system" fn check_framebuffer_status(_target: u32) -> u32 {
    FRAMEBUFFER_COMPLETE
}
extern "system" fn create_obj(_a: u32) -> u32 {
    1
}
extern "system" fn create_program_fn() -> u32 {
    1
}
extern "system" fn shader_source(_shader: u32, _count: i32, _strings: *const *const i8, _lengths: *const i32) {}
extern "system" fn get_iv_always_true(_obj: u32, _pname: u32, params: *mut i32) {
    unsafe { *params = GL_TRUE };
}
extern "system" fn get_info_log(_obj: u32, _bufsize: i32, length: *mut i32, _buf: *mut i8) {
    unsafe { *length = 0 };
}
extern "system" fn get_location(_program: u32, _name: *const i8) -> i32 {
    -1
}
extern "system" fn reset_status() -> u32 {
    0
}
extern "system" fn buffer_data(_target: u32, _size: isize, _data: *const c_void, _usage: u32) {}
extern "system" fn map_buffer(_target: u32, _access: u32) -> *mut c_void {
    std::ptr::null_mut()
}

static UNIFORM1F_LOG: std::sync::OnceLock<std::sync::Mutex<HashMap<i32, f32>>> = std::sync::OnceLock::new();

fn uniform1f_log() -> &'static std::sync::Mutex<HashMap<i32, f32>> {
    UNIFORM1F_LOG.get_or_init(|| std::sync::Mutex::new(HashMap::new()))
}

extern "system" fn uniform1f_recording(location: i32, v: f32) {
    uniform1f_log().lock().unwrap().insert(location, v);
}

/// Last value pushed through `glUniform1f` for `location`, as recorded by
/// [`LocatingLoader`]'s stub. Used to observe the activate/envv push path
/// (testable property 7) without a real GL context to query.
pub fn last_uniform1f(location: i32) -> Option<f32> {
    uniform1f_log().lock().unwrap().get(&location).copied()
}

pub fn clear_uniform1f_log() {
    uniform1f_log().lock().unwrap().clear();
}

/// Deterministic mapping from a uniform/attribute name to the location
/// [`LocatingLoader`] resolves it to, exposed so tests can predict what
/// location a given name will end up at.
pub fn resolved_location(name: &str) -> i32 {
    (fxhash::hash64(name.as_bytes()) % 997) as i32
}

extern "system" fn get_location_resolved(_program: u32, name: *const i8) -> i32 {
    let s = unsafe { std::ffi::CStr::from_ptr(name) }.to_string_lossy().into_owned();
    resolved_location(&s)
}

/// Table of every symbol name the crate's GL call sites resolve, paired
/// with a stub function of matching arity. The "fallback, All" behavior
/// `gl_generator` generates for anything left unresolved panics on first
/// call, so the table must cover every entry point actually invoked.
fn stub_table() -> HashMap<&'static str, *const c_void> {
    let mut t: HashMap<&'static str, *const c_void> = HashMap::new();
    t.insert("glEnable", one_u32 as *const c_void);
    t.insert("glDisable", one_u32 as *const c_void);
    t.insert("glBlendFuncSeparate", four_u32 as *const c_void);
    t.insert("glBlendFunc", two_u32 as *const c_void);
    t.insert("glBlendEquation", one_u32 as *const c_void);
    t.insert("glFrontFace", one_u32 as *const c_void);
    t.insert("glCullFace", one_u32 as *const c_void);
    t.insert("glClearColor", four_f32 as *const c_void);
    t.insert("glClear", one_u32 as *const c_void);
    t.insert("glClearStencil", one_u32 as *const c_void);
    t.insert("glColorMask", four_u8 as *const c_void);
    t.insert("glViewport", four_i32 as *const c_void);
    t.insert("glScissor", four_i32 as *const c_void);
    t.insert("glDepthMask", one_u32 as *const c_void);
    t.insert("glDepthFunc", one_u32 as *const c_void);
    t.insert("glStencilFunc", three_u32 as *const c_void);
    t.insert("glStencilOp", three_u32 as *const c_void);
    t.insert("glPolygonMode", two_u32 as *const c_void);
    t.insert("glActiveTexture", one_u32 as *const c_void);

    t.insert("glGenTextures", gen_one as *const c_void);
    t.insert("glBindTexture", bind_two as *const c_void);
    t.insert("glTexParameteri", tex_param_i as *const c_void);
    t.insert("glTexImage2D", tex_image_2d as *const c_void);
    t.insert("glTexSubImage2D", tex_sub_image_2d as *const c_void);
    t.insert("glGetTexImage", no_args as *const c_void);
    t.insert("glDeleteTextures", one_u32 as *const c_void);

    t.insert("glGenFramebuffers", gen_one as *const c_void);
    t.insert("glBindFramebuffer", bind_two as *const c_void);
    t.insert("glFramebufferTexture2D", framebuffer_texture_2d as *const c_void);
    t.insert("glDeleteFramebuffers", one_u32 as *const c_void);
    t.insert("glGenRenderbuffers", gen_one as *const c_void);
    t.insert("glBindRenderbuffer", bind_two as *const c_void);
    t.insert("glRenderbufferStorage", renderbuffer_storage as *const c_void);
    t.insert("glRenderbufferStorageMultisample", renderbuffer_storage_multisample as *const c_void);
    t.insert("glFramebufferRenderbuffer", framebuffer_renderbuffer as *const c_void);
    t.insert("glCheckFramebufferStatus", check_framebuffer_status as *const c_void);
    t.insert("glDeleteRenderbuffers", one_u32 as *const c_void);

    t.insert("glGenBuffers", gen_one as *const c_void);
    t.insert("glBindBuffer", bind_two as *const c_void);
    t.insert("glBufferData", buffer_data as *const c_void);
    t.insert("glDeleteBuffers", one_u32 as *const c_void);
    t.insert("glMapBuffer", map_buffer as *const c_void);
    t.insert("glUnmapBuffer", one_u32 as *const c_void);

    t.insert("glCreateShader", create_obj as *const c_void);
    t.insert("glShaderSource", shader_source as *const c_void);
    t.insert("glCompileShader", one_u32 as *const c_void);
    t.insert("glGetShaderiv", get_iv_always_true as *const c_void);
    t.insert("glGetShaderInfoLog", get_info_log as *const c_void);
    t.insert("glDeleteShader", one_u32 as *const c_void);
    t.insert("glCreateProgram", create_program_fn as *const c_void);
    t.insert("glAttachShader", two_u32 as *const c_void);
    t.insert("glLinkProgram", one_u32 as *const c_void);
    t.insert("glGetProgramiv", get_iv_always_true as *const c_void);
    t.insert("glGetProgramInfoLog", get_info_log as *const c_void);
    t.insert("glDeleteProgram", one_u32 as *const c_void);
    t.insert("glUseProgram", one_u32 as *const c_void);
    t.insert("glGetUniformLocation", get_location as *const c_void);
    t.insert("glGetAttribLocation", get_location as *const c_void);
    t.insert("glUniform1i", two_u32 as *const c_void);
    t.insert("glUniform1f", two_u32 as *const c_void);
    t.insert("glUniform2f", three_u32 as *const c_void);
    t.insert("glUniform3f", four_u32 as *const c_void);
    t.insert("glUniform4f", four_u32 as *const c_void);
    t.insert("glUniformMatrix4fv", four_u32 as *const c_void);
    t.insert("glEnableVertexAttribArray", one_u32 as *const c_void);
    t.insert("glDisableVertexAttribArray", one_u32 as *const c_void);
    t.insert("glVertexAttribPointer", three_u32 as *const c_void);
    t.insert("glDrawArrays", three_u32 as *const c_void);
    t.insert("glDrawElements", four_u32 as *const c_void);

    t.insert("glGetGraphicsResetStatus", reset_status as *const c_void);
    t
}

/// `required = false` always and every probed symbol resolves, so every
/// `Features` bit ends up set.
pub struct FullLoader {
    table: HashMap<&'static str, *const c_void>,
    calls: AtomicU32,
}

impl FullLoader {
    pub fn new() -> FullLoader {
        FullLoader { table: stub_table(), calls: AtomicU32::new(0) }
    }

    /// Like `new`, but drops `name` from the table so the matching
    /// `Features` bit comes back unset (for fallback-path tests).
    pub fn without(name: &str) -> FullLoader {
        let mut table = stub_table();
        table.remove(name);
        FullLoader { table, calls: AtomicU32::new(0) }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Loader for FullLoader {
    fn lookup(&self, _tag: &str, name: &str, _required: bool) -> Option<*const c_void> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table.get(name).copied()
    }
}

/// Like `FullLoader`, but resolves every uniform/attribute location to a
/// deterministic non-negative value instead of the always-unresolved
/// `-1`, and records every `glUniform1f` push, so tests can exercise the
/// activate/envv uniform-push path (testable property 7, S1) instead of
/// it staying inert.
pub struct LocatingLoader {
    table: HashMap<&'static str, *const c_void>,
}

impl LocatingLoader {
    pub fn new() -> LocatingLoader {
        let mut table = stub_table();
        table.insert("glGetUniformLocation", get_location_resolved as *const c_void);
        table.insert("glGetAttribLocation", get_location_resolved as *const c_void);
        table.insert("glUniform1f", uniform1f_recording as *const c_void);
        LocatingLoader { table }
    }
}

impl Loader for LocatingLoader {
    fn lookup(&self, _tag: &str, name: &str, _required: bool) -> Option<*const c_void> {
        self.table.get(name).copied()
    }
}

/// Test-only stand-in for the platform's `platform_video_map_buffer`/
/// `platform_video_map_handle` pair (§6): always succeeds, handing back
/// a fixed handle, and records every `map`/`release` call so tests can
/// assert on them without a real importer.
pub struct RecordingMapHook {
    pub handle: crate::vstore::ExternalHandle,
    mapped: std::sync::Mutex<Vec<crate::context::VstoreId>>,
    released: std::sync::Mutex<Vec<(crate::context::VstoreId, crate::vstore::ExternalHandle)>>,
}

impl RecordingMapHook {
    pub fn new(handle: i64) -> RecordingMapHook {
        RecordingMapHook {
            handle: crate::vstore::ExternalHandle(handle),
            mapped: std::sync::Mutex::new(Vec::new()),
            released: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn mapped_stores(&self) -> Vec<crate::context::VstoreId> {
        self.mapped.lock().unwrap().clone()
    }

    pub fn released_calls(&self) -> Vec<(crate::context::VstoreId, crate::vstore::ExternalHandle)> {
        self.released.lock().unwrap().clone()
    }
}

impl crate::vstore::BufferMapHook for RecordingMapHook {
    fn map(
        &self,
        vstore: crate::context::VstoreId,
        _planes: &[crate::vstore::BufferPlane],
    ) -> Option<crate::vstore::ExternalHandle> {
        self.mapped.lock().unwrap().push(vstore);
        Some(self.handle)
    }

    fn release(&self, vstore: crate::context::VstoreId, handle: crate::vstore::ExternalHandle) {
        self.released.lock().unwrap().push((vstore, handle));
    }
}

/// Lets a test keep an `Arc` to a `RecordingMapHook` for post-hoc
/// assertions while also handing `Context` a `Box<dyn BufferMapHook>`.
impl crate::vstore::BufferMapHook for std::sync::Arc<RecordingMapHook> {
    fn map(
        &self,
        vstore: crate::context::VstoreId,
        planes: &[crate::vstore::BufferPlane],
    ) -> Option<crate::vstore::ExternalHandle> {
        (**self).map(vstore, planes)
    }

    fn release(&self, vstore: crate::context::VstoreId, handle: crate::vstore::ExternalHandle) {
        (**self).release(vstore, handle)
    }
}

/// Always fails the import, for the `None`/failure branch of
/// `stream_handle_import`.
pub struct RefusingMapHook;

impl crate::vstore::BufferMapHook for RefusingMapHook {
    fn map(
        &self,
        _vstore: crate::context::VstoreId,
        _planes: &[crate::vstore::BufferPlane],
    ) -> Option<crate::vstore::ExternalHandle> {
        None
    }

    fn release(&self, _vstore: crate::context::VstoreId, _handle: crate::vstore::ExternalHandle) {}
}

extern "system" fn check_framebuffer_status_incomplete_once() -> u32 {
    FRAMEBUFFER_INCOMPLETE_ATTACHMENT
}

/// A loader whose `glCheckFramebufferStatus` reports incomplete on the
/// first call and complete on every call after, for the depth-attachment
/// retry path (§7).
pub struct IncompleteOnceLoader {
    inner: FullLoader,
    first: AtomicU32,
}

impl IncompleteOnceLoader {
    pub fn new() -> IncompleteOnceLoader {
        IncompleteOnceLoader { inner: FullLoader::new(), first: AtomicU32::new(1) }
    }
}

impl Loader for IncompleteOnceLoader {
    fn lookup(&self, tag: &str, name: &str, required: bool) -> Option<*const c_void> {
        if name == "glCheckFramebufferStatus" && self.first.swap(0, Ordering::SeqCst) == 1 {
            return Some(check_framebuffer_status_incomplete_once as *const c_void);
        }
        self.inner.lookup(tag, name, required)
    }
}
