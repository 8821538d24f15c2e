//! AGP — the accelerated graphics pipeline backend.
//!
//! A scriptable display server's rendering core sits on top of this
//! crate rather than talking to GL directly: [`Context`] owns the late
//! bound [`fenv::Fenv`] dispatch table, the GPU-texture arena
//! ([`VstoreId`]), the framebuffer arena ([`RendertargetId`]), the
//! shader/uniform manager, and the draw/pipeline state, threading all
//! of it explicitly instead of through process-global statics.
//!
//! Nothing here unwinds on a backend failure. Every fallible operation
//! keeps returning whatever sentinel, `Option`, or `bool` its signature
//! already promised; [`Context::last_error`] carries the structured
//! [`error::AgpError`] alongside the `log` line already emitted at the
//! call site. A `Context` is not `Sync`: exactly one thread drives a
//! given GL context, matching the single-threaded cooperative ownership
//! most platform GL bindings assume.

#[macro_use]
extern crate log;

mod config;
mod context;
mod draw;
mod error;
mod fenv;
mod format;
mod rendertarget;
mod shader;
mod shaders;
mod vstore;

#[cfg(test)]
mod testutil;

pub use crate::config::AgpConfig;
pub use crate::context::{Context, RendertargetId, StreamHandle, VstoreId};
pub use crate::draw::{BlendFactors, BlendState, DepthFunc, Mesh, MeshFlags, MeshTopology, PipelineMode};
pub use crate::error::AgpError;
pub use crate::fenv::{Fenv, FenvBackend, Features, Loader};
pub use crate::format::{Eotf, FormatHint, FormatInfo, HdrMetadata};
pub use crate::rendertarget::{
    AllocatorHook, ProxyHook, Region, Rendertarget, RendertargetFlags, RendertargetMode, ShadowSlot,
};
pub use crate::shader::{EnvUniform, ShaderId, ShaderMask, UniformType, VertexAttribute, BROKEN_SHADER};
pub use crate::shaders::{shader_source, DefaultShaderKind};
pub use crate::vstore::{
    BufferMapHook, BufferPlane, ExternalHandle, FilterMode, ReadbackMeta, SliceMode, StreamKind, StreamMeta,
    Vstore, VstoreKind, WrapMode,
};
