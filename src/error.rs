//! Diagnostic error taxonomy.
//!
//! Nothing in this crate unwinds on a backend-level failure (see the
//! propagation policy in the module docs on [`crate::Context`]): every
//! fallible operation keeps returning the sentinel/`Option`/`bool` its
//! signature promises. `AgpError` exists so those failures also carry a
//! structured value alongside the `log` line already emitted at the call
//! site, retrievable through `Context::last_error`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgpError {
    #[error("no such object: {kind} id {id}")]
    BadObject { kind: &'static str, id: u32 },

    #[error("backend is missing required feature: {feature}")]
    BackendFeatureMissing { feature: &'static str },

    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: &'static str, log: String },

    #[error("program link failed: {log}")]
    ShaderLink { log: String },

    #[error("framebuffer incomplete: 0x{status:x}")]
    FramebufferIncomplete { status: u32 },

    #[error("refused to destroy default shader slot {slot}")]
    DefaultShaderProtected { slot: u32 },

    #[error("uniform group table exhausted (limit {limit})")]
    GroupTableFull { limit: u32 },
}
