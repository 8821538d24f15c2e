//! Default shader source for the three default shader kinds.
//!
//! Embedded as plain GLSL 1.20 / ESSL 1.00 strings the way the teacher's
//! `common_shaders` crate embeds GLSL as Rust string constants, but
//! written against the plain-uniform-name ABI this crate's environment
//! uniform table expects (`modelview`, `projection`, ...), not the
//! Vulkan-style `layout(set=, binding=)` GLSL `common_shaders` uses —
//! that qualifier syntax has no meaning for a GL21/GLES2 fixed-name
//! uniform contract.
//!
//! Corresponds to the backend-specific default source
//! `agp_shader_source()` is expected to hand back for each
//! `ShaderManager::build(label, None, None)` substitution.

pub const BASIC_2D_VERT: &str = r#"
uniform mat4 modelview;
uniform mat4 projection;

attribute vec2 vertex;
attribute vec2 texcoord;

varying vec2 texco;

void main()
{
    texco = texcoord;
    gl_Position = (projection * modelview) * vec4(vertex.xy, 0.0, 1.0);
}
"#;

pub const BASIC_2D_FRAG: &str = r#"
uniform sampler2D map_diffuse;
uniform float obj_opacity;

varying vec2 texco;

void main()
{
    vec4 col = texture2D(map_diffuse, texco);
    gl_FragColor = vec4(col.rgb, col.a * obj_opacity);
}
"#;

pub const COLOR_2D_VERT: &str = BASIC_2D_VERT;

pub const COLOR_2D_FRAG: &str = r#"
uniform vec3 obj_col;
uniform float obj_opacity;

void main()
{
    gl_FragColor = vec4(obj_col, obj_opacity);
}
"#;

pub const BASIC_3D_VERT: &str = r#"
uniform mat4 modelview;
uniform mat4 projection;

attribute vec3 vertex;
attribute vec3 normal;
attribute vec2 texcoord;

varying vec2 texco;
varying vec3 nv;

void main()
{
    texco = texcoord;
    nv = normal;
    gl_Position = (projection * modelview) * vec4(vertex, 1.0);
}
"#;

pub const BASIC_3D_FRAG: &str = r#"
uniform sampler2D map_diffuse;
uniform float obj_opacity;

varying vec2 texco;
varying vec3 nv;

void main()
{
    vec4 col = texture2D(map_diffuse, texco);
    gl_FragColor = vec4(col.rgb, col.a * obj_opacity);
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultShaderKind {
    Basic2D,
    Color2D,
    Basic3D,
}

/// Returns `(vertex, fragment)` default source for `kind`, the Rust
/// analogue of the `agp_shader_source()` external interface (§6).
pub fn shader_source(kind: DefaultShaderKind) -> (&'static str, &'static str) {
    match kind {
        DefaultShaderKind::Basic2D => (BASIC_2D_VERT, BASIC_2D_FRAG),
        DefaultShaderKind::Color2D => (COLOR_2D_VERT, COLOR_2D_FRAG),
        DefaultShaderKind::Basic3D => (BASIC_3D_VERT, BASIC_3D_FRAG),
    }
}
