extern crate gl_generator;

use gl_generator::{Api, Fallbacks, Profile, Registry, StructGenerator};
use std::env;
use std::fs::File;
use std::path::Path;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();

    // GL 2.1 core lacks FBOs, PBO target enums, and the float/half-float
    // texture formats the vstore format table needs; pull them in as the
    // extensions that promoted into later core versions, mirroring how
    // the source's `gl21.c` guards the same functionality behind runtime
    // extension-string checks.
    let gl21_ext = [
        "GL_ARB_framebuffer_object",
        "GL_ARB_pixel_buffer_object",
        "GL_ARB_texture_float",
        "GL_ARB_half_float_pixel",
        "GL_ARB_robustness",
        "GL_ARB_seamless_cube_map",
    ];

    let mut gl21 = File::create(&Path::new(&out_dir).join("gl21_bindings.rs")).unwrap();
    Registry::new(Api::Gl, (2, 1), Profile::Compatibility, Fallbacks::All, gl21_ext)
        .write_bindings(StructGenerator, &mut gl21)
        .unwrap();

    let mut gles2 = File::create(&Path::new(&out_dir).join("gles2_bindings.rs")).unwrap();
    Registry::new(Api::Gles2, (2, 0), Profile::Core, Fallbacks::All, ["GL_OES_depth_texture"])
        .write_bindings(StructGenerator, &mut gles2)
        .unwrap();

    let mut gles3 = File::create(&Path::new(&out_dir).join("gles3_bindings.rs")).unwrap();
    Registry::new(Api::Gles2, (3, 0), Profile::Core, Fallbacks::All, [])
        .write_bindings(StructGenerator, &mut gles3)
        .unwrap();
}
