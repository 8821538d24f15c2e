//! Draw / pipeline state — §4.5.
//!
//! Grounded on `agp_pipeline_hint`, `agp_blendstate`'s factor table (the
//! blend branch inside `agp_activate_rendertarget`), `agp_stencil_*`,
//! `agp_draw_vobj`/`agp_draw_colorobj` (`draw_quad` here),
//! `agp_submit_mesh`, and `agp_activate_vstore_multi` in `glshared.c`.
//! The redundant-state-change avoidance those C functions do ad hoc
//! through `model_flags`/`last_store_mode` is folded into a proper
//! `DrawState` cache, the way the teacher's `command::state::StateCache`
//! (`render-gl/src/command/state.rs`) tracks cull/depth/stencil/program
//! state to skip redundant GL calls.

use crate::context::{Context, VstoreId};
use crate::fenv::raw;
use crate::shader::{EnvUniform, UniformType};

/// §4.5 "Pipeline hint(2D/3D)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Mode2D,
    Mode3D,
}

/// §4.5 blend state enum. `Normal`'s alpha factor pair is supplied by the
/// active rendertarget's `RetainAlpha` flag rather than baked in here,
/// matching `agp_activate_rendertarget`'s branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendState {
    None,
    Normal,
    Force,
    Multiply,
    Premultiplied,
    Add,
    Sub,
}

pub struct BlendFactors {
    pub equation: u32,
    pub src_rgb: u32,
    pub dst_rgb: u32,
    pub src_a: u32,
    pub dst_a: u32,
}

impl BlendState {
    pub fn factors(self, retain_alpha: bool) -> Option<BlendFactors> {
        let alpha_dst = if retain_alpha { raw::ONE } else { raw::ONE_MINUS_SRC_ALPHA };
        match self {
            BlendState::None => None,
            BlendState::Normal => Some(BlendFactors {
                equation: raw::FUNC_ADD,
                src_rgb: raw::SRC_ALPHA,
                dst_rgb: raw::ONE_MINUS_SRC_ALPHA,
                src_a: raw::ONE,
                dst_a: alpha_dst,
            }),
            BlendState::Force => Some(BlendFactors {
                equation: raw::FUNC_ADD,
                src_rgb: raw::ONE,
                dst_rgb: raw::ONE_MINUS_SRC_ALPHA,
                src_a: raw::ONE,
                dst_a: alpha_dst,
            }),
            BlendState::Multiply => Some(BlendFactors {
                equation: raw::FUNC_ADD,
                src_rgb: raw::DST_COLOR,
                dst_rgb: raw::ZERO,
                src_a: raw::DST_ALPHA,
                dst_a: raw::ZERO,
            }),
            BlendState::Premultiplied => Some(BlendFactors {
                equation: raw::FUNC_ADD,
                src_rgb: raw::ONE,
                dst_rgb: raw::ONE_MINUS_SRC_ALPHA,
                src_a: raw::ONE,
                dst_a: alpha_dst,
            }),
            BlendState::Add => Some(BlendFactors {
                equation: raw::FUNC_ADD,
                src_rgb: raw::SRC_ALPHA,
                dst_rgb: raw::ONE,
                src_a: raw::ONE,
                dst_a: raw::ONE,
            }),
            BlendState::Sub => Some(BlendFactors {
                equation: raw::FUNC_REVERSE_SUBTRACT,
                src_rgb: raw::SRC_ALPHA,
                dst_rgb: raw::ONE,
                src_a: raw::ONE,
                dst_a: raw::ONE,
            }),
        }
    }
}

/// §4.5 stencil gate states; `Off` is the steady state between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StencilGateState {
    Off,
    Prepared,
    Active,
}

bitflags::bitflags! {
    /// Culling / depth policy flags from §4.5's `submit_mesh`.
    pub struct MeshFlags: u8 {
        const FACING_BOTH    = 0b0000_0001;
        const FACING_FRONT   = 0b0000_0010;
        const FACING_BACK    = 0b0000_0100;
        const FACING_NODEPTH = 0b0000_1000;
        const FILL_LINE      = 0b0001_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFunc {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    Always,
    Never,
}

impl DepthFunc {
    fn to_gl(self) -> u32 {
        match self {
            DepthFunc::Less => raw::LESS,
            DepthFunc::LessEqual => raw::LEQUAL,
            DepthFunc::Greater => raw::GREATER,
            DepthFunc::GreaterEqual => raw::GEQUAL,
            DepthFunc::Equal => raw::EQUAL,
            DepthFunc::NotEqual => raw::NOTEQUAL,
            DepthFunc::Always => raw::ALWAYS,
            DepthFunc::Never => raw::NEVER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshTopology {
    TriSoup,
    PointCloud,
}

/// A CPU-side description of one drawable mesh's attribute buffers.
///
/// Grounded on the vertex-attribute array dispatch in `agp_submit_mesh`;
/// buffer ownership (upload, lifetime) is left to the caller the way the
/// source leaves `vertices`/`normals`/... as plain pointers inside
/// `struct agp_mesh_store` — this crate only resolves attribute
/// locations and issues the draw call.
pub struct Mesh<'a> {
    pub n_vertices: u32,
    pub vertex: Option<&'a [f32]>,
    pub normal: Option<&'a [f32]>,
    pub color: Option<&'a [f32]>,
    pub texcoord: Option<&'a [f32]>,
    pub texcoord1: Option<&'a [f32]>,
    pub tangent: Option<&'a [f32]>,
    pub bitangent: Option<&'a [f32]>,
    pub joints: Option<&'a [f32]>,
    pub weights: Option<&'a [f32]>,
    pub indices: Option<&'a [u32]>,
    pub topology: MeshTopology,
    pub depth_func: DepthFunc,
    index_validated: std::cell::Cell<bool>,
}

impl<'a> Mesh<'a> {
    pub fn new(n_vertices: u32, topology: MeshTopology) -> Mesh<'a> {
        Mesh {
            n_vertices,
            vertex: None,
            normal: None,
            color: None,
            texcoord: None,
            texcoord1: None,
            tangent: None,
            bitangent: None,
            joints: None,
            weights: None,
            indices: None,
            topology,
            depth_func: DepthFunc::LessEqual,
            index_validated: std::cell::Cell::new(false),
        }
    }

    /// §4.5: "Validate indices once ... and cache that validation."
    fn validate_indices(&self) -> bool {
        if self.index_validated.get() {
            return true;
        }
        let ok = match self.indices {
            None => true,
            Some(ix) => ix.iter().all(|&i| i < self.n_vertices),
        };
        if ok {
            self.index_validated.set(true);
        }
        ok
    }
}

pub struct DrawState {
    pub mode: PipelineMode,
    stencil: StencilGateState,
    last_blend: Option<(BlendState, bool)>,
}

impl Default for DrawState {
    fn default() -> DrawState {
        DrawState {
            mode: PipelineMode::Mode3D,
            stencil: StencilGateState::Off,
            last_blend: None,
        }
    }
}

impl Context {
    /// §4.5 "Pipeline hint". No-op if already in the target mode.
    pub fn pipeline_hint(&mut self, mode: PipelineMode) {
        if self.draw.mode == mode {
            return;
        }
        unsafe {
            let gl = &self.fenv.gl;
            match mode {
                PipelineMode::Mode2D => {
                    gl.Disable(raw::CULL_FACE);
                    gl.Disable(raw::DEPTH_TEST);
                    gl.DepthMask(raw::FALSE);
                }
                PipelineMode::Mode3D => {
                    gl.Enable(raw::DEPTH_TEST);
                    gl.DepthMask(raw::TRUE);
                    gl.Clear(raw::DEPTH_BUFFER_BIT);
                    self.fenv.model_flags = crate::fenv::ModelFlags::default();
                }
            }
        }
        self.draw.mode = mode;
    }

    /// Applies `state`'s factors (or disables blending for `None`),
    /// skipping the GL calls if unchanged from the last application —
    /// the `DrawState` analogue of the source's `model_flags` check.
    pub fn apply_blend(&mut self, state: BlendState, retain_alpha: bool) {
        if self.draw.last_blend == Some((state, retain_alpha)) {
            return;
        }
        let gl = &self.fenv.gl;
        match state.factors(retain_alpha) {
            None => unsafe { gl.Disable(raw::BLEND) },
            Some(f) => unsafe {
                gl.Enable(raw::BLEND);
                gl.BlendEquation(f.equation);
                gl.BlendFuncSeparate(f.src_rgb, f.dst_rgb, f.src_a, f.dst_a);
            },
        }
        self.draw.last_blend = Some((state, retain_alpha));
    }

    /// Stencil gate prepare: clear stencil, turn color writes off, and
    /// arm `ALWAYS -> REPLACE(1)` so the following draw stamps the mask.
    pub fn stencil_prepare(&mut self) {
        unsafe {
            let gl = &self.fenv.gl;
            gl.Enable(raw::STENCIL_TEST);
            gl.ClearStencil(0);
            gl.Clear(raw::STENCIL_BUFFER_BIT);
            gl.ColorMask(raw::FALSE, raw::FALSE, raw::FALSE, raw::FALSE);
            gl.StencilFunc(raw::ALWAYS, 1, 0xff);
            gl.StencilOp(raw::KEEP, raw::KEEP, raw::REPLACE);
        }
        self.draw.stencil = StencilGateState::Prepared;
    }

    /// Stencil gate activate: color writes back on, gate subsequent draws
    /// to the stamped region (`EQUAL 1`, `KEEP` on all paths).
    pub fn stencil_activate(&mut self) {
        unsafe {
            let gl = &self.fenv.gl;
            gl.ColorMask(raw::TRUE, raw::TRUE, raw::TRUE, raw::TRUE);
            gl.StencilFunc(raw::EQUAL, 1, 0xff);
            gl.StencilOp(raw::KEEP, raw::KEEP, raw::KEEP);
        }
        self.draw.stencil = StencilGateState::Active;
    }

    pub fn stencil_disable(&mut self) {
        unsafe { self.fenv.gl.Disable(raw::STENCIL_TEST) };
        self.draw.stencil = StencilGateState::Off;
    }

    /// §4.5 `draw_quad`: builds 4 verts from the rect, pushes `model`
    /// (identity if `None`) into `modelview`, binds `vertex`/`texcoord`
    /// at their resolved attribute locations, draws a triangle fan, and
    /// marks the active rendertarget's full rect dirty.
    pub fn draw_quad(
        &mut self,
        id: crate::shader::ShaderId,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        txcos: [f32; 8],
        model: Option<[f32; 16]>,
    ) {
        const IDENTITY: [f32; 16] = [
            1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ];
        let verts: [f32; 8] = [x1, y1, x2, y1, x2, y2, x1, y2];

        let m = model.unwrap_or(IDENTITY);
        self.envv(EnvUniform::Modelview, bytes_of(&m));
        let _ = self.shaders.activate(&self.fenv, id, &self.env);

        let vertex_loc = self.shaders.attribute_loc(id, crate::shader::VertexAttribute::Vertex);
        let texcoord_loc = self.shaders.attribute_loc(id, crate::shader::VertexAttribute::Texcoord);

        unsafe {
            let gl = &self.fenv.gl;
            if let Some(loc) = vertex_loc.filter(|&l| l >= 0) {
                gl.EnableVertexAttribArray(loc as u32);
                gl.VertexAttribPointer(loc as u32, 2, raw::FLOAT, raw::FALSE, 0, verts.as_ptr() as *const _);
            }
            if let Some(loc) = texcoord_loc.filter(|&l| l >= 0) {
                gl.EnableVertexAttribArray(loc as u32);
                gl.VertexAttribPointer(loc as u32, 2, raw::FLOAT, raw::FALSE, 0, txcos.as_ptr() as *const _);
            }
            gl.DrawArrays(raw::TRIANGLE_FAN, 0, 4);
            if let Some(loc) = vertex_loc.filter(|&l| l >= 0) {
                gl.DisableVertexAttribArray(loc as u32);
            }
            if let Some(loc) = texcoord_loc.filter(|&l| l >= 0) {
                gl.DisableVertexAttribArray(loc as u32);
            }
        }

        if let Some(rt) = self.active_rendertarget {
            self.dirty(rt, Some(crate::rendertarget::Region::full()));
        }
    }

    /// §4.5 `submit mesh`: attaches each present attribute stream at its
    /// resolved location, derives cull/depth policy from `flags` and
    /// `mesh.depth_func`, and issues an indexed or non-indexed draw (or a
    /// point-cloud draw bracketed by `VERTEX_PROGRAM_POINT_SIZE`).
    pub fn submit_mesh(&mut self, id: crate::shader::ShaderId, mesh: &Mesh, flags: MeshFlags) {
        if !mesh.validate_indices() {
            log::warn!("submit_mesh: index out of range, skipping draw");
            return;
        }

        let wireframe = flags.contains(MeshFlags::FILL_LINE);
        let depth_enabled = !flags.contains(MeshFlags::FACING_NODEPTH);

        unsafe {
            let gl = &self.fenv.gl;
            if depth_enabled {
                gl.Enable(raw::DEPTH_TEST);
                gl.DepthFunc(mesh.depth_func.to_gl());
            } else {
                gl.Disable(raw::DEPTH_TEST);
            }

            if flags.contains(MeshFlags::FACING_BOTH) {
                gl.Disable(raw::CULL_FACE);
            } else {
                gl.Enable(raw::CULL_FACE);
                gl.CullFace(if flags.contains(MeshFlags::FACING_BACK) {
                    raw::FRONT
                } else {
                    raw::BACK
                });
            }

            // Wireframe-with-culling uses a depth-only prepass so the
            // line draw doesn't self-occlude against its own backfaces.
            if wireframe && !flags.contains(MeshFlags::FACING_BOTH) {
                gl.ColorMask(raw::FALSE, raw::FALSE, raw::FALSE, raw::FALSE);
                self.issue_mesh_draw(id, mesh, raw::FILL);
                gl.ColorMask(raw::TRUE, raw::TRUE, raw::TRUE, raw::TRUE);
                self.issue_mesh_draw(id, mesh, raw::LINE);
            } else {
                self.issue_mesh_draw(id, mesh, if wireframe { raw::LINE } else { raw::FILL });
            }
        }
    }

    fn issue_mesh_draw(&self, id: crate::shader::ShaderId, mesh: &Mesh, polygon_mode: u32) {
        use crate::shader::VertexAttribute::*;
        let gl = &self.fenv.gl;
        unsafe {
            gl.PolygonMode(raw::FRONT_AND_BACK, polygon_mode);
        }

        let streams: [(crate::shader::VertexAttribute, Option<&[f32]>, i32); 9] = [
            (Vertex, mesh.vertex, 3),
            (Normal, mesh.normal, 3),
            (Color, mesh.color, 4),
            (Texcoord, mesh.texcoord, 2),
            (Texcoord1, mesh.texcoord1, 2),
            (Tangent, mesh.tangent, 3),
            (Bitangent, mesh.bitangent, 3),
            (Joints, mesh.joints, 4),
            (Weights, mesh.weights, 4),
        ];

        let mut enabled = smallvec::SmallVec::<[u32; 9]>::new();
        for (attr, data, width) in streams.iter() {
            if let (Some(loc), Some(data)) = (self.shaders.attribute_loc(id, *attr), data) {
                if loc >= 0 {
                    unsafe {
                        gl.EnableVertexAttribArray(loc as u32);
                        gl.VertexAttribPointer(
                            loc as u32,
                            *width,
                            raw::FLOAT,
                            raw::FALSE,
                            0,
                            data.as_ptr() as *const _,
                        );
                    }
                    enabled.push(loc as u32);
                }
            }
        }

        match mesh.topology {
            MeshTopology::PointCloud => unsafe {
                gl.Enable(raw::VERTEX_PROGRAM_POINT_SIZE);
                gl.DrawArrays(raw::POINTS, 0, mesh.n_vertices as i32);
                gl.Disable(raw::VERTEX_PROGRAM_POINT_SIZE);
            },
            MeshTopology::TriSoup => match mesh.indices {
                Some(ix) => unsafe {
                    gl.DrawElements(
                        raw::TRIANGLES,
                        ix.len() as i32,
                        raw::UNSIGNED_INT,
                        ix.as_ptr() as *const _,
                    );
                },
                None => unsafe {
                    gl.DrawArrays(raw::TRIANGLES, 0, mesh.n_vertices as i32);
                },
            },
        }

        for loc in enabled {
            unsafe { gl.DisableVertexAttribArray(loc) };
        }
    }

    /// §4.5 multi-texture activate: binds each store to texture unit
    /// `i` and pushes `map_tu00..99 = i`, up to 99 stores, against
    /// whichever shader is currently active.
    pub fn activate_multi(&mut self, _id: crate::shader::ShaderId, stores: &[VstoreId]) {
        for (i, &store) in stores.iter().enumerate().take(99) {
            let unit = i as u32;
            self.vstore_activate_unit(store, unit);
            let name = format!("map_tu{:02}", i);
            let _ = self.shaders.force_unif(
                &self.fenv,
                &name,
                UniformType::Int,
                &(i as i32).to_ne_bytes(),
            );
        }
    }
}

fn bytes_of(m: &[f32; 16]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(m.as_ptr() as *const u8, 64) }
}
