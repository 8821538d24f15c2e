//! Shader Manager — slotted program table, environment uniforms, groups.
//!
//! Grounded on `src/platform/agp/shdrmgmt.c`: `shader_envts`, `ofstbl` /
//! `typetbl` / `symtbl` / `attrsymtbl`, `shader_cont`, `shaderv`,
//! `shdr_global`, `agp_shader_build`, `agp_shader_destroy`,
//! `agp_shader_activate`, `agp_shader_envv`, `agp_shader_addgroup`,
//! `agp_shader_forceunif`, `agp_shader_flush`, `agp_shader_rebuild_all`.
//!
//! The source's per-group uniform chain is a singly linked list of
//! `shaderv` nodes; here it is a `SmallVec` of small records per §9's
//! redesign note, with a precomputed `fxhash` of the label to speed up
//! the lookup that in C is a linear `strcmp` walk.

use crate::config::{ENV_UNIFORM_COUNT, MAX_UNIFORM_GROUPS, SHADER_SLOT_COUNT, UNIFORM_PAYLOAD_BYTES, VERTEX_ATTRIBUTE_COUNT};
use crate::error::AgpError;
use crate::fenv::{raw, Fenv};
use crate::shaders;
use smallvec::SmallVec;
use std::ffi::CString;

/// Sentinel returned by `build` on failure and by any operation handed a
/// dead id; mirrors `BROKEN_SHADER` in the source.
pub const BROKEN_SHADER: ShaderId = ShaderId(u32::MAX);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(u32);

impl ShaderId {
    fn pack(slot: u16, group: u16) -> ShaderId {
        ShaderId((u32::from(slot) << 16) | u32::from(group))
    }

    fn slot(self) -> u16 {
        (self.0 >> 16) as u16
    }

    fn group(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn is_broken(self) -> bool {
        self == BROKEN_SHADER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum EnvUniform {
    Modelview = 0,
    Projection = 1,
    Texturem = 2,
    ObjOpacity = 3,
    TransBlend = 4,
    TransMove = 5,
    TransScale = 6,
    TransRotate = 7,
    ObjInputSz = 8,
    ObjOutputSz = 9,
    ObjStorageSz = 10,
    RtgtId = 11,
    FractTimestamp = 12,
    Timestamp = 13,
}

pub const ENV_UNIFORM_ORDER: [EnvUniform; ENV_UNIFORM_COUNT] = [
    EnvUniform::Modelview,
    EnvUniform::Projection,
    EnvUniform::Texturem,
    EnvUniform::ObjOpacity,
    EnvUniform::TransBlend,
    EnvUniform::TransMove,
    EnvUniform::TransScale,
    EnvUniform::TransRotate,
    EnvUniform::ObjInputSz,
    EnvUniform::ObjOutputSz,
    EnvUniform::ObjStorageSz,
    EnvUniform::RtgtId,
    EnvUniform::FractTimestamp,
    EnvUniform::Timestamp,
];

impl EnvUniform {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvUniform::Modelview => "modelview",
            EnvUniform::Projection => "projection",
            EnvUniform::Texturem => "texturem",
            EnvUniform::ObjOpacity => "obj_opacity",
            EnvUniform::TransBlend => "trans_blend",
            EnvUniform::TransMove => "trans_move",
            EnvUniform::TransScale => "trans_scale",
            EnvUniform::TransRotate => "trans_rotate",
            EnvUniform::ObjInputSz => "obj_input_sz",
            EnvUniform::ObjOutputSz => "obj_output_sz",
            EnvUniform::ObjStorageSz => "obj_storage_sz",
            EnvUniform::RtgtId => "rtgt_id",
            EnvUniform::FractTimestamp => "fract_timestamp",
            EnvUniform::Timestamp => "timestamp",
        }
    }

    pub fn ty(self) -> UniformType {
        match self {
            EnvUniform::Modelview | EnvUniform::Projection | EnvUniform::Texturem => {
                UniformType::Mat4x4
            }
            EnvUniform::ObjInputSz | EnvUniform::ObjOutputSz | EnvUniform::ObjStorageSz => {
                UniformType::Vec2
            }
            EnvUniform::RtgtId | EnvUniform::Timestamp => UniformType::Int,
            _ => UniformType::Float,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexAttribute {
    Vertex,
    Normal,
    Color,
    Texcoord,
    Texcoord1,
    Tangent,
    Bitangent,
    Joints,
    Weights,
}

pub const VERTEX_ATTRIBUTE_ORDER: [VertexAttribute; VERTEX_ATTRIBUTE_COUNT] = [
    VertexAttribute::Vertex,
    VertexAttribute::Normal,
    VertexAttribute::Color,
    VertexAttribute::Texcoord,
    VertexAttribute::Texcoord1,
    VertexAttribute::Tangent,
    VertexAttribute::Bitangent,
    VertexAttribute::Joints,
    VertexAttribute::Weights,
];

impl VertexAttribute {
    pub fn as_str(self) -> &'static str {
        match self {
            VertexAttribute::Vertex => "vertex",
            VertexAttribute::Normal => "normal",
            VertexAttribute::Color => "color",
            VertexAttribute::Texcoord => "texcoord",
            VertexAttribute::Texcoord1 => "texcoord1",
            VertexAttribute::Tangent => "tangent",
            VertexAttribute::Bitangent => "bitangent",
            VertexAttribute::Joints => "joints",
            VertexAttribute::Weights => "weights",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4x4,
}

impl UniformType {
    pub fn payload_size(self) -> usize {
        match self {
            UniformType::Bool | UniformType::Int => 4,
            UniformType::Float => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            UniformType::Mat4x4 => 64,
        }
    }
}

/// One persisted per-object uniform inside a group's chain.
#[derive(Clone)]
pub struct UniformEntry {
    pub label: String,
    label_hash: u64,
    pub location: i32,
    pub ty: UniformType,
    pub payload: [u8; UNIFORM_PAYLOAD_BYTES],
}

impl UniformEntry {
    fn new(label: &str, location: i32, ty: UniformType) -> UniformEntry {
        UniformEntry {
            label: label.to_owned(),
            label_hash: fxhash::hash64(label.as_bytes()),
            location,
            ty,
            payload: [0u8; UNIFORM_PAYLOAD_BYTES],
        }
    }
}

type UniformGroup = SmallVec<[UniformEntry; 4]>;

bitflags::bitflags! {
    /// Which stages were filled in from the default shader source
    /// (`shmask` in the source); bit 0 = vertex, bit 1 = fragment.
    pub struct ShaderMask: u8 {
        const VERTEX_DEFAULT = 0b01;
        const FRAGMENT_DEFAULT = 0b10;
    }
}

struct ShaderSlot {
    label: String,
    vertex_source: String,
    fragment_source: String,
    program: u32,
    vertex_obj: u32,
    fragment_obj: u32,
    shmask: ShaderMask,
    locations: [i32; ENV_UNIFORM_COUNT],
    attributes: [i32; VERTEX_ATTRIBUTE_COUNT],
    groups: Vec<Option<UniformGroup>>,
}

pub struct ShaderManager {
    slots: Vec<Option<ShaderSlot>>,
    active_slot: Option<u16>,
    active_group: u16,
}

impl ShaderManager {
    /// Pre-registers the three default shaders (BASIC_2D, COLOR_2D,
    /// BASIC_3D) at slots 0-2, group 0, mirroring `shdr_global`'s
    /// bootstrap and the `agp_shader_destroy` guard that refuses to drop
    /// them.
    pub fn new(gl: &Fenv) -> ShaderManager {
        let mut mgr = ShaderManager {
            slots: (0..SHADER_SLOT_COUNT).map(|_| None).collect(),
            active_slot: None,
            active_group: 0,
        };
        let basic2d = mgr.build(
            gl,
            "BASIC_2D",
            Some(shaders::BASIC_2D_VERT),
            Some(shaders::BASIC_2D_FRAG),
        );
        let color2d = mgr.build(
            gl,
            "COLOR_2D",
            Some(shaders::COLOR_2D_VERT),
            Some(shaders::COLOR_2D_FRAG),
        );
        let basic3d = mgr.build(
            gl,
            "BASIC_3D",
            Some(shaders::BASIC_3D_VERT),
            Some(shaders::BASIC_3D_FRAG),
        );
        debug_assert_eq!(basic2d.slot(), 0);
        debug_assert_eq!(color2d.slot(), 1);
        debug_assert_eq!(basic3d.slot(), 2);
        mgr
    }

    fn find_slot_by_label(&self, label: &str) -> Option<u16> {
        self.slots.iter().position(|s| match s {
            Some(s) => s.label == label,
            None => false,
        }).map(|i| i as u16)
    }

    /// Compiles and links `vert`/`frag` (substituting the default 2D
    /// source for whichever is `None`, setting the matching `shmask`
    /// bit), resolves every env-uniform and attribute location, and
    /// allocates the default uniform group. Reuses the prior slot if
    /// `label` already exists. Returns `BROKEN_SHADER` on compile/link
    /// failure. Mirrors `agp_shader_build`.
    pub fn build(
        &mut self,
        gl: &Fenv,
        label: &str,
        vert: Option<&str>,
        frag: Option<&str>,
    ) -> ShaderId {
        let mut shmask = ShaderMask::empty();
        let vert_src = vert.unwrap_or_else(|| {
            shmask.insert(ShaderMask::VERTEX_DEFAULT);
            shaders::BASIC_2D_VERT
        });
        let frag_src = frag.unwrap_or_else(|| {
            shmask.insert(ShaderMask::FRAGMENT_DEFAULT);
            shaders::BASIC_2D_FRAG
        });

        let slot_ix = self.find_slot_by_label(label).unwrap_or_else(|| {
            self.slots
                .iter()
                .position(|s| s.is_none())
                .expect("shader slot table exhausted") as u16
        });

        if self.slots[slot_ix as usize].is_some() {
            self.destroy_program(gl, slot_ix);
        }

        let active_before = self.active_slot;

        let built = build_program(gl, vert_src, frag_src);
        let (program, vertex_obj, fragment_obj) = match built {
            Ok(v) => v,
            Err(e) => {
                log::error!("shader '{}' failed to build: {}", label, e);
                return BROKEN_SHADER;
            }
        };

        let mut locations = [-1i32; ENV_UNIFORM_COUNT];
        for u in ENV_UNIFORM_ORDER.iter() {
            locations[*u as usize] = get_uniform_loc(gl, program, u.as_str());
        }
        let mut attributes = [-1i32; VERTEX_ATTRIBUTE_COUNT];
        for (i, a) in VERTEX_ATTRIBUTE_ORDER.iter().enumerate() {
            attributes[i] = get_attr_loc(gl, program, a.as_str());
        }

        unsafe {
            gl.gl.UseProgram(program);
            for name in &["map_tu0", "map_diffuse"] {
                let loc = get_uniform_loc(gl, program, name);
                if loc >= 0 {
                    gl.gl.Uniform1i(loc, 0);
                }
            }
            if let Some(prev) = active_before {
                if let Some(slot) = &self.slots[prev as usize] {
                    gl.gl.UseProgram(slot.program);
                }
            } else {
                gl.gl.UseProgram(0);
            }
        }

        self.slots[slot_ix as usize] = Some(ShaderSlot {
            label: label.to_owned(),
            vertex_source: vert_src.to_owned(),
            fragment_source: frag_src.to_owned(),
            program,
            vertex_obj,
            fragment_obj,
            shmask,
            locations,
            attributes,
            groups: vec![Some(SmallVec::new())],
        });

        ShaderId::pack(slot_ix, 0)
    }

    fn destroy_program(&mut self, gl: &Fenv, slot_ix: u16) {
        if let Some(slot) = self.slots[slot_ix as usize].take() {
            unsafe {
                gl.gl.DeleteProgram(slot.program);
                gl.gl.DeleteShader(slot.vertex_obj);
                gl.gl.DeleteShader(slot.fragment_obj);
            }
            if self.active_slot == Some(slot_ix) {
                self.active_slot = None;
            }
        }
    }

    /// Group 0: drops the whole program (refusing slots 0-2, the three
    /// defaults). Group > 0: drops only that group's uniform chain.
    pub fn destroy(&mut self, gl: &Fenv, id: ShaderId) -> Result<(), AgpError> {
        let slot_ix = id.slot();
        if id.group() == 0 {
            if slot_ix < 3 {
                return Err(AgpError::DefaultShaderProtected {
                    slot: u32::from(slot_ix),
                });
            }
            self.destroy_program(gl, slot_ix);
        } else if let Some(slot) = self.slots.get_mut(slot_ix as usize).and_then(|s| s.as_mut()) {
            if let Some(g) = slot.groups.get_mut(id.group() as usize) {
                *g = None;
            }
        }
        Ok(())
    }

    /// Switches the active GL program only if the slot index changed,
    /// re-pushes every env uniform from `env` into the new program's
    /// resolved locations, then replays the group's persisted uniforms.
    /// Mirrors `agp_shader_activate`.
    pub fn activate(
        &mut self,
        gl: &Fenv,
        id: ShaderId,
        env: &EnvUniformTable,
    ) -> Result<(), AgpError> {
        let slot_ix = id.slot();
        let slot = self
            .slots
            .get(slot_ix as usize)
            .and_then(|s| s.as_ref())
            .ok_or(AgpError::BadObject {
                kind: "shader",
                id: id.0,
            })?;

        if self.active_slot != Some(slot_ix) {
            unsafe { gl.gl.UseProgram(slot.program) };
            self.active_slot = Some(slot_ix);
        }
        self.active_group = id.group();

        for u in ENV_UNIFORM_ORDER.iter() {
            let loc = slot.locations[*u as usize];
            if loc >= 0 {
                push_uniform(gl, loc, u.ty(), &env.values[*u as usize]);
            }
        }

        if let Some(Some(group)) = slot.groups.get(id.group() as usize) {
            for entry in group.iter() {
                if entry.location >= 0 {
                    push_uniform(gl, entry.location, entry.ty, &entry.payload);
                }
            }
        }
        Ok(())
    }

    /// Finds a hole in the slot's group array (growing it if full),
    /// deep-copies every uniform from `id`'s group into the new one.
    /// Mirrors `agp_shader_addgroup`.
    pub fn add_group(&mut self, id: ShaderId) -> Result<ShaderId, AgpError> {
        let slot_ix = id.slot();
        let slot = self
            .slots
            .get_mut(slot_ix as usize)
            .and_then(|s| s.as_mut())
            .ok_or(AgpError::BadObject {
                kind: "shader",
                id: id.0,
            })?;

        if slot.groups.len() as u32 >= MAX_UNIFORM_GROUPS {
            return Err(AgpError::GroupTableFull {
                limit: MAX_UNIFORM_GROUPS,
            });
        }

        let source = slot
            .groups
            .get(id.group() as usize)
            .and_then(|g| g.clone())
            .unwrap_or_default();

        let new_ix = slot.groups.iter().position(|g| g.is_none());
        let new_ix = match new_ix {
            Some(ix) => {
                slot.groups[ix] = Some(source);
                ix
            }
            None => {
                slot.groups.push(Some(source));
                slot.groups.len() - 1
            }
        };

        Ok(ShaderId::pack(slot_ix, new_ix as u16))
    }

    /// Looks up a uniform by label within the active group's chain,
    /// allocating a new entry if absent, then pushes the value
    /// immediately. A type mismatch against an existing entry only
    /// warns; the stored type is kept. Mirrors `agp_shader_forceunif`.
    pub fn force_unif(
        &mut self,
        gl: &Fenv,
        label: &str,
        ty: UniformType,
        value: &[u8],
    ) -> Result<(), AgpError> {
        let slot_ix = self.active_slot.ok_or(AgpError::BadObject {
            kind: "shader",
            id: BROKEN_SHADER.0,
        })?;
        let group_ix = self.active_group;
        let slot = self.slots[slot_ix as usize].as_mut().unwrap();
        let group = slot.groups[group_ix as usize]
            .get_or_insert_with(SmallVec::new);

        let hash = fxhash::hash64(label.as_bytes());
        let existing = group
            .iter_mut()
            .find(|e| e.label_hash == hash && e.label == label);

        let entry = match existing {
            Some(e) => {
                if e.ty != ty {
                    log::warn!(
                        "forceunif: type mismatch for '{}', keeping existing type",
                        label
                    );
                }
                e
            }
            None => {
                let loc = get_uniform_loc(gl, slot.program, label);
                group.push(UniformEntry::new(label, loc, ty));
                group.last_mut().unwrap()
            }
        };

        let n = value.len().min(UNIFORM_PAYLOAD_BYTES);
        entry.payload[..n].copy_from_slice(&value[..n]);

        if entry.location >= 0 {
            push_uniform(gl, entry.location, entry.ty, &entry.payload);
        }
        Ok(())
    }

    /// Pushes `value` straight into the active program's resolved
    /// location for `slot`, if any program is active. Used by
    /// `Context::envv` alongside writing the process-wide cache, so an
    /// `envv` call between `activate` calls is visible immediately
    /// (property 7) rather than only on the next `activate`.
    pub(crate) fn push_env_immediate(&self, gl: &Fenv, slot: EnvUniform, value: &[u8]) {
        if let Some(ix) = self.active_slot {
            if let Some(s) = self.slots[ix as usize].as_ref() {
                let loc = s.locations[slot as usize];
                if loc >= 0 {
                    push_uniform(gl, loc, slot.ty(), value);
                }
            }
        }
    }

    pub fn lookup(&self, label: &str) -> Option<ShaderId> {
        self.find_slot_by_label(label).map(|ix| ShaderId::pack(ix, 0))
    }

    pub fn lookup_tag(&self, id: ShaderId) -> Option<&str> {
        self.slots
            .get(id.slot() as usize)
            .and_then(|s| s.as_ref())
            .map(|s| s.label.as_str())
    }

    pub fn lookup_progs(&self, id: ShaderId) -> Option<(&str, &str)> {
        self.slots
            .get(id.slot() as usize)
            .and_then(|s| s.as_ref())
            .map(|s| (s.vertex_source.as_str(), s.fragment_source.as_str()))
    }

    pub fn valid(&self, id: ShaderId) -> bool {
        if id.is_broken() {
            return false;
        }
        self.slots
            .get(id.slot() as usize)
            .and_then(|s| s.as_ref())
            .map_or(false, |s| s.groups.get(id.group() as usize).map_or(false, Option::is_some))
    }

    pub fn attribute_loc(&self, id: ShaderId, attr: VertexAttribute) -> Option<i32> {
        self.slots
            .get(id.slot() as usize)
            .and_then(|s| s.as_ref())
            .map(|s| s.attributes[VERTEX_ATTRIBUTE_ORDER.iter().position(|a| *a == attr).unwrap()])
    }

    /// Destroys every slot and resets state. Mirrors `agp_shader_flush`.
    pub fn flush(&mut self, gl: &Fenv) {
        for ix in 0..self.slots.len() {
            self.destroy_program(gl, ix as u16);
        }
        self.active_slot = None;
        self.active_group = 0;
    }

    /// Rebuilds every non-empty slot's program from its stored source
    /// strings, for context-loss recovery. Mirrors
    /// `agp_shader_rebuild_all`.
    pub fn rebuild_all(&mut self, gl: &Fenv) {
        let labels: Vec<(u16, String, String, String)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(ix, s)| {
                s.as_ref().map(|s| {
                    (
                        ix as u16,
                        s.label.clone(),
                        s.vertex_source.clone(),
                        s.fragment_source.clone(),
                    )
                })
            })
            .collect();

        for (_ix, label, vert, frag) in labels {
            self.build(gl, &label, Some(&vert), Some(&frag));
        }
    }
}

fn push_uniform(gl: &Fenv, location: i32, ty: UniformType, payload: &[u8]) {
    unsafe {
        let g = &gl.gl;
        match ty {
            UniformType::Bool | UniformType::Int => {
                let v = i32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]);
                g.Uniform1i(location, v);
            }
            UniformType::Float => {
                let v = f32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]);
                g.Uniform1f(location, v);
            }
            UniformType::Vec2 => {
                let x = f32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let y = f32::from_ne_bytes([payload[4], payload[5], payload[6], payload[7]]);
                g.Uniform2f(location, x, y);
            }
            UniformType::Vec3 => {
                let mut v = [0f32; 3];
                for i in 0..3 {
                    v[i] = f32::from_ne_bytes([
                        payload[i * 4],
                        payload[i * 4 + 1],
                        payload[i * 4 + 2],
                        payload[i * 4 + 3],
                    ]);
                }
                g.Uniform3f(location, v[0], v[1], v[2]);
            }
            UniformType::Vec4 => {
                let mut v = [0f32; 4];
                for i in 0..4 {
                    v[i] = f32::from_ne_bytes([
                        payload[i * 4],
                        payload[i * 4 + 1],
                        payload[i * 4 + 2],
                        payload[i * 4 + 3],
                    ]);
                }
                g.Uniform4f(location, v[0], v[1], v[2], v[3]);
            }
            UniformType::Mat4x4 => {
                let ptr = payload.as_ptr() as *const f32;
                g.UniformMatrix4fv(location, 1, raw::FALSE, ptr);
            }
        }
    }
}

fn get_uniform_loc(gl: &Fenv, program: u32, name: &str) -> i32 {
    let cname = CString::new(name).unwrap();
    unsafe { gl.gl.GetUniformLocation(program, cname.as_ptr() as *const i8) }
}

fn get_attr_loc(gl: &Fenv, program: u32, name: &str) -> i32 {
    let cname = CString::new(name).unwrap();
    unsafe { gl.gl.GetAttribLocation(program, cname.as_ptr() as *const i8) }
}

fn compile_stage(gl: &Fenv, stage: u32, source: &str, stage_name: &'static str) -> Result<u32, AgpError> {
    unsafe {
        let g = &gl.gl;
        let obj = g.CreateShader(stage);
        let csource = CString::new(source).unwrap();
        let ptr = csource.as_ptr() as *const i8;
        g.ShaderSource(obj, 1, &ptr, std::ptr::null());
        g.CompileShader(obj);

        let mut status = 0;
        g.GetShaderiv(obj, raw::COMPILE_STATUS, &mut status);
        if status == 0 {
            let mut len = 0;
            g.GetShaderiv(obj, raw::INFO_LOG_LENGTH, &mut len);
            let mut buf = vec![0u8; len.max(1) as usize];
            let mut written = 0;
            g.GetShaderInfoLog(obj, len, &mut written, buf.as_mut_ptr() as *mut i8);
            buf.truncate(written.max(0) as usize);
            let log = String::from_utf8_lossy(&buf).into_owned();
            g.DeleteShader(obj);
            return Err(AgpError::ShaderCompile {
                stage: stage_name,
                log,
            });
        }
        Ok(obj)
    }
}

fn build_program(gl: &Fenv, vert_src: &str, frag_src: &str) -> Result<(u32, u32, u32), AgpError> {
    let vertex_obj = compile_stage(gl, raw::VERTEX_SHADER, vert_src, "vertex")?;
    let fragment_obj = match compile_stage(gl, raw::FRAGMENT_SHADER, frag_src, "fragment") {
        Ok(obj) => obj,
        Err(e) => {
            unsafe { gl.gl.DeleteShader(vertex_obj) };
            return Err(e);
        }
    };

    unsafe {
        let g = &gl.gl;
        let program = g.CreateProgram();
        g.AttachShader(program, vertex_obj);
        g.AttachShader(program, fragment_obj);
        g.LinkProgram(program);

        let mut status = 0;
        g.GetProgramiv(program, raw::LINK_STATUS, &mut status);
        if status == 0 {
            let mut len = 0;
            g.GetProgramiv(program, raw::INFO_LOG_LENGTH, &mut len);
            let mut buf = vec![0u8; len.max(1) as usize];
            let mut written = 0;
            g.GetProgramInfoLog(program, len, &mut written, buf.as_mut_ptr() as *mut i8);
            buf.truncate(written.max(0) as usize);
            let log = String::from_utf8_lossy(&buf).into_owned();
            g.DeleteProgram(program);
            g.DeleteShader(vertex_obj);
            g.DeleteShader(fragment_obj);
            return Err(AgpError::ShaderLink { log });
        }
        Ok((program, vertex_obj, fragment_obj))
    }
}

/// Process-wide cache of the last value pushed for each environment
/// uniform. Embedded in `Context` per §9 rather than kept as a static.
pub struct EnvUniformTable {
    values: [[u8; UNIFORM_PAYLOAD_BYTES]; ENV_UNIFORM_COUNT],
}

impl Default for EnvUniformTable {
    fn default() -> EnvUniformTable {
        EnvUniformTable {
            values: [[0u8; UNIFORM_PAYLOAD_BYTES]; ENV_UNIFORM_COUNT],
        }
    }
}

impl EnvUniformTable {
    /// Writes into the cache. Callers push into the active program's
    /// resolved location themselves via `ShaderManager::activate`
    /// replay or an explicit immediate push (see `Context::envv`).
    pub fn set(&mut self, slot: EnvUniform, value: &[u8]) {
        let n = value.len().min(UNIFORM_PAYLOAD_BYTES);
        debug_assert_eq!(n, slot.ty().payload_size().min(UNIFORM_PAYLOAD_BYTES));
        self.values[slot as usize][..n].copy_from_slice(&value[..n]);
    }

    pub fn get(&self, slot: EnvUniform) -> &[u8] {
        &self.values[slot as usize]
    }
}
