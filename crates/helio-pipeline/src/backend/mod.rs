//! GPU backend abstraction
//!
//! The pipeline core never talks to the device directly. Stages and the
//! effect compiler describe what they need (targets, shader programs) and a
//! [`RenderBackend`] turns those descriptions into real objects.

mod headless;
mod wgpu_backend;

pub use headless::{HeadlessBackend, HeadlessLog};
pub use wgpu_backend::WgpuBackend;

use crate::Result;
use glam::UVec2;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Handle to a render target owned by the backend
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct TargetHandle(pub u64);

/// Handle to a compiled shader program owned by the backend
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct ShaderHandle(pub u64);

/// How a target's size follows the render resolution
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TargetSize {
    /// Internal render resolution
    Render,
    /// Window resolution, used by stages after the upscale
    Native,
    /// Render resolution divided by the given factor (rounded up)
    Divided(u32),
    /// Independent of the window
    Fixed(UVec2),
}

/// Description of a render target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDesc {
    pub label: String,
    pub format: wgpu::TextureFormat,
    pub size: TargetSize,
}

impl TargetDesc {
    pub fn new(label: impl Into<String>, format: wgpu::TextureFormat, size: TargetSize) -> Self {
        Self {
            label: label.into(),
            format,
            size,
        }
    }

    /// Concrete size for the given render and window resolutions
    pub fn resolve_size(&self, render: UVec2, native: UVec2) -> UVec2 {
        let size = match self.size {
            TargetSize::Render => render,
            TargetSize::Native => native,
            TargetSize::Divided(factor) => {
                let factor = factor.max(1);
                UVec2::new(render.x.div_ceil(factor), render.y.div_ceil(factor))
            }
            TargetSize::Fixed(size) => size,
        };
        size.max(UVec2::ONE)
    }
}

/// Shader specialization constant value
#[derive(Clone, Debug, PartialEq)]
pub enum ShaderDefine {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
}

/// Ordered so that identical define sets produce identical source text
pub type ShaderDefines = BTreeMap<String, ShaderDefine>;

/// Everything a backend needs to compile one shader program
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderRequest {
    pub label: String,
    /// Vertex template, `None` for the fullscreen triangle
    pub vertex: Option<String>,
    pub fragment: String,
    pub defines: ShaderDefines,
}

impl ShaderRequest {
    pub fn fullscreen(label: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            vertex: None,
            fragment: fragment.into(),
            defines: ShaderDefines::new(),
        }
    }

    /// WGSL `override` declarations for the defines, prepended to the source
    pub fn override_header(&self) -> String {
        let mut header = String::new();
        for (name, value) in &self.defines {
            // writing into a String cannot fail
            let _ = match value {
                ShaderDefine::Bool(b) => writeln!(header, "override {}: bool = {};", name, b),
                ShaderDefine::I32(i) => writeln!(header, "override {}: i32 = {}i;", name, i),
                ShaderDefine::U32(u) => writeln!(header, "override {}: u32 = {}u;", name, u),
                ShaderDefine::F32(f) => writeln!(header, "override {}: f32 = {:?};", name, f),
            };
        }
        header
    }
}

/// Capabilities probed once at startup
#[derive(Debug, Clone, Copy)]
pub struct BackendCapabilities {
    pub compute_shaders: bool,
}

/// Per-frame globals written once per tick
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub frame: u32,
    pub delta_time: f32,
    pub time: f32,
    pub _pad: f32,
    pub resolution: [f32; 2],
    pub native_resolution: [f32; 2],
}

/// What the engine should submit this frame
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub frame: u64,
    /// Stage names in execution order
    pub stages: Vec<String>,
    pub paused: bool,
}

/// Device-side services used by the pipeline core
pub trait RenderBackend: Send {
    /// Capabilities of the underlying device
    fn capabilities(&self) -> BackendCapabilities;

    /// Allocate a render target at a concrete size
    fn create_target(&mut self, desc: &TargetDesc, size: UVec2) -> Result<TargetHandle>;

    /// Free a target previously returned by `create_target`
    fn release_target(&mut self, handle: TargetHandle);

    /// Compile a shader program
    fn create_shader(&mut self, request: &ShaderRequest) -> Result<ShaderHandle>;

    /// Free a program previously returned by `create_shader`
    fn release_shader(&mut self, handle: ShaderHandle);

    /// Upload the per-frame globals
    fn write_frame_uniforms(&mut self, uniforms: &FrameUniforms);

    /// Copy one target into another of the same format and size
    fn copy_target(&mut self, src: TargetHandle, dst: TargetHandle);

    /// Hand the frame to the engine for GPU submission
    fn submit_frame(&mut self, packet: &FramePacket);

    /// Drop any backend-side render-state dedup caches
    fn clear_state_cache(&mut self) {}
}
