//! `wgpu` implementation of [`RenderBackend`]

use super::{
    BackendCapabilities, FramePacket, FrameUniforms, RenderBackend, ShaderHandle, ShaderRequest,
    TargetDesc, TargetHandle,
};
use crate::{Error, Result};
use glam::UVec2;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Vertex stage used by fullscreen stage shaders
const FULLSCREEN_VERTEX: &str = r#"
struct FullscreenOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> FullscreenOut {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: FullscreenOut;
    out.position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}
"#;

struct GpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: UVec2,
}

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    shader_root: PathBuf,
    capabilities: BackendCapabilities,
    frame_buffer: wgpu::Buffer,
    targets: HashMap<TargetHandle, GpuTarget>,
    shaders: HashMap<ShaderHandle, wgpu::ShaderModule>,
    last_frame: Option<FramePacket>,
    next_id: u64,
}

impl WgpuBackend {
    pub fn new(
        adapter: &wgpu::Adapter,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        shader_root: impl Into<PathBuf>,
    ) -> Self {
        let downlevel = adapter.get_downlevel_capabilities();
        let capabilities = BackendCapabilities {
            compute_shaders: downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
        };

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniform Buffer"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            shader_root: shader_root.into(),
            capabilities,
            frame_buffer,
            targets: HashMap::new(),
            shaders: HashMap::new(),
            last_frame: None,
            next_id: 1,
        }
    }

    /// View of a live target, for the engine's draw recording
    pub fn target_view(&self, handle: TargetHandle) -> Option<&wgpu::TextureView> {
        self.targets.get(&handle).map(|t| &t.view)
    }

    pub fn shader_module(&self, handle: ShaderHandle) -> Option<&wgpu::ShaderModule> {
        self.shaders.get(&handle)
    }

    /// Uniform buffer holding [`FrameUniforms`]
    pub fn frame_buffer(&self) -> &wgpu::Buffer {
        &self.frame_buffer
    }

    /// The most recent packet handed over by the pipeline
    pub fn last_frame(&self) -> Option<&FramePacket> {
        self.last_frame.as_ref()
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn read_source(&self, path: &str) -> Result<String> {
        let full = self.shader_root.join(path);
        std::fs::read_to_string(&full)
            .map_err(|e| Error::Shader(format!("Could not read '{}': {}", full.display(), e)))
    }
}

impl RenderBackend for WgpuBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn create_target(&mut self, desc: &TargetDesc, size: UVec2) -> Result<TargetHandle> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let handle = TargetHandle(self.next());
        log::debug!(
            "Created target '{}' {}x{} {:?} as {:?}",
            desc.label,
            size.x,
            size.y,
            desc.format,
            handle
        );
        self.targets.insert(handle, GpuTarget { texture, view, size });
        Ok(handle)
    }

    fn release_target(&mut self, handle: TargetHandle) {
        if let Some(target) = self.targets.remove(&handle) {
            target.texture.destroy();
        }
    }

    fn create_shader(&mut self, request: &ShaderRequest) -> Result<ShaderHandle> {
        let vertex = match &request.vertex {
            Some(path) => self.read_source(path)?,
            None => FULLSCREEN_VERTEX.to_string(),
        };
        let fragment = self.read_source(&request.fragment)?;

        let mut source = request.override_header();
        source.push_str(&vertex);
        source.push('\n');
        source.push_str(&fragment);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&request.label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::Shader(format!("{}: {}", request.label, err)));
        }

        let handle = ShaderHandle(self.next());
        self.shaders.insert(handle, module);
        Ok(handle)
    }

    fn release_shader(&mut self, handle: ShaderHandle) {
        if self.shaders.remove(&handle).is_none() {
            log::warn!("Releasing unknown shader {:?}", handle);
        }
    }

    fn write_frame_uniforms(&mut self, uniforms: &FrameUniforms) {
        self.queue
            .write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    fn copy_target(&mut self, src: TargetHandle, dst: TargetHandle) {
        let (Some(src), Some(dst)) = (self.targets.get(&src), self.targets.get(&dst)) else {
            log::warn!("Skipping copy between unknown targets {:?} -> {:?}", src, dst);
            return;
        };
        let size = src.size.min(dst.size);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("History Copy Encoder"),
            });
        encoder.copy_texture_to_texture(
            src.texture.as_image_copy(),
            dst.texture.as_image_copy(),
            wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
    }

    fn submit_frame(&mut self, packet: &FramePacket) {
        log::trace!(
            "Frame {} ready with {} stages (paused: {})",
            packet.frame,
            packet.stages.len(),
            packet.paused
        );
        self.last_frame = Some(packet.clone());
    }
}
