//! Backend without a device
//!
//! Allocates handles and records every request. Used for offline validation
//! of pipeline configurations and by the test suite.

use super::{
    BackendCapabilities, FramePacket, FrameUniforms, RenderBackend, ShaderHandle, ShaderRequest,
    TargetDesc, TargetHandle,
};
use crate::{Error, Result};
use glam::UVec2;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Everything the headless backend has been asked to do
#[derive(Debug, Default)]
pub struct HeadlessLog {
    pub live_targets: HashMap<TargetHandle, (TargetDesc, UVec2)>,
    pub targets_created: usize,
    pub targets_released: usize,
    pub shaders: Vec<ShaderRequest>,
    pub live_shaders: HashSet<ShaderHandle>,
    pub shaders_released: usize,
    /// Fragment paths whose compilation fails
    pub broken_shaders: HashSet<String>,
    pub frames: Vec<FramePacket>,
    pub last_uniforms: Option<FrameUniforms>,
    pub copies: Vec<(TargetHandle, TargetHandle)>,
    pub state_cache_clears: usize,
}

impl HeadlessLog {
    /// Size of the live target with the given label
    pub fn target_size(&self, label: &str) -> Option<UVec2> {
        self.live_targets
            .values()
            .find(|(desc, _)| desc.label == label)
            .map(|(_, size)| *size)
    }

    /// Number of programs compiled under the given label
    pub fn compile_count(&self, label: &str) -> usize {
        self.shaders.iter().filter(|s| s.label == label).count()
    }
}

pub struct HeadlessBackend {
    capabilities: BackendCapabilities,
    next_id: u64,
    log: Arc<Mutex<HeadlessLog>>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            capabilities: BackendCapabilities {
                compute_shaders: true,
            },
            next_id: 1,
            log: Arc::new(Mutex::new(HeadlessLog::default())),
        }
    }

    /// Pretend the device lacks compute shader support
    pub fn without_compute(mut self) -> Self {
        self.capabilities.compute_shaders = false;
        self
    }

    /// Shared view of the request log, valid after the backend moves into a pipeline
    pub fn log(&self) -> Arc<Mutex<HeadlessLog>> {
        self.log.clone()
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for HeadlessBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn create_target(&mut self, desc: &TargetDesc, size: UVec2) -> Result<TargetHandle> {
        let handle = TargetHandle(self.next());
        let mut log = self.log.lock();
        log.live_targets.insert(handle, (desc.clone(), size));
        log.targets_created += 1;
        Ok(handle)
    }

    fn release_target(&mut self, handle: TargetHandle) {
        let mut log = self.log.lock();
        if log.live_targets.remove(&handle).is_some() {
            log.targets_released += 1;
        }
    }

    fn create_shader(&mut self, request: &ShaderRequest) -> Result<ShaderHandle> {
        if self.log.lock().broken_shaders.contains(&request.fragment) {
            return Err(Error::Shader(format!("{}: syntax error", request.label)));
        }
        let handle = ShaderHandle(self.next());
        let mut log = self.log.lock();
        log.shaders.push(request.clone());
        log.live_shaders.insert(handle);
        Ok(handle)
    }

    fn release_shader(&mut self, handle: ShaderHandle) {
        let mut log = self.log.lock();
        if log.live_shaders.remove(&handle) {
            log.shaders_released += 1;
        }
    }

    fn write_frame_uniforms(&mut self, uniforms: &FrameUniforms) {
        self.log.lock().last_uniforms = Some(*uniforms);
    }

    fn copy_target(&mut self, src: TargetHandle, dst: TargetHandle) {
        self.log.lock().copies.push((src, dst));
    }

    fn submit_frame(&mut self, packet: &FramePacket) {
        self.log.lock().frames.push(packet.clone());
    }

    fn clear_state_cache(&mut self) {
        self.log.lock().state_cache_clears += 1;
    }
}
