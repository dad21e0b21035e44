//! Environment probes
//!
//! Probes only exist while the `env_probes` plugin is enabled. Otherwise
//! callers get an [`InertProbe`] with the same interface that does nothing.

use glam::Vec3;
use parking_lot::Mutex;
use std::sync::Arc;

/// Plugin that owns environment probe rendering
pub const ENV_PROBES_PLUGIN: &str = "env_probes";

/// Upper bound on live probes
pub const MAX_PROBES: usize = 64;

/// Interface shared by real and inert probes
pub trait EnvironmentProbe: Send {
    fn set_transform(&mut self, position: Vec3, scale: Vec3);

    fn set_parallax_correction(&mut self, enabled: bool);

    fn set_border_smoothness(&mut self, smoothness: f32);

    fn position(&self) -> Vec3;

    /// `true` for the stand-in returned while probes are disabled
    fn is_inert(&self) -> bool {
        false
    }
}

/// Snapshot of a probe handed to the probe plugin after it changed
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeState {
    pub index: usize,
    pub position: Vec3,
    pub scale: Vec3,
    pub parallax_correction: bool,
    pub border_smoothness: f32,
}

#[derive(Debug, Clone)]
struct ProbeData {
    position: Vec3,
    scale: Vec3,
    parallax_correction: bool,
    border_smoothness: f32,
    dirty: bool,
}

/// A probe tracked by the [`ProbeManager`]
pub struct Probe {
    index: usize,
    data: Arc<Mutex<ProbeData>>,
}

impl Probe {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl EnvironmentProbe for Probe {
    fn set_transform(&mut self, position: Vec3, scale: Vec3) {
        let mut data = self.data.lock();
        data.position = position;
        data.scale = scale;
        data.dirty = true;
    }

    fn set_parallax_correction(&mut self, enabled: bool) {
        let mut data = self.data.lock();
        data.parallax_correction = enabled;
        data.dirty = true;
    }

    fn set_border_smoothness(&mut self, smoothness: f32) {
        let mut data = self.data.lock();
        data.border_smoothness = smoothness;
        data.dirty = true;
    }

    fn position(&self) -> Vec3 {
        self.data.lock().position
    }
}

/// Probe stand-in used while the probe plugin is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct InertProbe;

impl EnvironmentProbe for InertProbe {
    fn set_transform(&mut self, _position: Vec3, _scale: Vec3) {}

    fn set_parallax_correction(&mut self, _enabled: bool) {}

    fn set_border_smoothness(&mut self, _smoothness: f32) {}

    fn position(&self) -> Vec3 {
        Vec3::ZERO
    }

    fn is_inert(&self) -> bool {
        true
    }
}

/// Owns the data of every live probe
#[derive(Default)]
pub struct ProbeManager {
    probes: Vec<Arc<Mutex<ProbeData>>>,
}

impl ProbeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new probe, `None` once [`MAX_PROBES`] is reached
    pub fn add_probe(&mut self) -> Option<Probe> {
        if self.probes.len() >= MAX_PROBES {
            log::error!("Cannot add more than {} environment probes", MAX_PROBES);
            return None;
        }
        let data = Arc::new(Mutex::new(ProbeData {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
            parallax_correction: true,
            border_smoothness: 0.1,
            dirty: true,
        }));
        self.probes.push(data.clone());
        Some(Probe {
            index: self.probes.len() - 1,
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Probes changed since the last call, clearing their flags
    pub fn take_dirty(&mut self) -> Vec<ProbeState> {
        self.probes
            .iter()
            .enumerate()
            .filter_map(|(index, probe)| {
                let mut data = probe.lock();
                if !std::mem::take(&mut data.dirty) {
                    return None;
                }
                Some(ProbeState {
                    index,
                    position: data.position,
                    scale: data.scale,
                    parallax_correction: data.parallax_correction,
                    border_smoothness: data.border_smoothness,
                })
            })
            .collect()
    }
}
