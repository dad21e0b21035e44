//! Run state, resize bookkeeping and the per-frame task distribution

use crate::config::PipelineSettings;
use glam::UVec2;
use std::collections::HashSet;

/// Accumulated time after which the tag state cache is cleared
pub const MAINTENANCE_INTERVAL: f64 = 2.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    Running,
    /// In a menu: stage updates stop and the menu blur is active
    Paused,
}

/// Per-tick bookkeeping of the pipeline
#[derive(Debug)]
pub struct FrameScheduler {
    state: RunState,
    maintenance_timer: f64,
    pending_resize: Option<UVec2>,
    window_size: Option<UVec2>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            state: RunState::Uninitialized,
            maintenance_timer: 0.0,
            pending_resize: None,
            window_size: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == RunState::Paused
    }

    /// Mark startup as finished with the initial window size
    pub fn start(&mut self, window_size: UVec2) {
        self.state = RunState::Running;
        self.window_size = Some(window_size);
    }

    pub fn enter_menu(&mut self) -> bool {
        if self.state != RunState::Running {
            log::error!("Cannot enter menu in state {:?}", self.state);
            return false;
        }
        self.state = RunState::Paused;
        true
    }

    pub fn exit_menu(&mut self) -> bool {
        if self.state != RunState::Paused {
            log::error!("Cannot exit menu in state {:?}", self.state);
            return false;
        }
        self.state = RunState::Running;
        true
    }

    /// Remember a window size; applied at the next tick
    pub fn request_resize(&mut self, size: UVec2) {
        self.pending_resize = Some(size);
    }

    /// The pending window size, if it differs from the last applied one
    pub fn take_resize(&mut self) -> Option<UVec2> {
        let size = self.pending_resize.take()?;
        if self.window_size == Some(size) {
            log::trace!("Ignoring resize to unchanged size {}x{}", size.x, size.y);
            return None;
        }
        self.window_size = Some(size);
        Some(size)
    }

    /// Advance the maintenance timer; `true` when maintenance is due
    pub fn advance_maintenance(&mut self, delta_time: f32) -> bool {
        self.maintenance_timer += f64::from(delta_time);
        if self.maintenance_timer >= MAINTENANCE_INTERVAL {
            self.maintenance_timer = 0.0;
            true
        } else {
            false
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Spreads expensive tasks over a cycle of frames
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    frames: Vec<Vec<String>>,
    known: HashSet<String>,
    frame_index: usize,
}

impl TaskScheduler {
    pub fn new(frames: Vec<Vec<String>>) -> Self {
        let frames = if frames.is_empty() { vec![Vec::new()] } else { frames };
        let known = frames.iter().flatten().cloned().collect();
        Self {
            frames,
            known,
            frame_index: 0,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.task_frames.clone())
    }

    /// Move to the next frame of the cycle
    pub fn step(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.frames.len();
    }

    /// Whether a task runs on the current frame
    pub fn is_scheduled(&self, task: &str) -> bool {
        if !self.known.contains(task) {
            log::warn!("Unknown task: {}", task);
            return false;
        }
        self.frames[self.frame_index].iter().any(|t| t == task)
    }

    pub fn current_frame(&self) -> usize {
        self.frame_index
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
