//! Shared window, resolution and clock state

use glam::UVec2;

/// Per-pipeline state that used to be process-wide
///
/// Constructed once by [`crate::RenderPipeline`] and handed by reference to
/// every component that needs the current resolution or frame clock.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Window size, snapped to a multiple of 4
    pub native_resolution: UVec2,
    /// Internal render size after applying the resolution scale
    pub resolution: UVec2,
    /// Frames ticked since creation
    pub frame: u64,
    /// Accumulated time in seconds
    pub time: f64,
    /// Duration of the last tick
    pub delta_time: f32,
}

impl PipelineContext {
    pub fn new(native_resolution: UVec2, resolution_scale: f32) -> Self {
        let native_resolution = snap_to_multiple_of_4(native_resolution);
        Self {
            native_resolution,
            resolution: scaled_resolution(native_resolution, resolution_scale),
            frame: 0,
            time: 0.0,
            delta_time: 0.0,
        }
    }

    /// Recompute the internal resolution from the native one
    pub fn set_native_resolution(&mut self, native: UVec2, resolution_scale: f32) {
        self.native_resolution = snap_to_multiple_of_4(native);
        self.resolution = scaled_resolution(self.native_resolution, resolution_scale);
    }

    pub(crate) fn advance(&mut self, delta_time: f32) {
        self.frame += 1;
        self.delta_time = delta_time;
        self.time += f64::from(delta_time);
    }
}

/// Round each axis down to the nearest multiple of 4
pub fn snap_to_multiple_of_4(size: UVec2) -> UVec2 {
    UVec2::new(size.x - size.x % 4, size.y - size.y % 4)
}

/// Scale a native resolution and snap the result
pub fn scaled_resolution(native: UVec2, scale: f32) -> UVec2 {
    let w = (native.x as f32 * scale) as u32;
    let h = (native.y as f32 * scale) as u32;
    snap_to_multiple_of_4(UVec2::new(w, h))
}
