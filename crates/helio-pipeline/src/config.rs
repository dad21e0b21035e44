//! Pipeline settings

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Scales within this distance of 1.0 render at native resolution
pub const RESOLUTION_SCALE_EPSILON: f32 = 0.005;

/// Settings consumed by the pipeline core
///
/// Missing keys fall back to their defaults, so an empty JSON object is a
/// valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Render-resolution multiplier relative to the window size
    pub resolution_scale: f32,
    /// Adds the reference stage and sets `REFERENCE_MODE` in shaders
    pub reference_mode: bool,
    /// Starts accepting plugin file-change notifications
    pub auto_reload_plugin_shaders: bool,
    /// Use a packed 11/11/10 float format for scene color pipes
    pub use_low_precision_color: bool,
    /// Sets `HIGH_QUALITY_LIGHTING` in shaders
    pub high_quality_lighting: bool,
    /// Directory whose first-level children are plugin directories
    pub plugins_root: PathBuf,
    /// Only files with this suffix trigger plugin reloads
    pub shader_suffix: String,
    /// Task names to run on each frame of the scheduling cycle
    pub task_frames: Vec<Vec<String>>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            resolution_scale: 1.0,
            reference_mode: false,
            auto_reload_plugin_shaders: false,
            use_low_precision_color: false,
            high_quality_lighting: false,
            plugins_root: PathBuf::from("plugins"),
            shader_suffix: ".wgsl".to_string(),
            task_frames: vec![Vec::new()],
        }
    }
}

impl PipelineSettings {
    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Could not read settings '{}': {}", path.display(), e))
        })?;
        log::debug!("Loading pipeline settings from {}", path.display());
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.resolution_scale.is_finite() || self.resolution_scale <= 0.0 {
            return Err(Error::Config(format!(
                "resolution_scale must be a positive number, got {}",
                self.resolution_scale
            )));
        }
        if self.task_frames.is_empty() {
            return Err(Error::Config("task_frames needs at least one frame".into()));
        }
        Ok(())
    }

    /// Whether the internal resolution differs from the window resolution
    pub fn needs_resampling(&self) -> bool {
        (1.0 - self.resolution_scale).abs() > RESOLUTION_SCALE_EPSILON
    }

    /// Format used for HDR scene color targets
    pub fn color_format(&self) -> wgpu::TextureFormat {
        if self.use_low_precision_color {
            wgpu::TextureFormat::Rg11b10Float
        } else {
            wgpu::TextureFormat::Rgba16Float
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let settings = PipelineSettings::from_json_str("{}").unwrap();
        assert_eq!(settings.resolution_scale, 1.0);
        assert!(!settings.reference_mode);
        assert!(!settings.needs_resampling());
        assert_eq!(settings.color_format(), wgpu::TextureFormat::Rgba16Float);
    }

    #[test]
    fn test_parse_all_core_keys() {
        let settings = PipelineSettings::from_json_str(
            r#"{
                "resolution_scale": 0.5,
                "reference_mode": true,
                "auto_reload_plugin_shaders": true,
                "use_low_precision_color": true,
                "task_frames": [["a"], ["b", "c"]]
            }"#,
        )
        .unwrap();
        assert!(settings.needs_resampling());
        assert!(settings.reference_mode);
        assert!(settings.auto_reload_plugin_shaders);
        assert_eq!(settings.color_format(), wgpu::TextureFormat::Rg11b10Float);
        assert_eq!(settings.task_frames.len(), 2);
    }

    #[test]
    fn test_scale_epsilon() {
        let mut settings = PipelineSettings::default();
        settings.resolution_scale = 1.004;
        assert!(!settings.needs_resampling());
        settings.resolution_scale = 1.01;
        assert!(settings.needs_resampling());
    }

    #[test]
    fn test_rejects_invalid_scale() {
        assert!(PipelineSettings::from_json_str(r#"{"resolution_scale": 0.0}"#).is_err());
        assert!(PipelineSettings::from_json_str(r#"{"resolution_scale": -1.0}"#).is_err());
    }
}
