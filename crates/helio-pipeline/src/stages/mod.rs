//! Built-in render stages
//!
//! The pipeline owns a closed set of stages. Scene stages are registered
//! first, plugin stages after them, and output stages last, so registration
//! order alone already puts plugin rewrites of `ShadedScene` between the
//! lighting and the final image.

use crate::backend::{RenderBackend, ShaderHandle, TargetDesc, TargetSize};
use crate::config::PipelineSettings;
use crate::graph::{RenderStage, StageContext, StageDeclaration};
use crate::Result;
use wgpu::TextureFormat;

/// Inputs the pipeline supplies to the graph from outside
pub const EXTERNAL_INPUTS: &[&str] = &["MainCamera", "Lights"];

/// Plugin whose presence replaces the built-in sRGB conversion
pub const COLOR_CORRECTION_PLUGIN: &str = "color_correction";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BuiltinStageKind {
    GBuffer,
    ApplyLights,
    Ambient,
    ConvertDepth,
    CombineVelocity,
    LowPrecisionNormals,
    Upscale,
    SrgbCorrection,
    Reference,
    MenuBlur,
    Final,
}

impl BuiltinStageKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::GBuffer => "GBufferStage",
            Self::ApplyLights => "ApplyLightsStage",
            Self::Ambient => "AmbientStage",
            Self::ConvertDepth => "ConvertDepthStage",
            Self::CombineVelocity => "CombineVelocityStage",
            Self::LowPrecisionNormals => "LowPrecisionNormalsStage",
            Self::Upscale => "UpscaleStage",
            Self::SrgbCorrection => "SrgbCorrectionStage",
            Self::Reference => "ReferenceStage",
            Self::MenuBlur => "MenuBlurStage",
            Self::Final => "FinalStage",
        }
    }

    /// Fragment shader path, relative to the backend's shader root
    pub fn shader(self) -> &'static str {
        match self {
            Self::GBuffer => "stages/gbuffer.wgsl",
            Self::ApplyLights => "stages/apply_lights.wgsl",
            Self::Ambient => "stages/ambient.wgsl",
            Self::ConvertDepth => "stages/convert_depth.wgsl",
            Self::CombineVelocity => "stages/combine_velocity.wgsl",
            Self::LowPrecisionNormals => "stages/low_precision_normals.wgsl",
            Self::Upscale => "stages/upscale.wgsl",
            Self::SrgbCorrection => "stages/srgb.wgsl",
            Self::Reference => "stages/reference.wgsl",
            Self::MenuBlur => "stages/menu_blur.wgsl",
            Self::Final => "stages/final.wgsl",
        }
    }

    fn declare(self, decl: &mut StageDeclaration) {
        match self {
            Self::GBuffer => {
                decl.input("MainCamera").produce("GBuffer").produce("SceneDepth");
            }
            Self::ApplyLights => {
                decl.input("Lights").require("GBuffer").produce("ShadedScene");
            }
            Self::Ambient => {
                decl.require("GBuffer").require("ShadedScene").produce("ShadedScene");
            }
            Self::ConvertDepth => {
                decl.require("SceneDepth").produce("DownscaledDepth");
            }
            Self::CombineVelocity => {
                decl.require("GBuffer")
                    .require("SceneDepth")
                    .require("PreviousFrame::SceneDepth")
                    .produce("CombinedVelocity");
            }
            Self::LowPrecisionNormals => {
                decl.require("GBuffer").produce("LowPrecisionNormals");
            }
            Self::Upscale | Self::SrgbCorrection | Self::Reference | Self::MenuBlur => {
                decl.require("ShadedScene").produce("ShadedScene");
            }
            Self::Final => {
                decl.require("ShadedScene");
            }
        }
    }

    /// Stages that rewrite `ShadedScene` at the size it arrives with
    fn rewrites_in_place(self) -> bool {
        matches!(
            self,
            Self::Ambient | Self::SrgbCorrection | Self::Reference | Self::MenuBlur
        )
    }

    /// Targets this kind allocates, as `(pipe, format, size)`
    fn targets(self, settings: &PipelineSettings) -> Vec<(&'static str, TextureFormat, TargetSize)> {
        let color = settings.color_format();
        match self {
            Self::GBuffer => vec![
                ("GBuffer", TextureFormat::Rgba16Float, TargetSize::Render),
                ("SceneDepth", TextureFormat::R32Float, TargetSize::Render),
            ],
            Self::ApplyLights => vec![("ShadedScene", color, TargetSize::Render)],
            // Rewrites keep the size of the version they consume
            Self::Ambient | Self::SrgbCorrection | Self::Reference | Self::MenuBlur => Vec::new(),
            Self::ConvertDepth => vec![("DownscaledDepth", TextureFormat::R32Float, TargetSize::Divided(2))],
            Self::CombineVelocity => {
                vec![("CombinedVelocity", TextureFormat::Rg16Float, TargetSize::Render)]
            }
            Self::LowPrecisionNormals => {
                vec![("LowPrecisionNormals", TextureFormat::Rgba8Unorm, TargetSize::Render)]
            }
            Self::Upscale => vec![("ShadedScene", color, TargetSize::Native)],
            Self::Final => Vec::new(),
        }
    }
}

/// Stages registered before plugin stages
pub fn scene_stages() -> Vec<BuiltinStageKind> {
    use BuiltinStageKind::*;
    vec![GBuffer, ApplyLights, Ambient, ConvertDepth, CombineVelocity, LowPrecisionNormals]
}

/// Stages registered after plugin stages
///
/// Upscale is added when the resolution scale differs from 1, the sRGB
/// conversion when no color correction plugin is enabled, and the reference
/// stage in reference mode.
pub fn output_stages(settings: &PipelineSettings, color_correction: bool) -> Vec<BuiltinStageKind> {
    let mut stages = Vec::new();
    if settings.needs_resampling() {
        stages.push(BuiltinStageKind::Upscale);
    }
    if !color_correction {
        stages.push(BuiltinStageKind::SrgbCorrection);
    }
    if settings.reference_mode {
        stages.push(BuiltinStageKind::Reference);
    }
    stages.push(BuiltinStageKind::MenuBlur);
    stages.push(BuiltinStageKind::Final);
    stages
}

/// A pipeline-owned stage
pub struct BuiltinStage {
    kind: BuiltinStageKind,
    shader: Option<ShaderHandle>,
    blur_enabled: bool,
    blurred_frames: u64,
}

impl BuiltinStage {
    pub fn new(kind: BuiltinStageKind) -> Self {
        Self {
            kind,
            shader: None,
            blur_enabled: false,
            blurred_frames: 0,
        }
    }

    pub fn kind(&self) -> BuiltinStageKind {
        self.kind
    }

    pub fn shader(&self) -> Option<ShaderHandle> {
        self.shader
    }

    /// Only meaningful for the menu blur stage
    pub fn blur_enabled(&self) -> bool {
        self.blur_enabled
    }

    /// Frames the menu blur has run for
    pub fn blurred_frames(&self) -> u64 {
        self.blurred_frames
    }
}

impl RenderStage for BuiltinStage {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn declare(&self, decl: &mut StageDeclaration) {
        self.kind.declare(decl);
    }

    fn create(&mut self, ctx: &mut StageContext) -> Result<()> {
        for (pipe, format, size) in self.kind.targets(ctx.settings) {
            let label = format!("{}:{}", self.kind.name(), pipe);
            ctx.produce(pipe, TargetDesc::new(label, format, size))?;
        }
        if self.kind.rewrites_in_place() {
            let size = ctx.pipe("ShadedScene")?.desc.size;
            let format = ctx.settings.color_format();
            let label = format!("{}:ShadedScene", self.kind.name());
            ctx.produce("ShadedScene", TargetDesc::new(label, format, size))?;
        }
        Ok(())
    }

    fn reload_shaders(&mut self, ctx: &mut StageContext) -> Result<()> {
        ctx.replace_shader(&mut self.shader, self.kind.shader())?;
        Ok(())
    }

    fn update(&mut self, ctx: &mut StageContext) -> Result<()> {
        if self.kind == BuiltinStageKind::MenuBlur && self.blur_enabled {
            self.blurred_frames += 1;
            log::trace!("Menu blur active on frame {}", ctx.context.frame);
        }
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        if self.kind == BuiltinStageKind::MenuBlur {
            self.blur_enabled = paused;
        }
    }

    fn updates_while_paused(&self) -> bool {
        self.kind == BuiltinStageKind::MenuBlur
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(shader) = self.shader.take() {
            backend.release_shader(shader);
        }
    }
}
