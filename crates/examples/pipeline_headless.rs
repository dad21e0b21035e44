//! Drives the render pipeline without a window
//!
//! Builds the stage graph, binds a few effects, then runs a short scripted
//! session: a window resize, a trip into the menu, a plugin shader change
//! and a full shader reload.
//!
//! Usage:
//!   pipeline_headless [settings.json] [--gpu]
//!
//! With `--gpu` the pipeline runs on a real `wgpu` device and compiles the
//! shaders under `crates/examples/shaders`.

use glam::{UVec2, Vec3};
use helio_pipeline::backend::{
    HeadlessBackend, RenderBackend, ShaderHandle, TargetDesc, TargetSize, WgpuBackend,
};
use helio_pipeline::effects::EffectOptions;
use helio_pipeline::graph::{RenderStage, StageContext, StageDeclaration};
use helio_pipeline::materials::{Material, PbrMaterial};
use helio_pipeline::plugins::{Hook, Plugin};
use helio_pipeline::{PipelineSettings, RenderPipeline, Result};
use std::sync::Arc;

const SHADER_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders");

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let use_gpu = args.iter().any(|a| a == "--gpu");
    let settings_path = args.iter().find(|a| !a.starts_with("--"));

    if let Err(err) = run(settings_path.map(String::as_str), use_gpu) {
        log::error!("Pipeline session failed: {}", err);
        std::process::exit(1);
    }
}

fn run(settings_path: Option<&str>, use_gpu: bool) -> Result<()> {
    let mut settings = match settings_path {
        Some(path) => PipelineSettings::load(path)?,
        None => PipelineSettings::default(),
    };
    settings.auto_reload_plugin_shaders = true;

    if use_gpu {
        let backend = create_gpu_backend()?;
        session(RenderPipeline::new(settings, backend)?)
    } else {
        let backend = HeadlessBackend::new();
        let log = backend.log();
        session(RenderPipeline::new(settings, backend)?)?;

        let log = log.lock();
        log::info!(
            "Headless backend: {} frames, {} shader programs, {} targets created, {} released",
            log.frames.len(),
            log.shaders.len(),
            log.targets_created,
            log.targets_released
        );
        Ok(())
    }
}

fn create_gpu_backend() -> Result<WgpuBackend> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| helio_pipeline::Error::Backend("No suitable GPU adapter".into()))?;
    log::info!("Using adapter: {}", adapter.get_info().name);

    let (device, queue) = pollster::block_on(
        adapter.request_device(&wgpu::DeviceDescriptor::default(), None),
    )
    .map_err(|e| helio_pipeline::Error::Backend(e.to_string()))?;

    Ok(WgpuBackend::new(
        &adapter,
        Arc::new(device),
        Arc::new(queue),
        SHADER_ROOT,
    ))
}

fn session(mut pipeline: RenderPipeline) -> Result<()> {
    pipeline.add_plugin(ColorCorrectionPlugin);

    let root = pipeline.scene().root();
    let scene = pipeline.scene_mut();
    let skybox = scene.attach(root, "skybox")?;
    let terrain = scene.attach(root, "terrain")?;
    let foliage = scene.attach(terrain, "foliage")?;
    let window = scene.attach(root, "window")?;
    scene.add_material(Material::Pbr(PbrMaterial::new(
        "Painted Metal",
        Vec3::new(0.6, 0.1, 0.1),
    )));
    pipeline.set_skybox(skybox);

    pipeline.create(UVec2::new(1280, 720))?;
    log::info!("Stage order: {:?}", pipeline.graph().stage_names());

    pipeline.set_effect(
        foliage,
        "default",
        EffectOptions::new().with("render_shadow", false)?,
        30,
    )?;
    pipeline.set_effect(
        window,
        "default",
        EffectOptions::new()
            .with("render_gbuffer", false)?
            .with("render_forward", true)?,
        30,
    )?;

    let notifier = pipeline.change_notifier();
    for frame in 0..240u32 {
        match frame {
            60 => pipeline.notify_window_resized(1921, 1083),
            120 => pipeline.enter_menu(),
            150 => {
                if let Some(notifier) = &notifier {
                    notifier.file_changed("plugins/color_correction/sharpen.wgsl");
                }
            }
            180 => pipeline.exit_menu(),
            200 => pipeline.reload_shaders()?,
            _ => {}
        }
        pipeline.tick(1.0 / 60.0)?;
    }

    for node in [root, terrain, foliage, window] {
        log::info!(
            "{:<10} visible in {:?}",
            pipeline.scene().name(node).unwrap_or("?"),
            pipeline.tags().visible_mask(pipeline.scene(), node)
        );
    }
    log::info!(
        "Effect cache: {} effects, {} programs",
        pipeline.compiler().cached_effects(),
        pipeline.compiler().cached_programs()
    );
    Ok(())
}

/// Replaces the built-in sRGB conversion with a sharpen pass
struct ColorCorrectionPlugin;

impl Plugin for ColorCorrectionPlugin {
    fn id(&self) -> &str {
        "color_correction"
    }

    fn create_stages(&mut self, _settings: &PipelineSettings) -> Vec<Box<dyn RenderStage>> {
        vec![Box::new(SharpenStage::default())]
    }

    fn on_hook(&mut self, hook: Hook) {
        if hook == Hook::ShaderReload {
            log::info!("color_correction: shaders reloaded");
        }
    }
}

/// Rewrites `ShadedScene` in place
#[derive(Default)]
struct SharpenStage {
    shader: Option<ShaderHandle>,
}

impl RenderStage for SharpenStage {
    fn name(&self) -> &str {
        "SharpenStage"
    }

    fn declare(&self, decl: &mut StageDeclaration) {
        decl.require("ShadedScene").produce("ShadedScene");
    }

    fn create(&mut self, ctx: &mut StageContext) -> Result<()> {
        let format = ctx.settings.color_format();
        ctx.produce(
            "ShadedScene",
            TargetDesc::new("SharpenStage:ShadedScene", format, TargetSize::Render),
        )?;
        Ok(())
    }

    fn reload_shaders(&mut self, ctx: &mut StageContext) -> Result<()> {
        ctx.replace_shader(&mut self.shader, "plugins/color_correction/sharpen.wgsl")?;
        Ok(())
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(shader) = self.shader.take() {
            backend.release_shader(shader);
        }
    }
}
