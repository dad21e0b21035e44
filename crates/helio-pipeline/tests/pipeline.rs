use glam::{UVec2, Vec3, Vec4};
use helio_pipeline::backend::{
    HeadlessBackend, HeadlessLog, RenderBackend, ShaderHandle, TargetDesc, TargetSize,
};
use helio_pipeline::effects::{EffectDescription, EffectOptions, Pass};
use helio_pipeline::graph::{RenderStage, StageContext, StageDeclaration};
use helio_pipeline::materials::{Material, PbrMaterial};
use helio_pipeline::plugins::{Hook, Plugin};
use helio_pipeline::probes::{EnvironmentProbe, ProbeState};
use helio_pipeline::scheduler::RunState;
use helio_pipeline::tags::PassMask;
use helio_pipeline::{Error, PipelineSettings, RenderPipeline, Result};
use parking_lot::Mutex;
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct BloomStage {
    extra_pipe: Option<&'static str>,
    updates: Arc<Mutex<usize>>,
    shader: Option<ShaderHandle>,
}

impl RenderStage for BloomStage {
    fn name(&self) -> &str {
        "BloomStage"
    }

    fn declare(&self, decl: &mut StageDeclaration) {
        decl.require("ShadedScene").produce("ShadedScene");
        if let Some(pipe) = self.extra_pipe {
            decl.require(pipe);
        }
    }

    fn create(&mut self, ctx: &mut StageContext) -> Result<()> {
        let format = ctx.settings.color_format();
        ctx.produce(
            "ShadedScene",
            TargetDesc::new("BloomStage:ShadedScene", format, TargetSize::Render),
        )?;
        Ok(())
    }

    fn reload_shaders(&mut self, ctx: &mut StageContext) -> Result<()> {
        ctx.replace_shader(&mut self.shader, "plugins/bloom/bloom.wgsl")?;
        Ok(())
    }

    fn update(&mut self, _ctx: &mut StageContext) -> Result<()> {
        *self.updates.lock() += 1;
        Ok(())
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(shader) = self.shader.take() {
            backend.release_shader(shader);
        }
    }
}

/// Second pass-through on `ShadedScene`, compiled without keeping the handle
struct SharpenStage;

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
        ctx.load_shader("plugins/sharpen/sharpen.wgsl")?;
        Ok(())
    }
}

struct SharpenPlugin;

impl Plugin for SharpenPlugin {
    fn id(&self) -> &str {
        "sharpen"
    }

    fn create_stages(&mut self, _settings: &PipelineSettings) -> Vec<Box<dyn RenderStage>> {
        vec![Box::new(SharpenStage)]
    }
}

/// Records the probe updates it receives
struct ProbePlugin(Arc<Mutex<Vec<ProbeState>>>);

impl Plugin for ProbePlugin {
    fn id(&self) -> &str {
        "env_probes"
    }

    fn update_probes(&mut self, probes: &[ProbeState]) {
        self.0.lock().extend_from_slice(probes);
    }
}

#[derive(Clone, Default)]
struct Probe {
    hooks: Arc<Mutex<Vec<Hook>>>,
    updates: Arc<Mutex<usize>>,
}

struct BloomPlugin {
    probe: Probe,
    extra_pipe: Option<&'static str>,
}

impl Plugin for BloomPlugin {
    fn id(&self) -> &str {
        "bloom"
    }

    fn create_stages(&mut self, _settings: &PipelineSettings) -> Vec<Box<dyn RenderStage>> {
        vec![Box::new(BloomStage {
            extra_pipe: self.extra_pipe,
            updates: self.probe.updates.clone(),
            shader: None,
        })]
    }

    fn on_hook(&mut self, hook: Hook) {
        self.probe.hooks.lock().push(hook);
    }
}

/// Plugin that only switches a feature on by existing
struct MarkerPlugin(&'static str);

impl Plugin for MarkerPlugin {
    fn id(&self) -> &str {
        self.0
    }
}

fn pipeline_with(
    settings: PipelineSettings,
    plugins: Vec<Box<dyn FnOnce(&mut RenderPipeline)>>,
) -> (RenderPipeline, Arc<Mutex<HeadlessLog>>) {
    init_logging();
    let backend = HeadlessBackend::new();
    let log = backend.log();
    let mut pipeline = RenderPipeline::new(settings, backend).unwrap();
    for add in plugins {
        add(&mut pipeline);
    }
    (pipeline, log)
}

fn created(settings: PipelineSettings) -> (RenderPipeline, Arc<Mutex<HeadlessLog>>) {
    let (mut pipeline, log) = pipeline_with(settings, Vec::new());
    pipeline.create(UVec2::new(800, 600)).unwrap();
    (pipeline, log)
}

#[test]
fn test_startup_assembles_default_stages() {
    let (pipeline, log) = created(PipelineSettings::default());

    assert_eq!(pipeline.state(), RunState::Running);
    assert_eq!(
        pipeline.graph().stage_names(),
        vec![
            "GBufferStage",
            "ApplyLightsStage",
            "AmbientStage",
            "ConvertDepthStage",
            "CombineVelocityStage",
            "LowPrecisionNormalsStage",
            "SrgbCorrectionStage",
            "MenuBlurStage",
            "FinalStage",
        ]
    );
    assert_eq!(pipeline.bindings().len(), 1);
    assert_eq!(pipeline.bindings()[0].sort, helio_pipeline::DEFAULT_EFFECT_SORT);

    let log = log.lock();
    assert_eq!(log.target_size("GBufferStage:GBuffer"), Some(UVec2::new(800, 600)));
    assert_eq!(
        log.target_size("ConvertDepthStage:DownscaledDepth"),
        Some(UVec2::new(400, 300))
    );
    assert!(log
        .target_size("PreviousFrame::GBufferStage:SceneDepth")
        .is_some());
    assert_eq!(log.compile_count("FinalStage:stages/final.wgsl"), 1);
}

#[test]
fn test_optional_stages_and_plugin_stage_order() {
    let settings = PipelineSettings {
        resolution_scale: 0.5,
        reference_mode: true,
        ..Default::default()
    };
    let probe = Probe::default();
    let plugin_probe = probe.clone();
    let (mut pipeline, log) = pipeline_with(
        settings,
        vec![
            Box::new(move |p: &mut RenderPipeline| {
                p.add_plugin(BloomPlugin {
                    probe: plugin_probe,
                    extra_pipe: None,
                })
            }),
            Box::new(|p: &mut RenderPipeline| p.add_plugin(MarkerPlugin("color_correction"))),
        ],
    );
    pipeline.create(UVec2::new(1600, 900)).unwrap();

    let names = pipeline.graph().stage_names();
    let position = |name: &str| names.iter().position(|n| n == name).unwrap();
    assert!(position("AmbientStage") < position("BloomStage"));
    assert!(position("BloomStage") < position("UpscaleStage"));
    assert!(position("UpscaleStage") < position("ReferenceStage"));
    assert!(!names.iter().any(|n| n == "SrgbCorrectionStage"));

    let log = log.lock();
    assert_eq!(log.target_size("GBufferStage:GBuffer"), Some(UVec2::new(800, 448)));
    assert_eq!(log.target_size("UpscaleStage:ShadedScene"), Some(UVec2::new(1600, 900)));
    assert_eq!(
        *probe.hooks.lock(),
        vec![Hook::StageSetup, Hook::PostStageSetup, Hook::PipelineCreated]
    );
}

#[test]
fn test_missing_producer_fails_before_allocation() {
    let probe = Probe::default();
    let (mut pipeline, log) = pipeline_with(
        PipelineSettings::default(),
        vec![Box::new(move |p: &mut RenderPipeline| {
            p.add_plugin(BloomPlugin {
                probe,
                extra_pipe: Some("VolumetricFog"),
            })
        })],
    );

    let err = pipeline.create(UVec2::new(800, 600)).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::UnsatisfiedPipe { ref pipe, .. } if pipe == "VolumetricFog"));
    assert_eq!(log.lock().targets_created, 0);
    assert_eq!(pipeline.state(), RunState::Uninitialized);
}

#[test]
fn test_missing_compute_support_is_fatal() {
    init_logging();
    let backend = HeadlessBackend::new().without_compute();
    let mut pipeline = RenderPipeline::new(PipelineSettings::default(), backend).unwrap();
    assert!(matches!(
        pipeline.create(UVec2::new(800, 600)),
        Err(Error::MissingCapability(_))
    ));
}

#[test]
fn test_replay_after_reload_restores_tag_states() {
    let (mut pipeline, log) = created(PipelineSettings::default());
    let root = pipeline.scene().root();
    let tree = pipeline.scene_mut().attach(root, "tree").unwrap();
    let glass = pipeline.scene_mut().attach(root, "glass").unwrap();
    let leaf = pipeline.scene_mut().attach(tree, "leaf").unwrap();

    let no_shadow = EffectOptions::new().with("render_shadow", false).unwrap();
    pipeline.set_effect(tree, "default", no_shadow, 30).unwrap();
    let forward = EffectOptions::new()
        .with("render_gbuffer", false)
        .unwrap()
        .with("render_forward", true)
        .unwrap();
    pipeline.set_effect(glass, "default", forward, 30).unwrap();

    let nodes = [root, tree, glass, leaf];
    let snapshot = |p: &RenderPipeline| -> Vec<(PassMask, Vec<Option<i32>>)> {
        nodes
            .iter()
            .map(|&n| {
                let sorts = Pass::ALL
                    .iter()
                    .map(|&pass| p.tags().effective_state(p.scene(), n, pass).map(|s| s.sort))
                    .collect();
                (p.tags().visible_mask(p.scene(), n), sorts)
            })
            .collect()
    };

    let before = snapshot(&pipeline);
    assert!(!before[3].0.contains(PassMask::SHADOW));
    assert!(before[2].0.contains(PassMask::FORWARD));
    assert!(!before[2].0.contains(PassMask::GBUFFER));

    let compiled = log.lock().compile_count("default:gbuffer");
    pipeline.reload_shaders().unwrap();

    assert_eq!(snapshot(&pipeline), before);
    assert_eq!(pipeline.bindings().len(), 3);
    assert_eq!(log.lock().compile_count("default:gbuffer"), compiled * 2);
    assert_eq!(log.lock().compile_count("GBufferStage:stages/gbuffer.wgsl"), 2);
}

#[test]
fn test_failed_set_effect_is_not_recorded() {
    let (mut pipeline, _log) = created(PipelineSettings::default());
    let root = pipeline.scene().root();
    assert!(pipeline
        .set_effect(root, "does_not_exist", EffectOptions::new(), 30)
        .is_err());
    assert_eq!(pipeline.bindings().len(), 1);
    pipeline.reload_shaders().unwrap();
}

#[test]
fn test_skybox_binding() {
    init_logging();
    let backend = HeadlessBackend::new();
    let mut pipeline = RenderPipeline::new(PipelineSettings::default(), backend).unwrap();
    let root = pipeline.scene().root();
    let skybox = pipeline.scene_mut().attach(root, "skybox").unwrap();
    pipeline.set_skybox(skybox);
    pipeline.create(UVec2::new(800, 600)).unwrap();

    let mask = pipeline.tags().visible_mask(pipeline.scene(), skybox);
    assert_eq!(mask, PassMask::GBUFFER);
    assert_eq!(pipeline.bindings()[1].sort, helio_pipeline::SKYBOX_EFFECT_SORT);
}

#[test]
fn test_resize_is_snapped_and_idempotent() {
    let (mut pipeline, log) = created(PipelineSettings::default());

    pipeline.notify_window_resized(1027, 770);
    pipeline.tick(0.016).unwrap();
    assert_eq!(pipeline.context().native_resolution, UVec2::new(1024, 768));
    assert_eq!(
        log.lock().target_size("GBufferStage:GBuffer"),
        Some(UVec2::new(1024, 768))
    );
    let created = log.lock().targets_created;

    pipeline.notify_window_resized(1027, 770);
    pipeline.tick(0.016).unwrap();
    pipeline.notify_window_resized(1024, 768);
    pipeline.tick(0.016).unwrap();

    let log = log.lock();
    assert_eq!(log.targets_created, created);
    assert_eq!(log.live_targets.len(), log.targets_created - log.targets_released);
}

#[test]
fn test_plugin_reload_is_deduplicated() {
    let settings = PipelineSettings {
        auto_reload_plugin_shaders: true,
        ..Default::default()
    };
    let probe = Probe::default();
    let plugin_probe = probe.clone();
    let (mut pipeline, log) = pipeline_with(
        settings,
        vec![Box::new(move |p: &mut RenderPipeline| {
            p.add_plugin(BloomPlugin {
                probe: plugin_probe,
                extra_pipe: None,
            })
        })],
    );
    pipeline.create(UVec2::new(800, 600)).unwrap();
    let notifier = pipeline.change_notifier().unwrap();

    for _ in 0..5 {
        assert!(notifier.file_changed("plugins/bloom/shaders/bloom.wgsl"));
    }
    assert!(notifier.file_changed("plugins/unknown/shader.wgsl"));
    assert!(!notifier.file_changed("plugins/bloom/README.md"));

    pipeline.tick(0.016).unwrap();

    assert_eq!(log.lock().compile_count("BloomStage:plugins/bloom/bloom.wgsl"), 2);
    assert_eq!(log.lock().compile_count("FinalStage:stages/final.wgsl"), 1);
    let reloads = probe
        .hooks
        .lock()
        .iter()
        .filter(|h| **h == Hook::ShaderReload)
        .count();
    assert_eq!(reloads, 1);
}

#[test]
fn test_notifier_disabled_by_default() {
    let (pipeline, _log) = created(PipelineSettings::default());
    assert!(pipeline.change_notifier().is_none());
}

#[test]
fn test_menu_pause_stops_stage_updates() {
    let probe = Probe::default();
    let plugin_probe = probe.clone();
    let (mut pipeline, log) = pipeline_with(
        PipelineSettings::default(),
        vec![Box::new(move |p: &mut RenderPipeline| {
            p.add_plugin(BloomPlugin {
                probe: plugin_probe,
                extra_pipe: None,
            })
        })],
    );
    pipeline.create(UVec2::new(800, 600)).unwrap();

    pipeline.tick(0.016).unwrap();
    assert_eq!(*probe.updates.lock(), 1);

    pipeline.enter_menu();
    assert_eq!(pipeline.state(), RunState::Paused);
    pipeline.tick(0.016).unwrap();
    pipeline.tick(0.016).unwrap();

    assert_eq!(*probe.updates.lock(), 1);
    {
        let log = log.lock();
        assert!(log.frames.last().unwrap().paused);
        assert_eq!(log.frames.len(), 3);
        assert_eq!(log.last_uniforms.unwrap().frame, 1);
    }

    // wrong state is logged and ignored
    pipeline.enter_menu();
    assert_eq!(pipeline.state(), RunState::Paused);

    pipeline.exit_menu();
    pipeline.tick(0.016).unwrap();
    assert_eq!(*probe.updates.lock(), 2);
    assert!(!log.lock().frames.last().unwrap().paused);
    assert_eq!(log.lock().last_uniforms.unwrap().frame, 4);
}

#[test]
fn test_history_copied_every_frame() {
    let (mut pipeline, log) = created(PipelineSettings::default());
    pipeline.tick(0.016).unwrap();
    pipeline.tick(0.016).unwrap();
    assert_eq!(log.lock().copies.len(), 2);
}

#[test]
fn test_periodic_state_cache_cleanup() {
    let (mut pipeline, log) = created(PipelineSettings::default());
    for _ in 0..4 {
        pipeline.tick(0.5).unwrap();
    }
    assert_eq!(log.lock().state_cache_clears, 1);
    assert_eq!(pipeline.tags().cached_states(), 0);
    // records survive the cleanup
    let root = pipeline.scene().root();
    assert_eq!(
        pipeline.tags().visible_mask(pipeline.scene(), root),
        PassMask::GBUFFER | PassMask::SHADOW | PassMask::VOXELIZE | PassMask::ENVMAP
    );
}

#[test]
fn test_inert_probe_without_plugin() {
    let (mut pipeline, _log) = created(PipelineSettings::default());
    let mut probe = pipeline.add_environment_probe();
    probe.set_transform(Vec3::ONE, Vec3::ONE);
    assert!(probe.is_inert());

    let (mut pipeline, _log) = pipeline_with(
        PipelineSettings::default(),
        vec![Box::new(|p: &mut RenderPipeline| p.add_plugin(MarkerPlugin("env_probes")))],
    );
    pipeline.create(UVec2::new(800, 600)).unwrap();
    let mut probe = pipeline.add_environment_probe();
    probe.set_transform(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE);
    assert!(!probe.is_inert());
    assert_eq!(probe.position(), Vec3::new(1.0, 2.0, 3.0));
}

#[test]
fn test_material_export_and_update() {
    let (mut pipeline, log) = created(PipelineSettings::default());
    pipeline.scene_mut().add_material(Material::Pbr(PbrMaterial {
        name: "Wood".into(),
        base_color: Vec3::new(0.8, 0.6, 0.4),
        roughness: 0.5,
        ior: 1.45,
        metallic: 0.0,
        emission: Vec4::new(0.0, 0.0, 0.0, 1.0),
    }));

    let path = std::env::temp_dir().join(format!("helio-materials-{}.txt", std::process::id()));
    pipeline.export_materials(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(text, "0-Wood 0.8 0.6 0.4 0.5 1.45 0.0 0.0 0.0 0.0 1.0\n");

    let clears = log.lock().state_cache_clears;
    assert!(!pipeline
        .update_serialized_material("3-Stone 0.1 0.1 0.1 0.5 1.5 0.0 0.0 0.0 0.0 0.0")
        .unwrap());
    assert_eq!(log.lock().state_cache_clears, clears);

    assert!(pipeline
        .update_serialized_material("0-Wood 0.1 0.2 0.3 0.5 1.45 0.0 0.0 0.0 0.0 1.0")
        .unwrap());
    assert_eq!(log.lock().state_cache_clears, clears + 1);
    let Material::Pbr(wood) = &pipeline.scene().materials()[0] else {
        panic!("expected pbr material");
    };
    assert_eq!(wood.base_color, Vec3::new(0.1, 0.2, 0.3));

    assert!(matches!(
        pipeline.update_serialized_material("0-Wood 0.1"),
        Err(Error::Material(_))
    ));
}

#[test]
fn test_tick_before_create_fails() {
    let (mut pipeline, _log) = pipeline_with(PipelineSettings::default(), Vec::new());
    assert!(pipeline.tick(0.016).is_err());
}

fn bloom(probe: &Probe) -> Box<dyn FnOnce(&mut RenderPipeline)> {
    let probe = probe.clone();
    Box::new(move |p: &mut RenderPipeline| {
        p.add_plugin(BloomPlugin {
            probe,
            extra_pipe: None,
        })
    })
}

fn shader_reloads(probe: &Probe) -> usize {
    probe
        .hooks
        .lock()
        .iter()
        .filter(|h| **h == Hook::ShaderReload)
        .count()
}

#[test]
fn test_output_stages_keep_window_size_after_upscale() {
    let settings = PipelineSettings {
        resolution_scale: 0.5,
        reference_mode: true,
        ..Default::default()
    };
    let (mut pipeline, log) = created(settings);

    {
        let log = log.lock();
        assert_eq!(log.target_size("AmbientStage:ShadedScene"), Some(UVec2::new(400, 300)));
        for label in [
            "UpscaleStage:ShadedScene",
            "SrgbCorrectionStage:ShadedScene",
            "ReferenceStage:ShadedScene",
            "MenuBlurStage:ShadedScene",
        ] {
            assert_eq!(log.target_size(label), Some(UVec2::new(800, 600)), "{}", label);
        }
    }

    pipeline.notify_window_resized(1024, 768);
    pipeline.tick(0.016).unwrap();
    let log = log.lock();
    assert_eq!(
        log.target_size("SrgbCorrectionStage:ShadedScene"),
        Some(UVec2::new(1024, 768))
    );
    assert_eq!(log.target_size("AmbientStage:ShadedScene"), Some(UVec2::new(512, 384)));
}

#[test]
fn test_failed_plugin_reload_does_not_block_others() {
    let settings = PipelineSettings {
        auto_reload_plugin_shaders: true,
        ..Default::default()
    };
    let probe = Probe::default();
    let (mut pipeline, log) = pipeline_with(
        settings,
        vec![
            bloom(&probe),
            Box::new(|p: &mut RenderPipeline| p.add_plugin(SharpenPlugin)),
        ],
    );
    pipeline.create(UVec2::new(800, 600)).unwrap();
    let notifier = pipeline.change_notifier().unwrap();

    log.lock()
        .broken_shaders
        .insert("plugins/bloom/bloom.wgsl".to_string());
    notifier.file_changed("plugins/bloom/bloom.wgsl");
    notifier.file_changed("plugins/sharpen/sharpen.wgsl");

    pipeline.tick(0.016).unwrap();
    assert_eq!(log.lock().compile_count("SharpenStage:plugins/sharpen/sharpen.wgsl"), 2);
    assert_eq!(shader_reloads(&probe), 0);

    log.lock().broken_shaders.clear();
    notifier.file_changed("plugins/bloom/bloom.wgsl");
    pipeline.tick(0.016).unwrap();
    assert_eq!(log.lock().compile_count("BloomStage:plugins/bloom/bloom.wgsl"), 2);
    assert_eq!(shader_reloads(&probe), 1);
}

#[test]
fn test_replacing_effect_rebinds_nodes() {
    let (mut pipeline, _log) = created(PipelineSettings::default());
    let forward = || {
        EffectDescription::new("glass")
            .with_option("render_gbuffer", false)
            .with_option("render_forward", true)
    };
    pipeline.insert_effect("glass", forward()).unwrap();
    let root = pipeline.scene().root();
    let window = pipeline.scene_mut().attach(root, "window").unwrap();
    let first = pipeline
        .set_effect(window, "glass", EffectOptions::new(), 30)
        .unwrap();
    assert!(first.renders(Pass::Shadow));

    pipeline
        .insert_effect("glass", forward().with_option("render_shadow", false))
        .unwrap();

    let mask = pipeline.tags().visible_mask(pipeline.scene(), window);
    assert!(!mask.contains(PassMask::SHADOW));
    assert!(mask.contains(PassMask::FORWARD));
    let again = pipeline
        .set_effect(window, "glass", EffectOptions::new(), 30)
        .unwrap();
    assert!(!again.renders(Pass::Shadow));
    assert_eq!(pipeline.bindings().len(), 3);
}

#[test]
fn test_reloads_release_replaced_shaders() {
    let probe = Probe::default();
    let (mut pipeline, log) = pipeline_with(PipelineSettings::default(), vec![bloom(&probe)]);
    pipeline.create(UVec2::new(800, 600)).unwrap();
    let live = log.lock().live_shaders.len();

    for _ in 0..3 {
        pipeline.reload_shaders().unwrap();
    }
    assert_eq!(log.lock().live_shaders.len(), live);
    assert!(log.lock().shaders_released >= 3 * live);

    drop(pipeline);
    let log = log.lock();
    assert!(log.live_shaders.is_empty());
    assert!(log.live_targets.is_empty());
}

#[test]
fn test_probe_changes_reach_probe_plugin() {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let plugin_updates = updates.clone();
    let (mut pipeline, _log) = pipeline_with(
        PipelineSettings::default(),
        vec![Box::new(move |p: &mut RenderPipeline| {
            p.add_plugin(ProbePlugin(plugin_updates))
        })],
    );
    pipeline.create(UVec2::new(800, 600)).unwrap();

    let mut probe = pipeline.add_environment_probe();
    pipeline.tick(0.016).unwrap();
    assert_eq!(updates.lock().len(), 1);

    pipeline.tick(0.016).unwrap();
    assert_eq!(updates.lock().len(), 1);

    probe.set_transform(Vec3::new(4.0, 0.0, 2.0), Vec3::splat(3.0));
    pipeline.enter_menu();
    pipeline.tick(0.016).unwrap();
    assert_eq!(updates.lock().len(), 1);

    pipeline.exit_menu();
    pipeline.tick(0.016).unwrap();
    let updates = updates.lock();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].position, Vec3::new(4.0, 0.0, 2.0));
    assert_eq!(updates[1].scale, Vec3::splat(3.0));
}

#[test]
fn test_replay_keeps_binding_order_per_node() {
    let (mut pipeline, _log) = created(PipelineSettings::default());
    let root = pipeline.scene().root();
    let rock = pipeline.scene_mut().attach(root, "rock").unwrap();
    let crate_node = pipeline.scene_mut().attach(root, "crate").unwrap();

    let no_shadow = EffectOptions::new().with("render_shadow", false).unwrap();
    let no_envmap = EffectOptions::new().with("render_envmap", false).unwrap();

    // equal sort: the later binding wins
    pipeline.set_effect(rock, "default", no_shadow, 30).unwrap();
    pipeline.set_effect(rock, "default", no_envmap, 30).unwrap();
    // higher sort first: the lower one cannot override it
    pipeline.set_effect(crate_node, "default", no_shadow, 50).unwrap();
    pipeline.set_effect(crate_node, "default", EffectOptions::new(), 40).unwrap();

    let states = |p: &RenderPipeline| {
        [rock, crate_node]
            .iter()
            .map(|&n| {
                let passes: Vec<_> = Pass::ALL
                    .iter()
                    .map(|&pass| {
                        p.tags()
                            .effective_state(p.scene(), n, pass)
                            .map(|s| (s.visible, s.sort))
                    })
                    .collect();
                (p.tags().visible_mask(p.scene(), n), passes)
            })
            .collect::<Vec<_>>()
    };

    let before = states(&pipeline);
    assert!(before[0].0.contains(PassMask::SHADOW));
    assert!(!before[0].0.contains(PassMask::ENVMAP));
    assert!(!before[1].0.contains(PassMask::SHADOW));
    assert!(before[1].0.contains(PassMask::ENVMAP));

    pipeline.reload_shaders().unwrap();
    assert_eq!(states(&pipeline), before);
}

