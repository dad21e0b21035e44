//! The render pipeline: startup, ticking, effects and reload

use crate::backend::{FramePacket, FrameUniforms, RenderBackend, ShaderDefine, ShaderDefines};
use crate::config::PipelineSettings;
use crate::context::PipelineContext;
use crate::effects::{
    CompiledEffect, EffectCompiler, EffectDescription, EffectLibrary, EffectOptions,
};
use crate::graph::{GraphContext, StageGraph};
use crate::materials::{self, SerializedMaterial};
use crate::plugins::{Hook, Plugin, PluginManager};
use crate::probes::{EnvironmentProbe, InertProbe, ProbeManager, ENV_PROBES_PLUGIN};
use crate::scene::{NodeId, SceneTree};
use crate::scheduler::{FrameScheduler, RunState, TaskScheduler};
use crate::stages::{self, BuiltinStage, COLOR_CORRECTION_PLUGIN, EXTERNAL_INPUTS};
use crate::tags::TagDispatcher;
use crate::watcher::{ChangeNotifier, PluginWatchFilter, ReloadQueue};
use crate::{Error, Result};
use glam::UVec2;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Sort of the whole-scene default effect bound on the root
pub const DEFAULT_EFFECT_SORT: i32 = -10;

/// Sort of the skybox effect
pub const SKYBOX_EFFECT_SORT: i32 = 1000;

/// Auxiliary per-frame system driven by the pipeline, such as lighting
pub trait FrameManager: Send {
    fn name(&self) -> &str;

    /// Called once per tick while the pipeline is not paused
    fn update(&mut self, tasks: &TaskScheduler, context: &PipelineContext) -> Result<()>;

    fn reload_shaders(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        let _ = backend;
        Ok(())
    }

    fn on_resize(&mut self, context: &PipelineContext) -> Result<()> {
        let _ = context;
        Ok(())
    }
}

/// One `set_effect` call, kept so a reload can restore the scene
#[derive(Debug, Clone, PartialEq)]
pub struct EffectBinding {
    pub node: NodeId,
    pub source: String,
    pub options: EffectOptions,
    pub sort: i32,
}

/// Borrow the pieces of the pipeline the stage graph needs
macro_rules! graph_context {
    ($pipeline:expr) => {
        GraphContext {
            backend: $pipeline.backend.as_mut(),
            context: &$pipeline.context,
            settings: &$pipeline.settings,
            defines: &$pipeline.defines,
            inputs: &$pipeline.inputs,
        }
    };
}

/// Owns the stage graph, the effect system and the frame loop
pub struct RenderPipeline {
    settings: PipelineSettings,
    backend: Box<dyn RenderBackend>,
    context: PipelineContext,
    graph: StageGraph,
    plugins: PluginManager,
    managers: Vec<Box<dyn FrameManager>>,
    library: EffectLibrary,
    compiler: EffectCompiler,
    tags: TagDispatcher,
    scene: SceneTree,
    scheduler: FrameScheduler,
    tasks: TaskScheduler,
    reload_queue: ReloadQueue,
    probes: ProbeManager,
    bindings: Vec<EffectBinding>,
    defines: ShaderDefines,
    inputs: HashSet<String>,
    skybox: Option<NodeId>,
}

impl RenderPipeline {
    pub fn new(settings: PipelineSettings, backend: impl RenderBackend + 'static) -> Result<Self> {
        settings.validate()?;
        let context = PipelineContext::new(UVec2::ZERO, settings.resolution_scale);
        let tasks = TaskScheduler::from_settings(&settings);

        Ok(Self {
            settings,
            backend: Box::new(backend),
            context,
            graph: StageGraph::new(),
            plugins: PluginManager::new(),
            managers: Vec::new(),
            library: EffectLibrary::with_builtins(),
            compiler: EffectCompiler::new(),
            tags: TagDispatcher::new(),
            scene: SceneTree::new(),
            scheduler: FrameScheduler::new(),
            tasks,
            reload_queue: ReloadQueue::default(),
            probes: ProbeManager::new(),
            bindings: Vec::new(),
            defines: ShaderDefines::new(),
            inputs: EXTERNAL_INPUTS.iter().map(|s| s.to_string()).collect(),
            skybox: None,
        })
    }

    /// Register a plugin; only effective before [`create`](Self::create)
    pub fn add_plugin(&mut self, plugin: impl Plugin + 'static) {
        self.plugins.register(Box::new(plugin));
    }

    pub fn add_manager(&mut self, manager: impl FrameManager + 'static) {
        log::debug!("Added frame manager '{}'", manager.name());
        self.managers.push(Box::new(manager));
    }

    /// Declare an additional external graph input
    pub fn add_input(&mut self, name: &str) {
        self.inputs.insert(name.to_string());
    }

    /// Node that receives the skybox effect at startup
    pub fn set_skybox(&mut self, node: NodeId) {
        self.skybox = Some(node);
    }

    /// Build the stage graph and bind the default effects
    ///
    /// Any error here is fatal: the graph is left untouched if resolution
    /// fails, so nothing has been allocated on the backend.
    pub fn create(&mut self, window_size: UVec2) -> Result<()> {
        if self.scheduler.state() != RunState::Uninitialized {
            return Err(Error::Graph("Pipeline was already created".into()));
        }
        log::info!("Creating render pipeline");

        if !self.backend.capabilities().compute_shaders {
            return Err(Error::MissingCapability("compute shaders".into()));
        }

        self.context
            .set_native_resolution(window_size, self.settings.resolution_scale);
        log::info!(
            "Native resolution {}x{}, render resolution {}x{}",
            self.context.native_resolution.x,
            self.context.native_resolution.y,
            self.context.resolution.x,
            self.context.resolution.y
        );

        self.assemble_stages();
        self.defines = self.collect_defines();
        self.compiler.set_common_defines(self.defines.clone());

        self.graph.setup(&mut graph_context!(self))?;
        self.graph.reload_shaders(&mut graph_context!(self))?;
        for manager in &mut self.managers {
            manager.reload_shaders(self.backend.as_mut())?;
        }

        self.scheduler.start(window_size);

        let root = self.scene.root();
        self.set_effect(root, "default", EffectOptions::new(), DEFAULT_EFFECT_SORT)?;
        if let Some(skybox) = self.skybox {
            self.set_effect(skybox, "skybox", Self::skybox_options()?, SKYBOX_EFFECT_SORT)?;
        }

        self.plugins.trigger_hook(Hook::PipelineCreated);
        log::info!(
            "Render pipeline created with {} stages: {:?}",
            self.graph.order().len(),
            self.graph.stage_names()
        );
        Ok(())
    }

    fn assemble_stages(&mut self) {
        for kind in stages::scene_stages() {
            self.graph.register(BuiltinStage::new(kind));
        }

        self.plugins.trigger_hook(Hook::StageSetup);
        for (owner, stage) in self.plugins.collect_stages(&self.settings) {
            self.graph.register_owned(stage, &owner);
        }

        let color_correction = self.plugins.is_plugin_enabled(COLOR_CORRECTION_PLUGIN);
        for kind in stages::output_stages(&self.settings, color_correction) {
            self.graph.register(BuiltinStage::new(kind));
        }
        self.plugins.trigger_hook(Hook::PostStageSetup);
    }

    fn collect_defines(&self) -> ShaderDefines {
        let mut defines = ShaderDefines::new();
        defines.insert(
            "REFERENCE_MODE".into(),
            ShaderDefine::Bool(self.settings.reference_mode),
        );
        defines.insert(
            "HIGH_QUALITY_LIGHTING".into(),
            ShaderDefine::Bool(self.settings.high_quality_lighting),
        );
        defines.extend(self.graph.defines());
        defines.extend(self.plugins.collect_shader_defines());
        defines
    }

    fn skybox_options() -> Result<EffectOptions> {
        ["render_shadow", "render_envmap", "render_voxelize", "alpha_testing", "normal_mapping", "parallax_mapping"]
            .into_iter()
            .try_fold(EffectOptions::new(), |options, name| options.with(name, false))
    }

    /// Compile an effect and bind it to a node
    ///
    /// The binding is only recorded for replay once compilation succeeded.
    pub fn set_effect(
        &mut self,
        node: NodeId,
        source: &str,
        options: EffectOptions,
        sort: i32,
    ) -> Result<Arc<CompiledEffect>> {
        self.scene.check(node)?;
        let effect = self
            .compiler
            .compile(&self.library, self.backend.as_mut(), source, &options)?;
        self.tags.bind(node, &effect, sort);
        self.bindings.push(EffectBinding {
            node,
            source: source.to_string(),
            options,
            sort,
        });
        Ok(effect)
    }

    /// Add or replace an effect description
    ///
    /// Replacing a description that was already compiled drops its cached
    /// programs and replays the bindings, so bound nodes pick up the change.
    pub fn insert_effect(&mut self, id: &str, description: EffectDescription) -> Result<()> {
        let replaced = self.library.contains(id);
        self.library.insert(id, description);
        if !replaced {
            return Ok(());
        }
        self.compiler.invalidate_source(id, self.backend.as_mut());
        if !self.bindings.iter().any(|b| b.source == id) {
            return Ok(());
        }

        log::info!("Effect '{}' changed, rebinding", id);
        self.tags.cleanup_states();
        let bindings = std::mem::take(&mut self.bindings);
        let result = self.replay(&bindings);
        self.bindings = bindings;
        result
    }

    /// Load every effect description of a directory
    pub fn load_effects(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut library = EffectLibrary::new();
        let count = library.load_dir(dir)?;
        for (id, description) in library.into_descriptions() {
            self.insert_effect(&id, description)?;
        }
        Ok(count)
    }

    /// Recompile everything and replay every effect binding
    pub fn reload_shaders(&mut self) -> Result<()> {
        log::info!("Reloading shaders");
        self.tags.cleanup_states();
        self.compiler.invalidate(self.backend.as_mut());

        self.graph.reload_shaders(&mut graph_context!(self))?;
        for manager in &mut self.managers {
            manager.reload_shaders(self.backend.as_mut())?;
        }
        self.plugins.trigger_hook(Hook::ShaderReload);

        let bindings = std::mem::take(&mut self.bindings);
        let result = self.replay(&bindings);
        self.bindings = bindings;
        result
    }

    fn replay(&mut self, bindings: &[EffectBinding]) -> Result<()> {
        log::debug!("Replaying {} effect bindings", bindings.len());
        for binding in bindings {
            let effect = self.compiler.compile(
                &self.library,
                self.backend.as_mut(),
                &binding.source,
                &binding.options,
            )?;
            self.tags.bind(binding.node, &effect, binding.sort);
        }
        Ok(())
    }

    fn reload_plugin(&mut self, id: &str) -> Result<()> {
        if !self.plugins.is_plugin_enabled(id) {
            log::warn!("Invalid plugin id in reload queue: '{}'", id);
            return Ok(());
        }
        let stages = self.graph.reload_owned_by(id, &mut graph_context!(self))?;
        self.plugins.trigger_hook_for(id, Hook::ShaderReload);
        log::info!("Reloaded plugin '{}' ({} stages)", id, stages);
        Ok(())
    }

    /// Advance one frame
    pub fn tick(&mut self, delta_time: f32) -> Result<()> {
        if self.scheduler.state() == RunState::Uninitialized {
            return Err(Error::Graph("Pipeline must be created before ticking".into()));
        }

        for id in self.reload_queue.drain() {
            if let Err(err) = self.reload_plugin(&id) {
                log::error!("Failed to reload plugin '{}': {}", id, err);
            }
        }

        if let Some(size) = self.scheduler.take_resize() {
            self.apply_resize(size)?;
        }

        self.context.advance(delta_time);
        let paused = self.scheduler.is_paused();

        if !paused {
            self.tasks.step();
            for manager in &mut self.managers {
                manager.update(&self.tasks, &self.context)?;
            }
            let dirty = self.probes.take_dirty();
            if !dirty.is_empty() {
                log::trace!("{} environment probes changed", dirty.len());
                self.plugins.update_probes(ENV_PROBES_PLUGIN, &dirty);
            }
        }

        self.plugins.trigger_hook(Hook::PreRenderUpdate);

        if !paused {
            let uniforms = self.frame_uniforms();
            self.backend.write_frame_uniforms(&uniforms);
        }
        self.graph.update(&mut graph_context!(self), paused)?;

        let packet = FramePacket {
            frame: self.context.frame,
            stages: self.graph.stage_names(),
            paused,
        };
        self.backend.submit_frame(&packet);

        self.plugins.trigger_hook(Hook::PostRenderUpdate);
        self.graph.copy_history(self.backend.as_mut());

        if self.scheduler.advance_maintenance(delta_time) {
            log::trace!("Periodic render state cache cleanup");
            self.tags.clear_state_cache();
            self.backend.clear_state_cache();
        }
        Ok(())
    }

    fn frame_uniforms(&self) -> FrameUniforms {
        FrameUniforms {
            frame: self.context.frame as u32,
            delta_time: self.context.delta_time,
            time: self.context.time as f32,
            _pad: 0.0,
            resolution: self.context.resolution.as_vec2().to_array(),
            native_resolution: self.context.native_resolution.as_vec2().to_array(),
        }
    }

    /// Store a window size; it is applied at the start of the next tick
    pub fn notify_window_resized(&mut self, width: u32, height: u32) {
        self.scheduler.request_resize(UVec2::new(width, height));
    }

    fn apply_resize(&mut self, window_size: UVec2) -> Result<()> {
        self.context
            .set_native_resolution(window_size, self.settings.resolution_scale);
        log::info!(
            "Resizing pipeline to {}x{} (render {}x{})",
            self.context.native_resolution.x,
            self.context.native_resolution.y,
            self.context.resolution.x,
            self.context.resolution.y
        );

        self.graph.handle_resize(&mut graph_context!(self))?;
        for manager in &mut self.managers {
            manager.on_resize(&self.context)?;
        }
        self.plugins.trigger_hook(Hook::WindowResized);
        Ok(())
    }

    pub fn enter_menu(&mut self) {
        if self.scheduler.enter_menu() {
            log::info!("Entering menu");
            self.graph.set_paused(true);
        }
    }

    pub fn exit_menu(&mut self) {
        if self.scheduler.exit_menu() {
            log::info!("Exiting menu");
            self.graph.set_paused(false);
        }
    }

    /// New environment probe, or an inert one if probes are disabled
    pub fn add_environment_probe(&mut self) -> Box<dyn EnvironmentProbe> {
        if !self.plugins.is_plugin_enabled(ENV_PROBES_PLUGIN) {
            log::warn!("Environment probes disabled, returning an inert probe");
            return Box::new(InertProbe);
        }
        match self.probes.add_probe() {
            Some(probe) => Box::new(probe),
            None => Box::new(InertProbe),
        }
    }

    /// Producer handle for the plugin file watcher
    ///
    /// `None` unless `auto_reload_plugin_shaders` is set.
    pub fn change_notifier(&self) -> Option<ChangeNotifier> {
        if !self.settings.auto_reload_plugin_shaders {
            log::debug!("Plugin shader auto reload is disabled");
            return None;
        }
        Some(
            self.reload_queue
                .notifier(PluginWatchFilter::from_settings(&self.settings)),
        )
    }

    /// Write every PBR material of the scene to a file
    pub fn export_materials(&self, path: impl AsRef<Path>) -> Result<()> {
        materials::export_to_file(self.scene.materials(), path)
    }

    /// Apply one serialized material line; `false` if no material matched
    pub fn update_serialized_material(&mut self, line: &str) -> Result<bool> {
        let update = SerializedMaterial::parse(line)?;
        if !materials::apply_update(self.scene.materials_mut(), &update) {
            return Ok(false);
        }
        self.tags.clear_state_cache();
        self.backend.clear_state_cache();
        Ok(true)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn state(&self) -> RunState {
        self.scheduler.state()
    }

    pub fn scene(&self) -> &SceneTree {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneTree {
        &mut self.scene
    }

    pub fn effect_library(&self) -> &EffectLibrary {
        &self.library
    }

    pub fn tags(&self) -> &TagDispatcher {
        &self.tags
    }

    pub fn compiler(&self) -> &EffectCompiler {
        &self.compiler
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn tasks(&self) -> &TaskScheduler {
        &self.tasks
    }

    /// Effect bindings in the order they were made
    pub fn bindings(&self) -> &[EffectBinding] {
        &self.bindings
    }

    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.tags.cleanup_states();
        self.compiler.invalidate(self.backend.as_mut());
        self.graph.release_all(self.backend.as_mut());
    }
}
