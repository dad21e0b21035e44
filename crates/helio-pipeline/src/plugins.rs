//! Plugin interface and hook dispatch

use crate::backend::ShaderDefines;
use crate::config::PipelineSettings;
use crate::graph::RenderStage;
use crate::probes::ProbeState;

/// Pipeline lifecycle points broadcast to every enabled plugin
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Plugin stages are being collected
    StageSetup,
    /// All stages are registered, before the graph is resolved
    PostStageSetup,
    /// The pipeline finished startup
    PipelineCreated,
    ShaderReload,
    WindowResized,
    PreRenderUpdate,
    PostRenderUpdate,
}

/// Plugin trait - implemented by optional pipeline extensions
///
/// **Lifecycle:**
/// 1. `create_stages()` - once, during stage setup
/// 2. `shader_defines()` - once, before the graph is created
/// 3. `on_hook()` - at every lifecycle point, in plugin registration order
pub trait Plugin: Send {
    /// Unique id, also the plugin's directory name under the plugins root
    fn id(&self) -> &str;

    /// Stages this plugin adds to the graph
    fn create_stages(&mut self, settings: &PipelineSettings) -> Vec<Box<dyn RenderStage>> {
        let _ = settings;
        Vec::new()
    }

    /// Shader constants added to every program
    fn shader_defines(&self) -> ShaderDefines {
        ShaderDefines::new()
    }

    fn on_hook(&mut self, hook: Hook) {
        let _ = hook;
    }

    /// Environment probes that changed since the last frame
    ///
    /// Only the plugin owning probe rendering receives these.
    fn update_probes(&mut self, probes: &[ProbeState]) {
        let _ = probes;
    }

    /// Disabled plugins get no hooks and contribute nothing
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Ordered set of plugins
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for fluent API
    pub fn builder() -> PluginManagerBuilder {
        PluginManagerBuilder::new()
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        log::debug!("Registered plugin '{}'", plugin.id());
        self.plugins.push(plugin);
    }

    pub fn is_plugin_enabled(&self, id: &str) -> bool {
        self.plugins.iter().any(|p| p.id() == id && p.is_enabled())
    }

    /// Ids of the enabled plugins, in registration order
    pub fn enabled_ids(&self) -> Vec<String> {
        self.enabled().map(|p| p.id().to_string()).collect()
    }

    fn enabled(&self) -> impl Iterator<Item = &(dyn Plugin + 'static)> {
        self.plugins.iter().map(|p| p.as_ref()).filter(|p| p.is_enabled())
    }

    /// Send a hook to every enabled plugin
    pub fn trigger_hook(&mut self, hook: Hook) {
        log::trace!("Triggering hook {:?}", hook);
        for plugin in self.plugins.iter_mut().filter(|p| p.is_enabled()) {
            plugin.on_hook(hook);
        }
    }

    /// Send a hook to one plugin, returning `false` if it is unknown or disabled
    pub fn trigger_hook_for(&mut self, id: &str, hook: Hook) -> bool {
        match self
            .plugins
            .iter_mut()
            .find(|p| p.id() == id && p.is_enabled())
        {
            Some(plugin) => {
                plugin.on_hook(hook);
                true
            }
            None => false,
        }
    }

    /// Hand changed probes to one plugin, returning `false` if it is unknown or disabled
    pub fn update_probes(&mut self, id: &str, probes: &[ProbeState]) -> bool {
        match self
            .plugins
            .iter_mut()
            .find(|p| p.id() == id && p.is_enabled())
        {
            Some(plugin) => {
                plugin.update_probes(probes);
                true
            }
            None => false,
        }
    }

    /// Stages of every enabled plugin, tagged with the owning plugin id
    pub fn collect_stages(&mut self, settings: &PipelineSettings) -> Vec<(String, Box<dyn RenderStage>)> {
        let mut stages = Vec::new();
        for plugin in self.plugins.iter_mut().filter(|p| p.is_enabled()) {
            let id = plugin.id().to_string();
            for stage in plugin.create_stages(settings) {
                stages.push((id.clone(), stage));
            }
        }
        stages
    }

    /// Shader defines from all enabled plugins
    pub fn collect_shader_defines(&self) -> ShaderDefines {
        let mut defines = ShaderDefines::new();
        for plugin in self.enabled() {
            defines.extend(plugin.shader_defines());
        }
        defines
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Builder for PluginManager
pub struct PluginManagerBuilder {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginManagerBuilder {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn build(self) -> PluginManager {
        let mut manager = PluginManager::new();
        for plugin in self.plugins {
            manager.register(plugin);
        }
        manager
    }
}

impl Default for PluginManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
