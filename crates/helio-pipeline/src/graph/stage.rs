//! Render stage trait and the context handed to its hooks

use super::pipe::{PipeEntry, PipeRegistry};
use super::StageId;
use crate::backend::{
    RenderBackend, ShaderDefines, ShaderHandle, ShaderRequest, TargetDesc, TargetHandle,
};
use crate::config::PipelineSettings;
use crate::context::PipelineContext;
use crate::{Error, Result};
use glam::UVec2;

/// Render stage trait - implemented by built-in and plugin stages
///
/// **Lifecycle:**
/// 1. `declare()` - once, when the stage is registered with the graph
/// 2. `create()` - once, in execution order, after the graph resolved
/// 3. `reload_shaders()` - after `create()` and on every shader reload
/// 4. `update()` - every frame while the pipeline is not paused, or while
///    paused if [`updates_while_paused`](Self::updates_while_paused)
/// 5. `resize()` - after the graph reallocated this stage's targets
/// 6. `release()` - when the graph frees its targets
pub trait RenderStage: Send {
    /// Unique name for this stage
    fn name(&self) -> &str;

    /// Declare external inputs, consumed pipes and produced pipes
    fn declare(&self, decl: &mut StageDeclaration);

    /// Create targets for every declared pipe through [`StageContext::produce`]
    fn create(&mut self, ctx: &mut StageContext) -> Result<()>;

    /// Called once the graph has reallocated this stage's targets
    ///
    /// Producers run before consumers, so [`StageContext::pipe`] already
    /// reports final sizes.
    fn resize(&mut self, ctx: &mut StageContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// (Re)compile this stage's shaders
    fn reload_shaders(&mut self, ctx: &mut StageContext) -> Result<()>;

    /// Update per-frame shader inputs
    fn update(&mut self, ctx: &mut StageContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Inactive stages are left out of resolution
    fn is_active(&self) -> bool {
        true
    }

    /// Called when the pipeline enters or leaves the menu
    fn set_paused(&mut self, paused: bool) {
        let _ = paused;
    }

    /// Keep receiving `update` while the pipeline is in a menu
    fn updates_while_paused(&self) -> bool {
        false
    }

    /// Free backend objects the stage holds besides its produced targets
    fn release(&mut self, backend: &mut dyn RenderBackend) {
        let _ = backend;
    }

    /// Shader constants this stage contributes to every program
    fn shader_defines(&self) -> ShaderDefines {
        ShaderDefines::new()
    }
}

/// Builder for declaring stage dependencies
#[derive(Debug, Default, Clone)]
pub struct StageDeclaration {
    pub(crate) inputs: Vec<String>,
    pub(crate) pipes: Vec<String>,
    pub(crate) produces: Vec<String>,
}

impl StageDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input supplied from outside the graph
    pub fn input(&mut self, name: &str) -> &mut Self {
        push_unique(&mut self.inputs, name);
        self
    }

    /// Declare a pipe this stage reads
    pub fn require(&mut self, pipe: &str) -> &mut Self {
        push_unique(&mut self.pipes, pipe);
        self
    }

    /// Declare a pipe this stage writes
    ///
    /// Producing a pipe that is also required makes the stage a pass-through
    /// which rewrites the pipe for everyone after it.
    pub fn produce(&mut self, pipe: &str) -> &mut Self {
        push_unique(&mut self.produces, pipe);
        self
    }

    pub fn required_inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn required_pipes(&self) -> &[String] {
        &self.pipes
    }

    pub fn produced_pipes(&self) -> &[String] {
        &self.produces
    }

    pub fn is_pass_through(&self, pipe: &str) -> bool {
        self.pipes.iter().any(|p| p == pipe) && self.produces.iter().any(|p| p == pipe)
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

/// A target a stage created for one of its pipes
#[derive(Debug, Clone)]
pub struct ProducedPipe {
    pub name: String,
    pub desc: TargetDesc,
    pub handle: TargetHandle,
    pub size: UVec2,
}

/// Context provided to stage hooks
///
/// While a stage hook runs, [`pipe`](Self::pipe) still shows the versions
/// the stage consumes. The stage's own outputs become visible to later
/// stages once the hook returns. `PreviousFrame::` pipes are only available
/// after setup has finished.
pub struct StageContext<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub context: &'a PipelineContext,
    pub settings: &'a PipelineSettings,
    pub defines: &'a ShaderDefines,
    pub(crate) pipes: &'a PipeRegistry,
    pub(crate) produced: &'a mut Vec<ProducedPipe>,
    pub(crate) stage: StageId,
    pub(crate) stage_name: &'a str,
}

impl<'a> StageContext<'a> {
    /// Allocate the target for a produced pipe at its resolved size
    pub fn produce(&mut self, pipe: &str, desc: TargetDesc) -> Result<TargetHandle> {
        let size = desc.resolve_size(self.context.resolution, self.context.native_resolution);
        let handle = self.backend.create_target(&desc, size)?;

        if let Some(existing) = self.produced.iter_mut().find(|p| p.name == pipe) {
            self.backend.release_target(existing.handle);
            existing.desc = desc;
            existing.handle = handle;
            existing.size = size;
        } else {
            self.produced.push(ProducedPipe {
                name: pipe.to_string(),
                desc,
                handle,
                size,
            });
        }
        Ok(handle)
    }

    /// A pipe this stage consumes
    pub fn pipe(&self, name: &str) -> Result<&PipeEntry> {
        self.pipes.get(name).ok_or_else(|| Error::UnsatisfiedPipe {
            stage: self.stage_name.to_string(),
            pipe: name.to_string(),
        })
    }

    /// A target this stage produced
    pub fn produced(&self, pipe: &str) -> Option<&ProducedPipe> {
        self.produced.iter().find(|p| p.name == pipe)
    }

    /// Compile a fullscreen shader with the pipeline's common defines
    pub fn load_shader(&mut self, fragment: &str) -> Result<ShaderHandle> {
        let mut request =
            ShaderRequest::fullscreen(format!("{}:{}", self.stage_name, fragment), fragment);
        request.defines = self.defines.clone();
        self.backend.create_shader(&request)
    }

    /// Load a shader into `slot`, releasing the program it held
    ///
    /// The old program stays in place if compilation fails.
    pub fn replace_shader(
        &mut self,
        slot: &mut Option<ShaderHandle>,
        fragment: &str,
    ) -> Result<ShaderHandle> {
        let handle = self.load_shader(fragment)?;
        if let Some(old) = slot.replace(handle) {
            self.backend.release_shader(old);
        }
        Ok(handle)
    }

    pub fn stage_id(&self) -> StageId {
        self.stage
    }
}
