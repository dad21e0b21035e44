//! Stage graph with automatic dependency resolution
//!
//! Stages declare the pipes they read and write. The graph orders them so
//! every producer runs before its consumers, creates their targets in that
//! order, and reallocates them in the same order when the window resizes.

mod pipe;
mod stage;

pub use pipe::{previous_frame_source, PipeEntry, PipeRegistry, PREVIOUS_FRAME_PREFIX};
pub use stage::{ProducedPipe, RenderStage, StageContext, StageDeclaration};

use crate::backend::{RenderBackend, ShaderDefines, TargetDesc};
use crate::config::PipelineSettings;
use crate::context::PipelineContext;
use crate::{Error, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

/// Stage identifier, equal to the registration index
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct StageId(pub usize);

/// Context for graph-wide operations
pub struct GraphContext<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub context: &'a PipelineContext,
    pub settings: &'a PipelineSettings,
    pub defines: &'a ShaderDefines,
    /// Names of inputs supplied from outside the graph
    pub inputs: &'a HashSet<String>,
}

struct StageNode {
    stage: Box<dyn RenderStage>,
    name: String,
    decl: StageDeclaration,
    owner: Option<String>,
    produced: Vec<ProducedPipe>,
}

/// Render stage graph for automatic stage ordering and target management
pub struct StageGraph {
    stages: Vec<StageNode>,
    execution_order: Vec<usize>,
    history_sources: Vec<String>,
    pipes: PipeRegistry,
    created: bool,
}

impl StageGraph {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            execution_order: Vec::new(),
            history_sources: Vec::new(),
            pipes: PipeRegistry::new(),
            created: false,
        }
    }

    /// Add a stage owned by the pipeline
    pub fn register(&mut self, stage: impl RenderStage + 'static) -> StageId {
        self.register_boxed(Box::new(stage), None)
    }

    /// Add a stage owned by a plugin, so it can be reloaded on its own
    pub fn register_owned(&mut self, stage: Box<dyn RenderStage>, owner: &str) -> StageId {
        self.register_boxed(stage, Some(owner.to_string()))
    }

    fn register_boxed(&mut self, stage: Box<dyn RenderStage>, owner: Option<String>) -> StageId {
        let id = StageId(self.stages.len());
        let mut decl = StageDeclaration::new();
        stage.declare(&mut decl);
        let name = stage.name().to_string();
        log::debug!(
            "Registered stage '{}' (pipes: {:?}, produces: {:?})",
            name,
            decl.pipes,
            decl.produces
        );
        self.stages.push(StageNode {
            stage,
            name,
            decl,
            owner,
            produced: Vec::new(),
        });
        id
    }

    /// Resolve dependencies and determine execution order
    ///
    /// Inactive stages are skipped. Stages without an ordering constraint
    /// between them keep their registration order. Fails before anything is
    /// allocated if a required pipe has no producer or the stages form a cycle.
    pub fn resolve(&mut self) -> Result<Vec<StageId>> {
        let n = self.stages.len();
        let active: Vec<usize> = (0..n).filter(|&i| self.stages[i].stage.is_active()).collect();
        log::info!("Resolving stage graph with {} of {} stages active", active.len(), n);

        // Producer chain per pipe: one primary producer followed by the
        // pass-through stages in registration order
        let mut chains: HashMap<&str, Vec<usize>> = HashMap::new();
        for &i in &active {
            let decl = &self.stages[i].decl;
            for pipe in decl.produces.iter().filter(|p| !decl.is_pass_through(p)) {
                let chain = chains.entry(pipe.as_str()).or_default();
                if let Some(&first) = chain.first() {
                    return Err(Error::DuplicateProducer {
                        pipe: pipe.clone(),
                        first: self.stages[first].name.clone(),
                        second: self.stages[i].name.clone(),
                    });
                }
                chain.push(i);
            }
        }
        for &i in &active {
            let decl = &self.stages[i].decl;
            for pipe in decl.produces.iter().filter(|p| decl.is_pass_through(p)) {
                match chains.get_mut(pipe.as_str()) {
                    Some(chain) => chain.push(i),
                    None => {
                        return Err(Error::UnsatisfiedPipe {
                            stage: self.stages[i].name.clone(),
                            pipe: pipe.clone(),
                        })
                    }
                }
            }
        }

        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut history_sources = Vec::new();
        for &i in &active {
            for pipe in &self.stages[i].decl.pipes {
                let history = previous_frame_source(pipe);
                let source = history.unwrap_or(pipe);
                let chain = chains.get(source).ok_or_else(|| Error::UnsatisfiedPipe {
                    stage: self.stages[i].name.clone(),
                    pipe: pipe.clone(),
                })?;

                // Last frame's contents carry no ordering constraint
                if history.is_some() {
                    if !history_sources.iter().any(|s: &String| s == source) {
                        history_sources.push(source.to_string());
                    }
                    continue;
                }

                let producer = match chain.iter().position(|&s| s == i) {
                    Some(k) if k > 0 => chain[k - 1],
                    Some(_) => continue,
                    None => chain[chain.len() - 1],
                };
                deps[i].insert(producer);
            }
        }

        // Topological sort (Kahn's algorithm, smallest registration index first)
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &i in &active {
            for &d in &deps[i] {
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = active
            .iter()
            .filter(|&&i| in_degree[i] == 0)
            .map(|&i| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(active.len());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != active.len() {
            return Err(Error::Graph(self.describe_cycles(&active, &deps)));
        }

        for (i, &idx) in order.iter().enumerate() {
            log::debug!("  Stage {}: {}", i, self.stages[idx].name);
        }

        self.execution_order = order;
        self.history_sources = history_sources;
        Ok(self.order())
    }

    fn describe_cycles(&self, active: &[usize], deps: &[BTreeSet<usize>]) -> String {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: HashMap<usize, NodeIndex> =
            active.iter().map(|&i| (i, graph.add_node(i))).collect();
        for &i in active {
            for d in &deps[i] {
                if let (Some(&from), Some(&to)) = (nodes.get(d), nodes.get(&i)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let cycles: Vec<String> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut names: Vec<&str> = component
                    .iter()
                    .map(|&ix| self.stages[graph[ix]].name.as_str())
                    .collect();
                names.sort_unstable();
                names.join(", ")
            })
            .collect();

        format!("Cyclic dependency between stages: [{}]", cycles.join("], ["))
    }

    /// Resolve, check external inputs, then create every active stage in order
    pub fn setup(&mut self, ctx: &mut GraphContext) -> Result<()> {
        if self.created {
            return Err(Error::Graph("Stage graph was already set up".into()));
        }

        self.resolve()?;

        for &idx in &self.execution_order {
            let node = &self.stages[idx];
            if let Some(input) = node.decl.inputs.iter().find(|i| !ctx.inputs.contains(*i)) {
                return Err(Error::MissingInput {
                    stage: node.name.clone(),
                    input: input.clone(),
                });
            }
        }

        for idx in self.execution_order.clone() {
            self.with_stage(idx, ctx, |stage, sctx| stage.create(sctx))?;

            let node = &self.stages[idx];
            for pipe in &node.decl.produces {
                if !node.produced.iter().any(|p| &p.name == pipe) {
                    return Err(Error::Graph(format!(
                        "Stage '{}' declared pipe '{}' but did not produce it",
                        node.name, pipe
                    )));
                }
            }
            if let Some(extra) = node
                .produced
                .iter()
                .find(|p| !node.decl.produces.contains(&p.name))
            {
                return Err(Error::Graph(format!(
                    "Stage '{}' produced undeclared pipe '{}'",
                    node.name, extra.name
                )));
            }
            publish_outputs(&mut self.pipes, idx, &node.produced);
        }

        self.allocate_history(ctx.backend)?;
        self.created = true;
        log::info!("Stage graph set up with {} stages", self.execution_order.len());
        Ok(())
    }

    /// Reallocate every produced target at the current resolution
    ///
    /// Runs in execution order so a consumer's `resize` sees the final size
    /// of every pipe it reads.
    pub fn handle_resize(&mut self, ctx: &mut GraphContext) -> Result<()> {
        if !self.created {
            return Ok(());
        }
        log::info!(
            "Resizing stage targets to {}x{}",
            ctx.context.resolution.x,
            ctx.context.resolution.y
        );

        for idx in self.execution_order.clone() {
            for produced in &mut self.stages[idx].produced {
                let size = produced
                    .desc
                    .resolve_size(ctx.context.resolution, ctx.context.native_resolution);
                if size == produced.size {
                    continue;
                }
                ctx.backend.release_target(produced.handle);
                produced.handle = ctx.backend.create_target(&produced.desc, size)?;
                produced.size = size;
            }

            self.with_stage(idx, ctx, |stage, sctx| stage.resize(sctx))?;
            publish_outputs(&mut self.pipes, idx, &self.stages[idx].produced);
        }

        self.allocate_history(ctx.backend)
    }

    /// Recompile the shaders of every active stage
    pub fn reload_shaders(&mut self, ctx: &mut GraphContext) -> Result<()> {
        for idx in self.execution_order.clone() {
            self.with_stage(idx, ctx, |stage, sctx| stage.reload_shaders(sctx))?;
        }
        Ok(())
    }

    /// Recompile the shaders of the stages a plugin registered
    pub fn reload_owned_by(&mut self, owner: &str, ctx: &mut GraphContext) -> Result<usize> {
        let owned: Vec<usize> = self
            .execution_order
            .iter()
            .copied()
            .filter(|&idx| self.stages[idx].owner.as_deref() == Some(owner))
            .collect();
        for &idx in &owned {
            self.with_stage(idx, ctx, |stage, sctx| stage.reload_shaders(sctx))?;
        }
        Ok(owned.len())
    }

    /// Update per-frame inputs of every active stage
    ///
    /// While paused only stages that opt into menu updates run.
    pub fn update(&mut self, ctx: &mut GraphContext, paused: bool) -> Result<()> {
        for idx in self.execution_order.clone() {
            if paused && !self.stages[idx].stage.updates_while_paused() {
                continue;
            }
            self.with_stage(idx, ctx, |stage, sctx| stage.update(sctx))?;
        }
        Ok(())
    }

    /// Copy this frame's pipes into their `PreviousFrame::` targets
    pub fn copy_history(&self, backend: &mut dyn RenderBackend) {
        for (name, history) in self.pipes.history() {
            if let Some(current) = self.pipes.get(name) {
                backend.copy_target(current.handle, history.handle);
            }
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        for node in &mut self.stages {
            node.stage.set_paused(paused);
        }
    }

    /// Shader constants contributed by all registered stages
    pub fn defines(&self) -> ShaderDefines {
        let mut defines = ShaderDefines::new();
        for node in &self.stages {
            defines.extend(node.stage.shader_defines());
        }
        defines
    }

    /// Free every target the graph allocated
    pub fn release_all(&mut self, backend: &mut dyn RenderBackend) {
        for node in &mut self.stages {
            node.stage.release(backend);
            for produced in node.produced.drain(..) {
                backend.release_target(produced.handle);
            }
        }
        for (_, history) in self.pipes.history() {
            backend.release_target(history.handle);
        }
        self.pipes.clear();
        self.created = false;
    }

    fn allocate_history(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        for source in &self.history_sources {
            let Some(current) = self.pipes.get(source) else {
                continue;
            };
            let (desc, size) = (current.desc.clone(), current.size);

            if let Some(existing) = self.pipes.get(&format!("{}{}", PREVIOUS_FRAME_PREFIX, source)) {
                if existing.size == size {
                    continue;
                }
            }

            let history_desc = TargetDesc {
                label: format!("{}{}", PREVIOUS_FRAME_PREFIX, desc.label),
                ..desc
            };
            let handle = backend.create_target(&history_desc, size)?;
            let previous = self.pipes.set_history(
                source,
                PipeEntry {
                    handle,
                    desc: history_desc,
                    size,
                    producer: None,
                },
            );
            if let Some(previous) = previous {
                backend.release_target(previous.handle);
            }
        }
        Ok(())
    }

    fn with_stage<R>(
        &mut self,
        idx: usize,
        ctx: &mut GraphContext,
        f: impl FnOnce(&mut dyn RenderStage, &mut StageContext) -> Result<R>,
    ) -> Result<R> {
        let StageNode {
            stage,
            name,
            produced,
            ..
        } = &mut self.stages[idx];
        let mut sctx = StageContext {
            backend: &mut *ctx.backend,
            context: ctx.context,
            settings: ctx.settings,
            defines: ctx.defines,
            pipes: &self.pipes,
            produced,
            stage: StageId(idx),
            stage_name: name.as_str(),
        };
        f(stage.as_mut(), &mut sctx)
    }

    /// Resolved execution order
    pub fn order(&self) -> Vec<StageId> {
        self.execution_order.iter().map(|&i| StageId(i)).collect()
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<String> {
        self.execution_order
            .iter()
            .map(|&i| self.stages[i].name.clone())
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<StageId> {
        self.stages.iter().position(|n| n.name == name).map(StageId)
    }

    pub fn name(&self, id: StageId) -> Option<&str> {
        self.stages.get(id.0).map(|n| n.name.as_str())
    }

    pub fn declaration(&self, id: StageId) -> Option<&StageDeclaration> {
        self.stages.get(id.0).map(|n| &n.decl)
    }

    pub fn pipes(&self) -> &PipeRegistry {
        &self.pipes
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn publish_outputs(pipes: &mut PipeRegistry, idx: usize, produced: &[ProducedPipe]) {
    for p in produced {
        pipes.publish(
            &p.name,
            PipeEntry {
                handle: p.handle,
                desc: p.desc.clone(),
                size: p.size,
                producer: Some(StageId(idx)),
            },
        );
    }
}
