//! Per-pass binding of compiled effects to scene nodes
//!
//! Every pass has its own camera mask bit. Binding an effect records, for
//! each pass, whether the node is visible there and which program it uses.
//! Records are inherited down the scene tree, and the highest sort wins.

use crate::backend::ShaderHandle;
use crate::effects::{CompiledEffect, Pass};
use crate::scene::{NodeId, SceneTree};
use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::Arc;

bitflags! {
    /// Camera masks of the render passes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PassMask: u32 {
        const GBUFFER = 1 << 0;
        const SHADOW = 1 << 1;
        const VOXELIZE = 1 << 2;
        const ENVMAP = 1 << 3;
        const FORWARD = 1 << 4;
        const FORWARD_PREPASS = 1 << 5;
    }
}

/// Mask bit of a single pass
pub fn mask(pass: Pass) -> PassMask {
    PassMask::from_bits_truncate(1 << pass.index())
}

/// Render state recorded for one node in one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagState {
    pub pass: Pass,
    pub visible: bool,
    pub shader: Option<ShaderHandle>,
    pub sort: i32,
}

/// Binds compiled effects to nodes
#[derive(Debug, Default)]
pub struct TagDispatcher {
    records: HashMap<(NodeId, Pass), Arc<TagState>>,
    /// Identical states are shared between nodes
    state_cache: HashMap<TagState, Arc<TagState>>,
}

impl TagDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an effect's per-pass states on a node
    pub fn bind(&mut self, node: NodeId, effect: &CompiledEffect, sort: i32) {
        for pass in Pass::ALL {
            let state = TagState {
                pass,
                visible: effect.renders(pass),
                shader: effect.shader(pass),
                sort: pass.binding_sort(sort),
            };
            self.apply_state(node, state);
        }
    }

    /// Replace the node's record for the pass unless it has a higher sort
    pub fn apply_state(&mut self, node: NodeId, state: TagState) -> bool {
        if let Some(current) = self.records.get(&(node, state.pass)) {
            if state.sort < current.sort {
                log::trace!(
                    "Ignoring {:?} state for {:?} at sort {} below {}",
                    state.pass,
                    node,
                    state.sort,
                    current.sort
                );
                return false;
            }
        }
        let shared = self
            .state_cache
            .entry(state)
            .or_insert_with(|| Arc::new(state))
            .clone();
        self.records.insert((node, state.pass), shared);
        true
    }

    /// The node's own record for a pass
    pub fn node_state(&self, node: NodeId, pass: Pass) -> Option<&TagState> {
        self.records.get(&(node, pass)).map(Arc::as_ref)
    }

    /// State a node renders with in a pass, taking inheritance into account
    ///
    /// The highest sort among the node and its ancestors wins. On a tie the
    /// node closest to `node` wins.
    pub fn effective_state(&self, scene: &SceneTree, node: NodeId, pass: Pass) -> Option<&TagState> {
        let mut best: Option<&TagState> = None;
        for ancestor in scene.ancestors(node) {
            if let Some(state) = self.node_state(ancestor, pass) {
                if best.map_or(true, |b| state.sort > b.sort) {
                    best = Some(state);
                }
            }
        }
        best
    }

    /// Passes the node is visible in
    pub fn visible_mask(&self, scene: &SceneTree, node: NodeId) -> PassMask {
        Pass::ALL
            .into_iter()
            .filter(|&pass| {
                self.effective_state(scene, node, pass)
                    .is_some_and(|state| state.visible)
            })
            .fold(PassMask::empty(), |acc, pass| acc | mask(pass))
    }

    /// Drop every record and the state cache
    pub fn cleanup_states(&mut self) {
        log::debug!("Cleaning up {} tag records", self.records.len());
        self.records.clear();
        self.state_cache.clear();
    }

    /// Drop only the dedup cache; records keep their states
    pub fn clear_state_cache(&mut self) {
        log::trace!("Clearing {} cached tag states", self.state_cache.len());
        self.state_cache.clear();
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn cached_states(&self) -> usize {
        self.state_cache.len()
    }

    /// Whether two nodes share the same state object for a pass
    pub fn shares_state(&self, a: NodeId, b: NodeId, pass: Pass) -> bool {
        match (self.records.get(&(a, pass)), self.records.get(&(b, pass))) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::effects::{EffectCompiler, EffectLibrary, EffectOptions, DEFAULT_SORT};

    struct Fixture {
        library: EffectLibrary,
        compiler: EffectCompiler,
        backend: HeadlessBackend,
        scene: SceneTree,
        tags: TagDispatcher,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                library: EffectLibrary::with_builtins(),
                compiler: EffectCompiler::new(),
                backend: HeadlessBackend::new(),
                scene: SceneTree::new(),
                tags: TagDispatcher::new(),
            }
        }

        fn bind(&mut self, node: NodeId, options: EffectOptions, sort: i32) -> Arc<CompiledEffect> {
            let effect = self
                .compiler
                .compile(&self.library, &mut self.backend, "default", &options)
                .unwrap();
            self.tags.bind(node, &effect, sort);
            effect
        }
    }

    #[test]
    fn test_masks_are_independent() {
        let all = Pass::ALL.into_iter().fold(PassMask::empty(), |acc, p| acc | mask(p));
        assert_eq!(all, PassMask::all());
        assert_eq!(mask(Pass::Shadow), PassMask::SHADOW);
    }

    #[test]
    fn test_disabled_pass_hides_node() {
        let mut f = Fixture::new();
        let crate_node = f.scene.attach(f.scene.root(), "crate").unwrap();
        let no_shadow = EffectOptions::new().with("render_shadow", false).unwrap();
        f.bind(crate_node, no_shadow, DEFAULT_SORT);

        let visible = f.tags.visible_mask(&f.scene, crate_node);
        assert!(!visible.contains(PassMask::SHADOW));
        assert!(visible.contains(PassMask::GBUFFER));
        assert!(!visible.contains(PassMask::FORWARD));
    }

    #[test]
    fn test_object_bind_overrides_scene_default() {
        let mut f = Fixture::new();
        let root = f.scene.root();
        let tree = f.scene.attach(root, "tree").unwrap();
        let rock = f.scene.attach(root, "rock").unwrap();

        f.bind(root, EffectOptions::new(), -10);
        let no_shadow = EffectOptions::new().with("render_shadow", false).unwrap();
        f.bind(tree, no_shadow, DEFAULT_SORT);

        assert!(!f.tags.visible_mask(&f.scene, tree).contains(PassMask::SHADOW));
        assert!(f.tags.visible_mask(&f.scene, rock).contains(PassMask::SHADOW));
        assert_eq!(
            f.tags.effective_state(&f.scene, tree, Pass::Shadow).map(|s| s.sort),
            Some(65)
        );
    }

    #[test]
    fn test_lower_sort_is_ignored() {
        let mut f = Fixture::new();
        let node = f.scene.attach(f.scene.root(), "node").unwrap();
        let no_shadow = EffectOptions::new().with("render_shadow", false).unwrap();

        f.bind(node, no_shadow, 100);
        f.bind(node, EffectOptions::new(), DEFAULT_SORT);
        assert!(!f.tags.visible_mask(&f.scene, node).contains(PassMask::SHADOW));

        // equal sort replaces
        f.bind(node, EffectOptions::new(), 100);
        assert!(f.tags.visible_mask(&f.scene, node).contains(PassMask::SHADOW));
    }

    #[test]
    fn test_tie_goes_to_deepest_node() {
        let mut f = Fixture::new();
        let parent = f.scene.attach(f.scene.root(), "parent").unwrap();
        let child = f.scene.attach(parent, "child").unwrap();

        f.bind(parent, EffectOptions::new(), DEFAULT_SORT);
        let no_envmap = EffectOptions::new().with("render_envmap", false).unwrap();
        f.bind(child, no_envmap, DEFAULT_SORT);

        assert!(!f.tags.visible_mask(&f.scene, child).contains(PassMask::ENVMAP));
        assert!(f.tags.visible_mask(&f.scene, parent).contains(PassMask::ENVMAP));
    }

    #[test]
    fn test_states_are_shared_and_cache_clear_keeps_records() {
        let mut f = Fixture::new();
        let a = f.scene.attach(f.scene.root(), "a").unwrap();
        let b = f.scene.attach(f.scene.root(), "b").unwrap();
        let effect = f.bind(a, EffectOptions::new(), DEFAULT_SORT);
        f.tags.bind(b, &effect, DEFAULT_SORT);

        assert!(f.tags.shares_state(a, b, Pass::Gbuffer));
        assert_eq!(f.tags.cached_states(), Pass::ALL.len());

        f.tags.clear_state_cache();
        assert_eq!(f.tags.cached_states(), 0);
        assert_eq!(f.tags.record_count(), 2 * Pass::ALL.len());

        f.tags.cleanup_states();
        assert_eq!(f.tags.record_count(), 0);
        assert_eq!(f.tags.visible_mask(&f.scene, a), PassMask::empty());
    }
}
