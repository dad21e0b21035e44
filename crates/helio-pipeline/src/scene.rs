//! Minimal scene hierarchy used for effect inheritance

use crate::materials::Material;
use crate::{Error, Result};

/// Node identifier, stable for the lifetime of the tree
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone)]
struct SceneNode {
    name: String,
    parent: Option<NodeId>,
    material: Option<usize>,
}

/// Parent-linked scene tree plus the materials its geometry uses
#[derive(Debug, Clone)]
pub struct SceneTree {
    nodes: Vec<SceneNode>,
    materials: Vec<Material>,
}

impl SceneTree {
    /// Tree containing only the root node
    pub fn new() -> Self {
        Self {
            nodes: vec![SceneNode {
                name: "render".to_string(),
                parent: None,
                material: None,
            }],
            materials: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Add a child node
    pub fn attach(&mut self, parent: NodeId, name: impl Into<String>) -> Result<NodeId> {
        self.check(parent)?;
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SceneNode {
            name: name.into(),
            parent: Some(parent),
            material: None,
        });
        Ok(id)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0 as usize).and_then(|n| n.parent)
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0 as usize).map(|n| n.name.as_str())
    }

    /// First node with the given name, in creation order
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| NodeId(i as u32))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        (node.0 as usize) < self.nodes.len()
    }

    pub fn check(&self, node: NodeId) -> Result<()> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(Error::UnknownNode(node.0))
        }
    }

    /// The node itself followed by its ancestors up to the root
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let start = self.contains(node).then_some(node);
        std::iter::successors(start, move |&n| self.parent(n))
    }

    /// Number of edges between the node and the root
    pub fn depth(&self, node: NodeId) -> usize {
        self.ancestors(node).count().saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a material, returning its index
    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    /// Assign a registered material to a node
    pub fn set_material(&mut self, node: NodeId, material: usize) -> Result<()> {
        self.check(node)?;
        if material >= self.materials.len() {
            return Err(Error::Material(format!("No material with index {}", material)));
        }
        self.nodes[node.0 as usize].material = Some(material);
        Ok(())
    }

    pub fn material_of(&self, node: NodeId) -> Option<&Material> {
        self.nodes
            .get(node.0 as usize)
            .and_then(|n| n.material)
            .and_then(|i| self.materials.get(i))
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut [Material] {
        &mut self.materials
    }
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}
