//! Scene graph arena
//!
//! Nodes live in a flat arena and refer to each other by [`NodeId`]. The parent
//! owns its children: removing a subtree frees every node below it.

use glam::{Mat4, Quat, Vec3};

use crate::gpu::GpuHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Local translation / rotation / scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Anything that holds GPU resources and must hand them back on disposal
pub trait GpuResources {
    /// Call `visit` once for every handle owned, in release order
    fn visit_resources(&self, visit: &mut dyn FnMut(GpuHandle));
}

/// A material plus the texture maps it samples
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialBinding {
    pub material: GpuHandle,
    pub maps: Vec<GpuHandle>,
}

impl MaterialBinding {
    pub fn plain(material: GpuHandle) -> Self {
        Self {
            material,
            maps: Vec::new(),
        }
    }
}

/// One material for the whole mesh, or one per geometry group
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialSlot {
    Single(MaterialBinding),
    Multi(Vec<MaterialBinding>),
}

impl MaterialSlot {
    pub fn bindings(&self) -> &[MaterialBinding] {
        match self {
            MaterialSlot::Single(binding) => std::slice::from_ref(binding),
            MaterialSlot::Multi(bindings) => bindings,
        }
    }
}

/// Joints deforming a skinned mesh, paired with their inverse bind matrices
#[derive(Debug, Clone, PartialEq)]
pub struct Skin {
    pub joints: Vec<NodeId>,
    pub inverse_bind: Vec<Mat4>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshNode {
    pub geometry: GpuHandle,
    pub material: MaterialSlot,
    pub skin: Option<Skin>,
}

impl GpuResources for MeshNode {
    fn visit_resources(&self, visit: &mut dyn FnMut(GpuHandle)) {
        let bindings = self.material.bindings();
        for binding in bindings {
            for map in &binding.maps {
                visit(*map);
            }
        }
        for binding in bindings {
            visit(binding.material);
        }
        visit(self.geometry);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotLight {
    pub color: [f32; 3],
    pub intensity: f32,
    pub range: f32,
    /// Cone half-angle in radians
    pub angle: f32,
    pub penumbra: f32,
    pub target: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightNode {
    pub light: SpotLight,
    pub shadow_map: Option<GpuHandle>,
}

impl GpuResources for LightNode {
    fn visit_resources(&self, visit: &mut dyn FnMut(GpuHandle)) {
        if let Some(shadow_map) = self.shadow_map {
            visit(shadow_map);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh(MeshNode),
    Light(LightNode),
}

impl GpuResources for NodeKind {
    fn visit_resources(&self, visit: &mut dyn FnMut(GpuHandle)) {
        match self {
            NodeKind::Group => {}
            NodeKind::Mesh(mesh) => mesh.visit_resources(visit),
            NodeKind::Light(light) => light.visit_resources(visit),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    pub transform: Transform,
    pub kind: NodeKind,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub visible: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            name: None,
            transform: Transform::IDENTITY,
            kind,
            cast_shadow: false,
            receive_shadow: false,
            visible: true,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn group() -> Self {
        Self::new(NodeKind::Group)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_mesh(&self) -> bool {
        matches!(self.kind, NodeKind::Mesh(_))
    }
}

impl GpuResources for Node {
    fn visit_resources(&self, visit: &mut dyn FnMut(GpuHandle)) {
        self.kind.visit_resources(visit)
    }
}

#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: Vec<Option<Node>>,
    root: NodeId,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node::group().named("scene"))],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Insert `node` as the last child of `parent`. A dangling parent attaches to the root.
    pub fn add_child(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let parent = if self.contains(parent) { parent } else { self.root };
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        node.children.clear();
        self.nodes.push(Some(node));
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    /// Node ids below `id` (inclusive) in depth-first pre-order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Remove a subtree; returns how many nodes were freed. The root cannot be removed.
    pub fn remove_subtree(&mut self, id: NodeId) -> usize {
        if id == self.root || !self.contains(id) {
            return 0;
        }
        if let Some(parent) = self.get(id).and_then(|n| n.parent) {
            if let Some(p) = self.get_mut(parent) {
                p.children.retain(|c| *c != id);
            }
        }
        let doomed = self.descendants(id);
        for node in &doomed {
            self.nodes[node.0] = None;
        }
        doomed.len()
    }

    /// World matrix of `id` (product of the local transforms from the root down)
    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.get(node_id) else {
                break;
            };
            matrix = node.transform.matrix() * matrix;
            current = node.parent;
        }
        matrix
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.iter()
            .find(|(_, node)| node.name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }

    /// Live nodes in arena order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|node| (NodeId(i), node)))
    }
}
