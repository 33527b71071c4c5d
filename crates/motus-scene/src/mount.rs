//! Attaching a loaded asset to the scene
//!
//! Uploads go textures, then materials, then geometries. Nothing is added to
//! the graph until every upload succeeded; on failure the handles created so
//! far are released and the graph is left untouched.

use glam::{Quat, Vec3};
use motus_core::config::ModelSettings;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::dispose::ReleaseSink;
use crate::gpu::{GpuHandle, MaterialData, RenderError, Renderer, ResourceLedger, TextureMaps};
use crate::graph::{MaterialBinding, MaterialSlot, MeshNode, Node, NodeId, NodeKind, SceneGraph, Skin, Transform};
use crate::loader::LoadedAsset;

pub const MODEL_ROOT_NODE: &str = "model";

/// Result of a successful mount
#[derive(Debug, Clone, PartialEq)]
pub struct MountedModel {
    pub root: NodeId,
    /// Asset node index to the scene node it became
    pub bindings: HashMap<usize, NodeId>,
    pub mesh_nodes: usize,
    pub uploads: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MountOutcome {
    Mounted(MountedModel),
    AlreadyMounted,
}

/// Holds at most one model per load generation
#[derive(Debug, Default)]
pub struct ModelSlot {
    mounted: Option<(u64, NodeId)>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.mounted.map(|(_, root)| root)
    }

    pub fn is_mounted(&self, generation: u64) -> bool {
        self.mounted.is_some_and(|(g, _)| g == generation)
    }

    /// Upload `asset` and attach it under a new model root. A second call for the
    /// same generation does nothing.
    pub fn mount<R: Renderer>(
        &mut self,
        generation: u64,
        asset: &LoadedAsset,
        settings: &ModelSettings,
        graph: &mut SceneGraph,
        ledger: &mut ResourceLedger<R>,
    ) -> Result<MountOutcome, RenderError> {
        if self.is_mounted(generation) {
            debug!(generation, "Model already mounted");
            return Ok(MountOutcome::AlreadyMounted);
        }

        let mut created = Vec::new();
        let uploaded = match upload(asset, ledger, &mut created) {
            Ok(uploaded) => uploaded,
            Err(e) => {
                let released = created.iter().filter(|h| ledger.release(**h)).count();
                warn!(
                    generation,
                    released,
                    error = %e,
                    "Model upload failed, rolled back"
                );
                return Err(e);
            }
        };

        let root = graph.add_child(
            graph.root(),
            Node::group().named(MODEL_ROOT_NODE).with_transform(Transform {
                translation: Vec3::from(settings.offset),
                rotation: Quat::from_rotation_x(settings.rotation_x_degrees.to_radians()),
                scale: Vec3::splat(settings.scale),
            }),
        );
        let (bindings, mesh_nodes) = instantiate(asset, &uploaded, graph, root);
        bind_skins(asset, &bindings, graph);

        self.mounted = Some((generation, root));
        info!(
            generation,
            nodes = bindings.len(),
            meshes = mesh_nodes,
            uploads = created.len(),
            "Mounted model"
        );
        Ok(MountOutcome::Mounted(MountedModel {
            root,
            bindings,
            mesh_nodes,
            uploads: created.len(),
        }))
    }
}

struct Uploaded {
    /// Per material, plus one trailing default material when a primitive has none
    materials: Vec<MaterialBinding>,
    default_material: Option<usize>,
    /// Per mesh, per primitive
    geometries: Vec<Vec<GpuHandle>>,
}

fn upload<R: Renderer>(
    asset: &LoadedAsset,
    ledger: &mut ResourceLedger<R>,
    created: &mut Vec<GpuHandle>,
) -> Result<Uploaded, RenderError> {
    let mut textures = Vec::with_capacity(asset.textures.len());
    for texture in &asset.textures {
        let handle = ledger.create_texture(texture)?;
        created.push(handle);
        textures.push(handle);
    }

    let mut materials = Vec::with_capacity(asset.materials.len() + 1);
    for material in &asset.materials {
        let texture = |slot: Option<usize>| slot.and_then(|i| textures.get(i).copied());
        let maps = TextureMaps {
            base_color: texture(material.base_color_texture),
            metallic_roughness: texture(material.metallic_roughness_texture),
            normal: texture(material.normal_texture),
            occlusion: texture(material.occlusion_texture),
            emissive: texture(material.emissive_texture),
        };
        let handle = ledger.create_material(material, &maps)?;
        created.push(handle);
        materials.push(MaterialBinding {
            material: handle,
            maps: unique(maps.handles()),
        });
    }

    let needs_default = asset
        .meshes
        .iter()
        .flat_map(|m| &m.primitives)
        .any(|p| p.material.is_none_or(|i| i >= asset.materials.len()));
    let default_material = if needs_default {
        let handle = ledger.create_material(&MaterialData::default(), &TextureMaps::default())?;
        created.push(handle);
        materials.push(MaterialBinding::plain(handle));
        Some(materials.len() - 1)
    } else {
        None
    };

    let mut geometries = Vec::with_capacity(asset.meshes.len());
    for mesh in &asset.meshes {
        let mut handles = Vec::with_capacity(mesh.primitives.len());
        for primitive in &mesh.primitives {
            let handle = ledger.create_geometry(&primitive.geometry)?;
            created.push(handle);
            handles.push(handle);
        }
        geometries.push(handles);
    }

    Ok(Uploaded {
        materials,
        default_material,
        geometries,
    })
}

fn unique(handles: Vec<GpuHandle>) -> Vec<GpuHandle> {
    let mut seen = HashSet::new();
    handles.into_iter().filter(|h| seen.insert(*h)).collect()
}

fn mesh_node(geometry: GpuHandle, material: MaterialBinding) -> Node {
    let mut node = Node::new(NodeKind::Mesh(MeshNode {
        geometry,
        material: MaterialSlot::Single(material),
        skin: None,
    }));
    node.cast_shadow = true;
    node.receive_shadow = true;
    node
}

/// Build the asset's node tree under `root`. A mesh with several primitives
/// becomes a group with one mesh child per primitive.
fn instantiate(
    asset: &LoadedAsset,
    uploaded: &Uploaded,
    graph: &mut SceneGraph,
    root: NodeId,
) -> (HashMap<usize, NodeId>, usize) {
    let mut bindings = HashMap::new();
    let mut mesh_nodes = 0;
    let mut stack: Vec<(usize, NodeId)> = asset.roots.iter().rev().map(|r| (*r, root)).collect();

    while let Some((index, parent)) = stack.pop() {
        let Some(asset_node) = asset.nodes.get(index) else {
            warn!(node = index, "Model references a missing node");
            continue;
        };
        if bindings.contains_key(&index) {
            warn!(node = index, "Model node reached twice, skipping");
            continue;
        }

        let binding_for = |material: Option<usize>| {
            material
                .filter(|i| *i < asset.materials.len())
                .or(uploaded.default_material)
                .and_then(|i| uploaded.materials.get(i).cloned())
        };
        let primitives = asset_node
            .mesh
            .and_then(|m| Some((asset.meshes.get(m)?, uploaded.geometries.get(m)?)));

        let mut node = match primitives {
            Some((mesh, geometries)) if mesh.primitives.len() == 1 => {
                match binding_for(mesh.primitives[0].material) {
                    Some(binding) => {
                        mesh_nodes += 1;
                        mesh_node(geometries[0], binding)
                    }
                    None => Node::group(),
                }
            }
            _ => Node::group(),
        };
        node.name = asset_node.name.clone();
        node.transform = asset_node.transform;
        let id = graph.add_child(parent, node);
        bindings.insert(index, id);

        if let Some((mesh, geometries)) = primitives.filter(|(mesh, _)| mesh.primitives.len() > 1) {
            for (primitive, geometry) in mesh.primitives.iter().zip(geometries) {
                if let Some(binding) = binding_for(primitive.material) {
                    graph.add_child(id, mesh_node(*geometry, binding));
                    mesh_nodes += 1;
                }
            }
        }

        for child in asset_node.children.iter().rev() {
            stack.push((*child, id));
        }
    }
    (bindings, mesh_nodes)
}

fn bind_skins(asset: &LoadedAsset, bindings: &HashMap<usize, NodeId>, graph: &mut SceneGraph) {
    for (index, asset_node) in asset.nodes.iter().enumerate() {
        let (Some(skin), Some(node)) = (
            asset_node.skin.and_then(|s| asset.skins.get(s)),
            bindings.get(&index),
        ) else {
            continue;
        };
        let joints: Option<Vec<NodeId>> = skin.joints.iter().map(|j| bindings.get(j).copied()).collect();
        let Some(joints) = joints else {
            warn!(node = index, "Skin joint outside the mounted model, rendering unskinned");
            continue;
        };
        let skin = Skin {
            joints,
            inverse_bind: skin.inverse_bind.clone(),
        };
        let targets: Vec<NodeId> = match graph.get(*node) {
            Some(n) if n.is_mesh() => vec![*node],
            Some(n) => n.children().to_vec(),
            None => continue,
        };
        for target in targets {
            if let Some(NodeKind::Mesh(mesh)) = graph.get_mut(target).map(|n| &mut n.kind) {
                mesh.skin = Some(skin.clone());
            }
        }
    }
}
