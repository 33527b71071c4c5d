//! Renderer and mount point seams, GPU handles, and the resource ledger
//!
//! The pipeline never talks to a graphics API directly. A host (the Bevy web
//! app, or a recording double in tests) implements [`Renderer`] and
//! [`MountPoint`]; everything here is expressed in opaque [`GpuHandle`]s.

use glam::Mat4;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, trace};

use crate::builder::PerspectiveCamera;
use crate::dispose::ReleaseSink;
use crate::graph::{NodeId, NodeKind, SceneGraph, Skin, SpotLight};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Geometry,
    Texture,
    Material,
    ShadowMap,
}

/// Opaque reference to a resource owned by a [`Renderer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle {
    pub kind: ResourceKind,
    pub id: u64,
}

impl GpuHandle {
    pub fn new(kind: ResourceKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for GpuHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("failed to upload {kind:?}: {reason}")]
    Upload { kind: ResourceKind, reason: String },
    #[error("mount point unavailable: {0}")]
    Mount(String),
    #[error("renderer already released")]
    Released,
}

/// Drawable size of the mount point in physical pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height; a zero height yields 1.0
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// CPU-side vertex data ready for upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Option<Vec<u32>>,
    pub joints: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
}

impl GeometryData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        }
    }
}

/// Encoded image bytes (PNG / JPEG); decoding is the renderer's job
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Colour data (base colour, emissive) as opposed to linear data
    pub srgb: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

/// PBR material parameters; texture slots index into the asset's texture list
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    pub name: Option<String>,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: [f32; 3],
    pub double_sided: bool,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub base_color_texture: Option<usize>,
    pub metallic_roughness_texture: Option<usize>,
    pub normal_texture: Option<usize>,
    pub occlusion_texture: Option<usize>,
    pub emissive_texture: Option<usize>,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            name: None,
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 1.0,
            emissive: [0.0, 0.0, 0.0],
            double_sided: false,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            base_color_texture: None,
            metallic_roughness_texture: None,
            normal_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
        }
    }
}

impl MaterialData {
    /// Texture indices referenced by this material
    pub fn texture_slots(&self) -> impl Iterator<Item = usize> {
        [
            self.base_color_texture,
            self.metallic_roughness_texture,
            self.normal_texture,
            self.occlusion_texture,
            self.emissive_texture,
        ]
        .into_iter()
        .flatten()
    }
}

/// Uploaded texture handles for each material slot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TextureMaps {
    pub base_color: Option<GpuHandle>,
    pub metallic_roughness: Option<GpuHandle>,
    pub normal: Option<GpuHandle>,
    pub occlusion: Option<GpuHandle>,
    pub emissive: Option<GpuHandle>,
}

impl TextureMaps {
    pub fn handles(&self) -> Vec<GpuHandle> {
        [
            self.base_color,
            self.metallic_roughness,
            self.normal,
            self.occlusion,
            self.emissive,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// What the renderer needs to draw one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub clear_color: [f32; 3],
    pub camera: PerspectiveCamera,
    pub view: Mat4,
    pub projection: Mat4,
    pub draws: Vec<DrawItem>,
    pub lights: Vec<LightItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub node: NodeId,
    pub geometry: GpuHandle,
    pub materials: Vec<GpuHandle>,
    pub world: Mat4,
    /// Joint matrices (joint world times inverse bind), empty for rigid meshes
    pub joints: Vec<Mat4>,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightItem {
    pub node: NodeId,
    pub world: Mat4,
    pub light: SpotLight,
    pub shadow_map: Option<GpuHandle>,
}

impl FrameSnapshot {
    /// Collect visible meshes and lights with their world matrices
    pub fn capture(graph: &SceneGraph, camera: &PerspectiveCamera, clear_color: [f32; 3]) -> Self {
        let mut draws = Vec::new();
        let mut lights = Vec::new();
        let mut stack = vec![(graph.root(), Mat4::IDENTITY)];

        while let Some((id, parent_world)) = stack.pop() {
            let Some(node) = graph.get(id) else {
                continue;
            };
            if !node.visible {
                continue;
            }
            let world = parent_world * node.transform.matrix();
            match &node.kind {
                NodeKind::Group => {}
                NodeKind::Mesh(mesh) => draws.push(DrawItem {
                    node: id,
                    geometry: mesh.geometry,
                    materials: mesh.material.bindings().iter().map(|b| b.material).collect(),
                    world,
                    joints: mesh
                        .skin
                        .as_ref()
                        .map(|skin| joint_matrices(graph, skin))
                        .unwrap_or_default(),
                    cast_shadow: node.cast_shadow,
                    receive_shadow: node.receive_shadow,
                }),
                NodeKind::Light(light) => lights.push(LightItem {
                    node: id,
                    world,
                    light: light.light.clone(),
                    shadow_map: light.shadow_map,
                }),
            }
            for child in node.children().iter().rev() {
                stack.push((*child, world));
            }
        }

        Self {
            clear_color,
            camera: camera.clone(),
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            draws,
            lights,
        }
    }
}

fn joint_matrices(graph: &SceneGraph, skin: &Skin) -> Vec<Mat4> {
    skin.joints
        .iter()
        .enumerate()
        .map(|(i, joint)| {
            let inverse_bind = skin.inverse_bind.get(i).copied().unwrap_or(Mat4::IDENTITY);
            graph.world_matrix(*joint) * inverse_bind
        })
        .collect()
}

/// Graphics backend bound to one mount point
pub trait Renderer {
    fn create_geometry(&mut self, geometry: &GeometryData) -> Result<GpuHandle, RenderError>;
    fn create_texture(&mut self, texture: &TextureData) -> Result<GpuHandle, RenderError>;
    fn create_material(
        &mut self,
        material: &MaterialData,
        maps: &TextureMaps,
    ) -> Result<GpuHandle, RenderError>;
    fn create_shadow_map(&mut self, size: u32) -> Result<GpuHandle, RenderError>;
    fn release(&mut self, handle: GpuHandle);
    fn set_size(&mut self, viewport: Viewport);
    fn draw(&mut self, frame: &FrameSnapshot);
    /// Free the backend itself; called once, after every resource was released
    fn shutdown(&mut self);
}

/// Identifies a registered resize listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The host surface the viewer renders into (a canvas, a window, a test double)
pub trait MountPoint {
    type Renderer: Renderer;

    /// False once the host has removed the surface
    fn is_attached(&self) -> bool;
    fn viewport(&self) -> Viewport;
    fn create_renderer(&mut self) -> Result<Self::Renderer, RenderError>;
    /// Start presenting the renderer's output
    fn attach_output(&mut self, renderer: &mut Self::Renderer) -> Result<(), RenderError>;
    fn detach_output(&mut self, renderer: &mut Self::Renderer);
    fn add_resize_listener(&mut self) -> ListenerId;
    fn remove_resize_listener(&mut self, id: ListenerId);
}

/// Owns a renderer and remembers which of its resources are still live.
///
/// Releasing a handle the ledger does not consider live is a no-op, so
/// disposal can run any number of times.
pub struct ResourceLedger<R: Renderer> {
    renderer: R,
    live: BTreeSet<GpuHandle>,
    released_total: usize,
    shut_down: bool,
}

impl<R: Renderer> ResourceLedger<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            live: BTreeSet::new(),
            released_total: 0,
            shut_down: false,
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, handle: GpuHandle) -> bool {
        self.live.contains(&handle)
    }

    pub fn released_total(&self) -> usize {
        self.released_total
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn create_geometry(&mut self, geometry: &GeometryData) -> Result<GpuHandle, RenderError> {
        self.ensure_running()?;
        let handle = self.renderer.create_geometry(geometry)?;
        self.track(handle);
        Ok(handle)
    }

    pub fn create_texture(&mut self, texture: &TextureData) -> Result<GpuHandle, RenderError> {
        self.ensure_running()?;
        let handle = self.renderer.create_texture(texture)?;
        self.track(handle);
        Ok(handle)
    }

    pub fn create_material(
        &mut self,
        material: &MaterialData,
        maps: &TextureMaps,
    ) -> Result<GpuHandle, RenderError> {
        self.ensure_running()?;
        let handle = self.renderer.create_material(material, maps)?;
        self.track(handle);
        Ok(handle)
    }

    pub fn create_shadow_map(&mut self, size: u32) -> Result<GpuHandle, RenderError> {
        self.ensure_running()?;
        let handle = self.renderer.create_shadow_map(size)?;
        self.track(handle);
        Ok(handle)
    }

    /// Release anything still live, then shut the renderer down. Idempotent.
    pub fn shutdown(&mut self) -> usize {
        if self.shut_down {
            return 0;
        }
        let leftovers: Vec<GpuHandle> = self.live.iter().copied().collect();
        for handle in &leftovers {
            self.release(*handle);
        }
        if !leftovers.is_empty() {
            debug!(count = leftovers.len(), "Released resources outside the scene graph");
        }
        self.renderer.shutdown();
        self.shut_down = true;
        leftovers.len()
    }

    fn ensure_running(&self) -> Result<(), RenderError> {
        if self.shut_down {
            Err(RenderError::Released)
        } else {
            Ok(())
        }
    }

    fn track(&mut self, handle: GpuHandle) {
        trace!(handle = %handle, "Resource created");
        self.live.insert(handle);
    }
}

impl<R: Renderer> ReleaseSink for ResourceLedger<R> {
    fn release(&mut self, handle: GpuHandle) -> bool {
        if !self.live.remove(&handle) {
            return false;
        }
        self.renderer.release(handle);
        self.released_total += 1;
        trace!(handle = %handle, "Resource released");
        true
    }
}
