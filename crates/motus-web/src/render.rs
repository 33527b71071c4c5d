//! Bevy implementation of the viewer's renderer and mount point
//!
//! [`BevyRenderer`] lives inside the viewer coordinator and cannot reach the
//! ECS. It converts uploads into Bevy assets up front (so bad data fails the
//! upload, not a later frame) and queues them as [`RenderCommand`]s.
//! [`apply_render_commands`] drains the queue each frame and owns the asset
//! handles and the entities drawn for each scene node.

use bevy::asset::RenderAssetUsages;
use bevy::ecs::system::SystemParam;
use bevy::image::{CompressedImageFormats, ImageSampler, ImageType};
use bevy::light::{NotShadowCaster, NotShadowReceiver, PointLightShadowMap};
use bevy::mesh::skinning::{SkinnedMesh, SkinnedMeshInverseBindposes};
use bevy::mesh::{Indices, PrimitiveTopology, VertexAttributeValues};
use bevy::prelude::*;
use bevy::render::render_resource::Face;
use tracing::{debug, trace, warn};
use motus_scene::gpu::{
    AlphaMode as SceneAlphaMode, FrameSnapshot, GeometryData, GpuHandle, ListenerId, MaterialData,
    MountPoint, RenderError, Renderer, ResourceKind, TextureData, TextureMaps, Viewport,
};
use motus_scene::graph::NodeId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Bevy spot lights take lumens; scene intensities are unitless
const SPOT_LUMENS_PER_UNIT: f32 = 100_000.0;

pub struct RenderPlugin;

impl Plugin for RenderPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RenderQueue>()
            .init_resource::<GpuAssets>()
            .add_systems(Startup, spawn_camera)
            .add_systems(Update, apply_render_commands.in_set(ApplyRenderCommands));
    }
}

/// Systems that queue render commands run before this set
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplyRenderCommands;

/// Marker for the camera the viewer drives
#[derive(Component)]
pub struct ViewerCamera;

/// Marker for entities spawned from a frame snapshot
#[derive(Component)]
struct SceneEntity;

pub enum RenderCommand {
    Geometry { id: u64, mesh: Mesh },
    Texture { id: u64, image: Image },
    Material {
        id: u64,
        material: MaterialData,
        maps: TextureMaps,
    },
    ShadowMap { id: u64, size: u32 },
    Release(GpuHandle),
    Resize(Viewport),
    /// Start or stop showing frames
    Present(bool),
    Draw(FrameSnapshot),
    Shutdown,
}

/// Command queue shared between renderers and [`apply_render_commands`]
#[derive(Resource, Clone, Default)]
pub struct RenderQueue {
    commands: Arc<Mutex<Vec<RenderCommand>>>,
    next_id: Arc<AtomicU64>,
}

impl RenderQueue {
    fn allocate(&self, kind: ResourceKind) -> GpuHandle {
        GpuHandle::new(kind, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn push(&self, command: RenderCommand) -> Result<(), RenderError> {
        self.commands
            .lock()
            .map(|mut queue| queue.push(command))
            .map_err(|_| RenderError::Mount("render queue poisoned".to_string()))
    }

    pub fn take(&self) -> Vec<RenderCommand> {
        self.commands
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }
}

fn upload_error(kind: ResourceKind, reason: impl Into<String>) -> RenderError {
    RenderError::Upload {
        kind,
        reason: reason.into(),
    }
}

pub fn mesh_from_geometry(geometry: &GeometryData) -> Result<Mesh, RenderError> {
    let count = geometry.vertex_count();
    if count == 0 {
        return Err(upload_error(ResourceKind::Geometry, "geometry has no vertices"));
    }

    let mut mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, geometry.positions.clone());
    let uvs = if geometry.uvs.len() == count {
        geometry.uvs.clone()
    } else {
        vec![[0.0, 0.0]; count]
    };
    mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);
    if geometry.joints.len() == count && geometry.weights.len() == count {
        mesh.insert_attribute(
            Mesh::ATTRIBUTE_JOINT_INDEX,
            VertexAttributeValues::Uint16x4(geometry.joints.clone()),
        );
        mesh.insert_attribute(Mesh::ATTRIBUTE_JOINT_WEIGHT, geometry.weights.clone());
    }
    if let Some(indices) = &geometry.indices {
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= count) {
            return Err(upload_error(
                ResourceKind::Geometry,
                format!("index {} out of range for {} vertices", bad, count),
            ));
        }
        mesh.insert_indices(Indices::U32(indices.clone()));
    }
    if geometry.normals.len() == count {
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, geometry.normals.clone());
    } else {
        mesh.compute_normals();
    }
    Ok(mesh)
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else {
        "image/jpeg"
    }
}

pub fn image_from_texture(texture: &TextureData) -> Result<Image, RenderError> {
    let mime = texture
        .mime_type
        .as_deref()
        .unwrap_or_else(|| sniff_mime(&texture.bytes));
    Image::from_buffer(
        &texture.bytes,
        ImageType::MimeType(mime),
        CompressedImageFormats::NONE,
        texture.srgb,
        ImageSampler::Default,
        RenderAssetUsages::default(),
    )
    .map_err(|e| upload_error(ResourceKind::Texture, e.to_string()))
}

/// Build a `StandardMaterial`; `image` resolves texture handles to uploaded images
pub fn standard_material(
    material: &MaterialData,
    maps: &TextureMaps,
    image: impl Fn(Option<GpuHandle>) -> Option<Handle<Image>>,
) -> StandardMaterial {
    let [r, g, b, a] = material.base_color;
    let [er, eg, eb] = material.emissive;
    StandardMaterial {
        base_color: Color::linear_rgba(r, g, b, a),
        base_color_texture: image(maps.base_color),
        metallic: material.metallic,
        perceptual_roughness: material.roughness,
        metallic_roughness_texture: image(maps.metallic_roughness),
        normal_map_texture: image(maps.normal),
        occlusion_texture: image(maps.occlusion),
        emissive: LinearRgba::rgb(er, eg, eb),
        emissive_texture: image(maps.emissive),
        double_sided: material.double_sided,
        cull_mode: if material.double_sided {
            None
        } else {
            Some(Face::Back)
        },
        alpha_mode: match material.alpha_mode {
            SceneAlphaMode::Opaque => AlphaMode::Opaque,
            SceneAlphaMode::Mask => AlphaMode::Mask(material.alpha_cutoff),
            SceneAlphaMode::Blend => AlphaMode::Blend,
        },
        ..default()
    }
}

/// Renderer half of the Bevy host
pub struct BevyRenderer {
    queue: RenderQueue,
    shut_down: bool,
}

impl BevyRenderer {
    pub fn new(queue: RenderQueue) -> Self {
        Self {
            queue,
            shut_down: false,
        }
    }

    fn present(&mut self, on: bool) -> Result<(), RenderError> {
        self.queue.push(RenderCommand::Present(on))
    }

    fn send(&mut self, command: RenderCommand) {
        if let Err(e) = self.queue.push(command) {
            warn!(error = %e, "Dropped render command");
        }
    }
}

impl Renderer for BevyRenderer {
    fn create_geometry(&mut self, geometry: &GeometryData) -> Result<GpuHandle, RenderError> {
        let mesh = mesh_from_geometry(geometry)?;
        let handle = self.queue.allocate(ResourceKind::Geometry);
        self.queue.push(RenderCommand::Geometry { id: handle.id, mesh })?;
        Ok(handle)
    }

    fn create_texture(&mut self, texture: &TextureData) -> Result<GpuHandle, RenderError> {
        let image = image_from_texture(texture)?;
        let handle = self.queue.allocate(ResourceKind::Texture);
        self.queue.push(RenderCommand::Texture { id: handle.id, image })?;
        Ok(handle)
    }

    fn create_material(
        &mut self,
        material: &MaterialData,
        maps: &TextureMaps,
    ) -> Result<GpuHandle, RenderError> {
        let handle = self.queue.allocate(ResourceKind::Material);
        self.queue.push(RenderCommand::Material {
            id: handle.id,
            material: material.clone(),
            maps: *maps,
        })?;
        Ok(handle)
    }

    fn create_shadow_map(&mut self, size: u32) -> Result<GpuHandle, RenderError> {
        if size == 0 || !size.is_power_of_two() {
            return Err(upload_error(
                ResourceKind::ShadowMap,
                format!("shadow map size {} is not a power of two", size),
            ));
        }
        let handle = self.queue.allocate(ResourceKind::ShadowMap);
        self.queue.push(RenderCommand::ShadowMap { id: handle.id, size })?;
        Ok(handle)
    }

    fn release(&mut self, handle: GpuHandle) {
        self.send(RenderCommand::Release(handle));
    }

    fn set_size(&mut self, viewport: Viewport) {
        self.send(RenderCommand::Resize(viewport));
    }

    fn draw(&mut self, frame: &FrameSnapshot) {
        self.send(RenderCommand::Draw(frame.clone()));
    }

    fn shutdown(&mut self) {
        if !self.shut_down {
            self.shut_down = true;
            self.send(RenderCommand::Shutdown);
        }
    }
}

/// The Bevy window's canvas as a mount point
pub struct CanvasMount {
    queue: RenderQueue,
    attached: bool,
    viewport: Viewport,
    next_listener: u64,
    listeners: HashSet<ListenerId>,
}

impl CanvasMount {
    pub fn new(queue: RenderQueue, viewport: Viewport) -> Self {
        Self {
            queue,
            attached: true,
            viewport,
            next_listener: 0,
            listeners: HashSet::new(),
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
    }

    /// Whether resize notifications should reach the viewer
    pub fn has_resize_listener(&self) -> bool {
        !self.listeners.is_empty()
    }
}

impl MountPoint for CanvasMount {
    type Renderer = BevyRenderer;

    fn is_attached(&self) -> bool {
        self.attached
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn create_renderer(&mut self) -> Result<BevyRenderer, RenderError> {
        if !self.attached {
            return Err(RenderError::Mount("canvas is detached".to_string()));
        }
        Ok(BevyRenderer::new(self.queue.clone()))
    }

    fn attach_output(&mut self, renderer: &mut BevyRenderer) -> Result<(), RenderError> {
        renderer.present(true)
    }

    fn detach_output(&mut self, renderer: &mut BevyRenderer) {
        if let Err(e) = renderer.present(false) {
            warn!(error = %e, "Failed to detach viewer output");
        }
    }

    fn add_resize_listener(&mut self) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.insert(id);
        id
    }

    fn remove_resize_listener(&mut self, id: ListenerId) {
        self.listeners.remove(&id);
    }
}

struct DrawnMesh {
    entity: Entity,
    geometry: GpuHandle,
    material: GpuHandle,
    joints: Vec<Entity>,
}

/// Bevy-side state behind the handles a renderer gave out
#[derive(Resource, Default)]
pub struct GpuAssets {
    meshes: HashMap<u64, Handle<Mesh>>,
    images: HashMap<u64, Handle<Image>>,
    materials: HashMap<u64, Handle<StandardMaterial>>,
    shadow_maps: HashSet<u64>,
    drawn: HashMap<NodeId, DrawnMesh>,
    lights: HashMap<NodeId, Entity>,
    presenting: bool,
}

impl GpuAssets {
    pub fn live_count(&self) -> usize {
        self.meshes.len() + self.images.len() + self.materials.len() + self.shadow_maps.len()
    }

    pub fn entity_count(&self) -> usize {
        self.drawn.values().map(|d| 1 + d.joints.len()).sum::<usize>() + self.lights.len()
    }

    fn despawn_all(&mut self, commands: &mut Commands) {
        for (_, drawn) in self.drawn.drain() {
            commands.entity(drawn.entity).despawn();
            for joint in drawn.joints {
                commands.entity(joint).despawn();
            }
        }
        for (_, light) in self.lights.drain() {
            commands.entity(light).despawn();
        }
    }
}

#[derive(SystemParam)]
struct SceneAssets<'w> {
    meshes: ResMut<'w, Assets<Mesh>>,
    images: ResMut<'w, Assets<Image>>,
    materials: ResMut<'w, Assets<StandardMaterial>>,
    bindposes: ResMut<'w, Assets<SkinnedMeshInverseBindposes>>,
}

fn spawn_camera(mut commands: Commands) {
    commands.spawn((
        Camera3d::default(),
        ViewerCamera,
        Transform::from_xyz(0.0, 1.5, 3.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));
}

fn apply_render_commands(
    mut commands: Commands,
    queue: Res<RenderQueue>,
    mut gpu: ResMut<GpuAssets>,
    mut assets: SceneAssets,
    mut clear_color: ResMut<ClearColor>,
    mut camera: Query<(&mut Transform, &mut Projection), With<ViewerCamera>>,
    mut transforms: Query<&mut Transform, (With<SceneEntity>, Without<ViewerCamera>)>,
) {
    for command in queue.take() {
        match command {
            RenderCommand::Geometry { id, mesh } => {
                gpu.meshes.insert(id, assets.meshes.add(mesh));
            }
            RenderCommand::Texture { id, image } => {
                gpu.images.insert(id, assets.images.add(image));
            }
            RenderCommand::Material { id, material, maps } => {
                let images = &gpu.images;
                let built = standard_material(&material, &maps, |handle| {
                    handle.and_then(|h| images.get(&h.id).cloned())
                });
                let handle = assets.materials.add(built);
                gpu.materials.insert(id, handle);
            }
            RenderCommand::ShadowMap { id, size } => {
                gpu.shadow_maps.insert(id);
                commands.insert_resource(PointLightShadowMap { size: size as usize });
            }
            RenderCommand::Release(handle) => release(&mut gpu, &mut assets, handle),
            RenderCommand::Resize(viewport) => {
                debug!(width = viewport.width, height = viewport.height, "Viewer resized");
            }
            RenderCommand::Present(on) => {
                gpu.presenting = on;
                if !on {
                    gpu.despawn_all(&mut commands);
                }
            }
            RenderCommand::Draw(frame) => {
                if !gpu.presenting {
                    continue;
                }
                clear_color.0 = Color::srgb(
                    frame.clear_color[0],
                    frame.clear_color[1],
                    frame.clear_color[2],
                );
                if let Ok((mut transform, mut projection)) = camera.single_mut() {
                    *transform = Transform::from_matrix(frame.view.inverse());
                    *projection = Projection::Perspective(PerspectiveProjection {
                        fov: frame.camera.fov_y,
                        aspect_ratio: frame.camera.aspect,
                        near: frame.camera.near,
                        far: frame.camera.far,
                        ..default()
                    });
                }
                sync_meshes(&frame, &mut gpu, &mut commands, &mut assets, &mut transforms);
                sync_lights(&frame, &mut gpu, &mut commands, &mut transforms);
            }
            RenderCommand::Shutdown => {
                debug!(entities = gpu.entity_count(), "Renderer shutting down");
                gpu.despawn_all(&mut commands);
                let leftovers = gpu.live_count();
                for (_, handle) in gpu.meshes.drain() {
                    assets.meshes.remove(&handle);
                }
                for (_, handle) in gpu.images.drain() {
                    assets.images.remove(&handle);
                }
                for (_, handle) in gpu.materials.drain() {
                    assets.materials.remove(&handle);
                }
                gpu.shadow_maps.clear();
                gpu.presenting = false;
                if leftovers > 0 {
                    warn!(leftovers, "Renderer shut down with live resources");
                }
            }
        }
    }
}

fn release(gpu: &mut GpuAssets, assets: &mut SceneAssets, handle: GpuHandle) {
    let released = match handle.kind {
        ResourceKind::Geometry => gpu
            .meshes
            .remove(&handle.id)
            .map(|h| assets.meshes.remove(&h))
            .is_some(),
        ResourceKind::Texture => gpu
            .images
            .remove(&handle.id)
            .map(|h| assets.images.remove(&h))
            .is_some(),
        ResourceKind::Material => gpu
            .materials
            .remove(&handle.id)
            .map(|h| assets.materials.remove(&h))
            .is_some(),
        ResourceKind::ShadowMap => gpu.shadow_maps.remove(&handle.id),
    };
    if !released {
        trace!(handle = %handle, "Release of unknown handle");
    }
}

fn sync_meshes(
    frame: &FrameSnapshot,
    gpu: &mut GpuAssets,
    commands: &mut Commands,
    assets: &mut SceneAssets,
    transforms: &mut Query<&mut Transform, (With<SceneEntity>, Without<ViewerCamera>)>,
) {
    let mut seen = HashSet::new();

    for item in &frame.draws {
        let Some(material) = item.materials.first().copied() else {
            continue;
        };
        let (Some(mesh), Some(standard)) = (
            gpu.meshes.get(&item.geometry.id).cloned(),
            gpu.materials.get(&material.id).cloned(),
        ) else {
            trace!(node = %item.node, "Skipping draw with unknown resources");
            continue;
        };
        seen.insert(item.node);
        let world = Transform::from_matrix(item.world);

        match gpu.drawn.get_mut(&item.node) {
            Some(drawn) => {
                if drawn.geometry != item.geometry || drawn.material != material {
                    commands
                        .entity(drawn.entity)
                        .insert((Mesh3d(mesh), MeshMaterial3d(standard)));
                    drawn.geometry = item.geometry;
                    drawn.material = material;
                }
                if let Ok(mut transform) = transforms.get_mut(drawn.entity) {
                    *transform = world;
                }
            }
            None => {
                let mut entity = commands.spawn((SceneEntity, Mesh3d(mesh), MeshMaterial3d(standard), world));
                if !item.cast_shadow {
                    entity.insert(NotShadowCaster);
                }
                if !item.receive_shadow {
                    entity.insert(NotShadowReceiver);
                }
                let entity = entity.id();
                gpu.drawn.insert(
                    item.node,
                    DrawnMesh {
                        entity,
                        geometry: item.geometry,
                        material,
                        joints: Vec::new(),
                    },
                );
            }
        }
        let Some(drawn) = gpu.drawn.get_mut(&item.node) else {
            continue;
        };

        // Joint entities carry the final joint matrices, so the bind poses are identity
        if item.joints.len() != drawn.joints.len() {
            for joint in drawn.joints.drain(..) {
                commands.entity(joint).despawn();
            }
            if !item.joints.is_empty() {
                drawn.joints = item
                    .joints
                    .iter()
                    .map(|m| commands.spawn((SceneEntity, Transform::from_matrix(*m))).id())
                    .collect();
                let inverse_bindposes = assets
                    .bindposes
                    .add(SkinnedMeshInverseBindposes::from(vec![Mat4::IDENTITY; item.joints.len()]));
                commands.entity(drawn.entity).insert(SkinnedMesh {
                    inverse_bindposes,
                    joints: drawn.joints.clone(),
                });
            }
        } else {
            for (joint, matrix) in drawn.joints.iter().zip(&item.joints) {
                if let Ok(mut transform) = transforms.get_mut(*joint) {
                    *transform = Transform::from_matrix(*matrix);
                }
            }
        }
    }

    gpu.drawn.retain(|node, drawn| {
        if seen.contains(node) {
            return true;
        }
        commands.entity(drawn.entity).despawn();
        for joint in &drawn.joints {
            commands.entity(*joint).despawn();
        }
        false
    });
}

fn sync_lights(
    frame: &FrameSnapshot,
    gpu: &mut GpuAssets,
    commands: &mut Commands,
    transforms: &mut Query<&mut Transform, (With<SceneEntity>, Without<ViewerCamera>)>,
) {
    let mut seen = HashSet::new();

    for item in &frame.lights {
        seen.insert(item.node);
        let position = item.world.w_axis.truncate();
        let transform = Transform::from_translation(position).looking_at(item.light.target, Vec3::Y);

        match gpu.lights.get(&item.node) {
            Some(entity) => {
                if let Ok(mut current) = transforms.get_mut(*entity) {
                    *current = transform;
                }
            }
            None => {
                let [r, g, b] = item.light.color;
                let entity = commands
                    .spawn((
                        SceneEntity,
                        SpotLight {
                            color: Color::srgb(r, g, b),
                            intensity: item.light.intensity * SPOT_LUMENS_PER_UNIT,
                            range: item.light.range,
                            outer_angle: item.light.angle,
                            inner_angle: item.light.angle * (1.0 - item.light.penumbra.clamp(0.0, 1.0)),
                            shadows_enabled: item.shadow_map.is_some(),
                            ..default()
                        },
                        transform,
                    ))
                    .id();
                gpu.lights.insert(item.node, entity);
            }
        }
    }

    gpu.lights.retain(|node, entity| {
        if seen.contains(node) {
            return true;
        }
        commands.entity(*entity).despawn();
        false
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use motus_core::config::ViewerSettings;
    use motus_core::identity::AccessToken;
    use motus_core::motion_file::{MotionFile, MotionFileId};
    use motus_core::preferences::UiPreferences;
    use motus_scene::viewer::ViewerCoordinator;

    fn triangle() -> GeometryData {
        GeometryData {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            indices: Some(vec![0, 1, 2]),
            ..Default::default()
        }
    }

    fn count(commands: &[RenderCommand], wanted: fn(&RenderCommand) -> bool) -> usize {
        commands.iter().filter(|c| wanted(c)).count()
    }

    #[test]
    fn test_mesh_from_geometry_fills_missing_attributes() {
        let mesh = mesh_from_geometry(&triangle()).unwrap();
        assert_eq!(mesh.count_vertices(), 3);
        assert!(mesh.attribute(Mesh::ATTRIBUTE_NORMAL).is_some());
        assert!(mesh.attribute(Mesh::ATTRIBUTE_UV_0).is_some());
        assert!(mesh.attribute(Mesh::ATTRIBUTE_JOINT_INDEX).is_none());
        assert_eq!(mesh.indices().map(|i| i.len()), Some(3));
    }

    #[test]
    fn test_mesh_from_geometry_keeps_skin_attributes() {
        let mut geometry = triangle();
        geometry.joints = vec![[0, 0, 0, 0]; 3];
        geometry.weights = vec![[1.0, 0.0, 0.0, 0.0]; 3];
        let mesh = mesh_from_geometry(&geometry).unwrap();
        assert!(mesh.attribute(Mesh::ATTRIBUTE_JOINT_INDEX).is_some());
        assert!(mesh.attribute(Mesh::ATTRIBUTE_JOINT_WEIGHT).is_some());
    }

    #[test]
    fn test_invalid_geometry_is_rejected() {
        assert!(matches!(
            mesh_from_geometry(&GeometryData::default()),
            Err(RenderError::Upload {
                kind: ResourceKind::Geometry,
                ..
            })
        ));

        let mut geometry = triangle();
        geometry.indices = Some(vec![0, 1, 7]);
        assert!(mesh_from_geometry(&geometry).is_err());
    }

    #[test]
    fn test_standard_material_mapping() {
        let material = MaterialData {
            base_color: [0.5, 0.25, 1.0, 0.5],
            metallic: 0.3,
            roughness: 0.7,
            double_sided: true,
            alpha_mode: SceneAlphaMode::Mask,
            alpha_cutoff: 0.4,
            ..Default::default()
        };
        let maps = TextureMaps {
            base_color: Some(GpuHandle::new(ResourceKind::Texture, 9)),
            ..Default::default()
        };
        let built = standard_material(&material, &maps, |handle| handle.map(|_| Handle::default()));

        assert_eq!(built.base_color, Color::linear_rgba(0.5, 0.25, 1.0, 0.5));
        assert_eq!(built.metallic, 0.3);
        assert_eq!(built.perceptual_roughness, 0.7);
        assert!(built.base_color_texture.is_some());
        assert!(built.normal_map_texture.is_none());
        assert_eq!(built.cull_mode, None);
        assert_eq!(built.alpha_mode, AlphaMode::Mask(0.4));
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&[0x89, b'P', b'N', b'G', 0x0d]), "image/png");
        assert_eq!(sniff_mime(&[0xff, 0xd8, 0xff]), "image/jpeg");
    }

    #[test]
    fn test_renderer_queues_uploads_with_distinct_handles() {
        let queue = RenderQueue::default();
        let mut renderer = BevyRenderer::new(queue.clone());

        let geometry = renderer.create_geometry(&triangle()).unwrap();
        let material = renderer
            .create_material(&MaterialData::default(), &TextureMaps::default())
            .unwrap();
        assert_eq!(geometry.kind, ResourceKind::Geometry);
        assert_eq!(material.kind, ResourceKind::Material);
        assert_ne!(geometry.id, material.id);
        assert!(renderer.create_shadow_map(1000).is_err());

        renderer.release(geometry);
        renderer.shutdown();
        renderer.shutdown();

        let commands = queue.take();
        assert_eq!(commands.len(), 4);
        assert_eq!(count(&commands, |c| matches!(c, RenderCommand::Shutdown)), 1);
        assert!(queue.take().is_empty());
    }

    #[test]
    fn test_canvas_mount_listeners_and_detach() {
        let mut mount = CanvasMount::new(RenderQueue::default(), Viewport::new(800, 600));
        assert!(!mount.has_resize_listener());
        let listener = mount.add_resize_listener();
        assert!(mount.has_resize_listener());
        mount.remove_resize_listener(listener);
        assert!(!mount.has_resize_listener());

        mount.set_attached(false);
        assert!(matches!(mount.create_renderer(), Err(RenderError::Mount(_))));
    }

    #[test]
    fn test_viewer_session_through_command_queue() {
        let queue = RenderQueue::default();
        let mount = CanvasMount::new(queue.clone(), Viewport::new(800, 600));
        let mut viewer = ViewerCoordinator::new(mount, ViewerSettings::default(), UiPreferences::default());
        let file = MotionFile {
            id: MotionFileId(1),
            name: "walk.glb".to_string(),
            url: "https://blob.example/walk.glb".to_string(),
            kind: "gltf".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            patient_id: None,
        };

        let request = viewer.select(Some(&file), Some(&AccessToken::new("sv=1&sig=x")));
        assert!(request.is_some());
        assert!(viewer.mount().has_resize_listener());
        let ticket = viewer.schedule_frame().unwrap();
        viewer.frame(&ticket);

        let started = queue.take();
        let created = count(&started, |c| {
            matches!(
                c,
                RenderCommand::Geometry { .. }
                    | RenderCommand::Material { .. }
                    | RenderCommand::ShadowMap { .. }
            )
        });
        assert!(created >= 3);
        assert_eq!(count(&started, |c| matches!(c, RenderCommand::Present(true))), 1);
        assert_eq!(count(&started, |c| matches!(c, RenderCommand::Draw(_))), 1);

        viewer.unmount();
        let stopped = queue.take();
        assert_eq!(count(&stopped, |c| matches!(c, RenderCommand::Release(_))), created);
        assert_eq!(count(&stopped, |c| matches!(c, RenderCommand::Present(false))), 1);
        assert!(matches!(stopped.last(), Some(RenderCommand::Shutdown)));
        assert!(!viewer.mount().has_resize_listener());
    }
}
