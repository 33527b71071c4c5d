//! Recording doubles for the renderer and mount point seams

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec3;

use crate::animation::{AnimationClip, Channel, ChannelProperty, Interpolation, Keyframes};
use crate::gpu::{
    FrameSnapshot, GeometryData, GpuHandle, ListenerId, MaterialData, MountPoint, RenderError,
    Renderer, ResourceKind, TextureData, TextureMaps, Viewport,
};
use crate::graph::Transform;
use crate::loader::{AssetMesh, AssetNode, AssetPrimitive, LoadedAsset};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateRenderer,
    AttachOutput,
    DetachOutput,
    AddListener(ListenerId),
    RemoveListener(ListenerId),
    Release(GpuHandle),
    SetSize(Viewport),
    Draw,
    Shutdown,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

#[derive(Default)]
pub struct RecordingRenderer {
    pub log: EventLog,
    pub created: Vec<GpuHandle>,
    pub released: Vec<GpuHandle>,
    pub sizes: Vec<Viewport>,
    pub draws: usize,
    pub last_frame: Option<FrameSnapshot>,
    pub shutdowns: usize,
    /// Uploads succeed this many times, then fail
    pub fail_after: Option<usize>,
    pub(crate) next_id: u64,
}

impl RecordingRenderer {
    fn upload(&mut self, kind: ResourceKind) -> Result<GpuHandle, RenderError> {
        if let Some(limit) = self.fail_after {
            if self.created.len() >= limit {
                return Err(RenderError::Upload {
                    kind,
                    reason: "out of memory".into(),
                });
            }
        }
        self.next_id += 1;
        let handle = GpuHandle::new(kind, self.next_id);
        self.created.push(handle);
        Ok(handle)
    }
}

impl Renderer for RecordingRenderer {
    fn create_geometry(&mut self, _geometry: &GeometryData) -> Result<GpuHandle, RenderError> {
        self.upload(ResourceKind::Geometry)
    }

    fn create_texture(&mut self, _texture: &TextureData) -> Result<GpuHandle, RenderError> {
        self.upload(ResourceKind::Texture)
    }

    fn create_material(
        &mut self,
        _material: &MaterialData,
        _maps: &TextureMaps,
    ) -> Result<GpuHandle, RenderError> {
        self.upload(ResourceKind::Material)
    }

    fn create_shadow_map(&mut self, _size: u32) -> Result<GpuHandle, RenderError> {
        self.upload(ResourceKind::ShadowMap)
    }

    fn release(&mut self, handle: GpuHandle) {
        self.released.push(handle);
        self.log.borrow_mut().push(Event::Release(handle));
    }

    fn set_size(&mut self, viewport: Viewport) {
        self.sizes.push(viewport);
        self.log.borrow_mut().push(Event::SetSize(viewport));
    }

    fn draw(&mut self, frame: &FrameSnapshot) {
        self.draws += 1;
        self.last_frame = Some(frame.clone());
        self.log.borrow_mut().push(Event::Draw);
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
        self.log.borrow_mut().push(Event::Shutdown);
    }
}

pub struct RecordingMount {
    pub log: EventLog,
    pub attached: bool,
    pub viewport: Viewport,
    pub listeners: Vec<ListenerId>,
    pub renderers_created: usize,
    pub fail_renderer: bool,
    pub fail_uploads_after: Option<usize>,
    next_listener: u64,
}

impl RecordingMount {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            log: EventLog::default(),
            attached: true,
            viewport,
            listeners: Vec::new(),
            renderers_created: 0,
            fail_renderer: false,
            fail_uploads_after: None,
            next_listener: 0,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }
}

impl MountPoint for RecordingMount {
    type Renderer = RecordingRenderer;

    fn is_attached(&self) -> bool {
        self.attached
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn create_renderer(&mut self) -> Result<RecordingRenderer, RenderError> {
        if self.fail_renderer {
            return Err(RenderError::Mount("no graphics context".into()));
        }
        self.renderers_created += 1;
        self.log.borrow_mut().push(Event::CreateRenderer);
        Ok(RecordingRenderer {
            log: self.log.clone(),
            fail_after: self.fail_uploads_after,
            ..Default::default()
        })
    }

    fn attach_output(&mut self, _renderer: &mut RecordingRenderer) -> Result<(), RenderError> {
        self.log.borrow_mut().push(Event::AttachOutput);
        Ok(())
    }

    fn detach_output(&mut self, _renderer: &mut RecordingRenderer) {
        self.log.borrow_mut().push(Event::DetachOutput);
    }

    fn add_resize_listener(&mut self) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push(id);
        self.log.borrow_mut().push(Event::AddListener(id));
        id
    }

    fn remove_resize_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|l| *l != id);
        self.log.borrow_mut().push(Event::RemoveListener(id));
    }
}

/// A root node with `meshes` single-triangle mesh children sharing one textured
/// material, and a one-second clip bobbing the root up and down
pub fn sample_asset(meshes: usize) -> LoadedAsset {
    let triangle = GeometryData {
        positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        normals: vec![[0.0, 0.0, 1.0]; 3],
        indices: Some(vec![0, 1, 2]),
        ..Default::default()
    };
    let mut nodes = vec![AssetNode {
        name: Some("hips".into()),
        transform: Transform::IDENTITY,
        children: (1..=meshes).collect(),
        mesh: None,
        skin: None,
    }];
    nodes.extend((0..meshes).map(|i| AssetNode {
        name: Some(format!("part{}", i)),
        transform: Transform::from_translation(Vec3::new(i as f32, 0.0, 0.0)),
        children: Vec::new(),
        mesh: Some(i),
        skin: None,
    }));

    LoadedAsset {
        source: "https://store.example.net/motion-files/sample.glb".into(),
        nodes,
        roots: vec![0],
        meshes: (0..meshes)
            .map(|i| AssetMesh {
                name: Some(format!("part{}", i)),
                primitives: vec![AssetPrimitive {
                    geometry: triangle.clone(),
                    material: Some(0),
                }],
            })
            .collect(),
        materials: vec![MaterialData {
            base_color_texture: Some(0),
            ..Default::default()
        }],
        textures: vec![TextureData {
            name: Some("albedo".into()),
            mime_type: Some("image/png".into()),
            bytes: vec![0x89, b'P', b'N', b'G'],
            srgb: true,
        }],
        skins: Vec::new(),
        clips: vec![AnimationClip::new(
            Some("bob".into()),
            vec![Channel {
                target: 0,
                property: ChannelProperty::Translation,
                interpolation: Interpolation::Linear,
                times: vec![0.0, 0.5, 1.0],
                values: Keyframes::Vec3(vec![Vec3::ZERO, Vec3::Y, Vec3::ZERO]),
            }],
        )],
    }
}
