//! Per-session scene setup: camera, controls, ground plane, and key light

use glam::{Mat4, Quat, Vec3};
use motus_core::config::{CameraSettings, GroundSettings, SpotlightSettings, ViewerSettings};
use motus_core::preferences::UiPreferences;
use tracing::debug;

use crate::controls::OrbitControls;
use crate::gpu::{GeometryData, MaterialData, RenderError, Renderer, ResourceLedger, TextureMaps, Viewport};
use crate::graph::{LightNode, MaterialBinding, MaterialSlot, MeshNode, Node, NodeId, NodeKind, SceneGraph, SpotLight, Transform};

pub const GROUND_NODE: &str = "ground";
pub const SPOTLIGHT_NODE: &str = "spotlight";

#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    pub target: Vec3,
}

impl PerspectiveCamera {
    pub fn new(settings: &CameraSettings, viewport: Viewport) -> Self {
        Self {
            fov_y: settings.fov_degrees.to_radians(),
            aspect: viewport.aspect(),
            near: settings.near,
            far: settings.far,
            position: Vec3::from(settings.position),
            target: Vec3::ZERO,
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.aspect = viewport.aspect();
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// Flat plane in the XZ plane centred on the origin, normals +Y
pub fn plane_geometry(size: f32, segments: u32) -> GeometryData {
    let segments = segments.max(1);
    let stride = segments + 1;
    let step = size / segments as f32;
    let half = size / 2.0;

    let mut geometry = GeometryData::default();
    for row in 0..stride {
        for col in 0..stride {
            let x = -half + col as f32 * step;
            let z = -half + row as f32 * step;
            geometry.positions.push([x, 0.0, z]);
            geometry.normals.push([0.0, 1.0, 0.0]);
            geometry.uvs.push([col as f32 / segments as f32, row as f32 / segments as f32]);
        }
    }

    let mut indices = Vec::with_capacity((segments * segments * 6) as usize);
    for row in 0..segments {
        for col in 0..segments {
            let a = row * stride + col;
            let b = a + 1;
            let c = a + stride;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    geometry.indices = Some(indices);
    geometry
}

pub fn ground_material(settings: &GroundSettings, viewer: &ViewerSettings, prefs: UiPreferences) -> MaterialData {
    let color = if prefs.high_contrast() {
        viewer.high_contrast_ground_color
    } else {
        settings.color
    };
    let [r, g, b] = color.to_f32();
    MaterialData {
        name: Some(GROUND_NODE.to_string()),
        base_color: [r, g, b, 1.0],
        roughness: 1.0,
        double_sided: true,
        ..Default::default()
    }
}

pub fn clear_color(viewer: &ViewerSettings, prefs: UiPreferences) -> [f32; 3] {
    if prefs.high_contrast() {
        viewer.high_contrast_clear_color.to_f32()
    } else {
        viewer.clear_color.to_f32()
    }
}

fn spotlight(settings: &SpotlightSettings) -> SpotLight {
    SpotLight {
        color: settings.color.to_f32(),
        intensity: settings.intensity,
        range: settings.range,
        angle: settings.angle,
        penumbra: settings.penumbra,
        target: Vec3::ZERO,
    }
}

/// Everything built for one viewer session before any model is mounted
pub struct BuiltScene {
    pub graph: SceneGraph,
    pub camera: PerspectiveCamera,
    pub controls: OrbitControls,
    pub ground: NodeId,
    pub spotlight: NodeId,
    pub clear_color: [f32; 3],
}

/// Build a fresh scene. Uploads the ground and the shadow map through `ledger`.
pub fn build_scene<R: Renderer>(
    settings: &ViewerSettings,
    prefs: UiPreferences,
    viewport: Viewport,
    ledger: &mut ResourceLedger<R>,
) -> Result<BuiltScene, RenderError> {
    let mut camera = PerspectiveCamera::new(&settings.camera, viewport);
    let controls = OrbitControls::new(&settings.controls, &camera);
    camera.target = controls.target();

    let mut graph = SceneGraph::new();

    let ground_geometry = ledger.create_geometry(&plane_geometry(settings.ground.size, settings.ground.segments))?;
    let ground_material = ledger.create_material(
        &ground_material(&settings.ground, settings, prefs),
        &TextureMaps::default(),
    )?;
    let mut ground = Node::new(NodeKind::Mesh(MeshNode {
        geometry: ground_geometry,
        material: MaterialSlot::Single(MaterialBinding::plain(ground_material)),
        skin: None,
    }))
    .named(GROUND_NODE);
    ground.cast_shadow = false;
    ground.receive_shadow = true;
    let ground = graph.add_child(graph.root(), ground);

    let shadow_map = if settings.spotlight.cast_shadow {
        Some(ledger.create_shadow_map(settings.spotlight.shadow_map_size)?)
    } else {
        None
    };
    let position = Vec3::from(settings.spotlight.position);
    let mut light = Node::new(NodeKind::Light(LightNode {
        light: spotlight(&settings.spotlight),
        shadow_map,
    }))
    .named(SPOTLIGHT_NODE)
    .with_transform(Transform {
        translation: position,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    });
    light.cast_shadow = settings.spotlight.cast_shadow;
    let spotlight = graph.add_child(graph.root(), light);

    debug!(
        width = viewport.width,
        height = viewport.height,
        nodes = graph.len(),
        "Built viewer scene"
    );

    Ok(BuiltScene {
        graph,
        camera,
        controls,
        ground,
        spotlight,
        clear_color: clear_color(settings, prefs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::ResourceKind;
    use crate::test_support::RecordingRenderer;
    use motus_core::preferences::ColorTheme;

    #[test]
    fn test_plane_geometry_counts() {
        let plane = plane_geometry(20.0, 32);
        assert_eq!(plane.vertex_count(), 33 * 33);
        assert_eq!(plane.triangle_count(), 32 * 32 * 2);
        assert!(plane.positions.iter().all(|p| p[1] == 0.0));
        assert_eq!(plane.positions[0], [-10.0, 0.0, -10.0]);
    }

    #[test]
    fn test_default_scene_layout() {
        let mut ledger = ResourceLedger::new(RecordingRenderer::default());
        let scene = build_scene(
            &ViewerSettings::default(),
            UiPreferences::default(),
            Viewport::new(1600, 900),
            &mut ledger,
        )
        .unwrap();

        assert_eq!(scene.camera.position, Vec3::new(4.0, 5.0, 11.0));
        assert!((scene.camera.aspect - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(scene.clear_color, [0.0, 0.0, 0.0]);

        let ground = scene.graph.get(scene.ground).unwrap();
        assert!(ground.receive_shadow && !ground.cast_shadow);

        let light = scene.graph.get(scene.spotlight).unwrap();
        assert_eq!(light.transform.translation, Vec3::new(0.0, 25.0, 0.0));
        match &light.kind {
            NodeKind::Light(l) => {
                assert_eq!(l.light.intensity, 3000.0);
                assert!(l.shadow_map.is_some());
            }
            other => panic!("unexpected node kind {:?}", other),
        }

        let kinds: Vec<_> = ledger.renderer().created.iter().map(|h| h.kind).collect();
        assert_eq!(
            kinds,
            vec![ResourceKind::Geometry, ResourceKind::Material, ResourceKind::ShadowMap]
        );
    }

    #[test]
    fn test_high_contrast_colours() {
        let settings = ViewerSettings::default();
        let prefs = UiPreferences {
            color_theme: ColorTheme::HighContrast,
            ..Default::default()
        };
        let material = ground_material(&settings.ground, &settings, prefs);
        assert_eq!(material.base_color, [1.0, 1.0, 1.0, 1.0]);
        assert!(material.double_sided);
    }
}
