//! Releases every GPU resource held below a scene node

use tracing::debug;

use crate::gpu::GpuHandle;
use crate::graph::{GpuResources, NodeId, NodeKind, SceneGraph};

/// Receives handles during disposal. Returns whether the handle was actually freed.
pub trait ReleaseSink {
    fn release(&mut self, handle: GpuHandle) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposalReport {
    pub nodes_visited: usize,
    pub meshes_visited: usize,
    pub lights_visited: usize,
    /// Handles offered to the sink, shared ones counted each time
    pub handles_visited: usize,
    /// Handles the sink actually freed
    pub released: usize,
}

/// Walk the subtree at `root` depth-first and release what each node holds.
///
/// Per mesh the order is texture maps, then materials, then geometry. Handles
/// that were already freed are skipped by the sink, so a second pass reports
/// `released == 0`.
pub fn dispose(graph: &SceneGraph, root: NodeId, sink: &mut dyn ReleaseSink) -> DisposalReport {
    let mut report = DisposalReport::default();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        let Some(node) = graph.get(id) else {
            continue;
        };
        report.nodes_visited += 1;
        match node.kind {
            NodeKind::Mesh(_) => report.meshes_visited += 1,
            NodeKind::Light(_) => report.lights_visited += 1,
            NodeKind::Group => {}
        }

        node.visit_resources(&mut |handle| {
            report.handles_visited += 1;
            if sink.release(handle) {
                report.released += 1;
            }
        });

        stack.extend(node.children().iter().rev().copied());
    }

    debug!(
        root = %root,
        nodes = report.nodes_visited,
        meshes = report.meshes_visited,
        released = report.released,
        "Disposed scene subtree"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GeometryData, MaterialData, ResourceLedger, TextureData, TextureMaps};
    use crate::graph::{LightNode, MaterialBinding, MaterialSlot, MeshNode, Node, SpotLight};
    use crate::test_support::RecordingRenderer;
    use glam::Vec3;

    fn texture() -> TextureData {
        TextureData {
            name: None,
            mime_type: Some("image/png".into()),
            bytes: vec![1, 2, 3],
            srgb: true,
        }
    }

    /// Root group with `n` meshes spread over nested groups, plus one shadow-casting light
    fn populated(n: usize) -> (SceneGraph, ResourceLedger<RecordingRenderer>) {
        let mut ledger = ResourceLedger::new(RecordingRenderer::default());
        let mut graph = SceneGraph::new();
        let shared_texture = ledger.create_texture(&texture()).unwrap();
        let maps = TextureMaps {
            base_color: Some(shared_texture),
            ..Default::default()
        };
        let shared_material = ledger.create_material(&MaterialData::default(), &maps).unwrap();

        let mut parent = graph.root();
        for i in 0..n {
            if i % 3 == 0 {
                parent = graph.add_child(parent, Node::group());
            }
            let geometry = ledger.create_geometry(&GeometryData::default()).unwrap();
            graph.add_child(
                parent,
                Node::new(NodeKind::Mesh(MeshNode {
                    geometry,
                    material: MaterialSlot::Single(MaterialBinding {
                        material: shared_material,
                        maps: vec![shared_texture],
                    }),
                    skin: None,
                })),
            );
        }

        let shadow_map = ledger.create_shadow_map(512).unwrap();
        graph.add_child(
            graph.root(),
            Node::new(NodeKind::Light(LightNode {
                light: SpotLight {
                    color: [1.0, 1.0, 1.0],
                    intensity: 3000.0,
                    range: 100.0,
                    angle: 0.39,
                    penumbra: 1.0,
                    target: Vec3::ZERO,
                },
                shadow_map: Some(shadow_map),
            })),
        );
        (graph, ledger)
    }

    #[test]
    fn test_every_mesh_visited_once() {
        let (graph, mut ledger) = populated(7);
        let live_before = ledger.live_count();

        let report = dispose(&graph, graph.root(), &mut ledger);
        assert_eq!(report.meshes_visited, 7);
        assert_eq!(report.lights_visited, 1);
        assert_eq!(report.nodes_visited, graph.len());
        // 7 geometries + shared material + shared texture + shadow map
        assert_eq!(report.released, live_before);
        assert_eq!(ledger.live_count(), 0);
    }

    #[test]
    fn test_second_pass_releases_nothing() {
        let (graph, mut ledger) = populated(4);
        dispose(&graph, graph.root(), &mut ledger);
        let released_once = ledger.renderer().released.len();

        let report = dispose(&graph, graph.root(), &mut ledger);
        assert_eq!(report.meshes_visited, 4);
        assert_eq!(report.released, 0);
        assert_eq!(ledger.renderer().released.len(), released_once);
    }

    #[test]
    fn test_release_order_per_mesh() {
        let (graph, mut ledger) = populated(1);
        dispose(&graph, graph.root(), &mut ledger);

        let kinds: Vec<_> = ledger.renderer().released.iter().map(|h| h.kind).collect();
        use crate::gpu::ResourceKind::*;
        assert_eq!(kinds, vec![Texture, Material, Geometry, ShadowMap]);
    }

    #[test]
    fn test_material_array_released_in_full() {
        let mut ledger = ResourceLedger::new(RecordingRenderer::default());
        let mut graph = SceneGraph::new();
        let skin_texture = ledger.create_texture(&texture()).unwrap();
        let cloth_texture = ledger.create_texture(&texture()).unwrap();
        let skin = ledger
            .create_material(
                &MaterialData::default(),
                &TextureMaps {
                    base_color: Some(skin_texture),
                    ..Default::default()
                },
            )
            .unwrap();
        let cloth = ledger
            .create_material(
                &MaterialData::default(),
                &TextureMaps {
                    base_color: Some(cloth_texture),
                    ..Default::default()
                },
            )
            .unwrap();
        let geometry = ledger.create_geometry(&GeometryData::default()).unwrap();
        let body = graph.add_child(graph.root(), Node::group());
        graph.add_child(
            body,
            Node::new(NodeKind::Mesh(MeshNode {
                geometry,
                material: MaterialSlot::Multi(vec![
                    MaterialBinding {
                        material: skin,
                        maps: vec![skin_texture],
                    },
                    MaterialBinding {
                        material: cloth,
                        maps: vec![cloth_texture],
                    },
                ]),
                skin: None,
            })),
        );

        let report = dispose(&graph, graph.root(), &mut ledger);
        assert_eq!(report.meshes_visited, 1);
        assert_eq!(report.released, 5);
        assert_eq!(ledger.live_count(), 0);
        assert_eq!(
            ledger.renderer().released,
            vec![skin_texture, cloth_texture, skin, cloth, geometry]
        );
        assert_eq!(dispose(&graph, graph.root(), &mut ledger).released, 0);
    }

    #[test]
    fn test_dispose_subtree_only() {
        let (mut graph, mut ledger) = populated(3);
        let group = graph.get(graph.root()).unwrap().children()[0];
        let report = dispose(&graph, group, &mut ledger);
        assert_eq!(report.meshes_visited, 3);
        assert_eq!(report.lights_visited, 0);
        assert_eq!(ledger.live_count(), 1);

        graph.remove_subtree(group);
        let rest = dispose(&graph, graph.root(), &mut ledger);
        assert_eq!(rest.released, 1);
    }
}
