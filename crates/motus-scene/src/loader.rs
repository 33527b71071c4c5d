//! glTF asset loading
//!
//! Turns a signed asset URL into a CPU-side [`LoadedAsset`]. Nothing here
//! touches the renderer: uploads happen when the asset is mounted, so a load
//! that fails or arrives too late never leaves GPU resources behind.

use base64::Engine;
use glam::{Mat4, Quat, Vec3};
use motus_core::identity::AccessToken;
use motus_core::motion_file::append_token;
use std::collections::HashSet;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::animation::{AnimationClip, Channel, ChannelProperty, Interpolation, Keyframes};
use crate::gpu::{AlphaMode, GeometryData, MaterialData, TextureData};
use crate::graph::Transform;

pub const DEFAULT_PROGRESS_STEP: u8 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("HTTP status {status}")]
    Status { status: u16 },
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("not authorized to read the asset (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("invalid glTF: {0}")]
    Parse(#[from] gltf::Error),
    #[error("buffer {0} has no data")]
    MissingBuffer(usize),
    #[error("{0}")]
    Invalid(String),
}

/// Byte source for documents and the resources they reference
pub trait AssetFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>>;
}

/// Reduces raw progress to step-aligned percentages that never go backwards
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    step: u8,
    last: Option<u8>,
}

impl ProgressThrottle {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.clamp(1, 100),
            last: None,
        }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }

    /// Returns a percentage to report, or `None` when no step boundary was crossed.
    /// An unknown total reports nothing.
    pub fn update(&mut self, loaded: u64, total: Option<u64>) -> Option<u8> {
        let total = total.filter(|t| *t > 0)?;
        let percent = (loaded.min(total) * 100 / total) as u8;
        let bucket = percent - percent % self.step;
        let bucket = if percent == 100 { 100 } else { bucket };
        self.emit(bucket)
    }

    /// Report 100 unless it was already reported
    pub fn complete(&mut self) -> Option<u8> {
        self.emit(100)
    }

    fn emit(&mut self, percent: u8) -> Option<u8> {
        if self.last.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_STEP)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetNode {
    pub name: Option<String>,
    pub transform: Transform,
    pub children: Vec<usize>,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetPrimitive {
    pub geometry: GeometryData,
    /// Index into [`LoadedAsset::materials`]; `None` uses the default material
    pub material: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetMesh {
    pub name: Option<String>,
    pub primitives: Vec<AssetPrimitive>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetSkin {
    /// Asset node indices
    pub joints: Vec<usize>,
    pub inverse_bind: Vec<Mat4>,
}

/// A parsed model, ready to mount
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAsset {
    pub source: String,
    pub nodes: Vec<AssetNode>,
    pub roots: Vec<usize>,
    pub meshes: Vec<AssetMesh>,
    pub materials: Vec<MaterialData>,
    pub textures: Vec<TextureData>,
    pub skins: Vec<AssetSkin>,
    pub clips: Vec<AnimationClip>,
}

impl LoadedAsset {
    pub fn primitive_count(&self) -> usize {
        self.meshes.iter().map(|m| m.primitives.len()).sum()
    }
}

pub struct AssetLoader<F> {
    fetcher: F,
    progress_step: u8,
}

impl<F: AssetFetcher> AssetLoader<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            progress_step: DEFAULT_PROGRESS_STEP,
        }
    }

    pub fn with_progress_step(mut self, step: u8) -> Self {
        self.progress_step = step;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch and parse the asset at `url`. `progress` receives throttled percentages;
    /// the last report of a successful load is always 100.
    pub async fn load(
        &self,
        url: &str,
        token: &AccessToken,
        progress: &mut dyn FnMut(u8),
    ) -> Result<LoadedAsset, LoadError> {
        let mut throttle = ProgressThrottle::new(self.progress_step);
        let document_bytes = self.fetch(&append_token(url, token)).await?;
        let gltf = gltf::Gltf::from_slice(&document_bytes)?;
        let document = &gltf.document;

        let external = document
            .buffers()
            .filter(|b| matches!(b.source(), gltf::buffer::Source::Uri(uri) if !is_data_uri(uri)))
            .count()
            + document
                .images()
                .filter(|i| matches!(i.source(), gltf::image::Source::Uri { uri, .. } if !is_data_uri(uri)))
                .count();
        let total = 1 + external as u64;
        let mut done = 1;
        if let Some(percent) = throttle.update(done, Some(total)) {
            progress(percent);
        }

        let mut buffers = Vec::new();
        for buffer in document.buffers() {
            let data = match buffer.source() {
                gltf::buffer::Source::Bin => gltf
                    .blob
                    .clone()
                    .ok_or(LoadError::MissingBuffer(buffer.index()))?,
                gltf::buffer::Source::Uri(uri) => match decode_data_uri(uri)? {
                    Some((_, bytes)) => bytes,
                    None => {
                        let bytes = self.fetch(&append_token(&resolve_uri(url, uri), token)).await?;
                        done += 1;
                        if let Some(percent) = throttle.update(done, Some(total)) {
                            progress(percent);
                        }
                        bytes
                    }
                },
            };
            if data.len() < buffer.length() {
                return Err(LoadError::Invalid(format!(
                    "buffer {} is {} bytes, expected {}",
                    buffer.index(),
                    data.len(),
                    buffer.length()
                )));
            }
            buffers.push(data);
        }

        let mut images = Vec::new();
        for image in document.images() {
            let (mime_type, bytes) = match image.source() {
                gltf::image::Source::View { view, mime_type } => {
                    let data = buffers
                        .get(view.buffer().index())
                        .ok_or(LoadError::MissingBuffer(view.buffer().index()))?;
                    let range = view.offset()..view.offset() + view.length();
                    let bytes = data.get(range).ok_or_else(|| {
                        LoadError::Invalid(format!("image {} view out of bounds", image.index()))
                    })?;
                    (Some(mime_type.to_string()), bytes.to_vec())
                }
                gltf::image::Source::Uri { uri, mime_type } => match decode_data_uri(uri)? {
                    Some((data_mime, bytes)) => (mime_type.map(str::to_string).or(data_mime), bytes),
                    None => {
                        let bytes = self.fetch(&append_token(&resolve_uri(url, uri), token)).await?;
                        done += 1;
                        if let Some(percent) = throttle.update(done, Some(total)) {
                            progress(percent);
                        }
                        (mime_type.map(str::to_string), bytes)
                    }
                },
            };
            images.push((image.name().map(str::to_string), mime_type, bytes));
        }

        let materials: Vec<MaterialData> = document.materials().map(|m| read_material(&m)).collect();
        let linear: HashSet<usize> = materials
            .iter()
            .flat_map(|m| [m.metallic_roughness_texture, m.normal_texture, m.occlusion_texture])
            .flatten()
            .collect();

        let mut textures = Vec::new();
        for texture in document.textures() {
            let image_index = texture.source().index();
            let (image_name, mime_type, bytes) = images.get(image_index).ok_or_else(|| {
                LoadError::Invalid(format!("texture {} has no image", texture.index()))
            })?;
            textures.push(TextureData {
                name: texture.name().map(str::to_string).or_else(|| image_name.clone()),
                mime_type: mime_type.clone(),
                bytes: bytes.clone(),
                srgb: !linear.contains(&texture.index()),
            });
        }

        let meshes = document
            .meshes()
            .map(|mesh| read_mesh(&mesh, &buffers))
            .collect::<Result<Vec<_>, _>>()?;
        let skins = document.skins().map(|skin| read_skin(&skin, &buffers)).collect();
        let nodes: Vec<AssetNode> = document.nodes().map(|n| read_node(&n)).collect();
        let roots = match document.default_scene().or_else(|| document.scenes().next()) {
            Some(scene) => scene.nodes().map(|n| n.index()).collect(),
            None => orphan_nodes(&nodes),
        };

        let mut clips = Vec::new();
        for animation in document.animations() {
            let mut channels = Vec::new();
            for channel in animation.channels() {
                match read_channel(&channel, &buffers) {
                    Ok(Some(channel)) => channels.push(channel),
                    Ok(None) => {}
                    Err(reason) => warn!(
                        animation = animation.index(),
                        reason = %reason,
                        "Skipping animation channel"
                    ),
                }
            }
            clips.push(AnimationClip::new(animation.name().map(str::to_string), channels));
        }

        if let Some(percent) = throttle.complete() {
            progress(percent);
        }

        let asset = LoadedAsset {
            source: url.to_string(),
            nodes,
            roots,
            meshes,
            materials,
            textures,
            skins,
            clips,
        };
        info!(
            url = %url,
            nodes = asset.nodes.len(),
            primitives = asset.primitive_count(),
            clips = asset.clips.len(),
            "Loaded model"
        );
        Ok(asset)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        debug!(url = %redact(url), "Fetching asset resource");
        self.fetcher.fetch(url).await.map_err(|source| match source {
            FetchError::Status { status } if status == 401 || status == 403 => {
                LoadError::Unauthorized { status }
            }
            source => LoadError::Fetch {
                url: redact(url).to_string(),
                source,
            },
        })
    }
}

/// URL without its query string, for logs and errors
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn is_data_uri(uri: &str) -> bool {
    uri.starts_with("data:")
}

/// Decode a base64 `data:` URI into its media type and bytes. `Ok(None)` for any other URI.
fn decode_data_uri(uri: &str) -> Result<Option<(Option<String>, Vec<u8>)>, LoadError> {
    let Some(rest) = uri.strip_prefix("data:") else {
        return Ok(None);
    };
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| LoadError::Invalid("data URI without payload".into()))?;
    let Some(media_type) = header.strip_suffix(";base64") else {
        return Err(LoadError::Invalid("only base64 data URIs are supported".into()));
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| LoadError::Invalid(format!("bad base64 in data URI: {}", e)))?;
    let media_type = (!media_type.is_empty()).then(|| media_type.to_string());
    Ok(Some((media_type, bytes)))
}

/// Resolve a resource URI against the document URL, dropping the document's query
fn resolve_uri(base: &str, uri: &str) -> String {
    if uri.contains("://") {
        return uri.to_string();
    }
    let base = redact(base);
    match base.rfind('/') {
        Some(slash) => format!("{}{}", &base[..=slash], uri),
        None => uri.to_string(),
    }
}

fn texture_index(info: Option<gltf::texture::Info<'_>>) -> Option<usize> {
    info.map(|i| i.texture().index())
}

fn read_material(material: &gltf::Material<'_>) -> MaterialData {
    let pbr = material.pbr_metallic_roughness();
    MaterialData {
        name: material.name().map(str::to_string),
        base_color: pbr.base_color_factor(),
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        emissive: material.emissive_factor(),
        double_sided: material.double_sided(),
        alpha_mode: match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
            gltf::material::AlphaMode::Mask => AlphaMode::Mask,
            gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        },
        alpha_cutoff: material.alpha_cutoff().unwrap_or(0.5),
        base_color_texture: texture_index(pbr.base_color_texture()),
        metallic_roughness_texture: texture_index(pbr.metallic_roughness_texture()),
        normal_texture: material.normal_texture().map(|t| t.texture().index()),
        occlusion_texture: material.occlusion_texture().map(|t| t.texture().index()),
        emissive_texture: texture_index(material.emissive_texture()),
    }
}

fn read_mesh(mesh: &gltf::Mesh<'_>, buffers: &[Vec<u8>]) -> Result<AssetMesh, LoadError> {
    let mut primitives = Vec::new();
    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            debug!(
                mesh = mesh.index(),
                mode = ?primitive.mode(),
                "Skipping non-triangle primitive"
            );
            continue;
        }
        let reader = primitive.reader(|b| buffers.get(b.index()).map(Vec::as_slice));
        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .ok_or_else(|| {
                LoadError::Invalid(format!(
                    "mesh {} primitive {} has no positions",
                    mesh.index(),
                    primitive.index()
                ))
            })?
            .collect();
        let indices = reader.read_indices().map(|i| i.into_u32().collect::<Vec<_>>());
        let mut normals: Vec<[f32; 3]> = reader
            .read_normals()
            .map(|n| n.collect())
            .unwrap_or_default();
        if normals.len() != positions.len() {
            let fallback: Vec<u32>;
            let tris = match &indices {
                Some(indices) => indices.as_slice(),
                None => {
                    fallback = (0..positions.len() as u32).collect();
                    &fallback
                }
            };
            normals = compute_normals(&positions, tris);
        }
        let uvs = reader
            .read_tex_coords(0)
            .map(|uv| uv.into_f32().collect())
            .unwrap_or_default();
        let joints = reader
            .read_joints(0)
            .map(|j| j.into_u16().collect())
            .unwrap_or_default();
        let weights = reader
            .read_weights(0)
            .map(|w| w.into_f32().collect())
            .unwrap_or_default();

        primitives.push(AssetPrimitive {
            geometry: GeometryData {
                positions,
                normals,
                uvs,
                indices,
                joints,
                weights,
            },
            material: primitive.material().index(),
        });
    }
    Ok(AssetMesh {
        name: mesh.name().map(str::to_string),
        primitives,
    })
}

fn compute_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }
        let a = Vec3::from(positions[i0]);
        let b = Vec3::from(positions[i1]);
        let c = Vec3::from(positions[i2]);
        let normal = (b - a).cross(c - a);
        normals[i0] += normal;
        normals[i1] += normal;
        normals[i2] += normal;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
        .collect()
}

fn read_skin(skin: &gltf::Skin<'_>, buffers: &[Vec<u8>]) -> AssetSkin {
    let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
    let mut inverse_bind = vec![Mat4::IDENTITY; joints.len()];
    let reader = skin.reader(|b| buffers.get(b.index()).map(Vec::as_slice));
    if let Some(matrices) = reader.read_inverse_bind_matrices() {
        for (slot, matrix) in inverse_bind.iter_mut().zip(matrices) {
            *slot = Mat4::from_cols_array_2d(&matrix);
        }
    }
    AssetSkin {
        joints,
        inverse_bind,
    }
}

fn read_node(node: &gltf::Node<'_>) -> AssetNode {
    let (t, r, s) = node.transform().decomposed();
    AssetNode {
        name: node.name().map(str::to_string),
        transform: Transform {
            translation: Vec3::from_array(t),
            rotation: Quat::from_array(r).normalize(),
            scale: Vec3::from_array(s),
        },
        children: node.children().map(|c| c.index()).collect(),
        mesh: node.mesh().map(|m| m.index()),
        skin: node.skin().map(|s| s.index()),
    }
}

fn orphan_nodes(nodes: &[AssetNode]) -> Vec<usize> {
    let children: HashSet<usize> = nodes.iter().flat_map(|n| n.children.iter().copied()).collect();
    (0..nodes.len()).filter(|i| !children.contains(i)).collect()
}

fn read_channel(
    channel: &gltf::animation::Channel<'_>,
    buffers: &[Vec<u8>],
) -> Result<Option<Channel>, String> {
    use gltf::animation::util::ReadOutputs;
    use gltf::animation::Property;

    let property = match channel.target().property() {
        Property::Translation => ChannelProperty::Translation,
        Property::Rotation => ChannelProperty::Rotation,
        Property::Scale => ChannelProperty::Scale,
        Property::MorphTargetWeights => return Ok(None),
    };
    let interpolation = match channel.sampler().interpolation() {
        gltf::animation::Interpolation::Step => Interpolation::Step,
        gltf::animation::Interpolation::Linear => Interpolation::Linear,
        gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
    };
    let reader = channel.reader(|b| buffers.get(b.index()).map(Vec::as_slice));
    let times: Vec<f32> = reader
        .read_inputs()
        .ok_or("missing keyframe times")?
        .collect();
    let values = match reader.read_outputs().ok_or("missing keyframe values")? {
        ReadOutputs::Translations(v) | ReadOutputs::Scales(v) => {
            Keyframes::Vec3(v.map(Vec3::from_array).collect())
        }
        ReadOutputs::Rotations(r) => Keyframes::Quat(r.into_f32().map(Quat::from_array).collect()),
        ReadOutputs::MorphTargetWeights(_) => return Ok(None),
    };

    let channel = Channel {
        target: channel.target().node().index(),
        property,
        interpolation,
        times,
        values,
    };
    channel.validate()?;
    Ok(Some(channel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapFetcher {
        responses: HashMap<String, Result<Vec<u8>, FetchError>>,
        requests: RefCell<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, response: Result<Vec<u8>, FetchError>) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }
    }

    impl AssetFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.requests.borrow_mut().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .unwrap_or(Err(FetchError::Status { status: 404 }))
        }
    }

    /// One triangle, a translation track on its parent, and a one-pixel texture
    fn model_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        for i in [0u16, 1, 2, 0] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        for t in [0.0f32, 1.0] {
            bytes.extend_from_slice(&t.to_le_bytes());
        }
        for v in [0.0f32, 0.0, 0.0, 0.0, 2.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(bytes.len(), 76);
        bytes
    }

    fn model_json(buffer_uri: &str) -> Vec<u8> {
        let doc = json!({
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [
                { "name": "hips", "children": [1], "translation": [0.0, 1.0, 0.0] },
                { "name": "body", "mesh": 0 }
            ],
            "meshes": [{
                "name": "body",
                "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }]
            }],
            "materials": [{
                "name": "skin",
                "pbrMetallicRoughness": {
                    "baseColorFactor": [0.8, 0.6, 0.5, 1.0],
                    "baseColorTexture": { "index": 0 },
                    "metallicFactor": 0.0,
                    "roughnessFactor": 0.7
                },
                "doubleSided": true
            }],
            "textures": [{ "source": 0 }],
            "images": [{ "uri": "data:image/png;base64,iVBORw0KGgo=" }],
            "animations": [{
                "name": "squat",
                "channels": [{ "sampler": 0, "target": { "node": 0, "path": "translation" } }],
                "samplers": [{ "input": 2, "output": 3, "interpolation": "LINEAR" }]
            }],
            "buffers": [{ "byteLength": 76, "uri": buffer_uri }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 },
                { "buffer": 0, "byteOffset": 44, "byteLength": 8 },
                { "buffer": 0, "byteOffset": 52, "byteLength": 24 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" },
                { "bufferView": 2, "componentType": 5126, "count": 2, "type": "SCALAR",
                  "min": [0.0], "max": [1.0] },
                { "bufferView": 3, "componentType": 5126, "count": 2, "type": "VEC3" }
            ]
        });
        serde_json::to_vec(&doc).unwrap()
    }

    fn data_uri(bytes: &[u8]) -> String {
        format!(
            "data:application/octet-stream;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    const MODEL_URL: &str = "https://store.example.net/motion-files/squat.gltf";
    const TOKEN: &str = "sv=2024&sig=abc";

    #[test]
    fn test_progress_throttle_steps() {
        let mut throttle = ProgressThrottle::new(10);
        assert_eq!(throttle.update(0, None), None);
        assert_eq!(throttle.update(0, Some(100)), Some(0));
        assert_eq!(throttle.update(5, Some(100)), None);
        assert_eq!(throttle.update(12, Some(100)), Some(10));
        assert_eq!(throttle.update(19, Some(100)), None);
        assert_eq!(throttle.update(57, Some(100)), Some(50));
        // never backwards
        assert_eq!(throttle.update(30, Some(100)), None);
        assert_eq!(throttle.update(100, Some(100)), Some(100));
        assert_eq!(throttle.complete(), None);
    }

    #[test]
    fn test_progress_complete_without_total() {
        let mut throttle = ProgressThrottle::default();
        assert_eq!(throttle.update(1234, None), None);
        assert_eq!(throttle.complete(), Some(100));
        assert_eq!(throttle.last(), Some(100));
    }

    #[test]
    fn test_resolve_uri() {
        assert_eq!(
            resolve_uri("https://a.net/files/model.gltf?sig=1", "model.bin"),
            "https://a.net/files/model.bin"
        );
        assert_eq!(resolve_uri("https://a.net/x.gltf", "https://b.net/y.bin"), "https://b.net/y.bin");
    }

    #[tokio::test]
    async fn test_load_embedded_model() {
        let fetcher = MapFetcher::default().with(
            &format!("{}?{}", MODEL_URL, TOKEN),
            Ok(model_json(&data_uri(&model_bytes()))),
        );
        let loader = AssetLoader::new(fetcher);
        let mut reported = Vec::new();
        let asset = loader
            .load(MODEL_URL, &AccessToken::new(TOKEN), &mut |p| reported.push(p))
            .await
            .unwrap();

        assert_eq!(reported, vec![100]);
        assert_eq!(asset.roots, vec![0]);
        assert_eq!(asset.nodes[0].children, vec![1]);
        assert_eq!(asset.nodes[0].transform.translation, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(asset.nodes[1].mesh, Some(0));

        let primitive = &asset.meshes[0].primitives[0];
        assert_eq!(primitive.geometry.vertex_count(), 3);
        assert_eq!(primitive.geometry.indices, Some(vec![0, 1, 2]));
        assert_eq!(primitive.geometry.normals, vec![[0.0, 0.0, 1.0]; 3]);
        assert_eq!(primitive.material, Some(0));

        let material = &asset.materials[0];
        assert!(material.double_sided);
        assert_eq!(material.base_color_texture, Some(0));
        assert_eq!(asset.textures.len(), 1);
        assert!(asset.textures[0].srgb);
        assert_eq!(asset.textures[0].mime_type.as_deref(), Some("image/png"));

        let clip = &asset.clips[0];
        assert_eq!(clip.name.as_deref(), Some("squat"));
        assert_eq!(clip.duration, 1.0);
        assert_eq!(
            clip.channels[0].sample_vec3(0.5),
            Some(Vec3::new(0.0, 1.0, 0.0))
        );
    }

    #[tokio::test]
    async fn test_external_buffer_fetched_with_token() {
        let fetcher = MapFetcher::default()
            .with(&format!("{}?{}", MODEL_URL, TOKEN), Ok(model_json("squat.bin")))
            .with(
                &format!("https://store.example.net/motion-files/squat.bin?{}", TOKEN),
                Ok(model_bytes()),
            );
        let loader = AssetLoader::new(fetcher).with_progress_step(25);
        let mut reported = Vec::new();
        let asset = loader
            .load(MODEL_URL, &AccessToken::new(TOKEN), &mut |p| reported.push(p))
            .await
            .unwrap();

        assert_eq!(asset.primitive_count(), 1);
        assert_eq!(reported, vec![50, 100]);
        assert_eq!(loader.fetcher().requests.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let fetcher = MapFetcher::default().with(
            &format!("{}?{}", MODEL_URL, TOKEN),
            Err(FetchError::Status { status: 403 }),
        );
        let loader = AssetLoader::new(fetcher);
        let result = loader
            .load(MODEL_URL, &AccessToken::new(TOKEN), &mut |_| {})
            .await;
        assert!(matches!(result, Err(LoadError::Unauthorized { status: 403 })));
    }

    #[tokio::test]
    async fn test_missing_resource_is_fetch_error() {
        let fetcher = MapFetcher::default()
            .with(&format!("{}?{}", MODEL_URL, TOKEN), Ok(model_json("gone.bin")));
        let loader = AssetLoader::new(fetcher);
        let mut reported = Vec::new();
        let result = loader
            .load(MODEL_URL, &AccessToken::new(TOKEN), &mut |p| reported.push(p))
            .await;
        match result {
            Err(LoadError::Fetch { url, source }) => {
                assert_eq!(url, "https://store.example.net/motion-files/gone.bin");
                assert_eq!(source, FetchError::Status { status: 404 });
            }
            other => panic!("unexpected result {:?}", other.map(|a| a.source)),
        }
        assert!(!reported.contains(&100));
    }

    #[tokio::test]
    async fn test_garbage_document() {
        let fetcher = MapFetcher::default()
            .with(&format!("{}?{}", MODEL_URL, TOKEN), Ok(b"not a model".to_vec()));
        let result = AssetLoader::new(fetcher)
            .load(MODEL_URL, &AccessToken::new(TOKEN), &mut |_| {})
            .await;
        assert!(matches!(result, Err(LoadError::Parse(_))));
    }
}
