//! Glasses asset loading and normalisation.
//!
//! Reads a glTF 2.0 asset (binary `.glb` container or JSON `.gltf`), computes
//! its scene bounds from accessor extents and node transforms, and derives the
//! normalisation that centres it at the origin with a unit largest dimension.
//! Geometry itself stays opaque; the renderer receives the original bytes.

use crate::types::Transform;
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const GLB_VERSION: u32 = 2;
const GLB_HEADER_LEN: usize = 12;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;
const READ_CHUNK: usize = 64 * 1024;
/// Deepest node hierarchy walked before the file is rejected.
const MAX_NODE_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("unsupported asset URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("failed to read asset: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed asset: {0}")]
    Malformed(String),
    #[error("invalid glTF JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("asset has no measurable geometry")]
    Degenerate,
}

/// Bytes read so far, for loading indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadProgress {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl LoadProgress {
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some(((self.loaded.min(total) * 100) / total) as u8),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Document {
    scene: Option<usize>,
    #[serde(default)]
    scenes: Vec<SceneDef>,
    #[serde(default)]
    nodes: Vec<NodeDef>,
    #[serde(default)]
    meshes: Vec<MeshDef>,
    #[serde(default)]
    accessors: Vec<AccessorDef>,
    #[serde(default)]
    animations: Vec<AnimationDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct SceneDef {
    #[serde(default)]
    nodes: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct NodeDef {
    mesh: Option<usize>,
    #[serde(default)]
    children: Vec<usize>,
    translation: Option<[f32; 3]>,
    rotation: Option<[f32; 4]>,
    scale: Option<[f32; 3]>,
    matrix: Option<[f32; 16]>,
}

impl NodeDef {
    fn local_matrix(&self) -> Mat4 {
        if let Some(m) = self.matrix {
            return Mat4::from_cols_array(&m);
        }
        Mat4::from_scale_rotation_translation(
            self.scale.map(Vec3::from).unwrap_or(Vec3::ONE),
            self.rotation.map(Quat::from_array).unwrap_or(Quat::IDENTITY),
            self.translation.map(Vec3::from).unwrap_or(Vec3::ZERO),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MeshDef {
    #[serde(default)]
    primitives: Vec<PrimitiveDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct PrimitiveDef {
    #[serde(default)]
    attributes: HashMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct AccessorDef {
    min: Option<Vec<f32>>,
    max: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnimationDef {
    name: Option<String>,
    #[serde(default)]
    samplers: Vec<SamplerDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct SamplerDef {
    input: usize,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn max_dimension(&self) -> f32 {
        self.size().max_element()
    }

    fn include(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Bounds of this box after an affine transform.
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.include(m.transform_point3(corner));
        }
        out
    }
}

/// Centre-then-scale mapping into the unit box around the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Normalization {
    pub offset: Vec3,
    pub scale: f32,
}

impl Normalization {
    pub fn from_bounds(bounds: &Aabb) -> Result<Self, AssetError> {
        let max_dim = bounds.max_dimension();
        if bounds.is_empty() || !max_dim.is_finite() || max_dim <= 0.0 {
            return Err(AssetError::Degenerate);
        }
        Ok(Self {
            offset: -bounds.center(),
            scale: 1.0 / max_dim,
        })
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale(Vec3::splat(self.scale)) * Mat4::from_translation(self.offset)
    }
}

/// First animation clip of an asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationClip {
    pub name: String,
    /// Seconds.
    pub duration: f32,
}

/// Looping playback of one clip, advanced once per render tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationPlayer {
    pub clip: AnimationClip,
    time: f32,
}

impl AnimationPlayer {
    pub fn new(clip: AnimationClip) -> Self {
        Self { clip, time: 0.0 }
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn advance(&mut self, delta: Duration) {
        if self.clip.duration > 0.0 {
            self.time = (self.time + delta.as_secs_f32()) % self.clip.duration;
        }
    }
}

/// A loaded, normalised glasses model.
#[derive(Debug, Clone)]
pub struct GlassesAsset {
    url: String,
    bytes: Arc<[u8]>,
    bounds: Aabb,
    normalization: Normalization,
    animation: Option<AnimationPlayer>,
    mesh_count: usize,
    transform: Transform,
}

impl GlassesAsset {
    /// Parse and normalise an asset already in memory.
    pub fn from_bytes(url: &str, bytes: Vec<u8>) -> Result<Self, AssetError> {
        let doc = parse_document(&bytes)?;
        let bounds = scene_bounds(&doc)?;
        let normalization = Normalization::from_bounds(&bounds)?;
        let animation = first_clip(&doc).map(AnimationPlayer::new);

        tracing::debug!(
            url,
            size = ?bounds.size(),
            scale = normalization.scale,
            animation = animation.as_ref().map(|a| a.clip.name.as_str()),
            "normalised glasses asset"
        );

        Ok(Self {
            url: url.to_string(),
            bytes: bytes.into(),
            bounds,
            normalization,
            animation,
            mesh_count: doc.meshes.len(),
            transform: Transform::default(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Original file bytes for the renderer.
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn normalized_bounds(&self) -> Aabb {
        self.bounds.transformed(&self.normalization.matrix())
    }

    pub fn mesh_count(&self) -> usize {
        self.mesh_count
    }

    pub fn animation(&self) -> Option<&AnimationPlayer> {
        self.animation.as_ref()
    }

    /// Advance the animation clock, if the asset has a clip.
    pub fn advance_animation(&mut self, delta: Duration) {
        if let Some(player) = self.animation.as_mut() {
            player.advance(delta);
        }
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Only [`crate::placement::place`] writes the transform.
    pub(crate) fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// World matrix: placement applied on top of normalisation.
    pub fn model_matrix(&self) -> Mat4 {
        let t = self.transform;
        Mat4::from_scale_rotation_translation(Vec3::splat(t.scale), t.rotation, t.position)
            * self.normalization.matrix()
    }
}

/// Load a glasses asset from `url` (`file://` or a plain path), publishing
/// byte progress on `progress`.
pub async fn load(url: &str, progress: &watch::Sender<LoadProgress>) -> Result<GlassesAsset, AssetError> {
    let path = resolve_path(url)?;
    tracing::info!(url, path = %path.display(), "loading glasses asset");

    let mut file = tokio::fs::File::open(&path).await?;
    let total = file.metadata().await.ok().map(|m| m.len());
    progress.send_replace(LoadProgress { loaded: 0, total });

    let mut bytes = Vec::with_capacity(total.unwrap_or(0) as usize);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);
        progress.send_replace(LoadProgress {
            loaded: bytes.len() as u64,
            total,
        });
    }

    let asset = GlassesAsset::from_bytes(url, bytes)?;
    tracing::info!(url, meshes = asset.mesh_count(), "glasses asset loaded");
    Ok(asset)
}

fn resolve_path(url: &str) -> Result<PathBuf, AssetError> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    match url.split_once("://") {
        Some((scheme, _)) => Err(AssetError::UnsupportedScheme(scheme.to_string())),
        None => Ok(PathBuf::from(url)),
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, AssetError> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| AssetError::Malformed(format!("truncated at byte {at}")))
}

fn parse_document(bytes: &[u8]) -> Result<Document, AssetError> {
    if bytes.len() >= 4 && read_u32(bytes, 0)? == GLB_MAGIC {
        let json = glb_json_chunk(bytes)?;
        return Ok(serde_json::from_slice(json)?);
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Locate the JSON chunk of a GLB container.
fn glb_json_chunk(bytes: &[u8]) -> Result<&[u8], AssetError> {
    let version = read_u32(bytes, 4)?;
    if version != GLB_VERSION {
        return Err(AssetError::Malformed(format!("unsupported GLB version {version}")));
    }
    let declared = read_u32(bytes, 8)? as usize;
    if declared > bytes.len() {
        return Err(AssetError::Malformed(format!(
            "GLB declares {declared} bytes, file has {}",
            bytes.len()
        )));
    }

    let mut at = GLB_HEADER_LEN;
    while at + 8 <= declared {
        let len = read_u32(bytes, at)? as usize;
        let kind = read_u32(bytes, at + 4)?;
        let data = bytes
            .get(at + 8..at + 8 + len)
            .ok_or_else(|| AssetError::Malformed("chunk overruns file".into()))?;
        match kind {
            CHUNK_JSON => return Ok(data),
            CHUNK_BIN => {}
            other => tracing::debug!(chunk = other, "skipping unknown GLB chunk"),
        }
        at += 8 + len;
    }
    Err(AssetError::Malformed("GLB has no JSON chunk".into()))
}

fn scene_bounds(doc: &Document) -> Result<Aabb, AssetError> {
    let roots: Vec<usize> = match doc.scenes.get(doc.scene.unwrap_or(0)) {
        Some(scene) => scene.nodes.clone(),
        None => {
            // No scene list: every node that is nobody's child is a root.
            let children: Vec<usize> = doc.nodes.iter().flat_map(|n| n.children.iter().copied()).collect();
            (0..doc.nodes.len()).filter(|i| !children.contains(i)).collect()
        }
    };

    let mut bounds = Aabb::EMPTY;
    let mut stack: Vec<(usize, Mat4, usize)> = roots.into_iter().map(|n| (n, Mat4::IDENTITY, 0)).collect();

    while let Some((idx, parent, depth)) = stack.pop() {
        if depth > MAX_NODE_DEPTH {
            return Err(AssetError::Malformed("node hierarchy too deep or cyclic".into()));
        }
        let node = doc
            .nodes
            .get(idx)
            .ok_or_else(|| AssetError::Malformed(format!("node {idx} out of range")))?;
        let world = parent * node.local_matrix();

        if let Some(mesh_idx) = node.mesh {
            let mesh = doc
                .meshes
                .get(mesh_idx)
                .ok_or_else(|| AssetError::Malformed(format!("mesh {mesh_idx} out of range")))?;
            for prim in &mesh.primitives {
                if let Some(local) = prim.attributes.get("POSITION").and_then(|&a| accessor_bounds(doc, a)) {
                    let world_box = local.transformed(&world);
                    bounds.include(world_box.min);
                    bounds.include(world_box.max);
                }
            }
        }
        stack.extend(node.children.iter().map(|&c| (c, world, depth + 1)));
    }

    if bounds.is_empty() {
        return Err(AssetError::Degenerate);
    }
    Ok(bounds)
}

fn accessor_bounds(doc: &Document, idx: usize) -> Option<Aabb> {
    let acc = doc.accessors.get(idx)?;
    let (min, max) = (acc.min.as_ref()?, acc.max.as_ref()?);
    if min.len() < 3 || max.len() < 3 {
        return None;
    }
    Some(Aabb::new(
        Vec3::new(min[0], min[1], min[2]),
        Vec3::new(max[0], max[1], max[2]),
    ))
}

fn first_clip(doc: &Document) -> Option<AnimationClip> {
    let anim = doc.animations.first()?;
    let duration = anim
        .samplers
        .iter()
        .filter_map(|s| doc.accessors.get(s.input)?.max.as_ref()?.first().copied())
        .fold(0.0f32, f32::max);
    Some(AnimationClip {
        name: anim.name.clone().unwrap_or_else(|| "animation_0".to_string()),
        duration,
    })
}
