//! Keyframe input: the `KeyframeSource` seam plus an in-memory implementation.
//!
//! Model (`MotionTracks`):
//! - Per-bone keys ordered by frame. Position and scale interpolate linearly,
//!   rotation by slerp. Local matrices and cancelable values without a partner
//!   key hold the left key.
//! - Per-morph ratio keys interpolate linearly.
//! - Per-IK-bone enable keys and physics keys hold the last key at or before
//!   the frame.
//! - Frames before the first key clamp to it, frames after the last key clamp
//!   to the last one.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{quat_from_xyzw, xyzw_of};
use crate::physics::{JointDelta, RigidBodyDelta};

/// One bone's sampled transform at a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BoneFrame {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub scale: Vector3<f64>,
    pub cancelable_position: Option<Vector3<f64>>,
    pub cancelable_rotation: Option<UnitQuaternion<f64>>,
    pub cancelable_scale: Option<Vector3<f64>>,
    pub local_matrix: Option<Matrix4<f64>>,
}

impl Default for BoneFrame {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::repeat(1.0),
            cancelable_position: None,
            cancelable_rotation: None,
            cancelable_scale: None,
            local_matrix: None,
        }
    }
}

/// Keyframe input consumed by the deformer. Produced by motion loaders and
/// interpolators outside this crate; `MotionTracks` is the bundled one.
pub trait KeyframeSource {
    /// Sampled transform of a bone, `None` when the bone has no keys.
    fn bone_frame(&self, bone: &str, frame: f32) -> Option<BoneFrame>;

    /// Sampled morph ratio, `None` when the morph has no keys.
    fn morph_ratio(&self, morph: &str, frame: f32) -> Option<f64>;

    /// Whether the IK bone is enabled at `frame`.
    fn ik_enabled(&self, _ik_bone: &str, _frame: f32) -> bool {
        true
    }

    fn rigid_body_deltas(&self, _frame: f32) -> Vec<RigidBodyDelta> {
        Vec::new()
    }

    fn joint_deltas(&self, _frame: f32) -> Vec<JointDelta> {
        Vec::new()
    }

    /// Identity of the keyframe content, used as a cache key.
    fn content_hash(&self) -> u64;
}

fn identity_xyzw() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn unit_scale() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneKey {
    pub frame: f32,
    #[serde(default)]
    pub position: [f64; 3],
    /// Quaternion `[x, y, z, w]`.
    #[serde(default = "identity_xyzw")]
    pub rotation: [f64; 4],
    #[serde(default = "unit_scale")]
    pub scale: [f64; 3],
    #[serde(default)]
    pub cancelable_position: Option<[f64; 3]>,
    #[serde(default)]
    pub cancelable_rotation: Option<[f64; 4]>,
    #[serde(default)]
    pub cancelable_scale: Option<[f64; 3]>,
    /// Column-major 4x4 local-axis matrix.
    #[serde(default)]
    pub local_matrix: Option<[f64; 16]>,
}

impl BoneKey {
    pub fn new(frame: f32) -> Self {
        Self {
            frame,
            position: [0.0; 3],
            rotation: identity_xyzw(),
            scale: unit_scale(),
            cancelable_position: None,
            cancelable_rotation: None,
            cancelable_scale: None,
            local_matrix: None,
        }
    }

    pub fn with_position(mut self, position: Vector3<f64>) -> Self {
        self.position = position.into();
        self
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.rotation = xyzw_of(&rotation);
        self
    }

    pub fn with_scale(mut self, scale: Vector3<f64>) -> Self {
        self.scale = scale.into();
        self
    }

    pub fn with_cancelable_rotation(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.cancelable_rotation = Some(xyzw_of(&rotation));
        self
    }

    pub fn with_cancelable_position(mut self, position: Vector3<f64>) -> Self {
        self.cancelable_position = Some(position.into());
        self
    }

    fn to_frame(&self) -> BoneFrame {
        BoneFrame {
            position: Vector3::from(self.position),
            rotation: quat_from_xyzw(self.rotation),
            scale: Vector3::from(self.scale),
            cancelable_position: self.cancelable_position.map(Vector3::from),
            cancelable_rotation: self.cancelable_rotation.map(quat_from_xyzw),
            cancelable_scale: self.cancelable_scale.map(Vector3::from),
            local_matrix: self.local_matrix.map(|m| Matrix4::from_column_slice(&m)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MorphKey {
    pub frame: f32,
    pub ratio: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IkKey {
    pub frame: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicsKey {
    pub frame: f32,
    #[serde(default)]
    pub rigid_bodies: Vec<RigidBodyDelta>,
    #[serde(default)]
    pub joints: Vec<JointDelta>,
}

/// In-memory keyframe tracks keyed by bone / morph / IK bone name.
///
/// Tracks are only changed through the `insert_*` methods, which also drop
/// the memoized content hash.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTracks {
    bones: BTreeMap<String, Vec<BoneKey>>,
    morphs: BTreeMap<String, Vec<MorphKey>>,
    ik: BTreeMap<String, Vec<IkKey>>,
    physics: Vec<PhysicsKey>,
    #[serde(skip)]
    hash: OnceCell<u64>,
}

impl PartialEq for MotionTracks {
    fn eq(&self, other: &Self) -> bool {
        self.bones == other.bones
            && self.morphs == other.morphs
            && self.ik == other.ik
            && self.physics == other.physics
    }
}

/// Segment containing `frame`: `(left, right, t)`. Clamps to the end keys.
fn find_segment(frames: impl ExactSizeIterator<Item = f32> + Clone, frame: f32) -> (usize, usize, f32) {
    let n = frames.len();
    if n == 0 {
        return (0, 0, 0.0);
    }
    let right = frames.clone().take_while(|&f| f <= frame).count();
    if right == 0 {
        return (0, 0, 0.0);
    }
    if right == n {
        return (n - 1, n - 1, 0.0);
    }
    let mut it = frames.skip(right - 1);
    let (f0, f1) = match (it.next(), it.next()) {
        (Some(f0), Some(f1)) => (f0, f1),
        _ => return (n - 1, n - 1, 0.0),
    };
    let denom = (f1 - f0).max(f32::EPSILON);
    (right - 1, right, ((frame - f0) / denom).clamp(0.0, 1.0))
}

/// Index of the last key at or before `frame`, clamped to the first key.
fn hold_index(frames: impl Iterator<Item = f32>, frame: f32) -> usize {
    frames.take_while(|&f| f <= frame).count().saturating_sub(1)
}

fn insert_sorted<T>(keys: &mut Vec<T>, key: T, frame_of: impl Fn(&T) -> f32) {
    let frame = frame_of(&key);
    match keys.iter().position(|k| frame_of(k) >= frame) {
        Some(i) if frame_of(&keys[i]) == frame => keys[i] = key,
        Some(i) => keys.insert(i, key),
        None => keys.push(key),
    }
}

fn lerp_opt<T>(a: Option<T>, b: Option<T>, f: impl Fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, _) => a,
    }
}

impl MotionTracks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut tracks: Self = serde_json::from_str(json)?;
        for keys in tracks.bones.values_mut() {
            keys.sort_by(|a, b| a.frame.total_cmp(&b.frame));
        }
        for keys in tracks.morphs.values_mut() {
            keys.sort_by(|a, b| a.frame.total_cmp(&b.frame));
        }
        for keys in tracks.ik.values_mut() {
            keys.sort_by(|a, b| a.frame.total_cmp(&b.frame));
        }
        tracks.physics.sort_by(|a, b| a.frame.total_cmp(&b.frame));
        Ok(tracks)
    }

    pub fn bones(&self) -> &BTreeMap<String, Vec<BoneKey>> {
        &self.bones
    }

    pub fn morphs(&self) -> &BTreeMap<String, Vec<MorphKey>> {
        &self.morphs
    }

    pub fn ik(&self) -> &BTreeMap<String, Vec<IkKey>> {
        &self.ik
    }

    pub fn physics(&self) -> &[PhysicsKey] {
        &self.physics
    }

    /// Insert or replace the key at `key.frame`.
    pub fn insert_bone_key(&mut self, bone: &str, key: BoneKey) {
        self.hash.take();
        insert_sorted(self.bones.entry(bone.to_string()).or_default(), key, |k| k.frame);
    }

    pub fn insert_morph_key(&mut self, morph: &str, frame: f32, ratio: f64) {
        self.hash.take();
        insert_sorted(
            self.morphs.entry(morph.to_string()).or_default(),
            MorphKey { frame, ratio },
            |k| k.frame,
        );
    }

    pub fn set_ik_enabled(&mut self, ik_bone: &str, frame: f32, enabled: bool) {
        self.hash.take();
        insert_sorted(
            self.ik.entry(ik_bone.to_string()).or_default(),
            IkKey { frame, enabled },
            |k| k.frame,
        );
    }

    pub fn insert_physics_key(&mut self, key: PhysicsKey) {
        self.hash.take();
        insert_sorted(&mut self.physics, key, |k| k.frame);
    }
}

impl KeyframeSource for MotionTracks {
    fn bone_frame(&self, bone: &str, frame: f32) -> Option<BoneFrame> {
        let keys = self.bones.get(bone)?;
        let (i0, i1, t) = find_segment(keys.iter().map(|k| k.frame), frame);
        let left = keys.get(i0)?.to_frame();
        if i0 == i1 {
            return Some(left);
        }
        let right = keys.get(i1)?.to_frame();
        let t = t as f64;
        Some(BoneFrame {
            position: left.position.lerp(&right.position, t),
            rotation: left
                .rotation
                .try_slerp(&right.rotation, t, 1e-9)
                .unwrap_or(left.rotation),
            scale: left.scale.lerp(&right.scale, t),
            cancelable_position: lerp_opt(left.cancelable_position, right.cancelable_position, |a, b| {
                a.lerp(&b, t)
            }),
            cancelable_rotation: lerp_opt(left.cancelable_rotation, right.cancelable_rotation, |a, b| {
                a.try_slerp(&b, t, 1e-9).unwrap_or(a)
            }),
            cancelable_scale: lerp_opt(left.cancelable_scale, right.cancelable_scale, |a, b| {
                a.lerp(&b, t)
            }),
            local_matrix: left.local_matrix,
        })
    }

    fn morph_ratio(&self, morph: &str, frame: f32) -> Option<f64> {
        let keys = self.morphs.get(morph)?;
        let (i0, i1, t) = find_segment(keys.iter().map(|k| k.frame), frame);
        let left = keys.get(i0)?.ratio;
        let right = keys.get(i1)?.ratio;
        Some(left + (right - left) * t as f64)
    }

    fn ik_enabled(&self, ik_bone: &str, frame: f32) -> bool {
        match self.ik.get(ik_bone) {
            Some(keys) => keys
                .get(hold_index(keys.iter().map(|k| k.frame), frame))
                .map_or(true, |k| k.enabled),
            None => true,
        }
    }

    fn rigid_body_deltas(&self, frame: f32) -> Vec<RigidBodyDelta> {
        self.physics
            .get(hold_index(self.physics.iter().map(|k| k.frame), frame))
            .map(|k| k.rigid_bodies.clone())
            .unwrap_or_default()
    }

    fn joint_deltas(&self, frame: f32) -> Vec<JointDelta> {
        self.physics
            .get(hold_index(self.physics.iter().map(|k| k.frame), frame))
            .map(|k| k.joints.clone())
            .unwrap_or_default()
    }

    fn content_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let mut hasher = DefaultHasher::new();
            // BTreeMap keeps the serialized form stable across instances.
            serde_json::to_string(self)
                .unwrap_or_default()
                .hash(&mut hasher);
            hasher.finish()
        })
    }
}
