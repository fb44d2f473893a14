//! Per-bone pose deltas and the fixed-length store that holds them.

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{DeformError, Result};
use crate::keyframes::BoneFrame;
use crate::math::{translation_of, xyzw_of};
use crate::skeleton::Skeleton;

/// Everything the deformer knows about one bone for one pass.
///
/// The `frame_*` fields are inputs (keyframes and morphs). The remaining
/// fields are caches written by the composer and the global pass.
#[derive(Clone, Debug, PartialEq)]
pub struct BoneDelta {
    pub frame_position: Vector3<f64>,
    pub frame_rotation: UnitQuaternion<f64>,
    pub frame_scale: Vector3<f64>,
    pub frame_cancelable_position: Vector3<f64>,
    pub frame_cancelable_rotation: UnitQuaternion<f64>,
    pub frame_cancelable_scale: Vector3<f64>,

    pub frame_morph_position: Vector3<f64>,
    pub frame_morph_rotation: UnitQuaternion<f64>,
    pub frame_morph_scale: Vector3<f64>,
    pub frame_morph_cancelable_position: Vector3<f64>,
    pub frame_morph_cancelable_rotation: UnitQuaternion<f64>,
    pub frame_morph_cancelable_scale: Vector3<f64>,

    /// Local-axis change supplied by a keyframe.
    pub frame_local_matrix: Option<Matrix4<f64>>,

    pub total_position: Vector3<f64>,
    pub total_rotation: UnitQuaternion<f64>,
    pub total_scale: Vector3<f64>,
    pub unit_matrix: Matrix4<f64>,
    pub global_matrix: Matrix4<f64>,
    pub global_position: Vector3<f64>,
    /// Skinning matrix: `global_matrix × T(-bind_position)`.
    pub local_matrix: Matrix4<f64>,
    /// Global matrix with IK disabled, captured before the first IK correction.
    pub global_ik_off_matrix: Option<Matrix4<f64>>,
}

impl Default for BoneDelta {
    fn default() -> Self {
        let one = Vector3::repeat(1.0);
        Self {
            frame_position: Vector3::zeros(),
            frame_rotation: UnitQuaternion::identity(),
            frame_scale: one,
            frame_cancelable_position: Vector3::zeros(),
            frame_cancelable_rotation: UnitQuaternion::identity(),
            frame_cancelable_scale: one,
            frame_morph_position: Vector3::zeros(),
            frame_morph_rotation: UnitQuaternion::identity(),
            frame_morph_scale: one,
            frame_morph_cancelable_position: Vector3::zeros(),
            frame_morph_cancelable_rotation: UnitQuaternion::identity(),
            frame_morph_cancelable_scale: one,
            frame_local_matrix: None,
            total_position: Vector3::zeros(),
            total_rotation: UnitQuaternion::identity(),
            total_scale: one,
            unit_matrix: Matrix4::identity(),
            global_matrix: Matrix4::identity(),
            global_position: Vector3::zeros(),
            local_matrix: Matrix4::identity(),
            global_ik_off_matrix: None,
        }
    }
}

impl BoneDelta {
    /// Fresh delta seeded from a sampled keyframe.
    pub fn from_frame(frame: &BoneFrame) -> Self {
        let mut delta = Self {
            frame_position: frame.position,
            frame_rotation: frame.rotation,
            frame_scale: frame.scale,
            frame_local_matrix: frame.local_matrix,
            ..Self::default()
        };
        if let Some(p) = frame.cancelable_position {
            delta.frame_cancelable_position = p;
        }
        if let Some(r) = frame.cancelable_rotation {
            delta.frame_cancelable_rotation = r;
        }
        if let Some(s) = frame.cancelable_scale {
            delta.frame_cancelable_scale = s;
        }
        delta
    }
}

/// Exported pose of one resolved bone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BonePose {
    pub name: String,
    pub position: [f64; 3],
    /// Quaternion `[x, y, z, w]`.
    pub rotation: [f64; 4],
    pub scale: [f64; 3],
    pub global_position: [f64; 3],
}

/// Copy of a store's contents, restorable later.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseSnapshot(Vec<Option<BoneDelta>>);

/// Bone-indexed store, sized to the skeleton.
///
/// A slot is `None` until the bone is first written, which is how callers
/// tell untouched bones from resolved ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseDeltaStore {
    slots: Vec<Option<BoneDelta>>,
}

impl PoseDeltaStore {
    pub fn new(bone_count: usize) -> Self {
        Self {
            slots: vec![None; bone_count],
        }
    }

    pub fn for_skeleton(skeleton: &Skeleton) -> Self {
        Self::new(skeleton.len())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&BoneDelta> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoneDelta> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn get_by_name(&self, skeleton: &Skeleton, name: &str) -> Option<&BoneDelta> {
        skeleton.index_of(name).and_then(|i| self.get(i))
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Overwrite the delta of `index`.
    pub fn update(&mut self, index: usize, delta: BoneDelta) -> Result<()> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(DeformError::BoneIndexOutOfRange { index, len })?;
        *slot = Some(delta);
        Ok(())
    }

    /// Write a fresh delta for each of `indices`, replacing whatever an
    /// earlier pass left there. Indices past the end of the store are skipped.
    pub fn seed(&mut self, indices: &[usize], mut delta_for: impl FnMut(usize) -> BoneDelta) {
        for &index in indices {
            if let Some(slot) = self.slots.get_mut(index) {
                *slot = Some(delta_for(index));
            }
        }
    }

    /// Overwrite the delta of the bone called `name`.
    pub fn update_by_name(&mut self, skeleton: &Skeleton, name: &str, delta: BoneDelta) -> Result<()> {
        let index = skeleton
            .index_of(name)
            .ok_or_else(|| DeformError::BoneNotFound { name: name.to_string() })?;
        self.update(index, delta)
    }

    /// Indices of every written slot, ascending.
    pub fn resolved_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
    }

    pub fn snapshot(&self) -> PoseSnapshot {
        PoseSnapshot(self.slots.clone())
    }

    pub fn restore(&mut self, snapshot: PoseSnapshot) {
        self.slots = snapshot.0;
    }

    /// Decomposed pose of every resolved bone, in index order.
    pub fn poses(&self, skeleton: &Skeleton) -> Vec<BonePose> {
        self.resolved_indices()
            .filter_map(|i| {
                let delta = self.get(i)?;
                let bone = skeleton.bone(i)?;
                Some(BonePose {
                    name: bone.name.clone(),
                    position: delta.total_position.into(),
                    rotation: xyzw_of(&delta.total_rotation),
                    scale: delta.total_scale.into(),
                    global_position: translation_of(&delta.global_matrix).into(),
                })
            })
            .collect()
    }
}
