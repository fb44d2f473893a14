//! Transform composition.
//!
//! Two explicit phases: `update_unit` resolves a bone's local change from its
//! deltas alone, `update_globals` chains unit matrices down the hierarchy.
//! Neither phase reads a cache that the other has not already written.

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use tracing::warn;

use crate::delta::{BoneDelta, PoseDeltaStore};
use crate::math::{
    is_identity_rotation, scale_matrix, scale_rotation, to_fixed_axis_rotation, translation_matrix,
    translation_of,
};
use crate::skeleton::Skeleton;

/// Resolved components of one bone, all including cancelable corrections.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolved {
    pub rotation: Matrix4<f64>,
    pub position: Matrix4<f64>,
    pub scale: Matrix4<f64>,
    pub local: Matrix4<f64>,
    pub total_rotation: UnitQuaternion<f64>,
    pub total_position: Vector3<f64>,
    pub total_scale: Vector3<f64>,
}

/// Own rotation, morph rotation, inherited effector rotation, then the fixed
/// axis projection.
pub fn total_rotation(
    skeleton: &Skeleton,
    store: &PoseDeltaStore,
    index: usize,
    depth_limit: usize,
) -> UnitQuaternion<f64> {
    rotation_at_depth(skeleton, store, index, 0, depth_limit)
}

fn rotation_at_depth(
    skeleton: &Skeleton,
    store: &PoseDeltaStore,
    index: usize,
    depth: usize,
    depth_limit: usize,
) -> UnitQuaternion<f64> {
    let (Some(bone), Some(delta)) = (skeleton.bone(index), store.get(index)) else {
        return UnitQuaternion::identity();
    };
    let mut rotation = delta.frame_rotation;
    if !is_identity_rotation(&delta.frame_morph_rotation) {
        rotation *= delta.frame_morph_rotation;
    }
    if bone.rotation_effector().is_some() {
        rotation *= inherited_at_depth(skeleton, store, index, depth, depth_limit);
    }
    match &bone.fixed_axis {
        Some(axis) => to_fixed_axis_rotation(&rotation, axis),
        None => rotation,
    }
}

/// Rotation `index` inherits through its effector, scaled by the factor.
/// Identity for bones without a rotation effector.
pub fn inherited_rotation(
    skeleton: &Skeleton,
    store: &PoseDeltaStore,
    index: usize,
    depth_limit: usize,
) -> UnitQuaternion<f64> {
    inherited_at_depth(skeleton, store, index, 0, depth_limit)
}

fn inherited_at_depth(
    skeleton: &Skeleton,
    store: &PoseDeltaStore,
    index: usize,
    depth: usize,
    depth_limit: usize,
) -> UnitQuaternion<f64> {
    let Some((bone, effector)) = skeleton
        .bone(index)
        .and_then(|b| b.rotation_effector().map(|e| (b, e)))
    else {
        return UnitQuaternion::identity();
    };
    if depth >= depth_limit {
        warn!(bone = %bone.name, "effector rotation chain exceeds depth {depth_limit}");
        return UnitQuaternion::identity();
    }
    let inherited = rotation_at_depth(skeleton, store, effector.source, depth + 1, depth_limit);
    scale_rotation(&inherited, effector.factor)
}

/// Own and morph translation, then inherited effector translation.
pub fn total_position(
    skeleton: &Skeleton,
    store: &PoseDeltaStore,
    index: usize,
    depth_limit: usize,
) -> Matrix4<f64> {
    position_at_depth(skeleton, store, index, 0, depth_limit)
}

fn position_at_depth(
    skeleton: &Skeleton,
    store: &PoseDeltaStore,
    index: usize,
    depth: usize,
    depth_limit: usize,
) -> Matrix4<f64> {
    let (Some(bone), Some(delta)) = (skeleton.bone(index), store.get(index)) else {
        return Matrix4::identity();
    };
    let mut position = delta.frame_position;
    if delta.frame_morph_position != Vector3::zeros() {
        position += delta.frame_morph_position;
    }
    let mut matrix = translation_matrix(&position);
    if let Some(effector) = bone.translation_effector() {
        if depth >= depth_limit {
            warn!(bone = %bone.name, "effector translation chain exceeds depth {depth_limit}");
        } else {
            let inherited = position_at_depth(skeleton, store, effector.source, depth + 1, depth_limit);
            matrix *= translation_matrix(&(translation_of(&inherited) * effector.factor));
        }
    }
    matrix
}

pub fn total_scale(store: &PoseDeltaStore, index: usize) -> Vector3<f64> {
    store
        .get(index)
        .map(|d| d.frame_scale.component_mul(&d.frame_morph_scale))
        .unwrap_or_else(|| Vector3::repeat(1.0))
}

fn cancelable_rotation(delta: &BoneDelta) -> Option<UnitQuaternion<f64>> {
    let r = delta.frame_cancelable_rotation * delta.frame_morph_cancelable_rotation;
    (!is_identity_rotation(&r)).then_some(r)
}

fn cancelable_position(delta: &BoneDelta) -> Option<Vector3<f64>> {
    let p = delta.frame_cancelable_position + delta.frame_morph_cancelable_position;
    (p != Vector3::zeros()).then_some(p)
}

fn cancelable_scale(delta: &BoneDelta) -> Option<Vector3<f64>> {
    let s = delta
        .frame_cancelable_scale
        .component_mul(&delta.frame_morph_cancelable_scale);
    (s != Vector3::repeat(1.0)).then_some(s)
}

/// Right-multiply the bone's own cancelable part, then undo the parent's.
fn with_cancelable<T>(
    matrix: Matrix4<f64>,
    own: Option<&BoneDelta>,
    parent: Option<&BoneDelta>,
    extract: impl Fn(&BoneDelta) -> Option<T>,
    to_matrix: impl Fn(&T) -> Matrix4<f64>,
) -> Matrix4<f64> {
    let mut matrix = matrix;
    if let Some(c) = own.and_then(&extract) {
        matrix *= to_matrix(&c);
    }
    if let Some(c) = parent.and_then(&extract) {
        matrix *= to_matrix(&c).try_inverse().unwrap_or_else(Matrix4::identity);
    }
    matrix
}

/// Resolve every component of `index` from the deltas currently in `store`.
pub fn resolve(
    skeleton: &Skeleton,
    store: &PoseDeltaStore,
    index: usize,
    depth_limit: usize,
) -> Resolved {
    let own = store.get(index);
    let parent = skeleton
        .bone(index)
        .and_then(|b| b.parent)
        .and_then(|p| store.get(p));

    let total_rotation = total_rotation(skeleton, store, index, depth_limit);
    let position_matrix = total_position(skeleton, store, index, depth_limit);
    let total_scale = total_scale(store, index);

    let rotation = with_cancelable(
        total_rotation.to_homogeneous(),
        own,
        parent,
        cancelable_rotation,
        |q: &UnitQuaternion<f64>| q.to_homogeneous(),
    );
    let position = with_cancelable(
        position_matrix,
        own,
        parent,
        cancelable_position,
        translation_matrix,
    );
    let scale = with_cancelable(
        scale_matrix(&total_scale),
        own,
        parent,
        cancelable_scale,
        scale_matrix,
    );
    let local = own
        .and_then(|d| d.frame_local_matrix)
        .unwrap_or_else(Matrix4::identity);

    Resolved {
        rotation,
        position,
        scale,
        local,
        total_rotation,
        total_position: translation_of(&position_matrix),
        total_scale,
    }
}

/// Recompute the unit matrix of `index`:
/// `T(bind_offset) × local × scale × position × rotation`.
pub fn update_unit(skeleton: &Skeleton, store: &mut PoseDeltaStore, index: usize, depth_limit: usize) {
    let Some(bone) = skeleton.bone(index) else {
        return;
    };
    if !store.contains(index) {
        return;
    }
    let resolved = resolve(skeleton, store, index, depth_limit);
    let revert_offset = translation_matrix(&bone.bind_offset);
    if let Some(delta) = store.get_mut(index) {
        delta.unit_matrix =
            revert_offset * resolved.local * resolved.scale * resolved.position * resolved.rotation;
        delta.total_rotation = resolved.total_rotation;
        delta.total_position = resolved.total_position;
        delta.total_scale = resolved.total_scale;
    }
}

/// Chain `parent.global × unit` over `indices`, which must list parents first.
/// Bones absent from the store are skipped; absent parents count as identity.
pub fn update_globals(skeleton: &Skeleton, store: &mut PoseDeltaStore, indices: &[usize]) {
    for &index in indices {
        let Some(bone) = skeleton.bone(index) else {
            continue;
        };
        let parent_global = bone
            .parent
            .and_then(|p| store.get(p))
            .map_or_else(Matrix4::identity, |d| d.global_matrix);
        if let Some(delta) = store.get_mut(index) {
            delta.global_matrix = parent_global * delta.unit_matrix;
            delta.global_position = translation_of(&delta.global_matrix);
            delta.local_matrix = delta.global_matrix * translation_matrix(&-bone.bind_position);
        }
    }
}

/// Record the current global matrix of each bone as its IK-disabled pose,
/// leaving existing snapshots alone.
pub fn snapshot_ik_off(store: &mut PoseDeltaStore, indices: &[usize]) {
    for &index in indices {
        if let Some(delta) = store.get_mut(index) {
            if delta.global_ik_off_matrix.is_none() {
                delta.global_ik_off_matrix = Some(delta.global_matrix);
            }
        }
    }
}

/// Global matrix of `index` with IK disabled: unit matrices chained from the
/// nearest ancestor-or-self that carries an IK-off snapshot.
pub fn ik_off_global_matrix(skeleton: &Skeleton, store: &PoseDeltaStore, index: usize) -> Matrix4<f64> {
    let mut units = Vec::new();
    let mut base = Matrix4::identity();
    let mut cursor = Some(index);
    while let Some(i) = cursor {
        if let Some(delta) = store.get(i) {
            if let Some(snapshot) = delta.global_ik_off_matrix {
                base = snapshot;
                break;
            }
            units.push(delta.unit_matrix);
        }
        cursor = skeleton.bone(i).and_then(|b| b.parent);
    }
    units.iter().rev().fold(base, |acc, unit| acc * unit)
}
