//! Ratio-weighted accumulation of every active morph into `MorphDeltas`.

use hashbrown::HashMap;
use nalgebra::{UnitQuaternion, Vector3, Vector4};
use tracing::{trace, warn};

use super::{MaterialMorphOffset, MaterialOp, MaterialValues, MorphOffsets};
use crate::delta::PoseDeltaStore;
use crate::keyframes::KeyframeSource;
use crate::math::scale_rotation;
use crate::skeleton::Skeleton;

/// Nesting limit for group morphs.
pub const MAX_GROUP_DEPTH: usize = 10;

/// Accumulated bone morph contribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneMorphDelta {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub scale: Vector3<f64>,
    pub cancelable_position: Vector3<f64>,
    pub cancelable_rotation: UnitQuaternion<f64>,
    pub cancelable_scale: Vector3<f64>,
}

impl Default for BoneMorphDelta {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::repeat(1.0),
            cancelable_position: Vector3::zeros(),
            cancelable_rotation: UnitQuaternion::identity(),
            cancelable_scale: Vector3::repeat(1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VertexMorphDelta {
    pub position: Vector3<f64>,
    pub uv: Vector4<f64>,
}

/// Multiplicative and additive accumulators for one material.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialMorphDelta {
    pub mul: MaterialValues,
    pub add: MaterialValues,
}

impl Default for MaterialMorphDelta {
    fn default() -> Self {
        Self {
            mul: MaterialValues::splat(1.0),
            add: MaterialValues::splat(0.0),
        }
    }
}

impl MaterialMorphDelta {
    /// `base ⊙ mul + add`
    pub fn apply(&self, base: &MaterialValues) -> MaterialValues {
        base.zip_with(&self.mul, |b, m| b * m)
            .zip_with(&self.add, |v, a| v + a)
    }
}

/// Output of one blend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MorphDeltas {
    pub vertices: HashMap<usize, VertexMorphDelta>,
    pub bones: Vec<Option<BoneMorphDelta>>,
    pub materials: Vec<MaterialMorphDelta>,
}

impl MorphDeltas {
    pub fn new(skeleton: &Skeleton) -> Self {
        Self {
            vertices: HashMap::new(),
            bones: vec![None; skeleton.len()],
            materials: vec![MaterialMorphDelta::default(); skeleton.material_count()],
        }
    }

    #[inline]
    pub fn bone(&self, index: usize) -> Option<&BoneMorphDelta> {
        self.bones.get(index).and_then(Option::as_ref)
    }

    #[inline]
    pub fn vertex(&self, index: usize) -> Option<&VertexMorphDelta> {
        self.vertices.get(&index)
    }

    #[inline]
    pub fn material(&self, index: usize) -> Option<&MaterialMorphDelta> {
        self.materials.get(index)
    }

    /// Base materials of `skeleton` with the accumulated offsets applied.
    pub fn morphed_materials(&self, skeleton: &Skeleton) -> Vec<MaterialValues> {
        skeleton
            .materials()
            .iter()
            .zip(&self.materials)
            .map(|(base, delta)| delta.apply(base))
            .collect()
    }

    /// Write the bone part into the morph fields of `indices`. Bones resolved
    /// by an earlier pass are left alone.
    pub fn apply_to_store(&self, store: &mut PoseDeltaStore, indices: &[usize]) {
        for &index in indices {
            let (Some(morph), Some(delta)) = (self.bone(index), store.get_mut(index)) else {
                continue;
            };
            delta.frame_morph_position = morph.position;
            delta.frame_morph_rotation = morph.rotation;
            delta.frame_morph_scale = morph.scale;
            delta.frame_morph_cancelable_position = morph.cancelable_position;
            delta.frame_morph_cancelable_rotation = morph.cancelable_rotation;
            delta.frame_morph_cancelable_scale = morph.cancelable_scale;
        }
    }
}

/// Blend the morphs named in `morph_names` (every skeleton morph when `None`)
/// at `frame`. Unknown names, missing ratios and zero ratios are skipped.
pub fn blend<S: KeyframeSource + ?Sized>(
    skeleton: &Skeleton,
    source: &S,
    frame: f32,
    morph_names: Option<&[&str]>,
) -> MorphDeltas {
    let active: Vec<usize> = match morph_names {
        Some(names) => names.iter().filter_map(|n| skeleton.morph_index(n)).collect(),
        None => (0..skeleton.morphs().len()).collect(),
    };

    let mut deltas = MorphDeltas::new(skeleton);
    let mut additive = Vec::new();
    for index in active {
        let morph = &skeleton.morphs()[index];
        let Some(ratio) = source.morph_ratio(&morph.name, frame) else {
            continue;
        };
        if ratio == 0.0 {
            continue;
        }
        trace!(morph = %morph.name, ratio, "blending morph");
        dispatch(skeleton, index, ratio, 0, &mut deltas, &mut additive);
    }

    // Every multiplicative offset has been applied; additive ones go last.
    for (offset, ratio) in additive {
        for_each_material(&mut deltas.materials, offset.material, |m| {
            m.add = m.add.zip_with(&offset.values, |acc, v| acc + v * ratio);
        });
    }
    deltas
}

fn dispatch(
    skeleton: &Skeleton,
    index: usize,
    ratio: f64,
    depth: usize,
    deltas: &mut MorphDeltas,
    additive: &mut Vec<(MaterialMorphOffset, f64)>,
) {
    let morph = &skeleton.morphs()[index];
    match &morph.offsets {
        MorphOffsets::Vertex(offsets) => {
            for o in offsets {
                let scaled = o.position * ratio;
                if scaled == Vector3::zeros() {
                    continue;
                }
                deltas.vertices.entry(o.vertex).or_default().position += scaled;
            }
        }
        MorphOffsets::Uv(offsets) => {
            for o in offsets {
                let scaled = o.uv * ratio;
                if scaled == Vector4::zeros() {
                    continue;
                }
                deltas.vertices.entry(o.vertex).or_default().uv += scaled;
            }
        }
        MorphOffsets::Bone(offsets) => {
            for o in offsets {
                let Some(slot) = deltas.bones.get_mut(o.bone) else {
                    continue;
                };
                let acc = slot.get_or_insert_with(BoneMorphDelta::default);
                acc.position += o.position * ratio;
                acc.rotation = scale_rotation(&o.rotation, ratio) * acc.rotation;
                acc.scale += o.scale * ratio;
                acc.cancelable_position += o.cancelable_position * ratio;
                acc.cancelable_rotation =
                    scale_rotation(&o.cancelable_rotation, ratio) * acc.cancelable_rotation;
                acc.cancelable_scale += o.cancelable_scale * ratio;
            }
        }
        MorphOffsets::Material(offsets) => {
            for o in offsets {
                match o.op {
                    MaterialOp::Mul => for_each_material(&mut deltas.materials, o.material, |m| {
                        m.mul = m.mul.zip_with(&o.values, |acc, v| acc * (1.0 + (v - 1.0) * ratio));
                    }),
                    MaterialOp::Add => additive.push((*o, ratio)),
                }
            }
        }
        MorphOffsets::Group(children) => {
            if depth >= MAX_GROUP_DEPTH {
                warn!(morph = %morph.name, "group morph nesting exceeds {MAX_GROUP_DEPTH}, skipping");
                return;
            }
            for child in children {
                let child_ratio = ratio * child.factor;
                if child_ratio == 0.0 {
                    continue;
                }
                dispatch(skeleton, child.morph, child_ratio, depth + 1, deltas, additive);
            }
        }
    }
}

fn for_each_material(
    materials: &mut [MaterialMorphDelta],
    target: Option<usize>,
    mut f: impl FnMut(&mut MaterialMorphDelta),
) {
    match target {
        Some(i) => {
            if let Some(m) = materials.get_mut(i) {
                f(m);
            }
        }
        None => materials.iter_mut().for_each(f),
    }
}
