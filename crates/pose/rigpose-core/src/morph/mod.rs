//! Morph definitions: one tagged payload per morph kind.
//!
//! Morphs are resolved against the skeleton's name indexes when the skeleton
//! is built. Offsets referring to unknown bones or morphs are dropped.

mod blend;

pub use blend::{
    blend, BoneMorphDelta, MaterialMorphDelta, MorphDeltas, VertexMorphDelta, MAX_GROUP_DEPTH,
};

use hashbrown::HashMap;
use nalgebra::{UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::math::quat_from_xyzw;

/// Scalar material parameters a material morph can perturb.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialValues {
    pub diffuse: [f64; 4],
    pub specular: [f64; 3],
    pub specular_power: f64,
    pub ambient: [f64; 3],
    pub edge_color: [f64; 4],
    pub edge_size: f64,
    pub texture_factor: [f64; 4],
    pub sphere_texture_factor: [f64; 4],
    pub toon_texture_factor: [f64; 4],
}

#[inline]
fn zip<const N: usize>(a: [f64; N], b: [f64; N], f: &impl Fn(f64, f64) -> f64) -> [f64; N] {
    std::array::from_fn(|i| f(a[i], b[i]))
}

impl MaterialValues {
    /// Every component set to `v`.
    pub fn splat(v: f64) -> Self {
        Self {
            diffuse: [v; 4],
            specular: [v; 3],
            specular_power: v,
            ambient: [v; 3],
            edge_color: [v; 4],
            edge_size: v,
            texture_factor: [v; 4],
            sphere_texture_factor: [v; 4],
            toon_texture_factor: [v; 4],
        }
    }

    /// Component-wise combination with `other`.
    pub fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self {
            diffuse: zip(self.diffuse, other.diffuse, &f),
            specular: zip(self.specular, other.specular, &f),
            specular_power: f(self.specular_power, other.specular_power),
            ambient: zip(self.ambient, other.ambient, &f),
            edge_color: zip(self.edge_color, other.edge_color, &f),
            edge_size: f(self.edge_size, other.edge_size),
            texture_factor: zip(self.texture_factor, other.texture_factor, &f),
            sphere_texture_factor: zip(self.sphere_texture_factor, other.sphere_texture_factor, &f),
            toon_texture_factor: zip(self.toon_texture_factor, other.toon_texture_factor, &f),
        }
    }
}

/// How a material offset combines with the base material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialOp {
    Mul,
    Add,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexOffset {
    pub vertex: usize,
    pub position: Vector3<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UvOffset {
    pub vertex: usize,
    pub uv: Vector4<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneMorphOffset {
    pub bone: usize,
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    /// Additive scale change (0 = unchanged).
    pub scale: Vector3<f64>,
    pub cancelable_position: Vector3<f64>,
    pub cancelable_rotation: UnitQuaternion<f64>,
    pub cancelable_scale: Vector3<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialMorphOffset {
    /// `None` targets every material.
    pub material: Option<usize>,
    pub op: MaterialOp,
    pub values: MaterialValues,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupOffset {
    pub morph: usize,
    pub factor: f64,
}

/// Payload of a morph, one variant per kind.
#[derive(Clone, Debug, PartialEq)]
pub enum MorphOffsets {
    Vertex(Vec<VertexOffset>),
    Uv(Vec<UvOffset>),
    Bone(Vec<BoneMorphOffset>),
    Material(Vec<MaterialMorphOffset>),
    Group(Vec<GroupOffset>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Morph {
    pub name: String,
    pub offsets: MorphOffsets,
}

impl Morph {
    pub(crate) fn from_desc(
        desc: &MorphDesc,
        bone_names: &HashMap<String, usize>,
        morph_names: &HashMap<String, usize>,
    ) -> Self {
        let offsets = match &desc.offsets {
            MorphOffsetsDesc::Vertex(list) => MorphOffsets::Vertex(
                list.iter()
                    .map(|o| VertexOffset {
                        vertex: o.vertex,
                        position: Vector3::from(o.position),
                    })
                    .collect(),
            ),
            MorphOffsetsDesc::Uv(list) => MorphOffsets::Uv(
                list.iter()
                    .map(|o| UvOffset {
                        vertex: o.vertex,
                        uv: Vector4::from(o.uv),
                    })
                    .collect(),
            ),
            MorphOffsetsDesc::Bone(list) => MorphOffsets::Bone(
                list.iter()
                    .filter_map(|o| {
                        let Some(&bone) = bone_names.get(&o.bone) else {
                            warn!("morph '{}' references unknown bone '{}'", desc.name, o.bone);
                            return None;
                        };
                        Some(BoneMorphOffset {
                            bone,
                            position: Vector3::from(o.position),
                            rotation: quat_from_xyzw(o.rotation),
                            scale: Vector3::from(o.scale),
                            cancelable_position: Vector3::from(o.cancelable_position),
                            cancelable_rotation: quat_from_xyzw(o.cancelable_rotation),
                            cancelable_scale: Vector3::from(o.cancelable_scale),
                        })
                    })
                    .collect(),
            ),
            MorphOffsetsDesc::Material(list) => MorphOffsets::Material(
                list.iter()
                    .map(|o| MaterialMorphOffset {
                        material: o.material,
                        op: o.op,
                        values: o.values,
                    })
                    .collect(),
            ),
            MorphOffsetsDesc::Group(list) => MorphOffsets::Group(
                list.iter()
                    .filter_map(|o| {
                        let Some(&morph) = morph_names.get(&o.morph) else {
                            warn!("group morph '{}' references unknown morph '{}'", desc.name, o.morph);
                            return None;
                        };
                        Some(GroupOffset {
                            morph,
                            factor: o.factor,
                        })
                    })
                    .collect(),
            ),
        };
        Self {
            name: desc.name.clone(),
            offsets,
        }
    }
}

// ---------------------------------------------------------------------------
// Description (serde) types

fn identity_xyzw() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MorphDesc {
    pub name: String,
    pub offsets: MorphOffsetsDesc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphOffsetsDesc {
    Vertex(Vec<VertexOffsetDesc>),
    Uv(Vec<UvOffsetDesc>),
    Bone(Vec<BoneOffsetDesc>),
    Material(Vec<MaterialOffsetDesc>),
    Group(Vec<GroupOffsetDesc>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexOffsetDesc {
    pub vertex: usize,
    pub position: [f64; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UvOffsetDesc {
    pub vertex: usize,
    pub uv: [f64; 4],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneOffsetDesc {
    pub bone: String,
    #[serde(default)]
    pub position: [f64; 3],
    /// Quaternion `[x, y, z, w]`.
    #[serde(default = "identity_xyzw")]
    pub rotation: [f64; 4],
    #[serde(default)]
    pub scale: [f64; 3],
    #[serde(default)]
    pub cancelable_position: [f64; 3],
    #[serde(default = "identity_xyzw")]
    pub cancelable_rotation: [f64; 4],
    #[serde(default)]
    pub cancelable_scale: [f64; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialOffsetDesc {
    #[serde(default)]
    pub material: Option<usize>,
    pub op: MaterialOp,
    pub values: MaterialValues,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupOffsetDesc {
    pub morph: String,
    pub factor: f64,
}
