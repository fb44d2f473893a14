//! Bone graph: an immutable, index-addressed skeleton with the precomputed
//! orderings the scheduler and the IK solver rely on.
//!
//! Bones live in a flat arena and refer to each other by index only. The
//! description types (`SkeletonDesc` and friends) are the serde-facing shape
//! used by fixtures and loaders; they refer to bones by name.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use hashbrown::HashMap;
use nalgebra::{Matrix3, Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{DeformError, Result};
use crate::morph::{MaterialValues, Morph, MorphDesc};

/// Which physics pass a deformation request belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeformPass {
    #[default]
    BeforePhysics,
    AfterPhysics,
}

/// Capability flags carried by every bone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoneFlags {
    pub rotatable: bool,
    pub translatable: bool,
    pub visible: bool,
    /// Deformed in the after-physics pass.
    pub after_physics: bool,
}

/// Orthonormal local axes of a bone, expressed in the bone's bind frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalAxes {
    pub x: Unit<Vector3<f64>>,
    pub y: Unit<Vector3<f64>>,
    pub z: Unit<Vector3<f64>>,
}

impl LocalAxes {
    /// Build from an x axis and an approximate z axis; y is derived and z is
    /// re-orthogonalised.
    pub fn from_xz(x: Vector3<f64>, z: Vector3<f64>) -> Option<Self> {
        let x = Unit::try_new(x, 1e-12)?;
        let y = Unit::try_new(z.cross(&x), 1e-12)?;
        let z = Unit::new_normalize(x.cross(&y));
        Some(Self { x, y, z })
    }

    pub fn identity() -> Self {
        Self {
            x: Vector3::x_axis(),
            y: Vector3::y_axis(),
            z: Vector3::z_axis(),
        }
    }

    /// Basis matrix with the axes as columns.
    pub fn basis(&self) -> Matrix3<f64> {
        Matrix3::from_columns(&[self.x.into_inner(), self.y.into_inner(), self.z.into_inner()])
    }

    pub fn axis(&self, i: usize) -> Unit<Vector3<f64>> {
        match i {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

/// Rotation/translation inheritance from another bone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Effector {
    pub source: usize,
    pub factor: f64,
    pub rotation: bool,
    pub translation: bool,
}

/// Per-axis angle interval in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngleLimit {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl AngleLimit {
    /// The only axis with a non-degenerate interval, if exactly one exists.
    pub fn single_axis(&self) -> Option<usize> {
        let mut free = (0..3).filter(|&i| self.min[i] != 0.0 || self.max[i] != 0.0);
        match (free.next(), free.next()) {
            (Some(axis), None) => Some(axis),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkLink {
    pub bone: usize,
    pub global_limit: Option<AngleLimit>,
    pub local_limit: Option<AngleLimit>,
}

impl IkLink {
    #[inline]
    pub fn has_limit(&self) -> bool {
        self.global_limit.is_some() || self.local_limit.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ik {
    pub target: usize,
    pub loop_count: usize,
    /// Per-iteration rotation step in radians for the first link.
    pub unit_rotation: f64,
    pub links: Vec<IkLink>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub index: usize,
    pub name: String,
    pub parent: Option<usize>,
    /// Bind position relative to the parent's bind position.
    pub bind_offset: Vector3<f64>,
    /// Bind position in model space.
    pub bind_position: Vector3<f64>,
    pub layer: i32,
    pub flags: BoneFlags,
    pub fixed_axis: Option<Unit<Vector3<f64>>>,
    pub local_axes: Option<LocalAxes>,
    pub effector: Option<Effector>,
    pub ik: Option<Ik>,
}

impl Bone {
    #[inline]
    pub fn is_ik(&self) -> bool {
        self.ik.is_some()
    }

    /// Effector that inherits rotation, if any.
    #[inline]
    pub fn rotation_effector(&self) -> Option<&Effector> {
        self.effector.as_ref().filter(|e| e.rotation)
    }

    /// Effector that inherits translation, if any.
    #[inline]
    pub fn translation_effector(&self) -> Option<&Effector> {
        self.effector.as_ref().filter(|e| e.translation)
    }

    #[inline]
    pub fn deforms_in(&self, pass: DeformPass) -> bool {
        self.flags.after_physics == (pass == DeformPass::AfterPhysics)
    }
}

// ---------------------------------------------------------------------------
// Description (serde) types

fn default_true() -> bool {
    true
}

fn default_factor() -> f64 {
    1.0
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkeletonDesc {
    pub bones: Vec<BoneDesc>,
    #[serde(default)]
    pub morphs: Vec<MorphDesc>,
    #[serde(default)]
    pub materials: Vec<MaterialValues>,
    #[serde(default)]
    pub vertex_count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoneDesc {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Bind offset from the parent.
    #[serde(default)]
    pub offset: [f64; 3],
    #[serde(default)]
    pub layer: i32,
    #[serde(default = "default_true")]
    pub rotatable: bool,
    #[serde(default)]
    pub translatable: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub after_physics: bool,
    #[serde(default)]
    pub fixed_axis: Option<[f64; 3]>,
    #[serde(default)]
    pub local_axes: Option<LocalAxesDesc>,
    #[serde(default)]
    pub effector: Option<EffectorDesc>,
    #[serde(default)]
    pub ik: Option<IkDesc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalAxesDesc {
    pub x: [f64; 3],
    pub z: [f64; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectorDesc {
    pub source: String,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub rotation: bool,
    #[serde(default)]
    pub translation: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IkDesc {
    pub target: String,
    pub loop_count: usize,
    /// Radians.
    pub unit_rotation: f64,
    pub links: Vec<IkLinkDesc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IkLinkDesc {
    pub bone: String,
    #[serde(default)]
    pub limit: Option<AngleLimitDesc>,
    #[serde(default)]
    pub local_limit: Option<AngleLimitDesc>,
}

/// Angle interval in degrees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngleLimitDesc {
    pub min_degrees: [f64; 3],
    pub max_degrees: [f64; 3],
}

impl AngleLimitDesc {
    fn resolve(&self) -> AngleLimit {
        AngleLimit {
            min: Vector3::from(self.min_degrees).map(f64::to_radians),
            max: Vector3::from(self.max_degrees).map(f64::to_radians),
        }
    }
}

// ---------------------------------------------------------------------------

/// Immutable skeleton with name index and precomputed traversal lists.
#[derive(Clone, Debug)]
pub struct Skeleton {
    bones: Vec<Bone>,
    names: HashMap<String, usize>,
    /// All bones by (layer, index).
    order: Vec<usize>,
    /// Per bone: everything that affects it, ordered by (layer, index).
    affected: Vec<Vec<usize>>,
    /// Per bone: IK bones listing it as a chain link.
    ik_links_of: Vec<Vec<usize>>,
    morphs: Vec<Morph>,
    morph_names: HashMap<String, usize>,
    materials: Vec<MaterialValues>,
    vertex_count: usize,
    hash: u64,
}

impl Skeleton {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let desc: SkeletonDesc = serde_json::from_str(json)?;
        Self::from_desc(&desc)
    }

    /// Validate a description and build the arena plus all derived lists.
    pub fn from_desc(desc: &SkeletonDesc) -> Result<Self> {
        let mut names = HashMap::with_capacity(desc.bones.len());
        for (index, b) in desc.bones.iter().enumerate() {
            names.entry(b.name.clone()).or_insert(index);
        }
        let lookup = |kind: &str, owner: &str, name: &str| -> Result<usize> {
            names.get(name).copied().ok_or_else(|| {
                DeformError::invalid_skeleton(format!("{kind} '{name}' of bone '{owner}' not found"))
            })
        };

        let mut bones = Vec::with_capacity(desc.bones.len());
        for (index, b) in desc.bones.iter().enumerate() {
            let parent = match &b.parent {
                Some(p) => Some(lookup("parent", &b.name, p)?),
                None => None,
            };
            let effector = match &b.effector {
                Some(e) => Some(Effector {
                    source: lookup("effector source", &b.name, &e.source)?,
                    factor: e.factor,
                    rotation: e.rotation,
                    translation: e.translation,
                }),
                None => None,
            };
            let ik = match &b.ik {
                Some(ik) => {
                    let mut links = Vec::with_capacity(ik.links.len());
                    for l in &ik.links {
                        links.push(IkLink {
                            bone: lookup("ik link", &b.name, &l.bone)?,
                            global_limit: l.limit.as_ref().map(AngleLimitDesc::resolve),
                            local_limit: l.local_limit.as_ref().map(AngleLimitDesc::resolve),
                        });
                    }
                    Some(Ik {
                        target: lookup("ik target", &b.name, &ik.target)?,
                        loop_count: ik.loop_count,
                        unit_rotation: ik.unit_rotation,
                        links,
                    })
                }
                None => None,
            };
            bones.push(Bone {
                index,
                name: b.name.clone(),
                parent,
                bind_offset: Vector3::from(b.offset),
                bind_position: Vector3::zeros(),
                layer: b.layer,
                flags: BoneFlags {
                    rotatable: b.rotatable,
                    translatable: b.translatable,
                    visible: b.visible,
                    after_physics: b.after_physics,
                },
                fixed_axis: b
                    .fixed_axis
                    .and_then(|a| Unit::try_new(Vector3::from(a), 1e-12)),
                local_axes: b
                    .local_axes
                    .as_ref()
                    .and_then(|a| LocalAxes::from_xz(Vector3::from(a.x), Vector3::from(a.z))),
                effector,
                ik,
            });
        }

        resolve_bind_positions(&mut bones)?;

        let mut order: Vec<usize> = (0..bones.len()).collect();
        order.sort_by_key(|&i| (bones[i].layer, i));

        let mut ik_links_of = vec![Vec::new(); bones.len()];
        let mut ik_targets_of = vec![Vec::new(); bones.len()];
        for bone in &bones {
            if let Some(ik) = &bone.ik {
                ik_targets_of[ik.target].push(bone.index);
                for link in &ik.links {
                    ik_links_of[link.bone].push(bone.index);
                }
            }
        }
        let affected = (0..bones.len())
            .map(|i| dependency_closure(&bones, i, &ik_links_of, &ik_targets_of))
            .collect();

        let mut morph_names = HashMap::with_capacity(desc.morphs.len());
        for (index, m) in desc.morphs.iter().enumerate() {
            morph_names.entry(m.name.clone()).or_insert(index);
        }
        let morphs = desc
            .morphs
            .iter()
            .map(|m| Morph::from_desc(m, &names, &morph_names))
            .collect();

        let mut hasher = DefaultHasher::new();
        serde_json::to_string(desc)?.hash(&mut hasher);

        Ok(Self {
            bones,
            names,
            order,
            affected,
            ik_links_of,
            morphs,
            morph_names,
            materials: desc.materials.clone(),
            vertex_count: desc.vertex_count,
            hash: hasher.finish(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    #[inline]
    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    #[inline]
    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    #[inline]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn bone_by_name(&self, name: &str) -> Option<&Bone> {
        self.index_of(name).map(|i| &self.bones[i])
    }

    /// Deformation order of every bone taking part in `pass`.
    pub fn deform_order(&self, pass: DeformPass) -> Vec<usize> {
        self.order
            .iter()
            .copied()
            .filter(|&i| self.bones[i].deforms_in(pass))
            .collect()
    }

    /// Position of a bone in the global deformation order.
    pub fn order_position(&self, index: usize) -> Option<usize> {
        self.order.iter().position(|&i| i == index)
    }

    /// Sort key used for every deformation ordering.
    #[inline]
    pub fn order_key(&self, index: usize) -> (i32, usize) {
        (self.bones[index].layer, index)
    }

    /// Bones that must be resolved to resolve `index` (itself included).
    pub fn affected_indices(&self, index: usize) -> &[usize] {
        self.affected.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// IK bones whose chain contains `index` as a link.
    pub fn ik_bones_for_link(&self, index: usize) -> &[usize] {
        self.ik_links_of.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    pub fn morphs(&self) -> &[Morph] {
        &self.morphs
    }

    pub fn morph_index(&self, name: &str) -> Option<usize> {
        self.morph_names.get(name).copied()
    }

    #[inline]
    pub fn materials(&self) -> &[MaterialValues] {
        &self.materials
    }

    #[inline]
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Stable identity of the description this skeleton was built from.
    #[inline]
    pub fn content_hash(&self) -> u64 {
        self.hash
    }
}

/// Accumulate bind offsets into model-space bind positions, rejecting parent cycles.
fn resolve_bind_positions(bones: &mut [Bone]) -> Result<()> {
    let n = bones.len();
    for i in 0..n {
        let mut position = bones[i].bind_offset;
        let mut cursor = bones[i].parent;
        let mut steps = 0;
        while let Some(p) = cursor {
            steps += 1;
            if steps > n {
                return Err(DeformError::invalid_skeleton(format!(
                    "parent cycle through bone '{}'",
                    bones[i].name
                )));
            }
            position += bones[p].bind_offset;
            cursor = bones[p].parent;
        }
        bones[i].bind_position = position;
    }
    Ok(())
}

fn dependency_closure(
    bones: &[Bone],
    start: usize,
    ik_links_of: &[Vec<usize>],
    ik_targets_of: &[Vec<usize>],
) -> Vec<usize> {
    let mut seen = vec![false; bones.len()];
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut seen[i], true) {
            continue;
        }
        let bone = &bones[i];
        stack.extend(bone.parent);
        stack.extend(bone.effector.map(|e| e.source));
        if let Some(ik) = &bone.ik {
            stack.push(ik.target);
            stack.extend(ik.links.iter().map(|l| l.bone));
        }
        stack.extend_from_slice(&ik_links_of[i]);
        stack.extend_from_slice(&ik_targets_of[i]);
    }
    let mut out: Vec<usize> = (0..bones.len()).filter(|&i| seen[i]).collect();
    out.sort_by_key(|&i| (bones[i].layer, i));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone(name: &str, parent: Option<&str>, offset: [f64; 3]) -> BoneDesc {
        BoneDesc {
            name: name.into(),
            parent: parent.map(Into::into),
            offset,
            rotatable: true,
            visible: true,
            ..Default::default()
        }
    }

    #[test]
    fn bind_positions_accumulate_offsets() {
        let desc = SkeletonDesc {
            bones: vec![
                bone("root", None, [0.0, 1.0, 0.0]),
                bone("hip", Some("root"), [0.0, 2.0, 0.0]),
                bone("knee", Some("hip"), [0.5, -1.0, 0.0]),
            ],
            ..Default::default()
        };
        let skel = Skeleton::from_desc(&desc).unwrap();
        assert_eq!(skel.bone(2).unwrap().bind_position, Vector3::new(0.5, 2.0, 0.0));
        assert_eq!(skel.index_of("knee"), Some(2));
        assert!(skel.index_of("toe").is_none());
    }

    #[test]
    fn parent_cycle_is_rejected() {
        let desc = SkeletonDesc {
            bones: vec![bone("a", Some("b"), [0.0; 3]), bone("b", Some("a"), [0.0; 3])],
            ..Default::default()
        };
        let err = Skeleton::from_desc(&desc).unwrap_err();
        assert_eq!(err.category(), "skeleton");
    }

    #[test]
    fn dangling_parent_is_rejected() {
        let desc = SkeletonDesc {
            bones: vec![bone("a", Some("ghost"), [0.0; 3])],
            ..Default::default()
        };
        assert!(Skeleton::from_desc(&desc).is_err());
    }

    #[test]
    fn order_follows_layer_then_index() {
        let mut late = bone("late", None, [0.0; 3]);
        late.layer = 1;
        let desc = SkeletonDesc {
            bones: vec![late, bone("a", None, [0.0; 3]), bone("b", Some("a"), [0.0; 3])],
            ..Default::default()
        };
        let skel = Skeleton::from_desc(&desc).unwrap();
        assert_eq!(skel.deform_order(DeformPass::BeforePhysics), vec![1, 2, 0]);
        assert!(skel.deform_order(DeformPass::AfterPhysics).is_empty());
    }

    #[test]
    fn closure_pulls_in_ik_bone_of_an_ancestor_link() {
        let mut ik = bone("ik", None, [2.0, 0.0, 0.0]);
        ik.ik = Some(IkDesc {
            target: "tip".into(),
            loop_count: 10,
            unit_rotation: 1.0,
            links: vec![IkLinkDesc {
                bone: "mid".into(),
                limit: None,
                local_limit: None,
            }],
        });
        let desc = SkeletonDesc {
            bones: vec![
                bone("root", None, [0.0; 3]),
                bone("mid", Some("root"), [1.0, 0.0, 0.0]),
                bone("tip", Some("mid"), [1.0, 0.0, 0.0]),
                ik,
                bone("other", None, [0.0; 3]),
            ],
            ..Default::default()
        };
        let skel = Skeleton::from_desc(&desc).unwrap();
        assert_eq!(skel.affected_indices(2), &[0, 1, 2, 3]);
        assert_eq!(skel.ik_bones_for_link(1), &[3]);
        assert_eq!(skel.affected_indices(4), &[4]);
    }

    #[test]
    fn single_axis_limit_detection() {
        let limit = AngleLimit {
            min: Vector3::new(-1.0, 0.0, 0.0),
            max: Vector3::new(0.0, 0.0, 0.0),
        };
        assert_eq!(limit.single_axis(), Some(0));
        let free = AngleLimit {
            min: Vector3::new(-1.0, -1.0, 0.0),
            max: Vector3::new(1.0, 1.0, 0.0),
        };
        assert_eq!(free.single_axis(), None);
    }
}
