//! Deformation driver: picks the bones to resolve and runs the passes in order.
//!
//! Per request:
//! 1. blend morphs once,
//! 2. seed every selected bone from its keyframe plus its bone morph,
//! 3. compute unit matrices, then globals, and keep the globals as the
//!    IK-disabled pose,
//! 4. solve each enabled IK bone in deformation order,
//! 5. recompute inherited units and run a final global pass over exactly the
//!    selected set.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::{PoseCache, PoseKey};
use crate::compose::{snapshot_ik_off, update_globals, update_unit};
use crate::config::DeformConfig;
use crate::delta::{BoneDelta, PoseDeltaStore};
use crate::ik;
use crate::keyframes::KeyframeSource;
use crate::morph::{self, MorphDeltas};
use crate::physics::PhysicsDeltas;
use crate::skeleton::{DeformPass, Skeleton};

/// Parameters of one deformation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeformRequest<'a> {
    pub frame: f32,
    /// Bones to resolve; empty means every bone of the pass.
    pub bones: &'a [&'a str],
    pub calc_ik: bool,
    pub pass: DeformPass,
}

impl<'a> DeformRequest<'a> {
    pub fn new(frame: f32) -> Self {
        Self {
            frame,
            bones: &[],
            calc_ik: true,
            pass: DeformPass::BeforePhysics,
        }
    }

    pub fn with_bones(self, bones: &'a [&'a str]) -> Self {
        Self { bones, ..self }
    }

    pub fn with_ik(self, calc_ik: bool) -> Self {
        Self { calc_ik, ..self }
    }

    pub fn with_pass(self, pass: DeformPass) -> Self {
        Self { pass, ..self }
    }
}

/// Everything one deformation produces.
#[derive(Clone, Debug, PartialEq)]
pub struct Deltas {
    pub bones: PoseDeltaStore,
    pub morphs: MorphDeltas,
    pub physics: PhysicsDeltas,
    pub frame: f32,
}

impl Deltas {
    pub fn new(skeleton: &Skeleton, frame: f32) -> Self {
        Self {
            bones: PoseDeltaStore::for_skeleton(skeleton),
            morphs: MorphDeltas::new(skeleton),
            physics: PhysicsDeltas::default(),
            frame,
        }
    }
}

/// Bones to resolve for `requested`, ordered by (layer, index) and filtered
/// by `pass`. Unknown names are ignored.
pub fn deform_indices(skeleton: &Skeleton, requested: &[&str], pass: DeformPass) -> Vec<usize> {
    let mut indices = match requested {
        [] => return skeleton.deform_order(pass),
        [single] => match skeleton.index_of(single) {
            Some(index) => skeleton.affected_indices(index).to_vec(),
            None => Vec::new(),
        },
        many => {
            let mut seen = vec![false; skeleton.len()];
            for index in many.iter().filter_map(|name| skeleton.index_of(name)) {
                for &i in skeleton.affected_indices(index) {
                    seen[i] = true;
                }
            }
            let mut union: Vec<usize> = (0..skeleton.len()).filter(|&i| seen[i]).collect();
            union.sort_by_key(|&i| skeleton.order_key(i));
            union
        }
    };
    indices.retain(|&i| skeleton.bone(i).is_some_and(|b| b.deforms_in(pass)));
    indices
}

/// Resolve a fresh set of deltas.
pub fn deform<S: KeyframeSource + ?Sized>(
    skeleton: &Skeleton,
    source: &S,
    request: &DeformRequest<'_>,
    config: &DeformConfig,
) -> Deltas {
    let mut deltas = Deltas::new(skeleton, request.frame);
    deform_into(&mut deltas, skeleton, source, request, config);
    deltas
}

/// Resolve into existing deltas. The after-physics pass uses this to build
/// on the store of the before-physics pass.
pub fn deform_into<S: KeyframeSource + ?Sized>(
    deltas: &mut Deltas,
    skeleton: &Skeleton,
    source: &S,
    request: &DeformRequest<'_>,
    config: &DeformConfig,
) {
    let frame = request.frame;
    let indices = deform_indices(skeleton, request.bones, request.pass);
    trace!(frame, pass = ?request.pass, ?indices, "deform set");
    if deltas.bones.len() != skeleton.len() {
        deltas.bones = PoseDeltaStore::for_skeleton(skeleton);
    }
    let store = &mut deltas.bones;

    let morphs = morph::blend(skeleton, source, frame, None);
    store.seed(&indices, |index| {
        skeleton
            .bone(index)
            .and_then(|bone| source.bone_frame(&bone.name, frame))
            .map(|f| BoneDelta::from_frame(&f))
            .unwrap_or_default()
    });
    morphs.apply_to_store(store, &indices);

    let depth = config.effector_depth_limit;
    for &index in &indices {
        update_unit(skeleton, store, index, depth);
    }
    update_globals(skeleton, store, &indices);
    snapshot_ik_off(store, &indices);

    if request.calc_ik {
        let mut solved = 0usize;
        for &index in &indices {
            let Some(bone) = skeleton.bone(index) else {
                continue;
            };
            if !bone.is_ik() || !source.ik_enabled(&bone.name, frame) {
                continue;
            }
            let outcome = ik::solve(skeleton, store, index, config);
            trace!(ik_bone = %bone.name, ?outcome, "IK solved");
            solved += 1;
        }
        if solved > 0 {
            for &index in &indices {
                if skeleton.bone(index).is_some_and(|b| b.effector.is_some()) {
                    update_unit(skeleton, store, index, depth);
                }
            }
        }
    }
    update_globals(skeleton, store, &indices);

    deltas.morphs = morphs;
    deltas.physics = PhysicsDeltas::from_source(source, frame);
    deltas.frame = frame;
}

/// Deformer with a configuration and a pose cache keyed by request identity.
#[derive(Debug)]
pub struct Deformer {
    config: DeformConfig,
    cache: PoseCache,
}

impl Default for Deformer {
    fn default() -> Self {
        Self::new(DeformConfig::default())
    }
}

impl Deformer {
    pub fn new(config: DeformConfig) -> Self {
        let cache = PoseCache::new(config.cache_capacity);
        Self { config, cache }
    }

    #[inline]
    pub fn config(&self) -> &DeformConfig {
        &self.config
    }

    #[inline]
    pub fn cache(&self) -> &PoseCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Deform, reusing the cached result when skeleton, source and request
    /// are unchanged.
    pub fn deform<S: KeyframeSource + ?Sized>(
        &mut self,
        skeleton: &Skeleton,
        source: &S,
        request: &DeformRequest<'_>,
    ) -> Arc<Deltas> {
        let key = PoseKey::new(skeleton, source.content_hash(), request);
        if let Some(hit) = self.cache.get(&key) {
            debug!(frame = request.frame, "pose cache hit");
            return hit;
        }
        let deltas = Arc::new(deform(skeleton, source, request, &self.config));
        self.cache.insert(key, Arc::clone(&deltas));
        deltas
    }

    /// Both passes: before-physics, then after-physics on the same store.
    /// Not cached.
    pub fn deform_both_passes<S: KeyframeSource + ?Sized>(
        &self,
        skeleton: &Skeleton,
        source: &S,
        request: &DeformRequest<'_>,
    ) -> Deltas {
        let before = request.with_pass(DeformPass::BeforePhysics);
        let mut deltas = deform(skeleton, source, &before, &self.config);
        let after = request.with_pass(DeformPass::AfterPhysics);
        deform_into(&mut deltas, skeleton, source, &after, &self.config);
        deltas
    }
}
