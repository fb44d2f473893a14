//! CCD inverse kinematics over a prepared `PoseDeltaStore`.
//!
//! The store must already hold unit and global matrices for the IK bone's
//! dependency closure (the scheduler guarantees this). Each corrected link
//! gets a new `frame_rotation`; units and globals of the closure are kept
//! current after every link step.

pub mod limits;
mod multi;

pub use multi::{solve_targets, IkGoal};

use nalgebra::{Point3, Unit, UnitQuaternion};
use tracing::{debug, trace};

use crate::compose::{
    ik_off_global_matrix, inherited_rotation, snapshot_ik_off, update_globals, update_unit,
};
use crate::config::{DeformConfig, ToeIkTrigger};
use crate::delta::PoseDeltaStore;
use crate::math::{is_identity_rotation, point_of, to_fixed_axis_rotation};
use crate::skeleton::{IkLink, Skeleton};

/// Result of one solve.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IkOutcome {
    /// Iterations started before the solve stopped.
    pub iterations: usize,
    pub converged: bool,
    /// World-space distance between target and goal at the end.
    pub error: f64,
}

/// Whether the first iteration of `ik_bone` aims with the IK-off target.
pub fn uses_toe_target(skeleton: &Skeleton, ik_bone: usize, config: &DeformConfig) -> bool {
    let Some(bone) = skeleton.bone(ik_bone) else {
        return false;
    };
    let Some(ik) = &bone.ik else {
        return false;
    };
    if ik.links.len() != 1 {
        return false;
    }
    match &config.toe_ik {
        ToeIkTrigger::Structural => skeleton.order_key(ik.target) > skeleton.order_key(ik_bone),
        ToeIkTrigger::Names(names) => names.iter().any(|n| *n == bone.name),
        ToeIkTrigger::Disabled => false,
    }
}

/// Solve `ik_bone` toward its own world position.
pub fn solve(
    skeleton: &Skeleton,
    store: &mut PoseDeltaStore,
    ik_bone: usize,
    config: &DeformConfig,
) -> IkOutcome {
    solve_toward(skeleton, store, ik_bone, None, config)
}

/// Solve `ik_bone`, aiming at `goal` when given instead of the IK bone's
/// world position.
pub fn solve_toward(
    skeleton: &Skeleton,
    store: &mut PoseDeltaStore,
    ik_bone: usize,
    goal: Option<Point3<f64>>,
    config: &DeformConfig,
) -> IkOutcome {
    let Some(ik) = skeleton.bone(ik_bone).and_then(|b| b.ik.as_ref()) else {
        return IkOutcome::default();
    };
    if !store.contains(ik.target) || ik.links.iter().any(|l| !store.contains(l.bone)) {
        debug!(ik_bone, "IK chain not present in the store, skipping");
        return IkOutcome::default();
    }

    let closure = skeleton.affected_indices(ik_bone);
    update_globals(skeleton, store, closure);
    let links: Vec<usize> = ik.links.iter().map(|l| l.bone).collect();
    snapshot_ik_off(store, &links);

    let goal = match goal {
        Some(goal) => goal,
        None => match store.get(ik_bone) {
            Some(delta) => point_of(&delta.global_matrix),
            None => return IkOutcome::default(),
        },
    };
    let toe = uses_toe_target(skeleton, ik_bone, config);
    let toe_target = toe.then(|| point_of(&ik_off_global_matrix(skeleton, store, ik.target)));

    for iteration in 0..ik.loop_count {
        for (position, link) in ik.links.iter().enumerate() {
            let target = match toe_target {
                Some(ik_off) if iteration == 0 => ik_off,
                _ => current_position(store, ik.target),
            };
            let step = Step {
                iteration,
                loop_count: ik.loop_count,
                max_angle: ik.unit_rotation * (position + 1) as f64,
                multi_link: ik.links.len() > 1,
            };
            match rotate_link(skeleton, store, link, &target, &goal, &step, config) {
                LinkStep::Converged => {
                    let error = (current_position(store, ik.target) - goal).norm();
                    debug!(ik_bone, iteration, error, "IK converged");
                    return IkOutcome {
                        iterations: iteration + 1,
                        converged: true,
                        error,
                    };
                }
                LinkStep::Skipped => continue,
                LinkStep::Rotated => {}
            }
            propagate(skeleton, store, link.bone, closure, config);
        }
    }

    let error = (current_position(store, ik.target) - goal).norm();
    debug!(ik_bone, error, loops = ik.loop_count, "IK iteration budget exhausted");
    IkOutcome {
        iterations: ik.loop_count,
        converged: error < config.ik_convergence_distance,
        error,
    }
}

struct Step {
    iteration: usize,
    loop_count: usize,
    max_angle: f64,
    multi_link: bool,
}

enum LinkStep {
    Converged,
    Skipped,
    Rotated,
}

fn current_position(store: &PoseDeltaStore, index: usize) -> Point3<f64> {
    store
        .get(index)
        .map_or_else(Point3::origin, |d| point_of(&d.global_matrix))
}

/// One CCD step for a single link. Writes the new `frame_rotation`.
fn rotate_link(
    skeleton: &Skeleton,
    store: &mut PoseDeltaStore,
    link: &IkLink,
    target: &Point3<f64>,
    goal: &Point3<f64>,
    step: &Step,
    config: &DeformConfig,
) -> LinkStep {
    let Some(bone) = skeleton.bone(link.bone) else {
        return LinkStep::Skipped;
    };
    let Some(inverse) = store
        .get(link.bone)
        .and_then(|d| d.global_matrix.try_inverse())
    else {
        return LinkStep::Skipped;
    };

    let local_target = inverse.transform_point(target);
    let local_goal = inverse.transform_point(goal);
    if (local_target - local_goal).norm() < config.ik_convergence_distance {
        return LinkStep::Converged;
    }
    let (Some(to_target), Some(to_goal)) = (
        local_target.coords.try_normalize(1e-12),
        local_goal.coords.try_normalize(1e-12),
    ) else {
        return LinkStep::Skipped;
    };

    let cross = to_target.cross(&to_goal);
    let Some(mut axis) = Unit::try_new(cross, 1e-12) else {
        return LinkStep::Skipped;
    };
    let raw_angle = to_target.dot(&to_goal).clamp(-1.0, 1.0).acos();
    let angle = raw_angle.min(step.max_angle);
    if link.has_limit() && (step.multi_link || raw_angle > config.gimbal_limit()) {
        if let Some(snapped) = limits::snap_axis(link, bone.local_axes.as_ref(), &cross) {
            axis = snapped;
        }
    }

    let increment = match &bone.fixed_axis {
        Some(fixed) if link.has_limit() => {
            let signed = if axis.dot(&fixed.into_inner()) < 0.0 { -angle } else { angle };
            UnitQuaternion::from_axis_angle(fixed, signed)
        }
        Some(fixed) => {
            to_fixed_axis_rotation(&UnitQuaternion::from_axis_angle(&axis, angle), fixed)
        }
        None => UnitQuaternion::from_axis_angle(&axis, angle),
    };

    // The local frame already carries the effector-inherited rotation, which
    // composes after the frame rotation.
    let inherited = inherited_rotation(skeleton, store, link.bone, config.effector_depth_limit);
    let increment = inherited * increment * inherited.inverse();

    let Some(delta) = store.get_mut(link.bone) else {
        return LinkStep::Skipped;
    };
    let mut rotation = delta.frame_rotation * increment;
    let gimbal = config.gimbal_limit();
    if let Some(limit) = &link.global_limit {
        rotation = limits::limit_rotation(&rotation, limit, None, step.iteration, step.loop_count, gimbal);
    }
    if let Some(limit) = &link.local_limit {
        rotation = limits::limit_rotation(
            &rotation,
            limit,
            bone.local_axes.as_ref(),
            step.iteration,
            step.loop_count,
            gimbal,
        );
    }
    // The morph rotation moves into the frame rotation once, so the composer
    // does not apply it a second time.
    if step.iteration == 0 && !is_identity_rotation(&delta.frame_morph_rotation) {
        rotation *= delta.frame_morph_rotation;
        delta.frame_morph_rotation = UnitQuaternion::identity();
    }
    if let Some(fixed) = &bone.fixed_axis {
        rotation = to_fixed_axis_rotation(&rotation, fixed);
    }
    trace!(
        link = %bone.name,
        iteration = step.iteration,
        angle,
        "IK link rotated"
    );
    delta.frame_rotation = rotation;
    LinkStep::Rotated
}

/// Recompose the link and every closure bone inheriting from it, then refresh
/// the closure's globals.
fn propagate(
    skeleton: &Skeleton,
    store: &mut PoseDeltaStore,
    link: usize,
    closure: &[usize],
    config: &DeformConfig,
) {
    let mut dirty = vec![link];
    for &index in closure {
        let inherits = skeleton
            .bone(index)
            .and_then(|b| b.effector)
            .is_some_and(|e| dirty.contains(&e.source));
        if index == link || inherits {
            update_unit(skeleton, store, index, config.effector_depth_limit);
            if index != link {
                dirty.push(index);
            }
        }
    }
    update_globals(skeleton, store, closure);
}
