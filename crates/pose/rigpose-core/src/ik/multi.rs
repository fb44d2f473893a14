//! Several IK goals solved together, keeping the best pose seen.

use nalgebra::Point3;
use tracing::{debug, trace};

use super::{solve_toward, IkOutcome};
use crate::config::DeformConfig;
use crate::delta::{PoseDeltaStore, PoseSnapshot};
use crate::math::point_of;
use crate::skeleton::Skeleton;

/// One goal of a multi-target solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkGoal {
    pub ik_bone: usize,
    /// World position to reach; the IK bone's own position when `None`.
    pub position: Option<Point3<f64>>,
}

impl IkGoal {
    pub fn new(ik_bone: usize) -> Self {
        Self {
            ik_bone,
            position: None,
        }
    }

    pub fn at(ik_bone: usize, position: Point3<f64>) -> Self {
        Self {
            ik_bone,
            position: Some(position),
        }
    }
}

/// Solve every goal once per outer iteration, up to
/// `config.multi_target_iterations` times, then restore the pose with the
/// smallest summed target error. `iterations` counts outer iterations and
/// `error` is the summed error of the restored pose.
pub fn solve_targets(
    skeleton: &Skeleton,
    store: &mut PoseDeltaStore,
    goals: &[IkGoal],
    config: &DeformConfig,
) -> IkOutcome {
    let resolved: Vec<(usize, usize, Point3<f64>)> = goals
        .iter()
        .filter_map(|goal| {
            let target = skeleton.bone(goal.ik_bone)?.ik.as_ref()?.target;
            let position = match goal.position {
                Some(p) => p,
                None => point_of(&store.get(goal.ik_bone)?.global_matrix),
            };
            Some((goal.ik_bone, target, position))
        })
        .collect();
    if resolved.is_empty() {
        return IkOutcome::default();
    }

    let mut history: Vec<(f64, PoseSnapshot)> = Vec::with_capacity(config.multi_target_iterations);
    for iteration in 0..config.multi_target_iterations {
        for &(ik_bone, _, position) in &resolved {
            solve_toward(skeleton, store, ik_bone, Some(position), config);
        }
        let error = summed_error(store, &resolved);
        trace!(iteration, error, "multi-target iteration");
        history.push((error, store.snapshot()));
        if error < config.ik_convergence_distance {
            break;
        }
    }

    let iterations = history.len();
    let Some(best) = history
        .iter()
        .enumerate()
        .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
        .map(|(i, _)| i)
    else {
        return IkOutcome::default();
    };
    let (error, snapshot) = history.swap_remove(best);
    debug!(best, iterations, error, "multi-target solve selected snapshot");
    store.restore(snapshot);
    IkOutcome {
        iterations,
        converged: error < config.ik_convergence_distance,
        error,
    }
}

fn summed_error(store: &PoseDeltaStore, goals: &[(usize, usize, Point3<f64>)]) -> f64 {
    goals
        .iter()
        .map(|&(_, target, goal)| {
            store
                .get(target)
                .map_or(0.0, |d| (point_of(&d.global_matrix) - goal).norm())
        })
        .sum()
}
