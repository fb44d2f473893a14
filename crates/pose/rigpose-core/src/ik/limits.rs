//! Euler-angle limits for IK links.
//!
//! A rotation is decomposed in whichever axis order keeps the gimbal zone
//! (middle axis at ±90°) outside the limit, clamped per axis, and rebuilt in
//! the same order.

use std::f64::consts::FRAC_PI_2;

use nalgebra::{Matrix3, Rotation3, Unit, UnitQuaternion, Vector3};

use crate::skeleton::{AngleLimit, IkLink, LocalAxes};

pub use crate::math::to_fixed_axis_rotation;

/// Decomposition order, axes listed in the order they are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EulerOrder {
    /// `R = Ry·Rx·Rz`, middle axis X.
    Zxy,
    /// `R = Rz·Ry·Rx`, middle axis Y.
    Xyz,
    /// `R = Rx·Rz·Ry`, middle axis Z.
    Yzx,
}

/// Pick the order whose middle axis has a limit strictly inside (-90°, 90°).
pub fn euler_order_for(limit: &AngleLimit) -> EulerOrder {
    let inside = |i: usize| -FRAC_PI_2 < limit.min[i] && limit.max[i] < FRAC_PI_2;
    if inside(0) {
        EulerOrder::Zxy
    } else if inside(1) {
        EulerOrder::Xyz
    } else {
        EulerOrder::Yzx
    }
}

/// Euler angles `(x, y, z)` of `m` in `order`; the middle axis is clamped to
/// `±gimbal_limit`.
pub fn decompose(m: &Matrix3<f64>, order: EulerOrder, gimbal_limit: f64) -> Vector3<f64> {
    let middle = |s: f64| (-s).clamp(-1.0, 1.0).asin().clamp(-gimbal_limit, gimbal_limit);
    match order {
        EulerOrder::Zxy => {
            let x = middle(m[(1, 2)]);
            let y = m[(0, 2)].atan2(m[(2, 2)]);
            let z = m[(1, 0)].atan2(m[(1, 1)]);
            Vector3::new(x, y, z)
        }
        EulerOrder::Xyz => {
            let y = middle(m[(2, 0)]);
            let x = m[(2, 1)].atan2(m[(2, 2)]);
            let z = m[(1, 0)].atan2(m[(0, 0)]);
            Vector3::new(x, y, z)
        }
        EulerOrder::Yzx => {
            let z = middle(m[(0, 1)]);
            let x = m[(2, 1)].atan2(m[(1, 1)]);
            let y = m[(0, 2)].atan2(m[(0, 0)]);
            Vector3::new(x, y, z)
        }
    }
}

/// Rebuild a rotation from `(x, y, z)` angles in `order`.
pub fn compose(angles: &Vector3<f64>, order: EulerOrder) -> UnitQuaternion<f64> {
    let rx = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), angles.x);
    let ry = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angles.y);
    let rz = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angles.z);
    match order {
        EulerOrder::Zxy => ry * rx * rz,
        EulerOrder::Xyz => rz * ry * rx,
        EulerOrder::Yzx => rx * rz * ry,
    }
}

/// Clamp `value` into `[min, max]`. Before half of the loop budget is spent a
/// value past a bound is mirrored back across it when the mirror image lands
/// inside the interval.
pub fn clamp_angle(value: f64, min: f64, max: f64, iteration: usize, loop_count: usize) -> f64 {
    let early = (iteration as f64) < loop_count as f64 / 2.0;
    let mut v = value;
    if v < min {
        let mirrored = 2.0 * min - v;
        v = if early && mirrored <= max { mirrored } else { min };
    }
    if v > max {
        let mirrored = 2.0 * max - v;
        v = if early && mirrored >= min { mirrored } else { max };
    }
    v
}

fn clamp_euler(
    q: &UnitQuaternion<f64>,
    limit: &AngleLimit,
    iteration: usize,
    loop_count: usize,
    gimbal_limit: f64,
) -> UnitQuaternion<f64> {
    let order = euler_order_for(limit);
    let angles = decompose(q.to_rotation_matrix().matrix(), order, gimbal_limit);
    let clamped = Vector3::from_fn(|i, _| {
        clamp_angle(angles[i], limit.min[i], limit.max[i], iteration, loop_count)
    });
    compose(&clamped, order)
}

fn basis_rotation(axes: &LocalAxes) -> UnitQuaternion<f64> {
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(axes.basis()))
}

/// Apply `limit` to `q`. With `axes` the limit is expressed in that basis.
pub fn limit_rotation(
    q: &UnitQuaternion<f64>,
    limit: &AngleLimit,
    axes: Option<&LocalAxes>,
    iteration: usize,
    loop_count: usize,
    gimbal_limit: f64,
) -> UnitQuaternion<f64> {
    match axes {
        Some(axes) => {
            let b = basis_rotation(axes);
            let local = b.inverse() * q * b;
            b * clamp_euler(&local, limit, iteration, loop_count, gimbal_limit) * b.inverse()
        }
        None => clamp_euler(q, limit, iteration, loop_count, gimbal_limit),
    }
}

/// Euler angles of `q` as seen by the limit, for containment checks.
pub fn limited_angles(
    q: &UnitQuaternion<f64>,
    limit: &AngleLimit,
    axes: Option<&LocalAxes>,
    gimbal_limit: f64,
) -> Vector3<f64> {
    let q = match axes {
        Some(axes) => {
            let b = basis_rotation(axes);
            b.inverse() * q * b
        }
        None => *q,
    };
    decompose(q.to_rotation_matrix().matrix(), euler_order_for(limit), gimbal_limit)
}

/// Snap a CCD rotation axis onto the single free axis of the link's limit,
/// signed by the cross product's component along it.
pub fn snap_axis(
    link: &IkLink,
    axes: Option<&LocalAxes>,
    cross: &Vector3<f64>,
) -> Option<Unit<Vector3<f64>>> {
    let (limit, axes) = match (&link.global_limit, &link.local_limit) {
        (Some(limit), _) => (limit, None),
        (None, Some(limit)) => (limit, axes),
        (None, None) => return None,
    };
    let free = limit.single_axis()?;
    let axis = axes.map_or_else(|| LocalAxes::identity().axis(free), |a| a.axis(free));
    Some(if cross.dot(&axis.into_inner()) >= 0.0 {
        axis
    } else {
        Unit::new_unchecked(-axis.into_inner())
    })
}
