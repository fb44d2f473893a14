//! Small nalgebra helpers shared by the composer and the IK solver.

use nalgebra::{Matrix4, Point3, Quaternion, Unit, UnitQuaternion, Vector3};

/// Translation column of an affine matrix.
#[inline]
pub fn translation_of(m: &Matrix4<f64>) -> Vector3<f64> {
    Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
}

#[inline]
pub fn point_of(m: &Matrix4<f64>) -> Point3<f64> {
    Point3::from(translation_of(m))
}

/// True for the exact identity rotation (either sign of `w`).
#[inline]
pub fn is_identity_rotation(q: &UnitQuaternion<f64>) -> bool {
    q.i == 0.0 && q.j == 0.0 && q.k == 0.0
}

/// Quaternion scalar power: the same axis, angle multiplied by `factor`.
pub fn scale_rotation(q: &UnitQuaternion<f64>, factor: f64) -> UnitQuaternion<f64> {
    if factor == 1.0 {
        return *q;
    }
    match q.axis() {
        Some(axis) => UnitQuaternion::from_axis_angle(&axis, q.angle() * factor),
        None => UnitQuaternion::identity(),
    }
}

/// Project a rotation onto a single axis, keeping its magnitude and taking
/// the sign from the side of the axis its own rotation axis points to.
pub fn to_fixed_axis_rotation(
    q: &UnitQuaternion<f64>,
    fixed_axis: &Unit<Vector3<f64>>,
) -> UnitQuaternion<f64> {
    let Some(axis) = q.axis() else {
        return UnitQuaternion::identity();
    };
    let mut angle = q.angle();
    if axis.dot(&fixed_axis.into_inner()) < 0.0 {
        angle = -angle;
    }
    UnitQuaternion::from_axis_angle(fixed_axis, angle)
}

/// Quaternion from `[x, y, z, w]`; a zero quaternion becomes the identity.
pub fn quat_from_xyzw(q: [f64; 4]) -> UnitQuaternion<f64> {
    Unit::try_new(Quaternion::new(q[3], q[0], q[1], q[2]), 1e-12)
        .unwrap_or_else(UnitQuaternion::identity)
}

#[inline]
pub fn xyzw_of(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.i, q.j, q.k, q.w]
}

#[inline]
pub fn translation_matrix(v: &Vector3<f64>) -> Matrix4<f64> {
    Matrix4::new_translation(v)
}

#[inline]
pub fn scale_matrix(v: &Vector3<f64>) -> Matrix4<f64> {
    Matrix4::new_nonuniform_scaling(v)
}
