//! Rotation helpers: Rodrigues exponential map and diagnostics.

use crate::types::{Rot3, Vec3};

/// Below this angular-velocity norm the rotation axis is undefined and
/// `exp` returns identity.
pub const MIN_ANGULAR_RATE: f64 = 1e-7;

/// Skew-symmetric cross-product matrix `[v]×`.
pub fn skew(v: &Vec3) -> Rot3 {
    Rot3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Rotation produced by spinning at `angular_velocity` for `dt` seconds.
///
/// `I + sin(θ)·K + (1 − cos θ)·K²` with `K = [axis]×` and `θ = |ω|·dt`.
pub fn exp(angular_velocity: &Vec3, dt: f64) -> Rot3 {
    let rate = angular_velocity.norm();
    if rate < MIN_ANGULAR_RATE {
        return Rot3::identity();
    }
    let k = skew(&(angular_velocity / rate));
    let angle = rate * dt;
    Rot3::identity() + k * angle.sin() + k * k * (1.0 - angle.cos())
}

/// True when `r` is orthonormal with determinant +1 within `tol`.
pub fn is_rotation(r: &Rot3, tol: f64) -> bool {
    let ortho = (r.transpose() * r - Rot3::identity()).abs().max();
    ortho < tol && (r.determinant() - 1.0).abs() < tol
}

/// XYZ (roll, pitch, yaw) angles in degrees, for log output only.
pub fn euler_degrees(r: &Rot3) -> Vec3 {
    let (roll, pitch, yaw) = nalgebra::Rotation3::from_matrix_unchecked(*r).euler_angles();
    Vec3::new(roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
}
