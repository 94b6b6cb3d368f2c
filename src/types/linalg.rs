//! Linear algebra type aliases for the deskew pipeline
//!
//! Everything is 3D and double precision; keeping the aliases here means the
//! rest of the crate never spells out nalgebra generics.

use nalgebra::{Isometry3, Matrix3, UnitQuaternion, Vector3};

pub type Vec3 = Vector3<f64>;
pub type Rot3 = Matrix3<f64>;
pub type Quat = UnitQuaternion<f64>;
pub type Pose3 = Isometry3<f64>;

/// Milliseconds per second, for converting intra-scan point offsets.
pub const MS_PER_SEC: f64 = 1000.0;

/// Row-major flattening used by `KeyPose::rotation`.
pub fn rot_to_row_major(r: &Rot3) -> [f64; 9] {
    let mut out = [0.0; 9];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = r[(i / 3, i % 3)];
    }
    out
}

pub fn rot_from_row_major(values: &[f64; 9]) -> Rot3 {
    Rot3::from_row_slice(values)
}
