//! Rotation-only motion compensation of a scan.
//!
//! Consecutive inertial samples bound a segment with a constant (averaged,
//! bias-corrected) angular rate. Segments are walked away from the reference
//! end of the scan while a rotation `R` is accumulated; every point that falls
//! in the current segment is rotated by `Exp(±ω, dt) · R`, where `dt` runs from
//! the segment boundary nearest the reference to the point.
//!
//! BACKWARD walks from the last sample towards the first and lands points in
//! the frame of the last sample, which is the last one at or before the scan
//! end. FORWARD walks the other way into the frame of the first sample and
//! uses the opposite rate sign.
//!
//! Composed rotations are not re-orthonormalized.

use std::ops::Range;

use crate::config::CompensationDirection;
use crate::error::{DeskewError, Result};
use crate::so3;
use crate::types::{InertialSample, KeyPose, Rot3, Scan, Vec3};

impl CompensationDirection {
    fn rate_sign(self) -> f64 {
        match self {
            CompensationDirection::Forward => 1.0,
            CompensationDirection::Backward => -1.0,
        }
    }

    /// Segment indices `k` (pair `k`, `k + 1`) in walk order.
    fn segments(self, samples: usize) -> Box<dyn Iterator<Item = usize>> {
        let count = samples.saturating_sub(1);
        match self {
            CompensationDirection::Forward => Box::new(0..count),
            CompensationDirection::Backward => Box::new((0..count).rev()),
        }
    }

    /// Next unprocessed point index on the walked side.
    fn peek(self, pending: &Range<usize>) -> Option<usize> {
        if pending.is_empty() {
            return None;
        }
        match self {
            CompensationDirection::Forward => Some(pending.start),
            CompensationDirection::Backward => Some(pending.end - 1),
        }
    }

    fn consume(self, pending: &mut Range<usize>) {
        match self {
            CompensationDirection::Forward => pending.start += 1,
            CompensationDirection::Backward => pending.end -= 1,
        }
    }
}

/// What one undistortion pass produced besides the moved points.
#[derive(Clone, Debug)]
pub struct UndistortReport {
    /// Absolute time of the frame the points were moved into.
    pub reference_time: f64,
    pub key_poses: Vec<KeyPose>,
    /// Rotation applied to the point farthest from the reference frame.
    pub farthest_point_rotation: Rot3,
    /// Accumulated rotation over the whole inertial sequence.
    pub accumulated_rotation: Rot3,
    pub points_compensated: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScanUndistorter {
    direction: CompensationDirection,
}

impl ScanUndistorter {
    pub fn new(direction: CompensationDirection) -> Self {
        Self { direction }
    }

    /// Sort `scan` by point offset and rotate every point into the reference frame.
    ///
    /// Point count and the sorted order are preserved; only positions change.
    /// A point exactly on a segment boundary belongs to the segment walked
    /// first. Points outside the inertial span are extrapolated with the
    /// nearest segment's rate.
    pub fn undistort(&self, scan: &mut Scan, inertial: &[InertialSample], gyro_bias: &Vec3) -> Result<UndistortReport> {
        let (first, last) = match (inertial.first(), inertial.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(DeskewError::precursor("undistortion on an empty inertial sequence")),
        };
        scan.sort_by_offset();

        let dir = self.direction;
        let sign = dir.rate_sign();
        let begin_time = first.timestamp;
        let pose_at = |sample: &InertialSample, rotation: &Rot3| {
            KeyPose::new(
                sample.timestamp - begin_time,
                sample.linear_acceleration,
                sample.angular_velocity,
                Vec3::zeros(),
                *gyro_bias,
                Vec3::zeros(),
                rotation,
            )
        };

        let seed = match dir {
            CompensationDirection::Forward => first,
            CompensationDirection::Backward => last,
        };
        let mut key_poses = Vec::with_capacity(inertial.len());
        key_poses.push(pose_at(seed, &Rot3::identity()));

        let scan_time = scan.timestamp;
        let points = &mut scan.points;
        let mut pending = 0..points.len();
        let mut r_acc = Rot3::identity();
        let mut farthest = Rot3::identity();
        let segment_count = inertial.len().saturating_sub(1);

        for (step, k) in dir.segments(inertial.len()).enumerate() {
            let head = &inertial[k];
            let tail = &inertial[k + 1];
            let rate = sign * (0.5 * (head.angular_velocity + tail.angular_velocity) - gyro_bias);
            let final_segment = step + 1 == segment_count;

            while let Some(idx) = dir.peek(&pending) {
                let point_time = points[idx].absolute_time(scan_time);
                let (inside, dt) = match dir {
                    CompensationDirection::Forward => (point_time <= tail.timestamp, point_time - head.timestamp),
                    CompensationDirection::Backward => (point_time >= head.timestamp, tail.timestamp - point_time),
                };
                if !inside && !final_segment {
                    break;
                }
                let r_point = so3::exp(&rate, dt) * r_acc;
                points[idx].position = r_point * points[idx].position;
                farthest = r_point;
                dir.consume(&mut pending);
            }

            r_acc = so3::exp(&rate, tail.timestamp - head.timestamp) * r_acc;
            let boundary = match dir {
                CompensationDirection::Forward => tail,
                CompensationDirection::Backward => head,
            };
            key_poses.push(pose_at(boundary, &r_acc));
        }

        let points_compensated = if segment_count == 0 { 0 } else { scan.points.len() };
        let angles = so3::euler_degrees(&farthest);
        log::info!(
            "undistort rotation angle [x, y, z]: [{:.2}, {:.2}, {:.2}], {} points, {} key poses",
            angles.x,
            angles.y,
            angles.z,
            points_compensated,
            key_poses.len()
        );

        Ok(UndistortReport {
            reference_time: seed.timestamp,
            key_poses,
            farthest_point_rotation: farthest,
            accumulated_rotation: r_acc,
            points_compensated,
        })
    }
}
