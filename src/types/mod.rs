pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// One gyro + accelerometer reading. Timestamps are seconds on the sensor clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    pub timestamp: f64,
    /// rad/s
    pub angular_velocity: Vec3,
    /// m/s²
    pub linear_acceleration: Vec3,
}

impl InertialSample {
    pub fn new(timestamp: f64, angular_velocity: Vec3, linear_acceleration: Vec3) -> Self {
        Self { timestamp, angular_velocity, linear_acceleration }
    }

    /// Componentwise blend `w1 * a + w2 * b`, stamped at `timestamp`.
    pub fn blend(timestamp: f64, a: &InertialSample, w1: f64, b: &InertialSample, w2: f64) -> Self {
        Self {
            timestamp,
            angular_velocity: a.angular_velocity * w1 + b.angular_velocity * w2,
            linear_acceleration: a.linear_acceleration * w1 + b.linear_acceleration * w2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    pub position: Vec3,
    /// Milliseconds after the scan capture timestamp.
    pub offset_time: f64,
    pub intensity: f32,
}

impl ScanPoint {
    pub fn new(position: Vec3, offset_time: f64, intensity: f32) -> Self {
        Self { position, offset_time, intensity }
    }

    /// Absolute capture time of this point given its scan's timestamp.
    pub fn absolute_time(&self, scan_timestamp: f64) -> f64 {
        scan_timestamp + self.offset_time / MS_PER_SEC
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub timestamp: f64,
    pub points: Vec<ScanPoint>,
}

impl Scan {
    pub fn new(timestamp: f64, points: Vec<ScanPoint>) -> Self {
        Self { timestamp, points }
    }

    /// Largest point offset in milliseconds, regardless of point order.
    pub fn max_offset_ms(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.offset_time)
            .fold(0.0_f64, f64::max)
    }

    /// Capture timestamp plus the largest point offset.
    pub fn end_time(&self) -> f64 {
        self.timestamp + self.max_offset_ms() / MS_PER_SEC
    }

    /// Stable sort by offset time; equal offsets keep arrival order.
    pub fn sort_by_offset(&mut self) {
        self.points
            .sort_by(|a, b| a.offset_time.total_cmp(&b.offset_time));
    }

    pub fn is_sorted_by_offset(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[0].offset_time <= w[1].offset_time)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One scan plus every inertial sample up to its end time.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementGroup {
    pub scan: Scan,
    pub inertial: Vec<InertialSample>,
}

impl MeasurementGroup {
    pub fn new(scan: Scan, inertial: Vec<InertialSample>) -> Self {
        Self { scan, inertial }
    }

    pub fn last_inertial(&self) -> Option<&InertialSample> {
        self.inertial.last()
    }

    /// Time span covered by the inertial samples, 0 for a single sample.
    pub fn inertial_span(&self) -> f64 {
        match (self.inertial.first(), self.inertial.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }
}

/// Per-sample rotation snapshot emitted alongside an undistorted scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPose {
    /// Seconds after the first inertial sample of the group.
    pub offset_time: f64,
    pub acceleration: Vec3,
    pub angular_velocity: Vec3,
    pub bias_acc: Vec3,
    pub bias_gyr: Vec3,
    /// Always zero: translation is not modelled.
    pub translation: Vec3,
    /// Row-major 3×3 rotation.
    pub rotation: [f64; 9],
}

impl KeyPose {
    pub fn new(
        offset_time: f64,
        acceleration: Vec3,
        angular_velocity: Vec3,
        bias_acc: Vec3,
        bias_gyr: Vec3,
        translation: Vec3,
        rotation: &Rot3,
    ) -> Self {
        Self {
            offset_time,
            acceleration,
            angular_velocity,
            bias_acc,
            bias_gyr,
            translation,
            rotation: rot_to_row_major(rotation),
        }
    }

    pub fn rotation_matrix(&self) -> Rot3 {
        rot_from_row_major(&self.rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(offset_ms: f64) -> ScanPoint {
        ScanPoint::new(Vec3::new(offset_ms, 0.0, 0.0), offset_ms, 1.0)
    }

    #[test]
    fn test_end_time_uses_max_offset_not_last_point() {
        let scan = Scan::new(10.0, vec![point(5.0), point(100.0), point(20.0)]);
        assert_relative_eq!(scan.end_time(), 10.1);
    }

    #[test]
    fn test_sort_is_stable_for_equal_offsets() {
        let mut scan = Scan::new(
            0.0,
            vec![
                ScanPoint::new(Vec3::new(1.0, 0.0, 0.0), 3.0, 0.0),
                ScanPoint::new(Vec3::new(2.0, 0.0, 0.0), 1.0, 0.0),
                ScanPoint::new(Vec3::new(3.0, 0.0, 0.0), 3.0, 0.0),
            ],
        );
        scan.sort_by_offset();
        assert!(scan.is_sorted_by_offset());
        let xs: Vec<f64> = scan.points.iter().map(|p| p.position.x).collect();
        assert_eq!(xs, vec![2.0, 1.0, 3.0]);
    }

    #[test]
    fn test_key_pose_rotation_round_trips() {
        let r = Rot3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let kp = KeyPose::new(0.0, Vec3::zeros(), Vec3::zeros(), Vec3::zeros(), Vec3::zeros(), Vec3::zeros(), &r);
        assert_eq!(kp.rotation[1], -1.0);
        assert_eq!(kp.rotation_matrix(), r);
    }

    #[test]
    fn test_inertial_span() {
        let imu = |t: f64| InertialSample::new(t, Vec3::zeros(), Vec3::zeros());
        let group = MeasurementGroup::new(Scan::new(0.0, vec![]), vec![imu(0.25), imu(0.5), imu(0.75)]);
        assert_relative_eq!(group.inertial_span(), 0.5);
        assert_eq!(MeasurementGroup::new(Scan::new(0.0, vec![]), vec![imu(1.0)]).inertial_span(), 0.0);
        assert_eq!(MeasurementGroup::new(Scan::new(0.0, vec![]), vec![]).inertial_span(), 0.0);
    }

    #[test]
    fn test_blend_weights_components() {
        let a = InertialSample::new(0.0, Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 2.0));
        let b = InertialSample::new(1.0, Vec3::new(3.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 4.0));
        let mid = InertialSample::blend(0.5, &a, 0.5, &b, 0.5);
        assert_relative_eq!(mid.angular_velocity.x, 2.0);
        assert_relative_eq!(mid.linear_acceleration.z, 3.0);
        assert_eq!(mid.timestamp, 0.5);
    }
}
