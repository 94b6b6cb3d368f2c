//! Stationary warm-up calibration of gyro bias and gravity scale.
//!
//! One-pass running mean/variance over every inertial sample seen while the
//! platform is assumed still. The first group only seeds the means; the
//! following groups are folded sample by sample until the configured count is
//! reached, after which the state is frozen until `reset`.

use serde::{Deserialize, Serialize};

use crate::types::{InertialSample, Vec3};

/// Frozen output of a finished warm-up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub samples: usize,
    /// 1 / |mean acceleration|, floored.
    pub gravity_scale: f64,
    pub zero_bias_angular_velocity: Vec3,
    pub mean_acceleration: Vec3,
    pub acceleration_variance: Vec3,
    pub angular_velocity_variance: Vec3,
}

#[derive(Clone, Debug)]
pub struct InertialCalibrator {
    threshold: usize,
    norm_floor: f64,
    count: usize,
    mean_acc: Vec3,
    mean_gyr: Vec3,
    var_acc: Vec3,
    var_gyr: Vec3,
    gravity_scale: f64,
    result: Option<CalibrationResult>,
}

impl InertialCalibrator {
    pub fn new(threshold: usize, norm_floor: f64) -> Self {
        Self {
            threshold,
            norm_floor,
            count: 0,
            mean_acc: Vec3::new(0.0, 0.0, -1.0),
            mean_gyr: Vec3::zeros(),
            var_acc: Vec3::repeat(0.1),
            var_gyr: Vec3::repeat(0.1),
            gravity_scale: 1.0,
            result: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.threshold, self.norm_floor);
    }

    /// Seed the running means from the very first sample ever observed.
    /// Contributes nothing to the sample count.
    pub fn seed(&mut self, sample: &InertialSample) {
        self.mean_acc = sample.linear_acceleration;
        self.mean_gyr = sample.angular_velocity;
        self.gravity_scale = sample.linear_acceleration.norm();
        log::debug!(
            "calibration seeded: acc {:?} gyr {:?} |acc| {:.4}",
            self.mean_acc.as_slice(),
            self.mean_gyr.as_slice(),
            self.gravity_scale
        );
    }

    /// Fold every sample of a group in order. Returns the frozen result the
    /// first time the sample count reaches the threshold.
    ///
    /// Once finished, further calls are ignored.
    pub fn fold<'a>(
        &mut self,
        samples: impl IntoIterator<Item = &'a InertialSample>,
    ) -> Option<&CalibrationResult> {
        if self.result.is_some() {
            return None;
        }
        for sample in samples {
            self.update(&sample.linear_acceleration, &sample.angular_velocity);
        }
        log::info!(
            "inertial initializing: {:.1} %",
            100.0 * (self.count.min(self.threshold)) as f64 / self.threshold as f64
        );
        if self.count >= self.threshold {
            self.finalize();
            return self.result.as_ref();
        }
        None
    }

    fn update(&mut self, acc: &Vec3, gyr: &Vec3) {
        self.count += 1;
        let n = self.count as f64;

        self.mean_acc += (acc - self.mean_acc) / n;
        self.mean_gyr += (gyr - self.mean_gyr) / n;

        let da = acc - self.mean_acc;
        let dg = gyr - self.mean_gyr;
        let carry = (n - 1.0) / n;
        let spread = (n - 1.0) / (n * n);
        self.var_acc = self.var_acc * carry + da.component_mul(&da) * spread;
        self.var_gyr = self.var_gyr * carry + dg.component_mul(&dg) * spread;
    }

    fn finalize(&mut self) {
        self.gravity_scale = 1.0 / self.mean_acc.norm().max(self.norm_floor);
        let result = CalibrationResult {
            samples: self.count,
            gravity_scale: self.gravity_scale,
            zero_bias_angular_velocity: self.mean_gyr,
            mean_acceleration: self.mean_acc,
            acceleration_variance: self.var_acc,
            angular_velocity_variance: self.var_gyr,
        };
        log::info!(
            "calibration results: gravity_scale {:.4}; zero_bias_gyr {:.4} {:.4} {:.4}; acc variance {:.4} {:.4} {:.4}; gyr variance {:.4} {:.4} {:.4}",
            result.gravity_scale,
            result.zero_bias_angular_velocity.x,
            result.zero_bias_angular_velocity.y,
            result.zero_bias_angular_velocity.z,
            result.acceleration_variance.x,
            result.acceleration_variance.y,
            result.acceleration_variance.z,
            result.angular_velocity_variance.x,
            result.angular_velocity_variance.y,
            result.angular_velocity_variance.z,
        );
        self.result = Some(result);
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&CalibrationResult> {
        self.result.as_ref()
    }

    pub fn samples(&self) -> usize {
        self.count
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Gyro bias, zero until calibration finishes.
    pub fn zero_bias_angular_velocity(&self) -> Vec3 {
        self.result
            .as_ref()
            .map(|r| r.zero_bias_angular_velocity)
            .unwrap_or_else(Vec3::zeros)
    }
}
