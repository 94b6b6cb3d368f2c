//! Cumulative gyro orientation across one scan, for diagnostics.
//!
//! The track is rebuilt for every group. Its first entry is a sample
//! interpolated at the previous scan's end time, so consecutive tracks join
//! up at the synchronization boundary.

use crate::error::{DeskewError, Result};
use crate::so3;
use crate::types::{InertialSample, Rot3};

/// Guards the interpolation weights against a zero time gap.
const WEIGHT_EPS: f64 = 1e-9;

/// Where the previous group ended.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncAnchor {
    /// End time of the previous scan.
    pub time: f64,
    /// Last inertial sample of the previous group.
    pub sample: InertialSample,
}

#[derive(Clone, Debug, Default)]
pub struct OrientationTrack {
    samples: Vec<InertialSample>,
    rotations: Vec<Rot3>,
}

impl OrientationTrack {
    pub fn clear(&mut self) {
        self.samples.clear();
        self.rotations.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rotations.len()
    }

    fn push(&mut self, sample: InertialSample, rotation: Rot3) {
        self.samples.push(sample);
        self.rotations.push(rotation);
    }

    pub fn samples(&self) -> &[InertialSample] {
        &self.samples
    }

    /// Latest cumulative rotation, identity when empty.
    pub fn last_rotation(&self) -> Rot3 {
        self.rotations.last().copied().unwrap_or_else(Rot3::identity)
    }
}

/// Blend two samples at `time` with inverse-time-gap weights.
pub fn interpolate_at(time: f64, before: &InertialSample, after: &InertialSample) -> InertialSample {
    let dt1 = time - before.timestamp;
    let dt2 = after.timestamp - time;
    let w1 = dt2 / (dt1 + dt2 + WEIGHT_EPS);
    let w2 = dt1 / (dt1 + dt2 + WEIGHT_EPS);
    InertialSample::blend(time, before, w1, after, w2)
}

#[derive(Debug, Default)]
pub struct GyroIntegrator {
    track: OrientationTrack,
}

impl GyroIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.track.clear();
    }

    pub fn track(&self) -> &OrientationTrack {
        &self.track
    }

    /// Rebuild the track for one group and return the final cumulative rotation.
    ///
    /// Without an anchor (nothing processed since the last reset) the track
    /// starts at the group's first sample instead.
    pub fn integrate(&mut self, anchor: Option<&SyncAnchor>, samples: &[InertialSample]) -> Result<Rot3> {
        let first = samples
            .first()
            .ok_or_else(|| DeskewError::precursor("gyro integration on an empty inertial sequence"))?;

        self.track.clear();
        let boundary = match anchor {
            Some(anchor) => interpolate_at(anchor.time, &anchor.sample, first),
            None => first.clone(),
        };
        self.track.push(boundary, Rot3::identity());

        for sample in samples {
            let (last_sample, last_rot) = match (self.track.samples.last(), self.track.rotations.last()) {
                (Some(s), Some(r)) => (s, *r),
                _ => break,
            };
            let avg_rate = 0.5 * (sample.angular_velocity + last_sample.angular_velocity);
            let dt = sample.timestamp - last_sample.timestamp;
            let rot = last_rot * so3::exp(&avg_rate, dt);
            self.track.push(sample.clone(), rot);
        }

        let total = self.track.last_rotation();
        let angles = so3::euler_degrees(&total);
        log::info!(
            "integrate rotation angle [x, y, z]: [{:.2}, {:.2}, {:.2}] over {} samples",
            angles.x,
            angles.y,
            angles.z,
            samples.len()
        );
        Ok(total)
    }
}
