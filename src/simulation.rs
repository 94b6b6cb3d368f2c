//! Synthetic sessions for the CLI and tests.
//!
//! The platform sits still for a warm-up period, then yaws at a constant
//! rate. A ring of fixed world points is scanned point by point, so every
//! captured position is expressed in the sensor frame at its own capture
//! time. The gyro reads the true rate plus a constant bias; the accelerometer
//! reads gravity on −z.

use serde::{Deserialize, Serialize};

use crate::session::SessionLog;
use crate::types::{InertialSample, Rot3, Scan, ScanPoint, Vec3, MS_PER_SEC};

pub const GRAVITY: f64 = 9.81;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// First timestamp of both streams (s).
    pub start_time: f64,
    /// Length of the session (s).
    pub duration: f64,
    /// Stationary time before the yaw starts (s).
    pub warmup: f64,
    pub inertial_rate_hz: f64,
    pub scan_rate_hz: f64,
    pub points_per_scan: usize,
    pub ring_radius: f64,
    /// Yaw rate after warm-up (rad/s).
    pub yaw_rate: f64,
    pub gyro_bias: Vec3,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            start_time: 100.0,
            duration: 3.0,
            warmup: 1.0,
            inertial_rate_hz: 200.0,
            scan_rate_hz: 10.0,
            points_per_scan: 360,
            ring_radius: 10.0,
            yaw_rate: 0.8,
            gyro_bias: Vec3::new(0.002, -0.001, 0.003),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticSession {
    pub config: SyntheticConfig,
    pub log: SessionLog,
}

impl SyntheticSession {
    pub fn generate(config: SyntheticConfig) -> Self {
        let scan_period = 1.0 / config.scan_rate_hz;
        let scan_count = (config.duration * config.scan_rate_hz).floor() as usize;
        // one extra scan period so the last scan is fully covered
        let inertial_end = config.start_time + config.duration + scan_period;
        let inertial_count = ((inertial_end - config.start_time) * config.inertial_rate_hz).ceil() as usize + 1;

        let motion = Motion::from(&config);
        let inertial = (0..inertial_count)
            .map(|k| {
                let t = config.start_time + k as f64 / config.inertial_rate_hz;
                InertialSample::new(
                    t,
                    Vec3::new(0.0, 0.0, motion.rate_at(t)) + config.gyro_bias,
                    Vec3::new(0.0, 0.0, -GRAVITY),
                )
            })
            .collect();

        let scans = (0..scan_count)
            .map(|s| {
                let t = config.start_time + s as f64 / config.scan_rate_hz;
                motion.scan_ring(t, scan_period, config.points_per_scan, config.ring_radius)
            })
            .collect();

        log::debug!(
            "synthetic session: {inertial_count} inertial samples, {scan_count} scans, yaw {:.3} rad/s after {:.2} s",
            config.yaw_rate,
            config.warmup
        );
        Self {
            config,
            log: SessionLog { inertial, scans },
        }
    }

    /// Motion-free version of `scan` expressed in the platform frame at
    /// `reference_time`, sorted by offset.
    pub fn expected(&self, scan: &Scan, reference_time: f64) -> Scan {
        let motion = Motion::from(&self.config);
        let to_reference = yaw(motion.yaw_at(reference_time)).transpose();
        let mut out = scan.clone();
        for p in &mut out.points {
            let world = yaw(motion.yaw_at(p.absolute_time(scan.timestamp))) * p.position;
            p.position = to_reference * world;
        }
        out.sort_by_offset();
        out
    }

    /// First scan that starts after the yaw began.
    pub fn first_moving_scan(&self) -> Option<&Scan> {
        let knee = self.config.start_time + self.config.warmup;
        self.log.scans.iter().find(|s| s.timestamp >= knee)
    }
}

#[derive(Clone, Copy, Debug)]
struct Motion {
    knee: f64,
    rate: f64,
}

impl From<&SyntheticConfig> for Motion {
    fn from(config: &SyntheticConfig) -> Self {
        Self {
            knee: config.start_time + config.warmup,
            rate: config.yaw_rate,
        }
    }
}

impl Motion {
    fn rate_at(&self, t: f64) -> f64 {
        if t >= self.knee {
            self.rate
        } else {
            0.0
        }
    }

    fn yaw_at(&self, t: f64) -> f64 {
        self.rate * (t - self.knee).max(0.0)
    }

    fn scan_ring(&self, t: f64, period: f64, count: usize, radius: f64) -> Scan {
        let points = (0..count)
            .map(|j| {
                let frac = j as f64 / count as f64;
                let offset_s = frac * period;
                let bearing = 2.0 * std::f64::consts::PI * frac;
                let world = Vec3::new(radius * bearing.cos(), radius * bearing.sin(), 0.5 * (3.0 * bearing).sin());
                // sensor frame at capture time
                let sensor = yaw(self.yaw_at(t + offset_s)).transpose() * world;
                ScanPoint::new(sensor, offset_s * MS_PER_SEC, (j % 256) as f32)
            })
            .collect();
        Scan::new(t, points)
    }
}

fn yaw(angle: f64) -> Rot3 {
    nalgebra::Rotation3::from_axis_angle(&Vec3::z_axis(), angle).into_inner()
}
