//! Per-group state machine: UNINITIALIZED → CALIBRATING → ACTIVE.
//!
//! Runs on the single consumer thread and owns the calibrator, the
//! orientation track and the synchronization anchor. Each call returns the
//! events produced by that group; nothing is published from in here.

use std::time::Instant;

use serde::Serialize;

use crate::calibration::{CalibrationResult, InertialCalibrator};
use crate::config::{Extrinsic, PipelineConfig};
use crate::ingress::ResetReason;
use crate::integration::{GyroIntegrator, SyncAnchor};
use crate::so3;
use crate::types::{rot_to_row_major, KeyPose, MeasurementGroup, Scan, Vec3};
use crate::undistort::ScanUndistorter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Uninitialized,
    Calibrating,
    Active,
}

/// Wall-clock cost of the two compensation stages of one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StageTiming {
    pub integrate_ms: f64,
    pub undistort_ms: f64,
}

/// Output of one ACTIVE cycle.
#[derive(Clone, Debug, Serialize)]
pub struct UndistortedScan {
    pub scan: Scan,
    /// Absolute time of the frame the points are expressed in.
    pub reference_time: f64,
    pub key_poses: Vec<KeyPose>,
    /// Sorted scan before compensation, when `emit_raw_scan` is set.
    pub raw_scan: Option<Scan>,
    /// Gyro orientation over the group, row-major.
    pub integrated_rotation: [f64; 9],
    pub integrated_euler_deg: Vec3,
    pub extrinsic: Extrinsic,
    pub timing: StageTiming,
}

#[derive(Clone, Debug, Serialize)]
pub enum PipelineEvent {
    FirstFrame { scan_time: f64 },
    CalibrationProgress { samples: usize, threshold: usize },
    CalibrationComplete(CalibrationResult),
    ScanUndistorted(Box<UndistortedScan>),
    Reset { reason: ResetReason },
    GroupDropped { scan_time: f64, reason: String },
}

pub struct MeasurementProcessor {
    state: PipelineState,
    calibrator: InertialCalibrator,
    integrator: GyroIntegrator,
    undistorter: ScanUndistorter,
    anchor: Option<SyncAnchor>,
    extrinsic: Extrinsic,
    emit_raw_scan: bool,
}

impl MeasurementProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            state: PipelineState::Uninitialized,
            calibrator: InertialCalibrator::new(config.calibration_threshold, config.gravity_norm_floor),
            integrator: GyroIntegrator::new(),
            undistorter: ScanUndistorter::new(config.direction),
            anchor: None,
            extrinsic: config.extrinsic.clone(),
            emit_raw_scan: config.emit_raw_scan,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn calibration(&self) -> Option<&CalibrationResult> {
        self.calibrator.result()
    }

    pub fn anchor(&self) -> Option<&SyncAnchor> {
        self.anchor.as_ref()
    }

    /// Back to UNINITIALIZED with calibration, track and anchor cleared.
    pub fn reset(&mut self) {
        log::warn!("reset processor (was {:?})", self.state);
        self.calibrator.reset();
        self.integrator.reset();
        self.anchor = None;
        self.state = PipelineState::Uninitialized;
    }

    pub fn process(&mut self, group: MeasurementGroup) -> Vec<PipelineEvent> {
        let scan_time = group.scan.timestamp;
        let (scan_end, last) = match group.last_inertial() {
            Some(last) => (group.scan.end_time(), last.clone()),
            None => {
                log::error!("group for scan {scan_time:.6} has no inertial samples");
                return vec![PipelineEvent::GroupDropped {
                    scan_time,
                    reason: "empty inertial sequence".to_string(),
                }];
            }
        };

        let events = match self.state {
            PipelineState::Uninitialized => {
                log::warn!("first lidar frame at {scan_time:.6}");
                self.calibrator.seed(&last);
                self.state = PipelineState::Calibrating;
                vec![PipelineEvent::FirstFrame { scan_time }]
            }
            PipelineState::Calibrating => self.calibrate(&group),
            PipelineState::Active => self.compensate(group),
        };

        self.anchor = Some(SyncAnchor {
            time: scan_end,
            sample: last,
        });
        events
    }

    fn calibrate(&mut self, group: &MeasurementGroup) -> Vec<PipelineEvent> {
        let threshold = self.calibrator.threshold();
        let finished = self.calibrator.fold(&group.inertial).cloned();
        let mut events = vec![PipelineEvent::CalibrationProgress {
            samples: self.calibrator.samples(),
            threshold,
        }];
        if let Some(result) = finished {
            self.state = PipelineState::Active;
            events.push(PipelineEvent::CalibrationComplete(result));
        }
        events
    }

    fn compensate(&mut self, group: MeasurementGroup) -> Vec<PipelineEvent> {
        let MeasurementGroup { mut scan, inertial } = group;
        let scan_time = scan.timestamp;

        let started = Instant::now();
        let integrated = match self.integrator.integrate(self.anchor.as_ref(), &inertial) {
            Ok(rotation) => rotation,
            Err(err) => return vec![dropped(scan_time, err)],
        };
        let integrate_ms = elapsed_ms(started);

        let raw_scan = if self.emit_raw_scan {
            let mut raw = scan.clone();
            raw.sort_by_offset();
            Some(raw)
        } else {
            None
        };

        let bias = self.calibrator.zero_bias_angular_velocity();
        let started = Instant::now();
        let report = match self.undistorter.undistort(&mut scan, &inertial, &bias) {
            Ok(report) => report,
            Err(err) => return vec![dropped(scan_time, err)],
        };
        let timing = StageTiming {
            integrate_ms,
            undistort_ms: elapsed_ms(started),
        };
        log::debug!(
            "scan {scan_time:.6} time consumption: integrate {:.3} ms, undistort {:.3} ms",
            timing.integrate_ms,
            timing.undistort_ms
        );

        vec![PipelineEvent::ScanUndistorted(Box::new(UndistortedScan {
            scan,
            reference_time: report.reference_time,
            key_poses: report.key_poses,
            raw_scan,
            integrated_rotation: rot_to_row_major(&integrated),
            integrated_euler_deg: so3::euler_degrees(&integrated),
            extrinsic: self.extrinsic.clone(),
            timing,
        }))]
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn dropped(scan_time: f64, err: crate::error::DeskewError) -> PipelineEvent {
    log::error!("dropping scan {scan_time:.6}: {err}");
    PipelineEvent::GroupDropped {
        scan_time,
        reason: err.to_string(),
    }
}
