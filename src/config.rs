use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeskewError, Result};
use crate::types::{Pose3, Quat, Vec3};

/// Which end of the scan the points are compensated into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompensationDirection {
    /// Walk forward in time; points land in the scan-start frame.
    Forward,
    /// Walk backward in time; points land in the scan-end frame.
    #[default]
    Backward,
}

impl std::str::FromStr for CompensationDirection {
    type Err = DeskewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            other => Err(DeskewError::invalid_config(format!(
                "unknown compensation direction '{other}' (expected forward|backward)"
            ))),
        }
    }
}

/// Rigid transform between the scan sensor and the inertial sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extrinsic {
    /// Quaternion as (w, x, y, z); normalised on use.
    pub rotation_wxyz: [f64; 4],
    pub translation: [f64; 3],
}

impl Default for Extrinsic {
    fn default() -> Self {
        // 180° about z
        Self { rotation_wxyz: [0.0, 0.0, 0.0, 1.0], translation: [0.0; 3] }
    }
}

impl Extrinsic {
    pub fn isometry(&self) -> Pose3 {
        let [w, x, y, z] = self.rotation_wxyz;
        let q = Quat::from_quaternion(nalgebra::Quaternion::new(w, x, y, z));
        let [tx, ty, tz] = self.translation;
        Pose3::from_parts(Vec3::new(tx, ty, tz).into(), q)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Inertial samples folded before calibration freezes.
    pub calibration_threshold: usize,
    /// Lower bound on |mean acceleration| when deriving the gravity scale.
    pub gravity_norm_floor: f64,
    pub direction: CompensationDirection,
    pub extrinsic: Extrinsic,
    /// Attach the sorted, uncompensated scan to each output.
    pub emit_raw_scan: bool,
    pub output_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calibration_threshold: 50,
            gravity_norm_floor: 0.1,
            direction: CompensationDirection::Backward,
            extrinsic: Extrinsic::default(),
            emit_raw_scan: false,
            output_channel_capacity: 64,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.calibration_threshold == 0 {
            return Err(DeskewError::invalid_config("calibration_threshold must be at least 1"));
        }
        if !(self.gravity_norm_floor > 0.0) {
            return Err(DeskewError::invalid_config("gravity_norm_floor must be positive"));
        }
        let q_norm = self.extrinsic.rotation_wxyz.iter().map(|c| c * c).sum::<f64>().sqrt();
        if !q_norm.is_finite() || q_norm < 1e-9 {
            return Err(DeskewError::invalid_config("extrinsic rotation quaternion has zero norm"));
        }
        if self.output_channel_capacity == 0 {
            return Err(DeskewError::invalid_config("output_channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.calibration_threshold, 50);
        assert_eq!(config.direction, CompensationDirection::Backward);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_extrinsic_is_half_turn_yaw() {
        let iso = Extrinsic::default().isometry();
        let v = iso.rotation * Vec3::new(1.0, 0.0, 0.0);
        assert_abs_diff_eq!(v, Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(iso.translation.vector, Vec3::zeros());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "direction": "FORWARD", "calibration_threshold": 10 }"#).unwrap();
        assert_eq!(config.direction, CompensationDirection::Forward);
        assert_eq!(config.calibration_threshold, 10);
        assert_eq!(config.gravity_norm_floor, 0.1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig { calibration_threshold: 0, ..Default::default() };
        assert!(config.validate().is_err());
        config.calibration_threshold = 5;
        config.extrinsic.rotation_wxyz = [0.0; 4];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("Forward".parse::<CompensationDirection>().unwrap(), CompensationDirection::Forward);
        assert!("sideways".parse::<CompensationDirection>().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "emit_raw_scan": true }"#).unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert!(config.emit_raw_scan);
        assert_eq!(config.calibration_threshold, 50);
    }
}
