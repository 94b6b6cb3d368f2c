//! Recorded session input and per-run result files.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationResult;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::ingress::ResetReason;
use crate::pipeline::ConsumerStats;
use crate::processor::{PipelineEvent, UndistortedScan};
use crate::sync::IngressStats;
use crate::types::{InertialSample, Scan};

/// Both input streams of a recorded run, each in arrival order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub inertial: Vec<InertialSample>,
    pub scans: Vec<Scan>,
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

impl SessionLog {
    /// Read plain JSON, or gzip-compressed JSON when the file ends in `.gz`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let log: SessionLog = if is_gzip(path) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        log::info!(
            "loaded session {}: {} inertial samples, {} scans",
            path.display(),
            log.inertial.len(),
            log.scans.len()
        );
        Ok(log)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(file, Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder.finish()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Time covered by either stream, `None` when both are empty.
    pub fn time_span(&self) -> Option<(f64, f64)> {
        let times = self
            .inertial
            .iter()
            .map(|s| s.timestamp)
            .chain(self.scans.iter().map(|s| s.timestamp));
        times.fold(None, |span, t| match span {
            None => Some((t, t)),
            Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DroppedGroup {
    pub scan_time: f64,
    pub reason: String,
}

/// Everything a run produced, written once at the end.
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    /// RFC 3339, UTC.
    pub generated_at: String,
    pub config: PipelineConfig,
    pub first_frame: Option<f64>,
    pub calibration: Option<CalibrationResult>,
    pub scans: Vec<UndistortedScan>,
    pub resets: Vec<ResetReason>,
    pub dropped: Vec<DroppedGroup>,
    pub ingress: Option<IngressStats>,
    pub consumer: Option<ConsumerStats>,
}

impl SessionReport {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            config,
            first_frame: None,
            calibration: None,
            scans: Vec::new(),
            resets: Vec::new(),
            dropped: Vec::new(),
            ingress: None,
            consumer: None,
        }
    }

    pub fn record(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::FirstFrame { scan_time } => {
                self.first_frame.get_or_insert(scan_time);
            }
            PipelineEvent::CalibrationProgress { .. } => {}
            PipelineEvent::CalibrationComplete(result) => self.calibration = Some(result),
            PipelineEvent::ScanUndistorted(scan) => self.scans.push(*scan),
            PipelineEvent::Reset { reason } => {
                self.resets.push(reason);
                self.calibration = None;
                self.first_frame = None;
            }
            PipelineEvent::GroupDropped { scan_time, reason } => self.dropped.push(DroppedGroup { scan_time, reason }),
        }
    }

    /// Write as pretty JSON into `dir` under a timestamped name; returns the path.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("deskew_{}.json", Utc::now().format("%Y%m%d_%H%M%S")));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        log::info!("report written to {} ({} scans)", path.display(), self.scans.len());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScanPoint, Vec3};

    fn sample_log() -> SessionLog {
        SessionLog {
            inertial: (0..4)
                .map(|i| InertialSample::new(1.0 + i as f64 * 0.25, Vec3::new(0.0, 0.0, 0.125), Vec3::new(0.0, 0.0, -9.75)))
                .collect(),
            scans: vec![Scan::new(1.0, vec![ScanPoint::new(Vec3::new(1.0, 2.0, 3.0), 20.0, 7.0)])],
        }
    }

    #[test]
    fn test_load_plain_and_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let log = sample_log();
        for name in ["session.json", "session.json.gz"] {
            let path = dir.path().join(name);
            log.save(&path).unwrap();
            assert_eq!(SessionLog::load(&path).unwrap(), log);
        }
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionLog::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, crate::error::DeskewError::Io(_)));
    }

    #[test]
    fn test_time_span() {
        assert_eq!(SessionLog::default().time_span(), None);
        let (lo, hi) = sample_log().time_span().unwrap();
        assert_eq!((lo, hi), (1.0, 1.75));
    }

    #[test]
    fn test_report_records_events_and_writes() {
        let mut report = SessionReport::new(PipelineConfig::default());
        report.record(PipelineEvent::FirstFrame { scan_time: 1.0 });
        report.record(PipelineEvent::Reset { reason: ResetReason::InertialLoopBack });
        report.record(PipelineEvent::FirstFrame { scan_time: 2.0 });
        report.record(PipelineEvent::GroupDropped { scan_time: 2.5, reason: "empty".into() });
        assert_eq!(report.first_frame, Some(2.0));
        assert_eq!(report.resets, vec![ResetReason::InertialLoopBack]);
        assert_eq!(report.dropped.len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = report.write_to_dir(dir.path().join("out")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["config"]["direction"], "BACKWARD");
        assert_eq!(value["resets"][0], "InertialLoopBack");
    }
}
