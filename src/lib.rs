//! Lidar-inertial scan deskewing.
//!
//! Pairs each scan with the inertial samples covering its capture window,
//! calibrates gyro bias and gravity scale during a stationary warm-up, then
//! rotates every point of each scan into the scan-end (or scan-start) frame.
//!
//! ```no_run
//! use scan_deskew_rs::{PipelineConfig, ProcessingPipeline};
//!
//! let mut pipeline = ProcessingPipeline::new(PipelineConfig::default())?;
//! // pipeline.submit_inertial(..); pipeline.submit_scan(..);
//! for event in pipeline.events().try_iter() {
//!     println!("{event:?}");
//! }
//! pipeline.shutdown()?;
//! # Ok::<(), scan_deskew_rs::DeskewError>(())
//! ```

pub mod calibration;
pub mod config;
pub mod error;
pub mod ingress;
pub mod integration;
pub mod pipeline;
pub mod processor;
pub mod session;
pub mod simulation;
pub mod so3;
pub mod sync;
pub mod types;
pub mod undistort;

pub use calibration::{CalibrationResult, InertialCalibrator};
pub use config::{CompensationDirection, Extrinsic, PipelineConfig};
pub use error::{DeskewError, Result, Stream};
pub use ingress::{Cycle, IngressBuffers, ResetReason};
pub use integration::{GyroIntegrator, OrientationTrack, SyncAnchor};
pub use pipeline::{ConsumerStats, ProcessingPipeline};
pub use processor::{MeasurementProcessor, PipelineEvent, PipelineState, StageTiming, UndistortedScan};
pub use session::{SessionLog, SessionReport};
pub use simulation::{SyntheticConfig, SyntheticSession};
pub use sync::{IngressStats, StreamBuffers, SubmitOutcome};
pub use types::{InertialSample, KeyPose, MeasurementGroup, Scan, ScanPoint};
pub use undistort::{ScanUndistorter, UndistortReport};
