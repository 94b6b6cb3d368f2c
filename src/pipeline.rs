//! `ProcessingPipeline`: ingress buffers, the consumer thread and the egress
//! channel wired together.
//!
//! Producers push through `submit_inertial` / `submit_scan` (or a cloned
//! `Arc<IngressBuffers>` from `ingress()`), the consumer blocks on the ingress
//! condition variable and runs `MeasurementProcessor` on each cycle with the
//! lock released. Events come out of `events()` in scan arrival order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::{DeskewError, Result};
use crate::ingress::{Cycle, IngressBuffers};
use crate::processor::{MeasurementProcessor, PipelineEvent};
use crate::sync::{IngressStats, SubmitOutcome};
use crate::types::{InertialSample, Scan};

/// How long a blocked egress send waits before re-checking for exit.
const SEND_RETRY: Duration = Duration::from_millis(50);

/// Counters kept by the consumer thread, returned on shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub groups: u64,
    pub scans_undistorted: u64,
    pub groups_dropped: u64,
    pub resets: u64,
    pub events_lost: u64,
}

pub struct ProcessingPipeline {
    config: PipelineConfig,
    ingress: Arc<IngressBuffers>,
    events: Receiver<PipelineEvent>,
    consumer: Option<JoinHandle<ConsumerStats>>,
}

impl ProcessingPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let ingress = Arc::new(IngressBuffers::new());
        let (tx, rx) = channel::bounded(config.output_channel_capacity);

        let consumer = Consumer {
            ingress: Arc::clone(&ingress),
            processor: MeasurementProcessor::new(&config),
            tx,
            stats: ConsumerStats::default(),
        };
        let handle = thread::Builder::new()
            .name("deskew-consumer".to_string())
            .spawn(move || consumer.run())?;

        log::info!(
            "pipeline started: direction {:?}, calibration threshold {}",
            config.direction,
            config.calibration_threshold
        );
        Ok(Self {
            config,
            ingress,
            events: rx,
            consumer: Some(handle),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared ingress handle for producer threads or tasks.
    pub fn ingress(&self) -> Arc<IngressBuffers> {
        Arc::clone(&self.ingress)
    }

    pub fn submit_inertial(&self, sample: InertialSample) -> SubmitOutcome {
        self.ingress.submit_inertial(sample)
    }

    pub fn submit_scan(&self, scan: Scan) -> SubmitOutcome {
        self.ingress.submit_scan(scan)
    }

    /// Force UNINITIALIZED before the next cycle.
    pub fn reset(&self) {
        self.ingress.request_reset();
    }

    /// Wait until every group the buffered data can form has been processed.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.ingress.wait_idle(timeout)
    }

    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    pub fn stats(&self) -> IngressStats {
        self.ingress.stats()
    }

    /// Stop the consumer and wait for it. Buffered data that never formed a
    /// group is dropped; events already sent stay readable on `events()`.
    pub fn shutdown(&mut self) -> Result<ConsumerStats> {
        self.ingress.request_exit();
        match self.consumer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| DeskewError::Channel("consumer thread panicked".to_string())),
            None => Ok(ConsumerStats::default()),
        }
    }
}

impl Drop for ProcessingPipeline {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            if let Err(err) = self.shutdown() {
                log::error!("pipeline shutdown: {err}");
            }
        }
    }
}

struct Consumer {
    ingress: Arc<IngressBuffers>,
    processor: MeasurementProcessor,
    tx: Sender<PipelineEvent>,
    stats: ConsumerStats,
}

impl Consumer {
    fn run(mut self) -> ConsumerStats {
        loop {
            match self.ingress.wait_cycle() {
                Cycle::Exit => break,
                Cycle::Reset(reason) => {
                    log::warn!("pipeline reset: {reason:?}");
                    self.processor.reset();
                    self.stats.resets += 1;
                    self.publish(PipelineEvent::Reset { reason });
                }
                Cycle::Group(group) => {
                    self.stats.groups += 1;
                    for event in self.processor.process(group) {
                        match &event {
                            PipelineEvent::ScanUndistorted(_) => self.stats.scans_undistorted += 1,
                            PipelineEvent::GroupDropped { .. } => self.stats.groups_dropped += 1,
                            _ => {}
                        }
                        self.publish(event);
                    }
                }
            }
        }
        log::info!(
            "consumer stopped: {} groups, {} scans undistorted, {} resets",
            self.stats.groups,
            self.stats.scans_undistorted,
            self.stats.resets
        );
        self.stats
    }

    // Blocks while the egress channel is full, unless exit was requested.
    fn publish(&mut self, event: PipelineEvent) {
        let mut pending = event;
        loop {
            match self.tx.send_timeout(pending, SEND_RETRY) {
                Ok(()) => return,
                Err(SendTimeoutError::Timeout(event)) => {
                    if self.ingress.is_exit_requested() {
                        log::warn!("egress full during shutdown, dropping event");
                        self.stats.events_lost += 1;
                        return;
                    }
                    pending = event;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.stats.events_lost += 1;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScanPoint, Vec3};

    const WAIT: Duration = Duration::from_secs(2);

    fn imu(t: f64) -> InertialSample {
        InertialSample::new(t, Vec3::zeros(), Vec3::new(0.0, 0.0, -9.81))
    }

    fn scan(t: f64) -> Scan {
        Scan::new(t, vec![ScanPoint::new(Vec3::x(), 0.0, 0.0), ScanPoint::new(Vec3::y(), 10.0, 0.0)])
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig {
            calibration_threshold: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(ProcessingPipeline::new(config), Err(DeskewError::InvalidConfig(_))));
    }

    #[test]
    fn test_first_group_emits_first_frame() {
        let mut pipeline = ProcessingPipeline::new(PipelineConfig::default()).unwrap();
        pipeline.submit_scan(scan(0.0));
        pipeline.submit_inertial(imu(0.0));
        pipeline.submit_inertial(imu(0.01));

        let event = pipeline.events().recv_timeout(WAIT).unwrap();
        assert!(matches!(event, PipelineEvent::FirstFrame { scan_time } if scan_time == 0.0));
        let stats = pipeline.shutdown().unwrap();
        assert_eq!(stats.groups, 1);
        assert_eq!(pipeline.stats().groups_formed, 1);
    }

    #[test]
    fn test_requested_reset_is_reported() {
        let mut pipeline = ProcessingPipeline::new(PipelineConfig::default()).unwrap();
        pipeline.reset();
        let event = pipeline.events().recv_timeout(WAIT).unwrap();
        assert!(matches!(
            event,
            PipelineEvent::Reset {
                reason: crate::ingress::ResetReason::Requested
            }
        ));
        assert_eq!(pipeline.shutdown().unwrap().resets, 1);
    }

    #[test]
    fn test_shutdown_with_full_channel_does_not_hang() {
        let mut pipeline = ProcessingPipeline::new(PipelineConfig {
            output_channel_capacity: 1,
            ..PipelineConfig::default()
        })
        .unwrap();
        for i in 0..4 {
            pipeline.reset();
            // let each reset be observed on its own
            std::thread::sleep(Duration::from_millis(5 * (i + 1)));
        }
        let stats = pipeline.shutdown().unwrap();
        assert!(stats.resets >= 1);
        assert!(pipeline.shutdown().is_ok());
    }
}
