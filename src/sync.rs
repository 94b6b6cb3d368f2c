//! Stream buffers and scan/inertial pairing.
//!
//! Nothing here locks: `IngressBuffers` wraps a `StreamBuffers` in its mutex
//! and calls into it. Keeping the pairing rule lock-free makes it testable
//! without threads.

use std::collections::VecDeque;

use serde::Serialize;

use crate::error::{DeskewError, Result, Stream};
use crate::types::{InertialSample, MeasurementGroup, Scan, MS_PER_SEC};

/// Result of pushing one message into a stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SubmitOutcome {
    Accepted,
    /// The timestamp went backwards; the stream's buffer was cleared before
    /// the new message was appended.
    LoopBack { previous: f64, current: f64 },
}

impl SubmitOutcome {
    /// Loop-back as an error for callers that want to report it.
    pub fn check(self, stream: Stream) -> Result<()> {
        match self {
            SubmitOutcome::Accepted => Ok(()),
            SubmitOutcome::LoopBack { previous, current } => Err(DeskewError::LoopBack { stream, previous, current }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamCounters {
    pub accepted: u64,
    pub loop_backs: u64,
    pub buffered: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngressStats {
    pub inertial: StreamCounters,
    pub scans: StreamCounters,
    pub groups_formed: u64,
    pub groups_discarded: u64,
}

#[derive(Debug, Default)]
pub struct StreamBuffers {
    inertial: VecDeque<InertialSample>,
    scans: VecDeque<Scan>,
    last_inertial_ts: Option<f64>,
    last_scan_ts: Option<f64>,
    stats: IngressStats,
}

impl StreamBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inertial(&mut self, sample: InertialSample) -> SubmitOutcome {
        let outcome = check_monotonic(&mut self.last_inertial_ts, sample.timestamp);
        if let SubmitOutcome::LoopBack { previous, current } = outcome {
            log::error!("{} loop back ({current:.6} < {previous:.6}), clear buffer", Stream::Inertial);
            self.inertial.clear();
            self.stats.inertial.loop_backs += 1;
        }
        self.inertial.push_back(sample);
        self.stats.inertial.accepted += 1;
        outcome
    }

    pub fn push_scan(&mut self, scan: Scan) -> SubmitOutcome {
        let outcome = check_monotonic(&mut self.last_scan_ts, scan.timestamp);
        if let SubmitOutcome::LoopBack { previous, current } = outcome {
            log::error!("{} loop back ({current:.6} < {previous:.6}), clear buffer", Stream::Scan);
            self.scans.clear();
            self.stats.scans.loop_backs += 1;
        }
        self.scans.push_back(scan);
        self.stats.scans.accepted += 1;
        outcome
    }

    /// Pair the oldest scan with every buffered inertial sample up to the
    /// scan's end time.
    ///
    /// Returns `None` while either buffer is empty or while the newest
    /// inertial sample is still earlier than the scan end time.
    pub fn try_sync(&mut self) -> Option<MeasurementGroup> {
        loop {
            let scan_end = self.scans.front()?.end_time();
            let newest = self.inertial.back()?.timestamp;
            if newest < scan_end {
                return None;
            }

            let scan = self.scans.pop_front()?;
            let take = self
                .inertial
                .iter()
                .take_while(|s| s.timestamp <= scan_end)
                .count();
            let inertial: Vec<InertialSample> = self.inertial.drain(..take).collect();

            if inertial.is_empty() {
                // Only reachable if the buffer front is already past the scan end.
                log::warn!(
                    "no inertial samples at or before scan end {scan_end:.6}, discarding scan {:.6}",
                    scan.timestamp
                );
                self.stats.groups_discarded += 1;
                continue;
            }

            let group = MeasurementGroup::new(scan, inertial);
            log::debug!(
                "synced scan {:.6} (end {scan_end:.6}) with {} inertial samples over {:.1} ms",
                group.scan.timestamp,
                group.inertial.len(),
                group.inertial_span() * MS_PER_SEC
            );
            self.stats.groups_formed += 1;
            return Some(group);
        }
    }

    /// Drop buffered data in both streams. Loop-back anchors are kept so a
    /// regression is still detected against the last submitted timestamp.
    pub fn clear(&mut self) {
        self.inertial.clear();
        self.scans.clear();
    }

    pub fn inertial_len(&self) -> usize {
        self.inertial.len()
    }

    pub fn scan_len(&self) -> usize {
        self.scans.len()
    }

    pub fn stats(&self) -> IngressStats {
        let mut stats = self.stats;
        stats.inertial.buffered = self.inertial.len();
        stats.scans.buffered = self.scans.len();
        stats
    }
}

fn check_monotonic(last: &mut Option<f64>, current: f64) -> SubmitOutcome {
    let outcome = match *last {
        Some(previous) if current < previous => SubmitOutcome::LoopBack { previous, current },
        _ => SubmitOutcome::Accepted,
    };
    *last = Some(current);
    outcome
}
