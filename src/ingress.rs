//! Thread-safe ingress: both stream buffers behind one mutex, with a
//! condition variable the consumer blocks on.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::sync::{IngressStats, StreamBuffers, SubmitOutcome};
use crate::types::{InertialSample, MeasurementGroup, Scan};

/// What the consumer should do next.
#[derive(Debug)]
pub enum Cycle {
    Group(MeasurementGroup),
    /// A reset was requested (explicitly or by inertial loop-back). Both
    /// buffers have already been cleared.
    Reset(ResetReason),
    Exit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ResetReason {
    InertialLoopBack,
    Requested,
}

#[derive(Debug, Default)]
struct IngressState {
    buffers: StreamBuffers,
    reset: Option<ResetReason>,
    exit: bool,
    /// A waiting consumer found nothing to do since the last submit.
    idle: bool,
}

impl IngressState {
    // exit beats reset beats data
    fn next_cycle(&mut self) -> Option<Cycle> {
        if self.exit {
            return Some(Cycle::Exit);
        }
        if let Some(reason) = self.reset.take() {
            self.buffers.clear();
            return Some(Cycle::Reset(reason));
        }
        self.buffers.try_sync().map(Cycle::Group)
    }

    /// `next_cycle` for a waiting consumer. Returns true when this call
    /// flipped the state to idle.
    fn poll(&mut self, next: &mut Option<Cycle>) -> bool {
        *next = self.next_cycle();
        let became_idle = next.is_none() && !self.idle;
        self.idle = next.is_none();
        became_idle
    }
}

#[derive(Debug, Default)]
pub struct IngressBuffers {
    state: Mutex<IngressState>,
    signal: Condvar,
}

impl IngressBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the deques half-updated,
    // so a poisoned mutex is still usable.
    fn lock(&self) -> MutexGuard<'_, IngressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn submit_inertial(&self, sample: InertialSample) -> SubmitOutcome {
        let outcome = {
            let mut state = self.lock();
            let outcome = state.buffers.push_inertial(sample);
            state.idle = false;
            if matches!(outcome, SubmitOutcome::LoopBack { .. }) {
                state.reset = Some(ResetReason::InertialLoopBack);
            }
            outcome
        };
        self.signal.notify_all();
        outcome
    }

    pub fn submit_scan(&self, scan: Scan) -> SubmitOutcome {
        let outcome = {
            let mut state = self.lock();
            state.idle = false;
            state.buffers.push_scan(scan)
        };
        self.signal.notify_all();
        outcome
    }

    pub fn request_reset(&self) {
        {
            let mut state = self.lock();
            state.reset = Some(ResetReason::Requested);
            state.idle = false;
        }
        self.signal.notify_all();
    }

    pub fn request_exit(&self) {
        self.lock().exit = true;
        self.signal.notify_all();
    }

    pub fn is_exit_requested(&self) -> bool {
        self.lock().exit
    }

    /// Non-blocking poll for the next cycle.
    pub fn try_cycle(&self) -> Option<Cycle> {
        self.lock().next_cycle()
    }

    /// Block until a group is ready, a reset is pending, or exit is raised.
    pub fn wait_cycle(&self) -> Cycle {
        let mut next = None;
        let guard = self
            .signal
            .wait_while(self.lock(), |state| {
                if state.poll(&mut next) {
                    self.signal.notify_all();
                }
                next.is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);
        drop(guard);
        next.unwrap_or(Cycle::Exit)
    }

    /// Block until the consumer is waiting with nothing left to form.
    /// Returns false on timeout or when exit was requested first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let (guard, result) = self
            .signal
            .wait_timeout_while(self.lock(), timeout, |state| !state.idle && !state.exit)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out() && guard.idle && !guard.exit
    }

    pub fn stats(&self) -> IngressStats {
        self.lock().buffers.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScanPoint, Vec3};
    use std::sync::Arc;
    use std::thread;

    fn imu(t: f64) -> InertialSample {
        InertialSample::new(t, Vec3::zeros(), Vec3::new(0.0, 0.0, -9.81))
    }

    fn scan(t: f64) -> Scan {
        Scan::new(t, vec![ScanPoint::new(Vec3::x(), 0.0, 0.0), ScanPoint::new(Vec3::y(), 10.0, 0.0)])
    }

    #[test]
    fn test_inertial_loop_back_yields_reset_before_data() {
        let ingress = IngressBuffers::new();
        ingress.submit_inertial(imu(1.0));
        ingress.submit_scan(scan(0.9));
        ingress.submit_inertial(imu(0.5));

        match ingress.try_cycle() {
            Some(Cycle::Reset(ResetReason::InertialLoopBack)) => {}
            other => panic!("expected reset, got {other:?}"),
        }
        let stats = ingress.stats();
        assert_eq!(stats.inertial.buffered, 0);
        assert_eq!(stats.scans.buffered, 0);
        assert!(ingress.try_cycle().is_none());
    }

    #[test]
    fn test_scan_loop_back_does_not_reset() {
        let ingress = IngressBuffers::new();
        ingress.submit_scan(scan(2.0));
        ingress.submit_scan(scan(1.0));
        assert!(ingress.try_cycle().is_none());
        assert_eq!(ingress.stats().scans.loop_backs, 1);
    }

    #[test]
    fn test_exit_takes_priority() {
        let ingress = IngressBuffers::new();
        ingress.submit_scan(scan(0.0));
        ingress.submit_inertial(imu(0.0));
        ingress.submit_inertial(imu(0.02));
        ingress.request_reset();
        ingress.request_exit();
        assert!(matches!(ingress.try_cycle(), Some(Cycle::Exit)));
    }

    #[test]
    fn test_wait_cycle_wakes_on_data_from_other_thread() {
        let ingress = Arc::new(IngressBuffers::new());
        let producer = Arc::clone(&ingress);
        let handle = thread::spawn(move || {
            producer.submit_scan(scan(0.0));
            for i in 0..5 {
                producer.submit_inertial(imu(i as f64 * 0.005));
            }
        });
        let cycle = ingress.wait_cycle();
        handle.join().unwrap();
        match cycle {
            Cycle::Group(group) => assert!(group.inertial.iter().all(|s| s.timestamp <= 0.01)),
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_cycle_wakes_on_exit() {
        let ingress = Arc::new(IngressBuffers::new());
        let control = Arc::clone(&ingress);
        let handle = thread::spawn(move || control.request_exit());
        assert!(matches!(ingress.wait_cycle(), Cycle::Exit));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_idle_after_consumer_drains() {
        let ingress = Arc::new(IngressBuffers::new());
        let consumer = Arc::clone(&ingress);
        let handle = thread::spawn(move || {
            let mut groups = 0;
            while let Cycle::Group(_) = consumer.wait_cycle() {
                groups += 1;
            }
            groups
        });
        for i in 0..3 {
            ingress.submit_scan(scan(i as f64 * 0.1));
        }
        for i in 0..=30 {
            ingress.submit_inertial(imu(i as f64 * 0.01));
        }
        assert!(ingress.wait_idle(Duration::from_secs(2)));
        assert_eq!(ingress.stats().groups_formed, 3);
        ingress.request_exit();
        assert_eq!(handle.join().unwrap(), 3);
        assert!(!ingress.wait_idle(Duration::from_millis(10)));
    }
}
