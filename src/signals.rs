//! Latest-value signal store shared between producer callbacks and the
//! resolver.
//!
//! Each signal channel (direction, slope, intercept, detections, frame) is an
//! independent slot: setters are idempotent overwrites, no merging. Producers
//! may write concurrently; the single consumer blocks on a condition variable
//! until the slots it needs are populated, bounded by a deadline, and honors
//! cooperative cancellation at every blocking point.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::{DetectedObject, FrameDimensions, PointingDirection, PointingRay};

// -------------------- Wait Errors --------------------

/// Why a blocking wait on the store ended without the required signals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitError {
    /// The caller-supplied deadline passed before the signals arrived.
    Timeout { missing: String, waited: Duration },
    /// The store was cancelled (shutdown) while waiting.
    Cancelled,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Timeout { missing, waited } => write!(
                f,
                "input timeout after {:.1}s waiting for {}",
                waited.as_secs_f64(),
                missing
            ),
            WaitError::Cancelled => write!(f, "wait cancelled by shutdown"),
        }
    }
}

impl std::error::Error for WaitError {}

// -------------------- Snapshot --------------------

/// A consistent copy of every slot, taken under the store lock at the moment
/// the required fields were first observed populated. Resolution only ever
/// reads snapshots, so a detection cycle arriving mid-resolve cannot tear
/// the inputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignalSnapshot {
    pub direction: Option<PointingDirection>,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    pub detections: Option<Vec<DetectedObject>>,
    pub frame: Option<FrameDimensions>,
}

impl SignalSnapshot {
    /// The pointing ray, present only once both halves have arrived.
    pub fn ray(&self) -> Option<PointingRay> {
        match (self.slope, self.intercept) {
            (Some(slope), Some(intercept)) => Some(PointingRay { slope, intercept }),
            _ => None,
        }
    }

    /// Detection list for resolution; a received-but-empty cycle is an empty
    /// slice, an unreceived one is also empty here (the wait layer is what
    /// distinguishes them).
    pub fn detections(&self) -> &[DetectedObject] {
        self.detections.as_deref().unwrap_or(&[])
    }
}

// -------------------- Store --------------------

/// Shared mutable state between the signal producers and the resolver.
///
/// One mutex guards all slots; every setter notifies the condition variable
/// so a blocked consumer re-evaluates its readiness predicate. Entries live
/// for the process lifetime and are only ever overwritten.
pub struct SignalStore {
    state: Mutex<SignalSnapshot>,
    updated: Condvar,
    cancelled: AtomicBool,
}

impl Default for SignalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalSnapshot::default()),
            updated: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    fn set<F: FnOnce(&mut SignalSnapshot)>(&self, apply: F) {
        let mut state = self.state.lock().expect("signal store poisoned");
        apply(&mut state);
        drop(state);
        self.updated.notify_all();
    }

    pub fn set_direction(&self, direction: PointingDirection) {
        self.set(|s| s.direction = Some(direction));
    }

    pub fn set_slope(&self, slope: f64) {
        self.set(|s| s.slope = Some(slope));
    }

    pub fn set_intercept(&self, intercept: f64) {
        self.set(|s| s.intercept = Some(intercept));
    }

    pub fn set_ray(&self, ray: PointingRay) {
        self.set(|s| {
            s.slope = Some(ray.slope);
            s.intercept = Some(ray.intercept);
        });
    }

    /// Replace the whole detection set. Detection cycles never accumulate
    /// across messages; the latest full snapshot wins.
    pub fn set_detections(&self, detections: Vec<DetectedObject>) {
        self.set(|s| s.detections = Some(detections));
    }

    pub fn set_frame_dimensions(&self, frame: FrameDimensions) {
        self.set(|s| s.frame = Some(frame));
    }

    pub fn has_direction(&self) -> bool {
        self.state.lock().expect("signal store poisoned").direction.is_some()
    }

    pub fn has_ray(&self) -> bool {
        self.state.lock().expect("signal store poisoned").ray().is_some()
    }

    /// True once any detection cycle has been received, even an empty one.
    pub fn has_detections(&self) -> bool {
        self.state.lock().expect("signal store poisoned").detections.is_some()
    }

    pub fn has_frame(&self) -> bool {
        self.state.lock().expect("signal store poisoned").frame.is_some()
    }

    pub fn snapshot(&self) -> SignalSnapshot {
        self.state.lock().expect("signal store poisoned").clone()
    }

    /// Cooperative cancellation: wakes every blocked waiter, which then
    /// returns [`WaitError::Cancelled`]. Safe to call from a signal handler
    /// thread.
    ///
    /// The flag store happens under the state lock: a waiter holds that lock
    /// from its cancellation check until it parks on the condvar, so the
    /// store either lands before the check (and is seen) or after the park
    /// (and the notification wakes the waiter). Without the lock the
    /// notification can fire in between and be lost.
    pub fn cancel(&self) {
        let state = self.state.lock().expect("signal store poisoned");
        self.cancelled.store(true, Ordering::SeqCst);
        drop(state);
        self.updated.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Block until `ready` holds, the deadline passes, or the store is
    /// cancelled. On success the returned snapshot is the exact state that
    /// satisfied the predicate.
    pub fn wait_until<F>(
        &self,
        what: &str,
        timeout: Duration,
        ready: F,
    ) -> Result<SignalSnapshot, WaitError>
    where
        F: Fn(&SignalSnapshot) -> bool,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = self.state.lock().expect("signal store poisoned");

        loop {
            if self.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            if ready(&state) {
                return Ok(state.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    missing: what.to_string(),
                    waited: started.elapsed(),
                });
            }
            let (next, _timed_out) = self
                .updated
                .wait_timeout(state, deadline - now)
                .expect("signal store poisoned");
            state = next;
        }
    }

    pub fn wait_for_detections(&self, timeout: Duration) -> Result<SignalSnapshot, WaitError> {
        self.wait_until("object detections", timeout, |s| s.detections.is_some())
    }

    pub fn wait_for_direction(&self, timeout: Duration) -> Result<SignalSnapshot, WaitError> {
        self.wait_until("pointing direction", timeout, |s| s.direction.is_some())
    }

    pub fn wait_for_ray_and_frame(&self, timeout: Duration) -> Result<SignalSnapshot, WaitError> {
        self.wait_until("pointing ray and frame dimensions", timeout, |s| {
            s.ray().is_some() && s.frame.is_some()
        })
    }
}
