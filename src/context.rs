//! Orchestration: wait for the inputs the configured mode needs, then run
//! the tier chain once over a consistent snapshot.
//!
//! The context is an owned instance constructed by the process entry point
//! and handed to whoever needs it; there is no hidden global. Each
//! resolution walks the phase machine AwaitingDetections ->
//! AwaitingDirectionOrRay -> Resolving -> Done, blocking on the store with a
//! single overall deadline shared across the phases.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::resolve::{Resolution, ResolutionMode, Resolver};
use crate::signals::{SignalSnapshot, SignalStore};

/// Where a resolution currently is, for observability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionPhase {
    AwaitingDetections,
    AwaitingDirectionOrRay,
    Resolving,
    Done,
}

/// Configuration fixed at construction, never re-specified per call.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub mode: ResolutionMode,
    /// When set, only detections of this class are considered.
    pub class_filter: Option<String>,
    /// Overall deadline for one resolution's input waits.
    pub wait_timeout: Duration,
}

pub struct PerceptionContext {
    store: Arc<SignalStore>,
    resolver: Resolver,
    wait_timeout: Duration,
    phase: Mutex<ResolutionPhase>,
}

impl PerceptionContext {
    pub fn new(store: Arc<SignalStore>, cfg: ContextConfig) -> Self {
        let resolver = Resolver::new(cfg.mode).with_class_filter(cfg.class_filter);
        Self {
            store,
            resolver,
            wait_timeout: cfg.wait_timeout,
            phase: Mutex::new(ResolutionPhase::AwaitingDetections),
        }
    }

    pub fn store(&self) -> &Arc<SignalStore> {
        &self.store
    }

    pub fn phase(&self) -> ResolutionPhase {
        *self.phase.lock().expect("phase poisoned")
    }

    fn enter(&self, phase: ResolutionPhase) {
        *self.phase.lock().expect("phase poisoned") = phase;
        log::debug!("resolution phase: {:?}", phase);
    }

    /// Block until the mode's required inputs are present, then resolve.
    ///
    /// Errors are [`crate::WaitError`] wrapped in `anyhow`: the deadline
    /// passed or the store was cancelled. "No object found" is NOT an error;
    /// it comes back as a [`Resolution`] with `selected: None` and a reason.
    pub fn resolve(&self) -> Result<Resolution> {
        let deadline = Instant::now() + self.wait_timeout;

        self.enter(ResolutionPhase::AwaitingDetections);
        log::info!("waiting for object detections...");
        let snapshot = self.store.wait_for_detections(remaining(deadline))?;
        if snapshot.detections().is_empty() {
            log::info!("detection cycle arrived with no objects");
        }

        self.enter(ResolutionPhase::AwaitingDirectionOrRay);
        let snapshot = match self.resolver.mode() {
            ResolutionMode::Simplified => {
                log::info!("waiting for pointing direction...");
                self.store.wait_for_direction(remaining(deadline))?
            }
            ResolutionMode::Geometric => {
                log::info!("waiting for pointing ray and frame dimensions...");
                self.store.wait_for_ray_and_frame(remaining(deadline))?
            }
        };

        self.enter(ResolutionPhase::Resolving);
        let resolution = self.resolve_snapshot(&snapshot);
        self.enter(ResolutionPhase::Done);
        Ok(resolution)
    }

    /// Resolve an already-complete snapshot without waiting. Used by the
    /// offline scene tool and by callers that manage their own input
    /// gathering.
    pub fn resolve_snapshot(&self, snapshot: &SignalSnapshot) -> Resolution {
        let resolution = self.resolver.resolve(snapshot);
        for line in &resolution.trace {
            log::debug!("{}", line);
        }
        log::info!("resolution: {}", resolution.reason);
        resolution
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
