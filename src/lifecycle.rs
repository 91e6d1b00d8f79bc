//! Session lifecycle
//!
//! Tracks the `Idle -> Recording <-> Paused -> Completed` state machine (plus a
//! terminal `Error` reachable from any active state) and hands out a session
//! generation token. Async work captures the generation it was started under
//! and checks it before publishing, so results from a stopped session are
//! dropped silently.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::utils::lock;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Recording,
    Paused,
    Completed,
    Error,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }
}

#[derive(Debug, Clone)]
struct Timing {
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    paused_since: Option<DateTime<Utc>>,
    paused_total: Duration,
}

impl Timing {
    fn new() -> Self {
        Self {
            started_at: None,
            ended_at: None,
            paused_since: None,
            paused_total: Duration::zero(),
        }
    }
}

#[derive(Debug)]
struct Phase {
    state: SessionState,
    timing: Timing,
    last_error: Option<String>,
}

pub struct SessionLifecycle {
    /// Monotonically increasing generation. Each new session gets a unique one.
    next_generation: AtomicU64,

    /// Generation of the running session, 0 when none is active
    active_generation: AtomicU64,

    phase: Mutex<Phase>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            next_generation: AtomicU64::new(1),
            active_generation: AtomicU64::new(0),
            phase: Mutex::new(Phase {
                state: SessionState::Idle,
                timing: Timing::new(),
                last_error: None,
            }),
        }
    }

    /// Begin a new session. Valid from Idle, Completed or Error.
    ///
    /// Returns the new generation, or None if a session is already active.
    pub fn start(&self, now: DateTime<Utc>) -> Option<u64> {
        let mut phase = lock(&self.phase);
        if phase.state.is_active() {
            warn!(
                "Cannot start a session while one is {:?}",
                phase.state
            );
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.active_generation.store(generation, Ordering::SeqCst);

        phase.state = SessionState::Recording;
        phase.timing = Timing::new();
        phase.timing.started_at = Some(now);
        phase.last_error = None;

        info!("Session {} started", generation);
        Some(generation)
    }

    pub fn pause(&self, now: DateTime<Utc>) -> bool {
        let mut phase = lock(&self.phase);
        if phase.state != SessionState::Recording {
            warn!("Cannot pause from {:?}", phase.state);
            return false;
        }

        phase.state = SessionState::Paused;
        phase.timing.paused_since = Some(now);
        info!("Session {} paused", self.active_generation.load(Ordering::SeqCst));
        true
    }

    pub fn resume(&self, now: DateTime<Utc>) -> bool {
        let mut phase = lock(&self.phase);
        if phase.state != SessionState::Paused {
            warn!("Cannot resume from {:?}", phase.state);
            return false;
        }

        if let Some(since) = phase.timing.paused_since.take() {
            phase.timing.paused_total += now - since;
        }
        phase.state = SessionState::Recording;
        info!("Session {} resumed", self.active_generation.load(Ordering::SeqCst));
        true
    }

    /// Recording or Paused -> Completed.
    pub fn stop(&self, now: DateTime<Utc>) -> bool {
        self.finish(SessionState::Completed, now, None)
    }

    /// Recording or Paused -> Error.
    pub fn fail(&self, now: DateTime<Utc>, reason: &str) -> bool {
        self.finish(SessionState::Error, now, Some(reason.to_string()))
    }

    fn finish(&self, target: SessionState, now: DateTime<Utc>, reason: Option<String>) -> bool {
        let mut phase = lock(&self.phase);
        if !phase.state.is_active() {
            debug!("No active session to move to {:?}", target);
            return false;
        }

        // Close out an open pause so it is not counted as talk time
        if let Some(since) = phase.timing.paused_since.take() {
            phase.timing.paused_total += now - since;
        }
        phase.timing.ended_at = Some(now);
        phase.state = target;

        let previous = self.active_generation.swap(0, Ordering::SeqCst);
        match &reason {
            Some(reason) => warn!("Session {} failed: {}", previous, reason),
            None => info!("Session {} completed", previous),
        }
        phase.last_error = reason;
        true
    }

    pub fn state(&self) -> SessionState {
        lock(&self.phase).state
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.phase).last_error.clone()
    }

    /// Generation of the active (Recording or Paused) session, if any.
    pub fn active_generation(&self) -> Option<u64> {
        match self.active_generation.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// Generation of the session if it is currently Recording.
    pub fn recording_generation(&self) -> Option<u64> {
        let phase = lock(&self.phase);
        if phase.state == SessionState::Recording {
            self.active_generation()
        } else {
            None
        }
    }

    /// Whether `generation` is the current session and it is Recording.
    /// Async results check this before they are published.
    pub fn is_recording(&self, generation: u64) -> bool {
        self.recording_generation() == Some(generation)
    }

    /// Elapsed session time with paused intervals excluded.
    pub fn session_duration(&self, now: DateTime<Utc>) -> Duration {
        let phase = lock(&self.phase);
        let timing = &phase.timing;
        let Some(started_at) = timing.started_at else {
            return Duration::zero();
        };

        let end = timing.ended_at.unwrap_or(now);
        let open_pause = timing
            .paused_since
            .map(|since| end - since)
            .unwrap_or_else(Duration::zero);

        (end - started_at - timing.paused_total - open_pause).max(Duration::zero())
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
