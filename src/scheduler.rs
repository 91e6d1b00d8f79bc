//! Role-keyed periodic analysis tasks.
//!
//! Each role runs its own timer loop on the Tokio runtime. On every tick the
//! loop re-reads the config (so interval changes apply from the next tick),
//! skips unless the session is Recording, and skips again if the role's
//! previous call is still outstanding. Calls themselves run on their own task
//! so a hung call never stalls the timer or ingestion; cancelling a role
//! aborts its outstanding call along with the timer.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::ConfigHandle;
use crate::lifecycle::SessionLifecycle;
use crate::utils::lock;

/// An independently scheduled analysis responsibility.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Periodic coaching pass producing nudges
    NudgeGenerator,
    /// Periodic conversational-phase classification
    StageTracker,
    /// On-demand next-question proposal
    QuestionSuggester,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::NudgeGenerator => "nudge-generator",
            Role::StageTracker => "stage-tracker",
            Role::QuestionSuggester => "question-suggester",
        };
        f.write_str(name)
    }
}

/// Guards against overlapping calls within a single role.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
}

impl InFlight {
    /// Claim the slot. Returns None if a call is already outstanding.
    pub fn try_begin(self: &Arc<Self>) -> Option<InFlightGuard> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(InFlightGuard {
            owner: Arc::clone(self),
        })
    }
}

/// Releases the in-flight slot when dropped, including on panic or abort.
#[derive(Debug)]
pub struct InFlightGuard {
    owner: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.owner.busy.store(false, Ordering::SeqCst);
    }
}

/// Per-role call bookkeeping that outlives any one timer loop, so a restart
/// never runs a second call for a role while the first is still outstanding.
#[derive(Default)]
struct RoleCalls {
    in_flight: Mutex<HashMap<Role, Arc<InFlight>>>,
    outstanding: Mutex<HashMap<Role, AbortHandle>>,
}

impl RoleCalls {
    fn slot(&self, role: Role) -> Arc<InFlight> {
        Arc::clone(lock(&self.in_flight).entry(role).or_default())
    }

    fn spawn<Fut>(&self, role: Role, guard: InFlightGuard, work: Fut) -> JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        lock(&self.outstanding).insert(role, handle.abort_handle());
        handle
    }

    fn abort(&self, role: Role) {
        if let Some(call) = lock(&self.outstanding).remove(&role) {
            call.abort();
        }
    }

    fn abort_all(&self) {
        for (role, call) in lock(&self.outstanding).drain() {
            call.abort();
            debug!("{}: outstanding call aborted", role);
        }
    }
}

pub struct AnalysisScheduler {
    config: ConfigHandle,
    lifecycle: Arc<SessionLifecycle>,
    tasks: Mutex<HashMap<Role, JoinHandle<()>>>,
    calls: Arc<RoleCalls>,
}

impl AnalysisScheduler {
    pub fn new(config: ConfigHandle, lifecycle: Arc<SessionLifecycle>) -> Self {
        Self {
            config,
            lifecycle,
            tasks: Mutex::new(HashMap::new()),
            calls: Arc::new(RoleCalls::default()),
        }
    }

    /// Start ticking `role`, replacing any existing task for it.
    ///
    /// `job` receives the session generation the tick was taken under. Must
    /// be called from within a Tokio runtime.
    pub fn schedule<F, Fut>(&self, role: Role, job: F)
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let config = self.config.clone();
        let lifecycle = Arc::clone(&self.lifecycle);
        let calls = Arc::clone(&self.calls);

        let handle = tokio::spawn(async move {
            loop {
                let period = config.effective().interval_for(role);
                tokio::time::sleep(period).await;

                let Some(generation) = lifecycle.recording_generation() else {
                    debug!("{}: session not recording, skipping tick", role);
                    continue;
                };

                let Some(guard) = calls.slot(role).try_begin() else {
                    debug!("{}: previous call still in flight, skipping tick", role);
                    continue;
                };

                calls.spawn(role, guard, job(generation));
            }
        });

        if let Some(previous) = lock(&self.tasks).insert(role, handle) {
            previous.abort();
            debug!("{}: replaced existing schedule", role);
        }
        info!("{}: scheduled", role);
    }

    /// Run one call for `role` outside the timer, under the same one-at-a-time
    /// rule. Returns None if the role already has a call outstanding.
    ///
    /// The call is aborted by [`cancel`](Self::cancel) and
    /// [`cancel_all`](Self::cancel_all) like any scheduled one.
    pub fn run_once<Fut>(&self, role: Role, work: Fut) -> Option<JoinHandle<Fut::Output>>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let guard = self.calls.slot(role).try_begin()?;
        Some(self.calls.spawn(role, guard, work))
    }

    /// Stop ticking `role` and abort its outstanding call, if any.
    pub fn cancel(&self, role: Role) -> bool {
        self.calls.abort(role);
        match lock(&self.tasks).remove(&role) {
            Some(handle) => {
                handle.abort();
                info!("{}: cancelled", role);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<(Role, JoinHandle<()>)> = lock(&self.tasks).drain().collect();
        for (role, handle) in drained {
            handle.abort();
            debug!("{}: cancelled", role);
        }
        self.calls.abort_all();
    }

    pub fn is_scheduled(&self, role: Role) -> bool {
        lock(&self.tasks).contains_key(&role)
    }

    /// Whether the role's last call is still outstanding.
    #[cfg(test)]
    fn is_in_flight(&self, role: Role) -> bool {
        lock(&self.calls.in_flight)
            .get(&role)
            .is_some_and(|slot| slot.busy.load(Ordering::SeqCst))
    }
}

impl Drop for AnalysisScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
