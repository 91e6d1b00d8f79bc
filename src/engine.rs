//! Coaching engine
//!
//! Owns the shared session state and composes the three analysis roles over
//! it: a stage tracker and a nudge generator on their own timers, and an
//! on-demand question suggester. Every candidate suggestion, immediate or
//! scheduled, goes through the same [`ThrottleGate`] before delivery.
//!
//! Results are published on channels rather than callbacks: accepted
//! suggestions on a broadcast channel in delivery order, and each role's
//! latest value on its own `watch` slot (last value wins).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, watch};

use crate::clock::{Clock, SystemClock};
use crate::config::{CoachingConfig, ConfigHandle};
use crate::error::{ConfigError, ReasoningError};
use crate::filler_detector::FillerDetector;
use crate::lifecycle::{SessionLifecycle, SessionState};
use crate::metrics::{MetricsEngine, SessionMetrics, FILLER_LOOKBACK_SEGMENTS};
use crate::reasoning::{AnalysisRequest, ConversationStage, ReasoningService};
use crate::scheduler::{AnalysisScheduler, Role};
use crate::suggestion::{Suggestion, SuggestionKind, SuggestionSource};
use crate::throttle::ThrottleGate;
use crate::transcript::{context_text, Speaker, TranscriptSegment, TranscriptWindow};
use crate::triggers::ImmediateTriggerEvaluator;
use crate::utils::{lock, read, write};

/// Buffered suggestions per subscriber before the slowest one starts lagging
const DELIVERY_CHANNEL_CAPACITY: usize = 64;

/// Window and metrics live under one lock so append and recompute are atomic.
struct CoachState {
    window: TranscriptWindow,
    metrics: MetricsEngine,
}

struct Slots {
    stage: watch::Sender<ConversationStage>,
    latest_nudge: watch::Sender<Option<Suggestion>>,
    latest_question: watch::Sender<Option<String>>,
    partial_text: watch::Sender<String>,
    metrics: watch::Sender<SessionMetrics>,
}

impl Slots {
    fn new() -> Self {
        Self {
            stage: watch::Sender::new(ConversationStage::Unknown),
            latest_nudge: watch::Sender::new(None),
            latest_question: watch::Sender::new(None),
            partial_text: watch::Sender::new(String::new()),
            metrics: watch::Sender::new(SessionMetrics::default()),
        }
    }

    fn reset(&self) {
        self.stage.send_replace(ConversationStage::Unknown);
        self.latest_nudge.send_replace(None);
        self.latest_question.send_replace(None);
        self.partial_text.send_replace(String::new());
        self.metrics.send_replace(SessionMetrics::default());
    }
}

struct Inner {
    state: Mutex<CoachState>,
    gate: Mutex<ThrottleGate>,
    triggers: RwLock<ImmediateTriggerEvaluator>,
    lifecycle: Arc<SessionLifecycle>,
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
    reasoning: Arc<dyn ReasoningService>,
    scheduler: AnalysisScheduler,
    session_mode: Mutex<String>,
    delivery: broadcast::Sender<Suggestion>,
    slots: Slots,
}

/// Real-time coaching engine. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct CoachingEngine {
    inner: Arc<Inner>,
}

impl CoachingEngine {
    pub fn new(
        config: CoachingConfig,
        reasoning: Arc<dyn ReasoningService>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(config, reasoning, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CoachingConfig,
        reasoning: Arc<dyn ReasoningService>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let fillers = FillerDetector::with_custom(&config.custom_filler_words);
        let window = TranscriptWindow::new(config.context_window_size);
        let gate = ThrottleGate::new(config.suggestion_history_size);
        let config = ConfigHandle::new(config)?;
        let lifecycle = Arc::new(SessionLifecycle::new());
        let (delivery, _) = broadcast::channel(DELIVERY_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CoachState {
                    window,
                    metrics: MetricsEngine::new(fillers.clone()),
                }),
                gate: Mutex::new(gate),
                triggers: RwLock::new(ImmediateTriggerEvaluator::new(fillers)),
                scheduler: AnalysisScheduler::new(config.clone(), Arc::clone(&lifecycle)),
                lifecycle,
                config,
                clock,
                reasoning,
                session_mode: Mutex::new(String::new()),
                delivery,
                slots: Slots::new(),
            }),
        })
    }

    /// Start a new session and its scheduled roles.
    ///
    /// Returns the session generation, or None if a session is already
    /// active. Must be called from within a Tokio runtime.
    pub fn start_session(&self, mode: &str) -> Option<u64> {
        let inner = &self.inner;
        let generation = {
            let mut state = lock(&inner.state);
            let generation = inner.lifecycle.start(inner.clock.now())?;
            state.window.clear();
            state.metrics.reset();
            generation
        };
        lock(&inner.gate).reset();
        inner.slots.reset();
        *lock(&inner.session_mode) = mode.to_string();

        self.schedule_role(Role::NudgeGenerator, |inner, generation| async move {
            inner.run_nudge_pass(generation).await
        });
        self.schedule_role(Role::StageTracker, |inner, generation| async move {
            inner.run_stage_pass(generation).await
        });

        info!("Coaching session {} started in '{}' mode", generation, mode);
        Some(generation)
    }

    /// Suspend ticking and ingestion. Buffered state is kept.
    pub fn pause(&self) -> bool {
        self.inner.lifecycle.pause(self.inner.clock.now())
    }

    pub fn resume(&self) -> bool {
        self.inner.lifecycle.resume(self.inner.clock.now())
    }

    /// Complete the session: cancel every role and release all buffers.
    pub fn stop(&self) -> bool {
        self.inner.end_session(|lifecycle, now| lifecycle.stop(now))
    }

    /// Move the session to the terminal error state.
    pub fn fail(&self, reason: &str) -> bool {
        self.inner.end_session(|lifecycle, now| lifecycle.fail(now, reason))
    }

    /// Feed one segment from speech capture.
    ///
    /// Partials only update the live partial text. Finals are appended,
    /// metrics recomputed, and the immediate rules evaluated. Returns the
    /// suggestion delivered as a result, if any. A no-op unless Recording.
    pub fn ingest(&self, segment: TranscriptSegment) -> Option<Suggestion> {
        let inner = &self.inner;

        if !segment.is_final {
            if inner.lifecycle.recording_generation().is_some() {
                inner.slots.partial_text.send_replace(segment.text);
            }
            return None;
        }

        let (generation, metrics, recent_mine) = {
            let mut state = lock(&inner.state);
            let Some(generation) = inner.lifecycle.recording_generation() else {
                debug!("Ignoring segment, session is {:?}", inner.lifecycle.state());
                return None;
            };

            let CoachState { window, metrics } = &mut *state;
            window.append(segment.clone());
            let updated = metrics.record(&segment, window);
            let recent_mine: Vec<TranscriptSegment> = window
                .recent_from(Speaker::Me, FILLER_LOOKBACK_SEGMENTS)
                .into_iter()
                .cloned()
                .collect();
            (generation, updated, recent_mine)
        };

        inner.slots.metrics.send_replace(metrics.clone());
        inner.slots.partial_text.send_replace(String::new());

        inner.evaluate_immediate(generation, &metrics, &recent_mine)
    }

    /// Count an interruption detected outside the transcript heuristics.
    pub fn record_interruption(&self) -> Option<Suggestion> {
        let inner = &self.inner;
        let (generation, metrics, recent_mine) = {
            let mut state = lock(&inner.state);
            let generation = inner.lifecycle.recording_generation()?;
            let metrics = state.metrics.record_interruption();
            let recent_mine: Vec<TranscriptSegment> = state
                .window
                .recent_from(Speaker::Me, FILLER_LOOKBACK_SEGMENTS)
                .into_iter()
                .cloned()
                .collect();
            (generation, metrics, recent_mine)
        };

        inner.slots.metrics.send_replace(metrics.clone());
        inner.evaluate_immediate(generation, &metrics, &recent_mine)
    }

    /// Ask for one question to put to the other side, given the transcript
    /// and the current stage. At most one request runs at a time; a call
    /// made while another is outstanding returns None.
    pub async fn suggest_question(&self) -> Option<String> {
        let inner = Arc::clone(&self.inner);
        let Some(generation) = inner.lifecycle.recording_generation() else {
            debug!("{}: session not recording", Role::QuestionSuggester);
            return None;
        };

        let work = Arc::clone(&inner);
        let Some(task) = inner
            .scheduler
            .run_once(Role::QuestionSuggester, async move {
                work.run_question_pass(generation).await
            })
        else {
            debug!("{}: previous call still in flight", Role::QuestionSuggester);
            return None;
        };

        match task.await {
            Ok(question) => question,
            Err(e) if e.is_cancelled() => {
                debug!("{}: cancelled with the session", Role::QuestionSuggester);
                None
            }
            Err(e) => {
                warn!("{}: task failed: {}", Role::QuestionSuggester, e);
                None
            }
        }
    }

    /// Swap the configuration. Takes effect on the next tick; window and
    /// history sizes are re-applied immediately.
    pub fn update_config(&self, config: CoachingConfig) -> Result<(), ConfigError> {
        let inner = &self.inner;
        inner.config.update(config.clone())?;

        let fillers = FillerDetector::with_custom(&config.custom_filler_words);
        {
            let mut state = lock(&inner.state);
            state.window.set_capacity(config.context_window_size);
            state.metrics.set_filler_detector(fillers.clone());
        }
        lock(&inner.gate).set_history_size(config.suggestion_history_size);
        *write(&inner.triggers) = ImmediateTriggerEvaluator::new(fillers);
        Ok(())
    }

    /// Holds only a weak reference so scheduled tasks never keep the engine
    /// alive.
    fn schedule_role<F, Fut>(&self, role: Role, run: F)
    where
        F: Fn(Arc<Inner>, u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule(role, move |generation| {
            let work = weak.upgrade().map(|inner| run(inner, generation));
            async move {
                if let Some(work) = work {
                    work.await;
                }
            }
        });
    }

    pub fn config(&self) -> CoachingConfig {
        self.inner.config.get()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.state()
    }

    /// Latest published metrics. After a session ends this still holds the
    /// final values until the next session starts.
    pub fn metrics(&self) -> SessionMetrics {
        self.inner.slots.metrics.borrow().clone()
    }

    pub fn quality_score(&self) -> u8 {
        self.metrics().quality_score()
    }

    pub fn snapshot(&self) -> Arc<[TranscriptSegment]> {
        lock(&self.inner.state).window.snapshot()
    }

    pub fn stage(&self) -> ConversationStage {
        *self.inner.slots.stage.borrow()
    }

    pub fn session_mode(&self) -> String {
        lock(&self.inner.session_mode).clone()
    }

    /// Session time with paused intervals excluded.
    pub fn session_duration(&self) -> ChronoDuration {
        self.inner
            .lifecycle
            .session_duration(self.inner.clock.now())
    }

    pub fn is_scheduled(&self, role: Role) -> bool {
        self.inner.scheduler.is_scheduled(role)
    }

    /// Every accepted suggestion, in delivery order.
    pub fn subscribe(&self) -> broadcast::Receiver<Suggestion> {
        self.inner.delivery.subscribe()
    }

    pub fn watch_stage(&self) -> watch::Receiver<ConversationStage> {
        self.inner.slots.stage.subscribe()
    }

    pub fn watch_latest_nudge(&self) -> watch::Receiver<Option<Suggestion>> {
        self.inner.slots.latest_nudge.subscribe()
    }

    pub fn watch_question(&self) -> watch::Receiver<Option<String>> {
        self.inner.slots.latest_question.subscribe()
    }

    pub fn watch_partial_text(&self) -> watch::Receiver<String> {
        self.inner.slots.partial_text.subscribe()
    }

    pub fn watch_metrics(&self) -> watch::Receiver<SessionMetrics> {
        self.inner.slots.metrics.subscribe()
    }
}

impl Inner {
    fn end_session(
        &self,
        transition: impl FnOnce(&SessionLifecycle, DateTime<Utc>) -> bool,
    ) -> bool {
        {
            let mut state = lock(&self.state);
            if !transition(&self.lifecycle, self.clock.now()) {
                return false;
            }
            self.scheduler.cancel_all();
            state.window.clear();
            state.metrics.reset();
        }
        lock(&self.gate).reset();
        self.slots.partial_text.send_replace(String::new());
        true
    }

    /// Immediate path: skipped entirely while the shared interval is closed.
    fn evaluate_immediate(
        &self,
        generation: u64,
        metrics: &SessionMetrics,
        recent_mine: &[TranscriptSegment],
    ) -> Option<Suggestion> {
        let settings = self.config.effective().throttle_settings();
        let now = self.clock.now();
        if !lock(&self.gate).interval_open(now, settings.min_interval) {
            return None;
        }

        let recent: Vec<&TranscriptSegment> = recent_mine.iter().collect();
        let candidate = read(&self.triggers).evaluate(metrics, &recent, now)?;
        self.offer(candidate, generation)
    }

    /// Route a candidate through the throttle gate and publish it if accepted.
    fn offer(&self, suggestion: Suggestion, generation: u64) -> Option<Suggestion> {
        let settings = self.config.effective().throttle_settings();
        let mut gate = lock(&self.gate);

        if !self.lifecycle.is_recording(generation) {
            debug!(
                "Dropping {} suggestion from stale session {}",
                suggestion.kind, generation
            );
            return None;
        }

        if !gate
            .try_accept(&suggestion.message, self.clock.now(), &settings)
            .is_accepted()
        {
            return None;
        }

        info!("Delivering {} suggestion: {}", suggestion.kind, suggestion.message);
        self.slots.latest_nudge.send_replace(Some(suggestion.clone()));
        // No subscribers is fine; the latest-nudge slot still holds it
        let _ = self.delivery.send(suggestion.clone());
        Some(suggestion)
    }

    /// Snapshot the window into a reasoning request, if enough is buffered.
    fn build_request(&self, min_segments: usize) -> Option<AnalysisRequest> {
        let (snapshot, metrics) = {
            let state = lock(&self.state);
            (state.window.snapshot(), state.metrics.current().clone())
        };

        if snapshot.len() < min_segments.max(1) {
            debug!(
                "Only {} segment(s) buffered, need {}",
                snapshot.len(),
                min_segments
            );
            return None;
        }

        Some(AnalysisRequest {
            context: context_text(&snapshot),
            session_mode: lock(&self.session_mode).clone(),
            metrics: metrics.to_context_map(),
        })
    }

    /// Await a reasoning call under the configured timeout. Errors and
    /// timeouts are logged and read as absence.
    async fn call_reasoning<T>(
        &self,
        role: Role,
        call: impl Future<Output = Result<Option<T>, ReasoningError>>,
    ) -> Option<T> {
        let timeout = self.config.effective().reasoning_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Some(value))) => Some(value),
            Ok(Ok(None)) => {
                debug!("{}: nothing to say", role);
                None
            }
            Ok(Err(e)) => {
                warn!("{}: reasoning call failed: {}", role, e);
                None
            }
            Err(_) => {
                warn!("{}: reasoning call timed out after {:?}", role, timeout);
                None
            }
        }
    }

    async fn run_nudge_pass(&self, generation: u64) {
        let min_segments = self.config.effective().min_segments_for_analysis;
        let Some(request) = self.build_request(min_segments) else {
            return;
        };

        let Some(reply) = self
            .call_reasoning(Role::NudgeGenerator, self.reasoning.analyze(&request))
            .await
        else {
            return;
        };

        let message = reply.message.trim();
        if message.is_empty() {
            return;
        }

        let suggestion = Suggestion::new(
            SuggestionKind::from_reply_kind(reply.kind.as_deref()),
            message,
            self.clock.now(),
            SuggestionSource::Role(Role::NudgeGenerator),
        );
        self.offer(suggestion, generation);
    }

    async fn run_stage_pass(&self, generation: u64) {
        let min_segments = self.config.effective().min_segments_for_analysis;
        let Some(request) = self.build_request(min_segments) else {
            return;
        };

        let Some(label) = self
            .call_reasoning(Role::StageTracker, self.reasoning.track_stage(&request))
            .await
        else {
            return;
        };

        let Some(stage) = ConversationStage::parse(&label) else {
            debug!("{}: ignoring unknown stage label '{}'", Role::StageTracker, label);
            return;
        };

        if !self.lifecycle.is_recording(generation) {
            return;
        }

        let changed = self.slots.stage.send_if_modified(|current| {
            if *current == stage {
                false
            } else {
                *current = stage;
                true
            }
        });
        if changed {
            info!("Conversation stage is now '{}'", stage);
        }
    }

    async fn run_question_pass(&self, generation: u64) -> Option<String> {
        let request = self.build_request(1)?;
        let stage = *self.slots.stage.borrow();

        let question = self
            .call_reasoning(
                Role::QuestionSuggester,
                self.reasoning.suggest_question(&request, stage),
            )
            .await?;
        let question = question.trim().to_string();
        if question.is_empty() || !self.lifecycle.is_recording(generation) {
            return None;
        }

        self.slots.latest_question.send_replace(Some(question.clone()));
        Some(question)
    }
}
