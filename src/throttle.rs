//! Anti-spam gate for outgoing suggestions: a minimum interval between
//! deliveries plus similarity dedup against recently delivered texts.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::VecDeque;

use crate::similarity::similarity;

/// Default number of delivered suggestions remembered for dedup
pub const DEFAULT_HISTORY_SIZE: usize = 20;

/// Bounded FIFO of delivered suggestion texts (lowercased).
#[derive(Debug, Clone)]
pub struct SuggestionHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl SuggestionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, text: &str) {
        self.entries.push_back(text.to_lowercase());
        self.trim();
    }

    /// The last `n` entries, newest last.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &str> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.trim();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn trim(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

impl Default for SuggestionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

/// The knobs the gate reads on every decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleSettings {
    pub min_interval: Duration,
    pub similarity_threshold: f64,
    /// How many of the newest history entries a candidate is compared with
    pub dedup_lookback: usize,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::seconds(60),
            similarity_threshold: 0.7,
            dedup_lookback: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleDecision {
    Accepted,
    /// Too close to the last delivery; the candidate is dropped, not queued
    TooSoon { remaining: Duration },
    /// Too similar to something delivered recently
    Duplicate { similarity: f64 },
}

impl ThrottleDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ThrottleDecision::Accepted)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThrottleGate {
    last_delivered: Option<DateTime<Utc>>,
    history: SuggestionHistory,
}

impl ThrottleGate {
    pub fn new(history_size: usize) -> Self {
        Self {
            last_delivered: None,
            history: SuggestionHistory::new(history_size),
        }
    }

    /// Whether the minimum interval since the last delivery has elapsed.
    pub fn interval_open(&self, now: DateTime<Utc>, min_interval: Duration) -> bool {
        match self.last_delivered {
            Some(last) => now - last >= min_interval,
            None => true,
        }
    }

    /// Run both gates and, on success, record the delivery.
    pub fn try_accept(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
        settings: &ThrottleSettings,
    ) -> ThrottleDecision {
        if let Some(last) = self.last_delivered {
            let elapsed = now - last;
            if elapsed < settings.min_interval {
                let remaining = settings.min_interval - elapsed;
                debug!(
                    "Throttled suggestion, {}s until next slot",
                    remaining.num_seconds()
                );
                return ThrottleDecision::TooSoon { remaining };
            }
        }

        let candidate = text.to_lowercase();
        let closest = self
            .history
            .recent(settings.dedup_lookback)
            .map(|previous| similarity(&candidate, previous))
            .fold(0.0_f64, f64::max);

        if closest > settings.similarity_threshold {
            debug!(
                "Dropped duplicate suggestion (similarity {:.2}): '{}'",
                closest, text
            );
            return ThrottleDecision::Duplicate {
                similarity: closest,
            };
        }

        self.last_delivered = Some(now);
        self.history.push(text);
        ThrottleDecision::Accepted
    }

    #[cfg(test)]
    fn last_delivered(&self) -> Option<DateTime<Utc>> {
        self.last_delivered
    }

    #[cfg(test)]
    fn history(&self) -> &SuggestionHistory {
        &self.history
    }

    pub fn set_history_size(&mut self, size: usize) {
        self.history.set_capacity(size);
    }

    pub fn reset(&mut self) {
        self.last_delivered = None;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_second_delivery_inside_interval_is_rejected() {
        let mut gate = ThrottleGate::default();
        let settings = ThrottleSettings::default();

        assert!(gate.try_accept("Ask about their goals", t(0), &settings).is_accepted());
        let decision = gate.try_accept("Completely different advice", t(30), &settings);
        assert_eq!(
            decision,
            ThrottleDecision::TooSoon {
                remaining: Duration::seconds(30)
            }
        );
        // Rejection does not consume the slot
        assert_eq!(gate.last_delivered(), Some(t(0)));
        assert_eq!(gate.history().len(), 1);
    }

    #[test]
    fn test_similar_candidate_is_deduplicated() {
        let mut gate = ThrottleGate::default();
        let settings = ThrottleSettings::default();
        assert!(gate
            .try_accept("Try asking an open question", t(0), &settings)
            .is_accepted());

        let decision = gate.try_accept("Try asking an open question now", t(61), &settings);
        assert!(matches!(decision, ThrottleDecision::Duplicate { similarity } if similarity > 0.7));

        assert!(gate
            .try_accept("Let's take a short pause", t(61), &settings)
            .is_accepted());
    }

    #[test]
    fn test_similarity_equal_to_threshold_is_accepted() {
        let mut gate = ThrottleGate::default();
        let settings = ThrottleSettings::default();
        assert!(gate.try_accept("Ask a goal", t(0), &settings).is_accepted());

        // One edit in ten chars scores 0.9
        assert!(matches!(
            gate.try_accept("Ask a goat", t(61), &settings),
            ThrottleDecision::Duplicate { .. }
        ));
        // Three edits in ten chars scores exactly 0.7
        assert_eq!(crate::similarity::similarity("ask a goal", "ask a plan"), 0.7);
        assert!(gate.try_accept("Ask a plan", t(61), &settings).is_accepted());
    }

    #[test]
    fn test_dedup_is_case_insensitive() {
        let mut gate = ThrottleGate::default();
        let settings = ThrottleSettings::default();
        gate.try_accept("SLOW DOWN A LITTLE", t(0), &settings);
        assert!(!gate.try_accept("slow down a little", t(120), &settings).is_accepted());
    }

    #[test]
    fn test_dedup_only_looks_at_recent_entries() {
        let mut gate = ThrottleGate::default();
        let settings = ThrottleSettings {
            min_interval: Duration::zero(),
            ..ThrottleSettings::default()
        };
        for text in [
            "Summarize what you heard",
            "Ask how they feel about the plan",
            "Name one concrete next step",
            "Pause and let them think",
        ] {
            assert!(gate.try_accept(text, t(0), &settings).is_accepted());
        }
        // Fell out of the 3-entry lookback
        assert!(gate
            .try_accept("Summarize what you heard", t(0), &settings)
            .is_accepted());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = SuggestionHistory::new(2);
        history.push("A");
        history.push("B");
        history.push("C");
        assert_eq!(history.recent(5).collect::<Vec<_>>(), vec!["b", "c"]);

        history.set_capacity(1);
        assert_eq!(history.recent(5).collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_interval_open_and_reset() {
        let mut gate = ThrottleGate::default();
        let settings = ThrottleSettings::default();
        assert!(gate.interval_open(t(0), settings.min_interval));
        gate.try_accept("Breathe", t(0), &settings);
        assert!(!gate.interval_open(t(59), settings.min_interval));
        assert!(gate.interval_open(t(60), settings.min_interval));

        gate.reset();
        assert!(gate.history().is_empty());
        assert!(gate.interval_open(t(1), settings.min_interval));
    }
}
