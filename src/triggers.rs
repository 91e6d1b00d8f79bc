//! Rule-based urgent interventions, evaluated every time metrics update.

use chrono::{DateTime, Utc};

use crate::filler_detector::FillerDetector;
use crate::metrics::SessionMetrics;
use crate::suggestion::{Suggestion, SuggestionKind, SuggestionSource};
use crate::transcript::TranscriptSegment;

pub const TALK_RATIO_LIMIT: u8 = 80;
pub const TENSION_LIMIT: u8 = 75;
pub const INTERRUPTION_LIMIT: u32 = 5;
pub const FILLER_LIMIT: usize = 3;

/// Stateless threshold rules. Only the first matching rule fires.
#[derive(Debug, Clone, Default)]
pub struct ImmediateTriggerEvaluator {
    fillers: FillerDetector,
}

impl ImmediateTriggerEvaluator {
    pub fn new(fillers: FillerDetector) -> Self {
        Self { fillers }
    }

    /// `recent_mine` should hold the last few "Me" segments (oldest first).
    pub fn evaluate(
        &self,
        metrics: &SessionMetrics,
        recent_mine: &[&TranscriptSegment],
        now: DateTime<Utc>,
    ) -> Option<Suggestion> {
        let (kind, message) = if metrics.talk_ratio > TALK_RATIO_LIMIT {
            (
                SuggestionKind::Urgent,
                format!(
                    "You're speaking {}% of the time. Pause and ask them a question.",
                    metrics.talk_ratio
                ),
            )
        } else if metrics.tension > TENSION_LIMIT {
            (
                SuggestionKind::Urgent,
                "Tension is running high. Slow down and acknowledge their point."
                    .to_string(),
            )
        } else if metrics.interruption_count > INTERRUPTION_LIMIT {
            (
                SuggestionKind::Important,
                format!(
                    "You've interrupted {} times. Let them finish before you respond.",
                    metrics.interruption_count
                ),
            )
        } else if self.filler_occurrences(recent_mine) > FILLER_LIMIT {
            (
                SuggestionKind::Helpful,
                "Tip: swap filler words like \"um\" and \"like\" for a short pause.".to_string(),
            )
        } else {
            return None;
        };

        Some(Suggestion::new(kind, message, now, SuggestionSource::Immediate))
    }

    fn filler_occurrences(&self, segments: &[&TranscriptSegment]) -> usize {
        segments.iter().map(|s| self.fillers.count(&s.text)).sum()
    }
}
