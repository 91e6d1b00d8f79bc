//! Transcript segments and the bounded window of recent speech that every
//! analysis pass reads from.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Default number of final segments kept in the window
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Who spoke a segment.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The person being coached
    Me,
    /// The other side of the conversation
    Them,
    #[default]
    Unknown,
}

impl Speaker {
    /// Label used when rendering the transcript as reasoning context.
    pub fn label(self) -> &'static str {
        match self {
            Speaker::Me => "Me",
            Speaker::Them => "Them",
            Speaker::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One utterance from the speech-capture collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    /// Transcribed text
    pub text: String,
    #[serde(default)]
    pub speaker: Speaker,
    /// When the utterance was captured
    pub timestamp: DateTime<Utc>,
    /// Recognizer confidence (0.0 to 1.0)
    #[serde(default = "default_confidence", deserialize_with = "clamped_confidence")]
    pub confidence: f32,
    /// Optional emotion tag from the capture side (e.g. "calm", "frustrated")
    #[serde(default)]
    pub emotion: Option<String>,
    /// Partial (interim) results are never retained
    #[serde(default = "default_is_final", rename = "final")]
    pub is_final: bool,
}

fn default_confidence() -> f32 {
    1.0
}

fn clamped_confidence<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(f32::deserialize(deserializer)?.clamp(0.0, 1.0))
}

fn default_is_final() -> bool {
    true
}

impl TranscriptSegment {
    pub fn final_segment(
        speaker: Speaker,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            text: text.into(),
            speaker,
            timestamp,
            confidence: 1.0,
            emotion: None,
            is_final: true,
        }
    }

    pub fn partial(speaker: Speaker, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            is_final: false,
            ..Self::final_segment(speaker, text, timestamp)
        }
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Ordered buffer of the last N final segments.
///
/// Partial segments never enter the window, and segments are never mutated
/// once appended. Overflow evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct TranscriptWindow {
    segments: VecDeque<TranscriptSegment>,
    capacity: usize,
}

impl TranscriptWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            segments: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a final segment. Returns false (and does nothing) for partials.
    pub fn append(&mut self, segment: TranscriptSegment) -> bool {
        if !segment.is_final {
            return false;
        }

        self.segments.push_back(segment);
        self.trim();
        true
    }

    /// Immutable copy of the current contents, safe to hand to another task.
    pub fn snapshot(&self) -> Arc<[TranscriptSegment]> {
        self.segments.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting the oldest segments if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.trim();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TranscriptSegment> {
        self.segments.iter()
    }

    pub fn last(&self) -> Option<&TranscriptSegment> {
        self.segments.back()
    }

    /// The most recent `n` segments from `speaker`, oldest first.
    pub fn recent_from(&self, speaker: Speaker, n: usize) -> Vec<&TranscriptSegment> {
        let mut recent: Vec<&TranscriptSegment> = self
            .segments
            .iter()
            .rev()
            .filter(|s| s.speaker == speaker)
            .take(n)
            .collect();
        recent.reverse();
        recent
    }

    fn trim(&mut self) {
        let overflow = self.segments.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.segments.drain(..overflow);
            debug!("Transcript window evicted {} segment(s)", overflow);
        }
    }
}

impl Default for TranscriptWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// Render segments as speaker-labelled, newline-joined context.
pub fn context_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| format!("{}: {}", s.speaker.label(), s.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(speaker: Speaker, text: &str) -> TranscriptSegment {
        TranscriptSegment::final_segment(speaker, text, Utc::now())
    }

    #[test]
    fn test_partials_are_rejected() {
        let mut window = TranscriptWindow::new(3);
        assert!(!window.append(TranscriptSegment::partial(Speaker::Me, "hel", Utc::now())));
        assert!(window.is_empty());
    }

    #[test]
    fn test_window_never_exceeds_capacity_and_keeps_order() {
        let mut window = TranscriptWindow::new(3);
        for i in 0..7 {
            window.append(seg(Speaker::Me, &format!("segment {}", i)));
            if i % 2 == 0 {
                window.append(TranscriptSegment::partial(Speaker::Me, "noise", Utc::now()));
            }
            assert!(window.len() <= 3);
        }

        let texts: Vec<_> = window.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["segment 4", "segment 5", "segment 6"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut window = TranscriptWindow::new(5);
        window.append(seg(Speaker::Me, "one"));
        let snapshot = window.snapshot();

        window.append(seg(Speaker::Them, "two"));
        window.clear();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text, "one");
    }

    #[test]
    fn test_set_capacity_trims_oldest() {
        let mut window = TranscriptWindow::new(5);
        for text in ["a", "b", "c", "d"] {
            window.append(seg(Speaker::Them, text));
        }
        window.set_capacity(2);
        let texts: Vec<_> = window.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["c", "d"]);
    }

    #[test]
    fn test_recent_from_filters_speaker() {
        let mut window = TranscriptWindow::new(10);
        window.append(seg(Speaker::Me, "m1"));
        window.append(seg(Speaker::Them, "t1"));
        window.append(seg(Speaker::Me, "m2"));
        window.append(seg(Speaker::Me, "m3"));

        let recent: Vec<_> = window
            .recent_from(Speaker::Me, 2)
            .iter()
            .map(|s| s.text.clone())
            .collect();
        assert_eq!(recent, vec!["m2", "m3"]);
    }

    #[test]
    fn test_context_text_is_labelled() {
        let segments = vec![seg(Speaker::Me, "How are you?"), seg(Speaker::Them, " Fine. ")];
        assert_eq!(context_text(&segments), "Me: How are you?\nThem: Fine.");
    }

    #[test]
    fn test_segment_deserializes_with_defaults() {
        let json = r#"{"text":"hi","timestamp":"2024-01-01T00:00:00Z"}"#;
        let segment: TranscriptSegment = serde_json::from_str(json).unwrap();
        assert!(segment.is_final);
        assert_eq!(segment.speaker, Speaker::Unknown);
        assert_eq!(segment.confidence, 1.0);
    }

    #[test]
    fn test_deserialized_confidence_is_clamped() {
        let parse = |confidence: &str| {
            let json = format!(
                r#"{{"text":"hi","timestamp":"2024-01-01T00:00:00Z","confidence":{}}}"#,
                confidence
            );
            serde_json::from_str::<TranscriptSegment>(&json)
                .unwrap()
                .confidence
        };
        assert_eq!(parse("3.5"), 1.0);
        assert_eq!(parse("-0.2"), 0.0);
        assert_eq!(parse("0.5"), 0.5);
    }
}
