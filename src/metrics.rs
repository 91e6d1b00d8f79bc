//! Live conversational metrics derived purely from transcript data.
//!
//! Talk ratio and filler density are recomputed from the window on every
//! append. Question, empathy and interruption counts are session-wide
//! counters fed one segment at a time, and tension is exponentially smoothed
//! over emotion-tagged segments.

use serde::{Deserialize, Serialize};

use crate::filler_detector::FillerDetector;
use crate::transcript::{Speaker, TranscriptSegment, TranscriptWindow};

/// Tension before any emotion tag has been seen (neutral)
pub const INITIAL_TENSION: u8 = 30;

/// Number of recent "Me" segments inspected for filler words
pub const FILLER_LOOKBACK_SEGMENTS: usize = 5;

const SMOOTHING_KEEP: f64 = 0.7;
const SMOOTHING_SAMPLE: f64 = 0.3;

const INTERROGATIVE_WORDS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "can", "could", "would", "do", "does",
    "did", "is", "are", "will", "should", "have", "may",
];

const OPEN_ENDED_STARTERS: &[&str] = &["what", "how", "why"];

const OPEN_ENDED_PHRASES: &[&str] = &["tell me more", "tell me about"];

const EMPATHETIC_PHRASES: &[&str] = &[
    "i understand",
    "i hear you",
    "that makes sense",
    "that sounds",
    "i can see",
    "i appreciate",
    "thank you for sharing",
    "that must be",
];

/// Coarse mood bucket derived from tension.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Calm,
    Focused,
    Stressed,
    Anxious,
}

impl Sentiment {
    pub fn from_tension(tension: u8) -> Self {
        match tension {
            0..=25 => Sentiment::Calm,
            26..=50 => Sentiment::Focused,
            51..=75 => Sentiment::Stressed,
            _ => Sentiment::Anxious,
        }
    }
}

/// Snapshot of the derived session metrics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionMetrics {
    /// Share of window segments spoken by "Me" (0 - 100)
    pub talk_ratio: u8,
    pub question_count: u32,
    pub open_question_count: u32,
    pub empathetic_count: u32,
    pub interruption_count: u32,
    /// Smoothed stress proxy (0 - 100)
    pub tension: u8,
    pub sentiment: Sentiment,
    /// Filler occurrences over the last few "Me" segments
    pub filler_count: usize,
    /// Segments currently in the window
    pub segment_count: usize,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            talk_ratio: 50,
            question_count: 0,
            open_question_count: 0,
            empathetic_count: 0,
            interruption_count: 0,
            tension: INITIAL_TENSION,
            sentiment: Sentiment::from_tension(INITIAL_TENSION),
            filler_count: 0,
            segment_count: 0,
        }
    }
}

impl SessionMetrics {
    /// Overall session quality (0 - 100).
    pub fn quality_score(&self) -> u8 {
        let talk_band = match self.talk_ratio {
            40..=60 => 30.0,
            30..=70 => 20.0,
            _ => 10.0,
        };

        let open_ratio = if self.question_count > 0 {
            self.open_question_count as f64 / self.question_count as f64
        } else {
            0.0
        };

        let empathy_score = (self.empathetic_count.saturating_mul(20)).min(100) as f64;

        let interruption_band = match self.interruption_count {
            0 => 20.0,
            1..=2 => 15.0,
            3..=5 => 10.0,
            _ => 0.0,
        };

        let total = talk_band + open_ratio * 25.0 + (empathy_score / 4.0).min(25.0) + interruption_band;
        total.round().min(100.0) as u8
    }

    /// Flattened view handed to the reasoning collaborator.
    pub fn to_context_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.insert("quality_score".to_string(), self.quality_score().into());
                map
            }
            _ => serde_json::Map::new(),
        }
    }
}

/// Map an emotion tag to a tension sample. Unknown tags read as neutral.
pub fn emotion_value(emotion: &str) -> u8 {
    match emotion.trim().to_lowercase().as_str() {
        "calm" | "relaxed" | "happy" | "content" | "joyful" => 15,
        "focused" | "engaged" | "curious" => 40,
        "surprised" | "confused" => 50,
        "sad" | "disappointed" => 65,
        "frustrated" | "stressed" => 75,
        "anxious" | "fearful" => 85,
        "angry" => 90,
        _ => 30,
    }
}

/// Exponential smoothing step: `0.7 * old + 0.3 * sample`, rounded and clamped.
pub fn smooth_tension(current: u8, sample: u8) -> u8 {
    let next = SMOOTHING_KEEP * current as f64 + SMOOTHING_SAMPLE * sample as f64;
    next.round().clamp(0.0, 100.0) as u8
}

fn first_word(text: &str) -> Option<String> {
    text.split_whitespace().next().map(|w| {
        w.trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
    })
}

pub fn is_question(text: &str) -> bool {
    if text.trim_end().ends_with('?') {
        return true;
    }
    first_word(text).is_some_and(|w| INTERROGATIVE_WORDS.contains(&w.as_str()))
}

pub fn is_open_ended(text: &str) -> bool {
    let lower = text.to_lowercase();
    let starts_open = first_word(text).is_some_and(|w| OPEN_ENDED_STARTERS.contains(&w.as_str()));
    starts_open || OPEN_ENDED_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn is_empathetic(text: &str) -> bool {
    let lower = text.to_lowercase();
    EMPATHETIC_PHRASES.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Clone, Copy)]
struct LastTurn {
    speaker: Speaker,
    finished: bool,
}

/// Incremental metric state. Owned by the engine behind the same lock as the
/// transcript window, so append and recompute happen as one unit.
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    question_count: u32,
    open_question_count: u32,
    empathetic_count: u32,
    interruption_count: u32,
    tension: u8,
    last_turn: Option<LastTurn>,
    fillers: FillerDetector,
    current: SessionMetrics,
}

impl MetricsEngine {
    pub fn new(fillers: FillerDetector) -> Self {
        Self {
            question_count: 0,
            open_question_count: 0,
            empathetic_count: 0,
            interruption_count: 0,
            tension: INITIAL_TENSION,
            last_turn: None,
            fillers,
            current: SessionMetrics::default(),
        }
    }

    /// Fold a freshly appended final segment into the counters, then
    /// recompute everything against the window it was appended to.
    pub fn record(&mut self, segment: &TranscriptSegment, window: &TranscriptWindow) -> SessionMetrics {
        let text = segment.text.trim();

        if segment.speaker == Speaker::Me {
            if is_question(text) {
                self.question_count += 1;
                if is_open_ended(text) {
                    self.open_question_count += 1;
                }
            } else if is_open_ended(text) {
                // "Tell me more about..." prompts are open invitations even without a '?'
                self.question_count += 1;
                self.open_question_count += 1;
            }

            if is_empathetic(text) {
                self.empathetic_count += 1;
            }

            if let Some(LastTurn {
                speaker: Speaker::Them,
                finished: false,
            }) = self.last_turn
            {
                self.interruption_count += 1;
            }
        }

        if let Some(emotion) = segment.emotion.as_deref() {
            self.tension = smooth_tension(self.tension, emotion_value(emotion));
        }

        self.last_turn = Some(LastTurn {
            speaker: segment.speaker,
            finished: text.ends_with(['.', '?', '!']),
        });

        self.recompute(window)
    }

    pub fn record_interruption(&mut self) -> SessionMetrics {
        self.interruption_count += 1;
        self.current.interruption_count = self.interruption_count;
        self.current.clone()
    }

    /// Derive the window-based fields and merge in the counters.
    pub fn recompute(&mut self, window: &TranscriptWindow) -> SessionMetrics {
        let total = window.len();
        let mine = window.iter().filter(|s| s.speaker == Speaker::Me).count();
        let talk_ratio = if total == 0 {
            50
        } else {
            (100.0 * mine as f64 / total as f64).round() as u8
        };

        let filler_count = window
            .recent_from(Speaker::Me, FILLER_LOOKBACK_SEGMENTS)
            .iter()
            .map(|s| self.fillers.count(&s.text))
            .sum();

        self.current = SessionMetrics {
            talk_ratio,
            question_count: self.question_count,
            open_question_count: self.open_question_count,
            empathetic_count: self.empathetic_count,
            interruption_count: self.interruption_count,
            tension: self.tension,
            sentiment: Sentiment::from_tension(self.tension),
            filler_count,
            segment_count: total,
        };
        self.current.clone()
    }

    pub fn current(&self) -> &SessionMetrics {
        &self.current
    }

    pub fn set_filler_detector(&mut self, fillers: FillerDetector) {
        self.fillers = fillers;
    }

    pub fn reset(&mut self) {
        let fillers = std::mem::take(&mut self.fillers);
        *self = Self::new(fillers);
    }
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new(FillerDetector::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn feed(engine: &mut MetricsEngine, window: &mut TranscriptWindow, seg: TranscriptSegment) -> SessionMetrics {
        window.append(seg.clone());
        engine.record(&seg, window)
    }

    fn me(text: &str) -> TranscriptSegment {
        TranscriptSegment::final_segment(Speaker::Me, text, Utc::now())
    }

    fn them(text: &str) -> TranscriptSegment {
        TranscriptSegment::final_segment(Speaker::Them, text, Utc::now())
    }

    #[test]
    fn test_empty_window_talk_ratio_is_fifty() {
        let mut engine = MetricsEngine::default();
        let metrics = engine.recompute(&TranscriptWindow::default());
        assert_eq!(metrics.talk_ratio, 50);
        assert_eq!(metrics, SessionMetrics::default());
    }

    #[test]
    fn test_talk_ratio_rounds_share_of_me() {
        let mut engine = MetricsEngine::default();
        let mut window = TranscriptWindow::new(10);
        feed(&mut engine, &mut window, me("One."));
        feed(&mut engine, &mut window, them("Two."));
        let metrics = feed(&mut engine, &mut window, me("Three."));
        assert_eq!(metrics.talk_ratio, 67);
        assert!(metrics.talk_ratio <= 100);
    }

    #[test]
    fn test_question_detection() {
        assert!(is_question("Is that right"));
        assert!(is_question("you did what?"));
        assert!(!is_question("That is right."));
        assert!(is_open_ended("How did that feel?"));
        assert!(is_open_ended("Tell me more about the launch"));
        assert!(!is_open_ended("Did you finish?"));
    }

    #[test]
    fn test_counters_only_track_me() {
        let mut engine = MetricsEngine::default();
        let mut window = TranscriptWindow::new(10);
        feed(&mut engine, &mut window, them("What do you think?"));
        feed(&mut engine, &mut window, me("What worries you most?"));
        feed(&mut engine, &mut window, me("Did you sleep?"));
        let metrics = feed(&mut engine, &mut window, me("I hear you, that makes sense."));

        assert_eq!(metrics.question_count, 2);
        assert_eq!(metrics.open_question_count, 1);
        assert_eq!(metrics.empathetic_count, 1);
    }

    #[test]
    fn test_interruption_after_unfinished_turn() {
        let mut engine = MetricsEngine::default();
        let mut window = TranscriptWindow::new(10);
        feed(&mut engine, &mut window, them("So what I was trying to say is"));
        let metrics = feed(&mut engine, &mut window, me("Right, but"));
        assert_eq!(metrics.interruption_count, 1);

        feed(&mut engine, &mut window, them("Let me finish."));
        let metrics = feed(&mut engine, &mut window, me("Sorry, go on."));
        assert_eq!(metrics.interruption_count, 1);

        let metrics = engine.record_interruption();
        assert_eq!(metrics.interruption_count, 2);
    }

    #[test]
    fn test_tension_converges_monotonically() {
        let mut engine = MetricsEngine::default();
        let mut window = TranscriptWindow::new(10);
        let mut previous = INITIAL_TENSION;
        for _ in 0..40 {
            let metrics = feed(&mut engine, &mut window, them("Ugh.").with_emotion("angry"));
            assert!(metrics.tension >= previous);
            assert!(metrics.tension <= 90);
            previous = metrics.tension;
        }
        assert!(previous >= 85);
        assert_eq!(Sentiment::from_tension(previous), Sentiment::Anxious);
    }

    #[test]
    fn test_tension_stays_in_range() {
        assert_eq!(smooth_tension(100, 100), 100);
        assert_eq!(smooth_tension(0, 0), 0);
        assert_eq!(smooth_tension(30, 90), 48);
        assert_eq!(emotion_value("unknown-tag"), 30);
    }

    #[test]
    fn test_sentiment_buckets() {
        assert_eq!(Sentiment::from_tension(25), Sentiment::Calm);
        assert_eq!(Sentiment::from_tension(26), Sentiment::Focused);
        assert_eq!(Sentiment::from_tension(50), Sentiment::Focused);
        assert_eq!(Sentiment::from_tension(75), Sentiment::Stressed);
        assert_eq!(Sentiment::from_tension(76), Sentiment::Anxious);
    }

    #[test]
    fn test_filler_count_uses_last_five_me_segments() {
        let mut engine = MetricsEngine::default();
        let mut window = TranscriptWindow::new(10);
        feed(&mut engine, &mut window, me("um um um"));
        for _ in 0..5 {
            feed(&mut engine, &mut window, me("Clear sentence."));
        }
        let metrics = feed(&mut engine, &mut window, them("um like"));
        assert_eq!(metrics.filler_count, 0);

        let metrics = feed(&mut engine, &mut window, me("So, like, basically, you know"));
        assert_eq!(metrics.filler_count, 3);
    }

    #[test]
    fn test_quality_score() {
        let perfect = SessionMetrics {
            talk_ratio: 50,
            question_count: 4,
            open_question_count: 4,
            empathetic_count: 5,
            interruption_count: 0,
            ..SessionMetrics::default()
        };
        assert_eq!(perfect.quality_score(), 100);

        let poor = SessionMetrics {
            talk_ratio: 95,
            interruption_count: 9,
            ..SessionMetrics::default()
        };
        assert_eq!(poor.quality_score(), 10);

        // 20 (band) + 12.5 (open ratio) + 10 (empathy 40/4) + 15 (interruptions)
        let middling = SessionMetrics {
            talk_ratio: 65,
            question_count: 2,
            open_question_count: 1,
            empathetic_count: 2,
            interruption_count: 2,
            ..SessionMetrics::default()
        };
        assert_eq!(middling.quality_score(), 58);
    }

    #[test]
    fn test_reset_clears_counters() {
        let mut engine = MetricsEngine::default();
        let mut window = TranscriptWindow::new(10);
        feed(&mut engine, &mut window, me("Why?").with_emotion("angry"));
        engine.reset();
        assert_eq!(engine.current(), &SessionMetrics::default());
    }
}
