use log::error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default English filler words and phrases
pub const DEFAULT_FILLER_WORDS: &[&str] = &[
    // Hesitation sounds
    "um",
    "umm",
    "uh",
    "uhh",
    "er",
    "ah",
    "hmm",
    // Common filler words
    "like",
    "basically",
    "actually",
    "literally",
    "totally",
    // Filler phrases
    "you know",
    "i mean",
    "kind of",
    "sort of",
];

/// Represents a single filler word match in the text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FillerWordMatch {
    /// The filler word as it appeared in the text
    pub word: String,
    /// Byte offsets in the original text
    pub start_index: usize,
    pub end_index: usize,
}

/// Count of how many times a specific filler word was used
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FillerWordCount {
    pub word: String,
    pub count: usize,
}

/// Analysis result for filler word detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerWordAnalysis {
    pub matches: Vec<FillerWordMatch>,
    /// Total word count in original text
    pub total_words: usize,
    pub filler_count: usize,
    /// Percentage of words that were fillers (0.0 - 100.0)
    pub filler_percentage: f32,
    /// Most used first
    pub filler_breakdown: Vec<FillerWordCount>,
}

/// Word-bounded, case-insensitive filler matcher compiled from a word list.
#[derive(Debug, Clone)]
pub struct FillerDetector {
    /// None only if the pattern failed to compile; the detector then finds nothing
    pattern: Option<Regex>,
}

impl FillerDetector {
    /// Build a detector from the default list plus any custom words.
    pub fn with_custom(custom_fillers: &[String]) -> Self {
        let mut words: Vec<String> = DEFAULT_FILLER_WORDS
            .iter()
            .map(|w| w.to_string())
            .chain(
                custom_fillers
                    .iter()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty()),
            )
            .collect();

        // Longer phrases first so "you know" wins over a hypothetical "you"
        words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        words.dedup();

        match build_pattern(&words) {
            Ok(pattern) => Self {
                pattern: Some(pattern),
            },
            Err(e) => {
                error!("Invalid custom filler words, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Number of filler occurrences in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.pattern
            .as_ref()
            .map_or(0, |pattern| pattern.find_iter(text).count())
    }

    /// Full breakdown of filler usage in `text`.
    pub fn analyze(&self, text: &str) -> FillerWordAnalysis {
        let matches: Vec<FillerWordMatch> = match &self.pattern {
            Some(pattern) => pattern
                .find_iter(text)
                .map(|m| FillerWordMatch {
                    word: m.as_str().to_string(),
                    start_index: m.start(),
                    end_index: m.end(),
                })
                .collect(),
            None => Vec::new(),
        };

        let total_words = text.split_whitespace().count();
        let filler_count = matches.len();
        let filler_percentage = if total_words > 0 {
            (filler_count as f32 / total_words as f32) * 100.0
        } else {
            0.0
        };
        let filler_breakdown = build_breakdown(&matches);

        FillerWordAnalysis {
            matches,
            total_words,
            filler_count,
            filler_percentage,
            filler_breakdown,
        }
    }
}

impl Default for FillerDetector {
    fn default() -> Self {
        let pattern = match build_pattern(DEFAULT_FILLER_WORDS) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                error!("Failed to compile default filler pattern: {}", e);
                None
            }
        };
        Self { pattern }
    }
}

fn build_pattern<S: AsRef<str>>(words: &[S]) -> Result<Regex, regex::Error> {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w.as_ref()).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
}

fn build_breakdown(matches: &[FillerWordMatch]) -> Vec<FillerWordCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for m in matches {
        let normalized = m.word.split_whitespace().collect::<Vec<_>>().join(" ");
        *counts.entry(normalized.to_lowercase()).or_insert(0) += 1;
    }

    let mut breakdown: Vec<FillerWordCount> = counts
        .into_iter()
        .map(|(word, count)| FillerWordCount { word, count })
        .collect();

    breakdown.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_filler_detection() {
        let text = "So um I was like thinking about, you know, the project";
        let analysis = FillerDetector::default().analyze(text);

        assert_eq!(analysis.filler_count, 3);
        let words: Vec<_> = analysis.matches.iter().map(|m| m.word.to_lowercase()).collect();
        assert_eq!(words, vec!["um", "like", "you know"]);
    }

    #[test]
    fn test_word_boundaries() {
        // "likely", "summer" and "umbrella" must not match
        assert_eq!(FillerDetector::default().count("It is likely summer, grab an umbrella"), 0);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(FillerDetector::default().count("UM, Basically, I Mean it"), 3);
    }

    #[test]
    fn test_custom_fillers() {
        let detector = FillerDetector::with_custom(&["dude".to_string(), "  ".to_string()]);
        assert_eq!(detector.count("So dude, basically dude"), 3);
    }

    #[test]
    fn test_no_fillers() {
        let analysis = FillerDetector::default().analyze("The quick brown fox jumps over the lazy dog");
        assert_eq!(analysis.filler_count, 0);
        assert_eq!(analysis.filler_percentage, 0.0);
    }

    #[test]
    fn test_percentage_and_breakdown() {
        let analysis = FillerDetector::default().analyze("um like um like um");
        assert_eq!(analysis.total_words, 5);
        assert!((analysis.filler_percentage - 100.0).abs() < 0.01);
        assert_eq!(
            analysis.filler_breakdown,
            vec![
                FillerWordCount {
                    word: "um".to_string(),
                    count: 3
                },
                FillerWordCount {
                    word: "like".to_string(),
                    count: 2
                },
            ]
        );
    }
}
