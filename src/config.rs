use chrono::Duration as ChronoDuration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::ConfigError;
use crate::scheduler::Role;
use crate::throttle::ThrottleSettings;
use crate::utils::{read, write};

const MIN_SHIFTED_THRESHOLD: f64 = 0.05;
const MAX_SHIFTED_THRESHOLD: f64 = 0.95;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggressiveness {
    Minimal,
    #[default]
    Balanced,
    Aggressive,
}

impl Aggressiveness {
    /// Multiplier applied to every interval.
    pub fn interval_factor(self) -> f64 {
        match self {
            Aggressiveness::Minimal => 2.0,
            Aggressiveness::Balanced => 1.0,
            Aggressiveness::Aggressive => 0.5,
        }
    }

    /// Shift applied to the similarity threshold. Lower thresholds reject more
    /// candidates as duplicates.
    pub fn similarity_shift(self) -> f64 {
        match self {
            Aggressiveness::Minimal => -0.1,
            Aggressiveness::Balanced => 0.0,
            Aggressiveness::Aggressive => 0.1,
        }
    }

    /// Apply the tier's shift to a validated threshold. A shifted value
    /// stays within 0.05..=0.95 unless the configured one was already
    /// beyond that bound, in which case it is kept as is.
    pub fn shift_threshold(self, threshold: f64) -> f64 {
        let shifted = threshold + self.similarity_shift();
        match self {
            Aggressiveness::Balanced => threshold,
            Aggressiveness::Aggressive => shifted.min(MAX_SHIFTED_THRESHOLD).max(threshold),
            Aggressiveness::Minimal => shifted.max(MIN_SHIFTED_THRESHOLD).min(threshold),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CoachingConfig {
    #[serde(default = "default_analysis_interval_secs")]
    pub analysis_interval_secs: u64,
    #[serde(default = "default_stage_interval_secs")]
    pub stage_interval_secs: u64,
    #[serde(default = "default_min_nudge_interval_secs")]
    pub min_nudge_interval_secs: u64,
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,
    #[serde(default = "default_suggestion_history_size")]
    pub suggestion_history_size: usize,
    #[serde(default = "default_dedup_lookback")]
    pub dedup_lookback: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_min_segments_for_analysis")]
    pub min_segments_for_analysis: usize,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub reasoning_timeout_secs: u64,
    #[serde(default)]
    pub aggressiveness: Aggressiveness,
    #[serde(default)]
    pub custom_filler_words: Vec<String>,
}

fn default_analysis_interval_secs() -> u64 {
    60
}

fn default_stage_interval_secs() -> u64 {
    30
}

fn default_min_nudge_interval_secs() -> u64 {
    60
}

fn default_context_window_size() -> usize {
    10
}

fn default_suggestion_history_size() -> usize {
    20
}

fn default_dedup_lookback() -> usize {
    3
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_min_segments_for_analysis() -> usize {
    3
}

fn default_reasoning_timeout_secs() -> u64 {
    20
}

impl Default for CoachingConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: default_analysis_interval_secs(),
            stage_interval_secs: default_stage_interval_secs(),
            min_nudge_interval_secs: default_min_nudge_interval_secs(),
            context_window_size: default_context_window_size(),
            suggestion_history_size: default_suggestion_history_size(),
            dedup_lookback: default_dedup_lookback(),
            similarity_threshold: default_similarity_threshold(),
            min_segments_for_analysis: default_min_segments_for_analysis(),
            reasoning_timeout_secs: default_reasoning_timeout_secs(),
            aggressiveness: Aggressiveness::default(),
            custom_filler_words: Vec::new(),
        }
    }
}

impl CoachingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("analysis_interval_secs", self.analysis_interval_secs),
            ("stage_interval_secs", self.stage_interval_secs),
            ("min_nudge_interval_secs", self.min_nudge_interval_secs),
            ("reasoning_timeout_secs", self.reasoning_timeout_secs),
        ];
        if let Some(&(field, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::InvalidInterval { field });
        }

        let sizes = [
            ("context_window_size", self.context_window_size),
            ("suggestion_history_size", self.suggestion_history_size),
            ("dedup_lookback", self.dedup_lookback),
        ];
        if let Some(&(field, value)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(ConfigError::InvalidSize { field, value });
        }

        if self.dedup_lookback > self.suggestion_history_size {
            return Err(ConfigError::LookbackExceedsHistory {
                lookback: self.dedup_lookback,
                history: self.suggestion_history_size,
            });
        }

        if self.min_segments_for_analysis > self.context_window_size {
            return Err(ConfigError::MinSegmentsExceedWindow {
                min_segments: self.min_segments_for_analysis,
                window: self.context_window_size,
            });
        }

        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }

        Ok(())
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        info!("Loaded coaching config from {}", path.display());
        Ok(config)
    }

    /// Resolve the aggressiveness tier into concrete values.
    pub fn effective(&self) -> EffectiveConfig {
        let factor = self.aggressiveness.interval_factor();
        let scale = |secs: u64| {
            let scaled = (secs as f64 * factor).round() as u64;
            Duration::from_secs(scaled.max(1))
        };

        let similarity_threshold = self.aggressiveness.shift_threshold(self.similarity_threshold);

        EffectiveConfig {
            analysis_interval: scale(self.analysis_interval_secs),
            stage_interval: scale(self.stage_interval_secs),
            min_nudge_interval: scale(self.min_nudge_interval_secs),
            context_window_size: self.context_window_size,
            suggestion_history_size: self.suggestion_history_size,
            dedup_lookback: self.dedup_lookback,
            similarity_threshold,
            min_segments_for_analysis: self.min_segments_for_analysis,
            reasoning_timeout: Duration::from_secs(self.reasoning_timeout_secs),
        }
    }
}

/// Config with the aggressiveness tier applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub analysis_interval: Duration,
    pub stage_interval: Duration,
    pub min_nudge_interval: Duration,
    pub context_window_size: usize,
    pub suggestion_history_size: usize,
    pub dedup_lookback: usize,
    pub similarity_threshold: f64,
    pub min_segments_for_analysis: usize,
    pub reasoning_timeout: Duration,
}

impl EffectiveConfig {
    /// Tick period for a scheduled role. On-demand roles fall back to the
    /// analysis interval.
    pub fn interval_for(&self, role: Role) -> Duration {
        match role {
            Role::StageTracker => self.stage_interval,
            Role::NudgeGenerator | Role::QuestionSuggester => self.analysis_interval,
        }
    }

    pub fn throttle_settings(&self) -> ThrottleSettings {
        ThrottleSettings {
            min_interval: ChronoDuration::from_std(self.min_nudge_interval)
                .unwrap_or_else(|_| ChronoDuration::seconds(60)),
            similarity_threshold: self.similarity_threshold,
            dedup_lookback: self.dedup_lookback,
        }
    }
}

/// Shared, live-swappable configuration. Readers take a fresh copy on every
/// tick, so updates apply from the next tick on.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<CoachingConfig>>,
}

impl ConfigHandle {
    pub fn new(config: CoachingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    pub fn get(&self) -> CoachingConfig {
        read(&self.inner).clone()
    }

    pub fn effective(&self) -> EffectiveConfig {
        read(&self.inner).effective()
    }

    /// Replace the config. Invalid configs are rejected and the current one kept.
    pub fn update(&self, config: CoachingConfig) -> Result<(), ConfigError> {
        if let Err(e) = config.validate() {
            warn!("Rejected config update: {}", e);
            return Err(e);
        }

        *write(&self.inner) = config;
        info!("Coaching config updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoachingConfig::default();
        assert!(config.validate().is_ok());

        let effective = config.effective();
        assert_eq!(effective.analysis_interval, Duration::from_secs(60));
        assert_eq!(effective.min_nudge_interval, Duration::from_secs(60));
        assert_eq!(effective.similarity_threshold, 0.7);
    }

    #[test]
    fn test_zero_interval_rejected_and_previous_kept() {
        let handle = ConfigHandle::default();
        let bad = CoachingConfig {
            analysis_interval_secs: 0,
            ..CoachingConfig::default()
        };

        let err = handle.update(bad).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidInterval {
                field: "analysis_interval_secs"
            }
        ));
        assert_eq!(handle.get(), CoachingConfig::default());
    }

    #[test]
    fn test_other_validation_errors() {
        let too_long_lookback = CoachingConfig {
            dedup_lookback: 30,
            ..CoachingConfig::default()
        };
        assert!(matches!(
            too_long_lookback.validate(),
            Err(ConfigError::LookbackExceedsHistory { .. })
        ));

        let bad_threshold = CoachingConfig {
            similarity_threshold: 1.5,
            ..CoachingConfig::default()
        };
        assert!(matches!(
            bad_threshold.validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));

        let empty_window = CoachingConfig {
            context_window_size: 0,
            ..CoachingConfig::default()
        };
        assert!(matches!(
            empty_window.validate(),
            Err(ConfigError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_aggressiveness_scales_defaults() {
        let aggressive = CoachingConfig {
            aggressiveness: Aggressiveness::Aggressive,
            ..CoachingConfig::default()
        }
        .effective();
        assert_eq!(aggressive.analysis_interval, Duration::from_secs(30));
        assert_eq!(aggressive.stage_interval, Duration::from_secs(15));
        assert!((aggressive.similarity_threshold - 0.8).abs() < 1e-9);

        let minimal = CoachingConfig {
            aggressiveness: Aggressiveness::Minimal,
            min_nudge_interval_secs: 1,
            ..CoachingConfig::default()
        }
        .effective();
        assert_eq!(minimal.analysis_interval, Duration::from_secs(120));
        assert_eq!(minimal.min_nudge_interval, Duration::from_secs(2));
        assert!((minimal.similarity_threshold - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_shift_bounds() {
        let with = |aggressiveness, similarity_threshold| {
            CoachingConfig {
                aggressiveness,
                similarity_threshold,
                ..CoachingConfig::default()
            }
            .effective()
            .similarity_threshold
        };

        // Balanced keeps any valid threshold, including the edges
        assert_eq!(with(Aggressiveness::Balanced, 1.0), 1.0);
        assert_eq!(with(Aggressiveness::Balanced, 0.01), 0.01);

        assert_eq!(with(Aggressiveness::Aggressive, 0.9), 0.95);
        assert_eq!(with(Aggressiveness::Aggressive, 1.0), 1.0);

        assert_eq!(with(Aggressiveness::Minimal, 0.1), 0.05);
        assert_eq!(with(Aggressiveness::Minimal, 0.03), 0.03);
        assert!(with(Aggressiveness::Minimal, 0.01) > 0.0);
    }

    #[test]
    fn test_min_segments_must_fit_the_window() {
        let config = CoachingConfig {
            context_window_size: 4,
            min_segments_for_analysis: 5,
            ..CoachingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MinSegmentsExceedWindow {
                min_segments: 5,
                window: 4
            })
        ));

        let at_capacity = CoachingConfig {
            min_segments_for_analysis: 4,
            ..config
        };
        assert!(at_capacity.validate().is_ok());
    }

    #[test]
    fn test_interval_never_scales_to_zero() {
        let config = CoachingConfig {
            aggressiveness: Aggressiveness::Aggressive,
            stage_interval_secs: 1,
            ..CoachingConfig::default()
        };
        assert_eq!(config.effective().stage_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"analysis_interval_secs": 45, "aggressiveness": "aggressive"}}"#
        )
        .unwrap();

        let config = CoachingConfig::load(file.path()).unwrap();
        assert_eq!(config.analysis_interval_secs, 45);
        assert_eq!(config.aggressiveness, Aggressiveness::Aggressive);
        assert_eq!(config.context_window_size, 10);
    }

    #[test]
    fn test_load_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert_eq!(
            CoachingConfig::load(&missing).unwrap(),
            CoachingConfig::default()
        );

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            CoachingConfig::load(&broken),
            Err(ConfigError::Parse { .. })
        ));

        let invalid = dir.path().join("invalid.json");
        std::fs::write(&invalid, r#"{"min_nudge_interval_secs": 0}"#).unwrap();
        assert!(matches!(
            CoachingConfig::load(&invalid),
            Err(ConfigError::InvalidInterval { .. })
        ));
    }
}
