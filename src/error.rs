use std::path::PathBuf;
use thiserror::Error;

/// Rejected configuration. The previously active configuration stays in place.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    InvalidInterval { field: &'static str },

    #[error("{field} must be at least 1 (got {value})")]
    InvalidSize { field: &'static str, value: usize },

    #[error("dedup_lookback ({lookback}) cannot exceed suggestion_history_size ({history})")]
    LookbackExceedsHistory { lookback: usize, history: usize },

    #[error(
        "min_segments_for_analysis ({min_segments}) cannot exceed context_window_size ({window})"
    )]
    MinSegmentsExceedWindow { min_segments: usize, window: usize },

    #[error("similarity_threshold must be within (0, 1] (got {0})")]
    InvalidThreshold(f64),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure at the reasoning-service boundary. The engine never surfaces these;
/// every variant is treated as "nothing to say this tick".
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse API response: {0}")]
    Parse(String),

    #[error("{0}")]
    Message(String),
}
