//! Real-time conversation coaching.
//!
//! Feed transcript segments into a [`CoachingEngine`]; it keeps a bounded
//! window, derives live metrics, fires rule-based nudges immediately and runs
//! periodic reasoning passes, throttling everything it delivers.

pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod filler_detector;
pub mod lifecycle;
pub mod llm_client;
pub mod metrics;
pub mod reasoning;
pub mod replay;
pub mod scheduler;
pub mod similarity;
pub mod suggestion;
pub mod throttle;
pub mod transcript;
pub mod triggers;
mod utils;

pub use config::CoachingConfig;
pub use engine::CoachingEngine;
pub use error::{ConfigError, ReasoningError};
pub use lifecycle::SessionState;
pub use metrics::SessionMetrics;
pub use reasoning::{ConversationStage, ReasoningService};
pub use suggestion::{Suggestion, SuggestionKind};
pub use transcript::{Speaker, TranscriptSegment};
