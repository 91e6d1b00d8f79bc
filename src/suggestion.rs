use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scheduler::Role;

/// Urgency tag of a nudge.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Urgent,
    Important,
    Helpful,
    Informational,
}

impl SuggestionKind {
    pub fn priority(self) -> u8 {
        match self {
            SuggestionKind::Urgent => 3,
            SuggestionKind::Important => 2,
            SuggestionKind::Helpful => 1,
            SuggestionKind::Informational => 0,
        }
    }

    /// Map the kind declared by a reasoning reply. Anything unrecognized,
    /// including a missing kind, is treated as helpful.
    pub fn from_reply_kind(kind: Option<&str>) -> Self {
        match kind.map(|k| k.trim().to_lowercase()).as_deref() {
            Some("urgent") => SuggestionKind::Urgent,
            Some("important") => SuggestionKind::Important,
            Some("informational") | Some("info") => SuggestionKind::Informational,
            _ => SuggestionKind::Helpful,
        }
    }
}

impl fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SuggestionKind::Urgent => "urgent",
            SuggestionKind::Important => "important",
            SuggestionKind::Helpful => "helpful",
            SuggestionKind::Informational => "informational",
        };
        f.pad(label)
    }
}

/// Where a suggestion came from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "type", content = "role", rename_all = "snake_case")]
pub enum SuggestionSource {
    /// Threshold rules evaluated on fresh metrics
    Immediate,
    /// A scheduled or on-demand analysis role
    Role(Role),
}

/// A coaching nudge. Never mutated after creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub message: String,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub source: SuggestionSource,
}

impl Suggestion {
    pub fn new(
        kind: SuggestionKind,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
        source: SuggestionSource,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            priority: kind.priority(),
            created_at,
            source,
        }
    }
}
