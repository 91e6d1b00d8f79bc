//! Boundary to the external reasoning service.
//!
//! The engine only sees this trait. Every error, timeout or malformed reply
//! coming back through it is treated as "nothing to say".

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ReasoningError;

/// Everything a reasoning call gets to look at.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    /// Speaker-labelled, newline-joined transcript
    pub context: String,
    /// Free-form session mode, e.g. "coaching" or "sales"
    pub session_mode: String,
    pub metrics: serde_json::Map<String, serde_json::Value>,
}

/// A structured nudge returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningReply {
    /// Declared urgency; missing or unknown kinds become helpful
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Coarse conversational phase (GROW-style).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    #[default]
    Unknown,
    Goal,
    Reality,
    Options,
    NextSteps,
}

impl ConversationStage {
    /// Lenient label parsing. Returns None for anything unrecognized.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
            .replace(['-', '_'], " ");

        match normalized.as_str() {
            "goal" | "goals" => Some(ConversationStage::Goal),
            "reality" | "current reality" => Some(ConversationStage::Reality),
            "options" | "option" => Some(ConversationStage::Options),
            "next steps" | "next step" | "will" | "way forward" => {
                Some(ConversationStage::NextSteps)
            }
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConversationStage::Unknown => "unknown",
            ConversationStage::Goal => "goal",
            ConversationStage::Reality => "reality",
            ConversationStage::Options => "options",
            ConversationStage::NextSteps => "next steps",
        }
    }
}

impl fmt::Display for ConversationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// General coaching pass. `Ok(None)` is the normal "nothing to say".
    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Option<ReasoningReply>, ReasoningError>;

    /// Classify the current conversational phase. Returns a raw label.
    async fn track_stage(
        &self,
        _request: &AnalysisRequest,
    ) -> Result<Option<String>, ReasoningError> {
        Ok(None)
    }

    /// Propose at most one question for the user to ask next.
    async fn suggest_question(
        &self,
        _request: &AnalysisRequest,
        _stage: ConversationStage,
    ) -> Result<Option<String>, ReasoningError> {
        Ok(None)
    }
}

/// Strip a surrounding markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an info string such as "json"
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Turn raw model output into a reply.
///
/// Accepts a JSON object with `type`/`kind` and `message`. The literal
/// `none`, JSON `null`, an explicit `"type": "none"`, an empty message, or
/// anything that fails to parse all mean absence.
pub fn parse_reply(raw: &str) -> Option<ReasoningReply> {
    let body = strip_code_fence(raw);
    if body.is_empty() || body.eq_ignore_ascii_case("none") || body == "null" {
        return None;
    }

    let reply: ReasoningReply = match serde_json::from_str(body) {
        Ok(reply) => reply,
        Err(e) => {
            debug!("Unparsable reasoning reply ({}): {}", e, body);
            return None;
        }
    };

    let is_none_kind = reply
        .kind
        .as_deref()
        .is_some_and(|k| k.trim().eq_ignore_ascii_case("none"));
    if is_none_kind || reply.message.trim().is_empty() {
        return None;
    }

    Some(ReasoningReply {
        kind: reply.kind,
        message: reply.message.trim().to_string(),
    })
}

/// Turn raw model output into a single line of text, e.g. a stage label or
/// a suggested question. `none` and empty output mean absence.
pub fn parse_text(raw: &str) -> Option<String> {
    let body = strip_code_fence(raw).trim_matches('"').trim();
    if body.is_empty() || body.eq_ignore_ascii_case("none") || body == "null" {
        return None;
    }
    Some(body.lines().next().unwrap_or(body).trim().to_string())
}
