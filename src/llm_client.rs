use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::ReasoningError;
use crate::reasoning::{
    parse_reply, parse_text, AnalysisRequest, ConversationStage, ReasoningReply,
    ReasoningService,
};
use crate::utils::trim_to_last_words;

// Environment variable name for LLM base URL override
const LLM_BASE_URL_ENV: &str = "LIVE_COACH_LLM_BASE_URL";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Client-side request timeout. The engine applies its own, usually shorter,
/// timeout on top of this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on transcript words sent per request
const MAX_CONTEXT_WORDS: usize = 600;

const NUDGE_PROMPT: &str = "You are a discreet real-time conversation coach. \
The user is \"Me\" in the transcript below. Session mode: {mode}.\n\
Current metrics: {metrics}\n\n\
Transcript:\n{context}\n\n\
If there is one short, concrete thing the user should do right now, reply with JSON only: \
{\"type\": \"urgent\" | \"important\" | \"helpful\" | \"info\", \"message\": \"<under 20 words>\"}. \
If nothing is worth saying, reply with: none";

const STAGE_PROMPT: &str = "Classify the current phase of this {mode} conversation using the GROW model. \
Reply with exactly one of: goal, reality, options, next steps, none.\n\n\
Transcript:\n{context}";

const QUESTION_PROMPT: &str = "You are helping \"Me\" run a {mode} conversation that is currently in the '{stage}' phase.\n\n\
Transcript:\n{context}\n\n\
Suggest one open-ended question the user could ask next. \
Reply with the question only, or none if no question fits.";

/// Where to send reasoning calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Sent as a bearer token, or as `x-api-key` for Anthropic endpoints
    #[serde(default)]
    pub api_key: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
        }
    }
}

impl ProviderConfig {
    fn is_anthropic(&self) -> bool {
        self.base_url.contains("anthropic.com")
    }
}

/// Get the effective base URL for a provider.
/// Checks the environment variable first, on every call, so runtime changes
/// are picked up.
pub fn get_effective_base_url(provider: &ProviderConfig) -> String {
    if let Ok(env_url) = env::var(LLM_BASE_URL_ENV) {
        let trimmed = env_url.trim();
        if !trimmed.is_empty() {
            debug!(
                "Using base URL from environment variable {}: {}",
                LLM_BASE_URL_ENV, trimmed
            );
            return trimmed.trim_end_matches('/').to_string();
        }
    }
    provider.base_url.trim_end_matches('/').to_string()
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Build headers for API requests based on provider type
fn build_headers(provider: &ProviderConfig) -> Result<HeaderMap, ReasoningError> {
    let mut headers = HeaderMap::new();

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static("live-coach/0.1"));

    let api_key = provider.api_key.trim();
    if !api_key.is_empty() {
        if provider.is_anthropic() {
            headers.insert(
                "x-api-key",
                HeaderValue::from_str(api_key).map_err(|e| {
                    ReasoningError::Message(format!("Invalid API key header value: {}", e))
                })?,
            );
            headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        } else {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
                    ReasoningError::Message(format!("Invalid authorization header value: {}", e))
                })?,
            );
        }
    }

    Ok(headers)
}

/// Keep the most recent transcript lines that fit in `max_words`. A single
/// oversized line keeps only its tail.
fn cap_context(context: &str, max_words: usize) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut budget = max_words;

    for line in context.lines().rev() {
        let words = line.split_whitespace().count();
        if words > budget {
            if kept.is_empty() {
                return trim_to_last_words(line, max_words);
            }
            break;
        }
        budget -= words;
        kept.push(line);
    }

    kept.reverse();
    kept.join("\n")
}

fn render(template: &str, request: &AnalysisRequest) -> String {
    let metrics = serde_json::Value::Object(request.metrics.clone()).to_string();
    let mode = if request.session_mode.trim().is_empty() {
        "general"
    } else {
        request.session_mode.trim()
    };
    template
        .replace("{mode}", mode)
        .replace("{metrics}", &metrics)
        .replace("{context}", &cap_context(&request.context, MAX_CONTEXT_WORDS))
}

/// Reasoning over any OpenAI-compatible chat completions endpoint.
pub struct OpenAiReasoningService {
    provider: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiReasoningService {
    pub fn new(provider: ProviderConfig) -> Result<Self, ReasoningError> {
        let client = reqwest::Client::builder()
            .default_headers(build_headers(&provider)?)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { provider, client })
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Send a single-message chat completion.
    /// Returns Ok(None) if the response has no content.
    async fn send_chat_completion(&self, prompt: String) -> Result<Option<String>, ReasoningError> {
        // Checks the env override on each call
        let base_url = get_effective_base_url(&self.provider);
        let url = format!("{}/chat/completions", base_url);

        debug!("Sending chat completion request to: {}", url);

        let request_body = ChatCompletionRequest {
            model: self.provider.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let response = self.client.post(&url).json(&request_body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(ReasoningError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::Parse(e.to_string()))?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

#[async_trait]
impl ReasoningService for OpenAiReasoningService {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Option<ReasoningReply>, ReasoningError> {
        let raw = self.send_chat_completion(render(NUDGE_PROMPT, request)).await?;
        Ok(raw.as_deref().and_then(parse_reply))
    }

    async fn track_stage(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Option<String>, ReasoningError> {
        let raw = self.send_chat_completion(render(STAGE_PROMPT, request)).await?;
        Ok(raw.as_deref().and_then(parse_text))
    }

    async fn suggest_question(
        &self,
        request: &AnalysisRequest,
        stage: ConversationStage,
    ) -> Result<Option<String>, ReasoningError> {
        let prompt = render(QUESTION_PROMPT, request).replace("{stage}", stage.label());
        let raw = self.send_chat_completion(prompt).await?;
        Ok(raw.as_deref().and_then(parse_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_effective_base_url() {
        let provider = ProviderConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..ProviderConfig::default()
        };

        std::env::remove_var(LLM_BASE_URL_ENV);
        assert_eq!(get_effective_base_url(&provider), "http://localhost:11434/v1");

        std::env::set_var(LLM_BASE_URL_ENV, "http://custom-server:8080/v1/");
        assert_eq!(get_effective_base_url(&provider), "http://custom-server:8080/v1");

        // Blank override falls back to the configured URL
        std::env::set_var(LLM_BASE_URL_ENV, "   ");
        assert_eq!(get_effective_base_url(&provider), "http://localhost:11434/v1");

        std::env::remove_var(LLM_BASE_URL_ENV);
    }

    #[test]
    fn test_build_headers_by_provider() {
        let openai = ProviderConfig {
            api_key: "sk-test".to_string(),
            ..ProviderConfig::default()
        };
        let headers = build_headers(&openai).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert!(headers.get("x-api-key").is_none());

        let anthropic = ProviderConfig {
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-haiku".to_string(),
            api_key: "ak-test".to_string(),
        };
        let headers = build_headers(&anthropic).unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "ak-test");
        assert!(headers.get(AUTHORIZATION).is_none());

        let keyless = build_headers(&ProviderConfig::default()).unwrap();
        assert!(keyless.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_cap_context_keeps_latest_lines() {
        let context = "Me: one two three\nThem: four five\nMe: six";
        assert_eq!(cap_context(context, 10), context);
        assert_eq!(cap_context(context, 5), "Them: four five\nMe: six");
        assert_eq!(cap_context("Me: a b c d e", 3), "c d e");
    }

    #[test]
    fn test_render_fills_placeholders() {
        let mut metrics = serde_json::Map::new();
        metrics.insert("talk_ratio".to_string(), serde_json::json!(85));
        let request = AnalysisRequest {
            context: "Me: hello\nThem: hi".to_string(),
            session_mode: "sales".to_string(),
            metrics,
        };

        let prompt = render(NUDGE_PROMPT, &request);
        assert!(prompt.contains("Session mode: sales."));
        assert!(prompt.contains("\"talk_ratio\":85"));
        assert!(prompt.contains("Me: hello\nThem: hi"));
        assert!(!prompt.contains("{context}"));

        let question = render(QUESTION_PROMPT, &request).replace("{stage}", "options");
        assert!(question.contains("'options' phase"));
    }
}
