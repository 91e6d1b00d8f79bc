use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

use live_coach::cli::CliArgs;
use live_coach::clock::{Clock, ManualClock, SystemClock};
use live_coach::config::CoachingConfig;
use live_coach::engine::CoachingEngine;
use live_coach::error::ReasoningError;
use live_coach::filler_detector::{FillerDetector, FillerWordAnalysis};
use live_coach::llm_client::{OpenAiReasoningService, ProviderConfig};
use live_coach::reasoning::{AnalysisRequest, ReasoningReply, ReasoningService};
use live_coach::replay::{load_transcript, pacing_gap};
use live_coach::suggestion::{Suggestion, SuggestionSource};
use live_coach::transcript::Speaker;

/// Stand-in when no API key is configured: only the immediate rules fire.
struct Offline;

#[async_trait]
impl ReasoningService for Offline {
    async fn analyze(
        &self,
        _request: &AnalysisRequest,
    ) -> Result<Option<ReasoningReply>, ReasoningError> {
        Ok(None)
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn reasoning_service(args: &CliArgs) -> Result<(Arc<dyn ReasoningService>, bool)> {
    let api_key = std::env::var(&args.api_key_env).unwrap_or_default();
    if api_key.trim().is_empty() && args.base_url.is_none() {
        warn!(
            "{} is not set and no --base-url given, running without reasoning calls",
            args.api_key_env
        );
        return Ok((Arc::new(Offline), false));
    }

    let defaults = ProviderConfig::default();
    let provider = ProviderConfig {
        base_url: args.base_url.clone().unwrap_or(defaults.base_url),
        model: args.model.clone().unwrap_or(defaults.model),
        api_key,
    };
    info!("Reasoning via {} ({})", provider.base_url, provider.model);
    let service = OpenAiReasoningService::new(provider).context("Failed to build LLM client")?;
    Ok((Arc::new(service), true))
}

fn print_suggestion(suggestion: &Suggestion) {
    println!(
        "[{}] {:<13} {} ({})",
        suggestion.created_at.format("%H:%M:%S"),
        suggestion.kind,
        suggestion.message,
        match suggestion.source {
            SuggestionSource::Immediate => "rule".to_string(),
            SuggestionSource::Role(role) => role.to_string(),
        }
    );
}

fn print_fillers(analysis: &FillerWordAnalysis) {
    println!(
        "  fillers: {} of {} words ({:.1}%)",
        analysis.filler_count, analysis.total_words, analysis.filler_percentage
    );
    for entry in analysis.filler_breakdown.iter().take(5) {
        println!("    {:<10} {}", entry.word, entry.count);
    }
}

fn drain(rx: &mut broadcast::Receiver<Suggestion>) {
    loop {
        match rx.try_recv() {
            Ok(suggestion) => print_suggestion(&suggestion),
            Err(TryRecvError::Lagged(skipped)) => warn!("Missed {} suggestions", skipped),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.debug);

    let config = match &args.config {
        Some(path) => CoachingConfig::load(path)?,
        None => CoachingConfig::default(),
    };

    let segments = load_transcript(&args.transcript)
        .with_context(|| format!("Failed to read transcript {}", args.transcript.display()))?;
    info!("Replaying {} segments", segments.len());

    let (reasoning, online) = reasoning_service(&args)?;
    let fillers = FillerDetector::with_custom(&config.custom_filler_words);

    // Fast replay follows the segment timestamps instead of the wall clock
    let replay_clock = Arc::new(ManualClock::default());
    let clock: Arc<dyn Clock> = if args.realtime {
        Arc::new(SystemClock)
    } else {
        if let Some(first) = segments.first() {
            replay_clock.set(first.timestamp);
        }
        replay_clock.clone()
    };

    let engine = CoachingEngine::with_clock(config, reasoning, clock)?;
    let mut delivered = engine.subscribe();
    engine
        .start_session(&args.mode)
        .context("Session already active")?;

    let mut previous = None;
    let mut my_text = Vec::new();
    for segment in segments {
        if args.realtime {
            tokio::time::sleep(pacing_gap(previous, segment.timestamp)).await;
        } else {
            replay_clock.set(segment.timestamp);
        }
        previous = Some(segment.timestamp);
        if segment.is_final && segment.speaker == Speaker::Me {
            my_text.push(segment.text.clone());
        }

        engine.ingest(segment);
        drain(&mut delivered);
    }

    if online {
        if let Some(question) = engine.suggest_question().await {
            println!("\nSuggested next question: {}", question);
        }
    }

    let metrics = engine.metrics();
    let duration = engine.session_duration();
    let stage = engine.stage();
    engine.stop();
    drain(&mut delivered);

    println!("\nSession summary");
    println!("  duration: {}s", duration.num_seconds());
    println!("  stage: {}", stage);
    println!("  quality score: {}", metrics.quality_score());
    print_fillers(&fillers.analyze(&my_text.join(" ")));
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    Ok(())
}
