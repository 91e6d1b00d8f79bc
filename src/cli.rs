use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "live-coach", about = "Live Coach - replay a transcript through the coaching engine")]
pub struct CliArgs {
    /// Transcript to replay, one JSON segment per line
    #[arg(long)]
    pub transcript: PathBuf,

    /// Coaching config (JSON). Missing file means defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Session mode passed to the reasoning service
    #[arg(long, default_value = "coaching")]
    pub mode: String,

    /// OpenAI-compatible base URL for reasoning calls
    #[arg(long)]
    pub base_url: Option<String>,

    /// Model name for reasoning calls
    #[arg(long)]
    pub model: Option<String>,

    /// Environment variable holding the API key
    #[arg(long, default_value = "OPENAI_API_KEY")]
    pub api_key_env: String,

    /// Replay at the pace of the segment timestamps
    #[arg(long)]
    pub realtime: bool,

    /// Enable debug mode with verbose logging
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["live-coach", "--transcript", "call.jsonl"]).unwrap();
        assert_eq!(args.transcript, PathBuf::from("call.jsonl"));
        assert_eq!(args.mode, "coaching");
        assert_eq!(args.api_key_env, "OPENAI_API_KEY");
        assert!(args.config.is_none());
        assert!(!args.realtime);
    }

    #[test]
    fn test_transcript_is_required() {
        assert!(CliArgs::try_parse_from(["live-coach", "--mode", "sales"]).is_err());
    }

    #[test]
    fn test_all_flags() {
        let args = CliArgs::try_parse_from([
            "live-coach",
            "--transcript",
            "call.jsonl",
            "--config",
            "coach.json",
            "--mode",
            "sales",
            "--base-url",
            "http://localhost:11434/v1",
            "--model",
            "llama3",
            "--realtime",
            "--debug",
        ])
        .unwrap();
        assert_eq!(args.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(args.model.as_deref(), Some("llama3"));
        assert!(args.realtime && args.debug);
    }
}
