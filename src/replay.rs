//! Transcript replay input: one JSON `TranscriptSegment` per line.

use chrono::{DateTime, Utc};
use log::warn;
use std::path::Path;
use std::time::Duration;

use crate::transcript::TranscriptSegment;

/// Parse JSONL transcript text. Blank lines are skipped; malformed lines are
/// logged and skipped.
pub fn parse_transcript(raw: &str) -> Vec<TranscriptSegment> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str(line) {
            Ok(segment) => Some(segment),
            Err(e) => {
                warn!("Skipping transcript line {}: {}", index + 1, e);
                None
            }
        })
        .collect()
}

pub fn load_transcript(path: &Path) -> std::io::Result<Vec<TranscriptSegment>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(parse_transcript(&raw))
}

/// Real-time gap between two consecutive segments. Out-of-order timestamps
/// give no gap.
pub fn pacing_gap(previous: Option<DateTime<Utc>>, next: DateTime<Utc>) -> Duration {
    previous
        .and_then(|prev| (next - prev).to_std().ok())
        .unwrap_or(Duration::ZERO)
}
