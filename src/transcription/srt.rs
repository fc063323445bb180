use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{HarvestError, Result};

/// SRT (SubRip Subtitle) entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SRTEntry {
    /// Sequential number
    pub index: u32,
    /// Start timestamp
    pub start: Duration,
    /// End timestamp
    pub end: Duration,
    /// Subtitle text, lines joined with a space
    pub text: String,
}

impl SRTEntry {
    /// Create a new SRT entry
    pub fn new(index: u32, start: Duration, end: Duration, text: String) -> Self {
        Self {
            index,
            start,
            end,
            text: text.trim().to_string(),
        }
    }

    /// One-line form used by readable transcripts
    pub fn readable_line(&self) -> String {
        format!(
            "[{} --> {}] {}",
            format_duration(self.start),
            format_duration(self.end),
            self.text
        )
    }
}

impl fmt::Display for SRTEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{} --> {}\n{}\n",
            self.index,
            format_duration(self.start),
            format_duration(self.end),
            self.text
        )
    }
}

/// Parse SRT content, skipping blocks that do not carry a time range
pub fn parse_srt(content: &str) -> Vec<SRTEntry> {
    let normalized = content.replace("\r\n", "\n");
    let mut entries = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();

        let index = match lines.peek() {
            Some(first) if !first.contains("-->") => {
                let index = first.parse().unwrap_or(0);
                lines.next();
                index
            }
            _ => 0,
        };

        let Some(range) = lines.next() else { continue };
        let Some((start, end)) = range.split_once("-->") else { continue };
        let (Ok(start), Ok(end)) = (
            parse_single_timestamp(start.trim()),
            parse_single_timestamp(end.trim()),
        ) else {
            continue;
        };

        let text = lines.collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            continue;
        }

        entries.push(SRTEntry::new(index, start, end, text));
    }

    entries
}

/// Render entries as `[start --> end] text`, one per line
pub fn render_readable(entries: &[SRTEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.readable_line());
        out.push('\n');
    }
    out
}

/// Convert an SRT file into a readable transcript file
pub async fn write_readable_transcript(srt_path: &Path, output_path: &Path) -> Result<usize> {
    let content = tokio::fs::read_to_string(srt_path)
        .await
        .map_err(|e| HarvestError::storage(srt_path, e))?;
    let entries = parse_srt(&content);

    tokio::fs::write(output_path, render_readable(&entries))
        .await
        .map_err(|e| HarvestError::storage(output_path, e))?;
    Ok(entries.len())
}

/// Format duration as SRT timestamp (HH:MM:SS,mmm)
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let milliseconds = duration.subsec_millis();

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, milliseconds)
}

/// Parse a single timestamp (HH:MM:SS,mmm)
fn parse_single_timestamp(timestamp: &str) -> std::result::Result<Duration, String> {
    let (hms, millis) = timestamp
        .split_once(',')
        .or_else(|| timestamp.split_once('.'))
        .ok_or_else(|| format!("invalid timestamp `{}`", timestamp))?;

    let hms_parts: Vec<&str> = hms.split(':').collect();
    if hms_parts.len() != 3 {
        return Err(format!("invalid time `{}`", hms));
    }

    let number = |s: &str| s.parse::<u64>().map_err(|e| format!("`{}`: {}", s, e));
    let hours = number(hms_parts[0])?;
    let minutes = number(hms_parts[1])?;
    let seconds = number(hms_parts[2])?;
    let milliseconds = number(millis)?;

    hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes.checked_mul(60)?))
        .and_then(|s| s.checked_add(seconds))
        .and_then(|s| s.checked_mul(1000))
        .and_then(|ms| ms.checked_add(milliseconds))
        .map(Duration::from_millis)
        .ok_or_else(|| format!("timestamp `{}` is out of range", timestamp))
}
