use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use crate::error::Result;

/// One parsed SubRip caption entry.
///
/// Blocks are ephemeral pipeline data; the database only ever sees whole
/// subtitle files.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleBlock {
    /// 1-based sequence number as it appeared in the source file
    pub index: u32,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    /// Caption text, possibly multi-line
    pub text: String,
}

/// Parse SRT content into blocks.
///
/// Malformed blocks (non-integer index, missing timestamp separator,
/// unparsable times, end before start) are logged and skipped; they never
/// abort the surrounding job.
pub fn parse_srt(content: &str) -> Vec<SubtitleBlock> {
    let normalized = content.replace("\r\n", "\n");

    normalized
        .trim()
        .split("\n\n")
        .filter(|raw| !raw.trim().is_empty())
        .enumerate()
        .filter_map(|(position, raw)| parse_block(raw, position + 1))
        .collect()
}

fn parse_block(raw: &str, position: usize) -> Option<SubtitleBlock> {
    let lines: Vec<&str> = raw.trim().lines().collect();
    if lines.len() < 3 {
        warn!("Skipping subtitle block #{}: too few lines", position);
        return None;
    }

    let index: u32 = match lines[0].trim().parse() {
        Ok(index) => index,
        Err(_) => {
            warn!(
                "Skipping subtitle block #{}: invalid index '{}'",
                position, lines[0]
            );
            return None;
        }
    };

    let Some((start_raw, end_raw)) = lines[1].split_once(" --> ") else {
        warn!(
            "Skipping subtitle block #{}: invalid timestamp line '{}'",
            position, lines[1]
        );
        return None;
    };

    let (Some(start_time), Some(end_time)) =
        (parse_srt_time(start_raw.trim()), parse_srt_time(end_raw.trim()))
    else {
        warn!(
            "Skipping subtitle block #{}: unparsable timestamps '{}'",
            position, lines[1]
        );
        return None;
    };

    if end_time < start_time {
        warn!(
            "Skipping subtitle block #{}: end time precedes start time",
            position
        );
        return None;
    }

    Some(SubtitleBlock {
        index,
        start_time,
        end_time,
        text: lines[2..].join("\n"),
    })
}

/// Parse an SRT time value (`HH:MM:SS,mmm`, period accepted for the
/// millisecond separator) into seconds.
pub fn parse_srt_time(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.trim().parse().ok()?;
    let minutes: f64 = parts.next()?.trim().parse().ok()?;
    let seconds: f64 = parts.next()?.trim().replace(',', ".").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds * 1000.0) as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render blocks back to SRT text, preserving source indices.
pub fn render_srt(blocks: &[SubtitleBlock]) -> String {
    let mut content = String::new();

    for block in blocks {
        content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            block.index,
            format_srt_time(block.start_time),
            format_srt_time(block.end_time),
            block.text.trim_end()
        ));
    }

    content
}

/// Read and parse an SRT file.
pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<Vec<SubtitleBlock>> {
    let content = fs::read_to_string(path.as_ref()).await?;
    Ok(parse_srt(&content))
}

/// Write blocks as an SRT file.
pub async fn write_srt<P: AsRef<Path>>(blocks: &[SubtitleBlock], output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    fs::write(output_path, render_srt(blocks)).await?;
    info!("Subtitle file written: {}", output_path.display());
    Ok(())
}
