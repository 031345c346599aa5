//! Extraction of the most recent timestamped entry from OCR'd log text.
//!
//! An entry is a `HH:MM` token (hour 0-23, minute 0-59, one or two digits
//! each) optionally followed by a separator, then a message running to the
//! next timestamp token or the end of text. Messages may wrap across lines
//! in the OCR output; [`normalize_ocr_text`] collapses those line breaks
//! before tokenization.
//!
//! Returning `None` is a normal outcome, not a fault: under poor OCR
//! conditions whole polls routinely produce nothing parseable.

use chrono::{DateTime, Local, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::normalize::normalize_ocr_text;

/// Entries computed to be older than this are treated as stale OCR
/// artifacts rather than genuine recency signals.
pub const MAX_ENTRY_AGE_MINUTES: f64 = 120.0;

/// Messages shorter than this after trimming are OCR noise.
const MIN_MESSAGE_CHARS: usize = 2;

/// `HH:MM` with tolerant spacing around the colon. ASCII word boundaries so
/// a digit butting against a garbled non-ASCII glyph still terminates the
/// token.
static TIME_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u:\b)([01]?\d|2[0-3])\s*:\s*([0-5]?\d)(?-u:\b)").expect("valid regex")
});

/// The single most recent entry parsed out of one OCR pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub hour: u32,
    pub minute: u32,
    pub message: String,
    pub age_minutes: f64,
}

impl LogEntry {
    /// Canonical one-line rendering, used for dedup and logging.
    pub fn line(&self) -> String {
        format!("{:02}:{:02} | {}", self.hour, self.minute, self.message)
    }
}

/// Why a candidate match was kept or discarded. Surfaced by the `diagnose`
/// tool and the debug trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    MessageTooShort,
    TooOld,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub hour: u32,
    pub minute: u32,
    pub message: String,
    pub age_minutes: f64,
    pub disposition: Disposition,
}

/// Enumerate every timestamp-shaped match in the text with its disposition.
pub fn scan_entries(text: &str) -> Vec<Candidate> {
    scan_entries_at(text, Local::now())
}

pub fn scan_entries_at(text: &str, now: DateTime<Local>) -> Vec<Candidate> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = normalize_ocr_text(text);

    // Token positions first; each message is the slice up to the next token.
    let tokens: Vec<(usize, usize, u32, u32)> = TIME_TOKEN_RE
        .captures_iter(&text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
            let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
            Some((whole.start(), whole.end(), hour, minute))
        })
        .collect();

    let mut candidates = Vec::with_capacity(tokens.len());
    for (idx, &(_, end, hour, minute)) in tokens.iter().enumerate() {
        let msg_end = tokens.get(idx + 1).map(|t| t.0).unwrap_or(text.len());
        let message = text[end..msg_end]
            .trim_start_matches(|c: char| c == '|' || c.is_whitespace())
            .trim()
            .to_string();

        let age_minutes = minutes_since_at(hour, minute, now);
        let disposition = if message.chars().count() < MIN_MESSAGE_CHARS {
            Disposition::MessageTooShort
        } else if age_minutes > MAX_ENTRY_AGE_MINUTES {
            Disposition::TooOld
        } else {
            Disposition::Accepted
        };

        debug!(
            hour,
            minute,
            age_minutes = format_args!("{age_minutes:.1}"),
            ?disposition,
            message = %message,
            "entry candidate"
        );
        candidates.push(Candidate {
            hour,
            minute,
            message,
            age_minutes,
            disposition,
        });
    }
    candidates
}

/// Find the most recent entry in raw OCR text, or `None` when nothing
/// survives filtering.
pub fn find_latest_entry(text: &str) -> Option<LogEntry> {
    find_latest_entry_at(text, Local::now())
}

pub fn find_latest_entry_at(text: &str, now: DateTime<Local>) -> Option<LogEntry> {
    let mut best: Option<LogEntry> = None;
    for candidate in scan_entries_at(text, now) {
        if candidate.disposition != Disposition::Accepted {
            continue;
        }
        // Strict `<` keeps the first occurrence on ties.
        if best
            .as_ref()
            .map_or(true, |b| candidate.age_minutes < b.age_minutes)
        {
            best = Some(LogEntry {
                hour: candidate.hour,
                minute: candidate.minute,
                message: candidate.message,
                age_minutes: candidate.age_minutes,
            });
        }
    }
    best
}

/// Minutes since the most recent occurrence of this wall-clock time at or
/// before `now`. A time-of-day in the future is assumed to refer to
/// yesterday.
pub fn minutes_since(hour: u32, minute: u32) -> f64 {
    minutes_since_at(hour, minute, Local::now())
}

pub(crate) fn minutes_since_at(hour: u32, minute: u32, now: DateTime<Local>) -> f64 {
    let now_secs = now.time().num_seconds_from_midnight() as f64
        + f64::from(now.time().nanosecond()) / 1e9;
    let entry_secs = f64::from(hour * 3600 + minute * 60);
    let mut diff = now_secs - entry_secs;
    if diff < 0.0 {
        diff += 86_400.0;
    }
    diff / 60.0
}
