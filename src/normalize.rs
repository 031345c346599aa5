//! OCR text canonicalization.
//!
//! The panel's log box is rendered with a `HH:MM | message` layout, and the
//! OCR engine reliably garbles two things: the pipe separator (read as a
//! full-width pipe, broken bar, CJK vertical stroke, capital `I` or
//! lowercase `l`) and the timestamp colon (read as a period). Everything
//! downstream parses the canonical form produced here.

use once_cell::sync::Lazy;
use regex::Regex;

/// `12.34` → `12:34` when both sides are 1-2 digit runs.
static COLON_MISREAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u:\b)(\d{1,2})\.(\d{1,2})(?-u:\b)").expect("valid regex"));

/// `08:15I msg` / `08:15 l msg` → `08:15 | msg`.
static SEPARATOR_MISREAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}:\d{1,2})\s*[Il]\s+").expect("valid regex"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Canonicalize raw OCR output before parsing. Idempotent: running it over
/// already-normalized text changes nothing.
pub fn normalize_ocr_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Pipe-like glyphs the OCR substitutes for the separator: full-width
    // pipe, broken bar, CJK vertical stroke.
    let text = text.replace(['｜', '¦', '丨'], "|");

    let text = COLON_MISREAD_RE.replace_all(&text, "$1:$2");
    let text = SEPARATOR_MISREAD_RE.replace_all(&text, "$1 | ");
    let text = WHITESPACE_RE.replace_all(&text, " ");

    text.trim().to_string()
}

/// Looser normalization for keyword matching: lowercase, bracket glyphs
/// stripped, en-dash treated as an apostrophe, whitespace collapsed.
pub fn normalize_for_match(text: &str) -> String {
    let text = text.to_lowercase();
    let text = text.replace(['[', ']'], " ").replace('–', "'");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}
