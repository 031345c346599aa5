//! The staleness/recovery decision.
//!
//! Pure logic: given the latest entry's age and classification, pick the
//! effective threshold and decide whether a corrective click is warranted,
//! then apply the debounce. The caller owns the side effects; state only
//! advances on a confirmed successful action, so a failed click retries at
//! the next eligible poll without waiting out a cooldown it never earned.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::normalize::normalize_for_match;

/// Word-boundary match for the warm-up keyword, tolerant of hyphenation and
/// spacing variants ("warm up", "warm-up", "warmup").
static WARM_UP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bwarm[\s-]*up\b").expect("valid regex"));

pub fn is_warm_up_message(message: &str) -> bool {
    WARM_UP_RE.is_match(&normalize_for_match(message))
}

/// The two independently configured staleness thresholds, in minutes.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub warm_minutes: f64,
    pub general_minutes: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryVerdict {
    /// Entry is fresh enough; nothing to do.
    Healthy,
    /// A trigger is warranted but falls inside the debounce window. Logged
    /// by the caller; produces no OS side effect.
    Suppressed {
        reason: String,
        remaining: Duration,
    },
    /// Perform the corrective click.
    Trigger { reason: String },
}

/// Map (classification, age, cooldown state) to a verdict.
pub fn evaluate(
    age_minutes: f64,
    warm: bool,
    thresholds: Thresholds,
    since_last_action: Duration,
    debounce: Duration,
) -> RecoveryVerdict {
    let (effective, label) = if warm {
        (thresholds.warm_minutes, "warm-up")
    } else {
        (thresholds.general_minutes, "general")
    };

    if age_minutes < effective {
        return RecoveryVerdict::Healthy;
    }

    let reason = format!("{label} timeout exceeded ({age_minutes:.1} >= {effective} min)");
    if since_last_action < debounce {
        RecoveryVerdict::Suppressed {
            reason,
            remaining: debounce - since_last_action,
        }
    } else {
        RecoveryVerdict::Trigger { reason }
    }
}

/// Cooldown state for corrective actions.
///
/// Starts "just acted" so a freshly started supervisor never fires on its
/// first poll. `mark_action` is called only after a click was confirmed
/// dispatched with the target window foregrounded; the timestamp is
/// monotonic and only moves forward.
#[derive(Debug)]
pub struct RecoveryState {
    last_action: Instant,
    debounce: Duration,
}

impl RecoveryState {
    pub fn new(debounce: Duration) -> Self {
        Self {
            last_action: Instant::now(),
            debounce,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn since_last_action(&self) -> Duration {
        self.last_action.elapsed()
    }

    pub fn mark_action(&mut self) {
        self.last_action = Instant::now();
    }
}
