//! Deferred reconciliation: some time after onboarding, count the
//! panel's dependent worker processes and force a corrective reset when
//! the count is off.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::ReconcileConfig;
use crate::errors::WatchdogError;
use crate::first_run::FirstRunSequencer;
use crate::platforms::{force_foreground, jittered_click, DesktopEngine, WindowInfo};

const POST_KILL_WAIT: Duration = Duration::from_secs(10);

/// A one-shot check armed for a future instant.
#[derive(Debug)]
pub struct ScheduledCheck {
    due: Instant,
    done: bool,
}

impl ScheduledCheck {
    pub fn arm(delay: Duration) -> Self {
        Self {
            due: Instant::now() + delay,
            done: false,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        !self.done && now >= self.due
    }

    pub fn mark_done(&mut self) {
        self.done = true;
    }
}

/// Compares the dependent process count against the expected value and,
/// on mismatch, clicks the configured kill control and replays the
/// first-run sequence. Returns whether the count matched.
pub async fn run_reconcile_check(
    engine: &dyn DesktopEngine,
    window: &WindowInfo,
    cfg: &ReconcileConfig,
    sequencer: &FirstRunSequencer<'_>,
) -> Result<bool, WatchdogError> {
    let count = engine.count_processes(&cfg.process_name)?;
    if count == cfg.expected_count {
        info!(
            process = %cfg.process_name,
            count,
            "reconcile check passed"
        );
        return Ok(true);
    }

    warn!(
        process = %cfg.process_name,
        count,
        expected = cfg.expected_count,
        "dependent process count mismatch; resetting panel workers"
    );

    force_foreground(engine, window, 3).await?;

    let kill_pct = cfg.kill_point_pct.as_ref().ok_or_else(|| {
        WatchdogError::InvalidConfiguration(
            "reconcile mismatch handling requires kill_point_pct".to_string(),
        )
    })?;
    let (client_w, client_h) = engine.client_size(window.id)?;
    let origin = engine.client_origin(window.id)?;
    let target = kill_pct.to_screen(client_w, client_h, origin);

    info!(x = target.x, y = target.y, "clicking worker reset control");
    jittered_click(engine, target)?;
    tokio::time::sleep(POST_KILL_WAIT).await;

    sequencer.run(window, true).await?;
    Ok(false)
}
