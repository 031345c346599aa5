//! First-run onboarding: the scripted click sequence that dismisses the
//! panel's setup dialogs after a fresh launch, plus the per-PID tracker
//! that keeps the sequence from replaying against a process that already
//! went through it.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::FirstRunConfig;
use crate::errors::WatchdogError;
use crate::platforms::{force_foreground, jittered_click, DesktopEngine, WindowInfo};

const TRACKER_HIGH_WATER: usize = 20;
const TRACKER_KEEP: usize = 10;

/// Floor on per-click settle time, whatever the configured wait says.
const MIN_CLICK_SETTLE: Duration = Duration::from_millis(300);

/// Remembers which panel PIDs have completed onboarding. PIDs recycle,
/// so the tracker is bounded and forgets the oldest entries first.
#[derive(Debug, Default)]
pub struct FirstRunTracker {
    pids: Vec<u32>,
}

impl FirstRunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn mark(&mut self, pid: u32) {
        if !self.pids.contains(&pid) {
            self.pids.push(pid);
        }
        if self.pids.len() > TRACKER_HIGH_WATER {
            let drop = self.pids.len() - TRACKER_KEEP;
            self.pids.drain(..drop);
        }
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}

/// Drives one onboarding attempt against a live window. The caller owns
/// retries of the whole sequence; a focus loss mid-sequence aborts the
/// attempt rather than clicking into whatever stole focus.
pub struct FirstRunSequencer<'a> {
    engine: &'a dyn DesktopEngine,
    cfg: &'a FirstRunConfig,
}

impl<'a> FirstRunSequencer<'a> {
    pub fn new(engine: &'a dyn DesktopEngine, cfg: &'a FirstRunConfig) -> Self {
        Self { engine, cfg }
    }

    /// Runs the click sequence. `force` bypasses the OCR keyword gate;
    /// fresh launches always force.
    pub async fn run(&self, window: &WindowInfo, force: bool) -> Result<(), WatchdogError> {
        if self.cfg.clicks.is_empty() {
            return Ok(());
        }

        info!(
            wait_s = self.cfg.initial_wait_seconds,
            "waiting for panel to settle before first-run clicks"
        );
        tokio::time::sleep(Duration::from_secs(self.cfg.initial_wait_seconds)).await;

        force_foreground(self.engine, window, 3).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        if !force && !self.detect_first_run(window).await? {
            info!("first-run markers not found on screen; skipping click sequence");
            return Ok(());
        }

        let (client_w, client_h) = self.engine.client_size(window.id)?;
        let origin = self.engine.client_origin(window.id)?;

        for (index, step) in self.cfg.clicks.iter().enumerate() {
            // The panel must still own focus for every click; regain it
            // once, otherwise abort and let the caller retry from the top.
            if self.engine.foreground_window()? != Some(window.id) {
                warn!(step = index + 1, "focus lost mid-sequence; reacquiring");
                force_foreground(self.engine, window, 1).await.map_err(|_| {
                    WatchdogError::FocusNotAcquired(format!(
                        "focus lost before first-run click {}",
                        index + 1
                    ))
                })?;
            }

            let target = step.point().to_screen(client_w, client_h, origin);
            info!(step = index + 1, x = target.x, y = target.y, "first-run click");
            jittered_click(self.engine, target)?;

            let wait = Duration::from_secs_f64(step.wait_s).max(MIN_CLICK_SETTLE);
            tokio::time::sleep(wait).await;
        }

        info!(clicks = self.cfg.clicks.len(), "first-run click sequence completed");
        Ok(())
    }

    /// OCR keyword check over the configured detection region. Unforced
    /// runs click only on a positive detection, so an absent region or
    /// empty keyword list means "not needed".
    async fn detect_first_run(&self, window: &WindowInfo) -> Result<bool, WatchdogError> {
        let Some(region_pct) = &self.cfg.detect_region else {
            return Ok(false);
        };
        let keywords = &self.cfg.keywords;
        if keywords.is_empty() {
            return Ok(false);
        }

        let (client_w, client_h) = self.engine.client_size(window.id)?;
        let region = region_pct.to_client_rect(client_w, client_h);
        let shot = self.engine.capture_client_region(window.id, region).await?;
        let text = self.engine.ocr_screenshot(&shot).await?.to_lowercase();
        Ok(keywords.iter().any(|k| text.contains(&k.to_lowercase())))
    }
}
