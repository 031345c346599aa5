//! The supervision loop.
//!
//! One poll cycle: make sure the panel window exists (launching and
//! onboarding if not), keep it parked in its corner, capture and OCR the
//! log box, parse the freshest entry, and decide whether the panel has
//! gone stale enough to warrant the recovery click. Side channels hang
//! off the same cycle: the shell restart remedy, the companion route
//! process, and the deferred worker-count reconciliation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, RegionsConfig};
use crate::errors::WatchdogError;
use crate::first_run::{FirstRunSequencer, FirstRunTracker};
use crate::lifecycle::{launch_steam_route, EnsureOutcome, WindowLifecycle};
use crate::parser::{find_latest_entry, LogEntry};
use crate::platforms::{
    force_foreground, jittered_click, jittered_double_click, DesktopEngine, WindowInfo,
};
use crate::recovery::{evaluate, is_warm_up_message, RecoveryState, RecoveryVerdict, Thresholds};
use crate::reconcile::{run_reconcile_check, ScheduledCheck};

/// Pause after non-poll cycles (launch handling, transient errors).
const SHORT_PAUSE: Duration = Duration::from_secs(5);

/// Whole-sequence onboarding retries after a fresh launch.
const FIRST_RUN_ATTEMPTS: u32 = 3;
const FIRST_RUN_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Message substring that marks the panel's unrecoverable "cannot add"
/// state; remedied by restarting the OS shell.
const SHELL_RESTART_MARKER: &str = "cannot add";

pub struct Watchdog {
    engine: Arc<dyn DesktopEngine>,
    app: AppConfig,
    regions: RegionsConfig,
    lifecycle: WindowLifecycle,
    window: Option<WindowInfo>,
    recovery: RecoveryState,
    tracker: FirstRunTracker,
    scheduled_check: Option<ScheduledCheck>,
    last_logged_line: Option<String>,
    /// Cleared for one cycle after a recovery click so repositioning never
    /// races the panel's own post-click redraw.
    reposition_enabled: bool,
    steam_route_launched: bool,
    logs_dir: PathBuf,
}

impl Watchdog {
    pub fn new(
        engine: Arc<dyn DesktopEngine>,
        app: AppConfig,
        regions: RegionsConfig,
        logs_dir: PathBuf,
    ) -> Self {
        let lifecycle = WindowLifecycle::new(
            app.window.title_substring.clone(),
            regions.panel.dir.clone(),
            regions.panel.exe_name.clone(),
        );
        let recovery = RecoveryState::new(Duration::from_secs(
            app.watchdog.action_debounce_seconds,
        ));
        Self {
            engine,
            app,
            regions,
            lifecycle,
            window: None,
            recovery,
            tracker: FirstRunTracker::new(),
            scheduled_check: None,
            last_logged_line: None,
            reposition_enabled: true,
            steam_route_launched: false,
            logs_dir,
        }
    }

    pub async fn run(&mut self) -> Result<(), WatchdogError> {
        info!(
            title = %self.app.window.title_substring,
            poll_s = self.app.watchdog.poll_seconds,
            warm_min = self.app.watchdog.warm_timeout_minutes,
            general_min = self.app.watchdog.general_timeout_minutes,
            "watchdog started"
        );
        loop {
            let pause = self.run_cycle().await?;
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    /// One poll cycle. Returns how long to sleep before the next one;
    /// zero means re-enter immediately (window bookkeeping cycles).
    pub async fn run_cycle(&mut self) -> Result<Duration, WatchdogError> {
        let poll = Duration::from_secs(self.app.watchdog.poll_seconds);

        // Validate the cached window against the OS; titles change, so a
        // stale handle is re-resolved rather than trusted.
        let cached_gone = self
            .window
            .as_ref()
            .is_some_and(|w| !self.engine.window_exists(w.id));
        if cached_gone {
            info!("cached panel window is gone");
            self.window = None;
        }

        if self.window.is_none() {
            match self.lifecycle.ensure_window(&self.engine).await {
                Ok(EnsureOutcome::Existing(window)) => {
                    info!(title = %window.title, pid = window.pid, "attached to panel window");
                    self.window = Some(window);
                }
                Ok(EnsureOutcome::Launched(window)) => {
                    info!(title = %window.title, pid = window.pid, "panel launched");
                    if !self.post_launch(&window).await? {
                        return Ok(SHORT_PAUSE);
                    }
                    self.window = Some(window);
                    return Ok(SHORT_PAUSE);
                }
                Ok(EnsureOutcome::Waiting) => return Ok(Duration::ZERO),
                Err(e) => {
                    error!(error = %e, "could not locate or launch the panel");
                    return Ok(SHORT_PAUSE);
                }
            }
        }

        let window = match &self.window {
            Some(w) => w.clone(),
            None => return Ok(SHORT_PAUSE),
        };

        if self.reposition_enabled && self.app.watchdog.normalize_every_loop {
            self.reposition_window(&window);
            tokio::time::sleep(Duration::from_millis(
                self.app.watchdog.settle_after_normalize_ms,
            ))
            .await;
        }

        let entry = match self.capture_and_parse(&window).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "log capture failed this cycle");
                return Ok(poll);
            }
        };

        let Some(entry) = entry else {
            info!("no parseable log entry this cycle");
            return Ok(poll);
        };

        // The cannot-add state is remedied by a shell restart, but the
        // entry still goes through the normal staleness decision below.
        if entry.message.to_lowercase().contains(SHELL_RESTART_MARKER) {
            warn!(message = %entry.message, "panel reports the cannot-add state; restarting shell");
            if let Err(e) = self.engine.restart_shell() {
                warn!(error = %e, "shell restart failed");
            }
        }

        let warm = is_warm_up_message(&entry.message);
        self.log_entry_once(&entry, warm);

        let verdict = evaluate(
            entry.age_minutes,
            warm,
            Thresholds {
                warm_minutes: self.app.watchdog.warm_timeout_minutes,
                general_minutes: self.app.watchdog.general_timeout_minutes,
            },
            self.recovery.since_last_action(),
            self.recovery.debounce(),
        );

        match verdict {
            RecoveryVerdict::Healthy => {
                self.reposition_enabled = true;
            }
            RecoveryVerdict::Suppressed { reason, remaining } => {
                warn!(
                    reason = %reason,
                    remaining_s = remaining.as_secs(),
                    "recovery warranted but inside debounce window"
                );
            }
            RecoveryVerdict::Trigger { reason } => {
                self.reposition_enabled = false;
                match self.trigger_recovery(&window, &reason).await {
                    Ok(()) => self.recovery.mark_action(),
                    Err(e) => {
                        warn!(error = %e, "recovery click failed; cooldown not applied");
                    }
                }
            }
        }

        self.check_steam_route();

        let reconcile_due = self
            .scheduled_check
            .as_ref()
            .is_some_and(|check| check.is_due(Instant::now()));
        if reconcile_due {
            self.run_scheduled_reconcile(&window).await;
        }

        Ok(poll)
    }

    /// Post-launch handling: companion route, onboarding with retries,
    /// arming the reconcile check, and initial placement. Returns `false`
    /// when onboarding failed outright and the window should be dropped.
    async fn post_launch(&mut self, window: &WindowInfo) -> Result<bool, WatchdogError> {
        if !self.steam_route_launched {
            if let Some(route) = &self.regions.steam_route {
                launch_steam_route(&self.engine, route);
                self.steam_route_launched = true;
            }
        }

        if self.tracker.contains(window.pid) {
            debug!(pid = window.pid, "onboarding already completed for this process");
        } else {
            let engine = Arc::clone(&self.engine);
            let first_run = self.regions.panel.first_run.clone();
            let sequencer = FirstRunSequencer::new(engine.as_ref(), &first_run);

            let mut succeeded = false;
            for attempt in 1..=FIRST_RUN_ATTEMPTS {
                match sequencer.run(window, true).await {
                    Ok(()) => {
                        succeeded = true;
                        break;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "first-run sequence attempt failed");
                        if attempt < FIRST_RUN_ATTEMPTS {
                            tokio::time::sleep(FIRST_RUN_RETRY_PAUSE).await;
                        }
                    }
                }
            }
            if !succeeded {
                error!("first-run onboarding failed after all attempts");
                return Ok(false);
            }

            self.tracker.mark(window.pid);
            if let Some(rc) = &self.regions.reconcile {
                let delay = Duration::from_secs(rc.delay_minutes * 60);
                info!(delay_min = rc.delay_minutes, "reconcile check armed");
                self.scheduled_check = Some(ScheduledCheck::arm(delay));
            }
        }

        self.reposition_window(window);
        tokio::time::sleep(Duration::from_millis(
            self.app.watchdog.settle_after_normalize_ms,
        ))
        .await;
        Ok(true)
    }

    /// Capture the log box and parse the freshest entry out of it. Falls
    /// back to a raw screen-region capture once when the client capture
    /// yields nothing parseable.
    async fn capture_and_parse(
        &self,
        window: &WindowInfo,
    ) -> Result<Option<LogEntry>, WatchdogError> {
        let (client_w, client_h) = self.engine.client_size(window.id)?;
        let region = if let Some(pct) = &self.regions.log_region_pct {
            pct.to_client_rect(client_w, client_h)
        } else if let Some(rect) = &self.regions.log_region {
            *rect
        } else {
            return Err(WatchdogError::InvalidConfiguration(
                "no log region configured".to_string(),
            ));
        };

        // Jump the log box to its newest entries before capturing. Best
        // effort: a failed scroll still leaves a capturable (if stale)
        // view.
        if let Some(scroll_pct) = &self.regions.log_scroll_point_pct {
            if let Err(e) = self.scroll_log_to_top(window, scroll_pct).await {
                debug!(error = %e, "log scroll skipped");
            }
        }

        if let Err(e) = self.engine.bring_to_foreground(window.id) {
            debug!(error = %e, "pre-capture foreground request failed");
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let shot = self.engine.capture_client_region(window.id, region).await?;
        if let Err(e) = self
            .engine
            .save_screenshot(&shot, &self.logs_dir.join("last_log.png"))
        {
            debug!(error = %e, "could not save capture");
        }

        let text = self.engine.ocr_screenshot(&shot).await?;
        if self.app.watchdog.debug_print_ocr {
            info!(ocr = %text, "raw OCR text");
        }
        if let Some(entry) = find_latest_entry(&text) {
            return Ok(Some(entry));
        }

        // Client-area capture came up empty; retry once against the raw
        // screen in case the window was occluded or misreported its
        // client rect.
        warn!("no entry parsed from client capture; trying screen-region fallback");
        let origin = self.engine.client_origin(window.id)?;
        let screen_region = crate::geometry::Rect {
            x: origin.x + region.x,
            y: origin.y + region.y,
            w: region.w,
            h: region.h,
        };
        let fallback = match self.engine.capture_screen_region(screen_region).await {
            Ok(shot) => shot,
            Err(e) => {
                warn!(error = %e, "screen-region fallback capture failed");
                return Ok(None);
            }
        };
        if let Err(e) = self
            .engine
            .save_screenshot(&fallback, &self.logs_dir.join("last_log_fallback.png"))
        {
            debug!(error = %e, "could not save fallback capture");
        }
        let text = self.engine.ocr_screenshot(&fallback).await?;
        Ok(find_latest_entry(&text))
    }

    async fn scroll_log_to_top(
        &self,
        window: &WindowInfo,
        scroll_pct: &crate::geometry::PointPct,
    ) -> Result<(), WatchdogError> {
        self.engine.bring_to_foreground(window.id)?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (client_w, client_h) = self.engine.client_size(window.id)?;
        let origin = self.engine.client_origin(window.id)?;
        let target = scroll_pct.to_screen(client_w, client_h, origin);
        jittered_double_click(self.engine.as_ref(), target)?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }

    /// The corrective click. Focus is acquired, verified, and re-verified
    /// immediately before the click; any doubt aborts so the click cannot
    /// land in a foreign window.
    async fn trigger_recovery(
        &self,
        window: &WindowInfo,
        reason: &str,
    ) -> Result<(), WatchdogError> {
        warn!(reason = %reason, "triggering recovery click");

        force_foreground(self.engine.as_ref(), window, 3).await?;

        let (client_w, client_h) = self.engine.client_size(window.id)?;
        let origin = self.engine.client_origin(window.id)?;
        let target = if let Some(pct) = &self.regions.button_point_pct {
            pct.to_screen(client_w, client_h, origin)
        } else if let Some(point) = &self.regions.button_point {
            crate::geometry::Point {
                x: origin.x + point.x,
                y: origin.y + point.y,
            }
        } else {
            return Err(WatchdogError::InvalidConfiguration(
                "no recovery button position configured".to_string(),
            ));
        };

        if self.engine.foreground_window()? != Some(window.id) {
            return Err(WatchdogError::FocusNotAcquired(
                "panel lost foreground between verification and click".to_string(),
            ));
        }

        jittered_click(self.engine.as_ref(), target)?;
        tokio::time::sleep(Duration::from_millis(self.app.watchdog.settle_after_click_ms)).await;
        info!(x = target.x, y = target.y, "recovery click dispatched");
        Ok(())
    }

    /// Park the window at the bottom-right of the work area. Best effort.
    fn reposition_window(&self, window: &WindowInfo) {
        let result = self.engine.work_area().and_then(|area| {
            let x = area.right() - self.app.layout.width as i32 - self.app.layout.margin_right;
            let y = area.bottom() - self.app.layout.height as i32 - self.app.layout.margin_bottom;
            self.engine.move_window(
                window.id,
                crate::geometry::Rect {
                    x,
                    y,
                    w: self.app.layout.width,
                    h: self.app.layout.height,
                },
            )
        });
        if let Err(e) = result {
            debug!(error = %e, "window reposition failed");
        }
    }

    /// Relaunch the companion route process if it was started alongside
    /// the panel and has since died.
    fn check_steam_route(&self) {
        if !self.steam_route_launched {
            return;
        }
        let Some(route) = &self.regions.steam_route else {
            return;
        };
        let Some(name) = &route.process_name else {
            return;
        };
        match self.engine.process_running(name) {
            Ok(true) => {}
            Ok(false) => {
                warn!(process = %name, "route process died; relaunching");
                launch_steam_route(&self.engine, route);
            }
            Err(e) => debug!(error = %e, "route process query failed"),
        }
    }

    async fn run_scheduled_reconcile(&mut self, window: &WindowInfo) {
        let Some(rc) = self.regions.reconcile.clone() else {
            return;
        };
        let engine = Arc::clone(&self.engine);
        let first_run = self.regions.panel.first_run.clone();
        let sequencer = FirstRunSequencer::new(engine.as_ref(), &first_run);

        match run_reconcile_check(engine.as_ref(), window, &rc, &sequencer).await {
            Ok(matched) => {
                if !matched {
                    info!("reconcile mismatch handled");
                }
            }
            Err(e) => warn!(error = %e, "reconcile check failed"),
        }
        if let Some(check) = &mut self.scheduled_check {
            check.mark_done();
        }
    }

    /// Log the selected entry once per distinct line; repeats at debug.
    fn log_entry_once(&mut self, entry: &LogEntry, warm: bool) {
        let line = entry.line();
        if self.last_logged_line.as_deref() != Some(line.as_str()) {
            info!(
                entry = %line,
                age_min = format!("{:.1}", entry.age_minutes),
                warm,
                "latest log entry"
            );
            self.last_logged_line = Some(line);
        } else {
            debug!(
                entry = %line,
                age_min = format!("{:.1}", entry.age_minutes),
                "latest log entry unchanged"
            );
        }
    }
}
