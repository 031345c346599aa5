//! Panel window lifecycle: discovery, launch with backoff, and the
//! guard against relaunching while a running process is still building
//! its window.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::SteamRouteConfig;
use crate::errors::WatchdogError;
use crate::platforms::{DesktopEngine, WindowInfo};

/// Waits between launch and successive window probes, in seconds.
const LAUNCH_BACKOFF_SECS: [u64; 4] = [3, 5, 8, 12];

/// Consecutive "process alive but windowless" cycles tolerated before a
/// forced relaunch.
const MAX_NO_WINDOW_CYCLES: u32 = 12;

const NO_WINDOW_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum EnsureOutcome {
    /// The window was already on screen.
    Existing(WindowInfo),
    /// We launched the panel and its window appeared.
    Launched(WindowInfo),
    /// The process is alive without a window; check again shortly.
    Waiting,
}

pub struct WindowLifecycle {
    title_substring: String,
    panel_dir: PathBuf,
    exe_name: String,
    no_window_streak: u32,
}

impl WindowLifecycle {
    pub fn new(title_substring: String, panel_dir: PathBuf, exe_name: String) -> Self {
        Self {
            title_substring: title_substring.to_lowercase(),
            panel_dir,
            exe_name,
            no_window_streak: 0,
        }
    }

    /// Finds the panel window, launching the panel if needed.
    ///
    /// A running process without a window usually means the panel is
    /// still initializing (or stuck on a splash dialog), so we wait up
    /// to `MAX_NO_WINDOW_CYCLES` probes before forcing a relaunch over
    /// the live process.
    pub async fn ensure_window(
        &mut self,
        engine: &Arc<dyn DesktopEngine>,
    ) -> Result<EnsureOutcome, WatchdogError> {
        if let Some(window) = engine.find_window_by_title(&self.title_substring)? {
            self.no_window_streak = 0;
            return Ok(EnsureOutcome::Existing(window));
        }

        if self.panel_running(engine)? {
            self.no_window_streak += 1;
            if self.no_window_streak <= MAX_NO_WINDOW_CYCLES {
                info!(
                    streak = self.no_window_streak,
                    max = MAX_NO_WINDOW_CYCLES,
                    "panel process is running but has no window yet; waiting"
                );
                tokio::time::sleep(NO_WINDOW_WAIT).await;
                return Ok(EnsureOutcome::Waiting);
            }
            warn!("panel process never produced a window; forcing relaunch");
            self.no_window_streak = 0;
        }

        let window = self.launch_and_wait(engine).await?;
        Ok(EnsureOutcome::Launched(window))
    }

    /// The canonical executable if present, otherwise the most recently
    /// modified `.exe` in the panel directory.
    pub fn resolve_panel_exe(&self) -> Result<PathBuf, WatchdogError> {
        let canonical = self.panel_dir.join(&self.exe_name);
        if canonical.is_file() {
            return Ok(canonical);
        }

        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(&self.panel_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e.eq_ignore_ascii_case("exe")) != Some(true) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                newest = Some((modified, path));
            }
        }
        newest.map(|(_, path)| path).ok_or_else(|| {
            WatchdogError::LaunchFailed(format!(
                "no executable found in {}",
                self.panel_dir.display()
            ))
        })
    }

    fn panel_running(&self, engine: &Arc<dyn DesktopEngine>) -> Result<bool, WatchdogError> {
        if self.panel_dir.join(&self.exe_name).is_file() {
            return engine.process_running(&self.exe_name);
        }
        // Canonical name missing; match on any executable shipped in
        // the panel directory.
        for entry in std::fs::read_dir(&self.panel_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e.eq_ignore_ascii_case("exe")) != Some(true) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if engine.process_running(name)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn launch_and_wait(
        &self,
        engine: &Arc<dyn DesktopEngine>,
    ) -> Result<WindowInfo, WatchdogError> {
        let exe = self.resolve_panel_exe()?;
        let cwd = exe.parent().unwrap_or(&self.panel_dir).to_path_buf();
        info!(exe = %exe.display(), "launching panel");
        let pid = engine.launch(&exe, &cwd)?;
        info!(pid, "panel process started");

        let dir_needle = self.panel_dir.to_string_lossy().to_string();
        for delay in LAUNCH_BACKOFF_SECS {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            if let Some(window) = engine.find_window_by_title(&self.title_substring)? {
                return Ok(window);
            }
            // Freshly launched panels sometimes come up with a blank or
            // localized title; match on the executable path instead.
            if let Some(window) = engine.find_window_by_process_path(&dir_needle)? {
                warn!(
                    title = %window.title,
                    "panel window found by process path, not by title"
                );
                return Ok(window);
            }
        }
        Err(WatchdogError::WindowNotFound(format!(
            "panel window did not appear within {}s of launch",
            LAUNCH_BACKOFF_SECS.iter().sum::<u64>()
        )))
    }
}

/// Launches the companion route process alongside the panel when
/// configured. Failures are logged and swallowed: the route is an
/// auxiliary concern and must never block panel supervision.
pub fn launch_steam_route(engine: &Arc<dyn DesktopEngine>, cfg: &SteamRouteConfig) {
    if !cfg.launch_with_panel {
        return;
    }
    if let Some(name) = &cfg.process_name {
        match engine.process_running(name) {
            Ok(true) => {
                info!(process = %name, "route process already running");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "could not query route process; launching anyway");
            }
        }
    }
    let Some(exe) = &cfg.exe else {
        warn!("route launch requested but no executable configured");
        return;
    };
    if !Path::new(exe).is_file() {
        warn!(exe = %exe.display(), "route executable does not exist");
        return;
    }
    let cwd = exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    match engine.launch(exe, &cwd) {
        Ok(pid) => info!(pid, exe = %exe.display(), "route process launched"),
        Err(e) => warn!(error = %e, "route launch failed"),
    }
}
