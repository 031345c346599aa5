//! Typed configuration schema.
//!
//! Two YAML documents drive the watchdog: `app.yaml` (window identity,
//! layout, thresholds and timing) and `regions.yaml` (where things are on
//! screen, executable paths, per-feature sub-configs). Both are
//! deserialized once at startup and then validated as a whole; validation
//! reports every problem found, not just the first, and any problem is
//! fatal. Safety-critical coordinates are never guessed.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::WatchdogError;
use crate::geometry::{Point, PointPct, Rect, RegionPct};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub layout: LayoutConfig,
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Case-insensitive substring matched against top-level window titles.
    pub title_substring: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub margin_right: i32,
    #[serde(default)]
    pub margin_bottom: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    pub poll_seconds: u64,
    #[serde(default = "default_warm_timeout")]
    pub warm_timeout_minutes: f64,
    #[serde(default = "default_general_timeout")]
    pub general_timeout_minutes: f64,
    #[serde(default = "default_debounce")]
    pub action_debounce_seconds: u64,
    #[serde(default = "default_settle_after_click")]
    pub settle_after_click_ms: u64,
    #[serde(default = "default_settle_after_normalize")]
    pub settle_after_normalize_ms: u64,
    /// Reposition the window to its configured spot every poll. Suppressed
    /// for one cycle after a corrective click either way.
    #[serde(default = "default_true")]
    pub normalize_every_loop: bool,
    #[serde(default)]
    pub debug_print_ocr: bool,
}

fn default_warm_timeout() -> f64 {
    40.0
}
fn default_general_timeout() -> f64 {
    60.0
}
fn default_debounce() -> u64 {
    180
}
fn default_settle_after_click() -> u64 {
    2000
}
fn default_settle_after_normalize() -> u64 {
    150
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionsConfig {
    pub panel: PanelConfig,
    /// Log box region as fractions of the client area. Preferred.
    #[serde(default)]
    pub log_region_pct: Option<RegionPct>,
    /// Log box region in absolute client-relative pixels. Fallback form.
    #[serde(default)]
    pub log_region: Option<Rect>,
    /// Where to double-click to jump the log box to its newest entries
    /// before each capture. Scrolling is skipped when absent.
    #[serde(default)]
    pub log_scroll_point_pct: Option<PointPct>,
    /// The recovery button, as fractions of the client area.
    #[serde(default)]
    pub button_point_pct: Option<PointPct>,
    /// The recovery button in client-relative pixels. Fallback form.
    #[serde(default)]
    pub button_point: Option<Point>,
    #[serde(default)]
    pub reconcile: Option<ReconcileConfig>,
    #[serde(default)]
    pub steam_route: Option<SteamRouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    /// Install directory of the panel. Executables are resolved from here.
    pub dir: PathBuf,
    /// Canonical executable name tried first; when missing, the
    /// most-recently-modified executable in `dir` is used instead.
    #[serde(default = "default_exe_name")]
    pub exe_name: String,
    #[serde(default)]
    pub first_run: FirstRunConfig,
}

fn default_exe_name() -> String {
    "Panel.exe".to_string()
}

/// One-time onboarding click automation run after a fresh launch.
#[derive(Debug, Clone, Deserialize)]
pub struct FirstRunConfig {
    #[serde(default = "default_initial_wait")]
    pub initial_wait_seconds: u64,
    /// OCR gate: only click when one of `keywords` appears in this region.
    /// Ignored on forced runs (every fresh launch is forced).
    #[serde(default)]
    pub detect_region: Option<RegionPct>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub clicks: Vec<ClickStep>,
}

// An omitted first_run section must carry the same defaults as an empty
// one, so Default goes through the serde default fns.
impl Default for FirstRunConfig {
    fn default() -> Self {
        Self {
            initial_wait_seconds: default_initial_wait(),
            detect_region: None,
            keywords: Vec::new(),
            clicks: Vec::new(),
        }
    }
}

fn default_initial_wait() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClickStep {
    pub x_pct: f64,
    pub y_pct: f64,
    #[serde(default = "default_click_wait")]
    pub wait_s: f64,
}

fn default_click_wait() -> f64 {
    0.8
}

impl ClickStep {
    pub fn point(&self) -> PointPct {
        PointPct {
            x: self.x_pct,
            y: self.y_pct,
        }
    }
}

/// Periodic verification that a dependent process's instance count matches
/// expectation. Deployment-specific, so nothing here is hard-coded: omit
/// the whole section to disable the check.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub process_name: String,
    #[serde(default = "default_expected_count")]
    pub expected_count: usize,
    /// Corrective click issued on a count mismatch. Distinct from the
    /// staleness-recovery button.
    #[serde(default)]
    pub kill_point_pct: Option<PointPct>,
    #[serde(default = "default_reconcile_delay")]
    pub delay_minutes: u64,
}

fn default_expected_count() -> usize {
    4
}
fn default_reconcile_delay() -> u64 {
    5
}

/// Dependent launcher process started alongside the panel and relaunched if
/// it dies.
#[derive(Debug, Clone, Deserialize)]
pub struct SteamRouteConfig {
    #[serde(default)]
    pub launch_with_panel: bool,
    #[serde(default)]
    pub exe: Option<PathBuf>,
    #[serde(default)]
    pub process_name: Option<String>,
}

pub fn load_app_config(path: &Path) -> Result<AppConfig, WatchdogError> {
    let raw = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|e| {
        WatchdogError::InvalidConfiguration(format!("{}: {e}", path.display()))
    })
}

pub fn load_regions_config(path: &Path) -> Result<RegionsConfig, WatchdogError> {
    let raw = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|e| {
        WatchdogError::InvalidConfiguration(format!("{}: {e}", path.display()))
    })
}

impl AppConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.window.title_substring.trim().is_empty() {
            problems.push("window.title_substring must not be empty".to_string());
        }
        if self.layout.width == 0 || self.layout.height == 0 {
            problems.push("layout.width and layout.height must be non-zero".to_string());
        }
        if self.watchdog.poll_seconds == 0 {
            problems.push("watchdog.poll_seconds must be at least 1".to_string());
        }
        if self.watchdog.warm_timeout_minutes <= 0.0 {
            problems.push("watchdog.warm_timeout_minutes must be positive".to_string());
        }
        if self.watchdog.general_timeout_minutes <= 0.0 {
            problems.push("watchdog.general_timeout_minutes must be positive".to_string());
        }
        problems
    }
}

impl RegionsConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.panel.dir.as_os_str().is_empty() {
            problems.push("panel.dir must not be empty".to_string());
        }

        match (&self.log_region_pct, &self.log_region) {
            (None, None) => {
                problems.push("one of log_region_pct or log_region is required".to_string())
            }
            (Some(pct), _) if !pct.in_range() => {
                problems.push("log_region_pct values must be within 0.0..=1.0".to_string())
            }
            _ => {}
        }

        match (&self.button_point_pct, &self.button_point) {
            (None, None) => problems.push(
                "one of button_point_pct or button_point is required (recovery click target)"
                    .to_string(),
            ),
            (Some(pct), _) if !pct.in_range() => {
                problems.push("button_point_pct values must be within 0.0..=1.0".to_string())
            }
            _ => {}
        }

        if let Some(p) = &self.log_scroll_point_pct {
            if !p.in_range() {
                problems.push("log_scroll_point_pct values must be within 0.0..=1.0".to_string());
            }
        }

        if let Some(region) = &self.panel.first_run.detect_region {
            if !region.in_range() {
                problems.push(
                    "panel.first_run.detect_region values must be within 0.0..=1.0".to_string(),
                );
            }
        }
        for (idx, step) in self.panel.first_run.clicks.iter().enumerate() {
            if !step.point().in_range() {
                problems.push(format!(
                    "panel.first_run.clicks[{idx}] coordinates must be within 0.0..=1.0"
                ));
            }
            if step.wait_s < 0.0 {
                problems.push(format!(
                    "panel.first_run.clicks[{idx}].wait_s must not be negative"
                ));
            }
        }

        if let Some(rc) = &self.reconcile {
            if rc.process_name.trim().is_empty() {
                problems.push("reconcile.process_name must not be empty".to_string());
            }
            if rc.expected_count == 0 {
                problems.push("reconcile.expected_count must be at least 1".to_string());
            }
            match &rc.kill_point_pct {
                None => problems.push(
                    "reconcile.kill_point_pct is required when reconcile is configured"
                        .to_string(),
                ),
                Some(p) if !p.in_range() => problems
                    .push("reconcile.kill_point_pct values must be within 0.0..=1.0".to_string()),
                _ => {}
            }
        }

        if let Some(sr) = &self.steam_route {
            if sr.launch_with_panel && sr.exe.is_none() {
                problems.push(
                    "steam_route.exe is required when steam_route.launch_with_panel is true"
                        .to_string(),
                );
            }
        }

        problems
    }
}

/// Validate both documents together; any problem is startup-fatal.
pub fn validate_all(app: &AppConfig, regions: &RegionsConfig) -> Result<(), WatchdogError> {
    let mut problems = app.validate();
    problems.extend(regions.validate());
    if problems.is_empty() {
        Ok(())
    } else {
        Err(WatchdogError::InvalidConfiguration(problems.join("\n")))
    }
}
