//! Loop behavior tests against an in-memory desktop engine: capture,
//! staleness decisions, focus-gated clicking, launch handling and the
//! reconcile path, with no OS dependency.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, Timelike};

use panelwatch::config::{
    AppConfig, FirstRunConfig, LayoutConfig, PanelConfig, ReconcileConfig, RegionsConfig,
    WatchdogConfig, WindowConfig,
};
use panelwatch::errors::WatchdogError;
use panelwatch::first_run::FirstRunSequencer;
use panelwatch::geometry::{Point, PointPct, Rect, RegionPct};
use panelwatch::platforms::{DesktopEngine, ScreenshotResult, WindowId, WindowInfo};
use panelwatch::reconcile::run_reconcile_check;
use panelwatch::Watchdog;

#[derive(Default)]
struct MockEngine {
    windows: Mutex<Vec<WindowInfo>>,
    foreground: Mutex<Option<WindowId>>,
    ocr_texts: Mutex<VecDeque<String>>,
    clicks: Mutex<Vec<(i32, i32)>>,
    double_clicks: Mutex<Vec<(i32, i32)>>,
    moved_windows: Mutex<Vec<Rect>>,
    launches: Mutex<Vec<PathBuf>>,
    processes: Mutex<HashMap<String, usize>>,
    fail_focus: AtomicBool,
    spawn_window_on_launch: AtomicBool,
    screen_captures: AtomicUsize,
    shell_restarts: AtomicUsize,
}

impl MockEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn add_window(&self, id: isize, title: &str, pid: u32) {
        self.windows.lock().unwrap().push(WindowInfo {
            id: WindowId(id),
            title: title.to_string(),
            pid,
        });
    }

    fn push_ocr(&self, text: &str) {
        self.ocr_texts.lock().unwrap().push_back(text.to_string());
    }

    fn set_process_count(&self, name: &str, count: usize) {
        self.processes
            .lock()
            .unwrap()
            .insert(name.to_lowercase(), count);
    }

    fn clicks(&self) -> Vec<(i32, i32)> {
        self.clicks.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DesktopEngine for MockEngine {
    fn find_window_by_title(
        &self,
        title_substring: &str,
    ) -> Result<Option<WindowInfo>, WatchdogError> {
        let needle = title_substring.to_lowercase();
        Ok(self
            .windows
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.title.to_lowercase().contains(&needle))
            .cloned())
    }

    fn find_window_by_process_path(
        &self,
        _path_substring: &str,
    ) -> Result<Option<WindowInfo>, WatchdogError> {
        Ok(None)
    }

    fn window_exists(&self, id: WindowId) -> bool {
        self.windows.lock().unwrap().iter().any(|w| w.id == id)
    }

    fn foreground_window(&self) -> Result<Option<WindowId>, WatchdogError> {
        Ok(*self.foreground.lock().unwrap())
    }

    fn bring_to_foreground(&self, id: WindowId) -> Result<(), WatchdogError> {
        if !self.fail_focus.load(Ordering::SeqCst) {
            *self.foreground.lock().unwrap() = Some(id);
        }
        Ok(())
    }

    fn client_size(&self, _id: WindowId) -> Result<(u32, u32), WatchdogError> {
        Ok((1000, 700))
    }

    fn client_origin(&self, _id: WindowId) -> Result<Point, WatchdogError> {
        Ok(Point { x: 100, y: 100 })
    }

    fn move_window(&self, _id: WindowId, rect: Rect) -> Result<(), WatchdogError> {
        self.moved_windows.lock().unwrap().push(rect);
        Ok(())
    }

    fn work_area(&self) -> Result<Rect, WatchdogError> {
        Ok(Rect {
            x: 0,
            y: 0,
            w: 1920,
            h: 1040,
        })
    }

    async fn capture_client_region(
        &self,
        _id: WindowId,
        _region: Rect,
    ) -> Result<ScreenshotResult, WatchdogError> {
        Ok(ScreenshotResult {
            image_data: vec![0; 4],
            width: 1,
            height: 1,
        })
    }

    async fn capture_screen_region(
        &self,
        _region: Rect,
    ) -> Result<ScreenshotResult, WatchdogError> {
        self.screen_captures.fetch_add(1, Ordering::SeqCst);
        Ok(ScreenshotResult {
            image_data: vec![0; 4],
            width: 1,
            height: 1,
        })
    }

    async fn ocr_screenshot(
        &self,
        _screenshot: &ScreenshotResult,
    ) -> Result<String, WatchdogError> {
        Ok(self
            .ocr_texts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    fn save_screenshot(
        &self,
        _screenshot: &ScreenshotResult,
        _path: &Path,
    ) -> Result<(), WatchdogError> {
        Ok(())
    }

    fn move_pointer(&self, _x: i32, _y: i32) -> Result<(), WatchdogError> {
        Ok(())
    }

    fn click(&self, x: i32, y: i32) -> Result<(), WatchdogError> {
        self.clicks.lock().unwrap().push((x, y));
        Ok(())
    }

    fn double_click(&self, x: i32, y: i32) -> Result<(), WatchdogError> {
        self.double_clicks.lock().unwrap().push((x, y));
        Ok(())
    }

    fn press_key(&self, _key: &str) -> Result<(), WatchdogError> {
        Ok(())
    }

    fn launch(&self, exe: &Path, _cwd: &Path) -> Result<u32, WatchdogError> {
        self.launches.lock().unwrap().push(exe.to_path_buf());
        if self.spawn_window_on_launch.load(Ordering::SeqCst) {
            self.add_window(77, "Panel Control", 4321);
            self.set_process_count("panel.exe", 1);
        }
        Ok(4321)
    }

    fn process_running(&self, image_name: &str) -> Result<bool, WatchdogError> {
        Ok(self.count_processes(image_name)? > 0)
    }

    fn count_processes(&self, image_name: &str) -> Result<usize, WatchdogError> {
        Ok(*self
            .processes
            .lock()
            .unwrap()
            .get(&image_name.to_lowercase())
            .unwrap_or(&0))
    }

    fn restart_shell(&self) -> Result<(), WatchdogError> {
        self.shell_restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn app_config(debounce_seconds: u64) -> AppConfig {
    AppConfig {
        window: WindowConfig {
            title_substring: "panel".to_string(),
        },
        layout: LayoutConfig {
            width: 1004,
            height: 731,
            margin_right: 8,
            margin_bottom: 8,
        },
        watchdog: WatchdogConfig {
            poll_seconds: 60,
            warm_timeout_minutes: 40.0,
            general_timeout_minutes: 60.0,
            action_debounce_seconds: debounce_seconds,
            settle_after_click_ms: 10,
            settle_after_normalize_ms: 10,
            normalize_every_loop: true,
            debug_print_ocr: false,
        },
    }
}

fn regions_config(panel_dir: PathBuf) -> RegionsConfig {
    RegionsConfig {
        panel: PanelConfig {
            dir: panel_dir,
            exe_name: "Panel.exe".to_string(),
            first_run: FirstRunConfig::default(),
        },
        log_region_pct: Some(RegionPct {
            x: 0.03,
            y: 0.58,
            w: 0.94,
            h: 0.37,
        }),
        log_region: None,
        log_scroll_point_pct: None,
        button_point_pct: Some(PointPct { x: 0.8, y: 0.2 }),
        button_point: None,
        reconcile: None,
        steam_route: None,
    }
}

fn entry_aged(minutes_ago: i64, message: &str) -> String {
    let t = Local::now() - chrono::Duration::minutes(minutes_ago);
    format!("{:02}:{:02} | {}", t.hour(), t.minute(), message)
}

fn watchdog(mock: &Arc<MockEngine>, app: AppConfig, regions: RegionsConfig) -> Watchdog {
    let engine: Arc<dyn DesktopEngine> = mock.clone();
    Watchdog::new(engine, app, regions, std::env::temp_dir())
}

#[tokio::test(start_paused = true)]
async fn fresh_entry_produces_no_clicks() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    mock.push_ocr(&entry_aged(2, "route check OK"));

    let mut wd = watchdog(&mock, app_config(0), regions_config(PathBuf::from("/tmp")));
    let pause = wd.run_cycle().await.unwrap();

    assert_eq!(pause, Duration::from_secs(60));
    assert!(mock.clicks().is_empty());
    assert!(!mock.moved_windows.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_entry_clicks_the_recovery_button() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    mock.push_ocr(&entry_aged(90, "still waiting on upstream"));

    let mut wd = watchdog(&mock, app_config(0), regions_config(PathBuf::from("/tmp")));
    wd.run_cycle().await.unwrap();

    // button_point_pct (0.8, 0.2) of a 1000x700 client at origin (100, 100)
    let clicks = mock.clicks();
    assert_eq!(clicks, vec![(900, 240)]);
}

#[tokio::test(start_paused = true)]
async fn warm_up_entry_uses_the_tighter_threshold() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    // 45 min: stale under the 40-minute warm threshold, fine under the
    // general 60.
    mock.push_ocr(&entry_aged(45, "warm up in progress"));

    let mut wd = watchdog(&mock, app_config(0), regions_config(PathBuf::from("/tmp")));
    wd.run_cycle().await.unwrap();
    assert_eq!(mock.clicks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn debounce_suppresses_the_second_trigger() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    mock.push_ocr(&entry_aged(90, "still waiting on upstream"));
    mock.push_ocr(&entry_aged(90, "still waiting on upstream"));

    // Debounce of one hour: the first cycle would click if the state
    // machine did not start inside the cooldown, and the second must be
    // suppressed either way.
    let mut wd = watchdog(&mock, app_config(3600), regions_config(PathBuf::from("/tmp")));
    wd.run_cycle().await.unwrap();
    wd.run_cycle().await.unwrap();
    assert!(mock.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn focus_failure_aborts_the_click_and_preserves_the_retry() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    mock.push_ocr(&entry_aged(90, "still waiting on upstream"));
    mock.push_ocr(&entry_aged(91, "still waiting on upstream"));
    mock.fail_focus.store(true, Ordering::SeqCst);

    let mut wd = watchdog(&mock, app_config(0), regions_config(PathBuf::from("/tmp")));
    wd.run_cycle().await.unwrap();
    assert!(mock.clicks().is_empty(), "click must not land without focus");

    // Focus comes back; the very next cycle may click because the failed
    // attempt consumed no cooldown.
    mock.fail_focus.store(false, Ordering::SeqCst);
    wd.run_cycle().await.unwrap();
    assert_eq!(mock.clicks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_window_launches_the_panel() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Panel.exe"), b"stub").unwrap();

    let mock = MockEngine::new();
    mock.spawn_window_on_launch.store(true, Ordering::SeqCst);

    let mut wd = watchdog(
        &mock,
        app_config(0),
        regions_config(dir.path().to_path_buf()),
    );
    let pause = wd.run_cycle().await.unwrap();

    let launches = mock.launches.lock().unwrap().clone();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0], dir.path().join("Panel.exe"));
    assert_eq!(pause, Duration::from_secs(5));

    // The launched window is now cached and supervised normally.
    mock.push_ocr(&entry_aged(1, "route check OK"));
    let pause = wd.run_cycle().await.unwrap();
    assert_eq!(pause, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn exhausted_launch_backoff_fails_without_crashing_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Panel.exe"), b"stub").unwrap();

    // Launch never produces a window: every backoff probe comes up empty.
    let mock = MockEngine::new();

    let mut wd = watchdog(
        &mock,
        app_config(0),
        regions_config(dir.path().to_path_buf()),
    );
    let pause = wd.run_cycle().await.unwrap();
    assert_eq!(mock.launches.lock().unwrap().len(), 1);
    assert_eq!(pause, Duration::from_secs(5));

    // The next cycle starts acquisition from scratch.
    wd.run_cycle().await.unwrap();
    assert_eq!(mock.launches.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn running_process_without_a_window_defers_relaunch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Panel.exe"), b"stub").unwrap();

    let mock = MockEngine::new();
    mock.set_process_count("panel.exe", 1);

    let mut wd = watchdog(
        &mock,
        app_config(0),
        regions_config(dir.path().to_path_buf()),
    );

    // Twelve probes tolerate the windowless process.
    for _ in 0..12 {
        let pause = wd.run_cycle().await.unwrap();
        assert_eq!(pause, Duration::ZERO);
        assert!(mock.launches.lock().unwrap().is_empty());
    }

    // The thirteenth gives up waiting and relaunches over it.
    wd.run_cycle().await.unwrap();
    assert_eq!(mock.launches.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unparseable_capture_falls_back_to_screen_region() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    mock.push_ocr("");
    mock.push_ocr(&entry_aged(2, "route check OK"));

    let mut wd = watchdog(&mock, app_config(0), regions_config(PathBuf::from("/tmp")));
    let pause = wd.run_cycle().await.unwrap();

    assert_eq!(pause, Duration::from_secs(60));
    assert_eq!(mock.screen_captures.load(Ordering::SeqCst), 1);
    assert!(mock.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cannot_add_state_restarts_the_shell() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    mock.push_ocr(&entry_aged(1, "cannot add route to table"));

    let mut wd = watchdog(&mock, app_config(0), regions_config(PathBuf::from("/tmp")));
    wd.run_cycle().await.unwrap();

    assert_eq!(mock.shell_restarts.load(Ordering::SeqCst), 1);
    assert!(mock.clicks().is_empty());
}

// A stale cannot-add entry gets both remedies in the same cycle: the
// shell restart and the ordinary staleness click.
#[tokio::test(start_paused = true)]
async fn stale_cannot_add_entry_still_reaches_the_staleness_decision() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    mock.push_ocr(&entry_aged(90, "cannot add route to table"));

    let mut wd = watchdog(&mock, app_config(0), regions_config(PathBuf::from("/tmp")));
    wd.run_cycle().await.unwrap();

    assert_eq!(mock.shell_restarts.load(Ordering::SeqCst), 1);
    assert_eq!(mock.clicks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconcile_mismatch_resets_workers_and_replays_onboarding() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);
    mock.set_process_count("worker.exe", 2);

    let window = WindowInfo {
        id: WindowId(11),
        title: "My Panel".to_string(),
        pid: 100,
    };
    let reconcile = ReconcileConfig {
        process_name: "worker.exe".to_string(),
        expected_count: 4,
        kill_point_pct: Some(PointPct { x: 0.9, y: 0.1 }),
        delay_minutes: 5,
    };
    let first_run = FirstRunConfig {
        initial_wait_seconds: 0,
        detect_region: None,
        keywords: Vec::new(),
        clicks: vec![panelwatch::config::ClickStep {
            x_pct: 0.5,
            y_pct: 0.5,
            wait_s: 0.0,
        }],
    };
    let sequencer = FirstRunSequencer::new(mock.as_ref(), &first_run);

    let matched = run_reconcile_check(mock.as_ref(), &window, &reconcile, &sequencer)
        .await
        .unwrap();
    assert!(!matched);

    // Kill control at (0.9, 0.1), then the onboarding click at (0.5, 0.5).
    assert_eq!(mock.clicks(), vec![(1000, 170), (600, 450)]);
}

#[tokio::test(start_paused = true)]
async fn reconcile_match_clicks_nothing() {
    let mock = MockEngine::new();
    mock.set_process_count("worker.exe", 4);

    let window = WindowInfo {
        id: WindowId(11),
        title: "My Panel".to_string(),
        pid: 100,
    };
    let reconcile = ReconcileConfig {
        process_name: "worker.exe".to_string(),
        expected_count: 4,
        kill_point_pct: Some(PointPct { x: 0.9, y: 0.1 }),
        delay_minutes: 5,
    };
    let first_run = FirstRunConfig::default();
    let sequencer = FirstRunSequencer::new(mock.as_ref(), &first_run);

    let matched = run_reconcile_check(mock.as_ref(), &window, &reconcile, &sequencer)
        .await
        .unwrap();
    assert!(matched);
    assert!(mock.clicks().is_empty());
}

// Without a detection region and keywords there is nothing to gate on,
// so an unforced run must skip rather than assume onboarding is needed.
#[tokio::test(start_paused = true)]
async fn unforced_onboarding_without_a_detection_gate_skips_the_clicks() {
    let mock = MockEngine::new();
    mock.add_window(11, "My Panel", 100);

    let window = WindowInfo {
        id: WindowId(11),
        title: "My Panel".to_string(),
        pid: 100,
    };
    let first_run = FirstRunConfig {
        initial_wait_seconds: 0,
        detect_region: None,
        keywords: Vec::new(),
        clicks: vec![panelwatch::config::ClickStep {
            x_pct: 0.5,
            y_pct: 0.5,
            wait_s: 0.0,
        }],
    };
    let sequencer = FirstRunSequencer::new(mock.as_ref(), &first_run);

    sequencer.run(&window, false).await.unwrap();
    assert!(mock.clicks().is_empty());
}
