use std::io::Write;

use tempfile::NamedTempFile;

use crate::config::{load_app_config, load_regions_config, validate_all};
use crate::errors::WatchdogError;

fn write_yaml(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const MINIMAL_APP: &str = r#"
window:
  title_substring: "panel"
layout:
  width: 1004
  height: 731
watchdog:
  poll_seconds: 60
"#;

const MINIMAL_REGIONS: &str = r#"
panel:
  dir: "/opt/panel"
log_region_pct: { x: 0.03, y: 0.58, w: 0.94, h: 0.37 }
button_point_pct: { x: 0.84, y: 0.26 }
"#;

#[test]
fn minimal_app_config_fills_defaults() {
    let file = write_yaml(MINIMAL_APP);
    let app = load_app_config(file.path()).unwrap();
    assert_eq!(app.watchdog.warm_timeout_minutes, 40.0);
    assert_eq!(app.watchdog.general_timeout_minutes, 60.0);
    assert_eq!(app.watchdog.action_debounce_seconds, 180);
    assert!(app.watchdog.normalize_every_loop);
    assert!(!app.watchdog.debug_print_ocr);
    assert_eq!(app.layout.margin_right, 0);
    assert!(app.validate().is_empty());
}

#[test]
fn minimal_regions_config_fills_defaults() {
    let file = write_yaml(MINIMAL_REGIONS);
    let regions = load_regions_config(file.path()).unwrap();
    assert_eq!(regions.panel.exe_name, "Panel.exe");
    // An omitted first_run section and an empty one carry the same
    // defaults.
    assert_eq!(regions.panel.first_run.initial_wait_seconds, 10);
    assert_eq!(
        crate::config::FirstRunConfig::default().initial_wait_seconds,
        10
    );
    assert!(regions.panel.first_run.clicks.is_empty());
    assert!(regions.reconcile.is_none());
    assert!(regions.validate().is_empty());
}

#[test]
fn reconcile_defaults_and_requirements() {
    let file = write_yaml(
        r#"
panel:
  dir: "/opt/panel"
log_region_pct: { x: 0.03, y: 0.58, w: 0.94, h: 0.37 }
button_point_pct: { x: 0.84, y: 0.26 }
reconcile:
  process_name: worker.exe
  kill_point_pct: { x: 0.9, y: 0.1 }
"#,
    );
    let regions = load_regions_config(file.path()).unwrap();
    let rc = regions.reconcile.as_ref().unwrap();
    assert_eq!(rc.expected_count, 4);
    assert_eq!(rc.delay_minutes, 5);
    assert!(regions.validate().is_empty());
}

#[test]
fn malformed_yaml_is_an_invalid_configuration_error() {
    let file = write_yaml("window: [not, a, mapping");
    match load_app_config(file.path()) {
        Err(WatchdogError::InvalidConfiguration(_)) => {}
        other => panic!("expected InvalidConfiguration, got {other:?}"),
    }
}

#[test]
fn validation_collects_every_problem_at_once() {
    let app_file = write_yaml(
        r#"
window:
  title_substring: "  "
layout:
  width: 0
  height: 731
watchdog:
  poll_seconds: 0
"#,
    );
    let regions_file = write_yaml(
        r#"
panel:
  dir: "/opt/panel"
button_point_pct: { x: 1.5, y: 0.26 }
"#,
    );
    let app = load_app_config(app_file.path()).unwrap();
    let regions = load_regions_config(regions_file.path()).unwrap();

    let err = validate_all(&app, &regions).unwrap_err();
    let WatchdogError::InvalidConfiguration(report) = err else {
        panic!("expected InvalidConfiguration");
    };
    let lines: Vec<&str> = report.lines().collect();
    assert!(lines.len() >= 4, "want all problems reported, got: {report}");
    assert!(report.contains("title_substring"));
    assert!(report.contains("poll_seconds"));
    assert!(report.contains("log_region"));
    assert!(report.contains("button_point_pct"));
}

#[test]
fn out_of_range_click_steps_are_rejected() {
    let file = write_yaml(
        r#"
panel:
  dir: "/opt/panel"
  first_run:
    clicks:
      - { x_pct: 0.5, y_pct: 1.2 }
log_region_pct: { x: 0.03, y: 0.58, w: 0.94, h: 0.37 }
button_point_pct: { x: 0.84, y: 0.26 }
"#,
    );
    let regions = load_regions_config(file.path()).unwrap();
    let problems = regions.validate();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("clicks[0]"));
}
