use std::time::Duration;

use crate::recovery::{evaluate, is_warm_up_message, RecoveryState, RecoveryVerdict, Thresholds};

const THRESHOLDS: Thresholds = Thresholds {
    warm_minutes: 40.0,
    general_minutes: 60.0,
};

const DEBOUNCE: Duration = Duration::from_secs(180);
const LONG_AGO: Duration = Duration::from_secs(3600);

#[test]
fn warm_up_matching_tolerates_ocr_variants() {
    assert!(is_warm_up_message("warm up in progress"));
    assert!(is_warm_up_message("Warm-Up phase"));
    assert!(is_warm_up_message("warmup started"));
    assert!(is_warm_up_message("WARM  UP"));
    assert!(is_warm_up_message("[warm] up sequence"));

    assert!(!is_warm_up_message("warmed up and ready"));
    assert!(!is_warm_up_message("lukewarm response"));
    assert!(!is_warm_up_message("all systems nominal"));
}

#[test]
fn fresh_entries_are_healthy() {
    assert_eq!(
        evaluate(10.0, false, THRESHOLDS, LONG_AGO, DEBOUNCE),
        RecoveryVerdict::Healthy
    );
    assert_eq!(
        evaluate(39.9, true, THRESHOLDS, LONG_AGO, DEBOUNCE),
        RecoveryVerdict::Healthy
    );
}

#[test]
fn warm_entries_use_the_tighter_threshold() {
    // 45 minutes is stale for a warm-up entry but fine for a general one.
    assert!(matches!(
        evaluate(45.0, true, THRESHOLDS, LONG_AGO, DEBOUNCE),
        RecoveryVerdict::Trigger { .. }
    ));
    assert_eq!(
        evaluate(45.0, false, THRESHOLDS, LONG_AGO, DEBOUNCE),
        RecoveryVerdict::Healthy
    );
}

#[test]
fn general_threshold_is_inclusive_at_the_boundary() {
    assert!(matches!(
        evaluate(60.0, false, THRESHOLDS, LONG_AGO, DEBOUNCE),
        RecoveryVerdict::Trigger { .. }
    ));
    assert_eq!(
        evaluate(59.9, false, THRESHOLDS, LONG_AGO, DEBOUNCE),
        RecoveryVerdict::Healthy
    );
}

#[test]
fn debounce_suppresses_but_reports_remaining() {
    let verdict = evaluate(90.0, false, THRESHOLDS, Duration::from_secs(10), DEBOUNCE);
    match verdict {
        RecoveryVerdict::Suppressed { remaining, .. } => {
            assert_eq!(remaining, Duration::from_secs(170));
        }
        other => panic!("expected Suppressed, got {other:?}"),
    }

    assert!(matches!(
        evaluate(90.0, false, THRESHOLDS, Duration::from_secs(181), DEBOUNCE),
        RecoveryVerdict::Trigger { .. }
    ));
}

#[test]
fn verdict_reason_names_the_threshold() {
    match evaluate(45.0, true, THRESHOLDS, LONG_AGO, DEBOUNCE) {
        RecoveryVerdict::Trigger { reason } => assert!(reason.contains("warm-up")),
        other => panic!("expected Trigger, got {other:?}"),
    }
    match evaluate(70.0, false, THRESHOLDS, LONG_AGO, DEBOUNCE) {
        RecoveryVerdict::Trigger { reason } => assert!(reason.contains("general")),
        other => panic!("expected Trigger, got {other:?}"),
    }
}

#[test]
fn fresh_state_starts_inside_the_cooldown() {
    let state = RecoveryState::new(DEBOUNCE);
    assert!(state.since_last_action() < DEBOUNCE);
}

#[test]
fn marking_an_action_resets_the_clock() {
    let mut state = RecoveryState::new(Duration::from_secs(0));
    std::thread::sleep(Duration::from_millis(5));
    let before = state.since_last_action();
    state.mark_action();
    assert!(state.since_last_action() < before);
}
