//! Integration tests for the step event reducer and derived run views
//!
//! These tests verify that folding step events:
//! - Produces the expected sets for complete, failed and out-of-order runs
//! - Keeps the completed and failed sets disjoint for any event sequence
//! - Never flips a finished run back to in progress

use optrack::models::{OperationState, RunOutcome, StepStatus};
use optrack::state::{apply, apply_all};
use optrack::{OperationCatalog, StepEvent};
use proptest::prelude::*;

fn fresh() -> OperationState {
    OperationCatalog::builtin()
        .start_state("install_sidestore")
        .unwrap()
}

fn ids(set: &indexmap::IndexSet<String>) -> Vec<&str> {
    set.iter().map(String::as_str).collect()
}

#[test]
fn test_all_steps_complete() {
    let events = [
        StepEvent::started("download"),
        StepEvent::finished("download"),
        StepEvent::started("install"),
        StepEvent::finished("install"),
        StepEvent::started("pairing"),
        StepEvent::finished("pairing"),
    ];

    let state = apply_all(&fresh(), &events);

    assert_eq!(ids(&state.completed), ["download", "install", "pairing"]);
    assert!(state.failed.is_empty());
    assert!(state.is_done());
    assert_eq!(state.outcome(), RunOutcome::Succeeded);
    assert_eq!(state.headline(), "SideStore installed");
    assert_eq!(state.status_line(), "Operation completed");
    assert!(state.is_dismissable());
}

#[test]
fn test_failure_ends_run_and_skips_remaining_steps() {
    let events = [
        StepEvent::started("download"),
        StepEvent::finished("download"),
        StepEvent::started("install"),
        StepEvent::failed("install", "network error"),
    ];

    let state = apply_all(&fresh(), &events);

    assert_eq!(ids(&state.started), ["download", "install"]);
    assert_eq!(ids(&state.completed), ["download"]);
    assert_eq!(state.failed.len(), 1);
    assert_eq!(state.failed[0].step_id, "install");
    assert_eq!(state.failed[0].extra_details, "network error");

    assert!(state.is_done());
    assert_eq!(state.outcome(), RunOutcome::Failed);
    assert_eq!(state.step_status("download"), StepStatus::Completed);
    assert_eq!(state.step_status("install"), StepStatus::Failed);
    assert_eq!(state.step_status("pairing"), StepStatus::Skipped);
    assert_eq!(state.status_line(), "Operation failed.");
    assert_eq!(state.first_error_details().as_deref(), Some("network error"));
}

#[test]
fn test_failure_without_start() {
    let state = apply(&fresh(), &StepEvent::failed("download", "disk full"));

    assert!(state.started.contains("download"));
    assert!(state.is_failed("download"));
    assert!(!state.completed.contains("download"));
}

#[test]
fn test_step_views_carry_error_summary() {
    let details = "Traceback\n● Could not reach the signing server\n● Certificate limit reached";
    let state = apply_all(
        &fresh(),
        &[
            StepEvent::finished("download"),
            StepEvent::failed("install", details),
        ],
    );

    let views = state.step_views();
    assert_eq!(views.len(), 3);
    assert_eq!(views[0].status, StepStatus::Completed);
    assert_eq!(views[1].status, StepStatus::Failed);
    assert_eq!(
        views[1].error_summary.as_deref(),
        Some("Certificate limit reached")
    );
    assert_eq!(views[1].details.as_deref(), Some(details));
    assert_eq!(views[2].status, StepStatus::Skipped);
    assert!(views[2].error_summary.is_none());
}

#[test]
fn test_in_progress_run_shows_no_skipped_steps() {
    let state = apply(&fresh(), &StepEvent::started("download"));

    assert_eq!(state.outcome(), RunOutcome::InProgress);
    assert_eq!(state.status_line(), "Please wait...");
    assert_eq!(state.step_status("install"), StepStatus::NotStarted);
    assert!(!state.is_dismissable());
}

// ============================================================================
// Properties
// ============================================================================

fn step_id() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => prop::sample::select(vec!["download", "install", "pairing"]),
        1 => Just("unknown"),
    ]
    .prop_map(str::to_string)
}

fn step_event() -> impl Strategy<Value = StepEvent> {
    prop_oneof![
        step_id().prop_map(StepEvent::started),
        step_id().prop_map(StepEvent::finished),
        (step_id(), "[a-z ]{0,12}").prop_map(|(id, details)| StepEvent::failed(id, details)),
    ]
}

proptest! {
    #[test]
    fn prop_completed_and_failed_are_disjoint(events in prop::collection::vec(step_event(), 0..24)) {
        let state = apply_all(&fresh(), &events);
        for failure in &state.failed {
            prop_assert!(!state.completed.contains(&failure.step_id));
        }
    }

    #[test]
    fn prop_started_covers_completed_and_failed(events in prop::collection::vec(step_event(), 0..24)) {
        let state = apply_all(&fresh(), &events);
        for id in &state.completed {
            prop_assert!(state.started.contains(id));
        }
        for failure in &state.failed {
            prop_assert!(state.started.contains(&failure.step_id));
        }
    }

    #[test]
    fn prop_each_step_fails_at_most_once(events in prop::collection::vec(step_event(), 0..24)) {
        let state = apply_all(&fresh(), &events);
        let mut seen = std::collections::HashSet::new();
        for failure in &state.failed {
            prop_assert!(seen.insert(failure.step_id.clone()));
        }
    }

    #[test]
    fn prop_apply_is_idempotent(
        events in prop::collection::vec(step_event(), 0..16),
        event in step_event(),
    ) {
        let state = apply_all(&fresh(), &events);
        let once = apply(&state, &event);
        let twice = apply(&once, &event);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_finished_after_failed_is_noop(
        events in prop::collection::vec(step_event(), 0..16),
        id in prop::sample::select(vec!["download", "install", "pairing"]),
    ) {
        let state = apply_all(&fresh(), &events);
        let failed = apply(&state, &StepEvent::failed(id, "boom"));
        let finished = apply(&failed, &StepEvent::finished(id));
        prop_assert_eq!(failed, finished);
    }

    #[test]
    fn prop_done_is_monotonic(events in prop::collection::vec(step_event(), 1..24)) {
        let mut state = fresh();
        let mut was_done = false;
        for event in &events {
            state = apply(&state, event);
            if was_done {
                prop_assert!(state.is_done());
            }
            was_done = state.is_done();
        }
    }
}
