// Step event reducer
//
// Pure fold of step lifecycle events into an OperationState. No I/O, no
// locking; RunSession wraps it for shared access.

use crate::bus::StepEvent;
use crate::models::{FailedStep, OperationState};

/// Fold one step event into `previous`, returning the next state.
///
/// - `Started` marks the step started (idempotent).
/// - `Finished` marks it started if needed, then completed unless it has
///   already failed. A failure is final for its step.
/// - `Failed` marks it started if needed and, unless the step already
///   failed, records the failure and drops any earlier completion.
///
/// Events for step ids the operation does not define are ignored. Once the
/// run is done, a `Started` event for a step that never started is ignored
/// too: that step has already been rendered as skipped and `done` must not
/// flip back.
pub fn apply(previous: &OperationState, event: &StepEvent) -> OperationState {
    let step_id = event.step_id();
    if !previous.current.has_step(step_id) {
        tracing::warn!(
            "Ignoring event for step {} not defined by operation {}",
            step_id,
            previous.current.id
        );
        return previous.clone();
    }

    let mut next = previous.clone();

    match event {
        StepEvent::Started { step_id } => {
            if previous.is_done() && !previous.started.contains(step_id) {
                tracing::debug!("Ignoring late start of step {} after run finished", step_id);
            } else {
                next.started.insert(step_id.clone());
            }
        }

        StepEvent::Finished { step_id } => {
            next.started.insert(step_id.clone());
            if !next.is_failed(step_id) {
                next.completed.insert(step_id.clone());
            }
        }

        StepEvent::Failed {
            step_id,
            extra_details,
        } => {
            next.started.insert(step_id.clone());
            if !next.is_failed(step_id) {
                next.completed.shift_remove(step_id);
                next.failed.push(FailedStep {
                    step_id: step_id.clone(),
                    extra_details: extra_details.clone(),
                });
            }
        }
    }

    next
}

/// Fold a whole sequence of events, starting from `initial`.
pub fn apply_all<'a>(
    initial: &OperationState,
    events: impl IntoIterator<Item = &'a StepEvent>,
) -> OperationState {
    events
        .into_iter()
        .fold(initial.clone(), |state, event| apply(&state, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OperationCatalog;
    use crate::models::{RunOutcome, StepStatus};

    fn fresh() -> OperationState {
        OperationCatalog::builtin()
            .start_state("install_sidestore")
            .unwrap()
    }

    #[test]
    fn test_started_is_idempotent() {
        let once = apply(&fresh(), &StepEvent::started("download"));
        let twice = apply(&once, &StepEvent::started("download"));

        assert_eq!(once, twice);
        assert_eq!(twice.started.len(), 1);
    }

    #[test]
    fn test_finished_synthesizes_start() {
        let state = apply(&fresh(), &StepEvent::finished("install"));

        assert!(state.started.contains("install"));
        assert!(state.completed.contains("install"));
    }

    #[test]
    fn test_finished_after_failed_stays_failed() {
        let state = apply_all(
            &fresh(),
            &[
                StepEvent::started("install"),
                StepEvent::failed("install", "bad"),
                StepEvent::finished("install"),
            ],
        );

        assert!(!state.completed.contains("install"));
        assert_eq!(state.step_status("install"), StepStatus::Failed);
    }

    #[test]
    fn test_failure_overrides_completion() {
        let state = apply_all(
            &fresh(),
            &[
                StepEvent::finished("download"),
                StepEvent::failed("download", "checksum mismatch"),
            ],
        );

        assert!(state.completed.is_empty());
        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.failed[0].extra_details, "checksum mismatch");
    }

    #[test]
    fn test_duplicate_failure_keeps_first_details() {
        let state = apply_all(
            &fresh(),
            &[
                StepEvent::failed("install", "first"),
                StepEvent::failed("install", "second"),
            ],
        );

        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.failed[0].extra_details, "first");
    }

    #[test]
    fn test_unknown_step_is_ignored() {
        let before = fresh();
        let after = apply(&before, &StepEvent::failed("bogus", "??"));
        assert_eq!(before, after);
    }

    #[test]
    fn test_late_start_after_failure_stays_skipped() {
        let done = apply_all(
            &fresh(),
            &[
                StepEvent::started("download"),
                StepEvent::failed("download", "offline"),
            ],
        );
        assert_eq!(done.outcome(), RunOutcome::Failed);

        let after = apply(&done, &StepEvent::started("install"));
        assert!(after.is_done());
        assert_eq!(after.step_status("install"), StepStatus::Skipped);
    }

    #[test]
    fn test_failures_keep_arrival_order() {
        let state = apply_all(
            &fresh(),
            &[
                StepEvent::started("download"),
                StepEvent::started("install"),
                StepEvent::failed("install", "b"),
                StepEvent::failed("download", "a"),
            ],
        );

        let order: Vec<_> = state.failed.iter().map(|f| f.step_id.as_str()).collect();
        assert_eq!(order, vec!["install", "download"]);
    }
}
