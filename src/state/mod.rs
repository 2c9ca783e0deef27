// Run state management
//
// RunSession owns the OperationState of one operation run behind a RwLock,
// folds step events into it through the pure reducer, and emits change
// events so a presentation layer can re-render without polling.

pub mod reducer;

pub use reducer::{apply, apply_all};

use crate::bus::StepEvent;
use crate::catalog::{CatalogError, OperationCatalog};
use crate::models::{OperationState, RunOutcome, StepId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one run, used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

impl RunId {
    fn next() -> Self {
        Self(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Change events emitted when a run's state moves
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunChange {
    /// The first step of the run started
    RunStarted,

    StepStarted { step_id: StepId },
    StepCompleted { step_id: StepId },
    StepFailed { step_id: StepId, extra_details: String },

    /// The run reached a terminal condition
    RunDone { outcome: RunOutcome },
}

/// Returned when a run is dismissed before it is done; hands the session back.
#[derive(Error, Debug)]
#[error("Run {} cannot be dismissed before it is done", .0.id())]
pub struct NotDone(pub RunSession);

#[derive(Debug)]
struct RunInner {
    id: RunId,
    state: RwLock<OperationState>,
    change_tx: broadcast::Sender<RunChange>,

    /// Set while a step event channel is feeding this run
    attached: AtomicBool,
}

/// Handle to one operation run.
///
/// Created when a run starts and consumed by [`dismiss()`](Self::dismiss)
/// once it is done. Consumers only ever see snapshots; the state changes
/// solely through [`apply()`](Self::apply).
///
/// # Related Types
///
/// - [`crate::channel::StepEventChannel`]: feeds backend step events into a session
/// - [`RunChange`]: change notifications
#[derive(Debug)]
pub struct RunSession {
    inner: Arc<RunInner>,
}

impl RunSession {
    /// Start a run of `operation_id` with an empty state
    ///
    /// `capacity` is the buffer size of the change notification channel.
    pub fn start(
        catalog: &OperationCatalog,
        operation_id: &str,
        capacity: usize,
    ) -> Result<Self, CatalogError> {
        let state = catalog.start_state(operation_id)?;
        Ok(Self::from_state(state, capacity))
    }

    pub fn from_state(state: OperationState, capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(capacity);
        let id = RunId::next();

        tracing::info!("Run {} started for operation {}", id, state.current.id);

        Self {
            inner: Arc::new(RunInner {
                id,
                state: RwLock::new(state),
                change_tx,
                attached: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> RunId {
        self.inner.id
    }

    pub fn operation_id(&self) -> String {
        self.read(|s| s.current.id.clone())
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> OperationState {
        self.inner.read_state().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let done = session.read(|state| state.is_done());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&OperationState) -> R,
    {
        f(&self.inner.read_state())
    }

    /// Fold one step event into the run and emit the resulting changes
    pub fn apply(&self, event: &StepEvent) -> Vec<RunChange> {
        self.inner.apply(event)
    }

    /// Subscribe to change events for this run
    pub fn subscribe(&self) -> broadcast::Receiver<RunChange> {
        self.inner.change_tx.subscribe()
    }

    pub fn is_done(&self) -> bool {
        self.read(|s| s.is_done())
    }

    /// Whether a step event channel currently feeds this run
    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::Acquire)
    }

    /// Discard the run, returning its final state.
    ///
    /// Only a finished run can be dismissed.
    pub fn dismiss(self) -> Result<OperationState, NotDone> {
        if !self.is_done() {
            return Err(NotDone(self));
        }

        tracing::info!("Run {} dismissed", self.id());
        Ok(self.snapshot())
    }

    pub(crate) fn handle(&self) -> RunHandle {
        RunHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Internal shared handle given to the step event channel worker
#[derive(Clone, Debug)]
pub(crate) struct RunHandle {
    inner: Arc<RunInner>,
}

impl RunHandle {
    pub(crate) fn id(&self) -> RunId {
        self.inner.id
    }

    pub(crate) fn apply(&self, event: &StepEvent) -> Vec<RunChange> {
        self.inner.apply(event)
    }

    /// Claim the single attachment slot; false if already claimed
    pub(crate) fn try_attach(&self) -> bool {
        self.inner
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.inner.attached.store(false, Ordering::Release);
    }
}

impl RunInner {
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, OperationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: &StepEvent) -> Vec<RunChange> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let next = reducer::apply(&state, event);
        let changes = detect_changes(&state, &next);
        *state = next;

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.change_tx.send(change.clone());
        }

        if changes
            .iter()
            .any(|c| matches!(c, RunChange::RunDone { .. }))
        {
            tracing::info!("Run {} done: {:?}", self.id, state.outcome());
        }

        changes
    }
}

/// Detect what changed between two states and generate events
fn detect_changes(old: &OperationState, new: &OperationState) -> Vec<RunChange> {
    let mut changes = Vec::new();

    if old.started.is_empty() && !new.started.is_empty() {
        changes.push(RunChange::RunStarted);
    }

    for step_id in new.started.difference(&old.started) {
        changes.push(RunChange::StepStarted {
            step_id: step_id.clone(),
        });
    }

    for step_id in new.completed.difference(&old.completed) {
        changes.push(RunChange::StepCompleted {
            step_id: step_id.clone(),
        });
    }

    for failure in new.failed.iter().skip(old.failed.len()) {
        changes.push(RunChange::StepFailed {
            step_id: failure.step_id.clone(),
            extra_details: failure.extra_details.clone(),
        });
    }

    if !old.is_done() && new.is_done() {
        changes.push(RunChange::RunDone {
            outcome: new.outcome(),
        });
    }

    changes
}
