use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Identifier of a step within an operation (e.g. `"download"`).
pub type StepId = String;

/// Matches the bullet marker the backend puts in front of each error line.
static BULLET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"●\s*").expect("Invalid bullet regex"));

/// One unit of an operation with its own lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub title: String,
}

impl Step {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Static definition of a backend task and its ordered steps.
///
/// Step order is the only ordering signal used for display; lifecycle
/// events may arrive for steps in any order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_message: Option<String>,

    pub steps: Vec<Step>,
}

impl Operation {
    /// Check whether `step_id` is part of this operation's definition
    pub fn has_step(&self, step_id: &str) -> bool {
        self.steps.iter().any(|s| s.id == step_id)
    }
}

/// A recorded step failure, kept in first-failure-first order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStep {
    pub step_id: StepId,
    pub extra_details: String,
}

/// Render status of a single step, derived from an [`OperationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    NotStarted,
    Started,
    Completed,
    Failed,
    /// Never started and the run finished with failures
    Skipped,
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunOutcome {
    InProgress,
    Succeeded,
    Failed,
}

/// Presentation-ready row for one step, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepView {
    pub id: StepId,
    pub title: String,
    pub status: StepStatus,
    /// Short one-line error for failed steps
    pub error_summary: Option<String>,
    /// Full failure details with leading blank lines removed
    pub details: Option<String>,
}

/// Progress of one operation run.
///
/// Owned exclusively by the tracker and replaced wholesale on every update.
/// `done` and per-step status are derived rather than stored so they always
/// agree with the latest fold.
///
/// # Invariants
///
/// - `completed` and the step ids in `failed` are disjoint
/// - every id in `completed` or `failed` is also in `started`
/// - a step appears in `failed` at most once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationState {
    pub current: Operation,
    pub started: IndexSet<StepId>,
    pub completed: IndexSet<StepId>,
    pub failed: Vec<FailedStep>,
}

impl OperationState {
    /// Fresh state for a run that has not seen any events yet.
    pub fn new(current: Operation) -> Self {
        Self {
            current,
            started: IndexSet::new(),
            completed: IndexSet::new(),
            failed: Vec::new(),
        }
    }

    pub fn failure_for(&self, step_id: &str) -> Option<&FailedStep> {
        self.failed.iter().find(|f| f.step_id == step_id)
    }

    pub fn is_failed(&self, step_id: &str) -> bool {
        self.failure_for(step_id).is_some()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Whether the run has reached a terminal condition.
    ///
    /// Either every step completed, or at least one step failed and every
    /// started step has resolved. Set sizes are compared, never event counts.
    pub fn is_done(&self) -> bool {
        let all_completed = self.completed.len() == self.current.steps.len();
        let failed_and_settled = self.has_failures()
            && self.started.len() == self.completed.len() + self.failed.len();
        all_completed || failed_and_settled
    }

    pub fn outcome(&self) -> RunOutcome {
        if !self.is_done() {
            RunOutcome::InProgress
        } else if self.has_failures() {
            RunOutcome::Failed
        } else {
            RunOutcome::Succeeded
        }
    }

    pub fn step_status(&self, step_id: &str) -> StepStatus {
        if self.is_failed(step_id) {
            StepStatus::Failed
        } else if self.completed.contains(step_id) {
            StepStatus::Completed
        } else if self.started.contains(step_id) {
            StepStatus::Started
        } else if self.outcome() == RunOutcome::Failed {
            StepStatus::Skipped
        } else {
            StepStatus::NotStarted
        }
    }

    /// Title to show: the success title once the run succeeded, if any.
    pub fn headline(&self) -> &str {
        match (self.outcome(), &self.current.success_title) {
            (RunOutcome::Succeeded, Some(title)) => title,
            _ => &self.current.title,
        }
    }

    pub fn status_line(&self) -> &'static str {
        match self.outcome() {
            RunOutcome::InProgress => "Please wait...",
            RunOutcome::Succeeded => "Operation completed",
            RunOutcome::Failed => "Operation failed.",
        }
    }

    /// Success message, only once the run succeeded.
    pub fn success_message(&self) -> Option<&str> {
        match self.outcome() {
            RunOutcome::Succeeded => self.current.success_message.as_deref(),
            _ => None,
        }
    }

    /// A run may only be dismissed after it is done.
    pub fn is_dismissable(&self) -> bool {
        self.is_done()
    }

    /// Details of the first failure, suitable for copying into a bug report.
    pub fn first_error_details(&self) -> Option<String> {
        self.failed
            .first()
            .map(|f| trim_leading_newlines(&f.extra_details).to_string())
    }

    pub fn step_views(&self) -> Vec<StepView> {
        self.current
            .steps
            .iter()
            .map(|step| {
                let failure = self.failure_for(&step.id);
                StepView {
                    id: step.id.clone(),
                    title: step.title.clone(),
                    status: self.step_status(&step.id),
                    error_summary: failure.map(|f| error_summary(&f.extra_details)),
                    details: failure.map(|f| trim_leading_newlines(&f.extra_details).to_string()),
                }
            })
            .collect()
    }
}

/// Reduce a multi-line backend error to the line worth showing inline.
///
/// The backend marks each error in its report with a `●` bullet; the last
/// bulleted line is the most specific one. Without any bullet the details
/// are returned with leading blank lines removed.
pub fn error_summary(extra_details: &str) -> String {
    match extra_details.lines().filter(|line| line.contains('●')).last() {
        Some(line) => BULLET_PATTERN.replace(line, "").trim().to_string(),
        None => trim_leading_newlines(extra_details).to_string(),
    }
}

fn trim_leading_newlines(text: &str) -> &str {
    text.trim_start_matches(['\n', '\r'])
}
