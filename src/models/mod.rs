//! Data models for optrack.
//!
//! - [`Operation`] / [`Step`]: static operation definitions owned by the catalog
//! - [`OperationState`]: progress of one run, plus the derived views
//!   ([`StepStatus`], [`RunOutcome`], [`StepView`]) a presentation layer renders
//! - Prompt payloads: [`SelectableItem`], [`VerificationCode`], [`SelectionReply`]
//!   and the [`SelectionDraft`] checkbox model
//! - [`Settings`] and [`CatalogFile`]: configuration file shapes
//!
//! Nothing in here performs I/O or holds locks; mutation of run state goes
//! through [`crate::state`] and prompt state through [`crate::broker`].

pub mod config;
pub mod operation;
pub mod prompt;

pub use config::{CatalogFile, OperationDef, Settings};
pub use operation::{
    FailedStep, Operation, OperationState, RunOutcome, Step, StepId, StepStatus, StepView,
    error_summary,
};
pub use prompt::{
    PromptError, PromptKind, SelectableItem, SelectedIds, SelectionDraft, SelectionReply,
    VERIFICATION_CODE_LEN, VerificationCode,
};
