use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Required number of digits in a verification code.
pub const VERIFICATION_CODE_LEN: usize = 6;

/// The two kinds of backend-initiated prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Verification,
    Selection,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::Verification => write!(f, "verification"),
            PromptKind::Selection => write!(f, "selection"),
        }
    }
}

/// Errors raised while handling a prompt reply.
///
/// All of these leave the pending prompt open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Verification code must be exactly {VERIFICATION_CODE_LEN} digits")]
    InvalidCode,

    #[error("Item {0} was not offered by the pending selection prompt")]
    UnknownItem(String),

    #[error("Reply could not be delivered: {0}")]
    Delivery(String),
}

/// A validated six digit verification code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VerificationCode(String);

impl VerificationCode {
    /// Validate user input: exactly six ASCII digits, nothing else.
    pub fn parse(input: &str) -> Result<Self, PromptError> {
        if input.len() == VERIFICATION_CODE_LEN && input.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(input.to_string()))
        } else {
            Err(PromptError::InvalidCode)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VerificationCode {
    type Error = PromptError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VerificationCode> for String {
    fn from(code: VerificationCode) -> Self {
        code.0
    }
}

/// One entry offered by a selection prompt (a registered certificate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectableItem {
    /// Identifier echoed back in the reply (the certificate serial number)
    pub id: String,
    pub name: String,
    pub machine_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
}

impl SelectableItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        machine_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            machine_name: machine_name.into(),
            certificate_id: None,
            machine_id: None,
        }
    }

    /// Label shown next to the checkbox.
    pub fn label(&self) -> String {
        format!("{} - {}", self.name, self.machine_name)
    }
}

/// A non-empty list of chosen item ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SelectedIds(Vec<String>);

impl SelectedIds {
    /// Returns `None` for an empty list; an empty selection is never a
    /// legal reply.
    pub fn new(ids: Vec<String>) -> Option<Self> {
        if ids.is_empty() { None } else { Some(Self(ids)) }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl TryFrom<Vec<String>> for SelectedIds {
    type Error = &'static str;

    fn try_from(ids: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(ids).ok_or("selectedIds must not be empty")
    }
}

impl From<SelectedIds> for Vec<String> {
    fn from(ids: SelectedIds) -> Self {
        ids.0
    }
}

/// Reply to a selection prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionReply {
    Selected(SelectedIds),
    /// Revoke nothing; sent on the wire as `null`
    Cancel,
}

impl SelectionReply {
    /// Map a raw id list to a reply, treating an empty list as cancel.
    pub fn from_ids(ids: Vec<String>) -> Self {
        SelectedIds::new(ids).map_or(SelectionReply::Cancel, SelectionReply::Selected)
    }

    pub fn into_ids(self) -> Option<Vec<String>> {
        match self {
            SelectionReply::Selected(ids) => Some(ids.into()),
            SelectionReply::Cancel => None,
        }
    }
}

/// Checkbox state of an open selection dialog.
///
/// Every offered item starts out selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionDraft {
    offered: Vec<String>,
    selected: IndexSet<String>,
}

impl SelectionDraft {
    pub fn new(items: &[SelectableItem]) -> Self {
        let offered: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let selected = offered.iter().cloned().collect();
        Self { offered, selected }
    }

    /// Flip the checkbox for `id`. Ids that were not offered are ignored.
    pub fn toggle(&mut self, id: &str) {
        if !self.offered.iter().any(|o| o == id) {
            return;
        }
        if !self.selected.shift_remove(id) {
            self.selected.insert(id.to_string());
        }
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    /// Build the reply for "continue". Ids are listed in offer order; an
    /// empty draft becomes [`SelectionReply::Cancel`].
    pub fn into_reply(self) -> SelectionReply {
        let ids = self
            .offered
            .into_iter()
            .filter(|id| self.selected.contains(id))
            .collect();
        SelectionReply::from_ids(ids)
    }
}
