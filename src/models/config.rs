use crate::models::Operation;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Runtime settings from `settings.yaml`, overridable through `OPTRACK_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory for rotating log files
    pub log_dir: String,

    /// Prefix of log file names
    pub log_prefix: String,

    pub debug_mode: bool,

    /// Mirror logs to the console
    pub console_output: bool,

    /// Buffer size of the reply channel (backend events are never dropped)
    pub bus_capacity: usize,

    /// Buffer size of the per-run and broker change notification channels
    pub state_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            log_prefix: "optrack".to_string(),
            debug_mode: false,
            console_output: true,
            bus_capacity: 256,
            state_capacity: 100,
        }
    }
}

/// On-disk shape of `operations.yaml`.
///
/// Operations are keyed by id and keep their declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(rename = "Operations", default)]
    pub operations: IndexMap<String, OperationDef>,
}

/// An operation entry in `operations.yaml`; the id is the map key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDef {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_message: Option<String>,

    /// Step id → step title, in execution order
    pub steps: IndexMap<String, String>,
}

impl OperationDef {
    pub fn into_operation(self, id: String) -> Operation {
        Operation {
            id,
            title: self.title,
            success_title: self.success_title,
            success_message: self.success_message,
            steps: self
                .steps
                .into_iter()
                .map(|(id, title)| crate::models::Step { id, title })
                .collect(),
        }
    }
}

impl From<&Operation> for OperationDef {
    fn from(op: &Operation) -> Self {
        Self {
            title: op.title.clone(),
            success_title: op.success_title.clone(),
            success_message: op.success_message.clone(),
            steps: op
                .steps
                .iter()
                .map(|s| (s.id.clone(), s.title.clone()))
                .collect(),
        }
    }
}
