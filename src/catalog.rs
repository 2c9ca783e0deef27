// Operation catalog
//
// Immutable lookup table from operation id to its static definition. A run
// starts by copying one of these into a fresh OperationState.

use crate::models::{CatalogFile, Operation, OperationState, Step};
use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

/// Errors raised while building or querying a catalog
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation {0} is defined more than once")]
    DuplicateOperation(String),

    #[error("Operation {operation} defines step {step} more than once")]
    DuplicateStep { operation: String, step: String },

    #[error("Operation {0} has no steps")]
    NoSteps(String),
}

/// Static operation definitions, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationCatalog {
    operations: IndexMap<String, Operation>,
}

impl OperationCatalog {
    /// Build a catalog, validating ids and step lists.
    pub fn new(operations: impl IntoIterator<Item = Operation>) -> Result<Self, CatalogError> {
        let mut map = IndexMap::new();

        for op in operations {
            if op.steps.is_empty() {
                return Err(CatalogError::NoSteps(op.id));
            }

            let mut seen = IndexSet::new();
            for step in &op.steps {
                if !seen.insert(step.id.as_str()) {
                    return Err(CatalogError::DuplicateStep {
                        operation: op.id.clone(),
                        step: step.id.clone(),
                    });
                }
            }

            if map.contains_key(&op.id) {
                return Err(CatalogError::DuplicateOperation(op.id));
            }
            map.insert(op.id.clone(), op);
        }

        Ok(Self { operations: map })
    }

    /// The operations shipped with the client.
    pub fn builtin() -> Self {
        let install = |id: &str, app: &str| Operation {
            id: id.to_string(),
            title: format!("Installing {app}"),
            success_title: Some(format!("{app} installed")),
            success_message: Some(format!(
                "{app} was installed. Trust the developer certificate in Settings before opening it."
            )),
            steps: vec![
                Step::new("download", format!("Downloading {app}")),
                Step::new("install", format!("Signing and installing {app}")),
                Step::new("pairing", "Placing pairing file"),
            ],
        };

        let operations = vec![
            install("install_sidestore", "SideStore"),
            install("install_livecontainer", "LiveContainer"),
            Operation {
                id: "sideload".to_string(),
                title: "Sideloading app".to_string(),
                success_title: None,
                success_message: None,
                steps: vec![Step::new("install", "Signing and installing app")],
            },
        ];

        Self {
            operations: operations.into_iter().map(|op| (op.id.clone(), op)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Operation> {
        self.operations.get(id)
    }

    /// Initial state for a new run of `id`.
    pub fn start_state(&self, id: &str) -> Result<OperationState, CatalogError> {
        self.get(id)
            .cloned()
            .map(OperationState::new)
            .ok_or_else(|| CatalogError::UnknownOperation(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Default for OperationCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TryFrom<CatalogFile> for OperationCatalog {
    type Error = CatalogError;

    fn try_from(file: CatalogFile) -> Result<Self, Self::Error> {
        Self::new(
            file.operations
                .into_iter()
                .map(|(id, def)| def.into_operation(id)),
        )
    }
}

impl From<&OperationCatalog> for CatalogFile {
    fn from(catalog: &OperationCatalog) -> Self {
        Self {
            operations: catalog
                .operations()
                .map(|op| (op.id.clone(), op.into()))
                .collect(),
        }
    }
}
