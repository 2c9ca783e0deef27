// optrack - operation progress tracking and interactive prompt brokering
//
// This is the library crate containing the core logic and data structures.
// The binary crate (main.rs) replays recorded backend sessions through it.

pub mod broker;
pub mod bus;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod replay;
pub mod state;

// Re-export commonly used types for convenience
pub use broker::{BrokerSubscription, PromptChange, Resolution, SignalBroker};
pub use bus::{BackendEvent, BusError, EventBus, ReplyEvent, ReplySink, StepEvent};
pub use catalog::{CatalogError, OperationCatalog};
pub use channel::{StepEventChannel, StepSubscription};
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{Operation, OperationState, RunOutcome, Settings, Step, StepStatus};
pub use state::{NotDone, RunChange, RunId, RunSession};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
