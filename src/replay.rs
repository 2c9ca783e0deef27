// Scripted backend replay
//
// Drives the full pipeline (bus, step event channel, signal broker) from a
// YAML script of backend events and user answers. Used by the binary to
// reproduce a captured session and by the integration tests.

use crate::broker::{PromptChange, Resolution, SignalBroker};
use crate::bus::{BackendEvent, EventBus};
use crate::catalog::OperationCatalog;
use crate::channel::StepEventChannel;
use crate::metrics::Metrics;
use crate::models::{
    OperationState, PromptError, PromptKind, SelectionDraft, SelectionReply, Settings,
};
use crate::state::{RunChange, RunSession};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;

/// How long to wait for a prompt to open or for the run to settle
const SETTLE_TIMEOUT: Duration = Duration::from_millis(500);

/// A recorded backend session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayScript {
    /// Operation id in the catalog
    pub operation: String,
    pub entries: Vec<ScriptEntry>,
}

/// One line of a script: either something the backend emits or the user's
/// answer to an open prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptEntry {
    Answer { answer: Answer },
    Event(BackendEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Answer {
    /// Type this into the verification prompt
    Verification(String),
    /// Continue the selection prompt with the default (everything checked)
    SelectAll,
    /// Continue the selection prompt with these ids checked
    Select(Vec<String>),
    /// Cancel the selection prompt
    Cancel,
}

impl Answer {
    fn kind(&self) -> PromptKind {
        match self {
            Answer::Verification(_) => PromptKind::Verification,
            Answer::SelectAll | Answer::Select(_) | Answer::Cancel => PromptKind::Selection,
        }
    }
}

impl ReplayScript {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml).context("Failed to parse replay script")
    }
}

/// Play `script` through a fresh bus and return the final run state.
///
/// Answers that fail validation are logged and skipped, just as a rejected
/// input leaves the dialog open in the client.
pub async fn replay(
    script: &ReplayScript,
    catalog: &OperationCatalog,
    settings: &Settings,
    metrics: Arc<Metrics>,
) -> Result<OperationState> {
    let runtime = tokio::runtime::Handle::current();
    let bus = EventBus::new(settings.bus_capacity);

    // Stand-in for the backend's reply listener
    let mut replies = bus.subscribe_replies();

    let session = RunSession::start(catalog, &script.operation, settings.state_capacity)?;
    let mut run_changes = session.subscribe();

    let channel = StepEventChannel::new(bus.clone(), Arc::clone(&metrics), runtime.clone());
    let broker = SignalBroker::new(
        Arc::new(bus.clone()),
        Arc::clone(&metrics),
        settings.state_capacity,
    );
    let mut prompt_changes = broker.subscribe();

    let step_subscription = channel
        .attach(&session)
        .ok_or_else(|| anyhow!("Run {} is already attached", session.id()))?;
    let broker_subscription = broker
        .attach(&bus, &runtime)
        .ok_or_else(|| anyhow!("Prompt listener already registered"))?;

    for entry in &script.entries {
        match entry {
            ScriptEntry::Event(event) => {
                bus.publish(event.clone());
            }
            ScriptEntry::Answer { answer } => {
                wait_for_prompt(&broker, &mut prompt_changes, answer.kind()).await?;
                match answer_prompt(&broker, answer) {
                    Ok(Resolution::Replied) => {
                        let reply = replies.recv().await.context("Reply channel closed")?;
                        tracing::info!("Backend received reply: {:?}", reply);
                    }
                    Ok(Resolution::NoPendingPrompt) => {
                        tracing::warn!("Answer {:?} had no prompt to resolve", answer);
                    }
                    Err(e) => tracing::warn!("Answer {:?} rejected: {}", answer, e),
                }
            }
        }
    }

    wait_for_settle(&session, &mut run_changes).await;

    step_subscription.detach().await;
    broker_subscription.detach().await;

    let state = session.snapshot();
    for view in state.step_views() {
        match &view.error_summary {
            Some(summary) => tracing::info!("{:?} {} - {}", view.status, view.title, summary),
            None => tracing::info!("{:?} {}", view.status, view.title),
        }
    }
    tracing::info!("{}: {}", state.headline(), state.status_line());

    Ok(state)
}

fn answer_prompt(broker: &SignalBroker, answer: &Answer) -> Result<Resolution, PromptError> {
    match answer {
        Answer::Verification(code) => broker.resolve_verification(code),
        Answer::SelectAll => {
            let items = broker.pending_selection().unwrap_or_default();
            broker.resolve_selection(SelectionDraft::new(&items).into_reply())
        }
        Answer::Select(ids) => broker.resolve_selection(SelectionReply::from_ids(ids.clone())),
        Answer::Cancel => broker.resolve_selection(SelectionReply::Cancel),
    }
}

async fn wait_for_prompt(
    broker: &SignalBroker,
    changes: &mut broadcast::Receiver<PromptChange>,
    kind: PromptKind,
) -> Result<()> {
    while !broker.is_pending(kind) {
        match timeout(SETTLE_TIMEOUT, changes.recv()).await {
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) | Err(_) => {
                return Err(anyhow!("Timed out waiting for a {} prompt", kind));
            }
        }
    }
    Ok(())
}

/// Wait until the run is done or no change arrives for a while.
async fn wait_for_settle(session: &RunSession, changes: &mut broadcast::Receiver<RunChange>) {
    while !session.is_done() {
        match timeout(SETTLE_TIMEOUT, changes.recv()).await {
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }
}
