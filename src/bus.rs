// Event bus between the backend and the core
//
// Backend → core (step lifecycle and prompt requests) fans out to one
// unbounded queue per subscriber, so no subscriber can lose an event by
// falling behind. Core → backend (prompt replies) is a broadcast channel.
// Events are closed enums so every consumer matches exhaustively instead of
// comparing event-name strings.

use crate::models::{
    PromptKind, SelectableItem, SelectedIds, SelectionReply, StepId, VerificationCode,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// A step lifecycle transition reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    Started { step_id: StepId },
    Finished { step_id: StepId },
    Failed { step_id: StepId, extra_details: String },
}

impl StepEvent {
    pub fn started(step_id: impl Into<String>) -> Self {
        StepEvent::Started {
            step_id: step_id.into(),
        }
    }

    pub fn finished(step_id: impl Into<String>) -> Self {
        StepEvent::Finished {
            step_id: step_id.into(),
        }
    }

    pub fn failed(step_id: impl Into<String>, extra_details: impl Into<String>) -> Self {
        StepEvent::Failed {
            step_id: step_id.into(),
            extra_details: extra_details.into(),
        }
    }

    pub fn step_id(&self) -> &str {
        match self {
            StepEvent::Started { step_id }
            | StepEvent::Finished { step_id }
            | StepEvent::Failed { step_id, .. } => step_id,
        }
    }
}

/// Events emitted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum BackendEvent {
    StepStarted { step_id: StepId },
    StepFinished { step_id: StepId },
    StepFailed { step_id: StepId, extra_details: String },
    /// The backend needs a one-time verification code
    VerificationRequest,
    /// The backend needs the user to pick items to revoke
    SelectionRequest { items: Vec<SelectableItem> },
}

impl BackendEvent {
    /// The step transition carried by this event, if any.
    pub fn as_step_event(&self) -> Option<StepEvent> {
        match self {
            BackendEvent::StepStarted { step_id } => Some(StepEvent::started(step_id.clone())),
            BackendEvent::StepFinished { step_id } => Some(StepEvent::finished(step_id.clone())),
            BackendEvent::StepFailed {
                step_id,
                extra_details,
            } => Some(StepEvent::failed(step_id.clone(), extra_details.clone())),
            BackendEvent::VerificationRequest | BackendEvent::SelectionRequest { .. } => None,
        }
    }
}

impl From<StepEvent> for BackendEvent {
    fn from(event: StepEvent) -> Self {
        match event {
            StepEvent::Started { step_id } => BackendEvent::StepStarted { step_id },
            StepEvent::Finished { step_id } => BackendEvent::StepFinished { step_id },
            StepEvent::Failed {
                step_id,
                extra_details,
            } => BackendEvent::StepFailed {
                step_id,
                extra_details,
            },
        }
    }
}

/// Replies sent back to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ReplyEvent {
    VerificationReply { code: VerificationCode },
    /// `None` means cancel / revoke nothing
    SelectionReply { selected_ids: Option<SelectedIds> },
}

impl ReplyEvent {
    pub fn kind(&self) -> PromptKind {
        match self {
            ReplyEvent::VerificationReply { .. } => PromptKind::Verification,
            ReplyEvent::SelectionReply { .. } => PromptKind::Selection,
        }
    }
}

impl From<SelectionReply> for ReplyEvent {
    fn from(reply: SelectionReply) -> Self {
        let selected_ids = match reply {
            SelectionReply::Selected(ids) => Some(ids),
            SelectionReply::Cancel => None,
        };
        ReplyEvent::SelectionReply { selected_ids }
    }
}

/// Errors raised by the bus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("No backend is listening for {0} replies")]
    NoListener(PromptKind),
}

/// Destination for prompt replies.
#[cfg_attr(test, mockall::automock)]
pub trait ReplySink: Send + Sync {
    fn send_reply(&self, reply: ReplyEvent) -> Result<(), BusError>;
}

/// In-process event bus.
///
/// Cloning shares the underlying channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    backend_subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<BackendEvent>>>>,
    reply_tx: broadcast::Sender<ReplyEvent>,
}

impl EventBus {
    /// Create a bus whose reply channel buffers `reply_capacity` replies.
    ///
    /// Backend events are never dropped: each subscriber has its own
    /// unbounded queue.
    pub fn new(reply_capacity: usize) -> Self {
        let (reply_tx, _) = broadcast::channel(reply_capacity);
        Self {
            backend_subscribers: Arc::new(Mutex::new(Vec::new())),
            reply_tx,
        }
    }

    /// Publish a backend event. Returns the number of core subscribers that
    /// will see it; publishing with nobody attached is not an error.
    ///
    /// Every live subscriber receives every event, in publish order.
    pub fn publish(&self, event: BackendEvent) -> usize {
        tracing::trace!("Backend event published: {:?}", event);
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Core side: receive backend events published from now on
    pub fn subscribe_backend(&self) -> mpsc::UnboundedReceiver<BackendEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_subscribers().push(tx);
        rx
    }

    /// Backend side: receive replies sent from now on
    pub fn subscribe_replies(&self) -> broadcast::Receiver<ReplyEvent> {
        self.reply_tx.subscribe()
    }

    pub fn backend_subscriber_count(&self) -> usize {
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<BackendEvent>>> {
        self.backend_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ReplySink for EventBus {
    fn send_reply(&self, reply: ReplyEvent) -> Result<(), BusError> {
        let kind = reply.kind();
        self.reply_tx
            .send(reply)
            .map(|_| ())
            .map_err(|_| BusError::NoListener(kind))
    }
}
