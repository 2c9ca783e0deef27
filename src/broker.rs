// Interactive signal broker
//
// Mediates backend-initiated prompts. Each prompt kind is a tiny state
// machine, Idle -> AwaitingInput -> Idle: a request event opens it, exactly
// one successful resolve emits the correlated reply and closes it again.

use crate::bus::{BackendEvent, EventBus, ReplyEvent, ReplySink};
use crate::metrics::Metrics;
use crate::models::{PromptError, PromptKind, SelectableItem, SelectionReply, VerificationCode};
use indexmap::IndexSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Outcome of a resolve call that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The reply was emitted and the prompt closed
    Replied,
    /// Nothing was pending; the call was ignored
    NoPendingPrompt,
}

/// Notifications for a presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptChange {
    VerificationOpened,
    SelectionOpened { count: usize },
    VerificationClosed,
    SelectionClosed,
}

#[derive(Debug, Default)]
struct PendingPrompts {
    verification: bool,
    selection: Option<Vec<SelectableItem>>,
}

struct BrokerInner {
    pending: Mutex<PendingPrompts>,
    sink: Arc<dyn ReplySink>,
    change_tx: broadcast::Sender<PromptChange>,
    metrics: Arc<Metrics>,

    /// Set while a request listener is registered
    listening: AtomicBool,
}

/// Process-wide prompt broker.
///
/// Holds at most one pending prompt per kind. A request arriving while one
/// of the same kind is pending is ignored so the first stays answerable.
///
/// # Usage
///
/// ```ignore
/// let broker = SignalBroker::new(Arc::new(bus.clone()), metrics, 100);
/// let listener = broker.attach(&bus, runtime.handle())?;
///
/// // later, from the UI
/// if broker.verification_pending() {
///     broker.resolve_verification(&input)?;
/// }
///
/// listener.detach().await;
/// ```
#[derive(Clone)]
pub struct SignalBroker {
    inner: Arc<BrokerInner>,
}

impl SignalBroker {
    /// Create a broker that sends replies to `sink`
    ///
    /// `capacity` is the buffer size of the [`PromptChange`] channel.
    pub fn new(sink: Arc<dyn ReplySink>, metrics: Arc<Metrics>, capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BrokerInner {
                pending: Mutex::new(PendingPrompts::default()),
                sink,
                change_tx,
                metrics,
                listening: AtomicBool::new(false),
            }),
        }
    }

    /// Register the request listener on `bus`.
    ///
    /// Returns `None` if a listener is already registered for this broker.
    pub fn attach(
        &self,
        bus: &EventBus,
        runtime: &tokio::runtime::Handle,
    ) -> Option<BrokerSubscription> {
        if self
            .inner
            .listening
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Prompt listener already registered, ignoring attach");
            return None;
        }

        let rx = bus.subscribe_backend();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(listen_for_requests(self.clone(), rx, shutdown_rx));

        tracing::info!("Prompt listener registered");

        Some(BrokerSubscription {
            broker: self.clone(),
            shutdown_tx,
            task: Some(task),
        })
    }

    /// Subscribe to prompt open/close notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PromptChange> {
        self.inner.change_tx.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Acquire)
    }

    pub fn verification_pending(&self) -> bool {
        self.lock().verification
    }

    /// Items offered by the pending selection prompt, if any
    pub fn pending_selection(&self) -> Option<Vec<SelectableItem>> {
        self.lock().selection.clone()
    }

    pub fn is_pending(&self, kind: PromptKind) -> bool {
        let pending = self.lock();
        match kind {
            PromptKind::Verification => pending.verification,
            PromptKind::Selection => pending.selection.is_some(),
        }
    }

    /// Handle one backend event. Step events are ignored.
    pub fn handle_event(&self, event: &BackendEvent) {
        match event {
            BackendEvent::VerificationRequest => self.open_verification(),
            BackendEvent::SelectionRequest { items } => self.open_selection(items),
            BackendEvent::StepStarted { .. }
            | BackendEvent::StepFinished { .. }
            | BackendEvent::StepFailed { .. } => {}
        }
    }

    /// Answer the pending verification prompt.
    ///
    /// Input that is not exactly six ASCII digits is rejected and the
    /// prompt stays open.
    pub fn resolve_verification(&self, input: &str) -> Result<Resolution, PromptError> {
        let mut pending = self.lock();
        if !pending.verification {
            return Ok(self.stray_reply(PromptKind::Verification));
        }

        let code = VerificationCode::parse(input).inspect_err(|_| {
            tracing::debug!("Rejected verification code input");
            self.inner.metrics.record_validation_rejection();
        })?;

        self.deliver(ReplyEvent::VerificationReply { code })?;
        pending.verification = false;
        drop(pending);

        self.notify(PromptChange::VerificationClosed);
        tracing::info!("Verification prompt resolved");
        Ok(Resolution::Replied)
    }

    /// Answer the pending selection prompt.
    ///
    /// Every selected id must have been offered by the request.
    pub fn resolve_selection(&self, reply: SelectionReply) -> Result<Resolution, PromptError> {
        let mut pending = self.lock();
        let Some(items) = pending.selection.as_ref() else {
            return Ok(self.stray_reply(PromptKind::Selection));
        };

        if let SelectionReply::Selected(ids) = &reply {
            if let Some(unknown) = ids
                .as_slice()
                .iter()
                .find(|id| !items.iter().any(|item| &item.id == *id))
            {
                tracing::debug!("Rejected selection containing unknown item {}", unknown);
                self.inner.metrics.record_validation_rejection();
                return Err(PromptError::UnknownItem(unknown.clone()));
            }
        }

        let cancelled = reply == SelectionReply::Cancel;
        self.deliver(reply.into())?;
        pending.selection = None;
        drop(pending);

        self.notify(PromptChange::SelectionClosed);
        tracing::info!("Selection prompt resolved (cancelled: {})", cancelled);
        Ok(Resolution::Replied)
    }

    fn open_verification(&self) {
        let mut pending = self.lock();
        if pending.verification {
            drop(pending);
            self.duplicate_request(PromptKind::Verification);
            return;
        }
        pending.verification = true;
        drop(pending);

        self.inner.metrics.record_prompt_opened();
        self.notify(PromptChange::VerificationOpened);
        tracing::info!("Verification prompt opened");
    }

    fn open_selection(&self, items: &[SelectableItem]) {
        let mut pending = self.lock();
        if pending.selection.is_some() {
            drop(pending);
            self.duplicate_request(PromptKind::Selection);
            return;
        }

        let mut seen = IndexSet::new();
        let unique: Vec<SelectableItem> = items
            .iter()
            .filter(|item| seen.insert(item.id.as_str()))
            .cloned()
            .collect();
        if unique.len() != items.len() {
            tracing::warn!(
                "Selection request contained {} duplicate item ids, keeping first occurrences",
                items.len() - unique.len()
            );
        }

        let count = unique.len();
        pending.selection = Some(unique);
        drop(pending);

        self.inner.metrics.record_prompt_opened();
        self.notify(PromptChange::SelectionOpened { count });
        tracing::info!("Selection prompt opened with {} items", count);
    }

    fn duplicate_request(&self, kind: PromptKind) {
        tracing::warn!(
            "Ignoring {} request while one is already awaiting input",
            kind
        );
        self.inner.metrics.record_duplicate_request();
    }

    fn stray_reply(&self, kind: PromptKind) -> Resolution {
        tracing::warn!("Ignoring {} reply with no pending prompt", kind);
        self.inner.metrics.record_stray_reply();
        Resolution::NoPendingPrompt
    }

    fn deliver(&self, reply: ReplyEvent) -> Result<(), PromptError> {
        let kind = reply.kind();
        match self.inner.sink.send_reply(reply) {
            Ok(()) => {
                self.inner.metrics.record_reply_sent();
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to deliver {} reply: {}", kind, e);
                Err(PromptError::Delivery(e.to_string()))
            }
        }
    }

    fn notify(&self, change: PromptChange) {
        // Ignore send errors - it's OK if no one is listening
        let _ = self.inner.change_tx.send(change);
    }

    fn lock(&self) -> MutexGuard<'_, PendingPrompts> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registered request listener.
///
/// Must be released with [`detach()`](Self::detach) on teardown. Pending
/// prompts survive a detach.
#[must_use = "a broker subscription must be released with detach()"]
pub struct BrokerSubscription {
    broker: SignalBroker,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl BrokerSubscription {
    /// Stop listening and wait for the listener task to exit
    pub async fn detach(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Prompt listener ended abnormally: {}", e);
            }
        }

        self.broker.inner.listening.store(false, Ordering::Release);
        tracing::info!("Prompt listener unregistered");
    }
}

impl Drop for BrokerSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::warn!("Broker subscription dropped without detach - aborting listener");
            let _ = self.shutdown_tx.send(true);
            task.abort();
            self.broker.inner.listening.store(false, Ordering::Release);
        }
    }
}

async fn listen_for_requests(
    broker: SignalBroker,
    mut rx: mpsc::UnboundedReceiver<BackendEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!("Prompt listener task started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            received = rx.recv() => match received {
                Some(event) => broker.handle_event(&event),
                None => {
                    tracing::info!("Event bus closed - stopping prompt listener");
                    break;
                }
            },
        }
    }

    tracing::debug!("Prompt listener task terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, MockReplySink};
    use crate::models::SelectedIds;
    use mockall::predicate::eq;

    fn broker_with(sink: MockReplySink) -> (SignalBroker, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (SignalBroker::new(Arc::new(sink), Arc::clone(&metrics), 16), metrics)
    }

    fn items() -> Vec<SelectableItem> {
        vec![
            SelectableItem::new("a", "Cert A", "Laptop"),
            SelectableItem::new("b", "Cert B", "Desktop"),
        ]
    }

    #[test]
    fn test_invalid_code_keeps_prompt_open() {
        let mut sink = MockReplySink::new();
        sink.expect_send_reply().never();
        let (broker, metrics) = broker_with(sink);

        broker.handle_event(&BackendEvent::VerificationRequest);
        assert_eq!(broker.resolve_verification("12345"), Err(PromptError::InvalidCode));
        assert_eq!(broker.resolve_verification("abcdef"), Err(PromptError::InvalidCode));

        assert!(broker.verification_pending());
        assert_eq!(metrics.validation_rejections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_valid_code_sends_exactly_one_reply() {
        let code = VerificationCode::parse("123456").unwrap();
        let mut sink = MockReplySink::new();
        sink.expect_send_reply()
            .with(eq(ReplyEvent::VerificationReply { code }))
            .times(1)
            .returning(|_| Ok(()));
        let (broker, _metrics) = broker_with(sink);

        broker.handle_event(&BackendEvent::VerificationRequest);
        assert_eq!(broker.resolve_verification("123456"), Ok(Resolution::Replied));
        assert!(!broker.verification_pending());

        // A second resolve has nothing to answer
        assert_eq!(
            broker.resolve_verification("123456"),
            Ok(Resolution::NoPendingPrompt)
        );
    }

    #[test]
    fn test_duplicate_selection_request_keeps_first_payload() {
        let (broker, metrics) = broker_with(MockReplySink::new());

        broker.handle_event(&BackendEvent::SelectionRequest { items: items() });
        broker.handle_event(&BackendEvent::SelectionRequest {
            items: vec![SelectableItem::new("z", "Other", "Elsewhere")],
        });

        assert_eq!(broker.pending_selection(), Some(items()));
        assert_eq!(metrics.duplicate_requests_ignored.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_selection_cancel_sends_null() {
        let mut sink = MockReplySink::new();
        sink.expect_send_reply()
            .with(eq(ReplyEvent::SelectionReply { selected_ids: None }))
            .times(1)
            .returning(|_| Ok(()));
        let (broker, _metrics) = broker_with(sink);

        broker.handle_event(&BackendEvent::SelectionRequest { items: items() });
        assert_eq!(broker.resolve_selection(SelectionReply::Cancel), Ok(Resolution::Replied));
        assert_eq!(broker.pending_selection(), None);
    }

    #[test]
    fn test_unknown_item_rejected() {
        let mut sink = MockReplySink::new();
        sink.expect_send_reply().never();
        let (broker, _metrics) = broker_with(sink);

        broker.handle_event(&BackendEvent::SelectionRequest { items: items() });
        let reply = SelectionReply::Selected(
            SelectedIds::new(vec!["a".to_string(), "x".to_string()]).unwrap(),
        );

        assert_eq!(
            broker.resolve_selection(reply),
            Err(PromptError::UnknownItem("x".to_string()))
        );
        assert!(broker.is_pending(PromptKind::Selection));
    }

    #[test]
    fn test_delivery_failure_keeps_prompt_open() {
        let mut sink = MockReplySink::new();
        sink.expect_send_reply()
            .times(1)
            .returning(|_| Err(BusError::NoListener(PromptKind::Verification)));
        let (broker, metrics) = broker_with(sink);

        broker.handle_event(&BackendEvent::VerificationRequest);
        assert!(matches!(
            broker.resolve_verification("123456"),
            Err(PromptError::Delivery(_))
        ));
        assert!(broker.verification_pending());
        assert_eq!(metrics.replies_sent.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_duplicate_item_ids_are_collapsed() {
        let (broker, _metrics) = broker_with(MockReplySink::new());
        let mut offered = items();
        offered.push(SelectableItem::new("a", "Cert A again", "Laptop"));

        broker.handle_event(&BackendEvent::SelectionRequest { items: offered });

        let pending = broker.pending_selection().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].name, "Cert A");
    }

    #[test]
    fn test_kinds_are_independent() {
        let (broker, _metrics) = broker_with(MockReplySink::new());
        let mut rx = broker.subscribe();

        broker.handle_event(&BackendEvent::VerificationRequest);
        broker.handle_event(&BackendEvent::SelectionRequest { items: items() });

        assert!(broker.is_pending(PromptKind::Verification));
        assert!(broker.is_pending(PromptKind::Selection));
        assert_eq!(rx.try_recv().unwrap(), PromptChange::VerificationOpened);
        assert_eq!(rx.try_recv().unwrap(), PromptChange::SelectionOpened { count: 2 });
    }

    #[test]
    fn test_attach_twice_is_noop() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let bus = EventBus::new(16);
        let (broker, _metrics) = broker_with(MockReplySink::new());

        let first = broker.attach(&bus, runtime.handle()).unwrap();
        assert!(broker.attach(&bus, runtime.handle()).is_none());
        assert!(broker.is_listening());

        runtime.block_on(first.detach());
        assert!(!broker.is_listening());
    }
}
