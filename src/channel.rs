// Step event channel
//
// Bridges the backend's step event stream into one RunSession. A single
// worker task drains a single bus queue, so every event is applied exactly
// once, in the order the backend published it.

use crate::bus::{BackendEvent, EventBus};
use crate::metrics::Metrics;
use crate::models::RunOutcome;
use crate::state::{RunChange, RunHandle, RunId, RunSession};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Feeds backend step events into run sessions.
///
/// # Usage
///
/// ```ignore
/// let channel = StepEventChannel::new(bus.clone(), metrics.clone(), runtime.handle().clone());
/// let session = RunSession::start(&catalog, "install_sidestore", 100)?;
///
/// if let Some(subscription) = channel.attach(&session) {
///     // ... backend publishes step events ...
///     subscription.detach().await;
/// }
/// ```
#[derive(Clone)]
pub struct StepEventChannel {
    bus: EventBus,
    metrics: Arc<Metrics>,
    runtime: tokio::runtime::Handle,
}

impl StepEventChannel {
    pub fn new(bus: EventBus, metrics: Arc<Metrics>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            bus,
            metrics,
            runtime,
        }
    }

    /// Start feeding step events into `session`.
    ///
    /// Returns `None` if the session already has a live subscription; a run
    /// is never fed by two workers at once. The bus receiver is registered
    /// before this returns, so nothing published afterwards is missed.
    pub fn attach(&self, session: &RunSession) -> Option<StepSubscription> {
        let run = session.handle();
        if !run.try_attach() {
            tracing::debug!("Run {} already attached, ignoring attach", run.id());
            return None;
        }

        let rx = self.bus.subscribe_backend();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = self.runtime.spawn(feed_run(
            run.clone(),
            rx,
            shutdown_rx,
            Arc::clone(&self.metrics),
        ));

        tracing::info!("Step event channel attached to run {}", run.id());

        Some(StepSubscription {
            run,
            shutdown_tx,
            task: Some(task),
        })
    }

    /// Stop feeding the run behind `subscription`.
    pub async fn detach(&self, subscription: StepSubscription) {
        subscription.detach().await;
    }
}

/// Live link between the bus and one run.
///
/// Must be released with [`detach()`](Self::detach). Dropping it instead
/// aborts the worker without waiting for it.
#[must_use = "a step subscription must be released with detach()"]
pub struct StepSubscription {
    run: RunHandle,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StepSubscription {
    pub fn run_id(&self) -> RunId {
        self.run.id()
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Once this returns no further event is applied to the run and the
    /// bus receiver has been dropped.
    pub async fn detach(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(
                    "Step event worker for run {} ended abnormally: {}",
                    self.run.id(),
                    e
                );
            }
        }

        self.run.release();
        tracing::info!("Step event channel detached from run {}", self.run.id());
    }
}

impl Drop for StepSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::warn!(
                "Step subscription for run {} dropped without detach - aborting worker",
                self.run.id()
            );
            let _ = self.shutdown_tx.send(true);
            task.abort();
            self.run.release();
        }
    }
}

async fn feed_run(
    run: RunHandle,
    mut rx: mpsc::UnboundedReceiver<BackendEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<Metrics>,
) {
    tracing::debug!("Step event worker for run {} started", run.id());

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            received = rx.recv() => match received {
                Some(event) => {
                    let Some(step_event) = event.as_step_event() else {
                        continue;
                    };

                    tracing::debug!("Run {}: applying {:?}", run.id(), step_event);
                    let changes = run.apply(&step_event);
                    metrics.record_step_event();

                    for change in &changes {
                        match change {
                            RunChange::RunStarted => metrics.record_run_started(),
                            RunChange::RunDone { outcome } => {
                                metrics.record_run_finished(*outcome == RunOutcome::Succeeded);
                            }
                            _ => {}
                        }
                    }
                }
                None => {
                    tracing::info!(
                        "Event bus closed - stopping step event worker for run {}",
                        run.id()
                    );
                    break;
                }
            },
        }
    }

    tracing::debug!("Step event worker for run {} terminated", run.id());
}
