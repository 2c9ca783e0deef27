// Performance metrics module
//
// Lightweight counters for the event channel and prompt broker

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide counters
///
/// Uses atomic operations for thread-safe tracking without locks. Shared as
/// `Arc<Metrics>` between the step event channel and the signal broker and
/// logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Step events folded into a run
    pub step_events_applied: AtomicU64,

    /// Runs that saw their first step start while attached
    pub runs_started: AtomicU64,

    /// Runs that reached a terminal condition while attached
    pub runs_succeeded: AtomicU64,
    pub runs_failed: AtomicU64,

    /// Prompts that moved from idle to awaiting input
    pub prompts_opened: AtomicU64,

    /// Prompt requests dropped because one of the same kind was pending
    pub duplicate_requests_ignored: AtomicU64,

    /// Replies delivered to the backend
    pub replies_sent: AtomicU64,

    /// Replies rejected locally (bad code, unknown item)
    pub validation_rejections: AtomicU64,

    /// Resolve calls with no pending prompt
    pub stray_replies: AtomicU64,

    /// Application start time
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            step_events_applied: AtomicU64::new(0),
            runs_started: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            prompts_opened: AtomicU64::new(0),
            duplicate_requests_ignored: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
            stray_replies: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_step_event(&self) {
        self.step_events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_finished(&self, succeeded: bool) {
        if succeeded {
            self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_prompt_opened(&self) {
        self.prompts_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_request(&self) {
        self.duplicate_requests_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_rejection(&self) {
        self.validation_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stray_reply(&self) {
        self.stray_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Runs: {} started, {} succeeded, {} failed; step events applied: {}",
            self.runs_started.load(Ordering::Relaxed),
            self.runs_succeeded.load(Ordering::Relaxed),
            self.runs_failed.load(Ordering::Relaxed),
            self.step_events_applied.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Prompts: {} opened, {} replies sent, {} duplicate requests ignored",
            self.prompts_opened.load(Ordering::Relaxed),
            self.replies_sent.load(Ordering::Relaxed),
            self.duplicate_requests_ignored.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Rejected replies: {} invalid, {} without a pending prompt",
            self.validation_rejections.load(Ordering::Relaxed),
            self.stray_replies.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
