//! optrack - replay a recorded backend session
//!
//! Usage: `optrack [config-dir] <script.yaml>`
//!
//! # Execution Flow
//!
//! 1. Load `settings.yaml` and `operations.yaml` from the config directory
//!    (default `optrack Data/`), falling back to defaults and the builtin
//!    catalog
//! 2. Initialize logging → `<log_dir>/<log_prefix>.<date>`
//! 3. Create a tokio runtime
//! 4. Replay the script: backend events go onto the bus, the step event
//!    channel folds step transitions into the run, the signal broker answers
//!    prompts with the scripted answers
//! 5. Log the final step list and metrics summary
//!
//! Exits with an error when the run did not succeed.

use anyhow::{Context, Result, bail};
use optrack::replay::{ReplayScript, replay};
use optrack::{APP_NAME, ConfigManager, Metrics, RunOutcome, VERSION};
use std::sync::Arc;

const DEFAULT_CONFIG_DIR: &str = "optrack Data";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_dir, script_path) = match args.as_slice() {
        [script] => (DEFAULT_CONFIG_DIR, script.as_str()),
        [config_dir, script] => (config_dir.as_str(), script.as_str()),
        _ => bail!("Usage: {} [config-dir] <script.yaml>", APP_NAME),
    };

    let config_manager = ConfigManager::new(config_dir)?;
    let settings = config_manager.load_settings()?;

    // Held until exit so buffered log lines are flushed
    let _guard = optrack::logging::setup_from_settings(&settings)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let catalog = config_manager.load_catalog()?;
    let script_yaml = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script: {}", script_path))?;
    let script = ReplayScript::from_yaml(&script_yaml)?;

    tracing::info!(
        "Replaying {} entries for operation {}",
        script.entries.len(),
        script.operation
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("optrack-worker")
        .build()?;

    let metrics = Arc::new(Metrics::new());
    let state = runtime.block_on(replay(&script, &catalog, &settings, Arc::clone(&metrics)))?;

    metrics.log_summary();
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    match state.outcome() {
        RunOutcome::Succeeded => {
            if let Some(message) = state.success_message() {
                tracing::info!("{}", message);
            }
            Ok(())
        }
        RunOutcome::Failed => {
            let details = state.first_error_details().unwrap_or_default();
            bail!("Operation {} failed: {}", state.current.id, details)
        }
        RunOutcome::InProgress => bail!(
            "Script ended before operation {} finished",
            state.current.id
        ),
    }
}
