use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use tracing::{info, warn};

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod status;

#[cfg(test)]
pub(crate) mod test_utils;

use crate::config::Config;
use crate::error::ReconcileError;
use crate::pipeline::{PipelineOptions, ReconcileOutcome, reconcile_base_asset};

fn reconcile_retry_strategy() -> ExponentialBuilder {
    const MAX_RETRIES: usize = 3;
    const INITIAL_DELAY: Duration = Duration::from_millis(500);
    const MAX_DELAY: Duration = Duration::from_secs(10);

    ExponentialBuilder::default()
        .with_max_times(MAX_RETRIES)
        .with_min_delay(INITIAL_DELAY)
        .with_max_delay(MAX_DELAY)
        .with_jitter()
}

/// Reconciles every configured base asset in order, one at a time. Only
/// connectivity/timeout failures are retried here; precondition and
/// integrity violations propagate immediately with their failing stage.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let pool = config.get_sqlite_pool().await?;
    sqlx::migrate!().run(&pool).await?;

    let cancel_flag = Arc::new(AtomicBool::new(false));
    spawn_shutdown_watcher(cancel_flag.clone());

    let opts = PipelineOptions {
        cancel_flag: Some(cancel_flag.clone()),
        ..config.pipeline_options()
    };

    for &base_asset_id in &config.base_assets {
        if cancel_flag.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping before base asset {base_asset_id}");
            break;
        }

        let outcome = (|| reconcile_base_asset(&pool, base_asset_id, &opts))
            .retry(reconcile_retry_strategy().build())
            .when(ReconcileError::is_retryable)
            .notify(|err: &ReconcileError, dur| {
                warn!(
                    "Retrying base asset {base_asset_id} after {} failure: {err} (waiting {dur:?})",
                    err.stage()
                );
            })
            .await?;

        match outcome {
            ReconcileOutcome::Completed(report) => info!(
                "Base asset {base_asset_id} reconciled: {} candidates, {} net transfer rows, \
                 resume block {}",
                report.candidates.len(),
                report.net_transfers.len(),
                report.resume_block,
            ),
            ReconcileOutcome::NothingToDo => {
                info!("Base asset {base_asset_id}: nothing to do");
            }
            ReconcileOutcome::LeaseHeld => {
                warn!("Base asset {base_asset_id} skipped: lease held by another run");
            }
            ReconcileOutcome::Cancelled => {
                info!("Base asset {base_asset_id} cancelled mid-pass, stopping");
                break;
            }
        }
    }

    Ok(())
}

fn spawn_shutdown_watcher(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, finishing the current operation");
            flag.store(true, Ordering::Relaxed);
        }
    });
}
