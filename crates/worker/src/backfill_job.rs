//! Periodic backfill sweep.
//!
//! Scans for active integrations with `backfill_completed = false` and runs
//! the historical ingestion for each. Runs on a fixed interval using
//! `tokio::time::interval`; incomplete backfills are simply picked up again
//! on the next tick.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trafficlens_core::crypto::SecretCipher;
use trafficlens_db::DbPool;
use trafficlens_ingest::pipeline::PipelineConfig;
use trafficlens_ingest::sweep;
use trafficlens_providers::ProviderConfig;

/// How often the backfill sweep runs by default (15 minutes).
const DEFAULT_INTERVAL_SECS: u64 = 900;

/// Run the backfill sweep loop until `cancel` is triggered.
pub async fn run(
    pool: DbPool,
    cipher: SecretCipher,
    providers: ProviderConfig,
    config: PipelineConfig,
    cancel: CancellationToken,
) {
    let interval_secs: u64 = std::env::var("BACKFILL_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_INTERVAL_SECS);

    tracing::info!(interval_secs, "Backfill job started");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Backfill job stopping");
                break;
            }
            _ = interval.tick() => {
                match sweep::run_backfill_sweep(&pool, &cipher, &providers, &config).await {
                    Ok(report) => {
                        if report.eligible > 0 {
                            tracing::info!(
                                eligible = report.eligible,
                                processed = report.processed,
                                selection_required = report.selection_required,
                                failed = report.failed,
                                "Backfill sweep finished"
                            );
                        } else {
                            tracing::debug!("Backfill sweep: nothing eligible");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Backfill sweep failed to list integrations");
                    }
                }
            }
        }
    }
}
