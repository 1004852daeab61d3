//! Periodic daily-update sweep.
//!
//! Pulls yesterday's metrics for every active integration whose backfill is
//! complete. The interval defaults to 24 hours; re-running sooner is
//! harmless since all writes are idempotent upserts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trafficlens_core::crypto::SecretCipher;
use trafficlens_db::DbPool;
use trafficlens_ingest::pipeline::PipelineConfig;
use trafficlens_ingest::sweep;
use trafficlens_providers::ProviderConfig;

/// How often the daily sweep runs by default (24 hours).
const DEFAULT_INTERVAL_SECS: u64 = 86_400;

/// Run the daily update sweep loop until `cancel` is triggered.
pub async fn run(
    pool: DbPool,
    cipher: SecretCipher,
    providers: ProviderConfig,
    config: PipelineConfig,
    cancel: CancellationToken,
) {
    let interval_secs: u64 = std::env::var("DAILY_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_INTERVAL_SECS);

    tracing::info!(interval_secs, "Daily update job started");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Daily update job stopping");
                break;
            }
            _ = interval.tick() => {
                match sweep::run_daily_sweep(&pool, &cipher, &providers, &config).await {
                    Ok(report) => {
                        tracing::info!(
                            eligible = report.eligible,
                            processed = report.processed,
                            failed = report.failed,
                            "Daily sweep finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Daily sweep failed to list integrations");
                    }
                }
            }
        }
    }
}
