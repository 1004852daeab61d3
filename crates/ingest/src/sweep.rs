//! Scheduler entry points: run the pipeline across every eligible
//! integration.
//!
//! One sweep processes integrations strictly in sequence with a short pause
//! between them; concurrency, if any, belongs to whoever schedules the
//! sweeps. Failures are isolated per integration: each one's error is
//! already persisted on its own row by the time the sweep moves on.

use serde::Serialize;
use sqlx::PgPool;
use tokio::time::{sleep, Duration};
use trafficlens_core::crypto::SecretCipher;
use trafficlens_db::models::integration::Integration;
use trafficlens_db::repositories::IntegrationRepo;
use trafficlens_providers::{provider_for, ProviderConfig};

use crate::pipeline::{IngestionPipeline, PipelineConfig, RunOutcome};
use crate::store::PgStore;

/// Pause between integrations within one sweep.
const INTEGRATION_DELAY: Duration = Duration::from_secs(2);

/// What a sweep did, for logs and the cron response body.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub eligible: usize,
    pub processed: usize,
    pub selection_required: usize,
    pub failed: usize,
}

/// Run backfill for every active integration that has not completed it.
pub async fn run_backfill_sweep(
    pool: &PgPool,
    cipher: &SecretCipher,
    providers: &ProviderConfig,
    config: &PipelineConfig,
) -> Result<SweepReport, sqlx::Error> {
    let due = IntegrationRepo::list_backfill_due(pool).await?;
    tracing::info!(count = due.len(), "Starting backfill sweep");
    Ok(run_sweep(pool, cipher, providers, config, &due, Entry::Backfill).await)
}

/// Run the daily update for every active integration whose backfill is done.
pub async fn run_daily_sweep(
    pool: &PgPool,
    cipher: &SecretCipher,
    providers: &ProviderConfig,
    config: &PipelineConfig,
) -> Result<SweepReport, sqlx::Error> {
    let due = IntegrationRepo::list_daily_due(pool).await?;
    tracing::info!(count = due.len(), "Starting daily sweep");
    Ok(run_sweep(pool, cipher, providers, config, &due, Entry::Daily).await)
}

#[derive(Clone, Copy)]
enum Entry {
    Backfill,
    Daily,
}

async fn run_sweep(
    pool: &PgPool,
    cipher: &SecretCipher,
    providers: &ProviderConfig,
    config: &PipelineConfig,
    due: &[Integration],
    entry: Entry,
) -> SweepReport {
    let store = PgStore::new(pool.clone());
    let pipeline = IngestionPipeline::new(&store, &store, cipher, config.clone());

    let mut report = SweepReport {
        eligible: due.len(),
        ..SweepReport::default()
    };

    for (index, integration) in due.iter().enumerate() {
        if index > 0 {
            sleep(INTEGRATION_DELAY).await;
        }

        let kind = match integration.provider_kind() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::error!(
                    integration_id = integration.id,
                    error = %e,
                    "Skipping integration with unknown provider"
                );
                report.failed += 1;
                continue;
            }
        };
        let provider = provider_for(kind, providers);

        let result = match entry {
            Entry::Backfill => pipeline.backfill(integration, provider.as_ref()).await,
            Entry::Daily => pipeline.daily_update(integration, provider.as_ref()).await,
        };

        match result {
            Ok(RunOutcome::Completed(stats)) => {
                report.processed += 1;
                tracing::info!(
                    integration_id = integration.id,
                    records = stats.records_written,
                    clean = stats.clean(),
                    "Integration run finished"
                );
            }
            Ok(RunOutcome::SelectionRequired { candidates }) => {
                report.selection_required += 1;
                tracing::info!(
                    integration_id = integration.id,
                    candidates,
                    "Integration awaits account selection"
                );
            }
            Ok(RunOutcome::NoAccounts) => {
                report.processed += 1;
                tracing::info!(
                    integration_id = integration.id,
                    "Integration has no remote accounts"
                );
            }
            Ok(RunOutcome::Skipped { reason }) => {
                tracing::debug!(integration_id = integration.id, reason = %reason, "Integration skipped");
            }
            // The error is already recorded on the integration row; one
            // integration's failure never affects another's run.
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    integration_id = integration.id,
                    error = %e,
                    "Integration run failed"
                );
            }
        }
    }

    report
}
