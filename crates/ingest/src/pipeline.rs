//! Ingestion pipeline: historical backfill and daily incremental pulls.
//!
//! Both entry points share one fetch -> transform -> score -> chunked-upsert
//! path. Work within a run is strictly sequential: sub-ranges oldest to
//! newest, chunks in order, one bounded transaction per chunk. Per-chunk
//! and per-sub-range failures are absorbed and counted; partial ingestion
//! is acceptable and converges on a later run because every write is an
//! upsert on the natural key.

use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::time::{sleep, Duration};
use trafficlens_core::crypto::SecretCipher;
use trafficlens_core::dates;
use trafficlens_core::error::CoreError;
use trafficlens_core::provider::{is_sentinel, is_valid_account_id, SourceMetricsRow};
use trafficlens_core::quality::quality_score;
use trafficlens_core::types::DbId;
use trafficlens_db::models::daily_metric::NewDailyMetric;
use trafficlens_db::models::integration::Integration;
use trafficlens_providers::Provider;

use crate::reconcile::{self, ReconcileError};
use crate::store::{IntegrationStore, MetricStore, StoreError};
use crate::vault::{CredentialVault, VaultError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Historical window for backfill, in days.
    pub backfill_days: i64,
    /// Records per upsert transaction.
    pub chunk_size: usize,
    /// Pause between chunk transactions.
    pub chunk_delay: Duration,
    /// Pause between sub-range fetches (upstream rate limits).
    pub period_delay: Duration,
    /// Wall-clock budget for one run. Past the budget no new chunk is
    /// started, but the in-flight chunk commits.
    pub run_budget: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backfill_days: 90,
            chunk_size: 50,
            chunk_delay: Duration::from_millis(100),
            period_delay: Duration::from_secs(1),
            run_budget: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden from the environment.
    ///
    /// | Env Var           | Default |
    /// |-------------------|---------|
    /// | `BACKFILL_DAYS`   | `90`    |
    /// | `RUN_BUDGET_SECS` | `600`   |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(days) = std::env::var("BACKFILL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.backfill_days = days;
        }
        let budget_secs: u64 = std::env::var("RUN_BUDGET_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600);
        config.run_budget = Some(Duration::from_secs(budget_secs));
        config
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Counters from one run's shared ingestion path.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    /// Sub-ranges fetched successfully.
    pub periods: usize,
    /// Sub-ranges whose fetch failed (skipped, retried next run).
    pub period_errors: usize,
    pub rows_fetched: usize,
    /// Rows dropped for unparseable dates.
    pub rows_skipped: usize,
    pub records_written: u64,
    /// Chunks whose transaction failed (skipped, retried next run).
    pub chunk_errors: usize,
    /// The wall-clock budget ran out before all chunks were attempted.
    pub deadline_hit: bool,
}

impl RunStats {
    /// A clean run: everything attempted, nothing failed.
    pub fn clean(&self) -> bool {
        self.period_errors == 0 && self.chunk_errors == 0 && !self.deadline_hit
    }
}

/// How one pipeline invocation ended.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The ingestion path ran; inspect the stats for partial failures.
    Completed(RunStats),
    /// The stored account id was unresolved; discovery ran instead of
    /// ingestion and the user must pick one of the candidates. A run never
    /// switches its own metrics target, even when discovery activated the
    /// single candidate for the next run.
    SelectionRequired { candidates: usize },
    /// Discovery found no remote accounts at all.
    NoAccounts,
    /// The integration was not eligible for this entry point.
    Skipped { reason: String },
}

/// Failures that stop a run outright (credential or store trouble). The
/// failure is already persisted on the integration row when this is
/// returned.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Account discovery failed: {0}")]
    Discovery(#[from] ReconcileError),

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Map provider rows onto storable records, scoring each one.
///
/// Rows with unparseable dates are dropped and counted, never fatal. The
/// quality score is computed here, at ingestion time, by the same function
/// query-time ranking uses.
pub fn to_metric_records(
    integration_id: DbId,
    remote_account_id: &str,
    rows: &[SourceMetricsRow],
) -> (Vec<NewDailyMetric>, usize) {
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        let Some(metric_date) = dates::parse_report_date(&row.date_key) else {
            tracing::warn!(date_key = %row.date_key, "Skipping row with unparseable date");
            skipped += 1;
            continue;
        };
        records.push(NewDailyMetric {
            integration_id,
            remote_account_id: remote_account_id.to_string(),
            metric_date,
            channel_group: row.channel_group.clone(),
            source_medium: row.source_medium.clone(),
            sessions: row.sessions,
            users: row.users,
            bounce_rate: row.bounce_rate,
            avg_session_duration: row.avg_session_duration,
            pages_per_session: row.pages_per_session,
            conversions: row.conversions,
            quality_score: quality_score(
                row.avg_session_duration,
                row.bounce_rate,
                row.pages_per_session,
                row.conversions,
                row.sessions,
            ),
        });
    }
    (records, skipped)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Orchestrates ingestion for one integration at a time.
pub struct IngestionPipeline<'a> {
    integrations: &'a dyn IntegrationStore,
    metrics: &'a dyn MetricStore,
    cipher: &'a SecretCipher,
    config: PipelineConfig,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(
        integrations: &'a dyn IntegrationStore,
        metrics: &'a dyn MetricStore,
        cipher: &'a SecretCipher,
        config: PipelineConfig,
    ) -> Self {
        Self {
            integrations,
            metrics,
            cipher,
            config,
        }
    }

    /// Ingest the historical window in monthly sub-ranges, oldest first.
    ///
    /// `backfill_completed` flips to true only after a run with zero
    /// failures; otherwise the integration stays eligible for the next
    /// sweep and the error summary is recorded.
    pub async fn backfill(
        &self,
        integration: &Integration,
        provider: &dyn Provider,
    ) -> Result<RunOutcome, PipelineError> {
        let kind = integration.provider_kind()?;
        if !is_valid_account_id(kind, &integration.remote_account_id) {
            return self.resolve_account(integration, provider).await;
        }

        let today = Utc::now().date_naive();
        let (start, end) = dates::backfill_window(today, self.config.backfill_days);
        let ranges = dates::month_ranges(start, end);
        tracing::info!(
            integration_id = integration.id,
            account = %integration.remote_account_id,
            periods = ranges.len(),
            "Starting backfill"
        );

        let stats = self.run_ranges(integration, provider, &ranges).await?;

        if stats.clean() {
            self.integrations
                .set_backfill_completed(integration.id, true)
                .await?;
            self.integrations.record_success(integration.id).await?;
            tracing::info!(
                integration_id = integration.id,
                records = stats.records_written,
                skipped = stats.rows_skipped,
                "Backfill completed"
            );
        } else {
            self.integrations
                .record_error(
                    integration.id,
                    &format!(
                        "Backfill incomplete: {} period errors, {} chunk errors{}",
                        stats.period_errors,
                        stats.chunk_errors,
                        if stats.deadline_hit { ", run budget exhausted" } else { "" },
                    ),
                )
                .await?;
            tracing::warn!(
                integration_id = integration.id,
                period_errors = stats.period_errors,
                chunk_errors = stats.chunk_errors,
                deadline_hit = stats.deadline_hit,
                "Backfill left gaps; integration stays eligible for retry"
            );
        }

        Ok(RunOutcome::Completed(stats))
    }

    /// Ingest the most recently completed day for an integration whose
    /// backfill already finished.
    pub async fn daily_update(
        &self,
        integration: &Integration,
        provider: &dyn Provider,
    ) -> Result<RunOutcome, PipelineError> {
        let kind = integration.provider_kind()?;
        if !integration.backfill_completed {
            return Ok(RunOutcome::Skipped {
                reason: "backfill not completed".to_string(),
            });
        }
        if !is_valid_account_id(kind, &integration.remote_account_id) {
            return self.resolve_account(integration, provider).await;
        }

        let day = dates::yesterday(Utc::now().date_naive());
        let stats = self.run_ranges(integration, provider, &[(day, day)]).await?;

        if stats.clean() {
            self.integrations.record_success(integration.id).await?;
        } else {
            self.integrations
                .record_error(
                    integration.id,
                    &format!(
                        "Daily update incomplete: {} period errors, {} chunk errors",
                        stats.period_errors, stats.chunk_errors,
                    ),
                )
                .await?;
        }

        Ok(RunOutcome::Completed(stats))
    }

    /// Resolution sub-flow: the stored account id is not a usable metrics
    /// target, so run account discovery instead of fetching.
    ///
    /// Only ambiguity-free *insertion* is auto-resolved by the reconciler;
    /// this run never adopts a different metrics target, so ingestion is
    /// skipped regardless of what discovery found.
    async fn resolve_account(
        &self,
        integration: &Integration,
        provider: &dyn Provider,
    ) -> Result<RunOutcome, PipelineError> {
        let kind = integration.provider_kind()?;
        tracing::info!(
            integration_id = integration.id,
            account = %integration.remote_account_id,
            "Stored account id is unresolved; running discovery"
        );

        match reconcile::reconcile(
            self.integrations,
            self.cipher,
            provider,
            integration.user_id,
            kind,
        )
        .await
        {
            Ok(outcome) => {
                let candidates = outcome
                    .final_set
                    .iter()
                    .filter(|row| !is_sentinel(&row.remote_account_id))
                    .count();
                if candidates == 0 {
                    Ok(RunOutcome::NoAccounts)
                } else {
                    Ok(RunOutcome::SelectionRequired { candidates })
                }
            }
            Err(e) => {
                // The placeholder row may already be gone if discovery
                // replaced it; recording on a missing row is a no-op.
                self.integrations
                    .record_error(integration.id, &format!("Account discovery failed: {e}"))
                    .await?;
                Err(e.into())
            }
        }
    }

    /// The shared fetch -> transform -> chunked-upsert path.
    async fn run_ranges(
        &self,
        integration: &Integration,
        provider: &dyn Provider,
        ranges: &[(NaiveDate, NaiveDate)],
    ) -> Result<RunStats, PipelineError> {
        let vault = CredentialVault::new(self.integrations, self.cipher);
        let credential = vault.get_valid_credential(integration, provider).await?;

        let deadline = self.config.run_budget.map(|budget| Instant::now() + budget);
        let mut stats = RunStats::default();

        'periods: for (index, (start, end)) in ranges.iter().enumerate() {
            if index > 0 {
                sleep(self.config.period_delay).await;
            }
            if past(deadline) {
                stats.deadline_hit = true;
                break;
            }

            let rows = match provider
                .fetch_metrics(&credential, &integration.remote_account_id, *start, *end)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(
                        integration_id = integration.id,
                        start = %start,
                        end = %end,
                        error = %e,
                        "Sub-range fetch failed; continuing with the next one"
                    );
                    stats.period_errors += 1;
                    continue;
                }
            };
            stats.periods += 1;
            stats.rows_fetched += rows.len();

            let (records, skipped) =
                to_metric_records(integration.id, &integration.remote_account_id, &rows);
            stats.rows_skipped += skipped;

            for (chunk_index, chunk) in records.chunks(self.config.chunk_size).enumerate() {
                if chunk_index > 0 {
                    sleep(self.config.chunk_delay).await;
                }
                if past(deadline) {
                    stats.deadline_hit = true;
                    break 'periods;
                }
                match self.metrics.upsert_chunk(chunk).await {
                    Ok(written) => {
                        stats.records_written += written;
                        tracing::debug!(
                            integration_id = integration.id,
                            chunk = chunk_index + 1,
                            written,
                            "Chunk committed"
                        );
                    }
                    Err(e) => {
                        stats.chunk_errors += 1;
                        tracing::error!(
                            integration_id = integration.id,
                            chunk = chunk_index + 1,
                            error = %e,
                            "Chunk failed; continuing with the next one"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account, metrics_row, valid_until, MemoryStore, ScriptedProvider};
    use assert_matches::assert_matches;
    use trafficlens_core::provider::PENDING_SELECTION;

    fn cipher() -> SecretCipher {
        SecretCipher::new([1u8; 32])
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            chunk_delay: Duration::from_millis(0),
            period_delay: Duration::from_millis(0),
            ..PipelineConfig::default()
        }
    }

    fn active_integration(store: &MemoryStore, cipher: &SecretCipher) -> i64 {
        store.add_integration(cipher, 1, "google_analytics", "123456789", |row| {
            row.is_active = true;
            row.secret_expires_at = Some(valid_until(3600));
        })
    }

    /// Distinct rows for one day, distinguished by source medium.
    fn day_rows(date_key: &str, count: usize) -> Vec<trafficlens_core::provider::SourceMetricsRow> {
        (0..count)
            .map(|i| metrics_row(date_key, &format!("source-{i} / organic")))
            .collect()
    }

    // -- Transform ---------------------------------------------------------

    #[test]
    fn transform_scores_rows_and_skips_bad_dates() {
        let rows = vec![
            metrics_row("20240115", "google / organic"),
            metrics_row("(other)", "bad / row"),
            metrics_row("2024-01-16", "bing / organic"),
        ];
        let (records, skipped) = to_metric_records(7, "123456789", &rows);

        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 1);
        // 300s, 20% bounce, 3 pages, 5/100 conversions: the reference case.
        assert_eq!(records[0].quality_score, 55);
        assert_eq!(records[0].integration_id, 7);
        assert_eq!(records[0].remote_account_id, "123456789");
    }

    // -- Backfill ----------------------------------------------------------

    #[tokio::test]
    async fn clean_backfill_marks_completion() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = active_integration(&store, &cipher);
        let provider = ScriptedProvider::analytics()
            .with_fetch(day_rows("20240115", 10))
            .with_fetch(day_rows("20240116", 10));

        let pipeline = IngestionPipeline::new(&store, &store, &cipher, fast_config());
        let outcome = pipeline.backfill(&store.get(id), &provider).await.unwrap();

        let RunOutcome::Completed(stats) = outcome else {
            panic!("expected a completed run");
        };
        assert!(stats.clean());
        assert_eq!(stats.records_written, 20);
        assert_eq!(store.metric_count(), 20);

        let row = store.get(id);
        assert!(row.backfill_completed);
        assert_eq!(row.last_error, None);

        // One fetch per monthly sub-range of the 90-day window.
        let today = Utc::now().date_naive();
        let (start, end) = dates::backfill_window(today, 90);
        assert_eq!(provider.fetch_calls(), dates::month_ranges(start, end).len());
    }

    #[tokio::test]
    async fn reingesting_the_same_period_is_idempotent() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = active_integration(&store, &cipher);
        let pipeline = IngestionPipeline::new(&store, &store, &cipher, fast_config());

        let provider = ScriptedProvider::analytics().with_fetch(day_rows("20240115", 25));
        pipeline.backfill(&store.get(id), &provider).await.unwrap();
        let first = store.metrics.lock().unwrap().clone();

        // Same rows again on a second run.
        let provider = ScriptedProvider::analytics().with_fetch(day_rows("20240115", 25));
        pipeline.backfill(&store.get(id), &provider).await.unwrap();
        let second = store.metrics.lock().unwrap().clone();

        assert_eq!(first.len(), 25);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failed_chunk_does_not_abort_the_rest() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = active_integration(&store, &cipher);

        // 100 rows in one sub-range, chunk size 10 -> 10 chunks; fail the third.
        let config = PipelineConfig {
            chunk_size: 10,
            ..fast_config()
        };
        store.fail_chunk(3);
        let provider = ScriptedProvider::analytics().with_fetch(day_rows("20240115", 100));

        let pipeline = IngestionPipeline::new(&store, &store, &cipher, config);
        let outcome = pipeline.backfill(&store.get(id), &provider).await.unwrap();

        let RunOutcome::Completed(stats) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(stats.chunk_errors, 1);
        assert_eq!(stats.records_written, 90);
        assert_eq!(store.metric_count(), 90);

        // Incomplete: stays eligible for the next sweep, error recorded.
        let row = store.get(id);
        assert!(!row.backfill_completed);
        assert!(row.last_error.as_deref().unwrap().contains("chunk errors"));
    }

    #[tokio::test]
    async fn failed_sub_range_fetch_skips_only_that_period() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = active_integration(&store, &cipher);
        let provider = ScriptedProvider::analytics()
            .with_fetch(day_rows("20240115", 5))
            .with_fetch_failure("rate limited")
            .with_fetch(day_rows("20240316", 5));

        let pipeline = IngestionPipeline::new(&store, &store, &cipher, fast_config());
        let outcome = pipeline.backfill(&store.get(id), &provider).await.unwrap();

        let RunOutcome::Completed(stats) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(stats.period_errors, 1);
        assert_eq!(stats.records_written, 10);
        assert!(!store.get(id).backfill_completed);
    }

    // -- Daily -------------------------------------------------------------

    #[tokio::test]
    async fn daily_update_requires_completed_backfill() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = active_integration(&store, &cipher);
        let provider = ScriptedProvider::analytics();

        let pipeline = IngestionPipeline::new(&store, &store, &cipher, fast_config());
        let outcome = pipeline
            .daily_update(&store.get(id), &provider)
            .await
            .unwrap();

        assert_matches!(outcome, RunOutcome::Skipped { .. });
        assert_eq!(provider.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn daily_update_ingests_one_day() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", "123456789", |row| {
            row.is_active = true;
            row.backfill_completed = true;
            row.secret_expires_at = Some(valid_until(3600));
        });
        let yesterday = dates::yesterday(Utc::now().date_naive());
        let provider = ScriptedProvider::analytics()
            .with_fetch(day_rows(&yesterday.format("%Y%m%d").to_string(), 8));

        let pipeline = IngestionPipeline::new(&store, &store, &cipher, fast_config());
        let outcome = pipeline
            .daily_update(&store.get(id), &provider)
            .await
            .unwrap();

        let RunOutcome::Completed(stats) = outcome else {
            panic!("expected a completed run");
        };
        assert!(stats.clean());
        assert_eq!(stats.records_written, 8);
        assert_eq!(provider.fetch_calls(), 1);
        assert_eq!(store.get(id).last_error, None);
    }

    // -- Resolution sub-flow -----------------------------------------------

    #[tokio::test]
    async fn unresolved_account_triggers_discovery_not_ingestion() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", PENDING_SELECTION, |row| {
            row.is_active = true;
        });
        let provider = ScriptedProvider::analytics().with_accounts(vec![
            account("111111111", "Site A"),
            account("222222222", "Site B"),
        ]);

        let pipeline = IngestionPipeline::new(&store, &store, &cipher, fast_config());
        let outcome = pipeline.backfill(&store.get(id), &provider).await.unwrap();

        assert_matches!(outcome, RunOutcome::SelectionRequired { candidates: 2 });
        assert_eq!(provider.fetch_calls(), 0);
        assert_eq!(store.metric_count(), 0);
    }

    #[tokio::test]
    async fn single_candidate_discovery_still_skips_this_runs_ingestion() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", PENDING_SELECTION, |row| {
            row.is_active = true;
        });
        let provider = ScriptedProvider::analytics()
            .with_accounts(vec![account("123456789", "Main Site")])
            .with_fetch(day_rows("20240115", 5));

        let pipeline = IngestionPipeline::new(&store, &store, &cipher, fast_config());
        let outcome = pipeline.backfill(&store.get(id), &provider).await.unwrap();

        // The reconciler activated the only account for the *next* run, but
        // this run never fetches metrics for it.
        assert_matches!(outcome, RunOutcome::SelectionRequired { candidates: 1 });
        assert_eq!(provider.fetch_calls(), 0);

        let rows = store.all_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].remote_account_id, "123456789");
        assert!(rows[0].is_active);
    }

    #[tokio::test]
    async fn discovery_with_empty_remote_reports_no_accounts() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", PENDING_SELECTION, |row| {
            row.is_active = true;
        });
        let provider = ScriptedProvider::analytics().with_accounts(vec![]);

        let pipeline = IngestionPipeline::new(&store, &store, &cipher, fast_config());
        let outcome = pipeline.backfill(&store.get(id), &provider).await.unwrap();

        assert_matches!(outcome, RunOutcome::NoAccounts);
        assert_eq!(store.get(id).remote_account_id, "no_accounts_found");
    }
}
