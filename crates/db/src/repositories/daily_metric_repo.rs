//! Repository for the `daily_source_metrics` table.

use chrono::NaiveDate;
use sqlx::PgPool;
use trafficlens_core::types::DbId;

use crate::models::daily_metric::{DailyMetric, NewDailyMetric};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, integration_id, remote_account_id, metric_date, channel_group, \
    source_medium, sessions, users, bounce_rate, avg_session_duration, \
    pages_per_session, conversions, quality_score, created_at, updated_at";

/// Provides upsert and query operations for daily metrics.
pub struct DailyMetricRepo;

impl DailyMetricRepo {
    /// Upsert one record on the natural key.
    pub async fn upsert(
        conn: &mut sqlx::PgConnection,
        record: &NewDailyMetric,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO daily_source_metrics
                (integration_id, remote_account_id, metric_date, channel_group,
                 source_medium, sessions, users, bounce_rate, avg_session_duration,
                 pages_per_session, conversions, quality_score)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (integration_id, remote_account_id, metric_date, source_medium)
             DO UPDATE SET
                channel_group = EXCLUDED.channel_group,
                sessions = EXCLUDED.sessions,
                users = EXCLUDED.users,
                bounce_rate = EXCLUDED.bounce_rate,
                avg_session_duration = EXCLUDED.avg_session_duration,
                pages_per_session = EXCLUDED.pages_per_session,
                conversions = EXCLUDED.conversions,
                quality_score = EXCLUDED.quality_score,
                updated_at = now()",
        )
        .bind(record.integration_id)
        .bind(&record.remote_account_id)
        .bind(record.metric_date)
        .bind(&record.channel_group)
        .bind(&record.source_medium)
        .bind(record.sessions)
        .bind(record.users)
        .bind(record.bounce_rate)
        .bind(record.avg_session_duration)
        .bind(record.pages_per_session)
        .bind(record.conversions)
        .bind(record.quality_score)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Upsert a chunk of records inside a single transaction.
    ///
    /// Either the whole chunk commits or none of it does; the pipeline
    /// treats a failed chunk as skippable and moves on.
    pub async fn upsert_chunk(
        pool: &PgPool,
        records: &[NewDailyMetric],
    ) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = pool.begin().await?;
        for record in records {
            Self::upsert(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.len() as u64)
    }

    /// Count stored records for an integration.
    pub async fn count_for_integration(
        pool: &PgPool,
        integration_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM daily_source_metrics WHERE integration_id = $1",
        )
        .bind(integration_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// List records for one integration and date range, best sources first.
    ///
    /// Query-time ranking uses the stored `quality_score`, which is computed
    /// by the same function the ingestion path uses.
    pub async fn list_for_range(
        pool: &PgPool,
        integration_id: DbId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetric>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM daily_source_metrics
             WHERE integration_id = $1 AND metric_date BETWEEN $2 AND $3
             ORDER BY quality_score DESC, sessions DESC"
        );
        sqlx::query_as::<_, DailyMetric>(&query)
            .bind(integration_id)
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await
    }
}
