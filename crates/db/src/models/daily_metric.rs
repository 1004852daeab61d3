//! Daily source metric models and DTOs.
//!
//! Maps to the `daily_source_metrics` table introduced in migration 0002.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use trafficlens_core::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A row from the `daily_source_metrics` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DailyMetric {
    pub id: DbId,
    pub integration_id: DbId,
    pub remote_account_id: String,
    pub metric_date: NaiveDate,
    pub channel_group: String,
    pub source_medium: String,
    pub sessions: i64,
    pub users: i64,
    pub bounce_rate: f64,
    pub avg_session_duration: f64,
    pub pages_per_session: f64,
    pub conversions: i64,
    pub quality_score: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Upsert DTO
// ---------------------------------------------------------------------------

/// DTO for upserting one daily metric record.
///
/// The natural key is (`integration_id`, `remote_account_id`, `metric_date`,
/// `source_medium`); writing the same key twice updates in place.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewDailyMetric {
    pub integration_id: DbId,
    pub remote_account_id: String,
    pub metric_date: NaiveDate,
    pub channel_group: String,
    pub source_medium: String,
    pub sessions: i64,
    pub users: i64,
    pub bounce_rate: f64,
    pub avg_session_duration: f64,
    pub pages_per_session: f64,
    pub conversions: i64,
    pub quality_score: i32,
}
