//! Cached metrics reads for dashboards.
//!
//! Dashboards read the locally mirrored `daily_source_metrics` rows instead
//! of calling the slow upstream reporting APIs on every page view. Ranking
//! uses the stored quality score, which ingestion computed with the same
//! function any query-time caller would use.

use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use trafficlens_core::error::CoreError;
use trafficlens_core::types::DbId;
use trafficlens_db::models::daily_metric::DailyMetric;
use trafficlens_db::repositories::{DailyMetricRepo, IntegrationRepo};

use crate::error::AppResult;
use crate::state::AppState;

/// Longest window a dashboard may request, matching the backfill horizon.
const MAX_WINDOW_DAYS: i64 = 90;

pub fn router() -> Router<AppState> {
    Router::new().route("/metrics/traffic-sources", get(traffic_sources))
}

#[derive(Deserialize)]
struct MetricsQuery {
    user_id: DbId,
    integration_id: DbId,
    /// Window length in days ending yesterday (default 30).
    days: Option<i64>,
}

#[derive(Serialize)]
struct TrafficSourcesResponse {
    integration_id: DbId,
    remote_account_id: String,
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
    total_records: i64,
    /// Rows ordered best quality first.
    sources: Vec<DailyMetric>,
}

/// GET /metrics/traffic-sources -- locally cached per-source metrics for
/// one integration, best quality first.
async fn traffic_sources(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> AppResult<Json<TrafficSourcesResponse>> {
    let integration = IntegrationRepo::find_by_id(&state.pool, query.integration_id)
        .await?
        .filter(|row| row.user_id == query.user_id)
        .ok_or(CoreError::NotFound {
            entity: "integration",
            id: query.integration_id,
        })?;

    let days = query.days.unwrap_or(30).clamp(1, MAX_WINDOW_DAYS);
    let end = Utc::now().date_naive() - Duration::days(1);
    let start = end - Duration::days(days - 1);

    let sources =
        DailyMetricRepo::list_for_range(&state.pool, integration.id, start, end).await?;
    let total_records =
        DailyMetricRepo::count_for_integration(&state.pool, integration.id).await?;

    Ok(Json(TrafficSourcesResponse {
        integration_id: integration.id,
        remote_account_id: integration.remote_account_id,
        start_date: start,
        end_date: end,
        total_records,
        sources,
    }))
}
