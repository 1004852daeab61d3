//! Scheduler trigger routes.
//!
//! An external scheduler (or the worker binary) hits these to run a sweep.
//! Both are protected by a shared-secret bearer check; the engine itself
//! performs no authentication.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::{routing::post, Json, Router};
use trafficlens_ingest::sweep::{self, SweepReport};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cron/backfill", post(trigger_backfill))
        .route("/cron/daily", post(trigger_daily))
}

/// Constant-shape bearer comparison. An unset secret refuses everything.
fn is_authorized(header: Option<&str>, secret: Option<&str>) -> bool {
    match (header, secret) {
        (Some(header), Some(secret)) => header == format!("Bearer {secret}"),
        _ => false,
    }
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Result<(), AppError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if is_authorized(header, state.config.cron_secret.as_deref()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// POST /cron/backfill -- run backfill for all integrations that still
/// need it.
async fn trigger_backfill(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<SweepReport>> {
    authorize(&headers, &state)?;
    let report = sweep::run_backfill_sweep(
        &state.pool,
        state.cipher.as_ref(),
        state.providers.as_ref(),
        state.pipeline.as_ref(),
    )
    .await?;
    Ok(Json(report))
}

/// POST /cron/daily -- run the daily update for all integrations with a
/// completed backfill.
async fn trigger_daily(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<SweepReport>> {
    authorize(&headers, &state)?;
    let report = sweep::run_daily_sweep(
        &state.pool,
        state.cipher.as_ref(),
        state.providers.as_ref(),
        state.pipeline.as_ref(),
    )
    .await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_bearer_is_authorized() {
        assert!(is_authorized(Some("Bearer s3cret"), Some("s3cret")));
    }

    #[test]
    fn mismatched_or_missing_bearer_is_refused() {
        assert!(!is_authorized(Some("Bearer wrong"), Some("s3cret")));
        assert!(!is_authorized(Some("s3cret"), Some("s3cret")));
        assert!(!is_authorized(None, Some("s3cret")));
    }

    #[test]
    fn unset_secret_refuses_everything() {
        assert!(!is_authorized(Some("Bearer anything"), None));
        assert!(!is_authorized(None, None));
    }
}
