//! Integration status, discovery, selection, and disconnect routes.
//!
//! These drive the connection-management UI: the listing exposes
//! `last_error`, `backfill_completed`, and a derived status so the front
//! end can prompt for account selection or re-authorization.

use axum::extract::{Query, State};
use axum::{routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use trafficlens_core::error::CoreError;
use trafficlens_core::provider::{
    is_sentinel, is_valid_account_id, ProviderKind, NO_ACCOUNTS_FOUND, PENDING_SELECTION,
};
use trafficlens_core::types::{DbId, Timestamp};
use trafficlens_db::models::integration::Integration;
use trafficlens_db::repositories::IntegrationRepo;
use trafficlens_ingest::reconcile::{self, ReconcileError};
use trafficlens_ingest::store::PgStore;
use trafficlens_providers::provider_for;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/integrations", get(list_integrations))
        .route("/integrations/discover", post(discover_accounts))
        .route("/integrations/activate", post(activate_account))
        .route("/integrations/disconnect", post(disconnect_provider))
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ListQuery {
    user_id: DbId,
}

/// One integration row as shown in the dashboard.
#[derive(Serialize)]
struct IntegrationSummary {
    id: DbId,
    provider_name: String,
    remote_account_id: String,
    display_name: Option<String>,
    parent_name: Option<String>,
    is_active: bool,
    backfill_completed: bool,
    last_synced_at: Option<Timestamp>,
    last_error: Option<String>,
    status: &'static str,
}

/// Derive the UI-facing status of one row.
fn derive_status(row: &Integration) -> &'static str {
    if row.remote_account_id == PENDING_SELECTION {
        return "selection_required";
    }
    if row.remote_account_id == NO_ACCOUNTS_FOUND {
        return "no_accounts";
    }
    if row.last_error.is_some() {
        return "error";
    }
    if row.is_active {
        if row.backfill_completed {
            "ok"
        } else {
            "backfilling"
        }
    } else {
        "available"
    }
}

fn summarize(row: &Integration) -> IntegrationSummary {
    IntegrationSummary {
        id: row.id,
        provider_name: row.provider_name.clone(),
        remote_account_id: row.remote_account_id.clone(),
        display_name: row.display_name.clone(),
        parent_name: row.parent_name.clone(),
        is_active: row.is_active,
        backfill_completed: row.backfill_completed,
        last_synced_at: row.last_synced_at,
        last_error: row.last_error.clone(),
        status: derive_status(row),
    }
}

/// GET /integrations?user_id= -- list a user's integrations with status.
async fn list_integrations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<IntegrationSummary>>> {
    let rows = IntegrationRepo::list_for_user(&state.pool, query.user_id).await?;
    Ok(Json(rows.iter().map(summarize).collect()))
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DiscoverBody {
    user_id: DbId,
    provider: ProviderKind,
}

#[derive(Serialize)]
struct DiscoverResponse {
    added: usize,
    removed: usize,
    updated: usize,
    activated: Option<String>,
    accounts: Vec<IntegrationSummary>,
}

/// POST /integrations/discover -- reconcile the stored account list against
/// the provider's current listing.
async fn discover_accounts(
    State(state): State<AppState>,
    Json(body): Json<DiscoverBody>,
) -> AppResult<Json<DiscoverResponse>> {
    let store = PgStore::new(state.pool.clone());
    let provider = provider_for(body.provider, state.providers.as_ref());

    let outcome = reconcile::reconcile(
        &store,
        state.cipher.as_ref(),
        provider.as_ref(),
        body.user_id,
        body.provider,
    )
    .await
    .map_err(map_reconcile_error)?;

    Ok(Json(DiscoverResponse {
        added: outcome.added,
        removed: outcome.removed,
        updated: outcome.updated,
        activated: outcome.activated,
        accounts: outcome.final_set.iter().map(summarize).collect(),
    }))
}

fn map_reconcile_error(err: ReconcileError) -> AppError {
    match err {
        e @ ReconcileError::NotConnected { .. } => AppError::BadRequest(e.to_string()),
        ReconcileError::Store(e) => AppError::InternalError(e.to_string()),
        // Vault/remote failures abort reconciliation without local changes;
        // surface the reason to the caller.
        other => AppError::BadRequest(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ActivateBody {
    user_id: DbId,
    integration_id: DbId,
}

/// POST /integrations/activate -- the user picks the account to ingest.
///
/// Exactly one integration per (user, provider) ends up active.
async fn activate_account(
    State(state): State<AppState>,
    Json(body): Json<ActivateBody>,
) -> AppResult<Json<IntegrationSummary>> {
    let row = IntegrationRepo::find_by_id(&state.pool, body.integration_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "integration",
            id: body.integration_id,
        })?;

    if row.user_id != body.user_id {
        return Err(CoreError::NotFound {
            entity: "integration",
            id: body.integration_id,
        }
        .into());
    }
    if is_sentinel(&row.remote_account_id) {
        return Err(AppError::BadRequest(
            "Cannot activate a placeholder row; run discovery and pick an account".to_string(),
        ));
    }
    let kind = row.provider_kind()?;
    if !is_valid_account_id(kind, &row.remote_account_id) {
        return Err(AppError::BadRequest(format!(
            "Stored account id {} is not a valid {kind} account id",
            row.remote_account_id
        )));
    }

    IntegrationRepo::activate_exclusive(&state.pool, body.user_id, kind, row.id).await?;

    let updated = IntegrationRepo::find_by_id(&state.pool, row.id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "integration",
            id: row.id,
        })?;

    tracing::info!(
        user_id = body.user_id,
        integration_id = row.id,
        account = %updated.remote_account_id,
        "Integration activated"
    );
    Ok(Json(summarize(&updated)))
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DisconnectBody {
    user_id: DbId,
    provider: ProviderKind,
}

#[derive(Serialize)]
struct DisconnectResponse {
    removed: u64,
}

/// POST /integrations/disconnect -- explicit user disconnect.
///
/// The only deletion path besides reconciliation; metric rows cascade.
async fn disconnect_provider(
    State(state): State<AppState>,
    Json(body): Json<DisconnectBody>,
) -> AppResult<Json<DisconnectResponse>> {
    let removed =
        IntegrationRepo::delete_for_user_provider(&state.pool, body.user_id, body.provider).await?;
    tracing::info!(
        user_id = body.user_id,
        provider = %body.provider,
        removed,
        "Provider disconnected"
    );
    Ok(Json(DisconnectResponse { removed }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(account_id: &str) -> Integration {
        let now = Utc::now();
        Integration {
            id: 1,
            user_id: 1,
            provider_name: "google_analytics".to_string(),
            remote_account_id: account_id.to_string(),
            display_name: None,
            parent_name: None,
            encrypted_access_secret: "v2:00:00:00".to_string(),
            encrypted_refresh_secret: None,
            secret_expires_at: None,
            is_active: false,
            backfill_completed: false,
            last_synced_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn sentinels_drive_selection_prompts() {
        assert_eq!(derive_status(&row(PENDING_SELECTION)), "selection_required");
        assert_eq!(derive_status(&row(NO_ACCOUNTS_FOUND)), "no_accounts");
    }

    #[test]
    fn error_state_wins_over_availability() {
        let mut r = row("123456789");
        r.last_error = Some("boom".to_string());
        assert_eq!(derive_status(&r), "error");
    }

    #[test]
    fn active_rows_report_backfill_progress() {
        let mut r = row("123456789");
        r.is_active = true;
        assert_eq!(derive_status(&r), "backfilling");
        r.backfill_completed = true;
        assert_eq!(derive_status(&r), "ok");
        r.is_active = false;
        assert_eq!(derive_status(&r), "available");
    }
}
