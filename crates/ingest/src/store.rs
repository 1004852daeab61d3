//! Store seam for the engine.
//!
//! The vault, reconciler, and pipeline write through these traits rather
//! than holding a pool directly. Production code uses [`PgStore`], which
//! delegates to the repositories; tests substitute an in-memory double with
//! failure injection.

use async_trait::async_trait;
use sqlx::PgPool;
use trafficlens_core::provider::ProviderKind;
use trafficlens_core::types::{DbId, Timestamp};
use trafficlens_db::models::daily_metric::NewDailyMetric;
use trafficlens_db::models::integration::{CreateIntegration, Integration};
use trafficlens_db::repositories::{DailyMetricRepo, IntegrationRepo};

/// Errors from the store seam.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Internal(String),
}

/// Keyed reads and writes over integration rows.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Any stored row for (user, provider), used as a credential seed.
    async fn find_seed(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<Integration>, StoreError>;

    /// The currently active row for (user, provider), if any.
    async fn find_active(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<Integration>, StoreError>;

    /// All rows for (user, provider).
    async fn list_accounts(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Vec<Integration>, StoreError>;

    /// Insert a newly discovered account row.
    async fn insert_account(&self, row: CreateIntegration) -> Result<Integration, StoreError>;

    /// Refresh display/parent names on an existing row.
    async fn update_names(
        &self,
        id: DbId,
        display_name: &str,
        parent_name: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Rewrite the account selection state of a row.
    async fn set_selection(
        &self,
        id: DbId,
        remote_account_id: &str,
        display_name: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Delete rows by remote account id.
    async fn remove_accounts(
        &self,
        user_id: DbId,
        kind: ProviderKind,
        account_ids: &[String],
    ) -> Result<u64, StoreError>;

    /// Flip the active flag on one row.
    async fn set_active(&self, id: DbId, active: bool) -> Result<(), StoreError>;

    /// Persist a rotated access secret and expiry, clearing any error.
    async fn update_secrets(
        &self,
        id: DbId,
        encrypted_access_secret: &str,
        secret_expires_at: Option<Timestamp>,
    ) -> Result<(), StoreError>;

    /// Fail-closed: record the error and disable the integration.
    async fn deactivate_with_error(&self, id: DbId, error: &str) -> Result<(), StoreError>;

    /// Record a run failure without touching the active flag.
    async fn record_error(&self, id: DbId, error: &str) -> Result<(), StoreError>;

    /// Record a clean run.
    async fn record_success(&self, id: DbId) -> Result<(), StoreError>;

    /// Mark (or unmark) the historical backfill as completed.
    async fn set_backfill_completed(&self, id: DbId, completed: bool) -> Result<(), StoreError>;
}

/// Idempotent writes over daily metric records.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Upsert a chunk of records atomically. Returns the number written.
    async fn upsert_chunk(&self, records: &[NewDailyMetric]) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

/// Store implementation backed by the sqlx repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntegrationStore for PgStore {
    async fn find_seed(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<Integration>, StoreError> {
        Ok(IntegrationRepo::find_seed(&self.pool, user_id, kind).await?)
    }

    async fn find_active(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<Integration>, StoreError> {
        Ok(IntegrationRepo::find_active(&self.pool, user_id, kind).await?)
    }

    async fn list_accounts(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Vec<Integration>, StoreError> {
        Ok(IntegrationRepo::list_for_user_provider(&self.pool, user_id, kind).await?)
    }

    async fn insert_account(&self, row: CreateIntegration) -> Result<Integration, StoreError> {
        Ok(IntegrationRepo::create(&self.pool, &row).await?)
    }

    async fn update_names(
        &self,
        id: DbId,
        display_name: &str,
        parent_name: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(IntegrationRepo::update_names(&self.pool, id, display_name, parent_name).await?)
    }

    async fn set_selection(
        &self,
        id: DbId,
        remote_account_id: &str,
        display_name: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(IntegrationRepo::set_selection(&self.pool, id, remote_account_id, display_name, last_error).await?)
    }

    async fn remove_accounts(
        &self,
        user_id: DbId,
        kind: ProviderKind,
        account_ids: &[String],
    ) -> Result<u64, StoreError> {
        Ok(IntegrationRepo::delete_by_account_ids(&self.pool, user_id, kind, account_ids).await?)
    }

    async fn set_active(&self, id: DbId, active: bool) -> Result<(), StoreError> {
        Ok(IntegrationRepo::set_active(&self.pool, id, active).await?)
    }

    async fn update_secrets(
        &self,
        id: DbId,
        encrypted_access_secret: &str,
        secret_expires_at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        Ok(IntegrationRepo::update_secrets(&self.pool, id, encrypted_access_secret, secret_expires_at).await?)
    }

    async fn deactivate_with_error(&self, id: DbId, error: &str) -> Result<(), StoreError> {
        Ok(IntegrationRepo::deactivate_with_error(&self.pool, id, error).await?)
    }

    async fn record_error(&self, id: DbId, error: &str) -> Result<(), StoreError> {
        Ok(IntegrationRepo::record_error(&self.pool, id, error).await?)
    }

    async fn record_success(&self, id: DbId) -> Result<(), StoreError> {
        Ok(IntegrationRepo::record_success(&self.pool, id).await?)
    }

    async fn set_backfill_completed(&self, id: DbId, completed: bool) -> Result<(), StoreError> {
        Ok(IntegrationRepo::set_backfill_completed(&self.pool, id, completed).await?)
    }
}

#[async_trait]
impl MetricStore for PgStore {
    async fn upsert_chunk(&self, records: &[NewDailyMetric]) -> Result<u64, StoreError> {
        Ok(DailyMetricRepo::upsert_chunk(&self.pool, records).await?)
    }
}
