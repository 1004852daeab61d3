//! Repository for the `integrations` table.

use sqlx::PgPool;
use trafficlens_core::provider::ProviderKind;
use trafficlens_core::types::{DbId, Timestamp};

use crate::models::integration::{CreateIntegration, Integration};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, user_id, provider_name, remote_account_id, display_name, parent_name, \
    encrypted_access_secret, encrypted_refresh_secret, secret_expires_at, \
    is_active, backfill_completed, last_synced_at, last_error, \
    created_at, updated_at";

/// Provides CRUD and sync-bookkeeping operations for integrations.
pub struct IntegrationRepo;

impl IntegrationRepo {
    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Find one integration by id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM integrations WHERE id = $1");
        sqlx::query_as::<_, Integration>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Any stored row for (user, provider), oldest first.
    ///
    /// Used as the credential seed during reconciliation; the row's account
    /// id is irrelevant for that purpose.
    pub async fn find_seed(
        pool: &PgPool,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations
             WHERE user_id = $1 AND provider_name = $2
             ORDER BY id ASC
             LIMIT 1"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_optional(pool)
            .await
    }

    /// All rows for (user, provider), stable order.
    pub async fn list_for_user_provider(
        pool: &PgPool,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations
             WHERE user_id = $1 AND provider_name = $2
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_all(pool)
            .await
    }

    /// All rows for a user across providers (dashboard listing).
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations
             WHERE user_id = $1
             ORDER BY provider_name ASC, id ASC"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// The currently active row for (user, provider), if any.
    pub async fn find_active(
        pool: &PgPool,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations
             WHERE user_id = $1 AND provider_name = $2 AND is_active
             LIMIT 1"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Active integrations still awaiting their historical backfill.
    pub async fn list_backfill_due(pool: &PgPool) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations
             WHERE is_active AND NOT backfill_completed
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, Integration>(&query).fetch_all(pool).await
    }

    /// Active integrations eligible for the daily update sweep.
    pub async fn list_daily_due(pool: &PgPool) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations
             WHERE is_active AND backfill_completed
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, Integration>(&query).fetch_all(pool).await
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Insert a new integration row, returning it.
    pub async fn create(
        pool: &PgPool,
        body: &CreateIntegration,
    ) -> Result<Integration, sqlx::Error> {
        let query = format!(
            "INSERT INTO integrations
                (user_id, provider_name, remote_account_id, display_name, parent_name,
                 encrypted_access_secret, encrypted_refresh_secret, secret_expires_at,
                 is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(body.user_id)
            .bind(&body.provider_name)
            .bind(&body.remote_account_id)
            .bind(&body.display_name)
            .bind(&body.parent_name)
            .bind(&body.encrypted_access_secret)
            .bind(&body.encrypted_refresh_secret)
            .bind(body.secret_expires_at)
            .bind(body.is_active)
            .fetch_one(pool)
            .await
    }

    /// Refresh display/parent names after discovery reported a change.
    pub async fn update_names(
        pool: &PgPool,
        id: DbId,
        display_name: &str,
        parent_name: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET
                display_name = $2, parent_name = $3,
                last_synced_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(display_name)
        .bind(parent_name)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Rewrite the account selection state of a row (sentinel transitions
    /// and explicit user selection).
    pub async fn set_selection(
        pool: &PgPool,
        id: DbId,
        remote_account_id: &str,
        display_name: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET
                remote_account_id = $2, display_name = $3, last_error = $4,
                last_synced_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(remote_account_id)
        .bind(display_name)
        .bind(last_error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Flip the active flag on one row.
    pub async fn set_active(pool: &PgPool, id: DbId, active: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE integrations SET is_active = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Activate one row and deactivate every sibling for the same
    /// (user, provider) in a single transaction.
    pub async fn activate_exclusive(
        pool: &PgPool,
        user_id: DbId,
        kind: ProviderKind,
        id: DbId,
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            "UPDATE integrations SET is_active = FALSE, updated_at = now()
             WHERE user_id = $1 AND provider_name = $2 AND id <> $3",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE integrations SET is_active = TRUE, last_error = NULL, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }

    /// Store a freshly rotated access secret and expiry, clearing any
    /// previous error.
    pub async fn update_secrets(
        pool: &PgPool,
        id: DbId,
        encrypted_access_secret: &str,
        secret_expires_at: Option<Timestamp>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET
                encrypted_access_secret = $2, secret_expires_at = $3,
                last_error = NULL, last_synced_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(encrypted_access_secret)
        .bind(secret_expires_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Fail-closed: record the refresh failure and disable the integration
    /// until the user re-authorizes.
    pub async fn deactivate_with_error(
        pool: &PgPool,
        id: DbId,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET
                is_active = FALSE, last_error = $2,
                last_synced_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a run failure without touching the active flag.
    pub async fn record_error(pool: &PgPool, id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET
                last_error = $2, last_synced_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a clean run: clear the error and bump the sync timestamp.
    pub async fn record_success(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET
                last_error = NULL, last_synced_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark (or unmark) the historical backfill as completed.
    pub async fn set_backfill_completed(
        pool: &PgPool,
        id: DbId,
        completed: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET backfill_completed = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(completed)
        .execute(pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deletions
    // -----------------------------------------------------------------------

    /// Delete rows whose remote accounts are no longer authorized upstream.
    pub async fn delete_by_account_ids(
        pool: &PgPool,
        user_id: DbId,
        kind: ProviderKind,
        account_ids: &[String],
    ) -> Result<u64, sqlx::Error> {
        if account_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM integrations
             WHERE user_id = $1 AND provider_name = $2 AND remote_account_id = ANY($3)",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(account_ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Explicit user disconnect: remove every row for (user, provider).
    /// Metric rows cascade via the foreign key.
    pub async fn delete_for_user_provider(
        pool: &PgPool,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM integrations WHERE user_id = $1 AND provider_name = $2",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
