//! Integration models and DTOs.
//!
//! Maps to the `integrations` table introduced in migration 0001.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use trafficlens_core::error::CoreError;
use trafficlens_core::provider::ProviderKind;
use trafficlens_core::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A row from the `integrations` table: one (user, provider, remote account)
/// binding plus its credentials and sync status.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Integration {
    pub id: DbId,
    pub user_id: DbId,
    pub provider_name: String,
    /// Remote account identifier, or a resolution sentinel while discovery
    /// is still pending.
    pub remote_account_id: String,
    pub display_name: Option<String>,
    pub parent_name: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_access_secret: String,
    #[serde(skip_serializing)]
    pub encrypted_refresh_secret: Option<String>,
    pub secret_expires_at: Option<Timestamp>,
    pub is_active: bool,
    pub backfill_completed: bool,
    pub last_synced_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Integration {
    /// Parse the stored provider name into its kind.
    pub fn provider_kind(&self) -> Result<ProviderKind, CoreError> {
        self.provider_name.parse()
    }
}

// ---------------------------------------------------------------------------
// Create DTO
// ---------------------------------------------------------------------------

/// DTO for inserting a new integration row.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateIntegration {
    pub user_id: DbId,
    pub provider_name: String,
    pub remote_account_id: String,
    pub display_name: Option<String>,
    pub parent_name: Option<String>,
    pub encrypted_access_secret: String,
    pub encrypted_refresh_secret: Option<String>,
    pub secret_expires_at: Option<Timestamp>,
    pub is_active: bool,
}
