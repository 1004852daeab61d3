//! Provider adapters for the external marketing data sources.
//!
//! Every upstream (analytics, search console, ads) is wrapped in an adapter
//! implementing the [`Provider`] capability set. The ingestion engine only
//! depends on this trait; concrete adapters are selected by
//! [`trafficlens_core::provider::ProviderKind`], never by downcasting.

pub mod ads;
pub mod analytics;
mod http;
pub mod oauth;
pub mod search_console;

use async_trait::async_trait;
use chrono::NaiveDate;
use trafficlens_core::credential::{Credential, RefreshedCredential};
use trafficlens_core::provider::{ProviderKind, RemoteAccount, SourceMetricsRow};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the provider adapter layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    /// Transient: retried on the next scheduled run, never in-loop.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The upstream returned a non-2xx status other than an auth rejection.
    #[error("Upstream API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The upstream rejected our credentials (401/403, revoked refresh
    /// secret). Surfaced in `last_error` so the UI can prompt for
    /// re-authorization.
    #[error("Authorization failed: {0}")]
    Unauthorized(String),
}

// ---------------------------------------------------------------------------
// The capability set
// ---------------------------------------------------------------------------

/// Capability set every concrete provider adapter must satisfy.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which upstream this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// List the remote accounts/properties/sites the credential can access.
    async fn list_remote_accounts(
        &self,
        credential: &Credential,
    ) -> Result<Vec<RemoteAccount>, ProviderError>;

    /// Fetch daily per-source metrics for one account over an inclusive
    /// date range, mapped onto the provider-neutral row shape.
    async fn fetch_metrics(
        &self,
        credential: &Credential,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SourceMetricsRow>, ProviderError>;

    /// Exchange a refresh secret for a new access secret.
    async fn refresh_credential(
        &self,
        refresh_secret: &str,
    ) -> Result<RefreshedCredential, ProviderError>;
}

// ---------------------------------------------------------------------------
// Configuration and adapter selection
// ---------------------------------------------------------------------------

/// OAuth application settings shared by all adapters.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// OAuth client id of the application.
    pub client_id: String,
    /// OAuth client secret of the application.
    pub client_secret: String,
    /// Developer token required by the Ads API (`GOOGLE_ADS_DEVELOPER_TOKEN`).
    pub ads_developer_token: Option<String>,
}

impl ProviderConfig {
    /// Load adapter settings from environment variables.
    pub fn from_env() -> Self {
        Self {
            client_id: std::env::var("GOOGLE_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            ads_developer_token: std::env::var("GOOGLE_ADS_DEVELOPER_TOKEN").ok(),
        }
    }
}

/// Construct the adapter for a provider kind.
pub fn provider_for(kind: ProviderKind, config: &ProviderConfig) -> Box<dyn Provider> {
    let client = reqwest::Client::new();
    match kind {
        ProviderKind::Analytics => Box::new(analytics::GoogleAnalyticsProvider::new(
            client,
            config.clone(),
        )),
        ProviderKind::SearchConsole => Box::new(search_console::SearchConsoleProvider::new(
            client,
            config.clone(),
        )),
        ProviderKind::Ads => Box::new(ads::GoogleAdsProvider::new(client, config.clone())),
    }
}
