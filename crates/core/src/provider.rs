//! Provider kinds, resolution sentinels, and the provider-neutral value
//! types exchanged between adapters and the ingestion engine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by the
//! adapter crate, the repository layer, and the engine without cycles.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Provider kinds
// ---------------------------------------------------------------------------

/// The external data sources an integration can be bound to.
///
/// Stored in the database as the snake_case strings returned by
/// [`ProviderKind::as_str`]; adapters are selected by variant, never by
/// downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Web analytics properties (GA4).
    Analytics,
    /// Search keyword performance (Search Console).
    SearchConsole,
    /// Paid campaign performance (Google Ads).
    Ads,
}

impl ProviderKind {
    /// Stable string form used as the `provider_name` column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Analytics => "google_analytics",
            ProviderKind::SearchConsole => "google_search_console",
            ProviderKind::Ads => "google_ads",
        }
    }

    /// All provider kinds, in sweep order.
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Analytics,
        ProviderKind::SearchConsole,
        ProviderKind::Ads,
    ];
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_analytics" => Ok(ProviderKind::Analytics),
            "google_search_console" => Ok(ProviderKind::SearchConsole),
            "google_ads" => Ok(ProviderKind::Ads),
            other => Err(CoreError::Validation(format!(
                "Unknown provider name: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution sentinels
// ---------------------------------------------------------------------------

/// Account id placeholder while the user still has to pick one of several
/// remote accounts. A steady state, not an error.
pub const PENDING_SELECTION: &str = "pending_selection";

/// Account id recorded when the remote side reports zero accounts. A valid
/// terminal state, distinct from an authorization failure.
pub const NO_ACCOUNTS_FOUND: &str = "no_accounts_found";

/// Whether an account id is one of the resolution sentinels rather than a
/// real remote account id.
pub fn is_sentinel(account_id: &str) -> bool {
    account_id == PENDING_SELECTION || account_id == NO_ACCOUNTS_FOUND
}

// ---------------------------------------------------------------------------
// Account id validation
// ---------------------------------------------------------------------------

/// Syntactic validity check for a stored remote account id.
///
/// An invalid id (including the sentinels) tells the ingestion pipeline to
/// run account discovery instead of fetching metrics.
///
/// - Analytics property ids are numeric, 9 to 12 digits.
/// - Search Console ids are site URLs (`http(s)://...`) or domain
///   properties (`sc-domain:...`).
/// - Ads customer ids are 10-digit numbers.
pub fn is_valid_account_id(kind: ProviderKind, account_id: &str) -> bool {
    if is_sentinel(account_id) {
        return false;
    }
    match kind {
        ProviderKind::Analytics => {
            (9..=12).contains(&account_id.len())
                && account_id.chars().all(|c| c.is_ascii_digit())
        }
        ProviderKind::SearchConsole => {
            account_id.starts_with("http://")
                || account_id.starts_with("https://")
                || account_id.starts_with("sc-domain:")
        }
        ProviderKind::Ads => {
            account_id.len() == 10 && account_id.chars().all(|c| c.is_ascii_digit())
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter value types
// ---------------------------------------------------------------------------

/// One remote account/property/site as reported by a provider's discovery
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAccount {
    /// Provider-native account identifier (property id, site URL, customer id).
    pub id: String,
    /// Human-readable name shown in selection UIs.
    pub display_name: String,
    /// Owning account/organization name, when the provider has that level.
    pub parent_name: Option<String>,
}

/// One provider-neutral daily metrics row, before transformation into a
/// stored record.
///
/// Adapters map their wire formats onto this shape; counters a provider
/// cannot supply are zero. `date_key` stays in the provider's reported form
/// (`YYYYMMDD` or `YYYY-MM-DD`) and is parsed during transformation so that
/// unparseable dates can be skipped and counted rather than failing a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetricsRow {
    pub date_key: String,
    pub channel_group: String,
    pub source_medium: String,
    pub sessions: i64,
    pub users: i64,
    /// Percent, 0-100.
    pub bounce_rate: f64,
    /// Seconds.
    pub avg_session_duration: f64,
    pub pages_per_session: f64,
    pub conversions: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // -- Provider names ----------------------------------------------------

    #[test]
    fn provider_name_round_trips() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_provider_name_is_rejected() {
        assert!(ProviderKind::from_str("facebook").is_err());
    }

    // -- Account id validation ---------------------------------------------

    #[test]
    fn sentinels_are_never_valid_ids() {
        for kind in ProviderKind::ALL {
            assert!(!is_valid_account_id(kind, PENDING_SELECTION));
            assert!(!is_valid_account_id(kind, NO_ACCOUNTS_FOUND));
        }
    }

    #[test]
    fn analytics_property_ids_are_9_to_12_digits() {
        assert!(is_valid_account_id(ProviderKind::Analytics, "123456789"));
        assert!(is_valid_account_id(ProviderKind::Analytics, "123456789012"));
        assert!(!is_valid_account_id(ProviderKind::Analytics, "12345678"));
        assert!(!is_valid_account_id(ProviderKind::Analytics, "1234567890123"));
        assert!(!is_valid_account_id(ProviderKind::Analytics, "12345678a"));
    }

    #[test]
    fn search_console_ids_are_site_urls() {
        assert!(is_valid_account_id(
            ProviderKind::SearchConsole,
            "https://example.com/"
        ));
        assert!(is_valid_account_id(
            ProviderKind::SearchConsole,
            "sc-domain:example.com"
        ));
        assert!(!is_valid_account_id(ProviderKind::SearchConsole, "example.com"));
    }

    #[test]
    fn ads_customer_ids_are_10_digits() {
        assert!(is_valid_account_id(ProviderKind::Ads, "1234567890"));
        assert!(!is_valid_account_id(ProviderKind::Ads, "123456789"));
        assert!(!is_valid_account_id(ProviderKind::Ads, "123-456-7890"));
    }
}
