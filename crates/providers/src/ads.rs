//! Adapter for the Google Ads REST API.
//!
//! Discovery lists accessible customer ids; the API does not return
//! descriptive names from that endpoint, so accounts get a deterministic
//! fallback display name. Metrics come from a GAQL campaign query segmented
//! by date; clicks/impressions/conversions map onto the neutral row shape
//! under the `Paid Search` channel.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use trafficlens_core::credential::{Credential, RefreshedCredential};
use trafficlens_core::provider::{ProviderKind, RemoteAccount, SourceMetricsRow};

use crate::http::parse_response;
use crate::{oauth, Provider, ProviderConfig, ProviderError};

const API_URL: &str = "https://googleads.googleapis.com/v20";

/// Adapter for Google Ads customer accounts.
pub struct GoogleAdsProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl GoogleAdsProvider {
    pub fn new(client: reqwest::Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn developer_token(&self) -> &str {
        self.config
            .ads_developer_token
            .as_deref()
            .unwrap_or("MISSING-DEV-TOKEN")
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerList {
    /// Resource names, e.g. `customers/1234567890`.
    #[serde(default)]
    resource_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    campaign: Campaign,
    #[serde(default)]
    segments: Segments,
    #[serde(default)]
    metrics: Metrics,
}

#[derive(Debug, Default, Deserialize)]
struct Campaign {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Segments {
    #[serde(default)]
    date: String,
}

#[derive(Debug, Default, Deserialize)]
struct Metrics {
    /// Int64 fields arrive as JSON strings in the REST mapping.
    #[serde(default)]
    clicks: String,
    #[serde(default)]
    impressions: String,
    #[serde(default)]
    conversions: f64,
}

// ---------------------------------------------------------------------------
// Provider impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Provider for GoogleAdsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ads
    }

    async fn list_remote_accounts(
        &self,
        credential: &Credential,
    ) -> Result<Vec<RemoteAccount>, ProviderError> {
        let response = self
            .client
            .get(format!("{API_URL}/customers:listAccessibleCustomers"))
            .bearer_auth(&credential.access_secret)
            .header("developer-token", self.developer_token())
            .send()
            .await?;
        let customers: CustomerList = parse_response(response).await?;

        let remote: Vec<RemoteAccount> = customers
            .resource_names
            .iter()
            .filter_map(|resource_name| resource_name.strip_prefix("customers/"))
            .map(|id| RemoteAccount {
                id: id.to_string(),
                display_name: format!("Google Ads Account {id}"),
                parent_name: None,
            })
            .collect();

        tracing::info!(count = remote.len(), "Listed Google Ads customers");
        Ok(remote)
    }

    async fn fetch_metrics(
        &self,
        credential: &Credential,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SourceMetricsRow>, ProviderError> {
        let query = format!(
            "SELECT campaign.name, segments.date, metrics.clicks, \
             metrics.impressions, metrics.conversions \
             FROM campaign \
             WHERE segments.date BETWEEN '{start}' AND '{end}' \
             ORDER BY segments.date"
        );

        let response = self
            .client
            .post(format!("{API_URL}/customers/{account_id}/googleAds:search"))
            .bearer_auth(&credential.access_secret)
            .header("developer-token", self.developer_token())
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;
        let report: SearchResponse = parse_response(response).await?;

        let rows = report
            .results
            .iter()
            .map(|result| SourceMetricsRow {
                date_key: result.segments.date.clone(),
                channel_group: "Paid Search".to_string(),
                source_medium: result.campaign.name.clone(),
                sessions: result.metrics.clicks.parse().unwrap_or(0),
                users: result.metrics.impressions.parse().unwrap_or(0),
                bounce_rate: 0.0,
                avg_session_duration: 0.0,
                pages_per_session: 0.0,
                conversions: result.metrics.conversions.round() as i64,
            })
            .collect();

        Ok(rows)
    }

    async fn refresh_credential(
        &self,
        refresh_secret: &str,
    ) -> Result<RefreshedCredential, ProviderError> {
        oauth::refresh_access_secret(&self.client, &self.config, refresh_secret).await
    }
}
