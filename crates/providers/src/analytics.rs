//! Adapter for the GA4 Admin and Data APIs.
//!
//! Discovery walks the Admin API account list and collects the properties
//! under each account. Metrics come from the Data API `runReport` endpoint
//! with a fixed dimension/metric set; one request covers one sub-range.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use trafficlens_core::credential::{Credential, RefreshedCredential};
use trafficlens_core::provider::{ProviderKind, RemoteAccount, SourceMetricsRow};

use crate::http::parse_response;
use crate::{oauth, Provider, ProviderConfig, ProviderError};

const ADMIN_URL: &str = "https://analyticsadmin.googleapis.com/v1beta";
const DATA_URL: &str = "https://analyticsdata.googleapis.com/v1beta";

/// Max rows requested per report; one month of per-source rows sits well
/// under this.
const REPORT_ROW_LIMIT: u32 = 10_000;

/// Adapter for GA4 properties.
pub struct GoogleAnalyticsProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl GoogleAnalyticsProvider {
    pub fn new(client: reqwest::Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AccountList {
    #[serde(default)]
    accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    /// Resource name, e.g. `accounts/54516992`.
    name: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct PropertyList {
    #[serde(default)]
    properties: Vec<Property>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Property {
    /// Resource name, e.g. `properties/213025502`.
    name: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct RunReportResponse {
    #[serde(default)]
    rows: Vec<ReportRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    #[serde(default)]
    dimension_values: Vec<ReportValue>,
    #[serde(default)]
    metric_values: Vec<ReportValue>,
}

#[derive(Debug, Deserialize)]
struct ReportValue {
    #[serde(default)]
    value: String,
}

impl ReportRow {
    fn dimension(&self, idx: usize) -> &str {
        self.dimension_values.get(idx).map_or("", |v| v.value.as_str())
    }

    fn metric_i64(&self, idx: usize) -> i64 {
        self.metric_values
            .get(idx)
            .and_then(|v| v.value.parse::<f64>().ok())
            .map_or(0, |v| v as i64)
    }

    fn metric_f64(&self, idx: usize) -> f64 {
        self.metric_values
            .get(idx)
            .and_then(|v| v.value.parse().ok())
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Provider impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Provider for GoogleAnalyticsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Analytics
    }

    async fn list_remote_accounts(
        &self,
        credential: &Credential,
    ) -> Result<Vec<RemoteAccount>, ProviderError> {
        let response = self
            .client
            .get(format!("{ADMIN_URL}/accounts"))
            .bearer_auth(&credential.access_secret)
            .send()
            .await?;
        let accounts: AccountList = parse_response(response).await?;

        let mut remote = Vec::new();
        for account in &accounts.accounts {
            let response = self
                .client
                .get(format!("{ADMIN_URL}/properties"))
                .query(&[("filter", format!("parent:{}", account.name))])
                .bearer_auth(&credential.access_secret)
                .send()
                .await?;

            // A single account failing its property listing should not sink
            // the whole discovery.
            let properties: PropertyList = match parse_response(response).await {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!(
                        account = %account.name,
                        error = %e,
                        "Skipping account: property listing failed"
                    );
                    continue;
                }
            };

            for property in &properties.properties {
                let Some(id) = property.name.strip_prefix("properties/") else {
                    continue;
                };
                remote.push(RemoteAccount {
                    id: id.to_string(),
                    display_name: property.display_name.clone(),
                    parent_name: Some(account.display_name.clone()),
                });
            }
        }

        tracing::info!(count = remote.len(), "Listed GA4 properties");
        Ok(remote)
    }

    async fn fetch_metrics(
        &self,
        credential: &Credential,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SourceMetricsRow>, ProviderError> {
        let body = serde_json::json!({
            "dateRanges": [{
                "startDate": start.to_string(),
                "endDate": end.to_string(),
            }],
            "dimensions": [
                { "name": "date" },
                { "name": "sessionDefaultChannelGrouping" },
                { "name": "sessionSourceMedium" },
            ],
            "metrics": [
                { "name": "sessions" },
                { "name": "totalUsers" },
                { "name": "bounceRate" },
                { "name": "averageSessionDuration" },
                { "name": "screenPageViewsPerSession" },
                { "name": "conversions" },
            ],
            "limit": REPORT_ROW_LIMIT,
        });

        let response = self
            .client
            .post(format!("{DATA_URL}/properties/{account_id}:runReport"))
            .bearer_auth(&credential.access_secret)
            .json(&body)
            .send()
            .await?;
        let report: RunReportResponse = parse_response(response).await?;

        let rows = report
            .rows
            .iter()
            .map(|row| SourceMetricsRow {
                date_key: row.dimension(0).to_string(),
                channel_group: row.dimension(1).to_string(),
                source_medium: row.dimension(2).to_string(),
                sessions: row.metric_i64(0),
                users: row.metric_i64(1),
                // GA4 reports bounce rate as a fraction.
                bounce_rate: row.metric_f64(2) * 100.0,
                avg_session_duration: row.metric_f64(3),
                pages_per_session: row.metric_f64(4),
                conversions: row.metric_i64(5),
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
