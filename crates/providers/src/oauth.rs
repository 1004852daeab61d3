//! OAuth token refresh against the shared authorization server.
//!
//! All three adapters refresh through the same endpoint, so the exchange
//! lives here and each adapter delegates to it.

use chrono::{Duration, Utc};
use serde::Deserialize;
use trafficlens_core::credential::RefreshedCredential;

use crate::http::ensure_success;
use crate::{ProviderConfig, ProviderError};

/// Token endpoint for refresh-token exchanges.
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Lifetime in seconds; absent for non-expiring grants.
    expires_in: Option<i64>,
}

/// Exchange a refresh secret for a fresh access secret.
///
/// A 4xx from the token endpoint (revoked or expired grant) is an
/// authorization failure; transport errors stay transient.
pub async fn refresh_access_secret(
    client: &reqwest::Client,
    config: &ProviderConfig,
    refresh_secret: &str,
) -> Result<RefreshedCredential, ProviderError> {
    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("refresh_token", refresh_secret),
    ];

    let response = client.post(TOKEN_URL).form(&params).send().await?;

    let status = response.status();
    if status.is_client_error() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ProviderError::Unauthorized(format!(
            "token refresh rejected ({}): {body}",
            status.as_u16()
        )));
    }

    let token: TokenResponse = ensure_success(response).await?.json().await?;

    let expires_at = token
        .expires_in
        .map(|secs| Utc::now() + Duration::seconds(secs));

    Ok(RefreshedCredential {
        access_secret: token.access_token,
        expires_at,
    })
}
