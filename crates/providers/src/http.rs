//! Shared response handling for the adapter HTTP calls.

use serde::de::DeserializeOwned;

use crate::ProviderError;

/// Ensure the response has a success status code. Returns the response
/// unchanged on success. 401/403 become [`ProviderError::Unauthorized`] so
/// the vault can apply its fail-closed policy; other statuses become
/// [`ProviderError::Api`] with the body text preserved for debugging.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ProviderError::Unauthorized(format!(
            "{} {body}",
            status.as_u16()
        )));
    }
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}
