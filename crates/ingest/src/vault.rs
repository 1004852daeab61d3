//! Credential vault: decryption and refresh lifecycle for integration
//! secrets.
//!
//! Plaintext secrets exist only inside the returned [`Credential`]. A
//! rejected refresh disables the integration (fail-closed) and is not
//! retried until the user re-authorizes; a stale or revoked refresh secret
//! must not be hammered against the upstream provider.
//!
//! Refresh is owned by whichever run currently holds the integration; two
//! concurrent refreshes for the same row would race the upstream's
//! single-use semantics, so schedulers run one sweep per integration at a
//! time.

use chrono::{Duration, Utc};
use trafficlens_core::credential::Credential;
use trafficlens_core::crypto::{CryptoError, SecretCipher};
use trafficlens_db::models::integration::Integration;
use trafficlens_providers::Provider;

use crate::store::{IntegrationStore, StoreError};

/// Secrets expiring within this margin are refreshed eagerly rather than
/// risking a mid-run expiry.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Failures from the credential vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The access secret is expired and no refresh secret is stored.
    #[error("No refresh secret stored; re-authorization required")]
    MissingRefreshSecret,

    /// A previous refresh failed and disabled the integration; refresh is
    /// not attempted again without user action.
    #[error("Integration disabled after failed refresh; re-authorization required")]
    Disabled,

    /// The provider rejected the refresh secret.
    #[error("Credential refresh failed: {0}")]
    RefreshFailed(String),
}

/// Hands out valid, decrypted credentials for integrations.
pub struct CredentialVault<'a> {
    store: &'a dyn IntegrationStore,
    cipher: &'a SecretCipher,
}

impl<'a> CredentialVault<'a> {
    pub fn new(store: &'a dyn IntegrationStore, cipher: &'a SecretCipher) -> Self {
        Self { store, cipher }
    }

    /// Return a non-expired credential for the integration, refreshing
    /// through the owning provider adapter when needed.
    ///
    /// A stored secret with no expiry, or one expiring later than the
    /// safety margin, is decrypted and returned without any network call.
    /// On a successful refresh the rotated secret is re-encrypted and
    /// persisted along with the new expiry, and `last_error` is cleared. On
    /// a rejected refresh the integration is deactivated with the failure
    /// recorded.
    pub async fn get_valid_credential(
        &self,
        integration: &Integration,
        provider: &dyn Provider,
    ) -> Result<Credential, VaultError> {
        let cutoff = Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS);
        let needs_refresh = integration
            .secret_expires_at
            .is_some_and(|expires_at| expires_at <= cutoff);

        if !needs_refresh {
            let access_secret = self.cipher.decrypt(&integration.encrypted_access_secret)?;
            return Ok(Credential {
                access_secret,
                expires_at: integration.secret_expires_at,
            });
        }

        // Fail-closed: an integration disabled by an earlier refresh
        // failure stays disabled until the user re-authorizes.
        if !integration.is_active && integration.last_error.is_some() {
            return Err(VaultError::Disabled);
        }

        let Some(encrypted_refresh) = integration.encrypted_refresh_secret.as_deref() else {
            self.store
                .deactivate_with_error(
                    integration.id,
                    "Access secret expired and no refresh secret is stored",
                )
                .await?;
            return Err(VaultError::MissingRefreshSecret);
        };

        let refresh_secret = self.cipher.decrypt(encrypted_refresh)?;

        match provider.refresh_credential(&refresh_secret).await {
            Ok(refreshed) => {
                let encrypted = self.cipher.encrypt(&refreshed.access_secret)?;
                self.store
                    .update_secrets(integration.id, &encrypted, refreshed.expires_at)
                    .await?;
                tracing::info!(
                    integration_id = integration.id,
                    provider = %integration.provider_name,
                    "Credential refreshed"
                );
                Ok(Credential {
                    access_secret: refreshed.access_secret,
                    expires_at: refreshed.expires_at,
                })
            }
            Err(e) => {
                tracing::warn!(
                    integration_id = integration.id,
                    provider = %integration.provider_name,
                    error = %e,
                    "Credential refresh rejected; disabling integration"
                );
                self.store
                    .deactivate_with_error(
                        integration.id,
                        &format!("Credential refresh failed: {e}"),
                    )
                    .await?;
                Err(VaultError::RefreshFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expired_at, valid_until, MemoryStore, ScriptedProvider};
    use assert_matches::assert_matches;

    fn cipher() -> SecretCipher {
        SecretCipher::new([1u8; 32])
    }

    #[tokio::test]
    async fn fresh_secret_is_returned_without_refresh() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", "123456789", |row| {
            row.secret_expires_at = Some(valid_until(3600));
            row.is_active = true;
        });
        let provider = ScriptedProvider::analytics();

        let vault = CredentialVault::new(&store, &cipher);
        let integration = store.get(id);
        let credential = vault
            .get_valid_credential(&integration, &provider)
            .await
            .unwrap();

        assert_eq!(credential.access_secret, "access-secret");
        assert_eq!(provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn secret_without_expiry_never_refreshes() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", "123456789", |row| {
            row.secret_expires_at = None;
            row.is_active = true;
        });
        let provider = ScriptedProvider::analytics();

        let vault = CredentialVault::new(&store, &cipher);
        vault
            .get_valid_credential(&store.get(id), &provider)
            .await
            .unwrap();
        assert_eq!(provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn expired_secret_is_refreshed_and_persisted() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", "123456789", |row| {
            row.secret_expires_at = Some(expired_at(60));
            row.is_active = true;
            row.last_error = Some("stale error".into());
        });
        let provider = ScriptedProvider::analytics().with_refresh_secret("rotated-secret");

        let vault = CredentialVault::new(&store, &cipher);
        let credential = vault
            .get_valid_credential(&store.get(id), &provider)
            .await
            .unwrap();

        assert_eq!(credential.access_secret, "rotated-secret");
        assert_eq!(provider.refresh_calls(), 1);

        let row = store.get(id);
        assert_eq!(row.last_error, None);
        assert!(row.secret_expires_at.unwrap() > Utc::now());
        assert_eq!(cipher.decrypt(&row.encrypted_access_secret).unwrap(), "rotated-secret");
    }

    #[tokio::test]
    async fn failed_refresh_disables_and_is_not_retried() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", "123456789", |row| {
            row.secret_expires_at = Some(expired_at(60));
            row.is_active = true;
        });
        let provider = ScriptedProvider::analytics().with_refresh_rejection("invalid_grant");

        let vault = CredentialVault::new(&store, &cipher);
        let err = vault
            .get_valid_credential(&store.get(id), &provider)
            .await
            .unwrap_err();
        assert_matches!(err, VaultError::RefreshFailed(_));
        assert_eq!(provider.refresh_calls(), 1);

        let row = store.get(id);
        assert!(!row.is_active);
        assert!(row.last_error.as_deref().unwrap().contains("refresh failed"));

        // Second call sees the disabled row and does not touch the provider.
        let err = vault.get_valid_credential(&row, &provider).await.unwrap_err();
        assert_matches!(err, VaultError::Disabled);
        assert_eq!(provider.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn expired_secret_with_no_refresh_secret_disables() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let id = store.add_integration(&cipher, 1, "google_analytics", "123456789", |row| {
            row.secret_expires_at = Some(expired_at(60));
            row.encrypted_refresh_secret = None;
            row.is_active = true;
        });
        let provider = ScriptedProvider::analytics();

        let vault = CredentialVault::new(&store, &cipher);
        let err = vault
            .get_valid_credential(&store.get(id), &provider)
            .await
            .unwrap_err();
        assert_matches!(err, VaultError::MissingRefreshSecret);
        assert!(!store.get(id).is_active);
    }
}
