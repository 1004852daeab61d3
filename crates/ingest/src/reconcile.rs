//! Account reconciliation: converge locally stored account rows onto the
//! remote truth for one (user, provider) pair.
//!
//! The remote listing is fetched once up front; if that call fails the
//! whole reconciliation aborts without touching local state. Changes are
//! applied removals-first so stale, inaccessible accounts never linger as
//! selectable, then insertions (inheriting the seed row's encrypted
//! secrets, never auto-activated), then name-only updates.

use std::collections::HashSet;

use serde::Serialize;
use trafficlens_core::provider::{is_sentinel, ProviderKind, RemoteAccount, NO_ACCOUNTS_FOUND};
use trafficlens_core::crypto::SecretCipher;
use trafficlens_core::types::DbId;
use trafficlens_db::models::integration::{CreateIntegration, Integration};
use trafficlens_providers::{Provider, ProviderError};

use crate::store::{IntegrationStore, StoreError};
use crate::vault::{CredentialVault, VaultError};

/// Counts and final state returned for observability.
#[derive(Debug, Serialize)]
pub struct ReconcileOutcome {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    /// Account id auto-activated under the single-candidate rule, if any.
    pub activated: Option<String>,
    pub final_set: Vec<Integration>,
}

/// Failures that abort a reconciliation. None of these leave partial
/// changes behind: the remote listing happens before any write.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("No {provider} integration found for user {user_id}; connect first")]
    NotConnected { user_id: DbId, provider: ProviderKind },

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Remote account listing failed: {0}")]
    Remote(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Pure diff
// ---------------------------------------------------------------------------

/// The minimal change set between a remote listing and the local rows.
#[derive(Debug, Default, PartialEq)]
pub struct AccountDiff {
    pub to_add: Vec<RemoteAccount>,
    pub to_remove: Vec<String>,
    /// (local row id, fresh remote data) pairs whose names drifted.
    pub to_update: Vec<(DbId, RemoteAccount)>,
}

/// Diff the remote account list against local non-placeholder rows.
///
/// Local placeholder rows (sentinel account ids) are resolution state, not
/// accounts; callers handle them separately.
pub fn diff_accounts(remote: &[RemoteAccount], local: &[Integration]) -> AccountDiff {
    let local_ids: HashSet<&str> = local
        .iter()
        .map(|row| row.remote_account_id.as_str())
        .collect();
    let remote_ids: HashSet<&str> = remote.iter().map(|account| account.id.as_str()).collect();

    let to_add = remote
        .iter()
        .filter(|account| !local_ids.contains(account.id.as_str()))
        .cloned()
        .collect();

    let to_remove = local
        .iter()
        .filter(|row| !remote_ids.contains(row.remote_account_id.as_str()))
        .map(|row| row.remote_account_id.clone())
        .collect();

    let to_update = remote
        .iter()
        .filter_map(|account| {
            let row = local
                .iter()
                .find(|row| row.remote_account_id == account.id)?;
            let name_drifted = row.display_name.as_deref() != Some(account.display_name.as_str())
                || row.parent_name.as_deref() != account.parent_name.as_deref();
            name_drifted.then(|| (row.id, account.clone()))
        })
        .collect();

    AccountDiff {
        to_add,
        to_remove,
        to_update,
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Reconcile the stored account rows for (user, provider) against the
/// provider's current listing.
///
/// Running this twice with no upstream change reports zero changes on the
/// second pass. An empty remote listing is a valid terminal state recorded
/// as the `no_accounts_found` sentinel, not an error.
pub async fn reconcile(
    store: &dyn IntegrationStore,
    cipher: &SecretCipher,
    provider: &dyn Provider,
    user_id: DbId,
    kind: ProviderKind,
) -> Result<ReconcileOutcome, ReconcileError> {
    // The seed row is purely a credential source; its account id carries no
    // meaning here.
    let seed = store
        .find_seed(user_id, kind)
        .await?
        .ok_or(ReconcileError::NotConnected { user_id, provider: kind })?;

    let vault = CredentialVault::new(store, cipher);
    let credential = vault.get_valid_credential(&seed, provider).await?;

    // Fetch the remote truth before any write; a failure here aborts with
    // local state untouched.
    let remote = provider.list_remote_accounts(&credential).await?;

    let local = store.list_accounts(user_id, kind).await?;
    let (placeholders, real): (Vec<Integration>, Vec<Integration>) = local
        .into_iter()
        .partition(|row| is_sentinel(&row.remote_account_id));

    if remote.is_empty() {
        return apply_no_accounts(store, user_id, kind, &seed, &placeholders, &real).await;
    }

    let diff = diff_accounts(&remote, &real);
    let added = diff.to_add.len();
    let updated = diff.to_update.len();

    // Removals first: accounts no longer authorized upstream must not stay
    // selectable.
    let removed = store.remove_accounts(user_id, kind, &diff.to_remove).await? as usize;

    // Insertions inherit the seed's encrypted secrets and expiry. Never
    // auto-activated here; activation is decided after the full set is known.
    for account in &diff.to_add {
        store
            .insert_account(CreateIntegration {
                user_id,
                provider_name: kind.as_str().to_string(),
                remote_account_id: account.id.clone(),
                display_name: Some(account.display_name.clone()),
                parent_name: account.parent_name.clone(),
                encrypted_access_secret: seed.encrypted_access_secret.clone(),
                encrypted_refresh_secret: seed.encrypted_refresh_secret.clone(),
                secret_expires_at: seed.secret_expires_at,
                is_active: false,
            })
            .await?;
    }

    for (id, account) in &diff.to_update {
        store
            .update_names(*id, &account.display_name, account.parent_name.as_deref())
            .await?;
    }

    // Real accounts exist now, so placeholder rows have served their
    // purpose as credential carriers.
    if !placeholders.is_empty() {
        let sentinel_ids: Vec<String> = placeholders
            .iter()
            .map(|row| row.remote_account_id.clone())
            .collect();
        store.remove_accounts(user_id, kind, &sentinel_ids).await?;
    }

    // Single-candidate rule: exactly one account and nothing active means
    // there is no ambiguity for the user to resolve.
    let mut final_set = store.list_accounts(user_id, kind).await?;
    let mut activated = None;
    if final_set.len() == 1 && store.find_active(user_id, kind).await?.is_none() {
        let only = &final_set[0];
        store.set_active(only.id, true).await?;
        activated = Some(only.remote_account_id.clone());
        tracing::info!(
            user_id,
            provider = %kind,
            account = %only.remote_account_id,
            "Auto-activated the only remote account"
        );
        final_set = store.list_accounts(user_id, kind).await?;
    }

    tracing::info!(
        user_id,
        provider = %kind,
        added,
        removed,
        updated,
        total = final_set.len(),
        "Account reconciliation completed"
    );

    Ok(ReconcileOutcome {
        added,
        removed,
        updated,
        activated,
        final_set,
    })
}

/// Terminal state for an empty remote listing: every real row is removed
/// (nothing is authorized anymore) and the seed row becomes the
/// `no_accounts_found` sentinel. Deliberately not an error and not
/// `last_error`: the user simply has no accounts upstream.
async fn apply_no_accounts(
    store: &dyn IntegrationStore,
    user_id: DbId,
    kind: ProviderKind,
    seed: &Integration,
    placeholders: &[Integration],
    real: &[Integration],
) -> Result<ReconcileOutcome, ReconcileError> {
    let doomed: Vec<String> = real
        .iter()
        .chain(placeholders.iter())
        .filter(|row| row.id != seed.id)
        .map(|row| row.remote_account_id.clone())
        .collect();
    let removed = store.remove_accounts(user_id, kind, &doomed).await? as usize;

    store
        .set_selection(seed.id, NO_ACCOUNTS_FOUND, Some("No accounts found"), None)
        .await?;

    tracing::info!(
        user_id,
        provider = %kind,
        removed,
        "Remote listing is empty; recorded no-accounts terminal state"
    );

    Ok(ReconcileOutcome {
        added: 0,
        removed,
        updated: 0,
        activated: None,
        final_set: store.list_accounts(user_id, kind).await?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account, MemoryStore, ScriptedProvider};
    use assert_matches::assert_matches;
    use trafficlens_core::provider::PENDING_SELECTION;

    const PROVIDER: ProviderKind = ProviderKind::Analytics;

    fn cipher() -> SecretCipher {
        SecretCipher::new([1u8; 32])
    }

    // -- Diff --------------------------------------------------------------

    #[test]
    fn diff_is_empty_when_sets_match() {
        let store = MemoryStore::new();
        let cipher = cipher();
        let id = store.add_integration(&cipher, 1, "google_analytics", "123456789", |row| {
            row.display_name = Some("Main Site".into());
            row.parent_name = Some("Acme Org".into());
        });
        let local = vec![store.get(id)];
        let remote = vec![account("123456789", "Main Site")];

        assert_eq!(diff_accounts(&remote, &local), AccountDiff::default());
    }

    #[test]
    fn diff_detects_adds_removes_and_name_drift() {
        let store = MemoryStore::new();
        let cipher = cipher();
        let kept = store.add_integration(&cipher, 1, "google_analytics", "111111111", |row| {
            row.display_name = Some("Old Name".into());
            row.parent_name = Some("Acme Org".into());
        });
        store.add_integration(&cipher, 1, "google_analytics", "222222222", |_| {});
        let local = store.all_rows();

        let remote = vec![account("111111111", "New Name"), account("333333333", "Fresh")];
        let diff = diff_accounts(&remote, &local);

        assert_eq!(diff.to_add, vec![account("333333333", "Fresh")]);
        assert_eq!(diff.to_remove, vec!["222222222".to_string()]);
        assert_eq!(diff.to_update, vec![(kept, account("111111111", "New Name"))]);
    }

    // -- End-to-end scenarios ----------------------------------------------

    #[tokio::test]
    async fn single_candidate_resolves_placeholder_and_activates() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let placeholder =
            store.add_integration(&cipher, 1, "google_analytics", PENDING_SELECTION, |_| {});
        let provider =
            ScriptedProvider::analytics().with_accounts(vec![account("123456789", "Main Site")]);

        let outcome = reconcile(&store, &cipher, &provider, 1, PROVIDER)
            .await
            .unwrap();

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.activated.as_deref(), Some("123456789"));
        assert_eq!(outcome.final_set.len(), 1);

        let row = &outcome.final_set[0];
        assert_eq!(row.remote_account_id, "123456789");
        assert_eq!(row.display_name.as_deref(), Some("Main Site"));
        assert!(row.is_active);
        // Secrets were inherited from the placeholder seed.
        assert_eq!(cipher.decrypt(&row.encrypted_access_secret).unwrap(), "access-secret");
        // The ambiguity sentinel is gone.
        assert_eq!(store.try_get(placeholder), None);
    }

    #[tokio::test]
    async fn multiple_candidates_are_never_auto_activated() {
        let cipher = cipher();
        let store = MemoryStore::new();
        store.add_integration(&cipher, 1, "google_analytics", PENDING_SELECTION, |_| {});
        let provider = ScriptedProvider::analytics().with_accounts(vec![
            account("111111111", "Site A"),
            account("222222222", "Site B"),
        ]);

        let outcome = reconcile(&store, &cipher, &provider, 1, PROVIDER)
            .await
            .unwrap();

        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.activated, None);
        assert!(outcome.final_set.iter().all(|row| !row.is_active));
    }

    #[tokio::test]
    async fn reconcile_is_convergent() {
        let cipher = cipher();
        let store = MemoryStore::new();
        store.add_integration(&cipher, 1, "google_analytics", PENDING_SELECTION, |_| {});
        let provider = ScriptedProvider::analytics().with_accounts(vec![
            account("111111111", "Site A"),
            account("222222222", "Site B"),
        ]);

        let first = reconcile(&store, &cipher, &provider, 1, PROVIDER).await.unwrap();
        assert_eq!(first.added, 2);

        let second = reconcile(&store, &cipher, &provider, 1, PROVIDER).await.unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.removed, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.final_set.len(), 2);
        assert_eq!(provider.list_calls(), 2);
    }

    #[tokio::test]
    async fn removals_are_applied_for_unauthorized_accounts() {
        let cipher = cipher();
        let store = MemoryStore::new();
        store.add_integration(&cipher, 1, "google_analytics", "111111111", |row| {
            row.display_name = Some("Site A".into());
            row.parent_name = Some("Acme Org".into());
            row.is_active = true;
        });
        store.add_integration(&cipher, 1, "google_analytics", "222222222", |_| {});
        let provider =
            ScriptedProvider::analytics().with_accounts(vec![account("111111111", "Site A")]);

        let outcome = reconcile(&store, &cipher, &provider, 1, PROVIDER)
            .await
            .unwrap();

        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.final_set.len(), 1);
        assert_eq!(outcome.final_set[0].remote_account_id, "111111111");
    }

    #[tokio::test]
    async fn failed_remote_listing_changes_nothing() {
        let cipher = cipher();
        let store = MemoryStore::new();
        store.add_integration(&cipher, 1, "google_analytics", "111111111", |_| {});
        store.add_integration(&cipher, 1, "google_analytics", PENDING_SELECTION, |_| {});
        let before = store.all_rows();

        let provider = ScriptedProvider::analytics().with_account_listing_failure("upstream 503");
        let err = reconcile(&store, &cipher, &provider, 1, PROVIDER)
            .await
            .unwrap_err();

        assert_matches!(err, ReconcileError::Remote(_));
        let after = store.all_rows();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.remote_account_id, a.remote_account_id);
            assert_eq!(b.last_error, a.last_error);
            assert_eq!(b.is_active, a.is_active);
        }
    }

    #[tokio::test]
    async fn empty_remote_listing_is_a_terminal_state_not_an_error() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let seed =
            store.add_integration(&cipher, 1, "google_analytics", PENDING_SELECTION, |_| {});
        let provider = ScriptedProvider::analytics().with_accounts(vec![]);

        let outcome = reconcile(&store, &cipher, &provider, 1, PROVIDER)
            .await
            .unwrap();

        assert_eq!(outcome.added, 0);
        let row = store.get(seed);
        assert_eq!(row.remote_account_id, NO_ACCOUNTS_FOUND);
        assert_eq!(row.last_error, None);
    }

    #[tokio::test]
    async fn reconcile_without_any_integration_fails() {
        let cipher = cipher();
        let store = MemoryStore::new();
        let provider = ScriptedProvider::analytics();

        let err = reconcile(&store, &cipher, &provider, 99, PROVIDER)
            .await
            .unwrap_err();
        assert_matches!(err, ReconcileError::NotConnected { user_id: 99, .. });
    }
}
