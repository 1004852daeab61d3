//! In-memory doubles for the store seam and the provider adapter, shared by
//! the engine's unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use trafficlens_core::credential::{Credential, RefreshedCredential};
use trafficlens_core::crypto::SecretCipher;
use trafficlens_core::provider::{ProviderKind, RemoteAccount, SourceMetricsRow};
use trafficlens_core::types::{DbId, Timestamp};
use trafficlens_db::models::daily_metric::NewDailyMetric;
use trafficlens_db::models::integration::{CreateIntegration, Integration};
use trafficlens_providers::{Provider, ProviderError};

use crate::store::{IntegrationStore, MetricStore, StoreError};

pub(crate) fn valid_until(secs: i64) -> Timestamp {
    Utc::now() + Duration::seconds(secs)
}

pub(crate) fn expired_at(secs_ago: i64) -> Timestamp {
    Utc::now() - Duration::seconds(secs_ago)
}

pub(crate) fn account(id: &str, display_name: &str) -> RemoteAccount {
    RemoteAccount {
        id: id.to_string(),
        display_name: display_name.to_string(),
        parent_name: Some("Acme Org".to_string()),
    }
}

pub(crate) fn metrics_row(date_key: &str, source_medium: &str) -> SourceMetricsRow {
    SourceMetricsRow {
        date_key: date_key.to_string(),
        channel_group: "Organic Search".to_string(),
        source_medium: source_medium.to_string(),
        sessions: 100,
        users: 80,
        bounce_rate: 20.0,
        avg_session_duration: 300.0,
        pages_per_session: 3.0,
        conversions: 5,
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

pub(crate) type MetricKey = (DbId, String, NaiveDate, String);

/// In-memory implementation of both store traits, with chunk failure
/// injection for partial-failure tests.
#[derive(Default)]
pub(crate) struct MemoryStore {
    rows: Mutex<Vec<Integration>>,
    next_id: AtomicI64,
    pub metrics: Mutex<BTreeMap<MetricKey, NewDailyMetric>>,
    /// 1-based ordinals of `upsert_chunk` calls that must fail.
    failing_chunks: Mutex<HashSet<usize>>,
    chunk_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a ready-made integration row, returning its id. The `tweak`
    /// closure adjusts defaults (expiry, activity, account id, ...).
    pub fn add_integration(
        &self,
        cipher: &SecretCipher,
        user_id: DbId,
        provider_name: &str,
        remote_account_id: &str,
        tweak: impl FnOnce(&mut Integration),
    ) -> DbId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let mut row = Integration {
            id,
            user_id,
            provider_name: provider_name.to_string(),
            remote_account_id: remote_account_id.to_string(),
            display_name: Some(format!("Account {remote_account_id}")),
            parent_name: None,
            encrypted_access_secret: cipher.encrypt("access-secret").unwrap(),
            encrypted_refresh_secret: Some(cipher.encrypt("refresh-secret").unwrap()),
            secret_expires_at: None,
            is_active: false,
            backfill_completed: false,
            last_synced_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        tweak(&mut row);
        self.rows.lock().unwrap().push(row);
        id
    }

    pub fn get(&self, id: DbId) -> Integration {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .expect("integration row exists")
    }

    pub fn try_get(&self, id: DbId) -> Option<Integration> {
        self.rows.lock().unwrap().iter().find(|row| row.id == id).cloned()
    }

    pub fn all_rows(&self) -> Vec<Integration> {
        self.rows.lock().unwrap().clone()
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.lock().unwrap().len()
    }

    pub fn fail_chunk(&self, ordinal: usize) {
        self.failing_chunks.lock().unwrap().insert(ordinal);
    }

    /// Apply `f` to the row with the given id; missing rows are a no-op,
    /// matching an UPDATE that affects zero rows.
    fn with_row(&self, id: DbId, f: impl FnOnce(&mut Integration)) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            f(row);
            row.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn find_seed(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<Integration>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.user_id == user_id && row.provider_name == kind.as_str())
            .min_by_key(|row| row.id)
            .cloned())
    }

    async fn find_active(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<Integration>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| {
                row.user_id == user_id && row.provider_name == kind.as_str() && row.is_active
            })
            .cloned())
    }

    async fn list_accounts(
        &self,
        user_id: DbId,
        kind: ProviderKind,
    ) -> Result<Vec<Integration>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.user_id == user_id && row.provider_name == kind.as_str())
            .cloned()
            .collect())
    }

    async fn insert_account(&self, body: CreateIntegration) -> Result<Integration, StoreError> {
        let duplicate = self.rows.lock().unwrap().iter().any(|row| {
            row.user_id == body.user_id
                && row.provider_name == body.provider_name
                && row.remote_account_id == body.remote_account_id
        });
        if duplicate {
            return Err(StoreError::Internal(format!(
                "duplicate (user, provider, account): {}",
                body.remote_account_id
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let row = Integration {
            id,
            user_id: body.user_id,
            provider_name: body.provider_name,
            remote_account_id: body.remote_account_id,
            display_name: body.display_name,
            parent_name: body.parent_name,
            encrypted_access_secret: body.encrypted_access_secret,
            encrypted_refresh_secret: body.encrypted_refresh_secret,
            secret_expires_at: body.secret_expires_at,
            is_active: body.is_active,
            backfill_completed: false,
            last_synced_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn update_names(
        &self,
        id: DbId,
        display_name: &str,
        parent_name: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_row(id, |row| {
            row.display_name = Some(display_name.to_string());
            row.parent_name = parent_name.map(str::to_string);
            row.last_synced_at = Some(Utc::now());
        })
    }

    async fn set_selection(
        &self,
        id: DbId,
        remote_account_id: &str,
        display_name: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_row(id, |row| {
            row.remote_account_id = remote_account_id.to_string();
            row.display_name = display_name.map(str::to_string);
            row.last_error = last_error.map(str::to_string);
            row.last_synced_at = Some(Utc::now());
        })
    }

    async fn remove_accounts(
        &self,
        user_id: DbId,
        kind: ProviderKind,
        account_ids: &[String],
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| {
            !(row.user_id == user_id
                && row.provider_name == kind.as_str()
                && account_ids.contains(&row.remote_account_id))
        });
        Ok((before - rows.len()) as u64)
    }

    async fn set_active(&self, id: DbId, active: bool) -> Result<(), StoreError> {
        self.with_row(id, |row| row.is_active = active)
    }

    async fn update_secrets(
        &self,
        id: DbId,
        encrypted_access_secret: &str,
        secret_expires_at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        self.with_row(id, |row| {
            row.encrypted_access_secret = encrypted_access_secret.to_string();
            row.secret_expires_at = secret_expires_at;
            row.last_error = None;
            row.last_synced_at = Some(Utc::now());
        })
    }

    async fn deactivate_with_error(&self, id: DbId, error: &str) -> Result<(), StoreError> {
        self.with_row(id, |row| {
            row.is_active = false;
            row.last_error = Some(error.to_string());
            row.last_synced_at = Some(Utc::now());
        })
    }

    async fn record_error(&self, id: DbId, error: &str) -> Result<(), StoreError> {
        self.with_row(id, |row| {
            row.last_error = Some(error.to_string());
            row.last_synced_at = Some(Utc::now());
        })
    }

    async fn record_success(&self, id: DbId) -> Result<(), StoreError> {
        self.with_row(id, |row| {
            row.last_error = None;
            row.last_synced_at = Some(Utc::now());
        })
    }

    async fn set_backfill_completed(&self, id: DbId, completed: bool) -> Result<(), StoreError> {
        self.with_row(id, |row| row.backfill_completed = completed)
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn upsert_chunk(&self, records: &[NewDailyMetric]) -> Result<u64, StoreError> {
        let ordinal = self.chunk_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_chunks.lock().unwrap().contains(&ordinal) {
            return Err(StoreError::Internal(format!(
                "injected failure for chunk {ordinal}"
            )));
        }
        let mut metrics = self.metrics.lock().unwrap();
        for record in records {
            let key = (
                record.integration_id,
                record.remote_account_id.clone(),
                record.metric_date,
                record.source_medium.clone(),
            );
            metrics.insert(key, record.clone());
        }
        Ok(records.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// Provider double with scripted responses and call counters.
pub(crate) struct ScriptedProvider {
    kind: ProviderKind,
    accounts: Mutex<Result<Vec<RemoteAccount>, String>>,
    /// One scripted response per `fetch_metrics` call, in order; when the
    /// queue runs dry every further call returns an empty row set.
    fetches: Mutex<VecDeque<Result<Vec<SourceMetricsRow>, String>>>,
    refresh: Mutex<Result<String, String>>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn analytics() -> Self {
        Self {
            kind: ProviderKind::Analytics,
            accounts: Mutex::new(Ok(Vec::new())),
            fetches: Mutex::new(VecDeque::new()),
            refresh: Mutex::new(Ok("refreshed-secret".to_string())),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_accounts(self, accounts: Vec<RemoteAccount>) -> Self {
        *self.accounts.lock().unwrap() = Ok(accounts);
        self
    }

    pub fn with_account_listing_failure(self, reason: &str) -> Self {
        *self.accounts.lock().unwrap() = Err(reason.to_string());
        self
    }

    pub fn with_fetch(self, rows: Vec<SourceMetricsRow>) -> Self {
        self.fetches.lock().unwrap().push_back(Ok(rows));
        self
    }

    pub fn with_fetch_failure(self, reason: &str) -> Self {
        self.fetches.lock().unwrap().push_back(Err(reason.to_string()));
        self
    }

    pub fn with_refresh_secret(self, secret: &str) -> Self {
        *self.refresh.lock().unwrap() = Ok(secret.to_string());
        self
    }

    pub fn with_refresh_rejection(self, reason: &str) -> Self {
        *self.refresh.lock().unwrap() = Err(reason.to_string());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn list_remote_accounts(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<RemoteAccount>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.accounts.lock().unwrap() {
            Ok(accounts) => Ok(accounts.clone()),
            Err(reason) => Err(ProviderError::Api {
                status: 503,
                body: reason.clone(),
            }),
        }
    }

    async fn fetch_metrics(
        &self,
        _credential: &Credential,
        _account_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<SourceMetricsRow>, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.fetches.lock().unwrap().pop_front() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(reason)) => Err(ProviderError::Api {
                status: 503,
                body: reason,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn refresh_credential(
        &self,
        _refresh_secret: &str,
    ) -> Result<RefreshedCredential, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.refresh.lock().unwrap() {
            Ok(secret) => Ok(RefreshedCredential {
                access_secret: secret.clone(),
                expires_at: Some(valid_until(3600)),
            }),
            Err(reason) => Err(ProviderError::Unauthorized(reason.clone())),
        }
    }
}
