use std::sync::Arc;

use trafficlens_core::crypto::SecretCipher;
use trafficlens_ingest::pipeline::PipelineConfig;
use trafficlens_providers::ProviderConfig;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already
/// `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: trafficlens_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Secret encryption for credential material.
    pub cipher: Arc<SecretCipher>,
    /// OAuth application settings for the provider adapters.
    pub providers: Arc<ProviderConfig>,
    /// Ingestion tunables used by the cron trigger routes.
    pub pipeline: Arc<PipelineConfig>,
}
