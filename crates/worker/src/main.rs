use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trafficlens_core::crypto::SecretCipher;
use trafficlens_ingest::pipeline::PipelineConfig;
use trafficlens_providers::ProviderConfig;
use trafficlens_worker::{backfill_job, daily_job};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trafficlens_worker=debug,trafficlens_ingest=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = trafficlens_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    trafficlens_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    let cipher = SecretCipher::from_env();
    let providers = ProviderConfig::from_env();
    let config = PipelineConfig::from_env();

    let cancel = CancellationToken::new();

    let backfill_handle = tokio::spawn(backfill_job::run(
        pool.clone(),
        cipher.clone(),
        providers.clone(),
        config.clone(),
        cancel.clone(),
    ));
    let daily_handle = tokio::spawn(daily_job::run(
        pool,
        cipher,
        providers,
        config,
        cancel.clone(),
    ));

    tracing::info!("Worker started (backfill + daily sweeps)");

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let _ = backfill_handle.await;
    let _ = daily_handle.await;
}
