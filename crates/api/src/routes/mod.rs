//! Route modules and the `/api/v1` router assembly.

pub mod cron;
pub mod health;
pub mod integrations;
pub mod metrics;

use axum::Router;

use crate::state::AppState;

/// All routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(integrations::router())
        .merge(metrics::router())
        .merge(cron::router())
}
