//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod daily_metric_repo;
pub mod integration_repo;

pub use daily_metric_repo::DailyMetricRepo;
pub use integration_repo::IntegrationRepo;
