//! Built-in scheduler for the ingestion engine.
//!
//! Two interval loops sweep the eligible integrations: backfill for the
//! ones still missing history, daily updates for the rest. Each loop runs
//! until its cancellation token fires.

pub mod backfill_job;
pub mod daily_job;
