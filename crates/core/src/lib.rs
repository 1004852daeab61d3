//! Pure domain logic shared by every trafficlens crate.
//!
//! This crate has zero internal deps so it can be used by the repository
//! layer, the ingestion engine, the API, and the worker alike. Nothing in
//! here performs I/O.

pub mod credential;
pub mod crypto;
pub mod dates;
pub mod error;
pub mod provider;
pub mod quality;
pub mod types;
