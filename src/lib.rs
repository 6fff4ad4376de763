//! # orgpulse
//!
//! Collects membership, recently updated repositories and per-repository
//! statistics for a code-forge organization and persists them as one
//! aggregate snapshot.

pub mod config;
pub mod db;
pub mod error;
pub mod forge;
pub mod models;
pub mod pipeline;
pub mod repositories;
pub mod telemetry;
pub use migration;
