//! Catalog update pipeline: upstream clients, a per-host adaptive rate
//! controller, persistence adapters, title resolution, and the
//! append/diff-refresh update orchestrator.

pub mod config;
pub mod models;
pub mod persistence;
pub mod rate;
pub mod resolver;
pub mod updater;
pub mod upstream;
