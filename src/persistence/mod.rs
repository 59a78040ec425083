//! Persistence backends for the catalog: a local JSON file mirror and a
//! remote KV store driven through a CLI subprocess, behind one trait so
//! the updater logic never needs to know which one it's talking to.
//!
//! Grounded on `examples/original_source/updater/kv_helper.py`'s
//! `KVHelper`, which switches between the same two modes.

pub mod local;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CatalogMeta, GameRecord, IdMap};

/// Storage backend for the two catalog keys.
///
/// Implementations must write `id-map` before `games-data` in
/// [`Adapter::save_catalog`] — a crash between the two writes leaves an
/// id-map that's a superset of what `games-data` actually covers, which is
/// recoverable, whereas the reverse order can leave `games-data`
/// referencing ids the id-map no longer resolves.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn get_id_map(&self) -> Result<IdMap>;
    async fn get_games_data(&self) -> Result<Vec<GameRecord>>;

    /// Reads just the envelope metadata of the currently persisted catalog,
    /// if any — used by append mode to preserve the prior `last_updated`
    /// instead of stamping a fresh one.
    async fn get_catalog_meta(&self) -> Result<Option<CatalogMeta>>;

    async fn put_id_map(&self, id_map: &IdMap) -> Result<()>;

    /// Writes the catalog, stamping the envelope's `last_updated` with
    /// `last_updated` (callers pass the prior value in append mode, or
    /// `Utc::now()` on a full refresh — spec.md §3/§4.3).
    async fn put_games_data(&self, games: &[GameRecord], last_updated: DateTime<Utc>) -> Result<()>;

    /// Writes both halves of the catalog in crash-safe order.
    async fn save_catalog(&self, id_map: &IdMap, games: &[GameRecord], last_updated: DateTime<Utc>) -> Result<()> {
        self.put_id_map(id_map).await?;
        self.put_games_data(games, last_updated).await?;
        Ok(())
    }
}
