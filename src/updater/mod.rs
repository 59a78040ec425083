//! The differential-update pipeline orchestrator: append mode and
//! diff-refresh mode, both built on the shared [`record::build_record`]
//! and [`checkpoint`] helpers.
//!
//! Grounded on `examples/original_source/updater/game_data_builder.py`'s
//! `rebuild_games_data` (mode dispatch) and `main.py` (surrounding run
//! orchestration, lock file / log rotation); see `SPEC_FULL.md` §4.5 for
//! where this crate's batching/checkpointing goes beyond the retrieved
//! Python.

mod append;
mod checkpoint;
mod diff_refresh;
mod record;

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::persistence::Adapter;
use crate::upstream::{PriceHistorySource, StorefrontSource};

/// One record that couldn't be fetched or rebuilt this run.
#[derive(Debug, Clone, Serialize)]
pub struct FailedGame {
    pub app_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppendReport {
    pub new_ids: usize,
    pub added: usize,
    pub failed_games: Vec<FailedGame>,
    pub ambiguous: Vec<String>,
    pub low_confidence: Vec<(String, String, i32)>,
    pub no_match: Vec<String>,
    /// `true` when the run aborted before any write (empty price-history
    /// batch, or a Phase-equivalent storefront failure).
    pub aborted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffRefreshReport {
    pub checked: usize,
    pub updated: usize,
    pub failed_games: Vec<FailedGame>,
    pub aborted: bool,
}

/// Owns the upstream clients, persistence adapter, and configuration
/// shared by every update mode.
pub struct Updater {
    pub config: Config,
    pub storefront: Arc<dyn StorefrontSource>,
    pub pricehistory: Arc<dyn PriceHistorySource>,
    pub adapter: Arc<dyn Adapter>,
}

impl Updater {
    pub fn new(
        config: Config,
        storefront: Arc<dyn StorefrontSource>,
        pricehistory: Arc<dyn PriceHistorySource>,
        adapter: Arc<dyn Adapter>,
    ) -> Self {
        Updater { config, storefront, pricehistory, adapter }
    }

    /// Writes whatever rebuilt records exist at the moment a run aborts to
    /// `data/tmp/games_rebuilt.json`, for post-mortem inspection. Left on
    /// disk deliberately — only the next successful run's id-map/games-data
    /// write supersedes it.
    async fn stage_rebuilt(&self, records: &[crate::models::GameRecord]) -> anyhow::Result<()> {
        let path = self.config.rebuilt_temp_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    /// `--delete`: removes every id listed in `data/refs/delete_appid_list.txt`
    /// from both the id-map and the catalog, persisting the id-map before
    /// the catalog as usual (spec.md §6).
    pub async fn run_delete(&self) -> anyhow::Result<usize> {
        let list_path = self.config.delete_list_path();
        let contents = tokio::fs::read_to_string(&list_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", list_path.display()))?;
        let to_delete: std::collections::HashSet<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let id_map: Vec<_> = self
            .adapter
            .get_id_map()
            .await?
            .into_iter()
            .filter(|e| !to_delete.contains(&e.id))
            .collect();
        let games: Vec<_> = self
            .adapter
            .get_games_data()
            .await?
            .into_iter()
            .filter(|g| !to_delete.contains(&g.id))
            .collect();

        let removed = to_delete.len();
        self.adapter.save_catalog(&id_map, &games, chrono::Utc::now()).await?;
        Ok(removed)
    }

    /// `--reset-prices`: testing hook, forces every `deal.*.price` to 1
    /// (ported from `main.py::reset_prices_command`).
    pub async fn run_reset_prices(&self) -> anyhow::Result<usize> {
        let mut games = self.adapter.get_games_data().await?;
        let mut touched = 0;
        for game in &mut games {
            for quote in game.deal.values_mut() {
                quote.price = crate::models::MaybeAmount::Value(1);
                touched += 1;
            }
        }
        let id_map = self.adapter.get_id_map().await?;
        self.adapter.save_catalog(&id_map, &games, chrono::Utc::now()).await?;
        Ok(touched)
    }
}
