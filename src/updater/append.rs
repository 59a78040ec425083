//! Append mode: resolve new titles, fetch full records for ids not
//! already in the catalog, and append them. Falls into the batch
//! sub-mode (checkpointed, lock-filed) when ≥1000 ids are new.
//!
//! Grounded on `game_data_builder.py`'s "new titles only" mode for the
//! fetch-and-build shape; the batch sub-mode itself (lock file,
//! checkpoint shards, log rotation) is specified fresh from spec.md
//! §4.5/§6 — see `SPEC_FULL.md`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::config::BATCH_THRESHOLD;
use crate::models::{GameRecord, IdMapEntry};
use crate::resolver::Candidate;

use super::{checkpoint, record, AppendReport, FailedGame, Updater};

impl Updater {
    pub async fn run_append(&self, title_file: &Path) -> Result<AppendReport> {
        let existing_id_map = self.adapter.get_id_map().await?;
        let existing_ids: HashSet<String> = existing_id_map.iter().map(|e| e.id.clone()).collect();
        let existing_games = self.adapter.get_games_data().await?;

        let candidates: Vec<Candidate> = self
            .storefront
            .fetch_app_list()
            .await
            .context("failed to fetch storefront app list")?;

        let mapping_result_path = self.config.mapping_result_path();
        let pricehistory = Arc::clone(&self.pricehistory);
        let outcome = crate::resolver::resolve_title_file(
            title_file,
            &mapping_result_path,
            &candidates,
            |app_id| {
                let pricehistory = Arc::clone(&pricehistory);
                async move { pricehistory.get_itad_id_from_app_id(&app_id).await.ok().flatten() }
            },
        )
        .await
        .context("title resolution failed")?;

        let mut report = AppendReport {
            ambiguous: outcome.ambiguous,
            low_confidence: outcome.low_confidence,
            no_match: outcome.no_match,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let new_mappings: Vec<_> = outcome
            .accepted
            .into_iter()
            .filter(|m| !existing_ids.contains(&m.app_id) && seen.insert(m.app_id.clone()))
            .collect();
        report.new_ids = new_mappings.len();

        if new_mappings.is_empty() {
            info!("no new ids to append");
            return Ok(report);
        }

        let records = if new_mappings.len() >= BATCH_THRESHOLD {
            self.run_batch_submode(&new_mappings, &existing_ids, &mut report).await?
        } else {
            self.fetch_records(&new_mappings, &mut report).await
        };

        if !report.failed_games.is_empty() {
            warn!(count = report.failed_games.len(), "append aborted: per-id failures present");
            report.aborted = true;
            self.stage_rebuilt(&records).await.ok();
            return Ok(report);
        }

        report.added = records.len();

        let mut games = existing_games;
        games.extend(records);

        let mut id_map = existing_id_map;
        id_map.extend(new_mappings.iter().map(|m| IdMapEntry {
            id: m.app_id.clone(),
            itad_id: m.itad_id.clone(),
        }));

        let last_updated = self
            .adapter
            .get_catalog_meta()
            .await?
            .map(|m| m.last_updated)
            .unwrap_or_else(Utc::now);
        self.adapter.save_catalog(&id_map, &games, last_updated).await?;

        Ok(report)
    }

    /// Fetches storefront + price-history data for `mappings`, with no
    /// checkpointing — used below the batch threshold.
    async fn fetch_records(
        &self,
        mappings: &[crate::resolver::AcceptedMapping],
        report: &mut AppendReport,
    ) -> Vec<GameRecord> {
        let itad_ids: Vec<String> = mappings.iter().filter_map(|m| m.itad_id.clone()).collect();
        let primary_region = self.config.primary_region();
        let deals = self
            .pricehistory
            .get_batch_deals(&itad_ids, primary_region, self.config.chunk_size)
            .await;

        let Some(deals_by_itad) = deals else {
            report.failed_games.push(FailedGame {
                app_id: "*".to_string(),
                reason: "price-history batch returned no usable entries".to_string(),
            });
            return Vec::new();
        };

        let futs = mappings.iter().map(|mapping| self.build_one(mapping, &deals_by_itad));
        join_all(futs)
            .await
            .into_iter()
            .filter_map(|r| match r {
                Ok(record) => Some(record),
                Err(failed) => {
                    error!(app_id = %failed.app_id, reason = %failed.reason, "append fetch failed");
                    report.failed_games.push(failed);
                    None
                }
            })
            .collect()
    }

    async fn build_one(
        &self,
        mapping: &crate::resolver::AcceptedMapping,
        deals_by_itad: &HashMap<String, crate::upstream::pricehistory::PriceHistoryDeal>,
    ) -> std::result::Result<GameRecord, FailedGame> {
        let regions: Vec<&'static crate::config::RegionConfig> = self.config.regions.clone();
        let info = self
            .storefront
            .fetch_game_info(&mapping.app_id, &regions)
            .await
            .map_err(|e| FailedGame { app_id: mapping.app_id.clone(), reason: e.to_string() })?
            .ok_or_else(|| FailedGame {
                app_id: mapping.app_id.clone(),
                reason: "storefront reported no data".to_string(),
            })?;

        let mut deals = HashMap::new();
        if let Some(itad_id) = &mapping.itad_id {
            if let Some(deal) = deals_by_itad.get(itad_id) {
                deals.insert(self.config.primary_region().currency, *deal);
            }
        }

        let tags = match &mapping.itad_id {
            Some(itad_id) => self.pricehistory.get_tags(itad_id).await,
            None => Vec::new(),
        };

        Ok(record::build_record(&mapping.app_id, mapping.itad_id.clone(), &info, &deals, tags, &regions))
    }

    /// Batch sub-mode: lock file, resumable checkpoint shards every 1000
    /// completed records, final shard concatenation.
    async fn run_batch_submode(
        &self,
        mappings: &[crate::resolver::AcceptedMapping],
        existing_ids: &HashSet<String>,
        report: &mut AppendReport,
    ) -> Result<Vec<GameRecord>> {
        let start_time = Utc::now();
        let log_file = format!("rebuild_in_progress_{}.log", start_time.format("%Y%m%d_%H%M%S"));
        let lock_path = self.config.batch_lock_path();
        if let Some(stale) = checkpoint::read_lock(&lock_path).await.context("failed to read batch lock file")? {
            warn!(
                previous_start = %stale.start_time,
                previous_log = stale.log_file,
                "found a lock file from an earlier run, resuming from its checkpoints"
            );
        }
        checkpoint::write_lock(
            &lock_path,
            &checkpoint::LockFile { start_time, log_file: log_file.clone() },
        )
        .await
        .context("failed to write batch lock file")?;
        info!(lock = %lock_path.display(), "entered batch sub-mode");

        let checkpoint_dir = self.config.checkpoint_dir();
        let resume_from = checkpoint::latest_checkpoint(&checkpoint_dir)
            .await
            .context("failed to read checkpoint shards")?
            .map(|(count, _)| count)
            .unwrap_or(0);

        if resume_from > 0 {
            info!(resume_from, "resuming batch append from checkpoint");
        }

        let remaining = &mappings[resume_from.min(mappings.len())..];
        let mut tail = Vec::new();
        let mut processed_since_shard = 0;
        let mut total_processed = resume_from;
        let mut last_checkpointed = resume_from;

        for chunk in remaining.chunks(crate::config::CHECKPOINT_INTERVAL) {
            let itad_ids: Vec<String> = chunk.iter().filter_map(|m| m.itad_id.clone()).collect();
            let primary_region = self.config.primary_region();
            let deals = self
                .pricehistory
                .get_batch_deals(&itad_ids, primary_region, self.config.chunk_size)
                .await;
            let Some(deals_by_itad) = deals else {
                report.failed_games.push(FailedGame {
                    app_id: "*".to_string(),
                    reason: "price-history batch returned no usable entries".to_string(),
                });
                checkpoint::remove_lock(&lock_path).await.ok();
                return Ok(Vec::new());
            };

            let futs = chunk.iter().map(|mapping| self.build_one(mapping, &deals_by_itad));
            for result in join_all(futs).await {
                match result {
                    Ok(record) => {
                        tail.push(record);
                        processed_since_shard += 1;
                        total_processed += 1;
                    }
                    Err(failed) => {
                        error!(app_id = %failed.app_id, reason = %failed.reason, "batch append fetch failed");
                        report.failed_games.push(failed);
                    }
                }
            }

            if processed_since_shard >= crate::config::CHECKPOINT_INTERVAL {
                checkpoint::write_shard(&checkpoint_dir, total_processed, &tail)
                    .await
                    .context("failed to write checkpoint shard")?;
                let mut id_map = self.adapter.get_id_map().await?;
                id_map.extend(
                    mappings[last_checkpointed..total_processed.min(mappings.len())]
                        .iter()
                        .filter(|m| !existing_ids.contains(&m.app_id))
                        .map(|m| IdMapEntry { id: m.app_id.clone(), itad_id: m.itad_id.clone() }),
                );
                self.adapter.put_id_map(&id_map).await?;
                last_checkpointed = total_processed;
                tail.clear();
                processed_since_shard = 0;
                info!(total_processed, "checkpointed batch append");
            }
        }

        if !report.failed_games.is_empty() {
            return Ok(Vec::new());
        }

        let merged = checkpoint::concatenate_shards(&checkpoint_dir, tail, existing_ids)
            .await
            .context("failed to concatenate checkpoint shards")?;

        checkpoint::clear_checkpoints(&checkpoint_dir).await.ok();
        checkpoint::remove_lock(&lock_path).await.ok();

        let end_time = Utc::now();
        let final_log = self
            .config
            .batch_log_dir()
            .join(format!("rebuild_{}_to_{}.log", start_time.format("%Y%m%d_%H%M%S"), end_time.format("%Y%m%d_%H%M%S")));
        if let Some(parent) = final_log.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        info!(log = %final_log.display(), "batch append complete");

        Ok(merged)
    }
}
