//! Diff-refresh mode: batch-check every existing id against
//! price-history, rebuild only the ones that changed, and merge back in
//! original order.
//!
//! Grounded on `game_data_builder.py`'s Phase-1/Phase-2 split (basic-info
//! fetch → compare → full rebuild only for changed ids), generalized per
//! `SPEC_FULL.md` §4.5 from a single-currency Steam-API comparison to a
//! multi-currency price-history `(price, cut)` comparison with a
//! `noItadData` bypass lane.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::Utc;
use futures_util::future::join_all;
use tracing::info;

use crate::models::GameRecord;
use crate::upstream::pricehistory::PriceHistoryDeal;

use super::{record, DiffRefreshReport, FailedGame, Updater};

impl Updater {
    pub async fn run_diff_refresh(&self) -> Result<DiffRefreshReport> {
        let id_map = self.adapter.get_id_map().await?;
        let itad_id_by_app: HashMap<&str, &str> = id_map
            .iter()
            .filter_map(|e| e.itad_id.as_deref().map(|itad| (e.id.as_str(), itad)))
            .collect();

        let mut games = self.adapter.get_games_data().await?;
        let mut report = DiffRefreshReport { checked: games.len(), ..Default::default() };

        // Phase 1: batch-fetch price-history deals for every id whose
        // current record doesn't already carry noItadData.
        let primary_region = self.config.primary_region();
        let phase1_itad_ids: Vec<String> = games
            .iter()
            .filter(|g| !g.deal.get(primary_region.currency).map(|d| d.no_itad_data).unwrap_or(true))
            .filter_map(|g| itad_id_by_app.get(g.id.as_str()).map(|s| s.to_string()))
            .collect();

        let deals = self
            .pricehistory
            .get_batch_deals(&phase1_itad_ids, primary_region, self.config.chunk_size)
            .await;
        let Some(deals_by_itad) = deals else {
            report.aborted = true;
            self.stage_rebuilt(&[]).await.ok();
            info!("diff-refresh aborted: price-history batch returned no usable entries");
            return Ok(report);
        };

        let mut marked_for_update: HashSet<String> = HashSet::new();
        let mut cached_deal: HashMap<String, PriceHistoryDeal> = HashMap::new();

        for game in &games {
            let stored = game.deal.get(primary_region.currency);
            let no_itad_data = stored.map(|d| d.no_itad_data).unwrap_or(true);
            if no_itad_data {
                continue; // handled in Phase 1.5
            }

            let Some(itad_id) = itad_id_by_app.get(game.id.as_str()) else {
                continue;
            };
            match deals_by_itad.get(*itad_id) {
                Some(deal) if deal.price.is_some() && deal.regular.is_some() => {
                    let changed = stored
                        .map(|s| {
                            let derived_cut = crate::models::derive_cut(deal.price.unwrap(), deal.regular.unwrap());
                            s.price.value() != deal.price || s.cut != derived_cut
                        })
                        .unwrap_or(true);
                    if changed {
                        marked_for_update.insert(game.id.clone());
                    }
                    cached_deal.insert(game.id.clone(), *deal);
                }
                _ => {
                    // History-id returned no usable data: fall back to a
                    // storefront-synthesized quote.
                    marked_for_update.insert(game.id.clone());
                }
            }
        }

        // Phase 1.5: noItadData bypass — compare live storefront current
        // price against the stored one.
        let no_itad_games: Vec<&GameRecord> = games
            .iter()
            .filter(|g| g.deal.get(primary_region.currency).map(|d| d.no_itad_data).unwrap_or(true))
            .collect();

        let bypass_checks = no_itad_games.iter().map(|game| self.check_bypass(game, primary_region.currency));
        for result in join_all(bypass_checks).await {
            match result {
                Ok(Some(id)) => {
                    marked_for_update.insert(id);
                }
                Ok(None) => {}
                Err(failed) => report.failed_games.push(failed),
            }
        }

        if !report.failed_games.is_empty() {
            report.aborted = true;
            self.stage_rebuilt(&[]).await.ok();
            return Ok(report);
        }

        // Phase 2: rebuild each marked id from all three storefront
        // endpoints, reusing the cached price-history deal when present.
        let regions = self.config.regions.clone();
        let rebuild_futs = marked_for_update.iter().map(|id| {
            let itad_id = itad_id_by_app.get(id.as_str()).map(|s| s.to_string());
            let mut deals = HashMap::new();
            if let Some(deal) = cached_deal.get(id) {
                deals.insert(primary_region.currency, *deal);
            }
            self.rebuild_one(id.clone(), itad_id, deals, &regions)
        });

        let mut rebuilt: HashMap<String, GameRecord> = HashMap::new();
        for result in join_all(rebuild_futs).await {
            match result {
                Ok(record) => {
                    rebuilt.insert(record.id.clone(), record);
                }
                Err(failed) => report.failed_games.push(failed),
            }
        }

        if !report.failed_games.is_empty() {
            report.aborted = true;
            let partial: Vec<GameRecord> = rebuilt.into_values().collect();
            self.stage_rebuilt(&partial).await.ok();
            info!(count = report.failed_games.len(), "diff-refresh aborted: Phase 2 failures present");
            return Ok(report);
        }

        report.updated = rebuilt.len();
        for game in games.iter_mut() {
            if let Some(new_record) = rebuilt.remove(&game.id) {
                *game = new_record;
            }
        }

        if report.updated == 0 {
            info!("diff-refresh found no changes");
        }
        self.adapter.save_catalog(&id_map, &games, Utc::now()).await?;

        Ok(report)
    }

    async fn check_bypass(
        &self,
        game: &GameRecord,
        currency: &'static str,
    ) -> std::result::Result<Option<String>, FailedGame> {
        let region = self
            .config
            .regions
            .iter()
            .find(|r| r.currency == currency)
            .copied()
            .expect("primary region always present");
        let info = self
            .storefront
            .fetch_basic_info(&game.id, region)
            .await
            .map_err(|e| FailedGame { app_id: game.id.clone(), reason: e.to_string() })?
            .ok_or_else(|| FailedGame { app_id: game.id.clone(), reason: "storefront reported no data".to_string() })?;

        let Some(price_info) = info.prices.get(currency) else {
            return Ok(None);
        };
        let current = price_info.sale_price.or(price_info.price).unwrap_or(0);
        let stored_price = game.deal.get(currency).and_then(|d| d.price.value());
        if stored_price != Some(current) {
            Ok(Some(game.id.clone()))
        } else {
            Ok(None)
        }
    }

    async fn rebuild_one(
        &self,
        app_id: String,
        itad_id: Option<String>,
        deals: HashMap<&'static str, PriceHistoryDeal>,
        regions: &[&'static crate::config::RegionConfig],
    ) -> std::result::Result<GameRecord, FailedGame> {
        let info = self
            .storefront
            .fetch_game_info(&app_id, regions)
            .await
            .map_err(|e| FailedGame { app_id: app_id.clone(), reason: e.to_string() })?
            .ok_or_else(|| FailedGame { app_id: app_id.clone(), reason: "storefront reported no data".to_string() })?;

        let tags = match &itad_id {
            Some(id) => self.pricehistory.get_tags(id).await,
            None => Vec::new(),
        };

        Ok(record::build_record(&app_id, itad_id, &info, &deals, tags, regions))
    }
}
