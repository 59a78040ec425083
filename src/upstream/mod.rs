//! Upstream API clients: the storefront (title metadata + live prices) and
//! the price-history batch API (historical lows).
//!
//! Both clients sit behind a trait so the updater can be driven against a
//! hand-rolled in-process fake in tests, rather than pulling in a mocking
//! crate (`backtest_v2/*_tests.rs` sets this preference in the teacher).

pub mod pricehistory;
pub mod storefront;

pub use pricehistory::PriceHistoryClient;
pub use storefront::StorefrontClient;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::RegionConfig;
use crate::resolver::Candidate;
use pricehistory::PriceHistoryDeal;
use storefront::{BasicInfo, GameInfo};

#[async_trait]
pub trait StorefrontSource: Send + Sync {
    async fn fetch_app_list(&self) -> Result<Vec<Candidate>>;
    async fn fetch_game_info(&self, app_id: &str, regions: &[&'static RegionConfig]) -> Result<Option<GameInfo>>;
    async fn fetch_basic_info(&self, app_id: &str, region: &RegionConfig) -> Result<Option<BasicInfo>>;
}

#[async_trait]
impl StorefrontSource for StorefrontClient {
    async fn fetch_app_list(&self) -> Result<Vec<Candidate>> {
        StorefrontClient::fetch_app_list(self).await
    }

    async fn fetch_game_info(&self, app_id: &str, regions: &[&'static RegionConfig]) -> Result<Option<GameInfo>> {
        StorefrontClient::fetch_game_info(self, app_id, regions).await
    }

    async fn fetch_basic_info(&self, app_id: &str, region: &RegionConfig) -> Result<Option<BasicInfo>> {
        StorefrontClient::fetch_basic_info(self, app_id, region).await
    }
}

#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn get_batch_deals(
        &self,
        ids: &[String],
        region: &RegionConfig,
        chunk_size: usize,
    ) -> Option<HashMap<String, PriceHistoryDeal>>;

    async fn get_itad_id_from_app_id(&self, app_id: &str) -> Result<Option<String>>;

    async fn get_tags(&self, history_id: &str) -> Vec<String>;
}

#[async_trait]
impl PriceHistorySource for PriceHistoryClient {
    async fn get_batch_deals(
        &self,
        ids: &[String],
        region: &RegionConfig,
        chunk_size: usize,
    ) -> Option<HashMap<String, PriceHistoryDeal>> {
        PriceHistoryClient::get_batch_deals(self, ids, region, chunk_size).await
    }

    async fn get_itad_id_from_app_id(&self, app_id: &str) -> Result<Option<String>> {
        PriceHistoryClient::get_itad_id_from_app_id(self, app_id).await
    }

    async fn get_tags(&self, history_id: &str) -> Vec<String> {
        PriceHistoryClient::get_tags(self, history_id).await
    }
}
