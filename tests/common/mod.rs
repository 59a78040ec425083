//! Hand-rolled in-process fakes for the two upstream traits, used instead
//! of a mocking crate so the diff-refresh/append pipelines can be driven
//! end-to-end without touching the network.
//!
//! Shared across multiple `tests/*.rs` binaries, each of which only
//! exercises a subset of these builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use catalog_updater::config::RegionConfig;
use catalog_updater::resolver::Candidate;
use catalog_updater::upstream::pricehistory::PriceHistoryDeal;
use catalog_updater::upstream::storefront::{BasicInfo, GameInfo, PriceInfo};
use catalog_updater::upstream::{PriceHistorySource, StorefrontSource};

#[derive(Default)]
pub struct FakeStorefront {
    pub app_list: Vec<Candidate>,
    pub game_info: Mutex<HashMap<String, GameInfo>>,
    pub basic_info: Mutex<HashMap<String, BasicInfo>>,
    pub game_info_calls: AtomicUsize,
    pub basic_info_calls: AtomicUsize,
}

impl FakeStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_game_info(self, app_id: &str, info: GameInfo) -> Self {
        self.game_info.lock().unwrap().insert(app_id.to_string(), info);
        self
    }

    pub fn with_basic_info(self, app_id: &str, info: BasicInfo) -> Self {
        self.basic_info.lock().unwrap().insert(app_id.to_string(), info);
        self
    }

    pub fn game_info_call_count(&self) -> usize {
        self.game_info_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorefrontSource for FakeStorefront {
    async fn fetch_app_list(&self) -> anyhow::Result<Vec<Candidate>> {
        Ok(self.app_list.clone())
    }

    async fn fetch_game_info(
        &self,
        app_id: &str,
        _regions: &[&'static RegionConfig],
    ) -> anyhow::Result<Option<GameInfo>> {
        self.game_info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.game_info.lock().unwrap().get(app_id).cloned())
    }

    async fn fetch_basic_info(&self, app_id: &str, _region: &RegionConfig) -> anyhow::Result<Option<BasicInfo>> {
        self.basic_info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.basic_info.lock().unwrap().get(app_id).cloned())
    }
}

#[derive(Default)]
pub struct FakePriceHistory {
    pub deals: Mutex<HashMap<String, PriceHistoryDeal>>,
    pub itad_ids: Mutex<HashMap<String, String>>,
    pub return_empty_batch: bool,
}

impl FakePriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deal(self, itad_id: &str, deal: PriceHistoryDeal) -> Self {
        self.deals.lock().unwrap().insert(itad_id.to_string(), deal);
        self
    }

    pub fn with_itad_id(self, app_id: &str, itad_id: &str) -> Self {
        self.itad_ids.lock().unwrap().insert(app_id.to_string(), itad_id.to_string());
        self
    }

    pub fn empty_batch(mut self) -> Self {
        self.return_empty_batch = true;
        self
    }
}

#[async_trait]
impl PriceHistorySource for FakePriceHistory {
    async fn get_batch_deals(
        &self,
        ids: &[String],
        _region: &RegionConfig,
        _chunk_size: usize,
    ) -> Option<HashMap<String, PriceHistoryDeal>> {
        if self.return_empty_batch {
            return if ids.is_empty() { Some(HashMap::new()) } else { None };
        }
        let deals = self.deals.lock().unwrap();
        Some(ids.iter().filter_map(|id| deals.get(id).map(|d| (id.clone(), *d))).collect())
    }

    async fn get_itad_id_from_app_id(&self, app_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.itad_ids.lock().unwrap().get(app_id).cloned())
    }

    async fn get_tags(&self, _history_id: &str) -> Vec<String> {
        Vec::new()
    }
}

pub fn sample_price_info(currency: &'static str, price: i64, sale_price: i64) -> PriceInfo {
    PriceInfo { currency, price: Some(price), sale_price: Some(sale_price), discount_percent: None }
}

pub fn sample_game_info(title: &str, app_id: &str, currency: &'static str, price: i64, sale_price: i64) -> GameInfo {
    let mut prices = HashMap::new();
    prices.insert(currency, sample_price_info(currency, price, sale_price));
    GameInfo {
        title: title.to_string(),
        app_id: app_id.to_string(),
        store_url: format!("https://store.steampowered.com/app/{app_id}/"),
        supported_languages: "English".to_string(),
        genres: vec!["Action".to_string()],
        image_url: "https://example.com/x.jpg".to_string(),
        release_date: "2021-01-01".to_string(),
        platforms: catalog_updater::models::Platforms { windows: true, mac: false, linux: false },
        developers: vec!["Dev".to_string()],
        publishers: vec!["Pub".to_string()],
        prices,
        review_score: "Very Positive".to_string(),
    }
}

pub fn sample_basic_info(currency: &'static str, price: i64, sale_price: i64) -> BasicInfo {
    let mut prices = HashMap::new();
    prices.insert(currency, sample_price_info(currency, price, sale_price));
    BasicInfo {
        title: "Test Game".to_string(),
        genres: vec!["Action".to_string()],
        supported_languages: "English".to_string(),
        platforms: catalog_updater::models::Platforms { windows: true, mac: false, linux: false },
        developers: vec!["Dev".to_string()],
        publishers: vec!["Pub".to_string()],
        release_date: Some("2021-01-01".to_string()),
        prices,
    }
}
