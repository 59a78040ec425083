//! Client for the historical-low-price batch API.
//!
//! Grounded on `examples/original_source/updater/itad_client.py`: batch
//! vs. chunked requests, the steam-shop-id deal filter, and the
//! abort-on-empty-batch behavior (an empty or missing batch response
//! returns `None`, which callers use to abort rather than wipe the
//! catalog — see `SPEC_FULL.md`'s differential-update safety rule) are
//! all ported from there.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::{RegionConfig, STOREFRONT_SHOP_ID, USER_AGENT_PRICEHISTORY};
use crate::rate::RateController;

const MAX_RETRIES: u32 = 3;
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// The Steam-shop deal extracted from one `games/prices/v3` entry: current
/// price, regular (list) price, discount percent, and all-time store low.
/// `price`/`regular`/`cut` feed the diff-refresh Phase 1 comparison;
/// `store_low` feeds `DealQuote::store_low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceHistoryDeal {
    pub price: Option<i64>,
    pub regular: Option<i64>,
    pub cut: Option<u8>,
    pub store_low: Option<i64>,
}

#[derive(Deserialize)]
struct DealEntry {
    id: String,
    #[serde(default)]
    deals: Vec<Deal>,
}

#[derive(Deserialize)]
struct Deal {
    shop: ShopRef,
    price: Option<Amount>,
    regular: Option<Amount>,
    #[serde(default)]
    cut: Option<i64>,
    #[serde(rename = "storeLow", default)]
    store_low: Option<Amount>,
}

#[derive(Deserialize)]
struct ShopRef {
    id: u64,
}

#[derive(Deserialize)]
struct Amount {
    amount: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Deserialize)]
struct GameInfoResponse {
    #[serde(default)]
    tags: Vec<String>,
}

pub struct PriceHistoryClient {
    client: Client,
    api_key: Option<String>,
    rate: std::sync::Arc<RateController>,
}

impl PriceHistoryClient {
    pub fn new(api_key: Option<String>, rate: std::sync::Arc<RateController>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT_PRICEHISTORY)
            .build()
            .context("failed to build price-history HTTP client")?;
        Ok(PriceHistoryClient { client, api_key, rate })
    }

    /// Returns, for each requested id that the upstream recognized, its
    /// Steam-shop deal. An id absent from the returned map had no usable
    /// deal data (treated downstream as "no price-history data").
    ///
    /// Batches of `<= chunk_size` ids go out as one request; larger
    /// batches are split into `chunk_size`-sized chunks, each independently
    /// retried, so a single bad chunk doesn't sink the whole call. Returns
    /// `None` only when the *first* chunk came back with zero usable
    /// entries despite a non-empty input — the caller's abort-on-empty-
    /// batch rule (spec.md §4.2/§8 scenario 6).
    pub async fn get_batch_deals(
        &self,
        ids: &[String],
        region: &RegionConfig,
        chunk_size: usize,
    ) -> Option<HashMap<String, PriceHistoryDeal>> {
        if ids.is_empty() {
            return Some(HashMap::new());
        }
        if self.api_key.is_none() {
            warn!("price-history API key not provided");
            return Some(HashMap::new());
        }

        if ids.len() <= chunk_size {
            info!(count = ids.len(), "fetching deals (single request)");
            self.fetch_prices_batch(ids, region).await
        } else {
            info!(count = ids.len(), chunk_size, "fetching deals (chunked)");
            self.fetch_prices_chunked(ids, region, chunk_size).await
        }
    }

    async fn fetch_prices_batch(
        &self,
        ids: &[String],
        region: &RegionConfig,
    ) -> Option<HashMap<String, PriceHistoryDeal>> {
        let api_key = self.api_key.as_ref()?;
        let url = format!(
            "https://api.isthereanydeal.com/games/prices/v3?key={api_key}&country={}",
            region.pricehistory_country
        );

        let response = self.request_with_retry(&url, ids).await;
        let response = match response {
            Ok(Some(r)) => r,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "price-history batch request error");
                return None;
            }
        };

        let data: Vec<DealEntry> = match response.json().await {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "failed to parse price-history response");
                return None;
            }
        };

        if data.is_empty() {
            warn!("no data returned for batch request");
            return None;
        }

        let mut result = HashMap::new();
        for item in data {
            if let Some(deal) = extract_steam_deal(&item, region) {
                result.insert(item.id, deal);
            }
        }
        Some(result)
    }

    async fn fetch_prices_chunked(
        &self,
        ids: &[String],
        region: &RegionConfig,
        chunk_size: usize,
    ) -> Option<HashMap<String, PriceHistoryDeal>> {
        let mut result = HashMap::new();
        let chunks: Vec<&[String]> = ids.chunks(chunk_size).collect();
        let total = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            info!(chunk = i + 1, total, size = chunk.len(), "fetching chunk");
            match self.fetch_prices_batch(chunk, region).await {
                Some(chunk_result) => result.extend(chunk_result),
                None if i == 0 => {
                    // First chunk came back empty: this is the abort signal,
                    // not a recoverable per-chunk failure.
                    return None;
                }
                None => {
                    error!(chunk = i + 1, total, "chunk failed, marking unresolved");
                }
            }
        }
        Some(result)
    }

    /// Top price-history tags for `history_id`, truncated to the first 3
    /// (spec.md §3: `tags` length ≤ 3). Best-effort: any failure yields an
    /// empty list rather than propagating, since a missing tag list is not
    /// a per-id failure.
    pub async fn get_tags(&self, history_id: &str) -> Vec<String> {
        let Some(api_key) = self.api_key.as_ref() else {
            return Vec::new();
        };
        let url = format!("https://api.isthereanydeal.com/games/info/v2?key={api_key}&id={history_id}");
        let client = self.client.clone();
        let url_owned = url.clone();
        let response = self
            .rate
            .run(|| async move { client.get(&url_owned).send().await })
            .await;
        let Ok(response) = response else {
            return Vec::new();
        };
        if !response.status().is_success() {
            return Vec::new();
        }
        let Ok(body) = response.json::<GameInfoResponse>().await else {
            return Vec::new();
        };
        body.tags.into_iter().take(3).collect()
    }

    async fn request_with_retry(
        &self,
        url: &str,
        payload: &[String],
    ) -> Result<Option<reqwest::Response>> {
        for attempt in 0..MAX_RETRIES {
            let url_owned = url.to_string();
            let client = self.client.clone();
            let body = payload.to_vec();
            let response = self
                .rate
                .run(|| async move { client.post(&url_owned).json(&body).send().await })
                .await
                .context("price-history request failed")?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                self.rate.report_http_error(429, retry_after).await;

                if attempt < MAX_RETRIES - 1 {
                    let wait = 2u64.pow(attempt + 1).max(retry_after.unwrap_or(0));
                    warn!(attempt, wait, "price-history 429, retrying");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    continue;
                }
                error!("price-history 429, retries exhausted");
                return Ok(None);
            }

            if response.status() == StatusCode::FORBIDDEN {
                self.rate.report_http_error(403, None).await;
                error!(url, "price-history 403 forbidden");
                return Ok(None);
            }

            return Ok(Some(response.error_for_status().context("price-history error status")?));
        }
        Ok(None)
    }

    pub async fn get_itad_id_from_app_id(&self, app_id: &str) -> Result<Option<String>> {
        let Some(api_key) = self.api_key.as_ref() else {
            warn!("price-history API key not provided");
            return Ok(None);
        };
        let url = format!(
            "https://api.isthereanydeal.com/games/lookup/v1?key={api_key}&appid={app_id}"
        );

        #[derive(Deserialize)]
        struct LookupResponse {
            found: bool,
            game: Option<LookupGame>,
        }
        #[derive(Deserialize)]
        struct LookupGame {
            id: String,
        }

        let client = self.client.clone();
        let url_owned = url.clone();
        let response = self
            .rate
            .run(|| async move { client.get(&url_owned).send().await })
            .await
            .context("lookup request failed")?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let body: LookupResponse = response.json().await.context("failed to parse lookup response")?;
        if body.found {
            Ok(body.game.map(|g| g.id))
        } else {
            Ok(None)
        }
    }
}

fn extract_steam_deal(item: &DealEntry, region: &RegionConfig) -> Option<PriceHistoryDeal> {
    let deal = item.deals.iter().find(|d| d.shop.id == STOREFRONT_SHOP_ID)?;

    check_currency(item, deal.price.as_ref(), region);
    check_currency(item, deal.regular.as_ref(), region);
    check_currency(item, deal.store_low.as_ref(), region);

    let store_low = deal.store_low.as_ref().and_then(|a| a.amount).map(|a| a as i64);
    if store_low.is_none() && deal.price.is_none() && deal.regular.is_none() {
        return None;
    }

    Some(PriceHistoryDeal {
        price: deal.price.as_ref().and_then(|a| a.amount).map(|a| a as i64),
        regular: deal.regular.as_ref().and_then(|a| a.amount).map(|a| a as i64),
        cut: deal.cut.map(|c| c.clamp(0, 100) as u8),
        store_low,
    })
}

fn check_currency(item: &DealEntry, amount: Option<&Amount>, region: &RegionConfig) {
    let Some(amount) = amount else { return };
    let Some(currency) = amount.currency.as_deref() else { return };
    if currency != region.currency {
        warn!(
            expected = region.currency,
            got = currency,
            id = item.id,
            "currency mismatch"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_default_matches_documented_limit() {
        assert_eq!(DEFAULT_CHUNK_SIZE, 200);
    }

    #[test]
    fn extract_steam_deal_skips_non_steam_shops() {
        let item = DealEntry {
            id: "abc".to_string(),
            deals: vec![Deal {
                shop: ShopRef { id: 99 },
                price: Some(Amount { amount: Some(1000.0), currency: Some("JPY".to_string()) }),
                regular: Some(Amount { amount: Some(1000.0), currency: Some("JPY".to_string()) }),
                cut: Some(0),
                store_low: None,
            }],
        };
        let region = crate::config::region_config("JP").unwrap();
        assert!(extract_steam_deal(&item, region).is_none());
    }

    #[test]
    fn extract_steam_deal_reads_price_regular_cut_store_low() {
        let item = DealEntry {
            id: "abc".to_string(),
            deals: vec![Deal {
                shop: ShopRef { id: STOREFRONT_SHOP_ID },
                price: Some(Amount { amount: Some(700.0), currency: Some("JPY".to_string()) }),
                regular: Some(Amount { amount: Some(1000.0), currency: Some("JPY".to_string()) }),
                cut: Some(30),
                store_low: Some(Amount { amount: Some(500.0), currency: Some("JPY".to_string()) }),
            }],
        };
        let region = crate::config::region_config("JP").unwrap();
        let deal = extract_steam_deal(&item, region).unwrap();
        assert_eq!(deal.price, Some(700));
        assert_eq!(deal.regular, Some(1000));
        assert_eq!(deal.cut, Some(30));
        assert_eq!(deal.store_low, Some(500));
    }
}
