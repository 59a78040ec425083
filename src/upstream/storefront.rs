//! Client for the storefront's public appdetails/store-page/appreviews
//! endpoints.
//!
//! Grounded on `examples/original_source/updater/steam_client.py`: the
//! three-endpoint-per-title shape, the capsule image regex scrape, and the
//! price/release-date extraction rules are all ported from there. The
//! client shape (builder with timeout + user agent, `execute_with_retry`,
//! typed response structs) follows
//! `cooprefr-bettersys/rust-backend/src/scrapers/polymarket_api.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::config::{RegionConfig, USER_AGENT_STOREFRONT};
use crate::models::Platforms;
use crate::rate::RateController;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceInfo {
    pub currency: &'static str,
    pub price: Option<i64>,
    pub sale_price: Option<i64>,
    pub discount_percent: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BasicInfo {
    pub title: String,
    pub genres: Vec<String>,
    pub supported_languages: String,
    pub platforms: Platforms,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub release_date: Option<String>,
    pub prices: HashMap<&'static str, PriceInfo>,
}

#[derive(Debug, Clone)]
pub struct GameInfo {
    pub title: String,
    pub app_id: String,
    pub store_url: String,
    pub supported_languages: String,
    pub genres: Vec<String>,
    pub image_url: String,
    pub release_date: String,
    pub platforms: Platforms,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub prices: HashMap<&'static str, PriceInfo>,
    pub review_score: String,
}

#[derive(Deserialize)]
struct AppDetailsEntry {
    success: bool,
    data: Option<AppData>,
}

#[derive(Deserialize)]
struct AppData {
    name: Option<String>,
    #[serde(default)]
    is_free: bool,
    price_overview: Option<PriceOverview>,
    release_date: Option<ReleaseDateField>,
    platforms: Option<PlatformsField>,
    #[serde(default)]
    developers: Vec<String>,
    #[serde(default)]
    publishers: Vec<String>,
    #[serde(default)]
    genres: Vec<GenreField>,
    supported_languages: Option<String>,
    header_image: Option<String>,
}

#[derive(Deserialize)]
struct PriceOverview {
    #[serde(rename = "final", default)]
    final_: i64,
    #[serde(default)]
    initial: i64,
    #[serde(default)]
    discount_percent: i64,
}

#[derive(Deserialize)]
struct ReleaseDateField {
    date: Option<String>,
}

#[derive(Deserialize, Default)]
struct PlatformsField {
    #[serde(default)]
    windows: bool,
    #[serde(default)]
    mac: bool,
    #[serde(default)]
    linux: bool,
}

#[derive(Deserialize)]
struct GenreField {
    description: Option<String>,
}

#[derive(Deserialize)]
struct ReviewsResponse {
    query_summary: Option<QuerySummary>,
}

#[derive(Deserialize)]
struct QuerySummary {
    review_score_desc: Option<String>,
}

pub struct StorefrontClient {
    client: Client,
    rate: Arc<RateController>,
}

impl StorefrontClient {
    pub fn new(rate: Arc<RateController>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT_STOREFRONT)
            .build()
            .context("failed to build storefront HTTP client")?;
        Ok(StorefrontClient { client, rate })
    }

    async fn request_with_retry(&self, url: &str) -> Result<Option<reqwest::Response>> {
        for attempt in 0..MAX_RETRIES {
            let url_owned = url.to_string();
            let client = self.client.clone();
            let response = self
                .rate
                .run(|| async move { client.get(&url_owned).send().await })
                .await
                .context("storefront request failed")?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                self.rate.report_http_error(429, retry_after).await;

                if attempt < MAX_RETRIES - 1 {
                    let wait = 2u64.pow(attempt + 1).max(retry_after.unwrap_or(0));
                    warn!(attempt, wait, "storefront 429, retrying");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    continue;
                }
                error!("storefront 429, retries exhausted");
                return Ok(None);
            }

            if response.status() == StatusCode::FORBIDDEN {
                self.rate.report_http_error(403, None).await;
                error!(url, "storefront 403 forbidden");
                return Ok(None);
            }

            return Ok(Some(response.error_for_status().context("storefront error status")?));
        }
        Ok(None)
    }

    pub async fn fetch_basic_info(
        &self,
        app_id: &str,
        region: &RegionConfig,
    ) -> Result<Option<BasicInfo>> {
        let url = format!(
            "https://store.steampowered.com/api/appdetails?appids={app_id}&l=english&cc={}",
            region.storefront_cc
        );
        let Some(response) = self.request_with_retry(&url).await? else {
            return Ok(None);
        };

        let body: HashMap<String, AppDetailsEntry> = response
            .json()
            .await
            .context("failed to parse appdetails response")?;
        let Some(entry) = body.get(app_id) else {
            return Ok(None);
        };
        if !entry.success {
            return Ok(None);
        }
        let app_data = entry
            .data
            .as_ref()
            .context("appdetails marked success but carries no data")?;

        let mut prices = HashMap::new();
        if let Some(p) = extract_price(app_data, region.currency) {
            prices.insert(region.currency, p);
        }

        Ok(Some(BasicInfo {
            title: app_data.name.clone().unwrap_or_else(|| "Unknown".to_string()),
            genres: extract_genres(app_data),
            supported_languages: app_data.supported_languages.clone().unwrap_or_default(),
            platforms: extract_platforms(app_data),
            developers: app_data.developers.clone(),
            publishers: app_data.publishers.clone(),
            release_date: extract_release_date(app_data),
            prices,
        }))
    }

    /// Fetches the full game record: appdetails for `regions[0]`, plus the
    /// image scrape, review score, and any remaining regions' prices, all
    /// run concurrently.
    pub async fn fetch_game_info(
        &self,
        app_id: &str,
        regions: &[&RegionConfig],
    ) -> Result<Option<GameInfo>> {
        let first = regions.first().context("at least one region is required")?;
        let url = format!(
            "https://store.steampowered.com/api/appdetails?appids={app_id}&l=english&cc={}",
            first.storefront_cc
        );
        let Some(response) = self.request_with_retry(&url).await? else {
            return Ok(None);
        };
        let body: HashMap<String, AppDetailsEntry> = response
            .json()
            .await
            .context("failed to parse appdetails response")?;
        let Some(entry) = body.get(app_id) else {
            return Ok(None);
        };
        if !entry.success {
            return Ok(None);
        }
        let app_data = entry
            .data
            .as_ref()
            .context("appdetails marked success but carries no data")?;

        let title = app_data.name.clone().unwrap_or_else(|| "Unknown".to_string());
        let genres = extract_genres(app_data);
        let release_date = extract_release_date(app_data);
        let platforms = extract_platforms(app_data);
        let developers = app_data.developers.clone();
        let publishers = app_data.publishers.clone();
        let supported_languages = app_data.supported_languages.clone().unwrap_or_default();
        let header_image = app_data.header_image.clone();

        let image_fut = self.extract_image_url(app_id, header_image);
        let review_fut = self.extract_review_score(app_id);
        let extra_regions = &regions[1.min(regions.len())..];
        let extra_price_futs = extra_regions
            .iter()
            .map(|r| self.fetch_region_price(app_id, r));

        let (image_url, review_score, extra_prices) = tokio::join!(
            image_fut,
            review_fut,
            futures_util::future::join_all(extra_price_futs),
        );

        let mut prices = HashMap::new();
        if let Some(p) = extract_price(app_data, first.currency) {
            prices.insert(first.currency, p);
        }
        for (region, price) in extra_regions.iter().zip(extra_prices) {
            if let Ok(Some(p)) = price {
                prices.insert(region.currency, p);
            }
        }

        Ok(Some(GameInfo {
            title,
            app_id: app_id.to_string(),
            store_url: format!("https://store.steampowered.com/app/{app_id}/"),
            supported_languages,
            genres,
            image_url: image_url.unwrap_or_else(|| "-".to_string()),
            release_date: release_date.unwrap_or_else(|| "-".to_string()),
            platforms,
            developers,
            publishers,
            prices,
            review_score: review_score.unwrap_or_else(|| "-".to_string()),
        }))
    }

    async fn fetch_region_price(&self, app_id: &str, region: &RegionConfig) -> Result<Option<PriceInfo>> {
        let url = format!(
            "https://store.steampowered.com/api/appdetails?appids={app_id}&l=english&cc={}",
            region.storefront_cc
        );
        let Some(response) = self.request_with_retry(&url).await? else {
            return Ok(None);
        };
        let body: HashMap<String, AppDetailsEntry> = response
            .json()
            .await
            .context("failed to parse appdetails response")?;
        let Some(entry) = body.get(app_id) else {
            return Ok(None);
        };
        if !entry.success {
            return Ok(None);
        }
        let app_data = entry.data.as_ref().context("missing data")?;
        Ok(extract_price(app_data, region.currency))
    }

    async fn extract_image_url(&self, app_id: &str, header_image: Option<String>) -> Option<String> {
        let store_url = format!("https://store.steampowered.com/app/{app_id}/");
        let response = match self.request_with_retry(&store_url).await {
            Ok(Some(r)) => r,
            _ => return header_image,
        };
        let html = match response.text().await {
            Ok(h) => h,
            Err(_) => return header_image,
        };

        let pattern = format!(
            r#"https://[^"']*?/apps/{app_id}/[^"']*?capsule_616x353\.jpg[^"']*"#
        );
        let re = Regex::new(&pattern).expect("capsule image pattern is valid");
        if let Some(m) = re.find(&html) {
            return Some(m.as_str().to_string());
        }
        if header_image.is_some() {
            debug!(app_id, "capsule_616x353 not found, using header_image");
        }
        header_image
    }

    async fn extract_review_score(&self, app_id: &str) -> Option<String> {
        let url = format!("https://store.steampowered.com/appreviews/{app_id}?json=1");
        let response = self.request_with_retry(&url).await.ok().flatten()?;
        let body: ReviewsResponse = response.json().await.ok()?;
        body.query_summary.and_then(|q| q.review_score_desc)
    }

    /// The full storefront app catalog (appid, name) used by the title
    /// resolver to score free-form title strings against.
    pub async fn fetch_app_list(&self) -> Result<Vec<crate::resolver::Candidate>> {
        let url = "https://api.steampowered.com/ISteamApps/GetAppList/v2/";
        let response = self
            .request_with_retry(url)
            .await?
            .context("app list request exhausted retries")?;
        let body: AppListResponse = response.json().await.context("failed to parse app list response")?;
        Ok(body
            .applist
            .apps
            .into_iter()
            .map(|a| crate::resolver::Candidate {
                app_id: a.appid.to_string(),
                name: a.name,
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct AppListResponse {
    applist: AppList,
}

#[derive(Deserialize)]
struct AppList {
    apps: Vec<AppListEntry>,
}

#[derive(Deserialize)]
struct AppListEntry {
    appid: u64,
    name: String,
}

fn extract_price(app_data: &AppData, currency: &'static str) -> Option<PriceInfo> {
    if app_data.is_free {
        return Some(PriceInfo {
            currency,
            price: Some(0),
            sale_price: None,
            discount_percent: None,
        });
    }

    let overview = app_data.price_overview.as_ref()?;
    let final_price = overview.final_ as f64 / 100.0;
    let initial_price = overview.initial as f64 / 100.0;

    if final_price == 0.0 {
        return Some(PriceInfo {
            currency,
            price: Some(0),
            sale_price: None,
            discount_percent: None,
        });
    }

    let price = if initial_price > 0.0 {
        initial_price as i64
    } else {
        final_price as i64
    };

    let (sale_price, discount_percent) = if initial_price > final_price && final_price > 0.0 {
        (Some(final_price as i64), Some(overview.discount_percent))
    } else {
        (None, None)
    };

    Some(PriceInfo {
        currency,
        price: Some(price),
        sale_price,
        discount_percent,
    })
}

fn extract_genres(app_data: &AppData) -> Vec<String> {
    let mut genres = Vec::new();
    for g in &app_data.genres {
        if let Some(name) = &g.description {
            if !name.is_empty() && !genres.contains(name) {
                genres.push(name.clone());
            }
        }
    }
    if genres.is_empty() {
        genres.push("Other".to_string());
    }
    genres
}

fn extract_platforms(app_data: &AppData) -> Platforms {
    let p = app_data.platforms.as_ref();
    Platforms {
        windows: p.map(|p| p.windows).unwrap_or(false),
        mac: p.map(|p| p.mac).unwrap_or(false),
        linux: p.map(|p| p.linux).unwrap_or(false),
    }
}

fn extract_release_date(app_data: &AppData) -> Option<String> {
    let date_str = app_data.release_date.as_ref()?.date.as_deref()?;
    if date_str.is_empty() {
        return None;
    }

    if NaiveDate::parse_from_str(date_str, "%Y-%m-%d").is_ok() {
        return Some(date_str.to_string());
    }

    if let Some(d) = parse_japanese_date(date_str) {
        return Some(d);
    }

    const FORMATS: &[&str] = &["%d %b, %Y", "%d %B, %Y", "%b %d, %Y", "%B %d, %Y"];
    for fmt in FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(date_str, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }

    warn!(date_str, "could not parse release date");
    Some(date_str.to_string())
}

fn parse_japanese_date(date_str: &str) -> Option<String> {
    let re = Regex::new(r"^(\d{4})年(\d{1,2})月(\d{1,2})日$").unwrap();
    let caps = re.captures(date_str)?;
    let year = &caps[1];
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    Some(format!("{year}-{month:02}-{day:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_japanese_release_date() {
        assert_eq!(
            parse_japanese_date("2021年7月9日").as_deref(),
            Some("2021-07-09")
        );
    }

    #[test]
    fn extracts_genres_defaults_to_other() {
        let app_data = AppData {
            name: None,
            is_free: false,
            price_overview: None,
            release_date: None,
            platforms: None,
            developers: vec![],
            publishers: vec![],
            genres: vec![],
            supported_languages: None,
            header_image: None,
        };
        assert_eq!(extract_genres(&app_data), vec!["Other".to_string()]);
    }

    #[test]
    fn free_game_price_is_zero() {
        let app_data = AppData {
            name: None,
            is_free: true,
            price_overview: None,
            release_date: None,
            platforms: None,
            developers: vec![],
            publishers: vec![],
            genres: vec![],
            supported_languages: None,
            header_image: None,
        };
        let price = extract_price(&app_data, "JPY").unwrap();
        assert_eq!(price.price, Some(0));
    }
}
