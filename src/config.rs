//! Immutable runtime configuration.
//!
//! Replaces the scattered module-level constants of the Python predecessor
//! with a single struct assembled once in `main` and threaded through every
//! component (REDESIGN FLAGS: "global mutable constants become an immutable
//! configuration struct constructed at startup").

use std::collections::HashMap;
use std::time::Duration;

/// One upstream region: storefront country code, price-history country code,
/// and the currency the deal quotes for that region are denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionConfig {
    pub code: &'static str,
    pub storefront_cc: &'static str,
    pub pricehistory_country: &'static str,
    pub currency: &'static str,
}

pub const REGIONS: &[RegionConfig] = &[
    RegionConfig {
        code: "JP",
        storefront_cc: "jp",
        pricehistory_country: "JP",
        currency: "JPY",
    },
    RegionConfig {
        code: "US",
        storefront_cc: "us",
        pricehistory_country: "US",
        currency: "USD",
    },
    RegionConfig {
        code: "UK",
        storefront_cc: "uk",
        pricehistory_country: "GB",
        currency: "GBP",
    },
    RegionConfig {
        code: "EU",
        storefront_cc: "de",
        pricehistory_country: "DE",
        currency: "EUR",
    },
];

pub fn region_config(code: &str) -> Option<&'static RegionConfig> {
    REGIONS.iter().find(|r| r.code.eq_ignore_ascii_case(code))
}

pub const DEFAULT_REGIONS: &[&str] = &["JP", "US"];

/// Title filtering: a candidate name containing one of these (case
/// insensitive) is excluded from the resolver's match set unless it also
/// contains a `KEEP_EDITIONS` token.
pub const EXCLUDE_KEYWORDS: &[&str] = &[
    "Soundtrack",
    "OST",
    "Original Soundtrack",
    "Music",
    "Demo",
    "Playtest",
    "Beta",
    "Test",
    "DLC",
    "Expansion",
    "Season Pass",
    "Content Pack",
    "Artbook",
    "Digital Art",
    "Art Book",
    "Soundtrack Edition",
    "Deluxe Edition",
    "Ultimate Edition",
    "Prologue",
    "Epilogue",
    "Prequel",
];

pub const KEEP_EDITIONS: &[&str] = &[
    "Complete Edition",
    "Definitive Edition",
    "GOTY",
    "Game of the Year",
    "Remastered",
    "Enhanced Edition",
    "Director's Cut",
    "Special Edition",
];

pub const SCORE_EXACT_MATCH: i32 = 100;
pub const SCORE_PARTIAL_MATCH_BASE: i32 = 90;
pub const SCORE_SIMILARITY_MULTIPLIER: i32 = 80;
pub const SCORE_AUTO_ACCEPT_THRESHOLD: i32 = 80;
pub const SCORE_CANDIDATE_THRESHOLD: i32 = 60;

/// The storefront's internal shop id in the price-history API's deal list.
pub const STOREFRONT_SHOP_ID: u64 = 61;

pub const USER_AGENT_STOREFRONT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
pub const USER_AGENT_PRICEHISTORY: &str = "catalog-updater/1.0";

pub const CHECKPOINT_INTERVAL: usize = 1000;
pub const BATCH_THRESHOLD: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct RateControllerDefaults {
    pub target_rps: f64,
    pub window: Duration,
    pub window_limit: u32,
    pub initial_concurrency: u32,
    pub warmup_requests: u32,
    pub ewma_alpha: f64,
}

pub const STOREFRONT_RATE_DEFAULTS: RateControllerDefaults = RateControllerDefaults {
    target_rps: 0.67,
    window: Duration::from_secs(300),
    window_limit: 200,
    initial_concurrency: 5,
    warmup_requests: 20,
    ewma_alpha: 0.2,
};

pub const PRICEHISTORY_RATE_DEFAULTS: RateControllerDefaults = RateControllerDefaults {
    target_rps: 1.0,
    window: Duration::from_secs(60),
    window_limit: 100,
    initial_concurrency: 5,
    warmup_requests: 20,
    ewma_alpha: 0.2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub regions: Vec<&'static RegionConfig>,
    pub persistence_mode: PersistenceMode,
    pub kv_cli: String,
    pub chunk_size: usize,
    pub data_dir: std::path::PathBuf,
}

impl Config {
    pub fn regions_by_currency(&self) -> HashMap<&'static str, &'static RegionConfig> {
        self.regions.iter().map(|r| (r.currency, *r)).collect()
    }

    pub fn primary_region(&self) -> &'static RegionConfig {
        self.regions.first().copied().unwrap_or(&REGIONS[0])
    }

    pub fn title_list_path(&self) -> std::path::PathBuf {
        self.data_dir.join("refs").join("game_title_list.txt")
    }

    pub fn delete_list_path(&self) -> std::path::PathBuf {
        self.data_dir.join("refs").join("delete_appid_list.txt")
    }

    pub fn mapping_result_path(&self) -> std::path::PathBuf {
        self.data_dir.join("batch").join("mapping_result.txt")
    }

    pub fn checkpoint_dir(&self) -> std::path::PathBuf {
        self.data_dir.join("batch").join("checkpoints")
    }

    pub fn batch_lock_path(&self) -> std::path::PathBuf {
        self.data_dir.join("batch").join("batch_in_progress.lock")
    }

    pub fn batch_log_dir(&self) -> std::path::PathBuf {
        self.data_dir.join("batch").join("logs")
    }

    pub fn tmp_dir(&self) -> std::path::PathBuf {
        self.data_dir.join("tmp")
    }

    /// Staging file for whatever rebuilt records existed at the moment a
    /// run aborted. Left on disk (not cleaned up) so a failed run can be
    /// inspected; removed at the start of the next successful run.
    pub fn rebuilt_temp_path(&self) -> std::path::PathBuf {
        self.tmp_dir().join("games_rebuilt.json")
    }
}
