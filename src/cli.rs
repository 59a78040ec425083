//! Command-line surface, built with `clap::Parser` like
//! `recording_inspector`'s CLI in the teacher repo.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "game-catalog-updater")]
#[command(about = "Fetches and merges a video-game catalog from a storefront and a price-history API")]
pub struct Args {
    /// Price-history API key.
    pub api_key: String,

    /// Run append mode (resolve `data/refs/game_title_list.txt` and fetch
    /// any new ids) instead of diff-refresh mode.
    #[arg(long)]
    pub append: bool,

    /// Comma-separated region codes (JPY is always included regardless
    /// of this list).
    #[arg(long, default_value = "JP")]
    pub regions: String,

    /// Force remote KV persistence even outside CI.
    #[arg(long)]
    pub kv: bool,

    /// Testing hook: force every `deal.*.price` to 1.
    #[arg(long)]
    pub reset_prices: bool,

    /// Remove ids listed in `data/refs/delete_appid_list.txt`.
    #[arg(long)]
    pub delete: bool,

    /// Remote KV CLI binary to shell out to.
    #[arg(long, default_value = "wrangler")]
    pub kv_cli: String,

    /// Price-history batch chunk size.
    #[arg(long, default_value_t = catalog_updater::upstream::pricehistory::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Directory the local persistence adapter reads/writes.
    #[arg(long, default_value = "data")]
    pub data_dir: std::path::PathBuf,
}

/// Parses `--regions`, canonicalizing so JP is always present and first
/// (spec.md §3: every record carries a JPY deal).
pub fn parse_regions(raw: &str) -> Vec<&'static catalog_updater::config::RegionConfig> {
    let mut codes: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if !codes.iter().any(|c| c == "JP") {
        codes.insert(0, "JP".to_string());
    } else if codes[0] != "JP" {
        codes.retain(|c| c != "JP");
        codes.insert(0, "JP".to_string());
    }

    codes
        .into_iter()
        .filter_map(|c| catalog_updater::config::region_config(&c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jp_is_always_first_even_when_omitted() {
        let regions = parse_regions("US,UK");
        assert_eq!(regions[0].code, "JP");
        assert_eq!(regions.len(), 3);
    }

    #[test]
    fn jp_is_moved_to_front_when_listed_later() {
        let regions = parse_regions("US,JP");
        assert_eq!(regions[0].code, "JP");
        assert_eq!(regions[1].code, "US");
    }
}
