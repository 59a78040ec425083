//! Builds a [`GameRecord`] from a storefront fetch plus whatever
//! price-history deal data is already on hand, synthesizing a
//! `noItadData` quote per currency when price-history has nothing for it.
//!
//! Grounded on `game_data_builder.py`'s `_fetch_single_game_data` /
//! `_build_game_from_cached_basic`, generalized to spec.md's multi-
//! currency `deal` map.

use std::collections::{BTreeMap, HashMap};

use crate::config::RegionConfig;
use crate::models::{derive_cut, DealQuote, GameRecord};
use crate::upstream::pricehistory::PriceHistoryDeal;
use crate::upstream::storefront::GameInfo;

/// Builds the full record for `app_id`. `deals` holds, per currency, the
/// price-history deal already fetched for this id (absent entries fall
/// back to a storefront-only quote).
///
/// The persisted `cut` is always `derive_cut(price, regular)`, never the
/// upstream's own reported discount percent — this extends the
/// storefront-vs-`discount_percent` reconciliation in SPEC_FULL.md's Open
/// Questions to price-history's `cut` field too, so the
/// `cut == 0 iff price == regular` invariant can never be broken by an
/// upstream rounding disagreement (see DESIGN.md).
pub fn build_record(
    app_id: &str,
    itad_id: Option<String>,
    info: &GameInfo,
    deals: &HashMap<&'static str, PriceHistoryDeal>,
    tags: Vec<String>,
    regions: &[&'static RegionConfig],
) -> GameRecord {
    let mut deal_map = BTreeMap::new();

    for region in regions {
        let currency = region.currency;
        let quote = match deals.get(currency) {
            Some(d) if d.price.is_some() && d.regular.is_some() => {
                let price = d.price.unwrap();
                let regular = d.regular.unwrap();
                let cut = derive_cut(price, regular);
                if let Some(reported) = d.cut {
                    if reported.abs_diff(cut) > 1 {
                        tracing::warn!(
                            app_id,
                            currency,
                            reported,
                            derived = cut,
                            "price-history cut disagrees with derived value"
                        );
                    }
                }
                DealQuote::from_pricehistory(price, regular, cut, d.store_low)
            }
            _ => synthesize_from_storefront(info, currency),
        };
        deal_map.insert(currency.to_string(), quote);
    }

    GameRecord {
        id: app_id.to_string(),
        itad_id,
        title: info.title.clone(),
        store_url: info.store_url.clone(),
        image_url: info.image_url.clone(),
        release_date: info.release_date.clone(),
        review_score: info.review_score.clone(),
        genres: info.genres.clone(),
        tags,
        developers: info.developers.clone(),
        publishers: info.publishers.clone(),
        platforms: info.platforms.clone(),
        supported_languages: info.supported_languages.clone(),
        deal: deal_map,
    }
}

fn synthesize_from_storefront(info: &GameInfo, currency: &'static str) -> DealQuote {
    let price_info = info.prices.get(currency);
    let regular = price_info.and_then(|p| p.price).unwrap_or(0);
    let current = price_info.and_then(|p| p.sale_price).unwrap_or(regular);
    DealQuote::from_storefront(current, regular)
}
