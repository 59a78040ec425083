//! Persisted data model: id-map entries, game records, deal quotes, and the
//! catalog envelope written to the `games-data` key.
//!
//! Grounded in `spec.md` §3 and the Python predecessor's `games.json` /
//! `id-map.json` shapes (`original_source/updater/kv_helper.py`,
//! `game_data_builder.py`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Either a concrete integer amount or the `"-"` sentinel used throughout
/// the persisted schema for "not available".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaybeAmount {
    Value(i64),
    Unavailable,
}

impl MaybeAmount {
    pub fn value(self) -> Option<i64> {
        match self {
            MaybeAmount::Value(v) => Some(v),
            MaybeAmount::Unavailable => None,
        }
    }

    pub fn is_unavailable(self) -> bool {
        matches!(self, MaybeAmount::Unavailable)
    }
}

impl Serialize for MaybeAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            MaybeAmount::Value(v) => serializer.serialize_i64(*v),
            MaybeAmount::Unavailable => serializer.serialize_str("-"),
        }
    }
}

impl<'de> Deserialize<'de> for MaybeAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(MaybeAmount::Value(v)),
            Raw::Text(_) => Ok(MaybeAmount::Unavailable),
        }
    }
}

/// A price quote for one currency at one instant.
///
/// Invariants (spec.md §3): `cut ∈ [0,100]`, `cut == 0` iff `price ==
/// regular`, and `noItadData == true` implies `storeLow == "-"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DealQuote {
    pub price: MaybeAmount,
    pub regular: MaybeAmount,
    pub cut: u8,
    #[serde(rename = "storeLow")]
    pub store_low: MaybeAmount,
    #[serde(rename = "noItadData", skip_serializing_if = "std::ops::Not::not", default)]
    pub no_itad_data: bool,
}

impl DealQuote {
    /// Builds a quote straight from storefront price + regular (no
    /// price-history data available). `cut` is always the derived value,
    /// never the storefront's own `discount_percent`, so the invariant
    /// `cut == 0 iff price == regular` can never be violated by an upstream
    /// rounding quirk (see SPEC_FULL.md Open Questions #5).
    pub fn from_storefront(price: i64, regular: i64) -> Self {
        let cut = derive_cut(price, regular);
        DealQuote {
            price: MaybeAmount::Value(price),
            regular: MaybeAmount::Value(regular),
            cut,
            store_low: MaybeAmount::Unavailable,
            no_itad_data: true,
        }
    }

    /// Builds a quote from a price-history batch deal, with the storefront's
    /// store-low amount folded in.
    pub fn from_pricehistory(price: i64, regular: i64, cut: u8, store_low: Option<i64>) -> Self {
        DealQuote {
            price: MaybeAmount::Value(price),
            regular: MaybeAmount::Value(regular),
            cut,
            store_low: store_low.map(MaybeAmount::Value).unwrap_or(MaybeAmount::Unavailable),
            no_itad_data: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cut > 100 {
            return Err(format!("cut {} out of range", self.cut));
        }
        if let (MaybeAmount::Value(p), MaybeAmount::Value(r)) = (self.price, self.regular) {
            let cut_is_zero = self.cut == 0;
            let prices_equal = p == r;
            if cut_is_zero != prices_equal {
                return Err(format!(
                    "cut={} but price={} regular={}",
                    self.cut, p, r
                ));
            }
        }
        if self.no_itad_data && !self.store_low.is_unavailable() {
            return Err("noItadData true but storeLow present".to_string());
        }
        Ok(())
    }
}

/// `round((regular-price)/regular * 100)`, clamped to `[0,100]`.
pub fn derive_cut(price: i64, regular: i64) -> u8 {
    if regular <= 0 || price >= regular {
        return 0;
    }
    let pct = ((regular - price) as f64 / regular as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platforms {
    pub windows: bool,
    pub mac: bool,
    pub linux: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameRecord {
    pub id: String,
    #[serde(rename = "itadId", skip_serializing_if = "Option::is_none")]
    pub itad_id: Option<String>,
    pub title: String,
    #[serde(rename = "storeUrl")]
    pub store_url: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    #[serde(rename = "releaseDate")]
    pub release_date: String,
    #[serde(rename = "reviewScore")]
    pub review_score: String,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub platforms: Platforms,
    #[serde(rename = "supportedLanguages")]
    pub supported_languages: String,
    /// Keyed by currency code; `BTreeMap` keeps serialized output stable.
    pub deal: BTreeMap<String, DealQuote>,
}

impl GameRecord {
    pub fn validate(&self) -> Result<(), String> {
        if self.tags.len() > 3 {
            return Err(format!("{} has {} tags (max 3)", self.id, self.tags.len()));
        }
        if !self.deal.contains_key("JPY") {
            return Err(format!("{} is missing the JPY deal", self.id));
        }
        for (currency, deal) in &self.deal {
            deal.validate()
                .map_err(|e| format!("{} [{}]: {}", self.id, currency, e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdMapEntry {
    pub id: String,
    #[serde(rename = "itadId", skip_serializing_if = "Option::is_none")]
    pub itad_id: Option<String>,
}

pub type IdMap = Vec<IdMapEntry>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSource {
    pub storefront: String,
    pub pricehistory: String,
}

impl Default for CatalogSource {
    fn default() -> Self {
        CatalogSource {
            storefront: "storefront".to_string(),
            pricehistory: "pricehistory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMeta {
    pub last_updated: DateTime<Utc>,
    pub data_version: u32,
    pub source: CatalogSource,
    pub build_id: Uuid,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEnvelope {
    pub meta: CatalogMeta,
    pub games: Vec<GameRecord>,
}

impl CatalogEnvelope {
    pub fn new(games: Vec<GameRecord>, last_updated: DateTime<Utc>) -> Self {
        let record_count = games.len();
        CatalogEnvelope {
            meta: CatalogMeta {
                last_updated,
                data_version: 1,
                source: CatalogSource::default(),
                build_id: Uuid::new_v4(),
                record_count,
            },
            games,
        }
    }
}

/// Tolerant deserialization: accepts either the full envelope or a bare
/// `games` array, matching both the current and legacy persisted layouts.
#[derive(Debug, Clone)]
pub struct CatalogRead {
    pub meta: Option<CatalogMeta>,
    pub games: Vec<GameRecord>,
}

impl<'de> Deserialize<'de> for CatalogRead {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Envelope(CatalogEnvelope),
            Bare(Vec<GameRecord>),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Envelope(e) => Ok(CatalogRead {
                meta: Some(e.meta),
                games: e.games,
            }),
            Raw::Bare(games) => Ok(CatalogRead { meta: None, games }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_cut_matches_invariant() {
        assert_eq!(derive_cut(1000, 1000), 0);
        assert_eq!(derive_cut(700, 1000), 30);
        assert_eq!(derive_cut(0, 1000), 100);
    }

    #[test]
    fn deal_quote_rejects_inconsistent_cut() {
        let bad = DealQuote {
            price: MaybeAmount::Value(700),
            regular: MaybeAmount::Value(1000),
            cut: 0,
            store_low: MaybeAmount::Unavailable,
            no_itad_data: false,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn no_itad_data_requires_unavailable_store_low() {
        let bad = DealQuote {
            price: MaybeAmount::Value(700),
            regular: MaybeAmount::Value(1000),
            cut: 30,
            store_low: MaybeAmount::Value(500),
            no_itad_data: true,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn catalog_read_accepts_bare_list() {
        let json = r#"[]"#;
        let parsed: CatalogRead = serde_json::from_str(json).unwrap();
        assert!(parsed.meta.is_none());
        assert!(parsed.games.is_empty());
    }
}
