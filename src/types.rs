use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::matcher::quality::{percent_band, rarity_for_percent_range, MAX_RARITY};

/// Opaque identifier of the user owning a filter (a Telegram chat id in practice).
pub type UserId = String;

pub type FilterId = i64;

// ---------------------------------------------------------------------------
// Watch filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Item,
    Artifact,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Item => "item",
            FilterKind::Artifact => "artifact",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "item" => Some(FilterKind::Item),
            "artifact" => Some(FilterKind::Artifact),
            _ => None,
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inclusive bounds on the computed artifact quality percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentRange {
    pub min: f64,
    pub max: f64,
}

impl PercentRange {
    pub fn contains(&self, percent: f64) -> bool {
        self.min <= percent && percent <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchFilter {
    pub id: FilterId,
    pub owner_id: UserId,
    pub item_id: String,
    pub name: String,
    pub kind: FilterKind,
    /// Per-unit ceiling for items, total ceiling for artifacts.
    pub price_ceiling: f64,
    pub min_quantity: u32,
    pub rarity: Option<u8>,
    pub percent_range: Option<PercentRange>,
    pub notify_enabled: bool,
    pub first_check_pending: bool,
}

/// Filter as submitted by the add flow, before the store assigns an id.
/// New filters always start with notifications on and the first check pending.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWatchFilter {
    pub owner_id: UserId,
    pub item_id: String,
    pub name: String,
    pub kind: FilterKind,
    pub price_ceiling: f64,
    pub min_quantity: u32,
    pub rarity: Option<u8>,
    pub percent_range: Option<PercentRange>,
}

impl NewWatchFilter {
    pub fn item(owner_id: &str, item_id: &str, name: &str, price_ceiling: f64, min_quantity: u32) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            item_id: item_id.to_string(),
            name: name.to_string(),
            kind: FilterKind::Item,
            price_ceiling,
            min_quantity,
            rarity: None,
            percent_range: None,
        }
    }

    pub fn artifact(
        owner_id: &str,
        item_id: &str,
        name: &str,
        price_ceiling: f64,
        rarity: u8,
        percent_range: Option<PercentRange>,
    ) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            item_id: item_id.to_string(),
            name: name.to_string(),
            kind: FilterKind::Artifact,
            price_ceiling,
            min_quantity: 1,
            rarity: Some(rarity),
            percent_range,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.item_id.trim().is_empty() {
            return Err(AppError::InvalidFilter("item id is empty".to_string()));
        }
        if !(self.price_ceiling > 0.0) {
            return Err(AppError::InvalidFilter(format!(
                "price ceiling must be positive, got {}",
                self.price_ceiling
            )));
        }
        if self.min_quantity < 1 {
            return Err(AppError::InvalidFilter("minimum quantity must be at least 1".to_string()));
        }

        match self.kind {
            FilterKind::Item => {
                if self.rarity.is_some() || self.percent_range.is_some() {
                    return Err(AppError::InvalidFilter(
                        "rarity and percent range apply to artifacts only".to_string(),
                    ));
                }
            }
            FilterKind::Artifact => {
                let rarity = self.rarity.ok_or_else(|| {
                    AppError::InvalidFilter("artifact filter needs a rarity".to_string())
                })?;
                if rarity > MAX_RARITY {
                    return Err(AppError::InvalidFilter(format!("rarity {rarity} is out of range 0-{MAX_RARITY}")));
                }
                if let Some(range) = self.percent_range {
                    // percent_band is total over 0..=MAX_RARITY
                    let (lo, hi) = percent_band(rarity).unwrap_or((0.0, 100.0));
                    if range.min > range.max || range.min < lo || range.max > hi {
                        return Err(AppError::InvalidFilter(format!(
                            "percent range {}-{} outside {lo}-{hi} for rarity {rarity}",
                            range.min, range.max
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace an artifact filter's percent range. The rarity follows the
    /// range: it becomes the tier whose band contains it.
    pub fn with_percent_range(mut self, range: PercentRange) -> Result<Self> {
        if self.kind != FilterKind::Artifact {
            return Err(AppError::InvalidFilter(
                "rarity and percent range apply to artifacts only".to_string(),
            ));
        }
        let rarity = rarity_for_percent_range(range.min, range.max).ok_or_else(|| {
            AppError::InvalidFilter(format!(
                "percent range {}-{} does not fit a single rarity band",
                range.min, range.max
            ))
        })?;
        self.rarity = Some(rarity);
        self.percent_range = Some(range);
        Ok(self)
    }

    pub fn into_filter(self, id: FilterId) -> WatchFilter {
        WatchFilter {
            id,
            owner_id: self.owner_id,
            item_id: self.item_id,
            name: self.name,
            kind: self.kind,
            price_ceiling: self.price_ceiling,
            min_quantity: self.min_quantity,
            rarity: self.rarity,
            percent_range: self.percent_range,
            notify_enabled: true,
            first_check_pending: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Listings (auction lots)
// ---------------------------------------------------------------------------

/// Artifact attributes carried in a lot's `additional` object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LotAdditional {
    /// Quality tier.
    #[serde(default, rename = "qlt", alias = "quality")]
    pub quality: Option<i64>,
    /// Raw quality roll the percentage is derived from.
    #[serde(default, rename = "stats_random", alias = "qualityRandom")]
    pub quality_random: Option<f64>,
}

/// Wire shape of a lot. Everything is optional so a single bad lot cannot
/// fail the whole response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLot {
    item_id: Option<String>,
    amount: Option<u32>,
    start_price: Option<f64>,
    buyout_price: Option<f64>,
    current_price: Option<f64>,
    start_time: Option<String>,
    end_time: Option<String>,
    additional: Option<LotAdditional>,
}

/// Why a lot was skipped before matching.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedListing {
    Undecodable(String),
    MissingField(&'static str),
    ZeroAmount,
    BadEndTime(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub item_id: String,
    pub amount: u32,
    pub start_price: f64,
    pub buyout_price: Option<f64>,
    pub current_price: Option<f64>,
    pub start_time: Option<String>,
    /// End time exactly as sent upstream; part of the dedup key.
    pub end_time: String,
    pub ends_at: DateTime<Utc>,
    pub additional: LotAdditional,
}

impl Listing {
    pub fn from_value(v: &serde_json::Value) -> std::result::Result<Self, MalformedListing> {
        let raw: RawLot = serde_json::from_value(v.clone())
            .map_err(|e| MalformedListing::Undecodable(e.to_string()))?;

        let item_id = raw.item_id.ok_or(MalformedListing::MissingField("itemId"))?;
        let amount = raw.amount.ok_or(MalformedListing::MissingField("amount"))?;
        let start_price = raw.start_price.ok_or(MalformedListing::MissingField("startPrice"))?;
        let end_time = raw.end_time.ok_or(MalformedListing::MissingField("endTime"))?;
        if amount == 0 {
            return Err(MalformedListing::ZeroAmount);
        }
        let ends_at = parse_timestamp(&end_time).ok_or_else(|| MalformedListing::BadEndTime(end_time.clone()))?;

        Ok(Self {
            item_id,
            amount,
            start_price,
            buyout_price: raw.buyout_price,
            current_price: raw.current_price,
            start_time: raw.start_time,
            end_time,
            ends_at,
            additional: raw.additional.unwrap_or_default(),
        })
    }

    /// Fractional minutes until the lot ends; negative once it has ended.
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> f64 {
        (self.ends_at - now).num_milliseconds() as f64 / 60_000.0
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            item_id: self.item_id.clone(),
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
        }
    }
}

/// Parse an ISO-8601 UTC timestamp. Offsets are honoured; a bare timestamp is
/// taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Price selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    Buyout,
    Bid,
}

impl std::fmt::Display for PriceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriceType::Buyout => "Buyout",
            PriceType::Bid => "Bid",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBasis {
    pub price_type: PriceType,
    pub total_price: f64,
    pub price_per_unit: f64,
}

// ---------------------------------------------------------------------------
// Dedup ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    pub item_id: String,
    pub start_time: Option<String>,
    pub end_time: String,
}

impl DedupKey {
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedListingRecord {
    pub key: DedupKey,
    pub notified_users: BTreeSet<UserId>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Match results
// ---------------------------------------------------------------------------

/// A listing that satisfied a filter and should be announced to its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct LotMatch {
    pub filter: WatchFilter,
    pub listing: Listing,
    pub basis: PriceBasis,
    pub remaining_minutes: f64,
    pub percent: Option<f64>,
}

impl LotMatch {
    pub fn dedup_key(&self) -> DedupKey {
        self.listing.dedup_key()
    }
}
