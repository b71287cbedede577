//! Database row types matching the schema in `migrations/`.
//! Used by sqlx for typed queries.

use crate::error::AppError;
use crate::types::{FilterKind, PercentRange, WatchFilter};

#[derive(Debug, sqlx::FromRow)]
pub struct WatchFilterRow {
    pub id: i64,
    pub owner_id: String,
    pub item_id: String,
    pub name: String,
    pub kind: String,
    pub price_ceiling: f64,
    pub min_quantity: i64,
    pub rarity: Option<i64>,
    pub percent_min: Option<f64>,
    pub percent_max: Option<f64>,
    pub notify_enabled: bool,
    pub first_check_pending: bool,
}

impl TryFrom<WatchFilterRow> for WatchFilter {
    type Error = AppError;

    fn try_from(row: WatchFilterRow) -> Result<Self, Self::Error> {
        let kind = FilterKind::parse(&row.kind).ok_or_else(|| {
            AppError::InvalidFilter(format!("filter {} has unknown kind {:?}", row.id, row.kind))
        })?;
        let percent_range = match (row.percent_min, row.percent_max) {
            (Some(min), Some(max)) => Some(PercentRange { min, max }),
            _ => None,
        };
        Ok(WatchFilter {
            id: row.id,
            owner_id: row.owner_id,
            item_id: row.item_id,
            name: row.name,
            kind,
            price_ceiling: row.price_ceiling,
            min_quantity: u32::try_from(row.min_quantity).unwrap_or(1),
            rarity: row.rarity.and_then(|r| u8::try_from(r).ok()),
            percent_range,
            notify_enabled: row.notify_enabled,
            first_check_pending: row.first_check_pending,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ProcessedListingRow {
    pub item_id: String,
    pub start_time: String,
    pub end_time: String,
    pub user_id: String,
    pub ends_at: Option<i64>,
    pub created_at: i64,
}
