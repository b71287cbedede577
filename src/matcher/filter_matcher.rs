use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::config::BUYOUT_WINDOW_MINUTES;
use crate::db::DedupLedger;
use crate::error::Result;
use crate::matcher::quality::quality_percent;
use crate::types::{FilterKind, Listing, LotMatch, PriceBasis, PriceType, UserId, WatchFilter};

/// Why a filter did not accept a listing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    PriceAboveCeiling,
    BelowMinQuantity,
    RarityMismatch,
    PercentUnavailable,
    PercentOutOfRange,
}

/// Pick the price a listing is judged on. Far from expiry a positive buyout is
/// the actionable price; near expiry the live bid (or the opening price) is.
pub fn select_price(listing: &Listing, remaining_minutes: f64, buyout_window_minutes: f64) -> PriceBasis {
    let buyout = listing.buyout_price.filter(|p| *p > 0.0);
    let (price_type, total_price) = match buyout {
        Some(buyout) if remaining_minutes > buyout_window_minutes => (PriceType::Buyout, buyout),
        _ => {
            let bid = listing
                .current_price
                .filter(|p| *p > 0.0)
                .unwrap_or(listing.start_price);
            (PriceType::Bid, bid)
        }
    };
    PriceBasis {
        price_type,
        total_price,
        price_per_unit: total_price / f64::from(listing.amount),
    }
}

/// Evaluate one filter against one listing. On acceptance returns the
/// computed quality percentage, if any.
pub fn evaluate(
    filter: &WatchFilter,
    listing: &Listing,
    basis: &PriceBasis,
) -> std::result::Result<Option<f64>, Rejection> {
    match filter.kind {
        FilterKind::Item => {
            if basis.price_per_unit > filter.price_ceiling {
                return Err(Rejection::PriceAboveCeiling);
            }
            if listing.amount < filter.min_quantity {
                return Err(Rejection::BelowMinQuantity);
            }
            Ok(None)
        }
        FilterKind::Artifact => {
            let quality = listing.additional.quality.unwrap_or(0);
            if Some(quality) != filter.rarity.map(i64::from) {
                return Err(Rejection::RarityMismatch);
            }
            let percent = quality_percent(quality, listing.additional.quality_random);
            if let Some(range) = filter.percent_range {
                let p = percent.ok_or(Rejection::PercentUnavailable)?;
                if !range.contains(p) {
                    return Err(Rejection::PercentOutOfRange);
                }
            }
            // Artifacts trade one at a time, so the ceiling applies to the total.
            if basis.total_price > filter.price_ceiling {
                return Err(Rejection::PriceAboveCeiling);
            }
            Ok(percent)
        }
    }
}

/// Turns a fetched batch of lots into the alerts owed to the batch's filters.
pub struct FilterMatcher {
    ledger: Arc<dyn DedupLedger>,
    buyout_window_minutes: f64,
}

impl FilterMatcher {
    pub fn new(ledger: Arc<dyn DedupLedger>) -> Self {
        Self {
            ledger,
            buyout_window_minutes: BUYOUT_WINDOW_MINUTES,
        }
    }

    /// Match raw lots against `filters` as of `now`. Each user appears at most
    /// once per listing; users already recorded in the ledger for a listing
    /// are skipped.
    pub async fn find_matches(
        &self,
        lots: &[serde_json::Value],
        filters: &[WatchFilter],
        now: DateTime<Utc>,
    ) -> Result<Vec<LotMatch>> {
        let mut matches = Vec::new();

        for raw in lots {
            let listing = match Listing::from_value(raw) {
                Ok(l) => l,
                Err(reason) => {
                    trace!(?reason, "Skipping malformed lot");
                    continue;
                }
            };

            let remaining_minutes = listing.remaining_minutes(now);
            if remaining_minutes <= 0.0 {
                continue;
            }

            let watching: Vec<&WatchFilter> = filters
                .iter()
                .filter(|f| f.item_id == listing.item_id)
                .collect();
            if watching.is_empty() {
                continue;
            }

            let key = listing.dedup_key();
            let mut notified: HashSet<UserId> = if self.ledger.exists(&key).await? {
                self.ledger.notified_users(&key).await?
            } else {
                HashSet::new()
            };
            if watching.iter().all(|f| notified.contains(&f.owner_id)) {
                continue;
            }

            let basis = select_price(&listing, remaining_minutes, self.buyout_window_minutes);

            for filter in watching {
                if notified.contains(&filter.owner_id) {
                    continue;
                }
                match evaluate(filter, &listing, &basis) {
                    Ok(percent) => {
                        notified.insert(filter.owner_id.clone());
                        matches.push(LotMatch {
                            filter: filter.clone(),
                            listing: listing.clone(),
                            basis,
                            remaining_minutes,
                            percent,
                        });
                    }
                    Err(rejection) => {
                        trace!(filter_id = filter.id, ?rejection, "Lot rejected");
                    }
                }
            }
        }

        Ok(matches)
    }
}
