pub mod models;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{DedupKey, FilterId, NewWatchFilter, UserId, WatchFilter};

pub use sqlite::SqliteStore;

/// Watch filters, read by the scheduler and written by the add/edit/toggle flows.
#[async_trait]
pub trait FilterStore: Send + Sync {
    /// All filters with notifications enabled, in creation order.
    async fn list_active_filters(&self) -> Result<Vec<WatchFilter>>;

    /// Clear `first_check_pending` on every filter watching `item_id`.
    async fn clear_first_check(&self, item_id: &str) -> Result<()>;

    /// Validate and store a new filter, returning its id.
    async fn insert_filter(&self, filter: NewWatchFilter) -> Result<FilterId>;

    /// Returns false when no such filter exists.
    async fn set_notify(&self, id: FilterId, enabled: bool) -> Result<bool>;

    async fn delete_filter(&self, id: FilterId) -> Result<bool>;

    /// Remove every filter owned by `owner_id`; returns the number removed.
    async fn delete_user_filters(&self, owner_id: &str) -> Result<u64>;
}

/// Record of lots that already produced a notification, keyed by
/// (item, start time, end time) with the set of users told about each.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    async fn exists(&self, key: &DedupKey) -> Result<bool>;

    async fn notified_users(&self, key: &DedupKey) -> Result<HashSet<UserId>>;

    async fn record(&self, key: &DedupKey, user_id: &str) -> Result<()>;

    /// Drop records whose lot ended before `cutoff`; returns the number removed.
    async fn prune_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user_id: &str) -> Result<bool>;
}
