use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};

use crate::db::{DedupLedger, FilterStore, UserDirectory};
use crate::error::Result;
use crate::types::{DedupKey, FilterId, NewWatchFilter, ProcessedListingRecord, UserId, WatchFilter};

/// Process-local store backing all three collections. Nothing survives a
/// restart; used for dry runs and tests.
pub struct MemoryStore {
    /// filter id → filter
    filters: DashMap<FilterId, WatchFilter>,
    next_filter_id: AtomicI64,
    /// registered user ids
    users: DashSet<UserId>,
    /// dedup key → record
    processed: DashMap<DedupKey, ProcessedListingRecord>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            filters: DashMap::new(),
            next_filter_id: AtomicI64::new(1),
            users: DashSet::new(),
            processed: DashMap::new(),
        })
    }

    pub fn add_user(&self, user_id: &str) {
        self.users.insert(user_id.to_string());
    }

    pub fn remove_user(&self, user_id: &str) {
        self.users.remove(user_id);
    }

    pub fn filter(&self, id: FilterId) -> Option<WatchFilter> {
        self.filters.get(&id).map(|f| f.clone())
    }

    pub fn record_count(&self) -> usize {
        self.processed.len()
    }

    pub fn processed_record(&self, key: &DedupKey) -> Option<ProcessedListingRecord> {
        self.processed.get(key).map(|r| r.clone())
    }
}

#[async_trait]
impl FilterStore for MemoryStore {
    async fn list_active_filters(&self) -> Result<Vec<WatchFilter>> {
        let mut active: Vec<WatchFilter> = self
            .filters
            .iter()
            .filter(|f| f.notify_enabled)
            .map(|f| f.value().clone())
            .collect();
        active.sort_by_key(|f| f.id);
        Ok(active)
    }

    async fn clear_first_check(&self, item_id: &str) -> Result<()> {
        for mut f in self.filters.iter_mut() {
            if f.item_id == item_id {
                f.first_check_pending = false;
            }
        }
        Ok(())
    }

    async fn insert_filter(&self, filter: NewWatchFilter) -> Result<FilterId> {
        filter.validate()?;
        let id = self.next_filter_id.fetch_add(1, Ordering::Relaxed);
        self.filters.insert(id, filter.into_filter(id));
        Ok(id)
    }

    async fn set_notify(&self, id: FilterId, enabled: bool) -> Result<bool> {
        Ok(match self.filters.get_mut(&id) {
            Some(mut f) => {
                f.notify_enabled = enabled;
                true
            }
            None => false,
        })
    }

    async fn delete_filter(&self, id: FilterId) -> Result<bool> {
        Ok(self.filters.remove(&id).is_some())
    }

    async fn delete_user_filters(&self, owner_id: &str) -> Result<u64> {
        let before = self.filters.len();
        self.filters.retain(|_, f| f.owner_id != owner_id);
        Ok((before - self.filters.len()) as u64)
    }
}

#[async_trait]
impl DedupLedger for MemoryStore {
    async fn exists(&self, key: &DedupKey) -> Result<bool> {
        Ok(self.processed.contains_key(key))
    }

    async fn notified_users(&self, key: &DedupKey) -> Result<HashSet<UserId>> {
        Ok(self
            .processed
            .get(key)
            .map(|r| r.notified_users.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn record(&self, key: &DedupKey, user_id: &str) -> Result<()> {
        self.processed
            .entry(key.clone())
            .or_insert_with(|| ProcessedListingRecord {
                key: key.clone(),
                notified_users: BTreeSet::new(),
                ends_at: key.ends_at(),
                created_at: Utc::now(),
            })
            .notified_users
            .insert(user_id.to_string());
        Ok(())
    }

    async fn prune_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.processed.len();
        self.processed
            .retain(|_, r| r.ends_at.map_or(true, |ends_at| ends_at >= cutoff));
        Ok((before - self.processed.len()) as u64)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.users.contains(user_id))
    }
}
