use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::{ProcessedListingRow, WatchFilterRow};
use crate::db::{DedupLedger, FilterStore, UserDirectory};
use crate::error::Result;
use crate::types::{DedupKey, FilterId, NewWatchFilter, UserId, WatchFilter};

const FILTER_COLUMNS: &str = "id, owner_id, item_id, name, kind, price_ceiling, min_quantity, \
     rarity, percent_min, percent_max, notify_enabled, first_check_pending";

/// SQLite-backed implementation of the filter, dedup and user collections.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `db_path` and apply migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {db_path}");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn add_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?, ?)")
            .bind(user_id)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a user together with everything they track.
    pub async fn remove_user(&self, user_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM watch_filters WHERE owner_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_filter(&self, id: FilterId) -> Result<Option<WatchFilter>> {
        let row: Option<WatchFilterRow> =
            sqlx::query_as(&format!("SELECT {FILTER_COLUMNS} FROM watch_filters WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(WatchFilter::try_from).transpose()
    }

    /// (active filter count, distinct watched item ids)
    pub async fn active_summary(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT item_id) FROM watch_filters WHERE notify_enabled = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl FilterStore for SqliteStore {
    async fn list_active_filters(&self) -> Result<Vec<WatchFilter>> {
        let rows: Vec<WatchFilterRow> = sqlx::query_as(&format!(
            "SELECT {FILTER_COLUMNS} FROM watch_filters WHERE notify_enabled = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(WatchFilter::try_from).collect()
    }

    async fn clear_first_check(&self, item_id: &str) -> Result<()> {
        sqlx::query("UPDATE watch_filters SET first_check_pending = 0 WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_filter(&self, filter: NewWatchFilter) -> Result<FilterId> {
        filter.validate()?;
        let result = sqlx::query(
            r#"
            INSERT INTO watch_filters (
                owner_id, item_id, name, kind, price_ceiling, min_quantity,
                rarity, percent_min, percent_max, notify_enabled, first_check_pending, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 1, ?)
            "#,
        )
        .bind(&filter.owner_id)
        .bind(&filter.item_id)
        .bind(&filter.name)
        .bind(filter.kind.as_str())
        .bind(filter.price_ceiling)
        .bind(i64::from(filter.min_quantity))
        .bind(filter.rarity.map(i64::from))
        .bind(filter.percent_range.map(|r| r.min))
        .bind(filter.percent_range.map(|r| r.max))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn set_notify(&self, id: FilterId, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE watch_filters SET notify_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_filter(&self, id: FilterId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM watch_filters WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_filters(&self, owner_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM watch_filters WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DedupLedger for SqliteStore {
    async fn exists(&self, key: &DedupKey) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM processed_listings WHERE item_id = ? AND start_time = ? AND end_time = ? LIMIT 1",
        )
        .bind(&key.item_id)
        .bind(key.start_time.as_deref().unwrap_or(""))
        .bind(&key.end_time)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn notified_users(&self, key: &DedupKey) -> Result<HashSet<UserId>> {
        let rows: Vec<ProcessedListingRow> = sqlx::query_as(
            r#"
            SELECT item_id, start_time, end_time, user_id, ends_at, created_at
            FROM processed_listings
            WHERE item_id = ? AND start_time = ? AND end_time = ?
            "#,
        )
        .bind(&key.item_id)
        .bind(key.start_time.as_deref().unwrap_or(""))
        .bind(&key.end_time)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.user_id).collect())
    }

    async fn record(&self, key: &DedupKey, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO processed_listings
                (item_id, start_time, end_time, user_id, ends_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.item_id)
        .bind(key.start_time.as_deref().unwrap_or(""))
        .bind(&key.end_time)
        .bind(user_id)
        .bind(key.ends_at().map(|t| t.timestamp()))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_listings WHERE ends_at IS NOT NULL AND ends_at < ?")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn exists(&self, user_id: &str) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE user_id = ? LIMIT 1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}
