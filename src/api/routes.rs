use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::auth::TokenManager;
use crate::db::SqliteStore;
use crate::error::AppError;

#[derive(Clone)]
pub struct ApiState {
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub tokens: Arc<TokenManager>,
    pub store: SqliteStore,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/summary", get(get_stats_summary))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_cycle_at_ms: Option<u64>,
    pub cycles_completed: u64,
    pub lots_fetched: u64,
    pub fetch_failures: u64,
    pub notifications_sent: u64,
    pub delivery_failures: u64,
    pub token_fresh: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SummaryResponse {
    pub active_filters: i64,
    pub watched_items: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let h = &state.health;
    let last = h.last_cycle_at_ms();
    Json(HealthResponse {
        status: if last == 0 { "starting" } else { "ok" },
        last_cycle_at_ms: (last != 0).then_some(last),
        cycles_completed: h.cycles_completed(),
        lots_fetched: h.lots_fetched(),
        fetch_failures: h.fetch_failures(),
        notifications_sent: h.notifications_sent(),
        delivery_failures: h.delivery_failures(),
        token_fresh: state.tokens.has_fresh_token().await,
    })
}

async fn get_stats_summary(State(state): State<ApiState>) -> Result<Json<SummaryResponse>, AppError> {
    let (active_filters, watched_items) = state.store.active_summary().await?;
    Ok(Json(SummaryResponse {
        active_filters,
        watched_items,
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_us, p95_us, p99_us) = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_us,
        p95_us,
        p99_us,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenExchange;
    use crate::db::{FilterStore, SqliteStore};
    use crate::error::Result;
    use crate::types::NewWatchFilter;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    struct StaticExchange;

    #[async_trait]
    impl TokenExchange for StaticExchange {
        async fn exchange(&self) -> Result<String> {
            Ok("static".to_string())
        }
    }

    async fn state() -> ApiState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        ApiState {
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            tokens: Arc::new(TokenManager::new(Arc::new(StaticExchange))),
            store: SqliteStore::new(pool),
        }
    }

    #[tokio::test]
    async fn health_reports_starting_until_first_cycle() {
        let state = state().await;
        let Json(before) = get_health(State(state.clone())).await;
        assert_eq!(before.status, "starting");
        assert_eq!(before.last_cycle_at_ms, None);
        assert!(!before.token_fresh);

        state.health.finish_cycle(1_700_000_000_000);
        state.tokens.get_token().await.unwrap();
        let Json(after) = get_health(State(state)).await;
        assert_eq!(after.status, "ok");
        assert_eq!(after.cycles_completed, 1);
        assert!(after.token_fresh);
    }

    #[tokio::test]
    async fn summary_counts_enabled_filters_and_items() {
        let state = state().await;
        for (owner, item) in [("1", "bread"), ("2", "bread"), ("1", "crystal")] {
            state
                .store
                .insert_filter(NewWatchFilter::item(owner, item, item, 10.0, 1))
                .await
                .unwrap();
        }
        let Json(summary) = get_stats_summary(State(state)).await.unwrap();
        assert_eq!(
            summary,
            SummaryResponse {
                active_filters: 3,
                watched_items: 2
            }
        );
    }

    #[tokio::test]
    async fn latency_reflects_recorded_fetches() {
        let state = state().await;
        let Json(empty) = get_stats_latency(State(state.clone())).await;
        assert_eq!(empty.samples, 0);
        assert_eq!(empty.p50_us, None);

        state.latency.record(Duration::from_millis(40));
        let Json(one) = get_stats_latency(State(state)).await;
        assert_eq!(one.samples, 1);
        assert!(one.p99_us.is_some());
    }
}
