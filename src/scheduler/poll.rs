use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::auth::TokenManager;
use crate::config::{
    Config, CYCLE_PAUSE_SECS, DEDUP_RETENTION_SECS, ERROR_PAUSE_SECS, IDLE_SLEEP_SECS, NARROW_LOT_LIMIT,
    PRUNE_INTERVAL_SECS, RATE_WINDOW_SECS, REQUESTS_PER_MIN, WIDE_LOT_LIMIT,
};
use crate::db::{DedupLedger, FilterStore, UserDirectory};
use crate::error::Result;
use crate::fetcher::ListingSource;
use crate::matcher::FilterMatcher;
use crate::notify::{NotificationDispatcher, NotificationSink};
use crate::scheduler::rate_limiter::RateLimiter;
use crate::types::{UserId, WatchFilter};

/// Tuning for the poll loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub requests_per_window: usize,
    pub rate_window: Duration,
    pub wide_lot_limit: u32,
    pub narrow_lot_limit: u32,
    pub idle_sleep: Duration,
    pub cycle_pause: Duration,
    pub error_pause: Duration,
    /// Dedup records outlive their lot's end by this much.
    pub dedup_retention: chrono::Duration,
    pub prune_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            requests_per_window: REQUESTS_PER_MIN,
            rate_window: Duration::from_secs(RATE_WINDOW_SECS),
            wide_lot_limit: WIDE_LOT_LIMIT,
            narrow_lot_limit: NARROW_LOT_LIMIT,
            idle_sleep: Duration::from_secs(IDLE_SLEEP_SECS),
            cycle_pause: Duration::from_secs(CYCLE_PAUSE_SECS),
            error_pause: Duration::from_secs(ERROR_PAUSE_SECS),
            dedup_retention: chrono::Duration::seconds(DEDUP_RETENTION_SECS),
            prune_interval: Duration::from_secs(PRUNE_INTERVAL_SECS),
        }
    }
}

impl PollSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            requests_per_window: cfg.requests_per_min,
            wide_lot_limit: cfg.wide_lot_limit,
            narrow_lot_limit: cfg.narrow_lot_limit,
            ..Self::default()
        }
    }
}

/// Collaborators the scheduler drives.
pub struct PollDeps {
    pub filters: Arc<dyn FilterStore>,
    pub ledger: Arc<dyn DedupLedger>,
    pub users: Arc<dyn UserDirectory>,
    pub source: Arc<dyn ListingSource>,
    pub tokens: Arc<TokenManager>,
    pub sink: Arc<dyn NotificationSink>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

/// Outcome of one full pass over the active filters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub active_filters: usize,
    /// Item ids actually fetched this pass.
    pub items_polled: usize,
    pub lots_fetched: usize,
    pub matches: usize,
    pub failed_items: usize,
}

#[derive(Debug, Default)]
struct ItemOutcome {
    polled: bool,
    lots: usize,
    matches: usize,
}

/// Group filters by item id. Batches come out in ascending item-id order and
/// keep the store's filter order within each batch.
pub fn group_by_item(filters: Vec<WatchFilter>) -> Vec<(String, Vec<WatchFilter>)> {
    let mut groups: BTreeMap<String, Vec<WatchFilter>> = BTreeMap::new();
    for f in filters {
        groups.entry(f.item_id.clone()).or_default().push(f);
    }
    groups.into_iter().collect()
}

/// Lot-count hint for a batch: wide while any filter awaits its first check.
pub fn lot_limit(group: &[WatchFilter], wide: u32, narrow: u32) -> u32 {
    if group.iter().any(|f| f.first_check_pending) {
        wide
    } else {
        narrow
    }
}

/// Single driver of upstream traffic: fetch → match → notify → record, one
/// item id at a time.
pub struct PollScheduler {
    settings: PollSettings,
    filters: Arc<dyn FilterStore>,
    ledger: Arc<dyn DedupLedger>,
    users: Arc<dyn UserDirectory>,
    source: Arc<dyn ListingSource>,
    tokens: Arc<TokenManager>,
    matcher: FilterMatcher,
    dispatcher: NotificationDispatcher,
    limiter: RateLimiter,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    last_prune: Option<tokio::time::Instant>,
}

impl PollScheduler {
    pub fn new(settings: PollSettings, deps: PollDeps) -> Self {
        let limiter = RateLimiter::new(settings.requests_per_window, settings.rate_window);
        Self {
            matcher: FilterMatcher::new(Arc::clone(&deps.ledger)),
            dispatcher: NotificationDispatcher::new(deps.sink, Arc::clone(&deps.health)),
            limiter,
            settings,
            filters: deps.filters,
            ledger: deps.ledger,
            users: deps.users,
            source: deps.source,
            tokens: deps.tokens,
            health: deps.health,
            latency: deps.latency,
            last_prune: None,
        }
    }

    pub async fn run(mut self) {
        info!(
            budget = self.settings.requests_per_window,
            "Auction monitoring started"
        );

        loop {
            match self.run_cycle().await {
                Ok(stats) if stats.active_filters == 0 => {
                    tokio::time::sleep(self.settings.idle_sleep).await;
                }
                Ok(stats) => {
                    debug!(
                        active_filters = stats.active_filters,
                        items = stats.items_polled,
                        lots = stats.lots_fetched,
                        matches = stats.matches,
                        failed = stats.failed_items,
                        "Poll cycle complete"
                    );
                    tokio::time::sleep(self.settings.cycle_pause).await;
                }
                Err(e) => {
                    error!("Poll cycle failed: {e}");
                    tokio::time::sleep(self.settings.error_pause).await;
                }
            }
        }
    }

    /// One pass over every active filter. Per-item failures are logged and
    /// counted; only a failure to read the filter list aborts the pass.
    pub async fn run_cycle(&mut self) -> Result<CycleStats> {
        self.prune_if_due().await;

        let filters = self.filters.list_active_filters().await?;
        let mut stats = CycleStats {
            active_filters: filters.len(),
            ..CycleStats::default()
        };
        if filters.is_empty() {
            return Ok(stats);
        }

        let mut owners: HashMap<UserId, bool> = HashMap::new();
        for (item_id, group) in group_by_item(filters) {
            match self.poll_item(&item_id, group, &mut owners).await {
                Ok(outcome) => {
                    stats.items_polled += usize::from(outcome.polled);
                    stats.lots_fetched += outcome.lots;
                    stats.matches += outcome.matches;
                }
                Err(e) => {
                    stats.failed_items += 1;
                    self.health.inc_fetch_failures();
                    if e.is_unauthorized() {
                        self.tokens.invalidate().await;
                    }
                    warn!(item_id = %item_id, "Auction check failed: {e}");
                    tokio::time::sleep(self.settings.error_pause).await;
                }
            }
        }

        self.health.finish_cycle(now_ms());
        Ok(stats)
    }

    async fn poll_item(
        &mut self,
        item_id: &str,
        group: Vec<WatchFilter>,
        owners: &mut HashMap<UserId, bool>,
    ) -> Result<ItemOutcome> {
        let group = self.with_live_owners(group, owners).await?;
        if group.is_empty() {
            return Ok(ItemOutcome::default());
        }

        let limit = lot_limit(&group, self.settings.wide_lot_limit, self.settings.narrow_lot_limit);
        let wide = group.iter().any(|f| f.first_check_pending);

        self.limiter.acquire().await;
        let token = self.tokens.get_token().await?;

        let started = Instant::now();
        let fetched = self.source.fetch_lots(item_id, limit, &token).await;
        self.latency.record(started.elapsed());
        let lots = fetched?;
        self.health.add_lots_fetched(lots.len() as u64);

        if wide {
            self.filters.clear_first_check(item_id).await?;
            info!(item_id, lots = lots.len(), "First check complete");
        }

        let matches = self.matcher.find_matches(&lots, &group, Utc::now()).await?;
        for m in &matches {
            self.dispatcher.dispatch(m).await;
            // Recorded even if delivery failed: the lot counts as handled.
            self.ledger.record(&m.dedup_key(), &m.filter.owner_id).await?;
        }

        Ok(ItemOutcome {
            polled: true,
            lots: lots.len(),
            matches: matches.len(),
        })
    }

    /// Drop filters whose owner is gone from the user directory. Lookups are
    /// cached for the rest of the pass.
    async fn with_live_owners(
        &self,
        group: Vec<WatchFilter>,
        owners: &mut HashMap<UserId, bool>,
    ) -> Result<Vec<WatchFilter>> {
        let mut live = Vec::with_capacity(group.len());
        for f in group {
            let exists = match owners.get(&f.owner_id) {
                Some(&known) => known,
                None => {
                    let found = self.users.exists(&f.owner_id).await?;
                    owners.insert(f.owner_id.clone(), found);
                    found
                }
            };
            if exists {
                live.push(f);
            } else {
                debug!(filter_id = f.id, owner_id = %f.owner_id, "Skipping filter of unknown user");
            }
        }
        Ok(live)
    }

    async fn prune_if_due(&mut self) {
        let now = tokio::time::Instant::now();
        if self
            .last_prune
            .is_some_and(|at| now.duration_since(at) < self.settings.prune_interval)
        {
            return;
        }
        self.last_prune = Some(now);

        let cutoff = Utc::now() - self.settings.dedup_retention;
        match self.ledger.prune_ended_before(cutoff).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Pruned dedup records of ended lots"),
            Err(e) => warn!("Dedup prune failed: {e}"),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenExchange;
    use crate::error::AppError;
    use crate::state::MemoryStore;
    use crate::types::{NewWatchFilter, PercentRange};
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingExchange(AtomicUsize);

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn exchange(&self) -> Result<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{n}"))
        }
    }

    #[derive(Default)]
    struct FakeSource {
        lots: Mutex<HashMap<String, Vec<serde_json::Value>>>,
        failing: Mutex<HashMap<String, u16>>,
        calls: Mutex<Vec<(String, u32, String, tokio::time::Instant)>>,
    }

    impl FakeSource {
        fn set_lots(&self, item_id: &str, lots: Vec<serde_json::Value>) {
            self.lots.lock().unwrap().insert(item_id.to_string(), lots);
        }

        fn fail_with(&self, item_id: &str, status: u16) {
            self.failing.lock().unwrap().insert(item_id.to_string(), status);
        }

        fn calls(&self) -> Vec<(String, u32, String, tokio::time::Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ListingSource for FakeSource {
        async fn fetch_lots(&self, item_id: &str, limit: u32, token: &str) -> Result<Vec<serde_json::Value>> {
            self.calls.lock().unwrap().push((
                item_id.to_string(),
                limit,
                token.to_string(),
                tokio::time::Instant::now(),
            ));
            if let Some(&status) = self.failing.lock().unwrap().get(item_id) {
                return Err(AppError::UpstreamStatus {
                    status,
                    url: format!("http://fake/{item_id}"),
                });
            }
            Ok(self.lots.lock().unwrap().get(item_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        broken: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, user_id: &str, text: &str) -> Result<()> {
            if self.broken {
                return Err(AppError::Delivery("chat not found".to_string()));
            }
            self.sent.lock().unwrap().push((user_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        source: Arc<FakeSource>,
        sink: Arc<RecordingSink>,
        exchange: Arc<CountingExchange>,
        health: Arc<HealthState>,
        scheduler: PollScheduler,
    }

    fn harness_with(settings: PollSettings, sink: RecordingSink) -> Harness {
        let store = MemoryStore::new();
        let source = Arc::new(FakeSource::default());
        let sink = Arc::new(sink);
        let exchange = Arc::new(CountingExchange(AtomicUsize::new(0)));
        let health = Arc::new(HealthState::new());
        let scheduler = PollScheduler::new(
            settings,
            PollDeps {
                filters: store.clone(),
                ledger: store.clone(),
                users: store.clone(),
                source: source.clone(),
                tokens: Arc::new(TokenManager::new(exchange.clone())),
                sink: sink.clone(),
                health: health.clone(),
                latency: Arc::new(LatencyStats::new()),
            },
        );
        Harness { store, source, sink, exchange, health, scheduler }
    }

    fn harness() -> Harness {
        harness_with(PollSettings::default(), RecordingSink::default())
    }

    fn lot(item_id: &str, amount: u32, price: f64, ends_at: DateTime<Utc>) -> serde_json::Value {
        json!({
            "itemId": item_id,
            "amount": amount,
            "startPrice": price,
            "startTime": "2026-01-01T00:00:00Z",
            "endTime": ends_at.to_rfc3339(),
        })
    }

    fn filter_with(id: i64, owner: &str, item: &str, pending: bool) -> WatchFilter {
        WatchFilter {
            id,
            owner_id: owner.to_string(),
            item_id: item.to_string(),
            name: item.to_string(),
            kind: crate::types::FilterKind::Item,
            price_ceiling: 1.0,
            min_quantity: 1,
            rarity: None,
            percent_range: None,
            notify_enabled: true,
            first_check_pending: pending,
        }
    }

    #[test]
    fn groups_are_ordered_and_stable() {
        let groups = group_by_item(vec![
            filter_with(1, "u1", "zeta", false),
            filter_with(2, "u2", "alpha", false),
            filter_with(3, "u3", "zeta", true),
        ]);
        let shape: Vec<(&str, Vec<i64>)> = groups
            .iter()
            .map(|(item, fs)| (item.as_str(), fs.iter().map(|f| f.id).collect()))
            .collect();
        assert_eq!(shape, vec![("alpha", vec![2]), ("zeta", vec![1, 3])]);

        assert_eq!(lot_limit(&groups[0].1, 200, 10), 10);
        assert_eq!(lot_limit(&groups[1].1, 200, 10), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn no_filters_means_no_upstream_calls() {
        let mut h = harness();
        let stats = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats, CycleStats::default());
        assert!(h.source.calls().is_empty());
        assert_eq!(h.exchange.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_check_widens_then_clears_for_whole_item() {
        let mut h = harness();
        h.store.add_user("u1");
        h.store.add_user("u2");
        let a = h.store.insert_filter(NewWatchFilter::item("u1", "bread", "Bread", 100.0, 1)).await.unwrap();
        h.store.clear_first_check("bread").await.unwrap();
        let b = h.store.insert_filter(NewWatchFilter::item("u2", "bread", "Bread", 100.0, 1)).await.unwrap();
        assert!(!h.store.filter(a).unwrap().first_check_pending);
        assert!(h.store.filter(b).unwrap().first_check_pending);

        h.scheduler.run_cycle().await.unwrap();
        h.scheduler.run_cycle().await.unwrap();

        let limits: Vec<u32> = h.source.calls().iter().map(|c| c.1).collect();
        assert_eq!(limits, vec![200, 10]);
        assert!(!h.store.filter(a).unwrap().first_check_pending);
        assert!(!h.store.filter(b).unwrap().first_check_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_wide_fetch_keeps_first_check_pending() {
        let mut h = harness();
        h.store.add_user("u1");
        let id = h.store.insert_filter(NewWatchFilter::item("u1", "bread", "Bread", 100.0, 1)).await.unwrap();
        h.source.fail_with("bread", 502);

        let stats = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.failed_items, 1);
        assert!(h.store.filter(id).unwrap().first_check_pending);
        assert_eq!(h.health.fetch_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn artifact_match_notifies_once_across_cycles() {
        let mut h = harness();
        h.store.add_user("u1");
        h.store
            .insert_filter(NewWatchFilter::artifact(
                "u1",
                "crystal",
                "Crystal",
                60_000.0,
                2,
                Some(PercentRange { min: 110.0, max: 120.0 }),
            ))
            .await
            .unwrap();

        let ends_at = Utc::now() + chrono::Duration::minutes(5);
        let mut artifact = lot("crystal", 1, 55_000.0, ends_at);
        artifact["additional"] = json!({"qlt": 2, "stats_random": 0.5});
        h.source.set_lots("crystal", vec![artifact]);

        let stats = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.matches, 1);
        {
            let sent = h.sink.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, "u1");
            assert!(sent[0].1.contains("Quality: 115.66%"));
        }
        assert_eq!(h.store.record_count(), 1);

        let stats = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.matches, 0);
        assert_eq!(h.sink.sent.lock().unwrap().len(), 1);
        assert_eq!(h.health.notifications_sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_matching_user_gets_one_alert() {
        let mut h = harness();
        for user in ["u1", "u2"] {
            h.store.add_user(user);
            h.store.insert_filter(NewWatchFilter::item(user, "bread", "Bread", 100.0, 1)).await.unwrap();
        }
        h.source.set_lots("bread", vec![lot("bread", 2, 150.0, Utc::now() + chrono::Duration::hours(1))]);

        h.scheduler.run_cycle().await.unwrap();
        h.scheduler.run_cycle().await.unwrap();

        let recipients: HashSet<String> = h.sink.sent.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
        assert_eq!(recipients, HashSet::from(["u1".to_string(), "u2".to_string()]));
        assert_eq!(h.sink.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_item_does_not_stop_the_pass() {
        let mut h = harness();
        h.store.add_user("u1");
        h.store.insert_filter(NewWatchFilter::item("u1", "aaa", "Broken", 100.0, 1)).await.unwrap();
        h.store.insert_filter(NewWatchFilter::item("u1", "bbb", "Fine", 100.0, 1)).await.unwrap();
        h.source.fail_with("aaa", 500);
        h.source.set_lots("bbb", vec![lot("bbb", 1, 50.0, Utc::now() + chrono::Duration::hours(1))]);

        let stats = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.failed_items, 1);
        assert_eq!(stats.items_polled, 1);
        assert_eq!(stats.matches, 1);
        assert_eq!(h.health.cycles_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_failure_still_records_lot() {
        let mut h = harness_with(PollSettings::default(), RecordingSink { broken: true, ..Default::default() });
        h.store.add_user("u1");
        h.store.insert_filter(NewWatchFilter::item("u1", "bread", "Bread", 100.0, 1)).await.unwrap();
        h.source.set_lots("bread", vec![lot("bread", 1, 50.0, Utc::now() + chrono::Duration::hours(1))]);

        let stats = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.matches, 1);
        assert_eq!(h.store.record_count(), 1);
        assert_eq!(h.health.delivery_failures(), 1);
        assert_eq!(h.health.notifications_sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn filters_of_missing_users_are_not_polled() {
        let mut h = harness();
        h.store.insert_filter(NewWatchFilter::item("ghost", "bread", "Bread", 100.0, 1)).await.unwrap();

        let stats = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.active_filters, 1);
        assert_eq!(stats.items_polled, 0);
        assert!(h.source.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_fetch_drops_cached_token() {
        let mut h = harness();
        h.store.add_user("u1");
        h.store.insert_filter(NewWatchFilter::item("u1", "bread", "Bread", 100.0, 1)).await.unwrap();
        h.source.fail_with("bread", 401);

        h.scheduler.run_cycle().await.unwrap();
        h.scheduler.run_cycle().await.unwrap();

        let tokens: Vec<String> = h.source.calls().iter().map(|c| c.2.clone()).collect();
        assert_eq!(tokens, vec!["token-1".to_string(), "token-2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_reused_across_items() {
        let mut h = harness();
        h.store.add_user("u1");
        for item in ["a", "b", "c"] {
            h.store.insert_filter(NewWatchFilter::item("u1", item, item, 100.0, 1)).await.unwrap();
        }
        h.scheduler.run_cycle().await.unwrap();
        assert_eq!(h.source.calls().len(), 3);
        assert_eq!(h.exchange.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_respect_rate_budget() {
        let settings = PollSettings {
            requests_per_window: 2,
            ..PollSettings::default()
        };
        let mut h = harness_with(settings, RecordingSink::default());
        h.store.add_user("u1");
        for item in ["a", "b", "c"] {
            h.store.insert_filter(NewWatchFilter::item("u1", item, item, 100.0, 1)).await.unwrap();
        }

        h.scheduler.run_cycle().await.unwrap();

        let calls = h.source.calls();
        assert_eq!(calls.len(), 3);
        let gap = calls[2].3.duration_since(calls[0].3);
        assert!(gap >= Duration::from_secs(60), "third call after {gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn prunes_ended_records_on_first_cycle() {
        let mut h = harness();
        let old = crate::types::DedupKey {
            item_id: "bread".to_string(),
            start_time: None,
            end_time: (Utc::now() - chrono::Duration::hours(2)).to_rfc3339(),
        };
        h.store.record(&old, "u1").await.unwrap();

        h.scheduler.run_cycle().await.unwrap();
        assert_eq!(h.store.record_count(), 0);
    }
}
