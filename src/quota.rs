//! Call-volume limits for rate-limited backends.
//!
//! Every paid backend (vision, translation) is guarded by a [`QuotaTracker`]
//! enforcing two limits at once:
//!
//! * a **monthly cap**, reset when the calendar month (local time) changes;
//! * a **rate cap** per second- or minute-aligned window.
//!
//! The state survives across runs through a [`QuotaStore`]: a small JSON file
//! per service in production, an in-memory store in tests. State is written
//! after every recorded call, so a crash between grant and use may undercount.
//!
//! When a limit is hit the tracker either fails closed (`false`) or, with
//! `wait_if_quota_reached`, sleeps until the window or month rolls over and
//! checks again. Time and sleeping go through [`Clock`] so both paths are
//! testable without waiting.

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Configuration ────────────────────────────────────────────────────────

/// Granularity of the rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    #[default]
    Minute,
}

impl TimeUnit {
    /// Key of the window containing `now`, e.g. `2026-10-17 09:54`.
    pub fn window_key(&self, now: NaiveDateTime) -> String {
        match self {
            TimeUnit::Second => now.format("%Y-%m-%d %H:%M:%S").to_string(),
            TimeUnit::Minute => now.format("%Y-%m-%d %H:%M").to_string(),
        }
    }

    /// Time left until the window containing `now` rolls over.
    fn until_next_window(&self, now: NaiveDateTime) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60 - u64::from(now.second().min(59))),
        }
    }
}

/// Limits enforced by a [`QuotaTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Units allowed per calendar month.
    pub monthly_limit: u64,
    /// Requests allowed per window.
    pub rate_limit: u64,
    /// Window granularity.
    pub time_unit: TimeUnit,
    /// Sleep until the quota frees up instead of refusing the request.
    pub wait_if_quota_reached: bool,
}

impl QuotaConfig {
    /// Free tier of Azure Computer Vision: 5 000 calls/month, 20 calls/minute.
    pub fn vision() -> Self {
        Self {
            monthly_limit: 5_000,
            rate_limit: 20,
            time_unit: TimeUnit::Minute,
            wait_if_quota_reached: false,
        }
    }

    /// Free tier of Azure Translator: 2 M characters/month, 5 calls/second.
    pub fn translator() -> Self {
        Self {
            monthly_limit: 2_000_000,
            rate_limit: 5,
            time_unit: TimeUnit::Second,
            wait_if_quota_reached: false,
        }
    }

    pub fn waiting(mut self, wait: bool) -> Self {
        self.wait_if_quota_reached = wait;
        self
    }
}

// ── Persisted state ──────────────────────────────────────────────────────

/// Usage counted in one rate-limit window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCount {
    pub time: String,
    pub count: u64,
}

/// Usage of one service, as persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    #[serde(default)]
    pub monthly_count: u64,
    #[serde(default = "local_now")]
    pub last_reset: NaiveDateTime,
    #[serde(default)]
    pub time_counts: Vec<WindowCount>,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl QuotaState {
    /// No usage yet, month starting at `now`.
    pub fn fresh(now: NaiveDateTime) -> Self {
        Self {
            monthly_count: 0,
            last_reset: now,
            time_counts: Vec::new(),
        }
    }
}

/// Durable storage for a [`QuotaState`].
pub trait QuotaStore: Send + Sync {
    /// Load the saved state. `None` for missing or unreadable state.
    fn load(&self) -> Option<QuotaState>;

    /// Replace the saved state.
    fn save(&self, state: &QuotaState) -> std::io::Result<()>;
}

/// One JSON file per service (`.azure_vision_quota.json`, …).
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QuotaStore for JsonFileStore {
    fn load(&self) -> Option<QuotaState> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(
                    "Ignoring unreadable quota state {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    fn save(&self, state: &QuotaState) -> std::io::Result<()> {
        let json = serde_json::to_string(state)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)
    }
}

/// Keeps the state in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<QuotaState>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: QuotaState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    /// Last saved (or seeded) state.
    pub fn snapshot(&self) -> Option<QuotaState> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl QuotaStore for MemoryStore {
    fn load(&self) -> Option<QuotaState> {
        self.snapshot()
    }

    fn save(&self, state: &QuotaState) -> std::io::Result<()> {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = Some(state.clone());
        *self.saves.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }
}

// ── Clock ────────────────────────────────────────────────────────────────

/// Source of local wall-clock time and of sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    async fn sleep(&self, duration: Duration);
}

/// Local time and `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        local_now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock: time only moves through [`ManualClock::advance`],
/// [`ManualClock::set`], or `sleep`, which advances instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, t: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = t;
    }

    pub fn advance(&self, d: Duration) {
        let delta = chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += delta;
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

// ── Tracker ──────────────────────────────────────────────────────────────

/// Which limit refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    Monthly,
    Rate,
}

/// Outcome of a single quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Granted,
    Denied {
        limit: QuotaLimit,
        /// How long until the limit rolls over.
        retry_after: Duration,
    },
}

/// Enforces a [`QuotaConfig`] for one service.
pub struct QuotaTracker {
    service: String,
    config: QuotaConfig,
    state: QuotaState,
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for QuotaTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaTracker")
            .field("service", &self.service)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl QuotaTracker {
    /// Tracker on the system clock, loading any saved state from `store`.
    pub fn new(service: impl Into<String>, config: QuotaConfig, store: Arc<dyn QuotaStore>) -> Self {
        Self::with_clock(service, config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        service: impl Into<String>,
        config: QuotaConfig,
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let service = service.into();
        let state = store.load().unwrap_or_else(|| {
            debug!("No saved {} quota state; starting fresh", service);
            QuotaState::fresh(clock.now())
        });
        Self {
            service,
            config,
            state,
            store,
            clock,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn state(&self) -> &QuotaState {
        &self.state
    }

    /// Evaluate both limits at `now`.
    ///
    /// Applies the monthly rollover and drops stale windows as a side effect;
    /// neither change is persisted until the next recorded call.
    pub fn check_at(&mut self, now: NaiveDateTime) -> QuotaDecision {
        if now.month() != self.state.last_reset.month() || now.year() != self.state.last_reset.year() {
            info!(
                "{} quota: new month, resetting {} used calls",
                self.service, self.state.monthly_count
            );
            self.state = QuotaState::fresh(now);
        }

        if self.state.monthly_count >= self.config.monthly_limit {
            return QuotaDecision::Denied {
                limit: QuotaLimit::Monthly,
                retry_after: until_next_month(now),
            };
        }

        let key = self.config.time_unit.window_key(now);
        self.state.time_counts.retain(|w| w.time == key);

        match self.state.time_counts.first() {
            None => {
                self.state.time_counts.push(WindowCount { time: key, count: 0 });
                QuotaDecision::Granted
            }
            Some(window) if window.count >= self.config.rate_limit => QuotaDecision::Denied {
                limit: QuotaLimit::Rate,
                retry_after: self.config.time_unit.until_next_window(now),
            },
            Some(_) => QuotaDecision::Granted,
        }
    }

    /// `true` when a request may be sent now.
    ///
    /// With `wait_if_quota_reached` this never returns `false`: it sleeps
    /// until the limiting window (or month) rolls over and checks again.
    pub async fn can_make_request(&mut self) -> bool {
        loop {
            let now = self.clock.now();
            match self.check_at(now) {
                QuotaDecision::Granted => return true,
                QuotaDecision::Denied { limit, retry_after } => {
                    if !self.config.wait_if_quota_reached {
                        debug!("{} quota: {:?} limit reached", self.service, limit);
                        return false;
                    }
                    warn!(
                        "{} quota: {:?} limit reached, waiting {}s",
                        self.service,
                        limit,
                        retry_after.as_secs()
                    );
                    self.clock.sleep(retry_after).await;
                }
            }
        }
    }

    /// Record `count` successful calls against both limits and persist.
    pub fn increment(&mut self, count: u64) {
        self.state.monthly_count += count;
        self.current_window().count += count;
        self.persist();
    }

    /// Record one call that consumed `units` of the monthly allowance
    /// (characters for the translator), then persist.
    ///
    /// Unlike `increment(units)`, which charges `units` to the rate window
    /// as well, the window only grows by one here: the per-second limit
    /// counts requests, not characters.
    pub fn record_usage(&mut self, units: u64) {
        self.state.monthly_count += units;
        self.current_window().count += 1;
        self.persist();
    }

    fn current_window(&mut self) -> &mut WindowCount {
        if self.state.time_counts.is_empty() {
            let key = self.config.time_unit.window_key(self.clock.now());
            self.state.time_counts.push(WindowCount { time: key, count: 0 });
        }
        &mut self.state.time_counts[0]
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.state) {
            warn!("Could not save {} quota state: {}", self.service, e);
        }
    }
}

/// Time from `now` until 00:00 on the first day of the next month.
fn until_next_month(now: NaiveDateTime) -> Duration {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|start| (start - now).to_std().ok())
        .unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn tracker(config: QuotaConfig, clock: Arc<ManualClock>) -> (QuotaTracker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let t = QuotaTracker::with_clock("vision", config, store.clone(), clock);
        (t, store)
    }

    #[test]
    fn rate_limit_blocks_after_twenty_calls_in_a_minute() {
        let clock = Arc::new(ManualClock::new(at(2026, 10, 17, 9, 54, 5)));
        let (mut t, _) = tracker(QuotaConfig::vision(), clock.clone());

        for _ in 0..20 {
            assert!(tokio_test::block_on(t.can_make_request()));
            t.increment(1);
            clock.advance(Duration::from_secs(1));
        }
        assert!(!tokio_test::block_on(t.can_make_request()));
        assert_eq!(t.state().monthly_count, 20);

        clock.set(at(2026, 10, 17, 9, 55, 0));
        assert!(tokio_test::block_on(t.can_make_request()));
    }

    #[test]
    fn previous_month_resets_before_checking_limit() {
        let now = at(2026, 10, 17, 9, 0, 0);
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::with_state(QuotaState {
            monthly_count: 5_000,
            last_reset: at(2026, 9, 30, 23, 59, 0),
            time_counts: vec![WindowCount {
                time: "2026-09-30 23:59".into(),
                count: 20,
            }],
        }));
        let mut t = QuotaTracker::with_clock("vision", QuotaConfig::vision(), store, clock);

        assert_eq!(t.check_at(now), QuotaDecision::Granted);
        assert_eq!(t.state().monthly_count, 0);
        assert_eq!(t.state().last_reset, now);
        assert_eq!(t.state().time_counts.len(), 1);
        assert_eq!(t.state().time_counts[0].time, "2026-10-17 09:00");
    }

    #[test]
    fn same_month_of_another_year_also_resets() {
        let now = at(2026, 10, 2, 0, 0, 0);
        let store = Arc::new(MemoryStore::with_state(QuotaState {
            monthly_count: 5_000,
            last_reset: at(2025, 10, 2, 0, 0, 0),
            time_counts: vec![],
        }));
        let clock = Arc::new(ManualClock::new(now));
        let mut t = QuotaTracker::with_clock("vision", QuotaConfig::vision(), store, clock);
        assert_eq!(t.check_at(now), QuotaDecision::Granted);
        assert_eq!(t.state().monthly_count, 0);
    }

    #[test]
    fn monthly_limit_fails_closed() {
        let now = at(2026, 10, 17, 9, 0, 0);
        let store = Arc::new(MemoryStore::with_state(QuotaState {
            monthly_count: 5_000,
            last_reset: at(2026, 10, 1, 0, 0, 0),
            time_counts: vec![],
        }));
        let clock = Arc::new(ManualClock::new(now));
        let mut t = QuotaTracker::with_clock("vision", QuotaConfig::vision(), store, clock);

        match t.check_at(now) {
            QuotaDecision::Denied { limit, retry_after } => {
                assert_eq!(limit, QuotaLimit::Monthly);
                // 14 days and 15 hours until 2026-11-01 00:00.
                assert_eq!(retry_after, Duration::from_secs(14 * 86_400 + 15 * 3_600));
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(!tokio_test::block_on(t.can_make_request()));
    }

    #[tokio::test]
    async fn waiting_for_next_month_then_grants() {
        let clock = Arc::new(ManualClock::new(at(2026, 12, 31, 23, 59, 30)));
        let store = Arc::new(MemoryStore::with_state(QuotaState {
            monthly_count: 5_000,
            last_reset: at(2026, 12, 1, 0, 0, 0),
            time_counts: vec![],
        }));
        let mut t = QuotaTracker::with_clock(
            "vision",
            QuotaConfig::vision().waiting(true),
            store,
            clock.clone(),
        );

        assert!(t.can_make_request().await);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
        assert_eq!(t.state().monthly_count, 0);
        assert_eq!(t.state().last_reset, at(2027, 1, 1, 0, 0, 0));
    }

    #[tokio::test]
    async fn waiting_for_rest_of_minute() {
        let clock = Arc::new(ManualClock::new(at(2026, 10, 17, 9, 54, 45)));
        let (mut t, _) = tracker(
            QuotaConfig {
                rate_limit: 1,
                ..QuotaConfig::vision().waiting(true)
            },
            clock.clone(),
        );

        assert!(t.can_make_request().await);
        t.increment(1);
        assert!(t.can_make_request().await);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(15)]);
    }

    #[tokio::test]
    async fn second_windows_wait_one_second() {
        let clock = Arc::new(ManualClock::new(at(2026, 10, 17, 9, 54, 45)));
        let (mut t, _) = tracker(QuotaConfig::translator().waiting(true), clock.clone());

        for _ in 0..5 {
            assert!(t.can_make_request().await);
            t.increment(1);
        }
        assert!(t.can_make_request().await);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn stale_windows_are_discarded() {
        let now = at(2026, 10, 17, 10, 0, 0);
        let store = Arc::new(MemoryStore::with_state(QuotaState {
            monthly_count: 3,
            last_reset: at(2026, 10, 1, 0, 0, 0),
            time_counts: vec![
                WindowCount {
                    time: "2026-10-17 09:58".into(),
                    count: 20,
                },
                WindowCount {
                    time: "2026-10-17 09:59".into(),
                    count: 20,
                },
            ],
        }));
        let clock = Arc::new(ManualClock::new(now));
        let mut t = QuotaTracker::with_clock("vision", QuotaConfig::vision(), store, clock);

        assert_eq!(t.check_at(now), QuotaDecision::Granted);
        assert_eq!(
            t.state().time_counts,
            vec![WindowCount {
                time: "2026-10-17 10:00".into(),
                count: 0
            }]
        );
        assert_eq!(t.state().monthly_count, 3);
    }

    #[test]
    fn every_increment_is_persisted() {
        let clock = Arc::new(ManualClock::new(at(2026, 10, 17, 9, 0, 0)));
        let (mut t, store) = tracker(QuotaConfig::vision(), clock);

        assert!(tokio_test::block_on(t.can_make_request()));
        t.increment(1);
        t.increment(2);
        assert_eq!(store.save_count(), 2);
        let saved = store.snapshot().unwrap();
        assert_eq!(saved.monthly_count, 3);
        assert_eq!(saved.time_counts[0].count, 3);
    }

    #[test]
    fn record_usage_counts_units_monthly_and_one_request_per_window() {
        let clock = Arc::new(ManualClock::new(at(2026, 10, 17, 9, 0, 0)));
        let (mut t, _) = tracker(QuotaConfig::translator(), clock);

        assert!(tokio_test::block_on(t.can_make_request()));
        t.record_usage(120);
        assert_eq!(t.state().monthly_count, 120);
        assert_eq!(t.state().time_counts[0].count, 1);
        assert!(tokio_test::block_on(t.can_make_request()));
    }

    #[test]
    fn file_store_reads_existing_state_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".azure_vision_quota.json");
        std::fs::write(
            &path,
            r#"{"monthly_count": 12, "last_reset": "2026-10-01T08:00:00.123456", "time_counts": [{"time": "2026-10-17 09:54", "count": 3}]}"#,
        )
        .unwrap();

        let state = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(state.monthly_count, 12);
        assert_eq!(state.last_reset.date(), NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        assert_eq!(state.time_counts[0].count, 3);
    }

    #[test]
    fn file_store_round_trips_through_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("q.json")));
        let clock = Arc::new(ManualClock::new(at(2026, 10, 17, 9, 0, 0)));

        let mut t = QuotaTracker::with_clock("vision", QuotaConfig::vision(), store.clone(), clock.clone());
        assert!(tokio_test::block_on(t.can_make_request()));
        t.increment(1);

        let reloaded = QuotaTracker::with_clock("vision", QuotaConfig::vision(), store, clock);
        assert_eq!(reloaded.state().monthly_count, 1);
    }

    #[test]
    fn malformed_or_missing_state_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert!(JsonFileStore::new(&bad).load().is_none());
        assert!(JsonFileStore::new(dir.path().join("missing.json")).load().is_none());

        let now = at(2026, 10, 17, 9, 0, 0);
        let t = QuotaTracker::with_clock(
            "vision",
            QuotaConfig::vision(),
            Arc::new(JsonFileStore::new(&bad)),
            Arc::new(ManualClock::new(now)),
        );
        assert_eq!(t.state(), &QuotaState::fresh(now));
    }

    #[test]
    fn partial_state_fills_defaults() {
        let state: QuotaState = serde_json::from_str(r#"{"monthly_count": 7}"#).unwrap();
        assert_eq!(state.monthly_count, 7);
        assert!(state.time_counts.is_empty());
    }

    #[test]
    fn window_keys() {
        let now = at(2026, 10, 17, 9, 54, 7);
        assert_eq!(TimeUnit::Minute.window_key(now), "2026-10-17 09:54");
        assert_eq!(TimeUnit::Second.window_key(now), "2026-10-17 09:54:07");
    }
}
