//! Sliding-window request limiter with adaptive caps and cooldown.
//!
//! [`AdaptiveRateLimiter`] enforces three windows at once (per second, per
//! minute, per hour) plus an optional 100 ms burst window. Callers block in
//! [`AdaptiveRateLimiter::acquire`] until every window has room.
//!
//! Failures reported through [`AdaptiveRateLimiter::record_failure`] feed two
//! control loops:
//!
//! - a burst of failures inside the cooldown window pauses all requests for
//!   the configured cooldown and lowers the caps;
//! - in adaptive mode, the trailing one-minute failure rate nudges the caps
//!   down (above 30 %) or back up (below 5 %).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediafetch_core::download::{AdaptiveRateLimiter, RateLimitConfig};
//!
//! # async fn example() {
//! let limiter = Arc::new(AdaptiveRateLimiter::new(RateLimitConfig::default()));
//!
//! let worker = Arc::clone(&limiter);
//! tokio::spawn(async move {
//!     if worker.acquire().await {
//!         // ... perform the request, then on error:
//!         worker.record_failure().await;
//!     }
//! });
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const BURST_WINDOW: Duration = Duration::from_millis(100);

/// How long failure timestamps are kept for rate computation.
const FAILURE_RETENTION: Duration = Duration::from_secs(600);

/// Trailing window used by the adaptive controller.
const ADAPT_WINDOW: Duration = MINUTE;

/// Above this failure rate the caps are lowered.
const DECREASE_FAILURE_RATE: f64 = 0.30;

/// Below this failure rate the caps may be raised.
const INCREASE_FAILURE_RATE: f64 = 0.05;

/// Requests needed in the adaptive window before any adjustment.
const MIN_SAMPLES_FOR_DECREASE: usize = 10;

/// Requests needed in the adaptive window before raising caps.
const MIN_SAMPLES_FOR_INCREASE: usize = 20;

/// Limiting behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// Caps never move except on a failure-burst cooldown.
    Fixed,
    /// Caps follow the observed failure rate.
    #[default]
    Adaptive,
    /// Like fixed, plus a `burst_size` cap per 100 ms.
    Burst,
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub mode: RateLimitMode,
    pub max_per_second: u32,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
    /// Floors the adaptive controller never goes below.
    pub min_per_second: u32,
    pub min_per_minute: u32,
    pub min_per_hour: u32,
    /// Requests allowed per 100 ms in [`RateLimitMode::Burst`].
    pub burst_size: u32,
    /// Pause applied after a failure burst.
    pub cooldown: Duration,
    /// Failures inside `cooldown_window` that trigger a cooldown.
    pub cooldown_failure_threshold: usize,
    pub cooldown_window: Duration,
    /// When false, `acquire` returns `false` instead of waiting.
    pub block_on_limit: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            mode: RateLimitMode::Adaptive,
            max_per_second: 2,
            max_per_minute: 30,
            max_per_hour: 1000,
            min_per_second: 1,
            min_per_minute: 10,
            min_per_hour: 100,
            burst_size: 5,
            cooldown: Duration::from_secs(60),
            cooldown_failure_threshold: 5,
            cooldown_window: Duration::from_secs(10),
            block_on_limit: true,
        }
    }
}

impl RateLimitConfig {
    /// Default config with a different per-second cap.
    #[must_use]
    pub fn per_second(per_second: u32) -> Self {
        Self {
            max_per_second: per_second,
            ..Self::default()
        }
    }
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RateLimiterStats {
    /// Permits granted.
    pub total_requests: u64,
    /// Acquires that had to wait (or were refused in non-blocking mode).
    pub blocked_requests: u64,
    /// Cap changes made by the controller.
    pub rate_adjustments: u64,
    pub current_per_second: u32,
    pub current_per_minute: u32,
    pub current_per_hour: u32,
    /// Failure rate seen by the last adaptive evaluation.
    pub last_failure_rate: f64,
    /// Remaining cooldown in milliseconds, zero when none.
    pub cooldown_remaining_ms: u64,
}

/// Mutable bookkeeping, guarded by one lock.
#[derive(Debug)]
struct LimiterState {
    /// Granted request timestamps, oldest first, trimmed to one hour.
    requests: VecDeque<Instant>,
    /// Failure timestamps, oldest first, trimmed to ten minutes.
    failures: VecDeque<Instant>,
    /// Failures since the last burst cooldown, trimmed to the cooldown
    /// window. Emptied when a burst triggers so one burst yields one
    /// cooldown, while `failures` keeps the history for adaptation.
    burst: VecDeque<Instant>,
    per_second: u32,
    per_minute: u32,
    per_hour: u32,
    cooldown_until: Option<Instant>,
    last_failure_rate: f64,
}

impl LimiterState {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            requests: VecDeque::new(),
            failures: VecDeque::new(),
            burst: VecDeque::new(),
            per_second: config.max_per_second.max(1),
            per_minute: config.max_per_minute.max(1),
            per_hour: config.max_per_hour.max(1),
            cooldown_until: None,
            last_failure_rate: 0.0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while self
            .requests
            .front()
            .is_some_and(|t| now.duration_since(*t) >= HOUR)
        {
            self.requests.pop_front();
        }
        while self
            .failures
            .front()
            .is_some_and(|t| now.duration_since(*t) >= FAILURE_RETENTION)
        {
            self.failures.pop_front();
        }
    }

    /// Time until the window of length `window` holds fewer than `cap` entries.
    fn window_wait(&self, now: Instant, window: Duration, cap: u32) -> Duration {
        let cap = cap.max(1) as usize;
        let len = self.requests.len();
        if len < cap {
            return Duration::ZERO;
        }
        // The oldest of the last `cap` grants decides when a slot frees up.
        let pivot = self.requests[len - cap];
        (pivot + window).saturating_duration_since(now)
    }

    /// Time to wait before a new grant is allowed, zero when one is allowed now.
    fn required_wait(&self, now: Instant, config: &RateLimitConfig) -> Duration {
        let mut wait = self
            .cooldown_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));

        wait = wait
            .max(self.window_wait(now, SECOND, self.per_second))
            .max(self.window_wait(now, MINUTE, self.per_minute))
            .max(self.window_wait(now, HOUR, self.per_hour));

        if config.mode == RateLimitMode::Burst {
            wait = wait.max(self.window_wait(now, BURST_WINDOW, config.burst_size));
        }
        wait
    }

    /// Extends the cooldown to at least `until`.
    fn extend_cooldown(&mut self, until: Instant) {
        self.cooldown_until = Some(self.cooldown_until.map_or(until, |cur| cur.max(until)));
    }

    fn count_since(entries: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
        entries
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) < window)
            .count()
    }

    /// Lowers every cap by 30 %, never below its floor. Returns true if the
    /// per-second cap changed.
    fn decrease(&mut self, config: &RateLimitConfig) -> bool {
        let old = self.per_second;
        self.per_second = scale_down(self.per_second, config.min_per_second);
        self.per_minute = scale_down(self.per_minute, config.min_per_minute);
        self.per_hour = scale_down(self.per_hour, config.min_per_hour);
        old != self.per_second
    }

    /// Raises every cap by 20 % (at least 1), never above its maximum.
    /// Returns true if the per-second cap changed.
    fn increase(&mut self, config: &RateLimitConfig) -> bool {
        let old = self.per_second;
        self.per_second = scale_up(self.per_second, config.max_per_second);
        self.per_minute = scale_up(self.per_minute, config.max_per_minute);
        self.per_hour = scale_up(self.per_hour, config.max_per_hour);
        old != self.per_second
    }
}

fn scale_down(current: u32, floor: u32) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    let scaled = (u64::from(current) * 7 / 10) as u32;
    scaled.max(floor).max(1)
}

fn scale_up(current: u32, ceiling: u32) -> u32 {
    if current >= ceiling {
        return ceiling.max(1);
    }
    #[allow(clippy::cast_possible_truncation)]
    let scaled = (u64::from(current) * 12 / 10).min(u64::from(u32::MAX)) as u32;
    scaled.max(current + 1).min(ceiling)
}

/// Shared request limiter.
///
/// Designed to be wrapped in `Arc` and shared across workers. The internal
/// lock covers bookkeeping only; waiting happens with the lock released, so
/// a blocked caller never stalls `record_failure` or `stats`.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    config: RateLimitConfig,
    disabled: bool,
    state: Mutex<LimiterState>,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    rate_adjustments: AtomicU64,
}

impl AdaptiveRateLimiter {
    /// Creates a limiter starting at the configured maximum caps.
    #[must_use]
    #[instrument(skip_all, fields(mode = ?config.mode, per_second = config.max_per_second))]
    pub fn new(config: RateLimitConfig) -> Self {
        debug!("creating rate limiter");
        Self {
            state: Mutex::new(LimiterState::new(&config)),
            config,
            disabled: false,
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            rate_adjustments: AtomicU64::new(0),
        }
    }

    /// Creates a limiter that grants every request immediately.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            disabled: true,
            ..Self::new(RateLimitConfig::default())
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Waits for a permit.
    ///
    /// Returns `true` once every active window (and any cooldown) allows a
    /// request; the grant is recorded under the same lock as the check.
    /// Returns `false` only when the limiter is configured not to block and a
    /// window is full.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> bool {
        if self.disabled {
            self.total_requests.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let mut counted_block = false;
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.prune(now);

                let wait = state.required_wait(now, &self.config);
                if wait.is_zero() {
                    state.requests.push_back(now);
                    if self.config.mode == RateLimitMode::Adaptive {
                        self.adapt(&mut state, now);
                    }
                    self.total_requests.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                wait
            };

            if !counted_block {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                counted_block = true;
            }

            if !self.config.block_on_limit {
                debug!(wait_ms = wait.as_millis(), "rate limit reached, not waiting");
                return false;
            }

            debug!(wait_ms = wait.as_millis(), "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Records a failed request and enters cooldown on a failure burst.
    #[instrument(skip(self))]
    pub async fn record_failure(&self) {
        if self.disabled {
            return;
        }

        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune(now);
        state.failures.push_back(now);
        state.burst.push_back(now);
        let window = self.config.cooldown_window;
        while state
            .burst
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            state.burst.pop_front();
        }

        let recent = state.burst.len();
        if recent >= self.config.cooldown_failure_threshold {
            warn!(
                failures = recent,
                cooldown_secs = self.config.cooldown.as_secs(),
                "failure burst detected, entering cooldown"
            );
            state.extend_cooldown(now + self.config.cooldown);
            state.burst.clear();
            if state.decrease(&self.config) {
                self.rate_adjustments.fetch_add(1, Ordering::Relaxed);
                info!(per_second = state.per_second, "lowered request rate");
            }
        }
    }

    /// Pauses every caller for at least `duration` from now.
    ///
    /// Only ever extends: a cooldown already running longer is kept, so a
    /// short `Retry-After` cannot cut a failure-burst cooldown short.
    #[instrument(skip(self), fields(cooldown_ms = duration.as_millis()))]
    pub async fn set_cooldown(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let mut state = self.state.lock().await;
        state.extend_cooldown(Instant::now() + duration);
        info!("cooldown set");
    }

    /// Lifts any cooldown in force.
    #[instrument(skip(self))]
    pub async fn clear_cooldown(&self) {
        let mut state = self.state.lock().await;
        if state.cooldown_until.take().is_some() {
            info!("cooldown cleared");
        }
    }

    /// Returns a snapshot of counters and current caps.
    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        let now = Instant::now();
        #[allow(clippy::cast_possible_truncation)]
        let cooldown_remaining_ms = state
            .cooldown_until
            .map_or(0, |until| until.saturating_duration_since(now).as_millis() as u64);
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            rate_adjustments: self.rate_adjustments.load(Ordering::Relaxed),
            current_per_second: state.per_second,
            current_per_minute: state.per_minute,
            current_per_hour: state.per_hour,
            last_failure_rate: state.last_failure_rate,
            cooldown_remaining_ms,
        }
    }

    /// Resets the counters; caps and windows are untouched.
    pub fn reset_stats(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.blocked_requests.store(0, Ordering::Relaxed);
        self.rate_adjustments.store(0, Ordering::Relaxed);
    }

    fn adapt(&self, state: &mut LimiterState, now: Instant) {
        let requests = LimiterState::count_since(&state.requests, now, ADAPT_WINDOW);
        if requests <= MIN_SAMPLES_FOR_DECREASE {
            return;
        }
        let failures = LimiterState::count_since(&state.failures, now, ADAPT_WINDOW);
        #[allow(clippy::cast_precision_loss)]
        let rate = failures as f64 / requests as f64;
        state.last_failure_rate = rate;

        if rate > DECREASE_FAILURE_RATE {
            if state.decrease(&self.config) {
                self.rate_adjustments.fetch_add(1, Ordering::Relaxed);
                info!(failure_rate = rate, per_second = state.per_second, "lowered request rate");
            }
        } else if rate < INCREASE_FAILURE_RATE
            && requests > MIN_SAMPLES_FOR_INCREASE
            && state.increase(&self.config)
        {
            self.rate_adjustments.fetch_add(1, Ordering::Relaxed);
            info!(failure_rate = rate, per_second = state.per_second, "raised request rate");
        }
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Accepts integer seconds (`120`) or an HTTP-date. Dates in the past yield
/// zero; values above one hour are capped. Returns `None` when unparseable.
///
/// ```
/// use std::time::Duration;
/// use mediafetch_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(when) => {
            let delay = when
                .duration_since(std::time::SystemTime::now())
                .unwrap_or(Duration::ZERO);
            if delay > MAX_RETRY_AFTER {
                warn!(delay_secs = delay.as_secs(), "Retry-After date capped at 1 hour");
            }
            Some(delay.min(MAX_RETRY_AFTER))
        }
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fixed(per_second: u32) -> RateLimitConfig {
        RateLimitConfig {
            mode: RateLimitMode::Fixed,
            max_per_second: per_second,
            max_per_minute: 1000,
            max_per_hour: 10_000,
            ..RateLimitConfig::default()
        }
    }

    fn adaptive(per_second: u32) -> RateLimitConfig {
        RateLimitConfig {
            mode: RateLimitMode::Adaptive,
            max_per_second: per_second,
            max_per_minute: 100,
            max_per_hour: 1000,
            ..RateLimitConfig::default()
        }
    }

    // ==================== acquire Tests ====================

    #[tokio::test]
    async fn test_disabled_limiter_never_waits() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::disabled();
        let start = Instant::now();

        for _ in 0..50 {
            assert!(limiter.acquire().await);
        }

        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(limiter.is_disabled());
    }

    #[tokio::test]
    async fn test_acquire_within_cap_is_immediate() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(fixed(3));
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.acquire().await);
        }

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_acquire_over_cap_waits_for_window() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(fixed(2));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));
        assert_eq!(limiter.stats().await.blocked_requests, 1);
    }

    #[tokio::test]
    async fn test_non_blocking_mode_refuses() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
            block_on_limit: false,
            ..fixed(1)
        });

        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);

        let stats = limiter.stats().await;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.blocked_requests, 1);
    }

    #[tokio::test]
    async fn test_burst_mode_limits_per_100ms() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
            mode: RateLimitMode::Burst,
            burst_size: 2,
            ..fixed(10)
        });
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    // ==================== Cooldown Tests ====================

    #[tokio::test]
    async fn test_failure_burst_enters_cooldown_and_lowers_caps() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
            max_per_second: 10,
            ..RateLimitConfig::default()
        });

        for _ in 0..5 {
            limiter.record_failure().await;
        }

        let stats = limiter.stats().await;
        assert_eq!(stats.current_per_second, 7);
        assert_eq!(stats.current_per_minute, 21);
        assert_eq!(stats.current_per_hour, 700);
        assert_eq!(stats.rate_adjustments, 1);
        assert!(stats.cooldown_remaining_ms > 59_000);

        let start = Instant::now();
        assert!(limiter.acquire().await);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_failures_spread_out_do_not_cool_down() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig::default());

        for _ in 0..5 {
            limiter.record_failure().await;
            tokio::time::advance(Duration::from_secs(3)).await;
        }

        assert_eq!(limiter.stats().await.cooldown_remaining_ms, 0);
    }

    #[tokio::test]
    async fn test_caps_never_fall_below_floor() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig::default());

        for _ in 0..50 {
            limiter.record_failure().await;
        }

        let stats = limiter.stats().await;
        assert_eq!(stats.current_per_second, 1);
        assert_eq!(stats.current_per_minute, 10);
        assert_eq!(stats.current_per_hour, 100);
    }

    #[tokio::test]
    async fn test_set_cooldown_blocks_then_clears() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(fixed(5));

        limiter.set_cooldown(Duration::from_secs(5)).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(5));

        limiter.set_cooldown(Duration::from_secs(30)).await;
        limiter.set_cooldown(Duration::from_secs(1)).await;
        limiter.set_cooldown(Duration::ZERO).await;
        assert!(limiter.stats().await.cooldown_remaining_ms > 29_000);

        limiter.clear_cooldown().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_short_retry_after_keeps_burst_cooldown() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(fixed(5));

        // Each failed 429 reports the failure, then its Retry-After.
        for _ in 0..5 {
            limiter.record_failure().await;
            limiter.set_cooldown(Duration::from_secs(1)).await;
        }

        let start = Instant::now();
        assert!(limiter.acquire().await);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_long_retry_after_extends_burst_cooldown() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(fixed(5));

        for _ in 0..5 {
            limiter.record_failure().await;
        }
        limiter.set_cooldown(Duration::from_secs(90)).await;

        let start = Instant::now();
        assert!(limiter.acquire().await);
        assert!(start.elapsed() >= Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_burst_failures_still_count_toward_failure_rate() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
            max_per_second: 10,
            cooldown: Duration::from_secs(5),
            ..RateLimitConfig::default()
        });

        for _ in 0..5 {
            limiter.record_failure().await;
        }
        assert_eq!(limiter.stats().await.current_per_second, 7);

        // Cooldown is over but the burst is still inside the one-minute window.
        tokio::time::advance(Duration::from_secs(6)).await;
        for _ in 0..11 {
            limiter.acquire().await;
        }

        let stats = limiter.stats().await;
        assert!((stats.last_failure_rate - 5.0 / 11.0).abs() < 1e-9);
        assert_eq!(stats.current_per_second, 4);
        assert_eq!(stats.rate_adjustments, 2);
    }

    #[tokio::test]
    async fn test_next_burst_needs_fresh_failures() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
            cooldown: Duration::from_secs(1),
            ..fixed(5)
        });

        for _ in 0..5 {
            limiter.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..4 {
            limiter.record_failure().await;
        }

        let stats = limiter.stats().await;
        assert_eq!(stats.rate_adjustments, 1);
        assert_eq!(stats.cooldown_remaining_ms, 0);
    }

    // ==================== Adaptation Tests ====================

    #[tokio::test]
    async fn test_low_failure_rate_raises_caps_back() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
            max_per_second: 10,
            ..RateLimitConfig::default()
        });

        for _ in 0..5 {
            limiter.record_failure().await;
        }
        assert_eq!(limiter.stats().await.current_per_second, 7);

        // Let both the cooldown and the failure window pass.
        tokio::time::advance(Duration::from_secs(61)).await;

        for _ in 0..21 {
            limiter.acquire().await;
        }

        let stats = limiter.stats().await;
        assert_eq!(stats.current_per_second, 8);
        assert_eq!(stats.rate_adjustments, 2);
        assert!(stats.last_failure_rate < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_high_failure_rate_lowers_caps_after_ten_requests() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(adaptive(20));

        // Four failures stay under the burst threshold.
        for _ in 0..4 {
            limiter.record_failure().await;
        }
        for _ in 0..10 {
            limiter.acquire().await;
        }

        let stats = limiter.stats().await;
        assert_eq!(stats.current_per_second, 20);
        assert_eq!(stats.rate_adjustments, 0);
        assert!(stats.last_failure_rate < f64::EPSILON);

        limiter.acquire().await;

        let stats = limiter.stats().await;
        assert!((stats.last_failure_rate - 4.0 / 11.0).abs() < 1e-9);
        assert_eq!(stats.current_per_second, 14);
        assert_eq!(stats.current_per_minute, 70);
        assert_eq!(stats.current_per_hour, 700);
        assert_eq!(stats.rate_adjustments, 1);
        assert_eq!(stats.cooldown_remaining_ms, 0);
    }

    #[tokio::test]
    async fn test_moderate_failure_rate_leaves_caps_alone() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(adaptive(20));

        // 3 of 15 is 20 %: neither above 30 % nor below 5 %.
        for _ in 0..3 {
            limiter.record_failure().await;
        }
        for _ in 0..15 {
            limiter.acquire().await;
        }

        let stats = limiter.stats().await;
        assert!((stats.last_failure_rate - 0.2).abs() < 1e-9);
        assert_eq!(stats.current_per_second, 20);
        assert_eq!(stats.rate_adjustments, 0);
    }

    #[tokio::test]
    async fn test_raise_needs_more_than_twenty_requests() {
        tokio::time::pause();
        let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
            max_per_second: 10,
            ..RateLimitConfig::default()
        });

        for _ in 0..5 {
            limiter.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        for _ in 0..20 {
            limiter.acquire().await;
        }
        let stats = limiter.stats().await;
        assert_eq!(stats.current_per_second, 7);
        assert_eq!(stats.rate_adjustments, 1);

        limiter.acquire().await;
        assert_eq!(limiter.stats().await.current_per_second, 8);
    }

    #[test]
    fn test_scale_up_grows_by_at_least_one() {
        assert_eq!(scale_up(1, 2), 2);
        assert_eq!(scale_up(2, 2), 2);
        assert_eq!(scale_up(10, 100), 12);
        assert_eq!(scale_up(99, 100), 100);
    }

    #[test]
    fn test_scale_down_respects_floor() {
        assert_eq!(scale_down(2, 1), 1);
        assert_eq!(scale_down(30, 10), 21);
        assert_eq!(scale_down(12, 10), 10);
        assert_eq!(scale_down(5, 0), 3);
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_rejects_negative_and_garbage() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("later"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let past = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past), Some(Duration::ZERO));

        let future = httpdate::fmt_http_date(std::time::SystemTime::now() + Duration::from_secs(60));
        let delay = parse_retry_after(&future).unwrap();
        assert!(delay >= Duration::from_secs(55) && delay <= Duration::from_secs(61));
    }
}
