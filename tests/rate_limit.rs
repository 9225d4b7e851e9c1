//! Timing tests for the shared rate limiter under concurrent callers.
//!
//! All tests run on a paused clock, so the asserted delays are exact.

use std::sync::Arc;
use std::time::Duration;

use mediafetch_core::download::{AdaptiveRateLimiter, RateLimitConfig, RateLimitMode};
use tokio::time::Instant;

fn fixed(per_second: u32) -> RateLimitConfig {
    RateLimitConfig {
        mode: RateLimitMode::Fixed,
        max_per_second: per_second,
        ..RateLimitConfig::default()
    }
}

/// Grants `count` concurrent permits and returns their offsets from start,
/// sorted.
async fn grant_times(limiter: Arc<AdaptiveRateLimiter>, count: usize) -> Vec<Duration> {
    let start = Instant::now();
    let handles: Vec<_> = (0..count)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                assert!(limiter.acquire().await);
                start.elapsed()
            })
        })
        .collect();

    let mut times = Vec::with_capacity(count);
    for handle in handles {
        times.push(handle.await.unwrap());
    }
    times.sort();
    times
}

#[tokio::test(start_paused = true)]
async fn test_ten_concurrent_acquires_at_two_per_second() {
    let limiter = Arc::new(AdaptiveRateLimiter::new(fixed(2)));

    let times = grant_times(Arc::clone(&limiter), 10).await;

    assert!(*times.last().unwrap() >= Duration::from_secs(4));
    // No one-second window ever holds more than two grants.
    for pair in times.windows(3) {
        assert!(pair[2] - pair[0] >= Duration::from_secs(1), "{times:?}");
    }

    let stats = limiter.stats().await;
    assert_eq!(stats.total_requests, 10);
    assert_eq!(stats.blocked_requests, 8);
}

#[tokio::test(start_paused = true)]
async fn test_minute_cap_binds_after_second_cap() {
    let limiter = Arc::new(AdaptiveRateLimiter::new(RateLimitConfig {
        max_per_minute: 4,
        ..fixed(10)
    }));

    let times = grant_times(limiter, 5).await;

    assert!(times[3] < Duration::from_millis(10));
    assert!(times[4] >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_five_failures_cool_down_every_caller() {
    let limiter = Arc::new(AdaptiveRateLimiter::new(fixed(10)));

    for _ in 0..5 {
        limiter.record_failure().await;
    }
    assert!(limiter.stats().await.cooldown_remaining_ms >= 59_000);

    let times = grant_times(limiter, 3).await;
    assert!(times.iter().all(|t| *t >= Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_cooldown_pauses_callers() {
    let limiter = Arc::new(AdaptiveRateLimiter::new(fixed(10)));
    limiter.set_cooldown(Duration::from_secs(7)).await;

    let times = grant_times(limiter, 2).await;
    assert!(times[0] >= Duration::from_secs(7));
    assert!(times[1] < Duration::from_secs(8));
}
