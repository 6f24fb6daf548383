//! Backoff between consecutive failures inside one worker run.
//!
//! 連続失敗のたびに待ち時間を倍にし、`cap` で頭打ちにする。`disabled()` なら常に 0。

use std::time::Duration;

/// Exponential backoff with a ceiling.
///
/// `delay = min(base * multiplier^(n - 1), cap)` for the n-th consecutive
/// failure. No delay when disabled or when nothing has failed yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub enabled: bool,
    pub base: Duration,
    pub cap: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            enabled: true,
            base,
            cap,
            multiplier: 2.0,
        }
    }

    /// API-backed stages: 2s doubling up to a minute.
    pub fn api() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(60))
    }

    /// Page scraping: slower start, same ceiling.
    pub fn scraping() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::api()
        }
    }

    /// Delay after the `consecutive_failures`-th failure in a row.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if !self.enabled || consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = consecutive_failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap_secs = self.cap.as_secs_f64();
        let secs = (self.base.as_secs_f64() * self.multiplier.powi(exponent)).min(cap_secs);
        Duration::from_secs_f64(secs)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::api()
    }
}
