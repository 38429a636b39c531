//! Per-server message rate limiting
//!
//! Interval/burst limiter: at most `burst` messages pass within each
//! `interval`. Messages over the limit are dropped and counted; the count of a
//! finished window is logged once, when the next window opens.
//!
//! Thread-safe: sessions of the same server submit through one limiter from
//! different worker threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default burst size per interval
pub const DEFAULT_BURST: u32 = 10_000;

/// Limiter settings
///
/// An `interval` of zero disables limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub interval: Duration,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            burst: DEFAULT_BURST,
        }
    }
}

#[derive(Debug, Default)]
struct Window {
    start: Option<Instant>,
    passed: u32,
    dropped: u64,
}

/// Interval/burst rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    window: Mutex<Window>,
    total_dropped: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter; `name` identifies it in log records
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            window: Mutex::new(Window::default()),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Limiter that lets everything through
    pub fn unlimited(name: impl Into<String>) -> Self {
        Self::new(name, RateLimitConfig::default())
    }

    /// Whether limiting is active
    pub fn is_enabled(&self) -> bool {
        !self.config.interval.is_zero()
    }

    /// Admit one message now
    #[inline]
    pub fn check(&self) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.check_at(Instant::now())
    }

    /// Admit one message at `now`
    pub fn check_at(&self, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut window = self.window.lock();
        let expired = match window.start {
            None => true,
            Some(start) => now.saturating_duration_since(start) >= self.config.interval,
        };

        if expired {
            if window.dropped > 0 {
                tracing::warn!(
                    limiter = %self.name,
                    dropped = window.dropped,
                    "rate limit exceeded, messages lost"
                );
            }
            *window = Window {
                start: Some(now),
                passed: 0,
                dropped: 0,
            };
        }

        if window.passed < self.config.burst {
            window.passed += 1;
            return true;
        }

        window.dropped += 1;
        self.total_dropped.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Messages dropped since creation
    pub fn dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}
