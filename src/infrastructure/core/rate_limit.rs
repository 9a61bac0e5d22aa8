use chrono::{NaiveDate, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket gating per-provider request rate. Capacity is expressed
/// in requests per minute and refills continuously.
pub struct TokenBucket {
    inner: Mutex<BucketInner>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketInner {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            inner: Mutex::new(BucketInner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    /// Takes one token if available. Non-blocking: callers decide whether
    /// to wait, serve stale, or fail.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("bucket lock poisoned");

        let elapsed = inner.last_refill.elapsed().as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        inner.last_refill = Instant::now();

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until a token becomes available, for callers that choose to wait.
    pub fn time_to_next_token(&self) -> Duration {
        let inner = self.inner.lock().expect("bucket lock poisoned");
        if inner.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - inner.tokens;
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }
}

/// Per-day request cap. The counter resets on the first consume of a new
/// UTC day.
pub struct DailyBudget {
    inner: Mutex<DailyInner>,
    limit: u32,
}

struct DailyInner {
    used: u32,
    day: NaiveDate,
}

impl DailyBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            inner: Mutex::new(DailyInner {
                used: 0,
                day: Utc::now().date_naive(),
            }),
            limit,
        }
    }

    pub fn try_consume(&self) -> bool {
        let mut inner = self.inner.lock().expect("budget lock poisoned");
        let today = Utc::now().date_naive();
        if inner.day != today {
            inner.day = today;
            inner.used = 0;
        }
        if inner.used >= self.limit {
            return false;
        }
        inner.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.inner.lock().expect("budget lock poisoned").used
    }

    pub fn remaining(&self) -> u32 {
        let inner = self.inner.lock().expect("budget lock poisoned");
        self.limit.saturating_sub(inner.used)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}
