use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::types::Quote;

/// Cache tier drives both eviction priority and refresh cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Positions,
    Watchlist,
    Others,
}

impl CacheTier {
    pub fn priority(&self) -> u8 {
        match self {
            CacheTier::Positions => 100,
            CacheTier::Watchlist => 50,
            CacheTier::Others => 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub quote: Quote,
    pub fetched_at: Instant,
    pub ttl: Duration,
    pub tier: CacheTier,
}

impl CacheEntry {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        self.age() <= self.ttl
    }
}

/// Size-bounded quote cache with TTL and tiered-priority eviction.
///
/// When full, the entry with the lowest tier priority goes first; ties
/// are broken by the oldest fetch time. Not internally synchronized; the
/// live adapter owns it behind a lock.
pub struct QuoteCache {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl QuoteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn get(&mut self, symbol: &str) -> Option<CacheEntry> {
        match self.entries.get(symbol) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, quote: Quote, ttl: Duration, tier: CacheTier) {
        let symbol = quote.symbol.clone();
        if !self.entries.contains_key(&symbol) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(
            symbol,
            CacheEntry {
                quote,
                fetched_at: Instant::now(),
                ttl,
                tier,
            },
        );
    }

    /// Extends the TTL of an existing entry so a stale-but-usable quote
    /// survives a budget squeeze.
    pub fn extend(&mut self, symbol: &str, extra: Duration) {
        if let Some(entry) = self.entries.get_mut(symbol) {
            entry.ttl += extra;
        }
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.tier
                    .priority()
                    .cmp(&b.tier.priority())
                    .then(a.fetched_at.cmp(&b.fetched_at))
            })
            .map(|(symbol, _)| symbol.clone());

        if let Some(symbol) = victim {
            self.entries.remove(&symbol);
            self.evictions += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 1.0;
        }
        self.hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Session;
    use chrono::Utc;

    fn quote(symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid: 99.9,
            ask: 100.1,
            last: 100.0,
            volume: 10.0,
            timestamp: Utc::now(),
            session: Session::Rth,
            halted: false,
            source: "test".to_string(),
            staleness_ms: 0,
        }
    }

    const TTL: Duration = Duration::from_secs(5);

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut cache = QuoteCache::new(3);
        for symbol in ["A", "B", "C", "D", "E", "F"] {
            cache.insert(quote(symbol), TTL, CacheTier::Others);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.evictions(), 3);
    }

    #[test]
    fn test_lowest_priority_is_evicted_first() {
        let mut cache = QuoteCache::new(3);
        cache.insert(quote("POS"), TTL, CacheTier::Positions);
        cache.insert(quote("WATCH"), TTL, CacheTier::Watchlist);
        cache.insert(quote("OTHER"), TTL, CacheTier::Others);

        cache.insert(quote("NEW"), TTL, CacheTier::Watchlist);

        assert!(cache.get("POS").is_some());
        assert!(cache.get("WATCH").is_some());
        assert!(cache.get("NEW").is_some());
        assert!(cache.get("OTHER").is_none());
    }

    #[test]
    fn test_priority_tie_broken_by_oldest() {
        let mut cache = QuoteCache::new(2);
        cache.insert(quote("OLD"), TTL, CacheTier::Others);
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(quote("NEWER"), TTL, CacheTier::Others);

        cache.insert(quote("NEWEST"), TTL, CacheTier::Others);

        assert!(cache.get("OLD").is_none());
        assert!(cache.get("NEWER").is_some());
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut cache = QuoteCache::new(2);
        cache.insert(quote("A"), TTL, CacheTier::Others);
        cache.insert(quote("B"), TTL, CacheTier::Others);
        cache.insert(quote("A"), TTL, CacheTier::Others);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evictions(), 0);
    }

    #[test]
    fn test_freshness_and_extend() {
        let mut cache = QuoteCache::new(2);
        cache.insert(quote("A"), Duration::from_millis(10), CacheTier::Others);
        std::thread::sleep(Duration::from_millis(20));

        let entry = cache.get("A").expect("entry present");
        assert!(!entry.is_fresh());

        cache.extend("A", Duration::from_secs(60));
        let entry = cache.get("A").expect("entry present");
        assert!(entry.is_fresh());
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let mut cache = QuoteCache::new(2);
        cache.insert(quote("A"), TTL, CacheTier::Others);

        cache.get("A");
        cache.get("A");
        cache.get("MISSING");

        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 1);
        assert!((cache.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
