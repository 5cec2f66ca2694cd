//! Resolution cache: TTL entries plus in-flight request coalescing in
//! front of a [`ResolverChain`].
//!
//! `resolve(id)` does, under one lock and before any await point:
//!
//! 1. fresh entry for `id` → return it, no I/O;
//! 2. expired entry → drop it;
//! 3. in-flight fetch for `id` → join it;
//! 4. otherwise spawn the chain as a task and register it as in flight.
//!
//! The spawned task writes the entry and clears its in-flight slot when it
//! finishes, whether or not anybody is still waiting. Each fetch carries a
//! generation number so a fetch orphaned by [`ResolutionCache::invalidate`]
//! or [`ResolutionCache::clear`] neither removes a newer fetch's slot nor
//! writes a stale entry.
//!
//! Expiry is lazy. When an insert pushes the entry count past
//! `max_entries`, expired entries are swept. The limit is soft: fresh
//! entries are never evicted, so the cache can hold more than
//! `max_entries` until they expire.

use discord_lens_core::{fallback, EntityKind, EntityRecord, Snowflake};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::resolver::{LookupContext, ResolverChain};

type PendingFetch = Shared<BoxFuture<'static, EntityRecord>>;

struct CacheEntry {
    value: EntityRecord,
    fetched_at: Instant,
}

struct InFlight {
    generation: u64,
    fetch: PendingFetch,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Snowflake, CacheEntry>,
    in_flight: HashMap<Snowflake, InFlight>,
    next_generation: u64,
}

impl CacheState {
    fn sweep(&mut self, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.fetched_at.elapsed() < ttl);
        before - self.entries.len()
    }
}

/// Point-in-time counters for one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub fresh: usize,
    pub expired: usize,
    pub in_flight: usize,
    pub ttl_secs: u64,
    /// Chain runs started since construction.
    pub fetches: u64,
}

/// Per-kind resolution cache.
pub struct ResolutionCache {
    chain: Arc<ResolverChain>,
    ttl: Duration,
    max_entries: usize,
    state: Arc<Mutex<CacheState>>,
    fetches: AtomicU64,
}

impl ResolutionCache {
    pub fn new(chain: ResolverChain, ttl: Duration, max_entries: usize) -> Self {
        Self {
            chain: Arc::new(chain),
            ttl,
            max_entries: max_entries.max(1),
            state: Arc::new(Mutex::new(CacheState::default())),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.chain.kind()
    }

    pub fn chain(&self) -> &ResolverChain {
        &self.chain
    }

    /// Resolve `id` to a record. Never fails.
    ///
    /// Concurrent callers for the same id share one chain run. With a
    /// shared fetch the first caller's `ctx` is the one used.
    pub async fn resolve(&self, id: &Snowflake, ctx: &LookupContext) -> EntityRecord {
        let pending = {
            let mut state = self.state.lock();

            let expired = match state.entries.get(id) {
                Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                    debug!(kind = %self.kind(), %id, "cache hit");
                    return entry.value.clone();
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                state.entries.remove(id);
                debug!(kind = %self.kind(), %id, "cache entry expired");
            }

            let joined = state.in_flight.get(id).map(|f| f.fetch.clone());
            match joined {
                Some(fetch) => {
                    debug!(kind = %self.kind(), %id, "joining in-flight fetch");
                    fetch
                }
                None => self.start_fetch(&mut state, id, ctx),
            }
        };
        pending.await
    }

    /// Spawn the chain for `id` and register it. Caller holds the lock.
    fn start_fetch(&self, state: &mut CacheState, id: &Snowflake, ctx: &LookupContext) -> PendingFetch {
        let generation = state.next_generation;
        state.next_generation += 1;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(kind = %self.kind(), %id, generation, "cache miss, fetching");

        let chain = Arc::clone(&self.chain);
        let shared_state = Arc::clone(&self.state);
        let key = id.clone();
        let ctx = ctx.clone();
        let ttl = self.ttl;
        let max_entries = self.max_entries;

        let handle = tokio::spawn(async move {
            let record = chain.run(&key, &ctx).await;

            let mut state = shared_state.lock();
            let current = state
                .in_flight
                .get(&key)
                .is_some_and(|f| f.generation == generation);
            if current {
                state.in_flight.remove(&key);
                state.entries.insert(
                    key,
                    CacheEntry {
                        value: record.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                if state.entries.len() > max_entries {
                    let swept = state.sweep(ttl);
                    debug!(swept, remaining = state.entries.len(), "swept expired entries");
                }
            }
            record
        });

        let kind = self.kind();
        let fallback_id = id.clone();
        let fetch: BoxFuture<'static, EntityRecord> = async move {
            match handle.await {
                Ok(record) => record,
                Err(e) => {
                    error!(%kind, id = %fallback_id, error = %e, "resolver task failed");
                    fallback::generate(kind, &fallback_id)
                }
            }
        }
        .boxed();
        let fetch = fetch.shared();

        state.in_flight.insert(
            id.clone(),
            InFlight {
                generation,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    /// Drop the entry and in-flight tracker for `id`. A running fetch still
    /// answers its waiters but does not write the cache.
    pub fn invalidate(&self, id: &Snowflake) {
        let mut state = self.state.lock();
        state.entries.remove(id);
        state.in_flight.remove(id);
    }

    /// Drop every entry and in-flight tracker.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.in_flight.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let fresh = state
            .entries
            .values()
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .count();
        CacheStats {
            total: state.entries.len(),
            fresh,
            expired: state.entries.len() - fresh,
            in_flight: state.in_flight.len(),
            ttl_secs: self.ttl.as_secs(),
            fetches: self.fetches.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Outcome, Strategy};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Counts attempts and waits for a release signal before answering.
    struct Gated {
        calls: AtomicUsize,
        gate: Notify,
    }

    #[async_trait]
    impl Strategy for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        async fn attempt(&self, kind: EntityKind, id: &Snowflake, _: &LookupContext) -> Outcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            let mut record = fallback::generate(kind, id);
            record.display_name = format!("fetch-{}", n);
            record.synthetic = false;
            Outcome::Found(record)
        }
    }

    fn gated_cache(ttl: Duration, max_entries: usize) -> (ResolutionCache, Arc<Gated>) {
        let strategy = Arc::new(Gated {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
        });
        let chain = ResolverChain::new(EntityKind::User, Duration::from_secs(5)).with(strategy.clone());
        (ResolutionCache::new(chain, ttl, max_entries), strategy)
    }

    fn sf(s: &str) -> Snowflake {
        Snowflake::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_chain() {
        let (cache, strategy) = gated_cache(Duration::from_secs(60), 100);
        let id = sf("80351110224678912");
        strategy.gate.notify_one();
        let first = cache.resolve(&id, &LookupContext::default()).await;
        let second = cache.resolve(&id, &LookupContext::default()).await;
        assert_eq!(first, second);
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.total, stats.fresh, stats.in_flight), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_populates() {
        let (cache, strategy) = gated_cache(Duration::from_secs(60), 100);
        let cache = Arc::new(cache);
        let id = sf("80351110224678912");

        let waiter = {
            let cache = Arc::clone(&cache);
            let id = id.clone();
            tokio::spawn(async move { cache.resolve(&id, &LookupContext::default()).await })
        };
        while strategy.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        strategy.gate.notify_one();

        for _ in 0..200 {
            if cache.stats().total == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.stats().total, 1);
        assert_eq!(cache.stats().in_flight, 0);
        let record = cache.resolve(&id, &LookupContext::default()).await;
        assert_eq!(record.display_name, "fetch-0");
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_starts_new_one() {
        let (cache, strategy) = gated_cache(Duration::from_secs(60), 100);
        let cache = Arc::new(cache);
        let id = sf("80351110224678912");

        let first = {
            let cache = Arc::clone(&cache);
            let id = id.clone();
            tokio::spawn(async move { cache.resolve(&id, &LookupContext::default()).await })
        };
        while strategy.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        cache.invalidate(&id);
        assert_eq!(cache.stats().in_flight, 0);

        let second = {
            let cache = Arc::clone(&cache);
            let id = id.clone();
            tokio::spawn(async move { cache.resolve(&id, &LookupContext::default()).await })
        };
        while strategy.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        strategy.gate.notify_waiters();

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(first.display_name, "fetch-0");
        assert_eq!(second.display_name, "fetch-1");

        // Only the current fetch wrote the cache.
        let cached = cache.resolve(&id, &LookupContext::default()).await;
        assert_eq!(cached.display_name, "fetch-1");
    }

    #[tokio::test]
    async fn test_sweep_over_ceiling() {
        let (cache, strategy) = gated_cache(Duration::from_millis(30), 2);
        for raw in ["80351110224678912", "80351110224678913"] {
            strategy.gate.notify_one();
            cache.resolve(&sf(raw), &LookupContext::default()).await;
        }
        assert_eq!(cache.stats().total, 2);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.stats().expired, 2);

        strategy.gate.notify_one();
        cache
            .resolve(&sf("80351110224678914"), &LookupContext::default())
            .await;
        let stats = cache.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.fresh, 1);
    }

    #[tokio::test]
    async fn test_fresh_entries_exceed_soft_limit() {
        let (cache, strategy) = gated_cache(Duration::from_secs(60), 2);
        for raw in ["80351110224678912", "80351110224678913", "80351110224678914"] {
            strategy.gate.notify_one();
            cache.resolve(&sf(raw), &LookupContext::default()).await;
        }
        let stats = cache.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.fresh, 3);
    }

    #[tokio::test]
    async fn test_clear_forgets_everything() {
        let (cache, strategy) = gated_cache(Duration::from_secs(60), 100);
        let id = sf("80351110224678912");
        strategy.gate.notify_one();
        cache.resolve(&id, &LookupContext::default()).await;
        cache.clear();
        assert_eq!(cache.stats().total, 0);

        strategy.gate.notify_one();
        cache.resolve(&id, &LookupContext::default()).await;
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 2);
    }
}
