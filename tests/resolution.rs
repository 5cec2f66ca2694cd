//! Entity resolution through the cache: coalescing, expiry, fallback.

use async_trait::async_trait;
use discord_lens::cache::ResolutionCache;
use discord_lens::config::CacheConfig;
use discord_lens::resolve::EntityResolver;
use discord_lens::resolver::{LookupContext, Outcome, ResolverChain, Strategy};
use discord_lens_core::{EntityKind, EntityRecord, Snowflake};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers every lookup after a short delay and counts calls.
struct Slow {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl Strategy for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn attempt(&self, kind: EntityKind, id: &Snowflake, _ctx: &LookupContext) -> Outcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Outcome::Found(EntityRecord {
            id: id.clone(),
            kind,
            display_name: format!("fetch-{}", n),
            secondary_name: None,
            image_ref: None,
            discriminator: None,
            synthetic: false,
        })
    }
}

struct Flaky;

#[async_trait]
impl Strategy for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn attempt(&self, _kind: EntityKind, _id: &Snowflake, _ctx: &LookupContext) -> Outcome {
        Outcome::Transient("connection reset".into())
    }
}

fn slow_cache(calls: &Arc<AtomicUsize>, ttl: Duration) -> ResolutionCache {
    let chain = ResolverChain::new(EntityKind::User, Duration::from_secs(5)).with(Arc::new(Slow {
        calls: Arc::clone(calls),
        delay: Duration::from_millis(100),
    }));
    ResolutionCache::new(chain, ttl, 100)
}

fn id(s: &str) -> Snowflake {
    Snowflake::parse(s).unwrap()
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(slow_cache(&calls, Duration::from_secs(60)));
    let target = id("80351110224678912");

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = Arc::clone(&cache);
        let target = target.clone();
        handles.push(tokio::spawn(async move {
            cache.resolve(&target, &LookupContext::default()).await
        }));
    }
    let mut records = Vec::new();
    for h in handles {
        records.push(h.await.unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(records.iter().all(|r| r == &records[0]));
    assert_eq!(records[0].display_name, "fetch-1");
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test]
async fn test_expired_entry_refetches_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(slow_cache(&calls, Duration::from_millis(300)));
    let target = id("80351110224678912");
    let ctx = LookupContext::default();

    assert_eq!(cache.resolve(&target, &ctx).await.display_name, "fetch-1");
    assert_eq!(cache.resolve(&target, &ctx).await.display_name, "fetch-1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let (a, b) = tokio::join!(cache.resolve(&target, &ctx), cache.resolve(&target, &ctx));
    assert_eq!(a.display_name, "fetch-2");
    assert_eq!(a, b);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_distinct_ids_fetch_independently() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = slow_cache(&calls, Duration::from_secs(60));
    let ctx = LookupContext::default();

    let a = id("80351110224678912");
    let b = id("80351110224678913");
    let (ra, rb) = tokio::join!(cache.resolve(&a, &ctx), cache.resolve(&b, &ctx));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(ra.id, a);
    assert_eq!(rb.id, b);
    assert_eq!(cache.stats().total, 2);
}

#[tokio::test]
async fn test_all_sources_failing_yields_stable_fallback() {
    let chain = || {
        ResolverChain::new(EntityKind::User, Duration::from_secs(1))
            .with(Arc::new(Flaky))
            .with(Arc::new(Flaky))
    };
    let resolver = EntityResolver::new(
        chain(),
        ResolverChain::new(EntityKind::Guild, Duration::from_secs(1)),
        ResolverChain::new(EntityKind::Channel, Duration::from_secs(1)),
        &CacheConfig::default(),
    );
    let ctx = LookupContext::default();

    let first = resolver
        .resolve(EntityKind::User, "000000000000000001", &ctx)
        .await
        .unwrap();
    assert!(first.synthetic);
    assert_eq!(first.display_name, "Epic Gamer");
    assert_eq!(first.secondary_name.as_deref(), Some("EpicGamer0001"));
    assert_eq!(first.full_username(), "@EpicGamer0001");

    resolver.clear();
    let second = resolver
        .resolve(EntityKind::User, "000000000000000001", &ctx)
        .await
        .unwrap();
    assert_eq!(first, second);

    let guild = resolver
        .resolve(EntityKind::Guild, "80351110224678912", &ctx)
        .await
        .unwrap();
    assert_eq!(guild.display_name, "Server 8912");
}
