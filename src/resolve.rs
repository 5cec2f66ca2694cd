//! Entity resolver: one [`ResolutionCache`] per entity kind behind a
//! single entry point that validates ids before any I/O.

use discord_lens_core::{EntityKind, EntityRecord, Error, Result, Snowflake};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::{CacheStats, ResolutionCache};
use crate::config::{CacheConfig, DiscordConfig, SourceKind};
use crate::discord::{BotStrategy, Cdn, DiscordClient, PublicStrategy, WidgetStrategy};
use crate::resolver::{LookupContext, ResolverChain, Strategy};

/// Largest batch accepted by [`EntityResolver::resolve_many`].
pub const MAX_BATCH: usize = 50;

/// Cache counters for every kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResolverStats {
    pub users: CacheStats,
    pub guilds: CacheStats,
    pub channels: CacheStats,
}

pub struct EntityResolver {
    users: ResolutionCache,
    guilds: ResolutionCache,
    channels: ResolutionCache,
}

impl EntityResolver {
    /// Assemble a resolver from already-built chains.
    pub fn new(users: ResolverChain, guilds: ResolverChain, channels: ResolverChain, cache: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(cache.ttl_secs);
        Self {
            users: ResolutionCache::new(users, ttl, cache.max_entries),
            guilds: ResolutionCache::new(guilds, ttl, cache.max_entries),
            channels: ResolutionCache::new(channels, ttl, cache.max_entries),
        }
    }

    /// Build chains from the configured source lists.
    ///
    /// Fails with [`Error::Config`] when a listed source cannot be
    /// constructed, e.g. `bot` without a token.
    pub fn from_config(discord: &DiscordConfig, cache: &CacheConfig) -> Result<Self> {
        let client = Arc::new(DiscordClient::from_config(discord)?);
        let timeout = Duration::from_secs(discord.request_timeout_secs);

        let build = |kind: EntityKind, sources: Vec<SourceKind>| -> Result<ResolverChain> {
            let mut chain = ResolverChain::new(kind, timeout);
            for source in sources {
                let strategy: Arc<dyn Strategy> = match source {
                    SourceKind::Bot => Arc::new(BotStrategy::new(Arc::clone(&client))?),
                    SourceKind::Public => Arc::new(PublicStrategy::new(Arc::clone(&client))),
                    SourceKind::Widget => Arc::new(WidgetStrategy::new(Arc::clone(&client))),
                };
                chain = chain.with(strategy);
            }
            info!(%kind, sources = ?chain.strategy_names(), "resolver chain ready");
            Ok(chain)
        };

        Ok(Self::new(
            build(EntityKind::User, discord.user_sources())?,
            build(EntityKind::Guild, discord.guild_sources())?,
            build(EntityKind::Channel, discord.channel_sources())?,
            cache,
        ))
    }

    pub fn cache(&self, kind: EntityKind) -> &ResolutionCache {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Guild => &self.guilds,
            EntityKind::Channel => &self.channels,
        }
    }

    /// Resolve a raw id. Only a malformed id is an error.
    pub async fn resolve(&self, kind: EntityKind, id: &str, ctx: &LookupContext) -> Result<EntityRecord> {
        let id = Snowflake::parse(id)?;
        Ok(self.cache(kind).resolve(&id, ctx).await)
    }

    /// Resolve up to [`MAX_BATCH`] ids concurrently, in input order.
    ///
    /// Every id is validated before any lookup starts.
    pub async fn resolve_many(&self, kind: EntityKind, ids: &[String], ctx: &LookupContext) -> Result<Vec<EntityRecord>> {
        if ids.len() > MAX_BATCH {
            return Err(Error::Validation(format!(
                "at most {} ids per batch, got {}",
                MAX_BATCH,
                ids.len()
            )));
        }
        let ids = ids
            .iter()
            .map(|s| Snowflake::parse(s))
            .collect::<Result<Vec<_>>>()?;
        let cache = self.cache(kind);
        Ok(join_all(ids.iter().map(|id| cache.resolve(id, ctx))).await)
    }

    pub fn invalidate(&self, kind: EntityKind, id: &Snowflake) {
        self.cache(kind).invalidate(id);
    }

    pub fn clear(&self) {
        for kind in EntityKind::ALL {
            self.cache(kind).clear();
        }
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            users: self.users.stats(),
            guilds: self.guilds.stats(),
            channels: self.channels.stats(),
        }
    }
}

/// `dlens resolve`: look one entity up and print it.
pub async fn run_resolve(
    resolver: &EntityResolver,
    cdn: &Cdn,
    kind: EntityKind,
    id: &str,
    guild_id: Option<&str>,
) -> anyhow::Result<()> {
    let ctx = match guild_id {
        Some(gid) => LookupContext::in_guild(Snowflake::parse(gid)?),
        None => LookupContext::default(),
    };
    let record = resolver.resolve(kind, id, &ctx).await?;

    println!("--- {} {} ---", kind, record.id);
    println!("display_name: {}", record.display_name);
    if kind == EntityKind::User {
        println!("username:     {}", record.full_username());
    }
    if let Some(url) = cdn.image_url(&record) {
        println!("image:        {}", url);
    }
    if let Some(created) = record.id.created_at() {
        println!(
            "created_at:   {}",
            created.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        );
    }
    println!(
        "source:       {}",
        if record.synthetic { "fallback" } else { "discord" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline() -> EntityResolver {
        EntityResolver::from_config(&DiscordConfig::default(), &CacheConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_bad_id_before_lookup() {
        let resolver = offline();
        let err = resolver
            .resolve(EntityKind::User, "12345", &LookupContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(resolver.stats().users.fetches, 0);
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let resolver = EntityResolver::new(
            ResolverChain::new(EntityKind::User, Duration::from_secs(1)),
            ResolverChain::new(EntityKind::Guild, Duration::from_secs(1)),
            ResolverChain::new(EntityKind::Channel, Duration::from_secs(1)),
            &CacheConfig::default(),
        );
        let too_many: Vec<String> = (0..51).map(|i| format!("8035111022467{:04}", i)).collect();
        assert!(matches!(
            resolver
                .resolve_many(EntityKind::User, &too_many, &LookupContext::default())
                .await,
            Err(Error::Validation(_))
        ));

        let ids = vec!["80351110224678912".to_string(), "80351110224678913".to_string()];
        let records = resolver
            .resolve_many(EntityKind::Channel, &ids, &LookupContext::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_str(), "80351110224678912");
        assert_eq!(records[1].display_name, "channel-8913");

        let mixed = vec!["80351110224678912".to_string(), "nope".to_string()];
        assert!(resolver
            .resolve_many(EntityKind::User, &mixed, &LookupContext::default())
            .await
            .is_err());
    }

    #[test]
    fn test_bot_source_without_token_is_config_error() {
        let discord = DiscordConfig {
            user_sources: Some(vec![SourceKind::Bot]),
            ..Default::default()
        };
        assert!(matches!(
            EntityResolver::from_config(&discord, &CacheConfig::default()),
            Err(Error::Config(_))
        ));
    }
}
