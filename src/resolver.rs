//! Resolver chain: ordered upstream lookup strategies for one entity kind.
//!
//! A [`ResolverChain`] tries each [`Strategy`] in priority order until one
//! returns [`Outcome::Found`]. `NotApplicable` and `Transient` outcomes
//! move on to the next strategy; `Fatal` stops the chain. When the chain
//! runs out (or stops), the deterministic fallback generator produces the
//! record, so [`ResolverChain::run`] always yields an [`EntityRecord`].
//!
//! ```text
//! bot ──▶ public ──▶ widget ──▶ fallback::generate
//!  │        │          │
//!  └─ Found └─ Found   └─ Found ──▶ record
//! ```
//!
//! Every attempt is bounded by the chain's per-attempt timeout. A strategy
//! that does not settle in time counts as `Transient`.
//!
//! The chain does no caching; see [`crate::cache::ResolutionCache`].

use async_trait::async_trait;
use discord_lens_core::{fallback, EntityKind, EntityRecord, Snowflake};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Extra information a strategy may use, such as the guild a user was
/// seen in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupContext {
    pub guild_id: Option<Snowflake>,
}

impl LookupContext {
    pub fn in_guild(guild_id: Snowflake) -> Self {
        Self {
            guild_id: Some(guild_id),
        }
    }
}

/// Result of one strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Found(EntityRecord),
    /// This source cannot answer for this id (not found, forbidden,
    /// unsupported kind). Try the next one.
    NotApplicable,
    /// Network error, timeout, or rate limit. Try the next one.
    Transient(String),
    /// The source is unusable (bad credentials). Abort the chain.
    Fatal(String),
}

/// One upstream source of entity data.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Source name for logs, e.g. `"bot"`.
    fn name(&self) -> &str;

    async fn attempt(&self, kind: EntityKind, id: &Snowflake, ctx: &LookupContext) -> Outcome;
}

/// Ordered strategies for a single [`EntityKind`].
pub struct ResolverChain {
    kind: EntityKind,
    strategies: Vec<Arc<dyn Strategy>>,
    attempt_timeout: Duration,
}

impl ResolverChain {
    pub fn new(kind: EntityKind, attempt_timeout: Duration) -> Self {
        Self {
            kind,
            strategies: Vec::new(),
            attempt_timeout,
        }
    }

    /// Append a strategy at the lowest priority.
    pub fn with(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try every strategy in order, then fall back. Never fails.
    pub async fn run(&self, id: &Snowflake, ctx: &LookupContext) -> EntityRecord {
        for strategy in &self.strategies {
            let attempt = strategy.attempt(self.kind, id, ctx);
            let outcome = match tokio::time::timeout(self.attempt_timeout, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Outcome::Transient(format!(
                    "no answer within {}ms",
                    self.attempt_timeout.as_millis()
                )),
            };

            match outcome {
                Outcome::Found(record) => {
                    debug!(kind = %self.kind, %id, source = strategy.name(), "resolved");
                    return record;
                }
                Outcome::NotApplicable => {
                    debug!(kind = %self.kind, %id, source = strategy.name(), "not applicable");
                }
                Outcome::Transient(reason) => {
                    warn!(kind = %self.kind, %id, source = strategy.name(), %reason, "transient failure");
                }
                Outcome::Fatal(reason) => {
                    error!(kind = %self.kind, %id, source = strategy.name(), %reason, "fatal failure, aborting chain");
                    break;
                }
            }
        }

        debug!(kind = %self.kind, %id, "using fallback identity");
        fallback::generate(self.kind, id)
    }
}
