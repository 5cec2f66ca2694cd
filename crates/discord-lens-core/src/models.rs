//! Core data models used throughout Discord Lens.
//!
//! Entity records are what the resolution cache hands to the UI layer;
//! message documents, queries, and results flow through the search index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::snowflake::Snowflake;

/// The three kinds of entity the resolver knows how to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Guild,
    Channel,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::User, EntityKind::Guild, EntityKind::Channel];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Guild => "guild",
            EntityKind::Channel => "channel",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" | "users" => Ok(EntityKind::User),
            "guild" | "guilds" | "server" => Ok(EntityKind::Guild),
            "channel" | "channels" => Ok(EntityKind::Channel),
            other => Err(Error::Validation(format!(
                "unknown entity kind '{}': use user, guild, or channel",
                other
            ))),
        }
    }
}

/// Display data for a user, guild, or channel.
///
/// Immutable once fetched. The cache replaces records wholesale and never
/// merges fields from two sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Snowflake,
    pub kind: EntityKind,
    /// Global name for users, name for guilds and channels.
    pub display_name: String,
    /// Username for users; absent for guilds and channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_name: Option<String>,
    /// Avatar or icon hash. `None` means "derive a default image".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    /// True when the record came from the deterministic fallback rather
    /// than an upstream source.
    #[serde(default)]
    pub synthetic: bool,
}

impl EntityRecord {
    /// `@name` for accounts on the new username system, `name#1234` for
    /// legacy accounts. Guilds and channels return their display name.
    pub fn full_username(&self) -> String {
        let name = self.secondary_name.as_deref().unwrap_or(&self.display_name);
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d.bytes().any(|b| b != b'0') => {
                format!("{}#{}", name, d)
            }
            _ if self.kind == EntityKind::User => format!("@{}", name),
            _ => self.display_name.clone(),
        }
    }
}

/// A single archived Discord message as stored in the search index.
///
/// `message_id` is the document key: re-ingesting the same id overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDocument {
    pub message_id: String,
    pub content: String,
    pub author_id: String,
    pub channel_id: String,
    pub guild_id: String,
    /// ISO 8601 / RFC 3339 string, `yyyy-MM-dd HH:mm:ss.SSS±hh:mm`, or
    /// epoch milliseconds.
    pub timestamp: String,
}

impl MessageDocument {
    /// A message is importable when all of its id fields are present.
    pub fn is_valid(&self) -> bool {
        !self.message_id.is_empty()
            && !self.author_id.is_empty()
            && !self.channel_id.is_empty()
            && !self.guild_id.is_empty()
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Text-match score, descending. Only meaningful with a text filter.
    Relevance,
    /// Timestamp descending, ties broken by message id.
    #[default]
    Recency,
}

impl FromStr for SortMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "relevance" | "score" => Ok(SortMode::Relevance),
            "recency" | "timestamp" | "time" => Ok(SortMode::Recency),
            other => Err(Error::Validation(format!(
                "unknown sort mode '{}': use relevance or recency",
                other
            ))),
        }
    }
}

/// User-supplied filters. Every present field narrows the result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

impl SearchFilters {
    /// Drop blank strings so `?author_id=` behaves like an absent filter.
    pub fn normalized(self) -> Self {
        fn keep(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            text: keep(self.text),
            author_id: keep(self.author_id),
            channel_id: keep(self.channel_id),
            guild_id: keep(self.guild_id),
        }
    }
}

/// A fully paginated query, ready for the query builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub filters: SearchFilters,
    pub offset: usize,
    pub limit: usize,
    pub sort: SortMode,
}

/// One matching message, with its score and highlight when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub message: MessageDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Best-matching content fragment with matches wrapped in `<em>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
}

/// A page of results plus the size of the full matching set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub documents: Vec<SearchHit>,
    /// Matches across the whole corpus, independent of the page window.
    pub total: u64,
    pub elapsed_ms: u64,
}

/// Index-wide counts. The three `unique_*` values are approximate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_messages: u64,
    pub unique_authors: u64,
    pub unique_channels: u64,
    pub unique_guilds: u64,
}

/// Result of a health check. Never an error: an unreachable store is a
/// `healthy: false` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
