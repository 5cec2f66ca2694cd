//! TOML configuration.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:7300"
//!
//! [cache]
//! ttl_secs = 300
//! max_entries = 1000
//!
//! [discord]
//! bot_token = ""                      # or DISCORD_BOT_TOKEN
//! user_sources = ["bot", "public", "widget"]
//! guild_sources = ["bot", "widget"]
//! channel_sources = ["bot", "widget"]
//! avatar_index = "snowflake"
//!
//! [index]
//! backend = "elasticsearch"
//! url = "http://localhost:9200"
//! index_name = "discord_messages"
//! ingest_policy = "fail_fast"
//! ```
//!
//! Every section is optional. Secrets left empty in the file are read from
//! `DISCORD_BOT_TOKEN`, `ELASTICSEARCH_API_KEY` and `ELASTICSEARCH_PASSWORD`.

use anyhow::{Context, Result};
use discord_lens_core::snowflake::AvatarIndexStrategy;
use discord_lens_core::IngestPolicy;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7300".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Soft limit: above this count expired entries are swept on insert.
    /// Fresh entries are never evicted, so the cache may exceed it.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_max_entries() -> usize {
    1000
}

/// Upstream lookup strategies, by config name.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Authenticated REST API. Needs a bot token.
    Bot,
    /// Unauthenticated REST API (users only).
    Public,
    /// Guild widget JSON.
    Widget,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Bot => "bot",
            SourceKind::Public => "public",
            SourceKind::Widget => "widget",
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_cdn_base")]
    pub cdn_base: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub avatar_index: AvatarIndexStrategy,
    #[serde(default)]
    pub user_sources: Option<Vec<SourceKind>>,
    #[serde(default)]
    pub guild_sources: Option<Vec<SourceKind>>,
    #[serde(default)]
    pub channel_sources: Option<Vec<SourceKind>>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            cdn_base: default_cdn_base(),
            bot_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            avatar_index: AvatarIndexStrategy::default(),
            user_sources: None,
            guild_sources: None,
            channel_sources: None,
        }
    }
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}
fn default_cdn_base() -> String {
    "https://cdn.discordapp.com".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}

impl DiscordConfig {
    pub fn has_token(&self) -> bool {
        self.bot_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Configured user sources, or `bot` (when a token is set) then `public`
    /// then `widget`.
    pub fn user_sources(&self) -> Vec<SourceKind> {
        self.user_sources
            .clone()
            .unwrap_or_else(|| self.with_bot(&[SourceKind::Public, SourceKind::Widget]))
    }

    pub fn guild_sources(&self) -> Vec<SourceKind> {
        self.guild_sources
            .clone()
            .unwrap_or_else(|| self.with_bot(&[SourceKind::Widget]))
    }

    pub fn channel_sources(&self) -> Vec<SourceKind> {
        self.channel_sources
            .clone()
            .unwrap_or_else(|| self.with_bot(&[SourceKind::Widget]))
    }

    fn with_bot(&self, rest: &[SourceKind]) -> Vec<SourceKind> {
        let mut sources = Vec::with_capacity(rest.len() + 1);
        if self.has_token() {
            sources.push(SourceKind::Bot);
        }
        sources.extend_from_slice(rest);
        sources
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Elasticsearch,
    Memory,
    None,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: IndexBackend,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cloud_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub ingest_policy: IngestPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            cloud_id: None,
            username: None,
            password: None,
            api_key: None,
            index_name: default_index_name(),
            batch_size: default_batch_size(),
            timeout_secs: default_index_timeout_secs(),
            ingest_policy: IngestPolicy::default(),
        }
    }
}

fn default_backend() -> IndexBackend {
    IndexBackend::None
}
fn default_index_name() -> String {
    "discord_messages".to_string()
}
fn default_batch_size() -> usize {
    1000
}
fn default_index_timeout_secs() -> u64 {
    30
}

impl Config {
    /// All defaults: no bot token, no search backend.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)?;
    apply_env(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Fill empty secrets from the environment.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    fn fill(slot: &mut Option<String>, value: Option<String>) {
        if slot.as_deref().map_or(true, str::is_empty) {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                *slot = Some(v);
            }
        }
    }
    fill(&mut config.discord.bot_token, lookup("DISCORD_BOT_TOKEN"));
    fill(&mut config.index.api_key, lookup("ELASTICSEARCH_API_KEY"));
    fill(&mut config.index.password, lookup("ELASTICSEARCH_PASSWORD"));
}

pub fn validate(config: &Config) -> Result<()> {
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if config.cache.max_entries == 0 {
        anyhow::bail!("cache.max_entries must be > 0");
    }
    if config.discord.request_timeout_secs == 0 {
        anyhow::bail!("discord.request_timeout_secs must be > 0");
    }
    if config.index.batch_size == 0 {
        anyhow::bail!("index.batch_size must be > 0");
    }
    if config.index.index_name.trim().is_empty() {
        anyhow::bail!("index.index_name must not be empty");
    }
    Ok(())
}
