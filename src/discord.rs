//! Discord REST lookup strategies and CDN URL helpers.
//!
//! | Strategy | Endpoint | Kinds |
//! |----------|----------|-------|
//! | [`BotStrategy`] | `GET /users/{id}`, `/guilds/{id}`, `/channels/{id}` with `Authorization: Bot` | all |
//! | [`PublicStrategy`] | `GET /users/{id}`, no credentials | users |
//! | [`WidgetStrategy`] | `GET /guilds/{gid}/widget.json` | guilds; users and channels with a guild context |
//!
//! Response mapping, shared by all strategies:
//!
//! - `2xx` → parse payload ([`Outcome::Found`], or `NotApplicable` if it has no usable name)
//! - `404`, `403`, other `4xx` → [`Outcome::NotApplicable`]
//! - `401` → [`Outcome::Fatal`]
//! - `429`, `5xx`, network error, client timeout → [`Outcome::Transient`]

use async_trait::async_trait;
use discord_lens_core::snowflake::AvatarIndexStrategy;
use discord_lens_core::{EntityKind, EntityRecord, Error, Result, Snowflake};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DiscordConfig;
use crate::resolver::{LookupContext, Outcome, Strategy};

const USER_AGENT: &str = concat!("DiscordBot (https://github.com/discord-lens, ", env!("CARGO_PKG_VERSION"), ")");

/// Shared HTTP client for all Discord strategies.
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl DiscordClient {
    pub fn from_config(config: &DiscordConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// GET `path` and decode the JSON body, or return the outcome the
    /// response maps to.
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str, authenticated: bool) -> std::result::Result<T, Outcome> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self.http.get(&url);
        if authenticated {
            match &self.token {
                Some(token) => request = request.header("Authorization", format!("Bot {}", token)),
                None => return Err(Outcome::Fatal("bot token not configured".into())),
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| Outcome::Transient(format!("GET {}: {}", path, e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| Outcome::Transient(format!("GET {}: bad payload: {}", path, e)));
        }
        Err(classify(status, path))
    }
}

fn classify(status: StatusCode, path: &str) -> Outcome {
    match status {
        StatusCode::UNAUTHORIZED => Outcome::Fatal(format!("GET {}: {}", path, status)),
        StatusCode::TOO_MANY_REQUESTS => Outcome::Transient(format!("GET {}: rate limited", path)),
        s if s.is_server_error() => Outcome::Transient(format!("GET {}: {}", path, s)),
        _ => Outcome::NotApplicable,
    }
}

// ============ Payloads ============

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    discriminator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GuildPayload {
    id: String,
    name: String,
    #[serde(default)]
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelPayload {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WidgetPayload {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    members: Vec<WidgetMember>,
    #[serde(default)]
    channels: Vec<WidgetChannel>,
}

#[derive(Debug, Deserialize)]
struct WidgetMember {
    id: String,
    username: String,
    #[serde(default)]
    discriminator: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    nick: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WidgetChannel {
    id: String,
    name: String,
}

fn user_record(id: &Snowflake, p: UserPayload) -> Outcome {
    if p.id != id.as_str() {
        return Outcome::NotApplicable;
    }
    Outcome::Found(EntityRecord {
        id: id.clone(),
        kind: EntityKind::User,
        display_name: p.global_name.filter(|n| !n.is_empty()).unwrap_or_else(|| p.username.clone()),
        secondary_name: Some(p.username),
        image_ref: p.avatar,
        discriminator: p.discriminator,
        synthetic: false,
    })
}

fn guild_record(id: &Snowflake, p: GuildPayload) -> Outcome {
    if p.id != id.as_str() {
        return Outcome::NotApplicable;
    }
    Outcome::Found(EntityRecord {
        id: id.clone(),
        kind: EntityKind::Guild,
        display_name: p.name,
        secondary_name: None,
        image_ref: p.icon,
        discriminator: None,
        synthetic: false,
    })
}

fn channel_record(id: &Snowflake, name: String) -> Outcome {
    Outcome::Found(EntityRecord {
        id: id.clone(),
        kind: EntityKind::Channel,
        display_name: name,
        secondary_name: None,
        image_ref: None,
        discriminator: None,
        synthetic: false,
    })
}

fn into_outcome(result: std::result::Result<Outcome, Outcome>) -> Outcome {
    result.unwrap_or_else(|outcome| outcome)
}

// ============ Strategies ============

/// Authenticated lookups with a bot token.
pub struct BotStrategy {
    client: Arc<DiscordClient>,
}

impl BotStrategy {
    /// Fails with [`Error::Config`] when the client has no token.
    pub fn new(client: Arc<DiscordClient>) -> Result<Self> {
        if !client.has_token() {
            return Err(Error::Config(
                "the 'bot' source needs discord.bot_token or DISCORD_BOT_TOKEN".into(),
            ));
        }
        Ok(Self { client })
    }
}

#[async_trait]
impl Strategy for BotStrategy {
    fn name(&self) -> &str {
        "bot"
    }

    async fn attempt(&self, kind: EntityKind, id: &Snowflake, _ctx: &LookupContext) -> Outcome {
        let result = match kind {
            EntityKind::User => self
                .client
                .get_json::<UserPayload>(&format!("/users/{}", id), true)
                .await
                .map(|p| user_record(id, p)),
            EntityKind::Guild => self
                .client
                .get_json::<GuildPayload>(&format!("/guilds/{}", id), true)
                .await
                .map(|p| guild_record(id, p)),
            EntityKind::Channel => self
                .client
                .get_json::<ChannelPayload>(&format!("/channels/{}", id), true)
                .await
                .map(|p| match p.name {
                    Some(name) if p.id == id.as_str() => channel_record(id, name),
                    _ => Outcome::NotApplicable,
                }),
        };
        into_outcome(result)
    }
}

/// Unauthenticated user lookup. Works for some users only.
pub struct PublicStrategy {
    client: Arc<DiscordClient>,
}

impl PublicStrategy {
    pub fn new(client: Arc<DiscordClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Strategy for PublicStrategy {
    fn name(&self) -> &str {
        "public"
    }

    async fn attempt(&self, kind: EntityKind, id: &Snowflake, _ctx: &LookupContext) -> Outcome {
        if kind != EntityKind::User {
            return Outcome::NotApplicable;
        }
        into_outcome(
            self.client
                .get_json::<UserPayload>(&format!("/users/{}", id), false)
                .await
                .map(|p| user_record(id, p)),
        )
    }
}

/// Guild widget lookup. Only works for guilds with the widget enabled.
pub struct WidgetStrategy {
    client: Arc<DiscordClient>,
}

impl WidgetStrategy {
    pub fn new(client: Arc<DiscordClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Strategy for WidgetStrategy {
    fn name(&self) -> &str {
        "widget"
    }

    async fn attempt(&self, kind: EntityKind, id: &Snowflake, ctx: &LookupContext) -> Outcome {
        let guild_id = match (kind, &ctx.guild_id) {
            (EntityKind::Guild, _) => id,
            (_, Some(gid)) => gid,
            (_, None) => return Outcome::NotApplicable,
        };

        let widget = match self
            .client
            .get_json::<WidgetPayload>(&format!("/guilds/{}/widget.json", guild_id), false)
            .await
        {
            Ok(w) => w,
            Err(outcome) => return outcome,
        };
        if widget.id.as_deref().is_some_and(|wid| wid != guild_id.as_str()) {
            return Outcome::NotApplicable;
        }

        match kind {
            EntityKind::Guild => Outcome::Found(EntityRecord {
                id: id.clone(),
                kind: EntityKind::Guild,
                display_name: widget.name,
                secondary_name: None,
                image_ref: None,
                discriminator: None,
                synthetic: false,
            }),
            EntityKind::User => widget
                .members
                .into_iter()
                .find(|m| m.id == id.as_str())
                .map(|m| {
                    Outcome::Found(EntityRecord {
                        id: id.clone(),
                        kind: EntityKind::User,
                        display_name: m.nick.unwrap_or_else(|| m.username.clone()),
                        secondary_name: Some(m.username),
                        image_ref: m.avatar,
                        discriminator: Some(m.discriminator.unwrap_or_else(|| "0000".into())),
                        synthetic: false,
                    })
                })
                .unwrap_or(Outcome::NotApplicable),
            EntityKind::Channel => widget
                .channels
                .into_iter()
                .find(|c| c.id == id.as_str())
                .map(|c| channel_record(id, c.name))
                .unwrap_or(Outcome::NotApplicable),
        }
    }
}

// ============ CDN ============

/// Builds image URLs for entity records.
#[derive(Debug, Clone)]
pub struct Cdn {
    base: String,
    avatar_index: AvatarIndexStrategy,
}

impl Cdn {
    pub fn new(base: &str, avatar_index: AvatarIndexStrategy) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            avatar_index,
        }
    }

    pub fn from_config(config: &DiscordConfig) -> Self {
        Self::new(&config.cdn_base, config.avatar_index)
    }

    /// Custom avatar when the record has a hash, default avatar otherwise.
    pub fn avatar_url(&self, record: &EntityRecord, size: u32) -> String {
        match &record.image_ref {
            Some(hash) => format!(
                "{}/avatars/{}/{}.{}?size={}",
                self.base,
                record.id,
                hash,
                extension(hash),
                size
            ),
            None => self.default_avatar_url(&record.id, record.discriminator.as_deref()),
        }
    }

    pub fn default_avatar_url(&self, id: &Snowflake, discriminator: Option<&str>) -> String {
        format!(
            "{}/embed/avatars/{}.png",
            self.base,
            self.avatar_index.index(id, discriminator)
        )
    }

    /// Guild icon URL, or `None` when the guild has no icon.
    pub fn icon_url(&self, record: &EntityRecord, size: u32) -> Option<String> {
        record.image_ref.as_ref().map(|hash| {
            format!(
                "{}/icons/{}/{}.{}?size={}",
                self.base,
                record.id,
                hash,
                extension(hash),
                size
            )
        })
    }

    /// The image URL appropriate for the record's kind.
    pub fn image_url(&self, record: &EntityRecord) -> Option<String> {
        match record.kind {
            EntityKind::User => Some(self.avatar_url(record, 128)),
            EntityKind::Guild => self.icon_url(record, 64),
            EntityKind::Channel => None,
        }
    }
}

fn extension(hash: &str) -> &'static str {
    if hash.starts_with("a_") {
        "gif"
    } else {
        "png"
    }
}
