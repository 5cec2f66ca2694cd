//! Discord strategies against a fake Discord REST API.
//!
//! The fake serves a handful of fixed ids on an ephemeral port:
//!
//! | Path | Answer |
//! |------|--------|
//! | `/users/…912` | 200 user |
//! | `/users/…429` | 429 |
//! | `/users/…500` | 500 |
//! | anything with `Authorization: Bot wrong` | 401 |
//! | `/guilds/…000` (bot) | 200 guild |
//! | `/guilds/…000/widget.json` | 200 widget |
//! | other | 404 |

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use discord_lens::config::{CacheConfig, DiscordConfig, SourceKind};
use discord_lens::discord::Cdn;
use discord_lens::resolve::EntityResolver;
use discord_lens::resolver::LookupContext;
use discord_lens_core::{EntityKind, Snowflake};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const USER: &str = "80351110224678912";
const RATE_LIMITED: &str = "80351110224678429";
const BROKEN: &str = "80351110224678500";
const GUILD: &str = "80351110224670000";
const CHANNEL: &str = "80351110224678001";

#[derive(Clone, Default)]
struct Hits {
    anonymous_users: Arc<AtomicUsize>,
}

fn authorized(headers: &HeaderMap) -> Result<bool, StatusCode> {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bot test-token") => Ok(true),
        Some(_) => Err(StatusCode::UNAUTHORIZED),
        None => Ok(false),
    }
}

async fn user(State(hits): State<Hits>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    match authorized(&headers) {
        Err(status) => return status.into_response(),
        Ok(false) => {
            hits.anonymous_users.fetch_add(1, Ordering::SeqCst);
        }
        Ok(true) => {}
    }
    match id.as_str() {
        USER => Json(json!({
            "id": USER,
            "username": "lensuser",
            "global_name": "Lens User",
            "avatar": "a_1f2e3d",
            "discriminator": "0"
        }))
        .into_response(),
        RATE_LIMITED => StatusCode::TOO_MANY_REQUESTS.into_response(),
        BROKEN => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn guild(headers: HeaderMap, Path(id): Path<String>) -> Response {
    match authorized(&headers) {
        Ok(true) if id == GUILD => Json(json!({ "id": GUILD, "name": "Bot Guild", "icon": "cafe" })).into_response(),
        Ok(true) => StatusCode::NOT_FOUND.into_response(),
        Ok(false) => StatusCode::UNAUTHORIZED.into_response(),
        Err(status) => status.into_response(),
    }
}

async fn widget(Path(id): Path<String>) -> Response {
    if id != GUILD {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(json!({
        "id": GUILD,
        "name": "Lens Guild",
        "members": [
            { "id": RATE_LIMITED, "username": "widgetuser", "nick": "Widgy", "avatar": null }
        ],
        "channels": [
            { "id": CHANNEL, "name": "general" }
        ]
    }))
    .into_response()
}

async fn spawn_fake_discord() -> (String, Hits) {
    let hits = Hits::default();
    let app = Router::new()
        .route("/users/{id}", get(user))
        .route("/guilds/{id}", get(guild))
        .route("/guilds/{id}/widget.json", get(widget))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn discord_config(api_base: &str) -> DiscordConfig {
    DiscordConfig {
        api_base: api_base.to_string(),
        request_timeout_secs: 2,
        ..Default::default()
    }
}

fn in_guild() -> LookupContext {
    LookupContext::in_guild(Snowflake::parse(GUILD).unwrap())
}

#[tokio::test]
async fn test_public_lookup_found() {
    let (base, _hits) = spawn_fake_discord().await;
    let config = discord_config(&base);
    let resolver = EntityResolver::from_config(&config, &CacheConfig::default()).unwrap();

    let record = resolver
        .resolve(EntityKind::User, USER, &LookupContext::default())
        .await
        .unwrap();
    assert!(!record.synthetic);
    assert_eq!(record.display_name, "Lens User");
    assert_eq!(record.full_username(), "@lensuser");

    let cdn = Cdn::from_config(&config);
    assert_eq!(
        cdn.image_url(&record).unwrap(),
        format!("https://cdn.discordapp.com/avatars/{}/a_1f2e3d.gif?size=128", USER)
    );
}

#[tokio::test]
async fn test_unauthorized_bot_aborts_chain() {
    let (base, hits) = spawn_fake_discord().await;
    let config = DiscordConfig {
        bot_token: Some("wrong".into()),
        user_sources: Some(vec![SourceKind::Bot, SourceKind::Public]),
        ..discord_config(&base)
    };
    let resolver = EntityResolver::from_config(&config, &CacheConfig::default()).unwrap();

    let record = resolver
        .resolve(EntityKind::User, USER, &LookupContext::default())
        .await
        .unwrap();
    assert!(record.synthetic);
    assert_eq!(hits.anonymous_users.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rate_limit_falls_through_to_widget() {
    let (base, hits) = spawn_fake_discord().await;
    let config = DiscordConfig {
        user_sources: Some(vec![SourceKind::Public, SourceKind::Widget]),
        ..discord_config(&base)
    };
    let resolver = EntityResolver::from_config(&config, &CacheConfig::default()).unwrap();

    let record = resolver
        .resolve(EntityKind::User, RATE_LIMITED, &in_guild())
        .await
        .unwrap();
    assert!(!record.synthetic);
    assert_eq!(record.display_name, "Widgy");
    assert_eq!(record.secondary_name.as_deref(), Some("widgetuser"));
    assert_eq!(record.discriminator.as_deref(), Some("0000"));
    assert_eq!(hits.anonymous_users.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_error_without_guild_context_falls_back() {
    let (base, _hits) = spawn_fake_discord().await;
    let resolver = EntityResolver::from_config(&discord_config(&base), &CacheConfig::default()).unwrap();

    let record = resolver
        .resolve(EntityKind::User, BROKEN, &LookupContext::default())
        .await
        .unwrap();
    assert!(record.synthetic);
    assert_eq!(resolver.stats().users.total, 1);
}

#[tokio::test]
async fn test_default_chains_reach_widget_with_guild_context() {
    let (base, hits) = spawn_fake_discord().await;
    let resolver = EntityResolver::from_config(&discord_config(&base), &CacheConfig::default()).unwrap();

    let user = resolver
        .resolve(EntityKind::User, RATE_LIMITED, &in_guild())
        .await
        .unwrap();
    assert!(!user.synthetic);
    assert_eq!(user.display_name, "Widgy");
    assert_eq!(hits.anonymous_users.load(Ordering::SeqCst), 1);

    let channel = resolver
        .resolve(EntityKind::Channel, CHANNEL, &in_guild())
        .await
        .unwrap();
    assert!(!channel.synthetic);
    assert_eq!(channel.display_name, "general");
}

#[tokio::test]
async fn test_widget_guild_and_channel() {
    let (base, _hits) = spawn_fake_discord().await;
    let config = DiscordConfig {
        channel_sources: Some(vec![SourceKind::Widget]),
        ..discord_config(&base)
    };
    let resolver = EntityResolver::from_config(&config, &CacheConfig::default()).unwrap();

    let guild = resolver
        .resolve(EntityKind::Guild, GUILD, &LookupContext::default())
        .await
        .unwrap();
    assert_eq!(guild.display_name, "Lens Guild");
    assert!(!guild.synthetic);

    let channel = resolver
        .resolve(EntityKind::Channel, CHANNEL, &in_guild())
        .await
        .unwrap();
    assert_eq!(channel.display_name, "general");

    // Without a guild the widget cannot answer for a channel.
    let other = resolver
        .resolve(EntityKind::Channel, "80351110224678002", &LookupContext::default())
        .await
        .unwrap();
    assert!(other.synthetic);
    assert_eq!(other.display_name, "channel-8002");
}

#[tokio::test]
async fn test_bot_guild_lookup() {
    let (base, _hits) = spawn_fake_discord().await;
    let config = DiscordConfig {
        bot_token: Some("test-token".into()),
        ..discord_config(&base)
    };
    let resolver = EntityResolver::from_config(&config, &CacheConfig::default()).unwrap();

    let guild = resolver
        .resolve(EntityKind::Guild, GUILD, &LookupContext::default())
        .await
        .unwrap();
    assert_eq!(guild.display_name, "Bot Guild");
    assert_eq!(
        Cdn::from_config(&config).image_url(&guild).unwrap(),
        format!("https://cdn.discordapp.com/icons/{}/cafe.png?size=64", GUILD)
    );
}
