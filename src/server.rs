//! HTTP proxy server.
//!
//! Fronts the entity resolver and the message index with a JSON API for the
//! browser UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness (returns version) |
//! | `GET`  | `/api/discord/{users,guilds,channels}/{id}` | Resolve one entity (`?guild_id=` adds context) |
//! | `DELETE` | `/api/discord/{users,guilds,channels}/{id}` | Drop the cached entry |
//! | `POST` | `/api/discord/users/batch` | Resolve up to 50 users: `{ "ids": [...], "guild_id"?: "..." }` |
//! | `GET`  | `/api/search` | Search messages (`q`, `author_id`, `channel_id`, `guild_id`, `page`, `page_size`, `sort`) |
//! | `GET`  | `/api/stats` | Message count and approximate distinct authors/channels/guilds |
//! | `GET`  | `/api/index/health` | Search backend reachability |
//! | `GET`  | `/api/cache/stats` | Resolution cache counters per kind |
//! | `DELETE` | `/api/cache` | Clear all resolution caches |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unavailable", "message": "Store unreachable: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `unavailable` (503), `timeout` (504),
//! `internal` (500). A search against an unreachable store is a 503, never
//! an empty result list.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use discord_lens_core::models::{HealthReport, SearchResult, StatsSnapshot};
use discord_lens_core::{EntityKind, EntityRecord, Error, IndexState, MessageIndex, Snowflake, SortMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discord::Cdn;
use crate::index::open_index;
use crate::resolve::{EntityResolver, ResolverStats};
use crate::resolver::LookupContext;
use crate::search::SearchArgs;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<EntityResolver>,
    pub index: Arc<MessageIndex>,
    pub cdn: Arc<Cdn>,
}

/// Build the router. Split from [`run_server`] so tests can serve it on an
/// ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/discord/users/batch", post(handle_user_batch))
        .route(
            "/api/discord/{kind}/{id}",
            get(handle_resolve).delete(handle_invalidate),
        )
        .route("/api/search", get(handle_search))
        .route("/api/stats", get(handle_stats))
        .route("/api/index/health", get(handle_index_health))
        .route("/api/cache/stats", get(handle_cache_stats))
        .route("/api/cache", delete(handle_cache_clear))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let resolver = EntityResolver::from_config(&config.discord, &config.cache)?;
    let index = open_index(&config.index)?;

    let health = index.check_health().await;
    if health.healthy {
        info!(backend = index.backend_name(), "search index reachable");
        match index.ensure_index().await {
            Ok(true) => info!(index = index.index_name(), "created empty message index"),
            Ok(false) => {}
            Err(e) => warn!(index = index.index_name(), error = %e, "could not ensure message index"),
        }
    } else {
        error!(
            backend = index.backend_name(),
            detail = health.detail.as_deref().unwrap_or(""),
            "search index unavailable, search endpoints will return 503"
        );
    }

    let state = AppState {
        resolver: Arc::new(resolver),
        index: Arc::new(index),
        cdn: Arc::new(Cdn::from_config(&config.discord)),
    };

    let bind_addr = config.server.bind.clone();
    println!("Discord Lens listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Connectivity(_) | Error::Config(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Entities ============

/// An entity record plus derived display fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntityView {
    #[serde(flatten)]
    pub record: EntityRecord,
    pub full_username: String,
    pub image_url: Option<String>,
    pub created_at: Option<String>,
}

impl EntityView {
    fn new(record: EntityRecord, cdn: &Cdn) -> Self {
        Self {
            full_username: record.full_username(),
            image_url: cdn.image_url(&record),
            created_at: record.id.created_at().map(|t| t.to_rfc3339()),
            record,
        }
    }
}

#[derive(Deserialize)]
struct ContextParams {
    guild_id: Option<String>,
}

fn lookup_context(guild_id: Option<&str>) -> Result<LookupContext, Error> {
    match guild_id.map(str::trim).filter(|g| !g.is_empty()) {
        Some(gid) => Ok(LookupContext::in_guild(gid.parse::<Snowflake>()?)),
        None => Ok(LookupContext::default()),
    }
}

async fn handle_resolve(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(params): Query<ContextParams>,
) -> Result<Json<EntityView>, AppError> {
    let kind: EntityKind = kind.parse()?;
    let ctx = lookup_context(params.guild_id.as_deref())?;
    let record = state.resolver.resolve(kind, &id, &ctx).await?;
    Ok(Json(EntityView::new(record, &state.cdn)))
}

async fn handle_invalidate(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let kind: EntityKind = kind.parse()?;
    state.resolver.invalidate(kind, &id.parse::<Snowflake>()?);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct BatchRequest {
    ids: Vec<String>,
    #[serde(default)]
    guild_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct BatchResponse {
    pub users: Vec<EntityView>,
}

async fn handle_user_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let ctx = lookup_context(req.guild_id.as_deref())?;
    let records = state
        .resolver
        .resolve_many(EntityKind::User, &req.ids, &ctx)
        .await?;
    Ok(Json(BatchResponse {
        users: records
            .into_iter()
            .map(|r| EntityView::new(r, &state.cdn))
            .collect(),
    }))
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    sort: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(flatten)]
    pub result: SearchResult,
    pub page: usize,
    pub page_size: usize,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let sort = match params.sort.as_deref() {
        Some(s) if !s.is_empty() => s.parse::<SortMode>()?,
        _ => SortMode::default(),
    };
    let args = SearchArgs {
        text: params.q,
        author_id: params.author_id,
        channel_id: params.channel_id,
        guild_id: params.guild_id,
        page: params.page.unwrap_or(1),
        page_size: params
            .page_size
            .unwrap_or(discord_lens_core::query::DEFAULT_PAGE_SIZE),
        sort,
    };
    let query = args.to_query()?;
    let result = state.index.search(&query).await?;
    Ok(Json(SearchResponse {
        result,
        page: args.page,
        page_size: args.page_size,
    }))
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsSnapshot>, AppError> {
    Ok(Json(state.index.stats().await?))
}

#[derive(Serialize, Deserialize)]
pub struct IndexHealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub state: IndexState,
    pub backend: String,
}

async fn handle_index_health(State(state): State<AppState>) -> Json<IndexHealthResponse> {
    let report = state.index.check_health().await;
    Json(IndexHealthResponse {
        report,
        state: state.index.state(),
        backend: state.index.backend_name().to_string(),
    })
}

// ============ Cache ============

async fn handle_cache_stats(State(state): State<AppState>) -> Json<ResolverStats> {
    Json(state.resolver.stats())
}

async fn handle_cache_clear(State(state): State<AppState>) -> StatusCode {
    state.resolver.clear();
    StatusCode::NO_CONTENT
}
