//! Elasticsearch store against a fake cluster on an ephemeral port.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use discord_lens::config::{IndexBackend, IndexConfig};
use discord_lens::index::open_index;
use discord_lens_core::models::SearchFilters;
use discord_lens_core::{Error, IndexState, IngestPolicy, MessageDocument, SearchQuery, SortMode};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone, Default)]
struct Cluster {
    created: Arc<Mutex<bool>>,
    bulk_lines: Arc<Mutex<Vec<Value>>>,
    last_search: Arc<Mutex<Option<Value>>>,
}

fn check_auth(headers: &HeaderMap) -> Result<(), StatusCode> {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("ApiKey secret") => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn root(headers: HeaderMap) -> Response {
    if let Err(s) = check_auth(&headers) {
        return s.into_response();
    }
    Json(json!({ "version": { "number": "8.13.0" } })).into_response()
}

async fn index_op(
    State(cluster): State<Cluster>,
    method: axum::http::Method,
    headers: HeaderMap,
    Path(_index): Path<String>,
) -> Response {
    if let Err(s) = check_auth(&headers) {
        return s.into_response();
    }
    let mut created = cluster.created.lock();
    match method.as_str() {
        "HEAD" if *created => StatusCode::OK.into_response(),
        "HEAD" => StatusCode::NOT_FOUND.into_response(),
        "PUT" => {
            *created = true;
            Json(json!({ "acknowledged": true })).into_response()
        }
        "DELETE" => {
            *created = false;
            Json(json!({ "acknowledged": true })).into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn bulk(State(cluster): State<Cluster>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(s) = check_auth(&headers) {
        return s.into_response();
    }
    let lines: Vec<Value> = String::from_utf8_lossy(&body)
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let items: Vec<Value> = lines
        .chunks(2)
        .map(|pair| {
            let id = pair[0]["index"]["_id"].clone();
            if pair[1]["content"] == "reject-me" {
                json!({ "index": { "_id": id, "status": 400, "error": { "type": "mapper_parsing_exception", "reason": "bad timestamp" } } })
            } else {
                json!({ "index": { "_id": id, "status": 201 } })
            }
        })
        .collect();
    cluster.bulk_lines.lock().extend(lines);
    Json(json!({ "errors": items.iter().any(|i| i["index"]["error"].is_object()), "items": items })).into_response()
}

async fn search(State(cluster): State<Cluster>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(s) = check_auth(&headers) {
        return s.into_response();
    }
    if !*cluster.created.lock() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "type": "index_not_found_exception" }, "status": 404 })),
        )
            .into_response();
    }
    let response = if body.get("aggs").is_some() {
        json!({
            "hits": { "total": { "value": 42 }, "hits": [] },
            "aggregations": {
                "count": { "value": 42 },
                "author_id": { "value": 5 },
                "channel_id": { "value": 3 },
                "guild_id": { "value": 1 }
            }
        })
    } else {
        json!({
            "hits": {
                "total": { "value": 1 },
                "hits": [{
                    "_score": 3.5,
                    "_source": {
                        "message_id": "90000000000000001",
                        "content": "hello world",
                        "author_id": "70000000000000001",
                        "channel_id": "80351110224678001",
                        "guild_id": "80351110224670000",
                        "timestamp": "2024-03-01T10:00:00Z",
                        "content_length": 11,
                        "has_content": true
                    },
                    "highlight": { "content": ["<em>hello</em> world"] }
                }]
            }
        })
    };
    *cluster.last_search.lock() = Some(body);
    Json(response).into_response()
}

async fn spawn_cluster() -> (String, Cluster) {
    let cluster = Cluster::default();
    let app = Router::new()
        .route("/", get(root))
        .route("/_bulk", post(bulk))
        .route("/{index}", any(index_op))
        .route("/{index}/_search", post(search))
        .with_state(cluster.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), cluster)
}

async fn spawn_unavailable() -> String {
    let app = Router::new().fallback(|| async { StatusCode::SERVICE_UNAVAILABLE });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn es_config(url: &str) -> IndexConfig {
    IndexConfig {
        backend: IndexBackend::Elasticsearch,
        url: Some(url.to_string()),
        api_key: Some("secret".into()),
        timeout_secs: 5,
        ..Default::default()
    }
}

fn doc(id: &str, content: &str) -> MessageDocument {
    MessageDocument {
        message_id: id.to_string(),
        content: content.to_string(),
        author_id: "70000000000000001".to_string(),
        channel_id: "80351110224678001".to_string(),
        guild_id: "80351110224670000".to_string(),
        timestamp: "2024-03-01T10:00:00Z".to_string(),
    }
}

#[tokio::test]
async fn test_ensure_index_and_health() {
    let (url, cluster) = spawn_cluster().await;
    let index = open_index(&es_config(&url)).unwrap();

    assert!(index.check_health().await.healthy);
    assert_eq!(index.state(), IndexState::Healthy);
    assert!(index.ensure_index().await.unwrap());
    assert!(!index.ensure_index().await.unwrap());
    assert!(*cluster.created.lock());
}

#[tokio::test]
async fn test_bulk_ingest_reports_rejections() {
    let (url, cluster) = spawn_cluster().await;
    let mut config = es_config(&url);
    config.batch_size = 2;
    config.ingest_policy = IngestPolicy::SkipFailed;
    let index = open_index(&config).unwrap();

    let docs = vec![
        doc("90000000000000001", "hello"),
        doc("90000000000000002", "reject-me"),
        doc("90000000000000003", ""),
    ];
    let report = index.bulk_ingest(&docs).await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(report.imported, 2);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.failed_batches, vec![0]);

    let lines = cluster.bulk_lines.lock();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0]["index"]["_id"], "90000000000000001");
    assert_eq!(lines[1]["content_length"], 5);
    assert_eq!(lines[5]["has_content"], false);
}

#[tokio::test]
async fn test_bulk_ingest_fail_fast() {
    let (url, _cluster) = spawn_cluster().await;
    let index = open_index(&es_config(&url)).unwrap();
    let err = index
        .bulk_ingest(&[doc("90000000000000002", "reject-me")])
        .await
        .unwrap_err();
    match err {
        Error::Ingest {
            batch,
            failed,
            imported_before,
            reason,
        } => {
            assert_eq!(batch, 0);
            assert_eq!(failed, 1);
            assert_eq!(imported_before, 0);
            assert!(reason.contains("bad timestamp"));
        }
        other => panic!("expected ingest error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_index_searches_empty() {
    let (url, _cluster) = spawn_cluster().await;
    let index = open_index(&es_config(&url)).unwrap();
    let query = SearchQuery::new(SearchFilters::default(), 1, 10, SortMode::Recency).unwrap();

    let result = index.search(&query).await.unwrap();
    assert_eq!(result.total, 0);
    assert!(result.documents.is_empty());
    assert_eq!(index.stats().await.unwrap().total_messages, 0);
}

#[tokio::test]
async fn test_search_sends_fuzzy_query() {
    let (url, cluster) = spawn_cluster().await;
    let index = open_index(&es_config(&url)).unwrap();
    index.ensure_index().await.unwrap();
    let query = SearchQuery::new(
        SearchFilters {
            text: Some("helo".into()),
            channel_id: Some("80351110224678001".into()),
            ..Default::default()
        },
        2,
        25,
        SortMode::Relevance,
    )
    .unwrap();

    let result = index.search(&query).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.documents[0].message.content, "hello world");
    assert_eq!(result.documents[0].highlight.as_deref(), Some("<em>hello</em> world"));

    let sent = cluster.last_search.lock().clone().unwrap();
    assert_eq!(sent["from"], 25);
    assert_eq!(sent["size"], 25);
    let body = sent.to_string();
    assert!(body.contains("\"fuzziness\":\"AUTO\""));
    assert!(body.contains("content^2"));
    assert!(body.contains("80351110224678001"));
}

#[tokio::test]
async fn test_stats_from_aggregations() {
    let (url, _cluster) = spawn_cluster().await;
    let index = open_index(&es_config(&url)).unwrap();
    index.ensure_index().await.unwrap();
    let stats = index.stats().await.unwrap();
    assert_eq!(stats.total_messages, 42);
    assert_eq!(stats.unique_authors, 5);
    assert_eq!(stats.unique_channels, 3);
    assert_eq!(stats.unique_guilds, 1);
}

#[tokio::test]
async fn test_unavailable_cluster_is_connectivity_error() {
    let url = spawn_unavailable().await;
    let index = open_index(&es_config(&url)).unwrap();

    assert!(!index.check_health().await.healthy);
    assert_eq!(index.state(), IndexState::Unreachable);
    let query = SearchQuery::new(SearchFilters::default(), 1, 10, SortMode::Recency).unwrap();
    assert!(matches!(index.search(&query).await, Err(Error::Connectivity(_))));
}

#[tokio::test]
async fn test_wrong_credentials_are_backend_error() {
    let (url, _cluster) = spawn_cluster().await;
    let mut config = es_config(&url);
    config.api_key = Some("nope".into());
    let index = open_index(&config).unwrap();
    assert!(matches!(index.ensure_index().await, Err(Error::Backend(_))));
}
