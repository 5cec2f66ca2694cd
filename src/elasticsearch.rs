//! Elasticsearch [`DocumentStore`] over the REST API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `exists` | `HEAD /{index}` |
//! | `create` | `PUT /{index}` with settings and mappings |
//! | `delete` | `DELETE /{index}` |
//! | `upsert_many` | `POST /_bulk?refresh=wait_for` (NDJSON `index` actions keyed by `message_id`) |
//! | `query` | `POST /{index}/_search` with a `bool` query (404 means no hits) |
//! | `aggregate` | `POST /{index}/_search` with `size: 0` and `value_count` / `cardinality` aggs |
//! | `ping` | `GET /` |
//!
//! Connection settings, in order of precedence:
//!
//! 1. `cloud_id` + `api_key`
//! 2. `cloud_id` + `username` / `password`
//! 3. `url`, with `api_key` if set, else basic auth (`username` defaults to `elastic`)
//!
//! A cloud id without credentials, or neither cloud id nor url, is a
//! configuration error raised by [`ElasticsearchStore::from_config`].
//!
//! Transport failures map to [`Error::Connectivity`], client timeouts to
//! [`Error::Timeout`], and any other non-success answer to [`Error::Backend`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use discord_lens_core::query::{Field, Fuzziness, SortOrder, StructuredQuery};
use discord_lens_core::store::{
    AggregationSpec, Aggregations, BulkItem, BulkResponse, DocumentStore, FieldType, IndexSchema, QueryHits,
};
use discord_lens_core::models::SearchHit;
use discord_lens_core::{Error, MessageDocument, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::IndexConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    ApiKey(String),
    Basic { username: String, password: String },
}

pub struct ElasticsearchStore {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
}

impl ElasticsearchStore {
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let (base_url, auth) = resolve_connection(config)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        match &self.auth {
            Auth::ApiKey(key) => builder.header("Authorization", format!("ApiKey {}", key)),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{}: {}", what, e))
            } else {
                Error::Connectivity(format!("{}: {}", what, e))
            }
        })
    }

    async fn send_json(&self, builder: RequestBuilder, what: &str) -> Result<Value> {
        let response = self.send(builder, what).await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| Error::Backend(format!("{}: unreadable response: {}", what, e)));
        }
        Err(status_error(status, response, what).await)
    }
}

async fn status_error(status: StatusCode, response: Response, what: &str) -> Error {
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Error::Connectivity(format!("{}: {}", what, status))
        }
        _ => Error::Backend(format!("{}: {} {}", what, status, body)),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn resolve_connection(config: &IndexConfig) -> Result<(String, Auth)> {
    if let Some(cloud_id) = non_empty(&config.cloud_id) {
        let base_url = decode_cloud_id(cloud_id)?;
        let auth = match (
            non_empty(&config.api_key),
            non_empty(&config.username),
            non_empty(&config.password),
        ) {
            (Some(key), _, _) => Auth::ApiKey(key.to_string()),
            (None, Some(user), Some(pass)) => Auth::Basic {
                username: user.to_string(),
                password: pass.to_string(),
            },
            _ => {
                return Err(Error::Config(
                    "index.cloud_id needs index.api_key or both index.username and index.password".into(),
                ))
            }
        };
        return Ok((base_url, auth));
    }

    if let Some(url) = non_empty(&config.url) {
        let auth = match non_empty(&config.api_key) {
            Some(key) => Auth::ApiKey(key.to_string()),
            None => Auth::Basic {
                username: non_empty(&config.username).unwrap_or("elastic").to_string(),
                password: non_empty(&config.password).unwrap_or_default().to_string(),
            },
        };
        return Ok((url.trim_end_matches('/').to_string(), auth));
    }

    Err(Error::Config(
        "elasticsearch backend needs index.cloud_id or index.url".into(),
    ))
}

/// Turn an Elastic Cloud id (`name:base64(host$es_uuid$kibana_uuid)`) into
/// the cluster's HTTPS endpoint.
pub fn decode_cloud_id(cloud_id: &str) -> Result<String> {
    let encoded = cloud_id.split_once(':').map(|(_, e)| e).unwrap_or(cloud_id);
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Config(format!("invalid cloud id: {}", e)))?;
    let decoded = String::from_utf8(bytes).map_err(|_| Error::Config("invalid cloud id: not UTF-8".into()))?;

    let mut parts = decoded.split('$');
    let host = parts.next().filter(|h| !h.is_empty());
    let es_uuid = parts.next().filter(|u| !u.is_empty());
    match (host, es_uuid) {
        (Some(host), Some(uuid)) => {
            let (host, port) = match host.rsplit_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (host, None),
            };
            Ok(match port {
                Some(port) if port != "443" => format!("https://{}.{}:{}", uuid, host, port),
                _ => format!("https://{}.{}", uuid, host),
            })
        }
        _ => Err(Error::Config("invalid cloud id: expected host$uuid".into())),
    }
}

/// `PUT /{index}` body for a schema.
pub fn index_body(schema: &IndexSchema) -> Value {
    let properties: Map<String, Value> = schema
        .fields
        .iter()
        .map(|f| {
            let mapping = match &f.field_type {
                FieldType::Text { analyzer } => json!({ "type": "text", "analyzer": analyzer }),
                FieldType::Keyword => json!({ "type": "keyword" }),
                FieldType::Date { formats } => json!({ "type": "date", "format": formats }),
                FieldType::Integer => json!({ "type": "integer" }),
                FieldType::Boolean => json!({ "type": "boolean" }),
            };
            (f.name.clone(), mapping)
        })
        .collect();
    json!({
        "settings": {
            "number_of_shards": schema.shards,
            "number_of_replicas": schema.replicas,
        },
        "mappings": { "properties": properties },
    })
}

/// `_search` body for a structured query.
pub fn search_body(query: &StructuredQuery) -> Value {
    let must = match &query.text {
        Some(text) => json!([{
            "multi_match": {
                "query": text.query,
                "fields": [format!("content^{}", text.boost)],
                "type": "best_fields",
                "fuzziness": match text.fuzziness {
                    Fuzziness::Auto => "AUTO",
                    Fuzziness::Exact => "0",
                },
            }
        }]),
        None => json!([{ "match_all": {} }]),
    };

    let mut bool_query = json!({ "must": must });
    if !query.filters.is_empty() {
        let filter: Vec<Value> = query
            .filters
            .iter()
            .map(|f| json!({ "term": { f.field.name(): f.value } }))
            .collect();
        bool_query["filter"] = Value::Array(filter);
    }

    let recency = [
        json!({ "timestamp": { "order": "desc" } }),
        json!({ "message_id": { "order": "desc" } }),
    ];
    let sort: Vec<Value> = match query.sort {
        SortOrder::Score => std::iter::once(json!("_score")).chain(recency).collect(),
        SortOrder::Timestamp => recency.to_vec(),
    };

    let mut body = json!({
        "query": { "bool": bool_query },
        "sort": sort,
        "from": query.from,
        "size": query.size,
        "track_total_hits": true,
    });
    if let Some(fragment_size) = query.highlight {
        body["highlight"] = json!({
            "fields": {
                "content": { "fragment_size": fragment_size, "number_of_fragments": 1 }
            }
        });
    }
    body
}

/// `_search` body computing the requested aggregations only.
pub fn aggregation_body(spec: &AggregationSpec) -> Value {
    let mut aggs = Map::new();
    aggs.insert(
        "count".to_string(),
        json!({ "value_count": { "field": spec.count_field } }),
    );
    for field in &spec.cardinality {
        aggs.insert(
            field.name().to_string(),
            json!({ "cardinality": { "field": field.name() } }),
        );
    }
    json!({ "size": 0, "track_total_hits": true, "aggs": aggs })
}

/// NDJSON `_bulk` payload: one `index` action per document, plus the
/// derived `content_length` and `has_content` fields.
pub fn bulk_body(index: &str, docs: &[MessageDocument]) -> Result<String> {
    let mut out = String::new();
    for doc in docs {
        let action = json!({ "index": { "_index": index, "_id": doc.message_id } });
        let mut source = serde_json::to_value(doc)?;
        source["content_length"] = json!(doc.content.chars().count());
        source["has_content"] = json!(!doc.content.is_empty());
        out.push_str(&serde_json::to_string(&action)?);
        out.push('\n');
        out.push_str(&serde_json::to_string(&source)?);
        out.push('\n');
    }
    Ok(out)
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    total: TotalHits,
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct TotalHits {
    value: u64,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_source")]
    source: MessageDocument,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(default)]
    highlight: Option<Highlight>,
}

#[derive(Deserialize)]
struct Highlight {
    #[serde(default)]
    content: Vec<String>,
}

fn parse_bulk_response(body: &Value) -> BulkResponse {
    let items = body["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let action = item
                        .as_object()
                        .and_then(|o| o.values().next())
                        .cloned()
                        .unwrap_or(Value::Null);
                    let error = action.get("error").map(|e| {
                        e.get("reason")
                            .and_then(Value::as_str)
                            .map(String::from)
                            .unwrap_or_else(|| e.to_string())
                    });
                    BulkItem {
                        id: action["_id"].as_str().unwrap_or_default().to_string(),
                        error,
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    BulkResponse { items }
}

fn parse_aggregations(body: &Value, spec: &AggregationSpec) -> Aggregations {
    let value = |name: &str| body["aggregations"][name]["value"].as_f64().unwrap_or(0.0) as u64;
    Aggregations {
        count: value("count"),
        cardinality: spec
            .cardinality
            .iter()
            .map(|f: &Field| (*f, value(f.name())))
            .collect(),
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn exists(&self, index: &str) -> Result<bool> {
        let what = format!("HEAD /{}", index);
        let response = self
            .send(self.request(reqwest::Method::HEAD, &format!("/{}", index)), &what)
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(s, response, &what).await),
        }
    }

    async fn create(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        let builder = self
            .request(reqwest::Method::PUT, &format!("/{}", index))
            .json(&index_body(schema));
        self.send_json(builder, &format!("PUT /{}", index)).await?;
        Ok(())
    }

    async fn delete(&self, index: &str) -> Result<()> {
        let builder = self.request(reqwest::Method::DELETE, &format!("/{}", index));
        self.send_json(builder, &format!("DELETE /{}", index)).await?;
        Ok(())
    }

    async fn upsert_many(&self, index: &str, docs: &[MessageDocument]) -> Result<BulkResponse> {
        if docs.is_empty() {
            return Ok(BulkResponse::default());
        }
        let builder = self
            .request(reqwest::Method::POST, "/_bulk?refresh=wait_for")
            .header("Content-Type", "application/x-ndjson")
            .body(bulk_body(index, docs)?);
        let body = self.send_json(builder, "POST /_bulk").await?;
        let response = parse_bulk_response(&body);
        debug!(
            documents = docs.len(),
            rejected = response.failures().count(),
            "bulk request complete"
        );
        Ok(response)
    }

    async fn query(&self, index: &str, query: &StructuredQuery) -> Result<QueryHits> {
        let what = format!("POST /{}/_search", index);
        let builder = self
            .request(reqwest::Method::POST, &format!("/{}/_search", index))
            .json(&search_body(query));
        let response = self.send(builder, &what).await?;
        let parsed: SearchResponse = match response.status() {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| Error::Backend(format!("{}: unreadable response: {}", what, e)))?,
            StatusCode::NOT_FOUND => return Ok(QueryHits::default()),
            s => return Err(status_error(s, response, &what).await),
        };
        Ok(QueryHits {
            total: parsed.hits.total.value,
            hits: parsed
                .hits
                .hits
                .into_iter()
                .map(|h| SearchHit {
                    message: h.source,
                    score: h.score,
                    highlight: h.highlight.and_then(|hl| hl.content.into_iter().next()),
                })
                .collect(),
        })
    }

    async fn aggregate(&self, index: &str, spec: &AggregationSpec) -> Result<Aggregations> {
        let what = format!("POST /{}/_search", index);
        let builder = self
            .request(reqwest::Method::POST, &format!("/{}/_search", index))
            .json(&aggregation_body(spec));
        let response = self.send(builder, &what).await?;
        match response.status() {
            s if s.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| Error::Backend(format!("{}: unreadable response: {}", what, e)))?;
                Ok(parse_aggregations(&body, spec))
            }
            StatusCode::NOT_FOUND => Ok(Aggregations::default()),
            s => Err(status_error(s, response, &what).await),
        }
    }

    async fn ping(&self) -> Result<()> {
        let response = self.send(self.request(reqwest::Method::GET, "/"), "GET /").await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Connectivity(format!("GET /: {}", status)))
        }
    }
}
