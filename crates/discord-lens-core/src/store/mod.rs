//! Document store abstraction for the message index.
//!
//! The [`DocumentStore`] trait is the contract between the message index
//! facade ([`crate::search::MessageIndex`]) and a concrete search backend.
//! The application crate ships an Elasticsearch implementation; this
//! crate ships [`memory::InMemoryStore`] for tests and for running
//! without a search cluster.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must report failures with the typed [`Error`](crate::Error) variants so
//! the facade can tell "unreachable" from "rejected".

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{MessageDocument, SearchHit};
use crate::query::{Field, StructuredQuery};

/// Date formats accepted for `timestamp`, in Elasticsearch `format` syntax.
pub const TIMESTAMP_FORMATS: &str =
    "yyyy-MM-dd HH:mm:ss.SSSSSSXXX||yyyy-MM-dd HH:mm:ss.SSSXXX||strict_date_optional_time||epoch_millis";

/// Storage type of a mapped field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Analyzed full text.
    Text { analyzer: String },
    /// Exact-match, aggregatable.
    Keyword,
    Date { formats: String },
    Integer,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    pub field_type: FieldType,
}

/// Index definition handed to [`DocumentStore::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub fields: Vec<FieldMapping>,
    pub shards: u32,
    pub replicas: u32,
}

impl IndexSchema {
    /// Schema for [`MessageDocument`] plus the derived `content_length`
    /// and `has_content` fields.
    pub fn messages() -> Self {
        fn field(name: &str, field_type: FieldType) -> FieldMapping {
            FieldMapping {
                name: name.to_string(),
                field_type,
            }
        }
        Self {
            fields: vec![
                field("message_id", FieldType::Keyword),
                field(
                    "content",
                    FieldType::Text {
                        analyzer: "standard".to_string(),
                    },
                ),
                field("author_id", FieldType::Keyword),
                field("channel_id", FieldType::Keyword),
                field("guild_id", FieldType::Keyword),
                field(
                    "timestamp",
                    FieldType::Date {
                        formats: TIMESTAMP_FORMATS.to_string(),
                    },
                ),
                field("content_length", FieldType::Integer),
                field("has_content", FieldType::Boolean),
            ],
            shards: 1,
            replicas: 0,
        }
    }
}

/// Per-document outcome of a bulk upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub id: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn failures(&self) -> impl Iterator<Item = &BulkItem> {
        self.items.iter().filter(|i| i.error.is_some())
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_none()).count()
    }
}

/// A page of hits plus the full match count.
#[derive(Debug, Clone, Default)]
pub struct QueryHits {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// Which aggregations to compute in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSpec {
    /// Field counted with a value count (total documents).
    pub count_field: &'static str,
    /// Fields counted with approximate distinct counts.
    pub cardinality: Vec<Field>,
}

impl AggregationSpec {
    pub fn message_stats() -> Self {
        Self {
            count_field: "message_id",
            cardinality: vec![Field::AuthorId, Field::ChannelId, Field::GuildId],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregations {
    pub count: u64,
    pub cardinality: Vec<(Field, u64)>,
}

impl Aggregations {
    pub fn distinct(&self, field: Field) -> u64 {
        self.cardinality
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Abstract search backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`exists`](DocumentStore::exists) | Does the index exist? |
/// | [`create`](DocumentStore::create) | Create an index with a schema |
/// | [`delete`](DocumentStore::delete) | Drop an index |
/// | [`upsert_many`](DocumentStore::upsert_many) | Insert-or-replace documents by `message_id` |
/// | [`query`](DocumentStore::query) | Execute a [`StructuredQuery`] |
/// | [`aggregate`](DocumentStore::aggregate) | Counts and distinct counts |
/// | [`ping`](DocumentStore::ping) | Cheap reachability check |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &str;

    async fn exists(&self, index: &str) -> Result<bool>;

    async fn create(&self, index: &str, schema: &IndexSchema) -> Result<()>;

    async fn delete(&self, index: &str) -> Result<()>;

    /// Upsert every document in one request. Document-level rejections are
    /// reported in the response, not as an `Err`.
    async fn upsert_many(&self, index: &str, docs: &[MessageDocument]) -> Result<BulkResponse>;

    /// A missing index matches nothing: empty hits, not an error.
    async fn query(&self, index: &str, query: &StructuredQuery) -> Result<QueryHits>;

    /// A missing index has zero counts.
    async fn aggregate(&self, index: &str, spec: &AggregationSpec) -> Result<Aggregations>;

    async fn ping(&self) -> Result<()>;
}

/// Parse a timestamp in any of the formats listed in [`TIMESTAMP_FORMATS`].
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // `2024-01-02 03:04:05.123456+00:00` and the millisecond variant.
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    // Optional-time ISO dates without offset are UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = DateTime::parse_from_rfc3339("2023-05-01T12:30:00.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_timestamp("2023-05-01T12:30:00.123Z"), Some(expected));
        assert_eq!(parse_timestamp("2023-05-01 12:30:00.123+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-05-01 12:30:00.123000+00:00"), Some(expected));
        assert_eq!(parse_timestamp("1682944200123"), Some(expected));
        assert!(parse_timestamp("2023-05-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_message_schema_types() {
        let schema = IndexSchema::messages();
        let ty = |n: &str| {
            schema
                .fields
                .iter()
                .find(|f| f.name == n)
                .map(|f| f.field_type.clone())
                .unwrap()
        };
        assert!(matches!(ty("content"), FieldType::Text { .. }));
        assert_eq!(ty("author_id"), FieldType::Keyword);
        assert!(matches!(ty("timestamp"), FieldType::Date { .. }));
    }
}
