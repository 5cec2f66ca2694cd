//! In-memory [`DocumentStore`] implementation for tests and cluster-less runs.
//!
//! Uses `HashMap`s behind a `parking_lot::RwLock`. Text search is a full
//! scan with OR semantics over query terms and automatic fuzziness;
//! distinct counts are exact, which satisfies the approximate contract.
//!
//! [`InMemoryStore::set_reachable`] simulates an outage: while unreachable
//! every operation fails with [`Error::Connectivity`].

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::models::{MessageDocument, SearchHit};
use crate::query::{tokenize, within_edits, Field, SortOrder, StructuredQuery, TextClause};

use super::{
    parse_timestamp, AggregationSpec, Aggregations, BulkItem, BulkResponse, DocumentStore,
    IndexSchema, QueryHits,
};

struct StoredMessage {
    doc: MessageDocument,
    ts: DateTime<Utc>,
}

struct MemoryIndex {
    _schema: IndexSchema,
    docs: HashMap<String, StoredMessage>,
}

impl MemoryIndex {
    fn new(schema: IndexSchema) -> Self {
        Self {
            _schema: schema,
            docs: HashMap::new(),
        }
    }
}

/// In-memory store for testing and for running without Elasticsearch.
pub struct InMemoryStore {
    indices: RwLock<HashMap<String, MemoryIndex>>,
    reachable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Toggle simulated connectivity.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, AtomicOrdering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connectivity("in-memory store marked unreachable".into()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn field_value<'a>(doc: &'a MessageDocument, field: Field) -> &'a str {
    match field {
        Field::AuthorId => &doc.author_id,
        Field::ChannelId => &doc.channel_id,
        Field::GuildId => &doc.guild_id,
    }
}

/// Score `content` against the text clause. Returns the score and the set
/// of content tokens that matched, or `None` when nothing matched.
fn score_text(clause: &TextClause, content: &str) -> Option<(f64, HashSet<String>)> {
    let terms = tokenize(&clause.query);
    if terms.is_empty() {
        return None;
    }
    let tokens = tokenize(content);
    let mut score = 0.0;
    let mut matched = HashSet::new();
    for term in &terms {
        let max = clause.fuzziness.max_edits(term.chars().count());
        let mut best = 0.0f64;
        for token in &tokens {
            if token == term {
                best = 1.0;
                matched.insert(token.clone());
            } else if within_edits(term, token, max) {
                best = best.max(0.5);
                matched.insert(token.clone());
            }
        }
        score += best;
    }
    if matched.is_empty() {
        None
    } else {
        Some((score * clause.boost, matched))
    }
}

/// Build one highlight fragment of at most `fragment_size` characters,
/// starting at the first match when the content is longer than that.
fn build_highlight(content: &str, matched: &HashSet<String>, fragment_size: usize) -> Option<String> {
    let chars: Vec<char> = content.chars().collect();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_alphanumeric() {
            let start = i;
            while i < chars.len() && chars[i].is_alphanumeric() {
                i += 1;
            }
            spans.push((start, i));
        } else {
            i += 1;
        }
    }
    let is_match = |(s, e): (usize, usize)| {
        matched.contains(&chars[s..e].iter().collect::<String>().to_lowercase())
    };

    let first = spans.iter().copied().find(|sp| is_match(*sp))?;
    let start = if chars.len() <= fragment_size {
        0
    } else {
        first.0.min(chars.len() - fragment_size)
    };
    let end = (start + fragment_size).min(chars.len());

    let mut out = String::new();
    let mut pos = start;
    for (s, e) in spans.iter().copied().filter(|(s, e)| *s >= start && *e <= end) {
        if is_match((s, e)) {
            out.extend(&chars[pos..s]);
            out.push_str("<em>");
            out.extend(&chars[s..e]);
            out.push_str("</em>");
            pos = e;
        }
    }
    out.extend(&chars[pos..end]);
    Some(out)
}

fn recency_cmp(a: &StoredMessage, b: &StoredMessage) -> Ordering {
    b.ts.cmp(&a.ts)
        .then_with(|| b.doc.message_id.cmp(&a.doc.message_id))
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn exists(&self, index: &str) -> Result<bool> {
        self.check_reachable()?;
        Ok(self.indices.read().contains_key(index))
    }

    async fn create(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        self.check_reachable()?;
        let mut indices = self.indices.write();
        if indices.contains_key(index) {
            return Err(Error::Backend(format!("index [{}] already exists", index)));
        }
        indices.insert(index.to_string(), MemoryIndex::new(schema.clone()));
        Ok(())
    }

    async fn delete(&self, index: &str) -> Result<()> {
        self.check_reachable()?;
        self.indices
            .write()
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| Error::Backend(format!("no such index [{}]", index)))
    }

    async fn upsert_many(&self, index: &str, docs: &[MessageDocument]) -> Result<BulkResponse> {
        self.check_reachable()?;
        let mut indices = self.indices.write();
        let target = indices
            .entry(index.to_string())
            .or_insert_with(|| MemoryIndex::new(IndexSchema::messages()));

        let items = docs
            .iter()
            .map(|doc| {
                let error = if !doc.is_valid() {
                    Some("document is missing a required id field".to_string())
                } else {
                    match parse_timestamp(&doc.timestamp) {
                        Some(ts) => {
                            target.docs.insert(
                                doc.message_id.clone(),
                                StoredMessage {
                                    doc: doc.clone(),
                                    ts,
                                },
                            );
                            None
                        }
                        None => Some(format!(
                            "failed to parse field [timestamp] with value '{}'",
                            doc.timestamp
                        )),
                    }
                };
                BulkItem {
                    id: doc.message_id.clone(),
                    error,
                }
            })
            .collect();

        Ok(BulkResponse { items })
    }

    async fn query(&self, index: &str, query: &StructuredQuery) -> Result<QueryHits> {
        self.check_reachable()?;
        let indices = self.indices.read();
        let Some(target) = indices.get(index) else {
            return Ok(QueryHits::default());
        };

        let mut matches: Vec<(&StoredMessage, Option<(f64, HashSet<String>)>)> = target
            .docs
            .values()
            .filter(|m| {
                query
                    .filters
                    .iter()
                    .all(|f| field_value(&m.doc, f.field) == f.value)
            })
            .filter_map(|m| match &query.text {
                None => Some((m, None)),
                Some(clause) => score_text(clause, &m.doc.content).map(|s| (m, Some(s))),
            })
            .collect();

        match query.sort {
            SortOrder::Timestamp => matches.sort_by(|a, b| recency_cmp(a.0, b.0)),
            SortOrder::Score => matches.sort_by(|a, b| {
                let sa = a.1.as_ref().map(|s| s.0).unwrap_or(0.0);
                let sb = b.1.as_ref().map(|s| s.0).unwrap_or(0.0);
                sb.partial_cmp(&sa)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| recency_cmp(a.0, b.0))
            }),
        }

        let total = matches.len() as u64;
        let hits = matches
            .into_iter()
            .skip(query.from)
            .take(query.size)
            .map(|(m, scored)| {
                let (score, highlight) = match (scored, query.highlight) {
                    (Some((score, matched)), Some(size)) => {
                        (Some(score), build_highlight(&m.doc.content, &matched, size))
                    }
                    (Some((score, _)), None) => (Some(score), None),
                    (None, _) => (None, None),
                };
                SearchHit {
                    message: m.doc.clone(),
                    score,
                    highlight,
                }
            })
            .collect();

        Ok(QueryHits { total, hits })
    }

    async fn aggregate(&self, index: &str, spec: &AggregationSpec) -> Result<Aggregations> {
        self.check_reachable()?;
        let indices = self.indices.read();
        let Some(target) = indices.get(index) else {
            return Ok(Aggregations::default());
        };
        let cardinality = spec
            .cardinality
            .iter()
            .map(|field| {
                let distinct: HashSet<&str> = target
                    .docs
                    .values()
                    .map(|m| field_value(&m.doc, *field))
                    .collect();
                (*field, distinct.len() as u64)
            })
            .collect();
        Ok(Aggregations {
            count: target.docs.len() as u64,
            cardinality,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }
}
