//! Message index facade.
//!
//! [`MessageIndex`] owns the index lifecycle and runs everything through a
//! [`DocumentStore`]: schema creation, searching, batched bulk ingestion,
//! aggregate statistics, and health probing. It has no HTTP or database
//! dependencies of its own; the application picks the store.
//!
//! # State machine
//!
//! ```text
//! Unconfigured (terminal)
//!
//! Unverified ──check_health ok──▶ Healthy ◀──┐
//!      │                            │         │ check_health ok
//!      └──check_health fails──▶ Unreachable ──┘
//! ```
//!
//! Ordinary store calls drive the same transitions: a connectivity failure
//! during `search`, `stats` or ingestion moves the index to `Unreachable`,
//! and a successful call moves it back to `Healthy`. An `Unconfigured`
//! index answers every call with [`Error::Config`] and every health check
//! with `healthy: false`.
//!
//! # Bulk ingestion
//!
//! Documents are split into batches of `batch_size` and submitted one
//! batch at a time as upserts keyed by `message_id`. Under
//! [`IngestPolicy::FailFast`] the first batch with any rejected document
//! aborts the import with [`Error::Ingest`] naming that batch and the
//! number of documents earlier batches already stored; under
//! [`IngestPolicy::SkipFailed`] rejected documents are counted and the
//! import continues.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{HealthReport, MessageDocument, SearchQuery, SearchResult, StatsSnapshot};
use crate::query::{build, Field};
use crate::store::{AggregationSpec, DocumentStore, IndexSchema};

/// Default number of documents per bulk request.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Unconfigured,
    Unverified,
    Healthy,
    Unreachable,
}

/// What to do when a batch contains rejected documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPolicy {
    /// Abort the import at the first failing batch.
    #[default]
    FailFast,
    /// Count rejected documents and keep going.
    SkipFailed,
}

/// Summary of a completed bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub imported: usize,
    pub rejected: usize,
    pub batches: usize,
    /// Zero-based indices of batches that had rejections (`SkipFailed` only).
    pub failed_batches: Vec<usize>,
}

enum Backend {
    Store(Arc<dyn DocumentStore>),
    Unconfigured(String),
}

/// Facade over one message index in a [`DocumentStore`].
pub struct MessageIndex {
    backend: Backend,
    index_name: String,
    batch_size: usize,
    policy: IngestPolicy,
    state: RwLock<IndexState>,
}

impl MessageIndex {
    pub fn new(store: Arc<dyn DocumentStore>, index_name: impl Into<String>) -> Self {
        Self {
            backend: Backend::Store(store),
            index_name: index_name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            policy: IngestPolicy::default(),
            state: RwLock::new(IndexState::Unverified),
        }
    }

    /// An index with no backend. Every operation fails with
    /// [`Error::Config`] carrying `reason`.
    pub fn unconfigured(reason: impl Into<String>) -> Self {
        Self {
            backend: Backend::Unconfigured(reason.into()),
            index_name: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            policy: IngestPolicy::default(),
            state: RwLock::new(IndexState::Unconfigured),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_policy(mut self, policy: IngestPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn state(&self) -> IndexState {
        *self.state.read()
    }

    pub fn backend_name(&self) -> &str {
        match &self.backend {
            Backend::Store(s) => s.name(),
            Backend::Unconfigured(_) => "none",
        }
    }

    fn store(&self) -> Result<&Arc<dyn DocumentStore>> {
        match &self.backend {
            Backend::Store(s) => Ok(s),
            Backend::Unconfigured(reason) => Err(Error::Config(reason.clone())),
        }
    }

    /// Record the outcome of a store call in the state machine: a
    /// connectivity failure marks the index unreachable, a successful call
    /// marks it healthy again.
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        let next = match &result {
            Err(Error::Connectivity(_)) => IndexState::Unreachable,
            Ok(_) => IndexState::Healthy,
            Err(_) => return result,
        };
        let mut state = self.state.write();
        if *state != IndexState::Unconfigured {
            *state = next;
        }
        result
    }

    /// Create the index with the message schema if it does not exist yet.
    ///
    /// Returns `true` when the index was created by this call.
    pub async fn ensure_index(&self) -> Result<bool> {
        let store = self.store()?;
        if self.observe(store.exists(&self.index_name).await)? {
            debug!(index = %self.index_name, "index already exists");
            return Ok(false);
        }
        self.observe(store.create(&self.index_name, &IndexSchema::messages()).await)?;
        info!(index = %self.index_name, backend = store.name(), "created index");
        Ok(true)
    }

    /// Drop the index. Used before a full re-import.
    pub async fn delete_index(&self) -> Result<()> {
        let store = self.store()?;
        self.observe(store.delete(&self.index_name).await)?;
        info!(index = %self.index_name, "deleted index");
        Ok(())
    }

    /// Execute a paginated query.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        let store = self.store()?;
        let structured = build(query);
        let started = Instant::now();
        let hits = self.observe(store.query(&self.index_name, &structured).await)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            total = hits.total,
            returned = hits.hits.len(),
            elapsed_ms,
            "search complete"
        );
        Ok(SearchResult {
            documents: hits.hits,
            total: hits.total,
            elapsed_ms,
        })
    }

    /// Upsert `docs` in batches of `batch_size`.
    pub async fn bulk_ingest(&self, docs: &[MessageDocument]) -> Result<IngestReport> {
        let store = self.store()?;
        let total_batches = docs.len().div_ceil(self.batch_size);
        let mut report = IngestReport::default();

        for (batch_idx, batch) in docs.chunks(self.batch_size).enumerate() {
            let response = self.observe(store.upsert_many(&self.index_name, batch).await)?;
            let failures: Vec<_> = response.failures().collect();
            report.batches += 1;
            report.imported += response.succeeded();

            if let Some(first) = failures.first() {
                let reason = format!(
                    "{}: {}",
                    first.id,
                    first.error.as_deref().unwrap_or("rejected")
                );
                match self.policy {
                    IngestPolicy::FailFast => {
                        return Err(Error::Ingest {
                            batch: batch_idx,
                            failed: failures.len(),
                            imported_before: report.imported - response.succeeded(),
                            reason,
                        });
                    }
                    IngestPolicy::SkipFailed => {
                        warn!(
                            batch = batch_idx + 1,
                            rejected = failures.len(),
                            %reason,
                            "batch had rejected documents, continuing"
                        );
                        report.rejected += failures.len();
                        report.failed_batches.push(batch_idx);
                    }
                }
            }

            info!(
                "batch {}/{} completed ({}/{} documents)",
                batch_idx + 1,
                total_batches,
                (batch_idx * self.batch_size + batch.len()),
                docs.len()
            );
        }

        Ok(report)
    }

    /// Total document count and approximate distinct ids, in one request.
    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let store = self.store()?;
        let aggs = self.observe(
            store
                .aggregate(&self.index_name, &AggregationSpec::message_stats())
                .await,
        )?;
        Ok(StatsSnapshot {
            total_messages: aggs.count,
            unique_authors: aggs.distinct(Field::AuthorId),
            unique_channels: aggs.distinct(Field::ChannelId),
            unique_guilds: aggs.distinct(Field::GuildId),
        })
    }

    /// Check the store. Never fails: problems are reported in the result.
    pub async fn check_health(&self) -> HealthReport {
        let store = match self.store() {
            Ok(s) => s,
            Err(e) => {
                return HealthReport {
                    healthy: false,
                    detail: Some(e.to_string()),
                }
            }
        };
        match store.ping().await {
            Ok(()) => {
                *self.state.write() = IndexState::Healthy;
                HealthReport {
                    healthy: true,
                    detail: None,
                }
            }
            Err(e) => {
                warn!(backend = store.name(), error = %e, "health check failed");
                *self.state.write() = IndexState::Unreachable;
                HealthReport {
                    healthy: false,
                    detail: Some(e.to_string()),
                }
            }
        }
    }
}
