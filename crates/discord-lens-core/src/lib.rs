//! # Discord Lens Core
//!
//! Shared logic for Discord Lens: entity and message models, snowflake
//! handling, deterministic fallback identities, the query builder, the
//! document store abstraction, and the message index facade.
//!
//! This crate contains no HTTP client, async runtime, or filesystem I/O.
//! Upstream entity sources and concrete search backends live in the
//! `discord-lens` application crate and plug in through
//! [`store::DocumentStore`].

pub mod error;
pub mod fallback;
pub mod models;
pub mod query;
pub mod search;
pub mod snowflake;
pub mod store;

pub use error::{Error, Result};
pub use models::{EntityKind, EntityRecord, MessageDocument, SearchQuery, SortMode};
pub use snowflake::Snowflake;
pub use search::{IndexState, IngestPolicy, IngestReport, MessageIndex};
