//! # Discord Lens
//!
//! Browse and search archived Discord messages.
//!
//! Two subsystems sit behind the `dlens` CLI and its HTTP proxy:
//!
//! - **Entity resolution**: user, guild, and channel ids become display
//!   data through an ordered chain of Discord sources, with a TTL cache
//!   that coalesces concurrent lookups and a deterministic fallback that
//!   always produces a name.
//! - **Message search**: full-text and filtered queries over an
//!   Elasticsearch index, with batched bulk import and approximate
//!   statistics.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌─────────────────┐
//! │ HTTP / CLI   │──▶│EntityResolver │──▶│ ResolverChain   │──▶ Discord API
//! │ (axum, clap) │   │ (TTL + dedup) │   │ bot/public/widget│
//! └──────┬───────┘   └───────────────┘   └─────────────────┘
//!        │
//!        ▼
//! ┌──────────────┐   ┌───────────────┐
//! │ MessageIndex │──▶│ DocumentStore │──▶ Elasticsearch / memory
//! └──────────────┘   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`resolver`] | Strategy trait and resolver chain |
//! | [`cache`] | TTL cache with in-flight coalescing |
//! | [`discord`] | Discord REST strategies and CDN URLs |
//! | [`resolve`] | Per-kind caches behind one resolver |
//! | [`elasticsearch`] | Elasticsearch document store |
//! | [`index`] | Message index construction |
//! | [`ingest`] | JSON / NDJSON import |
//! | [`search`] | Search command |
//! | [`stats`] | Stats and health commands |
//! | [`server`] | HTTP proxy server |

pub mod cache;
pub mod config;
pub mod discord;
pub mod elasticsearch;
pub mod index;
pub mod ingest;
pub mod resolve;
pub mod resolver;
pub mod search;
pub mod server;
pub mod stats;

pub use discord_lens_core as core;
