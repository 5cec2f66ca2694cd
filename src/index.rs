//! Message index construction from `[index]` config.

use discord_lens_core::store::memory::InMemoryStore;
use discord_lens_core::{MessageIndex, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::{IndexBackend, IndexConfig};
use crate::elasticsearch::ElasticsearchStore;

/// Build the configured index. `backend = "none"` yields an unconfigured
/// index that reports itself unhealthy; bad connection settings are an
/// [`Error::Config`](discord_lens_core::Error::Config).
pub fn open_index(config: &IndexConfig) -> Result<MessageIndex> {
    let index = match config.backend {
        IndexBackend::Elasticsearch => {
            let store = ElasticsearchStore::from_config(config)?;
            info!(url = store.base_url(), index = %config.index_name, "using elasticsearch");
            MessageIndex::new(Arc::new(store), config.index_name.clone())
        }
        IndexBackend::Memory => {
            info!(index = %config.index_name, "using in-memory index");
            MessageIndex::new(Arc::new(InMemoryStore::new()), config.index_name.clone())
        }
        IndexBackend::None => {
            return Ok(MessageIndex::unconfigured(
                "no search backend configured (set index.backend)",
            ))
        }
    };
    Ok(index
        .with_batch_size(config.batch_size)
        .with_policy(config.ingest_policy))
}
