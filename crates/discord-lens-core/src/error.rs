//! Error types for Discord Lens.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or inconsistent connection parameters. Raised at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied a malformed value (bad snowflake, page size too large).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The document store could not be reached.
    #[error("Store unreachable: {0}")]
    Connectivity(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A bulk batch had at least one rejected document. Batches before
    /// `batch` landed and hold `imported_before` documents.
    #[error("Ingest failed at batch {batch}: {failed} document(s) rejected, {imported_before} imported by earlier batches ({reason})")]
    Ingest {
        batch: usize,
        failed: usize,
        imported_before: usize,
        reason: String,
    },

    /// The store answered, but with an error we cannot interpret.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures a later retry may fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connectivity(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
