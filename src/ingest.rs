//! Batch import of archived messages.
//!
//! Reads Discord message exports (JSON arrays or NDJSON, one file or a
//! directory walked recursively), drops messages missing a required id or
//! timestamp, sorts the rest newest first, and hands them to
//! [`MessageIndex::bulk_ingest`].

use anyhow::{bail, Context, Result};
use discord_lens_core::store::parse_timestamp;
use discord_lens_core::{MessageDocument, MessageIndex};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const EXTENSIONS: [&str; 3] = ["json", "ndjson", "jsonl"];

/// Messages read from disk, plus what was left behind.
#[derive(Debug, Default)]
pub struct LoadedMessages {
    pub docs: Vec<MessageDocument>,
    pub files: usize,
    /// Records missing a required field.
    pub skipped: usize,
    /// Files that could not be read or parsed at all.
    pub unreadable: Vec<PathBuf>,
}

/// Export records are loosely typed; anything may be missing.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl RawMessage {
    fn into_document(self) -> Option<MessageDocument> {
        fn required(v: Option<String>) -> Option<String> {
            v.filter(|s| !s.trim().is_empty())
        }
        let doc = MessageDocument {
            message_id: required(self.message_id)?,
            content: self.content.unwrap_or_default(),
            author_id: required(self.author_id)?,
            channel_id: required(self.channel_id)?,
            guild_id: required(self.guild_id)?,
            timestamp: required(self.timestamp)?,
        };
        Some(doc)
    }
}

/// Parse one export file. A body starting with `[` is a JSON array,
/// anything else is NDJSON.
pub fn parse_export(content: &str) -> Result<(Vec<MessageDocument>, usize)> {
    let trimmed = content.trim_start();
    let raw: Vec<RawMessage> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("invalid JSON array")?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).with_context(|| format!("invalid JSON on line {}", n + 1))
            })
            .collect::<Result<_>>()?
    };

    let total = raw.len();
    let docs: Vec<_> = raw.into_iter().filter_map(RawMessage::into_document).collect();
    let skipped = total - docs.len();
    Ok((docs, skipped))
}

fn is_export(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e))
}

/// Load every export under `path`, newest message first.
pub fn load_messages(path: &Path) -> Result<LoadedMessages> {
    if !path.exists() {
        bail!("Import path does not exist: {}", path.display());
    }

    let mut files: Vec<PathBuf> = if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        let mut found = Vec::new();
        for entry in WalkDir::new(path) {
            let entry = entry?;
            if entry.file_type().is_file() && is_export(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found
    };
    files.sort();

    let mut loaded = LoadedMessages::default();
    for file in files {
        let parsed = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))
            .and_then(|content| parse_export(&content));
        match parsed {
            Ok((docs, skipped)) => {
                info!(file = %file.display(), valid = docs.len(), skipped, "loaded export");
                loaded.files += 1;
                loaded.skipped += skipped;
                loaded.docs.extend(docs);
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "skipping unreadable export");
                loaded.unreadable.push(file);
            }
        }
    }

    // Newest first; unparseable timestamps last.
    loaded
        .docs
        .sort_by_cached_key(|d| std::cmp::Reverse(parse_timestamp(&d.timestamp)));
    Ok(loaded)
}

/// `dlens import`: load exports and bulk-ingest them.
pub async fn run_import(index: &MessageIndex, path: &Path, recreate: bool) -> Result<()> {
    let loaded = load_messages(path)?;
    println!(
        "Loaded {} messages from {} file(s) ({} skipped, {} unreadable)",
        loaded.docs.len(),
        loaded.files,
        loaded.skipped,
        loaded.unreadable.len()
    );
    if loaded.docs.is_empty() {
        bail!("No valid messages found to import");
    }

    let created = index.ensure_index().await?;
    if recreate && !created {
        index.delete_index().await?;
        index.ensure_index().await?;
        println!("Recreated index {}", index.index_name());
    }

    let report = index
        .bulk_ingest(&loaded.docs)
        .await
        .context("Import failed")?;

    println!("import {}", path.display());
    println!("  batches:   {}", report.batches);
    println!("  imported:  {}", report.imported);
    if report.rejected > 0 {
        println!(
            "  rejected:  {} (batches {:?})",
            report.rejected, report.failed_batches
        );
    }
    println!("ok");
    Ok(())
}
