//! # Discord Lens CLI (`dlens`)
//!
//! ## Usage
//!
//! ```bash
//! dlens --config ./config/dlens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dlens init` | Create the message index if it does not exist |
//! | `dlens import <path>` | Bulk-import JSON / NDJSON message exports |
//! | `dlens search [text]` | Search messages |
//! | `dlens stats` | Message count and approximate distinct ids |
//! | `dlens health` | Check the search backend |
//! | `dlens resolve <kind> <id>` | Resolve a user, guild, or channel |
//! | `dlens serve` | Start the HTTP proxy server |
//!
//! Logs go to stderr; set `RUST_LOG` to adjust (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use discord_lens::config::{self, Config};
use discord_lens::core::{EntityKind, SortMode};
use discord_lens::discord::Cdn;
use discord_lens::index::open_index;
use discord_lens::resolve::{run_resolve, EntityResolver};
use discord_lens::search::{run_search, SearchArgs};
use discord_lens::{ingest, server, stats};

/// Discord Lens: browse and search archived Discord messages.
#[derive(Parser)]
#[command(name = "dlens", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/dlens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the message index. Idempotent.
    Init,

    /// Import message exports (a file or a directory of .json / .ndjson files).
    Import {
        path: PathBuf,

        /// Drop and recreate the index first.
        #[arg(long)]
        recreate: bool,
    },

    /// Search indexed messages.
    Search {
        /// Full-text query. Omit to list messages newest first.
        text: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        channel: Option<String>,

        #[arg(long)]
        guild: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,

        /// `recency` or `relevance`.
        #[arg(long, default_value = "recency")]
        sort: SortMode,
    },

    /// Show index statistics.
    Stats,

    /// Check that the search backend is reachable.
    Health,

    /// Resolve an entity id to display data.
    Resolve {
        /// `user`, `guild`, or `channel`.
        kind: EntityKind,

        id: String,

        /// Guild the entity was seen in, for widget lookups.
        #[arg(long)]
        guild: Option<String>,
    },

    /// Start the HTTP proxy server on `[server].bind`.
    Serve,
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::warn!(path = %path.display(), "config file not found, using defaults");
    let mut cfg = Config::minimal();
    config::apply_env(&mut cfg, |key| std::env::var(key).ok());
    config::validate(&cfg)?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let index = open_index(&cfg.index)?;
            if index.ensure_index().await? {
                println!("Created index {}.", index.index_name());
            } else {
                println!("Index {} already exists.", index.index_name());
            }
        }
        Commands::Import { path, recreate } => {
            let index = open_index(&cfg.index)?;
            ingest::run_import(&index, &path, recreate).await?;
        }
        Commands::Search {
            text,
            author,
            channel,
            guild,
            page,
            page_size,
            sort,
        } => {
            let index = open_index(&cfg.index)?;
            let args = SearchArgs {
                text,
                author_id: author,
                channel_id: channel,
                guild_id: guild,
                page,
                page_size,
                sort,
            };
            run_search(&index, &args).await?;
        }
        Commands::Stats => {
            stats::run_stats(&open_index(&cfg.index)?).await?;
        }
        Commands::Health => {
            stats::run_health(&open_index(&cfg.index)?).await?;
        }
        Commands::Resolve { kind, id, guild } => {
            let resolver = EntityResolver::from_config(&cfg.discord, &cfg.cache)
                .context("Failed to set up entity sources")?;
            let cdn = Cdn::from_config(&cfg.discord);
            run_resolve(&resolver, &cdn, kind, &id, guild.as_deref()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
