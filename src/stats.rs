//! `dlens stats` and `dlens health`.
//!
//! Distinct counts come from the store's cardinality estimate and are
//! approximate for large sets.

use anyhow::{bail, Result};
use discord_lens_core::MessageIndex;

pub async fn run_stats(index: &MessageIndex) -> Result<()> {
    let stats = index.stats().await?;

    println!("Discord Lens: Index Stats");
    println!("=========================");
    println!();
    println!("  Backend:   {}", index.backend_name());
    println!("  Index:     {}", index.index_name());
    println!();
    println!("  Messages:  {}", format_count(stats.total_messages));
    println!("  Authors:   ~{}", format_count(stats.unique_authors));
    println!("  Channels:  ~{}", format_count(stats.unique_channels));
    println!("  Guilds:    ~{}", format_count(stats.unique_guilds));
    Ok(())
}

/// Exits non-zero when the index is unhealthy.
pub async fn run_health(index: &MessageIndex) -> Result<()> {
    let report = index.check_health().await;
    if report.healthy {
        println!("{} ({}): healthy", index.backend_name(), index.index_name());
        return Ok(());
    }
    bail!(
        "{}: unhealthy: {}",
        index.backend_name(),
        report.detail.unwrap_or_else(|| "no detail".into())
    )
}

/// `1234567` → `1,234,567`.
fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
