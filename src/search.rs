//! `dlens search`: run a query against the message index and print hits.

use anyhow::Result;
use discord_lens_core::models::{SearchFilters, SearchResult};
use discord_lens_core::store::parse_timestamp;
use discord_lens_core::{MessageIndex, SearchQuery, SortMode};

/// Arguments of one search, as given on the command line or query string.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub text: Option<String>,
    pub author_id: Option<String>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub page: usize,
    pub page_size: usize,
    pub sort: SortMode,
}

impl SearchArgs {
    pub fn to_query(&self) -> discord_lens_core::Result<SearchQuery> {
        let filters = SearchFilters {
            text: self.text.clone(),
            author_id: self.author_id.clone(),
            channel_id: self.channel_id.clone(),
            guild_id: self.guild_id.clone(),
        };
        SearchQuery::new(filters, self.page, self.page_size, self.sort)
    }
}

pub async fn run_search(index: &MessageIndex, args: &SearchArgs) -> Result<()> {
    let query = args.to_query()?;
    let result = index.search(&query).await?;
    print_results(&result, args);
    Ok(())
}

fn print_results(result: &SearchResult, args: &SearchArgs) {
    if result.documents.is_empty() {
        println!("No results.");
        return;
    }

    let first = (args.page - 1) * args.page_size;
    for (i, hit) in result.documents.iter().enumerate() {
        let msg = &hit.message;
        let when = parse_timestamp(&msg.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| msg.timestamp.clone());
        match hit.score {
            Some(score) => println!("{}. [{:.2}] {}", first + i + 1, score, when),
            None => println!("{}. {}", first + i + 1, when),
        }
        println!("    author: {}  channel: {}  guild: {}", msg.author_id, msg.channel_id, msg.guild_id);
        let excerpt = hit.highlight.as_deref().unwrap_or(&msg.content);
        println!("    \"{}\"", truncate(excerpt.replace('\n', " ").trim(), 200));
        println!("    id: {}", msg.message_id);
        println!();
    }
    println!(
        "{} of {} matches (page {}, {}ms)",
        result.documents.len(),
        result.total,
        args.page,
        result.elapsed_ms
    );
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
