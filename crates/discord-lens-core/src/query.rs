//! Query builder.
//!
//! Turns a [`SearchQuery`] into a backend-neutral [`StructuredQuery`]:
//! an optional fuzzy, boosted full-text clause over `content`, exact-match
//! keyword filters ANDed together, a sort order, a pagination window, and
//! an optional highlight request.
//!
//! Store implementations translate a `StructuredQuery` into their own
//! dialect (Elasticsearch DSL, in-memory scan) but must honour the same
//! semantics:
//!
//! | Clause | Meaning |
//! |--------|---------|
//! | `text: None` | match all documents |
//! | `text: Some` | any term fuzzily matching a content token; score scales with matches × boost |
//! | `filters` | each `field == value`, all ANDed |
//! | `sort` | see [`SortOrder`] |
//! | `from` / `size` | window over the sorted full result set |

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{SearchFilters, SearchQuery, SortMode};

/// Default page size when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;
/// Boost applied to the content match.
pub const CONTENT_BOOST: f64 = 2.0;
/// Highlight fragment length in characters.
pub const HIGHLIGHT_FRAGMENT_SIZE: usize = 150;

/// Keyword fields that accept exact-match filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    AuthorId,
    ChannelId,
    GuildId,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::AuthorId => "author_id",
            Field::ChannelId => "channel_id",
            Field::GuildId => "guild_id",
        }
    }
}

/// Edit-distance tolerance for text terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fuzziness {
    /// Exact terms only.
    Exact,
    /// Scales with term length: 0 edits up to 2 chars, 1 up to 5, else 2.
    Auto,
}

impl Fuzziness {
    pub fn max_edits(&self, term_len: usize) -> usize {
        match self {
            Fuzziness::Exact => 0,
            Fuzziness::Auto => match term_len {
                0..=2 => 0,
                3..=5 => 1,
                _ => 2,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextClause {
    pub query: String,
    pub boost: f64,
    pub fuzziness: Fuzziness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermFilter {
    pub field: Field,
    pub value: String,
}

/// Final ordering of the matching set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Score desc, then timestamp desc, then message id desc.
    Score,
    /// Timestamp desc, then message id desc.
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub text: Option<TextClause>,
    pub filters: Vec<TermFilter>,
    pub sort: SortOrder,
    pub from: usize,
    pub size: usize,
    /// Fragment size when highlights are requested.
    pub highlight: Option<usize>,
}

/// Convert a 1-based page number and page size into `(offset, limit)`.
///
/// Page sizes above [`MAX_PAGE_SIZE`] are a caller error, not clamped
/// silently.
pub fn paginate(page: usize, page_size: usize) -> Result<(usize, usize)> {
    if page == 0 {
        return Err(Error::Validation("page numbers start at 1".into()));
    }
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(Error::Validation(format!(
            "page size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, page_size
        )));
    }
    let offset = (page - 1)
        .checked_mul(page_size)
        .ok_or_else(|| Error::Validation("page out of range".into()))?;
    Ok((offset, page_size))
}

impl SearchQuery {
    /// Build a paginated query from user filters.
    pub fn new(filters: SearchFilters, page: usize, page_size: usize, sort: SortMode) -> Result<Self> {
        let (offset, limit) = paginate(page, page_size)?;
        Ok(Self {
            filters: filters.normalized(),
            offset,
            limit,
            sort,
        })
    }
}

/// Translate a [`SearchQuery`] into clauses a store can execute.
pub fn build(query: &SearchQuery) -> StructuredQuery {
    let text = query.filters.text.as_ref().map(|q| TextClause {
        query: q.clone(),
        boost: CONTENT_BOOST,
        fuzziness: Fuzziness::Auto,
    });

    let filters = [
        (Field::AuthorId, &query.filters.author_id),
        (Field::ChannelId, &query.filters.channel_id),
        (Field::GuildId, &query.filters.guild_id),
    ]
    .into_iter()
    .filter_map(|(field, value)| {
        value.as_ref().map(|v| TermFilter {
            field,
            value: v.clone(),
        })
    })
    .collect();

    // Relevance without a text clause has nothing to rank by.
    let sort = match (query.sort, &text) {
        (SortMode::Relevance, Some(_)) => SortOrder::Score,
        _ => SortOrder::Timestamp,
    };

    let highlight = text.as_ref().map(|_| HIGHLIGHT_FRAGMENT_SIZE);

    StructuredQuery {
        text,
        filters,
        sort,
        from: query.offset,
        size: query.limit,
        highlight,
    }
}

/// Split a text query into lowercase alphanumeric terms, the way the
/// standard analyzer would.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Levenshtein distance with an early exit once `max` is exceeded.
pub fn within_edits(a: &str, b: &str, max: usize) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max {
        return false;
    }
    if max == 0 {
        return a == b;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        let mut row_min = cur[0];
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
            row_min = row_min.min(cur[j]);
        }
        if row_min > max {
            return false;
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()] <= max
}
