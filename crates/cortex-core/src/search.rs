//! Semantic search over the index, date lookup, and answer synthesis.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::backend::{with_timeout, BackendError, Embedder, Generator};
use crate::chunks::Chunk;
use crate::notes::NoteKind;
use crate::store::VectorStore;

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 50;

/// Characters of each result quoted in a synthesis prompt.
const PROMPT_EXCERPT_CHARS: usize = 500;

/// Which notes a query looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    #[default]
    All,
    Notes,
    Journals,
}

impl Collection {
    pub fn accepts(self, chunk: &Chunk) -> bool {
        match self {
            Collection::All => true,
            Collection::Notes => chunk.metadata.note_kind == NoteKind::Page,
            Collection::Journals => chunk.metadata.note_kind == NoteKind::Journal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::All => "all",
            Collection::Notes => "notes",
            Collection::Journals => "journals",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(Collection::All),
            "notes" | "pages" => Ok(Collection::Notes),
            "journals" => Ok(Collection::Journals),
            _ => Err(QueryError::InvalidCollection(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A model-written answer or day summary, shown above the hits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Synthesis {
    pub title: String,
    pub text: String,
    pub journal_date: Option<NaiveDate>,
}

/// Result list plus the optional synthesized lead item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub synthesis: Option<Synthesis>,
    pub results: Vec<ScoredChunk>,
}

/// Clamp a requested result count into `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIMIT)
}

/// Embed `query` and return the best matching chunks in `collection`.
pub async fn search(
    embedder: &dyn Embedder,
    store: &RwLock<VectorStore>,
    timeout: Duration,
    query: &str,
    collection: Collection,
    limit: usize,
) -> Result<Vec<ScoredChunk>, QueryError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(QueryError::EmptyInput);
    }
    let limit = clamp_limit(limit);
    let embedding = with_timeout(timeout, embedder.embed(query)).await?;
    let hits = store
        .read()
        .await
        .search(&embedding, limit, |c| collection.accepts(c));
    tracing::debug!(
        "search: collection={} limit={} hits={}",
        collection,
        limit,
        hits.len()
    );
    Ok(hits
        .into_iter()
        .map(|(chunk, score)| ScoredChunk { chunk, score })
        .collect())
}

/// Chunks from the journal of `date`, each with score 1.0.
pub async fn search_by_date(
    store: &RwLock<VectorStore>,
    date: NaiveDate,
    limit: usize,
) -> Vec<ScoredChunk> {
    store
        .read()
        .await
        .by_date(date, clamp_limit(limit))
        .into_iter()
        .map(|chunk| ScoredChunk { chunk, score: 1.0 })
        .collect()
}

/// Chunks tagged `tag` in `collection`, each with score 1.0. A leading `#` is ignored.
pub async fn search_by_tag(
    store: &RwLock<VectorStore>,
    tag: &str,
    collection: Collection,
    limit: usize,
) -> Result<Vec<ScoredChunk>, QueryError> {
    let tag = tag.trim().trim_start_matches('#').trim();
    if tag.is_empty() {
        return Err(QueryError::EmptyInput);
    }
    let hits = store
        .read()
        .await
        .by_tag(tag, clamp_limit(limit), |c| collection.accepts(c));
    tracing::debug!("tag search: tag={} collection={} hits={}", tag, collection, hits.len());
    Ok(hits
        .into_iter()
        .map(|chunk| ScoredChunk { chunk, score: 1.0 })
        .collect())
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| QueryError::InvalidDate(value.to_string()))
}

pub fn answer_prompt(query: &str, results: &[ScoredChunk]) -> String {
    format!(
        "Based on these notes:\n\n{}\n\nAnswer this question: {}\n\
         If the notes do not contain the answer, say so.",
        excerpts(results),
        query
    )
}

pub fn day_summary_prompt(date: NaiveDate, results: &[ScoredChunk]) -> String {
    format!(
        "Here are my notes from {}:\n\n{}\n\nSummarize what happened that day in a few sentences.",
        date.format("%Y-%m-%d"),
        excerpts(results)
    )
}

fn excerpts(results: &[ScoredChunk]) -> String {
    results
        .iter()
        .map(|r| {
            let body = r.chunk.body();
            let mut excerpt: String = body.chars().take(PROMPT_EXCERPT_CHARS).collect();
            if excerpt.len() < body.len() {
                excerpt.push_str("...");
            }
            format!("From \"{}\":\n{}", r.chunk.metadata.title, excerpt)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Ask the model to write from `prompt`. An empty reply is an error.
pub async fn synthesize(
    generator: &dyn Generator,
    timeout: Duration,
    prompt: &str,
) -> Result<String, QueryError> {
    let reply = with_timeout(timeout, generator.generate(prompt)).await?;
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(QueryError::EmptyReply);
    }
    Ok(reply.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    EmptyInput,
    #[error("unknown collection: {0} (expected all, notes or journals)")]
    InvalidCollection(String),
    #[error("invalid date: {0} (expected YYYY-MM-DD)")]
    InvalidDate(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("the model returned an empty reply")]
    EmptyReply,
}
