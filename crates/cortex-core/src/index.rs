//! Index pipeline: read → chunk → (summarize) → embed → store.
//!
//! One run walks the whole graph. A note that fails (bad file, embedding or LLM
//! error) is counted and skipped; only an unavailable notes root fails the run.
//! Notes whose content and settings are unchanged since the last run are skipped,
//! so re-running on an unchanged graph leaves the store as it was.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};

use crate::backend::{with_timeout, BackendError, Embedder, Generator};
use crate::chunks::{chunk_document, summary_chunk};
use crate::config::{ChunkingConfig, Config};
use crate::enhance::{self, EnhanceError, Task};
use crate::notes::{document_id, NoteDocument, NoteKind, NoteReader, ReaderOptions, ScanError};
use crate::stats::{RunStats, RunStatus, StatsTracker};
use crate::store::{StoreError, VectorStore};
use crate::tags::TagPolicy;

/// Documents buffered between the directory walker and the pipeline.
const READ_AHEAD: usize = 16;

/// Everything about a run that is decided by configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    pub chunking: ChunkingConfig,
    pub reader: ReaderOptions,
    pub enhance: bool,
    pub enhance_journals: bool,
    pub enhance_max_chars: usize,
    pub timeout: Duration,
    /// Re-index notes even when their fingerprint is unchanged.
    pub force: bool,
}

impl IndexSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.clone(),
            reader: ReaderOptions {
                tag_policy: TagPolicy {
                    wiki_links_as_tags: config.ingest.wiki_links_as_tags,
                    strip_markup: config.ingest.strip_tag_markup,
                },
            },
            enhance: config.ingest.enhance,
            enhance_journals: config.ingest.enhance_journals,
            enhance_max_chars: config.ingest.enhance_max_chars,
            timeout: config.timeout(),
            force: false,
        }
    }

    /// Whether `doc` gets an LLM summary chunk.
    fn summarizes(&self, doc: &NoteDocument) -> bool {
        let kind_enabled = match doc.kind {
            NoteKind::Page => self.enhance,
            NoteKind::Journal => self.enhance && self.enhance_journals,
        };
        kind_enabled && !doc.raw_text.is_empty() && doc.raw_text.len() <= self.enhance_max_chars
    }

    /// Hash of the note content and every setting that shapes its records.
    /// The summary model only counts for notes that get a summary.
    fn fingerprint(&self, doc: &NoteDocument, embed_model: &str, summary_model: &str) -> String {
        let policy = self.reader.tag_policy;
        let summarizes = self.summarizes(doc);
        let key = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            doc.content_hash,
            self.chunking.max_chars,
            self.chunking.overlap_chars,
            policy.wiki_links_as_tags,
            policy.strip_markup,
            summarizes,
            embed_model,
            if summarizes { summary_model } else { "" },
        );
        hex::encode(Sha256::digest(key.as_bytes()))
    }
}

/// Collaborators a run reads from and writes to.
#[derive(Clone, Copy)]
pub struct IndexContext<'a> {
    pub embedder: &'a dyn Embedder,
    pub generator: &'a dyn Generator,
    pub store: &'a RwLock<VectorStore>,
    pub stats: &'a StatsTracker,
}

/// Allows at most one ingestion run at a time.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    running: Arc<AtomicBool>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or fail with [`IndexError::AlreadyRunning`].
    pub fn try_acquire(&self) -> Result<RunGuard, IndexError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IndexError::AlreadyRunning)?;
        Ok(RunGuard {
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof that the caller holds the run lock; releases it on drop.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

enum Outcome {
    Unchanged,
    Indexed { chunks: usize, enhanced: bool },
}

/// Runs the full pipeline over `root` and returns the final stats.
/// Progress is visible through `ctx.stats` while the run is going.
pub async fn process_all(
    root: Option<&Path>,
    settings: &IndexSettings,
    ctx: IndexContext<'_>,
    _guard: &RunGuard,
) -> RunStats {
    ctx.stats.begin(Utc::now());

    let reader = match root {
        Some(root) => NoteReader::open(root, settings.reader),
        None => Err(ScanError::SourceUnavailable(
            Default::default(),
            "no notes directory configured".to_string(),
        )),
    };
    let reader = match reader {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!("ingestion failed: {}", e);
            ctx.stats.update(|s| {
                s.error = Some(e.to_string());
                s.finish(RunStatus::Failed, Utc::now());
            });
            return ctx.stats.snapshot();
        }
    };
    tracing::info!("ingestion started: {}", reader.root().display());

    let root = reader.root().to_path_buf();
    let (tx, mut rx) = mpsc::channel(READ_AHEAD);
    let walker = tokio::task::spawn_blocking(move || {
        for doc in reader.documents() {
            if tx.blocking_send(doc).is_err() {
                break;
            }
        }
    });

    let mut seen = HashSet::new();
    let mut walk_complete = true;
    while let Some(item) = rx.recv().await {
        let doc = match item {
            Ok(doc) => doc,
            Err(e) => {
                match e.path() {
                    Some(path) => {
                        seen.insert(document_id(path.strip_prefix(&root).unwrap_or(path)));
                    }
                    None => walk_complete = false,
                }
                tracing::warn!("skipping note: {}", e);
                ctx.stats.update(|s| s.errors += 1);
                continue;
            }
        };
        seen.insert(doc.id.clone());

        match index_document(&doc, settings, ctx).await {
            Ok(outcome) => ctx.stats.update(|s| {
                match doc.kind {
                    NoteKind::Page => s.pages_processed += 1,
                    NoteKind::Journal => s.journals_processed += 1,
                }
                match outcome {
                    Outcome::Unchanged => s.unchanged += 1,
                    Outcome::Indexed { chunks, enhanced } => {
                        s.chunks_indexed += chunks;
                        if enhanced {
                            s.enhanced_count += 1;
                        }
                    }
                }
            }),
            Err(e) => {
                tracing::warn!("failed to index {}: {}", doc.source_path.display(), e);
                ctx.stats.update(|s| s.errors += 1);
            }
        }
    }
    if let Err(e) = walker.await {
        tracing::error!("note walker stopped unexpectedly: {}", e);
        walk_complete = false;
    }

    if walk_complete {
        let removed = prune_missing(ctx.store, &seen).await;
        ctx.stats.update(|s| s.removed = removed);
    } else {
        tracing::warn!("notes walk was incomplete; keeping notes that were not seen");
    }

    ctx.stats.update(|s| s.finish(RunStatus::Completed, Utc::now()));
    let stats = ctx.stats.snapshot();
    tracing::info!(
        "ingestion completed: {} pages, {} journals ({} unchanged), {} enhanced, {} errors, {} removed",
        stats.pages_processed,
        stats.journals_processed,
        stats.unchanged,
        stats.enhanced_count,
        stats.errors,
        stats.removed,
    );
    stats
}

async fn index_document(
    doc: &NoteDocument,
    settings: &IndexSettings,
    ctx: IndexContext<'_>,
) -> Result<Outcome, IndexError> {
    let fingerprint = settings.fingerprint(doc, ctx.embedder.model(), ctx.generator.model());
    if !settings.force && ctx.store.read().await.fingerprint(&doc.id) == Some(fingerprint.as_str()) {
        return Ok(Outcome::Unchanged);
    }

    let mut chunks = chunk_document(doc, &settings.chunking);
    let enhanced = settings.summarizes(doc);
    if enhanced {
        let summary = enhance::enhance(
            ctx.generator,
            settings.timeout,
            &doc.raw_text,
            Task::Summarize,
        )
        .await?;
        chunks.push(summary_chunk(doc, summary));
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = with_timeout(settings.timeout, ctx.embedder.embed_batch(&texts)).await?;
    if embeddings.iter().any(Vec::is_empty) {
        return Err(BackendError::InvalidResponse("empty embedding".to_string()).into());
    }

    let count = chunks.len();
    ctx.store.write().await.replace_document(
        &doc.id,
        fingerprint,
        doc.source_path.clone(),
        chunks,
        embeddings,
    )?;
    tracing::debug!("indexed {} ({} chunks)", doc.source_path.display(), count);
    Ok(Outcome::Indexed {
        chunks: count,
        enhanced,
    })
}

/// Remove notes whose files were not seen in this run.
async fn prune_missing(store: &RwLock<VectorStore>, seen: &HashSet<String>) -> usize {
    let stale: Vec<String> = store
        .read()
        .await
        .documents()
        .filter(|(id, _)| !seen.contains(*id))
        .map(|(id, _)| id.clone())
        .collect();
    if stale.is_empty() {
        return 0;
    }
    let mut store = store.write().await;
    for id in &stale {
        store.remove_document(id);
    }
    tracing::info!("removed {} notes that no longer exist", stale.len());
    stale.len()
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("an ingestion run is already in progress")]
    AlreadyRunning,
    #[error("ingestion task failed: {0}")]
    Aborted(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("summary failed: {0}")]
    Summary(#[from] EnhanceError),
    #[error("index update failed: {0}")]
    Store(#[from] StoreError),
}
