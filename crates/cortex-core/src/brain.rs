//! The [`Brain`]: one handle over config, model backends, index and run stats.
//! The CLI and the server only talk to this.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::app_data;
use crate::backend::{with_timeout, BackendError, Embedder, Generator};
use crate::config::Config;
use crate::enhance::{self, EnhanceError, Task};
use crate::index::{self, IndexContext, IndexError, IndexSettings, RunGuard, RunLock};
use crate::notes::probe;
use crate::ollama::{OllamaClient, OllamaError};
use crate::search::{self, Collection, QueryError, SearchOutcome, Synthesis};
use crate::stats::{
    load_last_run, save_last_run, ComponentStatus, RunStats, RunStatus, StatsTracker, SystemStatus,
};
use crate::store::{write_atomic, StoreError, VectorStore};

/// Where the index snapshot and last run stats are kept between processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persistence {
    pub index: PathBuf,
    pub last_run: PathBuf,
}

impl Persistence {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            index: dir.join("index.json"),
            last_run: dir.join("last_run.json"),
        }
    }

    /// The default files in the app data directory.
    pub fn app_data() -> Option<Self> {
        Some(Self {
            index: app_data::index_path()?,
            last_run: app_data::last_run_path()?,
        })
    }
}

#[derive(Clone)]
pub struct Brain {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    store: RwLock<VectorStore>,
    stats: StatsTracker,
    run_lock: RunLock,
    persistence: Option<Persistence>,
}

impl Brain {
    /// In-memory brain; nothing is loaded or saved.
    pub fn new(config: Config, embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Self {
        Self::assemble(config, embedder, generator, VectorStore::new(), RunStats::default(), None)
    }

    /// Brain that restores the index and last run stats from `persistence`
    /// and saves them after every run.
    pub fn with_persistence(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        persistence: Persistence,
    ) -> Result<Self, StoreError> {
        let store = match VectorStore::load(&persistence.index) {
            Ok(store) => store,
            Err(e @ (StoreError::Json(_) | StoreError::Version(_))) => {
                tracing::warn!(
                    "ignoring index {}: {}; notes will be re-indexed",
                    persistence.index.display(),
                    e
                );
                VectorStore::new()
            }
            Err(e) => return Err(e),
        };
        let last_run = load_last_run(&persistence.last_run).unwrap_or_default();
        tracing::info!(
            "loaded index: {} notes, {} chunks",
            store.document_count(),
            store.len()
        );
        Ok(Self::assemble(
            config,
            embedder,
            generator,
            store,
            last_run,
            Some(persistence),
        ))
    }

    /// Brain backed by Ollama, persisting to the app data directory when
    /// `ingest.persist` is set.
    pub fn from_config(config: Config) -> Result<Self, BrainError> {
        let client = Arc::new(OllamaClient::from_config(&config.ollama)?);
        if !config.ingest.persist {
            return Ok(Self::new(config, client.clone(), client));
        }
        let persistence = Persistence::app_data().ok_or(BrainError::NoDataDir)?;
        Ok(Self::with_persistence(config, client.clone(), client, persistence)?)
    }

    fn assemble(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: VectorStore,
        stats: RunStats,
        persistence: Option<Persistence>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                embedder,
                generator,
                store: RwLock::new(store),
                stats: StatsTracker::with_initial(stats),
                run_lock: RunLock::new(),
                persistence,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_processing(&self) -> bool {
        self.inner.run_lock.is_running()
    }

    /// Run ingestion to completion. Fails only if another run is active.
    pub async fn process_all(&self, force: bool) -> Result<RunStats, IndexError> {
        let guard = self.inner.run_lock.try_acquire()?;
        Ok(self.run(&guard, force).await)
    }

    /// Start ingestion in the background. The run lock is taken before this
    /// returns, so a second call fails with [`IndexError::AlreadyRunning`].
    pub fn start_processing(&self, force: bool) -> Result<RunHandle, IndexError> {
        let guard = self.inner.run_lock.try_acquire()?;
        let brain = self.clone();
        let handle = tokio::spawn(async move { brain.run(&guard, force).await });
        Ok(RunHandle { handle })
    }

    async fn run(&self, guard: &RunGuard, force: bool) -> RunStats {
        let inner = &self.inner;
        let mut settings = IndexSettings::from_config(&inner.config);
        settings.force = force;
        let root = inner.config.notes_root_path();
        let ctx = IndexContext {
            embedder: inner.embedder.as_ref(),
            generator: inner.generator.as_ref(),
            store: &inner.store,
            stats: &inner.stats,
        };
        let stats = index::process_all(root.as_deref(), &settings, ctx, guard).await;
        if let Err(e) = self.persist(&stats).await {
            tracing::warn!("failed to save index: {}", e);
            inner.stats.update(|s| s.error = Some(format!("failed to save index: {}", e)));
        }
        inner.stats.snapshot()
    }

    async fn persist(&self, stats: &RunStats) -> Result<(), StoreError> {
        let Some(persistence) = &self.inner.persistence else {
            return Ok(());
        };
        if stats.status == RunStatus::Completed {
            let json = self.inner.store.read().await.to_json()?;
            write_atomic(&persistence.index, &json).await?;
        }
        save_last_run(&persistence.last_run, stats).await
    }

    /// Stats of the current or most recent run.
    pub fn stats(&self) -> RunStats {
        self.inner.stats.snapshot()
    }

    /// Probe every component. Changes nothing; safe while a run is active.
    pub async fn status(&self) -> SystemStatus {
        let timeout = self.inner.config.timeout();
        let parser = self
            .inner
            .config
            .notes_root_path()
            .is_some_and(|root| probe(&root));
        let (llm, embedder) = tokio::join!(
            with_timeout(timeout, self.inner.generator.list_models()),
            with_timeout(timeout, self.inner.embedder.ping()),
        );
        if let Err(e) = &llm {
            tracing::debug!("llm probe failed: {}", e);
        }
        if let Err(e) = &embedder {
            tracing::debug!("embedder probe failed: {}", e);
        }
        SystemStatus::from(ComponentStatus {
            parser,
            llm: llm.is_ok(),
            vector_store: embedder.is_ok(),
        })
    }

    /// Number of indexed notes and chunks.
    pub async fn index_size(&self) -> (usize, usize) {
        let store = self.inner.store.read().await;
        (store.document_count(), store.len())
    }

    /// Semantic search, with a synthesized answer when `search.synthesize` is on.
    pub async fn search(
        &self,
        query: &str,
        collection: Collection,
        limit: usize,
    ) -> Result<SearchOutcome, QueryError> {
        let inner = &self.inner;
        let timeout = inner.config.timeout();
        let results = search::search(
            inner.embedder.as_ref(),
            &inner.store,
            timeout,
            query,
            collection,
            limit,
        )
        .await?;
        let synthesis = if inner.config.search.synthesize && !results.is_empty() {
            let prompt = search::answer_prompt(query.trim(), &results);
            let text = search::synthesize(inner.generator.as_ref(), timeout, &prompt).await?;
            Some(Synthesis {
                title: "AI Answer".to_string(),
                text,
                journal_date: None,
            })
        } else {
            None
        };
        Ok(SearchOutcome { synthesis, results })
    }

    /// Journal chunks of `date`, with a day summary when `search.synthesize` is on.
    pub async fn search_by_date(
        &self,
        date: NaiveDate,
        limit: usize,
    ) -> Result<SearchOutcome, QueryError> {
        let inner = &self.inner;
        let results = search::search_by_date(&inner.store, date, limit).await;
        let synthesis = if inner.config.search.synthesize && !results.is_empty() {
            let prompt = search::day_summary_prompt(date, &results);
            let text =
                search::synthesize(inner.generator.as_ref(), inner.config.timeout(), &prompt)
                    .await?;
            Some(Synthesis {
                title: format!("Summary for {}", date.format("%Y-%m-%d")),
                text,
                journal_date: Some(date),
            })
        } else {
            None
        };
        Ok(SearchOutcome { synthesis, results })
    }

    /// Chunks carrying `tag`, newest journals first. No synthesis.
    pub async fn search_by_tag(
        &self,
        tag: &str,
        collection: Collection,
        limit: usize,
    ) -> Result<SearchOutcome, QueryError> {
        let results = search::search_by_tag(&self.inner.store, tag, collection, limit).await?;
        Ok(SearchOutcome {
            synthesis: None,
            results,
        })
    }

    pub async fn enhance(&self, content: &str, task: Task) -> Result<String, EnhanceError> {
        enhance::enhance(
            self.inner.generator.as_ref(),
            self.inner.config.timeout(),
            content,
            task,
        )
        .await
    }

    /// Models available on the LLM backend.
    pub async fn models(&self) -> Result<Vec<String>, BackendError> {
        with_timeout(self.inner.config.timeout(), self.inner.generator.list_models()).await
    }
}

/// A background ingestion run.
pub struct RunHandle {
    handle: JoinHandle<RunStats>,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end and return its final stats.
    pub async fn wait(self) -> Result<RunStats, IndexError> {
        self.handle
            .await
            .map_err(|e| IndexError::Aborted(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    #[error(transparent)]
    Ollama(#[from] OllamaError),
    #[error("failed to load index: {0}")]
    Store(#[from] StoreError),
    #[error("could not determine app data directory")]
    NoDataDir,
}
