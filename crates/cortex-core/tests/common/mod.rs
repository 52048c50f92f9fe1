//! Deterministic model backends and graph fixtures for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_core::{BackendError, Brain, Config, Embedder, Generator};
use tokio::sync::Semaphore;

/// Embeds text as letter counts (a..z) plus a constant component, so texts
/// sharing letters score close and identical texts get identical vectors.
#[derive(Default)]
pub struct LetterEmbedder {
    pub calls: AtomicUsize,
    /// Texts containing this marker fail to embed.
    pub fail_on: Option<String>,
    /// When set, every call waits for a permit first.
    pub gate: Option<Arc<Semaphore>>,
    /// When set, every call sleeps this long first.
    pub delay: Option<Duration>,
}

pub fn letter_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; 27];
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
    }
    v[26] = 1.0;
    v
}

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model(&self) -> &str {
        "letters"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(marker) = &self.fail_on {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(BackendError::Unavailable("embedding refused".into()));
            }
        }
        Ok(texts.iter().map(|t| letter_vector(t)).collect())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Answers every prompt with a fixed reply and counts calls.
pub struct ScriptedGenerator {
    pub reply: String,
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    /// When set, every generate call waits for a permit first.
    pub gate: Option<Arc<Semaphore>>,
    pub down: bool,
}

impl ScriptedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            delay: None,
            gate: None,
            down: false,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(BackendError::Unavailable("connection refused".into()));
        }
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.reply.clone())
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        if self.down {
            return Err(BackendError::Unavailable("connection refused".into()));
        }
        Ok(vec!["scripted".into(), "letters".into()])
    }
}

/// Test config: notes at `root`, short timeout, no synthesis.
pub fn config_for(root: &Path) -> Config {
    let mut config = Config::default();
    config.notes_root = Some(root.to_string_lossy().into_owned());
    config.ollama.timeout_secs = 5;
    config.search.synthesize = false;
    config
}

pub fn brain(config: Config, embedder: LetterEmbedder, generator: ScriptedGenerator) -> Brain {
    Brain::new(config, Arc::new(embedder), Arc::new(generator))
}

/// Writes `contents` to `root/relative`, creating parent directories.
pub fn write_note(root: &Path, relative: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

/// A small graph: two pages and two journals.
pub fn sample_graph(root: &Path) {
    write_note(
        root,
        "pages/Rust.md",
        "Rust ownership and borrowing keep memory safe.\n\nLifetimes tie references to owners.",
    );
    write_note(
        root,
        "pages/Gardening.md",
        "tags:: hobby\n\nTomatoes need sun and water every day.",
    );
    write_note(
        root,
        "journals/2024_01_05.md",
        "- Met with #Alice about [[Project X]]\n- Planned the next sprint",
    );
    write_note(root, "journals/2024_01_06.md", "- Quiet day, read a book");
}
