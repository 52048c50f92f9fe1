//! In-memory vector store for chunk embeddings, grouped by parent note.
//! Supports whole-note replacement, similarity search, date lookup, and JSON snapshots.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::chunks::Chunk;

const SNAPSHOT_VERSION: u32 = 1;

/// A chunk with its embedding, stored for similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    /// Normalized embedding vector (unit length for cosine similarity via dot product).
    pub vector: Vec<f32>,
}

/// All records of one note plus the fingerprint they were built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub fingerprint: String,
    pub source_path: PathBuf,
    pub records: Vec<EmbeddingRecord>,
}

/// In-memory vector store. Holds chunks and their embeddings; supports similarity search.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStore {
    documents: BTreeMap<String, StoredDocument>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    store: &'a VectorStore,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    store: VectorStore,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every record of `parent_id` with `chunks` and their embeddings.
    /// Embeddings are normalized before storage. Nothing changes on error.
    pub fn replace_document(
        &mut self,
        parent_id: &str,
        fingerprint: String,
        source_path: PathBuf,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::CountMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }
        if let Some(stray) = chunks.iter().find(|c| c.parent_id != parent_id) {
            return Err(StoreError::ForeignChunk(stray.chunk_id.clone()));
        }
        let records = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, vector)| EmbeddingRecord {
                chunk,
                vector: normalize(&vector),
            })
            .collect();
        self.documents.insert(
            parent_id.to_string(),
            StoredDocument {
                fingerprint,
                source_path,
                records,
            },
        );
        Ok(())
    }

    /// Drop a note and all its records. Returns whether it was present.
    pub fn remove_document(&mut self, parent_id: &str) -> bool {
        self.documents.remove(parent_id).is_some()
    }

    /// Fingerprint the note was last indexed with.
    pub fn fingerprint(&self, parent_id: &str) -> Option<&str> {
        self.documents.get(parent_id).map(|d| d.fingerprint.as_str())
    }

    pub fn documents(&self) -> impl Iterator<Item = (&String, &StoredDocument)> {
        self.documents.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &EmbeddingRecord> {
        self.documents.values().flat_map(|d| d.records.iter())
    }

    /// Search for chunks most similar to the query embedding among those accepted by
    /// `filter`. Returns up to k results with cosine similarity scores, best first;
    /// ties go to the more recent journal date, then the smaller chunk id.
    pub fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: impl Fn(&Chunk) -> bool,
    ) -> Vec<(Chunk, f32)> {
        if query_embedding.is_empty() || k == 0 {
            return Vec::new();
        }
        let q_norm = normalize(query_embedding);
        let mut scored: Vec<(&Chunk, f32)> = self
            .records()
            .filter(|r| filter(&r.chunk))
            .map(|r| (&r.chunk, dot(&q_norm, &r.vector)))
            .collect();
        scored.sort_by(|a, b| rank(a.0, a.1, b.0, b.1));
        scored
            .into_iter()
            .take(k)
            .map(|(chunk, score)| (chunk.clone(), score))
            .collect()
    }

    /// Chunks dated `date`: grouped by note path, summaries first, then by position.
    pub fn by_date(&self, date: NaiveDate, k: usize) -> Vec<Chunk> {
        let mut hits: Vec<&Chunk> = self
            .records()
            .map(|r| &r.chunk)
            .filter(|c| c.metadata.journal_date == Some(date))
            .collect();
        hits.sort_by(|a, b| {
            a.metadata
                .source_path
                .cmp(&b.metadata.source_path)
                .then_with(|| b.is_summary().cmp(&a.is_summary()))
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.into_iter().take(k).cloned().collect()
    }

    /// Chunks tagged `tag` (case-insensitive) among those accepted by `filter`:
    /// newest journal first, then by note path, summaries first, then by position.
    pub fn by_tag(&self, tag: &str, k: usize, filter: impl Fn(&Chunk) -> bool) -> Vec<Chunk> {
        let tag = tag.trim().trim_start_matches('#');
        let mut hits: Vec<&Chunk> = self
            .records()
            .map(|r| &r.chunk)
            .filter(|c| c.metadata.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
            .filter(|c| filter(*c))
            .collect();
        hits.sort_by(|a, b| {
            b.metadata
                .journal_date
                .cmp(&a.metadata.journal_date)
                .then_with(|| a.metadata.source_path.cmp(&b.metadata.source_path))
                .then_with(|| b.is_summary().cmp(&a.is_summary()))
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.into_iter().take(k).cloned().collect()
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.documents.values().map(|d| d.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            store: self,
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Version(snapshot.version));
        }
        Ok(snapshot.store)
    }

    /// Load a snapshot; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(StoreError::Io(path.to_path_buf(), e)),
        }
    }
}

/// Write `contents` next to `path` and rename it into place.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| StoreError::Io(tmp.clone(), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::Io(path.to_path_buf(), e))
}

/// Result order: score descending, then journal date descending (undated last),
/// then chunk id ascending.
fn rank(a: &Chunk, a_score: f32, b: &Chunk, b_score: f32) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| b.metadata.journal_date.cmp(&a.metadata.journal_date))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    (0..n).map(|i| a[i] * b[i]).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("got {embeddings} embeddings for {chunks} chunks")]
    CountMismatch { chunks: usize, embeddings: usize },
    #[error("chunk {0} belongs to another note")]
    ForeignChunk(String),
    #[error("index snapshot I/O error for {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("index snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported index snapshot version {0}")]
    Version(u32),
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::chunks::{chunk_id, ChunkKind, ChunkMetadata};
    use crate::notes::NoteKind;

    fn chunk(parent: &str, position: usize, date: Option<NaiveDate>, kind: ChunkKind) -> Chunk {
        Chunk {
            chunk_id: chunk_id(parent, kind, position),
            parent_id: parent.to_string(),
            text: format!("{parent}-{position}"),
            position,
            overlap: 0,
            kind,
            metadata: ChunkMetadata {
                title: parent.to_string(),
                source_path: PathBuf::from(format!("{parent}.md")),
                note_kind: if date.is_some() {
                    NoteKind::Journal
                } else {
                    NoteKind::Page
                },
                journal_date: date,
                tags: BTreeSet::new(),
                links: BTreeSet::new(),
            },
        }
    }

    fn day(d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, d)
    }

    #[test]
    fn replace_does_not_duplicate() {
        let mut store = VectorStore::new();
        let chunks = vec![chunk("a", 0, None, ChunkKind::Original)];
        store
            .replace_document("a", "f1".into(), "a.md".into(), chunks.clone(), vec![vec![1.0, 0.0]])
            .unwrap();
        store
            .replace_document("a", "f2".into(), "a.md".into(), chunks, vec![vec![0.0, 1.0]])
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.fingerprint("a"), Some("f2"));
    }

    #[test]
    fn mismatched_counts_leave_store_untouched() {
        let mut store = VectorStore::new();
        let err = store
            .replace_document(
                "a",
                "f".into(),
                "a.md".into(),
                vec![chunk("a", 0, None, ChunkKind::Original)],
                vec![],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::CountMismatch { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn search_orders_by_score_then_date_then_id() {
        let mut store = VectorStore::new();
        store
            .replace_document(
                "old",
                "f".into(),
                "old.md".into(),
                vec![chunk("old", 0, day(1), ChunkKind::Original)],
                vec![vec![1.0, 0.0]],
            )
            .unwrap();
        store
            .replace_document(
                "new",
                "f".into(),
                "new.md".into(),
                vec![chunk("new", 0, day(2), ChunkKind::Original)],
                vec![vec![2.0, 0.0]],
            )
            .unwrap();
        store
            .replace_document(
                "far",
                "f".into(),
                "far.md".into(),
                vec![chunk("far", 0, None, ChunkKind::Original)],
                vec![vec![0.0, 1.0]],
            )
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 10, |_| true);
        let parents: Vec<&str> = hits.iter().map(|(c, _)| c.parent_id.as_str()).collect();
        assert_eq!(parents, vec!["new", "old", "far"]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);

        let only_pages = store.search(&[1.0, 0.0], 10, |c| c.metadata.journal_date.is_none());
        assert_eq!(only_pages.len(), 1);
        assert_eq!(store.search(&[1.0, 0.0], 1, |_| true).len(), 1);
    }

    #[test]
    fn nan_scores_do_not_break_ordering() {
        let mut store = VectorStore::new();
        for (parent, vector) in [("a", vec![f32::NAN, 1.0]), ("b", vec![1.0, 0.0]), ("c", vec![0.5, 0.5])] {
            store
                .replace_document(
                    parent,
                    "f".into(),
                    format!("{parent}.md").into(),
                    vec![chunk(parent, 0, None, ChunkKind::Original)],
                    vec![vector],
                )
                .unwrap();
        }
        let hits = store.search(&[1.0, 0.0], 10, |_| true);
        assert_eq!(hits.len(), 3);
        let finite: Vec<&str> = hits
            .iter()
            .filter(|(_, score)| !score.is_nan())
            .map(|(c, _)| c.parent_id.as_str())
            .collect();
        assert_eq!(finite, vec!["b", "c"]);
    }

    #[test]
    fn by_tag_matches_case_insensitively_newest_first() {
        let tagged = |parent: &str, position: usize, date, kind, tag: &str| {
            let mut c = chunk(parent, position, date, kind);
            c.metadata.tags.insert(tag.to_string());
            c
        };
        let mut store = VectorStore::new();
        store
            .replace_document(
                "old",
                "f".into(),
                "old.md".into(),
                vec![tagged("old", 0, day(1), ChunkKind::Original, "Alice")],
                vec![vec![1.0]],
            )
            .unwrap();
        store
            .replace_document(
                "new",
                "f".into(),
                "new.md".into(),
                vec![
                    tagged("new", 0, day(4), ChunkKind::Original, "alice"),
                    tagged("new", 0, day(4), ChunkKind::Summary, "alice"),
                ],
                vec![vec![1.0]; 2],
            )
            .unwrap();
        store
            .replace_document(
                "page",
                "f".into(),
                "page.md".into(),
                vec![
                    tagged("page", 0, None, ChunkKind::Original, "ALICE"),
                    tagged("page", 1, None, ChunkKind::Original, "bob"),
                ],
                vec![vec![1.0]; 2],
            )
            .unwrap();

        let hits = store.by_tag("#Alice", 10, |_| true);
        let order: Vec<(&str, bool)> = hits
            .iter()
            .map(|c| (c.parent_id.as_str(), c.is_summary()))
            .collect();
        assert_eq!(
            order,
            vec![("new", true), ("new", false), ("old", false), ("page", false)]
        );

        let journals = store.by_tag("alice", 10, |c| c.metadata.journal_date.is_some());
        assert_eq!(journals.len(), 3);
        assert_eq!(store.by_tag("alice", 1, |_| true).len(), 1);
        assert!(store.by_tag("carol", 10, |_| true).is_empty());
    }

    #[test]
    fn by_date_puts_summaries_first() {
        let mut store = VectorStore::new();
        store
            .replace_document(
                "j",
                "f".into(),
                "j.md".into(),
                vec![
                    chunk("j", 0, day(5), ChunkKind::Original),
                    chunk("j", 1, day(5), ChunkKind::Original),
                    chunk("j", 0, day(5), ChunkKind::Summary),
                ],
                vec![vec![1.0]; 3],
            )
            .unwrap();
        store
            .replace_document(
                "other",
                "f".into(),
                "other.md".into(),
                vec![chunk("other", 0, day(6), ChunkKind::Original)],
                vec![vec![1.0]],
            )
            .unwrap();
        let hits = store.by_date(day(5).unwrap(), 10);
        assert_eq!(hits.len(), 3);
        assert!(hits[0].is_summary());
        assert_eq!((hits[1].position, hits[2].position), (0, 1));
        assert!(hits.iter().all(|c| c.metadata.journal_date == day(5)));
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        assert!(VectorStore::load(&path).unwrap().is_empty());

        let mut store = VectorStore::new();
        store
            .replace_document(
                "a",
                "f".into(),
                "a.md".into(),
                vec![chunk("a", 0, day(3), ChunkKind::Original)],
                vec![vec![3.0, 4.0]],
            )
            .unwrap();
        std::fs::write(&path, store.to_json().unwrap()).unwrap();
        assert_eq!(VectorStore::load(&path).unwrap(), store);
    }

    #[test]
    fn unknown_snapshot_version_is_rejected() {
        let json = r#"{"version":99,"store":{"documents":{}}}"#;
        assert!(matches!(
            VectorStore::from_json(json),
            Err(StoreError::Version(99))
        ));
    }
}
