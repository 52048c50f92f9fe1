//! All backend logic independent of how the app is run (CLI or HTTP server).
//!
//! Notes live in the Logseq graph the user chooses. Cortex stores only config,
//! index and run stats in its own app data directory (see [app_data]).

pub mod app_data;
pub mod backend;
pub mod brain;
pub mod chunks;
pub mod config;
pub mod enhance;
pub mod index;
pub mod notes;
pub mod ollama;
pub mod search;
pub mod stats;
pub mod store;
pub mod tags;
pub mod watcher;

pub use app_data::app_data_dir;
pub use backend::{BackendError, Embedder, Generator};
pub use brain::{Brain, BrainError, Persistence, RunHandle};
pub use chunks::{chunk_document, chunk_notes, Chunk, ChunkKind, ChunkMetadata, DEFAULT_MAX_CHARS};
pub use config::{get_notes_root, load_config, set_notes_root, Config, ConfigError};
pub use enhance::{EnhanceError, Task};
pub use index::IndexError;
pub use notes::{scan_notes, NoteDocument, NoteKind, NoteReader, ScanError};
pub use ollama::OllamaClient;
pub use search::{Collection, QueryError, ScoredChunk, SearchOutcome, Synthesis};
pub use stats::{RunStats, RunStatus, SystemStatus};
pub use store::VectorStore;
pub use watcher::{watch_notes, NotesWatcher, WatchError};
