//! Where Cortex stores its own data (config, index snapshot, last run stats).
//!
//! The Logseq graph stays in the folder the user chooses. We only store app state here.

use std::path::PathBuf;

const INDEX_FILENAME: &str = "index.json";
const LAST_RUN_FILENAME: &str = "last_run.json";

/// Returns the directory where Cortex stores config, index, and other app data.
/// On Linux: `~/.local/share/cortex/`; on macOS: `~/Library/Application Support/app.Cortex.Cortex/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Cortex", "Cortex")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default location of the persisted vector index snapshot.
pub fn index_path() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join(INDEX_FILENAME))
}

/// Default location of the last ingestion run's statistics.
pub fn last_run_path() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join(LAST_RUN_FILENAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_is_some() {
        assert!(app_data_dir().is_some());
    }

    #[test]
    fn state_files_live_in_app_data_dir() {
        let dir = app_data_dir().unwrap();
        assert_eq!(index_path().unwrap().parent(), Some(dir.as_path()));
        assert_eq!(last_run_path().unwrap().parent(), Some(dir.as_path()));
    }
}
