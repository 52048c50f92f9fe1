//! Discovering and parsing Logseq notes from a user-chosen directory.
//!
//! The notes root is chosen by the user; we only read and index it. Files under a
//! `journals/` folder are journal entries dated by their filename, everything else
//! is a page.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::tags::{self, TagPolicy};

/// Logseq keeps backups and version files here; never index them.
const LOGSEQ_INTERNAL_DIR: &str = "logseq";
const JOURNALS_DIR: &str = "journals";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Page,
    Journal,
}

/// One Logseq page or journal entry, as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteDocument {
    /// Stable key derived from the path relative to the notes root.
    pub id: String,
    pub title: String,
    /// Path relative to the notes root.
    pub source_path: PathBuf,
    pub kind: NoteKind,
    pub journal_date: Option<NaiveDate>,
    pub tags: BTreeSet<String>,
    /// `[[Page]]` references, kept apart from tags.
    pub links: BTreeSet<String>,
    /// Body without front matter, trimmed, after tag markup handling.
    pub raw_text: String,
    /// SHA-256 of the file bytes.
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderOptions {
    pub tag_policy: TagPolicy,
}

/// Reads a Logseq graph. [`NoteReader::documents`] can be called any number of
/// times; each call walks the directory again.
#[derive(Debug, Clone)]
pub struct NoteReader {
    root: PathBuf,
    options: ReaderOptions,
}

impl NoteReader {
    pub fn open(root: &Path, options: ReaderOptions) -> Result<Self, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::SourceUnavailable(
                root.to_path_buf(),
                "not a directory".to_string(),
            ));
        }
        std::fs::read_dir(root)
            .map_err(|e| ScanError::SourceUnavailable(root.to_path_buf(), e.to_string()))?;
        Ok(Self {
            root: root.to_path_buf(),
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walks the graph, yielding one result per markdown file (sorted by name).
    /// Unreadable or unparsable files come out as errors; the walk goes on.
    pub fn documents(&self) -> impl Iterator<Item = Result<NoteDocument, ScanError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(e))
            .filter_map(move |entry| match entry {
                Err(e) => Some(Err(ScanError::Walk(e.to_string()))),
                Ok(entry) if entry.file_type().is_file() && is_markdown(entry.path()) => {
                    Some(self.read_file(entry.path()))
                }
                Ok(_) => None,
            })
    }

    /// Read and parse a single note file under the root.
    pub fn read_file(&self, path: &Path) -> Result<NoteDocument, ScanError> {
        let bytes = std::fs::read(path).map_err(|e| ScanError::Read(path.to_path_buf(), e))?;
        let content_hash = hex::encode(Sha256::digest(&bytes));
        let content = String::from_utf8(bytes).map_err(|_| ScanError::Parse {
            path: path.to_path_buf(),
            reason: "file is not valid UTF-8".to_string(),
        })?;

        let relative = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
        let is_journal = path
            .parent()
            .and_then(|p| p.file_name())
            .is_some_and(|n| n == JOURNALS_DIR);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let journal_date = if is_journal {
            Some(journal_date_from_stem(&stem).ok_or_else(|| ScanError::Parse {
                path: path.to_path_buf(),
                reason: format!("journal filename has no valid date: {}", stem),
            })?)
        } else {
            None
        };

        let (front, body) = match split_frontmatter(&content) {
            Some((yaml, body)) => match serde_yaml::from_str::<FrontMatter>(yaml) {
                Ok(front) => (front, body),
                Err(e) => {
                    tracing::warn!("ignoring invalid front matter in {}: {}", path.display(), e);
                    (FrontMatter::default(), content.as_str())
                }
            },
            None => (FrontMatter::default(), content.as_str()),
        };
        let props = page_properties(body);

        let extracted = tags::extract(body, self.options.tag_policy);
        let mut tags = extracted.tags;
        tags.extend(front.tags.into_iter().flat_map(TagsField::into_tags));
        if let Some(value) = &props.tags {
            tags.extend(tags::split_tag_list(value));
        }

        let title = front
            .title
            .or(props.title)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| match journal_date {
                Some(date) => date.format("%Y-%m-%d").to_string(),
                None => title_from_stem(&stem),
            });

        Ok(NoteDocument {
            id: document_id(&relative),
            title,
            source_path: relative,
            kind: if is_journal {
                NoteKind::Journal
            } else {
                NoteKind::Page
            },
            journal_date,
            tags,
            links: extracted.links,
            raw_text: extracted.text.trim().to_string(),
            content_hash,
        })
    }
}

/// True if `root` is currently a readable directory.
pub fn probe(root: &Path) -> bool {
    root.is_dir() && std::fs::read_dir(root).is_ok()
}

/// Scans `root` and returns every note that parses, skipping (and logging) the rest.
pub fn scan_notes(root: &Path) -> Result<Vec<NoteDocument>, ScanError> {
    let reader = NoteReader::open(root, ReaderOptions::default())?;
    let mut notes = Vec::new();
    for doc in reader.documents() {
        match doc {
            Ok(doc) => notes.push(doc),
            Err(e) => tracing::warn!("skipping note: {}", e),
        }
    }
    Ok(notes)
}

/// Stable document key: SHA-256 of the `/`-joined relative path.
pub fn document_id(relative: &Path) -> String {
    let key: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    hex::encode(Sha256::digest(key.join("/").as_bytes()))
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && name == LOGSEQ_INTERNAL_DIR)
}

/// Only lowercase `.md` files are notes.
pub(crate) fn is_markdown(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "md")
}

fn journal_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})[_-](\d{2})[_-](\d{2})").expect("regex"))
}

/// `2024_01_05` (Logseq default) or `2024-01-05`.
fn journal_date_from_stem(stem: &str) -> Option<NaiveDate> {
    let caps = journal_date_re().captures(stem)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Logseq escapes namespaces in filenames (`a___b`, `a%2Fb`); undo that and
/// turn separators into spaces.
fn title_from_stem(stem: &str) -> String {
    stem.replace("___", "/")
        .replace("%2F", "/")
        .replace(['_', '-'], " ")
        .trim()
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    title: Option<String>,
    tags: Option<TagsField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagsField {
    List(Vec<String>),
    Text(String),
}

impl TagsField {
    fn into_tags(self) -> Vec<String> {
        match self {
            TagsField::List(list) => list
                .iter()
                .flat_map(|t| tags::split_tag_list(t))
                .collect(),
            TagsField::Text(text) => tags::split_tag_list(&text).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct PageProperties {
    title: Option<String>,
    tags: Option<String>,
}

/// Logseq page properties: leading `key:: value` lines.
fn page_properties(body: &str) -> PageProperties {
    let mut props = PageProperties::default();
    for line in body.trim_start().lines() {
        let Some((key, value)) = line.split_once("::") else {
            break;
        };
        let key = key.trim().trim_start_matches("- ").to_ascii_lowercase();
        let value = value.trim().to_string();
        match key.as_str() {
            "title" => props.title = Some(value),
            "tags" => props.tags = Some(value),
            _ => {}
        }
    }
    props
}

/// Splits optional YAML front matter (between the first `---` and the next `---`
/// line) from the body. Returns `None` when there is none.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let s = content.trim_start();
    let after_first = s.strip_prefix("---")?;
    let end = after_first.find("\n---")?;
    let yaml = &after_first[..end];
    let rest = &after_first[end + 4..];
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    Some((yaml, body.trim_start()))
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("notes source unavailable: {0}: {1}")]
    SourceUnavailable(PathBuf, String),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("parse error for {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

impl ScanError {
    /// The file this error is about, if it concerns a single file.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ScanError::Read(path, _) | ScanError::Parse { path, .. } => Some(path),
            ScanError::SourceUnavailable(..) | ScanError::Walk(_) => None,
        }
    }
}
