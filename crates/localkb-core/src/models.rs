//! Data models that flow between the document store, the chunker, the
//! vector index, and knowledge-base callers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used in the persisted metadata (`last_loaded`).
pub const LAST_LOADED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persisted metadata for one ingested file, keyed externally by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub filename: String,
    #[serde(with = "last_loaded_format")]
    pub last_loaded: NaiveDateTime,
}

mod last_loaded_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::LAST_LOADED_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(LAST_LOADED_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, LAST_LOADED_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// One ingested source file living under the knowledge-base root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Location of the copy inside the documents folder.
    pub source_path: PathBuf,
    /// Base name; the identifier used by [`FileFilter`].
    pub filename: String,
    pub last_loaded: NaiveDateTime,
}

impl Document {
    pub fn from_record(source_path: impl AsRef<Path>, record: &DocumentRecord) -> Self {
        Self {
            source_path: source_path.as_ref().to_path_buf(),
            filename: record.filename.clone(),
            last_loaded: record.last_loaded,
        }
    }

    pub fn to_record(&self) -> DocumentRecord {
        DocumentRecord {
            filename: self.filename.clone(),
            last_loaded: self.last_loaded,
        }
    }

    pub fn last_loaded_display(&self) -> String {
        self.last_loaded.format(LAST_LOADED_FORMAT).to_string()
    }

    /// `"<filename> (Last loaded: <timestamp>)"`, as shown in document lists.
    pub fn display_label(&self) -> String {
        format!(
            "{} (Last loaded: {})",
            self.filename,
            self.last_loaded_display()
        )
    }
}

/// A contiguous passage of one document's text.
///
/// Chunks are rebuilt from disk on every index rebuild and never persisted
/// on their own; position `i` in the chunk array matches position `i` in
/// the vector index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Path of the owning [`Document`] (lookup only).
    pub source: PathBuf,
    pub filename: String,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Query-time restriction on which documents a search may return.
///
/// `All` and `Only(empty set)` are different things: the first searches
/// everything, the second matches nothing. Use [`FileFilter::from_selection`]
/// to map a caller's possibly-empty selection onto the right variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FileFilter {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl FileFilter {
    /// Build a filter from an optional selection of filenames.
    ///
    /// `None` and an empty selection both mean "no filter".
    pub fn from_selection<I, S>(selection: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = match selection {
            Some(names) => names.into_iter().map(Into::into).collect(),
            None => return FileFilter::All,
        };
        if names.is_empty() {
            FileFilter::All
        } else {
            FileFilter::Only(names)
        }
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FileFilter::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn is_active(&self) -> bool {
        matches!(self, FileFilter::Only(_))
    }

    pub fn allows(&self, filename: &str) -> bool {
        match self {
            FileFilter::All => true,
            FileFilter::Only(names) => names.contains(filename),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FileFilter::All => "all documents".to_string(),
            FileFilter::Only(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                format!("only [{}]", names.join(", "))
            }
        }
    }
}

/// A position in a vector index and its squared L2 distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// One chunk selected by a knowledge-base search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub source: PathBuf,
    pub filename: String,
    pub distance: f32,
}

/// Ranked chunks plus a human-readable trace of what the search did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KbSearchResult {
    pub hits: Vec<SearchHit>,
    pub debug_info: String,
}

impl KbSearchResult {
    pub fn empty(debug_info: impl Into<String>) -> Self {
        Self {
            hits: Vec::new(),
            debug_info: debug_info.into(),
        }
    }

    /// The knowledge base holds no chunks at all.
    pub fn unavailable() -> Self {
        Self::empty("Local KB not available.")
    }

    /// The active filter selected no chunks.
    pub fn no_filter_match() -> Self {
        Self::empty("No matching documents in KB filter.")
    }

    /// Every candidate was beyond the relevance cutoff.
    pub fn no_relevant_chunks() -> Self {
        Self::empty("No relevant KB chunks found.")
    }

    pub fn retrieval_error(err: impl std::fmt::Display) -> Self {
        Self::empty(format!("KB retrieval error: {}", err))
    }

    /// Wrap ranked hits with a numbered preview of each chunk.
    pub fn from_hits(hits: Vec<SearchHit>, preview_chars: usize) -> Self {
        let mut debug_info = format!("Retrieved {} KB chunks:", hits.len());
        for (i, hit) in hits.iter().enumerate() {
            let preview: String = hit.text.trim().chars().take(preview_chars).collect();
            debug_info.push_str(&format!("\nChunk {}: {}...", i + 1, preview));
        }
        Self { hits, debug_info }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Selected chunk texts in rank order.
    pub fn chunks(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.text.as_str()).collect()
    }

    /// Render the hits as a context section for prompt assembly.
    pub fn context_block(&self) -> String {
        let body = if self.hits.is_empty() {
            "No local KB results.".to_string()
        } else {
            self.chunks().join("\n")
        };
        format!("Local Knowledge Context:\n{}", body)
    }
}

/// A tracked document that could not be indexed during a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a full index rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub documents_indexed: usize,
    pub chunks: usize,
    pub skipped: Vec<SkippedDocument>,
}

impl RebuildReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Point-in-time counters for a knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KbStats {
    pub documents: usize,
    pub chunks: usize,
    pub indexed_vectors: usize,
    pub dims: usize,
    pub filter: FileFilter,
    pub skipped: Vec<SkippedDocument>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_record_json_layout() {
        let record = DocumentRecord {
            filename: "notes.txt".to_string(),
            last_loaded: ts(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["filename"], "notes.txt");
        assert_eq!(json["last_loaded"], "2024-03-09 14:05:07");
    }

    #[test]
    fn test_record_rejects_bad_timestamp() {
        let raw = r#"{"filename": "a.txt", "last_loaded": "yesterday"}"#;
        assert!(serde_json::from_str::<DocumentRecord>(raw).is_err());
    }

    #[test]
    fn test_display_label() {
        let doc = Document {
            source_path: PathBuf::from("/kb/local_kb/notes.txt"),
            filename: "notes.txt".to_string(),
            last_loaded: ts(),
        };
        assert_eq!(
            doc.display_label(),
            "notes.txt (Last loaded: 2024-03-09 14:05:07)"
        );
    }

    #[test]
    fn test_filter_empty_selection_means_all() {
        let filter = FileFilter::from_selection(Some(Vec::<String>::new()));
        assert_eq!(filter, FileFilter::All);
        assert!(filter.allows("anything.txt"));

        let filter = FileFilter::from_selection(None::<Vec<String>>);
        assert_eq!(filter, FileFilter::All);
    }

    #[test]
    fn test_filter_only() {
        let filter = FileFilter::from_selection(Some(["a.txt"]));
        assert!(filter.is_active());
        assert!(filter.allows("a.txt"));
        assert!(!filter.allows("b.txt"));
    }

    #[test]
    fn test_explicit_empty_only_matches_nothing() {
        let filter = FileFilter::only(Vec::<String>::new());
        assert!(filter.is_active());
        assert!(!filter.allows("a.txt"));
    }

    #[test]
    fn test_debug_preview_is_numbered_and_truncated() {
        let long = "x".repeat(250);
        let hits = vec![
            SearchHit {
                text: "  short chunk  ".to_string(),
                source: PathBuf::from("a.txt"),
                filename: "a.txt".to_string(),
                distance: 0.1,
            },
            SearchHit {
                text: long,
                source: PathBuf::from("b.txt"),
                filename: "b.txt".to_string(),
                distance: 0.2,
            },
        ];
        let result = KbSearchResult::from_hits(hits, 100);
        let lines: Vec<&str> = result.debug_info.lines().collect();
        assert_eq!(lines[0], "Retrieved 2 KB chunks:");
        assert_eq!(lines[1], "Chunk 1: short chunk...");
        assert_eq!(lines[2], format!("Chunk 2: {}...", "x".repeat(100)));
    }

    #[test]
    fn test_context_block() {
        assert_eq!(
            KbSearchResult::unavailable().context_block(),
            "Local Knowledge Context:\nNo local KB results."
        );
        let result = KbSearchResult::from_hits(
            vec![SearchHit {
                text: "fact one".to_string(),
                source: PathBuf::from("a.txt"),
                filename: "a.txt".to_string(),
                distance: 0.0,
            }],
            100,
        );
        assert_eq!(
            result.context_block(),
            "Local Knowledge Context:\nfact one"
        );
    }
}
