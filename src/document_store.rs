//! Tracks which files live in the knowledge base and when they were loaded.
//!
//! The documents folder is the source of truth for which files exist; the
//! JSON metadata file is a cache of load history keyed by the absolute path
//! of each copy:
//!
//! ```json
//! {
//!   "/home/me/data/local_kb/notes.txt": {
//!     "filename": "notes.txt",
//!     "last_loaded": "2024-03-09 14:05:07"
//!   }
//! }
//! ```
//!
//! Missing or malformed metadata loads as empty; a later scan re-registers
//! whatever is on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, Timelike};
use globset::{Glob, GlobSet, GlobSetBuilder};
use localkb_core::models::{Document, DocumentRecord};
use localkb_core::{KbError, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::KbPaths;

pub struct DocumentStore {
    root: PathBuf,
    metadata_path: PathBuf,
    include: GlobSet,
    records: BTreeMap<String, DocumentRecord>,
}

impl DocumentStore {
    /// Create the documents folder if needed and load persisted metadata.
    pub fn open(paths: &KbPaths, include_globs: &[String]) -> Result<Self> {
        let mut store = Self {
            root: paths.documents_dir.clone(),
            metadata_path: paths.metadata_file.clone(),
            include: build_globset(include_globs)?,
            records: BTreeMap::new(),
        };
        store.ensure_root()?;
        store.root = fs::canonicalize(&store.root).map_err(|e| KbError::io(&store.root, e))?;
        store.records = load_metadata(&store.metadata_path);
        debug!(
            root = %store.root.display(),
            documents = store.records.len(),
            "Opened document store"
        );
        Ok(store)
    }

    /// Create the documents folder (and the metadata file's folder). Idempotent.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| KbError::io(&self.root, e))?;
        if let Some(parent) = self.metadata_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| KbError::io(parent, e))?;
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tracked documents, ordered by path.
    pub fn documents(&self) -> Vec<Document> {
        self.records
            .iter()
            .map(|(path, record)| Document::from_record(path, record))
            .collect()
    }

    /// Copy `path` into the documents folder and record it.
    ///
    /// An existing copy with the same file name is overwritten. Metadata is
    /// only touched after the copy succeeds.
    pub fn add_file(&mut self, path: &Path) -> Result<Document> {
        self.ensure_root()?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                KbError::InvalidInput(format!("path has no usable file name: {}", path.display()))
            })?
            .to_string();
        let dest = self.root.join(&filename);

        if is_same_file(path, &dest) {
            debug!(path = %dest.display(), "File already in documents folder; skipping copy");
        } else {
            fs::copy(path, &dest).map_err(|e| KbError::io(path, e))?;
        }

        let doc = Document {
            source_path: dest,
            filename,
            last_loaded: now(),
        };
        let key = path_key(&doc.source_path);
        let previous = self.records.insert(key.clone(), doc.to_record());
        if let Err(e) = self.save_metadata() {
            match previous {
                Some(record) => self.records.insert(key, record),
                None => self.records.remove(&key),
            };
            return Err(e);
        }

        info!(file = %doc.filename, "Added document");
        Ok(doc)
    }

    /// Delete a tracked file and its metadata entry.
    ///
    /// `path` may be the tracked path itself or any path whose file name
    /// matches a tracked copy. Returns `false` when nothing was tracked.
    pub fn remove_file(&mut self, path: &Path) -> Result<bool> {
        let key = match self.resolve_key(path) {
            Some(key) => key,
            None => {
                debug!(path = %path.display(), "Remove requested for untracked file");
                return Ok(false);
            }
        };

        let tracked = PathBuf::from(&key);
        match fs::remove_file(&tracked) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %tracked.display(), "Tracked file already missing from disk");
            }
            Err(e) => return Err(KbError::io(&tracked, e)),
        }

        self.records.remove(&key);
        self.save_metadata()?;
        info!(path = %tracked.display(), "Removed document");
        Ok(true)
    }

    /// Register files present in the documents folder but absent from
    /// metadata. Returns whether anything was added.
    pub fn scan_for_new_files(&mut self) -> Result<bool> {
        self.ensure_root()?;

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        let mut added = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                KbError::io(path, std::io::Error::from(e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let filename = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !self.include.is_match(&filename) {
                continue;
            }
            let key = path_key(entry.path());
            if self.records.contains_key(&key) {
                continue;
            }
            self.records.insert(
                key,
                DocumentRecord {
                    filename: filename.clone(),
                    last_loaded: now(),
                },
            );
            added.push(filename);
        }

        if added.is_empty() {
            return Ok(false);
        }
        self.save_metadata()?;
        info!(count = added.len(), files = ?added, "Registered new files from scan");
        Ok(true)
    }

    /// Persist metadata via a temp file and rename.
    pub fn save_metadata(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.metadata_path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| KbError::io(&tmp, e))?;
        fs::rename(&tmp, &self.metadata_path).map_err(|e| KbError::io(&self.metadata_path, e))?;
        Ok(())
    }

    fn resolve_key(&self, path: &Path) -> Option<String> {
        let raw = path_key(path);
        if self.records.contains_key(&raw) {
            return Some(raw);
        }
        if let Ok(canonical) = fs::canonicalize(path) {
            let key = path_key(&canonical);
            if self.records.contains_key(&key) {
                return Some(key);
            }
        }
        let key = path_key(&self.root.join(path.file_name()?));
        self.records.contains_key(&key).then_some(key)
    }
}

/// Read the metadata file. Missing or malformed files load as empty.
pub fn load_metadata(path: &Path) -> BTreeMap<String, DocumentRecord> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read KB metadata; starting empty");
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed KB metadata; starting empty");
            BTreeMap::new()
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| KbError::InvalidInput(format!("bad include glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| KbError::InvalidInput(format!("bad include globs: {}", e)))
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Local wall-clock time at the precision stored in metadata.
fn now() -> NaiveDateTime {
    let ts = Local::now().naive_local();
    ts.with_nanosecond(0).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KbConfig;
    use tempfile::TempDir;

    fn open_store(tmp: &TempDir) -> DocumentStore {
        let kb = KbConfig {
            data_dir: tmp.path().join("data"),
            ..KbConfig::default()
        };
        DocumentStore::open(&kb.paths(), &kb.include_globs).unwrap()
    }

    fn write_source(tmp: &TempDir, name: &str, body: &str) -> PathBuf {
        let dir = tmp.path().join("incoming");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_open_creates_root() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        assert!(store.root().is_dir());
        assert!(store.is_empty());
        store.ensure_root().unwrap();
        assert!(store.root().is_dir());
    }

    #[test]
    fn test_add_copies_and_records() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        let src = write_source(&tmp, "notes.txt", "hello");

        let doc = store.add_file(&src).unwrap();
        assert_eq!(doc.filename, "notes.txt");
        assert_eq!(doc.source_path, store.root().join("notes.txt"));
        assert_eq!(fs::read_to_string(&doc.source_path).unwrap(), "hello");

        let persisted = load_metadata(store.metadata_path());
        let record = persisted.get(&path_key(&doc.source_path)).unwrap();
        assert_eq!(record.filename, "notes.txt");
        assert_eq!(record.last_loaded, doc.last_loaded);
    }

    #[test]
    fn test_add_overwrites_same_name() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        let src = write_source(&tmp, "notes.txt", "v1");
        store.add_file(&src).unwrap();
        fs::write(&src, "v2").unwrap();
        let doc = store.add_file(&src).unwrap();
        assert_eq!(fs::read_to_string(doc.source_path).unwrap(), "v2");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_missing_file_leaves_metadata_untouched() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        let err = store.add_file(&tmp.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, KbError::Io { .. }));
        assert!(store.is_empty());
        assert!(load_metadata(store.metadata_path()).is_empty());
    }

    #[test]
    fn test_add_file_already_in_root_keeps_content() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        let inside = store.root().join("dropped.txt");
        fs::write(&inside, "keep me").unwrap();
        store.add_file(&inside).unwrap();
        assert_eq!(fs::read_to_string(&inside).unwrap(), "keep me");
    }

    #[test]
    fn test_remove_untracked_returns_false() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        assert!(!store.remove_file(Path::new("/nowhere/ghost.txt")).unwrap());
    }

    #[test]
    fn test_remove_by_tracked_path_and_by_name() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        let a = store.add_file(&write_source(&tmp, "a.txt", "a")).unwrap();
        let b_src = write_source(&tmp, "b.txt", "b");
        let b = store.add_file(&b_src).unwrap();

        assert!(store.remove_file(&a.source_path).unwrap());
        assert!(!a.source_path.exists());

        // The outside path resolves through its file name.
        assert!(store.remove_file(&b_src).unwrap());
        assert!(!b.source_path.exists());
        assert!(b_src.exists());

        assert!(store.is_empty());
        assert!(!store.remove_file(&a.source_path).unwrap());
    }

    #[test]
    fn test_remove_tracked_file_missing_on_disk() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        let doc = store.add_file(&write_source(&tmp, "a.txt", "a")).unwrap();
        fs::remove_file(&doc.source_path).unwrap();
        assert!(store.remove_file(&doc.source_path).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_scan_registers_new_files_once() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        fs::write(store.root().join("dropped.txt"), "x").unwrap();
        fs::write(store.root().join("ignored.pdf"), "x").unwrap();
        fs::create_dir_all(store.root().join("nested.txt")).unwrap();

        assert!(store.scan_for_new_files().unwrap());
        let docs = store.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].filename, "dropped.txt");

        let before = load_metadata(store.metadata_path());
        assert!(!store.scan_for_new_files().unwrap());
        assert_eq!(load_metadata(store.metadata_path()), before);
    }

    #[test]
    fn test_malformed_metadata_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let kb = KbConfig {
            data_dir: tmp.path().join("data"),
            ..KbConfig::default()
        };
        let paths = kb.paths();
        fs::create_dir_all(&kb.data_dir).unwrap();
        fs::write(&paths.metadata_file, "{ not json").unwrap();
        let store = DocumentStore::open(&paths, &kb.include_globs).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_metadata_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let doc = {
            let mut store = open_store(&tmp);
            store.add_file(&write_source(&tmp, "a.txt", "a")).unwrap()
        };
        let store = open_store(&tmp);
        assert_eq!(store.documents(), vec![doc]);
    }
}
