//! On-disk vector index file.
//!
//! ```text
//! magic        "LKBI"
//! version      u32 LE
//! fingerprint  32 bytes, SHA-256 of the chunk set the index was built from
//! index        FlatIndex bytes (see localkb_core::index)
//! ```
//!
//! The fingerprint lets startup detect an index that no longer matches the
//! documents on disk even when the chunk count happens to agree.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use localkb_core::index::FlatIndex;
use localkb_core::models::Chunk;
use localkb_core::{KbError, Result};
use sha2::{Digest, Sha256};

const MAGIC: &[u8; 4] = b"LKBI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 32;

pub type Fingerprint = [u8; 32];

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedIndex {
    pub fingerprint: Fingerprint,
    pub index: FlatIndex,
}

/// Hash the ordered chunk set together with the embedding model identity.
pub fn fingerprint(chunks: &[Chunk], model: &str, dims: usize) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update((dims as u64).to_le_bytes());
    for chunk in chunks {
        hasher.update(chunk.source.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk.hash.as_bytes());
        hasher.update([0u8]);
    }
    hasher.finalize().into()
}

/// Write the index via a temp file and rename.
pub fn save_index(path: &Path, index: &FlatIndex, fingerprint: &Fingerprint) -> Result<()> {
    let body = index.to_bytes();
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(fingerprint);
    bytes.extend_from_slice(&body);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| KbError::io(parent, e))?;
        }
    }
    let tmp = path.with_extension("index.tmp");
    fs::write(&tmp, bytes).map_err(|e| KbError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| KbError::io(path, e))?;
    Ok(())
}

/// Read a persisted index. Returns `Ok(None)` when no file exists.
pub fn load_index(path: &Path) -> Result<Option<PersistedIndex>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(KbError::io(path, e)),
    };

    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(KbError::Corrupt(format!(
            "{} is not a knowledge-base index file",
            path.display()
        )));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(KbError::Corrupt(format!(
            "unsupported index format version {} in {}",
            version,
            path.display()
        )));
    }
    let mut fingerprint = [0u8; 32];
    fingerprint.copy_from_slice(&bytes[8..HEADER_LEN]);
    let index = FlatIndex::from_bytes(&bytes[HEADER_LEN..])?;

    Ok(Some(PersistedIndex { fingerprint, index }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use localkb_core::chunk::hash_text;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn chunk(source: &str, text: &str) -> Chunk {
        Chunk {
            source: PathBuf::from(source),
            filename: source.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            hash: hash_text(text),
        }
    }

    fn positions(index: &FlatIndex, query: &[f32]) -> Vec<usize> {
        index
            .search(query, index.len())
            .unwrap()
            .iter()
            .map(|n| n.position)
            .collect()
    }

    #[test]
    fn test_save_load_roundtrip_keeps_search_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.index");
        let index =
            FlatIndex::build(&[vec![0.0, 1.0], vec![1.0, 0.0], vec![0.7, 0.7]]).unwrap();
        let fp = fingerprint(&[chunk("a", "x")], "hash", 2);

        save_index(&path, &index, &fp).unwrap();
        let loaded = load_index(&path).unwrap().unwrap();
        assert_eq!(loaded.fingerprint, fp);

        for query in [[1.0f32, 0.1], [0.0, 0.9], [0.5, 0.5]] {
            assert_eq!(positions(&index, &query), positions(&loaded.index, &query));
        }
    }

    #[test]
    fn test_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load_index(&tmp.path().join("absent.index")).unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.index");
        fs::write(&path, b"definitely not an index").unwrap();
        assert!(matches!(load_index(&path), Err(KbError::Corrupt(_))));
    }

    #[test]
    fn test_fingerprint_tracks_content_and_model() {
        let base = fingerprint(&[chunk("a", "one"), chunk("b", "two")], "hash", 256);
        assert_eq!(base, fingerprint(&[chunk("a", "one"), chunk("b", "two")], "hash", 256));
        assert_ne!(base, fingerprint(&[chunk("a", "one"), chunk("b", "changed")], "hash", 256));
        assert_ne!(base, fingerprint(&[chunk("b", "two"), chunk("a", "one")], "hash", 256));
        assert_ne!(base, fingerprint(&[chunk("a", "one"), chunk("b", "two")], "other", 256));
    }
}
