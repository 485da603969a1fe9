//! Error taxonomy shared by every knowledge-base operation.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KbError {
    /// A copy, delete, read, or write on the local disk failed.
    #[error("I/O error at {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The embedding backend (or the search behind it) is unavailable.
    #[error("retrieval backend unavailable: {0}")]
    Retrieval(String),

    /// A vector's length does not match the index dimensionality.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Persisted state disagrees with itself or failed to decode.
    #[error("corrupt knowledge base state: {0}")]
    Corrupt(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KbError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        KbError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap an embedding backend failure, keeping the full context chain.
    pub fn retrieval(err: anyhow::Error) -> Self {
        KbError::Retrieval(format!("{:#}", err))
    }
}

pub type Result<T, E = KbError> = std::result::Result<T, E>;

/// Check a vector length against an expected dimensionality.
pub fn validate_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(KbError::DimensionMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dimension() {
        assert!(validate_dimension(3, 3).is_ok());
        match validate_dimension(3, 4) {
            Err(KbError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 4);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_retrieval_keeps_context() {
        let err = anyhow::anyhow!("connection refused").context("Ollama embed failed");
        let kb = KbError::retrieval(err);
        let msg = kb.to_string();
        assert!(msg.contains("Ollama embed failed"));
        assert!(msg.contains("connection refused"));
    }
}
