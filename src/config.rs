//! TOML configuration.
//!
//! Every section is optional; missing keys fall back to the defaults
//! below. All relative paths under `[kb]` resolve against `kb.data_dir`.

use anyhow::{bail, Context, Result};
use globset::Glob;
use localkb_core::chunk::ChunkParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub kb: KbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KbConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,
    /// Which files a scan of the documents folder registers.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            documents_dir: default_documents_dir(),
            metadata_file: default_metadata_file(),
            index_file: default_index_file(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_documents_dir() -> PathBuf {
    PathBuf::from("local_kb")
}
fn default_metadata_file() -> PathBuf {
    PathBuf::from("kb_documents.json")
}
fn default_index_file() -> PathBuf {
    PathBuf::from("kb_vectors.index")
}
fn default_include_globs() -> Vec<String> {
    vec!["*.txt".to_string()]
}

/// Resolved on-disk locations of a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbPaths {
    pub documents_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub index_file: PathBuf,
}

impl KbConfig {
    pub fn paths(&self) -> KbPaths {
        KbPaths {
            documents_dir: self.data_dir.join(&self.documents_dir),
            metadata_file: self.data_dir.join(&self.metadata_file),
            index_file: self.data_dir.join(&self.index_file),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: 0,
        }
    }
}

fn default_max_tokens() -> usize {
    256
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams::new(self.max_tokens, self.overlap_tokens)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    /// Drop neighbours whose squared L2 distance exceeds this value.
    #[serde(default)]
    pub max_distance: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            preview_chars: default_preview_chars(),
            max_distance: None,
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_preview_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// A config rooted at `data_dir` with every other setting defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.kb.data_dir = data_dir.into();
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.preview_chars < 1 {
            bail!("retrieval.preview_chars must be >= 1");
        }
        if let Some(max) = self.retrieval.max_distance {
            if !max.is_finite() || max < 0.0 {
                bail!("retrieval.max_distance must be a finite value >= 0");
            }
        }

        if self.kb.include_globs.is_empty() {
            bail!("kb.include_globs must contain at least one pattern");
        }
        for pattern in &self.kb.include_globs {
            Glob::new(pattern)
                .with_context(|| format!("Invalid kb.include_globs pattern: {}", pattern))?;
        }

        match self.embedding.provider.as_str() {
            "disabled" | "local" | "ollama" | "hash" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be local, ollama, hash, or disabled.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }
        if self.embedding.provider == "ollama" && self.embedding.dims.is_none() {
            bail!("embedding.dims must be specified when provider is 'ollama'");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Config> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.kb.include_globs, vec!["*.txt"]);
        assert_eq!(config.chunking.max_tokens, 256);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.provider, "local");
        let paths = config.kb.paths();
        assert_eq!(paths.documents_dir, PathBuf::from("./data/local_kb"));
        assert_eq!(paths.metadata_file, PathBuf::from("./data/kb_documents.json"));
    }

    #[test]
    fn test_partial_sections() {
        let config = parse(
            r#"
[kb]
data_dir = "/tmp/kb"
include_globs = ["*.txt", "*.md"]

[embedding]
provider = "hash"
dims = 128
"#,
        )
        .unwrap();
        assert_eq!(config.kb.paths().index_file, PathBuf::from("/tmp/kb/kb_vectors.index"));
        assert_eq!(config.embedding.dims, Some(128));
        assert_eq!(config.chunking.overlap_tokens, 0);
    }

    #[test]
    fn test_rejects_zero_max_tokens() {
        assert!(parse("[chunking]\nmax_tokens = 0\n").is_err());
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_window() {
        assert!(parse("[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse("[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_ollama_requires_dims() {
        assert!(parse("[embedding]\nprovider = \"ollama\"\nmodel = \"all-minilm\"\n").is_err());
        assert!(parse("[embedding]\nprovider = \"ollama\"\ndims = 384\n").is_ok());
    }

    #[test]
    fn test_rejects_negative_max_distance() {
        assert!(parse("[retrieval]\nmax_distance = -1.0\n").is_err());
        assert!(parse("[retrieval]\nmax_distance = 1.5\n").is_ok());
    }

    #[test]
    fn test_rejects_bad_glob() {
        assert!(parse("[kb]\ninclude_globs = [\"[\"]\n").is_err());
    }
}
