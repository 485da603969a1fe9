//! The knowledge-base orchestrator.
//!
//! [`KnowledgeBase`] composes the [`DocumentStore`], the chunker, an
//! [`Embedder`], and a [`FlatIndex`] behind one contract: ingest a file,
//! remove a file, rescan the documents folder, and answer (optionally
//! filename-filtered) similarity queries.
//!
//! # Consistency
//!
//! Position `i` in the index is chunk `i` in the chunk array. Every
//! mutation rebuilds both from scratch and swaps them in together, so the
//! two always have the same length.
//!
//! # Locking
//!
//! Documents, chunks, and index sit behind one async `RwLock`. Mutations
//! (`add_file`, `remove_file`, `scan_and_update`, `rebuild_index`) take the
//! write half for their whole duration, so concurrent mutations queue and
//! readers never observe a half-built state. Searches share the read half.
//! The file filter is query-time state and lives outside that lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use localkb_core::chunk::{chunk_document, ChunkParams};
use localkb_core::embedding::Embedder;
use localkb_core::index::FlatIndex;
use localkb_core::models::{
    Chunk, Document, FileFilter, KbSearchResult, KbStats, Neighbor, RebuildReport, SearchHit,
    SkippedDocument,
};
use localkb_core::{KbError, Result};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{Config, RetrievalConfig};
use crate::document_store::DocumentStore;
use crate::persist;

/// What [`KnowledgeBase::load_existing`] had to do to reach a usable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The persisted index matched the documents on disk and was reused.
    Loaded { chunks: usize },
    /// The index was rebuilt from the documents on disk.
    Rebuilt(RebuildReport),
}

struct KbState {
    store: DocumentStore,
    chunks: Vec<Chunk>,
    index: FlatIndex,
    /// Set once chunks and index reflect a successful load or rebuild.
    last_rebuild: Option<RebuildReport>,
    /// Whether the last `load_existing` scan registered new files.
    registered_on_load: bool,
}

pub struct KnowledgeBase {
    index_path: PathBuf,
    chunk_params: ChunkParams,
    retrieval: RetrievalConfig,
    embedder: Arc<dyn Embedder>,
    state: RwLock<KbState>,
    filter: std::sync::RwLock<FileFilter>,
}

impl KnowledgeBase {
    /// Open the knowledge base described by `config` and bring its index up
    /// to date with the documents folder.
    ///
    /// An embedding backend that is down at startup does not fail `open`:
    /// the knowledge base starts empty for searching (every query reports
    /// "not available") and the next successful mutation rebuilds it.
    pub async fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let paths = config.kb.paths();
        let store = DocumentStore::open(&paths, &config.kb.include_globs)?;

        let kb = Self {
            index_path: paths.index_file,
            chunk_params: config.chunking.params(),
            retrieval: config.retrieval.clone(),
            embedder,
            state: RwLock::new(KbState {
                store,
                chunks: Vec::new(),
                index: FlatIndex::empty(),
                last_rebuild: None,
                registered_on_load: false,
            }),
            filter: std::sync::RwLock::new(FileFilter::All),
        };

        match kb.load_existing().await {
            Ok(LoadOutcome::Loaded { chunks }) => {
                info!(chunks, "Loaded persisted knowledge-base index");
            }
            Ok(LoadOutcome::Rebuilt(report)) => {
                info!(
                    documents = report.documents_indexed,
                    chunks = report.chunks,
                    "Rebuilt knowledge-base index on open"
                );
            }
            Err(KbError::Retrieval(msg)) => {
                warn!(
                    error = %msg,
                    "Embedding backend unavailable; knowledge base opened without an index"
                );
            }
            Err(e) => return Err(e),
        }

        Ok(kb)
    }

    /// Reconcile with the documents folder and restore the index.
    ///
    /// New files on disk force a rebuild. Otherwise the persisted index is
    /// reused when it still matches a fresh chunking of the documents (same
    /// length, dimensionality, and content fingerprint); any mismatch or
    /// decode failure is treated as corruption and resolved by rebuilding.
    pub async fn load_existing(&self) -> Result<LoadOutcome> {
        let mut state = self.state.write().await;

        state.registered_on_load = state.store.scan_for_new_files()?;
        if state.registered_on_load {
            info!("New files found in documents folder; rebuilding index");
            return self.rebuild_on_load(&mut state).await;
        }

        let persisted = match persist::load_index(&self.index_path) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => {
                info!(path = %self.index_path.display(), "No persisted index; building one");
                return self.rebuild_on_load(&mut state).await;
            }
            Err(e) => {
                warn!(error = %e, "Persisted index unreadable; rebuilding");
                return self.rebuild_on_load(&mut state).await;
            }
        };

        let collected = collect_chunks(&state.store, self.chunk_params);
        let fingerprint = persist::fingerprint(
            &collected.chunks,
            self.embedder.model_name(),
            self.embedder.dims(),
        );

        let mismatch = if persisted.index.len() != collected.chunks.len() {
            Some(format!(
                "index holds {} vectors but documents produce {} chunks",
                persisted.index.len(),
                collected.chunks.len()
            ))
        } else if !persisted.index.is_empty() && persisted.index.dims() != self.embedder.dims() {
            Some(format!(
                "index dimensionality {} does not match embedder ({})",
                persisted.index.dims(),
                self.embedder.dims()
            ))
        } else if persisted.fingerprint != fingerprint {
            Some("documents changed since the index was built".to_string())
        } else {
            None
        };

        if let Some(reason) = mismatch {
            warn!(%reason, "Persisted index is stale or corrupt; rebuilding");
            return self.rebuild_on_load(&mut state).await;
        }

        let chunks = collected.chunks.len();
        state.chunks = collected.chunks;
        state.index = persisted.index;
        state.last_rebuild = Some(RebuildReport {
            documents_indexed: collected.documents_indexed,
            chunks,
            skipped: collected.skipped,
        });
        Ok(LoadOutcome::Loaded { chunks })
    }

    /// Copy a file into the knowledge base and rebuild the index.
    ///
    /// If the copy fails nothing changes and the error is returned.
    pub async fn add_file(&self, path: &Path) -> Result<Document> {
        let mut state = self.state.write().await;
        let doc = state.store.add_file(path)?;
        self.rebuild_locked(&mut state).await?;
        Ok(doc)
    }

    /// Copy several files, then rebuild once.
    ///
    /// On a copy failure the files copied so far are still indexed before
    /// the error is returned.
    pub async fn add_files(&self, paths: &[PathBuf]) -> Result<Vec<Document>> {
        let mut state = self.state.write().await;
        let mut added = Vec::with_capacity(paths.len());
        let mut failure = None;

        for path in paths {
            match state.store.add_file(path) {
                Ok(doc) => added.push(doc),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            if !added.is_empty() {
                if let Err(rebuild_err) = self.rebuild_locked(&mut state).await {
                    warn!(error = %rebuild_err, "Rebuild after partial add failed");
                }
            }
            return Err(err);
        }

        self.rebuild_locked(&mut state).await?;
        Ok(added)
    }

    /// Remove a tracked file. Rebuilds only when something was removed.
    pub async fn remove_file(&self, path: &Path) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.store.remove_file(path)?;
        if removed {
            self.rebuild_locked(&mut state).await?;
        }
        Ok(removed)
    }

    /// Register files dropped into the documents folder; rebuild if any.
    pub async fn scan_and_update(&self) -> Result<bool> {
        let mut state = self.state.write().await;
        let changed = state.store.scan_for_new_files()?;
        if changed {
            self.rebuild_locked(&mut state).await?;
        }
        Ok(changed)
    }

    /// Re-chunk, re-embed, and re-index every tracked document.
    pub async fn rebuild_index(&self) -> Result<RebuildReport> {
        let mut state = self.state.write().await;
        self.rebuild_locked(&mut state).await
    }

    /// Restrict (or stop restricting) which documents searches may return.
    pub fn set_file_filter(&self, filter: FileFilter) {
        debug!(filter = %filter.describe(), "Setting KB file filter");
        let mut guard = self
            .filter
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = filter;
    }

    pub fn file_filter(&self) -> FileFilter {
        self.filter
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Return up to `top_k` chunks nearest to `query`, honouring the filter.
    ///
    /// An empty knowledge base or a filter that selects nothing is a normal
    /// empty result. Only backend failures are errors.
    pub async fn search_kb(&self, query: &str, top_k: usize) -> Result<KbSearchResult> {
        let state = self.state.read().await;

        if state.chunks.is_empty() {
            return Ok(KbSearchResult::unavailable());
        }

        let filter = self.file_filter();
        let (positions, transient) = match &filter {
            FileFilter::All => (None, None),
            FileFilter::Only(names) => {
                let positions: Vec<usize> = state
                    .chunks
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| names.contains(&c.filename))
                    .map(|(i, _)| i)
                    .collect();
                if positions.is_empty() {
                    return Ok(KbSearchResult::no_filter_match());
                }
                let transient = state.index.subset(&positions)?;
                (Some(positions), Some(transient))
            }
        };

        if top_k == 0 {
            return Ok(KbSearchResult::from_hits(Vec::new(), self.retrieval.preview_chars));
        }

        let query_vec = self.embed_query(query).await?;

        let neighbors: Vec<Neighbor> = match (&positions, &transient) {
            (Some(positions), Some(transient)) => transient
                .search(&query_vec, top_k.min(positions.len()))?
                .into_iter()
                .map(|n| Neighbor {
                    position: positions[n.position],
                    distance: n.distance,
                })
                .collect(),
            _ => state
                .index
                .search(&query_vec, top_k.min(state.chunks.len()))?,
        };

        let candidates = neighbors.len();
        let hits: Vec<SearchHit> = neighbors
            .into_iter()
            .filter(|n| match self.retrieval.max_distance {
                Some(max) => n.distance <= max,
                None => true,
            })
            .map(|n| {
                let chunk = &state.chunks[n.position];
                SearchHit {
                    text: chunk.text.clone(),
                    source: chunk.source.clone(),
                    filename: chunk.filename.clone(),
                    distance: n.distance,
                }
            })
            .collect();

        debug!(
            filter = %filter.describe(),
            candidates,
            returned = hits.len(),
            "KB search complete"
        );

        if candidates > 0 && hits.is_empty() {
            return Ok(if filter.is_active() {
                KbSearchResult::no_filter_match()
            } else {
                KbSearchResult::no_relevant_chunks()
            });
        }

        Ok(KbSearchResult::from_hits(hits, self.retrieval.preview_chars))
    }

    /// [`search_kb`](Self::search_kb) for callers that treat KB context as
    /// optional: a backend failure becomes an empty result whose debug
    /// string carries the error.
    pub async fn search_context(&self, query: &str, top_k: usize) -> KbSearchResult {
        match self.search_kb(query, top_k).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "KB retrieval error");
                KbSearchResult::retrieval_error(e)
            }
        }
    }

    /// Tracked documents ordered by path.
    pub async fn documents(&self) -> Vec<Document> {
        self.state.read().await.store.documents()
    }

    pub async fn stats(&self) -> KbStats {
        let state = self.state.read().await;
        KbStats {
            documents: state.store.len(),
            chunks: state.chunks.len(),
            indexed_vectors: state.index.len(),
            dims: state.index.dims(),
            filter: self.file_filter(),
            skipped: state
                .last_rebuild
                .as_ref()
                .map(|r| r.skipped.clone())
                .unwrap_or_default(),
        }
    }

    /// Whether opening (or the last [`load_existing`](Self::load_existing))
    /// registered files that had been dropped into the documents folder.
    pub async fn registered_new_files_on_load(&self) -> bool {
        self.state.read().await.registered_on_load
    }

    /// The report from the last successful load or rebuild.
    pub async fn last_rebuild(&self) -> Option<RebuildReport> {
        self.state.read().await.last_rebuild.clone()
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Flush metadata and, when the in-memory index is in sync, the index.
    pub async fn close(self) -> Result<()> {
        let state = self.state.into_inner();
        state.store.save_metadata()?;
        if state.last_rebuild.is_some() {
            let fingerprint = persist::fingerprint(
                &state.chunks,
                self.embedder.model_name(),
                self.embedder.dims(),
            );
            persist::save_index(&self.index_path, &state.index, &fingerprint)?;
        }
        debug!("Knowledge base closed");
        Ok(())
    }

    async fn rebuild_on_load(&self, state: &mut KbState) -> Result<LoadOutcome> {
        self.rebuild_locked(state).await.map(LoadOutcome::Rebuilt)
    }

    /// Build new chunks and index off to the side, persist, then swap.
    ///
    /// On any failure the previous state is left untouched.
    async fn rebuild_locked(&self, state: &mut KbState) -> Result<RebuildReport> {
        let collected = collect_chunks(&state.store, self.chunk_params);
        for skipped in &collected.skipped {
            warn!(
                path = %skipped.path.display(),
                reason = %skipped.reason,
                "Skipping tracked document during rebuild"
            );
        }

        let texts: Vec<String> = collected.chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embed_checked(&texts).await?
        };
        let index = FlatIndex::build(&vectors)?;

        if index.len() != collected.chunks.len() {
            return Err(KbError::Corrupt(format!(
                "rebuilt index holds {} vectors for {} chunks",
                index.len(),
                collected.chunks.len()
            )));
        }

        let fingerprint = persist::fingerprint(
            &collected.chunks,
            self.embedder.model_name(),
            self.embedder.dims(),
        );
        persist::save_index(&self.index_path, &index, &fingerprint)?;

        let report = RebuildReport {
            documents_indexed: collected.documents_indexed,
            chunks: collected.chunks.len(),
            skipped: collected.skipped,
        };
        state.chunks = collected.chunks;
        state.index = index;
        state.last_rebuild = Some(report.clone());

        info!(
            documents = report.documents_indexed,
            chunks = report.chunks,
            skipped = report.skipped.len(),
            "Knowledge-base index rebuilt"
        );
        Ok(report)
    }

    async fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .embedder
            .embed(texts)
            .await
            .map_err(KbError::retrieval)?;

        if vectors.len() != texts.len() {
            return Err(KbError::Retrieval(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        let dims = self.embedder.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(KbError::Retrieval(format!(
                "embedder returned a {}-dimensional vector, expected {}",
                bad.len(),
                dims
            )));
        }
        Ok(vectors)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_checked(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| KbError::Retrieval("empty embedding response".to_string()))
    }
}

struct CollectedChunks {
    chunks: Vec<Chunk>,
    documents_indexed: usize,
    skipped: Vec<SkippedDocument>,
}

/// Read and chunk every tracked document, in path order.
///
/// Documents that cannot be read are reported as skipped, not failed.
fn collect_chunks(store: &DocumentStore, params: ChunkParams) -> CollectedChunks {
    let mut collected = CollectedChunks {
        chunks: Vec::new(),
        documents_indexed: 0,
        skipped: Vec::new(),
    };

    for doc in store.documents() {
        let bytes = match std::fs::read(&doc.source_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                collected.skipped.push(SkippedDocument {
                    path: doc.source_path.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        collected.chunks.extend(chunk_document(
            &doc.source_path,
            &doc.filename,
            &text,
            params,
        ));
        collected.documents_indexed += 1;
    }

    collected
}
