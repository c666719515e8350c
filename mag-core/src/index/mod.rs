//! Write path: scan, detect changes, chunk, embed and store

mod changes;
mod pipeline;
mod scanner;

pub use changes::{ChangeSet, ChangeTracker};
pub use scanner::{ScanReport, ScanStats, SourceScanner};

use crate::chunk::AstChunker;
use crate::config::Config;
use crate::embed::Embedder;
use crate::store::VectorIndex;
use crate::workspace::Workspace;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How a run treats files already in the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Only added, modified and removed files are touched
    Incremental,
    /// Drop the index and re-embed every file
    FullRebuild,
}

/// Which stage a file failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Discovery,
    Parse,
    Embedding,
    IndexWrite,
}

/// A file skipped by this run; its manifest entry is untouched
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one indexing run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: IndexMode,
    pub files_scanned: usize,
    pub files_added: usize,
    pub files_modified: usize,
    pub files_removed: usize,
    pub files_unchanged: usize,
    /// Files whose chunks and manifest entry were committed
    pub files_processed: usize,
    pub chunks_written: usize,
    pub chunks_deleted: usize,
    pub embedding_calls: usize,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunSummary {
    fn new(mode: IndexMode) -> Self {
        Self {
            mode,
            files_scanned: 0,
            files_added: 0,
            files_modified: 0,
            files_removed: 0,
            files_unchanged: 0,
            files_processed: 0,
            chunks_written: 0,
            chunks_deleted: 0,
            embedding_calls: 0,
            failures: Vec::new(),
            cancelled: false,
            duration: Duration::ZERO,
        }
    }

    pub fn errors(&self) -> usize {
        self.failures.len()
    }

    /// Every attempted file failed to embed: the backend is effectively gone
    pub fn backend_unavailable(&self) -> bool {
        self.files_processed == 0
            && !self.failures.is_empty()
            && self
                .failures
                .iter()
                .all(|f| f.kind == FailureKind::Embedding)
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Per-file progress, reported from the writer after each file settles
#[derive(Debug, Clone)]
pub struct Progress<'a> {
    pub current: usize,
    pub total: usize,
    pub path: &'a str,
    pub ok: bool,
}

/// Keeps one codebase's index in sync with its source tree
pub struct Indexer {
    root: PathBuf,
    config: Config,
    store: VectorIndex,
    embedder: Arc<Embedder>,
    chunker: AstChunker,
}

impl Indexer {
    pub fn new(workspace: &Workspace, store: VectorIndex, embedder: Arc<Embedder>) -> Self {
        let config = workspace.config().clone();
        Self {
            root: workspace.root().to_path_buf(),
            chunker: AstChunker::new(&config.indexing),
            config,
            store,
            embedder,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &VectorIndex {
        &self.store
    }

    pub fn into_store(self) -> VectorIndex {
        self.store
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }
}
