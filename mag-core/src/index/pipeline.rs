//! Indexing pipeline: rayon producers chunk and embed files, a single writer
//! applies delete → upsert → manifest per file.

use super::scanner::file_mtime;
use super::{
    ChangeTracker, FailureKind, FileFailure, IndexMode, Indexer, Progress, RunSummary,
    SourceScanner,
};
use crate::chunk::{warm_bpe, AstChunker};
use crate::concurrency::CancellationToken;
use crate::embed::Embedder;
use crate::error::MagError;
use crate::model::{fingerprint, ChunkId, CodeChunk, SourceFile};
use crate::store::{ChunkRecord, VectorIndex};
use crossbeam_channel::Receiver;
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of preparing one file on a worker
enum FileOutcome {
    Ready {
        file: SourceFile,
        records: Vec<ChunkRecord>,
    },
    Failed(FileFailure),
    /// Cancelled mid-file; nothing is written
    Cancelled(String),
}

impl Indexer {
    /// Bring the index in line with the source tree
    pub fn run(&mut self, mode: IndexMode, cancel: &CancellationToken) -> crate::Result<RunSummary> {
        self.run_with_progress(mode, cancel, &mut ignore_progress)
    }

    /// Like [`Indexer::run`], reporting each settled file to `progress`
    pub fn run_with_progress(
        &mut self,
        mode: IndexMode,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(Progress<'_>),
    ) -> crate::Result<RunSummary> {
        let started = Instant::now();

        let scanner = SourceScanner::new(&self.root, &self.config.codebase)?;
        let scan = scanner.scan_report()?;
        let mode = self.effective_mode(mode)?;

        let mut summary = RunSummary::new(mode);
        summary.files_scanned = scan.files.len();

        let manifest = self.store.load_manifest()?;
        let indexed_paths = self.store.indexed_paths()?;
        let changes = ChangeTracker::new(&manifest, &indexed_paths).classify(
            scan.files,
            &scan.unreadable,
            mode,
        );
        summary.files_added = changes.added.len();
        summary.files_modified = changes.modified.len();
        summary.files_removed = changes.removed.len();
        summary.files_unchanged = changes.unchanged.len();

        info!(
            ?mode,
            added = summary.files_added,
            modified = summary.files_modified,
            removed = summary.files_removed,
            unchanged = summary.files_unchanged,
            "change detection complete"
        );

        let to_process = changes.to_process();
        let calls_before = self.embedder.calls();

        // Fail before touching the index if the backend cannot be reached
        if !to_process.is_empty() {
            if let Err(e) = self.embedder.health_check() {
                error!(error = %e, "embedding backend unavailable, aborting run");
                return Err(e);
            }
        }

        if mode == IndexMode::FullRebuild {
            self.store.clear()?;
        } else {
            for path in &changes.removed {
                if cancel.is_cancelled() {
                    break;
                }
                self.remove_file(path, &mut summary)?;
            }
        }

        if !to_process.is_empty() && !cancel.is_cancelled() {
            self.store.set_embedding_model(&self.embedder.provider_id())?;
            warm_bpe();
            self.process_files(&to_process, cancel, &mut summary, progress)?;
        }

        summary.embedding_calls = self.embedder.calls() - calls_before;
        summary.cancelled = cancel.is_cancelled();
        summary.duration = started.elapsed();

        info!(
            processed = summary.files_processed,
            chunks = summary.chunks_written,
            errors = summary.errors(),
            cancelled = summary.cancelled,
            elapsed_ms = summary.duration.as_millis() as u64,
            "indexing run finished"
        );
        Ok(summary)
    }

    /// A changed backend or an earlier dimension clash forces a rebuild
    fn effective_mode(&self, requested: IndexMode) -> crate::Result<IndexMode> {
        if requested == IndexMode::FullRebuild {
            return Ok(requested);
        }
        let info = self.store.embedding_info()?;
        if info.rebuild_required {
            info!("index marked for rebuild");
            return Ok(IndexMode::FullRebuild);
        }
        let provider = self.embedder.provider_id();
        if let Some(model) = info.model {
            if model != provider {
                info!(previous = %model, current = %provider, "embedding backend changed, rebuilding");
                return Ok(IndexMode::FullRebuild);
            }
        }
        Ok(IndexMode::Incremental)
    }

    /// Chunks first, then the manifest entry
    fn remove_file(&mut self, path: &str, summary: &mut RunSummary) -> crate::Result<()> {
        let result = self
            .store
            .delete_by_file(path)
            .and_then(|deleted| self.store.remove_manifest_entry(path).map(|_| deleted));

        match result {
            Ok(deleted) => {
                debug!(path, deleted, "removed file from index");
                summary.chunks_deleted += deleted;
                Ok(())
            }
            Err(e) => absorb_write_error(&self.store, e, path, summary),
        }
    }

    fn process_files(
        &mut self,
        files: &[SourceFile],
        cancel: &CancellationToken,
        summary: &mut RunSummary,
        progress: &mut dyn FnMut(Progress<'_>),
    ) -> crate::Result<()> {
        let workers = self.config.indexing.max_workers.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<FileOutcome>(workers * 2);

        let root = self.root.as_path();
        let chunker = &self.chunker;
        let embedder: &Embedder = &self.embedder;
        let store = &mut self.store;

        // Set by the writer when it aborts so producers stop early
        let abort = AtomicBool::new(false);
        let abort_ref = &abort;

        std::thread::scope(|s| {
            // Producer thread: runs a rayon pool sized to max_workers
            let producer = s.spawn(move || -> crate::Result<()> {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|e| MagError::WorkerPool(e.to_string()))?;

                pool.install(|| {
                    files.par_iter().for_each_with(tx, |sender, file| {
                        if abort_ref.load(Ordering::Relaxed) || cancel.is_cancelled() {
                            return;
                        }
                        let outcome = prepare_file(root, file, chunker, embedder, cancel);
                        if sender.send(outcome).is_err() {
                            // Writer gone, stop the other workers
                            abort_ref.store(true, Ordering::Relaxed);
                        }
                    });
                });
                // Senders dropped here, the writer sees the channel close
                Ok(())
            });

            // Writer: calling thread, owns the store
            let written = write_outcomes(store, rx, files.len(), summary, progress);
            if written.is_err() {
                abort.store(true, Ordering::Relaxed);
            }

            let produced = producer
                .join()
                .map_err(|_| MagError::WorkerPool("indexing worker panicked".to_string()))?;
            written?;
            produced
        })
    }
}

fn ignore_progress(_: Progress<'_>) {}

/// Read, chunk and embed one file
fn prepare_file(
    root: &Path,
    file: &SourceFile,
    chunker: &AstChunker,
    embedder: &Embedder,
    cancel: &CancellationToken,
) -> FileOutcome {
    let abs_path = root.join(&file.path);
    let failed = |kind, message: String| {
        FileOutcome::Failed(FileFailure {
            path: file.path.clone(),
            kind,
            message,
        })
    };

    // Capture mtime before read so a concurrent edit is seen next run
    let mtime = fs::metadata(&abs_path)
        .map(|m| file_mtime(&m))
        .unwrap_or(file.mtime);
    let bytes = match fs::read(&abs_path) {
        Ok(b) => b,
        Err(e) => return failed(FailureKind::Discovery, e.to_string()),
    };

    // Fingerprint what was actually read, not what the scan saw
    let current = SourceFile {
        path: file.path.clone(),
        fingerprint: fingerprint(&bytes),
        size: bytes.len() as u64,
        mtime,
    };
    let source = String::from_utf8_lossy(&bytes);

    let chunks = match chunker.chunk(&current.path, &source, &current.fingerprint) {
        Ok(c) => c,
        Err(e) => return failed(FailureKind::Parse, e.to_string()),
    };

    let texts: Vec<String> = chunks.iter().map(CodeChunk::embedding_text).collect();
    let vectors = if texts.is_empty() {
        Vec::new()
    } else {
        match embedder.embed_all(&texts, cancel) {
            Ok(v) => v,
            Err(MagError::Cancelled) => return FileOutcome::Cancelled(current.path),
            Err(e) => return failed(FailureKind::Embedding, e.to_string()),
        }
    };

    let records = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| ChunkRecord { chunk, vector })
        .collect();
    FileOutcome::Ready {
        file: current,
        records,
    }
}

/// Apply outcomes in arrival order. Takes the receiver by value so returning
/// early disconnects the producers.
fn write_outcomes(
    store: &mut VectorIndex,
    rx: Receiver<FileOutcome>,
    total: usize,
    summary: &mut RunSummary,
    progress: &mut dyn FnMut(Progress<'_>),
) -> crate::Result<()> {
    let mut current = 0;

    for outcome in rx.iter() {
        current += 1;
        match outcome {
            FileOutcome::Ready { file, records } => {
                let ok = match commit_file(store, &file, &records) {
                    Ok(deleted) => {
                        debug!(path = %file.path, chunks = records.len(), "indexed file");
                        summary.files_processed += 1;
                        summary.chunks_written += records.len();
                        summary.chunks_deleted += deleted;
                        true
                    }
                    Err(e) => {
                        absorb_write_error(store, e, &file.path, summary)?;
                        false
                    }
                };
                progress(Progress {
                    current,
                    total,
                    path: &file.path,
                    ok,
                });
            }
            FileOutcome::Failed(failure) => {
                warn!(path = %failure.path, kind = ?failure.kind, error = %failure.message, "skipping file");
                progress(Progress {
                    current,
                    total,
                    path: &failure.path,
                    ok: false,
                });
                summary.failures.push(failure);
            }
            FileOutcome::Cancelled(path) => {
                debug!(path = %path, "file abandoned on cancellation");
            }
        }
    }

    Ok(())
}

/// Replace the file's chunk set, then record it in the manifest.
/// Returns the number of chunks replaced.
fn commit_file(
    store: &mut VectorIndex,
    file: &SourceFile,
    records: &[ChunkRecord],
) -> crate::Result<usize> {
    let deleted = store.replace_file(&file.path, records)?;
    let ids: Vec<ChunkId> = records.iter().map(|r| r.chunk.id.clone()).collect();
    store.commit_manifest_entry(file, &ids)?;
    Ok(deleted)
}

/// Record a per-file write failure, or abort the run when writing is hopeless
fn absorb_write_error(
    store: &VectorIndex,
    err: MagError,
    path: &str,
    summary: &mut RunSummary,
) -> crate::Result<()> {
    match err {
        MagError::DimensionMismatch { .. } => {
            if let Err(e) = store.mark_rebuild_required() {
                warn!(error = %e, "could not flag index for rebuild");
            }
            error!(path, error = %err, "embedding dimension changed, aborting run");
            Err(err)
        }
        e if e.is_storage_fatal() => {
            error!(path, error = %e, "index storage unavailable, aborting run");
            Err(e)
        }
        e => {
            let err = MagError::IndexWrite {
                path: path.to_string(),
                message: e.to_string(),
            };
            warn!(path, error = %err, "index write failed");
            summary.failures.push(FileFailure {
                path: path.to_string(),
                kind: FailureKind::IndexWrite,
                message: err.to_string(),
            });
            Ok(())
        }
    }
}
