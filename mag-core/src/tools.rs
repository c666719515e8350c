//! Tool and resource operations exposed to hosts

use crate::chunk::{AstChunker, Language, OutlineEntry};
use crate::embed::{CompletionProvider, Embedder};
use crate::error::MagError;
use crate::explain::{ExplainOrchestrator, Explanation};
use crate::search::{KindFilter, SearchEngine};
use crate::store::VectorIndex;
use crate::workspace::Workspace;
use globset::Glob;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Upper bound on `max_results` for a single search
pub const MAX_SEARCH_RESULTS: usize = 50;

/// One `search_code` hit
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub file: String,
    pub lines: [usize; 2],
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub hierarchy: String,
    pub relevance_score: f32,
}

/// `get_file` payload
#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub language: String,
    pub line_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ast: Option<Vec<OutlineEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ast_error: Option<String>,
}

/// `list_files` entry
#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    pub path: String,
    pub symbols: Vec<String>,
    pub types: Vec<String>,
    pub line_count: usize,
    pub chunk_count: usize,
}

/// `codebase://indexed`
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub total_files: usize,
    pub total_chunks: usize,
    pub languages: Vec<String>,
    pub index_stats: KindStats,
    pub last_updated: Option<String>,
    pub index_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindStats {
    pub code_types: Vec<String>,
    pub kind_counts: std::collections::BTreeMap<String, usize>,
    pub total_chunks: usize,
}

/// `codebase://stats`
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub index_size_mb: f64,
    pub total_chunks: usize,
    pub embedding_model: String,
    pub llm_model: String,
    pub uptime_seconds: u64,
    pub codebase_root: String,
    pub chunk_size_tokens: usize,
}

/// Everything a host can ask of one indexed codebase
pub struct CodebaseTools {
    workspace: Workspace,
    store: VectorIndex,
    embedder: Arc<Embedder>,
    llm: Arc<dyn CompletionProvider>,
    chunker: AstChunker,
    started: Instant,
}

impl CodebaseTools {
    pub fn new(
        workspace: Workspace,
        store: VectorIndex,
        embedder: Arc<Embedder>,
        llm: Arc<dyn CompletionProvider>,
    ) -> Self {
        let chunker = AstChunker::new(&workspace.config().indexing);
        Self {
            workspace,
            store,
            embedder,
            llm,
            chunker,
            started: Instant::now(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn store(&self) -> &VectorIndex {
        &self.store
    }

    /// Semantic search over indexed chunks
    pub fn search_code(
        &self,
        query: &str,
        max_results: Option<usize>,
        filter_type: Option<&str>,
    ) -> crate::Result<Vec<SearchHit>> {
        let config = self.workspace.config();
        let max_results = max_results
            .unwrap_or(config.search.default_results)
            .min(MAX_SEARCH_RESULTS);
        let filter = parse_filter(filter_type)?;

        let engine = SearchEngine::new(&self.store, &self.embedder, &config.search);
        let results = engine.search(query, max_results, filter)?;

        Ok(results
            .into_iter()
            .map(|r| SearchHit {
                id: r.chunk.id.to_string(),
                file: r.chunk.file_path.clone(),
                lines: [r.chunk.lines.start, r.chunk.lines.end],
                kind: r.chunk.kind.to_string(),
                name: r.chunk.symbol.clone(),
                hierarchy: r.chunk.symbol_path(),
                relevance_score: (r.score * 100.0).round() / 100.0,
                content: r.chunk.text,
            })
            .collect())
    }

    /// Raw file text, optionally with its declaration outline
    pub fn get_file(&self, path: &str, include_ast: bool) -> crate::Result<FileContent> {
        let relative = checked_relative(path)?;
        let root = self.workspace.root();
        let full = root.join(relative);

        if !full.is_file() {
            return Err(MagError::FileNotFound(path.to_string()));
        }
        // Symlinks may still point outside
        let canonical_root = root.canonicalize()?;
        if !full.canonicalize()?.starts_with(&canonical_root) {
            return Err(MagError::PathOutsideRoot(path.to_string()));
        }

        let content = fs::read_to_string(&full)?;
        let language = Language::from_path(&full)
            .map(|l| l.name().to_string())
            .unwrap_or_else(|| "text".to_string());

        let (ast, ast_error) = if include_ast {
            match self.chunker.outline(path, &content) {
                Ok(outline) => (Some(outline), None),
                Err(e) => (None, Some(e.to_string())),
            }
        } else {
            (None, None)
        };

        Ok(FileContent {
            path: path.to_string(),
            line_count: content.lines().count(),
            content,
            language,
            ast,
            ast_error,
        })
    }

    /// Indexed files, optionally narrowed by path glob and chunk kind
    pub fn list_files(
        &self,
        pattern: Option<&str>,
        filter_type: Option<&str>,
    ) -> crate::Result<Vec<FileListing>> {
        let matcher = match pattern {
            Some(p) if !p.trim().is_empty() => Some(
                Glob::new(p)
                    .map_err(|e| MagError::GlobPattern(e.to_string()))?
                    .compile_matcher(),
            ),
            _ => None,
        };
        let filter = parse_filter(filter_type)?;

        let mut listings = Vec::new();
        for summary in self.store.file_summaries()? {
            if let Some(m) = &matcher {
                if !m.is_match(&summary.path) {
                    continue;
                }
            }
            if !summary.kinds.iter().any(|k| filter.matches(*k)) {
                continue;
            }

            let line_count = fs::read_to_string(self.workspace.root().join(&summary.path))
                .map(|c| c.lines().count())
                .unwrap_or(0);
            let symbols: BTreeSet<String> = summary.symbols.into_iter().collect();
            let types: BTreeSet<String> = summary.kinds.iter().map(|k| k.to_string()).collect();

            listings.push(FileListing {
                path: summary.path,
                symbols: symbols.into_iter().collect(),
                types: types.into_iter().collect(),
                line_count,
                chunk_count: summary.chunk_count,
            });
        }
        Ok(listings)
    }

    pub fn explain_symbol(&self, symbol: &str, include_usage: bool) -> crate::Result<Explanation> {
        ExplainOrchestrator::new(
            &self.store,
            &self.embedder,
            self.llm.as_ref(),
            self.workspace.config(),
        )
        .explain(symbol, include_usage)
    }

    /// Summary behind `codebase://indexed`
    pub fn index_summary(&self) -> crate::Result<IndexSummary> {
        let manifest = self.store.load_manifest()?;
        let histogram = self.store.kind_histogram()?;
        let total_chunks = self.store.count()?;

        let languages: BTreeSet<String> = manifest
            .paths()
            .filter_map(|p| Language::from_path(Path::new(p)))
            .map(|l| l.name().to_string())
            .collect();
        let last_updated = manifest
            .last_updated()
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
            .and_then(|t| t.format(&Rfc3339).ok());

        Ok(IndexSummary {
            total_files: manifest.len(),
            total_chunks,
            languages: languages.into_iter().collect(),
            index_stats: KindStats {
                code_types: histogram.keys().cloned().collect(),
                kind_counts: histogram,
                total_chunks,
            },
            last_updated,
            index_path: self.workspace.index_path().display().to_string(),
        })
    }

    /// Summary behind `codebase://stats`
    pub fn server_stats(&self) -> crate::Result<ServerStats> {
        let config = self.workspace.config();
        let size_mb = self.workspace.index_size_bytes() as f64 / (1024.0 * 1024.0);

        Ok(ServerStats {
            index_size_mb: (size_mb * 100.0).round() / 100.0,
            total_chunks: self.store.count()?,
            embedding_model: self.embedder.provider_id(),
            llm_model: self.llm.id(),
            uptime_seconds: self.started.elapsed().as_secs(),
            codebase_root: self.workspace.root().display().to_string(),
            chunk_size_tokens: config.indexing.chunk_size_tokens,
        })
    }
}

fn parse_filter(filter_type: Option<&str>) -> crate::Result<KindFilter> {
    match filter_type {
        Some(f) if !f.trim().is_empty() => f.parse(),
        _ => Ok(KindFilter::All),
    }
}

/// Relative path with no root, prefix or `..` components
fn checked_relative(path: &str) -> crate::Result<&Path> {
    let p = Path::new(path);
    let escapes = p.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || path.trim().is_empty() {
        return Err(MagError::PathOutsideRoot(path.to_string()));
    }
    Ok(p)
}
