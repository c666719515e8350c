//! Mag Core - semantic indexing and retrieval for codebases
//!
//! Source files are cut into declaration-sized chunks along their syntax
//! tree, embedded through an external backend and kept in a local vector
//! index that is updated incrementally. Search, file access and
//! retrieval-augmented explanations read from that index.

pub mod chunk;
pub mod concurrency;
pub mod config;
pub mod embed;
pub mod error;
pub mod explain;
pub mod index;
pub mod model;
pub mod prompts;
pub mod search;
pub mod store;
pub mod tools;
pub mod workspace;

pub use chunk::{AstChunker, Language, OutlineEntry};
pub use concurrency::{CancellationToken, ConcurrencyLimit};
pub use config::Config;
pub use embed::{
    CompletionProvider, CompletionRequest, Embedder, EmbeddingProvider, OllamaBackend,
    RetryPolicy,
};
pub use error::MagError;
pub use explain::{ExplainOrchestrator, Explanation};
pub use index::{
    ChangeSet, ChangeTracker, FailureKind, FileFailure, IndexMode, Indexer, Progress, RunSummary,
    SourceScanner,
};
pub use model::{ChunkId, ChunkKind, Citation, CodeChunk, LineSpan, SearchResult, SourceFile};
pub use search::{KindFilter, SearchEngine};
pub use store::{Manifest, ManifestEntry, MetadataFilter, VectorIndex};
pub use tools::CodebaseTools;
pub use workspace::Workspace;

/// Result type alias for mag operations
pub type Result<T> = std::result::Result<T, MagError>;
