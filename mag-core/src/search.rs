//! Semantic search: embed the query, rank stored chunks by cosine similarity

use crate::concurrency::CancellationToken;
use crate::config::SearchConfig;
use crate::embed::Embedder;
use crate::error::MagError;
use crate::model::{ChunkKind, SearchResult};
use crate::store::{MetadataFilter, VectorIndex};
use std::fmt::{self, Display};
use std::str::FromStr;
use tracing::debug;

/// Restricts results to one chunk kind; `All` disables the predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    #[default]
    All,
    Kind(ChunkKind),
}

impl KindFilter {
    pub fn to_metadata_filter(self) -> MetadataFilter {
        match self {
            Self::All => MetadataFilter::all(),
            Self::Kind(kind) => MetadataFilter::kind(kind),
        }
    }

    pub fn matches(self, kind: ChunkKind) -> bool {
        match self {
            Self::All => true,
            Self::Kind(k) => k == kind,
        }
    }
}

impl FromStr for KindFilter {
    type Err = MagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<ChunkKind>().map(Self::Kind)
    }
}

impl Display for KindFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Kind(kind) => write!(f, "{}", kind),
        }
    }
}

/// Query-side view over an index and an embedding backend
pub struct SearchEngine<'a> {
    store: &'a VectorIndex,
    embedder: &'a Embedder,
    threshold: f32,
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a VectorIndex, embedder: &'a Embedder, config: &SearchConfig) -> Self {
        Self {
            store,
            embedder,
            threshold: config.similarity_threshold,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Top `max_results` chunks at or above the similarity threshold.
    ///
    /// No hits is an empty list; a backend that cannot embed the query is
    /// [`MagError::BackendUnavailable`].
    pub fn search(
        &self,
        query: &str,
        max_results: usize,
        filter: KindFilter,
    ) -> crate::Result<Vec<SearchResult>> {
        if max_results == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed_one(query, &CancellationToken::new())
            .map_err(|e| match e {
                MagError::Embedding { message, .. } => MagError::BackendUnavailable(message),
                other => other,
            })?;

        let results = self.store.query(
            &vector,
            max_results,
            &filter.to_metadata_filter(),
            self.threshold,
        )?;
        debug!(query, %filter, hits = results.len(), "search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use crate::embed::EmbeddingProvider;
    use crate::model::{ChunkId, CodeChunk, LineSpan};
    use crate::store::ChunkRecord;
    use std::sync::Arc;

    /// Maps a few keywords onto fixed axes
    struct Keywords;

    impl EmbeddingProvider for Keywords {
        fn id(&self) -> String {
            "test/keywords".to_string()
        }

        fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.matches("shape").count() as f32,
                        t.matches("area").count() as f32,
                        t.matches("render").count() as f32,
                    ]
                })
                .collect())
        }
    }

    struct Offline;

    impl EmbeddingProvider for Offline {
        fn id(&self) -> String {
            "test/offline".to_string()
        }

        fn embed(&self, _: &[String]) -> crate::Result<Vec<Vec<f32>>> {
            Err(MagError::embedding("connection refused", true))
        }
    }

    fn record(symbol: &str, kind: ChunkKind, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            chunk: CodeChunk {
                id: ChunkId::new("Shapes.cs", symbol, 0),
                kind,
                symbol: symbol.to_string(),
                parent_path: None,
                file_path: "Shapes.cs".to_string(),
                lines: LineSpan { start: 1, end: 1 },
                span: 0..1,
                ordinal: 0,
                text: symbol.to_string(),
                signature: None,
                has_doc: false,
                fragment: None,
                fingerprint: "f".to_string(),
            },
            vector,
        }
    }

    fn store() -> VectorIndex {
        let mut store = VectorIndex::open_in_memory().unwrap();
        store
            .replace_file(
                "Shapes.cs",
                &[
                    record("IShape", ChunkKind::Interface, vec![1.0, 0.2, 0.0]),
                    record("Area", ChunkKind::Method, vec![0.2, 1.0, 0.0]),
                    record("Render", ChunkKind::Method, vec![0.0, 0.0, 1.0]),
                ],
            )
            .unwrap();
        store
    }

    fn embedder(provider: Arc<dyn EmbeddingProvider>) -> Embedder {
        Embedder::new(provider, &IndexingConfig::default())
    }

    #[test]
    fn test_kind_filter_parse() {
        assert_eq!("all".parse::<KindFilter>().unwrap(), KindFilter::All);
        assert_eq!(
            "Interface".parse::<KindFilter>().unwrap(),
            KindFilter::Kind(ChunkKind::Interface)
        );
        assert!(matches!(
            "widget".parse::<KindFilter>().unwrap_err(),
            MagError::InvalidFilter(_)
        ));
    }

    #[test]
    fn test_search_ranks_and_filters() {
        let store = store();
        let embedder = embedder(Arc::new(Keywords));
        let engine = SearchEngine::new(&store, &embedder, &SearchConfig::default());

        let results = engine.search("shape", 5, KindFilter::All).unwrap();
        assert_eq!(results[0].chunk.symbol, "IShape");

        let results = engine
            .search("area", 5, KindFilter::Kind(ChunkKind::Method))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.symbol, "Area");
    }

    #[test]
    fn test_no_hits_is_empty_not_error() {
        let store = store();
        let embedder = embedder(Arc::new(Keywords));
        let engine = SearchEngine::new(&store, &embedder, &SearchConfig::default());

        // Query vector is all zeros: nothing clears the threshold
        assert!(engine.search("unrelated", 5, KindFilter::All).unwrap().is_empty());
        assert!(engine.search("shape", 0, KindFilter::All).unwrap().is_empty());
    }

    #[test]
    fn test_unreachable_backend_is_distinct_from_no_results() {
        let store = store();
        let embedder = embedder(Arc::new(Offline)).with_retry(crate::embed::RetryPolicy::once());
        let engine = SearchEngine::new(&store, &embedder, &SearchConfig::default());

        let err = engine.search("shape", 5, KindFilter::All).unwrap_err();
        assert!(matches!(err, MagError::BackendUnavailable(_)));
    }
}
