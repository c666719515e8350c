//! End-to-end runs of the indexing pipeline, search and explain against a
//! temporary codebase with deterministic in-process backends.

use mag_core::{
    CancellationToken, ChunkKind, CodebaseTools, CompletionProvider, CompletionRequest, Config,
    Embedder, EmbeddingProvider, FailureKind, IndexMode, Indexer, KindFilter, MagError,
    SearchEngine, SourceScanner, VectorIndex, Workspace,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const DIM: usize = 256;

const ISHAPE: &str = r#"public interface IShape
{
    double Area();
    double Perimeter();
}
"#;

const CIRCLE: &str = r#"public class Circle : IShape
{
    public double Area()
    {
        return 3.14 * 2.0;
    }

    public double Perimeter()
    {
        return 2.0 * 3.14;
    }
}
"#;

const SQUARE: &str = r#"public class Square : IShape
{
    public double Area() => 4.0;

    public double Perimeter() => 8.0;
}
"#;

/// Bag of words hashed onto a fixed number of axes
struct HashEmbedder {
    id: String,
    calls: AtomicUsize,
    /// When set, any batch mentioning "Broken" fails
    fail_broken: AtomicBool,
    /// Cancelled right after the next call returns
    cancel_after_call: Mutex<Option<CancellationToken>>,
}

impl HashEmbedder {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            calls: AtomicUsize::new(0),
            fail_broken: AtomicBool::new(false),
            cancel_after_call: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut h = DefaultHasher::new();
        token.to_lowercase().hash(&mut h);
        v[(h.finish() % DIM as u64) as usize] += 1.0;
    }
    v
}

impl EmbeddingProvider for HashEmbedder {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn embed(&self, texts: &[String]) -> mag_core::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_broken.load(Ordering::SeqCst) && texts.iter().any(|t| t.contains("Broken")) {
            return Err(MagError::Embedding {
                message: "model rejected input".to_string(),
                transient: false,
            });
        }
        let vectors = texts.iter().map(|t| hash_vector(t)).collect();
        if let Some(token) = self.cancel_after_call.lock().unwrap().take() {
            token.cancel();
        }
        Ok(vectors)
    }
}

/// Canned completions that can be switched to fail; keeps every prompt
#[derive(Default)]
struct CannedLlm {
    fail: AtomicBool,
    prompts: Mutex<Vec<String>>,
}

impl CannedLlm {
    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl CompletionProvider for CannedLlm {
    fn id(&self) -> String {
        "test/canned".to_string()
    }

    fn complete(&self, request: &CompletionRequest) -> mag_core::Result<String> {
        assert!(request.prompt.contains("# Code to Explain"));
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(MagError::Completion("model not loaded".to_string()));
        }
        Ok("It computes the area.".to_string())
    }
}

struct Fixture {
    dir: TempDir,
    workspace: Workspace,
}

impl Fixture {
    fn new(threshold: f32) -> Self {
        Self::configured(|config| config.search.similarity_threshold = threshold)
    }

    fn configured(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "IShape.cs", ISHAPE);
        write(dir.path(), "Circle.cs", CIRCLE);
        write(dir.path(), "Square.cs", SQUARE);

        let mut config = Config::default();
        config.search.similarity_threshold = 0.0;
        config.indexing.max_workers = 2;
        adjust(&mut config);
        let workspace = Workspace::with_config(dir.path(), config).unwrap();
        Self { dir, workspace }
    }

    fn indexer(&self, provider: &Arc<HashEmbedder>) -> Indexer {
        let store = self.workspace.open_index().unwrap();
        Indexer::new(&self.workspace, store, self.embedder(provider))
    }

    fn embedder(&self, provider: &Arc<HashEmbedder>) -> Arc<Embedder> {
        let provider: Arc<dyn EmbeddingProvider> = provider.clone();
        Arc::new(Embedder::new(provider, &self.workspace.config().indexing))
    }

    fn store(&self) -> VectorIndex {
        self.workspace.open_index().unwrap()
    }
}

fn write(root: &Path, name: &str, content: &str) {
    fs::write(root.join(name), content).unwrap();
}

fn run(indexer: &mut Indexer) -> mag_core::RunSummary {
    indexer
        .run(IndexMode::Incremental, &CancellationToken::new())
        .unwrap()
}

fn ids_of(store: &VectorIndex, path: &str) -> Vec<String> {
    store
        .chunks_for_file(path)
        .unwrap()
        .iter()
        .map(|c| c.id.to_string())
        .collect()
}

#[test]
fn test_first_run_indexes_every_declaration() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    let summary = run(&mut fx.indexer(&provider));

    assert_eq!(summary.files_scanned, 3);
    assert_eq!(summary.files_added, 3);
    assert_eq!(summary.files_processed, 3);
    assert_eq!(summary.errors(), 0);
    assert_eq!(summary.chunks_written, 9);

    let store = fx.store();
    let histogram = store.kind_histogram().unwrap();
    let expected: BTreeMap<String, usize> = [("class", 2), ("interface", 1), ("method", 6)]
        .into_iter()
        .map(|(k, n)| (k.to_string(), n))
        .collect();
    assert_eq!(histogram, expected);
    assert_eq!(store.load_manifest().unwrap().len(), 3);
}

#[test]
fn test_unchanged_rerun_makes_no_writes_or_calls() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));
    let calls = provider.calls();

    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_unchanged, 3);
    assert_eq!(summary.files_processed, 0);
    assert_eq!(summary.chunks_written, 0);
    assert_eq!(summary.chunks_deleted, 0);
    assert_eq!(summary.embedding_calls, 0);
    assert_eq!(provider.calls(), calls);
}

#[test]
fn test_identical_source_gives_identical_ids() {
    let a = Fixture::new(0.0);
    let b = Fixture::new(0.0);
    run(&mut a.indexer(&HashEmbedder::new("test/hash")));
    run(&mut b.indexer(&HashEmbedder::new("test/hash")));

    for path in ["IShape.cs", "Circle.cs", "Square.cs"] {
        let left = a.store().chunks_for_file(path).unwrap();
        let right = b.store().chunks_for_file(path).unwrap();
        assert_eq!(left.len(), right.len());
        for (l, r) in left.iter().zip(&right) {
            assert_eq!(l.id, r.id);
            assert_eq!(l.lines, r.lines);
            assert_eq!(l.span, r.span);
        }
    }
}

#[test]
fn test_deleting_a_file_removes_exactly_its_chunks() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));

    let store = fx.store();
    let before = store.count().unwrap();
    let circle_chunks = store.count_for_file("Circle.cs").unwrap();
    let interface_ids = ids_of(&store, "IShape.cs");
    drop(store);

    fs::remove_file(fx.dir.path().join("Circle.cs")).unwrap();
    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_removed, 1);
    assert_eq!(summary.chunks_deleted, circle_chunks);

    let store = fx.store();
    assert_eq!(store.count().unwrap(), before - circle_chunks);
    assert_eq!(store.count_for_file("Circle.cs").unwrap(), 0);
    assert!(store.manifest_entry("Circle.cs").unwrap().is_none());
    assert_eq!(ids_of(&store, "IShape.cs"), interface_ids);
}

#[test]
fn test_modified_file_replaces_its_chunk_set() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));

    write(
        fx.dir.path(),
        "Square.cs",
        "public class Square : IShape\n{\n    public double Area() => 4.0;\n}\n",
    );
    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_modified, 1);
    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.chunks_written, 2);
    assert_eq!(summary.chunks_deleted, 3);

    let store = fx.store();
    let symbols: Vec<String> = store
        .chunks_for_file("Square.cs")
        .unwrap()
        .into_iter()
        .map(|c| c.symbol_path())
        .collect();
    assert_eq!(symbols, vec!["Square", "Square.Area"]);
}

#[test]
fn test_interface_filter_returns_the_interface() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));

    let store = fx.store();
    let embedder = fx.embedder(&provider);
    let engine = SearchEngine::new(&store, &embedder, &fx.workspace.config().search);

    let results = engine
        .search("interface", 5, KindFilter::Kind(ChunkKind::Interface))
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.symbol, "IShape");
    assert_eq!(results[0].chunk.file_path, "IShape.cs");
}

#[test]
fn test_one_failed_file_leaves_its_manifest_entry() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));

    let store = fx.store();
    let old_entry = store.manifest_entry("Square.cs").unwrap().unwrap();
    let old_ids = ids_of(&store, "Square.cs");
    drop(store);

    write(fx.dir.path(), "IShape.cs", &ISHAPE.replace("Perimeter", "Circumference"));
    write(fx.dir.path(), "Circle.cs", &CIRCLE.replace("3.14", "3.1416"));
    write(fx.dir.path(), "Square.cs", &SQUARE.replace("Square", "BrokenSquare"));
    provider.fail_broken.store(true, Ordering::SeqCst);

    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_modified, 3);
    assert_eq!(summary.files_processed, 2);
    assert_eq!(summary.errors(), 1);
    assert_eq!(summary.failures[0].path, "Square.cs");
    assert_eq!(summary.failures[0].kind, FailureKind::Embedding);
    assert!(!summary.backend_unavailable());

    let store = fx.store();
    assert_eq!(store.manifest_entry("Square.cs").unwrap().unwrap(), old_entry);
    assert_eq!(ids_of(&store, "Square.cs"), old_ids);

    // The failed file is still pending on the next run
    provider.fail_broken.store(false, Ordering::SeqCst);
    drop(store);
    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_modified, 1);
    assert_eq!(summary.files_processed, 1);
}

#[test]
fn test_all_files_failing_reads_as_backend_unavailable() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    provider.fail_broken.store(true, Ordering::SeqCst);
    for (name, ty) in [("IShape.cs", "IShape"), ("Circle.cs", "Circle"), ("Square.cs", "Square")] {
        let content = fs::read_to_string(fx.dir.path().join(name)).unwrap();
        write(fx.dir.path(), name, &content.replace(ty, &format!("Broken{}", ty)));
    }

    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_processed, 0);
    assert_eq!(summary.errors(), 3);
    assert!(summary.backend_unavailable());
    assert!(fx.store().load_manifest().unwrap().is_empty());
}

#[test]
fn test_changed_backend_forces_full_rebuild() {
    let fx = Fixture::new(0.0);
    run(&mut fx.indexer(&HashEmbedder::new("test/hash-a")));

    let summary = run(&mut fx.indexer(&HashEmbedder::new("test/hash-b")));
    assert_eq!(summary.mode, IndexMode::FullRebuild);
    assert_eq!(summary.files_processed, 3);

    let store = fx.store();
    assert_eq!(store.count().unwrap(), 9);
    assert_eq!(
        store.embedding_info().unwrap().model.as_deref(),
        Some("test/hash-b")
    );
}

#[test]
fn test_cancelled_run_writes_nothing() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = fx
        .indexer(&provider)
        .run(IndexMode::Incremental, &cancel)
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.files_processed, 0);
    assert!(fx.store().load_manifest().unwrap().is_empty());
}

#[test]
fn test_unparseable_edit_keeps_old_chunks_until_fixed() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));

    let store = fx.store();
    let old_entry = store.manifest_entry("Square.cs").unwrap().unwrap();
    let old_ids = ids_of(&store, "Square.cs");
    drop(store);

    write(fx.dir.path(), "Square.cs", "public class { void ( }");
    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_modified, 1);
    assert_eq!(summary.files_processed, 0);
    assert_eq!(summary.errors(), 1);
    assert_eq!(summary.failures[0].path, "Square.cs");
    assert_eq!(summary.failures[0].kind, FailureKind::Parse);

    let store = fx.store();
    assert_eq!(store.manifest_entry("Square.cs").unwrap().unwrap(), old_entry);
    assert_eq!(ids_of(&store, "Square.cs"), old_ids);
    drop(store);

    // Still pending, and picked up once the syntax is repaired
    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_modified, 1);
    assert_eq!(summary.failures[0].kind, FailureKind::Parse);

    write(fx.dir.path(), "Square.cs", &SQUARE.replace("8.0", "16.0"));
    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_modified, 1);
    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.errors(), 0);
    assert_ne!(
        fx.store().manifest_entry("Square.cs").unwrap().unwrap().fingerprint,
        old_entry.fingerprint
    );
}

#[test]
fn test_cancel_mid_run_leaves_unfinished_files_untouched() {
    let fx = Fixture::configured(|config| config.indexing.max_workers = 1);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));
    let old = fx.store().load_manifest().unwrap();

    let mut new_fingerprints = BTreeMap::new();
    for (name, content) in [
        ("IShape.cs", ISHAPE.replace("Perimeter", "Circumference")),
        ("Circle.cs", CIRCLE.replace("3.14", "3.1416")),
        ("Square.cs", SQUARE.replace("4.0", "5.0")),
    ] {
        write(fx.dir.path(), name, &content);
        new_fingerprints.insert(name, mag_core::model::fingerprint(content.as_bytes()));
    }

    let cancel = CancellationToken::new();
    *provider.cancel_after_call.lock().unwrap() = Some(cancel.clone());
    let summary = fx
        .indexer(&provider)
        .run(IndexMode::Incremental, &cancel)
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.files_modified, 3);
    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.errors(), 0);

    let store = fx.store();
    let manifest = store.load_manifest().unwrap();
    assert_eq!(manifest.len(), 3);
    let mut updated = 0;
    for (name, new_fp) in &new_fingerprints {
        let entry = store.manifest_entry(name).unwrap().unwrap();
        let old_entry = old.get(*name).unwrap();
        if entry.fingerprint == *new_fp {
            updated += 1;
        } else {
            assert_eq!(&entry, old_entry);
            assert_eq!(
                ids_of(&store, name),
                old_entry
                    .chunk_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
            );
        }
    }
    assert_eq!(updated, 1);
    drop(store);

    // The rest is finished by the next run
    let summary = run(&mut fx.indexer(&provider));
    assert_eq!(summary.files_modified, 2);
    assert_eq!(summary.files_processed, 2);
    assert!(!summary.cancelled);
}

fn tools(fx: &Fixture, provider: &Arc<HashEmbedder>) -> CodebaseTools {
    tools_with(fx, provider, &Arc::new(CannedLlm::default()))
}

fn tools_with(fx: &Fixture, provider: &Arc<HashEmbedder>, llm: &Arc<CannedLlm>) -> CodebaseTools {
    let llm: Arc<dyn CompletionProvider> = llm.clone();
    CodebaseTools::new(fx.workspace.clone(), fx.store(), fx.embedder(provider), llm)
}

#[test]
fn test_explain_known_symbol_cites_definition() {
    let fx = Fixture::new(0.7);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));

    let explanation = tools(&fx, &provider)
        .explain_symbol("Circle.Area", false)
        .unwrap();
    assert!(explanation.found);
    assert_eq!(explanation.explanation, "It computes the area.");
    assert!(explanation.llm_error.is_none());
    assert_eq!(explanation.citations.len(), 1);
    assert_eq!(explanation.citations[0].file, "Circle.cs");
    assert_eq!(explanation.citations[0].symbol, "Circle.Area");
    assert_eq!(explanation.citations[0].lines.start, 3);
}

#[test]
fn test_explain_unknown_symbol_is_not_found() {
    let fx = Fixture::new(0.7);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));

    let explanation = tools(&fx, &provider)
        .explain_symbol("DoesNotExist", true)
        .unwrap();
    assert!(!explanation.found);
    assert!(explanation.citations.is_empty());
    assert_eq!(
        explanation.explanation,
        "Symbol 'DoesNotExist' not found in the indexed codebase."
    );
}

#[test]
fn test_list_files_and_summary() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));
    let tools = tools(&fx, &provider);

    let files = tools.list_files(Some("C*.cs"), None).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "Circle.cs");
    assert_eq!(files[0].chunk_count, 3);
    assert_eq!(files[0].types, vec!["class", "method"]);
    assert_eq!(files[0].symbols, vec!["Area", "Circle", "Perimeter"]);
    assert_eq!(files[0].line_count, 12);

    let interfaces = tools.list_files(None, Some("interface")).unwrap();
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].path, "IShape.cs");

    let summary = tools.index_summary().unwrap();
    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.total_chunks, 9);
    assert_eq!(summary.languages, vec!["csharp"]);
    assert!(summary.last_updated.is_some());

    let hits = tools.search_code("area", Some(2), Some("method")).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.kind == "method"));
}

#[test]
fn test_explain_usage_context_is_distinct_and_bounded() {
    let fx = Fixture::new(0.0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));
    let llm = Arc::new(CannedLlm::default());

    let explanation = tools_with(&fx, &provider, &llm)
        .explain_symbol("IShape.Area", true)
        .unwrap();
    assert!(explanation.found);
    assert_eq!(explanation.citations[0].symbol, "IShape.Area");
    let usage_examples = fx.workspace.config().explain.usage_examples;
    assert!(explanation.citations.len() > 1);
    assert!(explanation.citations.len() <= 1 + usage_examples);

    let mut seen = std::collections::HashSet::new();
    for citation in &explanation.citations {
        assert!(seen.insert((citation.file.clone(), citation.symbol.clone(), citation.lines.start)));
    }
    let prompt = llm.last_prompt();
    assert!(prompt.contains("# Related Codebase Context"));
    for citation in &explanation.citations[1..] {
        assert!(prompt.contains(&format!("({})", citation.symbol)));
    }
}

#[test]
fn test_explain_usage_context_respects_token_budget() {
    let fx = Fixture::configured(|config| config.explain.context_tokens = 0);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));
    let llm = Arc::new(CannedLlm::default());

    let explanation = tools_with(&fx, &provider, &llm)
        .explain_symbol("IShape.Area", true)
        .unwrap();
    assert!(explanation.found);
    assert_eq!(explanation.citations.len(), 1);
    assert!(!llm.last_prompt().contains("# Related Codebase Context"));
}

#[test]
fn test_explain_falls_back_to_similarity() {
    let fx = Fixture::new(0.1);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));

    let explanation = tools(&fx, &provider)
        .explain_symbol("Perimeter computation", false)
        .unwrap();
    assert!(explanation.found);
    assert!(explanation.llm_error.is_none());
    assert_eq!(explanation.citations.len(), 1);
    assert!(explanation.citations[0].symbol.ends_with(".Perimeter"));
}

#[test]
fn test_explain_keeps_citations_when_completion_fails() {
    let fx = Fixture::new(0.7);
    let provider = HashEmbedder::new("test/hash");
    run(&mut fx.indexer(&provider));
    let llm = Arc::new(CannedLlm::default());
    let tools = tools_with(&fx, &provider, &llm);

    llm.fail.store(true, Ordering::SeqCst);
    let explanation = tools.explain_symbol("Circle", false).unwrap();
    assert!(explanation.found);
    assert!(explanation.llm_error.as_deref().unwrap().contains("model not loaded"));
    assert_eq!(explanation.citations.len(), 1);
    assert_eq!(explanation.citations[0].file, "Circle.cs");
    assert_eq!(explanation.citations[0].symbol, "Circle");
    assert!(explanation.explanation.contains("Circle.cs"));

    llm.fail.store(false, Ordering::SeqCst);
    let explanation = tools.explain_symbol("Circle", false).unwrap();
    assert!(explanation.llm_error.is_none());
    assert_eq!(explanation.explanation, "It computes the area.");
}

#[test]
fn test_scan_stats_cover_the_source_tree() {
    let fx = Fixture::new(0.0);
    let scanner = SourceScanner::new(fx.dir.path(), &fx.workspace.config().codebase).unwrap();
    let stats = scanner.stats();
    assert_eq!(stats.total_files, 3);
    assert_eq!(
        stats.total_bytes,
        (ISHAPE.len() + CIRCLE.len() + SQUARE.len()) as u64
    );
    assert_eq!(stats.extensions.into_iter().collect::<Vec<_>>(), vec![".cs"]);
}
