//! Retrieval-augmented symbol explanations

use crate::chunk::{estimate_tokens, Language};
use crate::config::Config;
use crate::embed::{CompletionProvider, CompletionRequest, Embedder};
use crate::error::MagError;
use crate::concurrency::CancellationToken;
use crate::model::{ChunkId, ChunkKind, Citation, CodeChunk, LineSpan};
use crate::search::{KindFilter, SearchEngine};
use crate::store::{MetadataFilter, VectorIndex};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are an expert C# developer. Analyze the provided code and \
explain it clearly and concisely. Focus on:\n\
- What the code does\n\
- Key design patterns or techniques used\n\
- Potential issues or improvements\n\
- How it fits into the broader codebase";

/// Answer to `explain_symbol`
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub symbol: String,
    pub found: bool,
    pub explanation: String,
    /// Definition first, then any usage context that made it into the prompt
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_error: Option<String>,
}

/// Resolves a symbol, assembles context and asks the completion backend
pub struct ExplainOrchestrator<'a> {
    store: &'a VectorIndex,
    embedder: &'a Embedder,
    llm: &'a dyn CompletionProvider,
    config: &'a Config,
}

impl<'a> ExplainOrchestrator<'a> {
    pub fn new(
        store: &'a VectorIndex,
        embedder: &'a Embedder,
        llm: &'a dyn CompletionProvider,
        config: &'a Config,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    /// Explain `symbol`. An unknown symbol gives `found = false` rather than
    /// an error; a failed completion keeps the citations and sets `llm_error`.
    pub fn explain(&self, symbol: &str, include_usage: bool) -> crate::Result<Explanation> {
        let definition = match self.resolve(symbol) {
            Ok(chunk) => chunk,
            Err(MagError::SymbolNotFound(_)) => {
                return Ok(Explanation {
                    symbol: symbol.to_string(),
                    found: false,
                    explanation: format!("Symbol '{}' not found in the indexed codebase.", symbol),
                    citations: Vec::new(),
                    llm_error: None,
                })
            }
            Err(e) => return Err(e),
        };

        let parts = self.declaration_parts(&definition)?;
        let code = join_fragments(&parts);
        let mut citations = vec![declaration_citation(&parts)];

        let mut budget = self
            .config
            .explain
            .context_tokens
            .saturating_sub(estimate_tokens(&code));
        let mut context = String::new();

        if include_usage && self.config.explain.usage_examples > 0 {
            let exclude: HashSet<&ChunkId> = parts.iter().map(|c| &c.id).collect();
            for chunk in self.usage_chunks(&definition, &exclude) {
                let block = format!(
                    "// {}:{} ({})\n{}\n",
                    chunk.file_path,
                    chunk.lines,
                    chunk.symbol_path(),
                    chunk.text
                );
                let cost = estimate_tokens(&block);
                if cost > budget {
                    continue;
                }
                budget -= cost;
                context.push_str(&block);
                citations.push(chunk.citation());
            }
        }

        let request = CompletionRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt: build_prompt(symbol, &definition.file_path, &code, &context),
            temperature: self.config.ollama.temperature,
            max_tokens: self.config.ollama.max_tokens,
        };

        let (explanation, llm_error) = match self.llm.complete(&request) {
            Ok(text) => (text, None),
            Err(e) => {
                warn!(symbol, error = %e, "completion failed, returning citations only");
                (
                    format!(
                        "Found '{}' in {} (lines {}), but no explanation could be generated.",
                        definition.symbol_path(),
                        definition.file_path,
                        citations[0].lines
                    ),
                    Some(e.to_string()),
                )
            }
        };

        Ok(Explanation {
            symbol: symbol.to_string(),
            found: true,
            explanation,
            citations,
            llm_error,
        })
    }

    /// Find the chunk defining `symbol`.
    ///
    /// Exact match first: a chunk whose qualified path equals `symbol` or
    /// ends with `.symbol`. Otherwise the best similarity hit above the
    /// search threshold. Otherwise [`MagError::SymbolNotFound`].
    pub fn resolve(&self, symbol: &str) -> crate::Result<CodeChunk> {
        let wanted = symbol.trim().replace("::", ".");
        let leaf = wanted
            .rsplit('.')
            .find(|s| !s.is_empty())
            .unwrap_or(wanted.as_str());
        if leaf.is_empty() {
            return Err(MagError::SymbolNotFound(symbol.to_string()));
        }

        let suffix = format!(".{}", wanted);
        let exact = self
            .store
            .find_by_symbol(leaf)?
            .into_iter()
            .filter(|c| c.kind != ChunkKind::Fragment)
            .find(|c| {
                let path = c.symbol_path();
                path == wanted || path.ends_with(&suffix)
            });
        if let Some(chunk) = exact {
            debug!(symbol, id = %chunk.id, "resolved by name");
            return Ok(chunk);
        }

        let engine = SearchEngine::new(self.store, self.embedder, &self.config.search);
        let hit = engine
            .search(&format!("{} definition", wanted), 1, KindFilter::All)?
            .into_iter()
            .next();
        match hit {
            Some(result) => {
                debug!(symbol, id = %result.chunk.id, score = result.score, "resolved by similarity");
                self.head_of(result.chunk)
            }
            None => Err(MagError::SymbolNotFound(symbol.to_string())),
        }
    }

    /// First fragment of a split declaration
    fn head_of(&self, chunk: CodeChunk) -> crate::Result<CodeChunk> {
        match chunk.fragment {
            Some(info) if info.index > 0 => {
                let head_ordinal = chunk.ordinal.saturating_sub(info.index);
                Ok(self
                    .store
                    .chunks_for_file(&chunk.file_path)?
                    .into_iter()
                    .find(|c| c.ordinal == head_ordinal)
                    .unwrap_or(chunk))
            }
            _ => Ok(chunk),
        }
    }

    /// All fragments of the declaration starting at `head`, in order
    fn declaration_parts(&self, head: &CodeChunk) -> crate::Result<Vec<CodeChunk>> {
        let total = match head.fragment {
            Some(info) if info.total > 1 => info.total,
            _ => return Ok(vec![head.clone()]),
        };
        let range = head.ordinal..head.ordinal + total;
        let parts: Vec<CodeChunk> = self
            .store
            .chunks_for_file(&head.file_path)?
            .into_iter()
            .filter(|c| range.contains(&c.ordinal))
            .collect();
        if parts.is_empty() {
            Ok(vec![head.clone()])
        } else {
            Ok(parts)
        }
    }

    /// Chunks most similar to the definition, seeded with its stored vector
    fn usage_chunks(&self, definition: &CodeChunk, exclude: &HashSet<&ChunkId>) -> Vec<CodeChunk> {
        let wanted = self.config.explain.usage_examples;

        let vector = match self.store.vector(&definition.id) {
            Ok(Some(v)) => v,
            Ok(None) => match self
                .embedder
                .embed_one(&definition.embedding_text(), &CancellationToken::new())
            {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "could not embed definition, skipping usage context");
                    return Vec::new();
                }
            },
            Err(e) => {
                warn!(error = %e, "could not load definition vector, skipping usage context");
                return Vec::new();
            }
        };

        let results = self.store.query(
            &vector,
            wanted + exclude.len() + 1,
            &MetadataFilter::all(),
            self.config.search.similarity_threshold,
        );
        match results {
            Ok(results) => results
                .into_iter()
                .map(|r| r.chunk)
                .filter(|c| !exclude.contains(&c.id))
                .take(wanted)
                .collect(),
            Err(e) => {
                warn!(error = %e, "usage query failed, skipping usage context");
                Vec::new()
            }
        }
    }
}

/// Declaration text with continuation headers removed
fn join_fragments(parts: &[CodeChunk]) -> String {
    let mut code = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            code.push_str(&part.text);
            continue;
        }
        let body = part
            .text
            .split_once(" [fragment ")
            .and_then(|(_, rest)| rest.split_once('\n'))
            .map(|(_, body)| body)
            .unwrap_or(&part.text);
        code.push_str(body);
    }
    code
}

fn declaration_citation(parts: &[CodeChunk]) -> Citation {
    let head = &parts[0];
    let end = parts.iter().map(|c| c.lines.end).max().unwrap_or(head.lines.end);
    Citation {
        file: head.file_path.clone(),
        symbol: head.symbol_path(),
        lines: LineSpan {
            start: head.lines.start,
            end,
        },
    }
}

fn build_prompt(symbol: &str, file_path: &str, code: &str, context: &str) -> String {
    let fence = Language::from_path(Path::new(file_path))
        .map(|l| l.name())
        .unwrap_or("");

    let mut parts = Vec::new();
    if !context.is_empty() {
        parts.push(format!("# Related Codebase Context\n{}\n", context));
    }
    parts.push(format!("# Code to Explain\n```{}\n{}\n```\n", fence, code));
    parts.push(format!(
        "# Specific Question\nExplain the symbol '{}' in detail.\n",
        symbol
    ));
    parts.join("\n")
}
