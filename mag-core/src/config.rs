//! Configuration for mag

use crate::MagError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Mag Configuration

[codebase]
# Files to index, matched against paths relative to the codebase root
include = ["**/*.cs"]
# Patterns without wildcards match a path component anywhere in the tree
exclude = ["**/obj/**", "**/bin/**", "**/packages/**", "**/.vs/**", ".git", ".mag"]
# Skip files listed in .gitignore
respect_gitignore = true

[ollama]
host = "http://localhost:11434"
embedding_model = "nomic-embed-text"
llm_model = "codestral"
# Request timeout in seconds
timeout_secs = 60
temperature = 0.2
# Maximum tokens generated per explanation
max_tokens = 2000

[indexing]
# Token budget per chunk (cl100k_base); larger declarations are split
chunk_size_tokens = 512
# Files chunked and embedded in parallel
max_workers = 4
# Texts per embedding request
embed_batch_size = 16
# Embedding requests in flight at once
embed_concurrency = 2
# Attempts per embedding request before the file is marked failed
max_attempts = 4
retry_initial_ms = 250
retry_max_ms = 5000
# Treat syntax trees with error nodes as parse failures
reject_syntax_errors = true

[search]
default_results = 5
# Minimum cosine similarity for a result to be returned
similarity_threshold = 0.7

[explain]
# Related chunks added as usage context
usage_examples = 3
# Token budget for the assembled context
context_tokens = 3000
"#;

/// Mag configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub codebase: CodebaseConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub explain: ExplainConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseConfig {
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_chunk_size_tokens")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_true")]
    pub reject_syntax_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_results")]
    pub default_results: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainConfig {
    #[serde(default = "default_usage_examples")]
    pub usage_examples: usize,
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,
}

// Default value functions
fn default_include() -> Vec<String> {
    vec!["**/*.cs".to_string()]
}
fn default_exclude() -> Vec<String> {
    vec![
        "**/obj/**".to_string(),
        "**/bin/**".to_string(),
        "**/packages/**".to_string(),
        "**/.vs/**".to_string(),
        ".git".to_string(),
        ".mag".to_string(),
    ]
}
fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_llm_model() -> String {
    "codestral".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_chunk_size_tokens() -> usize {
    512
}
fn default_max_workers() -> usize {
    4
}
fn default_embed_batch_size() -> usize {
    16
}
fn default_embed_concurrency() -> usize {
    2
}
fn default_max_attempts() -> u32 {
    4
}
fn default_retry_initial_ms() -> u64 {
    250
}
fn default_retry_max_ms() -> u64 {
    5000
}
fn default_results() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.7
}
fn default_usage_examples() -> usize {
    3
}
fn default_context_tokens() -> usize {
    3000
}

impl Default for CodebaseConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: default_exclude(),
            respect_gitignore: true,
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            embedding_model: default_embedding_model(),
            llm_model: default_llm_model(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: default_chunk_size_tokens(),
            max_workers: default_max_workers(),
            embed_batch_size: default_embed_batch_size(),
            embed_concurrency: default_embed_concurrency(),
            max_attempts: default_max_attempts(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            reject_syntax_errors: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_results: default_results(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            usage_examples: default_usage_examples(),
            context_tokens: default_context_tokens(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate config from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| MagError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> crate::Result<()> {
        let check = |ok: bool, msg: &str| {
            if ok {
                Ok(())
            } else {
                Err(MagError::ConfigInvalid(msg.to_string()))
            }
        };

        check(
            (1..=2048).contains(&self.indexing.chunk_size_tokens),
            "indexing.chunk_size_tokens must be between 1 and 2048",
        )?;
        check(
            (1..=32).contains(&self.indexing.max_workers),
            "indexing.max_workers must be between 1 and 32",
        )?;
        check(
            self.indexing.embed_batch_size >= 1,
            "indexing.embed_batch_size must be at least 1",
        )?;
        check(
            self.indexing.embed_concurrency >= 1,
            "indexing.embed_concurrency must be at least 1",
        )?;
        check(
            self.indexing.max_attempts >= 1,
            "indexing.max_attempts must be at least 1",
        )?;
        check(
            (1..=50).contains(&self.search.default_results),
            "search.default_results must be between 1 and 50",
        )?;
        check(
            (0.0..=1.0).contains(&self.search.similarity_threshold),
            "search.similarity_threshold must be between 0.0 and 1.0",
        )?;
        check(
            !self.codebase.include.is_empty(),
            "codebase.include must list at least one pattern",
        )?;
        Ok(())
    }

    /// Backoff before the first retry
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.indexing.retry_initial_ms)
    }

    /// Upper bound for any single backoff
    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.indexing.retry_max_ms)
    }

    /// HTTP timeout for backend calls
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ollama.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.codebase.include, vec!["**/*.cs"]);
        assert_eq!(config.indexing.chunk_size_tokens, 512);
        assert_eq!(config.indexing.max_workers, 4);
        assert_eq!(config.search.default_results, 5);
        assert!((config.search.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.ollama.embedding_model, "nomic-embed-text");
    }

    #[test]
    fn test_default_toml_matches_default_impl() {
        let parsed = Config::from_toml(DEFAULT_CONFIG).unwrap();
        let built = Config::default();
        assert_eq!(parsed.codebase.exclude, built.codebase.exclude);
        assert_eq!(parsed.indexing.max_attempts, built.indexing.max_attempts);
        assert_eq!(parsed.explain.context_tokens, built.explain.context_tokens);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = Config::from_toml("[indexing]\nmax_workers = 8\n").unwrap();
        assert_eq!(config.indexing.max_workers, 8);
        assert_eq!(config.indexing.chunk_size_tokens, 512);
        assert_eq!(config.ollama.host, "http://localhost:11434");
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let err = Config::from_toml("[indexing]\nchunk_size_tokens = 4096\n").unwrap_err();
        assert!(matches!(err, MagError::ConfigInvalid(_)));

        let err = Config::from_toml("[search]\nsimilarity_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, MagError::ConfigInvalid(_)));

        let err = Config::from_toml("[indexing]\nmax_workers = 0\n").unwrap_err();
        assert!(matches!(err, MagError::ConfigInvalid(_)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = Config::from_toml("[indexing\n").unwrap_err();
        assert!(matches!(err, MagError::ConfigParse(_)));
    }
}
