//! Chunk, file and result types shared across the indexing and retrieval paths

use crate::MagError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Byte range in a source file
pub type Span = std::ops::Range<usize>;

/// Kind of declaration a chunk was cut from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Namespace,
    Class,
    Interface,
    Struct,
    Method,
    Property,
    Constructor,
    Field,
    /// Continuation of a declaration split over the token budget, or a
    /// file with no chunkable declaration
    Fragment,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 9] = [
        Self::Namespace,
        Self::Class,
        Self::Interface,
        Self::Struct,
        Self::Method,
        Self::Property,
        Self::Constructor,
        Self::Field,
        Self::Fragment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Struct => "struct",
            Self::Method => "method",
            Self::Property => "property",
            Self::Constructor => "constructor",
            Self::Field => "field",
            Self::Fragment => "fragment",
        }
    }

    /// Container kinds get a member summary instead of their full body
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::Namespace | Self::Class | Self::Interface | Self::Struct
        )
    }
}

impl Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = MagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MagError::InvalidFilter(s.to_string()))
    }
}

/// Stable chunk id: hash of (file path, symbol path, ordinal)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new(file_path: &str, symbol_path: &str, ordinal: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(symbol_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(ordinal.to_string().as_bytes());
        let hash = hasher.finalize();
        Self(hex::encode(&hash[..12])) // 24-char hex prefix (12 bytes)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_raw(raw: String) -> Self {
        Self(raw)
    }
}

impl Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 1-indexed inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

impl LineSpan {
    pub fn line_count(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }
}

impl Display for LineSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Position of a fragment within a split declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    pub index: usize,
    pub total: usize,
}

/// Semantic unit of source code stored in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: ChunkId,
    pub kind: ChunkKind,
    /// Declared name (e.g. `CreateEntity`)
    pub symbol: String,
    /// Fully-qualified enclosing path (e.g. `Game.Core.EntityManager`)
    pub parent_path: Option<String>,
    pub file_path: String,
    pub lines: LineSpan,
    pub span: Span,
    /// Position in the file's pre-order chunk sequence
    pub ordinal: usize,
    pub text: String,
    pub signature: Option<String>,
    pub has_doc: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<FragmentInfo>,
    /// Fingerprint of the file version the chunk was cut from
    pub fingerprint: String,
}

impl CodeChunk {
    /// `parent_path.symbol`, or just the symbol at top level
    pub fn symbol_path(&self) -> String {
        qualify(self.parent_path.as_deref(), &self.symbol)
    }

    /// Text handed to the embedding backend: chunk text behind a context header
    pub fn embedding_text(&self) -> String {
        let mut out = format!("// File: {}\n", self.file_path);
        if let Some(parent) = &self.parent_path {
            out.push_str(&format!("// Hierarchy: {} > {}\n", parent, self.symbol));
        }
        out.push_str(&self.text);
        out
    }

    pub fn citation(&self) -> Citation {
        Citation {
            file: self.file_path.clone(),
            symbol: self.symbol_path(),
            lines: self.lines,
        }
    }
}

pub(crate) fn qualify(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(p) if !p.is_empty() => format!("{}.{}", p, name),
        _ => name.to_string(),
    }
}

/// A scanned file: path relative to the root plus its content fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub fingerprint: String,
    pub size: u64,
    pub mtime: i64,
}

/// SHA-256 hex of raw file bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Ranked similarity hit
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub score: f32,
    pub chunk: CodeChunk,
}

impl SearchResult {
    pub fn id(&self) -> &ChunkId {
        &self.chunk.id
    }
}

/// Source location backing part of an explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub file: String,
    pub symbol: String,
    pub lines: LineSpan,
}
