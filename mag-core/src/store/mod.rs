//! Vector index backed by SQLite: chunk records with their embeddings,
//! the file manifest, and index-wide metadata.

mod manifest;

pub use manifest::{Manifest, ManifestEntry};

use crate::error::MagError;
use crate::model::{ChunkId, ChunkKind, CodeChunk, FragmentInfo, LineSpan, SearchResult};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA_VERSION: i32 = 1;

/// Shared column list for chunk queries, matches `chunk_from_row`
const CHUNK_SELECT: &str = "id, file_path, kind, symbol, parent_path, ordinal, start_line, \
     end_line, start_byte, end_byte, fragment_index, fragment_total, signature, has_doc, \
     fingerprint, text";

const META_MODEL: &str = "embedding_model";
const META_DIMENSION: &str = "dimension";
const META_REBUILD: &str = "rebuild_required";

/// A chunk and its embedding, as written to the index
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk: CodeChunk,
    pub vector: Vec<f32>,
}

/// Predicate applied before scoring
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub kinds: Option<Vec<ChunkKind>>,
    pub file_path: Option<String>,
}

impl MetadataFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(kind: ChunkKind) -> Self {
        Self {
            kinds: Some(vec![kind]),
            file_path: None,
        }
    }

    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(kinds) = &self.kinds {
            if kinds.is_empty() {
                clauses.push("0".to_string());
            } else {
                let marks = vec!["?"; kinds.len()].join(", ");
                clauses.push(format!("kind IN ({})", marks));
                values.extend(kinds.iter().map(|k| k.as_str().to_string()));
            }
        }
        if let Some(path) = &self.file_path {
            clauses.push("file_path = ?".to_string());
            values.push(path.clone());
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// Embedding backend the stored vectors came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingInfo {
    pub model: Option<String>,
    pub dimension: Option<usize>,
    pub rebuild_required: bool,
}

/// Per-file view used by `list_files`
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub chunk_count: usize,
    pub symbols: Vec<String>,
    pub kinds: Vec<ChunkKind>,
}

/// Chunk store with exact cosine search
pub struct VectorIndex {
    conn: Connection,
    path: Option<PathBuf>,
}

impl VectorIndex {
    /// Open or create the index database at `path`
    pub fn open(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory index
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(conn: &Connection) -> crate::Result<()> {
        // WAL lets readers keep a consistent snapshot while a run writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            ",
        )?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version != 0 && version != SCHEMA_VERSION {
            return Err(MagError::SchemaVersionMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        if version == 0 {
            conn.execute_batch(
                "
                -- One row per chunk, vector stored as little-endian f32
                CREATE TABLE IF NOT EXISTS chunks (
                    id TEXT PRIMARY KEY,
                    file_path TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    symbol TEXT NOT NULL,
                    symbol_lower TEXT NOT NULL,
                    parent_path TEXT,
                    ordinal INTEGER NOT NULL,
                    start_line INTEGER NOT NULL,
                    end_line INTEGER NOT NULL,
                    start_byte INTEGER NOT NULL,
                    end_byte INTEGER NOT NULL,
                    fragment_index INTEGER,
                    fragment_total INTEGER,
                    signature TEXT,
                    has_doc INTEGER NOT NULL,
                    fingerprint TEXT NOT NULL,
                    text TEXT NOT NULL,
                    dim INTEGER NOT NULL,
                    vector BLOB NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
                CREATE INDEX IF NOT EXISTS idx_chunks_kind ON chunks(kind);
                CREATE INDEX IF NOT EXISTS idx_chunks_symbol ON chunks(symbol_lower);

                -- Change-detection manifest, written after a file's chunks
                CREATE TABLE IF NOT EXISTS manifest (
                    path TEXT PRIMARY KEY,
                    fingerprint TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    mtime INTEGER NOT NULL,
                    chunk_ids TEXT NOT NULL,
                    indexed_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS index_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                PRAGMA user_version = 1;
                ",
            )?;
        }

        Ok(())
    }

    /// Insert or replace one record, atomic per id
    pub fn upsert(&mut self, record: &ChunkRecord) -> crate::Result<()> {
        let tx = self.conn.transaction()?;
        write_records(&tx, std::slice::from_ref(record))?;
        tx.commit()?;
        Ok(())
    }

    /// Remove every chunk owned by `path`
    pub fn delete_by_file(&self, path: &str) -> crate::Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM chunks WHERE file_path = ?", params![path])?;
        Ok(removed)
    }

    /// Swap a file's chunk set: delete then upsert in one transaction, so
    /// readers see either the old set or the new one
    pub fn replace_file(&mut self, path: &str, records: &[ChunkRecord]) -> crate::Result<usize> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM chunks WHERE file_path = ?", params![path])?;
        write_records(&tx, records)?;
        tx.commit()?;
        debug!(path, removed, written = records.len(), "replaced file chunks");
        Ok(removed)
    }

    /// Cosine similarity search.
    ///
    /// The metadata filter applies first, then `min_score`, then the
    /// `top_k` cut. Equal scores order by ascending chunk id.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
        min_score: f32,
    ) -> crate::Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dimension) = self.embedding_info()?.dimension {
            if dimension != vector.len() {
                return Err(MagError::DimensionMismatch {
                    expected: dimension,
                    found: vector.len(),
                });
            }
        }

        let (where_sql, values) = filter.where_clause();
        let sql = format!("SELECT {}, vector FROM chunks{}", CHUNK_SELECT, where_sql);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            let chunk = chunk_from_row(row)?;
            let blob: Vec<u8> = row.get(16)?;
            Ok((chunk, blob))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (chunk, blob) = row?;
            let score = cosine_similarity(vector, &bytes_to_vector(&blob));
            if score >= min_score {
                results.push(SearchResult { score, chunk });
            }
        }

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        results.truncate(top_k);
        Ok(results)
    }

    pub fn get(&self, id: &ChunkId) -> crate::Result<Option<CodeChunk>> {
        let sql = format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_SELECT);
        let chunk = self
            .conn
            .query_row(&sql, params![id.as_str()], chunk_from_row)
            .optional()?;
        Ok(chunk)
    }

    /// Stored vector for a chunk
    pub fn vector(&self, id: &ChunkId) -> crate::Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT vector FROM chunks WHERE id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| bytes_to_vector(&b)))
    }

    /// Chunks whose symbol equals `name` (case-insensitive), in file order
    pub fn find_by_symbol(&self, name: &str) -> crate::Result<Vec<CodeChunk>> {
        let sql = format!(
            "SELECT {} FROM chunks WHERE symbol_lower = ? ORDER BY file_path, ordinal",
            CHUNK_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let chunks = stmt
            .query_map(params![name.to_lowercase()], chunk_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// All chunks of one file in ordinal order
    pub fn chunks_for_file(&self, path: &str) -> crate::Result<Vec<CodeChunk>> {
        let sql = format!(
            "SELECT {} FROM chunks WHERE file_path = ? ORDER BY ordinal",
            CHUNK_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let chunks = stmt
            .query_map(params![path], chunk_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// Distinct file paths that own at least one chunk
    pub fn indexed_paths(&self) -> crate::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT file_path FROM chunks ORDER BY file_path")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    pub fn count(&self) -> crate::Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn count_for_file(&self, path: &str) -> crate::Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE file_path = ?",
            params![path],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Chunk count per kind
    pub fn kind_histogram(&self) -> crate::Result<BTreeMap<String, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM chunks GROUP BY kind ORDER BY kind")?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            Ok((kind, n as usize))
        })?;
        let mut histogram = BTreeMap::new();
        for row in rows {
            let (kind, n) = row?;
            histogram.insert(kind, n);
        }
        Ok(histogram)
    }

    /// Per-file symbol and kind lists, sorted by path
    pub fn file_summaries(&self) -> crate::Result<Vec<FileSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, kind, symbol FROM chunks ORDER BY file_path, ordinal",
        )?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let symbol: String = row.get(2)?;
            Ok((path, kind, symbol))
        })?;

        let mut summaries: Vec<FileSummary> = Vec::new();
        for row in rows {
            let (path, kind, symbol) = row?;
            let kind: ChunkKind = kind.parse()?;
            if summaries.last().map(|s| s.path != path).unwrap_or(true) {
                summaries.push(FileSummary {
                    path: path.clone(),
                    chunk_count: 0,
                    symbols: Vec::new(),
                    kinds: Vec::new(),
                });
            }
            if let Some(summary) = summaries.last_mut() {
                summary.chunk_count += 1;
                if kind != ChunkKind::Fragment && !summary.symbols.contains(&symbol) {
                    summary.symbols.push(symbol);
                }
                if !summary.kinds.contains(&kind) {
                    summary.kinds.push(kind);
                }
            }
        }
        Ok(summaries)
    }

    /// Drop all chunks, manifest entries and backend metadata
    pub fn clear(&mut self) -> crate::Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "
            DELETE FROM chunks;
            DELETE FROM manifest;
            DELETE FROM index_meta;
            ",
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn embedding_info(&self) -> crate::Result<EmbeddingInfo> {
        Ok(EmbeddingInfo {
            model: self.meta(META_MODEL)?,
            dimension: self
                .meta(META_DIMENSION)?
                .and_then(|d| d.parse::<usize>().ok()),
            rebuild_required: self.meta(META_REBUILD)?.as_deref() == Some("1"),
        })
    }

    /// Record which backend produced the stored vectors
    pub fn set_embedding_model(&self, model: &str) -> crate::Result<()> {
        self.set_meta(META_MODEL, model)
    }

    /// Force the next run to rebuild everything
    pub fn mark_rebuild_required(&self) -> crate::Result<()> {
        self.set_meta(META_REBUILD, "1")
    }

    fn meta(&self, key: &str) -> crate::Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> crate::Result<()> {
        self.conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Write records inside an open transaction, enforcing one dimension per index
fn write_records(conn: &Connection, records: &[ChunkRecord]) -> crate::Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let stored: Option<usize> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?",
            params![META_DIMENSION],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .and_then(|d| d.parse().ok());

    let dimension = match stored {
        Some(d) => d,
        None => {
            let d = records[0].vector.len();
            conn.execute(
                "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![META_DIMENSION, d.to_string()],
            )?;
            d
        }
    };

    let mut stmt = conn.prepare_cached(
        "INSERT INTO chunks (id, file_path, kind, symbol, symbol_lower, parent_path, ordinal,
             start_line, end_line, start_byte, end_byte, fragment_index, fragment_total,
             signature, has_doc, fingerprint, text, dim, vector)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
         ON CONFLICT(id) DO UPDATE SET
             file_path = excluded.file_path, kind = excluded.kind, symbol = excluded.symbol,
             symbol_lower = excluded.symbol_lower, parent_path = excluded.parent_path,
             ordinal = excluded.ordinal, start_line = excluded.start_line,
             end_line = excluded.end_line, start_byte = excluded.start_byte,
             end_byte = excluded.end_byte, fragment_index = excluded.fragment_index,
             fragment_total = excluded.fragment_total, signature = excluded.signature,
             has_doc = excluded.has_doc, fingerprint = excluded.fingerprint,
             text = excluded.text, dim = excluded.dim, vector = excluded.vector",
    )?;

    for record in records {
        if record.vector.len() != dimension {
            return Err(MagError::DimensionMismatch {
                expected: dimension,
                found: record.vector.len(),
            });
        }
        let c = &record.chunk;
        stmt.execute(params![
            c.id.as_str(),
            c.file_path,
            c.kind.as_str(),
            c.symbol,
            c.symbol.to_lowercase(),
            c.parent_path,
            c.ordinal as i64,
            c.lines.start as i64,
            c.lines.end as i64,
            c.span.start as i64,
            c.span.end as i64,
            c.fragment.map(|f| f.index as i64),
            c.fragment.map(|f| f.total as i64),
            c.signature,
            c.has_doc,
            c.fingerprint,
            c.text,
            dimension as i64,
            vector_to_bytes(&record.vector),
        ])?;
    }
    Ok(())
}

fn chunk_from_row(row: &rusqlite::Row) -> rusqlite::Result<CodeChunk> {
    let kind: String = row.get(2)?;
    let kind = kind.parse::<ChunkKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let fragment_index: Option<i64> = row.get(10)?;
    let fragment_total: Option<i64> = row.get(11)?;

    Ok(CodeChunk {
        id: ChunkId::from_raw(row.get(0)?),
        file_path: row.get(1)?,
        kind,
        symbol: row.get(3)?,
        parent_path: row.get(4)?,
        ordinal: row.get::<_, i64>(5)? as usize,
        lines: LineSpan {
            start: row.get::<_, i64>(6)? as usize,
            end: row.get::<_, i64>(7)? as usize,
        },
        span: row.get::<_, i64>(8)? as usize..row.get::<_, i64>(9)? as usize,
        fragment: match (fragment_index, fragment_total) {
            (Some(index), Some(total)) => Some(FragmentInfo {
                index: index as usize,
                total: total as usize,
            }),
            _ => None,
        },
        signature: row.get(12)?,
        has_doc: row.get(13)?,
        fingerprint: row.get(14)?,
        text: row.get(15)?,
    })
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
