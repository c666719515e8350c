//! File manifest: what was indexed, at which fingerprint, producing which chunks

use super::VectorIndex;
use crate::model::{ChunkId, SourceFile};
use rusqlite::params;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Record of a successfully indexed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub fingerprint: String,
    pub size: u64,
    pub mtime: i64,
    pub chunk_ids: Vec<ChunkId>,
    /// Unix seconds of the commit
    pub indexed_at: i64,
}

/// Manifest keyed by relative path
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    /// Most recent commit time across all entries
    pub fn last_updated(&self) -> Option<i64> {
        self.entries.values().map(|e| e.indexed_at).max()
    }

    pub(crate) fn insert(&mut self, entry: ManifestEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }
}

impl VectorIndex {
    pub fn load_manifest(&self) -> crate::Result<Manifest> {
        let mut stmt = self.conn.prepare(
            "SELECT path, fingerprint, size, mtime, chunk_ids, indexed_at FROM manifest",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut manifest = Manifest::default();
        for row in rows {
            let (path, fingerprint, size, mtime, ids, indexed_at) = row?;
            let chunk_ids: Vec<String> = serde_json::from_str(&ids)?;
            manifest.insert(ManifestEntry {
                path,
                fingerprint,
                size: size as u64,
                mtime,
                chunk_ids: chunk_ids.into_iter().map(ChunkId::from_raw).collect(),
                indexed_at,
            });
        }
        Ok(manifest)
    }

    pub fn manifest_entry(&self, path: &str) -> crate::Result<Option<ManifestEntry>> {
        Ok(self.load_manifest()?.get(path).cloned())
    }

    /// Record `file` as indexed. Called only after its chunks are durable.
    pub fn commit_manifest_entry(
        &self,
        file: &SourceFile,
        chunk_ids: &[ChunkId],
    ) -> crate::Result<ManifestEntry> {
        let ids: Vec<&str> = chunk_ids.iter().map(ChunkId::as_str).collect();
        let indexed_at = OffsetDateTime::now_utc().unix_timestamp();

        self.conn.execute(
            "INSERT INTO manifest (path, fingerprint, size, mtime, chunk_ids, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(path) DO UPDATE SET
                 fingerprint = excluded.fingerprint,
                 size = excluded.size,
                 mtime = excluded.mtime,
                 chunk_ids = excluded.chunk_ids,
                 indexed_at = excluded.indexed_at",
            params![
                file.path,
                file.fingerprint,
                file.size as i64,
                file.mtime,
                serde_json::to_string(&ids)?,
                indexed_at,
            ],
        )?;

        Ok(ManifestEntry {
            path: file.path.clone(),
            fingerprint: file.fingerprint.clone(),
            size: file.size,
            mtime: file.mtime,
            chunk_ids: chunk_ids.to_vec(),
            indexed_at,
        })
    }

    pub fn remove_manifest_entry(&self, path: &str) -> crate::Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM manifest WHERE path = ?", params![path])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(path: &str, fp: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            fingerprint: fp.to_string(),
            size: 42,
            mtime: 1_700_000_000,
        }
    }

    #[test]
    fn test_commit_and_load() {
        let index = VectorIndex::open_in_memory().unwrap();
        let ids = vec![ChunkId::new("A.cs", "A", 0), ChunkId::new("A.cs", "A.Run", 1)];
        index.commit_manifest_entry(&source("A.cs", "f1"), &ids).unwrap();

        let manifest = index.load_manifest().unwrap();
        assert_eq!(manifest.len(), 1);
        let entry = manifest.get("A.cs").unwrap();
        assert_eq!(entry.fingerprint, "f1");
        assert_eq!(entry.size, 42);
        assert_eq!(entry.chunk_ids, ids);
        assert!(manifest.last_updated().is_some());
    }

    #[test]
    fn test_commit_overwrites_entry() {
        let index = VectorIndex::open_in_memory().unwrap();
        index.commit_manifest_entry(&source("A.cs", "f1"), &[]).unwrap();
        index.commit_manifest_entry(&source("A.cs", "f2"), &[]).unwrap();

        let entry = index.manifest_entry("A.cs").unwrap().unwrap();
        assert_eq!(entry.fingerprint, "f2");
        assert!(entry.chunk_ids.is_empty());
    }

    #[test]
    fn test_remove_entry() {
        let index = VectorIndex::open_in_memory().unwrap();
        index.commit_manifest_entry(&source("A.cs", "f1"), &[]).unwrap();
        assert!(index.remove_manifest_entry("A.cs").unwrap());
        assert!(!index.remove_manifest_entry("A.cs").unwrap());
        assert!(index.load_manifest().unwrap().is_empty());
    }
}
