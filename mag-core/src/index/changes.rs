//! Change detection: partition a scan against the persisted manifest

use super::IndexMode;
use crate::model::SourceFile;
use crate::store::Manifest;
use std::collections::BTreeSet;

/// Scan partitioned by what the indexer has to do with each file
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<SourceFile>,
    pub modified: Vec<SourceFile>,
    /// Paths whose chunks and manifest entry must go
    pub removed: Vec<String>,
    pub unchanged: Vec<SourceFile>,
}

impl ChangeSet {
    /// Files to chunk and embed: added first, then modified
    pub fn to_process(&self) -> Vec<SourceFile> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .cloned()
            .collect()
    }

    pub fn has_work(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.removed.is_empty()
    }
}

/// Compares scans with the manifest and the paths present in the index
pub struct ChangeTracker<'a> {
    manifest: &'a Manifest,
    indexed_paths: &'a [String],
}

impl<'a> ChangeTracker<'a> {
    pub fn new(manifest: &'a Manifest, indexed_paths: &'a [String]) -> Self {
        Self {
            manifest,
            indexed_paths,
        }
    }

    /// Partition `scan`.
    ///
    /// `unreadable` lists files that exist but could not be read this run;
    /// they keep whatever the index holds for them. In full-rebuild mode
    /// every scanned file counts as added.
    pub fn classify(
        &self,
        scan: Vec<SourceFile>,
        unreadable: &[String],
        mode: IndexMode,
    ) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let present: BTreeSet<&str> = scan
            .iter()
            .map(|f| f.path.as_str())
            .chain(unreadable.iter().map(String::as_str))
            .collect();

        // Manifest entries and orphaned index paths that vanished from disk
        let mut removed: BTreeSet<String> = BTreeSet::new();
        for path in self.manifest.paths().chain(self.indexed_paths.iter().map(String::as_str)) {
            if !present.contains(path) {
                removed.insert(path.to_string());
            }
        }
        changes.removed = removed.into_iter().collect();

        for file in scan {
            if mode == IndexMode::FullRebuild {
                changes.added.push(file);
                continue;
            }
            match self.manifest.get(&file.path) {
                None => changes.added.push(file),
                Some(entry) if entry.fingerprint != file.fingerprint => changes.modified.push(file),
                Some(_) => changes.unchanged.push(file),
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorIndex;

    fn file(path: &str, fp: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            fingerprint: fp.to_string(),
            size: 1,
            mtime: 0,
        }
    }

    fn manifest(entries: &[(&str, &str)]) -> Manifest {
        let index = VectorIndex::open_in_memory().unwrap();
        for (path, fp) in entries {
            index.commit_manifest_entry(&file(path, fp), &[]).unwrap();
        }
        index.load_manifest().unwrap()
    }

    fn paths(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_partition() {
        let manifest = manifest(&[("A.cs", "a1"), ("B.cs", "b1"), ("Gone.cs", "g1")]);
        let scan = vec![file("A.cs", "a1"), file("B.cs", "b2"), file("New.cs", "n1")];

        let changes = ChangeTracker::new(&manifest, &[]).classify(scan, &[], IndexMode::Incremental);
        assert_eq!(paths(&changes.added), vec!["New.cs"]);
        assert_eq!(paths(&changes.modified), vec!["B.cs"]);
        assert_eq!(paths(&changes.unchanged), vec!["A.cs"]);
        assert_eq!(changes.removed, vec!["Gone.cs"]);
        assert!(changes.has_work());
    }

    #[test]
    fn test_unchanged_scan_has_no_work() {
        let manifest = manifest(&[("A.cs", "a1")]);
        let changes = ChangeTracker::new(&manifest, &["A.cs".to_string()]).classify(
            vec![file("A.cs", "a1")],
            &[],
            IndexMode::Incremental,
        );
        assert!(!changes.has_work());
        assert!(changes.to_process().is_empty());
    }

    #[test]
    fn test_full_rebuild_adds_everything() {
        let manifest = manifest(&[("A.cs", "a1")]);
        let changes = ChangeTracker::new(&manifest, &[]).classify(
            vec![file("A.cs", "a1"), file("B.cs", "b1")],
            &[],
            IndexMode::FullRebuild,
        );
        assert_eq!(paths(&changes.added), vec!["A.cs", "B.cs"]);
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn test_orphaned_index_paths_are_removed() {
        let manifest = manifest(&[]);
        let indexed = vec!["Orphan.cs".to_string(), "A.cs".to_string()];
        let changes = ChangeTracker::new(&manifest, &indexed).classify(
            vec![file("A.cs", "a1")],
            &[],
            IndexMode::Incremental,
        );
        assert_eq!(changes.removed, vec!["Orphan.cs"]);
        assert_eq!(paths(&changes.added), vec!["A.cs"]);
    }

    #[test]
    fn test_unreadable_file_is_kept() {
        let manifest = manifest(&[("Locked.cs", "l1")]);
        let changes = ChangeTracker::new(&manifest, &[]).classify(
            vec![],
            &["Locked.cs".to_string()],
            IndexMode::Incremental,
        );
        assert!(changes.removed.is_empty());
        assert!(!changes.has_work());
    }
}
