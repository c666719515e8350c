//! Source discovery: walk the codebase root, apply include/exclude globs,
//! fingerprint every matching file.

use crate::config::CodebaseConfig;
use crate::error::MagError;
use crate::model::{fingerprint, SourceFile};
use crate::workspace::DATA_DIR;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Summary of a scan, without fingerprints
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub total_files: usize,
    pub total_bytes: u64,
    pub extensions: BTreeSet<String>,
}

/// Result of a scan: readable files plus the paths that failed to read
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub files: Vec<SourceFile>,
    pub unreadable: Vec<String>,
}

/// Walks a codebase root and yields the files that should be indexed
pub struct SourceScanner {
    root: PathBuf,
    canonical_root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    respect_gitignore: bool,
}

impl SourceScanner {
    /// Build a scanner; fails if the root is unreadable or a glob is invalid
    pub fn new(root: &Path, config: &CodebaseConfig) -> crate::Result<Self> {
        let discovery_err = |e: std::io::Error| MagError::Discovery {
            path: root.to_path_buf(),
            message: e.to_string(),
        };

        let meta = fs::metadata(root).map_err(discovery_err)?;
        if !meta.is_dir() {
            return Err(MagError::Discovery {
                path: root.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }
        // Listing must work too, not just stat
        fs::read_dir(root).map_err(discovery_err)?;
        let canonical_root = root.canonicalize().map_err(discovery_err)?;

        let mut include = GlobSetBuilder::new();
        for pattern in &config.include {
            include.add(Glob::new(pattern).map_err(|e| MagError::GlobPattern(e.to_string()))?);
        }
        let include = include
            .build()
            .map_err(|e| MagError::GlobPattern(e.to_string()))?;

        let mut exclude = GlobSetBuilder::new();
        let always = [DATA_DIR.to_string()];
        for pattern in config.exclude.iter().chain(always.iter()) {
            for glob in expand_exclude(pattern) {
                exclude.add(Glob::new(&glob).map_err(|e| MagError::GlobPattern(e.to_string()))?);
            }
        }
        let exclude = exclude
            .build()
            .map_err(|e| MagError::GlobPattern(e.to_string()))?;

        Ok(Self {
            root: root.to_path_buf(),
            canonical_root,
            include,
            exclude,
            respect_gitignore: config.respect_gitignore,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and fingerprint every matching file, sorted by path.
    ///
    /// Unreadable files are logged and skipped.
    pub fn scan(&self) -> crate::Result<Vec<SourceFile>> {
        Ok(self.scan_report()?.files)
    }

    /// Like [`SourceScanner::scan`], also naming the files that matched but
    /// could not be read
    pub fn scan_report(&self) -> crate::Result<ScanReport> {
        let mut report = ScanReport::default();

        for path in self.walk() {
            let relative = match self.relative_path(&path) {
                Some(r) => r,
                None => continue,
            };

            let read = fs::metadata(&path).and_then(|meta| Ok((meta, fs::read(&path)?)));
            let (meta, bytes) = match read {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %relative, error = %e, "skipping unreadable file");
                    report.unreadable.push(relative);
                    continue;
                }
            };

            report.files.push(SourceFile {
                path: relative,
                fingerprint: fingerprint(&bytes),
                size: meta.len(),
                mtime: file_mtime(&meta),
            });
        }

        report.files.sort_by(|a, b| a.path.cmp(&b.path));
        report.unreadable.sort();
        debug!(
            count = report.files.len(),
            unreadable = report.unreadable.len(),
            root = %self.root.display(),
            "scan complete"
        );
        Ok(report)
    }

    /// File count, byte total and extension set without reading contents
    pub fn stats(&self) -> ScanStats {
        let mut stats = ScanStats::default();
        for path in self.walk() {
            stats.total_files += 1;
            stats.total_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                stats.extensions.insert(format!(".{}", ext));
            }
        }
        stats
    }

    /// Candidate files: matched by include, not excluded, inside the root
    fn walk(&self) -> Vec<PathBuf> {
        let mut builder = WalkBuilder::new(&self.root);
        builder.hidden(false);
        builder.follow_links(false);
        builder.git_ignore(self.respect_gitignore);
        builder.git_global(self.respect_gitignore);
        builder.git_exclude(self.respect_gitignore);
        // Honor .gitignore even when the root is not a git checkout
        builder.require_git(false);

        let mut out = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Some(t) => t,
                None => continue,
            };

            if file_type.is_symlink() {
                // Only accept links that resolve to a file inside the root
                match path.canonicalize() {
                    Ok(target) if target.starts_with(&self.canonical_root) && target.is_file() => {}
                    _ => {
                        debug!(path = %path.display(), "skipping symlink leaving the root");
                        continue;
                    }
                }
            } else if !file_type.is_file() {
                continue;
            }

            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            if self.exclude.is_match(relative) {
                continue;
            }
            if self.include.is_match(relative) {
                out.push(path.to_path_buf());
            }
        }
        out
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        Some(to_slash_path(relative))
    }
}

/// Relative path with `/` separators on every platform
fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A pattern without wildcards matches a path component anywhere
fn expand_exclude(pattern: &str) -> Vec<String> {
    if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
        vec![pattern.to_string()]
    } else {
        vec![format!("**/{}", pattern), format!("**/{}/**", pattern)]
    }
}

pub(crate) fn file_mtime(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
