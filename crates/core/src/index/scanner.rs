//! Recursive tree scanner with content hashing.
//!
//! Hashing is the expensive part of a scan, so the scanner first stats every
//! candidate file and reuses the hash recorded in the last committed snapshot
//! when (size, mtime) are unchanged. Files that do need hashing are spread
//! across a bounded pool of worker threads; results are merged into an
//! ordered map before anything downstream can observe them.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::ScanError;
use crate::index::{FileSource, LibraryFile, LibraryTree};
use crate::snapshot::SyncSnapshot;

/// Directory names that are never scanned, regardless of ignore patterns.
const VCS_DIRS: &[&str] = &[".git", ".svn", ".hg", "CVS"];

/// Recursive library tree indexer.
#[derive(Debug, Clone)]
pub struct Indexer {
    ignore: Vec<String>,
    workers: usize,
}

impl Indexer {
    /// Create an indexer with the given glob ignore patterns and hashing
    /// worker count.
    pub fn new(ignore: Vec<String>, workers: usize) -> Self {
        Self {
            ignore,
            workers: workers.max(1),
        }
    }

    /// Scan `root` and produce an index of every regular file beneath it.
    ///
    /// `prev` is the last committed snapshot; entries whose (size, mtime)
    /// match it keep their recorded hash without re-reading bytes. Unreadable
    /// files and symlink cycles are recorded as warnings on the returned
    /// tree, and the scan continues.
    pub fn index(
        &self,
        root: &Path,
        source: FileSource,
        prev: Option<&SyncSnapshot>,
    ) -> Result<LibraryTree, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::RootNotFound(root.display().to_string()));
        }

        info!(root = %root.display(), %source, "scanning library tree");

        let mut warnings = Vec::new();
        let mut cached: Vec<LibraryFile> = Vec::new();
        let mut pending: Vec<(String, PathBuf, u64, i64)> = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_name(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| relative_key(root, p))
                        .unwrap_or_default();
                    if err.loop_ancestor().is_some() {
                        warn!(%path, "symlink cycle, skipping subtree");
                        warnings.push(ScanError::CyclicSymlink { path });
                    } else {
                        warn!(%path, error = %err, "unreadable entry, skipping");
                        warnings.push(ScanError::Unreadable {
                            path,
                            detail: err.to_string(),
                        });
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let rel = relative_key(root, entry.path());
            if self.is_ignored(&rel) {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    warnings.push(ScanError::Unreadable {
                        path: rel,
                        detail: err.to_string(),
                    });
                    continue;
                }
            };
            let size = meta.len();
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            match prev.and_then(|s| s.get(&rel)) {
                Some(e) if e.size == size && e.mtime == mtime => {
                    cached.push(LibraryFile {
                        path: rel,
                        hash: e.hash.clone(),
                        size,
                        mtime,
                        source,
                    });
                }
                _ => pending.push((rel, entry.path().to_path_buf(), size, mtime)),
            }
        }

        debug!(
            cached = cached.len(),
            to_hash = pending.len(),
            "stat pass complete"
        );

        let mut files: BTreeMap<String, LibraryFile> = BTreeMap::new();
        for f in cached {
            files.insert(f.path.clone(), f);
        }

        for (rel, hashed) in self.hash_pending(&pending, source) {
            match hashed {
                Ok(file) => {
                    files.insert(rel, file);
                }
                Err(err) => {
                    warn!(path = %rel, error = %err, "failed to hash file, skipping");
                    warnings.push(err);
                }
            }
        }

        info!(
            files = files.len(),
            warnings = warnings.len(),
            "scan complete"
        );

        Ok(LibraryTree {
            root: root.to_path_buf(),
            source,
            files,
            warnings,
        })
    }

    /// Hash all pending files across the worker pool.
    ///
    /// Per-file hashing is read-only and independent, so the order workers
    /// finish in does not matter; the caller inserts results into an ordered
    /// map.
    fn hash_pending(
        &self,
        pending: &[(String, PathBuf, u64, i64)],
        source: FileSource,
    ) -> Vec<(String, Result<LibraryFile, ScanError>)> {
        if pending.is_empty() {
            return Vec::new();
        }

        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<(String, Result<LibraryFile, ScanError>)>> =
            Mutex::new(Vec::with_capacity(pending.len()));

        let workers = self.workers.min(pending.len());
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= pending.len() {
                        break;
                    }
                    let (rel, abs, size, mtime) = &pending[i];
                    let outcome = hash_file(abs)
                        .map(|hash| LibraryFile {
                            path: rel.clone(),
                            hash,
                            size: *size,
                            mtime: *mtime,
                            source,
                        })
                        .map_err(|e| ScanError::Unreadable {
                            path: rel.clone(),
                            detail: e.to_string(),
                        });
                    results.lock().unwrap().push((rel.clone(), outcome));
                });
            }
        });

        results.into_inner().unwrap()
    }

    fn is_ignored(&self, rel: &str) -> bool {
        self.ignore.iter().any(|p| glob_match::glob_match(p, rel))
    }
}

/// SHA-256 over the file's bytes, lowercase hex.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 over in-memory bytes, lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Dotfiles and VCS metadata directories are always skipped.
fn is_skipped_name(name: &std::ffi::OsStr) -> bool {
    match name.to_str() {
        Some(s) => s.starts_with('.') || VCS_DIRS.contains(&s),
        // Non-UTF-8 names cannot become normalized keys; skip them.
        None => true,
    }
}

/// Forward-slash relative key for a path beneath `root`.
fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
