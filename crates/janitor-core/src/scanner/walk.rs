use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::FileRecord;
use crate::progress::ProgressReporter;

const PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    ignore_patterns: Vec<Pattern>,
}

impl ScanOptions {
    /// Invalid globs are logged and dropped rather than failing the scan.
    pub fn with_ignore_globs<S: AsRef<str>>(globs: &[S]) -> Self {
        let ignore_patterns = globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob.as_ref()) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob.as_ref(), e);
                    None
                }
            })
            .collect();
        Self { ignore_patterns }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns.iter().any(|p| p.matches_path(path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Symlink,
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Symlink => f.write_str("symbolic link"),
            SkipReason::Unreadable(reason) => write!(f, "unreadable: {}", reason),
        }
    }
}

/// An entry left out of the scan, reported instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub root: PathBuf,
    pub recursive: bool,
    /// Sorted by path.
    pub records: Vec<FileRecord>,
    pub skipped: Vec<SkippedEntry>,
}

impl ScanResult {
    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size).sum()
    }
}

/// Index the regular files below `root`.
///
/// With `recursive == false` only the immediate children of `root` are
/// visited. Symbolic links are never followed. Entries whose metadata cannot
/// be read are recorded in [`ScanResult::skipped`] and the walk continues.
pub fn scan_directory(
    root: &Path,
    recursive: bool,
    options: &ScanOptions,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<ScanResult> {
    let metadata = fs::metadata(root).map_err(|e| Error::from_io(root, e))?;
    if !metadata.is_dir() {
        return Err(Error::NotFound(root.to_path_buf()));
    }
    let root = fs::canonicalize(root).map_err(|e| Error::from_io(root, e))?;
    // Surface an unlistable root as a hard error; deeper ones are skipped.
    fs::read_dir(&root).map_err(|e| Error::from_io(&root, e))?;

    info!("Scanning '{}' (recursive: {})", root.display(), recursive);
    reporter.on_scan_start(&root.to_string_lossy());
    let start = Instant::now();

    let mut walker = WalkDir::new(&root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for entry in walker
        .into_iter()
        .filter_entry(|e| !options.is_ignored(e.path()))
    {
        if cancel.is_cancelled() {
            warn!("Scan of '{}' cancelled", root.display());
            return Err(Error::Cancelled);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                warn!("Skipping unreadable entry '{}': {}", path.display(), err);
                skipped.push(SkippedEntry {
                    path,
                    reason: SkipReason::Unreadable(err.to_string()),
                });
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            debug!("Skipping symlink '{}'", entry.path().display());
            skipped.push(SkippedEntry {
                path: entry.path().to_path_buf(),
                reason: SkipReason::Symlink,
            });
            continue;
        }
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            debug!("Skipping special file '{}'", entry.path().display());
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                warn!("Skipping '{}': {}", entry.path().display(), err);
                skipped.push(SkippedEntry {
                    path: entry.path().to_path_buf(),
                    reason: SkipReason::Unreadable(err.to_string()),
                });
                continue;
            }
        };
        let last_modified: DateTime<Utc> = match metadata.modified() {
            Ok(t) => t.into(),
            Err(err) => {
                skipped.push(SkippedEntry {
                    path: entry.path().to_path_buf(),
                    reason: SkipReason::Unreadable(err.to_string()),
                });
                continue;
            }
        };

        records.push(FileRecord {
            path: entry.into_path(),
            size: metadata.len(),
            last_modified,
            fingerprint: None,
        });
        if records.len() % PROGRESS_EVERY == 0 {
            reporter.on_scan_progress(records.len());
        }
    }

    records.sort_by(|a, b| a.path.cmp(&b.path));

    let duration = start.elapsed();
    reporter.on_scan_complete(records.len(), duration.as_secs_f64());
    info!(
        "Scan of '{}' complete: {} files, {} skipped in {:.2}s",
        root.display(),
        records.len(),
        skipped.len(),
        duration.as_secs_f64()
    );

    Ok(ScanResult {
        root,
        recursive,
        records,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use tempfile::tempdir;

    fn setup_tree(root: &Path) {
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("b.log"), "bb").unwrap();
        fs::write(root.join("sub/c.txt"), "ccc").unwrap();
        fs::write(root.join("sub/deeper/d.txt"), "dddd").unwrap();
    }

    fn scan(root: &Path, recursive: bool, options: &ScanOptions) -> Result<ScanResult> {
        scan_directory(root, recursive, options, &CancelToken::new(), &SilentReporter)
    }

    #[test]
    fn test_non_recursive_returns_immediate_children_only() {
        let dir = tempdir().unwrap();
        setup_tree(dir.path());

        let result = scan(dir.path(), false, &ScanOptions::default()).unwrap();
        let names: Vec<String> = result.records.iter().map(|r| r.file_name()).collect();
        assert_eq!(names, vec!["a.txt", "b.log"]);
        for record in &result.records {
            assert_eq!(record.path.parent().unwrap(), result.root);
        }
    }

    #[test]
    fn test_recursive_walks_subtree_sorted() {
        let dir = tempdir().unwrap();
        setup_tree(dir.path());

        let result = scan(dir.path(), true, &ScanOptions::default()).unwrap();
        assert_eq!(result.records.len(), 4);
        assert_eq!(result.total_bytes(), 1 + 2 + 3 + 4);
        let mut sorted = result.records.clone();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(sorted, result.records);
        assert!(result.records.iter().all(|r| r.path.is_absolute()));
        assert!(result.records.iter().all(|r| r.fingerprint.is_none()));
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let dir = tempdir().unwrap();
        let result = scan(&dir.path().join("missing"), true, &ScanOptions::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_file_root_is_not_found() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            scan(&file, false, &ScanOptions::default()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_ignore_patterns_exclude_files_and_directories() {
        let dir = tempdir().unwrap();
        setup_tree(dir.path());

        let options = ScanOptions::with_ignore_globs(&["*.log", "*/deeper", "[invalid"]);
        let result = scan(dir.path(), true, &options).unwrap();
        let names: Vec<String> = result.records.iter().map(|r| r.file_name()).collect();
        assert_eq!(names, vec!["a.txt", "c.txt"]);
    }

    #[test]
    fn test_cancelled_scan_returns_cancelled() {
        let dir = tempdir().unwrap();
        setup_tree(dir.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = scan_directory(dir.path(), true, &ScanOptions::default(), &cancel, &SilentReporter);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped_and_reported() {
        let dir = tempdir().unwrap();
        setup_tree(dir.path());
        std::os::unix::fs::symlink(dir.path().join("a.txt"), dir.path().join("link.txt")).unwrap();

        let result = scan(dir.path(), false, &ScanOptions::default()).unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].reason, SkipReason::Symlink);
        assert!(result.skipped[0].path.ends_with("link.txt"));
    }
}
