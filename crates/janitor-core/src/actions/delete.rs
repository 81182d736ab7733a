use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::hasher::fingerprint_file;
use crate::model::DuplicateGroup;
use crate::progress::ProgressReporter;

pub const RETAINED_LAST_COPY: &str = "retained: no other copy would remain";
pub const NOT_ATTEMPTED: &str = "not attempted: operation cancelled";

/// The caller's selection over previously reported duplicate groups.
/// Never stored; it is only an input to one [`delete_selected`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub duplicate_groups: Vec<GroupSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSelection {
    pub hash: String,
    pub files: Vec<SelectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub selected: bool,
}

impl From<&DuplicateGroup> for GroupSelection {
    fn from(group: &DuplicateGroup) -> Self {
        Self {
            hash: group.hash.clone(),
            files: group
                .files
                .iter()
                .map(|m| SelectionEntry {
                    path: m.path.clone(),
                    selected: m.selected,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// When non-empty, targets must lie under one of these roots.
    pub allowed_roots: Vec<PathBuf>,
    /// Re-fingerprint each target and refuse if it no longer matches its group.
    pub verify_fingerprint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionStatus {
    Deleted,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: DeletionStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub hash: String,
    pub files: Vec<FileOutcome>,
}

impl GroupOutcome {
    /// (deleted, failed, skipped)
    pub fn counts(&self) -> (usize, usize, usize) {
        let count = |status| self.files.iter().filter(|f| f.status == status).count();
        (
            count(DeletionStatus::Deleted),
            count(DeletionStatus::Failed),
            count(DeletionStatus::Skipped),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Completion {
    Complete,
    Partial,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<PathBuf>,
    pub failed: BTreeMap<PathBuf, String>,
    pub skipped: BTreeMap<PathBuf, String>,
    /// Per-group detail, in request order. Groups with nothing selected are absent.
    #[serde(skip)]
    pub groups: Vec<GroupOutcome>,
}

impl DeleteReport {
    /// Retaining the last copy is policy, not a failure; anything that failed
    /// or was never attempted makes the run partial.
    pub fn completion(&self) -> Completion {
        let interrupted = self.skipped.values().any(|reason| reason == NOT_ATTEMPTED);
        if self.failed.is_empty() && !interrupted {
            Completion::Complete
        } else {
            Completion::Partial
        }
    }
}

/// Delete the selected members of each group.
///
/// Groups sharing a hash are merged first. Groups then run in parallel;
/// members within a group run in list order. A group never loses every copy:
/// unless an unselected member is still on disk with the group's content, the
/// last selected copy is kept and reported as skipped. Individual failures
/// never stop the run.
pub fn delete_selected(
    request: &DeleteRequest,
    options: &DeleteOptions,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> DeleteReport {
    let groups = merge_by_hash(&request.duplicate_groups);
    let total_groups = groups.len();
    let groups_done = AtomicUsize::new(0);
    info!("Executing deletion over {} groups", total_groups);

    let outcomes: Vec<GroupOutcome> = groups
        .par_iter()
        .filter_map(|group| {
            let outcome = delete_in_group(group, options, cancel);
            let done = groups_done.fetch_add(1, Ordering::Relaxed) + 1;
            reporter.on_delete_progress(done, total_groups);
            outcome
        })
        .collect();

    let mut report = DeleteReport::default();
    for outcome in &outcomes {
        for file in &outcome.files {
            match file.status {
                DeletionStatus::Deleted => report.deleted.push(file.path.clone()),
                DeletionStatus::Failed => {
                    report
                        .failed
                        .insert(file.path.clone(), file.reason.clone().unwrap_or_default());
                }
                DeletionStatus::Skipped => {
                    report
                        .skipped
                        .insert(file.path.clone(), file.reason.clone().unwrap_or_default());
                }
            }
        }
    }
    report.groups = outcomes;

    info!(
        "Deletion executed: {} deleted, {} failed, {} skipped",
        report.deleted.len(),
        report.failed.len(),
        report.skipped.len()
    );
    report
}

/// One group per hash, in first-appearance order. A hash split across several
/// groups is one duplicate set.
fn merge_by_hash(groups: &[GroupSelection]) -> Vec<GroupSelection> {
    let mut merged: Vec<GroupSelection> = Vec::with_capacity(groups.len());
    let mut position: HashMap<&str, usize> = HashMap::new();
    for group in groups {
        match position.get(group.hash.as_str()) {
            Some(&i) => {
                warn!("Hash {} appears in more than one group; merging them", group.hash);
                merged[i].files.extend(group.files.iter().cloned());
            }
            None => {
                position.insert(group.hash.as_str(), merged.len());
                merged.push(group.clone());
            }
        }
    }
    merged
}

fn delete_in_group(
    group: &GroupSelection,
    options: &DeleteOptions,
    cancel: &CancelToken,
) -> Option<GroupOutcome> {
    // A path listed twice is one member; its first listing decides.
    let mut seen = HashSet::new();
    let members: Vec<&SelectionEntry> = group
        .files
        .iter()
        .filter(|entry| {
            let first = seen.insert(entry.path.as_path());
            if !first {
                warn!("Path '{}' listed twice in group {}", entry.path.display(), group.hash);
            }
            first
        })
        .collect();

    let mut targets: Vec<&SelectionEntry> = members.iter().copied().filter(|m| m.selected).collect();
    if targets.is_empty() {
        return None;
    }

    let mut files = Vec::with_capacity(targets.len());
    let kept_elsewhere = members
        .iter()
        .filter(|m| !m.selected)
        .any(|m| holds_copy(&m.path, &group.hash, options));
    if !kept_elsewhere {
        if let Some(i) = targets.iter().rposition(|t| holds_copy(&t.path, &group.hash, options)) {
            let survivor = targets.remove(i);
            debug!("Keeping '{}' as the last copy of {}", survivor.path.display(), group.hash);
            files.push(FileOutcome {
                path: survivor.path.clone(),
                status: DeletionStatus::Skipped,
                reason: Some(RETAINED_LAST_COPY.to_string()),
            });
        }
    }

    for target in targets {
        if cancel.is_cancelled() {
            files.push(FileOutcome {
                path: target.path.clone(),
                status: DeletionStatus::Skipped,
                reason: Some(NOT_ATTEMPTED.to_string()),
            });
            continue;
        }
        match delete_one(&target.path, &group.hash, options) {
            Ok(()) => {
                debug!("Deleted '{}'", target.path.display());
                files.push(FileOutcome {
                    path: target.path.clone(),
                    status: DeletionStatus::Deleted,
                    reason: None,
                });
            }
            Err(reason) => {
                error!("Failed to remove '{}': {}", target.path.display(), reason);
                files.push(FileOutcome {
                    path: target.path.clone(),
                    status: DeletionStatus::Failed,
                    reason: Some(reason),
                });
            }
        }
    }

    Some(GroupOutcome {
        hash: group.hash.clone(),
        files,
    })
}

/// Whether `path` is still a regular file, with the group's content when
/// verification is on.
fn holds_copy(path: &Path, hash: &str, options: &DeleteOptions) -> bool {
    match fs::symlink_metadata(path) {
        Ok(m) if m.file_type().is_file() => {}
        _ => return false,
    }
    !options.verify_fingerprint || fingerprint_file(path).map_or(false, |actual| actual == hash)
}

fn delete_one(path: &Path, expected_hash: &str, options: &DeleteOptions) -> Result<(), String> {
    if !path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
        return Err("path must be absolute and normalized".to_string());
    }
    if !options.allowed_roots.is_empty()
        && !options.allowed_roots.iter().any(|root| path.starts_with(root))
    {
        return Err("path is outside the allowed roots".to_string());
    }

    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err("already removed".to_string()),
        Err(e) => return Err(e.to_string()),
    };
    if !metadata.file_type().is_file() {
        return Err("not a regular file".to_string());
    }

    if options.verify_fingerprint {
        match fingerprint_file(path) {
            Ok(actual) if actual == expected_hash => {}
            Ok(_) => return Err("content changed since scan".to_string()),
            Err(e) => return Err(format!("could not verify content: {}", e)),
        }
    }

    fs::remove_file(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => "already removed".to_string(),
        ErrorKind::PermissionDenied => format!("permission denied: {}", e),
        _ => e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use tempfile::tempdir;

    fn entry(path: &Path, selected: bool) -> SelectionEntry {
        SelectionEntry {
            path: path.to_path_buf(),
            selected,
        }
    }

    fn run(groups: Vec<GroupSelection>, options: &DeleteOptions) -> DeleteReport {
        delete_selected(
            &DeleteRequest {
                duplicate_groups: groups,
            },
            options,
            &CancelToken::new(),
            &SilentReporter,
        )
    }

    fn write_copies(dir: &Path, names: &[&str], content: &str) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| {
                let p = dir.join(n);
                fs::write(&p, content).unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn test_only_selected_members_are_deleted() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b", "c"], "dup");
        let report = run(
            vec![GroupSelection {
                hash: "h".into(),
                files: vec![entry(&paths[0], false), entry(&paths[1], true), entry(&paths[2], true)],
            }],
            &DeleteOptions::default(),
        );
        assert_eq!(report.deleted, vec![paths[1].clone(), paths[2].clone()]);
        assert!(paths[0].exists());
        assert!(!paths[1].exists() && !paths[2].exists());
        assert_eq!(report.completion(), Completion::Complete);
        assert_eq!(report.groups[0].counts(), (2, 0, 0));
    }

    #[test]
    fn test_all_selected_keeps_last_member() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b", "c"], "dup");
        let report = run(
            vec![GroupSelection {
                hash: "h".into(),
                files: paths.iter().map(|p| entry(p, true)).collect(),
            }],
            &DeleteOptions::default(),
        );
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped.get(&paths[2]).map(String::as_str), Some(RETAINED_LAST_COPY));
        assert!(paths[2].exists());
        assert_eq!(report.completion(), Completion::Complete);
    }

    #[test]
    fn test_failure_does_not_abort_other_deletions() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b"], "dup");
        let ghost = dir.path().join("ghost");
        let report = run(
            vec![GroupSelection {
                hash: "h".into(),
                files: vec![entry(&ghost, true), entry(&paths[0], true), entry(&paths[1], false)],
            }],
            &DeleteOptions::default(),
        );
        assert_eq!(report.failed.get(&ghost).map(String::as_str), Some("already removed"));
        assert_eq!(report.deleted, vec![paths[0].clone()]);
        assert_eq!(report.completion(), Completion::Partial);
    }

    #[test]
    fn test_paths_outside_allowed_roots_fail() {
        let allowed = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let paths = write_copies(elsewhere.path(), &["a", "b"], "dup");
        let options = DeleteOptions {
            allowed_roots: vec![allowed.path().to_path_buf()],
            verify_fingerprint: false,
        };
        let report = run(
            vec![GroupSelection {
                hash: "h".into(),
                files: vec![entry(&paths[0], true), entry(&paths[1], false)],
            }],
            &options,
        );
        assert!(report.deleted.is_empty());
        assert!(report.failed.contains_key(&paths[0]));
        assert!(paths[0].exists());
    }

    #[test]
    fn test_relative_and_parent_paths_are_refused() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b"], "dup");
        let sneaky = dir.path().join("sub").join("..").join("a");
        let report = run(
            vec![GroupSelection {
                hash: "h".into(),
                files: vec![entry(&sneaky, true), entry(Path::new("b"), true), entry(&paths[1], false)],
            }],
            &DeleteOptions::default(),
        );
        assert_eq!(report.failed.len(), 2);
        assert!(paths[0].exists());
    }

    #[test]
    fn test_verification_refuses_changed_content() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b"], "dup");
        let hash = fingerprint_file(&paths[0]).unwrap();
        fs::write(&paths[0], "edited after the scan").unwrap();

        let options = DeleteOptions {
            allowed_roots: Vec::new(),
            verify_fingerprint: true,
        };
        let report = run(
            vec![GroupSelection {
                hash,
                files: vec![entry(&paths[0], true), entry(&paths[1], false)],
            }],
            &options,
        );
        assert_eq!(
            report.failed.get(&paths[0]).map(String::as_str),
            Some("content changed since scan")
        );
        assert!(paths[0].exists());
    }

    #[test]
    fn test_cancelled_run_reports_not_attempted() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b", "c"], "dup");
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = delete_selected(
            &DeleteRequest {
                duplicate_groups: vec![GroupSelection {
                    hash: "h".into(),
                    files: paths.iter().map(|p| entry(p, true)).collect(),
                }],
            },
            &DeleteOptions::default(),
            &cancel,
            &SilentReporter,
        );
        assert!(report.deleted.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(
            report.skipped.values().filter(|r| r.as_str() == NOT_ATTEMPTED).count(),
            2
        );
        assert_eq!(report.completion(), Completion::Partial);
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_groups_without_selection_are_not_processed() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b"], "dup");
        let report = run(
            vec![GroupSelection {
                hash: "h".into(),
                files: paths.iter().map(|p| entry(p, false)).collect(),
            }],
            &DeleteOptions::default(),
        );
        assert!(report.groups.is_empty());
        assert_eq!(report, DeleteReport::default());
    }

    #[test]
    fn test_duplicate_listing_cannot_remove_every_copy() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b"], "dup");
        let report = run(
            vec![GroupSelection {
                hash: "h".into(),
                files: vec![entry(&paths[0], true), entry(&paths[1], true), entry(&paths[0], false)],
            }],
            &DeleteOptions::default(),
        );
        assert_eq!(report.deleted, vec![paths[0].clone()]);
        assert!(paths[1].exists());
    }

    #[test]
    fn test_hash_split_across_groups_keeps_a_copy() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b"], "dup");
        let report = run(
            vec![
                GroupSelection {
                    hash: "h".into(),
                    files: vec![entry(&paths[0], true), entry(&paths[1], false)],
                },
                GroupSelection {
                    hash: "h".into(),
                    files: vec![entry(&paths[1], true), entry(&paths[0], false)],
                },
            ],
            &DeleteOptions::default(),
        );
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.deleted, vec![paths[0].clone()]);
        assert!(paths[1].exists());
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_split_all_selected_groups_keep_one_copy() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b", "c"], "dup");
        let report = run(
            vec![
                GroupSelection {
                    hash: "h".into(),
                    files: vec![entry(&paths[0], true), entry(&paths[1], true)],
                },
                GroupSelection {
                    hash: "h".into(),
                    files: vec![entry(&paths[2], true)],
                },
            ],
            &DeleteOptions::default(),
        );
        assert_eq!(report.deleted, vec![paths[0].clone(), paths[1].clone()]);
        assert_eq!(report.skipped.get(&paths[2]).map(String::as_str), Some(RETAINED_LAST_COPY));
        assert!(paths[2].exists());
    }

    #[test]
    fn test_missing_unselected_member_keeps_last_selected() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b"], "dup");
        let gone = dir.path().join("gone");
        let report = run(
            vec![GroupSelection {
                hash: "h".into(),
                files: vec![entry(&paths[0], true), entry(&paths[1], true), entry(&gone, false)],
            }],
            &DeleteOptions::default(),
        );
        assert_eq!(report.deleted, vec![paths[0].clone()]);
        assert_eq!(report.skipped.get(&paths[1]).map(String::as_str), Some(RETAINED_LAST_COPY));
        assert!(paths[1].exists());
    }

    #[test]
    fn test_changed_unselected_member_does_not_count_as_a_copy() {
        let dir = tempdir().unwrap();
        let paths = write_copies(dir.path(), &["a", "b"], "dup");
        let hash = fingerprint_file(&paths[0]).unwrap();
        fs::write(&paths[1], "edited after the scan").unwrap();

        let options = DeleteOptions {
            allowed_roots: Vec::new(),
            verify_fingerprint: true,
        };
        let report = run(
            vec![GroupSelection {
                hash,
                files: vec![entry(&paths[0], true), entry(&paths[1], false)],
            }],
            &options,
        );
        assert!(report.deleted.is_empty());
        assert_eq!(report.skipped.get(&paths[0]).map(String::as_str), Some(RETAINED_LAST_COPY));
        assert!(paths[0].exists());
    }

    #[test]
    fn test_request_deserializes_from_wire_shape() {
        let json = r#"{"duplicateGroups":[{"hash":"abc","files":[
            {"path":"/x/a","size":3,"lastModified":"2024-01-01T00:00:00Z","selected":true},
            {"path":"/x/b","size":3,"lastModified":"2024-01-01T00:00:00Z"}]}]}"#;
        let request: DeleteRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.duplicate_groups[0].files.len(), 2);
        assert!(request.duplicate_groups[0].files[0].selected);
        assert!(!request.duplicate_groups[0].files[1].selected);
    }
}
