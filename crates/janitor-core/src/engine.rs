use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::actions::{self, DeleteOptions, DeleteReport, DeleteRequest, OrganizeReport};
use crate::analysis::{self, Categorization, GroupingOptions, UnreadableFile};
use crate::audit::{self, events, AuditEvent, AuditLog, AuditQuery, AuditStore};
use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::config_store::ConfigStore;
use crate::error::{Error, Result};
use crate::hasher::HashCache;
use crate::model::{
    AuditEntry, CategorizationRule, CleanerConfig, DuplicateGroup, FileRecord, ReportRequest,
    ScanOperation, ScanRequest, ScanResponse,
};
use crate::progress::ProgressReporter;
use crate::report::{self, ReportMailer, ReportStatus};
use crate::rules::{RuleChange, RuleStore};
use crate::scanner::{self, ScanOptions, SkippedEntry};
use crate::storage::Database;

/// An operation's result plus any audit appends that failed after it
/// committed. A failed append never undoes the operation.
#[derive(Debug)]
pub struct Audited<T> {
    pub value: T,
    pub audit_failures: Vec<String>,
}

impl<T> Audited<T> {
    pub fn is_fully_audited(&self) -> bool {
        self.audit_failures.is_empty()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Duplicate groups found under one or more roots.
#[derive(Debug, Clone, Default)]
pub struct DuplicateScan {
    pub roots: Vec<PathBuf>,
    pub groups: Vec<DuplicateGroup>,
    pub files_scanned: usize,
    pub skipped: Vec<SkippedEntry>,
    pub unreadable: Vec<UnreadableFile>,
    /// Every scanned file, with its fingerprint unless it was unreadable.
    pub records: Vec<FileRecord>,
}

impl DuplicateScan {
    /// Members beyond the first of each group.
    pub fn duplicate_files(&self) -> usize {
        self.groups.iter().map(|g| g.files.len().saturating_sub(1)).sum()
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.groups.iter().map(DuplicateGroup::wasted_bytes).sum()
    }
}

struct Indexed {
    roots: Vec<PathBuf>,
    records: Vec<FileRecord>,
    skipped: Vec<SkippedEntry>,
}

/// Entry point tying the stores, the pipeline stages and the audit log
/// together. Every state-changing operation appends its audit entries here,
/// after its primary effect.
pub struct Janitor {
    config: AppConfig,
    rules: RuleStore,
    settings: ConfigStore,
    audit: AuditLog,
    cache: Option<HashCache>,
    scan_options: ScanOptions,
}

impl Janitor {
    pub fn open(config: AppConfig) -> Result<Self> {
        let db = Arc::new(Database::open(&config.db_path)?);
        info!("Opened database at {}", config.db_path);
        Self::with_audit_store(config, db.clone(), db)
    }

    pub fn in_memory(config: AppConfig) -> Result<Self> {
        let db = Arc::new(Database::open_in_memory()?);
        Self::with_audit_store(config, db.clone(), db)
    }

    /// Rules, settings and the hash cache live in `db`; audit entries go to
    /// `audit_store`.
    pub fn with_audit_store(
        config: AppConfig,
        db: Arc<Database>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Result<Self> {
        let rules = RuleStore::load(db.clone())?;
        let settings = ConfigStore::load(db.clone())?;
        let cache = config.use_hash_cache.then(|| HashCache::new(db));
        let scan_options = ScanOptions::with_ignore_globs(&config.ignore_patterns);
        Ok(Self {
            config,
            rules,
            settings,
            audit: AuditLog::new(audit_store),
            cache,
            scan_options,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ── Duplicates ───────────────────────────────────────────────

    /// Scan `directory` (or the configured default paths) and group files by
    /// content.
    pub fn find_duplicates(
        &self,
        directory: Option<&Path>,
        recursive: bool,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<Audited<DuplicateScan>> {
        let mut pending = Vec::new();
        let indexed = self.index(directory, recursive, cancel, reporter, &mut pending);
        let indexed = self.flush_on_error(indexed, &mut pending)?;

        let options = GroupingOptions {
            workers: self.config.hash_workers,
        };
        let grouping = analysis::group_duplicates(
            &indexed.records,
            &options,
            self.cache.as_ref(),
            cancel,
            reporter,
        );
        let grouping = self.flush_on_error(grouping, &mut pending)?;

        pending.extend(grouping.unreadable.iter().map(events::unreadable));
        let result = DuplicateScan {
            roots: indexed.roots,
            groups: grouping.groups,
            files_scanned: indexed.records.len(),
            skipped: indexed.skipped,
            unreadable: grouping.unreadable,
            records: grouping.records,
        };
        info!(
            "Found {} duplicate groups ({} bytes reclaimable)",
            result.groups.len(),
            result.wasted_bytes()
        );
        Ok(self.audited(result, pending))
    }

    /// Delete the selected members of each group. Never fails as a whole;
    /// per-file problems are itemized in the report.
    pub fn delete_duplicates(
        &self,
        request: &DeleteRequest,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Audited<DeleteReport> {
        let options = DeleteOptions {
            allowed_roots: self.deletion_roots(),
            verify_fingerprint: self.config.verify_before_delete,
        };
        let report = actions::delete_selected(request, &options, cancel, reporter);

        if let Some(cache) = &self.cache {
            for path in &report.deleted {
                cache.invalidate(path);
            }
        }

        let pending: Vec<AuditEvent> = report.groups.iter().map(events::group_deleted).collect();
        self.audited(report, pending)
    }

    // ── Categorization ───────────────────────────────────────────

    pub fn categorize(
        &self,
        directory: Option<&Path>,
        recursive: bool,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<Audited<Categorization>> {
        let mut pending = Vec::new();
        let indexed = self.index(directory, recursive, cancel, reporter, &mut pending);
        let indexed = self.flush_on_error(indexed, &mut pending)?;
        let rules = self.rules.snapshot();
        let categorization = analysis::categorize(&indexed.records, &rules);

        pending.push(events::categorized(&display_roots(&indexed.roots), &categorization));
        Ok(self.audited(categorization, pending))
    }

    /// Categorize, then move every categorized file under `destination`.
    pub fn organize(
        &self,
        directory: Option<&Path>,
        recursive: bool,
        destination: &Path,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<Audited<OrganizeReport>> {
        let mut pending = Vec::new();
        let indexed = self.index(directory, recursive, cancel, reporter, &mut pending);
        let indexed = self.flush_on_error(indexed, &mut pending)?;
        let rules = self.rules.snapshot();
        let categorization = analysis::categorize(&indexed.records, &rules);

        let report = actions::organize_files(&categorization, destination, cancel);
        let report = self.flush_on_error(report, &mut pending)?;
        pending.extend(report.moved.iter().map(events::moved));
        Ok(self.audited(report, pending))
    }

    /// One-shot scan with a follow-up operation; answers with a summary line.
    ///
    /// `DELETE_DUPLICATES` only finds the groups. Files are removed solely
    /// through [`Janitor::delete_duplicates`] with an explicit selection.
    pub fn run_scan(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<Audited<ScanResponse>> {
        let directory = request.directory_path.trim();
        if directory.is_empty() {
            return Err(Error::validation("directory path must not be empty"));
        }
        let directory = Path::new(directory);

        match request.operation {
            ScanOperation::None => Err(Error::validation("no scan operation requested")),
            ScanOperation::CategorizeFiles => {
                let Audited {
                    value,
                    audit_failures,
                } = self.categorize(Some(directory), request.recursive, cancel, reporter)?;
                let message = format!(
                    "Categorized {} files into {} categories",
                    value.total_files(),
                    value.buckets.len()
                );
                Ok(Audited {
                    value: ScanResponse { message },
                    audit_failures,
                })
            }
            ScanOperation::DeleteDuplicates => {
                let Audited {
                    value,
                    audit_failures,
                } = self.find_duplicates(Some(directory), request.recursive, cancel, reporter)?;
                let message = format!(
                    "Found {} duplicate groups, {} redundant files ({} bytes reclaimable)",
                    value.groups.len(),
                    value.duplicate_files(),
                    value.wasted_bytes()
                );
                Ok(Audited {
                    value: ScanResponse { message },
                    audit_failures,
                })
            }
        }
    }

    // ── Rules ────────────────────────────────────────────────────

    pub fn list_rules(&self) -> Vec<CategorizationRule> {
        self.rules.list()
    }

    pub fn upsert_rule(&self, pattern: &str, category: &str) -> Result<Audited<RuleChange>> {
        let change = self.rules.upsert(pattern, category)?;
        let event = events::rule_upserted(pattern, category, &change);
        Ok(self.audited(change, vec![event]))
    }

    pub fn remove_rule(&self, pattern: &str) -> Result<Audited<bool>> {
        let removed = self.rules.remove(pattern)?;
        Ok(self.audited(removed, vec![events::rule_removed(pattern, removed)]))
    }

    // ── Config ───────────────────────────────────────────────────

    pub fn get_config(&self) -> CleanerConfig {
        self.settings.get(&self.rules)
    }

    pub fn update_config(&self, new_config: &CleanerConfig) -> Result<Audited<CleanerConfig>> {
        let updated = self.settings.update(new_config, &self.rules)?;
        let event = events::config_updated(&updated.scan_paths);
        Ok(self.audited(updated, vec![event]))
    }

    // ── Logs ─────────────────────────────────────────────────────

    pub fn logs(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        self.audit.query(query)
    }

    pub fn export_logs(&self, query: &AuditQuery) -> Result<String> {
        Ok(audit::export(&self.logs(query)?))
    }

    /// Export the full log and hand it to `mailer`.
    pub fn send_report(
        &self,
        request: &ReportRequest,
        mailer: &dyn ReportMailer,
    ) -> Result<Audited<ReportStatus>> {
        report::check_request(request)?;
        let entries = self.audit.query(&AuditQuery::default())?;
        let body = audit::export(&entries);
        let status = report::send(request, &body, entries.len(), mailer)?;

        let pending = match status {
            ReportStatus::Sent { entries } => {
                vec![events::report_sent(request.email.trim(), entries)]
            }
            ReportStatus::NotRequested => Vec::new(),
        };
        Ok(self.audited(status, pending))
    }

    // ── Internals ────────────────────────────────────────────────

    fn roots(&self, directory: Option<&Path>) -> Result<Vec<PathBuf>> {
        if let Some(directory) = directory {
            return Ok(vec![directory.to_path_buf()]);
        }
        let roots = self.settings.effective_roots();
        if roots.is_empty() {
            return Err(Error::validation(
                "no directory given and no default scan paths configured",
            ));
        }
        debug!("Scanning default roots: {:?}", roots);
        Ok(roots)
    }

    fn index(
        &self,
        directory: Option<&Path>,
        recursive: bool,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
        pending: &mut Vec<AuditEvent>,
    ) -> Result<Indexed> {
        let mut indexed = Indexed {
            roots: Vec::new(),
            records: Vec::new(),
            skipped: Vec::new(),
        };
        for root in self.roots(directory)? {
            let result =
                scanner::scan_directory(&root, recursive, &self.scan_options, cancel, reporter)?;
            pending.push(events::scanned(&result));
            pending.extend(result.skipped.iter().map(events::entry_skipped));

            indexed.roots.push(result.root);
            indexed.records.extend(result.records);
            indexed.skipped.extend(result.skipped);
        }
        Ok(indexed)
    }

    /// Deletions are confined to `allowed_roots`, or to the configured scan
    /// paths when none are set. Roots are canonical where possible, matching
    /// the paths the scanner reports.
    fn deletion_roots(&self) -> Vec<PathBuf> {
        let roots = if self.config.allowed_roots.is_empty() {
            self.settings.effective_roots()
        } else {
            self.config.allowed_roots.iter().map(PathBuf::from).collect()
        };
        roots
            .into_iter()
            .map(|root| fs::canonicalize(&root).unwrap_or(root))
            .collect()
    }

    /// On error, append the events already queued before handing it back.
    fn flush_on_error<T>(&self, result: Result<T>, pending: &mut Vec<AuditEvent>) -> Result<T> {
        if let Err(e) = &result {
            debug!("Recording {} queued audit events before error: {}", pending.len(), e);
            self.audited((), std::mem::take(pending));
        }
        result
    }

    fn audited<T>(&self, value: T, pending: Vec<AuditEvent>) -> Audited<T> {
        let audit_failures = pending
            .iter()
            .filter_map(|event| match self.audit.append(event) {
                Ok(_) => None,
                Err(e) => {
                    warn!("Audit append failed for {}: {}", event.action, e);
                    Some(format!("{} '{}': {}", event.action, event.details, e))
                }
            })
            .collect();
        Audited {
            value,
            audit_failures,
        }
    }
}

fn display_roots(roots: &[PathBuf]) -> String {
    roots
        .iter()
        .map(|r| r.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{GroupSelection, SelectionEntry};
    use crate::audit::ActionFilter;
    use crate::hasher::fingerprint_file;
    use crate::model::AuditAction;
    use crate::progress::SilentReporter;
    use tempfile::tempdir;

    fn janitor() -> Janitor {
        Janitor::in_memory(AppConfig::default()).unwrap()
    }

    #[test]
    fn test_scan_request_validation() {
        let janitor = janitor();
        let cancel = CancelToken::new();
        let blank = ScanRequest {
            directory_path: "  ".into(),
            recursive: false,
            operation: ScanOperation::CategorizeFiles,
        };
        assert!(matches!(
            janitor.run_scan(&blank, &cancel, &SilentReporter),
            Err(Error::Validation(_))
        ));

        let dir = tempdir().unwrap();
        let none = ScanRequest {
            directory_path: dir.path().display().to_string(),
            recursive: false,
            operation: ScanOperation::None,
        };
        assert!(matches!(
            janitor.run_scan(&none, &cancel, &SilentReporter),
            Err(Error::Validation(_))
        ));
        assert!(janitor.logs(&AuditQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn test_default_roots_required_when_no_directory() {
        let janitor = janitor();
        let err = janitor
            .find_duplicates(None, true, &CancelToken::new(), &SilentReporter)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_delete_duplicates_operation_only_reports() {
        let dir = tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(dir.path().join(name), "same").unwrap();
        }
        let janitor = janitor();
        let response = janitor
            .run_scan(
                &ScanRequest {
                    directory_path: dir.path().display().to_string(),
                    recursive: false,
                    operation: ScanOperation::DeleteDuplicates,
                },
                &CancelToken::new(),
                &SilentReporter,
            )
            .unwrap();
        assert!(response.is_fully_audited());
        assert_eq!(
            response.value.message,
            "Found 1 duplicate groups, 2 redundant files (8 bytes reclaimable)"
        );
        let left: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(left.len(), 3);
        let deletes = janitor
            .logs(&AuditQuery {
                action: ActionFilter::Only(AuditAction::Delete),
                date: None,
            })
            .unwrap();
        assert!(deletes.is_empty());
    }

    #[test]
    fn test_deletion_is_confined_to_scan_paths_by_default() {
        let inside = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("a.txt"), "same").unwrap();
        fs::write(outside.path().join("b.txt"), "same").unwrap();

        let janitor = janitor();
        janitor
            .update_config(&CleanerConfig {
                scan_paths: vec![inside.path().display().to_string()],
                rules: Vec::new(),
            })
            .unwrap();
        let cancel = CancelToken::new();
        let scan = janitor
            .find_duplicates(Some(outside.path()), false, &cancel, &SilentReporter)
            .unwrap()
            .into_inner();
        let mut selection = GroupSelection::from(&scan.groups[0]);
        selection.files[0].selected = true;
        let target = selection.files[0].path.clone();

        let report = janitor
            .delete_duplicates(
                &DeleteRequest {
                    duplicate_groups: vec![selection],
                },
                &cancel,
                &SilentReporter,
            )
            .into_inner();
        assert!(report.deleted.is_empty());
        assert_eq!(
            report.failed.get(&target).map(String::as_str),
            Some("path is outside the allowed roots")
        );
        assert!(target.exists());
    }

    #[test]
    fn test_forged_hash_is_refused_by_default() {
        let dir = tempdir().unwrap();
        let keep = dir.path().join("keep.txt");
        let victim = dir.path().join("victim.txt");
        fs::write(&keep, "one thing").unwrap();
        fs::write(&victim, "something else").unwrap();

        let janitor = janitor();
        let report = janitor
            .delete_duplicates(
                &DeleteRequest {
                    duplicate_groups: vec![GroupSelection {
                        hash: fingerprint_file(&keep).unwrap(),
                        files: vec![
                            SelectionEntry {
                                path: keep.clone(),
                                selected: false,
                            },
                            SelectionEntry {
                                path: victim.clone(),
                                selected: true,
                            },
                        ],
                    }],
                },
                &CancelToken::new(),
                &SilentReporter,
            )
            .into_inner();
        assert_eq!(
            report.failed.get(&victim).map(String::as_str),
            Some("content changed since scan")
        );
        assert!(victim.exists());
    }

    #[test]
    fn test_scan_entries_survive_cancelled_hashing() {
        struct CancelAfterScan(CancelToken);

        impl ProgressReporter for CancelAfterScan {
            fn on_scan_complete(&self, _total_files: usize, _duration_secs: f64) {
                self.0.cancel();
            }
        }

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "same").unwrap();
        fs::write(dir.path().join("b.txt"), "same").unwrap();
        let janitor = janitor();
        let cancel = CancelToken::new();

        let err = janitor
            .find_duplicates(Some(dir.path()), false, &cancel, &CancelAfterScan(cancel.clone()))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        let actions: Vec<AuditAction> = janitor
            .logs(&AuditQuery::default())
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Scan]);
    }
}
