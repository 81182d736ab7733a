//! Append-only audit log.
//!
//! Components never write here themselves. Each operation's result is turned
//! into [`AuditEvent`]s by the constructors in [`events`], and the engine
//! appends them once the primary effect has committed.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{AuditAction, AuditEntry};
use crate::storage::Database;

/// An entry waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub details: String,
}

impl AuditEvent {
    pub fn new(action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            action,
            details: details.into(),
        }
    }
}

/// Backing storage for the audit log. Appends must be safe under concurrent
/// callers and assign a strictly increasing `id`.
pub trait AuditStore: Send + Sync {
    fn append(&self, action: AuditAction, details: &str) -> Result<AuditEntry>;

    /// Matching entries, newest first.
    fn query(&self, action: Option<AuditAction>, date: Option<NaiveDate>) -> Result<Vec<AuditEntry>>;
}

impl AuditStore for Database {
    fn append(&self, action: AuditAction, details: &str) -> Result<AuditEntry> {
        self.append_audit(action, details)
    }

    fn query(&self, action: Option<AuditAction>, date: Option<NaiveDate>) -> Result<Vec<AuditEntry>> {
        self.query_audit(action, date)
    }
}

/// Non-persistent store, for embedding and tests.
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
    next_id: AtomicI64,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, action: AuditAction, details: &str) -> Result<AuditEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = AuditEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            action,
            details: details.to_string(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    fn query(&self, action: Option<AuditAction>, date: Option<NaiveDate>) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let mut matching: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| action.map_or(true, |a| e.action == a))
            .filter(|e| date.map_or(true, |d| e.timestamp.date_naive() == d))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(matching)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActionFilter {
    #[default]
    All,
    Only(AuditAction),
}

impl FromStr for ActionFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("ALL") {
            return Ok(ActionFilter::All);
        }
        trimmed.parse().map(ActionFilter::Only)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub action: ActionFilter,
    /// UTC calendar day.
    pub date: Option<NaiveDate>,
}

impl AuditQuery {
    /// Builds a query from the raw `action` / `date` request parameters.
    /// `date` must be `YYYY-MM-DD`.
    pub fn parse(action: Option<&str>, date: Option<&str>) -> Result<Self> {
        let action = match action {
            Some(raw) => raw.parse()?,
            None => ActionFilter::All,
        };
        let date = match date.map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => Some(
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|e| Error::validation(format!("invalid date '{}': {}", raw, e)))?,
            ),
            None => None,
        };
        Ok(Self { action, date })
    }
}

pub struct AuditLog {
    store: Arc<dyn AuditStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn append(&self, event: &AuditEvent) -> Result<AuditEntry> {
        let entry = self.store.append(event.action, &event.details)?;
        debug!("Audit #{} [{}] {}", entry.id, entry.action, entry.details);
        Ok(entry)
    }

    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let action = match query.action {
            ActionFilter::All => None,
            ActionFilter::Only(action) => Some(action),
        };
        self.store.query(action, query.date)
    }
}

/// One line per entry: `<ISO-timestamp> [<ACTION>] <details>`.
pub fn export(entries: &[AuditEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{} [{}] {}\n",
            entry.timestamp.to_rfc3339(),
            entry.action,
            entry.details.replace('\n', " ")
        ));
    }
    out
}

#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    action: &'a str,
    details: &'a str,
}

pub fn export_csv<W: Write>(entries: &[AuditEntry], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for entry in entries {
        wtr.serialize(CsvRow {
            timestamp: entry.timestamp.to_rfc3339(),
            action: entry.action.as_str(),
            details: &entry.details,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Builders turning operation results into audit events.
pub mod events {
    use super::AuditEvent;
    use crate::actions::delete::GroupOutcome;
    use crate::actions::organize::MovedFile;
    use crate::analysis::{Categorization, UnreadableFile};
    use crate::model::AuditAction;
    use crate::rules::RuleChange;
    use crate::scanner::{ScanResult, SkippedEntry};

    pub fn scanned(result: &ScanResult) -> AuditEvent {
        AuditEvent::new(
            AuditAction::Scan,
            format!(
                "Scanned {} (recursive: {}): {} files",
                result.root.display(),
                result.recursive,
                result.records.len()
            ),
        )
    }

    pub fn entry_skipped(entry: &SkippedEntry) -> AuditEvent {
        AuditEvent::new(
            AuditAction::Info,
            format!("Skipped {}: {}", entry.path.display(), entry.reason),
        )
    }

    pub fn unreadable(file: &UnreadableFile) -> AuditEvent {
        AuditEvent::new(
            AuditAction::Info,
            format!("Could not fingerprint {}: {}", file.path.display(), file.reason),
        )
    }

    pub fn categorized(root: &str, categorization: &Categorization) -> AuditEvent {
        let counts: Vec<String> = categorization
            .counts()
            .into_iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect();
        AuditEvent::new(
            AuditAction::Categorize,
            format!("Categorized {}: {}", root, counts.join(", ")),
        )
    }

    pub fn group_deleted(outcome: &GroupOutcome) -> AuditEvent {
        let (deleted, failed, skipped) = outcome.counts();
        AuditEvent::new(
            AuditAction::Delete,
            format!(
                "Group {}: {} deleted, {} failed, {} skipped",
                outcome.hash, deleted, failed, skipped
            ),
        )
    }

    pub fn moved(file: &MovedFile) -> AuditEvent {
        AuditEvent::new(
            AuditAction::Move,
            format!(
                "Moved {} -> {} ({})",
                file.from.display(),
                file.to.display(),
                file.category
            ),
        )
    }

    pub fn rule_upserted(pattern: &str, category: &str, change: &RuleChange) -> AuditEvent {
        let details = match change {
            RuleChange::Inserted => format!("Added rule '{}' -> '{}'", pattern, category),
            RuleChange::Updated { previous } => format!(
                "Updated rule '{}': '{}' -> '{}'",
                pattern, previous, category
            ),
        };
        AuditEvent::new(AuditAction::RuleChange, details)
    }

    pub fn rule_removed(pattern: &str, removed: bool) -> AuditEvent {
        let details = if removed {
            format!("Removed rule '{}'", pattern)
        } else {
            format!("Remove rule '{}': not present", pattern)
        };
        AuditEvent::new(AuditAction::RuleChange, details)
    }

    pub fn config_updated(scan_paths: &[String]) -> AuditEvent {
        AuditEvent::new(
            AuditAction::ConfigChange,
            format!("Scan paths set to [{}]", scan_paths.join(", ")),
        )
    }

    pub fn report_sent(recipient: &str, entries: usize) -> AuditEvent {
        AuditEvent::new(
            AuditAction::Info,
            format!("Sent log export ({} entries) to {}", entries, recipient),
        )
    }
}
