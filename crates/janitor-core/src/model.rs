use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

/// Bucket for files that no rule matched.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// A file discovered during one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Hex blake3 digest; only filled in by duplicate detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl FileRecord {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A duplicate group member as shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub selected: bool,
}

impl From<&FileRecord> for GroupMember {
    fn from(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            last_modified: record.last_modified,
            selected: false,
        }
    }
}

/// Two or more files sharing one content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub hash: String,
    pub size: u64,
    pub files: Vec<GroupMember>,
}

impl DuplicateGroup {
    pub fn wasted_bytes(&self) -> u64 {
        self.size * (self.files.len().saturating_sub(1)) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizationRule {
    #[serde(rename = "match")]
    pub pattern: String,
    pub category: String,
}

impl CategorizationRule {
    pub fn new(pattern: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            category: category.into(),
        }
    }

    /// Case-sensitive substring match against the file name.
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.contains(self.pattern.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBucket {
    pub name: String,
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanerConfig {
    pub scan_paths: Vec<String>,
    #[serde(default)]
    pub rules: Vec<CategorizationRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Scan,
    Delete,
    Move,
    Categorize,
    Info,
    RuleChange,
    ConfigChange,
}

impl AuditAction {
    pub const ALL: [AuditAction; 7] = [
        AuditAction::Scan,
        AuditAction::Delete,
        AuditAction::Move,
        AuditAction::Categorize,
        AuditAction::Info,
        AuditAction::RuleChange,
        AuditAction::ConfigChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Scan => "SCAN",
            AuditAction::Delete => "DELETE",
            AuditAction::Move => "MOVE",
            AuditAction::Categorize => "CATEGORIZE",
            AuditAction::Info => "INFO",
            AuditAction::RuleChange => "RULE_CHANGE",
            AuditAction::ConfigChange => "CONFIG_CHANGE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        AuditAction::ALL
            .into_iter()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| Error::validation(format!("unknown audit action '{}'", s)))
    }
}

/// One immutable audit log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub details: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanOperation {
    #[default]
    None,
    DeleteDuplicates,
    CategorizeFiles,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub directory_path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub operation: ScanOperation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub email: String,
    #[serde(default)]
    pub send_email: bool,
}
