use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::analysis::Categorization;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::UNCATEGORIZED;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedFile {
    pub from: PathBuf,
    pub to: PathBuf,
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeReport {
    pub moved: Vec<MovedFile>,
    pub failed: BTreeMap<PathBuf, String>,
    pub not_attempted: Vec<PathBuf>,
}

impl OrganizeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.not_attempted.is_empty()
    }
}

/// Move every categorized file into `<destination>/<category>/<file name>`.
///
/// `Uncategorized` files stay where they are. An occupied target is a
/// per-file failure; nothing is ever overwritten.
pub fn organize_files(
    categorization: &Categorization,
    destination: &Path,
    cancel: &CancelToken,
) -> Result<OrganizeReport> {
    if destination.as_os_str().is_empty() {
        return Err(Error::validation("destination must not be empty"));
    }
    fs::create_dir_all(destination).map_err(|e| Error::from_io(destination, e))?;

    let mut report = OrganizeReport::default();
    for bucket in &categorization.buckets {
        if bucket.name == UNCATEGORIZED {
            continue;
        }
        let folder = destination.join(folder_name(&bucket.name));

        for record in &bucket.files {
            if cancel.is_cancelled() {
                report.not_attempted.push(record.path.clone());
                continue;
            }
            let target = folder.join(record.file_name());
            match move_file(&record.path, &folder, &target) {
                Ok(()) => {
                    debug!("Moved '{}' -> '{}'", record.path.display(), target.display());
                    report.moved.push(MovedFile {
                        from: record.path.clone(),
                        to: target,
                        category: bucket.name.clone(),
                    });
                }
                Err(reason) => {
                    warn!("Could not move '{}': {}", record.path.display(), reason);
                    report.failed.insert(record.path.clone(), reason);
                }
            }
        }
    }

    info!(
        "Organized into {}: {} moved, {} failed, {} not attempted",
        destination.display(),
        report.moved.len(),
        report.failed.len(),
        report.not_attempted.len()
    );
    Ok(report)
}

/// Category labels are free text; keep them to a single path component.
fn folder_name(category: &str) -> String {
    let cleaned: String = category
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn move_file(from: &Path, folder: &Path, target: &Path) -> std::result::Result<(), String> {
    if from == target {
        return Err("already in place".to_string());
    }
    match fs::symlink_metadata(target) {
        Ok(_) => return Err(format!("destination '{}' already exists", target.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.to_string()),
    }
    fs::create_dir_all(folder).map_err(|e| e.to_string())?;

    match fs::rename(from, target) {
        Ok(()) => Ok(()),
        // Cross-device moves need a copy.
        Err(e) if e.kind() != ErrorKind::NotFound && e.kind() != ErrorKind::PermissionDenied => {
            debug!("rename failed ({}), falling back to copy", e);
            fs::copy(from, target).map_err(|e| e.to_string())?;
            if let Err(e) = fs::remove_file(from) {
                let _ = fs::remove_file(target);
                return Err(e.to_string());
            }
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}
