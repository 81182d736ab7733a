use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::config::non_overlapping_directories;
use crate::error::{Error, Result};
use crate::model::CleanerConfig;
use crate::rules::RuleStore;
use crate::storage::Database;

/// Persistent default scan paths.
pub struct ConfigStore {
    db: Arc<Database>,
    scan_paths: RwLock<Vec<String>>,
}

impl ConfigStore {
    pub fn load(db: Arc<Database>) -> Result<Self> {
        let scan_paths = db.load_scan_paths()?;
        debug!("Loaded {} default scan paths", scan_paths.len());
        Ok(Self {
            db,
            scan_paths: RwLock::new(scan_paths),
        })
    }

    pub fn scan_paths(&self) -> Vec<String> {
        self.scan_paths
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Current config; `rules` is a read-only copy of the rule store.
    pub fn get(&self, rules: &RuleStore) -> CleanerConfig {
        CleanerConfig {
            scan_paths: self.scan_paths(),
            rules: rules.list(),
        }
    }

    /// Replace the scan path list wholesale. Any `rules` in `new_config` are
    /// ignored; rules change only through the rule store.
    pub fn update(&self, new_config: &CleanerConfig, rules: &RuleStore) -> Result<CleanerConfig> {
        validate_scan_paths(&new_config.scan_paths)?;

        let mut guard = self.scan_paths.write().unwrap_or_else(|p| p.into_inner());
        self.db.replace_scan_paths(&new_config.scan_paths)?;
        *guard = new_config.scan_paths.clone();
        drop(guard);

        info!("Scan paths replaced: {:?}", new_config.scan_paths);
        Ok(self.get(rules))
    }

    /// Default scan roots with nested entries collapsed into their ancestors.
    pub fn effective_roots(&self) -> Vec<PathBuf> {
        non_overlapping_directories(&self.scan_paths())
    }
}

fn validate_scan_paths(paths: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for path in paths {
        if path.trim().is_empty() {
            return Err(Error::validation("scan paths must not be empty"));
        }
        if !seen.insert(path.as_str()) {
            return Err(Error::validation(format!("duplicate scan path '{}'", path)));
        }
    }
    Ok(())
}
