use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Process-level settings, read from `Janitor.toml` and `JANITOR_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: String,
    /// Size of the fingerprinting pool; 0 uses one worker per core.
    pub hash_workers: usize,
    /// Glob patterns excluded from every scan.
    pub ignore_patterns: Vec<String>,
    pub use_hash_cache: bool,
    /// Re-fingerprint each file right before deleting it.
    pub verify_before_delete: bool,
    /// Deletions outside these roots are refused. Empty falls back to the
    /// configured scan paths.
    pub allowed_roots: Vec<String>,
    /// Directory the CLI drops outgoing report messages into.
    pub outbox_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "janitor.db".to_string(),
            hash_workers: 0,
            ignore_patterns: Vec::new(),
            use_hash_cache: true,
            verify_before_delete: true,
            allowed_roots: Vec::new(),
            outbox_dir: "outbox".to_string(),
        }
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Janitor").required(false))
        .add_source(
            Environment::with_prefix("JANITOR")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ignore_patterns")
                .with_list_parse_key("allowed_roots"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
/// First occurrence order is preserved.
pub fn non_overlapping_directories<P: AsRef<Path>>(dirs: &[P]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        let dir_path = dir.as_ref();
        if result.iter().any(|kept| dir_path.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(dir_path));
        result.push(dir_path.to_path_buf());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = ["/home/user/photos", "/home/user/docs", "/var/data"];
        let result = non_overlapping_directories(&dirs);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0], PathBuf::from("/home/user/photos"));
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = ["/home/user/docs", "/home/user", "/var/data", "/var/data/x"];
        let result = non_overlapping_directories(&dirs);
        assert_eq!(
            result,
            vec![PathBuf::from("/home/user"), PathBuf::from("/var/data")]
        );
    }

    #[test]
    fn test_prefix_by_component_not_by_string() {
        let dirs = ["/data", "/database"];
        let result = non_overlapping_directories(&dirs);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, "janitor.db");
        assert!(config.use_hash_cache);
        assert!(config.verify_before_delete);
        assert!(config.allowed_roots.is_empty());
    }
}
