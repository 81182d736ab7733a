use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{trace, warn};

use super::fingerprint::{fingerprint_file, mtime_nanos};
use crate::storage::Database;

/// Persistent fingerprint cache keyed by path.
///
/// An entry is only trusted while the file's size and mtime (nanosecond
/// precision) are unchanged. Cache read or write failures degrade to a
/// fresh hash; they never fail the caller.
pub struct HashCache {
    db: Arc<Database>,
}

impl HashCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn fingerprint(&self, path: &Path) -> io::Result<String> {
        let key = path.to_string_lossy();
        let before = fs::metadata(path)?;
        let size = before.len();
        let mtime = mtime_nanos(&before)?;

        match self.db.cached_fingerprint(&key, size, mtime) {
            Ok(Some(digest)) => {
                trace!("Found hash for {} in cache", path.display());
                return Ok(digest);
            }
            Ok(None) => {}
            Err(e) => warn!("Hash cache lookup failed for {}: {}", path.display(), e),
        }

        let digest = fingerprint_file(path)?;

        // Only cache when the file did not change underneath the read.
        let after = fs::metadata(path)?;
        if after.len() == size && mtime_nanos(&after)? == mtime {
            if let Err(e) = self.db.store_fingerprint(&key, size, mtime, &digest) {
                warn!("Hash cache write failed for {}: {}", path.display(), e);
            }
        } else {
            trace!("{} changed while hashing, not caching", path.display());
        }
        Ok(digest)
    }

    pub fn invalidate(&self, path: &Path) {
        if let Err(e) = self.db.forget_fingerprint(&path.to_string_lossy()) {
            warn!("Hash cache invalidation failed for {}: {}", path.display(), e);
        }
    }

    pub fn len(&self) -> usize {
        self.db.count_cached_fingerprints().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> crate::Result<()> {
        self.db.clear_fingerprints()
    }
}
