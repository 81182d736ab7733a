use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::hasher::{fingerprint_file, HashCache};
use crate::model::{DuplicateGroup, FileRecord, GroupMember};
use crate::progress::ProgressReporter;

const PROGRESS_EVERY: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct GroupingOptions {
    /// Fingerprinting pool size; 0 lets rayon pick one worker per core.
    pub workers: usize,
}

/// A file that could not be read while fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadableFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct GroupingResult {
    /// Ordered by the discovery index of each group's first member.
    pub groups: Vec<DuplicateGroup>,
    pub unreadable: Vec<UnreadableFile>,
    pub files_hashed: usize,
    /// The input records in input order, `fingerprint` set for every file
    /// that could be read.
    pub records: Vec<FileRecord>,
}

impl GroupingResult {
    pub fn duplicate_files(&self) -> usize {
        self.groups.iter().map(|g| g.files.len() - 1).sum()
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.groups.iter().map(DuplicateGroup::wasted_bytes).sum()
    }
}

/// Fingerprint every record on a bounded pool and group by digest.
///
/// Workers only fill a digest → discovery-index map; ordering is rebuilt
/// afterwards, so results do not depend on completion order. Groups with a
/// single member are dropped.
pub fn group_duplicates(
    records: &[FileRecord],
    options: &GroupingOptions,
    cache: Option<&HashCache>,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<GroupingResult> {
    info!("Fingerprinting {} files...", records.len());
    let start = Instant::now();
    reporter.on_hash_start(records.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .thread_name(|i| format!("fingerprint-{}", i))
        .build()
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;

    let digest_to_indices: DashMap<String, Vec<usize>> = DashMap::new();
    let unreadable: Mutex<Vec<(usize, UnreadableFile)>> = Mutex::new(Vec::new());
    let processed = AtomicUsize::new(0);

    pool.install(|| {
        records
            .par_iter()
            .enumerate()
            .try_for_each(|(index, record)| {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let digest = match cache {
                    Some(cache) => cache.fingerprint(&record.path),
                    None => fingerprint_file(&record.path),
                };
                match digest {
                    Ok(digest) => digest_to_indices.entry(digest).or_default().push(index),
                    Err(e) => {
                        error!("Error fingerprinting '{}': {}", record.path.display(), e);
                        let file = UnreadableFile {
                            path: record.path.clone(),
                            reason: e.to_string(),
                        };
                        unreadable
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .push((index, file));
                    }
                }
                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_EVERY == 0 || done == records.len() {
                    reporter.on_hash_progress(done, records.len());
                }
                Ok(())
            })
    })?;

    let mut fingerprinted = records.to_vec();
    let mut grouped: Vec<(String, Vec<usize>)> = Vec::new();
    for (digest, mut indices) in digest_to_indices {
        for &i in &indices {
            fingerprinted[i].fingerprint = Some(digest.clone());
        }
        if indices.len() > 1 {
            indices.sort_unstable();
            grouped.push((digest, indices));
        }
    }
    grouped.sort_by_key(|(_, indices)| indices[0]);

    let groups: Vec<DuplicateGroup> = grouped
        .into_iter()
        .map(|(hash, indices)| DuplicateGroup {
            hash,
            size: records[indices[0]].size,
            files: indices
                .iter()
                .map(|&i| GroupMember::from(&fingerprinted[i]))
                .collect(),
        })
        .collect();

    let mut unreadable = unreadable.into_inner().unwrap_or_else(|p| p.into_inner());
    unreadable.sort_by_key(|(index, _)| *index);
    let unreadable: Vec<UnreadableFile> = unreadable.into_iter().map(|(_, f)| f).collect();

    let duration = start.elapsed();
    reporter.on_hash_complete(groups.len(), duration.as_secs_f64());
    let result = GroupingResult {
        files_hashed: records.len() - unreadable.len(),
        groups,
        records: fingerprinted,
        unreadable,
    };
    debug!(
        "Fingerprinting completed in {:.2}s: {} groups, {} unreadable",
        duration.as_secs_f64(),
        result.groups.len(),
        result.unreadable.len()
    );
    info!(
        "{} duplicate groups, {} redundant files, {} bytes reclaimable",
        result.groups.len(),
        result.duplicate_files(),
        result.wasted_bytes()
    );
    Ok(result)
}
