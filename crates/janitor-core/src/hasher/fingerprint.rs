use std::fs::{File, Metadata};
use std::io::{self, ErrorKind, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::trace;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Streaming blake3 digest of a file's full contents, as lowercase hex.
///
/// Reads in fixed-size chunks so peak memory does not depend on file size.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total_bytes: u64 = 0;

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
        total_bytes += bytes_read as u64;
    }

    let hash = hasher.finalize().to_hex().to_string();
    trace!("Fingerprinted '{}' ({} bytes): {}", path.display(), total_bytes, hash);
    Ok(hash)
}

/// Modification time in nanoseconds since the epoch, used as a cache key part.
/// Times before 1970 come out negative.
pub fn mtime_nanos(metadata: &Metadata) -> io::Result<i64> {
    let modified = metadata.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i64,
        Err(before) => -(before.duration().as_nanos() as i64),
    })
}
