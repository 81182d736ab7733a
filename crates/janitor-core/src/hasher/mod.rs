pub mod cache;
pub mod fingerprint;

pub use cache::HashCache;
pub use fingerprint::fingerprint_file;
