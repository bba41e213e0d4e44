use sha2::{Digest, Sha256};
use std::path::Path;

/// Filesystem mtime granularity we tolerate when comparing fingerprints.
const MTIME_TOLERANCE_SECS: i64 = 1;

/// Stable identity for a file's bytes-of-interest, used as the cache key.
///
/// The digest covers `(file_path, size, mtime)`. The path is taken as-is
/// (absolute, platform-native separators, case preserved). When the file
/// cannot be stat'ed the fingerprint degrades to a digest over the path
/// alone and is marked non-cacheable.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub digest: String,
    pub file_size: u64,
    pub mtime_secs: i64,
    /// False when stat failed and the digest covers the path only.
    pub cacheable: bool,
}

impl Fingerprint {
    /// Compute the fingerprint for a file on disk.
    pub fn for_file(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => {
                let size = meta.len();
                let mtime = mtime_secs(&meta);
                Self::from_parts(path, size, mtime)
            }
            Err(e) => {
                log::debug!("stat failed for {}, degrading fingerprint: {e}", path.display());
                Self {
                    digest: digest_of(&[path.to_string_lossy().as_bytes()]),
                    file_size: 0,
                    mtime_secs: 0,
                    cacheable: false,
                }
            }
        }
    }

    /// Deterministic fingerprint from explicit parts. Same inputs produce
    /// the same digest across process restarts.
    pub fn from_parts(path: &Path, size: u64, mtime_secs: i64) -> Self {
        let digest = digest_of(&[
            path.to_string_lossy().as_bytes(),
            size.to_string().as_bytes(),
            mtime_secs.to_string().as_bytes(),
        ]);
        Self {
            digest,
            file_size: size,
            mtime_secs,
            cacheable: true,
        }
    }

    /// Whether a stored (size, mtime) pair still identifies the same content.
    /// The mtime comparison tolerates the filesystem's timestamp granularity.
    pub fn matches(&self, stored_size: u64, stored_mtime_secs: i64) -> bool {
        self.cacheable
            && self.file_size == stored_size
            && (self.mtime_secs - stored_mtime_secs).abs() <= MTIME_TOLERANCE_SECS
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn digest_of(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part);
    }
    let bytes = hasher.finalize();
    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        write!(hex, "{b:02x}").unwrap();
    }
    hex
}
