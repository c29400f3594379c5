use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Number of hex characters kept from the digest (128 bits).
pub const CACHE_KEY_LEN: usize = 32;

/// Stable, fixed-length identifier derived from a file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps absolute paths to cache keys.
///
/// The raw path string is hashed as given; callers pass the canonical
/// absolute path they use everywhere else.
pub struct HashService;

impl HashService {
    pub fn new() -> Self {
        Self
    }

    pub fn cache_key(&self, path: &Path) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        CacheKey(digest[..CACHE_KEY_LEN].to_string())
    }
}

impl Default for HashService {
    fn default() -> Self {
        Self::new()
    }
}
