//! # Cache Keys
//!
//! Maps URL strings to short hex digests. The digest is the disk file name,
//! so it has to be stable across runs; the memo only saves rehashing within
//! a session.

use md5::{Digest, Md5};
use moka::sync::Cache as MokaCache;

use crate::cache::types::CacheKey;

/// Memoizing URL to [`CacheKey`] transform.
#[derive(Clone)]
pub struct KeyTransformer {
    memo: MokaCache<String, CacheKey>,
}

impl KeyTransformer {
    pub fn new(capacity: u64) -> Self {
        Self {
            memo: MokaCache::new(capacity),
        }
    }

    /// Key for `url`. Identical strings always yield identical keys.
    pub fn key_for(&self, url: &str) -> CacheKey {
        if let Some(key) = self.memo.get(url) {
            return key;
        }

        let key = digest_key(url);
        self.memo.insert(url.to_owned(), key.clone());
        key
    }
}

impl Default for KeyTransformer {
    fn default() -> Self {
        Self::new(512)
    }
}

impl std::fmt::Debug for KeyTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyTransformer")
            .field("memoized", &self.memo.entry_count())
            .finish()
    }
}

/// Unmemoized digest of `url`.
pub fn digest_key(url: &str) -> CacheKey {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    let hash = hasher.finalize();
    CacheKey::new(format!("{hash:x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // md5("") is a well known constant
        assert_eq!(digest_key("").as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            digest_key("https://example.com/a.png").as_str().len(),
            32
        );
    }

    #[test]
    fn test_key_is_stable() {
        let transformer = KeyTransformer::new(16);
        let url = "https://example.com/images/cat.png?size=large";
        let first = transformer.key_for(url);
        for _ in 0..10 {
            assert_eq!(transformer.key_for(url), first);
        }
        // A fresh transformer (new session) agrees with the memoized value
        assert_eq!(KeyTransformer::new(16).key_for(url), first);
    }

    #[test]
    fn test_distinct_urls_distinct_keys() {
        let transformer = KeyTransformer::default();
        let a = transformer.key_for("https://example.com/a.png");
        let b = transformer.key_for("https://example.com/b.png");
        let c = transformer.key_for("https://example.com/a.png?");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_is_filename_safe() {
        let key = digest_key("https://example.com/../../etc/passwd");
        assert!(key.to_filename().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_memo_is_bounded() {
        let transformer = KeyTransformer::new(4);
        for i in 0..64 {
            transformer.key_for(&format!("https://example.com/{i}.png"));
        }
        transformer.memo.run_pending_tasks();
        assert!(transformer.memo.entry_count() <= 4);
    }
}
