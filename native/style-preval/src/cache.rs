//! Evaluation cache: previously computed export bags keyed by module
//! identity and exact source text.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Identity is `[path, ...requested members]`. The exact text is part of the
/// key, so equality never depends on a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvalCacheKey {
    identity: Vec<String>,
    text: String,
}

impl EvalCacheKey {
    pub fn new(identity: Vec<String>, text: &str) -> Self {
        Self {
            identity,
            text: text.to_string(),
        }
    }

    pub fn identity(&self) -> &[String] {
        &self.identity
    }
}

pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
pub struct EvalCache<V> {
    entries: HashMap<EvalCacheKey, V>,
}

impl<V> Default for EvalCache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> EvalCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EvalCacheKey) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: EvalCacheKey, value: V) {
        self.entries.insert(key, value);
    }

    /// Clear-all.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Clear-for-identity: drop every entry computed for `path`.
    pub fn clear_for(&mut self, path: &str) {
        self.entries
            .retain(|key, _| key.identity.first().map(String::as_str) != Some(path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(identity: &[&str], text: &str) -> EvalCacheKey {
        EvalCacheKey::new(identity.iter().map(|s| s.to_string()).collect(), text)
    }

    #[test]
    fn test_key_depends_on_text_and_members() {
        let mut cache = EvalCache::new();
        cache.insert(key(&["/a.js", "__preval"], "x"), 1);

        assert_eq!(cache.get(&key(&["/a.js", "__preval"], "x")), Some(&1));
        assert_eq!(cache.get(&key(&["/a.js", "__preval"], "y")), None);
        assert_eq!(cache.get(&key(&["/a.js"], "x")), None);
    }

    #[test]
    fn test_clear_for_identity() {
        let mut cache = EvalCache::new();
        cache.insert(key(&["/a.js"], "1"), "a");
        cache.insert(key(&["/a.js", "__preval"], "2"), "a-preval");
        cache.insert(key(&["/b.js"], "3"), "b");

        cache.clear_for("/a.js");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(&["/b.js"], "3")), Some(&"b"));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(compute_hash("abc"), compute_hash("abc"));
        assert_ne!(compute_hash("abc"), compute_hash("abd"));
        assert_eq!(compute_hash("").len(), 64);
    }
}
