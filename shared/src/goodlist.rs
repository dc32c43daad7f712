//! Baseline fingerprints and the in-memory goodlist index.
//!
//! A fingerprint is the exact MD5 of a canonical signature plus a CTPH
//! fuzzy digest of the same text. Matching is exact-only; the fuzzy digest
//! is stored for offline similarity work and never consulted at triage time.

use std::collections::HashSet;

use fuzzyhash::FuzzyHash;
use serde::{Deserialize, Serialize};

use crate::hash;

/// One goodlisted signature, as persisted in a goodlist collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub md5: String,
    pub fuzzy: String,
    pub canonical: String,
}

impl Fingerprint {
    pub fn of(canonical: &str) -> Self {
        Self {
            md5: hash::md5_hex(canonical.as_bytes()),
            fuzzy: FuzzyHash::new(canonical).to_string(),
            canonical: canonical.to_string(),
        }
    }
}

/// Exact-match goodlist, preloaded once per triage run so per-event checks
/// never touch the store.
#[derive(Debug, Default)]
pub struct GoodlistIndex {
    hashes: HashSet<String>,
}

impl GoodlistIndex {
    pub fn from_hashes(hashes: impl IntoIterator<Item = String>) -> Self {
        Self {
            hashes: hashes.into_iter().collect(),
        }
    }

    pub fn contains_hash(&self, md5: &str) -> bool {
        self.hashes.contains(md5)
    }

    pub fn contains_signature(&self, canonical: &str) -> bool {
        self.contains_hash(&hash::md5_hex(canonical.as_bytes()))
    }

    /// Records a signature locally. Returns true when it was not yet known,
    /// which is the caller's cue to persist it.
    pub fn remember(&mut self, canonical: &str) -> bool {
        self.hashes.insert(hash::md5_hex(canonical.as_bytes()))
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let sig = "open,/usr/libexec/trustd,/Library/Keychains/System.keychain,1";
        let first = Fingerprint::of(sig);
        let second = Fingerprint::of(sig);
        assert_eq!(first.md5, second.md5);
        assert_eq!(first.fuzzy, second.fuzzy);
        assert_eq!(first.canonical, sig);
    }

    #[test]
    fn test_index_matches_exact_only() {
        let sig = "write,/usr/bin/tar,/tmp/out.txt";
        let index = GoodlistIndex::from_hashes([Fingerprint::of(sig).md5]);
        assert!(index.contains_signature(sig));
        assert!(!index.contains_signature("write,/usr/bin/tar,/tmp/out2.txt"));
    }

    #[test]
    fn test_remember_is_idempotent() {
        let mut index = GoodlistIndex::default();
        assert!(index.remember("exit,/bin/ls,0"));
        assert!(!index.remember("exit,/bin/ls,0"));
        assert_eq!(index.len(), 1);
    }
}
