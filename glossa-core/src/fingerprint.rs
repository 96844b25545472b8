//! Content fingerprinting for change detection.
//!
//! A cheap, pure fingerprint over an artefact's name and content. The
//! sync engine compares fingerprints to decide whether a file needs a
//! push at all, before any staleness check against the remote store.
//!
//! FNV-1a was chosen over a cryptographic hash on purpose: collisions
//! only cost a redundant (idempotent) upsert, and the hash sits on the
//! per-keystroke debounce path.

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x100000001b3;

/// Hash a byte slice with FNV-1a.
fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    let mut h = hash;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Fingerprint an artefact's name and content.
///
/// A rename and a content edit both change the fingerprint. The name is
/// hashed with a separating NUL so that ("ab", "c") and ("a", "bc")
/// never collide trivially.
pub fn content_fingerprint(name: &str, content: &str) -> u64 {
    let h = fnv1a(FNV_OFFSET, name.as_bytes());
    let h = fnv1a(h, &[0]);
    fnv1a(h, content.as_bytes())
}

/// Last-known-synced identity of a file: its name and content hash.
///
/// The file sync engine keeps one of these per synced file id; a file
/// whose current fingerprint matches is already reflected remotely and
/// is skipped on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub name: String,
    pub hash: u64,
}

impl FileFingerprint {
    pub fn of(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            hash: content_fingerprint(name, content),
        }
    }

    /// Whether the given name/content still matches this fingerprint.
    pub fn matches(&self, name: &str, content: &str) -> bool {
        self.name == name && self.hash == content_fingerprint(name, content)
    }
}
