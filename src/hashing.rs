//! Content, manifest, and policy hashing (C8, §4.8). These hashes are the
//! trust-pin keys and the receipt keys, so their byte-level construction is
//! exact and must never change without bumping a version somewhere upstream.

use crate::model::{ManifestEntry, Policy, SkillBundle};
use sha2::{Digest, Sha256};

/// `content_sha256(bundle)`: sort `files` by `path`, hash `path\ncontent\n`
/// per file in that order.
pub fn content_sha256(bundle: &SkillBundle) -> String {
    let mut files: Vec<_> = bundle.files.iter().collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update(b"\n");
        hasher.update(file.content.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn flag_str(flag: bool) -> &'static str {
    if flag {
        "1"
    } else {
        "0"
    }
}

/// `manifest_sha256(bundle)`: sort `manifest` by `path`, hash a fixed-shape
/// record per entry. There is no separate per-file content hash field in
/// this data model (unlike the distillation's "sha?" placeholder, which
/// referred to a field this implementation does not carry) so that slot is
/// always empty — the content hash already covers file bytes.
pub fn manifest_sha256(bundle: &SkillBundle) -> String {
    let mut entries: Vec<&ManifestEntry> = bundle.manifest.iter().collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.path.as_bytes());
        hasher.update(b"\n");
        hasher.update(entry.size_bytes.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(b"\n"); // reserved sha slot, unused in this data model
        hasher.update(flag_str(entry.is_directory).as_bytes());
        hasher.update(b"\n");
        hasher.update(flag_str(entry.is_binary).as_bytes());
        hasher.update(b"\n");
        hasher.update(flag_str(entry.is_executable).as_bytes());
        hasher.update(b"\n");
        hasher.update(flag_str(entry.is_symlink).as_bytes());
        hasher.update(b"\n");
        hasher.update(flag_str(entry.is_archive).as_bytes());
        hasher.update(b"\n");
        let skipped = entry
            .skipped_reason
            .map(|r| format!("{r:?}"))
            .unwrap_or_default();
        hasher.update(skipped.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// `policy_sha256`: hex SHA-256 of the canonical (serde-serialized) JSON of
/// `Policy`. `serde_json` preserves struct field declaration order, which is
/// stable across runs for a fixed type, giving deterministic output.
pub fn policy_sha256(policy: &Policy) -> String {
    let canonical = serde_json::to_vec(policy).expect("Policy serialization cannot fail");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}
