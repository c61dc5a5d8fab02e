//! Content-hash trust pinning (C9, §4.9). There is no signature here — a
//! bundle is "trusted" only as long as its content (and, if recorded, its
//! manifest) hashes to exactly what was pinned. Writes are atomic
//! (temp file + rename) so a crash mid-write can never corrupt the store.

use crate::hashing::{content_sha256, manifest_sha256};
use crate::model::{SkillBundle, TrustRecord, TrustStore, TRUST_STORE_CAP};
use std::io::Write as _;
use std::path::Path;

/// Loads the trust store at `path`. A missing file is an empty store, not
/// an error; a malformed file or an unrecognized `version` is also treated
/// as an empty store rather than surfaced as a hard failure, because the
/// store is a cache of prior approvals, not load-bearing state.
pub fn load_trust_store(path: &Path) -> TrustStore {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return TrustStore::default();
    };
    match serde_json::from_str::<TrustStore>(&raw) {
        Ok(store) if store.version == 1 => store,
        _ => TrustStore::default(),
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    Ok(())
}

pub fn save_trust_store(path: &Path, store: &TrustStore) -> anyhow::Result<()> {
    let serialized = serde_json::to_vec_pretty(store)?;
    atomic_write(path, &serialized)?;
    Ok(())
}

/// Adds (or refreshes) a trust record for `bundle`, keyed by content hash.
/// Records are kept newest-first and capped at `TRUST_STORE_CAP`, evicting
/// the oldest record once the cap is exceeded.
pub fn add_trust_record(
    store: &mut TrustStore,
    bundle: &SkillBundle,
    source_input: &str,
    created_at: String,
    pin_manifest: bool,
) {
    let content_hash = content_sha256(bundle);
    store.records.retain(|r| r.content_sha256 != content_hash);

    store.records.insert(
        0,
        TrustRecord {
            content_sha256: content_hash,
            manifest_sha256: if pin_manifest {
                Some(manifest_sha256(bundle))
            } else {
                None
            },
            source_input: source_input.to_string(),
            created_at,
        },
    );

    if store.records.len() > TRUST_STORE_CAP {
        store.records.truncate(TRUST_STORE_CAP);
    }
}

pub fn remove_trust_by_hash(store: &mut TrustStore, content_hash: &str) -> bool {
    let before = store.records.len();
    store.records.retain(|r| r.content_sha256 != content_hash);
    store.records.len() != before
}

/// A bundle is trusted iff some record's `content_sha256` matches and,
/// when that record also pinned a `manifest_sha256`, the bundle's current
/// manifest hash still matches it too (§4.9).
pub fn trust_status_for_bundle(store: &TrustStore, bundle: &SkillBundle) -> bool {
    let content_hash = content_sha256(bundle);
    store.records.iter().any(|record| {
        record.content_sha256 == content_hash
            && match &record.manifest_sha256 {
                None => true,
                Some(pinned) => *pinned == manifest_sha256(bundle),
            }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BundleFile, SourceTag};

    fn bundle(content: &str) -> SkillBundle {
        SkillBundle {
            id: "t".to_string(),
            source: SourceTag::Local,
            version: None,
            entrypoint: "SKILL.md".to_string(),
            files: vec![BundleFile {
                path: "SKILL.md".to_string(),
                content: content.to_string(),
            }],
            manifest: Vec::new(),
            ingest_warnings: Vec::new(),
        }
    }

    #[test]
    fn missing_store_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = load_trust_store(&dir.path().join("trust.json"));
        assert!(store.records.is_empty());
    }

    #[test]
    fn malformed_store_loads_as_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        std::fs::write(&path, "not json").unwrap();
        let store = load_trust_store(&path);
        assert!(store.records.is_empty());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        let mut store = TrustStore::default();
        let b = bundle("hello");
        add_trust_record(&mut store, &b, "local:/tmp/skill", "2026-01-01T00:00:00Z".to_string(), false);
        save_trust_store(&path, &store).unwrap();

        let reloaded = load_trust_store(&path);
        assert!(trust_status_for_bundle(&reloaded, &b));
    }

    #[test]
    fn manifest_pin_detects_tampering() {
        let mut store = TrustStore::default();
        let mut b = bundle("hello");
        add_trust_record(&mut store, &b, "local:/tmp/skill", "2026-01-01T00:00:00Z".to_string(), true);
        assert!(trust_status_for_bundle(&store, &b));

        b.manifest.push(crate::model::ManifestEntry {
            path: "new.md".to_string(),
            raw_path: None,
            size_bytes: 1,
            is_directory: false,
            is_symlink: false,
            is_executable: false,
            is_binary: false,
            is_archive: false,
            source_kind: crate::model::SourceKind::Dir,
            skipped_reason: None,
        });
        assert!(!trust_status_for_bundle(&store, &b));
    }

    #[test]
    fn remove_by_hash_drops_the_record() {
        let mut store = TrustStore::default();
        let b = bundle("hello");
        add_trust_record(&mut store, &b, "x", "2026-01-01T00:00:00Z".to_string(), false);
        let hash = content_sha256(&b);
        assert!(remove_trust_by_hash(&mut store, &hash));
        assert!(!trust_status_for_bundle(&store, &b));
    }

    #[test]
    fn cap_evicts_oldest_record() {
        let mut store = TrustStore {
            version: 1,
            records: Vec::new(),
        };
        for i in 0..(TRUST_STORE_CAP + 5) {
            let b = bundle(&format!("file-{i}"));
            add_trust_record(&mut store, &b, "x", "2026-01-01T00:00:00Z".to_string(), false);
        }
        assert_eq!(store.records.len(), TRUST_STORE_CAP);
    }
}
