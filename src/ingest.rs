//! Source ingest (C3, §4.3): turn a directory, local archive, or URL into a
//! bounded, in-memory `SkillBundle`. Nothing here ever spawns a process or
//! evaluates the content it reads.

use crate::archive::{Archive, ExtractOutcome};
use crate::config::Limits;
use crate::error::IngestError;
use crate::model::{BundleFile, ManifestEntry, SkillBundle, SkippedReason, SourceKind, SourceTag};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const SKIP_DIR_NAMES: &[&str] = &[".git", "node_modules", "dist", "build", ".pnpm"];
const MAX_WALK_DEPTH: u32 = 8;
const TEXT_EXTENSIONS: &[&str] = &[
    ".md", ".markdown", ".txt", ".sh", ".bash", ".zsh", ".ps1", ".py", ".js", ".mjs", ".ts",
    ".json", ".toml", ".yaml", ".yml",
];
const BINARY_SNIFF_WINDOW: usize = 4096;

fn has_text_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    TEXT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn is_archive_extension(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".zip")
}

/// Declares a byte buffer "binary" if it contains a NUL byte, or if more
/// than 20% of its first 4 KiB are control bytes outside `\t\n\r` (§4.3).
fn sniff_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(BINARY_SNIFF_WINDOW)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0u8) {
        return true;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 9 || (b > 13 && b < 32))
        .count();
    (control as f64 / sample.len() as f64) > 0.20
}

fn to_forward_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn derive_id(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    Path::new(raw)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| raw.to_string())
}

fn pick_entrypoint(files: &[BundleFile]) -> String {
    if files.iter().any(|f| f.path == "SKILL.md") {
        "SKILL.md".to_string()
    } else if let Some(first) = files.first() {
        first.path.clone()
    } else {
        "SKILL.md".to_string()
    }
}

struct WalkBudget {
    files: Vec<BundleFile>,
    manifest: Vec<ManifestEntry>,
    warnings: Vec<String>,
    seen_entries: u64,
    loaded_bytes: u64,
    stopped: bool,
}

impl WalkBudget {
    fn new() -> Self {
        Self {
            files: Vec::new(),
            manifest: Vec::new(),
            warnings: Vec::new(),
            seen_entries: 0,
            loaded_bytes: 0,
            stopped: false,
        }
    }
}

fn walk_directory(root: &Path, limits: &Limits) -> Result<WalkBudget, IngestError> {
    let mut budget = WalkBudget::new();
    let mut stack: Vec<(PathBuf, u32)> = vec![(root.to_path_buf(), 0)];

    'outer: while let Some((current, depth)) = stack.pop() {
        if budget.stopped {
            break;
        }
        let mut children: Vec<PathBuf> = match std::fs::read_dir(&current) {
            Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(err) => {
                return Err(IngestError::Unreadable {
                    source_input: current.display().to_string(),
                    cause: err.to_string(),
                });
            }
        };
        children.sort();

        for child in children {
            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rel = to_forward_slash(child.strip_prefix(root).unwrap_or(&child));

            let Ok(meta) = std::fs::symlink_metadata(&child) else {
                continue;
            };

            if meta.file_type().is_symlink() {
                if budget.seen_entries >= limits.max_files {
                    budget
                        .warnings
                        .push(format!("maxFiles reached ({})", limits.max_files));
                    budget.stopped = true;
                    break 'outer;
                }
                budget.seen_entries += 1;
                budget.manifest.push(ManifestEntry {
                    path: rel,
                    raw_path: None,
                    size_bytes: 0,
                    is_directory: false,
                    is_symlink: true,
                    is_executable: false,
                    is_binary: false,
                    is_archive: false,
                    source_kind: SourceKind::Dir,
                    skipped_reason: Some(SkippedReason::SymlinkSkipped),
                });
                continue;
            }

            if meta.is_dir() {
                if SKIP_DIR_NAMES.contains(&name.as_str()) {
                    continue;
                }
                if depth + 1 <= MAX_WALK_DEPTH {
                    stack.push((child.clone(), depth + 1));
                }
                continue;
            }

            if budget.seen_entries >= limits.max_files {
                budget
                    .warnings
                    .push(format!("maxFiles reached ({})", limits.max_files));
                budget.stopped = true;
                break 'outer;
            }
            budget.seen_entries += 1;

            let size_bytes = meta.len();
            let is_archive = is_archive_extension(&rel);

            if !has_text_extension(&rel) {
                budget.manifest.push(ManifestEntry {
                    path: rel,
                    raw_path: None,
                    size_bytes,
                    is_directory: false,
                    is_symlink: false,
                    is_executable: false,
                    is_binary: false,
                    is_archive,
                    source_kind: SourceKind::Dir,
                    skipped_reason: None,
                });
                continue;
            }

            if size_bytes > limits.max_file_bytes {
                budget.warnings.push(format!(
                    "skipped {rel}: exceeds maxFileBytes ({})",
                    limits.max_file_bytes
                ));
                budget.manifest.push(ManifestEntry {
                    path: rel,
                    raw_path: None,
                    size_bytes,
                    is_directory: false,
                    is_symlink: false,
                    is_executable: false,
                    is_binary: false,
                    is_archive,
                    source_kind: SourceKind::Dir,
                    skipped_reason: Some(SkippedReason::TooLarge),
                });
                continue;
            }

            if budget.loaded_bytes + size_bytes > limits.max_total_bytes {
                budget
                    .warnings
                    .push(format!("maxTotalBytes reached ({})", limits.max_total_bytes));
                budget.manifest.push(ManifestEntry {
                    path: rel,
                    raw_path: None,
                    size_bytes,
                    is_directory: false,
                    is_symlink: false,
                    is_executable: false,
                    is_binary: false,
                    is_archive,
                    source_kind: SourceKind::Dir,
                    skipped_reason: Some(SkippedReason::TooLarge),
                });
                budget.stopped = true;
                break 'outer;
            }

            let bytes = std::fs::read(&child).unwrap_or_default();
            let is_binary = sniff_binary(&bytes);
            if is_binary {
                budget.manifest.push(ManifestEntry {
                    path: rel,
                    raw_path: None,
                    size_bytes,
                    is_directory: false,
                    is_symlink: false,
                    is_executable: false,
                    is_binary: true,
                    is_archive,
                    source_kind: SourceKind::Dir,
                    skipped_reason: Some(SkippedReason::Binary),
                });
                continue;
            }

            budget.loaded_bytes += size_bytes;
            budget.manifest.push(ManifestEntry {
                path: rel.clone(),
                raw_path: None,
                size_bytes,
                is_directory: false,
                is_symlink: false,
                is_executable: false,
                is_binary: false,
                is_archive,
                source_kind: SourceKind::Dir,
                skipped_reason: None,
            });
            budget.files.push(BundleFile {
                path: rel,
                content: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
    }

    Ok(budget)
}

fn ingest_archive_bytes(
    bytes: &[u8],
    limits: &Limits,
    source_input: &str,
) -> Result<(Vec<BundleFile>, Vec<ManifestEntry>, Vec<String>), IngestError> {
    if bytes.len() as u64 > limits.max_zip_bytes {
        return Err(IngestError::ArchiveTooLarge {
            source_input: source_input.to_string(),
            max_bytes: limits.max_zip_bytes,
        });
    }

    let archive = Archive::parse(bytes).map_err(|source| IngestError::Archive {
        source_input: source_input.to_string(),
        source,
    })?;

    let selected: HashSet<usize> = archive
        .select_for_scan(
            limits.max_zip_entry_bytes,
            limits.max_total_bytes,
            limits.max_files as usize,
        )
        .into_iter()
        .collect();

    let mut files = Vec::new();
    let mut manifest = Vec::new();
    let mut warnings = Vec::new();

    for (idx, entry) in archive.entries.iter().enumerate() {
        let Some(name) = entry.name.clone() else {
            manifest.push(ManifestEntry {
                path: entry.raw_name.clone(),
                raw_path: Some(entry.raw_name.clone()),
                size_bytes: entry.uncompressed_size,
                is_directory: entry.is_directory,
                is_symlink: entry.is_symlink,
                is_executable: entry.is_executable,
                is_binary: false,
                is_archive: is_archive_extension(&entry.raw_name),
                source_kind: SourceKind::Zip,
                skipped_reason: Some(SkippedReason::InvalidPath),
            });
            continue;
        };

        if entry.is_directory {
            manifest.push(ManifestEntry {
                path: name,
                raw_path: None,
                size_bytes: 0,
                is_directory: true,
                is_symlink: false,
                is_executable: false,
                is_binary: false,
                is_archive: false,
                source_kind: SourceKind::Zip,
                skipped_reason: None,
            });
            continue;
        }

        if entry.is_symlink {
            manifest.push(ManifestEntry {
                path: name,
                raw_path: None,
                size_bytes: entry.uncompressed_size,
                is_directory: false,
                is_symlink: true,
                is_executable: entry.is_executable,
                is_binary: false,
                is_archive: false,
                source_kind: SourceKind::Zip,
                skipped_reason: Some(SkippedReason::SymlinkSkipped),
            });
            continue;
        }

        if entry.uncompressed_size > limits.max_zip_entry_bytes {
            manifest.push(ManifestEntry {
                path: name,
                raw_path: None,
                size_bytes: entry.uncompressed_size,
                is_directory: false,
                is_symlink: false,
                is_executable: entry.is_executable,
                is_binary: false,
                is_archive: is_archive_extension(&entry.raw_name),
                source_kind: SourceKind::Zip,
                skipped_reason: Some(SkippedReason::TooLarge),
            });
            continue;
        }

        if !selected.contains(&idx) {
            manifest.push(ManifestEntry {
                path: name,
                raw_path: None,
                size_bytes: entry.uncompressed_size,
                is_directory: false,
                is_symlink: false,
                is_executable: entry.is_executable,
                is_binary: false,
                is_archive: is_archive_extension(&entry.raw_name),
                source_kind: SourceKind::Zip,
                skipped_reason: None,
            });
            continue;
        }

        match archive.extract(idx, limits.max_zip_entry_bytes) {
            Ok(ExtractOutcome::Unsupported) => {
                manifest.push(ManifestEntry {
                    path: name,
                    raw_path: None,
                    size_bytes: entry.uncompressed_size,
                    is_directory: false,
                    is_symlink: false,
                    is_executable: entry.is_executable,
                    is_binary: false,
                    is_archive: is_archive_extension(&entry.raw_name),
                    source_kind: SourceKind::Zip,
                    skipped_reason: Some(SkippedReason::UnsupportedCompression),
                });
            }
            Ok(ExtractOutcome::Data(data)) => {
                let is_binary = sniff_binary(&data);
                let is_archive = is_archive_extension(&entry.raw_name);
                if is_binary {
                    manifest.push(ManifestEntry {
                        path: name,
                        raw_path: None,
                        size_bytes: entry.uncompressed_size,
                        is_directory: false,
                        is_symlink: false,
                        is_executable: entry.is_executable,
                        is_binary: true,
                        is_archive,
                        source_kind: SourceKind::Zip,
                        skipped_reason: Some(SkippedReason::Binary),
                    });
                } else if has_text_extension(&name) {
                    manifest.push(ManifestEntry {
                        path: name.clone(),
                        raw_path: None,
                        size_bytes: entry.uncompressed_size,
                        is_directory: false,
                        is_symlink: false,
                        is_executable: entry.is_executable,
                        is_binary: false,
                        is_archive,
                        source_kind: SourceKind::Zip,
                        skipped_reason: None,
                    });
                    files.push(BundleFile {
                        path: name,
                        content: String::from_utf8_lossy(&data).into_owned(),
                    });
                } else {
                    manifest.push(ManifestEntry {
                        path: name,
                        raw_path: None,
                        size_bytes: entry.uncompressed_size,
                        is_directory: false,
                        is_symlink: false,
                        is_executable: entry.is_executable,
                        is_binary: false,
                        is_archive,
                        source_kind: SourceKind::Zip,
                        skipped_reason: None,
                    });
                }
            }
            Err(_) => {
                warnings.push(format!("failed to extract {name}: corrupt archive data"));
            }
        }
    }

    Ok((files, manifest, warnings))
}

fn archive_mode(raw: &str, path: &Path, limits: &Limits) -> Result<SkillBundle, IngestError> {
    let bytes = std::fs::read(path).map_err(|err| IngestError::Unreadable {
        source_input: raw.to_string(),
        cause: err.to_string(),
    })?;
    let (files, manifest, ingest_warnings) = ingest_archive_bytes(&bytes, limits, raw)?;
    Ok(SkillBundle {
        id: derive_id(raw),
        source: SourceTag::Local,
        version: None,
        entrypoint: pick_entrypoint(&files),
        files,
        manifest,
        ingest_warnings,
    })
}

fn directory_mode(raw: &str, path: &Path, limits: &Limits) -> Result<SkillBundle, IngestError> {
    let budget = walk_directory(path, limits)?;
    Ok(SkillBundle {
        id: derive_id(raw),
        source: SourceTag::Local,
        version: None,
        entrypoint: pick_entrypoint(&budget.files),
        files: budget.files,
        manifest: budget.manifest,
        ingest_warnings: budget.warnings,
    })
}

fn url_mode(raw: &str, limits: &Limits) -> Result<SkillBundle, IngestError> {
    let (bytes, content_type) =
        crate::transport::fetch(raw, limits).map_err(|source| IngestError::Transport {
            source_input: raw.to_string(),
            source,
        })?;

    let looks_like_zip = content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase().contains("zip"))
        .unwrap_or(false)
        || bytes.starts_with(b"PK\x03\x04");

    if looks_like_zip {
        let (files, manifest, ingest_warnings) = ingest_archive_bytes(&bytes, limits, raw)?;
        return Ok(SkillBundle {
            id: derive_id(raw),
            source: SourceTag::Unknown,
            version: None,
            entrypoint: pick_entrypoint(&files),
            files,
            manifest,
            ingest_warnings,
        });
    }

    if sniff_binary(&bytes) {
        return Ok(SkillBundle {
            id: derive_id(raw),
            source: SourceTag::Unknown,
            version: None,
            entrypoint: "SKILL.md".to_string(),
            files: Vec::new(),
            manifest: Vec::new(),
            ingest_warnings: vec![
                "remote body looked binary and was not a recognized archive; no files loaded"
                    .to_string(),
            ],
        });
    }

    let content = String::from_utf8_lossy(&bytes).into_owned();
    let file = BundleFile {
        path: "SKILL.md".to_string(),
        content: content.clone(),
    };
    Ok(SkillBundle {
        id: derive_id(raw),
        source: SourceTag::Unknown,
        version: None,
        entrypoint: "SKILL.md".to_string(),
        manifest: vec![ManifestEntry {
            path: "SKILL.md".to_string(),
            raw_path: None,
            size_bytes: content.len() as u64,
            is_directory: false,
            is_symlink: false,
            is_executable: false,
            is_binary: false,
            is_archive: false,
            source_kind: SourceKind::Dir,
            skipped_reason: None,
        }],
        files: vec![file],
        ingest_warnings: Vec::new(),
    })
}

pub fn build_skill_bundle_from_source(raw: &str, limits: &Limits) -> Result<SkillBundle, IngestError> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return url_mode(raw, limits);
    }

    let path = Path::new(raw);
    if path.is_dir() {
        return directory_mode(raw, path, limits);
    }
    if path.is_file() {
        return archive_mode(raw, path, limits);
    }

    Err(IngestError::Unreadable {
        source_input: raw.to_string(),
        cause: "path does not exist".to_string(),
    })
}
