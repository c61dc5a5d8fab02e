//! Memory-only pkzip reader (C2, §4.2). Deliberately hand-rolled rather than
//! built on an off-the-shelf zip crate: the fields this reader exposes
//! (`local_header_offset`, raw `external_attrs`, per-entry non-fatal
//! "unsupported compression method") are narrower and more explicit than a
//! general-purpose zip API. Only the deflate codec itself is borrowed, from
//! `flate2`, since hand-writing inflate buys nothing.

use crate::error::ArchiveError;
use std::io::Read;

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const CENTRAL_DIR_SIGNATURE: u32 = 0x0201_4b50;
const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const EOCD_FIXED_SIZE: usize = 22;
const CENTRAL_DIR_FIXED_SIZE: usize = 46;
const LOCAL_HEADER_FIXED_SIZE: usize = 30;
const MAX_COMMENT_LEN: usize = 65_535;

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub raw_name: String,
    /// `Some(normalized)` iff `raw_name` passed path sanitization.
    pub name: Option<String>,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub local_header_offset: u64,
    pub external_attrs: u32,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub is_executable: bool,
}

pub enum ExtractOutcome {
    Data(Vec<u8>),
    Unsupported,
}

pub struct Archive<'a> {
    data: &'a [u8],
    pub entries: Vec<ArchiveEntry>,
}

fn read_u16(buf: &[u8], off: usize) -> Option<u16> {
    buf.get(off..off + 2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    buf.get(off..off + 4)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

/// Reject names that (a) contain NUL, (b) start with `/` or `\`, or (c)
/// contain any `.`/`..` path component after splitting on `/`.
fn sanitize_path(raw: &str) -> Option<String> {
    if raw.contains('\0') {
        return None;
    }
    if raw.starts_with('/') || raw.starts_with('\\') {
        return None;
    }
    let normalized = raw.replace('\\', "/");
    for segment in normalized.split('/') {
        if segment == "." || segment == ".." {
            return None;
        }
    }
    Some(normalized)
}

fn unix_mode(external_attrs: u32) -> u32 {
    external_attrs >> 16
}

impl<'a> Archive<'a> {
    /// Locate the end-of-central-directory record by scanning the last
    /// `22 + 65535` bytes for its signature, then parse the central
    /// directory strictly.
    pub fn parse(data: &'a [u8]) -> Result<Self, ArchiveError> {
        let scan_window = EOCD_FIXED_SIZE + MAX_COMMENT_LEN;
        let scan_start = data.len().saturating_sub(scan_window);
        let tail = &data[scan_start..];

        let mut eocd_pos = None;
        if tail.len() >= EOCD_FIXED_SIZE {
            for i in (0..=tail.len() - EOCD_FIXED_SIZE).rev() {
                if read_u32(tail, i) == Some(EOCD_SIGNATURE) {
                    eocd_pos = Some(scan_start + i);
                    break;
                }
            }
        }
        let eocd_pos = eocd_pos.ok_or(ArchiveError::MissingEocd)?;
        let eocd = &data[eocd_pos..];
        if eocd.len() < EOCD_FIXED_SIZE {
            return Err(ArchiveError::Truncated {
                needed: EOCD_FIXED_SIZE,
                actual: eocd.len(),
            });
        }

        let total_entries = read_u16(eocd, 10).unwrap_or(0) as usize;
        let cd_offset = read_u32(eocd, 16).unwrap_or(0) as usize;

        let mut entries = Vec::with_capacity(total_entries);
        let mut cursor = cd_offset;
        for index in 0..total_entries {
            if cursor + CENTRAL_DIR_FIXED_SIZE > data.len() {
                return Err(ArchiveError::Truncated {
                    needed: cursor + CENTRAL_DIR_FIXED_SIZE,
                    actual: data.len(),
                });
            }
            let header = &data[cursor..];
            if read_u32(header, 0) != Some(CENTRAL_DIR_SIGNATURE) {
                return Err(ArchiveError::BadCentralDirectorySignature { index });
            }

            let compression_method = read_u16(header, 10).unwrap_or(0);
            let compressed_size = read_u32(header, 20).unwrap_or(0) as u64;
            let uncompressed_size = read_u32(header, 24).unwrap_or(0) as u64;
            let name_len = read_u16(header, 28).unwrap_or(0) as usize;
            let extra_len = read_u16(header, 30).unwrap_or(0) as usize;
            let comment_len = read_u16(header, 32).unwrap_or(0) as usize;
            let external_attrs = read_u32(header, 38).unwrap_or(0);
            let local_header_offset = read_u32(header, 42).unwrap_or(0) as u64;

            let name_start = cursor + CENTRAL_DIR_FIXED_SIZE;
            let name_end = name_start + name_len;
            if name_end > data.len() {
                return Err(ArchiveError::Truncated {
                    needed: name_end,
                    actual: data.len(),
                });
            }
            let raw_name = String::from_utf8_lossy(&data[name_start..name_end]).to_string();
            let name = sanitize_path(&raw_name);
            let is_directory = raw_name.ends_with('/') || raw_name.ends_with('\\');

            let mode = unix_mode(external_attrs);
            let is_symlink = mode != 0 && (mode & 0o170000) == 0o120000;
            let is_executable = mode & 0o111 != 0;

            entries.push(ArchiveEntry {
                raw_name,
                name,
                compressed_size,
                uncompressed_size,
                compression_method,
                local_header_offset,
                external_attrs,
                is_directory,
                is_symlink,
                is_executable,
            });

            cursor = name_end + extra_len + comment_len;
        }

        Ok(Self { data, entries })
    }

    /// Entry selection for scanning (§4.2): central-directory order, skip
    /// directories/zero-length/oversized/symlinks/invalid-path entries, stop
    /// once the running total would exceed the cap or `max_entries` is hit.
    pub fn select_for_scan(&self, max_entry_bytes: u64, max_total_bytes: u64, max_entries: usize) -> Vec<usize> {
        let mut selected = Vec::new();
        let mut running_total: u64 = 0;
        for (idx, entry) in self.entries.iter().enumerate() {
            if selected.len() >= max_entries {
                break;
            }
            if entry.name.is_none() {
                continue;
            }
            if entry.is_directory || entry.is_symlink {
                continue;
            }
            if entry.uncompressed_size == 0 {
                continue;
            }
            if entry.uncompressed_size > max_entry_bytes {
                continue;
            }
            if running_total.saturating_add(entry.uncompressed_size) > max_total_bytes {
                break;
            }
            running_total += entry.uncompressed_size;
            selected.push(idx);
        }
        selected
    }

    /// Extract one entry into a capped buffer. Symlinks are never extracted
    /// by callers (the selection rule already excludes them); an
    /// unsupported compression method is reported, not a hard failure.
    pub fn extract(&self, index: usize, cap: u64) -> Result<ExtractOutcome, ArchiveError> {
        let entry = &self.entries[index];
        let offset = entry.local_header_offset as usize;
        if offset + LOCAL_HEADER_FIXED_SIZE > self.data.len() {
            return Err(ArchiveError::Truncated {
                needed: offset + LOCAL_HEADER_FIXED_SIZE,
                actual: self.data.len(),
            });
        }
        let header = &self.data[offset..];
        if read_u32(header, 0) != Some(LOCAL_HEADER_SIGNATURE) {
            return Err(ArchiveError::BadLocalHeaderSignature {
                name: entry.raw_name.clone(),
            });
        }
        let name_len = read_u16(header, 26).unwrap_or(0) as usize;
        let extra_len = read_u16(header, 28).unwrap_or(0) as usize;
        let data_offset = offset + LOCAL_HEADER_FIXED_SIZE + name_len + extra_len;
        let data_end = data_offset + entry.compressed_size as usize;
        if data_end > self.data.len() {
            return Err(ArchiveError::Truncated {
                needed: data_end,
                actual: self.data.len(),
            });
        }
        let raw = &self.data[data_offset..data_end];

        match entry.compression_method {
            0 => {
                let take = (cap as usize).min(raw.len());
                Ok(ExtractOutcome::Data(raw[..take].to_vec()))
            }
            8 => {
                let mut decoder = flate2::read::DeflateDecoder::new(raw);
                let mut out = Vec::new();
                let mut limited = (&mut decoder).take(cap);
                limited
                    .read_to_end(&mut out)
                    .map_err(|_| ArchiveError::BadLocalHeaderSignature {
                        name: entry.raw_name.clone(),
                    })?;
                Ok(ExtractOutcome::Data(out))
            }
            _ => Ok(ExtractOutcome::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Build a minimal stored-only zip with the given entries in memory,
    /// without depending on any zip-writing crate.
    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let mut offsets = Vec::new();

        for (name, content) in entries {
            offsets.push(out.len() as u32);
            out.extend_from_slice(&LOCAL_HEADER_SIGNATURE.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&0u16.to_le_bytes()); // flags
            out.extend_from_slice(&0u16.to_le_bytes()); // method = stored
            out.extend_from_slice(&0u16.to_le_bytes()); // mod time
            out.extend_from_slice(&0u16.to_le_bytes()); // mod date
            out.extend_from_slice(&0u32.to_le_bytes()); // crc32
            out.extend_from_slice(&(content.len() as u32).to_le_bytes()); // compressed
            out.extend_from_slice(&(content.len() as u32).to_le_bytes()); // uncompressed
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // extra len
            out.extend_from_slice(name.as_bytes());
            out.write_all(content).unwrap();
        }

        for ((name, content), offset) in entries.iter().zip(offsets.iter()) {
            central.extend_from_slice(&CENTRAL_DIR_SIGNATURE.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // version made by
            central.extend_from_slice(&20u16.to_le_bytes()); // version needed
            central.extend_from_slice(&0u16.to_le_bytes()); // flags
            central.extend_from_slice(&0u16.to_le_bytes()); // method
            central.extend_from_slice(&0u16.to_le_bytes()); // mod time
            central.extend_from_slice(&0u16.to_le_bytes()); // mod date
            central.extend_from_slice(&0u32.to_le_bytes()); // crc32
            central.extend_from_slice(&(content.len() as u32).to_le_bytes());
            central.extend_from_slice(&(content.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // extra len
            central.extend_from_slice(&0u16.to_le_bytes()); // comment len
            central.extend_from_slice(&0u16.to_le_bytes()); // disk number
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }

        let cd_offset = out.len() as u32;
        let cd_size = central.len() as u32;
        out.extend_from_slice(&central);

        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment length

        out
    }

    #[test]
    fn parses_single_stored_entry() {
        let bytes = build_zip(&[("SKILL.md", b"# hello")]);
        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.entries.len(), 1);
        assert_eq!(archive.entries[0].name.as_deref(), Some("SKILL.md"));
    }

    #[test]
    fn rejects_parent_traversal_path() {
        let bytes = build_zip(&[("../SKILL.md", b"evil")]);
        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.entries[0].name, None);
        assert_eq!(archive.entries[0].raw_name, "../SKILL.md");
    }

    #[test]
    fn rejects_absolute_path() {
        let bytes = build_zip(&[("/etc/passwd", b"root")]);
        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.entries[0].name, None);
    }

    #[test]
    fn extracts_stored_bytes() {
        let bytes = build_zip(&[("SKILL.md", b"hello world")]);
        let archive = Archive::parse(&bytes).unwrap();
        match archive.extract(0, 1_000_000).unwrap() {
            ExtractOutcome::Data(data) => assert_eq!(data, b"hello world"),
            ExtractOutcome::Unsupported => panic!("expected data"),
        }
    }

    #[test]
    fn missing_eocd_fails() {
        let err = Archive::parse(b"not a zip").unwrap_err();
        assert!(matches!(err, ArchiveError::MissingEocd));
    }

    #[test]
    fn selection_skips_zero_length_and_oversized() {
        let bytes = build_zip(&[("a.md", b""), ("b.md", b"0123456789")]);
        let archive = Archive::parse(&bytes).unwrap();
        let selected = archive.select_for_scan(5, 1_000, 10);
        assert!(selected.is_empty(), "both entries should be skipped");
    }

    #[test]
    fn selection_includes_valid_text_entry() {
        let bytes = build_zip(&[("a.md", b"hello")]);
        let archive = Archive::parse(&bytes).unwrap();
        let selected = archive.select_for_scan(1_000, 1_000, 10);
        assert_eq!(selected, vec![0]);
    }
}
