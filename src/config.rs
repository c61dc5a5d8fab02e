//! Ingest/transport limits (§6 "Configuration limits"). Every field is
//! clamped to its documented range at construction, never at use — match
//! sites trust the value they hold instead of re-validating it.

use serde::{Deserialize, Serialize};

fn clamp_u64(value: u64, min: u64, max: u64) -> u64 {
    value.clamp(min, max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub timeout_ms: u64,
    pub retries: u32,
    pub max_files: u64,
    pub max_total_bytes: u64,
    pub max_file_bytes: u64,
    pub max_zip_bytes: u64,
    pub max_zip_entry_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout_ms: 12_000,
            retries: 2,
            max_files: 200,
            max_total_bytes: 5_000_000,
            max_file_bytes: 1_000_000,
            max_zip_bytes: 25_000_000,
            max_zip_entry_bytes: 1_000_000,
        }
    }
}

impl Limits {
    /// Clamp every field to the documented [min, max] range. `max_file_bytes`
    /// has no documented range (`—`), so it is left untouched beyond being a
    /// plain positive integer.
    pub fn clamped(mut self) -> Self {
        self.timeout_ms = clamp_u64(self.timeout_ms, 1_000, 60_000);
        self.retries = self.retries.clamp(0, 5);
        self.max_files = clamp_u64(self.max_files, 1, 2000);
        self.max_total_bytes = clamp_u64(self.max_total_bytes, 10_000, 200_000_000);
        self.max_zip_bytes = clamp_u64(self.max_zip_bytes, 50_000, 200_000_000);
        self.max_zip_entry_bytes = clamp_u64(self.max_zip_entry_bytes, 1_000, 50_000_000);
        self
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let parsed: Limits = toml::from_str(raw)?;
        Ok(parsed.clamped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_already_in_range() {
        let limits = Limits::default();
        assert_eq!(limits, limits.clamped());
    }

    #[test]
    fn clamps_below_minimum() {
        let limits = Limits {
            timeout_ms: 10,
            retries: 0,
            max_files: 0,
            max_total_bytes: 1,
            max_file_bytes: 1,
            max_zip_bytes: 1,
            max_zip_entry_bytes: 1,
        }
        .clamped();
        assert_eq!(limits.timeout_ms, 1_000);
        assert_eq!(limits.max_files, 1);
        assert_eq!(limits.max_total_bytes, 10_000);
        assert_eq!(limits.max_zip_bytes, 50_000);
        assert_eq!(limits.max_zip_entry_bytes, 1_000);
    }

    #[test]
    fn clamps_above_maximum() {
        let limits = Limits {
            timeout_ms: u64::MAX,
            retries: 99,
            max_files: u64::MAX,
            max_total_bytes: u64::MAX,
            max_file_bytes: u64::MAX,
            max_zip_bytes: u64::MAX,
            max_zip_entry_bytes: u64::MAX,
        }
        .clamped();
        assert_eq!(limits.timeout_ms, 60_000);
        assert_eq!(limits.retries, 5);
        assert_eq!(limits.max_files, 2000);
        assert_eq!(limits.max_total_bytes, 200_000_000);
        assert_eq!(limits.max_zip_bytes, 200_000_000);
        assert_eq!(limits.max_zip_entry_bytes, 50_000_000);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let limits = Limits::from_toml_str("max_files = 50\n").unwrap();
        assert_eq!(limits.max_files, 50);
        assert_eq!(limits.timeout_ms, 12_000);
    }
}
