//! Structured leaf errors for the four hard-failure surfaces in the core.
//!
//! Soft failures (a skipped file, an unsupported archive entry) never reach
//! these types — they become `manifest.skipped_reason` or an ingest warning
//! instead. These variants exist only for failures that leave no bundle,
//! report, or decision to return.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("response body from {url} exceeded the {max_bytes} byte cap")]
    ByteCapExceeded { url: String, max_bytes: u64 },

    #[error("request to {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("request to {url} failed after {attempts} attempt(s): {cause}")]
    Cause {
        url: String,
        attempts: u32,
        cause: String,
    },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("end-of-central-directory signature not found in archive")]
    MissingEocd,

    #[error("central directory entry {index} has an invalid signature")]
    BadCentralDirectorySignature { index: usize },

    #[error("local file header for entry {name:?} has an invalid signature")]
    BadLocalHeaderSignature { name: String },

    #[error("archive is truncated: expected at least {needed} bytes, found {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("archive exceeds the configured byte cap ({max_bytes} bytes)")]
    TooLarge { max_bytes: u64 },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source {source_input:?} could not be read: {cause}")]
    Unreadable { source_input: String, cause: String },

    #[error("archive at {source_input:?} exceeds maxZipBytes ({max_bytes})")]
    ArchiveTooLarge { source_input: String, max_bytes: u64 },

    #[error("transport failure while fetching {source_input:?}: {source}")]
    Transport {
        source_input: String,
        #[source]
        source: TransportError,
    },

    #[error("archive at {source_input:?} is not readable: {source}")]
    Archive {
        source_input: String,
        #[source]
        source: ArchiveError,
    },
}

#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("policy file {path:?} is not valid JSON: {cause}")]
    Malformed { path: String, cause: String },

    #[error("policy file {path:?} has unsupported api_version {found} (expected 1)")]
    UnsupportedVersion { path: String, found: i64 },
}

#[derive(Debug, Error)]
pub enum ToolCallInputError {
    #[error("tool call input is not valid JSON: {cause}")]
    Malformed { cause: String },

    #[error("tool call input is missing required field `tool_name`")]
    MissingToolName,
}
