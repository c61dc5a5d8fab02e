//! Wire data model (§3). Every type here is the literal JSON contract: field
//! names are wire names, `api_version`/`*_version` are always `1`, and unknown
//! input fields are ignored by `serde`'s default (additive) behavior.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Local,
    Registry,
    Git,
    Clawhub,
    Unknown,
}

impl Default for SourceTag {
    fn default() -> Self {
        Self::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Dir,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkippedReason {
    InvalidPath,
    SymlinkSkipped,
    TooLarge,
    Binary,
    UnsupportedCompression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<String>,
    pub size_bytes: u64,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub is_executable: bool,
    pub is_binary: bool,
    pub is_archive: bool,
    pub source_kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<SkippedReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillBundle {
    pub id: String,
    pub source: SourceTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub entrypoint: String,
    pub files: Vec<BundleFile>,
    pub manifest: Vec<ManifestEntry>,
    pub ingest_warnings: Vec<String>,
}

impl SkillBundle {
    pub fn find_file(&self, path: &str) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Markdown,
    Codeblock,
    Url,
    Path,
    File,
    Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSignal {
    #[serde(rename = "type")]
    pub kind: SignalType,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// The severity-floor mapping from §4.6.
    pub fn floor(self) -> i32 {
        match self {
            Severity::Low => 10,
            Severity::Medium => 30,
            Severity::High => 60,
            Severity::Critical => 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub reason_code: String,
    pub selectors: Vec<SignalType>,
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default = "default_flags")]
    pub flags: String,
    pub score: i32,
}

fn default_flags() -> String {
    "gi".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePack {
    pub pack_id: String,
    pub pack_version: u32,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub api_version: u32,
    pub risk_score: i32,
    pub findings: Vec<ScanFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ToolCall {
    /// Permissive "get-or-empty" string accessor over `args` (§9 design note).
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    /// `args` values that are themselves string arrays, joined with spaces,
    /// used by the exec checks to form the "cmd + args" scan string.
    pub fn arg_str_array_joined(&self, key: &str) -> String {
        self.args
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Deny,
    NeedsApproval,
    SandboxOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionReason {
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl DecisionReason {
    pub fn new(reason_code: impl Into<String>) -> Self {
        Self {
            reason_code: reason_code.into(),
            detail: None,
            evidence: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub api_version: u32,
    pub action: DecisionAction,
    pub reasons: Vec<DecisionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_mitigations: Option<Vec<String>>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            api_version: 1,
            action: DecisionAction::Allow,
            reasons: Vec::new(),
            suggested_mitigations: None,
        }
    }

    pub fn deny(reason: DecisionReason) -> Self {
        Self {
            api_version: 1,
            action: DecisionAction::Deny,
            reasons: vec![reason],
            suggested_mitigations: None,
        }
    }

    pub fn needs_approval(reason: DecisionReason) -> Self {
        Self {
            api_version: 1,
            action: DecisionAction::NeedsApproval,
            reasons: vec![reason],
            suggested_mitigations: None,
        }
    }

    pub fn sandbox_only(reason: DecisionReason) -> Self {
        Self {
            api_version: 1,
            action: DecisionAction::SandboxOnly,
            reasons: vec![reason],
            suggested_mitigations: Some(vec![
                "run this tool call inside an isolated sandbox (no network, scratch filesystem)"
                    .to_string(),
            ]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub elevated_requires_approval: bool,
    #[serde(default)]
    pub sandbox_only: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecPolicy {
    #[serde(default)]
    pub allow_cmds: Vec<String>,
    #[serde(default)]
    pub deny_cmds: Vec<String>,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UrlsPolicy {
    #[serde(default)]
    pub allow_domains: Vec<String>,
    #[serde(default)]
    pub deny_domains: Vec<String>,
    #[serde(default)]
    pub deny_schemes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub scan_deny_at: i32,
    pub scan_approve_at: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        // Untrusted-mode defaults (§4.10).
        Self {
            scan_deny_at: 60,
            scan_approve_at: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "one")]
    pub api_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<PathsPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<UrlsPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub content_sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_sha256: Option<String>,
    pub source_input: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustStore {
    pub version: u32,
    pub records: Vec<TrustRecord>,
}

impl Default for TrustStore {
    fn default() -> Self {
        Self {
            version: 1,
            records: Vec::new(),
        }
    }
}

pub const TRUST_STORE_CAP: usize = 5000;
