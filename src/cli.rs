//! CLI surface (§6, external boundary only). Every subcommand prints one
//! well-formed JSON object to stdout, even on `deny`; errors go to stderr
//! with exit code 1. Exit codes: 0 allow, 2 deny, 3 needs_approval /
//! sandbox_only, 1 internal error or invalid input.

use crate::config::Limits;
use crate::decision::{decide_from_scan, effective_trust_mode, TrustMode};
use crate::model::{Decision, DecisionAction, Policy, RulePack, ToolCall};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clawgate", version, about = "Safety gate for third-party agent skills")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Ingest and scan a skill source, printing the composed decision.
    ScanSource {
        source: String,
        #[arg(long, default_value = "untrusted")]
        mode: String,
        #[arg(long)]
        policy: Option<PathBuf>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        max_files: Option<u64>,
        #[arg(long)]
        max_total_bytes: Option<u64>,
        #[arg(long)]
        max_zip_bytes: Option<u64>,
        #[arg(long)]
        trust_store: Option<PathBuf>,
    },
    /// Read a `ToolCall` JSON object on stdin, print its `Decision`.
    EvalToolCall {
        #[arg(long)]
        stdin: bool,
        #[arg(long, default_value = "untrusted")]
        mode: String,
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Ingest a skill source and write a receipt under `--receipt-dir`.
    Ingest {
        source: String,
        #[arg(long)]
        receipt_dir: Option<PathBuf>,
    },
    /// Trust store maintenance.
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },
    /// Built-in rule pack introspection.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Starter policy generation.
    Policy {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long, default_value = "default")]
        mode: String,
    },
}

#[derive(Subcommand)]
pub enum TrustAction {
    Add {
        source: String,
        #[arg(long)]
        trust_store: Option<PathBuf>,
        #[arg(long)]
        pin_manifest: bool,
    },
    Check {
        source: String,
        #[arg(long)]
        trust_store: Option<PathBuf>,
    },
    List {
        #[arg(long)]
        trust_store: Option<PathBuf>,
    },
    Remove {
        content_sha256: String,
        #[arg(long)]
        trust_store: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    List,
    Explain { id: String },
}

const DEFAULT_STATE_DIR: &str = ".clawguard";

fn default_trust_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR).join("trust.json")
}

fn limits_from_flags(
    timeout_ms: Option<u64>,
    max_files: Option<u64>,
    max_total_bytes: Option<u64>,
    max_zip_bytes: Option<u64>,
) -> Limits {
    let mut limits = Limits::default();
    if let Some(v) = timeout_ms {
        limits.timeout_ms = v;
    }
    if let Some(v) = max_files {
        limits.max_files = v;
    }
    if let Some(v) = max_total_bytes {
        limits.max_total_bytes = v;
    }
    if let Some(v) = max_zip_bytes {
        limits.max_zip_bytes = v;
    }
    limits.clamped()
}

fn load_policy(path: Option<&PathBuf>) -> Result<Policy> {
    match path {
        None => Ok(Policy::default()),
        Some(p) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("reading policy file {}", p.display()))?;
            let policy: Policy = serde_json::from_str(&raw)
                .with_context(|| format!("parsing policy file {}", p.display()))?;
            Ok(policy)
        }
    }
}

fn exit_code_for(action: DecisionAction) -> i32 {
    match action {
        DecisionAction::Allow => 0,
        DecisionAction::Deny => 2,
        DecisionAction::NeedsApproval | DecisionAction::SandboxOnly => 3,
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs the parsed CLI invocation and returns the process exit code. All
/// fallible work happens here; `main` only wires this to `std::process::exit`.
pub fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::ScanSource {
            source,
            mode,
            policy,
            timeout_ms,
            max_files,
            max_total_bytes,
            max_zip_bytes,
            trust_store,
        } => run_scan_source(
            &source,
            &mode,
            policy.as_ref(),
            timeout_ms,
            max_files,
            max_total_bytes,
            max_zip_bytes,
            trust_store,
        ),
        Command::EvalToolCall { policy, mode, .. } => run_eval_tool_call(policy.as_ref(), &mode),
        Command::Ingest {
            source,
            receipt_dir,
        } => run_ingest(&source, receipt_dir.as_deref()),
        Command::Trust { action } => run_trust(action),
        Command::Rules { action } => run_rules(action),
        Command::Policy { path, mode } => run_policy_init(path.as_deref(), &mode),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_scan_source(
    source: &str,
    mode: &str,
    policy_path: Option<&PathBuf>,
    timeout_ms: Option<u64>,
    max_files: Option<u64>,
    max_total_bytes: Option<u64>,
    max_zip_bytes: Option<u64>,
    trust_store_path: Option<PathBuf>,
) -> Result<i32> {
    let limits = limits_from_flags(timeout_ms, max_files, max_total_bytes, max_zip_bytes);
    let bundle = crate::ingest::build_skill_bundle_from_source(source, &limits)
        .context("ingesting skill source")?;

    let trust_store_path = trust_store_path.unwrap_or_else(default_trust_store_path);
    let trust_store = crate::trust::load_trust_store(&trust_store_path);
    let bundle_is_trusted = crate::trust::trust_status_for_bundle(&trust_store, &bundle);
    let requested_trusted = mode.eq_ignore_ascii_case("trusted");
    let effective = effective_trust_mode(requested_trusted, bundle_is_trusted);

    let pack = crate::rules::default_rule_pack();
    let report = crate::scanner::scan(&bundle, &pack);

    // An operator-supplied policy may narrow the baseline thresholds for
    // this trust mode; it never widens them.
    let operator_policy = load_policy(policy_path)?;
    let mut thresholds = crate::decision::baseline_policy_for_mode(effective)
        .thresholds
        .expect("baseline policy always sets thresholds");
    if let Some(t) = operator_policy.thresholds {
        thresholds.scan_deny_at = thresholds.scan_deny_at.min(t.scan_deny_at);
        thresholds.scan_approve_at = thresholds.scan_approve_at.min(t.scan_approve_at);
    }
    let decision = if report.risk_score >= thresholds.scan_deny_at {
        Decision::deny(
            crate::model::DecisionReason::new("risk_score_at_or_above_deny_threshold")
                .with_detail(report.risk_score.to_string()),
        )
    } else if report.risk_score >= thresholds.scan_approve_at {
        Decision::needs_approval(
            crate::model::DecisionReason::new("risk_score_at_or_above_approve_threshold")
                .with_detail(report.risk_score.to_string()),
        )
    } else {
        Decision::allow()
    };

    print_json(&serde_json::json!({
        "bundle": bundle,
        "mode_requested": if requested_trusted { "trusted" } else { "untrusted" },
        "mode_effective": match effective { TrustMode::Trusted => "trusted", TrustMode::Untrusted => "untrusted" },
        "trust": { "status": if bundle_is_trusted { "trusted" } else { "untrusted" } },
        "trust_store": trust_store_path,
        "action": decision.action,
        "policy_thresholds": thresholds,
        "reasons": decision.reasons,
        "report": report,
    }))?;

    Ok(exit_code_for(decision.action))
}

fn run_eval_tool_call(policy_path: Option<&PathBuf>, _mode: &str) -> Result<i32> {
    let mut raw = String::new();
    std::io::Read::read_to_string(&mut std::io::stdin(), &mut raw)
        .context("reading tool call from stdin")?;
    let call: ToolCall = serde_json::from_str(&raw).context("parsing tool call JSON")?;
    let policy = load_policy(policy_path)?;

    let decision: Decision = crate::policy::evaluate(&call, &policy);
    print_json(&serde_json::to_value(&decision)?)?;
    Ok(exit_code_for(decision.action))
}

fn run_ingest(source: &str, receipt_dir: Option<&std::path::Path>) -> Result<i32> {
    let limits = Limits::default();
    let bundle = crate::ingest::build_skill_bundle_from_source(source, &limits)
        .context("ingesting skill source")?;

    let pack = crate::rules::default_rule_pack();
    let report = crate::scanner::scan(&bundle, &pack);
    let policy = Policy::default();
    let decision = decide_from_scan(&report, TrustMode::Untrusted);

    let content_sha256 = crate::hashing::content_sha256(&bundle);
    let manifest_sha256 = crate::hashing::manifest_sha256(&bundle);
    let policy_sha256 = crate::hashing::policy_sha256(&policy);

    let receipt = serde_json::json!({
        "receipt_version": 1,
        "created_at": chrono::Utc::now().to_rfc3339(),
        "source_input": source,
        "bundle": {
            "id": bundle.id,
            "content_sha256": content_sha256,
            "manifest_sha256": manifest_sha256,
        },
        "policy_sha256": policy_sha256,
        "scan_report": report,
    });

    if let Some(dir) = receipt_dir {
        std::fs::create_dir_all(dir).context("creating receipt directory")?;
        let path = dir.join(format!("{content_sha256}.json"));
        let payload = serde_json::json!({ "action": decision.action, "receipt": receipt });
        let serialized = format!("{}\n", serde_json::to_string_pretty(&payload)?);
        std::fs::write(&path, serialized).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote ingest receipt");
    }

    print_json(&serde_json::json!({ "action": decision.action, "receipt": receipt }))?;
    Ok(exit_code_for(decision.action))
}

fn run_trust(action: TrustAction) -> Result<i32> {
    match action {
        TrustAction::Add {
            source,
            trust_store,
            pin_manifest,
        } => {
            let limits = Limits::default();
            let bundle = crate::ingest::build_skill_bundle_from_source(&source, &limits)
                .context("ingesting skill source")?;
            let path = trust_store.unwrap_or_else(default_trust_store_path);
            let mut store = crate::trust::load_trust_store(&path);
            crate::trust::add_trust_record(
                &mut store,
                &bundle,
                &source,
                chrono::Utc::now().to_rfc3339(),
                pin_manifest,
            );
            crate::trust::save_trust_store(&path, &store)?;
            print_json(&serde_json::json!({
                "content_sha256": crate::hashing::content_sha256(&bundle),
                "trust_store": path,
            }))?;
            Ok(0)
        }
        TrustAction::Check {
            source,
            trust_store,
        } => {
            let limits = Limits::default();
            let bundle = crate::ingest::build_skill_bundle_from_source(&source, &limits)
                .context("ingesting skill source")?;
            let path = trust_store.unwrap_or_else(default_trust_store_path);
            let store = crate::trust::load_trust_store(&path);
            let trusted = crate::trust::trust_status_for_bundle(&store, &bundle);
            print_json(&serde_json::json!({
                "status": if trusted { "trusted" } else { "untrusted" },
            }))?;
            Ok(0)
        }
        TrustAction::List { trust_store } => {
            let path = trust_store.unwrap_or_else(default_trust_store_path);
            let store = crate::trust::load_trust_store(&path);
            print_json(&serde_json::to_value(&store)?)?;
            Ok(0)
        }
        TrustAction::Remove {
            content_sha256,
            trust_store,
        } => {
            let path = trust_store.unwrap_or_else(default_trust_store_path);
            let mut store = crate::trust::load_trust_store(&path);
            let removed = crate::trust::remove_trust_by_hash(&mut store, &content_sha256);
            crate::trust::save_trust_store(&path, &store)?;
            print_json(&serde_json::json!({ "removed": removed }))?;
            Ok(0)
        }
    }
}

fn run_rules(action: RulesAction) -> Result<i32> {
    let pack: RulePack = crate::rules::default_rule_pack();
    match action {
        RulesAction::List => {
            print_json(&serde_json::to_value(&pack)?)?;
            Ok(0)
        }
        RulesAction::Explain { id } => match pack.rules.iter().find(|r| r.id == id) {
            Some(rule) => {
                print_json(&serde_json::to_value(rule)?)?;
                Ok(0)
            }
            None => {
                eprintln!("no such rule: {id}");
                Ok(1)
            }
        },
    }
}

fn run_policy_init(path: Option<&std::path::Path>, mode: &str) -> Result<i32> {
    let policy = if mode.eq_ignore_ascii_case("untrusted") {
        crate::decision::baseline_policy_for_mode(TrustMode::Untrusted)
    } else {
        Policy::default()
    };

    let serialized = format!("{}\n", serde_json::to_string_pretty(&policy)?);
    match path {
        Some(p) => {
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(p, &serialized).with_context(|| format!("writing {}", p.display()))?;
            tracing::info!(path = %p.display(), "wrote starter policy");
        }
        None => print!("{serialized}"),
    }
    Ok(0)
}
