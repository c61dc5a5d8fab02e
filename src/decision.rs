//! Decision composer (C10, §4.10): turns a scan's risk score, plus the
//! bundle's trust status, into the runtime `Policy` stance an evaluator
//! should apply — and into a `Decision` directly for the scan-only path.

use crate::model::{Decision, DecisionReason, ExecPolicy, Policy, ScanReport, ToolPolicy};

/// Whether a bundle's trust-store hit should actually relax its stance.
/// Trusted mode is only ever honored when the caller reports the bundle as
/// currently trusted; otherwise the untrusted stance applies regardless of
/// what was requested, and the caller should report `mode_effective =
/// untrusted` alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    Untrusted,
    Trusted,
}

pub fn effective_trust_mode(requested_trusted: bool, bundle_is_trusted: bool) -> TrustMode {
    if requested_trusted && bundle_is_trusted {
        TrustMode::Trusted
    } else {
        TrustMode::Untrusted
    }
}

/// Builds the baseline runtime policy stance for a trust mode (§4.10). This
/// is the starting point an operator's own policy file layers on top of,
/// not a replacement for one.
pub fn baseline_policy_for_mode(mode: TrustMode) -> Policy {
    match mode {
        TrustMode::Untrusted => Policy {
            api_version: 1,
            tool: Some(ToolPolicy {
                allowlist: Vec::new(),
                denylist: vec!["system_exec".to_string()],
                elevated_requires_approval: true,
                sandbox_only: vec![
                    "system_*".to_string(),
                    "browser_*".to_string(),
                    "workflow_tool".to_string(),
                ],
            }),
            exec: Some(ExecPolicy::default()),
            paths: None,
            urls: None,
            thresholds: Some(crate::model::Thresholds {
                scan_deny_at: 60,
                scan_approve_at: 30,
            }),
        },
        TrustMode::Trusted => Policy {
            api_version: 1,
            tool: Some(ToolPolicy {
                allowlist: Vec::new(),
                denylist: Vec::new(),
                elevated_requires_approval: true,
                sandbox_only: Vec::new(),
            }),
            exec: Some(ExecPolicy::default()),
            paths: None,
            urls: None,
            thresholds: Some(crate::model::Thresholds {
                scan_deny_at: 80,
                scan_approve_at: 40,
            }),
        },
    }
}

/// Maps a `ScanReport`'s risk score straight to a `Decision`, using the
/// thresholds for the given trust mode (the `scan-source` CLI path; the
/// runtime `eval-tool-call` path goes through `policy::evaluate` instead).
pub fn decide_from_scan(report: &ScanReport, mode: TrustMode) -> Decision {
    let thresholds = baseline_policy_for_mode(mode)
        .thresholds
        .expect("baseline policy always sets thresholds");

    if report.risk_score >= thresholds.scan_deny_at {
        return Decision::deny(
            DecisionReason::new("risk_score_at_or_above_deny_threshold")
                .with_detail(report.risk_score.to_string()),
        );
    }
    if report.risk_score >= thresholds.scan_approve_at {
        return Decision::needs_approval(
            DecisionReason::new("risk_score_at_or_above_approve_threshold")
                .with_detail(report.risk_score.to_string()),
        );
    }
    Decision::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DecisionAction, ScanFinding, Severity};

    fn report(risk_score: i32) -> ScanReport {
        ScanReport {
            api_version: 1,
            risk_score,
            findings: vec![ScanFinding {
                rule_id: "R001".to_string(),
                severity: Severity::Critical,
                reason_code: "remote_code_execution".to_string(),
                file: Some("SKILL.md".to_string()),
                line: Some(1),
                column: Some(1),
                evidence: "curl | sh".to_string(),
            }],
        }
    }

    #[test]
    fn untrusted_mode_denies_above_sixty() {
        let decision = decide_from_scan(&report(75), TrustMode::Untrusted);
        assert_eq!(decision.action, DecisionAction::Deny);
    }

    #[test]
    fn untrusted_mode_needs_approval_between_thresholds() {
        let decision = decide_from_scan(&report(45), TrustMode::Untrusted);
        assert_eq!(decision.action, DecisionAction::NeedsApproval);
    }

    #[test]
    fn trusted_mode_has_higher_thresholds_than_untrusted() {
        let untrusted_deny = decide_from_scan(&report(65), TrustMode::Untrusted);
        let trusted_same_score = decide_from_scan(&report(65), TrustMode::Trusted);
        assert_eq!(untrusted_deny.action, DecisionAction::Deny);
        assert_eq!(trusted_same_score.action, DecisionAction::NeedsApproval);
    }

    #[test]
    fn trust_only_honored_when_bundle_is_actually_trusted() {
        assert_eq!(effective_trust_mode(true, false), TrustMode::Untrusted);
        assert_eq!(effective_trust_mode(true, true), TrustMode::Trusted);
        assert_eq!(effective_trust_mode(false, true), TrustMode::Untrusted);
    }

    #[test]
    fn untrusted_baseline_denylists_system_exec_and_sandboxes_system_tools() {
        let policy = baseline_policy_for_mode(TrustMode::Untrusted);
        let tool = policy.tool.unwrap();
        assert!(tool.denylist.contains(&"system_exec".to_string()));
        assert!(tool.sandbox_only.iter().any(|p| p == "system_*"));
    }

    #[test]
    fn trusted_baseline_clears_sandbox_and_system_exec_denylist() {
        let policy = baseline_policy_for_mode(TrustMode::Trusted);
        let tool = policy.tool.unwrap();
        assert!(tool.sandbox_only.is_empty());
        assert!(!tool.denylist.contains(&"system_exec".to_string()));
    }
}
