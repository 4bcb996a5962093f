//! The safety critic: the deterministic gate between the engine and the
//! user.
//!
//! `review` is a pure function from a candidate answer to an ALLOW/BLOCK
//! decision. Five checks run independently and their failures accumulate;
//! emergency-keyword detection is informational only and never blocks.
//! The one hard rule of the system: an unvalidated response must never
//! reach the user, so any internal fault during review fails closed to
//! BLOCK instead of propagating.

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, info};

use crate::checklist::{ChecklistResponse, ChecklistStep};
use crate::policy::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CriticStatus {
    Allow,
    Block,
}

#[derive(Debug, Clone, Serialize)]
pub struct CriticDecision {
    pub status: CriticStatus,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixes: Option<Vec<String>>,
    pub emergency_detected: bool,
    pub requires_emergency_banner: bool,
}

#[derive(Debug, Clone)]
pub struct SafetyCritic {
    policy: Policy,
}

impl SafetyCritic {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    /// Review a candidate answer. Never panics and never returns an
    /// error: a fault inside any check yields BLOCK.
    pub fn review(&self, response: &ChecklistResponse) -> CriticDecision {
        match catch_unwind(AssertUnwindSafe(|| self.validate(response))) {
            Ok(decision) => {
                info!(
                    status = ?decision.status,
                    emergency = decision.emergency_detected,
                    "safety review complete"
                );
                decision
            }
            Err(_) => {
                error!("safety review panicked, failing closed");
                CriticDecision {
                    status: CriticStatus::Block,
                    reasons: vec!["Internal error during safety review".to_string()],
                    fixes: Some(vec!["Contact the system administrator".to_string()]),
                    emergency_detected: false,
                    requires_emergency_banner: false,
                }
            }
        }
    }

    fn validate(&self, response: &ChecklistResponse) -> CriticDecision {
        let mut reasons = Vec::new();
        let mut fixes = Vec::new();

        // 1. Citation well-formedness
        let citation_issues = self.validate_citations(&response.checklist);
        if !citation_issues.is_empty() {
            reasons.extend(citation_issues);
            fixes.push("Ensure every step includes a valid source citation".to_string());
        }

        // 2. Blocked-phrase scope check
        let scope_issues = self.validate_scope(&response.checklist);
        if !scope_issues.is_empty() {
            reasons.extend(scope_issues);
            fixes.push("Keep content within first-aid and preparedness scope".to_string());
        }

        // 3. Disclaimer
        let disclaimer_issues = self.validate_disclaimer(&response.meta.disclaimer);
        if !disclaimer_issues.is_empty() {
            reasons.extend(disclaimer_issues);
            fixes.push("Include the required disclaimer".to_string());
        }

        // 4. Structural sanity
        let structure_issues = validate_structure(&response.checklist);
        if !structure_issues.is_empty() {
            reasons.extend(structure_issues);
            fixes.push("Give every step a title and an action".to_string());
        }

        // 5. Emergency keywords: informational only, never blocking
        let emergency_detected = !self
            .policy
            .detect_emergency_keywords(&collect_text(response))
            .is_empty();

        let status = if reasons.is_empty() {
            reasons.push("Response meets all safety criteria".to_string());
            CriticStatus::Allow
        } else {
            CriticStatus::Block
        };

        CriticDecision {
            status,
            reasons,
            fixes: if fixes.is_empty() { None } else { Some(fixes) },
            emergency_detected,
            requires_emergency_banner: emergency_detected,
        }
    }

    fn validate_citations(&self, checklist: &[ChecklistStep]) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.policy.citation_required {
            return issues;
        }

        for (i, step) in checklist.iter().enumerate() {
            let n = i + 1;
            let source = match &step.source {
                None => {
                    issues.push(format!("Step {} lacks source citation", n));
                    continue;
                }
                Some(source) => source,
            };

            let object = match source.as_object() {
                None => {
                    issues.push(format!("Step {} has invalid source format", n));
                    continue;
                }
                Some(object) => object,
            };

            match object.get("doc_id").and_then(|v| v.as_str()) {
                Some(doc_id) if !doc_id.is_empty() => {}
                _ => issues.push(format!("Step {} missing document ID in source", n)),
            }

            match object.get("loc") {
                None => issues.push(format!("Step {} missing location in source", n)),
                Some(loc) => {
                    let well_formed = loc
                        .as_array()
                        .map(|a| a.len() == 2 && a.iter().all(|v| v.is_i64()))
                        .unwrap_or(false);
                    if !well_formed {
                        issues.push(format!("Step {} has invalid location format in source", n));
                    }
                }
            }
        }

        issues
    }

    fn validate_scope(&self, checklist: &[ChecklistStep]) -> Vec<String> {
        let text = checklist
            .iter()
            .flat_map(|s| {
                [
                    s.title.as_str(),
                    s.action.as_str(),
                    s.caution.as_deref().unwrap_or(""),
                ]
            })
            .collect::<Vec<_>>()
            .join(" ");

        let blocked = self.policy.detect_blocked_phrases(&text);
        if blocked.is_empty() {
            Vec::new()
        } else {
            vec![format!(
                "Contains inappropriate medical terms: {}",
                blocked.join(", ")
            )]
        }
    }

    fn validate_disclaimer(&self, disclaimer: &str) -> Vec<String> {
        if disclaimer.trim().is_empty() {
            return vec!["Missing medical disclaimer".to_string()];
        }
        if !disclaimer
            .to_lowercase()
            .contains(&self.policy.required_disclaimer)
        {
            return vec![format!(
                "Disclaimer must include '{}'",
                self.policy.required_disclaimer
            )];
        }
        Vec::new()
    }
}

fn validate_structure(checklist: &[ChecklistStep]) -> Vec<String> {
    let mut issues = Vec::new();

    if checklist.is_empty() {
        issues.push("Response contains no actionable steps".to_string());
    }

    for (i, step) in checklist.iter().enumerate() {
        let n = i + 1;
        if step.action.trim().is_empty() {
            issues.push(format!("Step {} has no action specified", n));
        }
        if step.title.trim().is_empty() {
            issues.push(format!("Step {} has no title specified", n));
        }
    }

    issues
}

/// Every piece of text the emergency scan should see: step titles,
/// actions, cautions, and the meta block strings.
fn collect_text(response: &ChecklistResponse) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for step in &response.checklist {
        parts.push(&step.title);
        parts.push(&step.action);
        if let Some(caution) = &step.caution {
            parts.push(caution);
        }
    }
    parts.push(&response.meta.disclaimer);
    if let Some(when) = &response.meta.when_to_call_emergency {
        parts.push(when);
    }
    let mut text = parts.join(" ");
    for value in response.meta.extra.values() {
        if let Some(s) = value.as_str() {
            text.push(' ');
            text.push_str(s);
        }
    }
    text
}
