//! Resilient parsing of model output into a checklist response.
//!
//! Models return anything from clean fenced JSON to loosely structured
//! prose. Parsing is an ordered list of independent strategies, tried in
//! sequence until one succeeds:
//!
//! 1. a JSON payload inside a fenced code block,
//! 2. the first brace-balanced substring that parses as JSON,
//! 3. a line-oriented heuristic over step/action-prefixed lines.
//!
//! When every strategy fails the caller gets a single safe-fallback step
//! directing the user to emergency services; the triggering error is
//! recorded internally and never rendered into user-visible text.

use regex::Regex;

use crate::checklist::{ChecklistResponse, ChecklistStep, ResponseMeta};

type Strategy = fn(&str) -> Option<ChecklistResponse>;

const STRATEGIES: &[Strategy] = &[parse_fenced_json, parse_balanced_json, parse_step_lines];

/// Parse raw model output. Never fails: the worst case is the
/// safe-fallback response with the error kept in an internal field.
///
/// `fallback_source`, when present, is attached to heuristic-parsed steps
/// that lack a citation; it must point at actually retrieved text.
pub fn parse_response(text: &str, fallback_source: Option<&serde_json::Value>) -> ChecklistResponse {
    for (i, strategy) in STRATEGIES.iter().enumerate() {
        if let Some(mut response) = strategy(text) {
            // Only the line heuristic produces citation-less steps we are
            // entitled to back-fill; JSON strategies reflect what the
            // model actually claimed.
            if i == STRATEGIES.len() - 1 {
                if let Some(source) = fallback_source {
                    for step in &mut response.checklist {
                        if step.source.is_none() {
                            step.source = Some(source.clone());
                        }
                    }
                }
            }
            return response;
        }
    }

    safe_fallback_response("no parse strategy succeeded")
}

/// The deterministic, citation-free answer used when parsing or
/// generation fails entirely.
pub fn safe_fallback_response(internal_error: &str) -> ChecklistResponse {
    ChecklistResponse {
        checklist: vec![ChecklistStep {
            title: "Contact Emergency Services".to_string(),
            action: "This system could not assemble reliable guidance for your request. \
                     If the situation is urgent, call your local emergency services now \
                     and follow their instructions."
                .to_string(),
            source: None,
            caution: Some(
                "For any life-threatening emergency, call local emergency services immediately."
                    .to_string(),
            ),
        }],
        meta: ResponseMeta {
            when_to_call_emergency: Some(
                "Call emergency services immediately for any life-threatening situation."
                    .to_string(),
            ),
            ..ResponseMeta::default()
        },
        internal_error: Some(internal_error.to_string()),
    }
}

/// Strategy 1: JSON object inside a fenced code block.
fn parse_fenced_json(text: &str) -> Option<ChecklistResponse> {
    let fence = Regex::new(r"(?si)```(?:json)?\s*(\{.*?\})\s*```").ok()?;
    let captures = fence.captures(text)?;
    serde_json::from_str(captures.get(1)?.as_str()).ok()
}

/// Strategy 2: first brace-balanced substring that parses as a JSON
/// object.
fn parse_balanced_json(text: &str) -> Option<ChecklistResponse> {
    let mut depth = 0usize;
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start {
                            let candidate = &text[s..i + c.len_utf8()];
                            if let Ok(value) =
                                serde_json::from_str::<serde_json::Value>(candidate)
                            {
                                if value.is_object() {
                                    if let Ok(response) = serde_json::from_value(value) {
                                        return Some(response);
                                    }
                                }
                            }
                        }
                        start = None;
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Strategy 3: treat step/action-prefixed lines as individual checklist
/// steps. Fails (returns None) when no such line exists.
fn parse_step_lines(text: &str) -> Option<ChecklistResponse> {
    let mut steps: Vec<ChecklistStep> = Vec::new();
    let mut current: Option<ChecklistStep> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if is_step_line(line) {
            if let Some(step) = current.take() {
                steps.push(step);
            }
            current = Some(ChecklistStep {
                title: format!("Step {}", steps.len() + 1),
                action: line.to_string(),
                source: None,
                caution: None,
            });
        } else if let Some(step) = current.as_mut() {
            step.action.push(' ');
            step.action.push_str(line);
        }
    }
    if let Some(step) = current.take() {
        steps.push(step);
    }

    if steps.is_empty() {
        return None;
    }

    Some(ChecklistResponse {
        checklist: steps,
        meta: ResponseMeta::default(),
        internal_error: None,
    })
}

fn is_step_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    if lower.contains("step") || lower.contains("action") {
        return true;
    }
    // Numbered list prefix: "3." or "3)"
    let mut saw_digit = false;
    for c in line.chars() {
        if c.is_ascii_digit() {
            saw_digit = true;
        } else {
            return saw_digit && (c == '.' || c == ')');
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKLIST_JSON: &str = r#"{
        "checklist": [
            {"title": "Cool the burn", "action": "Run cool water over the burn for 20 minutes.",
             "source": {"doc_id": "burns", "loc": [0, 120]}}
        ],
        "meta": {"disclaimer": "Not medical advice."}
    }"#;

    #[test]
    fn parses_fenced_json_block() {
        let text = format!("Here is your checklist:\n```json\n{}\n```\nStay safe.", CHECKLIST_JSON);
        let response = parse_response(&text, None);
        assert!(response.internal_error.is_none());
        assert_eq!(response.checklist.len(), 1);
        assert_eq!(response.checklist[0].title, "Cool the burn");
        assert_eq!(response.meta.disclaimer, "Not medical advice.");
    }

    #[test]
    fn parses_bare_json_with_surrounding_prose() {
        let text = format!("Sure! {} Hope that helps.", CHECKLIST_JSON);
        let response = parse_response(&text, None);
        assert_eq!(response.checklist.len(), 1);
        assert!(response.checklist[0].source.is_some());
    }

    #[test]
    fn skips_unparseable_brace_groups() {
        let text = format!("{{not json at all}} then {}", CHECKLIST_JSON);
        let response = parse_response(&text, None);
        assert_eq!(response.checklist.len(), 1);
    }

    #[test]
    fn parses_numbered_lines_as_steps() {
        let text = "1. Check the scene for danger.\nKeep yourself safe first.\n2. Call emergency services.\n3. Apply pressure to the wound.";
        let response = parse_response(text, None);
        assert_eq!(response.checklist.len(), 3);
        assert!(response.checklist[0].action.contains("Keep yourself safe"));
        assert_eq!(response.checklist[1].title, "Step 2");
    }

    #[test]
    fn heuristic_steps_receive_fallback_citation() {
        let source = serde_json::json!({"doc_id": "aid", "loc": [10, 90]});
        let response = parse_response("Step one: apply pressure.", Some(&source));
        assert_eq!(response.checklist.len(), 1);
        assert_eq!(response.checklist[0].source, Some(source));
    }

    #[test]
    fn json_steps_do_not_receive_fallback_citation() {
        let source = serde_json::json!({"doc_id": "aid", "loc": [10, 90]});
        let text = r#"{"checklist": [{"title": "t", "action": "a"}], "meta": {}}"#;
        let response = parse_response(text, Some(&source));
        assert!(response.checklist[0].source.is_none());
    }

    #[test]
    fn unparseable_text_yields_safe_fallback() {
        let response = parse_response("The model rambled with no structure at all.", None);
        assert_eq!(response.checklist.len(), 1);
        assert!(response.internal_error.is_some());
        assert!(response.checklist[0].action.contains("emergency services"));
        assert!(response.checklist[0].source.is_none());
    }

    #[test]
    fn fallback_never_leaks_error_text_into_steps() {
        let response = safe_fallback_response("backend exploded: secret detail");
        let rendered = serde_json::to_string(&response).unwrap();
        assert!(!rendered.contains("secret detail"));
        assert_eq!(response.internal_error.as_deref(), Some("backend exploded: secret detail"));
    }

    #[test]
    fn step_line_detection() {
        assert!(is_step_line("Step 1: do the thing"));
        assert!(is_step_line("1. first"));
        assert!(is_step_line("12) twelfth"));
        assert!(is_step_line("Take action now"));
        assert!(!is_step_line("just prose"));
        assert!(!is_step_line("2024 was a year"));
    }
}
