//! The checklist answer shape shared by the engine, the safety critic,
//! and the API surface.

use serde::{Deserialize, Serialize};

/// Default disclaimer attached when the model omits one.
pub const DEFAULT_DISCLAIMER: &str =
    "Not medical advice. For emergencies, call local emergency services.";

/// One step of an emergency checklist.
///
/// `source` stays loosely typed (`serde_json::Value`): the model may emit
/// malformed citations, and the critic, not the parser, is the
/// component that judges citation shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecklistStep {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caution: Option<String>,
}

/// Typed meta block with a required disclaimer and an open extension map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_to_call_emergency: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_disclaimer() -> String {
    DEFAULT_DISCLAIMER.to_string()
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            disclaimer: default_disclaimer(),
            when_to_call_emergency: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A complete candidate answer, as produced by the engine and reviewed by
/// the critic before anything reaches a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecklistResponse {
    #[serde(default)]
    pub checklist: Vec<ChecklistStep>,
    #[serde(default)]
    pub meta: ResponseMeta,
    /// Internal record of a parse or generation failure. Never serialized
    /// and never shown to the user.
    #[serde(skip)]
    pub internal_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_defaults_to_standard_disclaimer() {
        let meta: ResponseMeta = serde_json::from_str("{}").unwrap();
        assert_eq!(meta.disclaimer, DEFAULT_DISCLAIMER);
    }

    #[test]
    fn meta_keeps_unknown_keys_in_extension_map() {
        let meta: ResponseMeta =
            serde_json::from_str(r#"{"disclaimer": "d", "banner_shown": true}"#).unwrap();
        assert_eq!(meta.disclaimer, "d");
        assert_eq!(meta.extra["banner_shown"], serde_json::json!(true));
    }

    #[test]
    fn step_accepts_malformed_source() {
        let step: ChecklistStep = serde_json::from_str(
            r#"{"title": "t", "action": "a", "source": {"doc_id": "x", "loc": "bad"}}"#,
        )
        .unwrap();
        assert!(step.source.is_some());
    }
}
