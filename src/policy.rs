//! Safety policy: the keyword and phrase sets the critic enforces.
//!
//! A built-in default policy ships with the binary so the critic always
//! has something to enforce; an operator-supplied markdown file can union
//! extra keywords and phrases on top at startup. Policy load problems are
//! survivable: the defaults remain in force.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// The substring every disclaimer must contain, case-insensitively.
pub const REQUIRED_DISCLAIMER: &str = "not medical advice";

/// Banner shown when emergency keywords are detected.
pub const EMERGENCY_BANNER: &str =
    "EMERGENCY: Not medical advice. Call local emergency services now.";

#[derive(Debug, Clone)]
pub struct Policy {
    pub emergency_keywords: BTreeSet<String>,
    pub blocked_phrases: BTreeSet<String>,
    pub required_disclaimer: String,
    pub citation_required: bool,
}

impl Default for Policy {
    fn default() -> Self {
        let emergency_keywords = [
            "unconscious",
            "unconsciousness",
            "not breathing",
            "no pulse",
            "chest pain",
            "heart attack",
            "cardiac arrest",
            "stroke",
            "severe bleeding",
            "hemorrhage",
            "anaphylaxis",
            "allergic reaction",
            "suicide",
            "suicidal",
            "overdose",
            "poisoning",
            "electric shock",
            "electrocution",
            "choking",
            "airway obstruction",
            "seizure",
            "head injury",
            "spinal injury",
            "broken bone",
            "fracture",
            "severe burn",
            "hypothermia",
            "heat stroke",
        ];
        let blocked_phrases = [
            "diagnose",
            "diagnosis",
            "prescribe",
            "prescription",
            "medication",
            "drug",
            "surgery",
            "operate",
            "medical treatment",
            "cure",
            "disease",
            "illness",
            "condition",
            "disorder",
            "syndrome",
        ];

        Self {
            emergency_keywords: emergency_keywords.iter().map(|s| s.to_string()).collect(),
            blocked_phrases: blocked_phrases.iter().map(|s| s.to_string()).collect(),
            required_disclaimer: REQUIRED_DISCLAIMER.to_string(),
            citation_required: true,
        }
    }
}

impl Policy {
    /// Built-in defaults, optionally unioned with an override file. A
    /// missing or unreadable file keeps the defaults with a warning.
    pub fn load(path: Option<&Path>) -> Self {
        let mut policy = Self::default();

        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(content) => policy.merge_markdown(&content),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not load policy file, using defaults");
                }
            }
        }

        policy
    }

    /// Union keyword sections from a markdown policy document into this
    /// policy. Recognized sections: `## Emergency Keywords` and
    /// `## Blocked Phrases`; items come from bullet lines (comma
    /// separated) and inline backtick spans.
    pub fn merge_markdown(&mut self, content: &str) {
        if let Some(section) = extract_section(content, "Emergency Keywords") {
            self.emergency_keywords.extend(extract_keywords(&section));
        }
        if let Some(section) = extract_section(content, "Blocked Phrases") {
            self.blocked_phrases.extend(extract_keywords(&section));
        }
    }

    /// Emergency keywords present in `text`, sorted for deterministic
    /// output.
    pub fn detect_emergency_keywords(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        self.emergency_keywords
            .iter()
            .filter(|k| lower.contains(k.as_str()))
            .cloned()
            .collect()
    }

    /// Blocked phrases present in `text`, sorted for deterministic
    /// output.
    pub fn detect_blocked_phrases(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        self.blocked_phrases
            .iter()
            .filter(|p| lower.contains(p.as_str()))
            .cloned()
            .collect()
    }
}

fn extract_section(content: &str, heading: &str) -> Option<String> {
    let pattern = format!(r"(?is)##\s*{}\s*\n(.*?)(?:\n##|\z)", regex::escape(heading));
    let re = Regex::new(&pattern).ok()?;
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_keywords(section: &str) -> BTreeSet<String> {
    let mut keywords = BTreeSet::new();

    let bullet = Regex::new(r"(?m)^\s*[-*]\s*(.+)$").unwrap();
    for capture in bullet.captures_iter(section) {
        let line = capture[1].replace(&['`', '"', '\'', '(', ')'][..], "");
        for word in line.split(',') {
            let word = word.trim().to_lowercase();
            if !word.is_empty() {
                keywords.insert(word);
            }
        }
    }

    let code = Regex::new(r"`([^`]+)`").unwrap();
    for capture in code.captures_iter(section) {
        let word = capture[1].trim().to_lowercase();
        if !word.is_empty() {
            keywords.insert(word);
        }
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_detects_emergency_keywords() {
        let policy = Policy::default();
        let detected =
            policy.detect_emergency_keywords("The person has chest pain and is not breathing");
        assert!(detected.contains(&"chest pain".to_string()));
        assert!(detected.contains(&"not breathing".to_string()));
    }

    #[test]
    fn default_policy_detects_blocked_phrases() {
        let policy = Policy::default();
        let detected = policy.detect_blocked_phrases("I will diagnose you and prescribe a drug");
        assert_eq!(detected, vec!["diagnose", "drug", "prescribe"]);
    }

    #[test]
    fn clean_text_detects_nothing() {
        let policy = Policy::default();
        assert!(policy
            .detect_blocked_phrases("Apply pressure with a clean cloth")
            .is_empty());
        assert!(policy
            .detect_emergency_keywords("How do I store water for a storm?")
            .is_empty());
    }

    #[test]
    fn markdown_override_unions_with_defaults() {
        let mut policy = Policy::default();
        policy.merge_markdown(
            "# Safety Policy\n\n\
             ## Emergency Keywords\n\
             - flash flood, gas leak\n\
             - `carbon monoxide`\n\n\
             ## Blocked Phrases\n\
             - dosage\n",
        );

        assert!(policy.emergency_keywords.contains("flash flood"));
        assert!(policy.emergency_keywords.contains("gas leak"));
        assert!(policy.emergency_keywords.contains("carbon monoxide"));
        // Defaults survive the merge.
        assert!(policy.emergency_keywords.contains("choking"));
        assert!(policy.blocked_phrases.contains("dosage"));
        assert!(policy.blocked_phrases.contains("diagnose"));
    }

    #[test]
    fn missing_policy_file_keeps_defaults() {
        let policy = Policy::load(Some(Path::new("/nonexistent/policy.md")));
        assert!(policy.blocked_phrases.contains("diagnose"));
        assert!(policy.citation_required);
    }

    #[test]
    fn section_extraction_stops_at_next_heading() {
        let mut policy = Policy::default();
        policy.merge_markdown(
            "## Blocked Phrases\n- forbidden term\n\n## Notes\n- this is not a phrase\n",
        );
        assert!(policy.blocked_phrases.contains("forbidden term"));
        assert!(!policy.blocked_phrases.contains("this is not a phrase"));
    }
}
