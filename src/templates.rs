//! Canned emergency checklists for offline degradation.
//!
//! When live generation is unavailable (or the operator has configured
//! the template policy to prefer it), the fallback mode synthesizes a
//! checklist directly from a per-category template. Templates exist to
//! preserve availability, not to replace retrieval: every step's citation
//! is drawn from the actually retrieved hits passed in by the engine, and
//! a citation is never fabricated. With no retrieved hits the steps go
//! out uncited and the critic decides their fate under policy.

use crate::checklist::{ChecklistResponse, ChecklistStep, ResponseMeta};

/// Emergency category detected from the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyCategory {
    Choking,
    Bleeding,
    Burn,
    Unconscious,
    ChestPain,
    PowerOutage,
    Generic,
}

impl EmergencyCategory {
    /// Keyword-match the query to a category. First match in declaration
    /// order wins; anything unmatched is `Generic`.
    pub fn detect(query: &str) -> Self {
        let q = query.to_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|k| q.contains(k));

        if matches(&["chok", "heimlich", "airway"]) {
            Self::Choking
        } else if matches(&["bleed", "blood", "wound", "laceration", "hemorrhage"]) {
            Self::Bleeding
        } else if matches(&["burn", "scald"]) {
            Self::Burn
        } else if matches(&["unconscious", "unresponsive", "fainted", "passed out", "not breathing"])
        {
            Self::Unconscious
        } else if matches(&["chest pain", "heart attack", "cardiac"]) {
            Self::ChestPain
        } else if matches(&["power outage", "power out", "blackout", "no electricity"]) {
            Self::PowerOutage
        } else {
            Self::Generic
        }
    }
}

/// Synthesize a checklist for `category`, attaching `citation` (taken
/// from real retrieved hits) to every step when available.
pub fn synthesize(
    category: EmergencyCategory,
    citation: Option<&serde_json::Value>,
) -> ChecklistResponse {
    let steps: &[(&str, &str, Option<&str>)] = match category {
        EmergencyCategory::Choking => &[
            (
                "Encourage coughing",
                "If the person can cough or speak, encourage them to keep coughing to clear the blockage.",
                None,
            ),
            (
                "Give back blows",
                "If they cannot breathe, lean them forward and give up to five firm back blows between the shoulder blades with the heel of your hand.",
                None,
            ),
            (
                "Give abdominal thrusts",
                "If back blows fail, stand behind them and give up to five abdominal thrusts, then alternate with back blows.",
                Some("Do not use abdominal thrusts on infants or pregnant people."),
            ),
            (
                "Call emergency services",
                "If the blockage does not clear or the person becomes unresponsive, call local emergency services immediately.",
                None,
            ),
        ],
        EmergencyCategory::Bleeding => &[
            (
                "Apply direct pressure",
                "Press firmly on the bleeding area with a clean cloth or bandage and keep the pressure on.",
                None,
            ),
            (
                "Keep pressure continuous",
                "Do not lift the cloth to check; add more layers on top if blood soaks through.",
                None,
            ),
            (
                "Raise the injured area",
                "If possible, raise the injured area above the level of the heart while keeping pressure applied.",
                None,
            ),
            (
                "Call emergency services",
                "For severe bleeding, spurting blood, or bleeding that will not stop, call local emergency services now.",
                Some("Severe blood loss is life threatening."),
            ),
        ],
        EmergencyCategory::Burn => &[
            (
                "Cool the burn",
                "Cool the burned area under cool running water for at least 20 minutes.",
                Some("Do not use ice, butter, or creams."),
            ),
            (
                "Remove tight items",
                "Remove rings, watches, and tight clothing near the burn before swelling begins.",
                None,
            ),
            (
                "Cover loosely",
                "Cover the burn loosely with a sterile, non-stick dressing or clean cloth.",
                None,
            ),
            (
                "Seek help for serious burns",
                "Call emergency services for burns that are large, deep, on the face or hands, or caused by chemicals or electricity.",
                None,
            ),
        ],
        EmergencyCategory::Unconscious => &[
            (
                "Check responsiveness",
                "Tap the person's shoulders and shout to check whether they respond.",
                None,
            ),
            (
                "Check breathing",
                "Tilt the head back, lift the chin, and look, listen, and feel for normal breathing for up to 10 seconds.",
                None,
            ),
            (
                "Place in recovery position",
                "If they are breathing normally, roll them onto their side with the head tilted back to keep the airway open.",
                None,
            ),
            (
                "Call emergency services",
                "Call local emergency services immediately and stay with the person, monitoring their breathing until help arrives.",
                Some("If breathing stops, start CPR if you are trained to do so."),
            ),
        ],
        EmergencyCategory::ChestPain => &[
            (
                "Stop and rest",
                "Have the person stop all activity and sit or lie down in a comfortable position.",
                None,
            ),
            (
                "Call emergency services",
                "Call local emergency services immediately. Do not wait to see if the pain passes.",
                None,
            ),
            (
                "Loosen tight clothing",
                "Loosen any tight clothing and keep the person calm and still while waiting for help.",
                None,
            ),
            (
                "Be ready to act",
                "If the person becomes unresponsive and stops breathing normally, start CPR if you are trained to do so.",
                None,
            ),
        ],
        EmergencyCategory::PowerOutage => &[
            (
                "Check the extent",
                "Check whether the outage is limited to your home by looking at breakers and nearby buildings.",
                None,
            ),
            (
                "Protect food and water",
                "Keep refrigerator and freezer doors closed, and set aside safe drinking water.",
                None,
            ),
            (
                "Use safe lighting",
                "Use flashlights or battery lamps rather than candles where possible.",
                Some("Never run generators, grills, or camp stoves indoors."),
            ),
            (
                "Check on vulnerable people",
                "Check on neighbours who rely on powered equipment or may struggle with heat or cold.",
                None,
            ),
        ],
        EmergencyCategory::Generic => &[
            (
                "Make the scene safe",
                "Ensure the scene is safe for you before approaching anyone who is hurt.",
                None,
            ),
            (
                "Check the person",
                "Check whether the person is conscious and responsive, and look for obvious injuries.",
                None,
            ),
            (
                "Call for help",
                "Call local emergency services if anyone is seriously hurt or in danger.",
                None,
            ),
            (
                "Stay and monitor",
                "Provide first aid within your ability and monitor the person until help arrives.",
                None,
            ),
        ],
    };

    let checklist = steps
        .iter()
        .map(|(title, action, caution)| ChecklistStep {
            title: (*title).to_string(),
            action: (*action).to_string(),
            source: citation.cloned(),
            caution: caution.map(|c| c.to_string()),
        })
        .collect();

    ChecklistResponse {
        checklist,
        meta: ResponseMeta {
            when_to_call_emergency: Some(
                "Call emergency services immediately for any life-threatening situation."
                    .to_string(),
            ),
            ..ResponseMeta::default()
        },
        internal_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;

    #[test]
    fn detects_categories_from_keywords() {
        assert_eq!(
            EmergencyCategory::detect("my child is choking on food"),
            EmergencyCategory::Choking
        );
        assert_eq!(
            EmergencyCategory::detect("deep cut, heavy bleeding"),
            EmergencyCategory::Bleeding
        );
        assert_eq!(
            EmergencyCategory::detect("scald from boiling water"),
            EmergencyCategory::Burn
        );
        assert_eq!(
            EmergencyCategory::detect("he is unresponsive"),
            EmergencyCategory::Unconscious
        );
        assert_eq!(
            EmergencyCategory::detect("crushing chest pain"),
            EmergencyCategory::ChestPain
        );
        assert_eq!(
            EmergencyCategory::detect("blackout in the whole street"),
            EmergencyCategory::PowerOutage
        );
        assert_eq!(
            EmergencyCategory::detect("what should an emergency kit contain"),
            EmergencyCategory::Generic
        );
    }

    #[test]
    fn steps_carry_provided_citation_only() {
        let citation = serde_json::json!({"doc_id": "aid", "loc": [0, 120]});
        let response = synthesize(EmergencyCategory::Bleeding, Some(&citation));
        assert!(!response.checklist.is_empty());
        for step in &response.checklist {
            assert_eq!(step.source.as_ref(), Some(&citation));
        }
    }

    #[test]
    fn no_hits_means_no_citation_not_a_fabricated_one() {
        let response = synthesize(EmergencyCategory::Burn, None);
        for step in &response.checklist {
            assert!(step.source.is_none());
        }
    }

    #[test]
    fn every_template_has_nonempty_titles_and_actions() {
        for category in [
            EmergencyCategory::Choking,
            EmergencyCategory::Bleeding,
            EmergencyCategory::Burn,
            EmergencyCategory::Unconscious,
            EmergencyCategory::ChestPain,
            EmergencyCategory::PowerOutage,
            EmergencyCategory::Generic,
        ] {
            let response = synthesize(category, None);
            assert!(response.checklist.len() >= 3);
            for step in &response.checklist {
                assert!(!step.title.trim().is_empty());
                assert!(!step.action.trim().is_empty());
            }
        }
    }

    #[test]
    fn templates_avoid_default_blocked_phrases() {
        // The availability path must survive the critic's scope check.
        let policy = Policy::default();
        for category in [
            EmergencyCategory::Choking,
            EmergencyCategory::Bleeding,
            EmergencyCategory::Burn,
            EmergencyCategory::Unconscious,
            EmergencyCategory::ChestPain,
            EmergencyCategory::PowerOutage,
            EmergencyCategory::Generic,
        ] {
            let response = synthesize(category, None);
            for step in &response.checklist {
                let mut text = format!("{} {}", step.title, step.action);
                if let Some(caution) = &step.caution {
                    text.push(' ');
                    text.push_str(caution);
                }
                assert!(
                    policy.detect_blocked_phrases(&text).is_empty(),
                    "template step contains blocked phrase: {}",
                    text
                );
            }
        }
    }
}
