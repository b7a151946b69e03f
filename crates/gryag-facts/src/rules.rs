//! Rule-based lexical pass.
//!
//! Patterns cover first-person statements in Ukrainian, Russian, and
//! English: location, profession, preference verbs, pronouns, possession.
//! Hits carry confidence ≥ 0.8. Captured values go through small canon
//! tables so inflected forms land on one canonical spelling.

use std::sync::OnceLock;

use regex::Regex;

use gryag_core::types::{ConversationWindow, WindowMessage};
use gryag_memory::types::{EntityType, FactCandidate, FactCategory};

struct Rule {
    pattern: &'static str,
    category: FactCategory,
    key: &'static str,
    confidence: f64,
}

const RULES: &[Rule] = &[
    Rule {
        pattern: r"(?i)\bя (?:з|із|живу (?:в|у)|мешкаю (?:в|у)|из)\s+([\p{L}’'\-]+)",
        category: FactCategory::Personal,
        key: "location",
        confidence: 0.85,
    },
    Rule {
        pattern: r"(?i)\bi(?:'m| am) from\s+([\p{L}’'\-]+)",
        category: FactCategory::Personal,
        key: "location",
        confidence: 0.85,
    },
    Rule {
        pattern: r"(?i)\bя працюю\s+([\p{L}’'\- ]{3,40})",
        category: FactCategory::Profession,
        key: "occupation",
        confidence: 0.8,
    },
    Rule {
        pattern: r"(?i)\bi work as an?\s+([\p{L}\- ]{3,40})",
        category: FactCategory::Profession,
        key: "occupation",
        confidence: 0.8,
    },
    Rule {
        pattern: r"(?i)\b(?:люблю їсти|люблю|обожнюю|обожаю)\s+([\p{L}’'\-]+)",
        category: FactCategory::Preference,
        key: "likes",
        confidence: 0.8,
    },
    Rule {
        pattern: r"(?i)\bмої займенники\s*[:\-]?\s*([\p{L}/]+)",
        category: FactCategory::Personal,
        key: "pronouns",
        confidence: 0.9,
    },
    Rule {
        pattern: r"(?i)\bmy pronouns are\s+([\p{L}/]+)",
        category: FactCategory::Personal,
        key: "pronouns",
        confidence: 0.9,
    },
    Rule {
        pattern: r"(?i)\b(?:у|в) мене є\s+([\p{L}’'\- ]{2,40})",
        category: FactCategory::Personal,
        key: "owns",
        confidence: 0.8,
    },
];

/// Genitive and accusative city forms mapped to canonical names.
const CITY_CANON: &[(&str, &str)] = &[
    ("києва", "Kyiv"),
    ("київ", "Kyiv"),
    ("киева", "Kyiv"),
    ("львова", "Lviv"),
    ("львів", "Lviv"),
    ("одеси", "Odesa"),
    ("одеса", "Odesa"),
    ("харкова", "Kharkiv"),
    ("харків", "Kharkiv"),
    ("дніпра", "Dnipro"),
    ("дніпро", "Dnipro"),
];

/// Inflected food and drink words mapped to canonical names. A hit also
/// narrows the preference key from `likes` to `food`.
const FOOD_CANON: &[(&str, &str)] = &[
    ("піцу", "pizza"),
    ("піца", "pizza"),
    ("пиццу", "pizza"),
    ("пицца", "pizza"),
    ("борщ", "borscht"),
    ("суші", "sushi"),
    ("каву", "coffee"),
    ("кофе", "coffee"),
    ("чай", "tea"),
    ("пиво", "beer"),
];

fn compiled() -> &'static Vec<(Regex, &'static Rule)> {
    static COMPILED: OnceLock<Vec<(Regex, &'static Rule)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|rule| Regex::new(rule.pattern).ok().map(|re| (re, rule)))
            .collect()
    })
}

/// Run every rule over every message in the window, attributing each hit to
/// the message author.
pub fn extract(window: &ConversationWindow) -> Vec<FactCandidate> {
    let mut out = Vec::new();
    for msg in &window.messages {
        let Some(user_id) = msg.user_id else { continue };
        for (re, rule) in compiled() {
            if let Some(caps) = re.captures(&msg.text) {
                let raw = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                if raw.is_empty() {
                    continue;
                }
                let (key, value) = canonicalize(rule.key, raw);
                out.push(FactCandidate {
                    entity_type: EntityType::User,
                    entity_id: user_id,
                    chat_context: Some(window.chat_id),
                    category: rule.category,
                    key: key.to_string(),
                    value,
                    confidence: rule.confidence,
                    evidence_text: Some(evidence_snippet(msg)),
                    source_message_id: Some(msg.message_id),
                });
            }
        }
    }
    out
}

fn canonicalize(key: &'static str, raw: &str) -> (&'static str, String) {
    let lower = raw.to_lowercase();
    match key {
        "location" => {
            for (form, canon) in CITY_CANON {
                if lower == *form {
                    return ("location", canon.to_string());
                }
            }
            ("location", capitalize(raw))
        }
        "likes" => {
            for (form, canon) in FOOD_CANON {
                if lower == *form {
                    return ("food", canon.to_string());
                }
            }
            ("likes", lower)
        }
        _ => (key, raw.to_string()),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

fn evidence_snippet(msg: &WindowMessage) -> String {
    const MAX: usize = 120;
    if msg.text.chars().count() <= MAX {
        msg.text.clone()
    } else {
        msg.text.chars().take(MAX).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn window_with(text: &str, user_id: i64) -> ConversationWindow {
        let mut w = ConversationWindow::new(100, None);
        w.push(WindowMessage {
            message_id: 1,
            user_id: Some(user_id),
            user_name: None,
            text: text.to_string(),
            ts: Utc::now(),
        });
        w
    }

    #[test]
    fn location_from_kyiv_genitive() {
        let facts = extract(&window_with("@bot привіт, я з Києва", 42));
        assert_eq!(facts.len(), 1);
        let f = &facts[0];
        assert_eq!(f.category, FactCategory::Personal);
        assert_eq!(f.key, "location");
        assert_eq!(f.value, "Kyiv");
        assert!(f.confidence >= 0.8);
        assert_eq!(f.entity_id, 42);
        assert_eq!(f.chat_context, Some(100));
    }

    #[test]
    fn food_preference_from_russian() {
        let facts = extract(&window_with("люблю пиццу", 43));
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].category, FactCategory::Preference);
        assert_eq!(facts[0].key, "food");
        assert_eq!(facts[0].value, "pizza");
    }

    #[test]
    fn unknown_city_is_capitalized_as_is() {
        let facts = extract(&window_with("я з Трускавця", 42));
        assert_eq!(facts[0].value, "Трускавця");
    }

    #[test]
    fn pronouns_rule() {
        let facts = extract(&window_with("мої займенники: вона/її", 42));
        assert_eq!(facts[0].key, "pronouns");
        assert_eq!(facts[0].value, "вона/її");
    }

    #[test]
    fn messages_without_author_are_skipped() {
        let mut w = ConversationWindow::new(100, None);
        w.push(WindowMessage {
            message_id: 1,
            user_id: None,
            user_name: None,
            text: "я з Києва".into(),
            ts: Utc::now(),
        });
        assert!(extract(&w).is_empty());
    }

    #[test]
    fn small_talk_yields_nothing() {
        assert!(extract(&window_with("ну таке, побачимо", 42)).is_empty());
    }
}
