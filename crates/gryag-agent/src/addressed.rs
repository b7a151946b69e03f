//! Addressed-turn classification: reply to the bot, @mention, trigger
//! pattern, or direct message.

use regex::Regex;
use tracing::warn;

use gryag_core::types::Inbound;

pub struct TriggerMatcher {
    patterns: Vec<Regex>,
}

impl TriggerMatcher {
    /// Compile the configured patterns; invalid ones are logged and skipped.
    pub fn new(patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "invalid trigger pattern, skipped");
                    None
                }
            })
            .collect();
        Self { patterns: compiled }
    }

    /// Does this message request a response?
    pub fn is_addressed(&self, msg: &Inbound, bot_username: Option<&str>) -> bool {
        if msg.is_private {
            return true;
        }
        if msg.reply_to_bot {
            return true;
        }
        if let Some(username) = bot_username {
            if !username.is_empty() && msg.text.contains(&format!("@{username}")) {
                return true;
            }
        }
        self.patterns.iter().any(|re| re.is_match(&msg.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(text: &str) -> Inbound {
        Inbound {
            chat_id: 100,
            thread_id: None,
            message_id: 1,
            user_id: Some(42),
            user_is_bot: false,
            user_name: None,
            reply_to: None,
            reply_to_bot: false,
            is_private: false,
            text: text.to_string(),
            media: vec![],
            ts: Utc::now(),
        }
    }

    fn matcher() -> TriggerMatcher {
        TriggerMatcher::new(&[r"(?i)\bгряг\b".to_string(), r"(?i)\bgryag\b".to_string()])
    }

    #[test]
    fn trigger_pattern_matches() {
        let m = matcher();
        assert!(m.is_addressed(&msg("гряг, як справи?"), None));
        assert!(m.is_addressed(&msg("Гряг розкажи анекдот"), None));
        assert!(!m.is_addressed(&msg("грягала якась"), None));
        assert!(!m.is_addressed(&msg("просто балачки"), None));
    }

    #[test]
    fn mention_matches() {
        let m = matcher();
        assert!(m.is_addressed(&msg("@gryag_bot привіт"), Some("gryag_bot")));
        assert!(!m.is_addressed(&msg("@other_bot привіт"), Some("gryag_bot")));
    }

    #[test]
    fn reply_to_bot_matches() {
        let m = matcher();
        let mut message = msg("згоден");
        message.reply_to_bot = true;
        assert!(m.is_addressed(&message, None));
    }

    #[test]
    fn direct_message_always_addressed() {
        let m = matcher();
        let mut message = msg("будь-що");
        message.is_private = true;
        assert!(m.is_addressed(&message, None));
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let m = TriggerMatcher::new(&["[".to_string(), r"(?i)гряг".to_string()]);
        assert!(m.is_addressed(&msg("гряг тут?"), None));
    }
}
