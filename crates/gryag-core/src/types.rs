use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Media attachment kind, used for capability filtering before LLM requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Document,
    Audio,
    Voice,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Photo => write!(f, "photo"),
            Self::Document => write!(f, "document"),
            Self::Audio => write!(f, "audio"),
            Self::Voice => write!(f, "voice"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// One media attachment on an inbound message.
///
/// `data` carries the payload base64-encoded when the adapter downloaded it;
/// `file_id` always survives so the media cache can re-fetch later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPart {
    pub kind: MediaKind,
    pub mime: String,
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A transport event normalized away from any specific wire format.
///
/// The Telegram adapter maps teloxide updates into this; the core never
/// touches transport types directly.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub message_id: i64,
    pub user_id: Option<i64>,
    pub user_is_bot: bool,
    pub user_name: Option<String>,
    /// External id of the message this one replies to, if any.
    pub reply_to: Option<i64>,
    /// True when the replied-to message was authored by the bot itself.
    pub reply_to_bot: bool,
    pub is_private: bool,
    pub text: String,
    pub media: Vec<MediaPart>,
    pub ts: DateTime<Utc>,
}

impl Inbound {
    /// True when the message carries neither text nor media.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.media.is_empty()
    }
}

/// One message inside a conversation window.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub message_id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub text: String,
    pub ts: DateTime<Utc>,
}

/// An ordered slice of recent conversation handed to the fact extractor and
/// the episode monitor.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub messages: Vec<WindowMessage>,
    pub participants: Vec<i64>,
}

impl ConversationWindow {
    pub fn new(chat_id: i64, thread_id: Option<i64>) -> Self {
        Self {
            chat_id,
            thread_id,
            messages: Vec::new(),
            participants: Vec::new(),
        }
    }

    pub fn push(&mut self, msg: WindowMessage) {
        if let Some(uid) = msg.user_id {
            if !self.participants.contains(&uid) {
                self.participants.push(uid);
            }
        }
        self.messages.push(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_tracks_unique_participants() {
        let mut w = ConversationWindow::new(1, None);
        for uid in [42, 43, 42] {
            w.push(WindowMessage {
                message_id: 1,
                user_id: Some(uid),
                user_name: None,
                text: "hi".into(),
                ts: Utc::now(),
            });
        }
        assert_eq!(w.participants, vec![42, 43]);
        assert_eq!(w.messages.len(), 3);
    }

    #[test]
    fn role_round_trips() {
        for r in [Role::User, Role::Assistant, Role::System, Role::Tool] {
            let s = r.to_string();
            assert_eq!(s.parse::<Role>().unwrap(), r);
        }
    }

    #[test]
    fn unknown_role_is_error() {
        assert!("bot".parse::<Role>().is_err());
    }

    #[test]
    fn empty_detection() {
        let msg = Inbound {
            chat_id: 1,
            thread_id: None,
            message_id: 1,
            user_id: Some(2),
            user_is_bot: false,
            user_name: None,
            reply_to: None,
            reply_to_bot: false,
            is_private: false,
            text: "  ".into(),
            media: vec![],
            ts: Utc::now(),
        };
        assert!(msg.is_empty());
    }
}
