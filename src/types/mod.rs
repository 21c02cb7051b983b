// src/types/mod.rs - Core message and wire types shared by the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// A sanitized chat line, produced only by the moderation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: Option<String>,
    pub content: String,
}

impl ChatMessage {
    pub fn new(username: Option<String>, content: impl Into<String>) -> Self {
        Self {
            username,
            content: content.into(),
        }
    }

    /// Render the message the way it is written back into the raw transcript
    pub fn transcript_line(&self) -> String {
        match &self.username {
            Some(name) => format!("{}: {}", name, self.content),
            None => self.content.clone(),
        }
    }
}

/// Where an emote definition came from. Ordering doubles as dedupe priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EmoteSource {
    #[serde(rename = "twitch")]
    Twitch,
    #[serde(rename = "bttv")]
    Bttv,
    #[serde(rename = "7tv")]
    SevenTv,
}

impl fmt::Display for EmoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmoteSource::Twitch => write!(f, "twitch"),
            EmoteSource::Bttv => write!(f, "bttv"),
            EmoteSource::SevenTv => write!(f, "7tv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emote {
    pub name: String,
    pub url: String,
    pub source: EmoteSource,
}

/// Per-batch parse statistics.
///
/// `total == banned + no_colon + accepted + dropped_empty` holds for every
/// batch produced by the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total: usize,
    pub banned: usize,
    pub no_colon: usize,
    pub accepted: usize,
    pub dropped_empty: usize,
}

impl BatchStats {
    pub fn is_consistent(&self) -> bool {
        self.total == self.banned + self.no_colon + self.accepted + self.dropped_empty
    }
}

/// Payload of a relayed chat line as seen by viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub username: Option<String>,
    #[serde(default)]
    pub username_class: String,
    pub text: String,
}

/// Wire envelope exchanged between the relay and its viewers.
///
/// Serialized as `{"type":"chat","payload":{...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ChatEnvelope {
    Chat(ChatPayload),
}

impl ChatEnvelope {
    pub fn chat(username: Option<String>, username_class: impl Into<String>, text: impl Into<String>) -> Self {
        ChatEnvelope::Chat(ChatPayload {
            username,
            username_class: username_class.into(),
            text: text.into(),
        })
    }

    /// Build the envelope for a generated message given its resolved color class
    pub fn from_message(message: &ChatMessage, color: Option<&str>) -> Self {
        let class = match (&message.username, color) {
            (Some(_), Some(color)) => color.to_string(),
            _ => String::new(),
        };
        Self::chat(message.username.clone(), class, message.content.clone())
    }

    pub fn payload(&self) -> &ChatPayload {
        match self {
            ChatEnvelope::Chat(payload) => payload,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A line observed on live Twitch chat, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveChatEvent {
    pub channel: String,
    pub username: Option<String>,
    pub color: Option<String>,
    pub text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl LiveChatEvent {
    /// Tailwind arbitrary-value class for the sender color, or empty
    pub fn username_class(&self) -> String {
        match self.color.as_deref() {
            Some(color) if !color.is_empty() => format!("text-[{}]", color),
            _ => String::new(),
        }
    }

    pub fn into_envelope(self) -> ChatEnvelope {
        let class = self.username_class();
        ChatEnvelope::chat(self.username, class, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = ChatEnvelope::chat(Some("Alice".to_string()), "text-red-600", "hi");
        let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "chat");
        assert_eq!(json["payload"]["username"], "Alice");
        assert_eq!(json["payload"]["usernameClass"], "text-red-600");
        assert_eq!(json["payload"]["text"], "hi");
    }

    #[test]
    fn test_envelope_null_username() {
        let message = ChatMessage::new(None, "orphan line");
        let envelope = ChatEnvelope::from_message(&message, Some("text-red-600"));
        let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert!(json["payload"]["username"].is_null());
        assert_eq!(json["payload"]["usernameClass"], "");
    }

    #[test]
    fn test_envelope_parses_client_frame() {
        let raw = r#"{"type":"chat","payload":{"username":"bob","usernameClass":"","text":"yo"}}"#;
        let envelope: ChatEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.payload().username.as_deref(), Some("bob"));
        assert_eq!(envelope.payload().text, "yo");
    }

    #[test]
    fn test_live_event_color_class() {
        let event = LiveChatEvent {
            channel: "deme".to_string(),
            username: Some("Viewer".to_string()),
            color: Some("#1E90FF".to_string()),
            text: "hello".to_string(),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(event.username_class(), "text-[#1E90FF]");

        let envelope = event.into_envelope();
        assert_eq!(envelope.payload().username_class, "text-[#1E90FF]");
    }

    #[test]
    fn test_stats_consistency() {
        let stats = BatchStats { total: 4, banned: 1, no_colon: 1, accepted: 1, dropped_empty: 1 };
        assert!(stats.is_consistent());
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["noColon"], 1);
        assert_eq!(json["droppedEmpty"], 1);
    }
}
