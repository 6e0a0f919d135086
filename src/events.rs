//! Inbound Event Normalization
//!
//! Raw transport updates arrive as JSON in several shapes. They are decoded
//! once into a closed set of variants and then either turned into an
//! [`IncomingMessage`] or dropped.
//!
//! ```text
//! UpdateShortMessage ──► CompactMessage ──┐
//! Update*NewMessage* ──► GenericMessage ──┼──► IncomingMessage | discard
//! anything else      ──► Ignored ─────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, error, info};

use crate::peer::resolve_sender_key;

const SHORT_MESSAGE_CLASS: &str = "UpdateShortMessage";
const NEW_MESSAGE_CLASS: &str = "UpdateNewMessage";

/// Identifier that may arrive as a JSON number or a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    /// Canonical string form, `None` when blank
    pub fn canonical(&self) -> Option<String> {
        match self {
            RawId::Int(n) => Some(n.to_string()),
            RawId::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Int(n) => write!(f, "{}", n),
            RawId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Peer sub-structure of a message (`peerId` / `fromId`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerRef {
    pub user_id: Option<RawId>,
    pub chat_id: Option<RawId>,
    pub channel_id: Option<RawId>,
}

/// Message object carried by a generic new-message update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub out: bool,
    pub message: Option<String>,
    pub sender_id: Option<RawId>,
    pub peer_id: Option<PeerRef>,
    pub from_id: Option<PeerRef>,
    pub date: Option<i64>,
}

/// Compact update with the sender embedded directly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortMessage {
    pub user_id: RawId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub out: bool,
    #[serde(default)]
    pub date: Option<i64>,
}

/// Decoded update
#[derive(Debug, Clone)]
pub enum NormalizedEvent {
    CompactMessage(ShortMessage),
    GenericMessage(RawMessage),
    Ignored(String),
}

/// A genuine inbound message ready for dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub sender_key: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Classify a raw update
pub fn decode(value: &Value) -> NormalizedEvent {
    let class_name = value
        .get("className")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if class_name == SHORT_MESSAGE_CLASS {
        return match ShortMessage::deserialize(value) {
            Ok(short) => NormalizedEvent::CompactMessage(short),
            Err(e) => NormalizedEvent::Ignored(format!("malformed {}: {}", class_name, e)),
        };
    }

    if class_name.contains(NEW_MESSAGE_CLASS) {
        return match value.get("message") {
            Some(message) if message.is_object() => match RawMessage::deserialize(message) {
                Ok(raw) => NormalizedEvent::GenericMessage(raw),
                Err(e) => NormalizedEvent::Ignored(format!("malformed {}: {}", class_name, e)),
            },
            _ => NormalizedEvent::Ignored(format!("{} without message", class_name)),
        };
    }

    if class_name.is_empty() {
        NormalizedEvent::Ignored("unclassified update".to_string())
    } else {
        NormalizedEvent::Ignored(class_name.to_string())
    }
}

fn timestamp_from(date: Option<i64>) -> DateTime<Utc> {
    date.and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

/// Turn a decoded update into an inbound message, or drop it
pub fn normalize(event: NormalizedEvent) -> Option<IncomingMessage> {
    match event {
        NormalizedEvent::CompactMessage(short) => {
            if short.out {
                return None;
            }
            let Some(sender_key) = short.user_id.canonical() else {
                error!("Short message without a usable user id");
                return None;
            };
            let timestamp = timestamp_from(short.date);
            info!(
                "Received short message: user={}, date={}",
                sender_key,
                timestamp.to_rfc3339()
            );
            Some(IncomingMessage {
                sender_key,
                text: short.message.unwrap_or_default(),
                timestamp,
            })
        }
        NormalizedEvent::GenericMessage(message) => {
            if message.out {
                return None;
            }
            let sender_key = match resolve_sender_key(&message) {
                Ok(key) => key,
                Err(e) => {
                    error!("Discarding message: {}", e);
                    return None;
                }
            };
            info!("Received message: sender={}", sender_key);
            Some(IncomingMessage {
                sender_key,
                text: message.message.unwrap_or_default(),
                timestamp: timestamp_from(message.date),
            })
        }
        NormalizedEvent::Ignored(reason) => {
            debug!("Ignoring update: {}", reason);
            None
        }
    }
}

/// Decode and normalize in one step
pub fn classify(value: &Value) -> Option<IncomingMessage> {
    normalize(decode(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_message_is_emitted() {
        let update = json!({
            "className": "UpdateShortMessage",
            "userId": 42,
            "message": "hi",
            "out": false,
            "date": 1_700_000_000
        });

        let msg = classify(&update).unwrap();
        assert_eq!(msg.sender_key, "42");
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_short_message_with_null_text_is_emitted_empty() {
        for update in [
            json!({ "className": "UpdateShortMessage", "userId": 42, "message": null }),
            json!({ "className": "UpdateShortMessage", "userId": 42 }),
        ] {
            assert!(matches!(decode(&update), NormalizedEvent::CompactMessage(_)));
            let msg = classify(&update).unwrap();
            assert_eq!(msg.sender_key, "42");
            assert_eq!(msg.text, "");
        }
    }

    #[test]
    fn test_outgoing_short_message_is_discarded() {
        let update = json!({
            "className": "UpdateShortMessage",
            "userId": "42",
            "message": "sent by me",
            "out": true
        });
        assert!(classify(&update).is_none());
    }

    #[test]
    fn test_generic_message_uses_sender_id() {
        let update = json!({
            "className": "UpdateNewMessage",
            "message": {
                "out": false,
                "message": "hello",
                "senderId": "1001",
                "peerId": { "userId": 2002 }
            }
        });

        let msg = classify(&update).unwrap();
        assert_eq!(msg.sender_key, "1001");
        assert_eq!(msg.text, "hello");
    }

    #[test]
    fn test_generic_message_missing_text_is_empty() {
        let update = json!({
            "className": "UpdateNewMessage",
            "message": { "peerId": { "userId": 5 } }
        });

        let msg = classify(&update).unwrap();
        assert_eq!(msg.sender_key, "5");
        assert_eq!(msg.text, "");
    }

    #[test]
    fn test_outgoing_generic_message_is_discarded() {
        let update = json!({
            "className": "UpdateNewMessage",
            "message": { "out": true, "message": "echo", "senderId": 9 }
        });
        assert!(classify(&update).is_none());
    }

    #[test]
    fn test_channel_variant_matches_by_substring() {
        let update = json!({
            "className": "UpdateNewChannelMessage",
            "message": { "message": "x", "senderId": 3 }
        });
        // "UpdateNewChannelMessage" does not contain "UpdateNewMessage"
        assert!(matches!(decode(&update), NormalizedEvent::Ignored(_)));

        let update = json!({
            "className": "UpdateNewMessageExtended",
            "message": { "message": "x", "senderId": 3 }
        });
        assert!(matches!(decode(&update), NormalizedEvent::GenericMessage(_)));
    }

    #[test]
    fn test_unresolvable_sender_is_discarded() {
        let update = json!({
            "className": "UpdateNewMessage",
            "message": { "message": "who am i" }
        });
        assert!(classify(&update).is_none());
    }

    #[test]
    fn test_protocol_chatter_is_ignored() {
        for update in [
            json!({ "className": "UpdateUserTyping", "userId": 1 }),
            json!({ "className": "UpdateReadHistoryInbox" }),
            json!({ "something": "else" }),
            json!("not even an object"),
        ] {
            assert!(matches!(decode(&update), NormalizedEvent::Ignored(_)));
            assert!(classify(&update).is_none());
        }
    }

    #[test]
    fn test_new_message_without_object_is_ignored() {
        let update = json!({ "className": "UpdateNewMessage", "message": "flat" });
        assert!(matches!(decode(&update), NormalizedEvent::Ignored(_)));
    }

    #[test]
    fn test_raw_id_canonical() {
        assert_eq!(RawId::Int(-100).canonical().as_deref(), Some("-100"));
        assert_eq!(RawId::Text(" 77 ".into()).canonical().as_deref(), Some("77"));
        assert_eq!(RawId::Text("  ".into()).canonical(), None);
    }
}
