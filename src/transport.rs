//! Messaging Transport
//!
//! The messaging account as seen by the bridge: connect, resolve peers,
//! send text and deliver raw update events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Error types for transport operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Could not resolve {0}")]
    Resolution(String),

    #[error("Contact import failed: {0}")]
    Import(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Not supported by this transport: {0}")]
    Unsupported(&'static str),

    #[error("Transport not connected")]
    NotConnected,
}

/// Kind of entity a peer refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerKind {
    User,
    Chat,
    Channel,
}

/// Addressable handle for a user or chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub kind: PeerKind,
    pub access_hash: Option<i64>,
}

impl Peer {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PeerKind::User,
            access_hash: None,
        }
    }

    pub fn chat(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PeerKind::Chat,
            access_hash: None,
        }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PeerKind::Channel,
            access_hash: None,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            PeerKind::User => "user",
            PeerKind::Chat => "chat",
            PeerKind::Channel => "channel",
        };
        write!(f, "{}:{}", kind, self.id)
    }
}

/// A conversation the account already knows about
#[derive(Debug, Clone)]
pub struct Dialog {
    pub title: String,
    pub entity: Option<Peer>,
}

/// Who the bridge is logged in as
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub username: Option<String>,
}

/// Minimal contact used to make a stranger addressable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub client_id: i64,
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
}

impl ContactRecord {
    /// Synthesize a placeholder contact for a raw phone-number id
    pub fn placeholder(raw_id: &str) -> Self {
        Self {
            client_id: 0,
            phone: raw_id.to_string(),
            first_name: "User".to_string(),
            last_name: raw_id.to_string(),
        }
    }
}

/// Messaging transport
///
/// Implementations must be safe to share across tasks; the bridge still
/// serializes `send_message` calls on its side.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the session
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the session
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Account the session is logged in as
    async fn current_identity(&self) -> Result<Identity, TransportError>;

    /// Resolve an id straight to an input entity
    async fn resolve_entity(&self, id: &str) -> Result<Peer, TransportError>;

    /// Known dialogs of the account
    async fn list_dialogs(&self) -> Result<Vec<Dialog>, TransportError>;

    /// Generic entity lookup
    async fn lookup_entity(&self, id: &str) -> Result<Peer, TransportError>;

    /// Add a contact to the account's address book
    async fn import_contact(&self, record: &ContactRecord) -> Result<(), TransportError>;

    /// Deliver a text message
    async fn send_message(&self, peer: &Peer, text: &str) -> Result<(), TransportError>;

    /// Stream of raw update events, one JSON value per event
    async fn subscribe(&self) -> Result<mpsc::Receiver<serde_json::Value>, TransportError>;
}
