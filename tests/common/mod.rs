//! Shared test doubles for the transport and model backend.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use telegram_ai_bridge::{
    ContactRecord, Dialog, Identity, ModelBackend, ModelError, Peer, Transport, TransportError,
};
use tokio::sync::mpsc;

/// Transport whose resolution behaviour is configured per layer
#[derive(Default)]
pub struct MockTransport {
    pub calls: Mutex<Vec<String>>,
    direct: Mutex<HashSet<String>>,
    dialogs: Mutex<Vec<Dialog>>,
    lookup: Mutex<HashSet<String>>,
    importable: Mutex<HashSet<String>>,
    pub imported: Mutex<Vec<ContactRecord>>,
    pub sent: Mutex<Vec<(Peer, String)>>,
    fail_send: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    events: Mutex<Option<mpsc::Receiver<Value>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything in `ids` resolves on the first rung
    pub fn with_direct(self, ids: &[&str]) -> Self {
        self.direct.lock().extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_dialog(self, id: &str) -> Self {
        self.dialogs.lock().push(Dialog {
            title: format!("dialog {}", id),
            entity: Some(Peer::user(id)),
        });
        self
    }

    pub fn with_lookup(self, ids: &[&str]) -> Self {
        self.lookup.lock().extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_importable(self, ids: &[&str]) -> Self {
        self.importable.lock().extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn failing_sends(self) -> Self {
        self.fail_send.store(true, Ordering::SeqCst);
        self
    }

    /// Hand out `rx` on the next `subscribe`
    pub fn with_events(self, rx: mpsc::Receiver<Value>) -> Self {
        *self.events.lock() = Some(rx);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn sent(&self) -> Vec<(Peer, String)> {
        self.sent.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn current_identity(&self) -> Result<Identity, TransportError> {
        Ok(Identity {
            id: "1000".to_string(),
            name: "Bridge".to_string(),
            username: Some("bridge_bot".to_string()),
        })
    }

    async fn resolve_entity(&self, id: &str) -> Result<Peer, TransportError> {
        self.record(format!("resolve_entity:{}", id));
        if self.direct.lock().contains(id) {
            Ok(Peer::user(id))
        } else {
            Err(TransportError::Resolution(id.to_string()))
        }
    }

    async fn list_dialogs(&self) -> Result<Vec<Dialog>, TransportError> {
        self.record("list_dialogs");
        Ok(self.dialogs.lock().clone())
    }

    async fn lookup_entity(&self, id: &str) -> Result<Peer, TransportError> {
        self.record(format!("lookup_entity:{}", id));
        if self.lookup.lock().contains(id) {
            Ok(Peer::user(id))
        } else {
            Err(TransportError::Resolution(id.to_string()))
        }
    }

    async fn import_contact(&self, record: &ContactRecord) -> Result<(), TransportError> {
        self.record(format!("import_contact:{}", record.phone));
        self.imported.lock().push(record.clone());
        if self.importable.lock().contains(&record.phone) {
            self.direct.lock().insert(record.phone.clone());
            Ok(())
        } else {
            Err(TransportError::Import(record.phone.clone()))
        }
    }

    async fn send_message(&self, peer: &Peer, text: &str) -> Result<(), TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::Send("flood wait".to_string()));
        }
        self.sent.lock().push((peer.clone(), text.to_string()));
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Value>, TransportError> {
        self.events
            .lock()
            .take()
            .ok_or(TransportError::Connection("already subscribed".to_string()))
    }
}

/// How the scripted model answers
#[derive(Clone)]
pub enum ModelBehavior {
    /// Always the same reply
    Fixed(String),
    /// `re:{prompt}` after an optional delay
    Echo(Duration),
    /// Always fails
    Fail,
    /// Never answers in time
    Hang,
    /// Panics mid-call
    Panic,
}

/// Model backend that records every call
pub struct MockModel {
    behavior: ModelBehavior,
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockModel {
    pub fn new(behavior: ModelBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(ModelBehavior::Fixed(text.to_string()))
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ModelBackend for MockModel {
    async fn generate(&self, prompt: &str, history: &[String]) -> Result<String, ModelError> {
        self.calls.lock().push((prompt.to_string(), history.to_vec()));
        match &self.behavior {
            ModelBehavior::Fixed(reply) => Ok(reply.clone()),
            ModelBehavior::Echo(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(format!("re:{}", prompt))
            }
            ModelBehavior::Fail => Err(ModelError::Unavailable("backend down".to_string())),
            ModelBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("too late".to_string())
            }
            ModelBehavior::Panic => panic!("model exploded"),
        }
    }
}
