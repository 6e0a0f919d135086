//! Message Dispatch Pipeline
//!
//! One round-trip per inbound message:
//!
//! ```text
//! store.add(user text) ─► store.get ─► model.generate ─► store.add(reply)
//!                                      (timeout ⇒ fallback)      │
//!                                                                ▼
//!                                              resolver.resolve ─► send
//! ```
//!
//! Round-trips for the same user are serialized so their history writes
//! never interleave. Different users proceed independently.

use futures_util::FutureExt;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn, Instrument};

use crate::conversation::ConversationStore;
use crate::events::IncomingMessage;
use crate::model::{ModelBackend, ModelError};
use crate::peer::PeerResolver;
use crate::transport::Transport;

/// Sent in place of a reply when the model fails or times out
pub const FALLBACK_REPLY: &str = "Sorry, I am having trouble processing your request right now.";

/// Sent when a round-trip breaks unexpectedly
pub const APOLOGY_REPLY: &str = "Sorry, I encountered an error processing your message.";

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model_timeout: Duration,
    pub record_fallback_replies: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(60),
            record_fallback_replies: true,
        }
    }
}

/// Per-user async locks
///
/// Locks are created on demand and dropped from the table once no
/// round-trip holds or awaits them.
#[derive(Default)]
pub struct UserLocks {
    locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a user's round-trip slot
    pub async fn acquire(&self, user_key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(user_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody is using
    pub fn prune(&self) {
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Orchestrates store, model and transport for each inbound message
pub struct MessagePipeline {
    store: Arc<ConversationStore>,
    model: Arc<dyn ModelBackend>,
    resolver: Arc<PeerResolver>,
    transport: Arc<dyn Transport>,
    config: PipelineConfig,
    user_locks: UserLocks,
    send_gate: Mutex<()>,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<ConversationStore>,
        model: Arc<dyn ModelBackend>,
        resolver: Arc<PeerResolver>,
        transport: Arc<dyn Transport>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            model,
            resolver,
            transport,
            config,
            user_locks: UserLocks::new(),
            send_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<PeerResolver> {
        &self.resolver
    }

    /// Run one round-trip; returns whether a message reached the sender
    pub async fn handle(&self, message: IncomingMessage) -> bool {
        let span = tracing::info_span!(
            "round_trip",
            user = %message.sender_key,
            id = %uuid::Uuid::new_v4()
        );
        self.handle_inner(message).instrument(span).await
    }

    async fn handle_inner(&self, message: IncomingMessage) -> bool {
        let user_key = message.sender_key.clone();
        let preview: String = message.text.chars().take(50).collect();
        info!("New message from {}: {:?}", user_key, preview);

        // Held through delivery so replies to one user leave in order
        let guard = self.user_locks.acquire(&user_key).await;
        let outcome = AssertUnwindSafe(self.converse(&user_key, &message.text))
            .catch_unwind()
            .await;

        let delivered = match outcome {
            Ok(reply) => self.deliver(&user_key, &reply).await,
            Err(_) => {
                error!("Round-trip for {} panicked, sending apology", user_key);
                self.deliver(&user_key, APOLOGY_REPLY).await
            }
        };

        drop(guard);
        self.user_locks.prune();
        delivered
    }

    /// Record the user turn, ask the model, record the reply
    async fn converse(&self, user_key: &str, text: &str) -> String {
        self.store.add_message(user_key, text);
        let history = self.store.get_context(user_key);

        let reply = match self.generate(text, &history).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("AI response error: {}", e);
                if self.config.record_fallback_replies {
                    self.store.add_message(user_key, FALLBACK_REPLY);
                }
                return FALLBACK_REPLY.to_string();
            }
        };

        self.store.add_message(user_key, &reply);
        reply
    }

    async fn generate(&self, prompt: &str, history: &[String]) -> Result<String, ModelError> {
        let timeout = self.config.model_timeout;
        match tokio::time::timeout(timeout, self.model.generate(prompt, history)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(timeout)),
        }
    }

    /// Resolve the peer and send; failures are logged, never retried
    pub async fn deliver(&self, user_key: &str, text: &str) -> bool {
        let peer = match self.resolver.resolve_for_send(user_key).await {
            Ok(peer) => peer,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };

        let _gate = self.send_gate.lock().await;
        match self.transport.send_message(&peer, text).await {
            Ok(()) => {
                info!("Message sent to {}", user_key);
                true
            }
            Err(e) => {
                error!("Failed to send message to {}: {}", user_key, e);
                false
            }
        }
    }
}
