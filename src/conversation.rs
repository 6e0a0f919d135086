//! Conversation Store
//!
//! Short-lived, in-memory dialogue history per user.
//! Each context holds a rolling window of turns and expires after a period
//! of inactivity. Expiry is checked lazily on access; a background sweeper
//! can be started to reclaim idle entries early.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Maximum turns kept per conversation (rolling window)
pub const MAX_HISTORY: usize = 10;

/// Idle time after which a conversation is forgotten (30 minutes)
pub const CONTEXT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Store limits
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub max_history: usize,
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_history: MAX_HISTORY,
            timeout: CONTEXT_TIMEOUT,
        }
    }
}

/// History of a single user
#[derive(Debug)]
struct ConversationContext {
    messages: VecDeque<String>,
    last_interaction: Instant,
}

impl ConversationContext {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            last_interaction: Instant::now(),
        }
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.last_interaction.elapsed() > timeout
    }
}

/// Snapshot of store occupancy
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConversationStats {
    pub live_contexts: usize,
    pub stored_contexts: usize,
    pub total_messages: usize,
}

/// Per-user conversation store
///
/// Map membership is guarded by a reader/writer lock; every entry carries
/// its own mutex so updates for different users never contend on the
/// same critical section.
pub struct ConversationStore {
    contexts: RwLock<HashMap<String, Arc<Mutex<ConversationContext>>>>,
    config: StoreConfig,
}

impl ConversationStore {
    /// Create a store with the default limits
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a store with custom limits
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    fn entry(&self, user_key: &str) -> Option<Arc<Mutex<ConversationContext>>> {
        self.contexts.read().get(user_key).cloned()
    }

    fn append(&self, user_key: &str, context: &mut ConversationContext, text: &str) {
        if context.is_expired(self.config.timeout) {
            debug!("Conversation for {} expired, starting fresh", user_key);
            context.messages.clear();
        }

        context.messages.push_back(text.to_string());
        context.last_interaction = Instant::now();

        while context.messages.len() > self.config.max_history {
            context.messages.pop_front();
        }

        debug!(
            "Added message to conversation for user {} ({} turns)",
            user_key,
            context.messages.len()
        );
    }

    /// Append a turn to the user's history
    ///
    /// An expired context is reset before the append, so the new turn
    /// starts a fresh conversation.
    ///
    /// The map guard is held while the entry is mutated, so a concurrent
    /// purge or clear can never detach the entry being written.
    pub fn add_message(&self, user_key: &str, text: &str) {
        {
            let contexts = self.contexts.read();
            if let Some(entry) = contexts.get(user_key) {
                self.append(user_key, &mut entry.lock(), text);
                return;
            }
        }

        let mut contexts = self.contexts.write();
        let entry = contexts
            .entry(user_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationContext::new())));
        self.append(user_key, &mut entry.lock(), text);
    }

    /// Get the live history for a user, oldest first
    ///
    /// Does not refresh the interaction time. An expired context is
    /// cleared and reported as empty.
    pub fn get_context(&self, user_key: &str) -> Vec<String> {
        let Some(entry) = self.entry(user_key) else {
            return Vec::new();
        };

        {
            let context = entry.lock();
            if !context.is_expired(self.config.timeout) {
                return context.messages.iter().cloned().collect();
            }
        }

        self.remove_if_expired(user_key);
        Vec::new()
    }

    /// Forget everything about a user
    pub fn clear_context(&self, user_key: &str) {
        if self.contexts.write().remove(user_key).is_some() {
            info!("Cleared conversation context for user {}", user_key);
        }
    }

    // Re-checks under the write lock: a concurrent add_message may have
    // revived the entry between the read and the removal.
    fn remove_if_expired(&self, user_key: &str) {
        let mut contexts = self.contexts.write();
        let expired = contexts
            .get(user_key)
            .map(|entry| entry.lock().is_expired(self.config.timeout))
            .unwrap_or(false);
        if expired {
            contexts.remove(user_key);
            info!("Conversation for user {} expired and was cleared", user_key);
        }
    }

    /// Evict every expired context, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let timeout = self.config.timeout;
        let mut contexts = self.contexts.write();
        let before = contexts.len();
        contexts.retain(|_, entry| !entry.lock().is_expired(timeout));
        let removed = before - contexts.len();
        if removed > 0 {
            info!("Purged {} expired conversations", removed);
        }
        removed
    }

    /// Occupancy statistics
    pub fn stats(&self) -> ConversationStats {
        let contexts = self.contexts.read();
        let mut stats = ConversationStats {
            stored_contexts: contexts.len(),
            ..Default::default()
        };
        for entry in contexts.values() {
            let context = entry.lock();
            if !context.is_expired(self.config.timeout) {
                stats.live_contexts += 1;
                stats.total_messages += context.messages.len();
            }
        }
        stats
    }

    /// Periodically purge expired contexts in the background
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.purge_expired();
            }
        })
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
