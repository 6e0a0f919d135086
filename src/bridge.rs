//! Bridge Service
//!
//! Wires transport, normalizer and pipeline together and runs the
//! ingestion loop until the event stream ends or shutdown is requested.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::dispatch::{MessagePipeline, PipelineConfig};
use crate::events;
use crate::model::ModelBackend;
use crate::peer::PeerResolver;
use crate::transport::{Identity, Transport};

/// Upper bound on cached peers when the cache is enabled
const PEER_CACHE_CAPACITY: u64 = 10_000;

/// Bridge runtime settings
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub pipeline: PipelineConfig,
    pub max_concurrent_dispatch: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            max_concurrent_dispatch: 64,
        }
    }
}

/// The running bridge
pub struct Bridge {
    transport: Arc<dyn Transport>,
    pipeline: Arc<MessagePipeline>,
    options: BridgeOptions,
    identity: RwLock<Option<Identity>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    pub fn new(
        transport: Arc<dyn Transport>,
        model: Arc<dyn ModelBackend>,
        store: Arc<ConversationStore>,
        resolver: Arc<PeerResolver>,
        options: BridgeOptions,
    ) -> Self {
        let pipeline = Arc::new(MessagePipeline::new(
            store,
            model,
            resolver,
            Arc::clone(&transport),
            options.pipeline.clone(),
        ));
        Self {
            transport,
            pipeline,
            options,
            identity: RwLock::new(None),
            sweeper: Mutex::new(None),
        }
    }

    /// Assemble a bridge from configuration
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        model: Arc<dyn ModelBackend>,
    ) -> Self {
        let store = Arc::new(ConversationStore::with_config(config.store));

        let mut resolver = PeerResolver::new(Arc::clone(&transport));
        if let Some(ttl) = config.peer_cache_ttl {
            resolver = resolver.with_cache(PEER_CACHE_CAPACITY, ttl);
        }

        let bridge = Self::new(
            transport,
            model,
            store,
            Arc::new(resolver),
            BridgeOptions {
                pipeline: PipelineConfig {
                    model_timeout: config.model_timeout,
                    record_fallback_replies: config.record_fallback_replies,
                },
                max_concurrent_dispatch: config.max_concurrent_dispatch,
            },
        );
        if let Some(interval) = config.sweep_interval {
            bridge.start_sweeper(interval);
        }
        bridge
    }

    /// Purge expired conversations every `interval` until `run` returns
    pub fn start_sweeper(&self, interval: Duration) {
        let handle = self.store().spawn_sweeper(interval);
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
        debug!("Conversation sweeper running every {:?}", interval);
    }

    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        self.pipeline.store()
    }

    /// Identity captured at connect time
    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    /// Connect the transport and record who we are
    pub async fn connect(&self) -> Result<Identity> {
        self.transport
            .connect()
            .await
            .context("Failed to connect to Telegram")?;
        // Peer handles from a previous session are no longer valid
        self.pipeline.resolver().invalidate_cache();

        let identity = self
            .transport
            .current_identity()
            .await
            .context("Failed to read current identity")?;
        info!("Logged in as {} ({})", identity.name, identity.id);
        *self.identity.write() = Some(identity.clone());
        Ok(identity)
    }

    /// Consume events until the stream closes or `shutdown` flips to true
    ///
    /// Every inbound message runs as its own task; at most
    /// `max_concurrent_dispatch` round-trips are in flight.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut events = self
            .transport
            .subscribe()
            .await
            .context("Failed to subscribe to updates")?;

        let permits = Arc::new(Semaphore::new(self.options.max_concurrent_dispatch.max(1)));
        let mut tasks = JoinSet::new();
        info!("Bot is running");

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                    continue;
                }
            };

            let Some(event) = event else {
                warn!("Event stream closed");
                break;
            };

            while tasks.try_join_next().is_some() {}

            let Some(message) = events::classify(&event) else {
                continue;
            };

            // Waiting for a free slot must not delay shutdown
            let permit = loop {
                tokio::select! {
                    permit = Arc::clone(&permits).acquire_owned() => break permit.ok(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break None;
                        }
                    }
                }
            };
            let Some(permit) = permit else {
                info!("Shutdown requested, dropping message from {}", message.sender_key);
                break;
            };
            let pipeline = Arc::clone(&self.pipeline);
            tasks.spawn(async move {
                let delivered = pipeline.handle(message).await;
                drop(permit);
                delivered
            });
        }

        debug!("Waiting for {} in-flight round-trips", tasks.len());
        while tasks.join_next().await.is_some() {}

        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        info!("Bridge stopped");
        Ok(())
    }
}
