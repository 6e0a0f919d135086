//! Peer Resolution
//!
//! Two directions:
//! - inbound: extract a canonical sender key from a raw message
//! - outbound: turn a raw id into a deliverable [`Peer`] via a resolution
//!   ladder, cheapest and most specific strategy first
//!
//! The last rung imports the id as a contact, which mutates the account's
//! address book. It only runs for phone-number-shaped ids.

use async_trait::async_trait;
use moka::future::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::events::{RawId, RawMessage};
use crate::transport::{ContactRecord, Peer, Transport, TransportError};

static PHONE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{5,15}$").expect("valid phone regex"));

/// Every rung of the resolution ladder failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No valid peer found for {0}")]
pub struct PeerUnresolved(pub String);

/// Inbound message carries no usable sender identity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Could not determine sender ID")]
pub struct SenderUnresolvable;

/// Whether a raw id looks like a phone number
pub fn is_phone_shaped(raw_id: &str) -> bool {
    PHONE_NUMBER.is_match(raw_id)
}

/// Extract the canonical sender key from a raw message
///
/// Priority: explicit sender id, then the peer's user/chat/channel id,
/// then the from-id's user id.
pub fn resolve_sender_key(message: &RawMessage) -> Result<String, SenderUnresolvable> {
    let peer = message.peer_id.as_ref();
    let from = message.from_id.as_ref();

    let candidates: [Option<&RawId>; 5] = [
        message.sender_id.as_ref(),
        peer.and_then(|p| p.user_id.as_ref()),
        peer.and_then(|p| p.chat_id.as_ref()),
        peer.and_then(|p| p.channel_id.as_ref()),
        from.and_then(|f| f.user_id.as_ref()),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(RawId::canonical)
        .ok_or(SenderUnresolvable)
}

/// One rung of the resolution ladder
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, transport: &dyn Transport, raw_id: &str) -> Result<Peer, TransportError>;
}

/// Ask the transport to resolve the id directly
pub struct DirectResolution;

#[async_trait]
impl ResolutionStrategy for DirectResolution {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn resolve(&self, transport: &dyn Transport, raw_id: &str) -> Result<Peer, TransportError> {
        transport.resolve_entity(raw_id).await
    }
}

/// Scan known dialogs for an entity with a matching id
pub struct DialogScan;

#[async_trait]
impl ResolutionStrategy for DialogScan {
    fn name(&self) -> &'static str {
        "dialog-scan"
    }

    async fn resolve(&self, transport: &dyn Transport, raw_id: &str) -> Result<Peer, TransportError> {
        transport
            .list_dialogs()
            .await?
            .into_iter()
            .filter_map(|dialog| dialog.entity)
            .find(|peer| peer.id == raw_id)
            .ok_or_else(|| TransportError::Resolution(format!("{} not in dialogs", raw_id)))
    }
}

/// Generic entity lookup
pub struct EntityLookup;

#[async_trait]
impl ResolutionStrategy for EntityLookup {
    fn name(&self) -> &'static str {
        "entity-lookup"
    }

    async fn resolve(&self, transport: &dyn Transport, raw_id: &str) -> Result<Peer, TransportError> {
        transport.lookup_entity(raw_id).await
    }
}

/// Import the id as a phone contact, then retry direct resolution once
pub struct ContactImport;

#[async_trait]
impl ResolutionStrategy for ContactImport {
    fn name(&self) -> &'static str {
        "contact-import"
    }

    async fn resolve(&self, transport: &dyn Transport, raw_id: &str) -> Result<Peer, TransportError> {
        if !is_phone_shaped(raw_id) {
            return Err(TransportError::Resolution(format!(
                "{} is not a phone number",
                raw_id
            )));
        }
        transport.import_contact(&ContactRecord::placeholder(raw_id)).await?;
        info!("Imported {} as contact", raw_id);
        transport.resolve_entity(raw_id).await
    }
}

/// The standard ladder: direct, dialog scan, entity lookup, contact import
pub fn default_ladder() -> Vec<Box<dyn ResolutionStrategy>> {
    vec![
        Box::new(DirectResolution),
        Box::new(DialogScan),
        Box::new(EntityLookup),
        Box::new(ContactImport),
    ]
}

/// Resolves raw ids into peers for outbound sends
pub struct PeerResolver {
    transport: Arc<dyn Transport>,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
    cache: Option<Cache<String, Peer>>,
}

impl PeerResolver {
    /// Resolver with the standard ladder and no cache
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_strategies(transport, default_ladder())
    }

    /// Resolver with a custom ladder
    pub fn with_strategies(
        transport: Arc<dyn Transport>,
        strategies: Vec<Box<dyn ResolutionStrategy>>,
    ) -> Self {
        Self {
            transport,
            strategies,
            cache: None,
        }
    }

    /// Remember resolved peers for `ttl`
    ///
    /// Cached handles belong to a session; call [`invalidate_cache`] after
    /// the transport reconnects.
    ///
    /// [`invalidate_cache`]: PeerResolver::invalidate_cache
    pub fn with_cache(mut self, max_entries: u64, ttl: Duration) -> Self {
        self.cache = Some(
            Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        );
        self
    }

    /// Drop all cached peers
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
            debug!("Peer cache invalidated");
        }
    }

    /// Walk the ladder until a strategy produces a peer
    pub async fn resolve_for_send(&self, raw_id: &str) -> Result<Peer, PeerUnresolved> {
        if let Some(cache) = &self.cache {
            if let Some(peer) = cache.get(raw_id).await {
                debug!("Peer cache HIT: {}", raw_id);
                return Ok(peer);
            }
        }

        for strategy in &self.strategies {
            match strategy.resolve(self.transport.as_ref(), raw_id).await {
                Ok(peer) => {
                    debug!("Resolved {} via {} -> {}", raw_id, strategy.name(), peer);
                    if let Some(cache) = &self.cache {
                        cache.insert(raw_id.to_string(), peer.clone()).await;
                    }
                    return Ok(peer);
                }
                Err(e) => {
                    debug!("Resolution of {} via {} failed: {}", raw_id, strategy.name(), e);
                }
            }
        }

        error!("Failed to resolve peer {}", raw_id);
        Err(PeerUnresolved(raw_id.to_string()))
    }
}
