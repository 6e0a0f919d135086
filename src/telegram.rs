//! Telegram Bot API transport
//!
//! Implements [`Transport`] on top of teloxide long polling.
//!
//! The Bot API has no dialog list and cannot import contacts, so:
//! - chats are remembered as updates arrive and serve as the dialog list
//! - direct resolution succeeds only for remembered chats
//! - entity lookup goes through `getChat` (numeric id or `@username`)
//! - contact import reports `Unsupported`
//!
//! Inbound messages are re-shaped into `UpdateNewMessage` events so they
//! flow through the same normalizer as every other transport.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, ShutdownToken, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{Chat, Recipient, Update},
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::transport::{ContactRecord, Dialog, Identity, Peer, PeerKind, Transport, TransportError};

/// Buffered inbound events before polling applies backpressure
const EVENT_BUFFER: usize = 256;

/// Chat remembered from inbound traffic or lookups
#[derive(Debug, Clone)]
struct KnownChat {
    peer: Peer,
    title: String,
}

type KnownChats = Arc<RwLock<HashMap<String, KnownChat>>>;

fn chat_kind(chat: &Chat) -> PeerKind {
    if chat.is_private() {
        PeerKind::User
    } else if chat.is_group() {
        PeerKind::Chat
    } else {
        PeerKind::Channel
    }
}

fn chat_title(chat: &Chat) -> String {
    chat.title()
        .or_else(|| chat.username())
        .or_else(|| chat.first_name())
        .unwrap_or("unknown")
        .to_string()
}

fn remember(chats: &KnownChats, chat: &Chat) -> Peer {
    let peer = Peer {
        id: chat.id.0.to_string(),
        kind: chat_kind(chat),
        access_hash: None,
    };
    chats.write().insert(
        peer.id.clone(),
        KnownChat {
            peer: peer.clone(),
            title: chat_title(chat),
        },
    );
    peer
}

/// Re-shape a Bot API message into an `UpdateNewMessage` event
fn new_message_event(
    message_id: i32,
    chat: &Peer,
    from_user: Option<u64>,
    own_id: Option<u64>,
    text: Option<&str>,
    date: i64,
) -> Value {
    let peer_id = match chat.kind {
        PeerKind::User => json!({ "userId": chat.id }),
        PeerKind::Chat => json!({ "chatId": chat.id }),
        PeerKind::Channel => json!({ "channelId": chat.id }),
    };
    let out = matches!((from_user, own_id), (Some(from), Some(me)) if from == me);

    json!({
        "className": "UpdateNewMessage",
        "message": {
            "id": message_id,
            "out": out,
            "message": text,
            "senderId": from_user.map(|id| id.to_string()),
            "peerId": peer_id,
            "fromId": from_user.map(|id| json!({ "userId": id.to_string() })),
            "date": date,
        }
    })
}

/// Shared state handed to the polling dispatcher
struct Ingress {
    events: mpsc::Sender<Value>,
    chats: KnownChats,
    own_id: Arc<AtomicU64>,
}

async fn on_message(msg: Message, ingress: Arc<Ingress>) -> ResponseResult<()> {
    let peer = remember(&ingress.chats, &msg.chat);
    let own_id = match ingress.own_id.load(Ordering::Relaxed) {
        0 => None,
        id => Some(id),
    };

    let event = new_message_event(
        msg.id.0,
        &peer,
        msg.from.as_ref().map(|u| u.id.0),
        own_id,
        msg.text().or_else(|| msg.caption()),
        msg.date.timestamp(),
    );

    if ingress.events.send(event).await.is_err() {
        warn!("Event receiver dropped, discarding update from {}", peer);
    }
    Ok(())
}

/// Telegram bot transport
pub struct BotTransport {
    bot: Bot,
    chats: KnownChats,
    own_id: Arc<AtomicU64>,
    connected: AtomicBool,
    shutdown: Mutex<Option<ShutdownToken>>,
}

impl BotTransport {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
            chats: Arc::new(RwLock::new(HashMap::new())),
            own_id: Arc::new(AtomicU64::new(0)),
            connected: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn recipient(id: &str) -> Result<Recipient, TransportError> {
        if id.starts_with('@') {
            return Ok(Recipient::ChannelUsername(id.to_string()));
        }
        id.parse::<i64>()
            .map(|n| Recipient::Id(ChatId(n)))
            .map_err(|_| TransportError::Resolution(format!("{} is not a chat id", id)))
    }
}

#[async_trait]
impl Transport for BotTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        self.own_id.store(me.user.id.0, Ordering::Relaxed);

        if let Err(e) = self.bot.delete_webhook().await {
            warn!("Failed to delete webhook: {} (continuing anyway)", e);
        }

        self.connected.store(true, Ordering::Release);
        info!(
            "Telegram client connected: @{}",
            me.user.username.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(token) = self.shutdown.lock().await.take() {
            match token.shutdown() {
                Ok(stopped) => stopped.await,
                Err(e) => debug!("Dispatcher was not running: {}", e),
            }
        }
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn current_identity(&self) -> Result<Identity, TransportError> {
        self.ensure_connected()?;
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Identity {
            id: me.user.id.0.to_string(),
            name: me.user.first_name.clone(),
            username: me.user.username.clone(),
        })
    }

    async fn resolve_entity(&self, id: &str) -> Result<Peer, TransportError> {
        self.chats
            .read()
            .get(id)
            .map(|known| known.peer.clone())
            .ok_or_else(|| TransportError::Resolution(id.to_string()))
    }

    async fn list_dialogs(&self) -> Result<Vec<Dialog>, TransportError> {
        self.ensure_connected()?;
        Ok(self
            .chats
            .read()
            .values()
            .map(|known| Dialog {
                title: known.title.clone(),
                entity: Some(known.peer.clone()),
            })
            .collect())
    }

    async fn lookup_entity(&self, id: &str) -> Result<Peer, TransportError> {
        self.ensure_connected()?;
        let chat = self
            .bot
            .get_chat(Self::recipient(id)?)
            .await
            .map_err(|e| TransportError::Resolution(format!("{}: {}", id, e)))?;
        Ok(remember(&self.chats, &chat))
    }

    async fn import_contact(&self, _record: &ContactRecord) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("contact import via Bot API"))
    }

    async fn send_message(&self, peer: &Peer, text: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let chat_id = peer
            .id
            .parse::<i64>()
            .map_err(|_| TransportError::Send(format!("{} is not a chat id", peer.id)))?;
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Value>, TransportError> {
        self.ensure_connected()?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let ingress = Arc::new(Ingress {
            events: tx,
            chats: Arc::clone(&self.chats),
            own_id: Arc::clone(&self.own_id),
        });

        let handler = Update::filter_message().endpoint(on_message);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![ingress])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.kind);
            })
            .error_handler(LoggingErrorHandler::with_custom_text(
                "Error in message handler",
            ))
            .build();

        *self.shutdown.lock().await = Some(dispatcher.shutdown_token());
        tokio::spawn(async move {
            info!("Starting long polling...");
            dispatcher.dispatch().await;
            warn!("Dispatcher stopped");
        });

        Ok(rx)
    }
}
