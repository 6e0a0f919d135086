//! Telegram AI Bridge
//!
//! Relays direct messages from a Telegram account to an OpenAI-compatible
//! chat model and sends the generated reply back to the sender.
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► Transport ──► events (normalize) ──► dispatch (per message task)
//!                 ▲                                   │
//!                 │                                   ├── conversation (history)
//!                 │                                   ├── model (chat completions)
//!                 └──────── peer (resolution ladder) ◄┘
//! ```

pub mod bridge;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod events;
pub mod health;
pub mod model;
pub mod peer;
pub mod telegram;
pub mod transport;

pub use bridge::{Bridge, BridgeOptions};
pub use config::Config;
pub use conversation::{ConversationStats, ConversationStore, StoreConfig};
pub use dispatch::{MessagePipeline, PipelineConfig, APOLOGY_REPLY, FALLBACK_REPLY};
pub use events::{IncomingMessage, NormalizedEvent};
pub use model::{ModelBackend, ModelError, OpenAiBackend, OpenAiConfig};
pub use peer::{PeerResolver, PeerUnresolved, ResolutionStrategy, SenderUnresolvable};
pub use telegram::BotTransport;
pub use transport::{ContactRecord, Dialog, Identity, Peer, PeerKind, Transport, TransportError};
