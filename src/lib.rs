//! Tickdesk Client Core - session lifecycle and real-time feed transport
//!
//! This crate contains the pieces of the tickdesk trading dashboard client
//! that talk to the backend's live data feed: the session provider that holds
//! the authenticated credential bundle, and the auto-reconnecting WebSocket
//! connection that streams market updates. Supports both web (WASM) and
//! native platforms.

pub mod config;
pub mod logging;
pub mod session;
pub mod storage;
pub mod ws;

pub use config::FeedConfig;
pub use session::{AppRecord, SessionProvider, SessionRecord};
pub use storage::{MemoryStorage, StoragePort};
pub use ws::{ConnectionState, FeedConnection, FeedError, FeedMessage, ReconnectPolicy};

#[cfg(target_arch = "wasm32")]
pub use storage::LocalStorage;

#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileStorage;
