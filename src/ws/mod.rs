//! Real-time feed transport.
//!
//! One [`FeedConnection`] owns one logical WebSocket to the backend's live
//! feed. It is constructed with a resolved [`FeedConfig`](crate::FeedConfig),
//! connected with a token the caller extracted from the session provider, and
//! observed through single-slot callbacks:
//!
//! ```rust,ignore
//! let feed = FeedConnection::new(FeedConfig::new("localhost:8000", false));
//! feed.on_message(|message| {
//!     // one callback per inbound frame, in arrival order
//! });
//! feed.connect(&token);
//! // ... later
//! feed.disconnect();
//! ```
//!
//! Unplanned closures are recovered automatically: up to
//! [`ReconnectPolicy::max_attempts`] redials, each after a fixed
//! [`ReconnectPolicy::delay_ms`] wait, reusing the token from the last
//! `connect` call. A successful open refills the budget. `disconnect` is
//! final until `connect` is called again.

mod connection;

pub use connection::{ConnectionState, FeedConnection, FeedError, FeedMessage, ReconnectPolicy};
