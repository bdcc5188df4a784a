//! Feed connection types shared by the platform transports.
//!
//! This module holds the state machine vocabulary and the framing contract;
//! the platform-specific implementation is conditionally included below.

use std::fmt;

use serde::Deserialize;

/// Connection lifecycle state for the streaming feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. The initial state, and where the manager lands when the
    /// reconnect budget runs out.
    Idle,
    /// A dial is in flight.
    Connecting,
    /// Transport established; `send` is live.
    Open,
    /// Waiting out the delay before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// Torn down by an explicit `disconnect`. Terminal until the next
    /// `connect` call.
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Bounded reconnect behavior for unplanned closures.
///
/// The wait between attempts is a flat delay, not an exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of automatic reconnect attempts per outage.
    pub max_attempts: u32,
    /// Fixed wait before each reconnect attempt, in milliseconds.
    pub delay_ms: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 3000,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another automatic attempt may be made after `attempts`
    /// consecutive failures.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// One decoded feed message: an arbitrary JSON object.
///
/// No schema is enforced at this layer; interpreting the fields is the
/// consumer's concern.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct FeedMessage(pub serde_json::Map<String, serde_json::Value>);

impl FeedMessage {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

/// Decode one wire frame. Anything that is not a JSON object is rejected.
pub(crate) fn parse_frame(text: &str) -> Result<FeedMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Errors reported through the `on_error` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Transport-level failure (dial, read, or write).
    Transport(String),
    /// An outbound payload could not be serialized.
    Serialize(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Transport(msg) => write!(f, "Feed transport error: {}", msg),
            FeedError::Serialize(msg) => write!(f, "Feed serialize error: {}", msg),
        }
    }
}

impl std::error::Error for FeedError {}

// Include platform-specific implementation
#[cfg(target_arch = "wasm32")]
mod connection_wasm;
#[cfg(target_arch = "wasm32")]
pub use connection_wasm::FeedConnection;

#[cfg(not(target_arch = "wasm32"))]
mod connection_native;
#[cfg(not(target_arch = "wasm32"))]
pub use connection_native::FeedConnection;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_five_attempts_at_three_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_ms, 3000);
    }

    #[test]
    fn retry_budget_is_a_strict_bound() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
        assert!(!policy.allows_retry(6));
    }

    #[test]
    fn state_predicates() {
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Idle.is_open());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(ConnectionState::Reconnecting { attempt: 2 }.is_connecting());
        assert!(!ConnectionState::Closed.is_connecting());
    }

    #[test]
    fn frames_must_be_json_objects() {
        let message = parse_frame(r#"{"type":"tick","ltp":101.5}"#).expect("object frame");
        assert_eq!(
            message.get("type").and_then(|value| value.as_str()),
            Some("tick")
        );

        assert!(parse_frame("not json at all").is_err());
        assert!(parse_frame("[1,2,3]").is_err());
        assert!(parse_frame("42").is_err());
    }
}
