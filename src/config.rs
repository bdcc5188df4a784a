//! Feed endpoint configuration.
//!
//! The connection manager never consults ambient globals at connect time; the
//! caller resolves the host and security context once and hands the result in.

/// Host used when nothing else is configured (local development backend).
pub const DEFAULT_FEED_HOST: &str = "localhost:8000";

const FEED_PATH: &str = "/ws/live";

/// Resolved location of the live feed endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedConfig {
    /// Host and optional port of the feed backend, e.g. `localhost:8000`.
    pub host: String,
    /// Whether to use the encrypted scheme (`wss`) instead of `ws`.
    pub secure: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_FEED_HOST.to_string(),
            secure: false,
        }
    }
}

impl FeedConfig {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    /// Config for `host` with the scheme matching the page security context:
    /// `wss` when the page itself was served over `https`.
    #[cfg(target_arch = "wasm32")]
    pub fn from_page(host: impl Into<String>) -> Self {
        let secure = web_sys::window()
            .and_then(|window| window.location().protocol().ok())
            .map(|protocol| protocol == "https:")
            .unwrap_or(false);
        Self::new(host, secure)
    }

    /// Full feed URL carrying `token` as a query credential.
    pub fn feed_url(&self, token: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{}://{}{}?token={}",
            scheme,
            self.host,
            FEED_PATH,
            urlencoding::encode(token)
        )
    }
}
