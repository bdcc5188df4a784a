//! Native feed transport using tokio-tungstenite.
//!
//! One background task per connection generation drives a select loop over
//! inbound frames, the outbound queue, and a shutdown signal. `connect` and
//! `disconnect` bump a generation counter; any task or timer belonging to an
//! older generation stands down the next time it checks, so a stale reconnect
//! wait can never resurrect a connection after an explicit teardown.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{parse_frame, ConnectionState, FeedError, FeedMessage, ReconnectPolicy};
use crate::config::FeedConfig;

type MessageCallback = Arc<dyn Fn(FeedMessage) + Send + Sync>;
type EventCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(FeedError) + Send + Sync>;

/// A managed feed connection (native implementation).
///
/// Cheap to clone; clones share the same underlying connection. Methods are
/// non-blocking and must be called from within a tokio runtime.
#[derive(Clone)]
pub struct FeedConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: FeedConfig,
    policy: ReconnectPolicy,
    state: Mutex<ConnectionState>,
    /// Bumped by `connect` and `disconnect`; stale tasks check it before
    /// touching the connection again.
    generation: AtomicU64,
    /// Consecutive failed attempts; reset to 0 on a successful open.
    attempts: AtomicU32,
    session: Mutex<Option<SessionHandle>>,
    on_message: Mutex<Option<MessageCallback>>,
    on_open: Mutex<Option<EventCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
    on_close: Mutex<Option<EventCallback>>,
}

/// Write half of the active socket session.
struct SessionHandle {
    outbound: mpsc::UnboundedSender<String>,
    shutdown: oneshot::Sender<()>,
}

impl FeedConnection {
    pub fn new(config: FeedConfig) -> Self {
        Self::with_policy(config, ReconnectPolicy::default())
    }

    pub fn with_policy(config: FeedConfig, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                state: Mutex::new(ConnectionState::Idle),
                generation: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                session: Mutex::new(None),
                on_message: Mutex::new(None),
                on_open: Mutex::new(None),
                on_error: Mutex::new(None),
                on_close: Mutex::new(None),
            }),
        }
    }

    /// Opens the feed using `token` as the query credential.
    ///
    /// Never returns an error: a failed dial feeds the reconnection path and
    /// is reported through `on_error`. Calling `connect` while a connection
    /// is live tears the old socket down and dials fresh.
    pub fn connect(&self, token: &str) {
        let inner = self.inner.clone();
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop_session(&inner);
        set_state(&inner, ConnectionState::Connecting);
        // The generation keeps this exact token for every one of its redials.
        let token = token.to_string();
        tokio::spawn(run_generation(inner, generation, token));
    }

    /// Registers the message handler. A later call replaces the previous one.
    pub fn on_message(&self, callback: impl Fn(FeedMessage) + Send + Sync + 'static) {
        *self.inner.on_message.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Registers the open hook. A later call replaces the previous one.
    pub fn on_open(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_open.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Registers the error hook. A later call replaces the previous one.
    pub fn on_error(&self, callback: impl Fn(FeedError) + Send + Sync + 'static) {
        *self.inner.on_error.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Registers the close hook. A later call replaces the previous one.
    pub fn on_close(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_close.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Serializes `payload` and transmits it if the feed is open; otherwise a
    /// silent no-op. Nothing is queued for later.
    pub fn send<T: serde::Serialize>(&self, payload: &T) {
        if !self.inner.state.lock().unwrap().is_open() {
            return;
        }
        let session = self.inner.session.lock().unwrap();
        let Some(handle) = session.as_ref() else {
            return;
        };
        match serde_json::to_string(payload) {
            Ok(text) => {
                let _ = handle.outbound.send(text);
            }
            Err(err) => {
                crate::log_error!("Failed to serialize outbound feed payload: {}", err);
                drop(session);
                emit_error(&self.inner, FeedError::Serialize(err.to_string()));
            }
        }
    }

    /// Closes the feed and suppresses all automatic reconnection, including a
    /// reconnect wait already in flight. Terminal until the next `connect`.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        drop_session(&self.inner);
        set_state(&self.inner, ConnectionState::Closed);
    }

    /// Snapshot of the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().unwrap().clone()
    }
}

fn set_state(inner: &Inner, state: ConnectionState) {
    *inner.state.lock().unwrap() = state;
}

/// State write on behalf of a generation. Takes effect only while that
/// generation is still current, so a background task can never clobber the
/// `Closed` written by a disconnect that raced ahead of it.
fn set_state_if_current(inner: &Inner, generation: u64, state: ConnectionState) {
    let mut current = inner.state.lock().unwrap();
    if inner.generation.load(Ordering::SeqCst) == generation {
        *current = state;
    }
}

fn drop_session(inner: &Inner) {
    if let Some(handle) = inner.session.lock().unwrap().take() {
        let _ = handle.shutdown.send(());
    }
}

fn emit_message(inner: &Inner, message: FeedMessage) {
    let callback = inner.on_message.lock().unwrap().clone();
    if let Some(callback) = callback {
        callback(message);
    }
}

fn emit_event(slot: &Mutex<Option<EventCallback>>) {
    let callback = slot.lock().unwrap().clone();
    if let Some(callback) = callback {
        callback();
    }
}

fn emit_error(inner: &Inner, error: FeedError) {
    let callback = inner.on_error.lock().unwrap().clone();
    if let Some(callback) = callback {
        callback(error);
    }
}

enum SessionEnd {
    /// Unplanned closure of the current generation; reconnection may follow.
    Dropped,
    /// A `disconnect` or newer `connect` took over; stand down.
    Superseded,
}

/// Dials, serves, and redials one connection generation until it is
/// superseded or the retry budget runs out.
async fn run_generation(inner: Arc<Inner>, generation: u64, token: String) {
    loop {
        match run_session(&inner, generation, &token).await {
            SessionEnd::Superseded => return,
            SessionEnd::Dropped => {
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let attempts = inner.attempts.load(Ordering::SeqCst);
                if !inner.policy.allows_retry(attempts) {
                    crate::log_warn!("Feed reconnect budget exhausted after {} attempts", attempts);
                    set_state_if_current(&inner, generation, ConnectionState::Idle);
                    return;
                }
                let attempt = attempts + 1;
                inner.attempts.store(attempt, Ordering::SeqCst);
                set_state_if_current(&inner, generation, ConnectionState::Reconnecting { attempt });
                crate::log_info!(
                    "Reconnecting feed in {}ms (attempt {})",
                    inner.policy.delay_ms,
                    attempt
                );
                tokio::time::sleep(Duration::from_millis(inner.policy.delay_ms as u64)).await;
                if inner.generation.load(Ordering::SeqCst) != generation {
                    // Disconnected while waiting; the timer must not redial.
                    return;
                }
                set_state_if_current(&inner, generation, ConnectionState::Connecting);
            }
        }
    }
}

async fn run_session(inner: &Arc<Inner>, generation: u64, token: &str) -> SessionEnd {
    let url = inner.config.feed_url(token);
    let mut stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            crate::log_error!("Feed connection error: {}", err);
            emit_error(inner, FeedError::Transport(err.to_string()));
            return if inner.generation.load(Ordering::SeqCst) == generation {
                SessionEnd::Dropped
            } else {
                SessionEnd::Superseded
            };
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let superseded = {
        let mut session = inner.session.lock().unwrap();
        if inner.generation.load(Ordering::SeqCst) != generation {
            true
        } else {
            *session = Some(SessionHandle {
                outbound: outbound_tx,
                shutdown: shutdown_tx,
            });
            inner.attempts.store(0, Ordering::SeqCst);
            false
        }
    };
    if superseded {
        // Teardown won the race against the dial.
        let _ = stream.close(None).await;
        return SessionEnd::Superseded;
    }
    set_state_if_current(inner, generation, ConnectionState::Open);
    crate::log_info!("Feed connected to {}", inner.config.host);
    emit_event(&inner.on_open);

    let end = loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                let _ = stream.close(None).await;
                break SessionEnd::Superseded;
            }
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(text) => {
                        if let Err(err) = stream.send(Message::Text(text.into())).await {
                            crate::log_error!("Feed send failed: {}", err);
                            emit_error(inner, FeedError::Transport(err.to_string()));
                            break finish_session(inner, generation);
                        }
                    }
                    // Our sender half was dropped: this session was replaced.
                    None => break finish_session(inner, generation),
                }
            }
            maybe_inbound = stream.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        match parse_frame(text.as_str()) {
                            Ok(message) => emit_message(inner, message),
                            Err(err) => {
                                crate::log_error!("Dropping malformed feed frame: {}", err);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        crate::log_info!("Feed disconnected");
                        break finish_session(inner, generation);
                    }
                    // Ping/pong are answered by tungstenite; binary is ignored.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        crate::log_error!("Feed read error: {}", err);
                        emit_error(inner, FeedError::Transport(err.to_string()));
                        break finish_session(inner, generation);
                    }
                }
            }
        }
    };

    emit_event(&inner.on_close);
    end
}

/// Classifies the end of a socket session and, when this generation is still
/// current, releases its write half.
fn finish_session(inner: &Inner, generation: u64) -> SessionEnd {
    if inner.generation.load(Ordering::SeqCst) == generation {
        inner.session.lock().unwrap().take();
        SessionEnd::Dropped
    } else {
        SessionEnd::Superseded
    }
}
