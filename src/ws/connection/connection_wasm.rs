//! Web feed transport using `web_sys::WebSocket`.
//!
//! Everything runs on the browser event loop, so state lives in `Rc`/`Cell`
//! slots and the transport callbacks are `wasm_bindgen` closures. `connect`
//! and `disconnect` bump a generation counter; a closure or reconnect timer
//! belonging to an older generation stands down when it fires, so a stale
//! timer can never resurrect a connection after an explicit teardown.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{js_sys, CloseEvent, ErrorEvent, MessageEvent, WebSocket};

use super::{parse_frame, ConnectionState, FeedError, FeedMessage, ReconnectPolicy};
use crate::config::FeedConfig;

type MessageCallback = Rc<dyn Fn(FeedMessage)>;
type EventCallback = Rc<dyn Fn()>;
type ErrorCallback = Rc<dyn Fn(FeedError)>;

/// A managed feed connection (web implementation).
///
/// Cheap to clone; clones share the same underlying connection.
#[derive(Clone)]
pub struct FeedConnection {
    inner: Rc<Inner>,
}

struct Inner {
    config: FeedConfig,
    policy: ReconnectPolicy,
    state: RefCell<ConnectionState>,
    /// Bumped by `connect` and `disconnect`; stale closures and timers check
    /// it before touching the connection again.
    generation: Cell<u64>,
    /// Consecutive failed attempts; reset to 0 on a successful open.
    attempts: Cell<u32>,
    socket: RefCell<Option<WebSocket>>,
    on_message: RefCell<Option<MessageCallback>>,
    on_open: RefCell<Option<EventCallback>>,
    on_error: RefCell<Option<ErrorCallback>>,
    on_close: RefCell<Option<EventCallback>>,
}

impl FeedConnection {
    pub fn new(config: FeedConfig) -> Self {
        Self::with_policy(config, ReconnectPolicy::default())
    }

    pub fn with_policy(config: FeedConfig, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                policy,
                state: RefCell::new(ConnectionState::Idle),
                generation: Cell::new(0),
                attempts: Cell::new(0),
                socket: RefCell::new(None),
                on_message: RefCell::new(None),
                on_open: RefCell::new(None),
                on_error: RefCell::new(None),
                on_close: RefCell::new(None),
            }),
        }
    }

    /// Opens the feed using `token` as the query credential.
    ///
    /// Never returns an error: a failed construction feeds the reconnection
    /// path and is reported through `on_error`. Calling `connect` while a
    /// connection is live tears the old socket down and dials fresh.
    pub fn connect(&self, token: &str) {
        let inner = self.inner.clone();
        let generation = inner.generation.get() + 1;
        inner.generation.set(generation);
        teardown_socket(&inner);
        *inner.state.borrow_mut() = ConnectionState::Connecting;
        // The generation keeps this exact token for every one of its redials.
        open_socket(inner, generation, token.to_string());
    }

    /// Registers the message handler. A later call replaces the previous one.
    pub fn on_message(&self, callback: impl Fn(FeedMessage) + 'static) {
        *self.inner.on_message.borrow_mut() = Some(Rc::new(callback));
    }

    /// Registers the open hook. A later call replaces the previous one.
    pub fn on_open(&self, callback: impl Fn() + 'static) {
        *self.inner.on_open.borrow_mut() = Some(Rc::new(callback));
    }

    /// Registers the error hook. A later call replaces the previous one.
    pub fn on_error(&self, callback: impl Fn(FeedError) + 'static) {
        *self.inner.on_error.borrow_mut() = Some(Rc::new(callback));
    }

    /// Registers the close hook. A later call replaces the previous one.
    pub fn on_close(&self, callback: impl Fn() + 'static) {
        *self.inner.on_close.borrow_mut() = Some(Rc::new(callback));
    }

    /// Serializes `payload` and transmits it if the feed is open; otherwise a
    /// silent no-op. Nothing is queued for later.
    pub fn send<T: serde::Serialize>(&self, payload: &T) {
        if !self.inner.state.borrow().is_open() {
            return;
        }
        let socket = self.inner.socket.borrow();
        let Some(ws) = socket.as_ref() else {
            return;
        };
        if ws.ready_state() != WebSocket::OPEN {
            return;
        }
        match serde_json::to_string(payload) {
            Ok(text) => {
                if let Err(err) = ws.send_with_str(&text) {
                    crate::log_error!("Feed send failed: {:?}", err);
                }
            }
            Err(err) => {
                crate::log_error!("Failed to serialize outbound feed payload: {}", err);
                drop(socket);
                emit_error(&self.inner, FeedError::Serialize(err.to_string()));
            }
        }
    }

    /// Closes the feed and suppresses all automatic reconnection, including a
    /// reconnect wait already in flight. Terminal until the next `connect`.
    pub fn disconnect(&self) {
        self.inner.generation.set(self.inner.generation.get() + 1);
        teardown_socket(&self.inner);
        *self.inner.state.borrow_mut() = ConnectionState::Closed;
    }

    /// Snapshot of the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }
}

/// Closes and forgets the held socket, if any. Its close event still fires,
/// but the generation guard keeps it from scheduling a reconnect.
fn teardown_socket(inner: &Inner) {
    if let Some(ws) = inner.socket.borrow_mut().take() {
        let _ = ws.close();
    }
}

fn emit_message(inner: &Inner, message: FeedMessage) {
    let callback = inner.on_message.borrow().clone();
    if let Some(callback) = callback {
        callback(message);
    }
}

fn emit_event(slot: &RefCell<Option<EventCallback>>) {
    let callback = slot.borrow().clone();
    if let Some(callback) = callback {
        callback();
    }
}

fn emit_error(inner: &Inner, error: FeedError) {
    let callback = inner.on_error.borrow().clone();
    if let Some(callback) = callback {
        callback(error);
    }
}

fn open_socket(inner: Rc<Inner>, generation: u64, token: String) {
    let url = inner.config.feed_url(&token);
    let ws = match WebSocket::new(&url) {
        Ok(ws) => ws,
        Err(err) => {
            crate::log_error!("Feed connection error: {:?}", err);
            emit_error(&inner, FeedError::Transport(format!("{err:?}")));
            schedule_reconnect(inner, generation, token);
            return;
        }
    };

    // Set up open handler
    {
        let inner = inner.clone();
        let callback = Closure::wrap(Box::new(move |_: web_sys::Event| {
            if inner.generation.get() != generation {
                return;
            }
            inner.attempts.set(0);
            *inner.state.borrow_mut() = ConnectionState::Open;
            crate::log_info!("Feed connected to {}", inner.config.host);
            emit_event(&inner.on_open);
        }) as Box<dyn FnMut(web_sys::Event)>);
        ws.set_onopen(Some(callback.as_ref().unchecked_ref()));
        callback.forget();
    }

    // Set up message handler
    {
        let inner = inner.clone();
        let callback = Closure::wrap(Box::new(move |event: MessageEvent| {
            if inner.generation.get() != generation {
                return;
            }
            if let Ok(text) = event.data().dyn_into::<js_sys::JsString>() {
                let text: String = text.into();
                match parse_frame(&text) {
                    Ok(message) => emit_message(&inner, message),
                    Err(err) => {
                        crate::log_error!("Dropping malformed feed frame: {}", err);
                    }
                }
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        ws.set_onmessage(Some(callback.as_ref().unchecked_ref()));
        callback.forget();
    }

    // Set up error handler
    {
        let inner = inner.clone();
        let callback = Closure::wrap(Box::new(move |_: ErrorEvent| {
            crate::log_error!("Feed transport error");
            emit_error(&inner, FeedError::Transport("websocket error".to_string()));
        }) as Box<dyn FnMut(ErrorEvent)>);
        ws.set_onerror(Some(callback.as_ref().unchecked_ref()));
        callback.forget();
    }

    // Set up close handler
    {
        let inner = inner.clone();
        let callback = Closure::wrap(Box::new(move |event: CloseEvent| {
            crate::log_info!("Feed disconnected (code {})", event.code());
            emit_event(&inner.on_close);
            if inner.generation.get() != generation {
                // Closed on purpose, or replaced by a newer connection.
                return;
            }
            inner.socket.borrow_mut().take();
            schedule_reconnect(inner.clone(), generation, token.clone());
        }) as Box<dyn FnMut(CloseEvent)>);
        ws.set_onclose(Some(callback.as_ref().unchecked_ref()));
        callback.forget();
    }

    *inner.socket.borrow_mut() = Some(ws);
}

fn schedule_reconnect(inner: Rc<Inner>, generation: u64, token: String) {
    let attempts = inner.attempts.get();
    if !inner.policy.allows_retry(attempts) {
        crate::log_warn!("Feed reconnect budget exhausted after {} attempts", attempts);
        *inner.state.borrow_mut() = ConnectionState::Idle;
        return;
    }
    let attempt = attempts + 1;
    inner.attempts.set(attempt);
    *inner.state.borrow_mut() = ConnectionState::Reconnecting { attempt };
    crate::log_info!(
        "Reconnecting feed in {}ms (attempt {})",
        inner.policy.delay_ms,
        attempt
    );
    let delay = inner.policy.delay_ms;
    spawn_local(async move {
        gloo_timers::future::TimeoutFuture::new(delay).await;
        if inner.generation.get() != generation {
            // Disconnected while waiting; the timer must not redial.
            return;
        }
        *inner.state.borrow_mut() = ConnectionState::Connecting;
        open_socket(inner, generation, token);
    });
}
