//! Session provider: the authenticated credential bundle and its persistence.
//!
//! One provider instance owns the current session record. It does no network
//! work of its own; login and refresh flows construct a [`SessionRecord`] and
//! hand it over, and the feed connection receives a token string extracted
//! from it by the caller.

use std::cell::RefCell;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{self, StoragePort};

/// Storage key for the persisted session record.
pub const SESSION_KEY: &str = "tickdesk_session";
/// Storage key for the last-selected trading application.
pub const ACTIVE_APP_KEY: &str = "tickdesk_active_app";

/// Credential bundle for an authenticated broker session.
///
/// An immutable snapshot: replaced wholesale on login/refresh, cleared
/// wholesale on logout.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    /// Bearer token for API calls.
    pub access_token: String,
    /// Token authorizing the streaming feed connection.
    pub feed_token: String,
    /// Instant after which the tokens are no longer usable.
    pub token_expiry: DateTime<Utc>,
    /// Trading application the session was opened for.
    pub app_id: i64,
}

/// Last-selected trading application, persisted so the choice survives a
/// page reload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppRecord {
    pub id: i64,
    pub name: String,
}

/// Holds the current session record and answers synchronous queries about it.
///
/// Persistence goes through the [`StoragePort`] the provider was constructed
/// with, so it is storage-agnostic: `localStorage` on the web, config-dir
/// files on native, an in-memory map in tests. Corrupt stored data is treated
/// as "no session" and never surfaces as an error.
pub struct SessionProvider {
    store: Box<dyn StoragePort>,
    cached: RefCell<Option<SessionRecord>>,
}

impl SessionProvider {
    pub fn new(store: impl StoragePort + 'static) -> Self {
        Self {
            store: Box::new(store),
            cached: RefCell::new(None),
        }
    }

    /// Replaces the current session record and persists it.
    pub fn set_session(&self, record: SessionRecord) {
        if !storage::save(self.store.as_ref(), SESSION_KEY, &record) {
            crate::log_warn!("Failed to persist session record");
        }
        *self.cached.borrow_mut() = Some(record);
    }

    /// Current session record, rehydrating from storage on a cold cache.
    pub fn session(&self) -> Option<SessionRecord> {
        if let Some(record) = self.cached.borrow().as_ref() {
            return Some(record.clone());
        }
        let record: Option<SessionRecord> = storage::load(self.store.as_ref(), SESSION_KEY);
        if let Some(record) = record.as_ref() {
            *self.cached.borrow_mut() = Some(record.clone());
        }
        record
    }

    /// Removes the in-memory and durable copies. Idempotent.
    pub fn clear_session(&self) {
        self.cached.borrow_mut().take();
        self.store.remove(SESSION_KEY);
    }

    /// Bearer token for API calls, if a session exists.
    pub fn access_token(&self) -> Option<String> {
        self.session().map(|session| session.access_token)
    }

    /// Token for the streaming feed connection, if a session exists.
    pub fn feed_token(&self) -> Option<String> {
        self.session().map(|session| session.feed_token)
    }

    /// A session is valid iff present and its expiry is strictly in the
    /// future.
    pub fn is_session_valid(&self) -> bool {
        match self.session() {
            Some(session) => session.token_expiry > Utc::now(),
            None => false,
        }
    }

    /// Application id recorded in the session, if a session exists.
    pub fn active_app_id(&self) -> Option<i64> {
        self.session().map(|session| session.app_id)
    }

    /// Persists the last-selected application.
    pub fn set_active_app(&self, app: &AppRecord) {
        if !storage::save(self.store.as_ref(), ACTIVE_APP_KEY, app) {
            crate::log_warn!("Failed to persist active app record");
        }
    }

    /// Last-selected application, if one was stored and parses.
    pub fn active_app(&self) -> Option<AppRecord> {
        storage::load(self.store.as_ref(), ACTIVE_APP_KEY)
    }

    /// Forgets the last-selected application. Idempotent.
    pub fn clear_active_app(&self) {
        self.store.remove(ACTIVE_APP_KEY);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::storage::MemoryStorage;

    fn record(expiry: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            access_token: "access-1".to_string(),
            feed_token: "feed-1".to_string(),
            token_expiry: expiry,
            app_id: 7,
        }
    }

    #[test]
    fn session_survives_a_fresh_provider() {
        let store = MemoryStorage::default();
        let provider = SessionProvider::new(store.clone());
        let session = record(Utc::now() + Duration::hours(8));
        provider.set_session(session.clone());

        let fresh = SessionProvider::new(store);
        assert_eq!(fresh.session(), Some(session));
    }

    #[test]
    fn clear_session_removes_both_copies() {
        let store = MemoryStorage::default();
        let provider = SessionProvider::new(store.clone());
        provider.set_session(record(Utc::now() + Duration::hours(1)));

        provider.clear_session();
        assert_eq!(provider.session(), None);
        assert_eq!(SessionProvider::new(store).session(), None);

        // Idempotent
        provider.clear_session();
        assert_eq!(provider.session(), None);
    }

    #[test]
    fn corrupt_stored_session_reads_as_absent() {
        let store = MemoryStorage::default();
        store.set(SESSION_KEY, "{not valid json");

        let provider = SessionProvider::new(store);
        assert_eq!(provider.session(), None);
        assert_eq!(provider.access_token(), None);
        assert!(!provider.is_session_valid());
    }

    #[test]
    fn validity_requires_a_strictly_future_expiry() {
        let store = MemoryStorage::default();
        let provider = SessionProvider::new(store);

        provider.set_session(record(Utc::now() - Duration::seconds(1)));
        assert!(!provider.is_session_valid());

        // An expiry captured "now" is already in the past by query time
        provider.set_session(record(Utc::now()));
        assert!(!provider.is_session_valid());

        provider.set_session(record(Utc::now() + Duration::hours(8)));
        assert!(provider.is_session_valid());
    }

    #[test]
    fn derived_queries_are_absent_without_a_session() {
        let provider = SessionProvider::new(MemoryStorage::default());
        assert_eq!(provider.access_token(), None);
        assert_eq!(provider.feed_token(), None);
        assert_eq!(provider.active_app_id(), None);
        assert!(!provider.is_session_valid());
    }

    #[test]
    fn derived_queries_read_the_current_record() {
        let provider = SessionProvider::new(MemoryStorage::default());
        provider.set_session(record(Utc::now() + Duration::hours(8)));
        assert_eq!(provider.access_token(), Some("access-1".to_string()));
        assert_eq!(provider.feed_token(), Some("feed-1".to_string()));
        assert_eq!(provider.active_app_id(), Some(7));
    }

    #[test]
    fn set_session_overwrites_the_previous_record() {
        let store = MemoryStorage::default();
        let provider = SessionProvider::new(store.clone());
        provider.set_session(record(Utc::now() + Duration::hours(1)));

        let mut replacement = record(Utc::now() + Duration::hours(2));
        replacement.feed_token = "feed-2".to_string();
        provider.set_session(replacement.clone());

        assert_eq!(provider.feed_token(), Some("feed-2".to_string()));
        assert_eq!(SessionProvider::new(store).session(), Some(replacement));
    }

    #[test]
    fn active_app_round_trips_and_clears() {
        let store = MemoryStorage::default();
        let provider = SessionProvider::new(store.clone());
        let app = AppRecord {
            id: 3,
            name: "paper".to_string(),
        };
        provider.set_active_app(&app);
        assert_eq!(provider.active_app(), Some(app.clone()));
        assert_eq!(SessionProvider::new(store).active_app(), Some(app));

        provider.clear_active_app();
        assert_eq!(provider.active_app(), None);
        provider.clear_active_app();
    }
}
