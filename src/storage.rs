//! Persistent key-value storage behind a small port trait.
//!
//! The session provider only needs three operations, so backends stay
//! swappable:
//! - Web: `localStorage`
//! - Native: JSON files in the platform-appropriate config directory
//!   (e.g. `~/.config/tickdesk/` on Linux)
//! - Tests / ephemeral embedding: an in-memory map

use serde::{de::DeserializeOwned, Serialize};

/// Minimal persistence interface.
///
/// Implementations must tolerate missing keys; `remove` on an absent key is
/// not an error.
pub trait StoragePort {
    /// Returns the raw string stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, overwriting any prior value.
    ///
    /// Returns `true` if the operation succeeded.
    fn set(&self, key: &str, value: &str) -> bool;

    /// Removes the value stored under `key`.
    fn remove(&self, key: &str);
}

/// Serialize `value` as JSON and store it under `key`.
///
/// Returns `true` if the operation succeeded.
pub fn save<T: Serialize>(store: &dyn StoragePort, key: &str, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => store.set(key, &json),
        Err(_) => false,
    }
}

/// Load and deserialize the value stored under `key`.
///
/// Returns `None` if the key doesn't exist or the stored data fails to parse.
pub fn load<T: DeserializeOwned>(store: &dyn StoragePort, key: &str) -> Option<T> {
    let json = store.get(key)?;
    serde_json::from_str(&json).ok()
}

// =========================================
// Web (WASM) backend
// =========================================

/// Browser `localStorage`, scoped to the page origin.
#[cfg(target_arch = "wasm32")]
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalStorage;

#[cfg(target_arch = "wasm32")]
impl StoragePort for LocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        let window = web_sys::window()?;
        let storage = window.local_storage().ok()??;
        storage.get_item(key).ok()?
    }

    fn set(&self, key: &str, value: &str) -> bool {
        if let Some(window) = web_sys::window() {
            if let Ok(Some(storage)) = window.local_storage() {
                return storage.set_item(key, value).is_ok();
            }
        }
        false
    }

    fn remove(&self, key: &str) {
        if let Some(window) = web_sys::window() {
            if let Ok(Some(storage)) = window.local_storage() {
                let _ = storage.remove_item(key);
            }
        }
    }
}

// =========================================
// Native (file) backend
// =========================================

/// One JSON file per key under a base directory.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileStorage {
    /// Storage rooted at the platform config directory.
    ///
    /// Returns `None` when no config directory can be resolved.
    pub fn new() -> Option<Self> {
        let dir = dirs::config_dir()?.join("tickdesk");
        Some(Self { dir })
    }

    /// Storage rooted at an explicit directory.
    pub fn in_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl StoragePort for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        if std::fs::create_dir_all(&self.dir).is_err() {
            return false;
        }
        std::fs::write(self.path_for(key), value).is_ok()
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }
}

// =========================================
// In-memory backend
// =========================================

/// Non-durable map storage. Clones share the same entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    entries: std::rc::Rc<std::cell::RefCell<std::collections::HashMap<String, String>>>,
}

impl StoragePort for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        true
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trips_and_removes() {
        let store = MemoryStorage::default();
        assert_eq!(store.get("k"), None);
        assert!(store.set("k", "v"));
        assert_eq!(store.get("k"), Some("v".to_string()));

        let shared = store.clone();
        assert_eq!(shared.get("k"), Some("v".to_string()));

        store.remove("k");
        assert_eq!(shared.get("k"), None);
        // Removing an absent key is fine
        store.remove("k");
    }

    #[test]
    fn save_and_load_go_through_json() {
        let store = MemoryStorage::default();
        assert!(save(&store, "nums", &vec![1, 2, 3]));
        let loaded: Option<Vec<i32>> = load(&store, "nums");
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[test]
    fn load_tolerates_corrupt_data() {
        let store = MemoryStorage::default();
        store.set("bad", "{definitely not json");
        let loaded: Option<Vec<i32>> = load(&store, "bad");
        assert_eq!(loaded, None);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn file_storage_round_trips_in_a_directory() {
        let dir = std::env::temp_dir().join(format!("tickdesk-storage-test-{}", std::process::id()));
        let store = FileStorage::in_dir(&dir);

        assert_eq!(store.get("session"), None);
        assert!(store.set("session", "{\"a\":1}"));
        assert_eq!(store.get("session"), Some("{\"a\":1}".to_string()));
        store.remove("session");
        assert_eq!(store.get("session"), None);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
