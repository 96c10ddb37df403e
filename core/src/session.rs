/// Durable session storage — conversation identity and session tokens
///
/// The store is deliberately dumb key-value: no expiry, no encryption,
/// no versioning. Reads never fail; a broken store reads as absent so
/// the chat flow degrades instead of crashing.
use crate::error::{ChatError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::warn;

pub const KEY_CONVERSATION_ID: &str = "conversationId";
pub const KEY_USER_ID: &str = "userId";
pub const KEY_AUTH_TOKEN: &str = "authToken";
pub const KEY_FCM_TOKEN: &str = "fcmToken";

const SESSION_KEYS: [&str; 4] = [
    KEY_CONVERSATION_ID,
    KEY_USER_ID,
    KEY_AUTH_TOKEN,
    KEY_FCM_TOKEN,
];

/// Key-value persistence seam. The synchronizer only ever talks to
/// this trait, so tests can substitute `MemoryStore`.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Storage errors are logged and read as absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Durably persist a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Sled-backed store, one `session.db` per data directory.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("session.db"))
            .map_err(|e| ChatError::Storage(format!("session DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(val)) => String::from_utf8(val.to_vec()).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Session read failed for {}: {}", key, e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| ChatError::Storage(format!("set {}: {}", key, e)))?;
        self.db
            .flush()
            .map_err(|e| ChatError::Storage(format!("flush: {}", e)))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| ChatError::Storage(format!("delete {}: {}", key, e)))?;
        self.db
            .flush()
            .map_err(|e| ChatError::Storage(format!("flush: {}", e)))?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| ChatError::Storage("memory store lock poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| ChatError::Storage("memory store lock poisoned".to_string()))?;
        values.remove(key);
        Ok(())
    }
}

/// Typed facade over the well-known session keys.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn KeyValueStore>,
}

impl Session {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Open a sled-backed session under the given data directory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(SledStore::new(data_dir)?)))
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.store.get(KEY_CONVERSATION_ID)
    }

    pub fn set_conversation_id(&self, id: &str) -> Result<()> {
        self.store.set(KEY_CONVERSATION_ID, id)
    }

    pub fn user_id(&self) -> Option<String> {
        self.store.get(KEY_USER_ID)
    }

    pub fn set_user_id(&self, id: &str) -> Result<()> {
        self.store.set(KEY_USER_ID, id)
    }

    pub fn auth_token(&self) -> Option<String> {
        self.store.get(KEY_AUTH_TOKEN)
    }

    pub fn set_auth_token(&self, token: &str) -> Result<()> {
        self.store.set(KEY_AUTH_TOKEN, token)
    }

    pub fn fcm_token(&self) -> Option<String> {
        self.store.get(KEY_FCM_TOKEN)
    }

    pub fn set_fcm_token(&self, token: &str) -> Result<()> {
        self.store.set(KEY_FCM_TOKEN, token)
    }

    /// Logout: remove every session key, conversation identity included.
    pub fn clear(&self) -> Result<()> {
        for key in SESSION_KEYS {
            self.store.delete(key)?;
        }
        Ok(())
    }
}
