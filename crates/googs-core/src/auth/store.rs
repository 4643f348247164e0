//! Durable storage for the backend token pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use super::TokenPair;

/// Fixed key of the persisted access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Fixed key of the persisted refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Base URL of the backend that issued the persisted pair.
pub const ORIGIN_KEY: &str = "sessionOrigin";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Stored secret is not valid UTF-8")]
    Encoding,
}

/// Per-key secret storage capability.
///
/// `put` replaces any previous value for the key; `delete` succeeds when the
/// key is already absent.
pub trait SecretBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local backend; nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn secrets(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SecretBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.secrets().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.secrets().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.secrets().remove(key);
        Ok(())
    }
}

/// The persisted copy of the session.
///
/// Loading is all-or-nothing: a store holding only one of the two tokens, or
/// an empty value, reads as signed out. Read and delete failures are logged
/// and treated as absence; write failures are returned.
///
/// Next to the pair the store records the base URL of the backend that issued
/// it, so a session is never restored against a different backend.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SecretBackend>,
}

impl SessionStore {
    pub fn new(backend: impl SecretBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_backend(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn save(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.backend.put(ACCESS_TOKEN_KEY, pair.access_token())?;
        self.backend.put(REFRESH_TOKEN_KEY, pair.refresh_token())?;
        debug!("Saved token pair to secure store");
        Ok(())
    }

    pub fn record_origin(&self, base_url: &str) -> Result<(), StoreError> {
        self.backend.put(ORIGIN_KEY, base_url)
    }

    pub fn origin(&self) -> Option<String> {
        self.read(ORIGIN_KEY)
    }

    pub fn load(&self) -> Option<TokenPair> {
        let access = self.read(ACCESS_TOKEN_KEY);
        let refresh = self.read(REFRESH_TOKEN_KEY);
        match (access, refresh) {
            (Some(access), Some(refresh)) => TokenPair::new(access, refresh),
            (None, None) => None,
            _ => {
                warn!("Secure store holds only part of a session, treating as signed out");
                None
            }
        }
    }

    pub fn clear(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, ORIGIN_KEY] {
            if let Err(e) = self.backend.delete(key) {
                warn!(key, error = %e, "Failed to delete secret");
            }
        }
        debug!("Cleared secure store");
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read secret");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod failing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// In-memory backend that, once armed, fails every write to one key.
    pub(crate) struct LockedKeyBackend {
        inner: MemoryBackend,
        key: &'static str,
        armed: AtomicBool,
    }

    impl LockedKeyBackend {
        pub(crate) fn new(key: &'static str) -> Self {
            Self {
                inner: MemoryBackend::new(),
                key,
                armed: AtomicBool::new(false),
            }
        }

        pub(crate) fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    impl SecretBackend for LockedKeyBackend {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if key == self.key && self.armed.load(Ordering::SeqCst) {
                return Err(StoreError::Crypto("locked".to_string()));
            }
            self.inner.put(key, value)
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key)
        }
    }

    /// Backend whose writes always fail; reads see nothing.
    pub(crate) struct FailingBackend;

    impl SecretBackend for FailingBackend {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Crypto("unavailable".to_string()))
        }

        fn put(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "keychain locked",
            )))
        }

        fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Crypto("unavailable".to_string()))
        }
    }
}
