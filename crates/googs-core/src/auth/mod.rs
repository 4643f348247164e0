//! Authentication module for the backend session.
//!
//! This module provides:
//! - `SessionManager`: token exchange, authenticated requests with a single
//!   refresh-and-retry, sign-out and environment switching
//! - `SessionStore`: all-or-nothing persistence of the token pair over a
//!   `SecretBackend` (OS keychain, encrypted files, or memory)
//! - `IdentityProvider`: where fresh identity tokens come from

pub mod credentials;
pub mod identity;
pub mod manager;
pub mod session;
pub mod store;
pub mod vault;

pub use credentials::KeychainBackend;
pub use identity::{IdentityProvider, StaticIdentityProvider};
pub use manager::SessionManager;
pub use session::{SessionEvent, SessionState, SessionStatus, SignOutReason, TokenPair};
pub use store::{MemoryBackend, SecretBackend, SessionStore, StoreError};
pub use vault::EncryptedFileBackend;
