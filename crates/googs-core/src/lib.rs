//! Googs core library.
//!
//! Owns the authenticated backend session: exchanging identity tokens for
//! backend tokens, persisting them securely, refreshing and retrying on
//! expiry, and dropping every trace of the session on sign-out or when the
//! backend environment changes.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, BackendClient, ReqwestTransport, Transport};
pub use auth::{
    IdentityProvider, SessionEvent, SessionManager, SessionState, SessionStatus, SessionStore,
    TokenPair,
};
pub use config::{Config, Environment, EnvironmentTarget, StoreKind};
