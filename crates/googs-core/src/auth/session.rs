use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Environment;

/// Backend-issued credentials. Both halves are always present and non-empty.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
}

impl TokenPair {
    /// Returns `None` unless both tokens are non-empty.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Option<Self> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();
        if access_token.is_empty() || refresh_token.is_empty() {
            return None;
        }
        Some(Self {
            access_token,
            refresh_token,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Same refresh token, new access token.
    pub fn with_access_token(&self, access_token: String) -> Self {
        Self {
            access_token,
            refresh_token: self.refresh_token.clone(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(TokenPair),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn pair(&self) -> Option<&TokenPair> {
        match self {
            SessionState::Authenticated(pair) => Some(pair),
            SessionState::Unauthenticated => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SignOutReason {
    UserRequested,
    RefreshRejected,
    EnvironmentChanged,
    /// The session could not be written to the secure store.
    PersistenceFailed,
}

/// Session lifecycle notifications published by the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionEvent {
    SignedIn,
    Refreshed,
    SignedOut { reason: SignOutReason },
    EnvironmentChanged { environment: Environment },
}

/// Snapshot for front ends; carries no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionStatus {
    pub authenticated: bool,
    pub environment: Environment,
    pub base_url: String,
}
