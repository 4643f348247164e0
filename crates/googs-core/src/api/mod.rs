//! REST client module for the Googs backend.
//!
//! This module provides the `BackendClient` that speaks the backend's auth
//! wire contract, the `Transport` seam it sends through, and the `ApiError`
//! taxonomy shared by every session operation.
//!
//! The backend uses bearer access tokens obtained by exchanging an identity
//! token at `/auth/google/exchange`.

pub mod client;
pub mod error;
pub mod transport;

pub use client::BackendClient;
pub use error::ApiError;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
