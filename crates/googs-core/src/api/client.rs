//! Wire client for the Googs backend auth endpoints.
//!
//! `BackendClient` is stateless apart from its transport: every call takes the
//! base URL of the environment it targets, so the session manager stays the
//! single owner of "which backend am I talking to".

use std::sync::Arc;

use reqwest::{Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::TokenPair;

use super::{ApiError, HttpRequest, HttpResponse, Transport};

// ============================================================================
// Constants
// ============================================================================

pub const EXCHANGE_PATH: &str = "/auth/google/exchange";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const PUSH_TOKEN_PATH: &str = "/auth/fcm-token";
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    id_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PushTokenRequest<'a> {
    pub(crate) fcm_token: &'a str,
}

#[derive(Clone)]
pub struct BackendClient {
    transport: Arc<dyn Transport>,
}

impl BackendClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Join a base URL and an absolute path, rejecting anything that does not
    /// form a valid URL.
    pub fn endpoint(base_url: &str, path: &str) -> Result<String, ApiError> {
        if !path.starts_with('/') {
            return Err(ApiError::InvalidUrl(format!(
                "path must start with '/': {}",
                path
            )));
        }
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        Url::parse(&url).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", url, e)))?;
        Ok(url)
    }

    /// Exchange an identity-provider token for a backend token pair.
    pub async fn exchange(&self, base_url: &str, id_token: &str) -> Result<TokenPair, ApiError> {
        let url = Self::endpoint(base_url, EXCHANGE_PATH)?;
        let request =
            HttpRequest::new(Method::POST, url).with_json(&ExchangeRequest { id_token })?;

        let response = Self::expect_ok(self.transport.send(request).await?)?;
        let body: ExchangeResponse = serde_json::from_slice(&response.body)?;
        Self::note_token_type(body.token_type.as_deref());

        TokenPair::new(body.access_token, body.refresh_token)
            .ok_or_else(|| empty_token_error("exchange response carried an empty token"))
    }

    /// Mint a new access token. The refresh token itself is not rotated.
    pub async fn refresh(&self, base_url: &str, refresh_token: &str) -> Result<String, ApiError> {
        let url = Self::endpoint(base_url, REFRESH_PATH)?;
        let request =
            HttpRequest::new(Method::POST, url).with_json(&RefreshRequest { refresh_token })?;

        let response = Self::expect_ok(self.transport.send(request).await?)?;
        let body: RefreshResponse = serde_json::from_slice(&response.body)?;
        Self::note_token_type(body.token_type.as_deref());

        if body.access_token.is_empty() {
            return Err(empty_token_error("refresh response carried an empty access token"));
        }
        Ok(body.access_token)
    }

    /// Tell the backend the session is over. A single request; never retried.
    pub async fn logout(&self, base_url: &str, access_token: &str) -> Result<(), ApiError> {
        let url = Self::endpoint(base_url, LOGOUT_PATH)?;
        let request = HttpRequest::new(Method::POST, url).with_bearer(access_token);
        Self::check_response(self.transport.send(request).await?)?;
        Ok(())
    }

    /// Unauthenticated reachability probe.
    pub async fn health(&self, base_url: &str) -> Result<bool, ApiError> {
        let url = Self::endpoint(base_url, HEALTH_PATH)?;
        let response = self.transport.send(HttpRequest::new(Method::GET, url)).await?;
        if !response.status.is_success() {
            debug!(status = %response.status, "Health check returned non-success status");
        }
        Ok(response.status.is_success())
    }

    /// Send a bearer-authenticated request and return the raw response.
    /// Status codes are left to the caller.
    pub async fn send_authorized(
        &self,
        url: &str,
        method: Method,
        access_token: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, ApiError> {
        let request = HttpRequest::new(method, url)
            .with_bearer(access_token)
            .with_body(body);
        self.transport.send(request).await
    }

    /// Check if response is successful, returning an error with body if not.
    pub fn check_response(response: HttpResponse) -> Result<HttpResponse, ApiError> {
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.text()))
        }
    }

    /// Auth endpoints answer exactly 200 on success; anything else is an error.
    fn expect_ok(response: HttpResponse) -> Result<HttpResponse, ApiError> {
        if response.status == StatusCode::OK {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.text()))
        }
    }

    /// Decode a JSON body. An empty body decodes as `null` so unit-like
    /// responses (`()`, `Option<T>`) work for endpoints that return nothing.
    pub fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
        let body = response.body.as_slice();
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(body)?)
    }

    fn note_token_type(token_type: Option<&str>) {
        if let Some(kind) = token_type {
            if !kind.eq_ignore_ascii_case("bearer") {
                warn!(token_type = kind, "Backend issued a non-bearer token type");
            }
        }
    }
}

fn empty_token_error(message: &str) -> ApiError {
    ApiError::DecodingError(<serde_json::Error as serde::de::Error>::custom(message))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::transport::scripted::{self, ScriptedTransport};

    const BASE: &str = "http://backend.test";

    #[test]
    fn test_endpoint() {
        assert_eq!(
            BackendClient::endpoint("http://localhost:8000", "/auth/refresh").unwrap(),
            "http://localhost:8000/auth/refresh"
        );
        assert_eq!(
            BackendClient::endpoint("https://example.com/api/", "/emails").unwrap(),
            "https://example.com/api/emails"
        );
        assert!(matches!(
            BackendClient::endpoint(BASE, "emails"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            BackendClient::endpoint("not a base", "/emails"),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_decode_empty_body_as_unit() {
        let response = HttpResponse::new(StatusCode::OK, Vec::new());
        let _: () = BackendClient::decode(&response).unwrap();

        let decoded: Option<serde_json::Value> = BackendClient::decode(&response).unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn test_exchange_sends_id_token_and_parses_pair() {
        let transport = Arc::new(ScriptedTransport::sequence(vec![(
            EXCHANGE_PATH,
            vec![scripted::json(
                200,
                json!({"access_token": "A1", "refresh_token": "R1", "token_type": "bearer"}),
            )],
        )]));
        let client = BackendClient::new(transport.clone());

        let pair = client.exchange(BASE, "valid-id-token").await.unwrap();
        assert_eq!(pair.access_token(), "A1");
        assert_eq!(pair.refresh_token(), "R1");

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::POST);
        assert!(sent[0].bearer.is_none());
        let body: serde_json::Value = serde_json::from_slice(sent[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"id_token": "valid-id-token"}));
    }

    #[tokio::test]
    async fn test_exchange_status_handling() {
        let transport = Arc::new(ScriptedTransport::sequence(vec![(
            EXCHANGE_PATH,
            vec![
                scripted::status(401),
                scripted::json(500, json!({"detail": "boom"})),
                scripted::json(201, json!({"access_token": "A1", "refresh_token": "R1"})),
                scripted::json(200, json!({"access_token": "A1"})),
                scripted::json(200, json!({"access_token": "", "refresh_token": "R1"})),
            ],
        )]));
        let client = BackendClient::new(transport);

        assert!(matches!(
            client.exchange(BASE, "id").await,
            Err(ApiError::Unauthorized)
        ));
        match client.exchange(BASE, "id").await {
            Err(ApiError::ServerError { status, message }) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            client.exchange(BASE, "id").await,
            Err(ApiError::ServerError { .. })
        ));
        assert!(matches!(
            client.exchange(BASE, "id").await,
            Err(ApiError::DecodingError(_))
        ));
        assert!(matches!(
            client.exchange(BASE, "id").await,
            Err(ApiError::DecodingError(_))
        ));
        // Queue exhausted: the scripted backend refuses the connection
        assert!(matches!(
            client.exchange(BASE, "id").await,
            Err(ApiError::NetworkError(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_accepts_response_without_token_type() {
        let transport = Arc::new(ScriptedTransport::sequence(vec![(
            REFRESH_PATH,
            vec![scripted::json(200, json!({"access_token": "A2"}))],
        )]));
        let client = BackendClient::new(transport.clone());

        assert_eq!(client.refresh(BASE, "R1").await.unwrap(), "A2");
        let body: serde_json::Value =
            serde_json::from_slice(transport.requests()[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"refresh_token": "R1"}));
    }

    #[tokio::test]
    async fn test_health() {
        let transport = Arc::new(ScriptedTransport::sequence(vec![(
            HEALTH_PATH,
            vec![scripted::status(200), scripted::status(503)],
        )]));
        let client = BackendClient::new(transport);

        assert!(client.health(BASE).await.unwrap());
        assert!(!client.health(BASE).await.unwrap());
        assert!(matches!(
            client.health(BASE).await,
            Err(ApiError::NetworkError(_))
        ));
    }
}
