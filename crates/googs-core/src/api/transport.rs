//! HTTP seam between the session manager and the network.
//!
//! The manager only ever talks to a [`Transport`]. Production code uses
//! [`ReqwestTransport`]; tests plug in a scripted transport that records every
//! outbound request.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client, Method, StatusCode, Url};
use serde::Serialize;

use super::ApiError;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bearer: None,
            body: None,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn with_body(mut self, body: Option<Vec<u8>>) -> Self {
        self.body = body;
        self
    }

    pub fn with_json<B: Serialize>(self, body: &B) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(body)?;
        Ok(self.with_body(Some(bytes)))
    }

    /// Path component of the target URL, empty if the URL does not parse.
    pub fn path(&self) -> String {
        Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_default()
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends a single HTTP request and hands back the full response.
///
/// Implementations report transport failures (DNS, timeouts, refused
/// connections) as [`ApiError::NetworkError`] and never interpret status codes.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>>;
}

/// Transport backed by a pooled `reqwest::Client`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>> {
        Box::pin(async move {
            let HttpRequest {
                method,
                url,
                bearer,
                body,
            } = request;

            let mut builder = self
                .client
                .request(method, &url)
                .header(header::ACCEPT, "application/json");
            if let Some(token) = bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = body {
                builder = builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            // Headers arrived but the body did not; the envelope is unusable
            let body = response
                .bytes()
                .await
                .map_err(|e| ApiError::InvalidResponse(format!("unreadable body: {}", e)))?
                .to_vec();
            Ok(HttpResponse { status, body })
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_debug_redacts_bearer() {
        let request = HttpRequest::new(Method::GET, "http://backend.test/emails")
            .with_bearer("super-secret");
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_request_path() {
        let request = HttpRequest::new(Method::POST, "http://localhost:8000/auth/refresh");
        assert_eq!(request.path(), "/auth/refresh");

        let request = HttpRequest::new(Method::POST, "not a url");
        assert_eq!(request.path(), "");
    }

    /// Serve one response that promises more body than it sends, then hang up.
    fn truncated_body_server() -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request);
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort")
                .unwrap();
        });
        format!("http://{}/emails", addr)
    }

    #[tokio::test]
    async fn test_truncated_body_is_invalid_response() {
        let url = truncated_body_server();
        let transport = ReqwestTransport::new().unwrap();

        let result = transport.send(HttpRequest::new(Method::GET, url)).await;
        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let transport = ReqwestTransport::new().unwrap();

        let result = transport
            .send(HttpRequest::new(Method::GET, format!("http://{}/health", addr)))
            .await;
        assert!(matches!(result, Err(ApiError::NetworkError(_))));
    }
}
