//! HTTP transport boundary wrapped by the authenticated transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use url::Url;

/// Sends fully decorated requests. Implemented over reqwest in production and
/// by recording fakes in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Request addressed relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Appends a query pair. Repeated keys are kept in order.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serializes `body` as the JSON payload and sets the content type.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }
}

/// Response as seen by the caller. Non-2xx statuses are ordinary values here.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Looks up a header value. Values that are not visible ASCII read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Network-level failures. Passed through the authenticated transport untouched.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// [`HttpTransport`] backed by a reqwest client and a base URL.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: Url, http: Client) -> Self {
        Self { http, base_url }
    }

    /// Builds a dedicated reqwest client whose requests time out after `timeout`.
    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::new(base_url, http))
    }

    fn resolve(&self, request: &HttpRequest) -> Result<Url, TransportError> {
        let mut url = self.base_url.join(request.path.trim_start_matches('/'))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.resolve(&request)?;
        let mut builder = self
            .http
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn transport(server: &MockServer) -> ReqwestTransport {
        let base = Url::parse(&server.url("/helix/")).expect("url");
        ReqwestTransport::with_timeout(base, Duration::from_secs(5)).expect("transport")
    }

    #[tokio::test]
    async fn resolves_path_and_query_against_base_url() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/users")
                    .query_param("login", "a")
                    .header("x-test", "1");
                then.status(200)
                    .header("ratelimit-remaining", "799")
                    .json_body(json!({ "data": [] }));
            })
            .await;

        let response = transport(&server)
            .send(
                HttpRequest::get("/users")
                    .query("login", "a")
                    .header(
                        HeaderName::from_static("x-test"),
                        HeaderValue::from_static("1"),
                    ),
            )
            .await
            .expect("send");
        mock.assert_async().await;

        assert!(response.is_success());
        assert_eq!(response.header("Ratelimit-Remaining"), Some("799"));
        let body: serde_json::Value = response.json().expect("json");
        assert_eq!(body, json!({ "data": [] }));
    }

    #[tokio::test]
    async fn non_success_status_is_returned_not_raised() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/helix/things");
                then.status(503).body("busy");
            })
            .await;

        let response = transport(&server)
            .send(HttpRequest::post("things"))
            .await
            .expect("transport succeeds for 503");
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text(), "busy");
    }

    #[tokio::test]
    async fn json_body_sets_content_type() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/helix/things")
                    .header("content-type", "application/json")
                    .json_body(json!({ "a": 1 }));
                then.status(204);
            })
            .await;

        let request = HttpRequest::post("things")
            .json(&json!({ "a": 1 }))
            .expect("serialize");
        transport(&server).send(request).await.expect("send");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let base = Url::parse("http://127.0.0.1:1/").expect("url");
        let transport =
            ReqwestTransport::with_timeout(base, Duration::from_secs(2)).expect("transport");
        let err = transport
            .send(HttpRequest::get("users"))
            .await
            .expect_err("connection refused");
        assert!(matches!(err, TransportError::Http(_)));
    }
}
