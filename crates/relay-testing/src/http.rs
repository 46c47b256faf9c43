//! Mock remote event API for relay tests.
//!
//! Each mocked tenant lives under its own path prefix, so a message's base
//! URL override decides which canned response it receives.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Wiremock server standing in for the remote event API.
pub struct MockEventsApi {
    server: MockServer,
}

impl MockEventsApi {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Returns the server root URL, without trailing slash.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Returns the base URL for a path prefix, e.g. `/tenant-a/`.
    pub fn base_url(&self, prefix: &str) -> String {
        format!("{}/{}/", self.server.uri(), prefix.trim_matches('/'))
    }

    /// Mounts a canned response for one prefix.
    pub async fn mock(&self, endpoint: MockEndpoint) {
        let response = match endpoint.response {
            MockResponse::Status { status, retry_after } => {
                let mut response = ResponseTemplate::new(status.as_u16());
                if let Some(value) = retry_after {
                    response = response.insert_header("Retry-After", value);
                }
                response
            },
            MockResponse::Delayed { status, delay } => {
                ResponseTemplate::new(status.as_u16()).set_delay(delay)
            },
        };

        let events_path = format!("/{}/events", endpoint.prefix.trim_matches('/'));
        let mut mock = Mock::given(method("POST")).and(path(events_path));
        if let Some(authorization) = &endpoint.expected_authorization {
            mock = mock.and(header("authorization", authorization.as_str()));
        }

        let mock = mock.respond_with(response);
        match endpoint.expected_calls {
            Some(calls) => mock.expect(calls).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Mounts a 202 response for a prefix.
    pub async fn accept(&self, prefix: &str) {
        self.mock(MockEndpoint::success(prefix)).await;
    }

    /// Mounts a failure response for a prefix.
    pub async fn reject(&self, prefix: &str, status: StatusCode) {
        self.mock(MockEndpoint::failure(prefix, status)).await;
    }

    /// Returns every request the server received.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                method: request.method.to_string(),
                path: request.url.path().to_string(),
                headers: request.headers.clone(),
                body: Bytes::from(request.body),
            })
            .collect()
    }

    /// Number of requests received so far.
    pub async fn request_count(&self) -> usize {
        self.received_requests().await.len()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let received = self.request_count().await;
        assert_eq!(received, expected, "expected {expected} requests, received {received}");
    }

    /// Checks the `expect` counts of mounted mocks.
    pub async fn verify(&self) {
        self.server.verify().await;
    }
}

/// Canned response for one path prefix.
pub struct MockEndpoint {
    prefix: String,
    expected_authorization: Option<String>,
    expected_calls: Option<u64>,
    response: MockResponse,
}

impl MockEndpoint {
    /// Responds 202 Accepted.
    pub fn success(prefix: impl Into<String>) -> Self {
        Self::with_response(
            prefix,
            MockResponse::Status { status: StatusCode::ACCEPTED, retry_after: None },
        )
    }

    /// Responds with a failure status.
    pub fn failure(prefix: impl Into<String>, status: StatusCode) -> Self {
        Self::with_response(prefix, MockResponse::Status { status, retry_after: None })
    }

    /// Responds 429 with a `Retry-After` header.
    pub fn rate_limited(prefix: impl Into<String>, retry_after: impl Into<String>) -> Self {
        Self::with_response(
            prefix,
            MockResponse::Status {
                status: StatusCode::TOO_MANY_REQUESTS,
                retry_after: Some(retry_after.into()),
            },
        )
    }

    /// Responds only after `delay`.
    pub fn delayed(prefix: impl Into<String>, status: StatusCode, delay: Duration) -> Self {
        Self::with_response(prefix, MockResponse::Delayed { status, delay })
    }

    fn with_response(prefix: impl Into<String>, response: MockResponse) -> Self {
        Self { prefix: prefix.into(), expected_authorization: None, expected_calls: None, response }
    }

    /// Only matches requests carrying this `Authorization` header.
    #[must_use]
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.expected_authorization = Some(value.into());
        self
    }

    /// Expects exactly `calls` matching requests.
    #[must_use]
    pub fn expect(mut self, calls: u64) -> Self {
        self.expected_calls = Some(calls);
        self
    }
}

/// Kinds of canned responses.
pub enum MockResponse {
    /// Immediate response with an optional `Retry-After` value.
    Status {
        /// Response status
        status: StatusCode,
        /// Raw `Retry-After` header value
        retry_after: Option<String>,
    },
    /// Response sent after a delay.
    Delayed {
        /// Response status
        status: StatusCode,
        /// Delay before responding
        delay: Duration,
    },
}

/// A request received by the mock API.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Decodes the body as JSON, `Value::Null` when it is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}
