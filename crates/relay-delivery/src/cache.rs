//! Process-wide cache of remote API client handles.
//!
//! Handles are keyed by the (key, secret, base URL) triple a message carries.
//! Lookups of existing handles go straight to a concurrent map. Building a
//! missing handle happens inside a single construction section shared by all
//! keys, and the map is re-checked inside that section, so each triple is
//! built exactly once no matter how many callers race for it.
//!
//! Every handle wraps a clone of one `reqwest::Client`, so all credentials
//! share a single bounded connection pool.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Url,
};
use tracing::{debug, info};

use crate::error::{Result, SubmissionError};

/// Default idle keep-alive for pooled connections, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECONDS: u64 = 300;

/// Idle connections kept per remote host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 5;

/// Configuration for the shared transport client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// How long an idle pooled connection is kept alive.
    pub keep_alive: Duration,
    /// Deadline for a single submission request.
    pub timeout: Duration,
    /// Idle connections kept per host.
    pub max_idle_per_host: usize,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECONDS),
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            max_idle_per_host: POOL_MAX_IDLE_PER_HOST,
            user_agent: format!("event-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Credential triple identifying one cached handle.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    api_key: String,
    api_secret: String,
    base_url: String,
}

impl ClientKey {
    /// Creates a key from its parts.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self { api_key: api_key.into(), api_secret: api_secret.into(), base_url: base_url.into() }
    }

    /// Returns the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl fmt::Debug for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientKey")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Raw outcome of an upload call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Reason phrase, falling back to a body excerpt.
    pub message: String,
    /// Response headers with lower-cased names.
    pub headers: HashMap<String, String>,
}

impl ApiResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Client bound to one credential triple.
pub struct RemoteClientHandle {
    key: ClientKey,
    events_url: Url,
    authorization: HeaderValue,
    http: reqwest::Client,
}

impl RemoteClientHandle {
    /// Binds a transport client to a credential triple.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::Configuration` when the base URL does not
    /// parse or the credentials cannot form a header.
    pub fn new(http: reqwest::Client, key: ClientKey) -> Result<Self> {
        let base = Url::parse(key.base_url()).map_err(|e| {
            SubmissionError::configuration(format!("invalid base URL {}: {e}", key.base_url()))
        })?;

        let mut events_url = base.clone();
        let path = if base.path().ends_with('/') {
            format!("{}events", base.path())
        } else {
            format!("{}/events", base.path())
        };
        events_url.set_path(&path);

        let credentials = STANDARD.encode(format!("{}:{}", key.api_key, key.api_secret));
        let mut authorization = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| SubmissionError::configuration(format!("invalid credentials: {e}")))?;
        authorization.set_sensitive(true);

        Ok(Self { key, events_url, authorization, http })
    }

    /// Returns the credential triple this handle is bound to.
    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    /// Returns the URL batches are posted to.
    pub fn events_url(&self) -> &Url {
        &self.events_url
    }

    /// Posts one serialized batch.
    ///
    /// # Errors
    ///
    /// Returns the transport error when no response was received.
    pub async fn upload_events(
        &self,
        body: Vec<u8>,
    ) -> std::result::Result<ApiResponse, reqwest::Error> {
        let response = self
            .http
            .post(self.events_url.clone())
            .header(AUTHORIZATION, self.authorization.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let headers = extract_headers(response.headers());
        let message = match status.canonical_reason() {
            Some(reason) => reason.to_string(),
            None => {
                let body = response.text().await.unwrap_or_default();
                body.chars().take(256).collect()
            },
        };

        Ok(ApiResponse { status_code: status.as_u16(), message, headers })
    }
}

impl fmt::Debug for RemoteClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClientHandle")
            .field("key", &self.key)
            .field("events_url", &self.events_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Builds handles for cache misses.
pub trait HandleFactory: Send + Sync + 'static {
    /// Builds the handle for a credential triple.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::Configuration` when the triple cannot be
    /// turned into a working client.
    fn build(&self, key: &ClientKey) -> Result<RemoteClientHandle>;
}

/// Production factory sharing one pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpHandleFactory {
    http: reqwest::Client,
}

impl HttpHandleFactory {
    /// Creates the shared transport client.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::Configuration` if the HTTP client cannot be
    /// configured with the provided settings.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(config.keep_alive)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                SubmissionError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { http })
    }
}

impl HandleFactory for HttpHandleFactory {
    fn build(&self, key: &ClientKey) -> Result<RemoteClientHandle> {
        RemoteClientHandle::new(self.http.clone(), key.clone())
    }
}

/// Concurrent, single-flight cache of client handles.
pub struct ClientCache {
    handles: DashMap<ClientKey, Arc<RemoteClientHandle>>,
    construction: Mutex<()>,
    factory: Arc<dyn HandleFactory>,
}

impl ClientCache {
    /// Creates a cache backed by the shared HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::Configuration` if the transport client
    /// cannot be built.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        Ok(Self::with_factory(Arc::new(HttpHandleFactory::new(config)?)))
    }

    /// Creates a cache that builds handles with a custom factory.
    pub fn with_factory(factory: Arc<dyn HandleFactory>) -> Self {
        Self { handles: DashMap::new(), construction: Mutex::new(()), factory }
    }

    /// Returns the handle for a credential triple, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns the factory's error when a missing handle cannot be built.
    /// Failed constructions are not cached.
    pub fn get(
        &self,
        api_key: &str,
        api_secret: &str,
        base_url: &str,
    ) -> Result<Arc<RemoteClientHandle>> {
        let key = ClientKey::new(api_key, api_secret, base_url);

        if let Some(handle) = self.handles.get(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        // A panicking factory leaves nothing half-built behind the guard.
        let _guard = self.construction.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = self.handles.get(&key) {
            debug!(api_key, base_url, "client handle built by concurrent caller");
            return Ok(Arc::clone(handle.value()));
        }

        let handle = Arc::new(self.factory.build(&key)?);
        self.handles.insert(key, Arc::clone(&handle));

        info!(api_key, base_url, cached_clients = self.handles.len(), "built client handle");
        Ok(handle)
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handle has been built yet.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCache").field("cached_clients", &self.handles.len()).finish()
    }
}

/// Extracts headers into a map keyed by lower-cased name.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
