//! Submission of validated messages to the remote event API.
//!
//! The submitter resolves the base URL, fetches the cached client handle for
//! the message's credentials, posts the translated batch and classifies the
//! outcome into a `SubmissionError` kind.

use std::{fmt, sync::Arc};

use chrono::{DateTime, NaiveDateTime, Utc};
use relay_core::{BatchEnvironment, Clock, OutgoingMessage, RealClock};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    cache::{ApiResponse, ClientCache},
    error::{Result, SubmissionError},
    validator::encode_batch,
};

/// Base URL used when a message carries no override.
pub const DEFAULT_BASE_URL: &str = "https://inbound.mparticle.com/s2s/v2/";

const RETRY_AFTER_HEADER: &str = "retry-after";
const TOO_MANY_REQUESTS: u16 = 429;

/// Sends messages to the remote API and classifies the result.
#[derive(Clone)]
pub struct RemoteSubmitter {
    cache: Arc<ClientCache>,
    environment: BatchEnvironment,
    clock: Arc<dyn Clock>,
}

impl RemoteSubmitter {
    /// Creates a submitter drawing client handles from `cache`.
    pub fn new(cache: Arc<ClientCache>, environment: BatchEnvironment) -> Self {
        Self { cache, environment, clock: Arc::new(RealClock::new()) }
    }

    /// Replaces the clock used to interpret HTTP-date retry hints.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the shared client cache.
    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// Submits one message.
    ///
    /// # Errors
    ///
    /// - `RateLimited` for 429 responses, carrying the parsed retry hint
    /// - `RemoteError` for any other 4xx or 5xx response
    /// - `Transport` when no response was received
    /// - `UnexpectedStatus` for other non-success statuses
    /// - `Configuration` when no client can be built for the message
    pub async fn submit(&self, message: &OutgoingMessage) -> Result<()> {
        let base_url = normalize_url(message.api_url_override().unwrap_or(DEFAULT_BASE_URL));

        let span = info_span!(
            "remote_submission",
            api_key = %message.authentication_key,
            base_url = %base_url,
            events = message.events.len()
        );

        async move {
            let now = self.clock.now_utc();
            let body = encode_batch(message, self.environment)?;
            let handle = self.cache.get(
                &message.authentication_key,
                &message.authentication_secret,
                &base_url,
            )?;

            debug!(batch = %String::from_utf8_lossy(&body), "attempting to send batch");

            let response = handle.upload_events(body).await.map_err(|e| {
                warn!(error = %e, "request to remote API failed");
                SubmissionError::transport(e.to_string())
            })?;

            info!(status_code = response.status_code, "received response");
            classify_response(&response, now)?;

            debug!("message submitted");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl fmt::Debug for RemoteSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSubmitter")
            .field("cache", &self.cache)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

/// Maps a response onto success or a classified failure.
///
/// # Errors
///
/// Returns the classified `SubmissionError` for every non-2xx status.
pub fn classify_response(response: &ApiResponse, now: DateTime<Utc>) -> Result<()> {
    match response.status_code {
        200..=299 => Ok(()),
        TOO_MANY_REQUESTS => {
            let retry_after = parse_retry_after(response.header(RETRY_AFTER_HEADER), now);
            Err(SubmissionError::rate_limited(
                response.status_code,
                response.message.clone(),
                retry_after,
            ))
        },
        400..=599 => Err(SubmissionError::remote(response.status_code, response.message.clone())),
        other => Err(SubmissionError::unexpected_status(other, response.message.clone())),
    }
}

/// Ensures the base URL ends in `/`, placed before any query string.
///
/// `https://host/path?x` becomes `https://host/path/?x` and
/// `https://host/path` becomes `https://host/path/`.
pub fn normalize_url(url: &str) -> String {
    match url.find('?') {
        Some(query_index) if query_index > 0 => {
            if url[..query_index].ends_with('/') {
                url.to_string()
            } else {
                format!("{}/{}", &url[..query_index], &url[query_index..])
            }
        },
        _ if url.ends_with('/') => url.to_string(),
        _ => format!("{url}/"),
    }
}

/// HTTP-date layouts other than IMF-fixdate: RFC 850 and asctime.
const OBSOLETE_HTTP_DATE_FORMATS: [&str; 2] = ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

/// Parses a `Retry-After` value into whole seconds.
///
/// Integer values are used as-is. HTTP-dates in the future yield the seconds
/// until that instant. Dates in the past and unparseable values yield 1. A
/// missing header yields 0, leaving the delay to the backoff schedule.
pub fn parse_retry_after(value: Option<&str>, now: DateTime<Utc>) -> u64 {
    let Some(raw) = value else {
        info!("retry-after header missing from response, using backoff");
        return 0;
    };
    let raw = raw.trim();

    if let Ok(seconds) = raw.parse::<u64>() {
        return seconds;
    }

    match parse_http_date(raw) {
        Some(retry_at) if now < retry_at => {
            u64::try_from(retry_at.signed_duration_since(now).num_seconds()).unwrap_or(1).max(1)
        },
        Some(_) => 1,
        None => {
            warn!(retry_after = raw, "unable to parse retry-after header, using 1 second");
            1
        },
    }
}

fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date_time) = DateTime::parse_from_rfc2822(raw) {
        return Some(date_time.with_timezone(&Utc));
    }

    OBSOLETE_HTTP_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Duration as ChronoDuration, TimeZone};
    use relay_core::{Event, EventName, EventType};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cache::PoolConfig;

    fn submitter() -> RemoteSubmitter {
        let cache = Arc::new(ClientCache::new(&PoolConfig::default()).unwrap());
        RemoteSubmitter::new(cache, BatchEnvironment::Development)
    }

    fn message(api_url: String) -> OutgoingMessage {
        OutgoingMessage {
            authentication_key: "key".to_string(),
            authentication_secret: "secret".to_string(),
            api_url: Some(api_url),
            events: vec![Event::new(EventName::EmailClick, EventType::Other)],
            ..Default::default()
        }
    }

    fn response(status_code: u16, retry_after: Option<&str>) -> ApiResponse {
        let mut headers = HashMap::new();
        if let Some(value) = retry_after {
            headers.insert(RETRY_AFTER_HEADER.to_string(), value.to_string());
        }
        ApiResponse { status_code, message: "status".to_string(), headers }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 3, 14, 12, 0).unwrap()
    }

    #[test]
    fn url_normalization() {
        assert_eq!(normalize_url("http://host/path?x"), "http://host/path/?x");
        assert_eq!(normalize_url("http://host/path"), "http://host/path/");
        assert_eq!(normalize_url("http://host/path/"), "http://host/path/");
        assert_eq!(normalize_url("http://host/path/?x"), "http://host/path/?x");
        assert_eq!(normalize_url(DEFAULT_BASE_URL), DEFAULT_BASE_URL);
    }

    #[test]
    fn retry_after_integer_seconds() {
        assert_eq!(parse_retry_after(Some("42"), now()), 42);
        assert_eq!(parse_retry_after(Some("0"), now()), 0);
    }

    #[test]
    fn retry_after_http_date() {
        let future = (now() + ChronoDuration::seconds(90)).to_rfc2822();
        assert_eq!(parse_retry_after(Some(&future), now()), 90);

        let past = (now() - ChronoDuration::seconds(90)).to_rfc2822();
        assert_eq!(parse_retry_after(Some(&past), now()), 1);

        assert_eq!(parse_retry_after(Some("Fri, 03 May 2024 14:13:00 GMT"), now()), 60);
    }

    #[test]
    fn retry_after_obsolete_http_date_forms() {
        assert_eq!(parse_retry_after(Some("Friday, 03-May-24 14:13:00 GMT"), now()), 60);
        assert_eq!(parse_retry_after(Some("Fri May  3 14:13:00 2024"), now()), 60);
        assert_eq!(parse_retry_after(Some("Thursday, 02-May-24 14:13:00 GMT"), now()), 1);
        assert_eq!(parse_retry_after(Some("Thu May  2 14:13:00 2024"), now()), 1);
    }

    #[test]
    fn retry_after_missing_is_zero() {
        assert_eq!(parse_retry_after(None, now()), 0);
    }

    #[test]
    fn retry_after_garbage_is_one_second() {
        assert_eq!(parse_retry_after(Some("soon"), now()), 1);
        assert_eq!(parse_retry_after(Some(""), now()), 1);
        assert_eq!(parse_retry_after(Some("-5"), now()), 1);
    }

    #[test]
    fn status_classification() {
        assert!(classify_response(&response(202, None), now()).is_ok());

        let limited = classify_response(&response(429, Some("42")), now()).unwrap_err();
        assert!(matches!(limited, SubmissionError::RateLimited { retry_after_seconds: 42, .. }));

        for status in [400, 401, 404, 500, 503, 599] {
            let error = classify_response(&response(status, Some("42")), now()).unwrap_err();
            assert!(error.is_retryable(), "status {status} should be retryable");
            assert_eq!(error.retry_after_seconds(), 0);
        }

        let unexpected = classify_response(&response(302, None), now()).unwrap_err();
        assert!(matches!(unexpected, SubmissionError::UnexpectedStatus { status_code: 302, .. }));
        assert!(!unexpected.is_retryable());
    }

    #[tokio::test]
    async fn successful_submission_posts_batch_with_basic_auth() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/s2s/v2/events"))
            .and(matchers::header("authorization", "Basic a2V5OnNlY3JldA=="))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_partial_json(serde_json::json!({
                "environment": "development",
                "events": [{"event_type": "custom_event", "data": {"event_name": "EMAIL_CLICK"}}]
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = submitter().submit(&message(format!("{}/s2s/v2", mock_server.uri()))).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "120"))
            .mount(&mock_server)
            .await;

        let error = submitter().submit(&message(mock_server.uri())).await.unwrap_err();

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.retry_after_seconds(), 120);
    }

    #[tokio::test]
    async fn server_error_is_retryable_without_hint() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).append_header("Retry-After", "120"))
            .mount(&mock_server)
            .await;

        let error = submitter().submit(&message(mock_server.uri())).await.unwrap_err();

        assert!(matches!(error, SubmissionError::RemoteError { status_code: 500, .. }));
        assert_eq!(error.retry_after_seconds(), 0);
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        let error = submitter().submit(&message("http://127.0.0.1:1/".to_string())).await;

        assert!(matches!(error, Err(SubmissionError::Transport { .. })));
    }

    #[tokio::test]
    async fn unusable_base_url_is_terminal() {
        let error = submitter().submit(&message("::not a url::".to_string())).await.unwrap_err();

        assert!(matches!(error, SubmissionError::Configuration { .. }));
        assert!(!error.is_retryable());
    }
}
