//! Remote submitter behaviour against a mocked event API.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use http::StatusCode;
use relay_core::BatchEnvironment;
use relay_delivery::{ClientCache, PoolConfig, RemoteSubmitter, SubmissionError};
use relay_testing::{MessageBuilder, MockEndpoint, MockEventsApi, TestClock};

fn submitter_at(start: SystemTime) -> Result<RemoteSubmitter> {
    let cache = Arc::new(ClientCache::new(&PoolConfig::default())?);
    Ok(RemoteSubmitter::new(cache, BatchEnvironment::Production)
        .with_clock(Arc::new(TestClock::with_start_time(start))))
}

fn fixed_start() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_714_745_520)
}

#[tokio::test]
async fn http_date_retry_after_measured_from_clock() -> Result<()> {
    let api = MockEventsApi::start().await;
    let retry_at = DateTime::<Utc>::from(fixed_start() + Duration::from_secs(90));
    api.mock(MockEndpoint::rate_limited("tenant", retry_at.to_rfc2822())).await;

    let message = MessageBuilder::new().api_url(api.base_url("tenant")).build();
    let error = submitter_at(fixed_start())?.submit(&message).await.unwrap_err();

    assert!(matches!(error, SubmissionError::RateLimited { retry_after_seconds: 90, .. }));
    Ok(())
}

#[tokio::test]
async fn http_date_retry_after_shrinks_as_time_passes() -> Result<()> {
    let api = MockEventsApi::start().await;
    let retry_at = DateTime::<Utc>::from(fixed_start() + Duration::from_secs(90));
    api.mock(MockEndpoint::rate_limited("tenant", retry_at.to_rfc2822())).await;

    let clock = TestClock::with_start_time(fixed_start());
    let cache = Arc::new(ClientCache::new(&PoolConfig::default())?);
    let submitter = RemoteSubmitter::new(cache, BatchEnvironment::Production)
        .with_clock(Arc::new(clock.clone()));
    let message = MessageBuilder::new().api_url(api.base_url("tenant")).build();

    let first = submitter.submit(&message).await.unwrap_err();
    clock.advance(Duration::from_secs(60));
    let second = submitter.submit(&message).await.unwrap_err();
    clock.advance(Duration::from_secs(60));
    let third = submitter.submit(&message).await.unwrap_err();

    assert_eq!(first.retry_after_seconds(), 90);
    assert_eq!(second.retry_after_seconds(), 30);
    assert_eq!(third.retry_after_seconds(), 1);
    Ok(())
}

#[tokio::test]
async fn rfc850_retry_after_honoured() -> Result<()> {
    let api = MockEventsApi::start().await;
    let retry_at = DateTime::<Utc>::from(fixed_start() + Duration::from_secs(120));
    let header = retry_at.format("%A, %d-%b-%y %H:%M:%S GMT").to_string();
    api.mock(MockEndpoint::rate_limited("tenant", header)).await;

    let message = MessageBuilder::new().api_url(api.base_url("tenant")).build();
    let error = submitter_at(fixed_start())?.submit(&message).await.unwrap_err();

    assert_eq!(error.retry_after_seconds(), 120);
    Ok(())
}

#[tokio::test]
async fn unparseable_retry_after_yields_minimum_delay() -> Result<()> {
    let api = MockEventsApi::start().await;
    api.mock(MockEndpoint::rate_limited("tenant", "later please")).await;

    let message = MessageBuilder::new().api_url(api.base_url("tenant")).build();
    let error = submitter_at(fixed_start())?.submit(&message).await.unwrap_err();

    assert!(matches!(error, SubmissionError::RateLimited { retry_after_seconds: 1, .. }));
    Ok(())
}

#[tokio::test]
async fn past_http_date_yields_minimum_delay() -> Result<()> {
    let api = MockEventsApi::start().await;
    let retry_at = DateTime::<Utc>::from(fixed_start() - Duration::from_secs(30));
    api.mock(MockEndpoint::rate_limited("tenant", retry_at.to_rfc2822())).await;

    let message = MessageBuilder::new().api_url(api.base_url("tenant")).build();
    let error = submitter_at(fixed_start())?.submit(&message).await.unwrap_err();

    assert_eq!(error.retry_after_seconds(), 1);
    Ok(())
}

#[tokio::test]
async fn base_url_without_trailing_slash_normalized() -> Result<()> {
    let api = MockEventsApi::start().await;
    api.mock(MockEndpoint::success("tenant").expect(1)).await;

    let base_url = api.base_url("tenant");
    let message = MessageBuilder::new().api_url(base_url.trim_end_matches('/')).build();

    submitter_at(SystemTime::now())?.submit(&message).await?;

    api.verify().await;
    Ok(())
}

#[tokio::test]
async fn batch_carries_environment_and_identity() -> Result<()> {
    let api = MockEventsApi::start().await;
    api.accept("tenant").await;

    let message = MessageBuilder::new().api_url(api.base_url("tenant")).mp_id("ff").build();
    submitter_at(SystemTime::now())?.submit(&message).await?;

    let requests = api.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/tenant/events");

    let body = requests[0].json();
    assert_eq!(body["environment"], "production");
    assert_eq!(body["mpid"], 255);
    assert_eq!(body["user_identities"]["email"], "subscriber@example.com");
    assert_eq!(body["timestamp_unixtime_ms"], 1_714_745_520_000_i64);
    Ok(())
}

#[tokio::test]
async fn handles_shared_across_messages_with_same_credentials() -> Result<()> {
    let api = MockEventsApi::start().await;
    api.accept("a").await;
    api.accept("b").await;

    let submitter = submitter_at(SystemTime::now())?;
    for prefix in ["a", "a", "b"] {
        let message = MessageBuilder::new().api_url(api.base_url(prefix)).build();
        submitter.submit(&message).await?;
    }

    assert_eq!(submitter.cache().len(), 2);
    Ok(())
}

#[tokio::test]
async fn slow_api_times_out_as_transport_failure() -> Result<()> {
    let api = MockEventsApi::start().await;
    api.mock(MockEndpoint::delayed("slow", StatusCode::ACCEPTED, Duration::from_secs(5))).await;

    let pool = PoolConfig { timeout: Duration::from_millis(200), ..PoolConfig::default() };
    let submitter =
        RemoteSubmitter::new(Arc::new(ClientCache::new(&pool)?), BatchEnvironment::Development);

    let message = MessageBuilder::new().api_url(api.base_url("slow")).build();
    let error = submitter.submit(&message).await.unwrap_err();

    assert!(matches!(error, SubmissionError::Transport { .. }));
    assert!(error.is_retryable());
    Ok(())
}
