//! Property tests for backoff and URL normalization.

use std::time::Duration;

use proptest::prelude::*;
use relay_delivery::{
    client::normalize_url,
    retry::{FailedRequest, MAX_VISIBILITY_TIMEOUT_SECONDS},
    RetryPolicy,
};

fn failed(retry_after_seconds: u64, receive_count: u32) -> FailedRequest {
    FailedRequest {
        message_id: "m".to_string(),
        status_code: 500,
        retry_after_seconds,
        receipt_handle: "rh".to_string(),
        receive_count,
    }
}

proptest! {
    /// Computed delays stay inside the backoff range and the platform cap.
    #[test]
    fn backoff_within_range(
        base in 1u64..600,
        factor in 0u32..6,
        receive_count in 0u32..40,
    ) {
        let policy = RetryPolicy::new(Duration::from_secs(base), factor);
        let (low, high) = policy.backoff_range(receive_count);
        let secs = policy.visibility_timeout(&failed(0, receive_count)).as_secs();

        prop_assert!(low <= high);
        prop_assert!(secs >= low);
        prop_assert!(secs < high || (low == high && secs == low));
        prop_assert!(secs <= MAX_VISIBILITY_TIMEOUT_SECONDS);
    }

    /// A positive hint wins regardless of the receive count.
    #[test]
    fn retry_hint_overrides_backoff(hint in 1u64..100_000, receive_count in 0u32..20) {
        let policy = RetryPolicy::default();
        let secs = policy.visibility_timeout(&failed(hint, receive_count)).as_secs();

        prop_assert_eq!(secs, hint.min(MAX_VISIBILITY_TIMEOUT_SECONDS));
    }

    /// Normalized URLs have exactly one slash before the query, or end in one.
    #[test]
    fn normalized_urls_end_in_slash(
        path in "[a-z]{1,8}(/[a-z]{1,8}){0,3}/?",
        query in proptest::option::of("[a-z]{1,5}=[0-9]{1,3}"),
    ) {
        let url = match &query {
            Some(query) => format!("https://host/{path}?{query}"),
            None => format!("https://host/{path}"),
        };
        let normalized = normalize_url(&url);

        match normalized.split_once('?') {
            Some((before, _)) => {
                prop_assert!(before.ends_with('/'));
                prop_assert!(!before.ends_with("//"));
            },
            None => prop_assert!(normalized.ends_with('/')),
        }
        prop_assert_eq!(normalize_url(&normalized), normalized.clone());
    }
}
