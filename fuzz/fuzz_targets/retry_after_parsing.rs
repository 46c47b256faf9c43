#![no_main]

//! Fuzz target for `Retry-After` header parsing and URL normalization.

use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use relay_delivery::client::{normalize_url, parse_retry_after};

fuzz_target!(|data: &str| {
    let now = Utc.with_ymd_and_hms(2024, 5, 3, 14, 12, 0).unwrap();
    let _ = parse_retry_after(Some(data), now);

    let normalized = normalize_url(data);
    assert_eq!(normalize_url(&normalized), normalized);
});
