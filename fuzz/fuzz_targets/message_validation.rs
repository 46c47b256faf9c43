#![no_main]

//! Fuzz target for queue body validation.
//!
//! Arbitrary bodies must either validate or fail with a classified
//! `SubmissionError`; nothing on the validation path may panic.

use libfuzzer_sys::fuzz_target;
use relay_core::BatchEnvironment;
use relay_delivery::{MessageValidator, SubmissionError, MAX_BATCH_SIZE_BYTES};

fuzz_target!(|data: &[u8]| {
    let validator = MessageValidator::new(BatchEnvironment::Production);

    match validator.validate(data) {
        Ok(message) => {
            assert!(!message.authentication_key.is_empty());
            assert!(!message.authentication_secret.is_empty());
        },
        Err(SubmissionError::PayloadTooLarge { size_bytes, .. }) => {
            assert!(size_bytes > MAX_BATCH_SIZE_BYTES);
        },
        Err(error) => {
            let _ = error.kind();
        },
    }
});
