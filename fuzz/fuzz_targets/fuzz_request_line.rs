//! Fuzz target for dispatcher request parsing
//!
//! This target tests the line-based request decoder that fronts every
//! protocol command:
//! - Whitespace and empty-line handling
//! - JSON envelope parsing into the request fields
//! - Error response construction and single-line serialization
//!
//! Security concerns:
//! - Panics on malformed, truncated, or deeply nested JSON
//! - Control characters and exotic unicode in field values
//! - Response serialization that breaks the one-line framing

#![no_main]

use libfuzzer_sys::fuzz_target;
use upseal::dispatch::{parse_request, Response, CODE_INTERNAL};

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        match parse_request(Some(line)) {
            Ok(request) => {
                let _ = request.command.as_deref();
                let _ = request.repo_url.as_deref();
                let _ = request.metadata_dir.as_deref();
                let _ = request.targets_dir.as_deref();
                let _ = request.trusted_root.as_deref();
                let _ = request.target.as_deref();
            }
            Err(response) => {
                assert!(!response.ok);
                assert!(response.exit_code() != 0);
                assert!(!response.to_line().contains('\n'));
            }
        }

        // A failure message built from arbitrary input must still keep the
        // one-line framing once serialized.
        let failure = Response::failure(CODE_INTERNAL, line);
        assert!(!failure.to_line().contains('\n'));
    }

    let _ = parse_request(None);
});
