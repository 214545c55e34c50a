//! Fuzz target for expiry timestamp parsing
//!
//! Expiry strings arrive inside fetched metadata, so the parser sees
//! arbitrary input:
//! - Bare Unix-seconds strings
//! - RFC 3339 date-times with and without fractional seconds
//! - Out-of-range date components and numeric overflow
//!
//! Security concerns:
//! - Panics or overflow on extreme date components
//! - Divergence between the parser and the formatter

#![no_main]

use libfuzzer_sys::fuzz_target;
use upseal::time::{format_timestamp, parse_timestamp};

// The civil-date helpers are specified for 1970-2100; the round-trip check
// stays inside that window.
const YEAR_2100: u64 = 4_102_444_800;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(secs) = parse_timestamp(s) {
            if secs < YEAR_2100 {
                let formatted = format_timestamp(secs);
                let reparsed =
                    parse_timestamp(&formatted).expect("formatted timestamp must parse");
                assert_eq!(reparsed, secs);
            }
        }
    }
});
