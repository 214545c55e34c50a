//! Build script for the upseal library
//!
//! Sets the UPSEAL_BUILD_TIMESTAMP environment variable for use in time.rs.
//! This provides a compile-time lower bound for clock sanity checks.

use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before Unix epoch")
        .as_secs();

    println!("cargo::rerun-if-changed=build.rs");
    println!("cargo::rustc-env=UPSEAL_BUILD_TIMESTAMP={}", timestamp);
}
