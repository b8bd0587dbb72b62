// build.rs

use std::env;

fn main() {
    // Release builds are stamped through ESCONN_VERSION; everything else reports
    // the crate version. Cargo's own CARGO_PKG_VERSION is left untouched.
    let stamped = env::var("ESCONN_VERSION").ok().filter(|v| !v.trim().is_empty());
    let version = match stamped {
        Some(version) => version,
        None => env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()),
    };

    println!("cargo:rustc-env=ESCONN_BUILD_VERSION={version}");
    println!("cargo:rerun-if-env-changed=ESCONN_VERSION");
}
