//! Common test utilities.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ...
//! }
//! ```
//!
//! Logging only appears when the crate is built with the `tracing`
//! feature; filter with `RUST_LOG`, e.g.
//! `RUST_LOG=double_tree=debug cargo test --features tracing`.

#![allow(dead_code)]

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a `tracing` subscriber writing to the test harness, once per
/// process.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
