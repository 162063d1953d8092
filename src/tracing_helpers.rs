//! Filepath: src/tracing_helpers.rs
//!
//! Zero-cost tracing wrappers.
//!
//! With the `tracing` feature enabled these forward to the `tracing`
//! crate; without it they compile to nothing, so release builds of the
//! tree carry no logging overhead.
//!
//! ```bash
//! # Observe structural events while running a test
//! RUST_LOG=double_tree=debug cargo test --features tracing
//! ```

#![allow(unused_macros, unused_imports)]

/// Trace-level logging for per-descent events. No-op without the
/// `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Debug-level logging for structural changes (root growth and collapse,
/// page deletion). No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
