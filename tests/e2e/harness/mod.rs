//! E2E test harness for context history.
//!
//! Builders and assertion variants are shared across scenario files, so not
//! every one is used by every test binary configuration.

#![allow(dead_code)]

pub mod assertions;
pub mod runner;
pub mod scenario;
pub mod steps;
pub mod workspace;

// Re-export commonly used types
pub use assertions::Assertion;
pub use scenario::Scenario;

/// Route library logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
