//! Benchmark keys and the benchmarked request client built on them.
//!
//! A key is a snapshot of how a vendor labeled the reference dataset at one
//! point in time, together with the tolerances that decide how much movement
//! counts as drift. The client mints keys, validates challenger keys and live
//! responses against its current key, and re-benchmarks on schedule or after
//! too many validation failures.

pub mod client;
pub mod key;
pub mod scheduler;

pub use client::{BenchmarkConfig, BenchmarkedRequestClient, Outcome, OutcomeError};
pub use key::{ConfidenceDelta, InvalidKeyError, Key};
