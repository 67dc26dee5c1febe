//! wlanperf sample schema
//!
//! Shared definitions for the probe agent: the measurement sample, its fixed
//! positional column layout, the "NA" sentinel and the error taxonomy.
//! Nothing in this crate performs I/O.

pub mod constants;
pub mod error;
pub mod sample;

pub use constants::*;
pub use error::{AbortReason, AgentError, Result};
pub use sample::{LinkState, PingSummary, RttStats, Sample, SampleRow, Throughput};

/// Sentinel written wherever a probe ran but produced no usable value
pub const NA: &str = "NA";
