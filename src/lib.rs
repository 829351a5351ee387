//! A certifiable inference benchmark harness: calibrated monotonic
//! timing, integer-only statistics, environmental stability monitoring,
//! and a cryptographic commitment binding measured performance to a
//! verified output hash.
//!
//! ## Example
//!
//! Run a benchmark over a user-supplied inference function and inspect
//! the result.
//!
//! ```rust
//! use certifiable_bench::runner::{run_benchmark, Config};
//!
//! fn inference(input: &[u8], output: &mut [u8]) -> certifiable_bench::error::Result<()> {
//!     output.copy_from_slice(input);
//!     Ok(())
//! }
//!
//! let mut config = Config::default();
//! config.warmup_iterations = 5;
//! config.measure_iterations = 20;
//! config.monitor_environment = false;
//!
//! let input = [0u8; 16];
//! let mut output = [0u8; 16];
//! let result = run_benchmark(config, inference, &input, &mut output).unwrap();
//! assert!(result.is_valid());
//! println!("p99 latency: {} ns", result.latency.p99_ns);
//! ```
//!
//! ## Platform support
//!
//! Environmental monitoring and hardware performance counters
//! ([`env`]) are only available on Linux; elsewhere they degrade
//! gracefully to absent data rather than failing the run.

pub mod env;
pub mod error;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod timer;
pub mod types;
pub mod verify;
