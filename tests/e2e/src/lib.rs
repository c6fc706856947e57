//! End-to-End Harness for kvpipe
//!
//! Drives both ends of a pipe over real sockets. Each rank runs the same
//! scenario function; the harness handles rendezvous, the barriers around a
//! run and teardown.
//!
//! ```text
//!   rank 0 thread ──► TensorPipe ══ tcp / unix ══ TensorPipe ◄── rank 1 thread
//!         └──────────────── Barrier (connect, finish) ───────────────┘
//! ```
//!
//! The `pipe_runner` binary runs one rank of a scenario per process, for
//! driving two processes from a shared config file.

pub mod harness;
pub mod scenarios;

pub use harness::{run_pair, tcp_backend};
#[cfg(unix)]
pub use harness::unix_backend;
pub use scenarios::{
    latency, smoke, stress, stress_workload, LatencyConfig, LatencySample, ScenarioReport,
    StressConfig, StressWorkload,
};
