//! Worker process supervision.
//!
//! This module provides the `WorkerProcess` which spawns the interpreter,
//! forwards its output to `tracing`, and kills it on stop, drop, or host
//! shutdown.

mod log_stream;
mod spawn;
mod worker;

pub use worker::WorkerProcess;
