//! Subprocess runner for supervised services
//!
//! This crate launches a single child process, streams its stdout and stderr
//! line by line, and stops it with a two-stage interrupt-then-kill sequence
//! when the caller cancels or a timeout expires.

#![warn(missing_docs)]

pub mod cancel;
pub mod command;
pub mod error;
pub mod event;
pub mod process;
pub mod runner;
#[cfg(unix)]
pub mod signal;

pub use cancel::CancellationToken;
pub use command::{Command, split_arguments};
pub use error::{Error, Result};
pub use event::{LogSource, OutputLine};
pub use process::{ExitStatus, ProcessResult};
pub use runner::{RunOptions, execute, run, terminate_gracefully};
#[cfg(unix)]
pub use signal::is_process_alive;
