//! Error types for command execution

use thiserror::Error;

/// Unified error type for command execution
#[derive(Error, Debug)]
pub enum Error {
    /// The process could not be spawned (binary missing, permission denied, ...)
    #[error("failed to launch '{program}': {reason}")]
    LaunchFailed {
        /// The program that failed to launch
        program: String,
        /// The reason for the launch failure
        reason: String,
    },

    /// The process exited unsuccessfully and the caller demanded success
    #[error("'{program}' exited with {}: {stderr}", describe_code(.code))]
    ProcessFailed {
        /// The program that failed
        program: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal} to pid {pid}: {reason}")]
    SignalFailed {
        /// The process the signal was addressed to
        pid: u32,
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

impl Error {
    /// Create a launch failed error
    pub fn launch_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LaunchFailed {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a process failed error
    pub fn process_failed(
        program: impl Into<String>,
        code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::ProcessFailed {
            program: program.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(pid: u32, signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            pid,
            signal,
            reason: reason.into(),
        }
    }

    /// Whether this error happened while spawning the process
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Error::LaunchFailed { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
