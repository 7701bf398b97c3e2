//! Process exit status and run results

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Captured standard output (empty when capture is disabled)
    pub stdout: String,
    /// Captured standard error (empty when capture is disabled)
    pub stderr: String,
    /// How the process ended
    pub status: ExitStatus,
    /// The run was cut short by its cancellation token
    pub cancelled: bool,
    /// The run was cut short by its timeout
    pub timed_out: bool,
}

impl ProcessResult {
    /// The exit code, if the process exited normally
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code
    }

    /// Returns true if the process ran to completion with exit code 0
    pub fn success(&self) -> bool {
        self.status.success() && !self.cancelled && !self.timed_out
    }
}
