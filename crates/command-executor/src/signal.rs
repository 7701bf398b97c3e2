//! Unix signal delivery for supervised processes

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Send SIGINT to a process. A process that is already gone is not an error.
pub fn interrupt(pid: u32) -> Result<()> {
    send(pid, Signal::SIGINT)
}

/// Send SIGKILL to a process. A process that is already gone is not an error.
pub fn kill(pid: u32) -> Result<()> {
    send(pid, Signal::SIGKILL)
}

/// Check whether a process with this pid exists (signal 0).
pub fn is_process_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn send(pid: u32, sig: Signal) -> Result<()> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::signal_failed(pid, sig as i32, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_signal_to_reaped_child_is_tolerated() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert!(!is_process_alive(pid));
        assert!(interrupt(pid).is_ok());
        assert!(kill(pid).is_ok());
    }
}
