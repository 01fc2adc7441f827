use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::warn;

/// One collected child exit. Signal deaths are folded into the exit-code
/// domain as `128 + signal_number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapedChild {
    pub pid: i32,
    pub exit_code: i32,
    pub signaled: bool,
}

/// Drains every child the kernel has finished, without blocking. Runs on
/// every engine tick.
pub fn drain() -> Vec<ReapedChild> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => reaped.push(ReapedChild {
                pid: pid.as_raw(),
                exit_code: code,
                signaled: false,
            }),
            Ok(WaitStatus::Signaled(pid, signal, _)) => reaped.push(ReapedChild {
                pid: pid.as_raw(),
                exit_code: 128 + signal as i32,
                signaled: true,
            }),
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => continue,
            Err(Errno::ECHILD) => break,
            Err(err) => {
                warn!(error = %err, "wait-any failed while reaping");
                break;
            }
        }
    }
    reaped
}
