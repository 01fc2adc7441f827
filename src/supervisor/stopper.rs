use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StopError {
    #[error("can't signal pid {pid}: {source}")]
    Signal { pid: i32, source: nix::Error },
}

/// First step of a graceful stop: deliver the configured signal. The SIGKILL
/// escalation deadline is an engine timer, so the loop never blocks here.
pub fn deliver(pid: i32, signal: Signal) -> Result<(), StopError> {
    info!(pid, signal = %signal, "delivering stop signal");
    kill(Pid::from_raw(pid), signal).map_err(|source| StopError::Signal { pid, source })
}

/// Escalation step once the stop deadline passed with the process alive.
pub fn force_kill(pid: i32) {
    info!(pid, "escalating to SIGKILL");
    let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
}

/// Existence probe; a zombie still counts as alive until it is reaped.
pub fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::waitpid;
    use serial_test::serial;
    use std::process::Command;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    #[serial]
    fn delivers_signal_and_detects_liveness() {
        let child = Command::new("/bin/sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;
        sleep(Duration::from_millis(50));
        assert!(is_alive(pid));

        deliver(pid, Signal::SIGTERM).unwrap();
        waitpid(Pid::from_raw(pid), None).unwrap();
        assert!(!is_alive(pid));
    }

    #[test]
    fn signalling_a_dead_pid_is_an_error() {
        // pid max on linux caps well below this value
        assert!(deliver(i32::MAX - 1, Signal::SIGTERM).is_err());
    }
}
