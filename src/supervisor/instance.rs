use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::{AutoRestart, ProgramSpec};
use crate::supervisor::output::OutputSink;
use crate::supervisor::state::ProcessState;

/// One supervised process slot. Created when its group is created and
/// re-entered on every start attempt; removed only when the group is removed
/// by a reload.
pub struct Instance {
    pub indexed_name: String,
    pub program: String,
    pub state: ProcessState,
    /// 0 while no process is spawned.
    pub pid: i32,
    pub started_at: Option<Instant>,
    /// Consecutive failed start attempts in the current BACKOFF episode.
    pub retry_count: u32,
    pub last_exit_code: Option<i32>,
    /// Pty master, present only for pty-spawned instances while the process
    /// lives.
    pub master: Option<OwnedFd>,
    /// Output routing shared with the pump thread of a pty instance.
    pub sink: Option<Arc<Mutex<OutputSink>>>,
    pub attached: bool,
    /// An operator `restart` is waiting for this instance to reach STOPPED.
    pub pending_restart: bool,
    /// A delayed start (restart resume) timer has been armed.
    pub pending_start: bool,
}

impl Instance {
    pub fn new(indexed_name: String, program: String) -> Self {
        Self {
            indexed_name,
            program,
            state: ProcessState::Stopped,
            pid: 0,
            started_at: None,
            retry_count: 0,
            last_exit_code: None,
            master: None,
            sink: None,
            attached: false,
            pending_restart: false,
            pending_start: false,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or_default()
    }

    /// Releases everything tied to the spawned process. Dropping the master
    /// closes our copy of the pty; the pump's dup dies on its next read.
    pub fn clear_process(&mut self) {
        self.pid = 0;
        self.master = None;
        self.sink = None;
        self.attached = false;
    }
}

/// Whether an exit observed in RUNNING counts as expected. Signal deaths are
/// folded into the 128+N code domain before this check, so a listed 128+N
/// code makes the matching signal expected.
pub fn exit_is_expected(spec: &ProgramSpec, exit_code: i32) -> bool {
    spec.exitcodes.contains(&exit_code)
}

/// Whether a RUNNING exit leads back to STARTING under the autorestart
/// policy.
pub fn should_restart(policy: AutoRestart, expected: bool) -> bool {
    match policy {
        AutoRestart::Always => true,
        AutoRestart::Never => false,
        AutoRestart::Unexpected => !expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AutoRestart::Always, true, true)]
    #[case(AutoRestart::Always, false, true)]
    #[case(AutoRestart::Never, true, false)]
    #[case(AutoRestart::Never, false, false)]
    #[case(AutoRestart::Unexpected, true, false)]
    #[case(AutoRestart::Unexpected, false, true)]
    fn restart_policy_table(
        #[case] policy: AutoRestart,
        #[case] expected_exit: bool,
        #[case] restarts: bool,
    ) {
        assert_eq!(should_restart(policy, expected_exit), restarts);
    }

    #[test]
    fn fresh_instance_owns_no_process() {
        let instance = Instance::new("web_00".to_string(), "web".to_string());
        assert_eq!(instance.state, ProcessState::Stopped);
        assert_eq!(instance.pid, 0);
        assert!(instance.master.is_none());
        assert!(!instance.attached);
    }

    #[test]
    fn clear_process_resets_process_fields() {
        let mut instance = Instance::new("web".to_string(), "web".to_string());
        instance.pid = 4242;
        instance.attached = true;
        instance.clear_process();
        assert_eq!(instance.pid, 0);
        assert!(!instance.attached);
        assert!(instance.sink.is_none());
    }
}
