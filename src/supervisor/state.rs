use std::fmt;

/// Lifecycle of one supervised process instance.
///
/// ```text
/// STOPPED -> STARTING -> RUNNING -> STOPPING -> STOPPED
///                |   \        \
///                |    BACKOFF  EXITED
///                |       |
///                |     FATAL
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    /// A start attempt failed; the next attempt is delayed.
    Backoff,
    Stopping,
    /// The process ended on its own and the restart policy kept it down.
    Exited,
    /// Start retries are exhausted; only an explicit `start` leaves this state.
    Fatal,
}

impl ProcessState {
    /// States in which an OS process belongs to the instance.
    pub fn has_process(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Stopped => "STOPPED",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Backoff => "BACKOFF",
            ProcessState::Stopping => "STOPPING",
            ProcessState::Exited => "EXITED",
            ProcessState::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}
