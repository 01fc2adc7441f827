use super::channel::EventConsumer;
use crossbeam::channel::RecvTimeoutError;
use std::time::Duration;

pub type CancellationMessage = ();

impl EventConsumer<CancellationMessage> {
    /// Returns true if a cancellation message (or a closed channel) was
    /// observed before `timeout` elapsed; otherwise blocks for the full
    /// timeout and returns false.
    pub fn is_cancelled(&self, timeout: Duration) -> bool {
        let timed_out = matches!(
            self.as_ref().recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        );
        !timed_out
    }
}
