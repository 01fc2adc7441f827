use std::fmt;
use tracing::error;

/// Supervision events worth surfacing to an operator outside the log stream.
/// Delivery (mail, chat, ...) is a deployment concern; the engine only emits.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    UnexpectedExit {
        indexed_name: String,
        exit_code: i32,
    },
    EnteredFatal {
        indexed_name: String,
        retries: u32,
    },
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertEvent::UnexpectedExit {
                indexed_name,
                exit_code,
            } => write!(
                f,
                "process '{indexed_name}' died unexpectedly with exit code {exit_code}"
            ),
            AlertEvent::EnteredFatal {
                indexed_name,
                retries,
            } => write!(
                f,
                "process '{indexed_name}' entered FATAL state after {retries} failed start attempts"
            ),
        }
    }
}

pub trait AlertSink: Send {
    fn notify(&self, event: &AlertEvent);
}

/// Default sink: alerts become error-level log records.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, event: &AlertEvent) {
        error!(alert = %event, "supervision alert");
    }
}
