pub mod cancellation;
pub mod channel;

use std::net::TcpStream;

use channel::EventPublisher;

/// One control-protocol request, forwarded verbatim from a client connection.
/// `stream` carries a dup of the client socket for verbs that may begin an
/// attach session; the reply travels back on a per-request channel so answers
/// stay FIFO per connection.
pub struct ControlRequest {
    pub line: String,
    pub stream: Option<TcpStream>,
    pub reply: EventPublisher<ControlReply>,
}

pub enum ControlReply {
    Text(String),
    /// The engine accepted an attach request; the connection switches into
    /// attach mode after acknowledging with `ATTACH_OK|<pid>`.
    AttachStarted { pid: i32 },
}

/// Everything the engine loop consumes, merged onto one channel.
pub enum EngineEvent {
    Control(ControlRequest),
    /// Published by an output pump when its attached client went away or the
    /// child reached EOF while a client was attached.
    AttachClosed { indexed_name: String },
    /// Published by the signal handler on SIGINT/SIGTERM.
    ShutdownRequested,
}

impl From<ControlRequest> for EngineEvent {
    fn from(request: ControlRequest) -> Self {
        Self::Control(request)
    }
}
