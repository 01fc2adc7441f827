use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::control::attach;
use crate::control::protocol::{self, Request};
use crate::event::channel::{pub_sub, EventPublisher};
use crate::event::{ControlReply, ControlRequest, EngineEvent};
use crate::utils::thread_context::{NotStartedThreadContext, StartedThreadContext};
use crate::utils::threads::spawn_named_thread;

/// One request is one recv; longer payloads are cut off by the protocol.
const RECV_BUFFER: usize = 4096;
/// The accept loop re-checks for cancellation at this cadence.
const ACCEPT_POLL: Duration = Duration::from_secs(1);
/// Ceiling on waiting for the engine to answer one request.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ControlServerError {
    #[error("cannot bind control socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Line-framed TCP control endpoint. The listener thread accepts
/// connections; each connection gets its own thread that forwards requests
/// to the engine and writes back the replies in order.
pub struct ControlServer;

pub struct StartedControlServer {
    local_addr: SocketAddr,
    accept_thread: StartedThreadContext,
}

impl ControlServer {
    pub fn start(
        addr: SocketAddr,
        engine: EventPublisher<EngineEvent>,
    ) -> Result<StartedControlServer, ControlServerError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| ControlServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ControlServerError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ControlServerError::Bind { addr, source })?;
        info!(addr = %local_addr, "control server listening");

        let accept_thread = NotStartedThreadContext::new("control accept loop", move |cancel| {
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "control client connected");
                        let engine = engine.clone();
                        spawn_named_thread(format!("control client {peer}"), move || {
                            handle_connection(stream, engine);
                        });
                        if cancel.is_cancelled(Duration::ZERO) {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {
                        if cancel.is_cancelled(ACCEPT_POLL) {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "control accept failed");
                        if cancel.is_cancelled(ACCEPT_POLL) {
                            break;
                        }
                    }
                }
            }
        })
        .start();

        Ok(StartedControlServer {
            local_addr,
            accept_thread,
        })
    }
}

impl StartedControlServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(self) {
        if let Err(err) = self.accept_thread.stop() {
            warn!(error = %err, "control accept loop did not stop cleanly");
        }
    }
}

/// Serves one client: one request per recv, answered in order. `attach`
/// switches the connection into attach mode until the client detaches.
fn handle_connection(mut stream: TcpStream, engine: EventPublisher<EngineEvent>) {
    let mut buf = [0u8; RECV_BUFFER];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                debug!(error = %err, "control client read failed");
                break;
            }
        };
        let line = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        if line.is_empty() {
            continue;
        }

        let attach_target = match protocol::parse(&line) {
            Ok(Request::Attach(name)) => Some(name),
            _ => None,
        };
        let attach_stream = if attach_target.is_some() {
            stream.try_clone().ok()
        } else {
            None
        };

        let Some(reply) = round_trip(&engine, line, attach_stream) else {
            let _ = stream.write_all(b"Error: daemon is shutting down");
            break;
        };

        match reply {
            ControlReply::Text(text) => {
                if stream.write_all(text.as_bytes()).is_err() {
                    break;
                }
                if text == "bye" {
                    break;
                }
            }
            ControlReply::AttachStarted { pid } => {
                if stream
                    .write_all(format!("ATTACH_OK|{pid}").as_bytes())
                    .is_err()
                {
                    break;
                }
                let name = attach_target.as_deref().unwrap_or_default();
                if !attach::run_session(&mut stream, name, &engine) {
                    break;
                }
            }
        }
    }
}

/// Sends one request to the engine and waits for its reply. None means the
/// engine is gone or unresponsive.
pub(crate) fn round_trip(
    engine: &EventPublisher<EngineEvent>,
    line: String,
    stream: Option<TcpStream>,
) -> Option<ControlReply> {
    let (reply_tx, reply_rx) = pub_sub::<ControlReply>();
    let request = ControlRequest {
        line,
        stream,
        reply: reply_tx,
    };
    engine.publish(EngineEvent::Control(request)).ok()?;
    reply_rx.as_ref().recv_timeout(REPLY_TIMEOUT).ok()
}
