use std::io::Read;
use std::net::TcpStream;

use tracing::debug;

use crate::control::protocol::{self, Request};
use crate::control::server::round_trip;
use crate::event::channel::EventPublisher;
use crate::event::EngineEvent;

/// Client-to-server half of an attach session to `indexed_name`. Output
/// frames travel the other way, written straight to the socket by the
/// instance's output pump, so this loop must not write to the stream at all.
///
/// Accepted frames are `process_input <instance> <hex>` and
/// `detach <instance>`; anything else is ignored, matching the line-framed
/// protocol's tolerance for stray input while attached.
///
/// Returns true when the client detached and the connection should go back
/// to normal request handling, false when the connection is done.
pub fn run_session(
    stream: &mut TcpStream,
    indexed_name: &str,
    engine: &EventPublisher<EngineEvent>,
) -> bool {
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                debug!(instance = indexed_name, "attached client disconnected");
                let _ = round_trip(engine, format!("detach {indexed_name}"), None);
                return false;
            }
            Ok(n) => n,
            Err(err) => {
                debug!(instance = indexed_name, error = %err, "attached client read failed");
                let _ = round_trip(engine, format!("detach {indexed_name}"), None);
                return false;
            }
        };
        let line = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        if line.is_empty() {
            continue;
        }

        match protocol::parse(&line) {
            Ok(Request::ProcessInput { .. }) => {
                // forwarded for the engine to write onto the pty master;
                // replies are not surfaced while attached
                let _ = round_trip(engine, line, None);
            }
            Ok(Request::Detach(_)) => {
                let _ = round_trip(engine, line, None);
                return true;
            }
            _ => debug!(frame = %line, "ignoring non-attach frame while attached"),
        }
    }
}
