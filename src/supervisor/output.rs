use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::event::channel::EventPublisher;
use crate::event::EngineEvent;
use crate::utils::threads::spawn_named_thread;

const READ_CHUNK: usize = 4096;

/// Where a pty instance's output goes. While a client is attached its socket
/// takes over from the log file; the engine swaps the routing on
/// attach/detach.
#[derive(Debug)]
pub struct OutputSink {
    file: Option<File>,
    client: Option<TcpStream>,
}

impl OutputSink {
    pub fn to_file(file: Option<File>) -> Self {
        Self { file, client: None }
    }

    pub fn attach_client(&mut self, client: TcpStream) {
        self.client = Some(client);
    }

    pub fn detach_client(&mut self) {
        self.client = None;
    }

    /// Writes one chunk to the active destination. Attached clients receive
    /// it framed as `output:<hex>\n`; returns false when the client write
    /// failed and the sink fell back to the log file.
    fn write_chunk(&mut self, chunk: &[u8]) -> bool {
        if let Some(client) = &mut self.client {
            let frame = format!("output:{}\n", hex::encode(chunk));
            if client.write_all(frame.as_bytes()).is_ok() {
                return true;
            }
            self.client = None;
        } else {
            if let Some(file) = &mut self.file {
                let _ = file.write_all(chunk);
            }
            return true;
        }
        // client write failed above; keep the chunk in the log file instead
        if let Some(file) = &mut self.file {
            let _ = file.write_all(chunk);
        }
        false
    }

    /// Signals end of the child's output to an attached client.
    fn write_terminated(&mut self) {
        if let Some(client) = &mut self.client {
            let _ = client.write_all(b"terminated\n");
            self.client = None;
        }
    }
}

/// Pump thread for one pty instance: reads the master until the child side
/// goes away (EOF or EIO once the last slave fd closes) and routes every
/// chunk through the shared sink. Detach-worthy conditions are reported to
/// the engine so it can drop the attached flag.
pub fn spawn_output_pump(
    indexed_name: String,
    mut master: File,
    sink: Arc<Mutex<OutputSink>>,
    engine: EventPublisher<EngineEvent>,
) {
    spawn_named_thread(format!("output pump {indexed_name}"), move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match master.read(&mut buf) {
                Ok(0) | Err(_) => {
                    debug!(instance = indexed_name, "pty master reached end of output");
                    sink.lock().unwrap().write_terminated();
                    let _ = engine.publish(EngineEvent::AttachClosed {
                        indexed_name: indexed_name.clone(),
                    });
                    break;
                }
                Ok(n) => {
                    if !sink.lock().unwrap().write_chunk(&buf[..n]) {
                        let _ = engine.publish(EngineEvent::AttachClosed {
                            indexed_name: indexed_name.clone(),
                        });
                    }
                }
            }
        }
    });
}
