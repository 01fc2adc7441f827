//! Shared harness: runs a real engine on its own thread and drives it over
//! the same event channel the control server uses.

use std::io::Write;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use procwarden::alert::{AlertEvent, AlertSink};
use procwarden::config::load_programs;
use procwarden::event::channel::{pub_sub, EventConsumer, EventPublisher};
use procwarden::event::{ControlReply, ControlRequest, EngineEvent};
use procwarden::supervisor::engine::{Engine, Shutdown};

pub struct ChannelAlertSink(pub EventPublisher<AlertEvent>);

impl AlertSink for ChannelAlertSink {
    fn notify(&self, event: &AlertEvent) {
        let _ = self.0.publish(event.clone());
    }
}

pub struct TestDaemon {
    pub publisher: EventPublisher<EngineEvent>,
    pub config: NamedTempFile,
    handle: JoinHandle<Shutdown>,
}

pub fn start_daemon(yaml: &str) -> (TestDaemon, EventConsumer<AlertEvent>) {
    let mut config = NamedTempFile::new().unwrap();
    write!(config, "{yaml}").unwrap();
    config.flush().unwrap();

    let programs = load_programs(config.path()).unwrap();
    let (publisher, consumer) = pub_sub();
    let (alert_publisher, alert_consumer) = pub_sub();
    let engine = Engine::new(
        config.path().to_path_buf(),
        programs,
        consumer,
        publisher.clone(),
        Box::new(ChannelAlertSink(alert_publisher)),
    );
    let handle = std::thread::spawn(move || engine.run());

    (
        TestDaemon {
            publisher,
            config,
            handle,
        },
        alert_consumer,
    )
}

impl TestDaemon {
    pub fn request(&self, line: &str) -> String {
        let (reply_publisher, reply_consumer) = pub_sub();
        self.publisher
            .publish(EngineEvent::Control(ControlRequest {
                line: line.to_string(),
                stream: None,
                reply: reply_publisher,
            }))
            .unwrap();
        match reply_consumer
            .as_ref()
            .recv_timeout(Duration::from_secs(10))
            .unwrap()
        {
            ControlReply::Text(text) => text,
            ControlReply::AttachStarted { pid } => format!("ATTACH_OK|{pid}"),
        }
    }

    /// Polls `status` until it contains `needle`.
    pub fn wait_for_status(&self, needle: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.request("status");
            if status.contains(needle) {
                return status;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for status to contain {needle:?}; last status:\n{status}"
            );
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn rewrite_config(&self, yaml: &str) {
        std::fs::write(self.config.path(), yaml).unwrap();
    }

    pub fn shutdown(self) -> Shutdown {
        self.publisher
            .publish(EngineEvent::ShutdownRequested)
            .unwrap();
        self.handle.join().unwrap()
    }
}

/// Extracts the pid from a `- name: RUNNING (pid N, uptime Ns)` status line.
pub fn pid_of(status: &str, indexed_name: &str) -> i32 {
    let prefix = format!("- {indexed_name}: RUNNING (pid ");
    let line = status
        .lines()
        .find(|l| l.starts_with(&prefix))
        .unwrap_or_else(|| panic!("no RUNNING line for {indexed_name} in:\n{status}"));
    line[prefix.len()..]
        .split(',')
        .next()
        .unwrap()
        .parse()
        .unwrap()
}
