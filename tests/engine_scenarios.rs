//! End-to-end supervision scenarios driven through the control channel,
//! each against real child processes.

mod common;

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use serial_test::serial;

use common::{pid_of, start_daemon};
use procwarden::alert::AlertEvent;
use procwarden::supervisor::engine::Shutdown;

#[test]
#[serial]
fn happy_start_reaches_running() {
    let (daemon, _alerts) = start_daemon("s:\n  cmd: /bin/sleep 60\n  starttime: 1\n");

    let reply = daemon.request("start s");
    assert!(reply.contains("started: 's'"), "unexpected reply: {reply}");

    let status = daemon.wait_for_status("s: RUNNING", Duration::from_secs(3));
    assert!(pid_of(&status, "s") > 0);

    assert_matches!(daemon.shutdown(), Shutdown::Interrupted);
}

#[test]
#[serial]
fn crash_loop_exhausts_retries_and_goes_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    let yaml = format!(
        "s:\n  cmd: '/bin/sh -c \"echo attempt >> {}; exit 1\"'\n  starttime: 1\n  startretries: 2\n  autorestart: always\n",
        marker.display()
    );
    let (daemon, alerts) = start_daemon(&yaml);

    daemon.request("start s");
    daemon.wait_for_status("s: FATAL", Duration::from_secs(10));

    // one base attempt plus startretries retries
    let attempts = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(attempts.lines().count(), 3, "attempts:\n{attempts}");

    let alert = alerts
        .as_ref()
        .recv_timeout(Duration::from_secs(1))
        .unwrap();
    assert_matches!(alert, AlertEvent::EnteredFatal { indexed_name, .. } if indexed_name == "s");

    daemon.shutdown();
}

#[test]
#[serial]
fn expected_exit_parks_in_exited_without_restart() {
    let (daemon, alerts) = start_daemon(
        "s:\n  cmd: /bin/true\n  starttime: 0\n  exitcodes: [0]\n  autorestart: unexpected\n",
    );

    daemon.request("start s");
    daemon.wait_for_status("s: EXITED", Duration::from_secs(3));

    // no further spawn and no alert for an expected exit
    std::thread::sleep(Duration::from_millis(500));
    let status = daemon.request("status");
    assert!(status.contains("s: EXITED"), "status:\n{status}");
    assert!(alerts.as_ref().try_recv().is_err());

    daemon.shutdown();
}

#[test]
#[serial]
fn stop_escalates_to_sigkill_within_stoptime() {
    let yaml = "s:\n  cmd: \"/bin/sh -c 'trap \\\"\\\" TERM; sleep 300'\"\n  starttime: 1\n  stopsignal: TERM\n  stoptime: 2\n";
    let (daemon, _alerts) = start_daemon(yaml);

    daemon.request("start s");
    daemon.wait_for_status("s: RUNNING", Duration::from_secs(4));

    let stop_started = Instant::now();
    let reply = daemon.request("stop s");
    assert!(reply.contains("stopping: 's'"), "unexpected reply: {reply}");

    daemon.wait_for_status("s: STOPPED", Duration::from_secs(4));
    let elapsed = stop_started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(1800) && elapsed <= Duration::from_millis(3500),
        "stop took {elapsed:?}, expected stoptime escalation around 2s"
    );

    daemon.shutdown();
}

#[test]
#[serial]
fn numprocs_fans_out_indexed_instances() {
    let (daemon, _alerts) =
        start_daemon("s:\n  cmd: /bin/sleep 60\n  numprocs: 3\n  starttime: 1\n");

    daemon.request("start s");
    let status = daemon.wait_for_status("s_02: RUNNING", Duration::from_secs(4));
    for indexed in ["s_00", "s_01", "s_02"] {
        assert!(pid_of(&status, indexed) > 0);
    }
    assert!(!status.contains("- s:"), "no bare instance expected:\n{status}");

    daemon.shutdown();
}

#[test]
#[serial]
fn reload_starts_added_programs_and_keeps_unchanged_ones() {
    let (daemon, _alerts) = start_daemon("a:\n  cmd: /bin/sleep 60\n  starttime: 1\n");

    daemon.request("start a");
    let before = daemon.wait_for_status("a: RUNNING", Duration::from_secs(3));
    let pid_before = pid_of(&before, "a");

    daemon.rewrite_config(
        "a:\n  cmd: /bin/sleep 60\n  starttime: 1\nb:\n  cmd: /bin/sleep 60\n  starttime: 1\n  autostart: true\n",
    );
    let reply = daemon.request("reload");
    assert!(reply.contains("unchanged: 'a'"), "reply:\n{reply}");
    assert!(reply.contains("added: 'b'"), "reply:\n{reply}");

    let after = daemon.wait_for_status("b: RUNNING", Duration::from_secs(3));
    assert_eq!(pid_of(&after, "a"), pid_before, "reload must not restart a");

    daemon.shutdown();
}

#[test]
#[serial]
fn reload_restarts_changed_programs() {
    let (daemon, _alerts) = start_daemon("a:\n  cmd: /bin/sleep 60\n  starttime: 1\n");

    daemon.request("start a");
    let before = daemon.wait_for_status("a: RUNNING", Duration::from_secs(3));
    let pid_before = pid_of(&before, "a");

    daemon.rewrite_config("a:\n  cmd: /bin/sleep 61\n  starttime: 1\n");
    let reply = daemon.request("reload");
    assert!(reply.contains("changed: 'a'"), "reply:\n{reply}");

    // old generation drains on the reload signal, then the new one starts
    let deadline = Instant::now() + Duration::from_secs(6);
    let pid_after = loop {
        let status = daemon.request("status");
        if status.contains("a: RUNNING") {
            let pid = pid_of(&status, "a");
            if pid != pid_before {
                break pid;
            }
        }
        assert!(Instant::now() < deadline, "new generation never came up");
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_ne!(pid_after, pid_before);

    daemon.shutdown();
}

#[test]
#[serial]
fn reload_removes_deleted_programs() {
    let (daemon, _alerts) = start_daemon(
        "a:\n  cmd: /bin/sleep 60\n  starttime: 1\nb:\n  cmd: /bin/sleep 60\n  starttime: 1\n",
    );

    daemon.request("start all");
    daemon.wait_for_status("b: RUNNING", Duration::from_secs(3));

    daemon.rewrite_config("b:\n  cmd: /bin/sleep 60\n  starttime: 1\n");
    let reply = daemon.request("reload");
    assert!(reply.contains("removed: 'a'"), "reply:\n{reply}");

    let status = daemon.request("status");
    assert!(!status.contains("- a:"), "status:\n{status}");
    assert!(status.contains("b: RUNNING"), "status:\n{status}");

    daemon.shutdown();
}

#[test]
#[serial]
fn restart_replaces_the_process() {
    let (daemon, _alerts) = start_daemon("s:\n  cmd: /bin/sleep 60\n  starttime: 1\n");

    daemon.request("start s");
    let before = daemon.wait_for_status("s: RUNNING", Duration::from_secs(3));
    let pid_before = pid_of(&before, "s");

    let reply = daemon.request("restart s");
    assert!(reply.contains("restarting: 's'"), "reply: {reply}");

    let deadline = Instant::now() + Duration::from_secs(6);
    loop {
        let status = daemon.request("status");
        if status.contains("s: RUNNING") && pid_of(&status, "s") != pid_before {
            break;
        }
        assert!(Instant::now() < deadline, "restart never produced a new pid");
        std::thread::sleep(Duration::from_millis(50));
    }

    daemon.shutdown();
}

#[test]
#[serial]
fn failed_start_recovers_on_a_later_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ready");
    // first attempt plants the marker and dies; the retry finds it and stays up
    let yaml = format!(
        "s:\n  cmd: '/bin/sh -c \"if [ -f {m} ]; then sleep 60; else touch {m}; exit 1; fi\"'\n  starttime: 1\n  startretries: 3\n",
        m = marker.display()
    );
    let (daemon, _alerts) = start_daemon(&yaml);

    daemon.request("start s");
    daemon.wait_for_status("s: RUNNING", Duration::from_secs(8));

    daemon.shutdown();
}

#[test]
#[serial]
fn unexpected_exit_emits_alert_and_honors_never_policy() {
    let (daemon, alerts) = start_daemon(
        "s:\n  cmd: '/bin/sh -c \"sleep 2; exit 3\"'\n  starttime: 0\n  autorestart: never\n",
    );

    daemon.request("start s");
    daemon.wait_for_status("s: RUNNING", Duration::from_secs(2));
    daemon.wait_for_status("s: EXITED", Duration::from_secs(5));

    let alert = alerts
        .as_ref()
        .recv_timeout(Duration::from_secs(1))
        .unwrap();
    assert_matches!(
        alert,
        AlertEvent::UnexpectedExit {
            indexed_name,
            exit_code: 3,
        } if indexed_name == "s"
    );

    daemon.shutdown();
}

#[test]
#[serial]
fn start_and_stop_edge_replies() {
    let (daemon, _alerts) = start_daemon("s:\n  cmd: /bin/sleep 60\n  starttime: 1\n");

    assert!(daemon.request("stop s").contains("already stopped"));
    assert!(daemon
        .request("start nosuch")
        .contains("Error: program 'nosuch' not found"));

    daemon.request("start s");
    assert!(daemon.request("start s").contains("already running"));

    assert!(daemon.request("bogus").starts_with("Error: unknown command"));
    assert!(daemon.request("help").contains("Available commands"));

    daemon.shutdown();
}

#[test]
#[serial]
fn autostart_brings_programs_up_without_commands() {
    let (daemon, _alerts) =
        start_daemon("s:\n  cmd: /bin/sleep 60\n  starttime: 1\n  autostart: true\n");

    daemon.wait_for_status("s: RUNNING", Duration::from_secs(4));

    daemon.shutdown();
}

#[test]
#[serial]
fn shutdown_stops_running_children() {
    let (daemon, _alerts) =
        start_daemon("s:\n  cmd: /bin/sleep 60\n  starttime: 1\n  numprocs: 2\n");

    daemon.request("start s");
    daemon.wait_for_status("s_01: RUNNING", Duration::from_secs(4));

    let begun = Instant::now();
    assert_matches!(daemon.shutdown(), Shutdown::Interrupted);
    // sleep exits promptly on SIGTERM, well before any escalation
    assert!(begun.elapsed() < Duration::from_secs(5));
}
