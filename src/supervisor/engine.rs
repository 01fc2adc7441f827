use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam::select;
use tracing::{debug, info, warn};

use crate::alert::{AlertEvent, AlertSink};
use crate::config::{load_programs, signals, ProgramSpec, ProgramTable};
use crate::control::protocol::{self, Request, Target};
use crate::event::channel::{EventConsumer, EventPublisher};
use crate::event::{ControlReply, ControlRequest, EngineEvent};
use crate::supervisor::group::ProgramGroup;
use crate::supervisor::instance::{exit_is_expected, should_restart, Instance};
use crate::supervisor::output::spawn_output_pump;
use crate::supervisor::reaper::{self, ReapedChild};
use crate::supervisor::reload::{self, ReloadAction};
use crate::supervisor::spawner;
use crate::supervisor::state::ProcessState;
use crate::supervisor::stopper;
use crate::supervisor::timer::{TimerKind, TimerQueue};

/// Upper bound on one loop iteration, so reaping stays prompt even with no
/// pending timers.
const TICK: Duration = Duration::from_millis(100);
/// Delay between BACKOFF start attempts.
const BACKOFF_DELAY: Duration = Duration::from_secs(1);
/// Pause between an operator restart's stop and the new start.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// How the daemon came down; decides the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Clean,
    Interrupted,
}

/// The supervision loop. Owns every group and instance record; all state
/// mutation happens on the thread running [`Engine::run`]. Everything else
/// (control connections, output pumps, the signal handler) talks to it
/// through the event channel.
pub struct Engine {
    config_path: PathBuf,
    groups: BTreeMap<String, ProgramGroup>,
    instances: BTreeMap<String, Instance>,
    /// pid -> indexed name for instances currently owning a process.
    pids: HashMap<i32, String>,
    /// pids signalled during a reload whose records are already gone,
    /// mapped to the group they belonged to.
    draining_pids: HashMap<i32, String>,
    /// Groups replaced by a reload, waiting for their old pids to drain
    /// before the new spec is started.
    drains: HashMap<String, usize>,
    timers: TimerQueue,
    events: EventConsumer<EngineEvent>,
    publisher: EventPublisher<EngineEvent>,
    alerts: Box<dyn AlertSink>,
    shutting_down: bool,
    interrupted: bool,
}

impl Engine {
    pub fn new(
        config_path: PathBuf,
        programs: ProgramTable,
        events: EventConsumer<EngineEvent>,
        publisher: EventPublisher<EngineEvent>,
        alerts: Box<dyn AlertSink>,
    ) -> Self {
        let mut engine = Self {
            config_path,
            groups: BTreeMap::new(),
            instances: BTreeMap::new(),
            pids: HashMap::new(),
            draining_pids: HashMap::new(),
            drains: HashMap::new(),
            timers: TimerQueue::default(),
            events,
            publisher,
            alerts,
            shutting_down: false,
            interrupted: false,
        };
        for (name, spec) in programs {
            engine.add_group(name, spec);
        }
        engine
    }

    /// Runs until a shutdown request has stopped every process. Autostarts
    /// first, then alternates reaping, event handling and timer firing.
    pub fn run(mut self) -> Shutdown {
        let autostart: Vec<String> = self
            .groups
            .values()
            .filter(|g| g.spec.autostart)
            .map(|g| g.name.clone())
            .collect();
        for name in autostart {
            info!(program = %name, "autostarting");
            for line in self.start_group(&name) {
                info!("{line}");
            }
        }

        loop {
            for reaped in reaper::drain() {
                self.handle_child_exit(reaped);
            }

            if self.shutting_down && self.is_quiescent() {
                break;
            }

            let timeout = self
                .timers
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()).min(TICK))
                .unwrap_or(TICK);

            let received = select! {
                recv(self.events.as_ref()) -> event => Some(event),
                default(timeout) => None,
            };
            match received {
                Some(Ok(event)) => self.handle_event(event),
                Some(Err(_)) => break,
                None => {}
            }

            for kind in self.timers.due(Instant::now()) {
                self.fire_timer(kind);
            }
        }

        if self.interrupted {
            Shutdown::Interrupted
        } else {
            Shutdown::Clean
        }
    }

    fn is_quiescent(&self) -> bool {
        self.draining_pids.is_empty()
            && !self.instances.values().any(|i| i.state.has_process())
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Control(request) => self.handle_control(request),
            EngineEvent::AttachClosed { indexed_name } => {
                if let Some(instance) = self.instances.get_mut(&indexed_name) {
                    instance.attached = false;
                }
            }
            EngineEvent::ShutdownRequested => {
                self.interrupted = true;
                self.initiate_shutdown();
            }
        }
    }

    fn handle_control(&mut self, request: ControlRequest) {
        let ControlRequest {
            line,
            stream,
            reply,
        } = request;
        let response = match protocol::parse(&line) {
            Err(err) => ControlReply::Text(format!("Error: {err}")),
            Ok(Request::Start(target)) => ControlReply::Text(self.cmd_start(target)),
            Ok(Request::Stop(target)) => ControlReply::Text(self.cmd_stop(target)),
            Ok(Request::Restart(target)) => ControlReply::Text(self.cmd_restart(target)),
            Ok(Request::Status) => ControlReply::Text(self.cmd_status()),
            Ok(Request::Reload(filter)) => ControlReply::Text(self.cmd_reload(filter)),
            Ok(Request::Attach(name)) => self.cmd_attach(&name, stream),
            Ok(Request::Detach(name)) => ControlReply::Text(self.cmd_detach(&name)),
            Ok(Request::ProcessInput { name, data }) => {
                ControlReply::Text(self.cmd_process_input(&name, &data))
            }
            Ok(Request::Help) => ControlReply::Text(protocol::help_text()),
            Ok(Request::Exit) => ControlReply::Text("bye".to_string()),
        };
        let _ = reply.publish(response);
    }

    // ------------------------------------------------------------------ //
    // target resolution                                                  //
    // ------------------------------------------------------------------ //

    /// A target names a whole group, a single indexed instance, or everything.
    fn resolve_instances(&self, target: &Target) -> Result<Vec<String>, String> {
        match target {
            Target::All => Ok(self
                .groups
                .values()
                .flat_map(|g| g.indexed_names())
                .collect()),
            Target::Name(name) => {
                if let Some(group) = self.groups.get(name) {
                    Ok(group.indexed_names())
                } else if self.instances.contains_key(name) {
                    Ok(vec![name.clone()])
                } else {
                    Err(format!("Error: program '{name}' not found"))
                }
            }
        }
    }

    // ------------------------------------------------------------------ //
    // start                                                              //
    // ------------------------------------------------------------------ //

    fn cmd_start(&mut self, target: Target) -> String {
        match self.resolve_instances(&target) {
            Err(err) => err,
            Ok(names) => names
                .into_iter()
                .map(|n| self.start_one(&n))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn start_group(&mut self, name: &str) -> Vec<String> {
        let names = match self.groups.get(name) {
            Some(group) => group.indexed_names(),
            None => return vec![format!("Error: program '{name}' not found")],
        };
        names.iter().map(|n| self.start_one(n)).collect()
    }

    /// Operator-initiated start: opens a fresh BACKOFF episode.
    fn start_one(&mut self, indexed: &str) -> String {
        let Some(instance) = self.instances.get_mut(indexed) else {
            return format!("Error: program '{indexed}' not found");
        };
        match instance.state {
            ProcessState::Starting | ProcessState::Running => {
                format!("'{indexed}' is already running")
            }
            ProcessState::Stopping => format!("'{indexed}' is stopping, try again later"),
            ProcessState::Backoff => {
                // a retry timer is already pending for this instance
                format!("'{indexed}' is retrying in backoff")
            }
            ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal => {
                instance.retry_count = 0;
                instance.pending_restart = false;
                instance.pending_start = false;
                self.attempt_spawn(indexed)
            }
        }
    }

    /// One spawn attempt; transitions to STARTING on success and runs the
    /// failed-start accounting otherwise.
    fn attempt_spawn(&mut self, indexed: &str) -> String {
        let Some(spec) = self.spec_of(indexed) else {
            return format!("Error: program '{indexed}' not found");
        };
        match spawner::spawn(&spec, indexed) {
            Ok(spawned) => {
                let pid = spawned.pid;
                if let Some(master) = &spawned.master {
                    match master.try_clone() {
                        Ok(dup) => spawn_output_pump(
                            indexed.to_string(),
                            File::from(dup),
                            spawned.sink.clone().expect("pty spawn carries a sink"),
                            self.publisher.clone(),
                        ),
                        Err(err) => {
                            warn!(instance = indexed, error = %err, "cannot start output pump")
                        }
                    }
                }
                let instance = self
                    .instances
                    .get_mut(indexed)
                    .expect("spawned instance is registered");
                instance.pid = pid;
                instance.state = ProcessState::Starting;
                instance.started_at = Some(Instant::now());
                instance.last_exit_code = None;
                instance.pending_start = false;
                instance.master = spawned.master;
                instance.sink = spawned.sink;
                self.pids.insert(pid, indexed.to_string());
                info!(instance = indexed, pid, "spawned");

                if spec.starttime == 0 {
                    self.mark_running(indexed);
                } else {
                    self.timers.arm(
                        Instant::now() + Duration::from_secs(spec.starttime),
                        TimerKind::StartCheck {
                            indexed_name: indexed.to_string(),
                            pid,
                        },
                    );
                }
                format!("started: '{indexed}' (pid {pid})")
            }
            Err(err) => {
                warn!(instance = indexed, error = %err, "spawn failed");
                self.record_failed_start(indexed);
                format!("Error: '{indexed}': {err}")
            }
        }
    }

    /// A start attempt failed (spawn error or death inside the starttime
    /// window): count it and either back off or give up.
    fn record_failed_start(&mut self, indexed: &str) {
        let Some(spec) = self.spec_of(indexed) else {
            return;
        };
        let shutting_down = self.shutting_down;
        let Some(instance) = self.instances.get_mut(indexed) else {
            return;
        };
        instance.clear_process();
        instance.started_at = None;
        if shutting_down {
            instance.state = ProcessState::Stopped;
            return;
        }
        instance.retry_count += 1;
        if instance.retry_count > spec.startretries {
            instance.state = ProcessState::Fatal;
            warn!(
                instance = indexed,
                retries = instance.retry_count,
                "gave up: entered FATAL state, too many retries"
            );
            let retries = instance.retry_count;
            self.alerts.notify(&AlertEvent::EnteredFatal {
                indexed_name: indexed.to_string(),
                retries,
            });
        } else {
            info!(
                instance = indexed,
                attempt = instance.retry_count,
                of = spec.startretries,
                "start failed, retrying"
            );
            instance.state = ProcessState::Backoff;
            self.timers.arm(
                Instant::now() + BACKOFF_DELAY,
                TimerKind::RetryStart {
                    indexed_name: indexed.to_string(),
                },
            );
        }
    }

    fn mark_running(&mut self, indexed: &str) {
        let Some(spec) = self.spec_of(indexed) else {
            return;
        };
        if let Some(instance) = self.instances.get_mut(indexed) {
            instance.state = ProcessState::Running;
            instance.retry_count = 0;
            info!(
                instance = indexed,
                pid = instance.pid,
                "entered RUNNING state, process has stayed up for {}s",
                spec.starttime
            );
        }
    }

    // ------------------------------------------------------------------ //
    // stop / restart                                                     //
    // ------------------------------------------------------------------ //

    fn cmd_stop(&mut self, target: Target) -> String {
        match self.resolve_instances(&target) {
            Err(err) => err,
            Ok(names) => names
                .into_iter()
                .map(|n| self.stop_one(&n, false))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn stop_one(&mut self, indexed: &str, reload: bool) -> String {
        let Some(spec) = self.spec_of(indexed) else {
            return format!("Error: program '{indexed}' not found");
        };
        let signal_name = if reload {
            spec.reloadsignal.clone()
        } else {
            spec.stopsignal.clone()
        };
        let signal = signals::resolve(&signal_name);
        let Some(instance) = self.instances.get_mut(indexed) else {
            return format!("Error: program '{indexed}' not found");
        };
        match instance.state {
            ProcessState::Starting | ProcessState::Running => {
                let pid = instance.pid;
                match stopper::deliver(pid, signal) {
                    Ok(()) => {
                        instance.state = ProcessState::Stopping;
                        self.timers.arm(
                            Instant::now() + Duration::from_secs(spec.stoptime),
                            TimerKind::KillEscalation {
                                indexed_name: Some(indexed.to_string()),
                                pid,
                            },
                        );
                        format!("stopping: '{indexed}' (signal {signal_name})")
                    }
                    // the process vanished between reap ticks; the next
                    // drain settles the state
                    Err(err) => format!("Error: '{indexed}': {err}"),
                }
            }
            ProcessState::Backoff => {
                instance.state = ProcessState::Stopped;
                format!("stopped: '{indexed}'")
            }
            ProcessState::Stopping => format!("'{indexed}' is already stopping"),
            ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal => {
                format!("'{indexed}' is already stopped")
            }
        }
    }

    fn cmd_restart(&mut self, target: Target) -> String {
        match self.resolve_instances(&target) {
            Err(err) => err,
            Ok(names) => names
                .into_iter()
                .map(|n| self.restart_one(&n))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Restart is stop-then-start with a fixed pause, both resolved through
    /// the loop: the stop runs now, the start is armed once STOPPED is
    /// observed.
    fn restart_one(&mut self, indexed: &str) -> String {
        let Some(instance) = self.instances.get_mut(indexed) else {
            return format!("Error: program '{indexed}' not found");
        };
        match instance.state {
            ProcessState::Starting | ProcessState::Running => {
                instance.pending_restart = true;
                self.stop_one(indexed, false);
                format!("restarting: '{indexed}'")
            }
            ProcessState::Stopping => {
                instance.pending_restart = true;
                format!("restarting: '{indexed}' (waiting for stop)")
            }
            ProcessState::Backoff => {
                instance.state = ProcessState::Stopped;
                instance.retry_count = 0;
                self.schedule_restart_resume(indexed);
                format!("restarting: '{indexed}'")
            }
            ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal => {
                instance.retry_count = 0;
                self.schedule_restart_resume(indexed);
                format!("restarting: '{indexed}'")
            }
        }
    }

    fn schedule_restart_resume(&mut self, indexed: &str) {
        if let Some(instance) = self.instances.get_mut(indexed) {
            instance.pending_start = true;
        }
        self.timers.arm(
            Instant::now() + RESTART_DELAY,
            TimerKind::RestartResume {
                indexed_name: indexed.to_string(),
            },
        );
    }

    // ------------------------------------------------------------------ //
    // status                                                             //
    // ------------------------------------------------------------------ //

    fn cmd_status(&self) -> String {
        let mut lines = vec!["Program status:".to_string()];
        for group in self.groups.values() {
            for indexed in group.indexed_names() {
                let Some(instance) = self.instances.get(&indexed) else {
                    continue;
                };
                let line = match instance.state {
                    ProcessState::Running => format!(
                        "- {indexed}: RUNNING (pid {}, uptime {}s)",
                        instance.pid,
                        instance.uptime_seconds()
                    ),
                    state => format!("- {indexed}: {state}"),
                };
                lines.push(line);
            }
        }
        lines.join("\n")
    }

    // ------------------------------------------------------------------ //
    // reload                                                             //
    // ------------------------------------------------------------------ //

    fn cmd_reload(&mut self, filter: Option<String>) -> String {
        let new_table = match load_programs(&self.config_path) {
            Ok(table) => table,
            Err(err) => return format!("Error: reload failed: {err}"),
        };
        let old_table: ProgramTable = self
            .groups
            .values()
            .map(|g| (g.name.clone(), g.spec.clone()))
            .collect();

        let mut lines = Vec::new();
        let mut matched = false;
        for action in reload::diff(&old_table, &new_table) {
            let name = match &action {
                ReloadAction::Added(n)
                | ReloadAction::Removed(n)
                | ReloadAction::Changed(n)
                | ReloadAction::Unchanged(n) => n.clone(),
            };
            if let Some(filter) = &filter {
                if &name != filter {
                    continue;
                }
            }
            matched = true;
            match action {
                ReloadAction::Unchanged(_) => lines.push(format!("unchanged: '{name}'")),
                ReloadAction::Removed(_) => {
                    info!(program = %name, "reload: removing program");
                    self.remove_group(&name);
                    lines.push(format!("removed: '{name}'"));
                }
                ReloadAction::Added(_) => {
                    info!(program = %name, "reload: adding program");
                    let spec = new_table[&name].clone();
                    let autostart = spec.autostart;
                    self.add_group(name.clone(), spec);
                    lines.push(format!("added: '{name}'"));
                    if autostart {
                        lines.extend(self.start_group(&name));
                    }
                }
                ReloadAction::Changed(_) => {
                    info!(program = %name, "reload: program changed, restarting");
                    lines.push(format!("changed: '{name}' (restarting)"));
                    lines.extend(self.replace_group(&name, new_table[&name].clone()));
                }
            }
        }

        if let Some(filter) = &filter {
            if !matched {
                return format!("Error: program '{filter}' not found in configuration");
            }
        }
        lines.join("\n")
    }

    fn add_group(&mut self, name: String, spec: ProgramSpec) {
        let group = ProgramGroup::new(name.clone(), spec);
        for indexed in group.indexed_names() {
            self.instances
                .entry(indexed.clone())
                .or_insert_with(|| Instance::new(indexed, name.clone()));
        }
        self.groups.insert(name, group);
    }

    /// Drops a group entirely. Live processes are signalled with the
    /// reload signal and tracked as draining pids so escalation and reap
    /// bookkeeping still work after their records are gone.
    fn remove_group(&mut self, name: &str) {
        let Some(group) = self.groups.remove(name) else {
            return;
        };
        self.drain_group_processes(&group);
        self.drains.remove(name);
    }

    /// Stops the old generation, installs the new spec, and starts the new
    /// generation once the last old pid has been reaped.
    fn replace_group(&mut self, name: &str, new_spec: ProgramSpec) -> Vec<String> {
        let Some(group) = self.groups.remove(name) else {
            return Vec::new();
        };
        let draining = self.drain_group_processes(&group);
        self.add_group(name.to_string(), new_spec);
        if draining == 0 {
            self.start_group(name)
        } else {
            self.drains.insert(name.to_string(), draining);
            Vec::new()
        }
    }

    /// Signals every live process of `group` with its reload signal and
    /// removes the instance records. Returns how many pids are draining.
    fn drain_group_processes(&mut self, group: &ProgramGroup) -> usize {
        let signal = signals::resolve(&group.spec.reloadsignal);
        let mut draining = 0;
        for indexed in group.indexed_names() {
            let Some(instance) = self.instances.remove(&indexed) else {
                continue;
            };
            if instance.state.has_process() && instance.pid != 0 {
                let pid = instance.pid;
                let _ = stopper::deliver(pid, signal);
                self.timers.arm(
                    Instant::now() + Duration::from_secs(group.spec.stoptime),
                    TimerKind::KillEscalation {
                        indexed_name: None,
                        pid,
                    },
                );
                self.pids.remove(&pid);
                self.draining_pids.insert(pid, group.name.clone());
                draining += 1;
            }
        }
        draining
    }

    fn note_drained(&mut self, program: String) {
        let Some(remaining) = self.drains.get_mut(&program) else {
            return;
        };
        *remaining -= 1;
        if *remaining > 0 {
            return;
        }
        self.drains.remove(&program);
        if self.groups.contains_key(&program) && !self.shutting_down {
            info!(program = %program, "old processes drained, starting new generation");
            for line in self.start_group(&program) {
                info!("{line}");
            }
        }
    }

    // ------------------------------------------------------------------ //
    // attach / detach / process input                                    //
    // ------------------------------------------------------------------ //

    fn cmd_attach(&mut self, name: &str, stream: Option<TcpStream>) -> ControlReply {
        let error = |msg: String| ControlReply::Text(msg);
        let Some(instance) = self.instances.get_mut(name) else {
            return error(format!("Error: Program '{name}' is not running"));
        };
        if !matches!(
            instance.state,
            ProcessState::Starting | ProcessState::Running
        ) || instance.pid == 0
        {
            return error(format!("Error: Program '{name}' is not running"));
        }
        if instance.master.is_none() {
            return error(format!("Error: Process '{name}' has no attached terminal"));
        }
        if instance.attached {
            return error(format!("Error: Process '{name}' is already attached"));
        }
        let Some(stream) = stream else {
            return error("Error: attach requires a client connection".to_string());
        };
        let sink = instance.sink.as_ref().expect("pty instance carries a sink");
        sink.lock().unwrap().attach_client(stream);
        instance.attached = true;
        info!(instance = name, pid = instance.pid, "client attached");
        ControlReply::AttachStarted { pid: instance.pid }
    }

    fn cmd_detach(&mut self, name: &str) -> String {
        if let Some(instance) = self.instances.get_mut(name) {
            if instance.attached {
                if let Some(sink) = &instance.sink {
                    sink.lock().unwrap().detach_client();
                }
                instance.attached = false;
                info!(instance = name, "client detached");
            }
        }
        "OK".to_string()
    }

    fn cmd_process_input(&mut self, name: &str, data: &[u8]) -> String {
        let Some(instance) = self.instances.get(name) else {
            return "Error: Process not found".to_string();
        };
        if !instance.attached {
            return "Error: Not attached to process".to_string();
        }
        let Some(master) = &instance.master else {
            return "Error: Process has no terminal".to_string();
        };
        match master.try_clone() {
            Ok(dup) => {
                let mut writer = File::from(dup);
                match writer.write_all(data) {
                    Ok(()) => "OK".to_string(),
                    Err(_) => "terminated".to_string(),
                }
            }
            Err(err) => format!("Error: {err}"),
        }
    }

    // ------------------------------------------------------------------ //
    // exits, timers, shutdown                                            //
    // ------------------------------------------------------------------ //

    fn handle_child_exit(&mut self, reaped: ReapedChild) {
        let Some(indexed) = self.pids.remove(&reaped.pid) else {
            if let Some(program) = self.draining_pids.remove(&reaped.pid) {
                debug!(pid = reaped.pid, program = %program, "drained pid reaped");
                self.note_drained(program);
            } else {
                debug!(pid = reaped.pid, "reaped pid with no instance record");
            }
            return;
        };
        let Some(spec) = self.spec_of(&indexed) else {
            return;
        };
        let shutting_down = self.shutting_down;
        let Some(instance) = self.instances.get_mut(&indexed) else {
            return;
        };
        instance.clear_process();
        instance.last_exit_code = Some(reaped.exit_code);

        match instance.state {
            ProcessState::Starting => {
                warn!(
                    instance = indexed,
                    exit_code = reaped.exit_code,
                    "exited before starttime elapsed"
                );
                self.record_failed_start(&indexed);
            }
            ProcessState::Running => {
                let expected = exit_is_expected(&spec, reaped.exit_code);
                info!(
                    instance = indexed,
                    exit_code = reaped.exit_code,
                    signaled = reaped.signaled,
                    expected,
                    "exited"
                );
                if !expected {
                    self.alerts.notify(&AlertEvent::UnexpectedExit {
                        indexed_name: indexed.clone(),
                        exit_code: reaped.exit_code,
                    });
                }
                if !shutting_down && should_restart(spec.autorestart, expected) {
                    info!(instance = indexed, "restarting per autorestart policy");
                    self.attempt_spawn(&indexed);
                } else {
                    instance.state = ProcessState::Exited;
                    instance.started_at = None;
                }
            }
            ProcessState::Stopping => {
                instance.state = ProcessState::Stopped;
                instance.started_at = None;
                info!(instance = indexed, "stopped");
                if instance.pending_restart && !shutting_down {
                    instance.pending_restart = false;
                    self.schedule_restart_resume(&indexed);
                }
            }
            state => {
                debug!(instance = indexed, %state, "exit observed in unexpected state");
            }
        }
    }

    fn fire_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::StartCheck { indexed_name, pid } => {
                let still_starting = self
                    .instances
                    .get(&indexed_name)
                    .is_some_and(|i| i.state == ProcessState::Starting && i.pid == pid);
                if still_starting {
                    self.mark_running(&indexed_name);
                }
            }
            TimerKind::RetryStart { indexed_name } => {
                let in_backoff = self
                    .instances
                    .get(&indexed_name)
                    .is_some_and(|i| i.state == ProcessState::Backoff);
                if !in_backoff {
                    return;
                }
                if self.shutting_down {
                    if let Some(instance) = self.instances.get_mut(&indexed_name) {
                        instance.state = ProcessState::Stopped;
                    }
                    return;
                }
                self.attempt_spawn(&indexed_name);
            }
            TimerKind::KillEscalation { indexed_name, pid } => {
                let due = match &indexed_name {
                    Some(name) => self
                        .instances
                        .get(name)
                        .is_some_and(|i| i.state == ProcessState::Stopping && i.pid == pid),
                    None => self.draining_pids.contains_key(&pid),
                };
                if due && stopper::is_alive(pid) {
                    stopper::force_kill(pid);
                }
            }
            TimerKind::RestartResume { indexed_name } => {
                let pending = self
                    .instances
                    .get(&indexed_name)
                    .is_some_and(|i| i.pending_start && !i.state.has_process());
                if !pending {
                    return;
                }
                if self.shutting_down {
                    if let Some(instance) = self.instances.get_mut(&indexed_name) {
                        instance.pending_start = false;
                    }
                    return;
                }
                self.attempt_spawn(&indexed_name);
            }
        }
    }

    fn initiate_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("shutdown requested, stopping all processes");
        let names: Vec<String> = self.instances.keys().cloned().collect();
        for indexed in names {
            if let Some(instance) = self.instances.get_mut(&indexed) {
                instance.pending_restart = false;
                instance.pending_start = false;
                match instance.state {
                    ProcessState::Starting | ProcessState::Running => {
                        self.stop_one(&indexed, false);
                    }
                    ProcessState::Backoff => instance.state = ProcessState::Stopped,
                    _ => {}
                }
            }
        }
    }

    fn spec_of(&self, indexed: &str) -> Option<ProgramSpec> {
        let program = &self.instances.get(indexed)?.program;
        Some(self.groups.get(program)?.spec.clone())
    }
}
