use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use nix::pty::openpty;
use nix::sys::stat::{umask, Mode};
use nix::unistd::{close, setsid};
use thiserror::Error;
use tracing::debug;

use crate::config::ProgramSpec;
use crate::supervisor::output::OutputSink;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("no command specified")]
    EmptyCommand,

    #[error("can't find command '{0}'")]
    CommandNotFound(String),

    #[error("command '{0}' is not executable")]
    NotExecutable(String),

    #[error("working directory '{}' is not usable", .0.display())]
    ChdirFailed(PathBuf),

    #[error("can't redirect to '{}': {source}", path.display())]
    RedirectFailed { path: PathBuf, source: io::Error },

    #[error("can't allocate pty: {0}")]
    PtyFailed(nix::Error),

    #[error("exec failed: {0}")]
    ExecFailed(io::Error),
}

#[derive(Debug)]
pub struct SpawnedChild {
    pub pid: i32,
    /// Present for pty spawns; owned by the instance from here on.
    pub master: Option<OwnedFd>,
    /// Output routing for the pty pump, preloaded with the stdout log file.
    pub sink: Option<Arc<Mutex<OutputSink>>>,
}

/// Realizes the declared execution environment and forks the child:
/// expanded/tokenized command, session leadership, umask, working directory,
/// env overlay, and either a pty on stdio or append-mode log redirection.
/// The caller never waits here; exits are observed by the reaper.
pub fn spawn(spec: &ProgramSpec, indexed_name: &str) -> Result<SpawnedChild, SpawnError> {
    let argv = split_command(&expand_vars(&spec.cmd));
    let program = argv.first().ok_or(SpawnError::EmptyCommand)?;
    check_executable(program)?;

    if let Some(dir) = &spec.workingdir {
        if !dir.is_dir() {
            return Err(SpawnError::ChdirFailed(dir.clone()));
        }
    }

    let mut cmd = Command::new(program);
    cmd.args(&argv[1..]).envs(&spec.env);
    if let Some(dir) = &spec.workingdir {
        cmd.current_dir(dir);
    }

    let mut master = None;
    let mut sink = None;
    if spec.pty {
        let pty = openpty(None, None).map_err(SpawnError::PtyFailed)?;
        let slave_out = clone_fd(&pty.slave)?;
        let slave_err = clone_fd(&pty.slave)?;
        cmd.stdin(Stdio::from(pty.slave))
            .stdout(Stdio::from(slave_out))
            .stderr(Stdio::from(slave_err));
        sink = Some(Arc::new(Mutex::new(OutputSink::to_file(
            spec.stdout.as_deref().map(open_log).transpose()?,
        ))));
        master = Some(pty.master);
    } else {
        cmd.stdin(Stdio::null());
        if let Some(path) = &spec.stdout {
            cmd.stdout(Stdio::from(open_log(path)?));
        }
        if let Some(path) = &spec.stderr {
            cmd.stderr(Stdio::from(open_log(path)?));
        }
    }

    let child_umask = spec.umask;
    // the child runs with the slave on stdio; the parent's master must not
    // survive the exec
    let parent_master = master.as_ref().map(|fd| fd.as_raw_fd());
    unsafe {
        cmd.pre_exec(move || {
            if let Some(fd) = parent_master {
                let _ = close(fd);
            }
            setsid().map_err(io::Error::from)?;
            umask(Mode::from_bits_truncate(child_umask as nix::libc::mode_t));
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(SpawnError::ExecFailed)?;
    let pid = child.id() as i32;
    debug!(instance = indexed_name, pid, "spawned child process");

    Ok(SpawnedChild { pid, master, sink })
}

fn clone_fd(fd: &OwnedFd) -> Result<OwnedFd, SpawnError> {
    fd.try_clone().map_err(SpawnError::ExecFailed)
}

/// Log files are opened append-only, created with mode 0666 before umask.
fn open_log(path: &Path) -> Result<File, SpawnError> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o666)
        .open(path)
        .map_err(|source| SpawnError::RedirectFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// `argv[0]` must be an executable path or resolvable on PATH; this is
/// checked before forking so the failure surfaces synchronously.
fn check_executable(program: &str) -> Result<(), SpawnError> {
    if program.contains('/') {
        let path = Path::new(program);
        if !path.exists() {
            return Err(SpawnError::CommandNotFound(program.to_string()));
        }
        if !is_executable_file(path) {
            return Err(SpawnError::NotExecutable(program.to_string()));
        }
        return Ok(());
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    let mut found = false;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if candidate.exists() {
            found = true;
            if is_executable_file(&candidate) {
                return Ok(());
            }
        }
    }
    if found {
        Err(SpawnError::NotExecutable(program.to_string()))
    } else {
        Err(SpawnError::CommandNotFound(program.to_string()))
    }
}

fn is_executable_file(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Expands `$PWD`, `$NAME` and `${NAME}` references. Unknown variables are
/// left literal, the same way a shell-less `expandvars` behaves.
fn expand_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                break;
            }
            if !braced && !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            name.push(c);
            chars.next();
        }
        if name.is_empty() {
            out.push('$');
            continue;
        }
        let value = if name == "PWD" {
            std::env::current_dir()
                .ok()
                .map(|d| d.to_string_lossy().into_owned())
        } else {
            std::env::var(&name).ok()
        };
        match value {
            Some(v) => out.push_str(&v),
            None if braced => out.push_str(&format!("${{{name}}}")),
            None => out.push_str(&format!("${name}")),
        }
    }
    out
}

/// Splits a command line on whitespace, honoring single and double quotes so
/// wrapped shell invocations keep their script argument intact.
fn split_command(cmd: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in cmd.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    parts.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        parts.push(current);
    }
    parts
}
