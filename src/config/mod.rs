pub mod signals;

use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Program table consumed by the engine, keyed by program name. A `BTreeMap`
/// keeps status output and autostart order stable.
pub type ProgramTable = BTreeMap<String, ProgramSpec>;

const MAX_NUMPROCS: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML in `{}`: {source}", path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("program '{program}': {reason}")]
    Invalid { program: String, reason: String },

    #[error("no programs defined in configuration")]
    Empty,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutoRestart {
    Always,
    Never,
    #[default]
    Unexpected,
}

/// Declarative configuration for one program, immutable per reload
/// generation. Missing keys take their documented defaults at parse time, so
/// spec equality across reloads is a plain field-by-field comparison; the
/// program name is the table key, not a field.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProgramSpec {
    pub cmd: String,

    #[serde(default = "default_numprocs")]
    pub numprocs: u32,

    #[serde(default)]
    pub autostart: bool,

    #[serde(default)]
    pub autorestart: AutoRestart,

    #[serde(default = "default_exitcodes", deserialize_with = "one_or_many")]
    pub exitcodes: Vec<i32>,

    /// Seconds the process must stay up after exec to count as RUNNING.
    #[serde(default = "default_starttime")]
    pub starttime: u64,

    #[serde(default = "default_startretries")]
    pub startretries: u32,

    #[serde(default = "default_stopsignal")]
    pub stopsignal: String,

    /// Seconds granted to a graceful stop before SIGKILL.
    #[serde(default = "default_stoptime")]
    pub stoptime: u64,

    /// Signal used instead of `stopsignal` for reload-driven stops.
    #[serde(default = "default_reloadsignal")]
    pub reloadsignal: String,

    #[serde(default)]
    pub stdout: Option<PathBuf>,

    #[serde(default)]
    pub stderr: Option<PathBuf>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub workingdir: Option<PathBuf>,

    #[serde(default = "default_umask", deserialize_with = "octal_umask")]
    pub umask: u32,

    /// Spawn instances of this program on a pseudo-terminal so clients can
    /// attach to them.
    #[serde(default)]
    pub pty: bool,
}

fn default_numprocs() -> u32 {
    1
}
fn default_exitcodes() -> Vec<i32> {
    vec![0]
}
fn default_starttime() -> u64 {
    1
}
fn default_startretries() -> u32 {
    3
}
fn default_stopsignal() -> String {
    "TERM".to_string()
}
fn default_stoptime() -> u64 {
    10
}
fn default_reloadsignal() -> String {
    "HUP".to_string()
}
fn default_umask() -> u32 {
    0o022
}

/// Accepts `exitcodes: 2` as shorthand for `exitcodes: [2]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(i32),
        Many(Vec<i32>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(code) => vec![code],
        OneOrMany::Many(codes) => codes,
    })
}

/// Accepts `umask: "022"` (octal string) or a bare integer that YAML already
/// resolved to a number.
fn octal_umask<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => u32::from_str_radix(s.trim(), 8)
            .map_err(|_| serde::de::Error::custom(format!("invalid octal umask '{s}'"))),
    }
}

impl ProgramSpec {
    fn validate(&self, program: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            program: program.to_string(),
            reason,
        };

        if self.cmd.trim().is_empty() {
            return Err(invalid("'cmd' cannot be empty".to_string()));
        }
        if self.numprocs < 1 || self.numprocs > MAX_NUMPROCS {
            return Err(invalid(format!(
                "'numprocs' must be between 1 and {MAX_NUMPROCS}"
            )));
        }
        if self.exitcodes.is_empty() {
            return Err(invalid("'exitcodes' cannot be empty".to_string()));
        }
        if let Some(code) = self.exitcodes.iter().find(|c| !(0..=255).contains(*c)) {
            return Err(invalid(format!("exit code {code} is out of range 0-255")));
        }
        if self.stoptime < 1 {
            return Err(invalid("'stoptime' must be at least 1".to_string()));
        }
        if !signals::is_known(&self.stopsignal) {
            return Err(invalid(format!(
                "'stopsignal' {} is not one of {}",
                self.stopsignal,
                signals::known_names().join(", ")
            )));
        }
        if !signals::is_known(&self.reloadsignal) {
            return Err(invalid(format!(
                "'reloadsignal' {} is not one of {}",
                self.reloadsignal,
                signals::known_names().join(", ")
            )));
        }
        if self.umask > 0o777 {
            return Err(invalid(format!(
                "'umask' {:o} is out of range 0-0777",
                self.umask
            )));
        }
        if let Some(dir) = &self.workingdir {
            if !dir.is_dir() {
                return Err(invalid(format!(
                    "'workingdir' {} is not a directory",
                    dir.display()
                )));
            }
        }
        for (key, path) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            if let Some(path) = path {
                let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
                if let Some(parent) = parent {
                    if !parent.is_dir() {
                        return Err(invalid(format!(
                            "'{key}': directory does not exist: {}",
                            parent.display()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Reads and validates the program table. The file is either a mapping of
/// program names to specs, or the same mapping nested under a `programs:`
/// key.
pub fn load_programs(path: &Path) -> Result<ProgramTable, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_programs(&contents).map_err(|err| match err {
        ParseError::Yaml(source) => ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        },
        ParseError::Config(err) => err,
    })
}

enum ParseError {
    Yaml(serde_yaml::Error),
    Config(ConfigError),
}

fn parse_programs(contents: &str) -> Result<ProgramTable, ParseError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(contents).map_err(ParseError::Yaml)?;
    let programs_key = serde_yaml::Value::from("programs");
    let table = match value {
        serde_yaml::Value::Mapping(ref mapping) if mapping.contains_key(&programs_key) => {
            mapping.get(&programs_key).cloned().unwrap_or_default()
        }
        other => other,
    };

    let programs: ProgramTable =
        serde_yaml::from_value(table).map_err(ParseError::Yaml)?;
    if programs.is_empty() {
        return Err(ParseError::Config(ConfigError::Empty));
    }
    for (name, spec) in &programs {
        spec.validate(name).map_err(ParseError::Config)?;
    }
    Ok(programs)
}
