use thiserror::Error;

/// Target of a start/stop/restart verb: a program, a single indexed
/// instance, or everything. A bare verb means `all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start(Target),
    Stop(Target),
    Restart(Target),
    Status,
    Reload(Option<String>),
    Attach(String),
    Detach(String),
    ProcessInput { name: String, data: Vec<u8> },
    Help,
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("command '{0}' requires a program name")]
    MissingArgument(&'static str),

    #[error("invalid hex data")]
    InvalidHex,

    #[error("empty request")]
    Empty,
}

/// Tokenizes one request: `verb [arg]`, whitespace separated, verbs case
/// insensitive.
pub fn parse(line: &str) -> Result<Request, ProtocolError> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().ok_or(ProtocolError::Empty)?.to_lowercase();
    let arg = tokens.next();

    match verb.as_str() {
        "start" => Ok(Request::Start(target(arg))),
        "stop" => Ok(Request::Stop(target(arg))),
        "restart" => Ok(Request::Restart(target(arg))),
        "status" => Ok(Request::Status),
        "reload" => Ok(Request::Reload(match target(arg) {
            Target::All => None,
            Target::Name(name) => Some(name),
        })),
        "attach" => arg
            .map(|name| Request::Attach(name.to_string()))
            .ok_or(ProtocolError::MissingArgument("attach")),
        "detach" => arg
            .map(|name| Request::Detach(name.to_string()))
            .ok_or(ProtocolError::MissingArgument("detach")),
        "process_input" => {
            let name = arg.ok_or(ProtocolError::MissingArgument("process_input"))?;
            let hex_data = tokens
                .next()
                .ok_or(ProtocolError::MissingArgument("process_input"))?;
            let data = hex::decode(hex_data).map_err(|_| ProtocolError::InvalidHex)?;
            Ok(Request::ProcessInput {
                name: name.to_string(),
                data,
            })
        }
        "help" => Ok(Request::Help),
        "exit" => Ok(Request::Exit),
        _ => Err(ProtocolError::UnknownCommand(verb)),
    }
}

fn target(arg: Option<&str>) -> Target {
    match arg {
        None => Target::All,
        Some(name) if name.eq_ignore_ascii_case("all") => Target::All,
        Some(name) => Target::Name(name.to_string()),
    }
}

pub fn help_text() -> String {
    [
        "Available commands:",
        "  start [program]       Start a program, an instance, or everything",
        "  stop [program]        Stop a program, an instance, or everything",
        "  restart [program]     Stop then start after a short pause",
        "  status                Show the current status of all instances",
        "  reload [program]      Re-read the configuration and apply changes",
        "  attach <instance>     Attach to a running instance's terminal",
        "  detach <instance>     End an attach session",
        "  help                  Show available commands",
        "  exit                  Close this connection",
    ]
    .join("\n")
}
