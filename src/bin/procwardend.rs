//! Entry point for the supervisor daemon: parse the command line, load and
//! validate the program table, optionally detach from the terminal, then run
//! the control server and the supervision engine until shutdown.

use std::error::Error;
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::process::ExitCode;

use nix::unistd::{dup2, fork, setsid, ForkResult};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use procwarden::alert::LogAlertSink;
use procwarden::cli::Cli;
use procwarden::config;
use procwarden::control::server::ControlServer;
use procwarden::event::channel::pub_sub;
use procwarden::event::EngineEvent;
use procwarden::supervisor::engine::{Engine, Shutdown};

/// Exit code reported after a signal-initiated shutdown.
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let cli = Cli::init();

    // info unless RUST_LOG narrows or widens it
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if let Err(err) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("Error initialising logging: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(Shutdown::Clean) => {
            info!("daemon exited cleanly");
            ExitCode::SUCCESS
        }
        Ok(Shutdown::Interrupted) => {
            info!("daemon exited after interrupt");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(err) => {
            error!("initialisation failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<Shutdown, Box<dyn Error>> {
    let config_path = cli.config_path();
    let programs = config::load_programs(&config_path)?;
    let listen_addr = cli.listen_addr()?;

    if cli.daemon() {
        daemonize()?;
    }

    let (engine_publisher, engine_consumer) = pub_sub::<EngineEvent>();

    let signal_publisher = engine_publisher.clone();
    ctrlc::set_handler(move || {
        let _ = signal_publisher.publish(EngineEvent::ShutdownRequested);
    })?;

    let server = ControlServer::start(listen_addr, engine_publisher.clone())?;
    info!(
        pid = std::process::id(),
        config = %config_path.display(),
        "procwardend started"
    );

    let engine = Engine::new(
        config_path,
        programs,
        engine_consumer,
        engine_publisher,
        Box::new(LogAlertSink),
    );
    let outcome = engine.run();

    server.stop();
    Ok(outcome)
}

/// Classic background detach: fork so the parent can return to the shell,
/// start a new session, and point stdio at /dev/null.
fn daemonize() -> Result<(), Box<dyn Error>> {
    match unsafe { fork() }.map_err(std::io::Error::from)? {
        ForkResult::Parent { child } => {
            println!("procwardend running in background with pid {child}");
            std::process::exit(0);
        }
        ForkResult::Child => {}
    }
    setsid().map_err(std::io::Error::from)?;

    let devnull = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for fd in 0..=2 {
        dup2(devnull.as_raw_fd(), fd).map_err(std::io::Error::from)?;
    }
    Ok(())
}
