use clap::Parser;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)] // Read from `Cargo.toml`
pub struct Cli {
    /// Path to the program configuration file
    #[arg(default_value = "config_file.yml")]
    config: PathBuf,

    /// Detach from the terminal and run in the background
    #[arg(short, long)]
    daemon: bool,

    /// Address the control server listens on
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    listen: String,
}

impl Cli {
    /// Parses command line arguments
    pub fn init() -> Self {
        Self::parse()
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.clone()
    }

    pub fn daemon(&self) -> bool {
        self.daemon
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.listen.parse()
    }
}
