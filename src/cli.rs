use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    bridge::Status,
    command::Command,
    config::Config,
    error::Error,
    serial::{serial_port::SystemPorts, Ports},
};

/// The command line interface for the serial bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Listen on this port instead of the configured one
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Also log to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// More output per occurrence
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The log level asked for on the command line.
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),

    /// List the serial ports on this machine.
    Ports,
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON message connecting to a serial port.
    Connect,

    /// Show an example JSON message disconnecting from the serial port.
    Disconnect,

    /// Show an example JSON response from the status endpoint.
    Status,
}

fn pretty_json<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string_pretty(value).map_err(|e| Error::Server(e.to_string()))
}

/// Run a subcommand and print what it produced.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    let output = match command {
        Commands::Examples(example) => match example {
            Examples::Config => Config::example().serialize_pretty()?,
            Examples::Connect => pretty_json(&Command::example_connect())?,
            Examples::Disconnect => pretty_json(&Command::example_disconnect())?,
            Examples::Status => pretty_json(&Status::example())?,
        },
        Commands::Ports => {
            let ports: Arc<dyn Ports> = Arc::new(SystemPorts);
            pretty_json(&ports.list()?)?
        }
    };

    println!("{output}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity() {
        let cli = Cli::parse_from(["serial-bridge"]);
        assert_eq!(cli.log_level(), Level::INFO);

        let cli = Cli::parse_from(["serial-bridge", "-vv", "--port", "9000", "my.ron"]);
        assert_eq!(cli.log_level(), Level::TRACE);
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.config, Some(PathBuf::from("my.ron")));
    }

    #[test]
    fn examples_print() {
        handle_command(Commands::Examples(Examples::Config)).unwrap();
        handle_command(Commands::Examples(Examples::Connect)).unwrap();
        handle_command(Commands::Examples(Examples::Status)).unwrap();
    }
}
