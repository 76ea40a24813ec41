use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod monitor;
pub mod send;
pub mod version;

/// Daemon endpoint shared by all subcommands.
pub struct Target {
    pub host: String,
    pub port: u16,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a request to a device and print the response.
    Send(SendArgs),
    /// Print callbacks pushed by a device until interrupted.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, target: &Target, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, target, format),
        Command::Monitor(args) => monitor::run(args, target, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Device UID.
    pub uid: u32,
    /// Function ID to invoke.
    #[arg(long, short = 'f')]
    pub function: u8,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Send without waiting for a response.
    #[arg(long)]
    pub fire_and_forget: bool,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "2500ms")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Device UID.
    pub uid: u32,
    /// Exit after printing N callbacks.
    #[arg(long)]
    pub count: Option<usize>,
    /// Filter to specific callback IDs (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub callbacks: Option<Vec<u8>>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
