mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, Target};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "modlink", version, about = "Hardware-daemon client CLI")]
struct Cli {
    /// Daemon host.
    #[arg(long, default_value = "localhost", global = true)]
    host: String,

    /// Daemon port.
    #[arg(long, default_value_t = modlink_client::DEFAULT_PORT, global = true)]
    port: u16,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let target = Target {
        host: cli.host,
        port: cli.port,
    };
    let result = cmd::run(cli.command, &target, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "modlink",
            "send",
            "66051",
            "--function",
            "1",
            "--data",
            "test",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
        assert_eq!(cli.port, modlink_client::DEFAULT_PORT);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "modlink",
            "send",
            "1",
            "--function",
            "1",
            "--data",
            "x",
            "--file",
            "/tmp/payload.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_monitor_subcommand() {
        let cli = Cli::try_parse_from([
            "modlink",
            "--host",
            "10.0.0.2",
            "monitor",
            "1",
            "--count",
            "5",
        ])
        .expect("monitor args should parse");

        assert!(matches!(cli.command, Command::Monitor(_)));
        assert_eq!(cli.host, "10.0.0.2");
    }
}
