//! CLI argument definitions using clap.

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// SinkNode - telemetry ingestion and fan-out
#[derive(Parser, Debug)]
#[command(
    name = "sinknode",
    author,
    version,
    about = "Telemetry ingestion and rate-limited fan-out",
    long_about = "Reads a byte stream from a sensor or radio source, frames and decodes it into \n\
                  records, and delivers every record to the sinks whose routing key matches, \n\
                  each at its own pace and with bounded retry."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "SINKNODE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "SINKNODE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Filter used when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingestion pipeline
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
#[command(group(ArgGroup::new("source_override").args(["stdin", "file", "tcp"])))]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "sinknode.toml", env = "SINKNODE_CONFIG")]
    pub config: PathBuf,

    /// Read from standard input instead of the configured source
    #[arg(long)]
    pub stdin: bool,

    /// Read from this file instead of the configured source
    #[arg(long, env = "SINKNODE_SOURCE_FILE")]
    pub file: Option<PathBuf>,

    /// Connect to this `host:port` instead of the configured source
    #[arg(long, env = "SINKNODE_SOURCE_TCP")]
    pub tcp: Option<String>,

    /// Maximum number of records to ingest (0 = unlimited)
    #[arg(long, default_value = "0", env = "SINKNODE_MAX_RECORDS")]
    pub max_records: u64,

    /// Pipeline timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "SINKNODE_TIMEOUT")]
    pub timeout: u64,

    /// Seconds to wait for sinks to drain on shutdown
    #[arg(long, default_value = "10", env = "SINKNODE_DRAIN_TIMEOUT")]
    pub drain_timeout: u64,

    /// Validate configuration and exit without running pipeline
    #[arg(long)]
    pub dry_run: bool,

    /// Channel buffer size for internal queues
    #[arg(long, default_value = "100", env = "SINKNODE_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "SINKNODE_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "sinknode.toml", env = "SINKNODE_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "sinknode.toml", env = "SINKNODE_CONFIG")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-sink delivery and format details
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::parse_from([
            "sinknode",
            "-vv",
            "run",
            "--config",
            "walker.toml",
            "--tcp",
            "127.0.0.1:7000",
            "--max-records",
            "10",
        ]);
        assert_eq!(cli.log_level(), "trace");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("walker.toml"));
        assert_eq!(args.tcp.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(args.max_records, 10);
    }

    #[test]
    fn test_source_overrides_conflict() {
        let result = Cli::try_parse_from(["sinknode", "run", "--stdin", "--tcp", "127.0.0.1:1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["sinknode", "-q", "-v", "info"]).is_err());
        let cli = Cli::parse_from(["sinknode", "-q", "validate"]);
        assert_eq!(cli.log_level(), "warn");
    }
}
