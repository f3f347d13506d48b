use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "capstore", version, about = "Hot/cold capture storage: RAM tier, archival, retention and health")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain, env = "CAPSTORE_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the archival mover, retention sweeper and health monitor until
    /// interrupted. SIGHUP reloads the configuration.
    Run,
    /// Mount the RAM tier and create the cold layout (requires root)
    Provision(DeviceArgs),
    /// Check that every hot tier is a distinct mount
    Validate(DeviceArgs),
    /// Create missing cold tier buckets
    Layout(DeviceArgs),
    /// Run a single archival cycle
    Archive(DeviceArgs),
    /// Run a single retention sweep
    Sweep(DeviceArgs),
    /// Print one JSON health record per device
    Health(DeviceArgs),
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Debug, Args)]
pub struct DeviceArgs {
    /// Only act on this device
    #[arg(short, long)]
    pub device: Option<String>,
}
