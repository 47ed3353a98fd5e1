//! CLI argument parsing for the `trazo` demo binary

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for finished traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented frame tree (default)
    Text,
    /// One JSON document per line
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "trazo")]
#[command(version)]
#[command(about = "In-process span capture engine driven by a synthetic workload", long_about = None)]
pub struct Cli {
    /// Load tracer configuration from a TOML file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of root executions to simulate
    #[arg(short = 'n', long = "traces", default_value = "3")]
    pub traces: usize,

    /// Nesting depth below each root frame
    #[arg(long = "depth", default_value = "2")]
    pub depth: usize,

    /// Children opened under every non-leaf frame
    #[arg(long = "fanout", default_value = "2")]
    pub fanout: usize,

    /// Application name hint set on every root (omit to exercise unknown-application handling)
    #[arg(long = "app", value_name = "NAME")]
    pub app: Option<String>,

    /// Mark every Nth leaf operation as failed (0 disables)
    #[arg(long = "fail-every", value_name = "N", default_value = "0")]
    pub fail_every: usize,

    /// Percentage of traces downgraded to endpoint-only collection (overrides config)
    #[arg(long = "endpoint-only-ratio", value_name = "PERCENT", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub endpoint_only_ratio: Option<u8>,

    /// Server name stamped on traces (overrides config)
    #[arg(long = "server-name", value_name = "NAME")]
    pub server_name: Option<String>,

    /// Maximum frames per trace (overrides config)
    #[arg(long = "max-frames", value_name = "N")]
    pub max_frames: Option<usize>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Print workload and dispatch statistics to stderr
    #[arg(long = "stats")]
    pub stats: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
