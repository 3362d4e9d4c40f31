//! CLI argument parsing for coretrace

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for merged traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Timetrace text, mergeable again (default)
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "coretrace")]
#[command(version)]
#[command(about = "Merge per-thread timetraces and summarize core occupancy", long_about = None)]
pub struct Cli {
    /// Enable debug diagnostics on stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Load defaults from a TOML config file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Merge several timetrace logs into one time-ordered log
    Merge(MergeArgs),
    /// Print the core map every time a tracked thread changes core
    Coremap(CoremapArgs),
    /// Print the core map interleaved with estimation dumps and latency rows
    Align(AlignArgs),
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Timetrace logs to merge; ties go to the earlier-listed file
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,

    /// Keep old events rather than truncating to the latest common start
    #[arg(short = 'k', long = "keep-old-events")]
    pub keep_old_events: bool,

    /// Stop merging as soon as any input runs out of events
    #[arg(long = "stop-at-first-exhausted")]
    pub stop_at_first_exhausted: bool,

    /// Write the merged log here instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct CoremapArgs {
    /// Coretrace log file
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: PathBuf,

    /// Number of logical cores, hyperthread siblings included (default: 16)
    #[arg(short = 'n', long = "numcores", value_name = "N")]
    pub num_cores: Option<usize>,

    /// Also track video threads (avid<N>)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Snapshot on every thread's migration, not only tracked ones
    #[arg(long = "all-threads")]
    pub all_threads: bool,

    /// Ignore CLEANUP CORETRACE markers and track the whole trace
    #[arg(long = "no-window")]
    pub no_window: bool,
}

#[derive(Args, Debug)]
pub struct AlignArgs {
    /// Coretrace log file
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: PathBuf,

    /// Estimation-dump log file
    #[arg(short = 'e', long = "estimation-log", value_name = "FILE")]
    pub estimation_log: PathBuf,

    /// Latency log file
    #[arg(short = 'l', long = "latency-log", value_name = "FILE")]
    pub latency_log: Option<PathBuf>,

    /// Number of logical cores, hyperthread siblings included (default: 16)
    #[arg(short = 'n', long = "numcores", value_name = "N")]
    pub num_cores: Option<usize>,

    /// Also track video threads (avid<N>)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}
