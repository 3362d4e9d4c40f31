use anyhow::{Context, Result};
use clap::Parser;
use coretrace::align::Aligner;
use coretrace::cli::{AlignArgs, Cli, Command, CoremapArgs, MergeArgs, OutputFormat};
use coretrace::config::AnalysisConfig;
use coretrace::merge::StreamMerger;
use coretrace::occupancy::{
    validate_core_count, OccupancyTracker, ThreadFilter, TrackerConfig, WindowPolicy,
};
use coretrace::parse::{read_input, read_source_trace};
use coretrace::render::{Block, SnapshotRenderer};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize the stderr tracing subscriber
///
/// `--debug` forces TRACE; otherwise `RUST_LOG` applies, defaulting to warnings.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

/// Apply a `--numcores` override and validate the result
fn resolve_core_count(config: &AnalysisConfig, flag: Option<usize>) -> Result<usize> {
    let num_cores = flag.unwrap_or(config.num_cores);
    validate_core_count(num_cores)?;
    tracing::info!(logical = num_cores, physical = num_cores / 2, "core layout");
    Ok(num_cores)
}

fn run_merge(mut config: AnalysisConfig, args: MergeArgs) -> Result<()> {
    config.keep_old_events |= args.keep_old_events;
    config.stop_at_first_exhausted |= args.stop_at_first_exhausted;

    let sources = args
        .inputs
        .iter()
        .map(|path| {
            read_source_trace(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let merged = StreamMerger::new(config.merge_config()).merge_sources(sources);

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    match args.format {
        OutputFormat::Text => merged.write_text(&mut out)?,
        OutputFormat::Json => merged.write_json_lines(&mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn print_report(renderer: &SnapshotRenderer, blocks: &[Block]) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    out.write_all(renderer.render_report(blocks).as_bytes())?;
    out.flush()?;
    Ok(())
}

fn run_coremap(config: AnalysisConfig, args: CoremapArgs) -> Result<()> {
    let num_cores = resolve_core_count(&config, args.num_cores)?;
    let tracked = if args.all_threads {
        ThreadFilter::all()
    } else {
        config.thread_filter(args.verbose)?
    };
    let window = if args.no_window {
        WindowPolicy::Always
    } else {
        WindowPolicy::Markers
    };

    let content = read_input(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let mut tracker = OccupancyTracker::new(TrackerConfig {
        num_cores,
        tracked,
        window,
    })?;
    let blocks = tracker.run(&content)?;
    print_report(&SnapshotRenderer::new(num_cores)?, &blocks)
}

fn run_align(config: AnalysisConfig, args: AlignArgs) -> Result<()> {
    let num_cores = resolve_core_count(&config, args.num_cores)?;
    let tracker = OccupancyTracker::new(TrackerConfig {
        num_cores,
        tracked: config.thread_filter(args.verbose)?,
        window: WindowPolicy::Markers,
    })?;

    let coretrace = read_input(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let estimation = read_input(&args.estimation_log)
        .with_context(|| format!("failed to read {}", args.estimation_log.display()))?;
    let latency = args
        .latency_log
        .as_deref()
        .map(|path| {
            read_input(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .transpose()?;

    let aligner = Aligner::new(tracker, Some(estimation.as_str()), latency.as_deref())?;
    let blocks = aligner.run(&coretrace)?;
    print_report(&SnapshotRenderer::new(num_cores)?, &blocks)
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Merge(merge) => run_merge(config, merge),
        Command::Coremap(coremap) => run_coremap(config, coremap),
        Command::Align(align) => run_align(config, align),
    }
}
