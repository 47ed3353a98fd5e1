use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use trazo::cli::{Cli, OutputFormat};
use trazo::config::TracerConfig;
use trazo::dispatch::TraceListener;
use trazo::endpoint::TypedEndPointAnalyzer;
use trazo::simulate::{Workload, WorkloadReport};
use trazo::sinks::{JsonLinesSink, TextSink};
use trazo::tracer::{Tracer, TracerBuilder};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Config file (or defaults) with command-line overrides applied
fn load_config(args: &Cli) -> Result<TracerConfig> {
    let mut config = match &args.config {
        Some(path) => TracerConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TracerConfig::default(),
    };

    if let Some(name) = &args.server_name {
        config.server_name = name.clone();
    }
    if let Some(max_frames) = args.max_frames {
        config.max_frames = max_frames;
    }
    if let Some(ratio) = args.endpoint_only_ratio {
        config.endpoint_only_ratio = ratio;
    }
    config.validate()?;
    Ok(config)
}

fn build_tracer(config: TracerConfig, format: OutputFormat) -> Result<Tracer> {
    let sink: Arc<dyn TraceListener> = match format {
        OutputFormat::Text => Arc::new(TextSink::stdout()),
        OutputFormat::Json => Arc::new(JsonLinesSink::stdout()),
    };

    let tracer = TracerBuilder::new()
        .config(config)
        .analyzer(Arc::new(TypedEndPointAnalyzer::new(&["http"], 100)))
        .analyzer(Arc::new(
            TypedEndPointAnalyzer::new(&["service"], 50).with_depth_penalty(5),
        ))
        .analyzer(Arc::new(TypedEndPointAnalyzer::new(&["sql"], 10)))
        .listener(sink)
        .with_watchdog(true)
        .build()?;
    Ok(tracer)
}

fn print_stats(report: &WorkloadReport, tracer: &Tracer) {
    let dispatch = tracer.dispatcher().stats();
    eprintln!("=== Workload ===");
    eprintln!("roots:          {}", report.roots);
    eprintln!("frames entered: {}", report.frames_entered);
    eprintln!(
        "probes skipped: {} ({:.1}%)",
        report.probes_skipped,
        report.skip_rate() * 100.0
    );
    eprintln!("failures:       {}", report.failures);
    eprintln!("discarded:      {}", report.discarded);
    eprintln!("=== Dispatch ===");
    eprintln!("dispatched:     {}", dispatch.dispatched);
    eprintln!("delivered:      {}", dispatch.delivered);
    eprintln!("buffered:       {}", dispatch.buffered);
    eprintln!(
        "evicted:        {} ({:.1}%)",
        dispatch.evicted,
        dispatch.eviction_rate() * 100.0
    );
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = load_config(&args)?;
    let tracer = build_tracer(config, args.format)?;

    let workload = Workload {
        traces: args.traces,
        depth: args.depth,
        fanout: args.fanout,
        application: args.app.clone(),
        fail_every: args.fail_every,
    };
    let report = workload.run(&tracer);

    if args.stats {
        print_stats(&report, &tracer);
    }
    tracer.stop_watchdog();

    Ok(())
}
