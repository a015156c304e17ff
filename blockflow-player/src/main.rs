//! blockflow - synthetic media pipeline runner
//!
//! Wires `SourceRandom -> TransformResampler (audio) -> BlockSink`, runs it
//! until the source ends (or for a fixed time) and logs what the sink saw.

use anyhow::{Context, Result};
use blockflow_core::{
    BlockSink, FlowConfig, Graph, Scheduling, SinkStats, SourceRandom, StreamKind,
    ThreadCheckMode, TransformResampler,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Blocks per stream when neither the config nor the command line bound the run
const DEFAULT_BLOCKS: u64 = 250;

#[derive(Debug, Default, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    blocks: Option<u64>,
    capacity: Option<usize>,
    scheduling: Option<Scheduling>,
    no_thread_checks: bool,
    seconds: Option<u64>,
    dump_config: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("blockflow=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    let config = build_config(&options)?;

    if options.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!("blockflow v{}", blockflow_core::VERSION);
    run(&config, options.seconds.map(Duration::from_secs))
}

// ============================================================================
// Configuration
// ============================================================================

fn build_config(options: &Options) -> Result<FlowConfig> {
    let mut config = match &options.config {
        Some(path) => FlowConfig::load(path).with_context(|| format!("Loading {:?}", path))?,
        None => FlowConfig::default(),
    };

    if let Some(blocks) = options.blocks {
        config.source.max_blocks = Some(blocks);
    } else if config.source.max_blocks.is_none() && options.seconds.is_none() {
        config.source.max_blocks = Some(DEFAULT_BLOCKS);
    }
    if let Some(capacity) = options.capacity {
        config.stream.queue_capacity = capacity;
    }
    if let Some(scheduling) = options.scheduling {
        config.source.scheduling = scheduling;
    }
    if options.no_thread_checks {
        config.stream.thread_checks = ThreadCheckMode::Off;
    }

    config.validate()?;
    Ok(config)
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                options.config = Some(PathBuf::from(value));
                i += 2;
            }
            "--blocks" | "-n" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --blocks"))?;
                let blocks = value
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Invalid block count {}: {}", value, e))?;
                options.blocks = Some(blocks);
                i += 2;
            }
            "--capacity" | "-k" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --capacity"))?;
                let capacity = value
                    .parse::<usize>()
                    .map_err(|e| anyhow::anyhow!("Invalid queue capacity {}: {}", value, e))?;
                options.capacity = Some(capacity);
                i += 2;
            }
            "--seconds" | "-s" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --seconds"))?;
                let seconds = value
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Invalid duration {}: {}", value, e))?;
                options.seconds = Some(seconds);
                i += 2;
            }
            "--cooperative" => {
                options.scheduling = Some(Scheduling::Cooperative);
                i += 1;
            }
            "--threaded" => {
                options.scheduling = Some(Scheduling::Threaded);
                i += 1;
            }
            "--no-thread-checks" => {
                options.no_thread_checks = true;
                i += 1;
            }
            "--dump-config" => {
                options.dump_config = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                print_usage();
                return Err(anyhow::anyhow!("Unknown argument: {}", other));
            }
        }
    }

    Ok(options)
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  blockflow [--config <file>] [--blocks <n>] [--capacity <k>] [--seconds <s>]\n            [--cooperative | --threaded] [--no-thread-checks] [--dump-config]\n"
    );
}

// ============================================================================
// Pipeline
// ============================================================================

fn run(config: &FlowConfig, duration: Option<Duration>) -> Result<()> {
    let source = SourceRandom::new("source", &config.source, &config.stream)?;
    let resampler = TransformResampler::new(
        "resampler",
        source.create_reader(StreamKind::Audio)?,
        &config.stream,
    )?;

    let mut sink = BlockSink::new("sink");
    sink.add_input(source.create_reader(StreamKind::Video)?);
    sink.add_input(resampler.create_reader()?);
    let stats = sink.stats_handle();

    tracing::info!(
        "Pipeline: {:?} scheduling, queue capacity {}, thread checks {:?}, {}",
        config.source.scheduling,
        config.stream.queue_capacity,
        config.stream.thread_checks,
        match config.source.max_blocks {
            Some(blocks) => format!("{} blocks per stream", blocks),
            None => "unbounded".to_string(),
        }
    );

    let mut graph = Graph::new("blockflow");
    graph.add_node(source);
    graph.add_node(resampler);
    graph.add_node(sink);

    let started = Instant::now();
    graph.start()?;
    match duration {
        Some(duration) => {
            std::thread::sleep(duration);
            graph.stop();
        }
        None => {
            graph.wait();
            graph.stop();
        }
    }

    report(&stats.snapshot(), started.elapsed());
    Ok(())
}

fn report(stats: &SinkStats, elapsed: Duration) {
    for kind in [StreamKind::Video, StreamKind::Audio] {
        let Some(stream) = stats.stream(kind) else {
            tracing::warn!("No {} blocks received", kind);
            continue;
        };
        tracing::info!(
            "{}: {} blocks, {} bytes, {:.2}s of stream time, {} timestamp regressions",
            kind,
            stream.blocks,
            stream.bytes,
            stream.span() as f64 / blockflow_core::block::TIME_UNITS_PER_SECOND as f64,
            stream.regressions
        );
    }

    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        stats.total_blocks() as f64 / secs
    } else {
        0.0
    };
    tracing::info!(
        "Finished in {:.1}ms ({:.0} blocks/s)",
        secs * 1000.0,
        rate
    );
}
