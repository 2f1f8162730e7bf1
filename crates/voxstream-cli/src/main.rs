//! CLI entry point - wires the simulated backends into the pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use voxstream_cli::{Cli, ConsoleDevice, SimulatedEngine, replay};
use voxstream_pipeline::StreamingPipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables first so they can feed both the log
    // filter and the CLI flags.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose > default (info)
    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let text = cli.read_input().context("Failed to read input text")?;
    let config = cli.pipeline_config();
    config.validate().context("Invalid pipeline configuration")?;

    let engine = Arc::new(SimulatedEngine::new(cli.synth_ms_per_char, cli.fail_every));
    let device = Arc::new(ConsoleDevice::new(cli.speak_ms_per_char));
    let (mut pipeline, events) = StreamingPipeline::new(config, engine, device);
    let reporter = tokio::spawn(replay::report_events(events));

    pipeline.start()?;
    let stats = replay::replay(
        &mut pipeline,
        &text,
        cli.chunk_chars,
        Duration::from_millis(cli.chunk_delay_ms),
        Duration::from_secs(cli.finish_timeout_secs),
    )
    .await?;

    // Dropping the pipeline closes the event stream.
    drop(pipeline);
    reporter.await.ok();

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
