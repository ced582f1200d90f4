//! Viewer binary - headless waveform viewer
//!
//! Frames from a data file (or the built-in emulator) go through the channel
//! demultiplexer; every ready set is logged as per-channel waveform numbers.
//!
//! Usage:
//!   cargo run --bin viewer                          # emulator, 1000 rounds
//!   cargo run --bin viewer -- -i run.dat            # replay a data file
//!   cargo run --bin viewer -- -i run.dat -c 0 -c 8  # only slow 0 and fast 0

use std::time::{Duration, Instant};

use clap::Parser;
use lzts_daq::common::cli::ViewerArgs;
use lzts_daq::common::{setup_shutdown, CounterSnapshot, PipelineError};
use lzts_daq::config::{channel_mask, Config};
use lzts_daq::data_source_emulator::PodEmulator;
use lzts_daq::decoder::FrameDecoder;
use lzts_daq::recorder::replay_file;
use lzts_daq::viewer::{spawn_viewer, summarize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lzts_daq=info".parse()?))
        .init();

    let args = ViewerArgs::parse();
    let config = Config::load_or_default(&args.common.config_file)?;

    let mut demux_config = config.demux_config()?;
    if !args.channels.is_empty() {
        demux_config.enabled = channel_mask(&args.channels, "--channel")?;
    }
    let decoder = FrameDecoder::new(demux_config.decoder);

    info!(
        enabled = demux_config.enabled.len(),
        min_spacing_ticks = demux_config.min_spacing_ticks,
        busy_timeout_ticks = demux_config.busy_timeout_ticks,
        "Starting viewer"
    );

    let (_shutdown_tx, shutdown_rx) = setup_shutdown();
    let (frame_tx, frame_rx) = mpsc::channel(config.viewer.queue_capacity);

    let producer = match args.input.clone() {
        Some(path) => {
            info!(input = %path.display(), "Replaying data file");
            tokio::spawn(replay_file(path, decoder, frame_tx, shutdown_rx.resubscribe()))
        }
        None => {
            let mut emulator = PodEmulator::new(config.emulator.clone(), None)?;
            let rounds = args.rounds as u64;
            let shutdown = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                emulator
                    .run(frame_tx, rounds, shutdown)
                    .await
                    .map_err(PipelineError::from)
            })
        }
    };

    let (demux_task, mut display) = spawn_viewer(demux_config, frame_rx, shutdown_rx);

    let mut updates = 0u64;
    let mut last_stats = (Instant::now(), CounterSnapshot::default());
    while let Some(event) = display.next().await {
        updates += 1;
        if last_stats.0.elapsed() >= STATS_INTERVAL {
            let now = display.counters();
            let elapsed = last_stats.0.elapsed().as_secs_f64();
            info!(
                frame_rate = format_args!("{:.1}", now.frame_rate_from(&last_stats.1, elapsed)),
                data_rate = %now.format_bytes_rate(&last_stats.1, elapsed),
                ready = now.ready,
                "Viewer statistics"
            );
            last_stats = (Instant::now(), now);
        }
        info!(
            sequence = event.sequence,
            trigger_time = event.trigger_time,
            "Display update"
        );
        for summary in summarize(&event, &decoder) {
            info!("  {}", summary);
        }
        display.done();
    }

    match producer.await? {
        Ok(frames) => info!(frames, "Producer finished"),
        Err(e) => warn!(error = %e, "Producer stopped with error"),
    }
    let stats = demux_task.await?;
    info!(
        updates,
        received = stats.received,
        dropped = stats.dropped(),
        rate_limited = stats.rate_limited,
        busy_suppressed = stats.busy_suppressed,
        "Viewer finished"
    );
    Ok(())
}
