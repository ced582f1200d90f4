//! Emulator binary - writes a synthetic stream-writer data file
//!
//! Usage:
//!   cargo run --bin emulator -- -o run.dat                  # 100 rounds, defaults
//!   cargo run --bin emulator -- -o run.dat -n 10 --seed 7   # reproducible
//!   cargo run --bin emulator -- -f lzts.toml -o run.dat     # [emulator] section

use clap::Parser;
use lzts_daq::common::cli::EmulatorArgs;
use lzts_daq::common::setup_shutdown;
use lzts_daq::config::Config;
use lzts_daq::data_source_emulator::PodEmulator;
use lzts_daq::recorder::record_to_file;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lzts_daq=info".parse()?))
        .init();

    let args = EmulatorArgs::parse();
    let config = Config::load_or_default(&args.common.config_file)?;

    let mut emulator = PodEmulator::new(config.emulator.clone(), args.seed)?;
    info!(
        output = %args.output.display(),
        rounds = args.rounds,
        channels = emulator.config().channels.len(),
        "Writing synthetic data file"
    );

    let (_shutdown_tx, shutdown_rx) = setup_shutdown();
    let (tx, rx) = mpsc::channel(config.viewer.queue_capacity);
    let writer = tokio::spawn(record_to_file(args.output.clone(), rx, shutdown_rx));

    for _ in 0..args.rounds {
        // Writer gone means shutdown or a write error, reported below
        if tx.send(emulator.next_packet()).await.is_err() {
            warn!(rounds = emulator.rounds(), "Writer stopped early");
            break;
        }
    }
    drop(tx);

    let stats = writer.await??;
    info!(
        records = stats.records_written,
        bytes = stats.bytes_written,
        "Data file complete"
    );
    Ok(())
}
