//! Calibrate binary - selects lane delays from a recorded sweep
//!
//! The sweep file holds one line of 0/1 characters per lane in register
//! order (ADC 0 lanes 0-7, ADC 1 lanes 0-7, ...), one character per delay
//! starting at `delay_min`. A line longer than `delay_min..=delay_max`
//! fails that lane.
//!
//! Usage:
//!   cargo run --bin calibrate -- sweep.txt                     # print CSV row
//!   cargo run --bin calibrate -- sweep.txt -o delays.csv       # append row
//!   cargo run --bin calibrate -- sweep.txt --delay-min 100

use std::fs::OpenOptions;
use std::io::Write;

use clap::Parser;
use lzts_daq::calibration::{
    parse_sweep_record, recorded_sweep, select_best_delay, BoardCalibration, CalibrationError,
    LANES_PER_BOARD,
};
use lzts_daq::common::cli::CalibrateArgs;
use lzts_daq::config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("lzts_daq=info".parse()?))
        .init();

    let args = CalibrateArgs::parse();
    let config = Config::load_or_default(&args.common.config_file)?;
    let delay_min = args.delay_min.unwrap_or(config.calibration.delay_min);
    let delays = delay_min..=config.calibration.delay_max;

    let text = std::fs::read_to_string(&args.sweep)?;
    let lanes = parse_sweep_record(&text)?;
    if lanes.len() != LANES_PER_BOARD {
        return Err(CalibrationError::TableSize {
            expected: LANES_PER_BOARD,
            found: lanes.len(),
        }
        .into());
    }

    let board = BoardCalibration::from_outcomes(
        lanes
            .iter()
            .map(|passes| {
                recorded_sweep(delays.clone(), passes).and_then(|points| select_best_delay(&points))
            }),
    );

    for lane in &board.lanes {
        match &lane.outcome {
            Ok(result) => info!(
                lane = %lane.lane,
                delay = result.delay,
                start = result.best.start,
                stop = result.best.stop,
                runs = result.runs.len(),
                "Lane calibrated"
            ),
            Err(e) => error!(lane = %lane.lane, error = %e, "Lane calibration failed"),
        }
    }

    let row = board.to_csv_row();
    println!("{}", row);

    if let Some(path) = &args.output {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", row)?;
        info!(output = %path.display(), "Appended delay row");
    }

    let failed = board.failed().count();
    if failed > 0 {
        anyhow::bail!("{} of {} lanes failed calibration", failed, LANES_PER_BOARD);
    }
    Ok(())
}
