//! Slow-ADC lane delay calibration
//!
//! Each of the 64 data lanes has a programmable input delay. A sweep records
//! pass/fail for every delay value; the chosen delay is the middle of the
//! widest stretch of passing values.
//!
//! A stretch only counts once six consecutive delays pass. Its length is
//! the number of passing delays it spans.

pub mod sweep;

pub use sweep::{
    apply_delays, calibrate_board, calibrate_lane, sweep_lane, BoardCalibration, Lane,
    LaneCalibration, PatternTester,
};

use std::ops::RangeInclusive;

use serde::Serialize;
use thiserror::Error;

/// Passing delays that must precede a position for it to count
pub const MIN_RUN_LENGTH: usize = 5;

/// Largest programmable delay value
pub const MAX_DELAY: u32 = 511;

/// ADCs per board
pub const ADCS_PER_BOARD: u8 = 8;

/// Data lanes per ADC
pub const LANES_PER_ADC: u8 = 8;

/// Lanes per board
pub const LANES_PER_BOARD: usize = ADCS_PER_BOARD as usize * LANES_PER_ADC as usize;

/// Calibration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("No run of at least {} passing delays found", MIN_RUN_LENGTH + 1)]
    NoPassingRunFound,

    #[error("Sweep not contiguous at point {index}: expected delay {expected}, got {found}")]
    NonContiguousSweep {
        index: usize,
        expected: u32,
        found: u32,
    },

    #[error("Delay {delay} at point {index} exceeds the largest programmable delay {}", MAX_DELAY)]
    DelayOutOfRange { index: usize, delay: u32 },

    #[error("Recorded sweep has {found} points, range {first}..={last} holds at most {capacity}")]
    SweepTooLong {
        first: u32,
        last: u32,
        capacity: usize,
        found: usize,
    },

    #[error("Invalid sweep record on line {line}: unexpected {found:?}")]
    InvalidSweepRecord { line: usize, found: char },

    #[error("Delay table has {found} entries, expected {expected}")]
    TableSize { expected: usize, found: usize },

    #[error("Pattern tester failed: {0}")]
    Tester(String),
}

/// One delay value and whether both test patterns passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepPoint {
    pub delay: u32,
    pub passed: bool,
}

/// A stretch of passing delays (inclusive bounds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassRun {
    pub start: u32,
    pub stop: u32,
    pub length: u32,
}

impl PassRun {
    /// Delay in the middle of the run, rounded down
    pub fn midpoint(&self) -> u32 {
        self.start + (self.stop - self.start) / 2
    }
}

/// Result of one lane's sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalibrationResult {
    /// Selected delay
    pub delay: u32,
    /// Run the delay was taken from
    pub best: PassRun,
    /// Every run found, in sweep order
    pub runs: Vec<PassRun>,
}

/// Build sweep points for consecutive delays starting at `first_delay`
pub fn sweep_points(first_delay: u32, passes: &[bool]) -> Vec<SweepPoint> {
    passes
        .iter()
        .zip(first_delay..)
        .map(|(&passed, delay)| SweepPoint { delay, passed })
        .collect()
}

/// Sweep points for a recorded lane, which must fit inside `delays`
pub fn recorded_sweep(
    delays: RangeInclusive<u32>,
    passes: &[bool],
) -> Result<Vec<SweepPoint>, CalibrationError> {
    let capacity = delays.clone().count();
    if passes.len() > capacity {
        return Err(CalibrationError::SweepTooLong {
            first: *delays.start(),
            last: *delays.end(),
            capacity,
            found: passes.len(),
        });
    }
    Ok(sweep_points(*delays.start(), passes))
}

/// Find all runs of passing delays
///
/// Positions `i` in `[MIN_RUN_LENGTH, N)` are scanned; a position extends
/// the current run when it and the `MIN_RUN_LENGTH` before it all passed.
/// A run closes at the first failure after it started, or at the end of the
/// sweep (stop = last delay).
pub fn find_pass_runs(points: &[SweepPoint]) -> Result<Vec<PassRun>, CalibrationError> {
    check_sweep(points)?;

    let n = points.len();
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    let mut extent = 0usize;

    for i in MIN_RUN_LENGTH..n {
        let window_passed = points[i - MIN_RUN_LENGTH..=i].iter().all(|p| p.passed);
        if window_passed {
            start.get_or_insert(i - MIN_RUN_LENGTH);
            extent += 1;
        } else if !points[i].passed {
            if let Some(s) = start.take() {
                runs.push(make_run(points, s, i - 1, extent));
                extent = 0;
            }
        }
    }
    if let Some(s) = start {
        runs.push(make_run(points, s, n - 1, extent));
    }

    Ok(runs)
}

fn make_run(points: &[SweepPoint], start: usize, stop: usize, extent: usize) -> PassRun {
    PassRun {
        start: points[start].delay,
        stop: points[stop].delay,
        length: (extent + MIN_RUN_LENGTH) as u32,
    }
}

fn check_sweep(points: &[SweepPoint]) -> Result<(), CalibrationError> {
    if let Some((index, p)) = points.iter().enumerate().find(|(_, p)| p.delay > MAX_DELAY) {
        return Err(CalibrationError::DelayOutOfRange {
            index,
            delay: p.delay,
        });
    }
    for (index, pair) in points.windows(2).enumerate() {
        let expected = pair[0].delay.wrapping_add(1);
        if pair[1].delay != expected {
            return Err(CalibrationError::NonContiguousSweep {
                index: index + 1,
                expected,
                found: pair[1].delay,
            });
        }
    }
    Ok(())
}

/// Select the delay in the middle of the longest passing run
///
/// Equal lengths keep the earliest run.
pub fn select_best_delay(points: &[SweepPoint]) -> Result<CalibrationResult, CalibrationError> {
    let runs = find_pass_runs(points)?;

    let mut best: Option<PassRun> = None;
    for run in &runs {
        if best.map_or(true, |b| run.length > b.length) {
            best = Some(*run);
        }
    }
    let best = best.ok_or(CalibrationError::NoPassingRunFound)?;

    Ok(CalibrationResult {
        delay: best.midpoint(),
        best,
        runs,
    })
}

/// Parse a recorded sweep: one line of `0`/`1` characters per lane
///
/// Blank lines and lines starting with `#` are skipped; whitespace and
/// commas between characters are ignored.
pub fn parse_sweep_record(text: &str) -> Result<Vec<Vec<bool>>, CalibrationError> {
    let mut lanes = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut passes = Vec::with_capacity(line.len());
        for c in line.chars() {
            match c {
                '1' => passes.push(true),
                '0' => passes.push(false),
                ',' => {}
                c if c.is_whitespace() => {}
                found => {
                    return Err(CalibrationError::InvalidSweepRecord {
                        line: lineno + 1,
                        found,
                    })
                }
            }
        }
        lanes.push(passes);
    }
    Ok(lanes)
}
