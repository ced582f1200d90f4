//! Sweep driver for lane delay calibration
//!
//! Hardware access goes through [`PatternTester`]. For every delay the ADC
//! is set to output a lane's test pattern, the tester compares it, then the
//! same is done with the pattern shifted by one bit (each lane carries two
//! bits). A delay passes only if both comparisons pass.

use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{
    select_best_delay, CalibrationError, CalibrationResult, SweepPoint, ADCS_PER_BOARD,
    LANES_PER_ADC, LANES_PER_BOARD,
};

/// Hardware loop used by the sweep
pub trait PatternTester {
    /// Program the input delay of one lane
    fn set_delay(&mut self, lane: Lane, delay: u32) -> Result<(), CalibrationError>;

    /// Read back the programmed input delay of one lane
    fn delay(&mut self, lane: Lane) -> Result<u32, CalibrationError>;

    /// Have the ADC output `pattern` and report whether the lane received it
    fn test_pattern(&mut self, lane: Lane, pattern: u16) -> Result<bool, CalibrationError>;
}

/// One data lane of one slow ADC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Lane {
    pub adc: u8,
    pub lane: u8,
}

impl Lane {
    pub fn new(adc: u8, lane: u8) -> Option<Self> {
        (adc < ADCS_PER_BOARD && lane < LANES_PER_ADC).then_some(Self { adc, lane })
    }

    /// Position in the board's delay register table
    pub fn register_index(self) -> usize {
        self.lane as usize + self.adc as usize * LANES_PER_ADC as usize
    }

    pub fn from_register_index(index: usize) -> Option<Self> {
        if index >= LANES_PER_BOARD {
            return None;
        }
        Some(Self {
            adc: (index / LANES_PER_ADC as usize) as u8,
            lane: (index % LANES_PER_ADC as usize) as u8,
        })
    }

    /// All 64 lanes in register order (ADC-major)
    pub fn all() -> impl Iterator<Item = Lane> {
        (0..LANES_PER_BOARD).filter_map(Lane::from_register_index)
    }

    /// The two test patterns for this lane
    pub fn patterns(self) -> [u16; 2] {
        let first = 1u16 << (2 * self.lane);
        [first, first << 1]
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ADC {} lane {}", self.adc, self.lane)
    }
}

/// Record pass/fail for every delay in `delays`
pub fn sweep_lane<T: PatternTester + ?Sized>(
    tester: &mut T,
    lane: Lane,
    delays: RangeInclusive<u32>,
) -> Result<Vec<SweepPoint>, CalibrationError> {
    let mut points = Vec::with_capacity(delays.clone().count());
    for delay in delays {
        tester.set_delay(lane, delay)?;
        let mut passed = true;
        for pattern in lane.patterns() {
            // Both patterns are always run
            passed &= tester.test_pattern(lane, pattern)?;
        }
        points.push(SweepPoint { delay, passed });
    }
    Ok(points)
}

/// Sweep one lane, then program its best delay
///
/// On failure the delay programmed before the sweep is restored.
pub fn calibrate_lane<T: PatternTester + ?Sized>(
    tester: &mut T,
    lane: Lane,
    delays: RangeInclusive<u32>,
) -> Result<CalibrationResult, CalibrationError> {
    let previous = tester.delay(lane)?;
    let outcome = sweep_lane(tester, lane, delays).and_then(|points| select_best_delay(&points));
    match outcome {
        Ok(result) => {
            tester.set_delay(lane, result.delay)?;
            Ok(result)
        }
        Err(e) => {
            if let Err(restore) = tester.set_delay(lane, previous) {
                warn!(lane = %lane, delay = previous, error = %restore, "Could not restore delay");
            }
            Err(e)
        }
    }
}

/// Outcome for one lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneCalibration {
    pub lane: Lane,
    pub outcome: Result<CalibrationResult, CalibrationError>,
}

impl LaneCalibration {
    pub fn delay(&self) -> Option<u32> {
        self.outcome.as_ref().ok().map(|r| r.delay)
    }
}

/// Outcome for all lanes of a board, in register order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardCalibration {
    pub lanes: Vec<LaneCalibration>,
}

impl BoardCalibration {
    /// Build from per-lane outcomes in register order
    pub fn from_outcomes(
        outcomes: impl IntoIterator<Item = Result<CalibrationResult, CalibrationError>>,
    ) -> Self {
        Self {
            lanes: Lane::all()
                .zip(outcomes)
                .map(|(lane, outcome)| LaneCalibration { lane, outcome })
                .collect(),
        }
    }

    /// Selected delays, `None` for failed lanes
    pub fn delays(&self) -> Vec<Option<u32>> {
        self.lanes.iter().map(LaneCalibration::delay).collect()
    }

    pub fn failed(&self) -> impl Iterator<Item = &LaneCalibration> {
        self.lanes.iter().filter(|l| l.outcome.is_err())
    }

    pub fn is_complete(&self) -> bool {
        self.lanes.len() == LANES_PER_BOARD && self.failed().next().is_none()
    }

    /// Comma-terminated delays in lane order; failed lanes are left empty
    pub fn to_csv_row(&self) -> String {
        self.delays()
            .iter()
            .map(|d| match d {
                Some(d) => format!("{},", d),
                None => ",".to_string(),
            })
            .collect()
    }
}

/// Calibrate every lane of a board
///
/// A failed lane is logged and put back to the delay it had before its
/// sweep; the other lanes still run.
pub fn calibrate_board<T: PatternTester + ?Sized>(
    tester: &mut T,
    delays: RangeInclusive<u32>,
) -> BoardCalibration {
    let mut outcomes = Vec::with_capacity(LANES_PER_BOARD);
    for lane in Lane::all() {
        debug!(lane = %lane, "Sweeping lane");
        let outcome = calibrate_lane(&mut *tester, lane, delays.clone());
        match &outcome {
            Ok(result) => info!(
                lane = %lane,
                delay = result.delay,
                start = result.best.start,
                stop = result.best.stop,
                "Lane calibrated"
            ),
            Err(e) => error!(lane = %lane, error = %e, "Lane calibration failed"),
        }
        outcomes.push(outcome);
    }
    BoardCalibration::from_outcomes(outcomes)
}

/// Program a stored delay table (register order)
pub fn apply_delays<T: PatternTester + ?Sized>(
    tester: &mut T,
    delays: &[u32],
) -> Result<(), CalibrationError> {
    if delays.len() != LANES_PER_BOARD {
        return Err(CalibrationError::TableSize {
            expected: LANES_PER_BOARD,
            found: delays.len(),
        });
    }
    for (lane, &delay) in Lane::all().zip(delays) {
        tester.set_delay(lane, delay)?;
    }
    info!(lanes = delays.len(), "Applied stored delays");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Lanes pass inside a window, optionally failing one pattern bit
    #[derive(Default)]
    struct WindowTester {
        windows: HashMap<Lane, RangeInclusive<u32>>,
        second_bit_broken: Option<Lane>,
        current: HashMap<Lane, u32>,
        tests_run: usize,
    }

    impl PatternTester for WindowTester {
        fn set_delay(&mut self, lane: Lane, delay: u32) -> Result<(), CalibrationError> {
            self.current.insert(lane, delay);
            Ok(())
        }

        fn delay(&mut self, lane: Lane) -> Result<u32, CalibrationError> {
            Ok(self.current.get(&lane).copied().unwrap_or(0))
        }

        fn test_pattern(&mut self, lane: Lane, pattern: u16) -> Result<bool, CalibrationError> {
            self.tests_run += 1;
            if self.second_bit_broken == Some(lane) && pattern == lane.patterns()[1] {
                return Ok(false);
            }
            let delay = self.current[&lane];
            Ok(self
                .windows
                .get(&lane)
                .is_some_and(|w| w.contains(&delay)))
        }
    }

    #[test]
    fn test_lane_layout() {
        let lane = Lane::new(2, 5).unwrap();
        assert_eq!(lane.register_index(), 21);
        assert_eq!(Lane::from_register_index(21), Some(lane));
        assert!(Lane::new(8, 0).is_none());
        assert!(Lane::from_register_index(64).is_none());
        assert_eq!(Lane::all().count(), 64);
        assert_eq!(Lane::new(0, 7).unwrap().patterns(), [0x4000, 0x8000]);
        assert_eq!(Lane::new(3, 0).unwrap().patterns(), [0x0001, 0x0002]);
    }

    #[test]
    fn test_sweep_lane_runs_both_patterns() {
        let lane = Lane::new(0, 1).unwrap();
        let mut tester = WindowTester::default();
        tester.windows.insert(lane, 3..=9);

        let points = sweep_lane(&mut tester, lane, 0..=15).unwrap();
        assert_eq!(points.len(), 16);
        assert_eq!(tester.tests_run, 32);
        let passing: Vec<u32> = points.iter().filter(|p| p.passed).map(|p| p.delay).collect();
        assert_eq!(passing, (3..=9).collect::<Vec<_>>());
    }

    #[test]
    fn test_calibrate_lane_programs_midpoint() {
        let lane = Lane::new(1, 0).unwrap();
        let mut tester = WindowTester::default();
        tester.windows.insert(lane, 100..=140);

        let result = calibrate_lane(&mut tester, lane, 0..=511).unwrap();
        assert_eq!(result.delay, 120);
        assert_eq!(tester.current[&lane], 120);
    }

    #[test]
    fn test_second_pattern_failure_fails_delay() {
        let lane = Lane::new(0, 0).unwrap();
        let mut tester = WindowTester::default();
        tester.windows.insert(lane, 0..=511);
        tester.second_bit_broken = Some(lane);
        tester.current.insert(lane, 200);

        assert_eq!(
            calibrate_lane(&mut tester, lane, 0..=511),
            Err(CalibrationError::NoPassingRunFound)
        );
        assert_eq!(tester.current[&lane], 200);
    }

    #[test]
    fn test_board_reports_failed_lanes() {
        let mut tester = WindowTester::default();
        for lane in Lane::all() {
            let base = lane.register_index() as u32;
            tester.windows.insert(lane, base..=base + 10);
        }
        let broken = Lane::new(7, 7).unwrap();
        tester.windows.remove(&broken);

        let board = calibrate_board(&mut tester, 0..=127);
        assert_eq!(board.lanes.len(), 64);
        assert!(!board.is_complete());
        let failed: Vec<Lane> = board.failed().map(|l| l.lane).collect();
        assert_eq!(failed, vec![broken]);
        assert_eq!(tester.current[&broken], 0);

        assert_eq!(board.lanes[0].delay(), Some(5));
        assert_eq!(board.lanes[1].delay(), Some(6));

        let row = board.to_csv_row();
        assert!(row.starts_with("5,6,7,"));
        assert!(row.ends_with("67,,"));
        assert_eq!(row.matches(',').count(), 64);
    }

    #[test]
    fn test_apply_delays() {
        let mut tester = WindowTester::default();
        let table: Vec<u32> = (0..64).map(|i| i * 2).collect();
        apply_delays(&mut tester, &table).unwrap();
        assert_eq!(tester.current[&Lane::new(1, 2).unwrap()], 20);

        assert_eq!(
            apply_delays(&mut tester, &table[..10]),
            Err(CalibrationError::TableSize {
                expected: 64,
                found: 10
            })
        );
    }
}
