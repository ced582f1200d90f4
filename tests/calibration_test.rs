//! E2E tests for lane delay calibration against a simulated board
//!
//! Every lane has a seeded random eye (window of delays where both test
//! patterns come through). The expected delay is computed independently
//! from the window bounds.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use lzts_daq::calibration::{
    apply_delays, calibrate_board, parse_sweep_record, recorded_sweep, select_best_delay, sweep_lane,
    sweep_points, BoardCalibration, CalibrationError, Lane, PatternTester, LANES_PER_BOARD,
    MAX_DELAY,
};
use lzts_daq::config::Config;
use rand::prelude::*;
use rand::rngs::StdRng;

/// Board model: programmed delays and the eye of every lane
struct SimulatedBoard {
    eyes: HashMap<Lane, RangeInclusive<u32>>,
    delays: HashMap<Lane, u32>,
    /// Lanes whose pattern output is stuck
    dead: Vec<Lane>,
    /// Patterns seen per lane
    patterns: HashMap<Lane, Vec<u16>>,
}

impl SimulatedBoard {
    fn random(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let eyes = Lane::all()
            .map(|lane| {
                let width = rng.gen_range(6..120);
                let start = rng.gen_range(0..=MAX_DELAY - width);
                (lane, start..=start + width - 1)
            })
            .collect();
        Self {
            eyes,
            delays: HashMap::new(),
            dead: Vec::new(),
            patterns: HashMap::new(),
        }
    }
}

impl PatternTester for SimulatedBoard {
    fn set_delay(&mut self, lane: Lane, delay: u32) -> Result<(), CalibrationError> {
        if delay > MAX_DELAY {
            return Err(CalibrationError::Tester(format!("delay {} out of range", delay)));
        }
        self.delays.insert(lane, delay);
        Ok(())
    }

    fn delay(&mut self, lane: Lane) -> Result<u32, CalibrationError> {
        Ok(self.delays.get(&lane).copied().unwrap_or(0))
    }

    fn test_pattern(&mut self, lane: Lane, pattern: u16) -> Result<bool, CalibrationError> {
        self.patterns.entry(lane).or_default().push(pattern);
        if self.dead.contains(&lane) {
            return Ok(false);
        }
        let delay = self.delays[&lane];
        Ok(self.eyes[&lane].contains(&delay))
    }
}

// ---------------------------------------------------------------------------
// Live sweeps
// ---------------------------------------------------------------------------

#[test]
fn test_board_lands_in_middle_of_every_eye() {
    let mut board = SimulatedBoard::random(0xCA1);
    let result = calibrate_board(&mut board, 0..=MAX_DELAY);

    assert!(result.is_complete());
    for lane in &result.lanes {
        let eye = &board.eyes[&lane.lane];
        let expected = eye.start() + (eye.end() - eye.start()) / 2;
        assert_eq!(lane.delay(), Some(expected), "{}", lane.lane);
        assert_eq!(board.delays[&lane.lane], expected);
    }
}

#[test]
fn test_each_lane_uses_its_own_patterns() {
    let mut board = SimulatedBoard::random(2);
    let lane = Lane::new(5, 3).unwrap();
    sweep_lane(&mut board, lane, 0..=9).unwrap();

    let seen = &board.patterns[&lane];
    assert_eq!(seen.len(), 20);
    assert!(seen.chunks(2).all(|pair| pair == [0x0040, 0x0080]));
}

#[test]
fn test_dead_lanes_are_reported_and_others_calibrated() {
    let mut board = SimulatedBoard::random(3);
    let dead = [Lane::new(0, 0).unwrap(), Lane::new(6, 2).unwrap()];
    board.dead.extend(dead);
    board.delays.insert(dead[0], 140);

    let result = calibrate_board(&mut board, 0..=MAX_DELAY);
    let failed: Vec<Lane> = result.failed().map(|l| l.lane).collect();
    assert_eq!(failed, dead.to_vec());

    // Failed lanes go back to their pre-sweep delay, not the end of the sweep
    assert_eq!(board.delays[&dead[0]], 140);
    assert_eq!(board.delays[&dead[1]], 0);
    assert!(result
        .failed()
        .all(|l| l.outcome == Err(CalibrationError::NoPassingRunFound)));

    let row = result.to_csv_row();
    assert!(row.starts_with(','));
    assert_eq!(row.split(',').filter(|f| f.is_empty()).count(), 3);
}

#[test]
fn test_tester_error_fails_only_that_lane() {
    let mut board = SimulatedBoard::random(4);
    let result = calibrate_board(&mut board, 500..=MAX_DELAY + 1);

    assert_eq!(result.lanes.len(), LANES_PER_BOARD);
    assert!(result
        .lanes
        .iter()
        .all(|l| matches!(l.outcome, Err(CalibrationError::Tester(_)))));
    assert!(board.delays.values().all(|&d| d == 0));
}

// ---------------------------------------------------------------------------
// Recorded sweeps and stored tables
// ---------------------------------------------------------------------------

#[test]
fn test_recorded_sweep_matches_live_result() {
    let mut board = SimulatedBoard::random(5);
    let live = calibrate_board(&mut board, 0..=MAX_DELAY);

    let text: String = Lane::all()
        .map(|lane| {
            let eye = &board.eyes[&lane];
            let line: String = (0..=MAX_DELAY)
                .map(|d| if eye.contains(&d) { '1' } else { '0' })
                .collect();
            format!("# {}\n{}\n", lane, line)
        })
        .collect();

    let lanes = parse_sweep_record(&text).unwrap();
    assert_eq!(lanes.len(), LANES_PER_BOARD);
    let offline = BoardCalibration::from_outcomes(
        lanes
            .iter()
            .map(|passes| select_best_delay(&sweep_points(0, passes))),
    );
    assert_eq!(offline.delays(), live.delays());
    assert_eq!(offline.to_csv_row(), live.to_csv_row());
}

#[test]
fn test_recorded_lane_past_delay_range_fails() {
    let mut text = String::new();
    for lane in Lane::all() {
        let line = if lane.register_index() == 5 {
            // 500 failures then 100 passes: best run lies past the register range
            format!("{}{}", "0".repeat(500), "1".repeat(100))
        } else {
            format!("{}{}", "0".repeat(200), "1".repeat(40))
        };
        text.push_str(&line);
        text.push('\n');
    }

    let config = Config::from_toml("[calibration]\ndelay_min = 0\ndelay_max = 511\n").unwrap();
    let lanes = parse_sweep_record(&text).unwrap();
    let board = BoardCalibration::from_outcomes(lanes.iter().map(|passes| {
        recorded_sweep(config.calibration.delay_range(), passes)
            .and_then(|points| select_best_delay(&points))
    }));

    let failed: Vec<_> = board.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].lane, Lane::new(0, 5).unwrap());
    assert!(matches!(
        failed[0].outcome,
        Err(CalibrationError::SweepTooLong { capacity: 512, found: 600, .. })
    ));
    assert!(board.delays().iter().flatten().all(|&d| d <= MAX_DELAY));
    assert_eq!(board.lanes[0].delay(), Some(219));

    // Without the range check the scan itself refuses unprogrammable delays
    assert!(matches!(
        select_best_delay(&sweep_points(0, &lanes[5])),
        Err(CalibrationError::DelayOutOfRange { delay: 512, .. })
    ));
}

#[test]
fn test_stored_table_from_config_is_applied() {
    let delays: Vec<String> = (0..64).map(|i| (i * 7 % 512).to_string()).collect();
    let toml = format!(
        r#"
[[calibration.boards]]
name = "bench"
device_dna = "0x8DAC810100008004"
delays = [{}]
"#,
        delays.join(", ")
    );
    let config = Config::from_toml(&toml).unwrap();
    let table = config
        .calibration
        .board_for_dna(0x8DAC_8101_0000_8004)
        .unwrap();

    let mut board = SimulatedBoard::random(6);
    apply_delays(&mut board, &table.delays).unwrap();
    assert_eq!(board.delays[&Lane::new(0, 1).unwrap()], 7);
    assert_eq!(board.delays[&Lane::new(7, 7).unwrap()], 63 * 7 % 512);
}
