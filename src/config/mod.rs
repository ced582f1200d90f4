//! Configuration module for LZTS tools
//!
//! Everything is loaded from one TOML file; every section is optional.
//!
//! # Example
//! ```ignore
//! let config = Config::load("config.toml")?;
//! let demux = config.demux_config()?;
//! ```

use serde::{Deserialize, Deserializer};
use std::ops::RangeInclusive;
use std::path::Path;
use thiserror::Error;

use crate::calibration::{LANES_PER_BOARD, MAX_DELAY};
use crate::common::{seconds_to_ticks, ChannelId, ChannelMask, NUM_CHANNELS};
use crate::data_source_emulator::EmulatorConfig;
use crate::decoder::{AdcTypeField, DecoderConfig};
use crate::viewer::DemuxConfig;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.viewer.enabled_mask()?;

        if !(self.viewer.min_update_interval_s >= 0.0) {
            return Err(ConfigError::invalid(
                "viewer.min_update_interval_s",
                "must be >= 0",
            ));
        }
        if !(self.viewer.busy_timeout_s > 0.0) {
            return Err(ConfigError::invalid("viewer.busy_timeout_s", "must be > 0"));
        }
        if self.viewer.queue_capacity == 0 {
            return Err(ConfigError::invalid("viewer.queue_capacity", "must be > 0"));
        }

        self.emulator.validate()?;

        let cal = &self.calibration;
        if cal.delay_min > cal.delay_max || cal.delay_max > MAX_DELAY {
            return Err(ConfigError::invalid(
                "calibration",
                format!(
                    "delay range {}..={} must lie within 0..={}",
                    cal.delay_min, cal.delay_max, MAX_DELAY
                ),
            ));
        }
        for board in &cal.boards {
            if board.delays.len() != LANES_PER_BOARD {
                return Err(ConfigError::invalid(
                    "calibration.boards.delays",
                    format!(
                        "board {:#018x} has {} delays, expected {}",
                        board.device_dna,
                        board.delays.len(),
                        LANES_PER_BOARD
                    ),
                ));
            }
            if let Some(d) = board.delays.iter().find(|&&d| d > MAX_DELAY) {
                return Err(ConfigError::invalid(
                    "calibration.boards.delays",
                    format!("delay {} exceeds {}", d, MAX_DELAY),
                ));
            }
        }
        Ok(())
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            adc_type_field: self.format.adc_type_field,
        }
    }

    /// Demultiplexer settings with intervals converted to detector ticks
    pub fn demux_config(&self) -> Result<DemuxConfig, ConfigError> {
        Ok(DemuxConfig {
            decoder: self.decoder_config(),
            data_channel_id: self.format.data_channel(),
            min_spacing_ticks: seconds_to_ticks(self.viewer.min_update_interval_s),
            busy_timeout_ticks: seconds_to_ticks(self.viewer.busy_timeout_s),
            enabled: self.viewer.enabled_mask()?,
        })
    }
}

// =============================================================================
// Frame format
// =============================================================================

/// Frame format settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Which header bits select slow vs fast ADC
    pub adc_type_field: AdcTypeField,

    /// Virtual channel carrying waveform data
    pub data_channel_id: u8,

    /// Drop frames on other virtual channels
    pub filter_virtual_channel: bool,

    /// Expected device DNA (low 64 bits), hex string
    #[serde(deserialize_with = "deserialize_opt_hex_u64")]
    pub expected_dna: Option<u64>,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            adc_type_field: AdcTypeField::default(),
            data_channel_id: 1,
            filter_virtual_channel: true,
            expected_dna: None,
        }
    }
}

impl FormatConfig {
    /// Virtual channel filter, `None` accepts every channel
    pub fn data_channel(&self) -> Option<u8> {
        self.filter_virtual_channel.then_some(self.data_channel_id)
    }
}

// =============================================================================
// Viewer
// =============================================================================

/// Headless viewer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Minimum spacing between display updates (detector-clock seconds)
    pub min_update_interval_s: f64,

    /// Busy flag is cleared after this long without a release
    pub busy_timeout_s: f64,

    /// Logical channel indices 0-15 that must arrive before an update
    pub enabled_channels: Vec<u8>,

    /// Frames buffered between reader and demultiplexer
    pub queue_capacity: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            min_update_interval_s: 0.5,
            busy_timeout_s: 5.0,
            enabled_channels: (0..NUM_CHANNELS as u8).collect(),
            queue_capacity: 256,
        }
    }
}

impl ViewerConfig {
    pub fn enabled_mask(&self) -> Result<ChannelMask, ConfigError> {
        channel_mask(&self.enabled_channels, "viewer.enabled_channels")
    }
}

/// Build a mask from logical indices, rejecting anything outside 0..16
pub fn channel_mask(indices: &[u8], field: &str) -> Result<ChannelMask, ConfigError> {
    indices
        .iter()
        .map(|&i| {
            ChannelId::from_index(i as usize).ok_or_else(|| {
                ConfigError::invalid(field, format!("channel {} out of range 0..{}", i, NUM_CHANNELS))
            })
        })
        .collect()
}

// =============================================================================
// Calibration
// =============================================================================

/// Delay calibration settings and stored per-board tables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// First delay value of a sweep
    pub delay_min: u32,

    /// Last delay value of a sweep (inclusive)
    pub delay_max: u32,

    /// Known-good delays per board
    pub boards: Vec<BoardDelays>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            delay_min: 0,
            delay_max: MAX_DELAY,
            boards: Vec::new(),
        }
    }
}

impl CalibrationConfig {
    /// Delays a sweep covers
    pub fn delay_range(&self) -> RangeInclusive<u32> {
        self.delay_min..=self.delay_max
    }

    /// Stored table for the board with this DNA
    pub fn board_for_dna(&self, device_dna: u64) -> Option<&BoardDelays> {
        self.boards.iter().find(|b| b.device_dna == device_dna)
    }
}

/// Delay table for one board, 64 values in lane order (ADC-major)
#[derive(Debug, Clone, Deserialize)]
pub struct BoardDelays {
    #[serde(default)]
    pub name: String,

    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub device_dna: u64,

    pub delays: Vec<u32>,
}

// =============================================================================
// Hex helpers
// =============================================================================

/// Parse "0x1F", "1f" or "0X1F" as hex
pub fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(&digits.replace('_', ""), 16)
}

pub(crate) fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

fn deserialize_opt_hex_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| parse_hex_u64(&s).map_err(serde::de::Error::custom))
        .transpose()
}

// =============================================================================
// Tests
// =============================================================================
