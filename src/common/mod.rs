//! Common data types shared across components
//!
//! This module defines detector-clock time units and the logical channel
//! identity used by the viewer, survey and emulator.

use serde::{Deserialize, Serialize};

use crate::decoder::AdcType;

pub mod cli;
pub mod error;
pub mod metrics;
pub mod shutdown;

pub use error::{PipelineError, PipelineResult};
pub use metrics::{CounterSnapshot, DemuxCounters};
pub use shutdown::{setup_shutdown, ShutdownReceiver, ShutdownSender};

/// Detector clock tick in nanoseconds
pub const TICK_NS: u64 = 4;

/// Detector clock ticks per second (250 MHz)
pub const TICKS_PER_SECOND: u64 = 250_000_000;

/// Convert seconds to detector-clock ticks (rounded up)
pub fn seconds_to_ticks(seconds: f64) -> u64 {
    (seconds.max(0.0) * TICKS_PER_SECOND as f64).ceil() as u64
}

/// Convert detector-clock ticks to seconds
pub fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Channels per ADC group
pub const CHANNELS_PER_GROUP: u8 = 8;

/// Logical channel slots (8 slow + 8 fast)
pub const NUM_CHANNELS: usize = 2 * CHANNELS_PER_GROUP as usize;

/// Logical channel index 0..16
///
/// Slow ADC channels occupy 0..8, fast ADC channels 8..16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(u8);

impl ChannelId {
    /// Build from ADC group and channel number, `None` if the number is out of range
    pub fn new(adc_type: AdcType, channel_number: u8) -> Option<Self> {
        if channel_number >= CHANNELS_PER_GROUP {
            return None;
        }
        let base = match adc_type {
            AdcType::Slow => 0,
            AdcType::Fast => CHANNELS_PER_GROUP,
        };
        Some(Self(base + channel_number))
    }

    /// Build from a logical index 0..16
    pub fn from_index(index: usize) -> Option<Self> {
        (index < NUM_CHANNELS).then_some(Self(index as u8))
    }

    /// Logical index 0..16
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn adc_type(self) -> AdcType {
        if self.0 < CHANNELS_PER_GROUP {
            AdcType::Slow
        } else {
            AdcType::Fast
        }
    }

    /// Channel number within the ADC group
    pub fn channel_number(self) -> u8 {
        self.0 % CHANNELS_PER_GROUP
    }

    /// All 16 channels in slot order
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..NUM_CHANNELS as u8).map(ChannelId)
    }

    /// Label as shown by the viewer ("SADC Ch3", "FADC Ch0")
    pub fn label(self) -> String {
        let group = match self.adc_type() {
            AdcType::Slow => "SADC",
            AdcType::Fast => "FADC",
        };
        format!("{} Ch{}", group, self.channel_number())
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ChannelId::from_index(value as usize)
            .ok_or_else(|| format!("channel index {} out of range 0..{}", value, NUM_CHANNELS))
    }
}

impl From<ChannelId> for u8 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Set of enabled logical channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChannelMask(u16);

impl ChannelMask {
    pub const NONE: ChannelMask = ChannelMask(0);
    pub const ALL: ChannelMask = ChannelMask(0xFFFF);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, channel: ChannelId) -> bool {
        self.0 & (1u16 << channel.index()) != 0
    }

    pub fn insert(&mut self, channel: ChannelId) {
        self.0 |= 1u16 << channel.index();
    }

    pub fn remove(&mut self, channel: ChannelId) {
        self.0 &= !(1u16 << channel.index());
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = ChannelId> {
        ChannelId::all().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<ChannelId> for ChannelMask {
    fn from_iter<I: IntoIterator<Item = ChannelId>>(iter: I) -> Self {
        let mut mask = ChannelMask::NONE;
        for channel in iter {
            mask.insert(channel);
        }
        mask
    }
}
