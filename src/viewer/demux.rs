//! Channel demultiplexer
//!
//! Sorts decoded frames into 16 channel slots and decides when a complete
//! set is ready for display. A set is handed over only when
//! - every enabled channel has delivered a frame since the last hand-over,
//! - the trigger time has moved on by more than the minimum spacing, and
//! - the consumer is not still busy with the previous set.
//!
//! All times are detector-clock ticks taken from the frames themselves.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::common::{ChannelId, ChannelMask, DemuxCounters, NUM_CHANNELS};
use crate::decoder::{AdcType, DecodeError, DecoderConfig, FrameDecoder, RawFrame};

use super::gate::BusyGate;

/// Default minimum spacing between hand-overs (0.5 s)
pub const DEFAULT_MIN_SPACING_TICKS: u64 = 125_000_000;

/// Default busy timeout (5 s)
pub const DEFAULT_BUSY_TIMEOUT_TICKS: u64 = 1_250_000_000;

/// Backward trigger-time step treated as a restarted clock (1 ms)
///
/// Smaller steps are skew between the channels of one round.
pub const CLOCK_RESET_TOLERANCE_TICKS: u64 = 250_000;

/// Default virtual channel carrying waveform data
pub const DEFAULT_DATA_CHANNEL_ID: u8 = 1;

/// Reasons a frame is dropped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Unknown channel: {adc_type} ADC channel {channel_number}")]
    UnknownChannel {
        adc_type: AdcType,
        channel_number: u8,
    },
}

/// Demultiplexer configuration
#[derive(Debug, Clone, Copy)]
pub struct DemuxConfig {
    pub decoder: DecoderConfig,
    /// Only frames on this virtual channel are sorted; `None` accepts all
    pub data_channel_id: Option<u8>,
    /// Hand-overs closer together than this are held back
    pub min_spacing_ticks: u64,
    /// Busy flag is cleared after this long without a release
    pub busy_timeout_ticks: u64,
    /// Channels that must arrive before a hand-over
    pub enabled: ChannelMask,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            data_channel_id: Some(DEFAULT_DATA_CHANNEL_ID),
            min_spacing_ticks: DEFAULT_MIN_SPACING_TICKS,
            busy_timeout_ticks: DEFAULT_BUSY_TIMEOUT_TICKS,
            enabled: ChannelMask::ALL,
        }
    }
}

/// Latest frame of one logical channel
#[derive(Debug, Clone, Default)]
pub struct ChannelSlot {
    frame: Option<RawFrame>,
    arrived: bool,
}

impl ChannelSlot {
    /// Most recent raw frame, header included
    pub fn frame(&self) -> Option<&RawFrame> {
        self.frame.as_ref()
    }

    /// A frame arrived since the last hand-over
    pub fn arrived(&self) -> bool {
        self.arrived
    }
}

/// A complete set of channel frames ready for display
#[derive(Debug, Clone)]
pub struct ReadyEvent {
    /// Hand-over counter, starting at 1
    pub sequence: u64,
    /// Trigger time of the frame that completed the set
    pub trigger_time: u64,
    /// Channels that had to arrive for this set
    pub enabled: ChannelMask,
    frames: [Option<RawFrame>; NUM_CHANNELS],
}

impl ReadyEvent {
    pub fn frame(&self, channel: ChannelId) -> Option<&RawFrame> {
        self.frames[channel.index()].as_ref()
    }

    /// Channels with a frame, in slot order
    pub fn frames(&self) -> impl Iterator<Item = (ChannelId, &RawFrame)> {
        ChannelId::all().filter_map(move |c| self.frame(c).map(|f| (c, f)))
    }

    /// Waveform samples of one channel
    pub fn samples(&self, channel: ChannelId, decoder: &FrameDecoder) -> Option<Vec<u16>> {
        let raw = self.frame(channel)?;
        decoder.decode(raw).ok().map(|frame| frame.samples())
    }
}

/// Outcome of submitting one frame
#[derive(Debug, Clone)]
pub enum DemuxEvent {
    /// Frame stored, no hand-over
    Stored(ChannelId),
    /// Frame stored and completed a set
    Ready(ReadyEvent),
    /// Frame on another virtual channel, left alone
    Ignored { virtual_channel: u8 },
    /// Frame rejected, slots untouched
    Dropped(DemuxError),
}

impl DemuxEvent {
    pub fn is_ready(&self) -> bool {
        matches!(self, DemuxEvent::Ready(_))
    }
}

/// Sorts frames into channel slots
///
/// Owned by a single producer. The consumer side only sees [`ReadyEvent`]
/// snapshots and the shared [`BusyGate`].
#[derive(Debug)]
pub struct ChannelDemultiplexer {
    config: DemuxConfig,
    decoder: FrameDecoder,
    slots: [ChannelSlot; NUM_CHANNELS],
    gate: BusyGate,
    counters: Arc<DemuxCounters>,
    /// Trigger time of the last hand-over
    baseline: Option<u64>,
    /// Trigger time the busy timeout counts from
    busy_since: Option<u64>,
    sequence: u64,
}

impl ChannelDemultiplexer {
    pub fn new(config: DemuxConfig) -> Self {
        Self::with_gate(config, BusyGate::new())
    }

    /// Create with defaults (0.5 s spacing, 5 s busy timeout, all channels)
    pub fn with_defaults() -> Self {
        Self::new(DemuxConfig::default())
    }

    /// Create sharing an existing gate with the consumer
    pub fn with_gate(config: DemuxConfig, gate: BusyGate) -> Self {
        Self {
            decoder: FrameDecoder::new(config.decoder),
            config,
            slots: Default::default(),
            gate,
            counters: Arc::new(DemuxCounters::new()),
            baseline: None,
            busy_since: None,
            sequence: 0,
        }
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    /// Gate handle for the consumer
    pub fn gate(&self) -> BusyGate {
        self.gate.clone()
    }

    pub fn counters(&self) -> Arc<DemuxCounters> {
        Arc::clone(&self.counters)
    }

    pub fn enabled(&self) -> ChannelMask {
        self.config.enabled
    }

    /// Replace the enabled-channel mask; arrival flags are kept
    pub fn set_enabled(&mut self, mask: ChannelMask) {
        if mask != self.config.enabled {
            debug!(mask = mask.bits(), "Enabled channels changed");
        }
        self.config.enabled = mask;
    }

    pub fn slot(&self, channel: ChannelId) -> &ChannelSlot {
        &self.slots[channel.index()]
    }

    /// Every enabled channel has arrived since the last hand-over
    pub fn round_complete(&self) -> bool {
        self.config
            .enabled
            .iter()
            .all(|c| self.slots[c.index()].arrived)
    }

    /// Trigger time of the last hand-over
    pub fn baseline(&self) -> Option<u64> {
        self.baseline
    }

    /// Sort one raw frame
    ///
    /// Never blocks. Bad frames are counted and reported as
    /// [`DemuxEvent::Dropped`]; they never touch slots or timers.
    pub fn submit(&mut self, frame: RawFrame) -> DemuxEvent {
        self.counters.inc_received();
        self.counters.add_bytes(frame.len() as u64);

        let (header, truncation) = match self.decoder.decode(&frame) {
            Ok(decoded) => (decoded.header, decoded.truncation()),
            Err(e) => {
                self.counters.inc_decode_errors();
                warn!(error = %e, len = frame.len(), "Dropping undecodable frame");
                return DemuxEvent::Dropped(e.into());
            }
        };

        if let Some(id) = self.config.data_channel_id {
            if header.virtual_channel != id {
                self.counters.inc_ignored();
                return DemuxEvent::Ignored {
                    virtual_channel: header.virtual_channel,
                };
            }
        }

        let Some(channel) = ChannelId::new(header.adc_type, header.channel_number) else {
            self.counters.inc_unknown_channel();
            warn!(
                adc_type = %header.adc_type,
                channel_number = header.channel_number,
                "Dropping frame with unknown channel"
            );
            return DemuxEvent::Dropped(DemuxError::UnknownChannel {
                adc_type: header.adc_type,
                channel_number: header.channel_number,
            });
        };

        if let Some(e) = truncation {
            self.counters.inc_truncated();
            warn!(channel = %channel, error = %e, "Truncated payload");
        }

        let now = header.trigger_time;
        if let Some(last) = self.clock_went_back(now) {
            self.counters.inc_clock_resets();
            warn!(
                trigger_time = now,
                last_trigger_time = last,
                "Trigger time jumped backwards, restarting timers"
            );
            self.reset();
        }

        let slot = &mut self.slots[channel.index()];
        slot.frame = Some(frame);
        slot.arrived = true;
        self.counters.inc_stored();

        debug!(channel = %channel, trigger_time = now, "Stored frame");

        if self.gate.is_busy() && !self.busy_expired(now) {
            self.counters.inc_busy_suppressed();
            return DemuxEvent::Stored(channel);
        }

        if !self.round_complete() {
            return DemuxEvent::Stored(channel);
        }

        if let Some(baseline) = self.baseline {
            if now.saturating_sub(baseline) <= self.config.min_spacing_ticks {
                self.counters.inc_rate_limited();
                return DemuxEvent::Stored(channel);
            }
        }

        if !self.gate.try_acquire() {
            self.counters.inc_busy_suppressed();
            return DemuxEvent::Stored(channel);
        }

        DemuxEvent::Ready(self.emit(now))
    }

    /// Clear arrival flags and timers; slot contents are kept
    ///
    /// Called when the detector clock restarts. A held gate stays held; its
    /// timeout then counts from the next frame submitted.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.arrived = false;
        }
        self.baseline = None;
        self.busy_since = None;
    }

    /// Latest timer reference if `now` lies more than the tolerance before it
    fn clock_went_back(&self, now: u64) -> Option<u64> {
        let last = self.baseline.max(self.busy_since)?;
        (last.saturating_sub(now) > CLOCK_RESET_TOLERANCE_TICKS).then_some(last)
    }

    /// Release the gate if the consumer has been busy for too long
    fn busy_expired(&mut self, now: u64) -> bool {
        let since = *self.busy_since.get_or_insert(now);
        let elapsed = now.saturating_sub(since);
        if elapsed <= self.config.busy_timeout_ticks {
            return false;
        }
        if self.gate.release() {
            self.counters.inc_busy_timeouts();
            warn!(
                elapsed_ticks = elapsed,
                "Display busy too long, releasing gate"
            );
        }
        self.busy_since = None;
        true
    }

    fn emit(&mut self, now: u64) -> ReadyEvent {
        self.sequence += 1;
        self.baseline = Some(now);
        self.busy_since = Some(now);

        let frames = std::array::from_fn(|i| self.slots[i].frame.clone());
        for slot in &mut self.slots {
            slot.arrived = false;
        }
        self.counters.inc_ready();
        debug!(sequence = self.sequence, trigger_time = now, "Set ready");

        ReadyEvent {
            sequence: self.sequence,
            trigger_time: now,
            enabled: self.config.enabled,
            frames,
        }
    }
}
