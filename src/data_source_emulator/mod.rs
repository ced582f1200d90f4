//! Emulator data source - generates synthetic LZTS PODs
//!
//! Every round produces one POD per configured channel with a shared
//! detector-clock timestamp base. Waveforms are a baseline with Gaussian
//! noise and a pulse (fast rise, exponential decay).
//!
//! Two output shapes:
//! - [`PodEmulator::next_round`]: one frame per POD, as the viewer receives them
//! - [`PodEmulator::next_packet`]: the round's PODs back to back, the last one
//!   carrying the footer, as the stream writer records them

use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info};

use crate::common::{seconds_to_ticks, ChannelId, NUM_CHANNELS};
use crate::config::ConfigError;
use crate::decoder::{AdcType, FrameFooter, FrameHeader, RawFrame, TriggerFlags, FOOTER_SIZE};

/// DNA low word of the reference board
pub const DEFAULT_DEVICE_DNA: u64 = 0x8DAC_8101_0000_8004;

/// Largest sample count the header can declare
const MAX_SAMPLE_COUNT: u32 = 0x3F_FFFF;

/// Emulator configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Logical channel indices to generate (0..8 slow, 8..16 fast)
    pub channels: Vec<u8>,
    /// Samples per slow ADC POD
    pub slow_samples: u32,
    /// Samples per fast ADC POD
    pub fast_samples: u32,
    /// Time between rounds in seconds of detector clock
    pub round_interval_s: f64,
    /// Maximum trigger time spread within a round (ticks)
    pub trigger_jitter_ticks: u64,
    /// Waveform baseline (ADC counts)
    pub baseline: f64,
    /// Gaussian noise sigma (ADC counts)
    pub noise_sigma: f64,
    /// Mean pulse height (ADC counts)
    pub pulse_amplitude: f64,
    /// Virtual channel written into every header
    pub virtual_channel: u8,
    /// Device DNA written into packet footers
    #[serde(deserialize_with = "crate::config::deserialize_hex_u64")]
    pub device_dna: u64,
    /// Emit channels in random order within a round
    pub shuffle: bool,
    /// Wall-clock pause between rounds when streaming (0 = full speed)
    pub round_interval_ms: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            channels: (0..NUM_CHANNELS as u8).collect(),
            slow_samples: 256,
            fast_samples: 1024,
            round_interval_s: 1.0,
            trigger_jitter_ticks: 64,
            baseline: 32768.0,
            noise_sigma: 8.0,
            pulse_amplitude: 8000.0,
            virtual_channel: 1,
            device_dna: DEFAULT_DEVICE_DNA,
            shuffle: true,
            round_interval_ms: 10,
        }
    }
}

impl EmulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(c) = self.channels.iter().find(|&&c| c as usize >= NUM_CHANNELS) {
            return Err(ConfigError::invalid(
                "emulator.channels",
                format!("channel {} out of range 0..{}", c, NUM_CHANNELS),
            ));
        }
        for (field, count) in [
            ("emulator.slow_samples", self.slow_samples),
            ("emulator.fast_samples", self.fast_samples),
        ] {
            if count == 0 || count > MAX_SAMPLE_COUNT {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be within 1..={}", MAX_SAMPLE_COUNT),
                ));
            }
        }
        if !(self.noise_sigma >= 0.0 && self.noise_sigma.is_finite()) {
            return Err(ConfigError::invalid("emulator.noise_sigma", "must be >= 0"));
        }
        if !(self.round_interval_s > 0.0) {
            return Err(ConfigError::invalid(
                "emulator.round_interval_s",
                "must be > 0",
            ));
        }
        if self.virtual_channel > 0xF {
            return Err(ConfigError::invalid(
                "emulator.virtual_channel",
                "must fit in 4 bits",
            ));
        }
        Ok(())
    }

    fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter_map(|&c| ChannelId::from_index(c as usize))
            .collect()
    }
}

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid noise distribution: {0}")]
    Noise(#[from] rand_distr::NormalError),

    #[error("Channel send error")]
    ChannelSend,
}

/// Synthetic POD generator
pub struct PodEmulator {
    config: EmulatorConfig,
    channels: Vec<ChannelId>,
    rng: StdRng,
    noise: Normal<f64>,
    round_interval_ticks: u64,
    next_round_time: u64,
    rounds: u64,
}

impl PodEmulator {
    /// Create an emulator; a seed makes the output reproducible
    pub fn new(config: EmulatorConfig, seed: Option<u64>) -> Result<Self, EmulatorError> {
        config.validate()?;
        let noise = Normal::new(0.0, config.noise_sigma)?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            channels: config.channel_ids(),
            round_interval_ticks: seconds_to_ticks(config.round_interval_s),
            config,
            rng,
            noise,
            next_round_time: 0,
            rounds: 0,
        })
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Rounds generated so far
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Generate one waveform of `n` samples
    ///
    /// Baseline plus noise, with a pulse starting somewhere in the first half.
    fn generate_waveform(&mut self, n: usize) -> Vec<u16> {
        let rise_time = 5usize;
        let decay_tau = (n as f64 / 8.0).max(1.0);
        let pulse_start = self.rng.gen_range(0..n.div_ceil(2));
        let amplitude = self.config.pulse_amplitude * self.rng.gen_range(0.5..1.0);

        (0..n)
            .map(|i| {
                let pulse = if i < pulse_start {
                    0.0
                } else if i < pulse_start + rise_time {
                    amplitude * (i - pulse_start) as f64 / rise_time as f64
                } else {
                    let t = (i - pulse_start - rise_time) as f64;
                    amplitude * (-t / decay_tau).exp()
                };
                let value = self.config.baseline + pulse + self.noise.sample(&mut self.rng);
                value.round().clamp(0.0, u16::MAX as f64) as u16
            })
            .collect()
    }

    /// Encode one POD
    fn encode_pod(
        &mut self,
        channel: ChannelId,
        trigger_time: u64,
        footer: Option<&FrameFooter>,
    ) -> Vec<u8> {
        let sample_count = match channel.adc_type() {
            AdcType::Slow => self.config.slow_samples,
            AdcType::Fast => self.config.fast_samples,
        };
        let header = FrameHeader {
            virtual_channel: self.config.virtual_channel,
            debug_info: 0,
            channel_number: channel.channel_number(),
            adc_type: channel.adc_type(),
            footer_present: footer.is_some(),
            trigger_sample_count: sample_count,
            fast_sample_offset: 0,
            flags: TriggerFlags {
                internal: true,
                ..Default::default()
            },
            trigger_offset: sample_count / 4,
            trigger_time,
        };

        let samples = self.generate_waveform(sample_count as usize);
        let mut data = Vec::with_capacity(header.pod_size() + footer.map_or(0, |_| FOOTER_SIZE));
        data.extend_from_slice(&header.to_bytes());
        for s in &samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        if samples.len() % 2 == 1 {
            data.extend_from_slice(&[0, 0]);
        }
        if let Some(footer) = footer {
            data.extend_from_slice(&footer.to_bytes());
        }
        data
    }

    /// Pick the channel order and trigger times of the next round
    fn plan_round(&mut self) -> Vec<(ChannelId, u64)> {
        let base = self.next_round_time;
        self.next_round_time += self.round_interval_ticks;
        self.rounds += 1;

        let mut order = self.channels.clone();
        if self.config.shuffle {
            order.shuffle(&mut self.rng);
        }
        let jitter = self.config.trigger_jitter_ticks;
        order
            .into_iter()
            .map(|channel| (channel, base + self.rng.gen_range(0..=jitter)))
            .collect()
    }

    /// One frame per configured channel, without footers
    pub fn next_round(&mut self) -> Vec<RawFrame> {
        let plan = self.plan_round();
        let frames: Vec<RawFrame> = plan
            .into_iter()
            .map(|(channel, time)| Bytes::from(self.encode_pod(channel, time, None)))
            .collect();
        debug!(round = self.rounds, frames = frames.len(), "Generated round");
        frames
    }

    /// The next round as one packet, footer on the last POD
    pub fn next_packet(&mut self) -> Bytes {
        let plan = self.plan_round();
        let min_time = plan.iter().map(|&(_, t)| t).min().unwrap_or_default();
        let max_time = plan.iter().map(|&(_, t)| t).max().unwrap_or_default();
        let footer = FrameFooter {
            max_time,
            min_time,
            dna_low: self.config.device_dna,
            dna_high: 0,
            flags: TriggerFlags::default(),
        };

        let last = plan.len().saturating_sub(1);
        let mut packet = Vec::new();
        for (i, (channel, time)) in plan.into_iter().enumerate() {
            let footer = (i == last).then_some(&footer);
            packet.extend(self.encode_pod(channel, time, footer));
        }
        Bytes::from(packet)
    }

    /// Stream `rounds` rounds of frames into `tx`
    ///
    /// Stops early on shutdown or when the receiver is gone.
    pub async fn run(
        &mut self,
        tx: mpsc::Sender<RawFrame>,
        rounds: u64,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<u64, EmulatorError> {
        let use_ticker = self.config.round_interval_ms > 0;
        let mut ticker = interval(Duration::from_millis(self.config.round_interval_ms.max(1)));

        info!(
            channels = self.channels.len(),
            rounds,
            round_interval_ms = self.config.round_interval_ms,
            "Emulator started"
        );

        let mut sent = 0u64;
        'rounds: for _ in 0..rounds {
            if use_ticker {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => {
                        info!("Emulator received shutdown signal");
                        break;
                    }

                    _ = ticker.tick() => {}
                }
            }

            for frame in self.next_round() {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => {
                        info!("Emulator received shutdown signal");
                        break 'rounds;
                    }

                    result = tx.send(frame) => {
                        result.map_err(|_| EmulatorError::ChannelSend)?;
                        sent += 1;
                    }
                }
            }
        }

        info!(rounds = self.rounds, frames = sent, "Emulator stopped");
        Ok(sent)
    }
}
