//! Per-channel waveform numbers printed by the viewer

use serde::Serialize;

use crate::common::ChannelId;
use crate::decoder::FrameDecoder;

use super::demux::ReadyEvent;

/// ADC full scale in volts peak-to-peak
pub const FULL_SCALE_VOLTS: f64 = 2.0;

/// ADC code range (16-bit)
pub const ADC_CODES: f64 = 65_536.0;

/// Summary statistics of one channel's waveform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformSummary {
    pub channel: ChannelId,
    pub samples: usize,
    /// Minimum ADC code
    pub min: u16,
    /// Maximum ADC code
    pub max: u16,
    /// Peak-to-peak in volts
    pub vpp: f64,
    /// Standard deviation around the mean, in ADC codes
    pub rms: f64,
}

impl WaveformSummary {
    /// `None` for an empty waveform
    pub fn from_samples(channel: ChannelId, samples: &[u16]) -> Option<Self> {
        let min = *samples.iter().min()?;
        let max = *samples.iter().max()?;

        let n = samples.len() as f64;
        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
        let var = samples
            .iter()
            .map(|&s| (s as f64 - mean).powi(2))
            .sum::<f64>()
            / n;

        Some(Self {
            channel,
            samples: samples.len(),
            min,
            max,
            vpp: (max - min) as f64 / ADC_CODES * FULL_SCALE_VOLTS,
            rms: var.sqrt(),
        })
    }

    pub fn display(&self) -> String {
        format!(
            "{}: {} samples, min {} max {} ADU, Vpp {:.6} V, RMS {:.2}",
            self.channel, self.samples, self.min, self.max, self.vpp, self.rms
        )
    }
}

impl std::fmt::Display for WaveformSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Summaries of the enabled channels of a ready set
pub fn summarize(event: &ReadyEvent, decoder: &FrameDecoder) -> Vec<WaveformSummary> {
    event
        .enabled
        .iter()
        .filter_map(|c| {
            let samples = event.samples(c, decoder)?;
            WaveformSummary::from_samples(c, &samples)
        })
        .collect()
}
