//! Offline data-integrity survey
//!
//! Walks POD buffers and collects what the acquisition scripts used to
//! print: per-channel POD counts and trigger sizes, PODs flagged bad-ADC,
//! repeated trigger timestamps within a channel, and footer problems.
//!
//! POD numbers count from zero across every buffer fed to one [`Survey`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::common::{ChannelId, PipelineResult};
use crate::decoder::{FrameDecoder, Pod, PodStream};
use crate::recorder::data_packets;

/// Survey settings
#[derive(Debug, Clone, Copy, Default)]
pub struct SurveyConfig {
    /// Expected footer DNA (low 64 bits); unchecked when `None`
    pub expected_dna: Option<u64>,
}

/// Per-channel totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub pods: usize,
    pub samples: u64,
    /// Largest declared trigger size
    pub largest_trigger: u32,
    pub first_time: Option<u64>,
    pub last_time: Option<u64>,
}

/// Two PODs of one channel carrying the same trigger time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepeatedTimestamp {
    pub channel: ChannelId,
    pub trigger_time: u64,
    pub first_pod: usize,
    pub second_pod: usize,
}

/// Footer whose DNA differs from the expected board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DnaMismatch {
    pub pod: usize,
    pub found: u64,
}

/// A buffer that ended in something not decodable as a POD
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamError {
    /// Number the POD would have had
    pub pod: usize,
    pub offset: usize,
    pub error: String,
}

/// Survey results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SurveyReport {
    pub buffers: usize,
    pub pods: usize,
    pub bytes: u64,
    pub channels: BTreeMap<ChannelId, ChannelStats>,
    /// PODs whose channel bits are out of range
    pub unknown_channel: Vec<usize>,
    /// PODs with the bad-ADC flag set
    pub bad_adc: Vec<usize>,
    /// PODs with fewer samples than declared
    pub truncated: Vec<usize>,
    pub repeated_timestamps: Vec<RepeatedTimestamp>,
    pub footers: usize,
    /// PODs announcing a footer that is not there
    pub missing_footers: Vec<usize>,
    pub dna_mismatches: Vec<DnaMismatch>,
    /// PODs whose footer min time is after its max time
    pub bad_time_ranges: Vec<usize>,
    pub stream_errors: Vec<StreamError>,
}

impl SurveyReport {
    /// Nothing suspicious was found
    pub fn is_clean(&self) -> bool {
        self.unknown_channel.is_empty()
            && self.bad_adc.is_empty()
            && self.truncated.is_empty()
            && self.repeated_timestamps.is_empty()
            && self.missing_footers.is_empty()
            && self.dna_mismatches.is_empty()
            && self.bad_time_ranges.is_empty()
            && self.stream_errors.is_empty()
    }

    pub fn display(&self) -> String {
        let mut out = format!(
            "Survey: {} PODs in {} buffers ({} bytes), {} footers\n",
            self.pods, self.buffers, self.bytes, self.footers
        );
        for (channel, stats) in &self.channels {
            out.push_str(&format!(
                "  {:<9} {:>8} PODs, largest trigger {:>6} samples\n",
                channel.label(),
                stats.pods,
                stats.largest_trigger
            ));
        }
        for (name, count) in [
            ("unknown channel", self.unknown_channel.len()),
            ("bad ADC flag", self.bad_adc.len()),
            ("truncated", self.truncated.len()),
            ("repeated timestamps", self.repeated_timestamps.len()),
            ("missing footers", self.missing_footers.len()),
            ("DNA mismatches", self.dna_mismatches.len()),
            ("bad footer time ranges", self.bad_time_ranges.len()),
            ("stream errors", self.stream_errors.len()),
        ] {
            if count > 0 {
                out.push_str(&format!("  {}: {}\n", name, count));
            }
        }
        if self.is_clean() {
            out.push_str("  no problems found\n");
        }
        out
    }
}

impl std::fmt::Display for SurveyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Incremental survey over one or more POD buffers
#[derive(Debug, Default)]
pub struct Survey {
    config: SurveyConfig,
    decoder: FrameDecoder,
    report: SurveyReport,
    /// PODs seen per channel and trigger time
    seen: HashMap<(ChannelId, u64), Vec<usize>>,
}

impl Survey {
    pub fn new(config: SurveyConfig, decoder: FrameDecoder) -> Self {
        Self {
            config,
            decoder,
            ..Default::default()
        }
    }

    /// Walk one buffer of back-to-back PODs
    pub fn scan(&mut self, data: &[u8]) {
        self.report.buffers += 1;
        self.report.bytes += data.len() as u64;

        let mut stream = PodStream::new(data, self.decoder);
        while let Some(item) = stream.next() {
            match item {
                Ok(pod) => self.record(&pod),
                Err(e) => {
                    warn!(pod = self.report.pods, offset = stream.offset(), error = %e, "Undecodable data at end of buffer");
                    self.report.stream_errors.push(StreamError {
                        pod: self.report.pods,
                        offset: stream.offset(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Account for one POD
    pub fn record(&mut self, pod: &Pod<'_>) {
        let number = self.report.pods;
        self.report.pods += 1;
        let header = &pod.frame.header;

        if header.flags.bad_adc {
            warn!(pod = number, "Bad ADC flag");
            self.report.bad_adc.push(number);
        }
        if let Some(e) = pod.frame.truncation() {
            warn!(pod = number, error = %e, "Truncated POD");
            self.report.truncated.push(number);
        }

        self.check_footer(number, pod);

        let Some(channel) = ChannelId::new(header.adc_type, header.channel_number) else {
            warn!(
                pod = number,
                adc_type = %header.adc_type,
                channel_number = header.channel_number,
                "POD with unknown channel"
            );
            self.report.unknown_channel.push(number);
            return;
        };

        let time = header.trigger_time;
        let stats = self.report.channels.entry(channel).or_default();
        stats.pods += 1;
        stats.samples += pod.frame.sample_count() as u64;
        stats.largest_trigger = stats.largest_trigger.max(header.trigger_sample_count);
        stats.first_time.get_or_insert(time);
        stats.last_time = Some(time);

        let previous = self.seen.entry((channel, time)).or_default();
        for &first_pod in previous.iter() {
            warn!(
                channel = %channel,
                trigger_time = time,
                first_pod,
                second_pod = number,
                "Repeated timestamp"
            );
            self.report.repeated_timestamps.push(RepeatedTimestamp {
                channel,
                trigger_time: time,
                first_pod,
                second_pod: number,
            });
        }
        previous.push(number);

        debug!(pod = number, channel = %channel, trigger_time = time, "POD");
    }

    fn check_footer(&mut self, number: usize, pod: &Pod<'_>) {
        if pod.footer_missing() {
            warn!(pod = number, "Footer announced but missing");
            self.report.missing_footers.push(number);
            return;
        }
        let Some(footer) = pod.footer else {
            return;
        };
        self.report.footers += 1;

        if let Some(expected) = self.config.expected_dna {
            if !footer.dna_matches(expected) {
                warn!(
                    pod = number,
                    found = format_args!("{:#018x}", footer.dna_low),
                    expected = format_args!("{:#018x}", expected),
                    "Footer DNA mismatch"
                );
                self.report.dna_mismatches.push(DnaMismatch {
                    pod: number,
                    found: footer.dna_low,
                });
            }
        }
        if !footer.has_valid_time_range() {
            warn!(
                pod = number,
                min_time = footer.min_time,
                max_time = footer.max_time,
                "Footer time range inverted"
            );
            self.report.bad_time_ranges.push(number);
        }
    }

    /// Report so far
    pub fn report(&self) -> &SurveyReport {
        &self.report
    }

    pub fn finish(self) -> SurveyReport {
        self.report
    }
}

/// Survey a single buffer
pub fn survey_buffer(data: &[u8], decoder: FrameDecoder, config: SurveyConfig) -> SurveyReport {
    let mut survey = Survey::new(config, decoder);
    survey.scan(data);
    survey.finish()
}

/// Survey every data record of a stream-writer file
///
/// Records are read one at a time; only the per-channel timestamp index
/// grows with the file.
pub fn survey_file<P: AsRef<Path>>(
    path: P,
    decoder: FrameDecoder,
    config: SurveyConfig,
) -> PipelineResult<SurveyReport> {
    let mut survey = Survey::new(config, decoder);
    for record in data_packets(path)? {
        let record = record?;
        debug!(offset = record.offset, bytes = record.payload.len(), "Record");
        survey.scan(&record.payload);
    }
    Ok(survey.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{AdcType, FrameFooter, FrameHeader, TriggerFlags};

    const DNA: u64 = 0x8DAC_8101_0000_8004;

    fn pod(
        adc_type: AdcType,
        channel: u8,
        trigger_time: u64,
        samples: u32,
        footer: Option<FrameFooter>,
    ) -> Vec<u8> {
        let header = FrameHeader {
            virtual_channel: 1,
            debug_info: 0,
            channel_number: channel,
            adc_type,
            footer_present: footer.is_some(),
            trigger_sample_count: samples,
            fast_sample_offset: 0,
            flags: TriggerFlags::default(),
            trigger_offset: 0,
            trigger_time,
        };
        let mut data = header.to_bytes().to_vec();
        data.resize(header.pod_size(), 0x11);
        if let Some(f) = footer {
            data.extend_from_slice(&f.to_bytes());
        }
        data
    }

    fn good_footer() -> FrameFooter {
        FrameFooter {
            max_time: 500,
            min_time: 100,
            dna_low: DNA,
            ..Default::default()
        }
    }

    fn config() -> SurveyConfig {
        SurveyConfig {
            expected_dna: Some(DNA),
        }
    }

    #[test]
    fn test_clean_buffer() {
        let mut data = pod(AdcType::Slow, 0, 100, 16, None);
        data.extend(pod(AdcType::Fast, 3, 100, 33, None));
        data.extend(pod(AdcType::Slow, 0, 200, 8, Some(good_footer())));

        let report = survey_buffer(&data, FrameDecoder::with_defaults(), config());
        assert!(report.is_clean(), "{}", report);
        assert_eq!(report.pods, 3);
        assert_eq!(report.footers, 1);

        let slow0 = report.channels[&ChannelId::new(AdcType::Slow, 0).unwrap()];
        assert_eq!(slow0.pods, 2);
        assert_eq!(slow0.largest_trigger, 16);
        assert_eq!(slow0.first_time, Some(100));
        assert_eq!(slow0.last_time, Some(200));

        let fast3 = report.channels[&ChannelId::new(AdcType::Fast, 3).unwrap()];
        assert_eq!(fast3.samples, 33);
    }

    #[test]
    fn test_repeated_timestamps_are_paired_per_channel() {
        let mut data = pod(AdcType::Slow, 1, 700, 2, None);
        // Same time on another channel is fine
        data.extend(pod(AdcType::Slow, 2, 700, 2, None));
        data.extend(pod(AdcType::Slow, 1, 700, 2, None));
        data.extend(pod(AdcType::Slow, 1, 700, 2, None));

        let report = survey_buffer(&data, FrameDecoder::with_defaults(), config());
        let pairs: Vec<(usize, usize)> = report
            .repeated_timestamps
            .iter()
            .map(|r| (r.first_pod, r.second_pod))
            .collect();
        assert_eq!(pairs, vec![(0, 2), (0, 3), (2, 3)]);
        assert!(report
            .repeated_timestamps
            .iter()
            .all(|r| r.channel.index() == 1 && r.trigger_time == 700));
    }

    #[test]
    fn test_bad_adc_and_unknown_channel() {
        let mut bad = pod(AdcType::Slow, 0, 1, 2, None);
        bad[11] |= 0x80; // word5 bit 15
        let mut data = pod(AdcType::Slow, 12, 2, 2, None);
        data.extend(bad);

        let report = survey_buffer(&data, FrameDecoder::with_defaults(), config());
        assert_eq!(report.unknown_channel, vec![0]);
        assert_eq!(report.bad_adc, vec![1]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_footer_checks() {
        let wrong_dna = FrameFooter {
            dna_low: 0x1234,
            ..good_footer()
        };
        let inverted = FrameFooter {
            min_time: 900,
            max_time: 100,
            ..good_footer()
        };
        let mut data = pod(AdcType::Slow, 0, 1, 2, Some(wrong_dna));
        data.extend(pod(AdcType::Slow, 0, 2, 2, Some(inverted)));

        let report = survey_buffer(&data, FrameDecoder::with_defaults(), config());
        assert_eq!(report.footers, 2);
        assert_eq!(
            report.dna_mismatches,
            vec![DnaMismatch {
                pod: 0,
                found: 0x1234
            }]
        );
        assert_eq!(report.bad_time_ranges, vec![1]);

        // Without an expected DNA the board is not checked
        let unchecked = survey_buffer(&data, FrameDecoder::with_defaults(), SurveyConfig::default());
        assert!(unchecked.dna_mismatches.is_empty());
    }

    #[test]
    fn test_truncated_tail_and_fragment() {
        let mut data = pod(AdcType::Slow, 0, 1, 2, Some(good_footer()));
        data.truncate(data.len() - 8);

        let report = survey_buffer(&data, FrameDecoder::with_defaults(), config());
        assert_eq!(report.missing_footers, vec![0]);

        let mut data = pod(AdcType::Slow, 0, 1, 2, None);
        data.extend_from_slice(&[0u8; 6]);
        let report = survey_buffer(&data, FrameDecoder::with_defaults(), config());
        assert_eq!(report.pods, 1);
        assert_eq!(report.stream_errors.len(), 1);
        assert_eq!(report.stream_errors[0].pod, 1);
    }

    #[test]
    fn test_numbering_continues_across_buffers() {
        let mut survey = Survey::new(config(), FrameDecoder::with_defaults());
        survey.scan(&pod(AdcType::Fast, 0, 40, 2, None));
        survey.scan(&pod(AdcType::Fast, 0, 40, 2, None));
        let report = survey.finish();
        assert_eq!(report.buffers, 2);
        assert_eq!(report.repeated_timestamps[0].first_pod, 0);
        assert_eq!(report.repeated_timestamps[0].second_pod, 1);
    }

    #[test]
    fn test_report_json_uses_channel_index_keys() {
        let data = pod(AdcType::Fast, 1, 5, 2, None);
        let report = survey_buffer(&data, FrameDecoder::with_defaults(), config());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["channels"]["9"]["pods"], 1);
    }
}
