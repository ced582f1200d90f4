//! E2E tests for stream-writer data files (emulate → write → read → survey)
//!
//! Packets come from the seeded emulator, go through the record writer into
//! a temporary file, and are walked back POD by POD. Damage is injected into
//! the raw bytes to check that the survey reports it without stopping.

use std::io::{Cursor, Write};
use std::path::PathBuf;

use lzts_daq::common::ChannelId;
use lzts_daq::data_source_emulator::{EmulatorConfig, PodEmulator, DEFAULT_DEVICE_DNA};
use lzts_daq::decoder::{
    split_packet, AdcType, AdcTypeField, DecoderConfig, FrameDecoder, FrameHeader, PodStream,
    TriggerFlags,
};
use lzts_daq::recorder::{read_packets, DataFileReader, DataFileWriter, RecordHeader, DATA_CHANNEL};
use lzts_daq::survey::{survey_buffer, survey_file, SurveyConfig};
use rand::prelude::*;
use rand::rngs::StdRng;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("lzts_{}_{}.dat", name, std::process::id()))
}

fn small_emulator(seed: u64) -> PodEmulator {
    let config = EmulatorConfig {
        slow_samples: 33,
        fast_samples: 128,
        round_interval_ms: 0,
        ..Default::default()
    };
    PodEmulator::new(config, Some(seed)).unwrap()
}

fn survey_config() -> SurveyConfig {
    SurveyConfig {
        expected_dna: Some(DEFAULT_DEVICE_DNA),
    }
}

/// Write `rounds` emulator packets into an in-memory file
fn emulated_file(seed: u64, rounds: usize) -> Vec<u8> {
    let mut emulator = small_emulator(seed);
    let mut writer = DataFileWriter::new(Vec::new());
    for _ in 0..rounds {
        writer
            .write_record(RecordHeader::new(DATA_CHANNEL), &emulator.next_packet())
            .unwrap();
    }
    writer.into_inner().unwrap()
}

// ---------------------------------------------------------------------------
// Clean files
// ---------------------------------------------------------------------------

#[test]
fn test_emulated_file_surveys_clean() {
    let path = temp_path("clean");
    std::fs::write(&path, emulated_file(1, 20)).unwrap();

    let report = survey_file(&path, FrameDecoder::with_defaults(), survey_config()).unwrap();
    std::fs::remove_file(&path).ok();

    assert!(report.is_clean(), "{}", report);
    assert_eq!(report.buffers, 20);
    assert_eq!(report.pods, 20 * 16);
    assert_eq!(report.footers, 20);
    assert_eq!(report.channels.len(), 16);
    for (channel, stats) in &report.channels {
        assert_eq!(stats.pods, 20);
        let expected = match channel.adc_type() {
            AdcType::Slow => 33,
            AdcType::Fast => 128,
        };
        assert_eq!(stats.largest_trigger, expected);
    }
}

#[test]
fn test_records_split_into_decodable_frames() {
    let data = emulated_file(2, 5);
    let decoder = FrameDecoder::with_defaults();

    let mut frames = 0;
    for record in DataFileReader::new(Cursor::new(data)).unwrap() {
        let record = record.unwrap();
        assert_eq!(record.header.channel, DATA_CHANNEL);
        for frame in split_packet(&record.payload, decoder) {
            let decoded = decoder.decode(&frame).unwrap();
            assert!(!decoded.is_truncated());
            assert!(ChannelId::new(decoded.header.adc_type, decoded.header.channel_number).is_some());
            frames += 1;
        }
    }
    assert_eq!(frames, 5 * 16);
}

// ---------------------------------------------------------------------------
// Damaged files
// ---------------------------------------------------------------------------

#[test]
fn test_truncated_last_record_is_skipped() {
    let path = temp_path("truncated");
    let mut data = emulated_file(3, 4);
    let cut = data.len() - 100;
    data.truncate(cut);
    std::fs::write(&path, &data).unwrap();

    let packets = read_packets(&path).unwrap();
    let report = survey_file(&path, FrameDecoder::with_defaults(), survey_config()).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(packets.len(), 3);
    assert!(report.is_clean());
    assert_eq!(report.pods, 3 * 16);
}

#[test]
fn test_wrong_dna_is_reported() {
    let data = emulated_file(4, 3);
    let config = SurveyConfig {
        expected_dna: Some(0x1234),
    };

    let decoder = FrameDecoder::with_defaults();
    let mut mismatches = 0;
    for record in DataFileReader::new(Cursor::new(data)).unwrap() {
        let report = survey_buffer(&record.unwrap().payload, decoder, config);
        assert_eq!(report.dna_mismatches.len(), 1);
        assert_eq!(report.dna_mismatches[0].found, DEFAULT_DEVICE_DNA);
        mismatches += 1;
    }
    assert_eq!(mismatches, 3);
}

#[test]
fn test_repeated_timestamp_and_bad_adc() {
    let pod = |channel: u8, time: u64, bad_adc: bool| {
        let header = FrameHeader {
            virtual_channel: 1,
            debug_info: 0,
            channel_number: channel,
            adc_type: AdcType::Fast,
            footer_present: false,
            trigger_sample_count: 4,
            fast_sample_offset: 0,
            flags: TriggerFlags {
                bad_adc,
                ..Default::default()
            },
            trigger_offset: 0,
            trigger_time: time,
        };
        let mut data = header.to_bytes().to_vec();
        data.extend_from_slice(&[0u8; 8]);
        data
    };

    let mut packet = Vec::new();
    packet.extend(pod(2, 1000, false));
    packet.extend(pod(3, 1000, false));
    packet.extend(pod(2, 1000, true));
    packet.extend(pod(2, 2000, false));

    let mut file = DataFileWriter::new(Vec::new());
    file.write_record(RecordHeader::new(DATA_CHANNEL), &packet).unwrap();
    let path = temp_path("repeated");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&file.into_inner().unwrap())
        .unwrap();

    let report = survey_file(&path, FrameDecoder::with_defaults(), SurveyConfig::default()).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(report.bad_adc, vec![2]);
    assert_eq!(report.repeated_timestamps.len(), 1);
    let repeat = report.repeated_timestamps[0];
    assert_eq!(repeat.channel, ChannelId::new(AdcType::Fast, 2).unwrap());
    assert_eq!(repeat.trigger_time, 1000);
    assert_eq!((repeat.first_pod, repeat.second_pod), (0, 2));
}

// ---------------------------------------------------------------------------
// Header properties
// ---------------------------------------------------------------------------

#[test]
fn test_random_headers_reencode_exactly() {
    let mut rng = StdRng::seed_from_u64(0xDA7A);
    for field in [AdcTypeField::TypeNibble, AdcTypeField::TypeBit] {
        let decoder = FrameDecoder::new(DecoderConfig {
            adc_type_field: field,
        });
        for _ in 0..1000 {
            let header = FrameHeader {
                virtual_channel: rng.gen_range(0..16),
                debug_info: rng.gen(),
                channel_number: rng.gen_range(0..16),
                adc_type: if rng.gen() { AdcType::Slow } else { AdcType::Fast },
                footer_present: rng.gen(),
                trigger_sample_count: rng.gen_range(0..0x40_0000),
                fast_sample_offset: rng.gen_range(0..4),
                flags: TriggerFlags::from_header_word(rng.gen::<u16>() & 0xF840),
                trigger_offset: rng.gen(),
                trigger_time: rng.gen(),
            };
            let bytes = header.to_bytes();
            let decoded = decoder.decode_header(&bytes).unwrap();
            assert_eq!(decoded, header);
            assert_eq!(decoded.to_bytes(), bytes);
        }
    }
}

#[test]
fn test_declared_count_limits_samples() {
    let mut rng = StdRng::seed_from_u64(7);
    let decoder = FrameDecoder::with_defaults();
    for _ in 0..200 {
        let declared: u32 = rng.gen_range(0..64);
        let present: usize = rng.gen_range(0..64);
        let header = FrameHeader {
            virtual_channel: 1,
            debug_info: 0,
            channel_number: 0,
            adc_type: AdcType::Slow,
            footer_present: false,
            trigger_sample_count: declared,
            fast_sample_offset: 0,
            flags: TriggerFlags::default(),
            trigger_offset: 0,
            trigger_time: 0,
        };
        let mut data = header.to_bytes().to_vec();
        data.extend((0..present as u16).flat_map(|s| s.to_le_bytes()));

        let frame = decoder.decode(&data).unwrap();
        let samples = frame.samples();
        assert_eq!(samples.len(), (declared as usize).min(present));
        assert_eq!(frame.is_truncated(), (declared as usize) > present);
        assert!(samples.iter().enumerate().all(|(i, &s)| s == i as u16));
    }

    // PODs in a stream still advance by the padded size
    let data = emulated_file(5, 1);
    let record = DataFileReader::new(Cursor::new(data)).unwrap().next().unwrap().unwrap();
    let pods: Vec<_> = PodStream::new(&record.payload, decoder)
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(pods.iter().all(|p| p.offset % 4 == 0));
}
