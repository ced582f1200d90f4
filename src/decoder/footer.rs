//! POD footer decoder
//!
//! The last POD of a packet carries a 24-word footer with the packet's
//! timestamp range, the FPGA device DNA and a copy of the trigger flags.

use serde::Serialize;

use super::common::{read_u64_words, read_word, DecodeError, TriggerFlags};

pub const FOOTER_WORDS: usize = 24;
pub const FOOTER_SIZE: usize = FOOTER_WORDS * 2;

const MAX_TIME_WORD: usize = 0;
const MIN_TIME_WORD: usize = 4;
const DNA_LOW_WORD: usize = 8;
const DNA_HIGH_WORD: usize = 12;
const FLAGS_WORD: usize = 16;

/// Decoded 24-word footer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameFooter {
    /// Latest trigger time in the packet (ticks)
    pub max_time: u64,
    /// Earliest trigger time in the packet (ticks)
    pub min_time: u64,
    /// Device DNA, low 64 bits
    pub dna_low: u64,
    /// Device DNA, high 64 bits
    pub dna_high: u64,
    pub flags: TriggerFlags,
}

impl FrameFooter {
    /// Decode a footer from the first 48 bytes of `data`
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < FOOTER_SIZE {
            return Err(DecodeError::TooShort {
                needed: FOOTER_SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            max_time: read_u64_words(data, MAX_TIME_WORD),
            min_time: read_u64_words(data, MIN_TIME_WORD),
            dna_low: read_u64_words(data, DNA_LOW_WORD),
            dna_high: read_u64_words(data, DNA_HIGH_WORD),
            flags: TriggerFlags::from_footer_word(read_word(data, FLAGS_WORD)),
        })
    }

    /// Encode into the 48 wire bytes (reserved words zero)
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut words = [0u16; FOOTER_WORDS];
        for (base, value) in [
            (MAX_TIME_WORD, self.max_time),
            (MIN_TIME_WORD, self.min_time),
            (DNA_LOW_WORD, self.dna_low),
            (DNA_HIGH_WORD, self.dna_high),
        ] {
            for i in 0..4 {
                words[base + i] = (value >> (16 * i)) as u16;
            }
        }
        words[FLAGS_WORD] = self.flags.to_footer_word();

        let mut buf = [0u8; FOOTER_SIZE];
        for (i, word) in words.iter().enumerate() {
            buf[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Min time must not be later than max time
    pub fn has_valid_time_range(&self) -> bool {
        self.min_time <= self.max_time
    }

    /// Compare the DNA low word with the board's expected value
    pub fn dna_matches(&self, expected_low: u64) -> bool {
        self.dna_low == expected_low
    }
}
