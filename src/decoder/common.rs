//! Common types for decoder module

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw frame as delivered by the transport or read from a data file
pub type RawFrame = bytes::Bytes;

/// Decode errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer cannot hold a full header (or footer)
    #[error("Frame too short: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    /// Payload holds fewer samples than the header declares
    #[error("Truncated payload: header declares {declared} samples, {available} present")]
    TruncatedPayload { declared: u32, available: u32 },
}

/// Digitizer group a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdcType {
    /// Slow ADC (~4 MHz)
    Slow,
    /// Fast ADC (~250 MHz)
    Fast,
}

impl std::fmt::Display for AdcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdcType::Slow => write!(f, "slow"),
            AdcType::Fast => write!(f, "fast"),
        }
    }
}

/// Where the slow/fast discriminator lives in the header
///
/// Both firmware revisions carry the flag in the high byte of word 3.
/// The offline scripts test the whole top nibble, the viewer only bit 4 of
/// byte 7 (word 3 bit 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdcTypeField {
    /// Word 3 bits 15:12, zero = fast, nonzero = slow
    #[default]
    TypeNibble,
    /// Byte 7 bit 4 only, 1 = slow, 0 = fast
    TypeBit,
}

impl AdcTypeField {
    /// Resolve the ADC type from header word 3
    #[inline]
    pub fn adc_type(self, word3: u16) -> AdcType {
        let slow = match self {
            AdcTypeField::TypeNibble => (word3 & 0xF000) >> 12 != 0,
            AdcTypeField::TypeBit => (word3 >> 12) & 0x1 == 1,
        };
        if slow {
            AdcType::Slow
        } else {
            AdcType::Fast
        }
    }
}

/// Trigger flags packed into header word 5
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFlags {
    pub lost: bool,
    pub external: bool,
    pub internal: bool,
    pub empty: bool,
    pub veto: bool,
    pub bad_adc: bool,
}

impl TriggerFlags {
    pub const LOST_BIT: u32 = 6;
    pub const EXTERNAL_BIT: u32 = 11;
    pub const INTERNAL_BIT: u32 = 12;
    pub const EMPTY_BIT: u32 = 13;
    pub const VETO_BIT: u32 = 14;
    pub const BAD_ADC_BIT: u32 = 15;

    /// Extract flags from header word 5
    pub fn from_header_word(word5: u16) -> Self {
        let bit = |n: u32| (word5 >> n) & 0x1 == 1;
        Self {
            lost: bit(Self::LOST_BIT),
            external: bit(Self::EXTERNAL_BIT),
            internal: bit(Self::INTERNAL_BIT),
            empty: bit(Self::EMPTY_BIT),
            veto: bit(Self::VETO_BIT),
            bad_adc: bit(Self::BAD_ADC_BIT),
        }
    }

    /// Bits of header word 5 occupied by the flags
    pub fn to_header_word(&self) -> u16 {
        (self.lost as u16) << Self::LOST_BIT
            | (self.external as u16) << Self::EXTERNAL_BIT
            | (self.internal as u16) << Self::INTERNAL_BIT
            | (self.empty as u16) << Self::EMPTY_BIT
            | (self.veto as u16) << Self::VETO_BIT
            | (self.bad_adc as u16) << Self::BAD_ADC_BIT
    }

    /// Footer word 16 packs the same flags in bits 0..=5
    pub fn from_footer_word(word16: u16) -> Self {
        let bit = |n: u32| (word16 >> n) & 0x1 == 1;
        Self {
            lost: bit(0),
            external: bit(1),
            internal: bit(2),
            empty: bit(3),
            veto: bit(4),
            bad_adc: bit(5),
        }
    }

    pub fn to_footer_word(&self) -> u16 {
        (self.lost as u16)
            | (self.external as u16) << 1
            | (self.internal as u16) << 2
            | (self.empty as u16) << 3
            | (self.veto as u16) << 4
            | (self.bad_adc as u16) << 5
    }

    /// True if any flag is set
    pub fn any(&self) -> bool {
        self.lost || self.external || self.internal || self.empty || self.veto || self.bad_adc
    }
}

impl std::fmt::Display for TriggerFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lost={} ext={} int={} empty={} veto={} badadc={}",
            self.lost as u8,
            self.external as u8,
            self.internal as u8,
            self.empty as u8,
            self.veto as u8,
            self.bad_adc as u8
        )
    }
}

/// Read little-endian u16 word `index` from `data`
///
/// Caller guarantees the word is in bounds.
#[inline]
pub(crate) fn read_word(data: &[u8], index: usize) -> u16 {
    let offset = index * 2;
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Assemble a 64-bit value from four words, least significant first
#[inline]
pub(crate) fn read_u64_words(data: &[u8], first_word: usize) -> u64 {
    (0..4).fold(0u64, |acc, i| {
        acc | (read_word(data, first_word + i) as u64) << (16 * i)
    })
}
