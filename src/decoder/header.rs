//! POD header decoder for LZTS digitizer frames
//!
//! Decodes the 12-word (24 byte) little-endian header that precedes every
//! waveform payload, for both slow and fast ADC channels.

use serde::Serialize;

use super::common::{read_u64_words, read_word, AdcType, AdcTypeField, DecodeError, TriggerFlags};

/// POD header constants (16-bit words, Little Endian)
pub mod constants {
    pub const WORD_SIZE: usize = 2;
    pub const HEADER_WORDS: usize = 12;
    pub const HEADER_SIZE: usize = HEADER_WORDS * WORD_SIZE;

    // Word 0
    pub const VIRTUAL_CHANNEL_MASK: u16 = 0xF;

    // Word 2
    pub const CHANNEL_MASK: u16 = 0xF;

    // Word 3
    pub const FOOTER_PRESENT_MASK: u16 = 0x1;
    pub const SLOW_ADC_FLAG: u16 = 0x1000;

    // Word 5 (upper bits of the sample count + flags)
    pub const SAMPLES_HIGH_MASK: u16 = 0x3F;
    pub const FAST_OFFSET_SHIFT: u32 = 7;
    pub const FAST_OFFSET_MASK: u16 = 0x3;
    pub const SAMPLE_COUNT_MASK: u32 = 0x3F_FFFF;

    // Word indices
    pub const TRIGGER_OFFSET_WORD: usize = 6;
    pub const TRIGGER_TIME_WORD: usize = 8;
}

/// Decoder configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderConfig {
    /// Location of the slow/fast discriminator
    pub adc_type_field: AdcTypeField,
}

/// Decoded POD header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    /// Stream lane the POD was sent on (word 0, low nibble)
    pub virtual_channel: u8,
    /// Opaque debug word (fast ADC only)
    pub debug_info: u16,
    /// ADC channel within its group (word 2, low nibble)
    pub channel_number: u8,
    /// Slow or fast digitizer group
    pub adc_type: AdcType,
    /// A 24-word footer follows the payload
    pub footer_present: bool,
    /// Declared number of 16-bit samples (22 bits)
    pub trigger_sample_count: u32,
    /// Fast ADC sample phase (word 5 bits 8:7)
    pub fast_sample_offset: u8,
    /// Trigger flags
    pub flags: TriggerFlags,
    /// Trigger offset in samples
    pub trigger_offset: u32,
    /// Trigger time in 4 ns detector-clock ticks
    pub trigger_time: u64,
}

impl FrameHeader {
    /// Sample count rounded up to even, as laid out on the wire
    #[inline]
    pub fn padded_sample_count(&self) -> u32 {
        self.trigger_sample_count + (self.trigger_sample_count & 1)
    }

    /// Bytes occupied by header and padded payload
    #[inline]
    pub fn pod_size(&self) -> usize {
        constants::HEADER_SIZE + self.padded_sample_count() as usize * constants::WORD_SIZE
    }

    /// Encode back into the 12 header words
    ///
    /// The slow flag is written as word 3 bit 12, which both
    /// [`AdcTypeField`] revisions read as slow.
    pub fn to_words(&self) -> [u16; constants::HEADER_WORDS] {
        let mut words = [0u16; constants::HEADER_WORDS];
        words[0] = self.virtual_channel as u16 & constants::VIRTUAL_CHANNEL_MASK;
        words[1] = self.debug_info;
        words[2] = self.channel_number as u16 & constants::CHANNEL_MASK;
        let slow_flag = match self.adc_type {
            AdcType::Slow => constants::SLOW_ADC_FLAG,
            AdcType::Fast => 0,
        };
        words[3] = slow_flag | self.footer_present as u16;
        let count = self.trigger_sample_count & constants::SAMPLE_COUNT_MASK;
        words[4] = (count & 0xFFFF) as u16;
        words[5] = (count >> 16) as u16
            | (self.fast_sample_offset as u16 & constants::FAST_OFFSET_MASK)
                << constants::FAST_OFFSET_SHIFT
            | self.flags.to_header_word();
        words[6] = (self.trigger_offset & 0xFFFF) as u16;
        words[7] = (self.trigger_offset >> 16) as u16;
        for i in 0..4 {
            words[constants::TRIGGER_TIME_WORD + i] = (self.trigger_time >> (16 * i)) as u16;
        }
        words
    }

    /// Encode into the 24 wire bytes
    pub fn to_bytes(&self) -> [u8; constants::HEADER_SIZE] {
        let mut buf = [0u8; constants::HEADER_SIZE];
        for (i, word) in self.to_words().iter().enumerate() {
            buf[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Format header for display
    pub fn display(&self) -> String {
        format!(
            "{:>4} ch{} vc{} N:{:7} off:{:7} T:{:20} footer:{} {}",
            self.adc_type,
            self.channel_number,
            self.virtual_channel,
            self.trigger_sample_count,
            self.trigger_offset,
            self.trigger_time,
            self.footer_present as u8,
            self.flags
        )
    }
}

impl std::fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// A decoded frame borrowing its payload from the raw buffer
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    /// Bytes following the header (may include padding and footer)
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Build a frame from an already decoded header and its payload bytes
    pub fn new(header: FrameHeader, payload: &'a [u8]) -> Self {
        Self { header, payload }
    }

    /// Raw bytes after the header
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Whole samples physically present after the header
    #[inline]
    pub fn available_samples(&self) -> u32 {
        (self.payload.len() / constants::WORD_SIZE) as u32
    }

    /// Samples that will be returned by [`Frame::samples`]
    #[inline]
    pub fn sample_count(&self) -> u32 {
        self.header.trigger_sample_count.min(self.available_samples())
    }

    /// Waveform samples
    ///
    /// Takes words `[12, 12 + trigger_sample_count)` of the frame, cut short to
    /// what is actually present. Padding words are not samples.
    pub fn samples(&self) -> Vec<u16> {
        let n = self.sample_count() as usize;
        self.payload[..n * constants::WORD_SIZE]
            .chunks_exact(constants::WORD_SIZE)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    /// True if fewer samples are present than declared
    pub fn is_truncated(&self) -> bool {
        self.available_samples() < self.header.trigger_sample_count
    }

    /// Truncation warning, if any
    pub fn truncation(&self) -> Option<DecodeError> {
        self.is_truncated().then(|| DecodeError::TruncatedPayload {
            declared: self.header.trigger_sample_count,
            available: self.available_samples(),
        })
    }
}

/// Decoder for LZTS POD frames
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder {
    config: DecoderConfig,
}

impl FrameDecoder {
    /// Create a decoder with the given configuration
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Create a decoder with default configuration
    pub fn with_defaults() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode the header at the front of `data`
    pub fn decode_header(&self, data: &[u8]) -> Result<FrameHeader, DecodeError> {
        if data.len() < constants::HEADER_SIZE {
            return Err(DecodeError::TooShort {
                needed: constants::HEADER_SIZE,
                available: data.len(),
            });
        }

        let word3 = read_word(data, 3);
        let word4 = read_word(data, 4);
        let word5 = read_word(data, 5);

        let trigger_sample_count =
            ((word5 & constants::SAMPLES_HIGH_MASK) as u32) << 16 | word4 as u32;
        let trigger_offset = (read_word(data, constants::TRIGGER_OFFSET_WORD + 1) as u32) << 16
            | read_word(data, constants::TRIGGER_OFFSET_WORD) as u32;

        Ok(FrameHeader {
            virtual_channel: (read_word(data, 0) & constants::VIRTUAL_CHANNEL_MASK) as u8,
            debug_info: read_word(data, 1),
            channel_number: (read_word(data, 2) & constants::CHANNEL_MASK) as u8,
            adc_type: self.config.adc_type_field.adc_type(word3),
            footer_present: word3 & constants::FOOTER_PRESENT_MASK != 0,
            trigger_sample_count,
            fast_sample_offset: ((word5 >> constants::FAST_OFFSET_SHIFT)
                & constants::FAST_OFFSET_MASK) as u8,
            flags: TriggerFlags::from_header_word(word5),
            trigger_offset,
            trigger_time: read_u64_words(data, constants::TRIGGER_TIME_WORD),
        })
    }

    /// Decode a single frame: header plus everything after it
    pub fn decode<'a>(&self, data: &'a [u8]) -> Result<Frame<'a>, DecodeError> {
        let header = self.decode_header(data)?;
        Ok(Frame::new(header, &data[constants::HEADER_SIZE..]))
    }
}
