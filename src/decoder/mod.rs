//! Decoder module for LZTS digitizer PODs
//!
//! Converts raw little-endian frames into headers, waveform samples and
//! footers.

pub mod common;
pub mod footer;
pub mod header;
pub mod stream;

pub use common::{AdcType, AdcTypeField, DecodeError, RawFrame, TriggerFlags};
pub use footer::{FrameFooter, FOOTER_SIZE};
pub use header::{DecoderConfig, Frame, FrameDecoder, FrameHeader};
pub use stream::{split_packet, Pod, PodStream};
