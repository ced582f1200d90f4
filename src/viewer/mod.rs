//! Waveform viewer core
//!
//! Sorts incoming frames per channel and hands complete, rate-limited sets
//! to a display consumer without ever blocking the frame producer.

pub mod demux;
pub mod gate;
pub mod pipeline;
pub mod summary;

pub use demux::{
    ChannelDemultiplexer, ChannelSlot, DemuxConfig, DemuxError, DemuxEvent, ReadyEvent,
};
pub use gate::BusyGate;
pub use pipeline::{spawn_viewer, DisplayHandle};
pub use summary::{summarize, WaveformSummary};
