//! Recorder component - writes POD packets to data files
//!
//! Architecture:
//! - Producer (emulator or hardware reader): packets → mpsc channel
//! - Writer task: mpsc channel → data file records
//!
//! Each packet becomes one record on the data channel. Records carry no
//! sorting or event building; readers walk the PODs inside each payload.

pub mod format;

pub use format::{
    DataFileError, DataFileReader, DataFileWriter, Record, RecordHeader, DATA_CHANNEL,
    MAX_RECORD_SIZE, RECORD_HEADER_SIZE,
};

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::common::{PipelineError, PipelineResult};
use crate::decoder::{split_packet, FrameDecoder, RawFrame};

/// Statistics for one recording session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RecorderStats {
    pub records_written: u64,
    pub bytes_written: u64,
}

/// Write every packet from `rx` as one record until the channel closes or
/// shutdown is signalled
pub async fn write_packets<W: Write>(
    mut writer: DataFileWriter<W>,
    mut rx: mpsc::Receiver<Bytes>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<RecorderStats, DataFileError> {
    loop {
        tokio::select! {
            biased;

            packet = rx.recv() => {
                let Some(packet) = packet else {
                    debug!("Packet channel closed");
                    break;
                };
                writer.write_record(RecordHeader::new(DATA_CHANNEL), &packet)?;
            }

            _ = shutdown.recv() => {
                info!("Recorder received shutdown signal");
                break;
            }
        }
    }

    writer.flush()?;
    let stats = RecorderStats {
        records_written: writer.records_written(),
        bytes_written: writer.bytes_written(),
    };
    info!(
        records = stats.records_written,
        bytes = stats.bytes_written,
        "Recorder finished"
    );
    Ok(stats)
}

/// Record packets into a new file at `path`
pub async fn record_to_file(
    path: PathBuf,
    rx: mpsc::Receiver<Bytes>,
    shutdown: broadcast::Receiver<()>,
) -> Result<RecorderStats, DataFileError> {
    let writer = DataFileWriter::create(&path)?;
    info!(path = %path.display(), "Recording started");
    write_packets(writer, rx, shutdown).await
}

/// Frames buffered ahead of the viewer while replaying
const REPLAY_READ_AHEAD: usize = 16;

/// Stream the data-channel records of a file
///
/// Records on other channels are skipped. A truncated last record ends the
/// stream with a warning; other errors are yielded and end it too.
pub fn data_packets<P: AsRef<Path>>(
    path: P,
) -> Result<impl Iterator<Item = Result<Record, DataFileError>>, DataFileError> {
    Ok(DataFileReader::open(path)?.filter_map(|record| match record {
        Ok(record) if record.header.channel == DATA_CHANNEL => Some(Ok(record)),
        Ok(record) => {
            debug!(
                channel = record.header.channel,
                offset = record.offset,
                "Skipping non-data record"
            );
            None
        }
        Err(DataFileError::TruncatedRecord {
            offset,
            declared,
            available,
        }) => {
            warn!(offset, declared, available, "Data file ends in a truncated record");
            None
        }
        Err(e) => Some(Err(e)),
    }))
}

/// Read all data-channel records of a file
pub fn read_packets<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, DataFileError> {
    data_packets(path)?.collect()
}

/// Feed the PODs of a data file into `tx`, one frame per POD
///
/// Records are read on a blocking thread a few at a time. Returns the
/// number of frames sent. Stops early on shutdown.
pub async fn replay_file(
    path: PathBuf,
    decoder: FrameDecoder,
    tx: mpsc::Sender<RawFrame>,
    mut shutdown: broadcast::Receiver<()>,
) -> PipelineResult<u64> {
    let (record_tx, mut record_rx) = mpsc::channel::<Record>(REPLAY_READ_AHEAD);
    let reader = tokio::task::spawn_blocking(move || -> Result<u64, DataFileError> {
        let mut records = 0u64;
        for record in data_packets(path)? {
            if record_tx.blocking_send(record?).is_err() {
                break;
            }
            records += 1;
        }
        Ok(records)
    });

    let mut sent = 0u64;
    loop {
        let record = tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!(frames = sent, "Replay interrupted by shutdown");
                return Ok(sent);
            }

            record = record_rx.recv() => record,
        };
        let Some(record) = record else {
            break;
        };

        for frame in split_packet(&record.payload, decoder) {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!(frames = sent, "Replay interrupted by shutdown");
                    return Ok(sent);
                }

                result = tx.send(frame) => {
                    result.map_err(|_| PipelineError::ChannelSend)?;
                    sent += 1;
                }
            }
        }
    }

    let records = reader.await??;
    info!(records, frames = sent, "Replay finished");
    Ok(sent)
}
