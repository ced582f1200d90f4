//! Record format of LZTS stream-writer data files
//!
//! File structure:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Record 1                               │
//! │  - Size (u32 LE) = payload length + 4   │
//! │  - Header word (u32 LE)                 │
//! │      channel << 24 | error << 16 | flags│
//! │  - Payload (one packet of PODs)         │
//! ├─────────────────────────────────────────┤
//! │  Record 2                               │
//! ├─────────────────────────────────────────┤
//! │  ...                                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! There is no file header or footer. A crash mid-write leaves a last
//! record whose size runs past the end of file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;

/// Size prefix plus header word
pub const RECORD_HEADER_SIZE: usize = 8;

/// Size field counts the header word as well as the payload
const HEADER_WORD_SIZE: u32 = 4;

/// Largest accepted record (sanity bound against corrupt size fields)
pub const MAX_RECORD_SIZE: u32 = 256 * 1024 * 1024;

/// Stream channel data packets are written on
pub const DATA_CHANNEL: u8 = 1;

/// Data file errors
#[derive(Debug, thiserror::Error)]
pub enum DataFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Truncated record at offset {offset}: declares {declared} bytes, {available} present")]
    TruncatedRecord {
        offset: u64,
        declared: u64,
        available: u64,
    },

    #[error("Invalid record size {size} at offset {offset}")]
    InvalidSize { offset: u64, size: u32 },
}

/// Channel/error/flags word written in front of every payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordHeader {
    pub channel: u8,
    pub error: u8,
    pub flags: u16,
}

impl RecordHeader {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            ..Default::default()
        }
    }

    pub fn to_word(self) -> u32 {
        (self.channel as u32) << 24 | (self.error as u32) << 16 | self.flags as u32
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            channel: (word >> 24) as u8,
            error: (word >> 16) as u8,
            flags: word as u16,
        }
    }
}

/// One record read from a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Byte offset of the size field
    pub offset: u64,
    pub header: RecordHeader,
    pub payload: Bytes,
}

impl Record {
    /// Size on disk including the size field
    pub fn disk_size(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.payload.len() as u64
    }
}

/// Writer for data files
pub struct DataFileWriter<W: Write> {
    writer: W,
    records: u64,
    bytes: u64,
}

impl DataFileWriter<BufWriter<File>> {
    /// Create (truncate) a data file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, DataFileError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> DataFileWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            records: 0,
            bytes: 0,
        }
    }

    /// Append one record
    pub fn write_record(&mut self, header: RecordHeader, payload: &[u8]) -> Result<(), DataFileError> {
        let size = u32::try_from(payload.len())
            .ok()
            .and_then(|len| len.checked_add(HEADER_WORD_SIZE))
            .filter(|&size| size <= MAX_RECORD_SIZE)
            .ok_or(DataFileError::InvalidSize {
                offset: self.bytes,
                size: u32::MAX,
            })?;

        self.writer.write_all(&size.to_le_bytes())?;
        self.writer.write_all(&header.to_word().to_le_bytes())?;
        self.writer.write_all(payload)?;

        self.records += 1;
        self.bytes += RECORD_HEADER_SIZE as u64 + payload.len() as u64;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn flush(&mut self) -> Result<(), DataFileError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and hand back the inner writer
    pub fn into_inner(mut self) -> Result<W, DataFileError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reader for data files
///
/// Iterating yields records until end of file. A record that runs past the
/// end yields [`DataFileError::TruncatedRecord`] and ends the iteration.
pub struct DataFileReader<R> {
    reader: R,
    file_size: u64,
    offset: u64,
    done: bool,
}

impl DataFileReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DataFileError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> DataFileReader<R> {
    pub fn new(mut reader: R) -> Result<Self, DataFileError> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader,
            file_size,
            offset: 0,
            done: false,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Offset of the next record
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_record(&mut self) -> Result<Record, DataFileError> {
        let offset = self.offset;
        let remaining = self.file_size - offset;

        if remaining < RECORD_HEADER_SIZE as u64 {
            return Err(DataFileError::TruncatedRecord {
                offset,
                declared: RECORD_HEADER_SIZE as u64,
                available: remaining,
            });
        }

        let mut word = [0u8; 4];
        self.reader.read_exact(&mut word)?;
        let size = u32::from_le_bytes(word);
        if !(HEADER_WORD_SIZE..=MAX_RECORD_SIZE).contains(&size) {
            return Err(DataFileError::InvalidSize { offset, size });
        }

        let declared = 4 + size as u64;
        if declared > remaining {
            return Err(DataFileError::TruncatedRecord {
                offset,
                declared,
                available: remaining,
            });
        }

        self.reader.read_exact(&mut word)?;
        let header = RecordHeader::from_word(u32::from_le_bytes(word));

        let mut payload = vec![0u8; (size - HEADER_WORD_SIZE) as usize];
        self.reader.read_exact(&mut payload)?;

        self.offset += declared;
        Ok(Record {
            offset,
            header,
            payload: Bytes::from(payload),
        })
    }
}

impl<R: Read + Seek> Iterator for DataFileReader<R> {
    type Item = Result<Record, DataFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.file_size {
            return None;
        }
        let result = self.read_record();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}
