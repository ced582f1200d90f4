//! Walks a buffer of back-to-back PODs
//!
//! Each POD is a header, `trigger_sample_count` samples padded to an even
//! count, and a footer when the header says so. The walk stops after the
//! first POD that runs past the end of the buffer.

use super::common::{DecodeError, RawFrame};
use super::footer::{FrameFooter, FOOTER_SIZE};
use super::header::{constants, Frame, FrameDecoder};

/// One POD located inside a larger buffer
#[derive(Debug, Clone, Copy)]
pub struct Pod<'a> {
    /// Position of the POD in the buffer (0-based)
    pub index: usize,
    /// Byte offset of the header
    pub offset: usize,
    /// Bytes the POD occupies in the buffer, footer included
    pub size: usize,
    /// Header and payload, payload limited to the declared samples
    pub frame: Frame<'a>,
    /// Footer, if the header announces one and it is complete
    pub footer: Option<FrameFooter>,
}

impl Pod<'_> {
    /// Header announces a footer that is not in the buffer
    pub fn footer_missing(&self) -> bool {
        self.frame.header.footer_present && self.footer.is_none()
    }
}

/// Iterator over PODs in a byte buffer
#[derive(Debug, Clone)]
pub struct PodStream<'a> {
    data: &'a [u8],
    decoder: FrameDecoder,
    offset: usize,
    index: usize,
    done: bool,
}

impl<'a> PodStream<'a> {
    pub fn new(data: &'a [u8], decoder: FrameDecoder) -> Self {
        Self {
            data,
            decoder,
            offset: 0,
            index: 0,
            done: false,
        }
    }

    /// Bytes walked so far
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Split a packet into one raw frame per POD
///
/// Frames share the packet's buffer. Undecodable trailing bytes are dropped.
pub fn split_packet(packet: &RawFrame, decoder: FrameDecoder) -> Vec<RawFrame> {
    PodStream::new(packet, decoder)
        .filter_map(Result::ok)
        .map(|pod| packet.slice(pod.offset..pod.offset + pod.size))
        .collect()
}

impl<'a> Iterator for PodStream<'a> {
    type Item = Result<Pod<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.data.len() {
            return None;
        }

        let data: &'a [u8] = self.data;
        let rest = &data[self.offset..];
        let header = match self.decoder.decode_header(rest) {
            Ok(header) => header,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let declared_end = constants::HEADER_SIZE
            + header.trigger_sample_count as usize * constants::WORD_SIZE;
        let frame = Frame::new(
            header,
            &rest[constants::HEADER_SIZE..declared_end.min(rest.len())],
        );

        let mut consumed = header.pod_size();
        let mut footer = None;
        if header.footer_present && consumed + FOOTER_SIZE <= rest.len() {
            footer = FrameFooter::decode(&rest[consumed..]).ok();
            consumed += FOOTER_SIZE;
        } else if header.footer_present {
            consumed += FOOTER_SIZE;
        }

        if consumed > rest.len() {
            self.done = true;
        }

        let size = consumed.min(rest.len());
        let pod = Pod {
            index: self.index,
            offset: self.offset,
            size,
            frame,
            footer,
        };
        self.offset += size;
        self.index += 1;
        Some(Ok(pod))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::common::{AdcType, TriggerFlags};
    use crate::decoder::header::FrameHeader;

    fn pod_bytes(channel: u8, samples: &[u16], footer: Option<FrameFooter>) -> Vec<u8> {
        let header = FrameHeader {
            virtual_channel: 1,
            debug_info: 0,
            channel_number: channel,
            adc_type: AdcType::Slow,
            footer_present: footer.is_some(),
            trigger_sample_count: samples.len() as u32,
            fast_sample_offset: 0,
            flags: TriggerFlags::default(),
            trigger_offset: 0,
            trigger_time: 1000 + channel as u64,
        };
        let mut data = header.to_bytes().to_vec();
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        if samples.len() % 2 == 1 {
            data.extend_from_slice(&[0, 0]);
        }
        if let Some(f) = footer {
            data.extend_from_slice(&f.to_bytes());
        }
        data
    }

    #[test]
    fn test_walks_odd_and_even_pods() {
        let mut data = pod_bytes(0, &[1, 2, 3], None);
        data.extend(pod_bytes(1, &[4, 5], None));
        data.extend(pod_bytes(2, &[6], None));

        let pods: Vec<_> = PodStream::new(&data, FrameDecoder::with_defaults())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(pods.len(), 3);
        assert_eq!(pods[0].frame.samples(), vec![1, 2, 3]);
        assert_eq!(pods[1].offset, 24 + 8);
        assert_eq!(pods[1].frame.samples(), vec![4, 5]);
        assert_eq!(pods[2].frame.header.channel_number, 2);
        assert_eq!(pods[2].frame.samples(), vec![6]);
        assert_eq!(pods[2].index, 2);
    }

    #[test]
    fn test_footer_is_consumed() {
        let footer = FrameFooter {
            max_time: 5,
            min_time: 1,
            dna_low: 42,
            ..Default::default()
        };
        let mut data = pod_bytes(3, &[9, 9], Some(footer));
        data.extend(pod_bytes(4, &[7, 7], None));

        let pods: Vec<_> = PodStream::new(&data, FrameDecoder::with_defaults())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].footer, Some(footer));
        assert!(!pods[0].footer_missing());
        assert_eq!(pods[1].frame.header.channel_number, 4);
        assert_eq!(pods[0].size, 24 + 4 + FOOTER_SIZE);
    }

    #[test]
    fn test_split_packet() {
        let footer = FrameFooter::default();
        let mut data = pod_bytes(0, &[1, 2, 3], None);
        data.extend(pod_bytes(5, &[4], Some(footer)));
        let packet = RawFrame::from(data);

        let frames = split_packet(&packet, FrameDecoder::with_defaults());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 24 + 8);
        assert_eq!(frames[1].len(), 24 + 4 + FOOTER_SIZE);

        let decoder = FrameDecoder::with_defaults();
        let second = decoder.decode(&frames[1]).unwrap();
        assert_eq!(second.header.channel_number, 5);
        assert_eq!(second.samples(), vec![4]);
    }

    #[test]
    fn test_truncated_trailing_pod() {
        let mut data = pod_bytes(0, &[1, 2], None);
        let mut tail = pod_bytes(1, &[10, 11, 12, 13], None);
        tail.truncate(24 + 4);
        data.extend(tail);

        let mut stream = PodStream::new(&data, FrameDecoder::with_defaults());
        let first = stream.next().unwrap().unwrap();
        assert!(!first.frame.is_truncated());
        let last = stream.next().unwrap().unwrap();
        assert!(last.frame.is_truncated());
        assert_eq!(last.frame.samples(), vec![10, 11]);
        assert!(stream.next().is_none());
        assert_eq!(stream.offset(), data.len());
    }

    #[test]
    fn test_trailing_fragment_reports_too_short() {
        let mut data = pod_bytes(0, &[1, 2], None);
        data.extend_from_slice(&[0u8; 10]);

        let results: Vec<_> = PodStream::new(&data, FrameDecoder::with_defaults()).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err(),
            &DecodeError::TooShort {
                needed: 24,
                available: 10
            }
        );
    }

    #[test]
    fn test_missing_footer_ends_walk() {
        let footer = FrameFooter::default();
        let mut data = pod_bytes(0, &[1, 2], Some(footer));
        data.truncate(data.len() - 10);

        let pods: Vec<_> = PodStream::new(&data, FrameDecoder::with_defaults())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert!(pods[0].footer_missing());
    }

    #[test]
    fn test_empty_buffer() {
        assert!(PodStream::new(&[], FrameDecoder::with_defaults())
            .next()
            .is_none());
    }
}
