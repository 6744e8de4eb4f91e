//! Capture container reader over an in-memory buffer.
//!
//! Both classic pcap (either byte order, micro- or nanosecond timestamps) and
//! pcapng are walked with `pcap-parser`'s streaming readers.

use chrono::{DateTime, Utc};
use log::debug;
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};
use std::io::Cursor;

use crate::utils::error::{AppError, AppResult};

/// Magic number of microsecond-resolution classic captures
pub const MAGIC_MICROS: u32 = 0xa1b2_c3d4;

/// Magic number of nanosecond-resolution classic captures
pub const MAGIC_NANOS: u32 = 0xa1b2_3c4d;

/// Block type of a pcapng section header (same in either byte order)
pub const MAGIC_PCAPNG: u32 = 0x0a0d_0d0a;

/// Extra reader buffer past the capture size, so a truncated tail is
/// reported as incomplete instead of overflowing the buffer
const BUFFER_HEADROOM: usize = 65536;

/// Container format, detected from the leading magic number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Legacy,
    PcapNg,
}

impl CaptureFormat {
    pub fn detect(data: &[u8]) -> AppResult<Self> {
        let magic = match data.get(..4) {
            Some(&[a, b, c, d]) => u32::from_le_bytes([a, b, c, d]),
            _ => {
                return Err(AppError::InvalidCaptureFormat(format!(
                    "buffer holds {} bytes, too short for a magic number",
                    data.len()
                )))
            }
        };

        match magic {
            MAGIC_MICROS | MAGIC_NANOS => Ok(CaptureFormat::Legacy),
            m if m.swap_bytes() == MAGIC_MICROS || m.swap_bytes() == MAGIC_NANOS => {
                Ok(CaptureFormat::Legacy)
            }
            MAGIC_PCAPNG => Ok(CaptureFormat::PcapNg),
            m => Err(AppError::InvalidCaptureFormat(format!(
                "unknown magic number 0x{:08x}",
                m
            ))),
        }
    }
}

/// One captured frame, copied out of the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 1-based position in the capture
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    /// LINKTYPE_* value of the interface that captured the frame
    pub link_type: u16,
    pub captured_len: usize,
    pub original_len: usize,
    pub data: Vec<u8>,
}

impl Frame {
    /// Whether the frame was cut short by the snapshot length
    pub fn is_sliced(&self) -> bool {
        self.captured_len < self.original_len
    }
}

#[derive(Debug, Clone, Copy)]
struct Interface {
    link_type: u16,
    /// if_tsresol encoding: power of ten, or power of two when the high bit is set
    ts_resolution: u8,
}

impl Interface {
    fn units_per_second(&self) -> AppResult<u64> {
        let exponent = u32::from(self.ts_resolution & 0x7f);
        let units = if self.ts_resolution & 0x80 == 0 {
            10u64.checked_pow(exponent)
        } else {
            1u64.checked_shl(exponent)
        };
        units.ok_or_else(|| {
            AppError::InvalidCaptureFormat(format!(
                "unsupported timestamp resolution 0x{:02x}",
                self.ts_resolution
            ))
        })
    }
}

enum ReaderInner<'a> {
    Legacy(LegacyPcapReader<Cursor<&'a [u8]>>),
    Ng(PcapNGReader<Cursor<&'a [u8]>>),
}

/// Bookkeeping shared by both container formats
struct ReaderState {
    total_len: usize,
    consumed: usize,
    frame_number: u64,
    interfaces: Vec<Interface>,
}

impl ReaderState {
    fn interface(&self, id: u32) -> AppResult<Interface> {
        self.interfaces.get(id as usize).copied().ok_or_else(|| {
            AppError::InvalidCaptureFormat(format!(
                "frame {} references undeclared interface {}",
                self.frame_number + 1,
                id
            ))
        })
    }

    fn handle_block(&mut self, block: PcapBlockOwned<'_>) -> AppResult<Option<Frame>> {
        match block {
            PcapBlockOwned::LegacyHeader(header) => {
                let nanos = header.magic_number == MAGIC_NANOS
                    || header.magic_number.swap_bytes() == MAGIC_NANOS;
                self.interfaces = vec![Interface {
                    // The upper 16 bits of the network field carry FCS metadata
                    link_type: (header.network.0 & 0xffff) as u16,
                    ts_resolution: if nanos { 9 } else { 6 },
                }];
                Ok(None)
            }
            PcapBlockOwned::Legacy(packet) => {
                let interface = self.interface(0)?;
                let timestamp = to_datetime(
                    u64::from(packet.ts_sec),
                    u64::from(packet.ts_usec),
                    interface.units_per_second()?,
                )?;
                Ok(Some(self.frame(
                    timestamp,
                    interface.link_type,
                    packet.caplen,
                    packet.origlen,
                    packet.data,
                )))
            }
            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                // Interface ids restart with every section
                self.interfaces.clear();
                Ok(None)
            }
            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                self.interfaces.push(Interface {
                    link_type: idb.linktype.0 as u16,
                    ts_resolution: idb.if_tsresol,
                });
                Ok(None)
            }
            PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                let interface = self.interface(epb.if_id)?;
                let units = interface.units_per_second()?;
                let ticks = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                let timestamp = to_datetime(ticks / units, ticks % units, units)?;
                Ok(Some(self.frame(
                    timestamp,
                    interface.link_type,
                    epb.caplen,
                    epb.origlen,
                    epb.data,
                )))
            }
            PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                // Simple packets carry no timestamp and belong to the first interface
                let interface = self.interface(0)?;
                Ok(Some(self.frame(
                    DateTime::<Utc>::default(),
                    interface.link_type,
                    spb.origlen,
                    spb.origlen,
                    spb.data,
                )))
            }
            _ => Ok(None),
        }
    }

    fn frame(
        &mut self,
        timestamp: DateTime<Utc>,
        link_type: u16,
        caplen: u32,
        origlen: u32,
        data: &[u8],
    ) -> Frame {
        self.frame_number += 1;
        // pcapng packet data is padded to 32 bits
        let captured_len = (caplen as usize).min(data.len());
        Frame {
            number: self.frame_number,
            timestamp,
            link_type,
            captured_len,
            original_len: origlen as usize,
            data: data[..captured_len].to_vec(),
        }
    }
}

/// Fractional fields that overflow a whole second are carried into the seconds
fn to_datetime(secs: u64, frac: u64, units_per_second: u64) -> AppResult<DateTime<Utc>> {
    let secs = secs + frac / units_per_second;
    let frac = frac % units_per_second;
    let nanos = (u128::from(frac) * 1_000_000_000 / u128::from(units_per_second)) as u32;

    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, nanos))
        .ok_or_else(|| {
            AppError::InvalidCaptureFormat(format!("timestamp {}.{:09} out of range", secs, nanos))
        })
}

/// Pull blocks until one of them is a packet
fn read_frame<R: PcapReaderIterator>(
    reader: &mut R,
    state: &mut ReaderState,
) -> AppResult<Option<Frame>> {
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                let frame = state.handle_block(block)?;
                reader.consume(offset);
                state.consumed += offset;
                if frame.is_some() {
                    return Ok(frame);
                }
            }
            Err(PcapError::Eof) => return Ok(None),
            Err(PcapError::Incomplete(_)) => {
                // The whole capture is loaded up front, so missing bytes never arrive
                let remaining = state.total_len.saturating_sub(state.consumed);
                if remaining == 0 {
                    return Ok(None);
                }
                return Err(AppError::TruncatedFrame {
                    frame: state.frame_number + 1,
                    remaining,
                });
            }
            Err(e) => {
                return Err(AppError::InvalidCaptureFormat(format!(
                    "parse error after frame {}: {}",
                    state.frame_number, e
                )))
            }
        }
    }
}

/// Single-pass iterator over the frames of a capture buffer.
///
/// Yields `Err` once on the first malformed block and then stops.
pub struct CaptureReader<'a> {
    inner: ReaderInner<'a>,
    format: CaptureFormat,
    state: ReaderState,
    done: bool,
}

impl<'a> CaptureReader<'a> {
    /// Detect the container format and validate its leading header
    pub fn new(data: &'a [u8]) -> AppResult<Self> {
        let format = CaptureFormat::detect(data)?;
        let capacity = data.len() + BUFFER_HEADROOM;

        let inner = match format {
            CaptureFormat::Legacy => LegacyPcapReader::new(capacity, Cursor::new(data))
                .map(ReaderInner::Legacy)
                .map_err(|e| {
                    AppError::InvalidCaptureFormat(format!("failed to parse pcap header: {}", e))
                })?,
            CaptureFormat::PcapNg => PcapNGReader::new(capacity, Cursor::new(data))
                .map(ReaderInner::Ng)
                .map_err(|e| {
                    AppError::InvalidCaptureFormat(format!("failed to parse pcapng header: {}", e))
                })?,
        };
        debug!("Opened {:?} capture, {} bytes", format, data.len());

        Ok(Self {
            inner,
            format,
            state: ReaderState {
                total_len: data.len(),
                consumed: 0,
                frame_number: 0,
                interfaces: Vec::new(),
            },
            done: false,
        })
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    /// Number of frames yielded so far
    pub fn frame_count(&self) -> u64 {
        self.state.frame_number
    }
}

impl Iterator for CaptureReader<'_> {
    type Item = AppResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Self {
            inner, state, done, ..
        } = self;
        let result = match inner {
            ReaderInner::Legacy(reader) => read_frame(reader, state),
            ReaderInner::Ng(reader) => read_frame(reader, state),
        };

        match result {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                *done = true;
                None
            }
            Err(e) => {
                *done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for CaptureReader<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::writer::CaptureWriter;
    use chrono::TimeZone;

    fn header_bytes(magic: [u8; 4], big_endian: bool) -> Vec<u8> {
        let mut header = magic.to_vec();
        if big_endian {
            header.extend_from_slice(&[0x00, 0x02, 0x00, 0x04]); // version 2.4
            header.extend_from_slice(&[0; 8]); // thiszone + sigfigs
            header.extend_from_slice(&[0x00, 0x00, 0xff, 0xff]); // snaplen
            header.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]); // ethernet
        } else {
            header.extend_from_slice(&[0x02, 0x00, 0x04, 0x00]);
            header.extend_from_slice(&[0; 8]);
            header.extend_from_slice(&[0xff, 0xff, 0x00, 0x00]);
            header.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        }
        header
    }

    /// Little-endian section header, one interface block and one enhanced packet
    fn minimal_pcapng(link_type: u16, tsresol: Option<u8>, ticks: u64, packet: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();

        // Section header block
        data.extend_from_slice(&0x0a0d_0d0au32.to_le_bytes());
        data.extend_from_slice(&28u32.to_le_bytes());
        data.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes()); // byte-order magic
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&(-1i64).to_le_bytes()); // section length unknown
        data.extend_from_slice(&28u32.to_le_bytes());

        // Interface description block, optionally with if_tsresol
        let idb_len: u32 = if tsresol.is_some() { 32 } else { 20 };
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&idb_len.to_le_bytes());
        data.extend_from_slice(&link_type.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&65535u32.to_le_bytes());
        if let Some(resolution) = tsresol {
            data.extend_from_slice(&9u16.to_le_bytes()); // if_tsresol
            data.extend_from_slice(&1u16.to_le_bytes());
            data.extend_from_slice(&[resolution, 0, 0, 0]);
            data.extend_from_slice(&[0; 4]); // opt_endofopt
        }
        data.extend_from_slice(&idb_len.to_le_bytes());

        // Enhanced packet block
        let padded = (packet.len() + 3) & !3;
        let epb_len = (32 + padded) as u32;
        data.extend_from_slice(&6u32.to_le_bytes());
        data.extend_from_slice(&epb_len.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes()); // interface id
        data.extend_from_slice(&((ticks >> 32) as u32).to_le_bytes());
        data.extend_from_slice(&(ticks as u32).to_le_bytes());
        data.extend_from_slice(&(packet.len() as u32).to_le_bytes());
        data.extend_from_slice(&(packet.len() as u32).to_le_bytes());
        data.extend_from_slice(packet);
        data.resize(data.len() + padded - packet.len(), 0);
        data.extend_from_slice(&epb_len.to_le_bytes());

        data
    }

    #[test]
    fn test_detect_formats() {
        let le = header_bytes([0xd4, 0xc3, 0xb2, 0xa1], false);
        let be_nanos = header_bytes([0xa1, 0xb2, 0x3c, 0x4d], true);
        assert_eq!(CaptureFormat::detect(&le).unwrap(), CaptureFormat::Legacy);
        assert_eq!(CaptureFormat::detect(&be_nanos).unwrap(), CaptureFormat::Legacy);
        assert_eq!(
            CaptureFormat::detect(&[0x0a, 0x0d, 0x0d, 0x0a]).unwrap(),
            CaptureFormat::PcapNg
        );
    }

    #[test]
    fn test_header_only_capture_is_empty() {
        let data = header_bytes([0xd4, 0xc3, 0xb2, 0xa1], false);
        let mut reader = CaptureReader::new(&data).unwrap();
        assert!(reader.next().is_none());
        assert_eq!(reader.frame_count(), 0);
        assert_eq!(reader.format(), CaptureFormat::Legacy);
    }

    #[test]
    fn test_unknown_magic() {
        let data = header_bytes([0xde, 0xad, 0xbe, 0xef], false);
        match CaptureReader::new(&data) {
            Err(AppError::InvalidCaptureFormat(reason)) => assert!(reason.contains("0xefbeadde")),
            other => panic!("expected format error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_short_buffer() {
        assert!(matches!(
            CaptureReader::new(&[0xd4, 0xc3, 0xb2, 0xa1, 0x02]),
            Err(AppError::InvalidCaptureFormat(_))
        ));
        assert!(matches!(
            CaptureReader::new(&[]),
            Err(AppError::InvalidCaptureFormat(_))
        ));
    }

    #[test]
    fn test_reads_frames_in_order() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut writer = CaptureWriter::new(1);
        writer.write_frame(ts, &[1, 2, 3]);
        writer.write_frame(ts + chrono::Duration::microseconds(250), &[4; 60]);
        let data = writer.into_bytes();

        let frames: Vec<Frame> = CaptureReader::new(&data)
            .unwrap()
            .collect::<AppResult<_>>()
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].number, 1);
        assert_eq!(frames[0].data, vec![1, 2, 3]);
        assert_eq!(frames[0].timestamp, ts);
        assert_eq!(frames[0].link_type, 1);
        assert_eq!(frames[1].captured_len, 60);
        assert_eq!(frames[1].timestamp.timestamp_subsec_micros(), 250);
        assert!(!frames[1].is_sliced());
    }

    #[test]
    fn test_big_endian_nanosecond_record() {
        let mut data = header_bytes([0xa1, 0xb2, 0x3c, 0x4d], true);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x0a]); // ts_sec: 10
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x07]); // ts_nsec: 7
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]); // incl_len: 2
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x40]); // orig_len: 64
        data.extend_from_slice(&[0xaa, 0xbb]);

        let frame = CaptureReader::new(&data).unwrap().next().unwrap().unwrap();
        assert_eq!(frame.timestamp.timestamp(), 10);
        assert_eq!(frame.timestamp.timestamp_subsec_nanos(), 7);
        assert_eq!(frame.data, vec![0xaa, 0xbb]);
        assert_eq!(frame.original_len, 64);
        assert!(frame.is_sliced());
    }

    #[test]
    fn test_truncated_last_frame() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut writer = CaptureWriter::new(1);
        writer.write_frame(ts, &[0; 20]);
        writer.write_frame(ts, &[0; 40]);
        let mut data = writer.into_bytes();
        data.truncate(data.len() - 10);

        let mut reader = CaptureReader::new(&data).unwrap();
        assert!(reader.next().unwrap().is_ok());
        match reader.next() {
            Some(Err(AppError::TruncatedFrame { frame, remaining })) => {
                assert_eq!(frame, 2);
                // 16-byte record header plus 30 of the 40 declared bytes
                assert_eq!(remaining, 46);
            }
            other => panic!("expected truncated frame, got {:?}", other),
        }
        // Reader stops after the first error
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_partial_record_header_is_truncated() {
        let mut data = header_bytes([0xd4, 0xc3, 0xb2, 0xa1], false);
        data.extend_from_slice(&[0; 7]);

        let mut reader = CaptureReader::new(&data).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(AppError::TruncatedFrame {
                frame: 1,
                remaining: 7
            }))
        ));
    }

    #[test]
    fn test_pcapng_enhanced_packet() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ticks = ts.timestamp() as u64 * 1_000_000 + 1_500;
        let data = minimal_pcapng(1, None, ticks, &[9; 42]);

        let mut reader = CaptureReader::new(&data).unwrap();
        assert_eq!(reader.format(), CaptureFormat::PcapNg);

        let frame = reader.next().unwrap().unwrap();
        assert_eq!(frame.number, 1);
        assert_eq!(frame.link_type, 1);
        // Padding after the 42 captured bytes is dropped
        assert_eq!(frame.data.len(), 42);
        assert_eq!(frame.timestamp.timestamp(), ts.timestamp());
        assert_eq!(frame.timestamp.timestamp_subsec_micros(), 1_500);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_pcapng_nanosecond_interface() {
        let data = minimal_pcapng(101, Some(9), 3_000_000_123, &[0x45; 20]);

        let frame = CaptureReader::new(&data).unwrap().next().unwrap().unwrap();
        assert_eq!(frame.link_type, 101);
        assert_eq!(frame.timestamp.timestamp(), 3);
        assert_eq!(frame.timestamp.timestamp_subsec_nanos(), 123);
    }

    #[test]
    fn test_pcapng_truncated_block() {
        let mut data = minimal_pcapng(1, None, 0, &[0; 64]);
        data.truncate(data.len() - 8);

        let mut reader = CaptureReader::new(&data).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(AppError::TruncatedFrame { frame: 1, .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_resolution_units() {
        let micros = Interface {
            link_type: 1,
            ts_resolution: 6,
        };
        let binary = Interface {
            link_type: 1,
            ts_resolution: 0x80 | 10,
        };
        let bogus = Interface {
            link_type: 1,
            ts_resolution: 30,
        };
        assert_eq!(micros.units_per_second().unwrap(), 1_000_000);
        assert_eq!(binary.units_per_second().unwrap(), 1024);
        assert!(bogus.units_per_second().is_err());
    }

    #[test]
    fn test_fraction_overflow_carries() {
        let ts = to_datetime(5, 1_500_000, 1_000_000).unwrap();
        assert_eq!(ts.timestamp(), 6);
        assert_eq!(ts.timestamp_subsec_micros(), 500_000);
    }
}
