use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use crate::capture::reader::{CaptureFormat, MAGIC_MICROS, MAGIC_PCAPNG};

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;
const SNAPLEN: u32 = 65535;

const BYTE_ORDER_MAGIC: u32 = 0x1a2b_3c4d;
const IDB_TYPE: u32 = 0x0000_0001;
const EPB_TYPE: u32 = 0x0000_0006;

/// Builds a little-endian, microsecond-resolution capture in memory,
/// either classic pcap or a single-interface pcapng section
pub struct CaptureWriter {
    format: CaptureFormat,
    buffer: Vec<u8>,
}

impl CaptureWriter {
    /// Start a classic pcap capture with the given LINKTYPE_* value
    pub fn new(link_type: u16) -> Self {
        let mut header = [0u8; GLOBAL_HEADER_LEN];
        LittleEndian::write_u32(&mut header[0..4], MAGIC_MICROS);
        LittleEndian::write_u16(&mut header[4..6], 2);
        LittleEndian::write_u16(&mut header[6..8], 4);
        // thiszone and sigfigs stay zero
        LittleEndian::write_u32(&mut header[16..20], SNAPLEN);
        LittleEndian::write_u32(&mut header[20..24], u32::from(link_type));

        Self {
            format: CaptureFormat::Legacy,
            buffer: header.to_vec(),
        }
    }

    /// Start a pcapng capture with one interface of the given LINKTYPE_* value
    pub fn pcapng(link_type: u16) -> Self {
        let mut shb = [0u8; 28];
        LittleEndian::write_u32(&mut shb[0..4], MAGIC_PCAPNG);
        LittleEndian::write_u32(&mut shb[4..8], 28);
        LittleEndian::write_u32(&mut shb[8..12], BYTE_ORDER_MAGIC);
        LittleEndian::write_u16(&mut shb[12..14], 1);
        LittleEndian::write_u16(&mut shb[14..16], 0);
        // Section length unknown
        LittleEndian::write_i64(&mut shb[16..24], -1);
        LittleEndian::write_u32(&mut shb[24..28], 28);

        let mut idb = [0u8; 20];
        LittleEndian::write_u32(&mut idb[0..4], IDB_TYPE);
        LittleEndian::write_u32(&mut idb[4..8], 20);
        LittleEndian::write_u16(&mut idb[8..10], link_type);
        LittleEndian::write_u32(&mut idb[12..16], SNAPLEN);
        LittleEndian::write_u32(&mut idb[16..20], 20);

        let mut buffer = shb.to_vec();
        buffer.extend_from_slice(&idb);
        Self {
            format: CaptureFormat::PcapNg,
            buffer,
        }
    }

    /// Append one frame record
    pub fn write_frame(&mut self, timestamp: DateTime<Utc>, data: &[u8]) {
        match self.format {
            CaptureFormat::Legacy => self.write_record(timestamp, data),
            CaptureFormat::PcapNg => self.write_enhanced_packet(timestamp, data),
        }
    }

    fn write_record(&mut self, timestamp: DateTime<Utc>, data: &[u8]) {
        let mut record = [0u8; RECORD_HEADER_LEN];
        LittleEndian::write_u32(&mut record[0..4], timestamp.timestamp() as u32);
        LittleEndian::write_u32(&mut record[4..8], timestamp.timestamp_subsec_micros());
        LittleEndian::write_u32(&mut record[8..12], data.len() as u32);
        LittleEndian::write_u32(&mut record[12..16], data.len() as u32);

        self.buffer.extend_from_slice(&record);
        self.buffer.extend_from_slice(data);
    }

    fn write_enhanced_packet(&mut self, timestamp: DateTime<Utc>, data: &[u8]) {
        let padded = (data.len() + 3) & !3;
        let block_len = (32 + padded) as u32;
        let ticks = timestamp.timestamp_micros() as u64;

        let mut header = [0u8; 28];
        LittleEndian::write_u32(&mut header[0..4], EPB_TYPE);
        LittleEndian::write_u32(&mut header[4..8], block_len);
        // Interface 0
        LittleEndian::write_u32(&mut header[12..16], (ticks >> 32) as u32);
        LittleEndian::write_u32(&mut header[16..20], ticks as u32);
        LittleEndian::write_u32(&mut header[20..24], data.len() as u32);
        LittleEndian::write_u32(&mut header[24..28], data.len() as u32);

        self.buffer.extend_from_slice(&header);
        self.buffer.extend_from_slice(data);
        self.buffer.resize(self.buffer.len() + padded - data.len(), 0);
        self.buffer.extend_from_slice(&block_len.to_le_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}
