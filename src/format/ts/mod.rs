//! # MPEG Transport Stream (TS)
//!
//! The reader cuts a transport stream into contents at audio/video PES unit
//! starts and keeps the PAT and PMT aside as the content header.
//!
//! ```rust
//! use peca_ingest::format::ts::{TsPacketWriter, TSPacket, STREAM_ID_VIDEO, STREAM_TYPE_H264};
//!
//! let mut writer = TsPacketWriter::new(0x1000);
//! writer.add_stream(STREAM_TYPE_H264, 0x100);
//!
//! let pat = writer.pat();
//! assert_eq!(TSPacket::parse(&pat).unwrap().pmt_pid, Some(0x1000));
//!
//! let packets = writer.pes(0x100, STREAM_ID_VIDEO, true, &[0u8; 1000]);
//! assert!(TSPacket::parse(&packets[0]).unwrap().keyframe);
//! ```

/// Parsed view over a single transport packet
pub mod packet;

/// Content reader and its factory
pub mod reader;

/// Core TS types and constants
pub mod types;

/// Packetizer for synthesizing streams
pub mod writer;

pub use packet::TSPacket;
pub use reader::{TSContentReader, TSContentReaderFactory};
pub use types::{
    TSHeader, PID_PAT, STREAM_ID_AUDIO, STREAM_ID_VIDEO, STREAM_TYPE_AAC, STREAM_TYPE_H264,
    STREAM_TYPE_H265, SYNC_BYTE, TS_PACKET_SIZE,
};
pub use writer::TsPacketWriter;
