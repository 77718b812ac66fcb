use super::types::*;
use crate::error::{IngestError, Result};

/// Parsed view over one 188-byte transport packet.
///
/// Only the fields the content reader needs are decoded: the header bits,
/// the adaptation field length and random access flag, the PMT PID
/// referenced by a PAT, and whether the payload starts an audio or video PES.
#[derive(Debug, Clone)]
pub struct TSPacket<'a> {
    data: &'a [u8],
    pub sync_byte: u8,
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
    pub adaptation_field_length: usize,
    pub random_access: bool,
    /// PMT PID announced by a PAT, when this packet starts one
    pub pmt_pid: Option<u16>,
    pub audio_block: bool,
    pub video_block: bool,
    pub keyframe: bool,
}

impl<'a> TSPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() != TS_PACKET_SIZE {
            return Err(IngestError::Framing(format!(
                "TS packet must be {} bytes, got {}",
                TS_PACKET_SIZE,
                data.len()
            )));
        }

        let mut packet = TSPacket {
            data,
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1f) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_control: (data[3] >> 4) & 0x03,
            continuity_counter: data[3] & 0x0f,
            adaptation_field_length: 0,
            random_access: false,
            pmt_pid: None,
            audio_block: false,
            video_block: false,
            keyframe: false,
        };

        if packet.has_adaptation_field() {
            packet.adaptation_field_length = data[4] as usize;
            if packet.adaptation_field_length > 0 {
                packet.random_access = (data[5] & 0x40) != 0;
            }
        }

        if packet.payload_unit_start && packet.has_payload() {
            if packet.pid == PID_PAT {
                packet.pmt_pid = packet.parse_pat_pmt_pid();
            } else if let Some(payload) = packet.payload() {
                if payload.len() >= 4 && payload[..3] == [0x00, 0x00, 0x01] {
                    let stream_id = payload[3];
                    packet.audio_block = stream_id & 0xe0 == STREAM_ID_AUDIO;
                    packet.video_block = stream_id & 0xf0 == STREAM_ID_VIDEO;
                }
            }
        }
        packet.keyframe = packet.video_block && packet.random_access;

        Ok(packet)
    }

    pub fn is_synced(&self) -> bool {
        self.sync_byte == SYNC_BYTE
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    /// Offset of the payload, past the header and any adaptation field.
    pub fn payload_offset(&self) -> usize {
        if self.has_adaptation_field() {
            TS_HEADER_SIZE + 1 + self.adaptation_field_length
        } else {
            TS_HEADER_SIZE
        }
    }

    pub fn payload(&self) -> Option<&'a [u8]> {
        let offset = self.payload_offset();
        if !self.has_payload() || offset >= self.data.len() {
            return None;
        }
        Some(&self.data[offset..])
    }

    pub fn is_pes_start(&self) -> bool {
        self.audio_block || self.video_block
    }

    fn parse_pat_pmt_pid(&self) -> Option<u16> {
        let payload = self.payload()?;
        let pointer = *payload.first()? as usize;
        let section = payload.get(1 + pointer..)?;
        if section.len() < 8 || section[0] != TABLE_ID_PAT {
            return None;
        }
        let section_length = (((section[1] & 0x0f) as usize) << 8) | section[2] as usize;
        // Program loop runs from after the 8-byte section header up to the CRC.
        let end = (3 + section_length).saturating_sub(4).min(section.len());
        let mut pmt_pid = None;
        let mut pos = 8;
        while pos + 4 <= end {
            let program_number = ((section[pos] as u16) << 8) | section[pos + 1] as u16;
            let pid = (((section[pos + 2] & 0x1f) as u16) << 8) | section[pos + 3] as u16;
            if program_number > 0 {
                pmt_pid = Some(pid);
            }
            pos += 4;
        }
        pmt_pid
    }
}
