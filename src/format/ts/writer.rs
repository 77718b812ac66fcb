use super::types::*;
use crate::utils::crc::Crc32Mpeg2;
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

/// Minimal single-program transport stream packetizer.
///
/// Produces PAT, PMT and PES packets with per-PID continuity counters.
/// It exists to synthesize streams for the reader (tests and the demo), not
/// to be a general purpose muxer: no PCR, no PTS, and program descriptors only.
/// A PMT section that does not fit in one packet spills into continuation
/// packets.
pub struct TsPacketWriter {
    pmt_pid: u16,
    pmt: PMT,
    version: u8,
    continuity: HashMap<u16, u8>,
    crc: Crc32Mpeg2,
}

impl TsPacketWriter {
    pub fn new(pmt_pid: u16) -> Self {
        Self {
            pmt_pid,
            pmt: PMT::default(),
            version: 0,
            continuity: HashMap::new(),
            crc: Crc32Mpeg2::new(),
        }
    }

    /// Declares an elementary stream in the PMT. The first one carries PCR.
    pub fn add_stream(&mut self, stream_type: u8, elementary_pid: u16) -> &mut Self {
        if self.pmt.elementary_stream_infos.is_empty() {
            self.pmt.pcr_pid = elementary_pid;
        }
        self.pmt.elementary_stream_infos.push(ElementaryStreamInfo {
            stream_type,
            elementary_pid,
        });
        self
    }

    /// Sets the raw program descriptors carried in the PMT. Anything beyond
    /// what a 1021-byte section can hold is cut off.
    pub fn set_program_info(&mut self, descriptors: &[u8]) -> &mut Self {
        let streams = 5 * self.pmt.elementary_stream_infos.len();
        let room = (MAX_SECTION_LENGTH - 9 - 4).saturating_sub(streams);
        self.pmt.program_info = descriptors[..descriptors.len().min(room)].to_vec();
        self
    }

    /// Sets the PMT version number (5 bits).
    pub fn set_version(&mut self, version: u8) {
        self.version = version & 0x1f;
    }

    pub fn pat(&mut self) -> Vec<u8> {
        let pat = PAT {
            entries: vec![PATEntry {
                program_number: 1,
                program_map_pid: self.pmt_pid,
            }],
        };
        let mut body = BytesMut::new();
        pat.write_to(&mut body);
        let section = self.section(TABLE_ID_PAT, 1, 0, &body);
        self.psi_packets(PID_PAT, &section)
    }

    /// One or more PMT packets, concatenated.
    pub fn pmt(&mut self) -> Vec<u8> {
        let mut body = BytesMut::new();
        self.pmt.write_to(&mut body);
        let section = self.section(TABLE_ID_PMT, 1, self.version, &body);
        self.psi_packets(self.pmt_pid, &section)
    }

    /// Packetizes one PES unit. `random_access` sets the adaptation field flag
    /// on the first packet.
    pub fn pes(
        &mut self,
        pid: u16,
        stream_id: u8,
        random_access: bool,
        payload: &[u8],
    ) -> Vec<Vec<u8>> {
        let mut pes = BytesMut::with_capacity(payload.len() + 9);
        pes.put_slice(&[0x00, 0x00, 0x01, stream_id]);
        let length = payload.len() + 3;
        pes.put_u16(if length > 0xffff { 0 } else { length as u16 });
        pes.put_u8(0x80);
        pes.put_u8(0x00);
        pes.put_u8(0x00);
        pes.put_slice(payload);

        let mut packets = Vec::new();
        let mut rest = &pes[..];
        let mut first = true;
        while !rest.is_empty() {
            let (packet, taken) = self.payload_packet(pid, first, first && random_access, rest);
            packets.push(packet);
            rest = &rest[taken..];
            first = false;
        }
        packets
    }

    fn section(&self, table_id: u8, extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
        let section_length = 5 + body.len() + 4;
        let mut buf = BytesMut::with_capacity(3 + section_length);
        buf.put_u8(table_id);
        buf.put_u16(0xb000 | (section_length as u16 & 0x3ff));
        buf.put_u16(extension);
        buf.put_u8(0xc1 | (version << 1));
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_slice(body);
        let crc = self.crc.calculate(&buf);
        buf.put_u32(crc);
        buf.to_vec()
    }

    fn psi_packets(&mut self, pid: u16, section: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        let mut rest = section;
        let mut first = true;
        while first || !rest.is_empty() {
            let end = buf.len() + TS_PACKET_SIZE;
            TSHeader {
                payload_unit_start: first,
                pid,
                continuity_counter: self.next_continuity(pid),
                ..Default::default()
            }
            .write_to(&mut buf);
            if first {
                // Pointer field
                buf.put_u8(0);
            }
            let taken = rest.len().min(end - buf.len());
            buf.put_slice(&rest[..taken]);
            buf.resize(end, 0xff);
            rest = &rest[taken..];
            first = false;
        }
        buf.to_vec()
    }

    fn payload_packet(
        &mut self,
        pid: u16,
        start: bool,
        random_access: bool,
        payload: &[u8],
    ) -> (Vec<u8>, usize) {
        let capacity = TS_PACKET_SIZE - TS_HEADER_SIZE;
        let mut adaptation = Vec::new();
        if random_access {
            adaptation.extend_from_slice(&[0, 0x40]);
        }
        let taken = payload.len().min(capacity - adaptation.len());
        let mut stuffing = capacity - adaptation.len() - taken;
        if stuffing > 0 && adaptation.is_empty() {
            adaptation.push(0);
            stuffing -= 1;
            if stuffing > 0 {
                adaptation.push(0);
                stuffing -= 1;
            }
        }
        adaptation.resize(adaptation.len() + stuffing, 0xff);
        if !adaptation.is_empty() {
            adaptation[0] = (adaptation.len() - 1) as u8;
        }

        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        TSHeader {
            payload_unit_start: start,
            pid,
            adaptation_field_exists: !adaptation.is_empty(),
            contains_payload: taken > 0,
            continuity_counter: self.next_continuity(pid),
            ..Default::default()
        }
        .write_to(&mut buf);
        buf.put_slice(&adaptation);
        buf.put_slice(&payload[..taken]);
        (buf.to_vec(), taken)
    }

    fn next_continuity(&mut self, pid: u16) -> u8 {
        let counter = self.continuity.entry(pid).or_insert(0);
        let value = *counter;
        *counter = (value + 1) & 0x0f;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_packets_are_full_size() {
        let mut writer = TsPacketWriter::new(0x1000);
        writer.add_stream(STREAM_TYPE_H264, 0x100);
        assert_eq!(writer.pat().len(), TS_PACKET_SIZE);
        assert_eq!(writer.pmt().len(), TS_PACKET_SIZE);
        for size in [0usize, 1, 100, 174, 175, 176, 183, 184, 500] {
            for packet in writer.pes(0x100, STREAM_ID_VIDEO, size % 2 == 0, &vec![0xaa; size]) {
                assert_eq!(packet.len(), TS_PACKET_SIZE, "payload size {}", size);
                assert_eq!(packet[0], SYNC_BYTE);
            }
        }
    }

    #[test]
    fn test_sections_carry_valid_crc() {
        let mut writer = TsPacketWriter::new(0x1000);
        writer.add_stream(STREAM_TYPE_AAC, 0x101);
        let pmt = writer.pmt();
        let section_length = (((pmt[6] & 0x0f) as usize) << 8) | pmt[7] as usize;
        let section = &pmt[5..8 + section_length];
        assert!(Crc32Mpeg2::new().verify_section(section));
    }

    #[test]
    fn test_continuity_counter_wraps_per_pid() {
        let mut writer = TsPacketWriter::new(0x1000);
        let mut last = 0;
        for _ in 0..17 {
            last = writer.pat()[3] & 0x0f;
        }
        assert_eq!(last, 0);
        assert_eq!(writer.pmt()[3] & 0x0f, 0);
    }

    #[test]
    fn test_long_pmt_spills_into_continuation() {
        let mut writer = TsPacketWriter::new(0x1000);
        writer.add_stream(STREAM_TYPE_H264, 0x100);
        writer.set_program_info(&[0x55; 250]);
        let pmt = writer.pmt();
        assert_eq!(pmt.len(), 2 * TS_PACKET_SIZE);

        let (first, second) = pmt.split_at(TS_PACKET_SIZE);
        assert_eq!(first[1] & 0x40, 0x40);
        assert_eq!(second[1] & 0x40, 0);
        assert_eq!(&second[1..3], &[0x10, 0x00]);
        assert_eq!(second[3] & 0x0f, (first[3] & 0x0f) + 1);

        let mut section = first[5..].to_vec();
        section.extend_from_slice(&second[4..]);
        let section_length = (((section[1] & 0x0f) as usize) << 8) | section[2] as usize;
        assert_eq!(section_length, 9 + 4 + 250 + 5);
        assert!(Crc32Mpeg2::new().verify_section(&section[..3 + section_length]));
    }

    #[test]
    fn test_program_info_is_capped_to_one_section() {
        let mut writer = TsPacketWriter::new(0x1000);
        writer.add_stream(STREAM_TYPE_AAC, 0x101);
        writer.set_program_info(&[0x55; 4000]);
        let pmt = writer.pmt();
        let section_length = (((pmt[6] & 0x0f) as usize) << 8) | pmt[7] as usize;
        assert_eq!(section_length, MAX_SECTION_LENGTH);
        assert_eq!(pmt.len() % TS_PACKET_SIZE, 0);
    }
}
