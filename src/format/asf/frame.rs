use crate::error::{IngestError, Result};
use crate::format::read_exact;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

pub const FRAME_HEADER_SIZE: usize = 4;
const MMS_HEADER_SIZE: usize = 8;

/// WMSP frame type, from the two type characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// `$H`: ASF header
    Header,
    /// `$D`: data packet
    Data,
    /// `$C`: stream change
    StreamChange,
    /// `$M`: metadata
    Metadata,
    /// `$E`: end of stream
    End,
    /// `$P`: pause
    Pause,
    Other([u8; 2]),
}

impl FrameType {
    fn from_bytes(first: u8, second: u8) -> Self {
        match (first & 0x7f, second) {
            (b'$', b'H') => FrameType::Header,
            (b'$', b'D') => FrameType::Data,
            (b'$', b'C') => FrameType::StreamChange,
            (b'$', b'M') => FrameType::Metadata,
            (b'$', b'E') => FrameType::End,
            (b'$', b'P') => FrameType::Pause,
            (a, b) => FrameType::Other([a, b]),
        }
    }

    /// Frames carrying a reason code before their payload.
    fn has_reason(&self) -> bool {
        matches!(self, FrameType::StreamChange | FrameType::End | FrameType::Pause)
    }

    /// Frames carrying an MMS data packet.
    fn has_mms_packet(&self) -> bool {
        matches!(self, FrameType::Header | FrameType::Data | FrameType::Metadata)
    }
}

/// One frame of WMSP (HTTP streaming of ASF):
/// `[type | 0x80 flag][type][u16 LE length][length bytes]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WmspFrame {
    raw: Bytes,
    frame_type: FrameType,
}

impl WmspFrame {
    fn new(raw: Bytes) -> Self {
        let frame_type = FrameType::from_bytes(raw[0], raw[1]);
        Self { raw, frame_type }
    }

    /// Reads a frame from the start of `input`, returning it and the bytes
    /// consumed. `EndOfStream` when `input` does not hold the whole frame.
    pub fn parse(input: &[u8]) -> Result<(Self, usize)> {
        if input.len() < FRAME_HEADER_SIZE {
            return Err(IngestError::EndOfStream);
        }
        let length = (&input[2..4]).get_u16_le() as usize;
        let total = FRAME_HEADER_SIZE + length;
        if input.len() < total {
            return Err(IngestError::EndOfStream);
        }
        Ok((Self::new(Bytes::copy_from_slice(&input[..total])), total))
    }

    /// Reads the next frame from a stream.
    pub async fn read(
        stream: &mut (dyn AsyncRead + Unpin + Send),
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        read_exact(stream, &mut header, cancel).await?;
        let length = (&header[2..4]).get_u16_le() as usize;
        let mut raw = BytesMut::zeroed(FRAME_HEADER_SIZE + length);
        raw[..FRAME_HEADER_SIZE].copy_from_slice(&header);
        read_exact(stream, &mut raw[FRAME_HEADER_SIZE..], cancel).await?;
        Ok(Self::new(raw.freeze()))
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// The B flag on the first type byte.
    pub fn b_flag(&self) -> bool {
        self.raw[0] & 0x80 != 0
    }

    pub fn length(&self) -> usize {
        self.raw.len() - FRAME_HEADER_SIZE
    }

    /// The whole frame as read, header included.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn reason(&self) -> Option<i32> {
        if self.frame_type.has_reason() && self.raw.len() >= FRAME_HEADER_SIZE + 4 {
            Some((&self.raw[FRAME_HEADER_SIZE..]).get_i32_le())
        } else {
            None
        }
    }

    pub fn payload(&self) -> &[u8] {
        let body = &self.raw[FRAME_HEADER_SIZE..];
        if self.frame_type.has_reason() {
            body.get(4..).unwrap_or_default()
        } else {
            body
        }
    }

    /// Payload of the MMS data packet inside `$H`, `$D` and `$M` frames.
    pub fn mms_payload(&self) -> Result<&[u8]> {
        if !self.frame_type.has_mms_packet() {
            return Err(IngestError::InvalidData(format!(
                "{:?} frame has no MMS packet",
                self.frame_type
            )));
        }
        let packet = &self.raw[FRAME_HEADER_SIZE..];
        if packet.len() < MMS_HEADER_SIZE {
            return Err(IngestError::InvalidData("truncated MMS packet".into()));
        }
        let length = (&packet[6..8]).get_u16_le() as usize;
        packet
            .get(MMS_HEADER_SIZE..length)
            .ok_or_else(|| IngestError::InvalidData(format!("bad MMS packet length {}", length)))
    }
}
