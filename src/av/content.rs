use bytes::Bytes;
use std::time::Duration;

/// A unit of demuxed stream data handed to a [`ContentSink`](super::ContentSink).
///
/// Content headers share this shape: a header marks the point from which a
/// receiver can start decoding, and resets the position continuity expected
/// of the contents that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Logical sub-stream this packet belongs to
    pub stream: u32,
    /// Time elapsed since the stream origin
    pub timestamp: Duration,
    /// Byte offset of `data` within the logical output stream
    pub position: u64,
    /// Packet payload
    pub data: Bytes,
}

impl Content {
    pub fn new(stream: u32, timestamp: Duration, position: u64, data: impl Into<Bytes>) -> Self {
        Self {
            stream,
            timestamp,
            position,
            data: data.into(),
        }
    }

    /// A zero-length packet, used to announce a stream before any data.
    pub fn empty(stream: u32, timestamp: Duration, position: u64) -> Self {
        Self::new(stream, timestamp, position, Bytes::new())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Position of the first byte following this packet.
    pub fn end_position(&self) -> u64 {
        self.position + self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_position() {
        let content = Content::new(1, Duration::ZERO, 100, vec![0u8; 188]);
        assert_eq!(content.end_position(), 288);
        assert_eq!(content.len(), 188);
        assert!(Content::empty(1, Duration::ZERO, 5).is_empty());
    }
}
