use crate::av::info::{set_stream_format, ExtraFields, INFO_BITRATE};
use crate::av::ChannelInfo;
use crate::error::{IngestError, Result};
use bytes::Buf;

/// ASF GUID in its on-disk (mixed endian) byte order.
pub type Guid = [u8; 16];

pub const GUID_HEADER_OBJECT: Guid = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];
pub const GUID_FILE_PROPERTIES: Guid = [
    0xA1, 0xDC, 0xAB, 0x8C, 0x47, 0xA9, 0xCF, 0x11, 0x8E, 0xE4, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65,
];
pub const GUID_STREAM_PROPERTIES: Guid = [
    0x91, 0x07, 0xDC, 0xB7, 0xB7, 0xA9, 0xCF, 0x11, 0x8E, 0xE6, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65,
];
pub const GUID_STREAM_BITRATE_PROPERTIES: Guid = [
    0xCE, 0x75, 0xF8, 0x7B, 0x8D, 0x46, 0xD1, 0x11, 0x8D, 0x82, 0x00, 0x60, 0x97, 0xC9, 0xA2, 0xB2,
];
pub const GUID_STREAM_TYPE_VIDEO: Guid = [
    0xC0, 0xEF, 0x19, 0xBC, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
];
pub const GUID_STREAM_TYPE_AUDIO: Guid = [
    0x40, 0x9E, 0x69, 0xF8, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
];

const OBJECT_HEADER_SIZE: usize = 24;

// Offset of Maximum Bitrate within the File Properties data
const FILE_PROPERTIES_MAX_BITRATE: usize = 76;

/// One ASF object: GUID, then a 64-bit size covering the whole object.
#[derive(Debug, Clone, Copy)]
pub struct AsfObject<'a> {
    pub guid: Guid,
    pub data: &'a [u8],
}

impl<'a> AsfObject<'a> {
    /// Reads the object at the start of `input`, returning it and the rest.
    pub fn read(input: &'a [u8]) -> Result<(Self, &'a [u8])> {
        if input.len() < OBJECT_HEADER_SIZE {
            return Err(IngestError::InvalidData("truncated ASF object".into()));
        }
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&input[..16]);
        let size = (&input[16..24]).get_u64_le() as usize;
        if size < OBJECT_HEADER_SIZE || size > input.len() {
            return Err(IngestError::InvalidData(format!("bad ASF object size {}", size)));
        }
        Ok((
            Self {
                guid,
                data: &input[OBJECT_HEADER_SIZE..size],
            },
            &input[size..],
        ))
    }
}

/// The parts of an ASF header object that describe the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsfHeader {
    pub has_video: bool,
    pub has_audio: bool,
    /// Average bitrates from Stream Bitrate Properties, bits per second
    pub stream_bitrates: Option<Vec<u32>>,
    /// Maximum bitrate from File Properties, bits per second
    pub max_bitrate: Option<u32>,
}

impl AsfHeader {
    /// Parses a top-level header object.
    pub fn parse(input: &[u8]) -> Result<Self> {
        let (object, _) = AsfObject::read(input)?;
        if object.guid != GUID_HEADER_OBJECT {
            return Err(IngestError::InvalidData("not an ASF header object".into()));
        }
        if object.data.len() < 6 {
            return Err(IngestError::InvalidData("truncated ASF header object".into()));
        }
        let count = (&object.data[..4]).get_u32_le();
        // Two reserved bytes follow the object count.
        let mut rest = &object.data[6..];

        let mut header = Self::default();
        for _ in 0..count {
            let (child, next) = AsfObject::read(rest)?;
            rest = next;
            match child.guid {
                GUID_STREAM_PROPERTIES if child.data.len() >= 16 => {
                    let stream_type = &child.data[..16];
                    if stream_type == &GUID_STREAM_TYPE_VIDEO[..] {
                        header.has_video = true;
                    } else if stream_type == &GUID_STREAM_TYPE_AUDIO[..] {
                        header.has_audio = true;
                    }
                }
                GUID_STREAM_BITRATE_PROPERTIES => {
                    header.stream_bitrates = Some(Self::parse_bitrates(child.data)?);
                }
                GUID_FILE_PROPERTIES if child.data.len() >= FILE_PROPERTIES_MAX_BITRATE + 4 => {
                    let mut data = &child.data[FILE_PROPERTIES_MAX_BITRATE..];
                    header.max_bitrate = Some(data.get_u32_le());
                }
                _ => {}
            }
        }
        Ok(header)
    }

    fn parse_bitrates(data: &[u8]) -> Result<Vec<u32>> {
        let mut data = data;
        if data.remaining() < 2 {
            return Err(IngestError::InvalidData("truncated bitrate properties".into()));
        }
        let count = data.get_u16_le() as usize;
        if data.remaining() < count * 6 {
            return Err(IngestError::InvalidData("truncated bitrate records".into()));
        }
        Ok((0..count)
            .map(|_| {
                let _flags = data.get_u16_le();
                data.get_u32_le()
            })
            .collect())
    }

    /// "WMV" when any stream is video, "WMA" when there is only audio.
    pub fn content_type(&self) -> &'static str {
        if self.has_video {
            "WMV"
        } else if self.has_audio {
            "WMA"
        } else {
            "ASF"
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self.content_type() {
            "WMV" => "video/x-ms-wmv",
            "WMA" => "audio/x-ms-wma",
            _ => "video/x-ms-asf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.content_type() {
            "WMV" => ".wmv",
            "WMA" => ".wma",
            _ => ".asf",
        }
    }

    /// Bitrate in kbps: the sum of the stream bitrates, else the file maximum.
    pub fn bitrate(&self) -> Option<i32> {
        match (&self.stream_bitrates, self.max_bitrate) {
            (Some(rates), _) => Some((rates.iter().map(|&r| r as u64).sum::<u64>() / 1000) as i32),
            (None, Some(max)) => Some((max / 1000) as i32),
            (None, None) => None,
        }
    }

    pub fn channel_info(&self) -> ChannelInfo {
        let mut fields = ExtraFields::new();
        set_stream_format(&mut fields, self.content_type(), self.mime_type(), self.extension());
        if let Some(bitrate) = self.bitrate() {
            fields.set_int(INFO_BITRATE, bitrate);
        }
        ChannelInfo::new(fields)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub fn object(guid: &Guid, data: &[u8]) -> Vec<u8> {
        let mut out = guid.to_vec();
        out.extend_from_slice(&((OBJECT_HEADER_SIZE + data.len()) as u64).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    pub fn stream_properties(stream_type: &Guid) -> Vec<u8> {
        let mut data = stream_type.to_vec();
        data.extend_from_slice(&[0u8; 16 + 8 + 4 + 4 + 2 + 4]);
        object(&GUID_STREAM_PROPERTIES, &data)
    }

    pub fn file_properties(max_bitrate: u32) -> Vec<u8> {
        let mut data = vec![0u8; FILE_PROPERTIES_MAX_BITRATE];
        data.extend_from_slice(&max_bitrate.to_le_bytes());
        object(&GUID_FILE_PROPERTIES, &data)
    }

    pub fn bitrate_properties(rates: &[u32]) -> Vec<u8> {
        let mut data = (rates.len() as u16).to_le_bytes().to_vec();
        for (i, rate) in rates.iter().enumerate() {
            data.extend_from_slice(&(i as u16 + 1).to_le_bytes());
            data.extend_from_slice(&rate.to_le_bytes());
        }
        object(&GUID_STREAM_BITRATE_PROPERTIES, &data)
    }

    pub fn header_object(children: &[Vec<u8>]) -> Vec<u8> {
        let mut data = (children.len() as u32).to_le_bytes().to_vec();
        data.extend_from_slice(&[0x01, 0x02]);
        for child in children {
            data.extend_from_slice(child);
        }
        object(&GUID_HEADER_OBJECT, &data)
    }

    #[test]
    fn test_video_with_bitrate_records() {
        let data = header_object(&[
            file_properties(512_000),
            stream_properties(&GUID_STREAM_TYPE_AUDIO),
            stream_properties(&GUID_STREAM_TYPE_VIDEO),
            bitrate_properties(&[64_000, 300_000]),
        ]);
        let header = AsfHeader::parse(&data).unwrap();
        assert_eq!(header.content_type(), "WMV");
        assert_eq!(header.bitrate(), Some(364));

        let info = header.channel_info();
        assert_eq!(info.content_type(), Some("WMV"));
        assert_eq!(info.mime_type(), "video/x-ms-wmv");
        assert_eq!(info.content_extension(), ".wmv");
        assert_eq!(info.bitrate(), 364);
    }

    #[test]
    fn test_audio_only_uses_file_bitrate() {
        let data = header_object(&[
            file_properties(128_000),
            stream_properties(&GUID_STREAM_TYPE_AUDIO),
        ]);
        let header = AsfHeader::parse(&data).unwrap();
        assert_eq!(header.content_type(), "WMA");
        assert_eq!(header.mime_type(), "audio/x-ms-wma");
        assert_eq!(header.bitrate(), Some(128));
    }

    #[test]
    fn test_no_streams_is_asf() {
        let header = AsfHeader::parse(&header_object(&[])).unwrap();
        assert_eq!(header.content_type(), "ASF");
        assert_eq!(header.extension(), ".asf");
        assert_eq!(header.bitrate(), None);
    }

    #[test]
    fn test_bad_object_size() {
        let mut data = header_object(&[file_properties(1)]);
        data[16] = 0xff;
        assert!(matches!(AsfHeader::parse(&data), Err(IngestError::InvalidData(_))));
    }
}
