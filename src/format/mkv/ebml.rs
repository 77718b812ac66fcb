use crate::error::{IngestError, Result};
use bytes::{BufMut, Bytes, BytesMut};

// Element IDs, with their length marker bits
pub const ID_EBML: u64 = 0x1A45_DFA3;
pub const ID_EBML_VERSION: u64 = 0x4286;
pub const ID_EBML_READ_VERSION: u64 = 0x42F7;
pub const ID_EBML_MAX_ID_LENGTH: u64 = 0x42F2;
pub const ID_EBML_MAX_SIZE_LENGTH: u64 = 0x42F3;
pub const ID_DOC_TYPE: u64 = 0x4282;
pub const ID_DOC_TYPE_VERSION: u64 = 0x4287;
pub const ID_DOC_TYPE_READ_VERSION: u64 = 0x4285;
pub const ID_SEGMENT: u64 = 0x1853_8067;
pub const ID_SEEK_HEAD: u64 = 0x114D_9B74;
pub const ID_INFO: u64 = 0x1549_A966;
pub const ID_TRACKS: u64 = 0x1654_AE6B;
pub const ID_CLUSTER: u64 = 0x1F43_B675;
pub const ID_CUES: u64 = 0x1C53_BB6B;
pub const ID_TAGS: u64 = 0x1254_C367;
pub const ID_TIMECODE_SCALE: u64 = 0x2AD7B1;
pub const ID_TIMECODE: u64 = 0xE7;
pub const ID_SIMPLE_BLOCK: u64 = 0xA3;
pub const ID_BLOCK_GROUP: u64 = 0xA0;
pub const ID_VOID: u64 = 0xEC;
pub const ID_CRC32: u64 = 0xBF;

/// EBML variable length integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VInt {
    /// The encoded bytes as read, marker bit included
    pub raw: u64,
    /// The value with the marker bit stripped
    pub value: u64,
    /// Encoded length in bytes, 1 to 8
    pub length: usize,
}

impl VInt {
    pub fn read(input: &[u8]) -> Result<Self> {
        let first = *input.first().ok_or(IngestError::EndOfStream)?;
        if first == 0 {
            return Err(IngestError::InvalidData("vint without length marker".into()));
        }
        let length = first.leading_zeros() as usize + 1;
        if input.len() < length {
            return Err(IngestError::EndOfStream);
        }
        let raw = input[..length]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64);
        Ok(Self {
            raw,
            value: raw & Self::mask(length),
            length,
        })
    }

    /// All value bits set means "size unknown" (live streams).
    pub fn is_unknown(&self) -> bool {
        self.value == Self::mask(self.length)
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.raw.to_be_bytes()[8 - self.length..]);
    }

    fn mask(length: usize) -> u64 {
        (1u64 << (7 * length)) - 1
    }
}

/// ID and size of an element, without its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: VInt,
    pub size: VInt,
}

impl ElementHeader {
    pub fn read(input: &[u8]) -> Result<Self> {
        let id = VInt::read(input)?;
        let size = VInt::read(&input[id.length..])?;
        Ok(Self { id, size })
    }

    pub fn len(&self) -> usize {
        self.id.length + self.size.length
    }

    /// Length of the element with its body, `None` when the size is unknown.
    pub fn total_len(&self) -> Option<usize> {
        if self.size.is_unknown() {
            None
        } else {
            Some(self.len() + self.size.value as usize)
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        self.id.write_to(buf);
        self.size.write_to(buf);
    }
}

/// An element as read from the stream: header bytes, then the body when read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub header: ElementHeader,
    pub raw: Bytes,
}

impl Element {
    /// Reads the element at the start of `input` including its body.
    /// Elements of unknown size carry no body.
    pub fn read(input: &[u8]) -> Result<Self> {
        let header = ElementHeader::read(input)?;
        let len = header.total_len().unwrap_or(header.len());
        if input.len() < len {
            return Err(IngestError::EndOfStream);
        }
        Ok(Self {
            header,
            raw: Bytes::copy_from_slice(&input[..len]),
        })
    }

    /// Reads only the header of the element at the start of `input`.
    pub fn read_header(input: &[u8]) -> Result<Self> {
        let header = ElementHeader::read(input)?;
        Ok(Self {
            header,
            raw: Bytes::copy_from_slice(&input[..header.len()]),
        })
    }

    pub fn id(&self) -> u64 {
        self.header.id.raw
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[self.header.len()..]
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Iterates over the child elements of a fully read body.
pub fn children(body: &[u8]) -> impl Iterator<Item = Result<Element>> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos >= body.len() {
            return None;
        }
        let element = Element::read(&body[pos..]);
        match &element {
            Ok(element) => pos += element.len(),
            Err(_) => pos = body.len(),
        }
        Some(element)
    })
}

pub fn read_uint(data: &[u8]) -> u64 {
    data.iter().take(8).fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Contents of the EBML header element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbmlHeader {
    pub version: u64,
    pub read_version: u64,
    pub max_id_length: usize,
    pub max_size_length: usize,
    pub doc_type: String,
    pub doc_type_version: u64,
    pub doc_type_read_version: u64,
}

impl Default for EbmlHeader {
    fn default() -> Self {
        Self {
            version: 1,
            read_version: 1,
            max_id_length: 4,
            max_size_length: 8,
            doc_type: "matroska".into(),
            doc_type_version: 1,
            doc_type_read_version: 1,
        }
    }
}

impl EbmlHeader {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut header = Self::default();
        for child in children(body) {
            let child =
                child.map_err(|_| IngestError::InvalidData("truncated EBML header".into()))?;
            let data = child.body();
            match child.id() {
                ID_EBML_VERSION => header.version = read_uint(data),
                ID_EBML_READ_VERSION => header.read_version = read_uint(data),
                ID_EBML_MAX_ID_LENGTH => header.max_id_length = read_uint(data) as usize,
                ID_EBML_MAX_SIZE_LENGTH => header.max_size_length = read_uint(data) as usize,
                ID_DOC_TYPE => {
                    header.doc_type = String::from_utf8_lossy(data)
                        .trim_end_matches('\0')
                        .to_string()
                }
                ID_DOC_TYPE_VERSION => header.doc_type_version = read_uint(data),
                ID_DOC_TYPE_READ_VERSION => header.doc_type_read_version = read_uint(data),
                _ => {}
            }
        }
        Ok(header)
    }

    pub fn is_webm(&self) -> bool {
        self.doc_type == "webm"
    }
}
