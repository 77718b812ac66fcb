use bytes::Bytes;
use std::fmt;

/// Four character identifier of a channel metadata field.
///
/// Field identifiers are open-ended: collections carry keys they do not
/// know about untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId([u8; 4]);

impl FieldId {
    /// Builds an identifier from up to four ASCII bytes, zero padded.
    pub const fn new(name: &[u8]) -> Self {
        let mut id = [0u8; 4];
        let mut i = 0;
        while i < name.len() && i < 4 {
            id[i] = name[i];
            i += 1;
        }
        FieldId(id)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(4);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

// Channel info fields
pub const INFO_NAME: FieldId = FieldId::new(b"name");
pub const INFO_TYPE: FieldId = FieldId::new(b"type");
pub const INFO_BITRATE: FieldId = FieldId::new(b"bitr");
pub const INFO_GENRE: FieldId = FieldId::new(b"gnre");
pub const INFO_URL: FieldId = FieldId::new(b"url");
pub const INFO_DESC: FieldId = FieldId::new(b"desc");
pub const INFO_COMMENT: FieldId = FieldId::new(b"cmnt");
pub const INFO_STREAM_TYPE: FieldId = FieldId::new(b"styp");
pub const INFO_STREAM_EXT: FieldId = FieldId::new(b"sext");

// Channel track fields
pub const TRACK_TITLE: FieldId = FieldId::new(b"titl");
pub const TRACK_CREATOR: FieldId = FieldId::new(b"crea");
pub const TRACK_URL: FieldId = FieldId::new(b"url");
pub const TRACK_ALBUM: FieldId = FieldId::new(b"albm");
pub const TRACK_GENRE: FieldId = FieldId::new(b"gnre");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i32),
    Str(String),
    Bytes(Bytes),
}

/// Ordered, mutable association list of metadata fields.
///
/// Setting an existing key replaces its value in place, so the original
/// ordering survives updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    entries: Vec<(FieldId, FieldValue)>,
}

impl ExtraFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| *k == id).map(|(_, v)| v)
    }

    pub fn get_str(&self, id: FieldId) -> Option<&str> {
        match self.get(id) {
            Some(FieldValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, id: FieldId) -> Option<i32> {
        match self.get(id) {
            Some(FieldValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn set(&mut self, id: FieldId, value: FieldValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == id) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((id, value)),
        }
    }

    pub fn set_str(&mut self, id: FieldId, value: impl Into<String>) {
        self.set(id, FieldValue::Str(value.into()));
    }

    pub fn set_int(&mut self, id: FieldId, value: i32) {
        self.set(id, FieldValue::Int(value));
    }

    pub fn remove(&mut self, id: FieldId) -> Option<FieldValue> {
        let index = self.entries.iter().position(|(k, _)| *k == id)?;
        Some(self.entries.remove(index).1)
    }

    /// Copies every field of `other` into this collection.
    pub fn update(&mut self, other: &ExtraFields) {
        for (id, value) in other.iter() {
            self.set(*id, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(FieldId, FieldValue)> {
        self.entries.iter()
    }
}

/// Immutable channel metadata snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    extra: ExtraFields,
}

impl ChannelInfo {
    pub fn new(extra: ExtraFields) -> Self {
        Self { extra }
    }

    pub fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    /// A mutable copy of the fields, for building a replacement snapshot.
    pub fn to_fields(&self) -> ExtraFields {
        self.extra.clone()
    }

    pub fn name(&self) -> Option<&str> {
        self.extra.get_str(INFO_NAME)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.extra.get_str(INFO_TYPE)
    }

    pub fn genre(&self) -> Option<&str> {
        self.extra.get_str(INFO_GENRE)
    }

    pub fn desc(&self) -> Option<&str> {
        self.extra.get_str(INFO_DESC)
    }

    pub fn comment(&self) -> Option<&str> {
        self.extra.get_str(INFO_COMMENT)
    }

    pub fn url(&self) -> Option<&str> {
        self.extra.get_str(INFO_URL)
    }

    /// Bitrate in kbps, 0 when unknown.
    pub fn bitrate(&self) -> i32 {
        self.extra.get_int(INFO_BITRATE).unwrap_or(0)
    }

    /// MIME type of the stream. Falls back to a table keyed by content type.
    pub fn mime_type(&self) -> &str {
        match self.extra.get_str(INFO_STREAM_TYPE) {
            Some(mime) if !mime.is_empty() => mime,
            _ => match self.content_type() {
                Some("MP3") => "audio/mpeg",
                Some("OGG") => "audio/ogg",
                Some("OGM") => "video/ogg",
                Some("RAW") => "application/octet-stream",
                Some("NSV") => "video/nsv",
                Some("WMA") => "audio/x-ms-wma",
                Some("WMV") => "video/x-ms-wmv",
                Some("PLS") => "audio/mpegurl",
                Some("M3U") => "audio/m3u",
                Some("ASX") => "video/x-ms-asf",
                _ => "application/octet-stream",
            },
        }
    }

    /// File extension of the stream, including the leading dot.
    pub fn content_extension(&self) -> &str {
        match self.extra.get_str(INFO_STREAM_EXT) {
            Some(ext) if !ext.is_empty() => ext,
            _ => match self.content_type() {
                Some("MP3") => ".mp3",
                Some("OGG") => ".ogg",
                Some("OGM") => ".ogv",
                Some("NSV") => ".nsv",
                Some("WMA") => ".wma",
                Some("WMV") => ".wmv",
                Some("PLS") => ".pls",
                Some("M3U") => ".m3u",
                Some("ASX") => ".asx",
                _ => "",
            },
        }
    }
}

/// Immutable track metadata snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTrack {
    extra: ExtraFields,
}

impl ChannelTrack {
    pub fn new(extra: ExtraFields) -> Self {
        Self { extra }
    }

    pub fn extra(&self) -> &ExtraFields {
        &self.extra
    }

    pub fn title(&self) -> Option<&str> {
        self.extra.get_str(TRACK_TITLE)
    }

    pub fn creator(&self) -> Option<&str> {
        self.extra.get_str(TRACK_CREATOR)
    }

    pub fn album(&self) -> Option<&str> {
        self.extra.get_str(TRACK_ALBUM)
    }

    pub fn genre(&self) -> Option<&str> {
        self.extra.get_str(TRACK_GENRE)
    }

    pub fn url(&self) -> Option<&str> {
        self.extra.get_str(TRACK_URL)
    }
}

/// Sets the content type, MIME type and extension fields in one go.
pub fn set_stream_format(fields: &mut ExtraFields, content_type: &str, mime: &str, ext: &str) {
    fields.set_str(INFO_TYPE, content_type);
    fields.set_str(INFO_STREAM_TYPE, mime);
    fields.set_str(INFO_STREAM_EXT, ext);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_keeps_order() {
        let mut fields = ExtraFields::new();
        fields.set_str(INFO_NAME, "test");
        fields.set_int(INFO_BITRATE, 500);
        fields.set_str(INFO_NAME, "renamed");

        let keys: Vec<String> = fields.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["name", "bitr"]);
        assert_eq!(fields.get_str(INFO_NAME), Some("renamed"));
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let custom = FieldId::new(b"xyzw");
        let mut fields = ExtraFields::new();
        fields.set(custom, FieldValue::Bytes(Bytes::from_static(b"\x01\x02")));

        let mut merged = ExtraFields::new();
        merged.set_str(INFO_TYPE, "TS");
        merged.update(&fields);

        assert_eq!(
            merged.get(custom),
            Some(&FieldValue::Bytes(Bytes::from_static(b"\x01\x02")))
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_mime_type_fallback() {
        let mut fields = ExtraFields::new();
        fields.set_str(INFO_TYPE, "WMV");
        let info = ChannelInfo::new(fields.clone());
        assert_eq!(info.mime_type(), "video/x-ms-wmv");
        assert_eq!(info.content_extension(), ".wmv");

        fields.set_str(INFO_STREAM_TYPE, "video/x-ms-asf");
        let info = ChannelInfo::new(fields);
        assert_eq!(info.mime_type(), "video/x-ms-asf");
    }

    #[test]
    fn test_unknown_content_type() {
        let info = ChannelInfo::default();
        assert_eq!(info.mime_type(), "application/octet-stream");
        assert_eq!(info.content_extension(), "");
        assert_eq!(info.bitrate(), 0);
    }

    #[test]
    fn test_short_field_id_display() {
        assert_eq!(INFO_URL.to_string(), "url");
        assert_eq!(INFO_URL.as_bytes(), b"url\0");
    }
}
