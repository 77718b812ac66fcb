use super::parser::{sniff_doc_type, MkvParser, ParsedContent};
use crate::av::info::{set_stream_format, INFO_BITRATE};
use crate::av::{ChannelContext, ChannelInfo, Content, ContentSink};
use crate::error::Result;
use crate::format::{read_some, ContentReader, ContentReaderFactory, ContentTypeMatch, ReadOutcome};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use log::debug;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const READER_NAME: &str = "Matroska (MKV or WebM)";

fn stream_format(webm: bool) -> (&'static str, &'static str, &'static str) {
    if webm {
        ("WEBM", "video/webm", ".webm")
    } else {
        ("MKV", "video/x-matroska", ".mkv")
    }
}

/// Splits a Matroska or WebM stream into its header and one content per
/// top-level element.
pub struct MKVContentReader {
    channel: Arc<dyn ChannelContext>,
    parser: MkvParser,
    stream: u32,
    position: u64,
    bitrate: Option<i32>,
}

impl MKVContentReader {
    pub fn new(channel: Arc<dyn ChannelContext>) -> Self {
        Self {
            channel,
            parser: MkvParser::new(),
            stream: 0,
            position: 0,
            bitrate: None,
        }
    }

    async fn deliver(&mut self, sink: &dyn ContentSink, parsed: ParsedContent, origin: Instant) {
        if let Some(bitrate) = parsed.bitrate {
            self.bitrate = Some(bitrate);
        }
        if parsed.content_header.is_some() || parsed.bitrate.is_some() {
            sink.on_channel_info(self.channel_info()).await;
        }
        if let Some(header) = parsed.content_header {
            self.stream = self.channel.generate_stream_id();
            self.position = 0;
            debug!(
                "{}: header of {} bytes, doc type {}",
                READER_NAME,
                header.len(),
                self.parser.doc_type()
            );
            let header = Content::new(self.stream, origin.elapsed(), self.position, header);
            self.position = header.end_position();
            sink.on_content_header(header).await;
        }
        for data in parsed.contents {
            let content = Content::new(self.stream, origin.elapsed(), self.position, data);
            self.position = content.end_position();
            sink.on_content(content).await;
        }
    }

    fn channel_info(&self) -> ChannelInfo {
        let mut fields = self.channel.channel_info().to_fields();
        let (content_type, mime, ext) = stream_format(self.parser.is_webm());
        set_stream_format(&mut fields, content_type, mime, ext);
        if let Some(bitrate) = self.bitrate {
            fields.set_int(INFO_BITRATE, bitrate);
        }
        ChannelInfo::new(fields)
    }

    async fn run(
        &mut self,
        sink: &dyn ContentSink,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        cancel: &CancellationToken,
    ) -> Result<()> {
        let origin = Instant::now();
        let mut buf = BytesMut::with_capacity(64 * 1024);
        loop {
            read_some(stream, &mut buf, cancel).await?;
            loop {
                let parsed = match self.parser.parse(&buf) {
                    Ok(parsed) => parsed,
                    Err(err) if err.is_end_of_stream() => break,
                    Err(err) => return Err(err),
                };
                buf.advance(parsed.consumed);
                let done = parsed.consumed == 0;
                self.deliver(sink, parsed, origin).await;
                if done || buf.is_empty() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ContentReader for MKVContentReader {
    fn name(&self) -> &'static str {
        READER_NAME
    }

    async fn read(
        &mut self,
        sink: &dyn ContentSink,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        cancel: &CancellationToken,
    ) -> ReadOutcome {
        let outcome = match self.run(sink, stream, cancel).await {
            Ok(()) => ReadOutcome::EndOfStream,
            Err(err) => ReadOutcome::from(err),
        };
        debug!("{}: read loop ended: {:?}", READER_NAME, outcome);
        outcome
    }
}

/// Creates [`MKVContentReader`]s and recognizes EBML streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct MKVContentReaderFactory;

impl ContentReaderFactory for MKVContentReaderFactory {
    fn name(&self) -> &'static str {
        READER_NAME
    }

    fn create(&self, channel: Arc<dyn ChannelContext>) -> Box<dyn ContentReader> {
        Box::new(MKVContentReader::new(channel))
    }

    fn try_parse_content_type(&self, header: &[u8]) -> Option<ContentTypeMatch> {
        let doc_type = sniff_doc_type(header)?;
        let (content_type, mime, _) = stream_format(doc_type == "webm");
        Some(ContentTypeMatch::new(content_type, mime))
    }
}
