use super::frame::{FrameType, WmspFrame};
use super::objects::AsfHeader;
use crate::av::{ChannelContext, ChannelInfo, Content, ContentSink};
use crate::error::Result;
use crate::format::{ContentReader, ContentReaderFactory, ContentTypeMatch, ReadOutcome};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const READER_NAME: &str = "ASF(WMV or WMA)";

/// Frames inspected when sniffing for a `$H` frame.
const SNIFF_FRAMES: usize = 8;

/// Channel info described by the ASF header inside a `$H` frame.
pub fn parse_channel_info(frame: &WmspFrame) -> Result<ChannelInfo> {
    Ok(AsfHeader::parse(frame.mms_payload()?)?.channel_info())
}

/// Relays WMSP framed ASF: `$H` frames become headers, `$D`, `$C` and `$M`
/// frames become contents, and `$E` ends the stream.
pub struct ASFContentReader {
    channel: Arc<dyn ChannelContext>,
}

impl ASFContentReader {
    pub fn new(channel: Arc<dyn ChannelContext>) -> Self {
        Self { channel }
    }

    async fn run(
        &mut self,
        sink: &dyn ContentSink,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        cancel: &CancellationToken,
    ) -> Result<()> {
        let origin = Instant::now();
        let mut current: Option<u32> = None;
        let mut position = 0u64;
        loop {
            let frame = WmspFrame::read(stream, cancel).await?;
            match frame.frame_type() {
                FrameType::Header => {
                    let info = parse_channel_info(&frame)?;
                    let stream = self.channel.generate_stream_id();
                    info!(
                        "{}: new stream {}, {} at {} kbps",
                        READER_NAME,
                        stream,
                        info.content_type().unwrap_or("ASF"),
                        info.bitrate()
                    );
                    current = Some(stream);
                    sink.on_channel_info(info).await;
                    let header = Content::new(stream, origin.elapsed(), 0, frame.raw().clone());
                    position = header.end_position();
                    sink.on_content_header(header).await;
                }
                FrameType::Data | FrameType::StreamChange | FrameType::Metadata => {
                    if let Some(stream) = current {
                        let content =
                            Content::new(stream, origin.elapsed(), position, frame.raw().clone());
                        position = content.end_position();
                        sink.on_content(content).await;
                    }
                }
                FrameType::End => {
                    debug!("{}: end frame, reason {:?}", READER_NAME, frame.reason());
                    return Ok(());
                }
                other => debug!("{}: ignoring {:?} frame", READER_NAME, other),
            }
        }
    }
}

#[async_trait]
impl ContentReader for ASFContentReader {
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

/// Creates [`ASFContentReader`]s and recognizes WMSP framed ASF.
#[derive(Debug, Clone, Copy, Default)]
pub struct ASFContentReaderFactory;

impl ContentReaderFactory for ASFContentReaderFactory {
    fn name(&self) -> &'static str {
        READER_NAME
    }

    fn create(&self, channel: Arc<dyn ChannelContext>) -> Box<dyn ContentReader> {
        Box::new(ASFContentReader::new(channel))
    }

    fn try_parse_content_type(&self, header: &[u8]) -> Option<ContentTypeMatch> {
        let mut rest = header;
        for _ in 0..SNIFF_FRAMES {
            let (frame, consumed) = WmspFrame::parse(rest).ok()?;
            rest = &rest[consumed..];
            if frame.frame_type() != FrameType::Header {
                continue;
            }
            let info = parse_channel_info(&frame).ok()?;
            return Some(ContentTypeMatch::new(
                info.content_type().unwrap_or("ASF"),
                info.mime_type(),
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{Channel, CollectingSink};
    use crate::error::IngestError;
    use crate::format::asf::frame::tests::{frame, mms_frame};
    use crate::format::asf::objects::tests::*;
    use crate::format::asf::objects::{GUID_STREAM_TYPE_AUDIO, GUID_STREAM_TYPE_VIDEO};
    use pretty_assertions::assert_eq;

    fn video_header() -> Vec<u8> {
        mms_frame(
            b'H',
            &header_object(&[
                file_properties(800_000),
                stream_properties(&GUID_STREAM_TYPE_VIDEO),
                stream_properties(&GUID_STREAM_TYPE_AUDIO),
            ]),
        )
    }

    async fn read(data: &[u8]) -> (CollectingSink, ReadOutcome) {
        let mut stream = data;
        let sink = CollectingSink::new();
        let mut reader = ASFContentReader::new(Arc::new(Channel::new()));
        let outcome = reader.read(&sink, &mut stream, &CancellationToken::new()).await;
        (sink, outcome)
    }

    #[tokio::test]
    async fn test_header_and_data_frames() {
        let header = video_header();
        let data1 = mms_frame(b'D', &[1u8; 100]);
        let data2 = mms_frame(b'D', &[2u8; 50]);
        let mut input = header.clone();
        input.extend(&data1);
        input.extend(&data2);
        input.extend(frame(b'E', &[0, 0, 0, 0]));
        input.extend(mms_frame(b'D', &[3u8; 10]));

        let (sink, outcome) = read(&input).await;
        assert!(outcome.is_end_of_stream());

        let infos = sink.channel_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].content_type(), Some("WMV"));
        assert_eq!(infos[0].bitrate(), 800);

        let headers = sink.headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].position, 0);
        assert_eq!(&headers[0].data[..], &header[..]);

        // Nothing after $E is read.
        let contents = sink.contents();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].position, header.len() as u64);
        assert_eq!(contents[1].position, (header.len() + data1.len()) as u64);
        assert_eq!(&contents[1].data[..], &data2[..]);
    }

    #[tokio::test]
    async fn test_data_before_header_is_dropped() {
        let mut input = mms_frame(b'D', &[9u8; 20]);
        input.extend(video_header());
        input.extend(mms_frame(b'D', &[1u8; 20]));
        let (sink, outcome) = read(&input).await;
        assert!(outcome.is_end_of_stream());
        assert_eq!(sink.contents().len(), 1);
        assert_eq!(sink.contents()[0].data[4 + 8], 1);
    }

    #[tokio::test]
    async fn test_second_header_resets_position() {
        let mut input = video_header();
        input.extend(mms_frame(b'D', &[1u8; 20]));
        input.extend(video_header());
        input.extend(mms_frame(b'D', &[2u8; 20]));
        let (sink, _) = read(&input).await;

        let headers = sink.headers();
        assert_eq!(headers.len(), 2);
        assert_ne!(headers[0].stream, headers[1].stream);
        assert_eq!(headers[1].position, 0);
        assert_eq!(sink.contents()[1].stream, headers[1].stream);
        assert_eq!(sink.contents()[1].position, headers[1].len() as u64);
    }

    #[tokio::test]
    async fn test_corrupt_header_stops() {
        let input = mms_frame(b'H', &[0u8; 40]);
        let (sink, outcome) = read(&input).await;
        assert!(matches!(outcome, ReadOutcome::Stopped(IngestError::InvalidData(_))));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_end_of_stream() {
        let header = video_header();
        let (sink, outcome) = read(&header[..header.len() - 5]).await;
        assert!(outcome.is_end_of_stream());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_factory_sniffing() {
        let factory = ASFContentReaderFactory;
        let audio = mms_frame(b'H', &header_object(&[stream_properties(&GUID_STREAM_TYPE_AUDIO)]));
        let mut input = mms_frame(b'M', b"x");
        input.extend(audio);
        assert_eq!(
            factory.try_parse_content_type(&input),
            Some(ContentTypeMatch::new("WMA", "audio/x-ms-wma"))
        );
        assert_eq!(
            factory.try_parse_content_type(&video_header()),
            Some(ContentTypeMatch::new("WMV", "video/x-ms-wmv"))
        );
        assert_eq!(factory.try_parse_content_type(&[0x47; 188]), None);
    }
}
