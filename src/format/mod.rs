//! Container readers turning a live byte stream into content packets.
//!
//! Every container provides a [`ContentReader`] that drives one stream into a
//! [`ContentSink`](crate::av::ContentSink), and a [`ContentReaderFactory`]
//! that creates readers for a channel and recognizes the container from the
//! first bytes of a stream.

use crate::av::{ChannelContext, ContentSink};
use crate::config::Config;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// ASF (WMV/WMA) over WMSP framing
pub mod asf;

/// Matroska and WebM
pub mod mkv;

/// MPEG-2 transport stream
pub mod ts;

/// Why a read loop ended.
///
/// Sinks are never told about failures; this value is the only place the
/// cause survives.
#[derive(Debug)]
pub enum ReadOutcome {
    /// The source closed, or an end marker was read
    EndOfStream,
    /// The cancellation token fired
    Cancelled,
    /// The stream could not be parsed or read any further
    Stopped(IngestError),
}

impl ReadOutcome {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream)
    }
}

impl From<IngestError> for ReadOutcome {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::EndOfStream => ReadOutcome::EndOfStream,
            IngestError::Cancelled => ReadOutcome::Cancelled,
            err => ReadOutcome::Stopped(err),
        }
    }
}

/// Result of a successful content sniff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeMatch {
    pub content_type: String,
    pub mime_type: String,
}

impl ContentTypeMatch {
    pub fn new(content_type: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Demuxes one source stream for one channel.
#[async_trait]
pub trait ContentReader: Send {
    /// Display name of the container handled.
    fn name(&self) -> &'static str;

    /// Runs until the stream ends, fails or `cancel` fires.
    async fn read(
        &mut self,
        sink: &dyn ContentSink,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        cancel: &CancellationToken,
    ) -> ReadOutcome;
}

/// Creates readers and recognizes their container.
pub trait ContentReaderFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(&self, channel: Arc<dyn ChannelContext>) -> Box<dyn ContentReader>;

    /// Returns the content and MIME type when `header` looks like this container.
    fn try_parse_content_type(&self, header: &[u8]) -> Option<ContentTypeMatch>;
}

/// Factories for every container this crate reads, TS first.
pub fn default_factories(config: &Config) -> Vec<Box<dyn ContentReaderFactory>> {
    vec![
        Box::new(ts::TSContentReaderFactory::new(config.ts.clone())),
        Box::new(mkv::MKVContentReaderFactory),
        Box::new(asf::ASFContentReaderFactory),
    ]
}

/// First factory recognizing `header`, with the detected types.
pub fn detect_content_type<'a>(
    factories: &'a [Box<dyn ContentReaderFactory>],
    header: &[u8],
) -> Option<(&'a dyn ContentReaderFactory, ContentTypeMatch)> {
    factories.iter().find_map(|factory| {
        factory
            .try_parse_content_type(header)
            .map(|found| (factory.as_ref(), found))
    })
}

/// Reads whatever is available into `buf`. Zero bytes read is end of stream.
pub(crate) async fn read_some(
    stream: &mut (dyn AsyncRead + Unpin + Send),
    buf: &mut BytesMut,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        read = stream.read_buf(buf) => match read? {
            0 => Err(IngestError::EndOfStream),
            _ => Ok(()),
        },
    }
}

/// Fills `buf` completely. A short read ends the stream.
pub(crate) async fn read_exact(
    stream: &mut (dyn AsyncRead + Unpin + Send),
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        read = stream.read_exact(buf) => read.map(|_| ()).map_err(IngestError::from),
    }
}
