use super::packet::TSPacket;
use super::types::{PID_PAT, SYNC_BYTE, TS_PACKET_SIZE};
use crate::av::info::{set_stream_format, INFO_BITRATE};
use crate::av::{ChannelContext, ChannelInfo, Content, ContentSink};
use crate::config::TsConfig;
use crate::error::{IngestError, Result};
use crate::format::{read_exact, ContentReader, ContentReaderFactory, ContentTypeMatch, ReadOutcome};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const READER_NAME: &str = "MPEG-TS (TS)";

/// Re-segments a transport stream into contents cut at audio/video PES starts.
///
/// PAT and PMT packets never reach the contents: together they form the
/// content header, which is re-emitted only when it changes.
pub struct TSContentReader {
    channel: Arc<dyn ChannelContext>,
    config: TsConfig,
}

impl TSContentReader {
    pub fn new(channel: Arc<dyn ChannelContext>, config: TsConfig) -> Self {
        Self { channel, config }
    }
}

/// Per-run demux state.
struct TsDemux<'a> {
    channel: &'a dyn ChannelContext,
    config: &'a TsConfig,
    stream: u32,
    origin: Instant,
    last_flush: Instant,
    position: u64,
    pmt_pid: Option<u16>,
    header: BytesMut,
    pat_len: usize,
    /// Section bytes still expected for the PMT being collected.
    pmt_remaining: Option<usize>,
    last_header: Option<Bytes>,
    cache: BytesMut,
    dropped: usize,
    published_bitrate: f32,
}

impl<'a> TsDemux<'a> {
    fn new(channel: &'a dyn ChannelContext, config: &'a TsConfig) -> Self {
        let now = Instant::now();
        Self {
            channel,
            config,
            stream: channel.generate_stream_id(),
            origin: now,
            last_flush: now,
            position: channel.content_position(),
            pmt_pid: None,
            header: BytesMut::new(),
            pat_len: 0,
            pmt_remaining: None,
            last_header: None,
            cache: BytesMut::new(),
            dropped: 0,
            published_bitrate: 0.0,
        }
    }

    async fn start(&mut self, sink: &dyn ContentSink) {
        sink.on_content_header(Content::empty(self.stream, Duration::ZERO, self.position))
            .await;
    }

    async fn process(&mut self, sink: &dyn ContentSink, bytes: &[u8]) -> Result<()> {
        let packet = TSPacket::parse(bytes)?;
        if !packet.is_synced() {
            return Err(IngestError::Framing(format!(
                "lost sync, got 0x{:02x}",
                packet.sync_byte
            )));
        }

        if packet.payload_unit_start && packet.pid == PID_PAT {
            self.header.clear();
            self.append_header(bytes);
            self.pat_len = self.header.len();
            self.pmt_remaining = None;
            if let Some(pid) = packet.pmt_pid {
                self.pmt_pid = Some(pid);
            }
            return Ok(());
        }

        if Some(packet.pid) == self.pmt_pid {
            if self.pat_len == 0 {
                // PMT before any PAT has nothing to attach to.
                return Ok(());
            }
            let payload = packet.payload().unwrap_or_default();
            let remaining = if packet.payload_unit_start {
                self.header.truncate(self.pat_len);
                pmt_section_size(payload).saturating_sub(payload.len())
            } else {
                match self.pmt_remaining {
                    Some(remaining) => remaining.saturating_sub(payload.len()),
                    // Continuation of a section whose start we never saw.
                    None => return Ok(()),
                }
            };
            self.append_header(bytes);
            if remaining > 0 {
                self.pmt_remaining = Some(remaining);
                return Ok(());
            }
            self.pmt_remaining = None;
            self.emit_header(sink).await;
            return Ok(());
        }

        if packet.is_pes_start() && self.last_flush.elapsed() >= self.config.flush_interval() {
            if self.flush(sink).await {
                self.update_bitrate(sink).await;
            }
        }

        if self.cache.len() + bytes.len() <= self.config.content_cache_limit {
            self.cache.extend_from_slice(bytes);
        } else {
            self.dropped += bytes.len();
        }
        Ok(())
    }

    /// Emits the collected PAT+PMT as the content header unless it equals the
    /// last one.
    async fn emit_header(&mut self, sink: &dyn ContentSink) {
        let header = self.header.clone().freeze();
        if self.last_header.as_ref() == Some(&header) {
            return;
        }
        self.flush(sink).await;
        let content = Content::new(
            self.stream,
            self.origin.elapsed(),
            self.position,
            header.clone(),
        );
        debug!(
            "{}: header changed, {} bytes at {}",
            READER_NAME,
            header.len(),
            self.position
        );
        self.position += header.len() as u64;
        sink.on_content_header(content).await;
        self.last_header = Some(header);
    }

    /// Appends a PSI packet with its continuity counter cleared, so identical
    /// tables compare equal.
    fn append_header(&mut self, bytes: &[u8]) {
        if self.header.len() + bytes.len() > self.config.header_cache_limit {
            return;
        }
        let start = self.header.len();
        self.header.extend_from_slice(bytes);
        self.header[start + 3] &= 0xf0;
    }

    /// Emits the cache as one content. Returns false when there was nothing.
    async fn flush(&mut self, sink: &dyn ContentSink) -> bool {
        if self.cache.is_empty() {
            return false;
        }
        if self.dropped > 0 {
            warn!("{}: content cache full, dropped {} bytes", READER_NAME, self.dropped);
            self.dropped = 0;
        }
        let data = self.cache.split().freeze();
        let content = Content::new(self.stream, self.origin.elapsed(), self.position, data);
        self.position = content.end_position();
        self.last_flush = Instant::now();
        sink.on_content(content).await;
        true
    }

    async fn update_bitrate(&mut self, sink: &dyn ContentSink) {
        let bitrate = self.channel.recv_rate().unwrap_or(0.0) * 8.0 / 1000.0;
        if self.published_bitrate * self.config.bitrate_hysteresis >= bitrate {
            return;
        }
        self.published_bitrate = bitrate;

        let current = self.channel.channel_info();
        let mut fields = current.to_fields();
        set_stream_format(&mut fields, "TS", "video/mp2ts", ".ts");
        fields.set_int(INFO_BITRATE, bitrate as i32);
        let info = ChannelInfo::new(fields);
        if info != current {
            debug!("{}: bitrate {} kbps", READER_NAME, bitrate as i32);
            sink.on_channel_info(info).await;
        }
    }

    async fn finish(&mut self, sink: &dyn ContentSink) {
        self.flush(sink).await;
    }
}

/// Payload bytes, pointer field included, that a PSI section starting in
/// `payload` spans. A payload too short to tell counts as complete.
fn pmt_section_size(payload: &[u8]) -> usize {
    let pointer = match payload.first() {
        Some(&pointer) => pointer as usize,
        None => return 0,
    };
    match payload.get(1 + pointer..3 + pointer + 1) {
        Some(&[_, high, low]) => {
            1 + pointer + 3 + ((((high & 0x0f) as usize) << 8) | low as usize)
        }
        _ => 0,
    }
}

impl TSContentReader {
    async fn next_packet(
        &self,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        packet: &mut [u8; TS_PACKET_SIZE],
        cancel: &CancellationToken,
    ) -> Result<()> {
        read_exact(stream, packet, cancel).await?;
        if packet[0] != SYNC_BYTE && self.config.resync_limit > 0 {
            self.resync(stream, packet, cancel).await?;
        }
        Ok(())
    }

    /// Slides forward to the next sync byte, reading at most `resync_limit`
    /// extra bytes.
    async fn resync(
        &self,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        packet: &mut [u8; TS_PACKET_SIZE],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut skipped = 0;
        while packet[0] != SYNC_BYTE {
            let skip = packet[1..]
                .iter()
                .position(|&b| b == SYNC_BYTE)
                .map_or(TS_PACKET_SIZE, |i| i + 1);
            skipped += skip;
            if skipped > self.config.resync_limit {
                return Err(IngestError::Framing(format!(
                    "no sync byte within {} bytes",
                    self.config.resync_limit
                )));
            }
            packet.copy_within(skip.., 0);
            read_exact(stream, &mut packet[TS_PACKET_SIZE - skip..], cancel).await?;
        }
        info!("{}: resynchronized after {} bytes", READER_NAME, skipped);
        Ok(())
    }
}

#[async_trait]
impl ContentReader for TSContentReader {
    fn name(&self) -> &'static str {
        READER_NAME
    }

    async fn read(
        &mut self,
        sink: &dyn ContentSink,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        cancel: &CancellationToken,
    ) -> ReadOutcome {
        let mut demux = TsDemux::new(self.channel.as_ref(), &self.config);
        demux.start(sink).await;

        let mut packet = [0u8; TS_PACKET_SIZE];
        let err = loop {
            if let Err(err) = self.next_packet(stream, &mut packet, cancel).await {
                break err;
            }
            if let Err(err) = demux.process(sink, &packet).await {
                break err;
            }
        };

        let outcome = ReadOutcome::from(err);
        if !matches!(outcome, ReadOutcome::Cancelled) {
            demux.finish(sink).await;
        }
        debug!("{}: read loop ended: {:?}", READER_NAME, outcome);
        outcome
    }
}

/// Creates [`TSContentReader`]s and recognizes transport streams.
#[derive(Debug, Clone, Default)]
pub struct TSContentReaderFactory {
    config: TsConfig,
}

impl TSContentReaderFactory {
    pub fn new(config: TsConfig) -> Self {
        Self { config }
    }
}

impl ContentReaderFactory for TSContentReaderFactory {
    fn name(&self) -> &'static str {
        READER_NAME
    }

    fn create(&self, channel: Arc<dyn ChannelContext>) -> Box<dyn ContentReader> {
        Box::new(TSContentReader::new(channel, self.config.clone()))
    }

    fn try_parse_content_type(&self, header: &[u8]) -> Option<ContentTypeMatch> {
        if header.len() >= TS_PACKET_SIZE && header[0] == SYNC_BYTE {
            Some(ContentTypeMatch::new("TS", "video/mp2ts"))
        } else {
            None
        }
    }
}
