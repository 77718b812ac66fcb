use super::channel::{Channel, ChannelContext};
use super::info::INFO_BITRATE;
use super::{ChannelInfo, ChannelTrack, Content};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Why a content stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    None,
    Any,
    UserShutdown,
    OffAir,
    ConnectionError,
    NotIdentifiedError,
    BadAgentError,
    UnavailableError,
}

/// Receiver of demuxed output.
///
/// Readers and filters call these in stream order. Implementations use
/// interior mutability so a sink can be shared between tasks.
#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn on_channel_info(&self, info: ChannelInfo);
    async fn on_channel_track(&self, track: ChannelTrack);
    async fn on_content_header(&self, header: Content);
    async fn on_content(&self, content: Content);
    async fn on_stop(&self, reason: StopReason);
}

/// Terminal sink storing everything into a [`Channel`].
pub struct ChannelContentSink {
    channel: Arc<Channel>,
    use_content_bitrate: bool,
    last_content: Mutex<Option<Content>>,
}

impl ChannelContentSink {
    pub fn new(channel: Arc<Channel>, use_content_bitrate: bool) -> Self {
        Self {
            channel,
            use_content_bitrate,
            last_content: Mutex::new(None),
        }
    }

    pub fn last_content(&self) -> Option<Content> {
        self.last_content.lock().clone()
    }
}

#[async_trait]
impl ContentSink for ChannelContentSink {
    async fn on_channel_info(&self, info: ChannelInfo) {
        let mut fields = self.channel.channel_info().to_fields();
        let mut update = info.to_fields();
        if !self.use_content_bitrate {
            update.remove(INFO_BITRATE);
        }
        fields.update(&update);
        self.channel.set_channel_info(ChannelInfo::new(fields));
    }

    async fn on_channel_track(&self, track: ChannelTrack) {
        let mut fields = self.channel.channel_track().extra().clone();
        fields.update(track.extra());
        self.channel.set_channel_track(ChannelTrack::new(fields));
    }

    async fn on_content_header(&self, header: Content) {
        self.channel.set_content_header(header.clone());
        *self.last_content.lock() = Some(header);
    }

    async fn on_content(&self, content: Content) {
        self.channel.add_content(content.clone());
        *self.last_content.lock() = Some(content);
    }

    async fn on_stop(&self, _reason: StopReason) {}
}

/// One call received by a [`CollectingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    ChannelInfo(ChannelInfo),
    ChannelTrack(ChannelTrack),
    ContentHeader(Content),
    Content(Content),
    Stop(StopReason),
}

/// Sink that records every call, in order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    pub fn headers(&self) -> Vec<Content> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::ContentHeader(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn contents(&self) -> Vec<Content> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Content(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn channel_infos(&self) -> Vec<ChannelInfo> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::ChannelInfo(i) => Some(i.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Option<StopReason> {
        self.events.lock().iter().find_map(|e| match e {
            SinkEvent::Stop(reason) => Some(*reason),
            _ => None,
        })
    }
}

#[async_trait]
impl ContentSink for CollectingSink {
    async fn on_channel_info(&self, info: ChannelInfo) {
        self.events.lock().push(SinkEvent::ChannelInfo(info));
    }

    async fn on_channel_track(&self, track: ChannelTrack) {
        self.events.lock().push(SinkEvent::ChannelTrack(track));
    }

    async fn on_content_header(&self, header: Content) {
        self.events.lock().push(SinkEvent::ContentHeader(header));
    }

    async fn on_content(&self, content: Content) {
        self.events.lock().push(SinkEvent::Content(content));
    }

    async fn on_stop(&self, reason: StopReason) {
        self.events.lock().push(SinkEvent::Stop(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::info::{ExtraFields, INFO_NAME, INFO_TYPE};
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_sink_merges_info() {
        let channel = Arc::new(Channel::new());
        let mut fields = ExtraFields::new();
        fields.set_str(INFO_NAME, "my channel");
        channel.set_channel_info(ChannelInfo::new(fields));

        let sink = ChannelContentSink::new(channel.clone(), false);
        let mut update = ExtraFields::new();
        update.set_str(INFO_TYPE, "TS");
        update.set_int(INFO_BITRATE, 1500);
        sink.on_channel_info(ChannelInfo::new(update)).await;

        let info = channel.channel_info();
        assert_eq!(info.name(), Some("my channel"));
        assert_eq!(info.content_type(), Some("TS"));
        assert_eq!(info.bitrate(), 0);
    }

    #[tokio::test]
    async fn test_channel_sink_header_resets_contents() {
        let channel = Arc::new(Channel::new());
        let sink = ChannelContentSink::new(channel.clone(), true);
        sink.on_content_header(Content::new(1, Duration::ZERO, 0, vec![1u8; 4])).await;
        sink.on_content(Content::new(1, Duration::ZERO, 4, vec![2u8; 8])).await;
        assert_eq!(channel.contents().len(), 1);
        assert_eq!(channel.content_position(), 12);

        sink.on_content_header(Content::new(2, Duration::ZERO, 12, vec![3u8; 4])).await;
        assert!(channel.contents().is_empty());
        assert_eq!(sink.last_content().map(|c| c.stream), Some(2));
    }
}
