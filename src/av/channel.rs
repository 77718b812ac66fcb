use super::{ChannelInfo, ChannelTrack, Content};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default number of content packets a [`Channel`] retains.
pub const DEFAULT_CONTENT_LIMIT: usize = 100;

/// What a content reader needs from the channel it feeds.
pub trait ChannelContext: Send + Sync {
    /// Allocates a new logical sub-stream index. Monotonic per channel.
    fn generate_stream_id(&self) -> u32;

    /// Position of the byte following the newest header or content held.
    fn content_position(&self) -> u64;

    /// Current channel metadata.
    fn channel_info(&self) -> ChannelInfo;

    /// Receive rate of the source connection in bytes per second, if known.
    fn recv_rate(&self) -> Option<f32>;
}

#[derive(Debug, Default)]
struct ChannelState {
    info: ChannelInfo,
    track: ChannelTrack,
    header: Option<Content>,
    contents: VecDeque<Content>,
    recv_rate: Option<f32>,
}

/// In-memory channel: holds the latest header, a bounded window of contents
/// and the channel metadata.
#[derive(Debug)]
pub struct Channel {
    stream_id: AtomicU32,
    content_limit: usize,
    state: RwLock<ChannelState>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    pub fn new() -> Self {
        Self::with_content_limit(DEFAULT_CONTENT_LIMIT)
    }

    pub fn with_content_limit(content_limit: usize) -> Self {
        Self {
            stream_id: AtomicU32::new(0),
            content_limit: content_limit.max(1),
            state: RwLock::new(ChannelState::default()),
        }
    }

    pub fn set_channel_info(&self, info: ChannelInfo) {
        self.state.write().info = info;
    }

    pub fn channel_track(&self) -> ChannelTrack {
        self.state.read().track.clone()
    }

    pub fn set_channel_track(&self, track: ChannelTrack) {
        self.state.write().track = track;
    }

    pub fn content_header(&self) -> Option<Content> {
        self.state.read().header.clone()
    }

    /// Replaces the header and drops every content received before it.
    pub fn set_content_header(&self, header: Content) {
        let mut state = self.state.write();
        state.header = Some(header);
        state.contents.clear();
    }

    pub fn add_content(&self, content: Content) {
        let mut state = self.state.write();
        state.contents.push_back(content);
        while state.contents.len() > self.content_limit {
            state.contents.pop_front();
        }
    }

    pub fn contents(&self) -> Vec<Content> {
        self.state.read().contents.iter().cloned().collect()
    }

    pub fn set_recv_rate(&self, rate: Option<f32>) {
        self.state.write().recv_rate = rate;
    }
}

impl ChannelContext for Channel {
    fn generate_stream_id(&self) -> u32 {
        self.stream_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn content_position(&self) -> u64 {
        let state = self.state.read();
        match (&state.header, state.contents.back()) {
            (None, _) => 0,
            (Some(header), Some(content)) if content.position >= header.position => {
                content.end_position()
            }
            (Some(header), _) => header.end_position(),
        }
    }

    fn channel_info(&self) -> ChannelInfo {
        self.state.read().info.clone()
    }

    fn recv_rate(&self) -> Option<f32> {
        self.state.read().recv_rate
    }
}
