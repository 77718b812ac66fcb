//! Packet and metadata model shared by readers, filters and sinks.

/// Channel state and the context readers pull positions and rates from
pub mod channel;

mod content;

/// Channel metadata: field collections, channel info and track info
pub mod info;

/// The downstream sink seam
pub mod sink;

pub use channel::{Channel, ChannelContext};
pub use content::Content;
pub use info::{ChannelInfo, ChannelTrack, ExtraFields, FieldId, FieldValue};
pub use sink::{ChannelContentSink, CollectingSink, ContentSink, SinkEvent, StopReason};
