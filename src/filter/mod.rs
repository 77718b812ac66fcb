//! Content filters: sink wrappers inserted between a reader and the channel.
//!
//! The custom filter pipes content through an external program and forwards
//! the program's output as new content:
//!
//! ```no_run
//! use peca_ingest::av::{ContentSink, CollectingSink};
//! use peca_ingest::config::FilterConfig;
//! use peca_ingest::filter::{ContentFilter, CustomFilter, CustomFilterDescription};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> peca_ingest::Result<()> {
//! let text = "[[filter]]\nname = \"copy\"\ncommand = \"cat\"\n";
//! let description = CustomFilterDescription::parse(text, Path::new("."))?.remove(0);
//! let filter = CustomFilter::new(description, FilterConfig::default());
//! let sink: Arc<dyn ContentSink> = filter.activate(Arc::new(CollectingSink::new()));
//! # Ok(())
//! # }
//! ```

use crate::av::ContentSink;
use parking_lot::RwLock;
use std::sync::Arc;

/// Filter descriptions and their loader
pub mod description;

/// Child process spawning and termination
pub mod process;

/// Filter registry with hot reload
pub mod registry;

/// The custom filter sink and its pumps
pub mod sink;

pub use description::CustomFilterDescription;
pub use process::ChildProcessHandle;
pub use registry::CustomFilterRegistry;
pub use sink::{CustomFilter, CustomFilterContentSink};

/// A stage that can wrap a sink chain.
pub trait ContentFilter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this filter takes content of `content_type`.
    fn accepts(&self, _content_type: &str) -> bool {
        true
    }

    /// Wraps `sink` for one activation. Every call returns a fresh wrapper.
    fn activate(&self, sink: Arc<dyn ContentSink>) -> Arc<dyn ContentSink>;
}

/// Named set of filters shared between a registry and the channels using it.
#[derive(Default)]
pub struct ContentFilterSet {
    filters: RwLock<Vec<Arc<dyn ContentFilter>>>,
}

impl ContentFilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter, replacing any filter of the same name.
    pub fn add(&self, filter: Arc<dyn ContentFilter>) {
        let mut filters = self.filters.write();
        filters.retain(|f| f.name() != filter.name());
        filters.push(filter);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn ContentFilter>> {
        let mut filters = self.filters.write();
        let index = filters.iter().position(|f| f.name() == name)?;
        Some(filters.remove(index))
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn ContentFilter>> {
        self.filters.read().iter().find(|f| f.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.filters.read().iter().map(|f| f.name().to_string()).collect()
    }

    /// Filters accepting `content_type`, in registration order.
    pub fn matching(&self, content_type: &str) -> Vec<Arc<dyn ContentFilter>> {
        self.filters
            .read()
            .iter()
            .filter(|f| f.accepts(content_type))
            .cloned()
            .collect()
    }

    /// Wraps `sink` with every filter accepting `content_type`. The first
    /// registered filter ends up closest to the reader.
    pub fn apply(&self, content_type: &str, sink: Arc<dyn ContentSink>) -> Arc<dyn ContentSink> {
        self.matching(content_type)
            .iter()
            .rev()
            .fold(sink, |sink, filter| filter.activate(sink))
    }

    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }
}

impl std::fmt::Debug for ContentFilterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{ChannelInfo, ChannelTrack, CollectingSink, Content, StopReason};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    /// Appends its tag to every content passing through.
    struct Tagging {
        tag: u8,
        only: Option<&'static str>,
    }

    struct TaggingSink {
        tag: u8,
        inner: Arc<dyn ContentSink>,
    }

    #[async_trait]
    impl ContentSink for TaggingSink {
        async fn on_channel_info(&self, info: ChannelInfo) {
            self.inner.on_channel_info(info).await
        }
        async fn on_channel_track(&self, track: ChannelTrack) {
            self.inner.on_channel_track(track).await
        }
        async fn on_content_header(&self, header: Content) {
            self.inner.on_content_header(header).await
        }
        async fn on_content(&self, content: Content) {
            let mut data = content.data.to_vec();
            data.push(self.tag);
            self.inner
                .on_content(Content::new(content.stream, content.timestamp, content.position, data))
                .await
        }
        async fn on_stop(&self, reason: StopReason) {
            self.inner.on_stop(reason).await
        }
    }

    impl ContentFilter for Tagging {
        fn name(&self) -> &str {
            match self.tag {
                1 => "one",
                2 => "two",
                _ => "other",
            }
        }

        fn accepts(&self, content_type: &str) -> bool {
            self.only.map_or(true, |only| only == content_type)
        }

        fn activate(&self, sink: Arc<dyn ContentSink>) -> Arc<dyn ContentSink> {
            Arc::new(TaggingSink { tag: self.tag, inner: sink })
        }
    }

    #[test]
    fn test_add_replaces_same_name() {
        let set = ContentFilterSet::new();
        set.add(Arc::new(Tagging { tag: 1, only: None }));
        set.add(Arc::new(Tagging { tag: 2, only: None }));
        set.add(Arc::new(Tagging { tag: 1, only: Some("TS") }));
        assert_eq!(set.names(), vec!["two", "one"]);
        assert_eq!(set.matching("MKV").len(), 1);
        assert!(set.remove("one").is_some());
        assert!(set.remove("one").is_none());
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_chains_in_order() {
        let set = ContentFilterSet::new();
        set.add(Arc::new(Tagging { tag: 1, only: None }));
        set.add(Arc::new(Tagging { tag: 2, only: None }));
        set.add(Arc::new(Tagging { tag: 3, only: Some("WMV") }));

        let collected = Arc::new(CollectingSink::new());
        let sink = set.apply("TS", collected.clone());
        sink.on_content(Content::new(1, Duration::ZERO, 0, vec![0u8])).await;
        assert_eq!(&collected.contents()[0].data[..], &[0, 1, 2]);
    }
}
