use super::description::CustomFilterDescription;
use super::process::{ChildPipes, ChildProcessHandle};
use super::ContentFilter;
use crate::av::info::{INFO_STREAM_EXT, INFO_STREAM_TYPE, INFO_TYPE};
use crate::av::{ChannelInfo, ChannelTrack, Content, ContentSink, StopReason};
use crate::config::FilterConfig;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Stream index and timestamp stamped onto the child's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Stamp {
    stream: u32,
    timestamp: Duration,
}

enum PumpMessage {
    Data(Bytes),
    /// Closes the child's standard input once everything before it is written.
    Close,
}

/// One running child and the three pumps around it.
struct FilterProcess {
    child: ChildProcessHandle,
    queue: mpsc::UnboundedSender<PumpMessage>,
    stamp: watch::Sender<Stamp>,
    cancel: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
}

enum SinkState {
    Idle,
    Running(FilterProcess),
    Stopped,
}

/// Sink that pipes content through an external program.
///
/// The child is started by the first content, receives every header and
/// content payload on its standard input, and whatever it prints on standard
/// output is forwarded downstream as new content. After [`on_stop`] the sink
/// stays dead: later content is dropped and no new child is started.
///
/// [`on_stop`]: ContentSink::on_stop
pub struct CustomFilterContentSink {
    description: Arc<CustomFilterDescription>,
    config: FilterConfig,
    sink: Arc<dyn ContentSink>,
    state: Mutex<SinkState>,
}

impl CustomFilterContentSink {
    pub fn new(
        description: Arc<CustomFilterDescription>,
        config: FilterConfig,
        sink: Arc<dyn ContentSink>,
    ) -> Self {
        Self {
            description,
            config,
            sink,
            state: Mutex::new(SinkState::Idle),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), SinkState::Running(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.state.lock(), SinkState::Stopped)
    }

    /// Pid of the running child, if any.
    pub fn child_id(&self) -> Option<u32> {
        match &*self.state.lock() {
            SinkState::Running(process) => process.child.id(),
            _ => None,
        }
    }

    fn start(&self) -> Result<FilterProcess> {
        let (child, pipes) = ChildProcessHandle::spawn(&self.description)?;
        let ChildPipes { stdin, stdout, stderr } = pipes;
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (stamp, stamp_rx) = watch::channel(Stamp::default());
        let cancel = CancellationToken::new();
        let name = self.description.name.clone();

        let pumps = vec![
            tokio::spawn(pump_stdin(name.clone(), stdin, queue_rx, cancel.clone())),
            tokio::spawn(pump_stdout(
                name.clone(),
                stdout,
                self.sink.clone(),
                stamp_rx,
                self.config.read_buffer_size.max(1),
                cancel.clone(),
            )),
            tokio::spawn(pump_stderr(name, stderr, self.description.logging, cancel.clone())),
        ];
        Ok(FilterProcess {
            child,
            queue,
            stamp,
            cancel,
            pumps,
        })
    }

    /// Queues `content` for the child, starting it if this is the first content.
    fn enqueue(&self, content: Content) {
        let mut state = self.state.lock();
        if let SinkState::Idle = *state {
            *state = match self.start() {
                Ok(process) => SinkState::Running(process),
                Err(err) => {
                    error!("{}: cannot start filter: {}", self.description.name, err);
                    SinkState::Stopped
                }
            };
        }
        if let SinkState::Running(process) = &*state {
            process.stamp.send_replace(Stamp {
                stream: content.stream,
                timestamp: content.timestamp,
            });
            if process.queue.send(PumpMessage::Data(content.data)).is_err() {
                debug!("{}: writer has exited, dropping content", self.description.name);
            }
        }
    }

    async fn shutdown(&self, mut process: FilterProcess) {
        let name = &self.description.name;
        let wait = self.config.pump_wait();
        // Fails only when the writer already exited.
        let _ = process.queue.send(PumpMessage::Close);

        if timeout(wait, join_all(process.pumps.iter_mut())).await.is_err() {
            debug!("{}: pumps still running after {:?}, cancelling", name, wait);
            process.cancel.cancel();
            process.pumps.retain(|pump| !pump.is_finished());
            if timeout(wait, join_all(process.pumps.iter_mut())).await.is_err() {
                warn!("{}: aborting stuck pumps", name);
                for pump in &process.pumps {
                    pump.abort();
                }
            }
        }
        process.child.terminate(self.config.exit_wait()).await;
    }
}

#[async_trait]
impl ContentSink for CustomFilterContentSink {
    async fn on_channel_info(&self, info: ChannelInfo) {
        let info = match self.description.content_type.as_deref() {
            Some(content_type) if !content_type.is_empty() => {
                let mut fields = info.to_fields();
                fields.set_str(INFO_TYPE, content_type);
                let description = &self.description;
                if let Some(mime) = description.mime_type.as_deref().filter(|s| !s.is_empty()) {
                    fields.set_str(INFO_STREAM_TYPE, mime);
                }
                if let Some(ext) = description.content_ext.as_deref().filter(|s| !s.is_empty()) {
                    fields.set_str(INFO_STREAM_EXT, ext);
                }
                ChannelInfo::new(fields)
            }
            _ => info,
        };
        self.sink.on_channel_info(info).await;
    }

    async fn on_channel_track(&self, track: ChannelTrack) {
        self.sink.on_channel_track(track).await;
    }

    async fn on_content_header(&self, header: Content) {
        if self.is_stopped() {
            return;
        }
        // The child's output has no header of its own.
        self.sink
            .on_content_header(Content::empty(header.stream, header.timestamp, 0))
            .await;
        self.on_content(header).await;
    }

    async fn on_content(&self, content: Content) {
        self.enqueue(content);
    }

    async fn on_stop(&self, reason: StopReason) {
        let previous = std::mem::replace(&mut *self.state.lock(), SinkState::Stopped);
        if let SinkState::Running(process) = previous {
            self.shutdown(process).await;
        }
        self.sink.on_stop(reason).await;
    }
}

async fn write_chunk(
    name: &str,
    stdin: &mut ChildStdin,
    data: &[u8],
    cancel: &CancellationToken,
) -> bool {
    let written = tokio::select! {
        biased;
        _ = cancel.cancelled() => return false,
        written = stdin.write_all(data) => written,
    };
    match written {
        Ok(()) => true,
        Err(err) => {
            debug!("{}: stdin closed: {}", name, err);
            false
        }
    }
}

async fn pump_stdin(
    name: String,
    mut stdin: ChildStdin,
    mut queue: mpsc::UnboundedReceiver<PumpMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = queue.recv() => message,
        };
        let Some(PumpMessage::Data(data)) = message else {
            break;
        };
        if !write_chunk(&name, &mut stdin, &data, &cancel).await {
            return;
        }

        let mut closing = false;
        while let Ok(message) = queue.try_recv() {
            match message {
                PumpMessage::Data(data) => {
                    if !write_chunk(&name, &mut stdin, &data, &cancel).await {
                        return;
                    }
                }
                PumpMessage::Close => {
                    closing = true;
                    break;
                }
            }
        }

        // Queue drained.
        let flushed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            flushed = stdin.flush() => flushed,
        };
        if let Err(err) = flushed {
            debug!("{}: stdin flush failed: {}", name, err);
            return;
        }
        if closing {
            break;
        }
    }
    debug!("{}: closing stdin", name);
}

async fn pump_stdout(
    name: String,
    mut stdout: ChildStdout,
    sink: Arc<dyn ContentSink>,
    stamp: watch::Receiver<Stamp>,
    buffer_size: usize,
    cancel: CancellationToken,
) {
    let mut position = 0u64;
    let mut buf = vec![0u8; buffer_size];
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = stdout.read(&mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                let Stamp { stream, timestamp } = *stamp.borrow();
                let data = Bytes::copy_from_slice(&buf[..n]);
                let content = Content::new(stream, timestamp, position, data);
                position = content.end_position();
                sink.on_content(content).await;
            }
            Err(err) => {
                debug!("{}: stdout read failed: {}", name, err);
                break;
            }
        }
    }
    debug!("{}: stdout closed after {} bytes", name, position);
}

async fn pump_stderr(name: String, stderr: ChildStderr, logging: bool, cancel: CancellationToken) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                if logging {
                    info!("{}: {}", name, String::from_utf8_lossy(&line).trim_end());
                }
            }
            Err(err) => {
                debug!("{}: stderr read failed: {}", name, err);
                break;
            }
        }
    }
}

/// [`ContentFilter`] backed by a [`CustomFilterDescription`].
#[derive(Debug, Clone)]
pub struct CustomFilter {
    description: Arc<CustomFilterDescription>,
    config: FilterConfig,
    name: String,
}

impl CustomFilter {
    pub fn new(description: CustomFilterDescription, config: FilterConfig) -> Self {
        let name = format!("custom:{}", description.name);
        Self {
            description: Arc::new(description),
            config,
            name,
        }
    }

    pub fn description(&self) -> &CustomFilterDescription {
        &self.description
    }
}

impl ContentFilter for CustomFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, content_type: &str) -> bool {
        self.description.accepts(content_type)
    }

    fn activate(&self, sink: Arc<dyn ContentSink>) -> Arc<dyn ContentSink> {
        Arc::new(CustomFilterContentSink::new(
            self.description.clone(),
            self.config.clone(),
            sink,
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::av::info::{ExtraFields, INFO_BITRATE, INFO_NAME};
    use crate::av::{CollectingSink, SinkEvent};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn description(command: &str) -> CustomFilterDescription {
        CustomFilterDescription {
            name: "test".into(),
            command: command.into(),
            input_content_type: None,
            content_type: None,
            mime_type: None,
            content_ext: None,
            logging: true,
            base_path: PathBuf::new(),
        }
    }

    fn filter_sink(
        desc: CustomFilterDescription,
    ) -> (Arc<CollectingSink>, CustomFilterContentSink) {
        let collected = Arc::new(CollectingSink::new());
        let config = FilterConfig {
            pump_wait_ms: 5000,
            ..FilterConfig::default()
        };
        let sink = CustomFilterContentSink::new(Arc::new(desc), config, collected.clone());
        (collected, sink)
    }

    #[tokio::test]
    async fn test_channel_info_override() {
        let mut desc = description("cat");
        desc.content_type = Some("MP3".into());
        desc.mime_type = Some("audio/mpeg".into());
        let (collected, sink) = filter_sink(desc);

        let mut fields = ExtraFields::new();
        fields.set_str(INFO_NAME, "ch");
        fields.set_str(INFO_TYPE, "TS");
        fields.set_str(INFO_STREAM_EXT, ".ts");
        fields.set_int(INFO_BITRATE, 500);
        sink.on_channel_info(ChannelInfo::new(fields)).await;

        let info = &collected.channel_infos()[0];
        assert_eq!(info.name(), Some("ch"));
        assert_eq!(info.content_type(), Some("MP3"));
        assert_eq!(info.mime_type(), "audio/mpeg");
        assert_eq!(info.content_extension(), ".ts");
        assert_eq!(info.bitrate(), 500);
        assert!(!sink.is_running());
    }

    #[tokio::test]
    async fn test_channel_info_passes_through() {
        let (collected, sink) = filter_sink(description("cat"));
        let mut fields = ExtraFields::new();
        fields.set_str(INFO_TYPE, "TS");
        let info = ChannelInfo::new(fields);
        sink.on_channel_info(info.clone()).await;
        assert_eq!(collected.channel_infos(), vec![info]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_header_placeholder_and_echo() {
        let (collected, sink) = filter_sink(description("cat"));
        let ts = Duration::from_millis(40);
        sink.on_content_header(Content::new(3, ts, 500, &b"head"[..])).await;
        assert!(sink.is_running());
        sink.on_content(Content::new(3, ts, 504, &b"body"[..])).await;
        sink.on_stop(StopReason::OffAir).await;

        let events = collected.events();
        assert_eq!(events[0], SinkEvent::ContentHeader(Content::empty(3, ts, 0)));
        assert_eq!(events.last(), Some(&SinkEvent::Stop(StopReason::OffAir)));

        let contents = collected.contents();
        let output: Vec<u8> = contents.iter().flat_map(|c| c.data.to_vec()).collect();
        assert_eq!(output, b"headbody");
        assert_eq!(contents[0].position, 0);
        assert!(contents.iter().all(|c| c.stream == 3 && c.timestamp == ts));
        assert!(sink.is_stopped());
    }

    #[tokio::test]
    async fn test_spawn_failure_stops_sink() {
        let (collected, sink) = filter_sink(description("/nonexistent/peca-filter"));
        sink.on_content(Content::new(1, Duration::ZERO, 0, &b"x"[..])).await;
        assert!(sink.is_stopped());
        sink.on_stop(StopReason::None).await;
        assert_eq!(collected.events(), vec![SinkEvent::Stop(StopReason::None)]);
    }

    #[tokio::test]
    async fn test_header_after_stop_is_dropped() {
        let (collected, sink) = filter_sink(description("cat"));
        sink.on_stop(StopReason::UserShutdown).await;
        sink.on_content_header(Content::new(1, Duration::ZERO, 0, &b"head"[..])).await;
        assert!(!sink.is_running());
        assert_eq!(collected.events(), vec![SinkEvent::Stop(StopReason::UserShutdown)]);
    }

    #[tokio::test]
    async fn test_header_after_spawn_failure_is_dropped() {
        let (collected, sink) = filter_sink(description("/nonexistent/peca-filter"));
        sink.on_content(Content::new(1, Duration::ZERO, 0, &b"x"[..])).await;
        sink.on_content_header(Content::new(1, Duration::ZERO, 1, &b"head"[..])).await;
        assert!(collected.events().is_empty());
    }

    #[test]
    fn test_filter_name() {
        let filter = CustomFilter::new(description("cat"), FilterConfig::default());
        assert_eq!(filter.name(), "custom:test");
        assert!(filter.accepts("TS"));
    }
}
