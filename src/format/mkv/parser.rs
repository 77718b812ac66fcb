use super::ebml::*;
use crate::error::{IngestError, Result};
use bytes::{Bytes, BytesMut};
use log::debug;
use std::collections::VecDeque;

/// Cluster time observed before a bitrate estimate is published, in seconds.
const BITRATE_WINDOW: f64 = 30.0;

const DEFAULT_TIMECODE_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ebml,
    Segment,
    EndOfHeader,
    Cluster,
    Timecode,
    Block,
}

/// What one step did with the element at the cursor.
enum Step {
    Consumed(usize),
    /// The state changed; look at the same element again.
    Retry,
    /// Stop here so a new header is not mixed with contents of the old one.
    Yield,
}

#[derive(Debug, Default)]
struct ClusterStats {
    block_size: u64,
    timecode: f64,
    timespan: f64,
}

/// Output of one [`MkvParser::parse`] call.
#[derive(Debug, Default)]
pub struct ParsedContent {
    /// Bytes of input fully handled. The caller drops them before the next call.
    pub consumed: usize,
    /// A new stream header, always ahead of `contents`
    pub content_header: Option<Bytes>,
    /// One entry per top-level element after the header, in stream order
    pub contents: Vec<Bytes>,
    /// New bitrate estimate in kbps
    pub bitrate: Option<i32>,
}

/// Incremental Matroska/WebM splitter.
///
/// Fed a growing buffer, it splits everything up to the first Cluster into
/// the stream header and each element after it into its own content. It holds
/// no input between calls; unconsumed bytes are handed back by the caller.
#[derive(Debug)]
pub struct MkvParser {
    state: State,
    ebml: EbmlHeader,
    ebml_element: Bytes,
    segment_header: Bytes,
    header_elements: Vec<Bytes>,
    timecode_scale: f64,
    clusters: VecDeque<ClusterStats>,
}

impl Default for MkvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MkvParser {
    pub fn new() -> Self {
        Self {
            state: State::Ebml,
            ebml: EbmlHeader::default(),
            ebml_element: Bytes::new(),
            segment_header: Bytes::new(),
            header_elements: Vec::new(),
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            clusters: VecDeque::new(),
        }
    }

    /// DocType of the current stream.
    pub fn doc_type(&self) -> &str {
        &self.ebml.doc_type
    }

    pub fn is_webm(&self) -> bool {
        self.ebml.is_webm()
    }

    /// Parses as many complete elements as `input` holds.
    ///
    /// Returns `EndOfStream` when not a single element could be handled.
    pub fn parse(&mut self, input: &[u8]) -> Result<ParsedContent> {
        let mut out = ParsedContent::default();
        let mut pos = 0;
        let mut processed = false;
        while pos < input.len() {
            match self.step(&input[pos..], &mut out) {
                Ok(Step::Consumed(n)) => {
                    pos += n;
                    processed = true;
                }
                Ok(Step::Retry) => {}
                Ok(Step::Yield) => break,
                Err(IngestError::EndOfStream) => break,
                Err(IngestError::InvalidData(reason)) => {
                    debug!("mkv: skipping byte at {}: {}", pos, reason);
                    pos += 1;
                }
                Err(err) => return Err(err),
            }
        }
        if !processed && pos == 0 {
            return Err(IngestError::EndOfStream);
        }
        out.consumed = pos;
        Ok(out)
    }

    fn step(&mut self, input: &[u8], out: &mut ParsedContent) -> Result<Step> {
        let header = ElementHeader::read(input)?;
        if header.id.length > self.ebml.max_id_length
            || header.size.length > self.ebml.max_size_length
        {
            return Err(IngestError::InvalidData("element header too long".into()));
        }
        let id = header.id.raw;

        if self.state != State::Ebml && self.state != State::Segment {
            match id {
                ID_SEGMENT => return Ok(self.restart(State::Segment)),
                ID_EBML => return Ok(self.restart(State::Ebml)),
                _ => {}
            }
        }

        match self.state {
            State::Ebml => {
                if id != ID_EBML {
                    return Err(IngestError::InvalidData("expected EBML".into()));
                }
                let element = Element::read(input)?;
                self.ebml = EbmlHeader::parse(element.body())?;
                let len = element.len();
                self.ebml_element = element.raw;
                self.state = State::Segment;
                Ok(Step::Consumed(len))
            }
            State::Segment => match id {
                ID_SEGMENT => {
                    let element = Element::read_header(input)?;
                    let len = element.len();
                    self.segment_header = element.raw;
                    self.header_elements.clear();
                    self.timecode_scale = DEFAULT_TIMECODE_SCALE;
                    self.state = State::EndOfHeader;
                    Ok(Step::Consumed(len))
                }
                ID_EBML => Ok(self.restart(State::Ebml)),
                ID_VOID | ID_CRC32 => {
                    let element = Element::read(input)?;
                    Ok(Step::Consumed(element.len()))
                }
                _ => Err(IngestError::InvalidData("expected Segment".into())),
            },
            State::EndOfHeader => {
                if id == ID_CLUSTER {
                    if !out.contents.is_empty() {
                        return Ok(Step::Yield);
                    }
                    out.content_header = Some(self.header());
                    self.clusters.clear();
                    self.state = State::Cluster;
                    return Ok(Step::Retry);
                }
                let element = Element::read(input)?;
                if id == ID_INFO {
                    self.read_timecode_scale(element.body());
                }
                let len = element.len();
                self.header_elements.push(element.raw);
                Ok(Step::Consumed(len))
            }
            State::Cluster => match id {
                ID_CLUSTER => {
                    let element = Element::read_header(input)?;
                    if let Some(bitrate) = self.estimate_bitrate() {
                        out.bitrate = Some(bitrate);
                    }
                    self.clusters.push_back(ClusterStats::default());
                    self.state = State::Timecode;
                    Ok(Self::emit(out, element))
                }
                ID_VOID | ID_CRC32 => Ok(Self::emit(out, Element::read(input)?)),
                _ => Err(IngestError::InvalidData("expected Cluster".into())),
            },
            State::Timecode => match id {
                ID_CLUSTER => Ok(self.restart(State::Cluster)),
                ID_SIMPLE_BLOCK | ID_BLOCK_GROUP => Ok(self.restart(State::Block)),
                ID_TIMECODE => {
                    let element = Element::read(input)?;
                    let timecode = read_uint(element.body()) as f64 * self.timecode_scale / 1e9;
                    self.set_cluster_timecode(timecode);
                    self.state = State::Block;
                    Ok(Self::emit(out, element))
                }
                _ => Ok(Self::emit(out, Element::read(input)?)),
            },
            State::Block => match id {
                ID_CLUSTER => Ok(self.restart(State::Cluster)),
                ID_SIMPLE_BLOCK | ID_BLOCK_GROUP => {
                    let element = Element::read(input)?;
                    if let Some(cluster) = self.clusters.back_mut() {
                        cluster.block_size += element.header.size.value;
                    }
                    Ok(Self::emit(out, element))
                }
                _ => Ok(Self::emit(out, Element::read(input)?)),
            },
        }
    }

    fn restart(&mut self, state: State) -> Step {
        self.state = state;
        Step::Retry
    }

    fn emit(out: &mut ParsedContent, element: Element) -> Step {
        let len = element.len();
        out.contents.push(element.raw);
        Step::Consumed(len)
    }

    fn header(&self) -> Bytes {
        let mut header = BytesMut::new();
        header.extend_from_slice(&self.ebml_element);
        header.extend_from_slice(&self.segment_header);
        for element in &self.header_elements {
            header.extend_from_slice(element);
        }
        header.freeze()
    }

    fn read_timecode_scale(&mut self, info: &[u8]) {
        for child in children(info).flatten() {
            if child.id() == ID_TIMECODE_SCALE {
                self.timecode_scale = read_uint(child.body()) as f64;
            }
        }
    }

    fn set_cluster_timecode(&mut self, timecode: f64) {
        let count = self.clusters.len();
        if let Some(last) = self.clusters.back_mut() {
            last.timecode = timecode;
        }
        if count > 1 {
            let previous = self.clusters[count - 2].timecode;
            self.clusters[count - 2].timespan = timecode - previous;
        }
    }

    /// Bitrate over the clusters seen so far, once they span the window.
    /// Keeps only the newest cluster afterwards.
    fn estimate_bitrate(&mut self) -> Option<i32> {
        let timespan: f64 = self.clusters.iter().map(|c| c.timespan).sum();
        if self.clusters.is_empty() || timespan < BITRATE_WINDOW {
            return None;
        }
        let size: u64 = self
            .clusters
            .iter()
            .filter(|c| c.timespan > 0.0)
            .map(|c| c.block_size)
            .sum();
        let kbps = ((size as f64 * 8.0 / timespan + 900.0) / 1000.0) as i32;
        while self.clusters.len() > 1 {
            self.clusters.pop_front();
        }
        Some(kbps)
    }
}

/// Reads the DocType of a stream starting with an EBML header.
pub fn sniff_doc_type(input: &[u8]) -> Option<String> {
    let element = Element::read(input).ok()?;
    if element.id() != ID_EBML {
        return None;
    }
    EbmlHeader::parse(element.body()).ok().map(|h| h.doc_type)
}
