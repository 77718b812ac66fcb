//! Matroska and WebM.
//!
//! Everything before the first Cluster is the content header; every
//! top-level element after it (Cluster headers, Timecodes, Blocks) becomes
//! one content. Live streams use unknown sized Segments and Clusters, so a
//! Cluster's children are read as top-level elements.

/// EBML primitives: variable length integers, element headers, the EBML header
pub mod ebml;

/// The incremental splitting state machine
pub mod parser;

/// Content reader and its factory
pub mod reader;

pub use parser::{MkvParser, ParsedContent};
pub use reader::{MKVContentReader, MKVContentReaderFactory};
