#![doc(html_root_url = "https://docs.rs/peca-ingest/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # peca-ingest - content ingestion for a PeerCast servent
//!
//! `peca-ingest` turns the byte stream a broadcaster pushes into a channel
//! into the packet model a servent relays: a content header from which a
//! listener can start decoding, followed by timestamped, positioned contents,
//! plus the channel metadata derived from the container.
//!
//! ## Features
//!
//! ### Container readers
//! - MPEG-2 TS, re-segmented at audio/video PES starts with PAT/PMT as header
//! - Matroska and WebM, one content per top-level element after the header
//! - ASF (WMV/WMA) carried in WMSP frames
//! - Content type sniffing from the first bytes of a stream
//!
//! ### Filters
//! - Custom filters piping a channel through an external program
//! - Filter descriptions loaded from TOML files, with hot reload
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peca_ingest::av::{Channel, ChannelContentSink};
//! use peca_ingest::config::Config;
//! use peca_ingest::format::{default_factories, detect_content_type};
//! use std::sync::Arc;
//! use tokio::io::AsyncReadExt;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let factories = default_factories(&config);
//!
//!     let mut file = tokio::fs::File::open("stream.ts").await?;
//!     let mut head = vec![0u8; 4096];
//!     let n = file.read(&mut head).await?;
//!     let (factory, found) = detect_content_type(&factories, &head[..n])
//!         .ok_or("unknown content type")?;
//!     println!("{} ({})", found.content_type, found.mime_type);
//!
//!     let channel = Arc::new(Channel::new());
//!     let sink = ChannelContentSink::new(channel.clone(), true);
//!     let mut stream = &head[..n];
//!     let mut reader = factory.create(channel.clone());
//!     let outcome = reader.read(&sink, &mut stream, &CancellationToken::new()).await;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: packet and metadata model, the channel and the sink seam
//! - `format`: reader traits, sniffing and the TS, MKV and ASF readers
//! - `filter`: filter traits, the custom filter and its registry
//! - `config`: reader and filter tunables, from TOML and the environment
//! - `error`: error type and result alias
//! - `utils`: MPEG-2 CRC32

/// Packets, channel metadata, the channel and the downstream sink seam
pub mod av;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Content filters, including the external process filter
pub mod filter;

/// Content readers for the supported containers
pub mod format;

/// Common utilities and helper functions
pub mod utils;

pub use error::{IngestError, Result};
