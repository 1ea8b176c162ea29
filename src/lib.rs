#![doc(html_root_url = "https://docs.rs/hwstage/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # hwstage - Hardware Video Stage Toolkit
//!
//! `hwstage` provides the two transformation stages of a packet-driven media
//! pipeline: a decode stage turning a compressed elementary stream into raw
//! frames and an encode stage turning raw frames into a compressed stream,
//! both optionally (decode) or mandatorily (encode) backed by a hardware
//! acceleration device. The stages have no knowledge of what feeds them or
//! consumes their output; the hosting filter graph drives them through
//! `configure` / `process` / `finalize` entry points.
//!
//! The codec math itself is delegated to an external codec library behind
//! the [`session`] interfaces. What this crate implements is the machinery
//! around it:
//!
//! - Device and frame-pool lifecycle with a strict
//!   allocate/bind/use/release protocol ([`hw`])
//! - A timestamp correlation ledger recovering presentation times from
//!   sessions that reorder output or lose timing metadata
//!   ([`stage::CorrelationLedger`])
//! - A per-invocation transfer & drain engine moving frames across the
//!   hardware/host boundary and draining sessions exhaustively at
//!   end-of-stream
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! hwstage = "0.1.0"
//! ```
//!
//! ### Decoding a stream
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hwstage::av::{CodecType, VideoStreamInfo};
//! use hwstage::config::StageOptions;
//! use hwstage::stage::{DecodeStage, ProcessStatus};
//! # use hwstage::session::tests::{ScriptedProvider, new_event_log};
//! # use hwstage::av::tests::{QueueSource, CollectSink};
//!
//! # async fn run() -> hwstage::Result<()> {
//! # let provider = Arc::new(ScriptedProvider::new(new_event_log()));
//! # let mut source = QueueSource::new();
//! # let mut sink = CollectSink::new();
//! let mut stage = DecodeStage::new(StageOptions::parse("hwaccel=auto")?, provider);
//!
//! let props = VideoStreamInfo::new(CodecType::H264).with_dimensions(1920, 1080);
//! stage.configure(&props, &mut sink).await?;
//!
//! loop {
//!     if stage.process(&mut source, &mut sink).await? == ProcessStatus::EndOfStream {
//!         break;
//!     }
//! }
//! stage.finalize();
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: Packet and stream property types plus the port traits a stage is
//!   driven through
//! - `hw`: Hardware backend capability traits, the backend registry, the
//!   process-wide runtime use-count and the built-in host-memory backend
//! - `session`: The codec session interfaces the stages drive, with
//!   scripted implementations for tests
//! - `stage`: The decode and encode stages and the correlation ledger
//! - `config`: Stage options and global configuration
//! - `error`: Error types and utilities

/// Audio/Video base types and port traits
pub mod av;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Hardware acceleration capability layer
pub mod hw;

/// Codec session interfaces
pub mod session;

/// Decode and encode stages
pub mod stage;

pub use error::{Result, StageError};

// Re-export the stages for convenience
pub use stage::{DecodeStage, EncodeStage, ProcessStatus};
