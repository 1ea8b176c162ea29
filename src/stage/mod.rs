//! # Decode and Encode Stages
//!
//! The two transformation stages of this crate. Both follow one design:
//! a session lifecycle established at configure time, a correlation ledger
//! tracking in-flight source units, and a per-invocation transfer & drain
//! engine. They differ in data direction:
//!
//! - [`DecodeStage`] - compressed packets in, raw decoded frames out;
//!   hardware acceleration optional, with software fallback under `"auto"`
//! - [`EncodeStage`] - raw frames in, compressed packets out; a hardware
//!   target device is mandatory
//!
//! The host drives a stage through three entry points: `configure` once per
//! upstream connection, `process` once per scheduling tick (advancing the
//! pipeline by at most one input unit), and `finalize` at teardown.
//!
//! ## Example
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
//! let options = StageOptions::parse("hwaccel=auto")?;
//! let mut stage = DecodeStage::new(options, provider);
//!
//! let props = VideoStreamInfo::new(CodecType::H264).with_dimensions(1920, 1080);
//! stage.configure(&props, &mut sink).await?;
//!
//! while stage.process(&mut source, &mut sink).await? != ProcessStatus::EndOfStream {
//!     // host scheduler decides when to tick again
//! }
//! stage.finalize();
//! # Ok(())
//! # }
//! ```

use crate::av::CodecType;

pub mod decode;
pub mod encode;
pub mod ledger;

pub use decode::DecodeStage;
pub use encode::EncodeStage;
pub use ledger::CorrelationLedger;

/// Outcome of one `process` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The stage made progress (possibly none) and expects further ticks.
    Continue,
    /// The stream has fully drained; the output connection is ended.
    EndOfStream,
}

/// Static identity and capability description of a stage.
#[derive(Debug)]
pub struct StageDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_codecs: &'static [CodecType],
    pub output_codecs: &'static [CodecType],
}

impl StageDescriptor {
    pub fn accepts_input(&self, codec: CodecType) -> bool {
        self.input_codecs.contains(&codec)
    }
}
