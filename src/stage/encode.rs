//! Encode stage: raw frames in, compressed packets out.
//!
//! The encode path mandates a hardware target device: every input frame is
//! copied into a host-memory staging frame, transferred into a pooled
//! accelerator frame, stamped with a strictly increasing counter (the
//! session requires monotonic counter-based timestamps internally) and
//! submitted. Drained chunks are re-stamped from the correlated source
//! unit's timing, since the session's internal timestamps are opaque to the
//! rest of the pipeline.

use log::{debug, info, warn};
use std::sync::Arc;

use crate::av::{CodecType, Fraction, Packet, PacketMeta, PacketSink, PacketSource, VideoStreamInfo};
use crate::config::StageOptions;
use crate::error::StageError;
use crate::hw::{self, HostFrame, HwDevice, HwFramePool};
use crate::session::{
    CodecProvider, EncoderSessionConfig, HwBinding, SessionPoll, VideoEncodeSession,
};
use crate::Result;

use super::ledger::CorrelationLedger;
use super::{ProcessStatus, StageDescriptor};

const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "hwenc",
    description: "Hardware-accelerated video encoder",
    input_codecs: &[CodecType::Raw],
    output_codecs: &[CodecType::H264, CodecType::H265],
};

/// Frames the session may buffer before its first output.
const ENCODE_POOL_DEPTH: usize = 20;

/// Hardware context owned by the stage. Field order mirrors the release
/// order: pool before device, runtime guard last.
struct HwContext {
    pool: Arc<dyn HwFramePool>,
    device: Arc<dyn HwDevice>,
    _runtime: hw::HwRuntimeGuard,
}

pub struct EncodeStage {
    options: StageOptions,
    provider: Arc<dyn CodecProvider>,
    session: Option<Box<dyn VideoEncodeSession>>,
    hw: Option<HwContext>,
    ledger: CorrelationLedger,
    width: u32,
    height: u32,
    fps: Fraction,
    timescale: u32,
    out_codec: CodecType,
    frame_count: i64,
    current_meta: Option<PacketMeta>,
    initialized: bool,
    ended: bool,
}

impl EncodeStage {
    pub fn descriptor() -> &'static StageDescriptor {
        &DESCRIPTOR
    }

    pub fn new(options: StageOptions, provider: Arc<dyn CodecProvider>) -> Self {
        Self {
            options,
            provider,
            session: None,
            hw: None,
            ledger: CorrelationLedger::new(),
            width: 0,
            height: 0,
            fps: Fraction::new(25, 1),
            timescale: 1000,
            out_codec: CodecType::H264,
            frame_count: 0,
            current_meta: None,
            initialized: false,
            ended: false,
        }
    }

    pub fn hardware_enabled(&self) -> bool {
        self.hw.is_some()
    }

    pub fn in_flight(&self) -> usize {
        self.ledger.len()
    }

    /// Configure the stage for one raw upstream connection and declare the
    /// compressed output downstream. An encoder instance is only built once
    /// per output geometry.
    pub async fn configure(
        &mut self,
        props: &VideoStreamInfo,
        sink: &mut dyn PacketSink,
    ) -> Result<()> {
        if self.initialized {
            return Err(StageError::RequiresNewInstance);
        }
        if !DESCRIPTOR.accepts_input(props.codec) {
            return Err(StageError::NotSupported(format!(
                "codec {}",
                props.codec.name()
            )));
        }
        if props.width == 0 || props.height == 0 {
            return Err(StageError::NotSupported(format!(
                "invalid dimensions {}x{}",
                props.width, props.height
            )));
        }

        self.out_codec = match self.options.codec.as_deref() {
            None | Some("h264") | Some("avc") => CodecType::H264,
            Some("h265") | Some("hevc") => CodecType::H265,
            Some(other) => {
                return Err(StageError::NotSupported(format!("encoder codec {}", other)))
            }
        };
        if !self.provider.supports_encode(self.out_codec) {
            return Err(StageError::NotSupported(format!(
                "codec {}",
                self.out_codec.name()
            )));
        }

        self.width = props.width;
        self.height = props.height;
        self.fps = props.fps.unwrap_or(Fraction::new(25, 1));
        self.timescale = props.timescale.unwrap_or(1000);

        if self.options.verbose {
            info!(
                "encoder options: hwaccel={} device={} bitrate={} gop={} quality={}",
                self.options.hwaccel,
                self.options.device(),
                self.options.bitrate,
                self.options.gop_size,
                self.options.quality
            );
        }

        // No software fallback path: encoding requires a hardware target.
        let backend = match self.options.hwaccel.as_str() {
            "auto" => hw::resolve_auto().ok_or_else(|| {
                StageError::NotSupported("encode requires a hardware backend".into())
            })?,
            name => hw::resolve(name).ok_or_else(|| {
                StageError::NotSupported(format!("hardware backend {} not found", name))
            })?,
        };

        let runtime = hw::runtime::acquire();
        let device = backend
            .open_device(&self.options.device())
            .map_err(|e| StageError::NotSupported(format!("device setup failed: {}", e)))?;

        let surface_format = self
            .provider
            .hardware_configs(self.out_codec)
            .into_iter()
            .find(|cfg| cfg.device_kind == backend.name())
            .map(|cfg| cfg.surface_format)
            .ok_or_else(|| {
                StageError::NotSupported(format!(
                    "no hardware config for {} on {}",
                    self.out_codec.name(),
                    backend.name()
                ))
            })?;

        if let Some(input_format) = props.pixel_format {
            if input_format != surface_format {
                return Err(StageError::NotSupported(format!(
                    "input pixel format {} (encoder expects {})",
                    input_format.as_str(),
                    surface_format.as_str()
                )));
            }
        }

        // Pool before session, so the session can bind to it.
        let pool = device.new_frame_pool(
            surface_format,
            self.width,
            self.height,
            ENCODE_POOL_DEPTH,
        )?;

        let config = EncoderSessionConfig {
            codec: self.out_codec,
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate: self.options.bitrate,
            gop_size: self.options.gop_size,
            quality: self.options.quality,
            preset: self.options.preset.clone(),
            hw: HwBinding {
                device: device.clone(),
                surface_format,
            },
            frame_pool: pool.clone(),
        };
        self.session = Some(self.provider.open_encoder(config)?);
        self.hw = Some(HwContext {
            pool,
            device,
            _runtime: runtime,
        });

        let out = VideoStreamInfo {
            codec: self.out_codec,
            width: self.width,
            height: self.height,
            fps: Some(self.fps),
            timescale: Some(self.timescale),
            decoder_config: None,
            bitrate: Some(self.options.bitrate),
            pixel_format: None,
            unframed: true,
        };
        sink.declare_stream(&out).await?;
        self.initialized = true;

        info!(
            "encoder configured for {} {}x{} @ {}/{} fps, {} bps on {}",
            self.out_codec.name(),
            self.width,
            self.height,
            self.fps.num,
            self.fps.den,
            self.options.bitrate,
            backend.name()
        );
        Ok(())
    }

    /// Advance the pipeline by one scheduling quantum: accept at most one
    /// raw input frame (or the end-of-stream signal), then drain every
    /// chunk the session has ready.
    pub async fn process(
        &mut self,
        source: &mut dyn PacketSource,
        sink: &mut dyn PacketSink,
    ) -> Result<ProcessStatus> {
        if !self.initialized {
            return Ok(ProcessStatus::Continue);
        }
        if self.ended {
            return Ok(ProcessStatus::EndOfStream);
        }

        let packet = match source.pull_packet().await? {
            Some(packet) => packet,
            None => {
                if !source.end_of_stream() {
                    return Ok(ProcessStatus::Continue);
                }
                // Flush the session, then drain everything it still holds.
                if let Some(session) = self.session.as_mut() {
                    if let Err(e) = session.submit_frame(None) {
                        warn!("encoder flush failed: {}", e);
                    }
                }
                self.drain(sink).await?;
                let outstanding = self.ledger.len();
                if outstanding > 0 {
                    debug!(
                        "releasing {} unencoded source units at end of stream",
                        outstanding
                    );
                }
                self.ledger.clear();
                sink.end_of_stream().await?;
                self.ended = true;
                return Ok(ProcessStatus::EndOfStream);
            }
        };

        if packet.data.is_empty() {
            warn!("dropping empty raw frame");
            return Ok(ProcessStatus::Continue);
        }

        let pool = match self.hw.as_ref() {
            Some(ctx) => ctx.pool.clone(),
            None => return Ok(ProcessStatus::Continue),
        };

        let meta = packet.meta();

        // Stage the payload in host memory, then transfer into a pooled
        // accelerator frame. Transfer failures are per-unit: drop and
        // continue with the next input.
        let mut host =
            match HostFrame::from_contiguous(pool.format(), self.width, self.height, &packet.data)
            {
                Ok(host) => host,
                Err(e) => {
                    warn!("dropping input unit: {}", e);
                    return Ok(ProcessStatus::Continue);
                }
            };
        host.pts = meta.pts;
        drop(packet);

        let mut frame = pool.acquire()?;
        if let Err(e) = pool.upload(&host, frame.as_mut()) {
            warn!("hardware frame transfer failed, dropping input unit: {}", e);
            return Ok(ProcessStatus::Continue);
        }

        // The session requires monotonic counter-based timestamps; the
        // original presentation time is recovered through the ledger.
        let counter = self.frame_count;
        self.frame_count += 1;
        frame.set_pts(counter);
        self.ledger.push(counter, meta.clone());
        self.current_meta = Some(meta);

        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.submit_frame(Some(frame)) {
                warn!("encode submit failed, dropping input unit: {}", e);
                self.ledger.take_matching(counter);
                return Ok(ProcessStatus::Continue);
            }
        }

        self.drain(sink).await?;
        Ok(ProcessStatus::Continue)
    }

    /// Pull every currently-ready chunk from the session and emit it with
    /// re-stamped timing.
    async fn drain(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        loop {
            let poll = match self.session.as_mut() {
                Some(session) => session.poll_packet(),
                None => break,
            };
            match poll {
                Err(e) => {
                    warn!("encoder receive failed: {}", e);
                    break;
                }
                Ok(SessionPoll::NeedInput) | Ok(SessionPoll::Finished) => break,
                Ok(SessionPoll::Output(chunk)) => {
                    let meta = chunk
                        .pts
                        .and_then(|counter| self.ledger.take_matching(counter))
                        .or_else(|| self.current_meta.clone());

                    let mut packet = Packet::new(chunk.data);
                    if let Some(meta) = meta {
                        packet.pts = meta.pts;
                        packet.dts = meta.dts;
                        packet.duration = meta.duration;
                    }
                    packet.is_key = chunk.keyframe;
                    sink.send_packet(packet).await?;
                }
            }
        }
        Ok(())
    }

    /// Tear down in dependency order: session, then frame pool, then
    /// device. Outstanding ledger entries are released without emission.
    pub fn finalize(&mut self) {
        let outstanding = self.ledger.len();
        if outstanding > 0 {
            debug!("releasing {} outstanding source units", outstanding);
        }
        self.ledger.clear();
        self.session = None;
        self.hw = None;
        self.initialized = false;
    }
}

impl Drop for EncodeStage {
    fn drop(&mut self) {
        self.finalize();
    }
}
