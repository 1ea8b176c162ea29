//! Decode stage: compressed packets in, raw decoded frames out.
//!
//! Hardware acceleration is optional. Under `hwaccel=auto` the stage falls
//! back to pure software operation when no hardware backend resolves; an
//! explicitly named backend that does not resolve fails configuration
//! instead. Hardware-resident frames are transferred to host memory before
//! emission, since downstream consumers are host-memory consumers.

use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::av::{CodecType, Fraction, Packet, PacketMeta, PacketSink, PacketSource, VideoStreamInfo};
use crate::config::StageOptions;
use crate::error::StageError;
use crate::hw::{self, HostFrame, HwDevice, PixelFormat};
use crate::session::{
    CodecProvider, DecodedFrame, DecoderSessionConfig, HwBinding, SessionPoll,
    VideoDecodeSession,
};
use crate::Result;

use super::ledger::CorrelationLedger;
use super::{ProcessStatus, StageDescriptor};

const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "hwdec",
    description: "Hardware-accelerated video decoder",
    input_codecs: &[CodecType::H264, CodecType::H265],
    output_codecs: &[CodecType::Raw],
};

/// Hardware context owned by the stage. Field order mirrors the release
/// order: the runtime guard drops last.
struct HwContext {
    device: Arc<dyn HwDevice>,
    surface_format: PixelFormat,
    _runtime: hw::HwRuntimeGuard,
}

pub struct DecodeStage {
    options: StageOptions,
    provider: Arc<dyn CodecProvider>,
    session: Option<Box<dyn VideoDecodeSession>>,
    hw: Option<HwContext>,
    ledger: CorrelationLedger,
    width: u32,
    height: u32,
    output_format: PixelFormat,
    fps: Option<Fraction>,
    timescale: Option<u32>,
    last_pts: i64,
    initialized: bool,
    ended: bool,
}

impl DecodeStage {
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
            output_format: PixelFormat::Yuv420p,
            fps: None,
            timescale: None,
            last_pts: 0,
            initialized: false,
            ended: false,
        }
    }

    /// Whether hardware setup succeeded during configuration.
    pub fn hardware_enabled(&self) -> bool {
        self.hw.is_some()
    }

    /// Number of source units currently awaiting correlation.
    pub fn in_flight(&self) -> usize {
        self.ledger.len()
    }

    /// Configure the stage for one upstream connection and declare the
    /// derived raw output downstream.
    pub async fn configure(
        &mut self,
        props: &VideoStreamInfo,
        sink: &mut dyn PacketSink,
    ) -> Result<()> {
        if self.initialized {
            return Err(StageError::RequiresNewInstance);
        }
        if !DESCRIPTOR.accepts_input(props.codec) || !self.provider.supports_decode(props.codec)
        {
            return Err(StageError::NotSupported(format!(
                "codec {}",
                props.codec.name()
            )));
        }

        if self.options.verbose {
            info!(
                "decoder options: hwaccel={} device={}",
                self.options.hwaccel,
                self.options.device()
            );
        }

        self.width = props.width;
        self.height = props.height;
        self.fps = props.fps;
        self.timescale = props.timescale;

        self.setup_accel(props.codec)?;
        if let Some(ctx) = &self.hw {
            self.output_format = ctx.surface_format;
        }

        let config = DecoderSessionConfig {
            codec: props.codec,
            width: props.width,
            height: props.height,
            extradata: props.decoder_config.clone(),
            hw: self.hw.as_ref().map(|ctx| HwBinding {
                device: ctx.device.clone(),
                surface_format: ctx.surface_format,
            }),
        };
        self.session = Some(self.provider.open_decoder(config)?);

        sink.declare_stream(&self.output_info()).await?;
        self.initialized = true;

        info!(
            "decoder configured for {} {}x{}, hardware: {}",
            props.codec.name(),
            self.width,
            self.height,
            if self.hw.is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(())
    }

    /// Resolve the hardware backend, open its device and discover the
    /// surface format. Leaves `self.hw` unset for software operation.
    fn setup_accel(&mut self, codec: CodecType) -> Result<()> {
        let backend = match self.options.hwaccel.as_str() {
            "none" => return Ok(()),
            "auto" => match hw::resolve_auto() {
                Some(backend) => backend,
                None => {
                    info!("no hardware backend available, using software decode");
                    return Ok(());
                }
            },
            name => hw::resolve(name).ok_or_else(|| {
                StageError::NotSupported(format!("hardware backend {} not found", name))
            })?,
        };

        let runtime = hw::runtime::acquire();
        let device = backend
            .open_device(&self.options.device())
            .map_err(|e| StageError::NotSupported(format!("device setup failed: {}", e)))?;

        // Intersect the codec's advertised hardware configs with the
        // resolved backend kind.
        let surface_format = self
            .provider
            .hardware_configs(codec)
            .into_iter()
            .find(|cfg| cfg.device_kind == backend.name())
            .map(|cfg| cfg.surface_format)
            .ok_or_else(|| {
                StageError::NotSupported(format!(
                    "no hardware config for {} on {}",
                    codec.name(),
                    backend.name()
                ))
            })?;

        info!("hardware acceleration enabled: {}", backend.name());
        self.hw = Some(HwContext {
            device,
            surface_format,
            _runtime: runtime,
        });
        Ok(())
    }

    /// Advance the pipeline by one scheduling quantum: accept at most one
    /// input packet (or the end-of-stream signal), then drain every frame
    /// the session has ready.
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

        let packet = source.pull_packet().await?;
        let is_eos = packet.is_none() && source.end_of_stream();
        if packet.is_none() && !is_eos {
            return Ok(ProcessStatus::Continue);
        }

        let mut submit_meta: Option<PacketMeta> = None;
        let payload: Option<Bytes> = match packet {
            Some(packet) => {
                if packet.data.is_empty() {
                    return Err(StageError::NonCompliant("zero-byte packet payload".into()));
                }
                let meta = packet.meta();
                // Source units without a presentation time cannot be
                // correlated; they fall back at emission.
                if let Some(pts) = meta.pts {
                    self.ledger.push(pts, meta.clone());
                }
                submit_meta = Some(meta);
                Some(packet.data)
            }
            None => None,
        };

        match self.session.as_mut() {
            Some(session) => session
                .submit_packet(payload.as_ref(), submit_meta.as_ref())
                .map_err(|e| StageError::NonCompliant(format!("decode failed: {}", e)))?,
            None => return Ok(ProcessStatus::Continue),
        }

        let mut produced = false;
        loop {
            let poll = match self.session.as_mut() {
                Some(session) => session
                    .poll_frame()
                    .map_err(|e| StageError::NonCompliant(format!("decode failed: {}", e)))?,
                None => break,
            };
            match poll {
                SessionPoll::NeedInput | SessionPoll::Finished => break,
                SessionPoll::Output(frame) => {
                    let host = match frame {
                        DecodedFrame::Host(frame) => frame,
                        DecodedFrame::Device(frame) => {
                            let Some(ctx) = self.hw.as_ref() else {
                                warn!("device frame without hardware context, dropping");
                                continue;
                            };
                            match ctx.device.download(frame.as_ref()) {
                                Ok(host) => host,
                                Err(e) => {
                                    warn!("hardware frame transfer failed, dropping: {}", e);
                                    continue;
                                }
                            }
                        }
                    };
                    self.emit_frame(host, sink).await?;
                    produced = true;
                }
            }
        }

        if is_eos && !produced {
            let outstanding = self.ledger.len();
            if outstanding > 0 {
                debug!("releasing {} uncorrelated source units at end of stream", outstanding);
            }
            self.ledger.clear();
            sink.end_of_stream().await?;
            self.ended = true;
            return Ok(ProcessStatus::EndOfStream);
        }
        Ok(ProcessStatus::Continue)
    }

    async fn emit_frame(&mut self, frame: HostFrame, sink: &mut dyn PacketSink) -> Result<()> {
        // Geometry may change frame-to-frame; the output declaration is
        // updated before the emission that carries the new geometry.
        if frame.width != self.width
            || frame.height != self.height
            || frame.format != self.output_format
        {
            debug!(
                "output geometry changed to {}x{} {}",
                frame.width,
                frame.height,
                frame.format.as_str()
            );
            self.width = frame.width;
            self.height = frame.height;
            self.output_format = frame.format;
            let info = self.output_info();
            sink.declare_stream(&info).await?;
        }

        let matched = frame.pts.and_then(|pts| self.ledger.take_matching(pts));
        let timestamp = match &matched {
            Some(meta) => meta.pts.unwrap_or(self.last_pts + 1),
            None => self.last_pts + 1,
        };

        let mut packet = Packet::new(frame.to_contiguous())
            .with_pts(timestamp)
            .with_dts(timestamp);
        match matched {
            Some(meta) => {
                packet.is_key = meta.is_key;
                if let Some(duration) = meta.duration {
                    packet = packet.with_duration(duration);
                }
            }
            // No correlated source unit: synthetic random-access point.
            None => packet.is_key = true,
        }

        self.last_pts = timestamp;
        sink.send_packet(packet).await?;
        Ok(())
    }

    /// Tear down in dependency order: session first, then the hardware
    /// context. Outstanding ledger entries are released without emission.
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

    fn output_info(&self) -> VideoStreamInfo {
        VideoStreamInfo {
            codec: CodecType::Raw,
            width: self.width,
            height: self.height,
            fps: self.fps,
            timescale: self.timescale,
            decoder_config: None,
            bitrate: None,
            pixel_format: Some(self.output_format),
            unframed: false,
        }
    }
}

impl Drop for DecodeStage {
    fn drop(&mut self) {
        self.finalize();
    }
}
