//! # Codec Session Interfaces
//!
//! The codec engine itself (bitstream parsing, entropy coding, rate control)
//! is an external collaborator. This module defines the session API the
//! stages drive:
//!
//! - [`VideoDecodeSession`] / [`VideoEncodeSession`] - stateful sessions that
//!   may buffer arbitrarily many inputs before producing any output
//! - [`CodecProvider`] - opens sessions and advertises hardware codec configs
//! - [`SessionPoll`] - the pull-side protocol (`Output` / `NeedInput` / `Finished`)
//!
//! A session is exclusively owned by one stage, created at configure time
//! and destroyed at finalize time, before the frame pool and device it is
//! bound to.
//!
//! ## Surface format negotiation
//!
//! When a hardware decode session opens, the codec offers a candidate format
//! set. [`select_surface_format`] is the negotiation capability the session
//! builder applies: pick the first candidate matching the resolved hardware
//! surface format, or fall back to the codec's own default policy when none
//! matches.

use bytes::Bytes;
use std::sync::Arc;

use crate::av::{CodecType, Fraction, PacketMeta};
use crate::hw::{HostFrame, HwDevice, HwFrame, HwFramePool, PixelFormat};
use crate::Result;

/// Result of pulling one output unit from a session.
#[derive(Debug)]
pub enum SessionPoll<T> {
    /// One output unit is ready.
    Output(T),
    /// The session needs more input before producing output.
    NeedInput,
    /// The session has fully drained; no further output will appear.
    Finished,
}

/// A decoded video frame, either already host-resident or still in
/// accelerator memory.
pub enum DecodedFrame {
    Host(HostFrame),
    Device(Box<dyn HwFrame>),
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        match self {
            DecodedFrame::Host(f) => f.width,
            DecodedFrame::Device(f) => f.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            DecodedFrame::Host(f) => f.height,
            DecodedFrame::Device(f) => f.height(),
        }
    }

    pub fn pts(&self) -> Option<i64> {
        match self {
            DecodedFrame::Host(f) => f.pts,
            DecodedFrame::Device(f) => f.pts(),
        }
    }
}

/// One encoded unit drained from an encode session.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub data: Bytes,
    /// The counter timestamp the session assigned, echoed from submission.
    pub pts: Option<i64>,
    pub keyframe: bool,
}

/// A stateful decode session. Submissions and outputs are decoupled: the
/// session may buffer any number of packets before the first frame appears,
/// and may reorder output relative to submission.
pub trait VideoDecodeSession: Send {
    /// Submit one compressed payload, or `None` to begin the end-of-stream
    /// drain. Timing metadata accompanies the payload for sessions that
    /// propagate it.
    fn submit_packet(&mut self, payload: Option<&Bytes>, meta: Option<&PacketMeta>)
        -> Result<()>;

    /// Pull the next ready frame.
    fn poll_frame(&mut self) -> Result<SessionPoll<DecodedFrame>>;
}

/// A stateful encode session consuming accelerator-resident frames.
pub trait VideoEncodeSession: Send {
    /// Submit one frame, or `None` to flush.
    fn submit_frame(&mut self, frame: Option<Box<dyn HwFrame>>) -> Result<()>;

    /// Pull the next ready encoded unit.
    fn poll_packet(&mut self) -> Result<SessionPoll<EncodedChunk>>;
}

/// Hardware context a session binds to.
#[derive(Clone)]
pub struct HwBinding {
    pub device: Arc<dyn HwDevice>,
    /// Surface format resolved during configuration; immutable afterwards.
    pub surface_format: PixelFormat,
}

/// Everything needed to open a decode session.
pub struct DecoderSessionConfig {
    pub codec: CodecType,
    pub width: u32,
    pub height: u32,
    /// Decoder configuration record from the stream properties, forwarded
    /// opaquely.
    pub extradata: Option<Bytes>,
    /// Present when the stage resolved a hardware backend; absent for pure
    /// software operation.
    pub hw: Option<HwBinding>,
}

/// Everything needed to open an encode session.
pub struct EncoderSessionConfig {
    pub codec: CodecType,
    pub width: u32,
    pub height: u32,
    pub fps: Fraction,
    pub bitrate: u32,
    pub gop_size: u32,
    pub quality: u32,
    pub preset: Option<String>,
    pub hw: HwBinding,
    /// Pre-allocated pool the session draws its frames from.
    pub frame_pool: Arc<dyn HwFramePool>,
}

/// A hardware configuration advertised by a codec: which backend kind it can
/// decode/encode on, and the surface format it produces there.
#[derive(Debug, Clone)]
pub struct HwCodecConfig {
    pub device_kind: String,
    pub surface_format: PixelFormat,
}

/// Opens codec sessions. One provider serves any number of stages.
pub trait CodecProvider: Send + Sync {
    fn supports_decode(&self, codec: CodecType) -> bool;

    fn supports_encode(&self, codec: CodecType) -> bool;

    /// Hardware configs advertised for `codec`, to be intersected with the
    /// resolved backend kind.
    fn hardware_configs(&self, codec: CodecType) -> Vec<HwCodecConfig>;

    fn open_decoder(&self, config: DecoderSessionConfig) -> Result<Box<dyn VideoDecodeSession>>;

    fn open_encoder(&self, config: EncoderSessionConfig) -> Result<Box<dyn VideoEncodeSession>>;
}

/// Pick the first candidate equal to the resolved hardware surface format.
/// `None` means the codec's default resolution policy applies.
pub fn select_surface_format(
    candidates: &[PixelFormat],
    resolved: PixelFormat,
) -> Option<PixelFormat> {
    candidates.iter().copied().find(|c| *c == resolved)
}

pub mod tests {
    //! Scripted sessions, provider and hardware backend for driving the
    //! stages without a real codec library or accelerator.

    use super::*;
    use crate::error::StageError;
    use crate::hw::HwBackend;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::any::Any;
    use std::collections::VecDeque;

    /// Lifecycle events recorded by the scripted collaborators.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LifecycleEvent {
        DeviceCreated,
        DeviceReleased,
        PoolCreated,
        PoolReleased,
        Upload,
        Download,
        DecoderOpened,
        DecoderReleased,
        EncoderOpened,
        EncoderReleased,
    }

    pub type EventLog = Arc<Mutex<Vec<LifecycleEvent>>>;

    pub fn new_event_log() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Index of the first occurrence of `event`, or `None`.
    pub fn event_index(log: &EventLog, event: LifecycleEvent) -> Option<usize> {
        log.lock().iter().position(|e| *e == event)
    }

    /// Number of occurrences of `event`.
    pub fn event_count(log: &EventLog, event: LifecycleEvent) -> usize {
        log.lock().iter().filter(|e| **e == event).count()
    }

    // ----- scripted hardware backend -----

    /// A backend whose device, pool and transfer behavior is scripted.
    pub struct ScriptedBackend {
        name: String,
        log: EventLog,
        upload_failures: Arc<Mutex<u32>>,
        device_failure: Mutex<bool>,
    }

    impl ScriptedBackend {
        pub fn new(name: impl Into<String>, log: EventLog) -> Self {
            Self {
                name: name.into(),
                log,
                upload_failures: Arc::new(Mutex::new(0)),
                device_failure: Mutex::new(false),
            }
        }

        /// Fail the next `n` uploads, then succeed again.
        pub fn fail_uploads(&self, n: u32) {
            *self.upload_failures.lock() = n;
        }

        /// Make `open_device` fail.
        pub fn fail_device(&self, fail: bool) {
            *self.device_failure.lock() = fail;
        }
    }

    impl HwBackend for ScriptedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_hardware(&self) -> bool {
            false
        }

        fn probe(&self) -> bool {
            true
        }

        fn open_device(&self, locator: &str) -> Result<Arc<dyn HwDevice>> {
            if *self.device_failure.lock() {
                return Err(StageError::NotSupported(
                    "scripted device failure".into(),
                ));
            }
            self.log.lock().push(LifecycleEvent::DeviceCreated);
            Ok(Arc::new(ScriptedDevice {
                backend: self.name.clone(),
                locator: locator.to_string(),
                log: self.log.clone(),
                upload_failures: self.upload_failures.clone(),
            }))
        }
    }

    struct ScriptedDevice {
        backend: String,
        locator: String,
        log: EventLog,
        upload_failures: Arc<Mutex<u32>>,
    }

    impl Drop for ScriptedDevice {
        fn drop(&mut self) {
            self.log.lock().push(LifecycleEvent::DeviceReleased);
        }
    }

    impl HwDevice for ScriptedDevice {
        fn backend_name(&self) -> &str {
            &self.backend
        }

        fn locator(&self) -> &str {
            &self.locator
        }

        fn new_frame_pool(
            &self,
            format: PixelFormat,
            width: u32,
            height: u32,
            depth: usize,
        ) -> Result<Arc<dyn HwFramePool>> {
            self.log.lock().push(LifecycleEvent::PoolCreated);
            Ok(Arc::new(ScriptedPool {
                format,
                width,
                height,
                depth,
                in_use: Arc::new(Mutex::new(0)),
                log: self.log.clone(),
                upload_failures: self.upload_failures.clone(),
            }))
        }

        fn download(&self, frame: &dyn HwFrame) -> Result<HostFrame> {
            let surface = frame
                .as_any()
                .downcast_ref::<ScriptedSurface>()
                .ok_or_else(|| StageError::Transfer("foreign frame".into()))?;
            self.log.lock().push(LifecycleEvent::Download);
            Ok(HostFrame {
                format: surface.format,
                width: surface.width,
                height: surface.height,
                planes: surface.planes.clone(),
                pts: surface.pts,
            })
        }
    }

    struct ScriptedPool {
        format: PixelFormat,
        width: u32,
        height: u32,
        depth: usize,
        in_use: Arc<Mutex<usize>>,
        log: EventLog,
        upload_failures: Arc<Mutex<u32>>,
    }

    impl Drop for ScriptedPool {
        fn drop(&mut self) {
            self.log.lock().push(LifecycleEvent::PoolReleased);
        }
    }

    impl HwFramePool for ScriptedPool {
        fn format(&self) -> PixelFormat {
            self.format
        }

        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn acquire(&self) -> Result<Box<dyn HwFrame>> {
            {
                let mut in_use = self.in_use.lock();
                if *in_use >= self.depth {
                    return Err(StageError::OutOfMemory("frame pool exhausted".into()));
                }
                *in_use += 1;
            }
            let mut frame = ScriptedSurface::new(self.format, self.width, self.height, None);
            frame._slot = Some(SlotGuard {
                in_use: self.in_use.clone(),
            });
            Ok(Box::new(frame))
        }

        fn upload(&self, src: &HostFrame, dst: &mut dyn HwFrame) -> Result<()> {
            {
                let mut failures = self.upload_failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(StageError::Transfer("scripted upload failure".into()));
                }
            }
            let surface = dst
                .as_any_mut()
                .downcast_mut::<ScriptedSurface>()
                .ok_or_else(|| StageError::Transfer("foreign frame".into()))?;
            surface.planes = src.planes.clone();
            surface.pts = src.pts;
            self.log.lock().push(LifecycleEvent::Upload);
            Ok(())
        }
    }

    struct SlotGuard {
        in_use: Arc<Mutex<usize>>,
    }

    impl Drop for SlotGuard {
        fn drop(&mut self) {
            *self.in_use.lock() -= 1;
        }
    }

    /// An accelerator-resident frame owned by the scripted backend.
    pub struct ScriptedSurface {
        format: PixelFormat,
        width: u32,
        height: u32,
        pts: Option<i64>,
        planes: Vec<Bytes>,
        _slot: Option<SlotGuard>,
    }

    impl ScriptedSurface {
        fn new(format: PixelFormat, width: u32, height: u32, pts: Option<i64>) -> Self {
            let planes = format
                .plane_sizes(width, height)
                .into_iter()
                .map(|size| Bytes::from(vec![0u8; size]))
                .collect();
            Self {
                format,
                width,
                height,
                pts,
                planes,
                _slot: None,
            }
        }

        /// A device-resident frame as a decode session would produce it.
        pub fn device_frame(
            format: PixelFormat,
            width: u32,
            height: u32,
            pts: Option<i64>,
        ) -> DecodedFrame {
            DecodedFrame::Device(Box::new(Self::new(format, width, height, pts)))
        }
    }

    impl HwFrame for ScriptedSurface {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn format(&self) -> PixelFormat {
            self.format
        }

        fn pts(&self) -> Option<i64> {
            self.pts
        }

        fn set_pts(&mut self, pts: i64) {
            self.pts = Some(pts);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// A host-resident decoded frame with zeroed 4:2:0 planar payload.
    pub fn host_frame(width: u32, height: u32, pts: Option<i64>) -> DecodedFrame {
        let planes = PixelFormat::Yuv420p
            .plane_sizes(width, height)
            .into_iter()
            .map(|size| Bytes::from(vec![0u8; size]))
            .collect();
        DecodedFrame::Host(HostFrame {
            format: PixelFormat::Yuv420p,
            width,
            height,
            planes,
            pts,
        })
    }

    // ----- scripted decode session -----

    /// A decode session that releases queued frames on a scripted schedule.
    ///
    /// Each submission moves the next `release_plan` count of frames (default
    /// one) from the script into the ready queue; the drain submission moves
    /// the rest. This reproduces codec buffering and reordering exactly.
    pub struct ScriptedDecodeSession {
        script: VecDeque<DecodedFrame>,
        release_plan: VecDeque<usize>,
        ready: VecDeque<DecodedFrame>,
        draining: bool,
        log: EventLog,
    }

    impl ScriptedDecodeSession {
        pub fn new(log: EventLog) -> Self {
            Self {
                script: VecDeque::new(),
                release_plan: VecDeque::new(),
                ready: VecDeque::new(),
                draining: false,
                log,
            }
        }

        /// Queue a frame in emission order.
        pub fn queue_frame(&mut self, frame: DecodedFrame) {
            self.script.push_back(frame);
        }

        /// How many frames become ready after each successive submission.
        pub fn set_release_plan(&mut self, plan: &[usize]) {
            self.release_plan = plan.iter().copied().collect();
        }
    }

    impl Drop for ScriptedDecodeSession {
        fn drop(&mut self) {
            self.log.lock().push(LifecycleEvent::DecoderReleased);
        }
    }

    impl VideoDecodeSession for ScriptedDecodeSession {
        fn submit_packet(
            &mut self,
            payload: Option<&Bytes>,
            _meta: Option<&PacketMeta>,
        ) -> Result<()> {
            if payload.is_none() {
                self.draining = true;
                while let Some(frame) = self.script.pop_front() {
                    self.ready.push_back(frame);
                }
                return Ok(());
            }
            let count = self.release_plan.pop_front().unwrap_or(1);
            for _ in 0..count {
                if let Some(frame) = self.script.pop_front() {
                    self.ready.push_back(frame);
                }
            }
            Ok(())
        }

        fn poll_frame(&mut self) -> Result<SessionPoll<DecodedFrame>> {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(SessionPoll::Output(frame));
            }
            if self.draining {
                Ok(SessionPoll::Finished)
            } else {
                Ok(SessionPoll::NeedInput)
            }
        }
    }

    // ----- scripted encode session -----

    /// An encode session that buffers `delay` frames before emitting and
    /// echoes the submitted counter timestamps on its chunks.
    pub struct ScriptedEncodeSession {
        buffered: VecDeque<i64>,
        ready: VecDeque<EncodedChunk>,
        delay: usize,
        echo_pts: bool,
        keyframe_interval: i64,
        flushed: bool,
        log: EventLog,
    }

    impl ScriptedEncodeSession {
        pub fn new(log: EventLog) -> Self {
            Self {
                buffered: VecDeque::new(),
                ready: VecDeque::new(),
                delay: 0,
                echo_pts: true,
                keyframe_interval: 1,
                flushed: false,
                log,
            }
        }

        /// Buffer `delay` frames before the first chunk appears.
        pub fn with_delay(mut self, delay: usize) -> Self {
            self.delay = delay;
            self
        }

        /// Mark every `interval`-th chunk (by counter) as a keyframe.
        pub fn with_keyframe_interval(mut self, interval: i64) -> Self {
            self.keyframe_interval = interval;
            self
        }

        /// Produce chunks without a counter timestamp, the way an opaque
        /// hardware session would.
        pub fn without_pts_echo(mut self) -> Self {
            self.echo_pts = false;
            self
        }

        fn emit(&mut self, counter: i64) {
            let keyframe =
                self.keyframe_interval > 0 && counter % self.keyframe_interval == 0;
            self.ready.push_back(EncodedChunk {
                data: Bytes::from(vec![counter as u8; 64]),
                pts: self.echo_pts.then_some(counter),
                keyframe,
            });
        }
    }

    impl Drop for ScriptedEncodeSession {
        fn drop(&mut self) {
            self.log.lock().push(LifecycleEvent::EncoderReleased);
        }
    }

    impl VideoEncodeSession for ScriptedEncodeSession {
        fn submit_frame(&mut self, frame: Option<Box<dyn HwFrame>>) -> Result<()> {
            match frame {
                Some(frame) => {
                    self.buffered.push_back(frame.pts().unwrap_or(0));
                    while self.buffered.len() > self.delay {
                        let counter = self.buffered.pop_front().unwrap();
                        self.emit(counter);
                    }
                }
                None => {
                    self.flushed = true;
                    while let Some(counter) = self.buffered.pop_front() {
                        self.emit(counter);
                    }
                }
            }
            Ok(())
        }

        fn poll_packet(&mut self) -> Result<SessionPoll<EncodedChunk>> {
            if let Some(chunk) = self.ready.pop_front() {
                return Ok(SessionPoll::Output(chunk));
            }
            if self.flushed {
                Ok(SessionPoll::Finished)
            } else {
                Ok(SessionPoll::NeedInput)
            }
        }
    }

    // ----- scripted provider -----

    /// What a provider observed when a session was opened.
    #[derive(Debug, Clone)]
    pub struct OpenedSessionInfo {
        pub codec: CodecType,
        pub extradata: Option<Bytes>,
        pub hw_backend: Option<String>,
        pub hw_surface: Option<PixelFormat>,
        pub negotiated_surface: Option<PixelFormat>,
        pub bitrate: Option<u32>,
        pub gop_size: Option<u32>,
        pub quality: Option<u32>,
        pub preset: Option<String>,
        pub fps: Option<Fraction>,
    }

    /// A provider handing out pre-built scripted sessions.
    pub struct ScriptedProvider {
        decoder: Mutex<Option<Box<dyn VideoDecodeSession>>>,
        encoder: Mutex<Option<Box<dyn VideoEncodeSession>>>,
        hw_configs: Vec<HwCodecConfig>,
        candidate_formats: Vec<PixelFormat>,
        fail_open: bool,
        pub opened: Mutex<Vec<OpenedSessionInfo>>,
        log: EventLog,
    }

    impl ScriptedProvider {
        pub fn new(log: EventLog) -> Self {
            Self {
                decoder: Mutex::new(None),
                encoder: Mutex::new(None),
                hw_configs: Vec::new(),
                candidate_formats: Vec::new(),
                fail_open: false,
                opened: Mutex::new(Vec::new()),
                log,
            }
        }

        pub fn with_decoder(self, session: ScriptedDecodeSession) -> Self {
            *self.decoder.lock() = Some(Box::new(session));
            self
        }

        pub fn with_encoder(self, session: ScriptedEncodeSession) -> Self {
            *self.encoder.lock() = Some(Box::new(session));
            self
        }

        /// Advertise a hardware config for every supported codec.
        pub fn with_hw_config(
            mut self,
            device_kind: impl Into<String>,
            surface_format: PixelFormat,
        ) -> Self {
            self.hw_configs.push(HwCodecConfig {
                device_kind: device_kind.into(),
                surface_format,
            });
            self
        }

        /// Candidate formats the codec offers at session-open time.
        pub fn with_candidate_formats(mut self, formats: &[PixelFormat]) -> Self {
            self.candidate_formats = formats.to_vec();
            self
        }

        /// Make every session open fail.
        pub fn failing_open(mut self) -> Self {
            self.fail_open = true;
            self
        }
    }

    impl CodecProvider for ScriptedProvider {
        fn supports_decode(&self, codec: CodecType) -> bool {
            matches!(codec, CodecType::H264 | CodecType::H265)
        }

        fn supports_encode(&self, codec: CodecType) -> bool {
            matches!(codec, CodecType::H264 | CodecType::H265)
        }

        fn hardware_configs(&self, _codec: CodecType) -> Vec<HwCodecConfig> {
            self.hw_configs.clone()
        }

        fn open_decoder(
            &self,
            config: DecoderSessionConfig,
        ) -> Result<Box<dyn VideoDecodeSession>> {
            let negotiated = config.hw.as_ref().map(|hw| {
                if self.candidate_formats.is_empty() {
                    hw.surface_format
                } else {
                    select_surface_format(&self.candidate_formats, hw.surface_format)
                        .unwrap_or(self.candidate_formats[0])
                }
            });
            self.opened.lock().push(OpenedSessionInfo {
                codec: config.codec,
                extradata: config.extradata.clone(),
                hw_backend: config
                    .hw
                    .as_ref()
                    .map(|hw| hw.device.backend_name().to_string()),
                hw_surface: config.hw.as_ref().map(|hw| hw.surface_format),
                negotiated_surface: negotiated,
                bitrate: None,
                gop_size: None,
                quality: None,
                preset: None,
                fps: None,
            });
            if self.fail_open {
                return Err(StageError::NotSupported(
                    "scripted decoder open failure".into(),
                ));
            }
            self.log.lock().push(LifecycleEvent::DecoderOpened);
            self.decoder
                .lock()
                .take()
                .ok_or_else(|| StageError::Session("no scripted decoder queued".into()))
        }

        fn open_encoder(
            &self,
            config: EncoderSessionConfig,
        ) -> Result<Box<dyn VideoEncodeSession>> {
            self.opened.lock().push(OpenedSessionInfo {
                codec: config.codec,
                extradata: None,
                hw_backend: Some(config.hw.device.backend_name().to_string()),
                hw_surface: Some(config.hw.surface_format),
                negotiated_surface: Some(config.frame_pool.format()),
                bitrate: Some(config.bitrate),
                gop_size: Some(config.gop_size),
                quality: Some(config.quality),
                preset: config.preset.clone(),
                fps: Some(config.fps),
            });
            if self.fail_open {
                return Err(StageError::NotSupported(
                    "scripted encoder open failure".into(),
                ));
            }
            self.log.lock().push(LifecycleEvent::EncoderOpened);
            self.encoder
                .lock()
                .take()
                .ok_or_else(|| StageError::Session("no scripted encoder queued".into()))
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_select_surface_format_prefers_resolved() {
        let candidates = [PixelFormat::Yuv420p, PixelFormat::Nv12, PixelFormat::P010];
        assert_eq!(
            select_surface_format(&candidates, PixelFormat::Nv12),
            Some(PixelFormat::Nv12)
        );
    }

    #[test]
    fn test_select_surface_format_falls_back_to_default_policy() {
        let candidates = [PixelFormat::Yuv420p];
        assert_eq!(select_surface_format(&candidates, PixelFormat::P010), None);
    }
}
