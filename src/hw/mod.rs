//! # Hardware Acceleration Capability Layer
//!
//! This module isolates everything backend-specific behind a narrow set of
//! capability traits, so the session-lifecycle logic in the stages stays
//! backend-agnostic:
//!
//! - [`HwBackend`] - resolve a backend by name and open devices
//! - [`HwDevice`] - create frame pools and transfer frames back to host memory
//! - [`HwFramePool`] - draw accelerator-resident frames and fill them from host memory
//! - [`HwFrame`] - an opaque accelerator-resident buffer
//!
//! Backends register themselves in the process-wide [`registry`]; stages
//! resolve them by name (or `"auto"`) at configure time. The device and
//! frame-pool handles follow a strict allocate/bind/use/release protocol:
//! a frame pool must outlive its frames, a device must outlive its pools,
//! and a codec session bound to either must be released first.
//!
//! ## Example
//!
//! ```rust
//! use hwstage::hw;
//!
//! // The built-in host-memory backend is always registered.
//! let backend = hw::resolve("host").unwrap();
//! let device = backend.open_device("/dev/dri/renderD128").unwrap();
//! let pool = device
//!     .new_frame_pool(hw::PixelFormat::Nv12, 640, 360, 4)
//!     .unwrap();
//! let frame = pool.acquire().unwrap();
//! assert_eq!(frame.format(), hw::PixelFormat::Nv12);
//! ```

use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::sync::Arc;

use crate::error::StageError;
use crate::Result;

pub mod host;
pub mod registry;
pub mod runtime;

pub use host::HostBackend;
pub use registry::{register_backend, resolve, resolve_auto};
pub use runtime::HwRuntimeGuard;

/// Pixel layout of a video frame's planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit 4:2:0 planar: Y plane, then quarter-size U and V planes.
    Yuv420p,
    /// 8-bit 4:2:0 semi-planar: Y plane, then interleaved UV plane.
    Nv12,
    /// 10-bit 4:2:0 semi-planar, 16-bit container.
    P010,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::P010 => "p010",
        }
    }

    /// Byte sizes of each plane for the given geometry.
    pub fn plane_sizes(&self, width: u32, height: u32) -> Vec<usize> {
        let w = width as usize;
        let h = height as usize;
        match self {
            PixelFormat::Yuv420p => vec![w * h, w * h / 4, w * h / 4],
            PixelFormat::Nv12 => vec![w * h, w * h / 2],
            PixelFormat::P010 => vec![w * h * 2, w * h],
        }
    }

    /// Total frame size in bytes for the given geometry.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        self.plane_sizes(width, height).iter().sum()
    }
}

/// A hardware acceleration backend, resolvable by name.
pub trait HwBackend: Send + Sync {
    /// Backend name as used in the `hwaccel` option (e.g. `"vaapi"`).
    fn name(&self) -> &str;

    /// Whether this backend drives a real accelerator. Auto-resolution only
    /// considers hardware backends.
    fn is_hardware(&self) -> bool;

    /// Probe platform availability without creating a device.
    fn probe(&self) -> bool;

    /// Open the device identified by `locator` (e.g. a DRM render node).
    fn open_device(&self, locator: &str) -> Result<Arc<dyn HwDevice>>;
}

/// An open hardware device.
pub trait HwDevice: Send + Sync {
    fn backend_name(&self) -> &str;

    fn locator(&self) -> &str;

    /// Allocate a pool of `depth` accelerator-resident frames.
    fn new_frame_pool(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
        depth: usize,
    ) -> Result<Arc<dyn HwFramePool>>;

    /// Transfer an accelerator-resident frame into host memory.
    fn download(&self, frame: &dyn HwFrame) -> Result<HostFrame>;
}

/// A pool of accelerator-resident frames.
pub trait HwFramePool: Send + Sync {
    fn format(&self) -> PixelFormat;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Draw an unused frame from the pool. Fails with an out-of-memory
    /// outcome when all frames are in flight.
    fn acquire(&self) -> Result<Box<dyn HwFrame>>;

    /// Transfer a host-memory frame into a pooled frame. The host frame's
    /// layout must match the pool's format and geometry.
    fn upload(&self, src: &HostFrame, dst: &mut dyn HwFrame) -> Result<()>;
}

/// A buffer resident in accelerator memory, opaque to host code until
/// transferred with [`HwDevice::download`].
pub trait HwFrame: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn format(&self) -> PixelFormat;

    fn pts(&self) -> Option<i64>;

    fn set_pts(&mut self, pts: i64);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A host-memory planar video frame.
#[derive(Debug, Clone)]
pub struct HostFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Bytes>,
    pub pts: Option<i64>,
}

impl HostFrame {
    /// Split a contiguous payload into planes for the given layout.
    ///
    /// The payload must carry at least `format.frame_size(width, height)`
    /// bytes; shorter payloads are rejected as non-compliant input.
    pub fn from_contiguous(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<Self> {
        let needed = format.frame_size(width, height);
        if data.len() < needed {
            return Err(StageError::NonCompliant(format!(
                "payload {} bytes, {} frame needs {}",
                data.len(),
                format.as_str(),
                needed
            )));
        }

        let mut planes = Vec::new();
        let mut offset = 0;
        for size in format.plane_sizes(width, height) {
            planes.push(Bytes::copy_from_slice(&data[offset..offset + size]));
            offset += size;
        }

        Ok(Self {
            format,
            width,
            height,
            planes,
            pts: None,
        })
    }

    /// Concatenate the planes into one contiguous buffer, sized exactly for
    /// the plane layout.
    pub fn to_contiguous(&self) -> Bytes {
        let mut data = BytesMut::with_capacity(self.frame_size());
        for plane in &self.planes {
            data.extend_from_slice(plane);
        }
        data.freeze()
    }

    pub fn frame_size(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }
}
