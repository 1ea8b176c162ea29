//! Host-memory backend.
//!
//! Implements the full device/pool/frame protocol in ordinary memory. It is
//! not selected by `"auto"` (it drives no accelerator) but can be named
//! explicitly, which lets a graph exercise the complete hardware path on
//! machines without a render node.

use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

use super::{HostFrame, HwBackend, HwDevice, HwFrame, HwFramePool, PixelFormat};
use crate::error::StageError;
use crate::Result;

pub struct HostBackend;

impl HostBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HwBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn is_hardware(&self) -> bool {
        false
    }

    fn probe(&self) -> bool {
        true
    }

    fn open_device(&self, locator: &str) -> Result<Arc<dyn HwDevice>> {
        log::debug!("opening host device at {}", locator);
        Ok(Arc::new(HostDevice {
            locator: locator.to_string(),
        }))
    }
}

struct HostDevice {
    locator: String,
}

impl HwDevice for HostDevice {
    fn backend_name(&self) -> &str {
        "host"
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
        Ok(Arc::new(HostFramePool {
            format,
            width,
            height,
            depth,
            in_use: Arc::new(Mutex::new(0)),
        }))
    }

    fn download(&self, frame: &dyn HwFrame) -> Result<HostFrame> {
        let surface = frame
            .as_any()
            .downcast_ref::<HostSurface>()
            .ok_or_else(|| StageError::Transfer("frame belongs to another backend".into()))?;
        Ok(HostFrame {
            format: surface.format,
            width: surface.width,
            height: surface.height,
            planes: surface.planes.clone(),
            pts: surface.pts,
        })
    }
}

struct HostFramePool {
    format: PixelFormat,
    width: u32,
    height: u32,
    depth: usize,
    in_use: Arc<Mutex<usize>>,
}

impl HwFramePool for HostFramePool {
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
                return Err(StageError::OutOfMemory(format!(
                    "frame pool exhausted ({} frames in flight)",
                    self.depth
                )));
            }
            *in_use += 1;
        }

        let planes = self
            .format
            .plane_sizes(self.width, self.height)
            .into_iter()
            .map(|size| Bytes::from(vec![0u8; size]))
            .collect();

        Ok(Box::new(HostSurface {
            format: self.format,
            width: self.width,
            height: self.height,
            pts: None,
            planes,
            _slot: Some(PoolSlot {
                in_use: self.in_use.clone(),
            }),
        }))
    }

    fn upload(&self, src: &HostFrame, dst: &mut dyn HwFrame) -> Result<()> {
        if src.format != self.format || src.width != self.width || src.height != self.height {
            return Err(StageError::Transfer(format!(
                "frame layout {}x{} {} does not match pool {}x{} {}",
                src.width,
                src.height,
                src.format.as_str(),
                self.width,
                self.height,
                self.format.as_str()
            )));
        }
        let surface = dst
            .as_any_mut()
            .downcast_mut::<HostSurface>()
            .ok_or_else(|| StageError::Transfer("frame belongs to another backend".into()))?;
        surface.planes = src.planes.clone();
        surface.pts = src.pts;
        Ok(())
    }
}

/// Releases the pool slot when the frame is dropped.
struct PoolSlot {
    in_use: Arc<Mutex<usize>>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        *self.in_use.lock() -= 1;
    }
}

struct HostSurface {
    format: PixelFormat,
    width: u32,
    height: u32,
    pts: Option<i64>,
    planes: Vec<Bytes>,
    _slot: Option<PoolSlot>,
}

impl HwFrame for HostSurface {
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
