use bytes::Bytes;

use super::CodecType;
use crate::hw::PixelFormat;

/// A frame rate expressed as a rational numerator/denominator pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub num: u32,
    pub den: u32,
}

impl Fraction {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }
}

/// Properties of a video stream as exchanged over a stage's ports.
///
/// Upstream connections hand this to [`configure`](crate::stage::DecodeStage::configure);
/// stages declare a derived set on their output connection.
#[derive(Debug, Clone)]
pub struct VideoStreamInfo {
    pub codec: CodecType,
    pub width: u32,
    pub height: u32,
    pub fps: Option<Fraction>,
    pub timescale: Option<u32>,
    /// Decoder configuration record (e.g. parameter sets), forwarded opaquely.
    pub decoder_config: Option<Bytes>,
    pub bitrate: Option<u32>,
    /// Pixel layout for raw streams.
    pub pixel_format: Option<PixelFormat>,
    /// Set on encoded output whose units are not self-delimited; downstream
    /// must reconstitute framing.
    pub unframed: bool,
}

impl VideoStreamInfo {
    pub fn new(codec: CodecType) -> Self {
        Self {
            codec,
            width: 0,
            height: 0,
            fps: None,
            timescale: None,
            decoder_config: None,
            bitrate: None,
            pixel_format: None,
            unframed: false,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_fps(mut self, num: u32, den: u32) -> Self {
        self.fps = Some(Fraction::new(num, den));
        self
    }

    pub fn with_timescale(mut self, timescale: u32) -> Self {
        self.timescale = Some(timescale);
        self
    }

    pub fn with_decoder_config(mut self, config: impl Into<Bytes>) -> Self {
        self.decoder_config = Some(config.into());
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = Some(format);
        self
    }
}
