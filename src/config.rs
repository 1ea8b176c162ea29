use lazy_static::lazy_static;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;

use crate::error::StageError;
use crate::Result;

/// Default hardware device locator (platform render node).
pub const DEFAULT_DEVICE: &str = "/dev/dri/renderD128";

/// Default target bitrate in bits per second.
pub const DEFAULT_BITRATE: u32 = 2_000_000;

/// Default group-of-pictures size.
pub const DEFAULT_GOP_SIZE: u32 = 50;

/// Default quality level (CQP scale, 0-51).
pub const DEFAULT_QUALITY: u32 = 23;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::new());
}

#[derive(Debug, Clone)]
pub struct Config {
    pub device: String,
}

impl Config {
    fn new() -> Self {
        // Default values (not containing sensitive information)
        let mut config = Config {
            device: String::from(DEFAULT_DEVICE),
        };

        // Try loading from environment variables first
        if let Ok(device) = env::var("HWSTAGE_DEVICE") {
            config.device = device;
        }

        // Then try loading from config file
        let config_paths = ["./config.toml", "./hwstage.toml"];
        for path in &config_paths {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    if let Some(line) = content.lines().find(|line| line.starts_with("device")) {
                        if let Some(device) = line.split('=').nth(1) {
                            let device = device.trim().trim_matches('"').trim_matches('\'');
                            if !device.is_empty() {
                                config.device = device.to_string();
                            }
                        }
                    }
                }
            }
        }

        config
    }

    pub fn reload() {
        let new_config = Config::new();
        if let Ok(mut config) = CONFIG.write() {
            *config = new_config;
        }
    }
}

/// Returns the hardware device locator from configuration
pub fn get_device() -> String {
    CONFIG.read().unwrap().device.clone()
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# HWSTAGE Configuration
# This is a template. Replace the values with your actual configuration.

# Hardware device render node
device = "/dev/dri/renderD128"
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

/// Per-stage options, normally handed over by the host's argument parser.
///
/// The recognized keys and defaults mirror the stage's documented option
/// table: `hwaccel` (default `"auto"`), `hwdevice`, `codec`, `bitrate`,
/// `gop_size`, `quality` (0-51), `preset` and `verbose`.
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Hardware acceleration method name, `"auto"` or `"none"`.
    pub hwaccel: String,
    /// Hardware device locator; falls back to the global config when unset.
    pub hwdevice: Option<String>,
    /// Output codec identity for the encode stage (e.g. `"h264"`).
    pub codec: Option<String>,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Group-of-pictures size.
    pub gop_size: u32,
    /// Quality level, 0-51.
    pub quality: u32,
    /// Encoding preset, passed through to the codec session.
    pub preset: Option<String>,
    /// Verbose logging.
    pub verbose: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            hwaccel: String::from("auto"),
            hwdevice: None,
            codec: None,
            bitrate: DEFAULT_BITRATE,
            gop_size: DEFAULT_GOP_SIZE,
            quality: DEFAULT_QUALITY,
            preset: None,
            verbose: false,
        }
    }
}

impl StageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The device locator to open, resolving the configured default.
    pub fn device(&self) -> String {
        self.hwdevice.clone().unwrap_or_else(get_device)
    }

    pub fn with_hwaccel(mut self, hwaccel: impl Into<String>) -> Self {
        self.hwaccel = hwaccel.into();
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.hwdevice = Some(device.into());
        self
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Parse options from a `key=value` option string, e.g.
    /// `"hwaccel=vaapi:bitrate=5000000:gop_size=25"`.
    pub fn parse(options: &str) -> Result<Self> {
        let mut opts = Self::default();
        for part in options.split(':').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                StageError::NonCompliant(format!("malformed option '{}'", part))
            })?;
            match key {
                "hwaccel" => opts.hwaccel = value.to_string(),
                "hwdevice" | "device" => opts.hwdevice = Some(value.to_string()),
                "codec" => opts.codec = Some(value.to_string()),
                "bitrate" => opts.bitrate = value.parse()?,
                "gop_size" | "gop" => opts.gop_size = value.parse()?,
                "quality" => {
                    let quality: u32 = value.parse()?;
                    if quality > 51 {
                        return Err(StageError::NonCompliant(format!(
                            "quality {} out of range 0-51",
                            quality
                        )));
                    }
                    opts.quality = quality;
                }
                "preset" => opts.preset = Some(value.to_string()),
                "verbose" => opts.verbose = matches!(value, "true" | "1" | "yes"),
                other => {
                    return Err(StageError::NonCompliant(format!(
                        "unknown option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = StageOptions::default();
        assert_eq!(opts.hwaccel, "auto");
        assert_eq!(opts.bitrate, DEFAULT_BITRATE);
        assert_eq!(opts.gop_size, DEFAULT_GOP_SIZE);
        assert_eq!(opts.quality, DEFAULT_QUALITY);
        assert!(opts.preset.is_none());
        assert!(!opts.verbose);
    }

    #[test]
    fn test_parse_option_string() {
        let opts =
            StageOptions::parse("hwaccel=vaapi:device=/dev/dri/renderD129:bitrate=5000000")
                .unwrap();
        assert_eq!(opts.hwaccel, "vaapi");
        assert_eq!(opts.hwdevice.as_deref(), Some("/dev/dri/renderD129"));
        assert_eq!(opts.bitrate, 5_000_000);
    }

    #[test]
    fn test_parse_rejects_out_of_range_quality() {
        assert!(StageOptions::parse("quality=52").is_err());
        assert!(StageOptions::parse("quality=51").is_ok());
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        assert!(StageOptions::parse("nonsense=1").is_err());
    }
}
