//! Animation and rendering configuration
//!
//! Every option has a default, so an empty file (or no file) is a valid
//! configuration. Files are read as YAML or JSON depending on extension.

use std::f32::consts::PI;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of nodes
pub const DEFAULT_NODE_COUNT: usize = 10_000;

/// Default side length of the generation cube
pub const DEFAULT_EXTENT: f32 = 1000.0;

/// Default group rotation about the vertical axis, radians per second
pub const DEFAULT_ROTATION_RATE: f32 = PI / 12.0;

/// Default on-screen point size
pub const DEFAULT_POINT_SIZE: f32 = 5.0;

/// Default bloom strength
pub const DEFAULT_BLOOM_STRENGTH: f32 = 1.0;

/// Default bloom luminance threshold
pub const DEFAULT_BLOOM_THRESHOLD: f32 = 0.1;

/// Default bloom radius
pub const DEFAULT_BLOOM_RADIUS: f32 = 0.5;

/// An sRGB colour, written as `"#rrggbb"` in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(u32);

impl Color {
    /// Cyan, the default point colour
    pub const CYAN: Color = Color(0x00ffff);
    /// Dark gray, the default line colour
    pub const DARK_GRAY: Color = Color(0x232323);
    /// Black, the default background
    pub const BLACK: Color = Color(0x000000);

    /// Build from a packed `0xrrggbb` value (upper byte ignored)
    pub const fn from_hex(hex: u32) -> Self {
        Color(hex & 0x00ff_ffff)
    }

    /// Packed `0xrrggbb` value
    pub fn hex(&self) -> u32 {
        self.0
    }

    /// Channels as sRGB-encoded fractions
    pub fn srgb(&self) -> [f32; 3] {
        [
            ((self.0 >> 16) & 0xff) as f32 / 255.0,
            ((self.0 >> 8) & 0xff) as f32 / 255.0,
            (self.0 & 0xff) as f32 / 255.0,
        ]
    }

    /// Channels converted to linear light, for blending in an HDR target
    pub fn linear(&self) -> [f32; 3] {
        self.srgb().map(srgb_to_linear)
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

impl FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .trim()
            .trim_start_matches('#')
            .trim_start_matches("0x");
        if digits.len() != 6 {
            return Err(Error::InvalidArgument(format!(
                "colour must be six hex digits like #00ffff, got {:?}",
                s
            )));
        }
        u32::from_str_radix(digits, 16)
            .map(Color)
            .map_err(|_| Error::InvalidArgument(format!("invalid hex colour {:?}", s)))
    }
}

impl TryFrom<String> for Color {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

/// Post-process glow tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Multiplier on the blurred highlights added back to the scene
    pub strength: f32,
    /// Luminance above which a pixel contributes to the glow
    pub threshold: f32,
    /// 0 keeps the glow tight, 1 spreads it across the wider blur levels
    pub radius: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            strength: DEFAULT_BLOOM_STRENGTH,
            threshold: DEFAULT_BLOOM_THRESHOLD,
            radius: DEFAULT_BLOOM_RADIUS,
        }
    }
}

/// Perspective camera placement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
    /// Initial eye position; the camera looks at the origin
    pub position: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 75.0,
            near: 0.1,
            far: 5000.0,
            position: [1.0, 0.0, 1000.0],
        }
    }
}

/// Full configuration for one animation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Nodes per field
    pub node_count: usize,
    /// Side length of the cube nodes are scattered in
    pub extent: f32,
    /// Length of one interpolation cycle
    pub cycle_duration_ms: f64,
    /// Group spin about the vertical axis
    pub rotation_rate_rad_per_sec: f32,
    pub bloom: BloomConfig,
    pub point_size: f32,
    pub point_color: Color,
    pub line_color: Color,
    pub background_color: Color,
    pub camera: CameraConfig,
    /// Fixed RNG seed; unset means a fresh field every run
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_count: DEFAULT_NODE_COUNT,
            extent: DEFAULT_EXTENT,
            cycle_duration_ms: crate::scheduler::DEFAULT_CYCLE_DURATION_MS,
            rotation_rate_rad_per_sec: DEFAULT_ROTATION_RATE,
            bloom: BloomConfig::default(),
            point_size: DEFAULT_POINT_SIZE,
            point_color: Color::CYAN,
            line_color: Color::DARK_GRAY,
            background_color: Color::BLACK,
            camera: CameraConfig::default(),
            seed: None,
        }
    }
}

impl Config {
    /// Load and validate a config file, choosing the format by extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))?;
        let text = std::fs::read_to_string(path)?;

        let config: Config = match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&text)?,
            "json" => serde_json::from_str(&text)?,
            other => return Err(Error::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_yaml_str(text: &str) -> Result<Self> {
        // An empty YAML document deserializes as unit, not an empty map.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Serialize as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values the generator, scheduler or renderer cannot use
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(Error::InvalidArgument(msg))
        }

        if self.node_count == 0 {
            return invalid("node_count must be positive".into());
        }
        if !self.extent.is_finite() || self.extent <= 0.0 {
            return invalid(format!("extent must be positive, got {}", self.extent));
        }
        if !self.cycle_duration_ms.is_finite() || self.cycle_duration_ms <= 0.0 {
            return invalid(format!(
                "cycle_duration_ms must be positive, got {}",
                self.cycle_duration_ms
            ));
        }
        if !self.rotation_rate_rad_per_sec.is_finite() {
            return invalid("rotation_rate_rad_per_sec must be finite".into());
        }
        if !self.point_size.is_finite() || self.point_size <= 0.0 {
            return invalid(format!("point_size must be positive, got {}", self.point_size));
        }

        let bloom = &self.bloom;
        if !bloom.strength.is_finite() || bloom.strength < 0.0 {
            return invalid(format!("bloom.strength must be >= 0, got {}", bloom.strength));
        }
        if !bloom.threshold.is_finite() || bloom.threshold < 0.0 {
            return invalid(format!("bloom.threshold must be >= 0, got {}", bloom.threshold));
        }
        if !(0.0..=1.0).contains(&bloom.radius) {
            return invalid(format!("bloom.radius must be in [0, 1], got {}", bloom.radius));
        }

        let camera = &self.camera;
        if !(camera.fov_degrees > 0.0 && camera.fov_degrees < 180.0) {
            return invalid(format!(
                "camera.fov_degrees must be in (0, 180), got {}",
                camera.fov_degrees
            ));
        }
        if !(camera.near > 0.0 && camera.far > camera.near && camera.far.is_finite()) {
            return invalid(format!(
                "camera clip planes must satisfy 0 < near < far, got {} / {}",
                camera.near, camera.far
            ));
        }
        if camera.position.iter().any(|c| !c.is_finite()) {
            return invalid("camera.position must be finite".into());
        }
        Ok(())
    }
}
