use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, DurationMilliSeconds};

use crate::document::{AnnotationMode, RenderFlags};
use crate::error::ViewerError;
use crate::navigation::PageAnchor;
use crate::text::DEFAULT_HIT_MARGIN;

/// RGBA color written as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const GRAY: Color = Color([0x80, 0x80, 0x80, 0xff]);

    pub fn rgba(self) -> [u8; 4] {
        self.0
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| format!("color `{s}` must start with '#'"))?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(format!("color `{s}` must have 6 or 8 hex digits"));
        }
        let mut rgba = [0xff; 4];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let digits = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
            rgba[i] = u8::from_str_radix(digits, 16)
                .map_err(|_| format!("color `{s}` has invalid hex digits"))?;
        }
        Ok(Color(rgba))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
    }
}

/// Tunables consumed by the viewer. Every field has a default, so a config file only
/// needs the values it changes.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Gap around and between pages, in document units.
    pub margin: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub background: Color,
    pub min_scale: f64,
    pub max_scale: f64,
    /// Use the fit scale as the minimum zoom instead of `min_scale`.
    pub pin_min_scale_to_fit: bool,
    pub pan_enabled: bool,
    pub scale_enabled: bool,
    /// Pre-fetch margin around the visible area, as a multiple of the viewport size.
    pub cache_extent_horizontal: f64,
    pub cache_extent_vertical: f64,
    pub max_cache_bytes: usize,
    /// Effective scale above which pages get a second, high-resolution render of the
    /// visible region.
    pub one_pass_threshold: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "preview_delay_ms")]
    pub preview_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "partial_delay_ms")]
    pub partial_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "animation_duration_ms")]
    pub animation_duration: Duration,
    pub page_anchor: PageAnchor,
    pub end_anchor: PageAnchor,
    pub annotation_mode: AnnotationMode,
    pub dark_mode: bool,
    pub grayscale: bool,
    pub device_pixel_ratio: f64,
    pub hit_margin: f64,
    pub page_hysteresis: f64,
    pub initial_page: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            margin: 8.0,
            background: Color::GRAY,
            min_scale: 0.1,
            max_scale: 8.0,
            pin_min_scale_to_fit: true,
            pan_enabled: true,
            scale_enabled: true,
            cache_extent_horizontal: 1.0,
            cache_extent_vertical: 1.0,
            max_cache_bytes: 100 * 1024 * 1024,
            one_pass_threshold: 200.0 / 72.0,
            preview_delay: Duration::from_millis(50),
            partial_delay: Duration::from_millis(120),
            animation_duration: Duration::from_millis(200),
            page_anchor: PageAnchor::Top,
            end_anchor: PageAnchor::Bottom,
            annotation_mode: AnnotationMode::Annotations,
            dark_mode: false,
            grayscale: false,
            device_pixel_ratio: 1.0,
            hit_margin: DEFAULT_HIT_MARGIN,
            page_hysteresis: 0.2,
            initial_page: 1,
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ViewerError> {
        let config: ViewerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("failed to parse config file {:?}", path))
    }

    pub fn validate(&self) -> Result<(), ViewerError> {
        if !(self.min_scale > 0.0 && self.min_scale <= self.max_scale) {
            return Err(ViewerError::InvalidConfig(format!(
                "scale range {}..{} is empty",
                self.min_scale, self.max_scale
            )));
        }
        if self.device_pixel_ratio <= 0.0 {
            return Err(ViewerError::InvalidConfig(
                "device_pixel_ratio must be positive".into(),
            ));
        }
        if self.margin < 0.0 {
            return Err(ViewerError::InvalidConfig("margin must not be negative".into()));
        }
        Ok(())
    }

    pub fn render_flags(&self) -> RenderFlags {
        RenderFlags {
            grayscale: self.grayscale,
            dark_mode: self.dark_mode,
        }
    }
}
