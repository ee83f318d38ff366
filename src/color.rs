//! Color types used by the transmission preview.
//!
//! Filament colors arrive as 8-bit sRGB hex strings. Blending against the
//! backlight happens on normalized sRGB floats; renderers that expect linear
//! light convert afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul};

/// sRGB to linear for every 8-bit channel value
static SRGB_TO_LINEAR: std::sync::OnceLock<[f32; 256]> = std::sync::OnceLock::new();

#[inline]
fn srgb_lut() -> &'static [f32; 256] {
    SRGB_TO_LINEAR.get_or_init(|| {
        let mut lut = [0.0f32; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            *v = srgb_to_linear(i as f32 / 255.0);
        }
        lut
    })
}

/// RGB color in 8-bit per channel format (sRGB gamma-encoded)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(C)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    #[inline(always)]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_array(arr: [u8; 3]) -> Self {
        Self { r: arr[0], g: arr[1], b: arr[2] }
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Parse `#RRGGBB`, `RRGGBB` or the short `#RGB` form.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if !digits.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match digits.len() {
            6 => Some(Self::new(
                channel(&digits[0..2])?,
                channel(&digits[2..4])?,
                channel(&digits[4..6])?,
            )),
            3 => {
                let r = channel(&digits[0..1])?;
                let g = channel(&digits[1..2])?;
                let b = channel(&digits[2..3])?;
                Some(Self::new(r * 17, g * 17, b * 17))
            }
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    pub fn to_float(self) -> Rgbf {
        Rgbf::new(
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        )
    }

    /// Linear light via the 8-bit lookup table
    pub fn to_linear(self) -> LinearRgb {
        let lut = srgb_lut();
        LinearRgb::new(lut[self.r as usize], lut[self.g as usize], lut[self.b as usize])
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::from_hex(&value).ok_or_else(|| format!("invalid hex color '{}'", value))
    }
}

impl From<Rgb> for String {
    fn from(rgb: Rgb) -> Self {
        rgb.to_hex()
    }
}

// =============================================================================
// Normalized sRGB
// =============================================================================

/// sRGB color with channels in [0, 1]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rgbf {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgbf {
    pub const WHITE: Rgbf = Rgbf::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn to_linear(self) -> LinearRgb {
        LinearRgb::new(
            srgb_to_linear(self.r),
            srgb_to_linear(self.g),
            srgb_to_linear(self.b),
        )
    }

    pub fn to_rgb(self) -> Rgb {
        Rgb::new(
            clamp_u8_f32(self.r * 255.0 + 0.5),
            clamp_u8_f32(self.g * 255.0 + 0.5),
            clamp_u8_f32(self.b * 255.0 + 0.5),
        )
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    /// Clamp every channel to [0, 1]
    pub fn clamped(self) -> Self {
        Self::new(self.r.clamp(0.0, 1.0), self.g.clamp(0.0, 1.0), self.b.clamp(0.0, 1.0))
    }
}

impl Add for Rgbf {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            r: self.r + other.r,
            g: self.g + other.g,
            b: self.b + other.b,
        }
    }
}

impl Mul<f32> for Rgbf {
    type Output = Self;
    fn mul(self, scalar: f32) -> Self {
        Self {
            r: self.r * scalar,
            g: self.g * scalar,
            b: self.b * scalar,
        }
    }
}

// =============================================================================
// Linear RGB
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LinearRgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl LinearRgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn to_srgb(self) -> Rgbf {
        Rgbf::new(
            linear_to_srgb(self.r),
            linear_to_srgb(self.g),
            linear_to_srgb(self.b),
        )
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

// =============================================================================
// Constants & Utils
// =============================================================================

#[inline]
pub fn srgb_to_linear(v: f32) -> f32 {
    if v > 0.04045 { ((v + 0.055) / 1.055).powf(2.4) } else { v / 12.92 }
}

#[inline]
pub fn linear_to_srgb(v: f32) -> f32 {
    if v > 0.0031308 { 1.055 * v.powf(1.0 / 2.4) - 0.055 } else { 12.92 * v }
}

#[inline(always)]
pub fn clamp_u8_f32(v: f32) -> u8 {
    v.max(0.0).min(255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_parsing() {
        assert_eq!(Rgb::from_hex("#FF8000"), Some(Rgb::new(255, 128, 0)));
        assert_eq!(Rgb::from_hex("00ff7f"), Some(Rgb::new(0, 255, 127)));
        assert_eq!(Rgb::from_hex("#fff"), Some(Rgb::WHITE));
        assert_eq!(Rgb::from_hex("#12345"), None);
        assert_eq!(Rgb::from_hex("#GG0000"), None);
    }

    #[test]
    fn test_hex_serde() {
        let rgb: Rgb = serde_json::from_str("\"#1A2B3C\"").unwrap();
        assert_eq!(rgb, Rgb::new(0x1A, 0x2B, 0x3C));
        assert_eq!(serde_json::to_string(&rgb).unwrap(), "\"#1A2B3C\"");
        assert!(serde_json::from_str::<Rgb>("\"blue\"").is_err());
    }

    #[test]
    fn test_lut_matches_formula() {
        for v in [0u8, 3, 11, 64, 128, 254, 255] {
            let lut = Rgb::new(v, v, v).to_linear().r;
            assert!((lut - srgb_to_linear(v as f32 / 255.0)).abs() < 1e-7);
        }
    }

    #[test]
    fn test_linear_roundtrip() {
        for v in [0u8, 10, 64, 128, 200, 255] {
            let rgb = Rgb::new(v, v, v);
            let back = rgb.to_linear().to_srgb().to_rgb();
            assert_eq!(back, rgb);
        }
    }
}
