//! Pipeline settings.
//!
//! Geometry settings drive the image → heightmap stages, print settings drive
//! meshing and export. Both deserialize from snake_case JSON and fall back to
//! the defaults below for missing fields.

use serde::{Deserialize, Serialize};
#[cfg(feature = "native")]
use std::path::Path;

/// Scalar luminance extraction method
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LuminanceMethod {
    /// 0.299R + 0.587G + 0.114B
    #[default]
    Rec601,
    /// 0.2126R + 0.7152G + 0.0722B
    Rec709,
    /// max(R, G, B)
    MaxChannel,
    /// (R + G + B) / 3
    ScaledMaxChannel,
    /// 0.5 * rec709 + 0.5 * max
    Combo,
    /// Saturation-weighted blend of rec709 and max
    ColorAware,
    /// rec709 + 0.25 * (max - min)
    ColorPop,
}

impl LuminanceMethod {
    pub const ALL: [LuminanceMethod; 7] = [
        LuminanceMethod::Rec601,
        LuminanceMethod::Rec709,
        LuminanceMethod::MaxChannel,
        LuminanceMethod::ScaledMaxChannel,
        LuminanceMethod::Combo,
        LuminanceMethod::ColorAware,
        LuminanceMethod::ColorPop,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rec601" => Some(Self::Rec601),
            "rec709" => Some(Self::Rec709),
            "max_channel" => Some(Self::MaxChannel),
            "scaled_max_channel" => Some(Self::ScaledMaxChannel),
            "combo" => Some(Self::Combo),
            "color_aware" => Some(Self::ColorAware),
            "color_pop" => Some(Self::ColorPop),
            _ => None,
        }
    }
}

/// A transfer curve control point, both axes in [0, 1]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: f32,
    pub y: f32,
}

impl CurvePoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Tone mapping applied to luminance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToneMapping {
    /// Gamma, contrast around 0.5, then additive offset
    Gamma { gamma: f32, contrast: f32, offset: f32 },
    /// Piecewise-linear transfer curve anchored at (0,0) and (1,1)
    Curve { points: Vec<CurvePoint> },
}

impl Default for ToneMapping {
    fn default() -> Self {
        ToneMapping::Gamma {
            gamma: 1.0,
            contrast: 1.0,
            offset: 0.0,
        }
    }
}

/// Median filter strength for despiking
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeRemoval {
    #[default]
    None,
    Light,
    Medium,
    Strong,
}

impl SpikeRemoval {
    /// Median kernel edge length, `None` for a passthrough
    pub fn kernel_size(self) -> Option<usize> {
        match self {
            SpikeRemoval::None => None,
            SpikeRemoval::Light => Some(3),
            SpikeRemoval::Medium => Some(5),
            SpikeRemoval::Strong => Some(7),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "light" => Some(Self::Light),
            "medium" => Some(Self::Medium),
            "strong" => Some(Self::Strong),
            _ => None,
        }
    }
}

/// Image → heightmap configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometrySettings {
    /// Thinnest relief depth in mm (brightest areas)
    pub min_depth_mm: f64,
    /// Thickest relief depth in mm
    pub max_depth_mm: f64,
    /// Tone mapping mode and its parameters
    pub tone_mapping: ToneMapping,
    /// Gaussian smoothing sigma in pixels (0 disables)
    pub smoothing_sigma: f32,
    /// Median despike level
    pub spike_removal: SpikeRemoval,
    /// Luminance extraction method
    pub luminance_method: LuminanceMethod,
    /// Percentile stretch to use the full depth range
    pub dynamic_depth: bool,
    /// Invert the tone-mapped field before depth mapping
    pub invert: bool,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            min_depth_mm: 0.48,
            max_depth_mm: 2.24,
            tone_mapping: ToneMapping::default(),
            smoothing_sigma: 0.0,
            spike_removal: SpikeRemoval::None,
            luminance_method: LuminanceMethod::Rec601,
            dynamic_depth: false,
            invert: false,
        }
    }
}

/// Mesh and export configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    /// Print footprint width in mm
    pub width_mm: f64,
    /// Print footprint height in mm
    pub height_mm: f64,
    pub layer_height_mm: f64,
    /// Solid base under the relief in mm
    pub base_layer_mm: f64,
    pub nozzle_diameter: f64,
    /// Maximum grid segments per axis
    pub mesh_resolution: u32,
    pub has_border: bool,
    pub border_width_mm: f64,
    pub border_depth_mm: f64,
    /// Sample the heightmap mirrored on X
    pub mirror_x: bool,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            width_mm: 100.0,
            height_mm: 100.0,
            layer_height_mm: 0.08,
            base_layer_mm: 0.16,
            nozzle_diameter: 0.4,
            mesh_resolution: 256,
            has_border: false,
            border_width_mm: 2.0,
            border_depth_mm: 2.0,
            mirror_x: false,
        }
    }
}

/// Combined settings as stored in a settings file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub geometry: GeometrySettings,
    pub print: PrintSettings,
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read settings from a JSON file (requires 'native' feature)
    #[cfg(feature = "native")]
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.geometry.min_depth_mm, 0.48);
        assert_eq!(settings.print.layer_height_mm, 0.08);
    }

    #[test]
    fn test_tone_mapping_tagged() {
        let json = r#"{
            "geometry": {
                "tone_mapping": { "mode": "curve", "points": [{ "x": 0.5, "y": 0.8 }] },
                "luminance_method": "color_pop",
                "spike_removal": "medium"
            }
        }"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(
            settings.geometry.tone_mapping,
            ToneMapping::Curve { points: vec![CurvePoint::new(0.5, 0.8)] }
        );
        assert_eq!(settings.geometry.luminance_method, LuminanceMethod::ColorPop);
        assert_eq!(settings.geometry.spike_removal.kernel_size(), Some(5));
    }

    #[test]
    fn test_gamma_mode_rejects_missing_fields() {
        let json = r#"{ "geometry": { "tone_mapping": { "mode": "gamma", "gamma": 1.2 } } }"#;
        assert!(Settings::from_json(json).is_err());
    }

    #[test]
    fn test_method_names() {
        for method in LuminanceMethod::ALL {
            let name = serde_json::to_value(method).unwrap();
            assert_eq!(LuminanceMethod::from_name(name.as_str().unwrap()), Some(method));
        }
    }
}
