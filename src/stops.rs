//! Filaments and color-stop allocation.
//!
//! A color stop marks the depth at which the visible filament changes. Stops
//! are allocated for an ordered filament stack (usually most transparent
//! first) across the relief depth range, quantized to the print layer height.

use crate::color::Rgb;
use serde::{Deserialize, Serialize};

/// `ln(1 / (1 - 0.95))`: optical depth at which 95% of the backlight is blocked
pub const D95_OPTICAL_DEPTH: f64 = std::f64::consts::LN_10 + std::f64::consts::LN_2;

/// Tolerance for comparing quantized thresholds
const FEASIBILITY_EPSILON: f64 = 1e-9;

/// Depths within this distance of a threshold still belong to its stop.
/// Covers f32 depth samples widened to f64.
const STOP_MATCH_EPSILON: f64 = 1e-6;

/// A printable filament and its light transmission
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filament {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub hex_color: Rgb,
    /// `ln(20) / d95_mm`, per millimeter
    pub attenuation_coefficient: f64,
}

impl Filament {
    pub fn new(id: impl Into<String>, hex_color: Rgb, attenuation_coefficient: f64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            hex_color,
            attenuation_coefficient,
        }
    }

    /// Build from the measured thickness that blocks 95% of the backlight
    pub fn from_d95(id: impl Into<String>, hex_color: Rgb, d95_mm: f64) -> Self {
        Self::new(id, hex_color, attenuation_from_d95(d95_mm))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Thickness at which 95% of the backlight is blocked
    pub fn d95_mm(&self) -> f64 {
        if self.attenuation_coefficient > 0.0 {
            D95_OPTICAL_DEPTH / self.attenuation_coefficient
        } else {
            f64::INFINITY
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

/// `ln(20) / d95_mm`
pub fn attenuation_from_d95(d95_mm: f64) -> f64 {
    D95_OPTICAL_DEPTH / d95_mm
}

/// Depth threshold at which a filament becomes the visible one
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub filament_id: String,
    pub threshold_depth_mm: f64,
}

impl ColorStop {
    pub fn new(filament_id: impl Into<String>, threshold_depth_mm: f64) -> Self {
        Self {
            filament_id: filament_id.into(),
            threshold_depth_mm,
        }
    }
}

/// Band width strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStrategy {
    /// Band width proportional to `1 / attenuation_coefficient`
    #[default]
    Weighted,
    /// Equal-width bands
    Linear,
}

/// Allocator output
#[derive(Clone, Debug, PartialEq)]
pub struct StopAllocation {
    /// One stop per filament, ascending by threshold
    pub stops: Vec<ColorStop>,
    /// Set when a threshold had to be moved to stay feasible
    pub had_collisions: bool,
}

/// Allocate one color stop per filament over `[min_depth_mm, max_depth_mm]`.
///
/// Thresholds are quantized to the layer height and forced to be at least one
/// layer apart and to leave one layer per remaining filament below the maximum.
/// The last threshold is always exactly `max_depth_mm`.
pub fn allocate_stops(
    filaments: &[Filament],
    min_depth_mm: f64,
    max_depth_mm: f64,
    layer_height_mm: f64,
    strategy: StopStrategy,
) -> StopAllocation {
    let n = filaments.len();
    if n == 0 {
        return StopAllocation {
            stops: Vec::new(),
            had_collisions: false,
        };
    }

    let range = (max_depth_mm - min_depth_mm).max(0.0);
    let raw = match strategy {
        StopStrategy::Weighted => weighted_fractions(filaments),
        StopStrategy::Linear => (0..n).map(|i| (i + 1) as f64 / n as f64).collect(),
    }
    .into_iter()
    .map(|f| min_depth_mm + range * f);

    let mut had_collisions = false;
    let mut step = if layer_height_mm.is_finite() && layer_height_mm > 0.0 {
        layer_height_mm
    } else {
        0.0
    };
    if step * n as f64 > range + FEASIBILITY_EPSILON {
        log::warn!(
            "{} filaments do not fit {:.3} mm at {:.3} mm layers; shrinking bands",
            n,
            range,
            step
        );
        step = range / n as f64;
        had_collisions = true;
    }

    let mut stops = Vec::with_capacity(n);
    let mut prev = min_depth_mm;
    for (i, (filament, threshold)) in filaments.iter().zip(raw).enumerate() {
        let remaining = (n - 1 - i) as f64;
        let quantized = quantize(threshold, layer_height_mm);
        let lower = prev + step;
        let upper = max_depth_mm - remaining * step;

        let mut value = quantized;
        if value < lower - FEASIBILITY_EPSILON {
            value = lower;
            had_collisions = true;
        }
        if value > upper + FEASIBILITY_EPSILON {
            value = upper;
            had_collisions = true;
        }
        if i == n - 1 {
            value = max_depth_mm;
        }

        stops.push(ColorStop::new(filament.id.clone(), value));
        prev = value;
    }

    if had_collisions {
        log::warn!("Color stop allocation clamped thresholds to stay feasible");
    }

    StopAllocation {
        stops,
        had_collisions,
    }
}

/// Cumulative `1/td` fractions, ending at 1
fn weighted_fractions(filaments: &[Filament]) -> Vec<f64> {
    let weights: Vec<f64> = filaments
        .iter()
        .map(|f| {
            let td = f.attenuation_coefficient;
            if td.is_finite() && td > 0.0 { 1.0 / td } else { 1.0 }
        })
        .collect();
    let total: f64 = weights.iter().sum();
    let mut cumulative = 0.0;
    weights
        .iter()
        .map(|w| {
            cumulative += w;
            cumulative / total
        })
        .collect()
}

/// Round to the nearest multiple of `step`; non-positive step is a no-op
#[inline]
fn quantize(value: f64, step: f64) -> f64 {
    if step.is_finite() && step > 0.0 {
        (value / step).round() * step
    } else {
        value
    }
}

/// Stop whose filament is on top at `depth_mm`.
///
/// `stops` must be sorted ascending. The first threshold at or above the depth
/// wins; deeper than every threshold selects the last (most opaque) stop.
pub fn active_stop(stops: &[ColorStop], depth_mm: f64) -> Option<&ColorStop> {
    stops
        .iter()
        .find(|s| s.threshold_depth_mm + STOP_MATCH_EPSILON >= depth_mm)
        .or_else(|| stops.last())
}

/// Sort stops ascending by threshold
pub fn sort_stops(stops: &mut [ColorStop]) {
    stops.sort_by(|a, b| a.threshold_depth_mm.total_cmp(&b.threshold_depth_mm));
}
