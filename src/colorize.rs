//! Transmission preview colors.
//!
//! Light passing through `d` mm of filament keeps `exp(-td * d)` of its
//! intensity (Beer-Lambert). The visible color blends the white backlight with
//! the filament color by that fraction. Blending happens on sRGB-encoded
//! floats; `ColorSpace::Linear` converts afterwards for renderers that expect
//! linear vertex colors.

use crate::color::{Rgb, Rgbf};
use crate::depth::Heightmap;
use crate::mesh::ReliefMesh;
use crate::stops::{active_stop, ColorStop, Filament};
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Output encoding for preview colors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorSpace {
    #[default]
    Srgb,
    Linear,
}

/// Fraction of backlight transmitted through `depth_mm` of material.
///
/// Negative or non-finite inputs transmit everything.
#[inline]
pub fn attenuation(attenuation_coefficient: f64, depth_mm: f64) -> f64 {
    let a = (-attenuation_coefficient * depth_mm).exp();
    if a.is_finite() { a.clamp(0.0, 1.0) } else { 1.0 }
}

/// Visible color of `depth_mm` of filament in front of a white backlight
pub fn transmission_color(color: Rgb, attenuation_coefficient: f64, depth_mm: f64) -> Rgbf {
    let a = attenuation(attenuation_coefficient, depth_mm) as f32;
    (Rgbf::WHITE * a + color.to_float() * (1.0 - a)).clamped()
}

#[inline]
fn encode(color: Rgbf, space: ColorSpace) -> [f32; 3] {
    match space {
        ColorSpace::Srgb => color.to_array(),
        ColorSpace::Linear => color.to_linear().to_array(),
    }
}

/// Resolves the visible filament for a depth.
///
/// A stop naming an unknown filament falls back to the last filament in the
/// list. With no filaments at all, depths render as a gray ramp from 128 at
/// the shallowest sample to 255 at the deepest.
struct StopLookup<'a> {
    stops: Vec<ColorStop>,
    filaments: HashMap<&'a str, &'a Filament>,
    fallback: Option<&'a Filament>,
    ramp_min: f32,
    ramp_span: f32,
}

impl<'a> StopLookup<'a> {
    fn new(stops: &[ColorStop], filaments: &'a [Filament], depths: &[f32]) -> Self {
        let mut stops = stops.to_vec();
        crate::stops::sort_stops(&mut stops);
        let (lo, hi) = depths
            .iter()
            .filter(|d| d.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));
        let (ramp_min, ramp_span) = if lo <= hi { (lo, hi - lo) } else { (0.0, 0.0) };
        Self {
            stops,
            filaments: filaments.iter().map(|f| (f.id.as_str(), f)).collect(),
            fallback: filaments.last(),
            ramp_min,
            ramp_span,
        }
    }

    fn color_at(&self, depth_mm: f32) -> Rgbf {
        let depth = if depth_mm.is_finite() { depth_mm.max(0.0) as f64 } else { 0.0 };
        let filament = active_stop(&self.stops, depth)
            .and_then(|s| self.filaments.get(s.filament_id.as_str()).copied())
            .or(self.fallback);
        match filament {
            Some(f) => transmission_color(f.hex_color, f.attenuation_coefficient, depth),
            None => self.gray_at(depth_mm),
        }
    }

    fn gray_at(&self, depth_mm: f32) -> Rgbf {
        let t = if self.ramp_span > 0.0 && depth_mm.is_finite() {
            ((depth_mm - self.ramp_min) / self.ramp_span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let g = (128.0 + 127.0 * t) / 255.0;
        Rgbf::new(g, g, g)
    }
}

/// Per-vertex RGB floats for a relief mesh.
///
/// Top vertices are colored from their sampled depth; bottom vertices copy the
/// color of the top vertex above them.
pub fn vertex_colors(
    mesh: &ReliefMesh,
    stops: &[ColorStop],
    filaments: &[Filament],
    space: ColorSpace,
) -> Vec<f32> {
    let lookup = StopLookup::new(stops, filaments, &mesh.heights_mm);

    #[cfg(feature = "parallel")]
    let top: Vec<[f32; 3]> = mesh
        .heights_mm
        .par_iter()
        .map(|&d| encode(lookup.color_at(d), space))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let top: Vec<[f32; 3]> = mesh
        .heights_mm
        .iter()
        .map(|&d| encode(lookup.color_at(d), space))
        .collect();

    let mut colors = Vec::with_capacity(mesh.positions.len());
    for c in &top {
        colors.extend_from_slice(c);
    }
    for c in &top {
        colors.extend_from_slice(c);
    }
    colors
}

/// RGBA8 backlit preview of a heightmap, one pixel per sample
pub fn preview_rgba(heightmap: &Heightmap, stops: &[ColorStop], filaments: &[Filament]) -> Vec<u8> {
    let lookup = StopLookup::new(stops, filaments, &heightmap.depths);
    let pixel = |d: &f32| {
        let c = lookup.color_at(*d).to_rgb();
        [c.r, c.g, c.b, 255]
    };

    #[cfg(feature = "parallel")]
    let pixels: Vec<[u8; 4]> = heightmap.depths.par_iter().map(pixel).collect();
    #[cfg(not(feature = "parallel"))]
    let pixels: Vec<[u8; 4]> = heightmap.depths.iter().map(pixel).collect();

    pixels.into_iter().flatten().collect()
}

/// Backlit preview as an image (requires 'native' feature)
#[cfg(feature = "native")]
pub fn preview_image(heightmap: &Heightmap, stops: &[ColorStop], filaments: &[Filament]) -> Option<image::RgbaImage> {
    image::RgbaImage::from_raw(heightmap.width, heightmap.height, preview_rgba(heightmap, stops, filaments))
}
