//! Depth normalization and the heightmap type.
//!
//! Implements the final stages of the image pipeline:
//! 1. Optional inversion of the tone-mapped field
//! 2. Optional dynamic-depth stretch between the 2nd and 98th percentiles
//! 3. Linear mapping of [0, 1] onto `[min_depth_mm, max_depth_mm]`
//!
//! The resulting [`Heightmap`] is immutable and travels between execution
//! contexts as base64-encoded little-endian f32 (see [`HeightmapPayload`]).

use crate::error::TransportError;
use crate::luminance::sanitize_unit;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Histogram resolution for the percentile stretch
pub const HISTOGRAM_BINS: usize = 512;
pub const LOW_PERCENTILE: f32 = 0.02;
pub const HIGH_PERCENTILE: f32 = 0.98;
/// Minimum percentile span for the stretch to apply
pub const MIN_STRETCH_SPAN: f32 = 1e-6;

/// Per-pixel relief depth in millimeters, row-major
#[derive(Clone, Debug, PartialEq)]
pub struct Heightmap {
    pub width: u32,
    pub height: u32,
    pub depths: Vec<f32>,
}

/// Summary statistics of a heightmap in mm
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeightmapStats {
    pub min_mm: f32,
    pub max_mm: f32,
    pub mean_mm: f32,
    pub std_mm: f32,
}

/// Wire form of a heightmap
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeightmapPayload {
    pub heightmap_base64: String,
    pub width: u32,
    pub height: u32,
}

impl Heightmap {
    pub fn new(width: u32, height: u32, depths: Vec<f32>) -> Result<Self, TransportError> {
        let expected = width as usize * height as usize;
        if depths.len() != expected {
            return Err(TransportError::Length {
                width,
                height,
                expected: expected * 4,
                actual: depths.len() * 4,
            });
        }
        Ok(Self { width, height, depths })
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.depths[y as usize * self.width as usize + x as usize]
    }

    pub fn to_base64(&self) -> String {
        encode_f32_base64(&self.depths)
    }

    pub fn from_base64(data: &str, width: u32, height: u32) -> Result<Self, TransportError> {
        let expected = width as usize * height as usize * 4;
        let bytes = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
        if bytes.len() != expected {
            return Err(TransportError::Length {
                width,
                height,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            width,
            height,
            depths: f32_from_le_bytes(&bytes),
        })
    }

    pub fn to_payload(&self) -> HeightmapPayload {
        HeightmapPayload {
            heightmap_base64: self.to_base64(),
            width: self.width,
            height: self.height,
        }
    }

    pub fn from_payload(payload: &HeightmapPayload) -> Result<Self, TransportError> {
        Self::from_base64(&payload.heightmap_base64, payload.width, payload.height)
    }

    pub fn stats(&self) -> Option<HeightmapStats> {
        if self.depths.is_empty() {
            return None;
        }
        let n = self.depths.len() as f64;
        let (mut min, mut max, mut sum) = (f32::INFINITY, f32::NEG_INFINITY, 0.0f64);
        for &d in &self.depths {
            min = min.min(d);
            max = max.max(d);
            sum += d as f64;
        }
        let mean = sum / n;
        let var = self
            .depths
            .iter()
            .map(|&d| (d as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        Some(HeightmapStats {
            min_mm: min,
            max_mm: max,
            mean_mm: mean as f32,
            std_mm: var.sqrt() as f32,
        })
    }

    /// Bilinear sample at normalized coordinates `u, v` in [0, 1]
    pub fn sample_bilinear(&self, u: f32, v: f32) -> f32 {
        if self.depths.is_empty() {
            return 0.0;
        }
        let (w, h) = (self.width as usize, self.height as usize);
        let px = sanitize_unit(u) * (w - 1) as f32;
        let py = sanitize_unit(v) * (h - 1) as f32;
        let x0 = px as usize;
        let y0 = py as usize;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = px - x0 as f32;
        let fy = py - y0 as f32;

        let at = |x: usize, y: usize| self.depths[y * w + x];
        let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
        let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// Encode floats as base64 of their little-endian bytes
pub fn encode_f32_base64(values: &[f32]) -> String {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode base64 little-endian floats; the byte count must be a multiple of 4
pub fn decode_f32_base64(data: &str) -> Result<Vec<f32>, TransportError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
    if bytes.len() % 4 != 0 {
        let expected = bytes.len() / 4 * 4;
        return Err(TransportError::Length {
            width: (bytes.len() / 4) as u32,
            height: 1,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(f32_from_le_bytes(&bytes))
}

fn f32_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Sanitize to [0, 1], optionally invert, optionally stretch by percentiles
pub fn apply_invert_and_dynamic_depth(values: &mut [f32], invert: bool, dynamic_depth: bool) {
    for v in values.iter_mut() {
        let s = sanitize_unit(*v);
        *v = if invert { 1.0 - s } else { s };
    }

    if !dynamic_depth || values.is_empty() {
        return;
    }

    let (low, high) = percentile_range(values);
    let span = high - low;
    if span > MIN_STRETCH_SPAN {
        for v in values.iter_mut() {
            *v = sanitize_unit((*v - low) / span);
        }
    } else {
        log::debug!("Dynamic depth skipped: percentile span {:.2e} too small", span);
    }
}

/// 2nd and 98th percentile values from a 512-bin histogram of a [0, 1] field
pub fn percentile_range(values: &[f32]) -> (f32, f32) {
    let mut histogram = [0usize; HISTOGRAM_BINS];
    for &v in values {
        histogram[bin_index(sanitize_unit(v))] += 1;
    }
    let n = values.len();
    (
        histogram_percentile(&histogram, n, LOW_PERCENTILE),
        histogram_percentile(&histogram, n, HIGH_PERCENTILE),
    )
}

#[inline(always)]
fn bin_index(v: f32) -> usize {
    ((v * HISTOGRAM_BINS as f32) as usize).min(HISTOGRAM_BINS - 1)
}

fn histogram_percentile(histogram: &[usize; HISTOGRAM_BINS], n: usize, pct: f32) -> f32 {
    let target = ((pct * n as f32).ceil() as usize).max(1);
    let mut cumulative = 0usize;
    for (bin, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return bin as f32 / (HISTOGRAM_BINS - 1) as f32;
        }
    }
    1.0
}

/// Map a single normalized value to millimeters
#[inline]
pub fn depth_mm(v: f32, min_depth_mm: f64, max_depth_mm: f64) -> f32 {
    let depth = min_depth_mm + sanitize_unit(v) as f64 * (max_depth_mm - min_depth_mm);
    let (lo, hi) = (min_depth_mm.min(max_depth_mm), min_depth_mm.max(max_depth_mm));
    if depth.is_finite() {
        depth.clamp(lo, hi) as f32
    } else {
        lo as f32
    }
}

/// Map a normalized field to millimeters
pub fn map_to_depth_mm(values: &[f32], min_depth_mm: f64, max_depth_mm: f64) -> Vec<f32> {
    values
        .iter()
        .map(|&v| depth_mm(v, min_depth_mm, max_depth_mm))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_base64_roundtrip_bit_exact() {
        let values = vec![
            0.0f32, -0.0, 1.0, -1.5, 0.48, 2.24, 1.0e30, -3.4e38, f32::MIN_POSITIVE, 123456.79,
        ];
        let encoded = encode_f32_base64(&values);
        let decoded = decode_f32_base64(&encoded).unwrap();
        assert_eq!(decoded.len(), values.len());
        for (a, b) in values.iter().zip(&decoded) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_heightmap_transport() {
        let hm = Heightmap::new(3, 2, vec![0.5, 1.0, 1.5, 2.0, -2.5, 1e6]).unwrap();
        let payload = hm.to_payload();
        assert_eq!((payload.width, payload.height), (3, 2));
        assert_eq!(Heightmap::from_payload(&payload).unwrap(), hm);

        let json = serde_json::to_string(&payload).unwrap();
        let back: HeightmapPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_heightmap_transport_rejects_wrong_size() {
        let hm = Heightmap::new(2, 2, vec![1.0; 4]).unwrap();
        let err = Heightmap::from_base64(&hm.to_base64(), 3, 2).unwrap_err();
        assert!(matches!(err, TransportError::Length { expected: 24, actual: 16, .. }));
        assert!(matches!(
            Heightmap::from_base64("not base64!", 1, 1),
            Err(TransportError::Base64(_))
        ));
        assert!(Heightmap::new(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_map_to_depth_mm_exact() {
        let depths = map_to_depth_mm(&[0.0, 0.5, 1.0], 0.48, 2.24);
        assert_eq!(depths, vec![0.48f32, 1.36, 2.24]);
    }

    #[test]
    fn test_map_to_depth_mm_sanitizes() {
        let depths = map_to_depth_mm(&[f32::NAN, f32::INFINITY, -4.0, 7.0], 0.48, 2.24);
        assert_eq!(depths, vec![0.48f32, 0.48, 0.48, 2.24]);
    }

    #[test]
    fn test_invert_and_dynamic_depth_sanitizes() {
        let mut values = vec![f32::NAN, -1.0, 2.0, 0.3, f32::NEG_INFINITY, 0.7, f32::INFINITY];
        apply_invert_and_dynamic_depth(&mut values, true, true);
        assert!(values.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));

        let mut values = vec![f32::NAN, 5.0, -5.0];
        apply_invert_and_dynamic_depth(&mut values, false, false);
        assert_eq!(values, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_invert() {
        let mut values = vec![0.0, 0.25, 1.0];
        apply_invert_and_dynamic_depth(&mut values, true, false);
        assert_eq!(values, vec![1.0, 0.75, 0.0]);
    }

    #[test]
    fn test_dynamic_depth_stretches_to_full_range() {
        let mut values: Vec<f32> = (0..1000).map(|i| 0.4 + 0.2 * i as f32 / 999.0).collect();
        apply_invert_and_dynamic_depth(&mut values, false, true);
        let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(min, 0.0);
        assert_eq!(max, 1.0);
    }

    #[test]
    fn test_dynamic_depth_flat_field_unchanged() {
        let mut values = vec![0.5f32; 100];
        apply_invert_and_dynamic_depth(&mut values, false, true);
        assert!(values.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_stats_and_sampling() {
        let hm = Heightmap::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let stats = hm.stats().unwrap();
        assert_eq!(stats.min_mm, 1.0);
        assert_eq!(stats.max_mm, 4.0);
        assert_relative_eq!(stats.mean_mm, 2.5);
        assert_relative_eq!(stats.std_mm, 1.118034, epsilon = 1e-5);

        assert_relative_eq!(hm.sample_bilinear(0.0, 0.0), 1.0);
        assert_relative_eq!(hm.sample_bilinear(1.0, 1.0), 4.0);
        assert_relative_eq!(hm.sample_bilinear(0.5, 0.5), 2.5);
        assert_relative_eq!(hm.sample_bilinear(1.0, 0.0), 2.0);
    }
}
