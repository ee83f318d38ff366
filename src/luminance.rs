//! Luminance extraction and tone mapping.
//!
//! Every value leaving this module is finite and in [0, 1].

use crate::config::{CurvePoint, LuminanceMethod, ToneMapping};
use crate::decode::RasterImage;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const SATURATION_EPSILON: f32 = 1e-6;

/// Clamp to [0, 1], mapping NaN and infinities to 0
#[inline(always)]
pub fn sanitize_unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Luminance of a single normalized sRGB triple
#[inline]
pub fn luminance(method: LuminanceMethod, r: f32, g: f32, b: f32) -> f32 {
    let (r, g, b) = (sanitize_unit(r), sanitize_unit(g), sanitize_unit(b));
    let rec709 = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);

    let lum = match method {
        LuminanceMethod::Rec601 => 0.299 * r + 0.587 * g + 0.114 * b,
        LuminanceMethod::Rec709 => rec709,
        LuminanceMethod::MaxChannel => max,
        LuminanceMethod::ScaledMaxChannel => (r + g + b) / 3.0,
        LuminanceMethod::Combo => 0.5 * rec709 + 0.5 * max,
        LuminanceMethod::ColorAware => {
            let sat = (max - min) / (max + SATURATION_EPSILON);
            (1.0 - sat) * rec709 + sat * max
        }
        LuminanceMethod::ColorPop => rec709 + 0.25 * (max - min),
    };
    sanitize_unit(lum)
}

/// Convert an RGBA raster to a luminance field.
///
/// Transparent pixels are composited over white (the backlight) first.
pub fn raster_luminance(image: &RasterImage, method: LuminanceMethod) -> Vec<f32> {
    let convert = |px: &[u8]| {
        let alpha = px[3] as f32 / 255.0;
        let over_white = |c: u8| c as f32 / 255.0 * alpha + (1.0 - alpha);
        luminance(method, over_white(px[0]), over_white(px[1]), over_white(px[2]))
    };

    #[cfg(feature = "parallel")]
    {
        image.rgba.par_chunks_exact(4).map(convert).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        image.rgba.chunks_exact(4).map(convert).collect()
    }
}

/// Gamma / contrast / offset tone curve
#[inline]
pub fn apply_gamma(lum: f32, gamma: f32, contrast: f32, offset: f32) -> f32 {
    let powered = sanitize_unit(sanitize_unit(lum).powf(gamma));
    let contrasted = (powered - 0.5) * contrast + 0.5;
    sanitize_unit(contrasted + offset)
}

/// Normalized piecewise-linear transfer curve
#[derive(Clone, Debug, PartialEq)]
pub struct TransferCurve {
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl TransferCurve {
    /// Build a curve from arbitrary control points.
    ///
    /// Points are clamped to the unit square; only interior x values are kept
    /// and the endpoints are forced to (0,0) and (1,1). Points sharing an x
    /// collapse to the last one given.
    pub fn new(points: &[CurvePoint]) -> Self {
        let mut inner: Vec<(f32, f32)> = points
            .iter()
            .filter(|p| p.x.is_finite() && p.y.is_finite())
            .map(|p| (p.x.clamp(0.0, 1.0), p.y.clamp(0.0, 1.0)))
            .filter(|&(x, _)| x > 0.0 && x < 1.0)
            .collect();
        // Stable sort keeps input order among equal x, so "last wins" holds below.
        inner.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut xs: Vec<f32> = Vec::with_capacity(inner.len() + 2);
        let mut ys: Vec<f32> = Vec::with_capacity(inner.len() + 2);
        let anchors = std::iter::once((0.0, 0.0))
            .chain(inner)
            .chain(std::iter::once((1.0, 1.0)));
        for (x, y) in anchors {
            match xs.last() {
                Some(&last) if (x - last).abs() < 1e-9 => {
                    if let Some(prev) = ys.last_mut() {
                        *prev = y;
                    }
                }
                _ => {
                    xs.push(x);
                    ys.push(y);
                }
            }
        }

        Self { xs, ys }
    }

    pub fn evaluate(&self, v: f32) -> f32 {
        let v = sanitize_unit(v);
        let n = self.xs.len();
        if v <= self.xs[0] {
            return sanitize_unit(self.ys[0]);
        }
        if v >= self.xs[n - 1] {
            return sanitize_unit(self.ys[n - 1]);
        }

        // First knot strictly greater than v
        let hi = self.xs.partition_point(|&x| x <= v).min(n - 1);
        let lo = hi - 1;
        let (x0, x1) = (self.xs[lo], self.xs[hi]);
        let (y0, y1) = (self.ys[lo], self.ys[hi]);
        let t = if x1 > x0 { (v - x0) / (x1 - x0) } else { 0.0 };
        sanitize_unit(y0 + (y1 - y0) * t)
    }
}

/// Tone-map a luminance field in place
pub fn apply_tone_mapping(field: &mut [f32], mapping: &ToneMapping) {
    match mapping {
        ToneMapping::Gamma { gamma, contrast, offset } => {
            let (gamma, contrast, offset) = (*gamma, *contrast, *offset);
            map_in_place(field, |v| apply_gamma(v, gamma, contrast, offset));
        }
        ToneMapping::Curve { points } => {
            let curve = TransferCurve::new(points);
            map_in_place(field, |v| curve.evaluate(v));
        }
    }
}

fn map_in_place<F>(field: &mut [f32], f: F)
where
    F: Fn(f32) -> f32 + Sync + Send,
{
    #[cfg(feature = "parallel")]
    field.par_iter_mut().for_each(|v| *v = f(*v));
    #[cfg(not(feature = "parallel"))]
    field.iter_mut().for_each(|v| *v = f(*v));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_luminance_methods() {
        let (r, g, b) = (1.0, 0.5, 0.0);
        assert_relative_eq!(luminance(LuminanceMethod::Rec601, r, g, b), 0.5925, epsilon = 1e-6);
        assert_relative_eq!(luminance(LuminanceMethod::Rec709, r, g, b), 0.5702, epsilon = 1e-6);
        assert_relative_eq!(luminance(LuminanceMethod::MaxChannel, r, g, b), 1.0);
        assert_relative_eq!(luminance(LuminanceMethod::ScaledMaxChannel, r, g, b), 0.5, epsilon = 1e-6);
        assert_relative_eq!(luminance(LuminanceMethod::Combo, r, g, b), 0.7851, epsilon = 1e-6);
        // Fully saturated: color_aware collapses to max channel
        assert_relative_eq!(luminance(LuminanceMethod::ColorAware, r, g, b), 1.0, epsilon = 1e-5);
        // 0.5702 + 0.25 clamped stays under 1
        assert_relative_eq!(luminance(LuminanceMethod::ColorPop, r, g, b), 0.8202, epsilon = 1e-6);
        assert_relative_eq!(luminance(LuminanceMethod::ColorPop, 1.0, 1.0, 0.0), 1.0);
    }

    #[test]
    fn test_gray_is_method_invariant() {
        for method in LuminanceMethod::ALL {
            assert_relative_eq!(luminance(method, 0.4, 0.4, 0.4), 0.4, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_non_finite_inputs() {
        for method in LuminanceMethod::ALL {
            let v = luminance(method, f32::NAN, f32::INFINITY, -3.0);
            assert!(v.is_finite() && (0.0..=1.0).contains(&v));
        }
        assert_eq!(apply_gamma(f32::NAN, 1.0, 1.0, 0.0), 0.0);
        assert_eq!(apply_gamma(0.5, 1.0, f32::INFINITY, 0.0), 0.0);
    }

    #[test]
    fn test_gamma_curve() {
        assert_relative_eq!(apply_gamma(0.25, 1.0, 1.0, 0.0), 0.25);
        assert_relative_eq!(apply_gamma(0.25, 2.0, 1.0, 0.0), 0.0625);
        assert_relative_eq!(apply_gamma(0.75, 1.0, 2.0, 0.0), 1.0);
        assert_relative_eq!(apply_gamma(0.5, 1.0, 1.0, 0.2), 0.7, epsilon = 1e-6);
        assert_relative_eq!(apply_gamma(0.1, 1.0, 1.0, -0.5), 0.0);
    }

    #[test]
    fn test_transfer_curve_identity() {
        let curve = TransferCurve::new(&[]);
        for v in [0.0, 0.2, 0.5, 0.9, 1.0] {
            assert_relative_eq!(curve.evaluate(v), v);
        }
    }

    #[test]
    fn test_transfer_curve_interpolation() {
        let curve = TransferCurve::new(&[CurvePoint::new(0.5, 0.8)]);
        assert_relative_eq!(curve.evaluate(0.25), 0.4);
        assert_relative_eq!(curve.evaluate(0.5), 0.8);
        assert_relative_eq!(curve.evaluate(0.75), 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_transfer_curve_dedup_and_clamp() {
        let curve = TransferCurve::new(&[
            CurvePoint::new(0.5, 0.2),
            CurvePoint::new(0.5, 0.6),
            CurvePoint::new(1.7, 0.0),
            CurvePoint::new(0.25, -4.0),
        ]);
        // y clamped to 0 at x=0.25, (0.5, 0.6) wins, x=1.7 is not an interior point
        assert_relative_eq!(curve.evaluate(0.25), 0.0);
        assert_relative_eq!(curve.evaluate(0.5), 0.6);
        assert_relative_eq!(curve.evaluate(1.0), 1.0);
        assert_relative_eq!(curve.evaluate(f32::NAN), 0.0);
    }

    #[test]
    fn test_raster_luminance_composites_alpha() {
        let raster = RasterImage::from_rgba(2, 1, vec![0, 0, 0, 255, 0, 0, 0, 0]).unwrap();
        let field = raster_luminance(&raster, LuminanceMethod::Rec601);
        assert_relative_eq!(field[0], 0.0);
        assert_relative_eq!(field[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_apply_tone_mapping_modes() {
        let mut field = vec![0.25, 0.5, f32::NAN];
        apply_tone_mapping(
            &mut field,
            &ToneMapping::Gamma { gamma: 2.0, contrast: 1.0, offset: 0.0 },
        );
        assert_relative_eq!(field[0], 0.0625);
        assert_relative_eq!(field[1], 0.25);
        assert_eq!(field[2], 0.0);

        let mut field = vec![0.25];
        apply_tone_mapping(
            &mut field,
            &ToneMapping::Curve { points: vec![CurvePoint::new(0.5, 1.0)] },
        );
        assert_relative_eq!(field[0], 0.5);
    }
}
