//! Spatial filters over a scalar field: median despike and Gaussian smoothing.
//!
//! Both filters sample with edge replication, so the output has the same
//! dimensions as the input and border pixels see a clamped neighborhood.

use crate::config::SpikeRemoval;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Largest Gaussian kernel radius in pixels
pub const MAX_BLUR_RADIUS: usize = 64;

/// Median filter for the given despike level. `SpikeRemoval::None` returns the input unchanged.
pub fn remove_spikes(field: &[f32], width: usize, height: usize, level: SpikeRemoval) -> Vec<f32> {
    match level.kernel_size() {
        Some(size) => median_filter(field, width, height, size),
        None => field.to_vec(),
    }
}

/// k×k median with edge-replicated sampling
pub fn median_filter(field: &[f32], width: usize, height: usize, size: usize) -> Vec<f32> {
    if width == 0 || height == 0 || size < 2 {
        return field.to_vec();
    }
    let half = (size / 2) as isize;
    let mid = (size * size) / 2;

    let filter_row = |y: usize, out_row: &mut [f32]| {
        let mut window = Vec::with_capacity(size * size);
        for (x, out) in out_row.iter_mut().enumerate() {
            window.clear();
            for dy in -half..=half {
                let sy = clamp_index(y as isize + dy, height);
                let row = &field[sy * width..(sy + 1) * width];
                for dx in -half..=half {
                    window.push(row[clamp_index(x as isize + dx, width)]);
                }
            }
            window.sort_unstable_by(f32::total_cmp);
            *out = window[mid];
        }
    };

    let mut output = vec![0.0f32; width * height];
    #[cfg(feature = "parallel")]
    output
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| filter_row(y, row));
    #[cfg(not(feature = "parallel"))]
    output
        .chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| filter_row(y, row));
    output
}

/// Blur radius for a given sigma: `clamp(ceil(3σ), 1, 64)`
pub fn gaussian_radius(sigma: f32) -> usize {
    ((3.0 * sigma).ceil() as usize).clamp(1, MAX_BLUR_RADIUS)
}

/// Normalized 1D Gaussian kernel of length `2 * radius + 1`.
///
/// Weights are computed in f64 so that tiny sigmas collapse to a unit impulse
/// instead of `0 / 0`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = gaussian_radius(sigma) as isize;
    let two_sigma_sq = 2.0 * f64::from(sigma) * f64::from(sigma);
    let weights: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / two_sigma_sq).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        return (-radius..=radius).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect();
    }
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// Separable Gaussian blur. Non-positive or non-finite sigma is a passthrough.
pub fn gaussian_blur(field: &[f32], width: usize, height: usize, sigma: f32) -> Vec<f32> {
    if !(sigma > 0.0) || !sigma.is_finite() || width == 0 || height == 0 {
        return field.to_vec();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;

    let horizontal_row = |y: usize, out_row: &mut [f32]| {
        let row = &field[y * width..(y + 1) * width];
        for (x, out) in out_row.iter_mut().enumerate() {
            *out = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * row[clamp_index(x as isize + k as isize - radius, width)])
                .sum();
        }
    };

    let mut temp = vec![0.0f32; width * height];
    #[cfg(feature = "parallel")]
    temp.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| horizontal_row(y, row));
    #[cfg(not(feature = "parallel"))]
    temp.chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| horizontal_row(y, row));

    let vertical_row = |y: usize, out_row: &mut [f32]| {
        for (x, out) in out_row.iter_mut().enumerate() {
            *out = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let sy = clamp_index(y as isize + k as isize - radius, height);
                    w * temp[sy * width + x]
                })
                .sum();
        }
    };

    let mut output = vec![0.0f32; width * height];
    #[cfg(feature = "parallel")]
    output
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| vertical_row(y, row));
    #[cfg(not(feature = "parallel"))]
    output
        .chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| vertical_row(y, row));
    output
}

#[inline(always)]
fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}
