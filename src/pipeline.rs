//! End-to-end stages: image to heightmap, heightmap to colored preview mesh,
//! and per-recipe 2D thumbnails.
//!
//! Every stage takes its inputs by reference and returns fresh buffers, so
//! stages can run on any thread without shared state.

use crate::colorize::{preview_rgba, vertex_colors, ColorSpace};
use crate::config::{GeometrySettings, PrintSettings};
use crate::decode::{Codec, RasterImage};
use crate::depth::{apply_invert_and_dynamic_depth, map_to_depth_mm, Heightmap, HeightmapStats};
use crate::filter::{gaussian_blur, remove_spikes};
use crate::luminance::{apply_tone_mapping, raster_luminance};
use crate::mesh::{build_relief_mesh, MeshParams, ReliefMesh};
use crate::stops::{allocate_stops, ColorStop, Filament, StopAllocation, StopStrategy};
use serde::{Deserialize, Serialize};

/// Largest side of a recipe thumbnail
pub const DEFAULT_THUMBNAIL_DIM: u32 = 128;

#[cfg(not(target_arch = "wasm32"))]
type Timer = Option<std::time::Instant>;
#[cfg(target_arch = "wasm32")]
type Timer = Option<()>;

#[cfg(not(target_arch = "wasm32"))]
fn start_timer() -> Timer {
    Some(std::time::Instant::now())
}
#[cfg(target_arch = "wasm32")]
fn start_timer() -> Timer {
    None
}

#[cfg(not(target_arch = "wasm32"))]
fn elapsed_ms(timer: Timer) -> f64 {
    timer.map_or(0.0, |t| t.elapsed().as_secs_f64() * 1000.0)
}
#[cfg(target_arch = "wasm32")]
fn elapsed_ms(_timer: Timer) -> f64 {
    0.0
}

/// Raster to heightmap in millimeters
pub fn process_raster(image: &RasterImage, geometry: &GeometrySettings) -> Heightmap {
    let timer = start_timer();
    let (w, h) = (image.width as usize, image.height as usize);

    // Step 1: luminance, alpha over white
    let mut field = raster_luminance(image, geometry.luminance_method);

    // Step 2: tone curve
    apply_tone_mapping(&mut field, &geometry.tone_mapping);

    // Step 3: despike, then smooth
    let field = remove_spikes(&field, w, h, geometry.spike_removal);
    let mut field = gaussian_blur(&field, w, h, geometry.smoothing_sigma);

    // Step 4: invert and percentile stretch
    apply_invert_and_dynamic_depth(&mut field, geometry.invert, geometry.dynamic_depth);

    // Step 5: millimeters
    let depths = map_to_depth_mm(&field, geometry.min_depth_mm, geometry.max_depth_mm);

    log::debug!("Heightmap {}x{} in {:.1} ms", w, h, elapsed_ms(timer));
    Heightmap {
        width: image.width,
        height: image.height,
        depths,
    }
}

/// Decode image bytes and build the heightmap
pub fn process_image_bytes<C: Codec + ?Sized>(
    codec: &C,
    bytes: &[u8],
    geometry: &GeometrySettings,
) -> crate::Result<Heightmap> {
    let timer = start_timer();
    let raster = codec.decode(bytes)?;
    log::debug!("Decoded {}x{} in {:.1} ms", raster.width, raster.height, elapsed_ms(timer));

    let heightmap = process_raster(&raster, geometry);
    log::info!(
        "Processed {}x{} image into heightmap ({:.2}-{:.2} mm)",
        heightmap.width,
        heightmap.height,
        geometry.min_depth_mm,
        geometry.max_depth_mm
    );
    Ok(heightmap)
}

/// Relief mesh with per-vertex preview colors
#[derive(Clone, Debug)]
pub struct MeshPreview {
    pub mesh: ReliefMesh,
    /// RGB floats, one triple per vertex
    pub colors: Vec<f32>,
    pub stats: Option<HeightmapStats>,
}

/// Build the relief mesh and color it for a renderer
pub fn build_preview(
    heightmap: &Heightmap,
    print: &PrintSettings,
    stops: &[ColorStop],
    filaments: &[Filament],
    space: ColorSpace,
) -> MeshPreview {
    let timer = start_timer();
    let mesh = build_relief_mesh(heightmap, &MeshParams::from_print(print));
    let colors = vertex_colors(&mesh, stops, filaments, space);
    log::debug!(
        "Preview mesh: {} vertices, {} triangles in {:.1} ms",
        mesh.vertex_count(),
        mesh.triangle_count(),
        elapsed_ms(timer)
    );
    MeshPreview {
        mesh,
        colors,
        stats: heightmap.stats(),
    }
}

/// A candidate filament stack to preview
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub filaments: Vec<Filament>,
    #[serde(default)]
    pub strategy: StopStrategy,
}

/// 2D preview of one recipe
#[derive(Clone, Debug, PartialEq)]
pub struct Thumbnail {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub allocation: StopAllocation,
}

/// Bilinear downsample so the larger side is at most `max_dim`
pub fn downsample_heightmap(heightmap: &Heightmap, max_dim: u32) -> Heightmap {
    let larger = heightmap.width.max(heightmap.height);
    if heightmap.is_empty() || max_dim == 0 || larger <= max_dim {
        return heightmap.clone();
    }
    let scale = max_dim as f64 / larger as f64;
    let w = ((heightmap.width as f64 * scale).round() as u32).max(1);
    let h = ((heightmap.height as f64 * scale).round() as u32).max(1);

    let axis = |i: u32, n: u32| if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
    let depths = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| heightmap.sample_bilinear(axis(x, w), axis(y, h)))
        .collect();

    Heightmap {
        width: w,
        height: h,
        depths,
    }
}

/// Allocate stops for a recipe and render its backlit thumbnail
pub fn render_thumbnail(
    index: usize,
    heightmap: &Heightmap,
    recipe: &Recipe,
    geometry: &GeometrySettings,
    print: &PrintSettings,
    max_dim: u32,
) -> Thumbnail {
    let small = downsample_heightmap(heightmap, max_dim);
    let allocation = allocate_stops(
        &recipe.filaments,
        geometry.min_depth_mm,
        geometry.max_depth_mm,
        print.layer_height_mm,
        recipe.strategy,
    );
    let rgba = preview_rgba(&small, &allocation.stops, &recipe.filaments);
    Thumbnail {
        index,
        width: small.width,
        height: small.height,
        rgba,
        allocation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use crate::decode::ImageCodec;
    use std::io::Cursor;

    fn gradient_raster(w: u32, h: u32) -> RasterImage {
        let rgba = (0..w * h)
            .flat_map(|i| {
                let v = ((i % w) * 255 / (w - 1)) as u8;
                [v, v, v, 255]
            })
            .collect();
        RasterImage::from_rgba(w, h, rgba).unwrap()
    }

    #[test]
    fn test_process_raster_depth_range() {
        let geometry = GeometrySettings::default();
        let hm = process_raster(&gradient_raster(16, 4), &geometry);
        assert_eq!(hm.depths.len(), 64);
        assert!(hm.depths.iter().all(|&d| (0.48..=2.24).contains(&d)));
        assert!((hm.depths[0] - 0.48).abs() < 1e-5);
        assert!((hm.depths[15] - 2.24).abs() < 1e-5);
    }

    #[test]
    fn test_invert_flips_depths() {
        let geometry = GeometrySettings {
            invert: true,
            ..GeometrySettings::default()
        };
        let hm = process_raster(&gradient_raster(16, 4), &geometry);
        assert!((hm.depths[0] - 2.24).abs() < 1e-5);
        assert!((hm.depths[15] - 0.48).abs() < 1e-5);
    }

    #[test]
    fn test_process_image_bytes() {
        let img = image::RgbaImage::from_pixel(8, 6, image::Rgba([128, 128, 128, 255]));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png).unwrap();

        let hm = process_image_bytes(&ImageCodec::default(), &png, &GeometrySettings::default()).unwrap();
        assert_eq!((hm.width, hm.height), (8, 6));
        let first = hm.depths[0];
        assert!(hm.depths.iter().all(|&d| d == first));

        let err = process_image_bytes(&ImageCodec::default(), b"nope", &GeometrySettings::default());
        assert!(matches!(err, Err(crate::Error::Decode(_))));
    }

    #[test]
    fn test_build_preview_buffers() {
        let hm = process_raster(&gradient_raster(16, 16), &GeometrySettings::default());
        let print = PrintSettings {
            mesh_resolution: 8,
            ..PrintSettings::default()
        };
        let filaments = vec![Filament::from_d95("w", Rgb::WHITE, 1.0)];
        let stops = vec![ColorStop::new("w", 2.24)];
        let preview = build_preview(&hm, &print, &stops, &filaments, ColorSpace::Linear);
        assert_eq!(preview.colors.len(), preview.mesh.positions.len());
        assert_eq!(preview.mesh.segments_x, 8);
        let stats = preview.stats.unwrap();
        assert!(stats.min_mm >= 0.48 && stats.max_mm <= 2.24);
    }

    #[test]
    fn test_downsample_keeps_corners() {
        let depths: Vec<f32> = (0..400 * 200).map(|i| (i % 400) as f32).collect();
        let hm = Heightmap::new(400, 200, depths).unwrap();
        let small = downsample_heightmap(&hm, 100);
        assert_eq!((small.width, small.height), (100, 50));
        assert_eq!(small.depths[0], 0.0);
        assert!((small.depths[99] - 399.0).abs() < 1e-3);

        let tiny = Heightmap::new(2, 2, vec![1.0; 4]).unwrap();
        assert_eq!(downsample_heightmap(&tiny, 100), tiny);
    }

    #[test]
    fn test_render_thumbnail() {
        let hm = process_raster(&gradient_raster(64, 32), &GeometrySettings::default());
        let recipe = Recipe {
            name: "warm".into(),
            filaments: vec![
                Filament::from_d95("white", Rgb::WHITE, 2.0),
                Filament::from_d95("red", Rgb::new(220, 30, 30), 1.0),
            ],
            strategy: StopStrategy::Linear,
        };
        let thumb = render_thumbnail(3, &hm, &recipe, &GeometrySettings::default(), &PrintSettings::default(), 16);
        assert_eq!(thumb.index, 3);
        assert_eq!((thumb.width, thumb.height), (16, 8));
        assert_eq!(thumb.rgba.len(), 16 * 8 * 4);
        assert_eq!(thumb.allocation.stops.len(), 2);
    }
}
