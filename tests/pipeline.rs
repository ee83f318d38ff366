//! Image to STL, end to end.

use lithoforge::depth::HeightmapPayload;
use lithoforge::plan::compute_swaps;
use lithoforge::prelude::*;
use lithoforge::{preview_rgba, Rgb, Settings};
use std::io::Cursor;

fn portrait_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        let v = ((x + y) * 255 / (width + height - 2)) as u8;
        image::Rgba([v, v / 2, 255 - v, 255])
    });
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png).unwrap();
    png
}

fn filaments() -> Vec<Filament> {
    vec![
        Filament::from_d95("white", Rgb::WHITE, 2.5).with_name("White"),
        Filament::from_d95("cyan", Rgb::new(0, 180, 200), 1.2).with_name("Cyan"),
        Filament::from_d95("black", Rgb::new(20, 20, 20), 0.4).with_name("Black"),
    ]
}

#[test]
fn image_to_stl_with_border() {
    let settings: Settings = serde_json::from_str(
        r#"{
            "geometry": { "smoothing_sigma": 0.8, "spike_removal": "light", "dynamic_depth": true },
            "print": { "width_mm": 80, "height_mm": 60, "mesh_resolution": 24, "has_border": true }
        }"#,
    )
    .unwrap();

    let heightmap = process_image_bytes(&ImageCodec::default(), &portrait_png(40, 30), &settings.geometry).unwrap();
    assert_eq!((heightmap.width, heightmap.height), (40, 30));
    let stats = heightmap.stats().unwrap();
    assert!(stats.min_mm >= 0.48 - 1e-6 && stats.max_mm <= 2.24 + 1e-6);

    // Transport round trip is lossless
    let payload: HeightmapPayload = serde_json::from_str(&serde_json::to_string(&heightmap.to_payload()).unwrap()).unwrap();
    let restored = Heightmap::from_payload(&payload).unwrap();
    assert_eq!(restored, heightmap);

    let stl = export_stl(&restored, &settings.print).unwrap();
    let count = u32::from_le_bytes([stl[80], stl[81], stl[82], stl[83]]) as usize;
    let (sx, sy) = (24, 24);
    assert_eq!(count, 4 * sx * sy + 4 * sx + 4 * sy + 48);
    assert_eq!(stl.len(), 84 + 50 * count);
}

#[test]
fn stops_preview_and_plan_agree() {
    let settings = Settings::default();
    let heightmap = process_image_bytes(&ImageCodec::default(), &portrait_png(32, 32), &settings.geometry).unwrap();

    let filaments = filaments();
    let allocation = allocate_stops(
        &filaments,
        settings.geometry.min_depth_mm,
        settings.geometry.max_depth_mm,
        settings.print.layer_height_mm,
        StopStrategy::Weighted,
    );
    assert_eq!(allocation.stops.len(), 3);
    assert_eq!(allocation.stops[2].threshold_depth_mm, settings.geometry.max_depth_mm);

    let rgba = preview_rgba(&heightmap, &allocation.stops, &filaments);
    assert_eq!(rgba.len(), 32 * 32 * 4);
    assert!(rgba.chunks(4).all(|px| px[3] == 255));

    let plan = compute_swaps(&allocation.stops, settings.print.layer_height_mm).unwrap();
    assert_eq!(plan.filament_at_layer(0), Some("white"));
    assert_eq!(plan.filament_at_layer(10_000), Some("black"));

    let preview = build_preview(&heightmap, &settings.print, &allocation.stops, &filaments, ColorSpace::Srgb);
    assert_eq!(preview.colors.len(), preview.mesh.positions.len());
}
