//! WebAssembly interface for the lithophane pipeline.

use crate::colorize::{preview_rgba, ColorSpace};
use crate::config::{CurvePoint, GeometrySettings, LuminanceMethod, PrintSettings, SpikeRemoval, ToneMapping};
use crate::decode::{Codec, ImageCodec, RasterImage};
use crate::depth::Heightmap;
use crate::pipeline::{build_preview, process_raster, MeshPreview};
use crate::stl::export_stl;
use crate::stops::{allocate_stops, ColorStop, Filament, StopStrategy};
use wasm_bindgen::prelude::*;

fn js_err<E: std::fmt::Display>(e: E) -> JsValue {
    JsValue::from_str(&e.to_string())
}

#[wasm_bindgen]
pub struct LithophaneEngine {
    geometry: GeometrySettings,
    print: PrintSettings,
    codec: ImageCodec,
    filaments: Vec<Filament>,
    stops: Vec<ColorStop>,
    heightmap: Option<Heightmap>,
}

#[wasm_bindgen]
impl LithophaneEngine {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            geometry: GeometrySettings::default(),
            print: PrintSettings::default(),
            codec: ImageCodec::default(),
            filaments: Vec::new(),
            stops: Vec::new(),
            heightmap: None,
        }
    }

    pub fn set_depth_range(&mut self, min_mm: f64, max_mm: f64) {
        self.geometry.min_depth_mm = min_mm;
        self.geometry.max_depth_mm = max_mm;
    }

    pub fn set_gamma(&mut self, gamma: f32, contrast: f32, offset: f32) {
        self.geometry.tone_mapping = ToneMapping::Gamma { gamma, contrast, offset };
    }

    /// Flat `[x0, y0, x1, y1, ...]` control points
    pub fn set_curve(&mut self, points: &[f32]) {
        let points = points
            .chunks_exact(2)
            .map(|p| CurvePoint::new(p[0], p[1]))
            .collect();
        self.geometry.tone_mapping = ToneMapping::Curve { points };
    }

    pub fn set_smoothing_sigma(&mut self, sigma: f32) {
        self.geometry.smoothing_sigma = sigma;
    }

    pub fn set_spike_removal(&mut self, level: u8) {
        self.geometry.spike_removal = match level {
            1 => SpikeRemoval::Light,
            2 => SpikeRemoval::Medium,
            3 => SpikeRemoval::Strong,
            _ => SpikeRemoval::None,
        };
    }

    pub fn set_luminance_method(&mut self, method: u8) {
        self.geometry.luminance_method = LuminanceMethod::ALL
            .get(method as usize)
            .copied()
            .unwrap_or_default();
    }

    pub fn set_dynamic_depth(&mut self, enabled: bool) {
        self.geometry.dynamic_depth = enabled;
    }

    pub fn set_invert(&mut self, invert: bool) {
        self.geometry.invert = invert;
    }

    pub fn set_print_size(&mut self, width_mm: f64, height_mm: f64) {
        self.print.width_mm = width_mm;
        self.print.height_mm = height_mm;
    }

    pub fn set_layers(&mut self, layer_height_mm: f64, base_layer_mm: f64) {
        self.print.layer_height_mm = layer_height_mm;
        self.print.base_layer_mm = base_layer_mm;
    }

    pub fn set_mesh_resolution(&mut self, resolution: u32) {
        self.print.mesh_resolution = resolution;
    }

    pub fn set_border(&mut self, enabled: bool, width_mm: f64, depth_mm: f64) {
        self.print.has_border = enabled;
        self.print.border_width_mm = width_mm;
        self.print.border_depth_mm = depth_mm;
    }

    pub fn set_mirror_x(&mut self, mirror: bool) {
        self.print.mirror_x = mirror;
    }

    pub fn set_max_dimension(&mut self, max_dim: u32) {
        self.codec.max_dim = max_dim;
    }

    /// JSON array of filaments
    pub fn set_filaments_json(&mut self, json: &str) -> Result<(), JsValue> {
        self.filaments = serde_json::from_str(json).map_err(js_err)?;
        Ok(())
    }

    /// JSON array of color stops
    pub fn set_stops_json(&mut self, json: &str) -> Result<(), JsValue> {
        self.stops = serde_json::from_str(json).map_err(js_err)?;
        Ok(())
    }

    /// Allocate stops for the current filaments (0 = weighted, 1 = linear).
    /// Returns the stops as JSON.
    pub fn allocate_stops(&mut self, strategy: u8) -> Result<String, JsValue> {
        let strategy = if strategy == 1 { StopStrategy::Linear } else { StopStrategy::Weighted };
        let allocation = allocate_stops(
            &self.filaments,
            self.geometry.min_depth_mm,
            self.geometry.max_depth_mm,
            self.print.layer_height_mm,
            strategy,
        );
        self.stops = allocation.stops;
        serde_json::to_string(&self.stops).map_err(js_err)
    }

    /// Decode encoded image bytes (or a data URL) and build the heightmap
    pub fn process(&mut self, image_data: &[u8]) -> Result<WasmHeightmap, JsValue> {
        let raster = self.codec.decode(image_data).map_err(js_err)?;
        Ok(self.store(process_raster(&raster, &self.geometry)))
    }

    /// Build the heightmap from raw RGBA pixels
    pub fn process_rgba(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<WasmHeightmap, JsValue> {
        let raster = RasterImage::from_rgba(width, height, rgba.to_vec()).map_err(js_err)?;
        Ok(self.store(process_raster(&raster, &self.geometry)))
    }

    /// Restore a heightmap from its base64 transport form
    pub fn load_heightmap(&mut self, data: &str, width: u32, height: u32) -> Result<WasmHeightmap, JsValue> {
        let heightmap = Heightmap::from_base64(data, width, height).map_err(js_err)?;
        Ok(self.store(heightmap))
    }

    /// Colored preview mesh; `linear` selects linear-light vertex colors
    pub fn build_mesh(&self, linear: bool) -> Result<WasmMesh, JsValue> {
        let space = if linear { ColorSpace::Linear } else { ColorSpace::Srgb };
        let preview = build_preview(self.current()?, &self.print, &self.stops, &self.filaments, space);
        Ok(WasmMesh::from(preview))
    }

    /// Backlit 2D preview, RGBA8 at heightmap resolution
    pub fn preview_rgba(&self) -> Result<Vec<u8>, JsValue> {
        Ok(preview_rgba(self.current()?, &self.stops, &self.filaments))
    }

    pub fn export_stl(&self) -> Result<Vec<u8>, JsValue> {
        export_stl(self.current()?, &self.print).map_err(js_err)
    }
}

impl LithophaneEngine {
    fn store(&mut self, heightmap: Heightmap) -> WasmHeightmap {
        let result = WasmHeightmap::from(&heightmap);
        self.heightmap = Some(heightmap);
        result
    }

    fn current(&self) -> Result<&Heightmap, JsValue> {
        self.heightmap
            .as_ref()
            .ok_or_else(|| JsValue::from_str("No heightmap: call process first"))
    }
}

impl Default for LithophaneEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
pub struct WasmHeightmap {
    width: u32,
    height: u32,
    base64: String,
}

#[wasm_bindgen]
impl WasmHeightmap {
    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn get_base64(&self) -> String {
        self.base64.clone()
    }
}

impl From<&Heightmap> for WasmHeightmap {
    fn from(heightmap: &Heightmap) -> Self {
        Self {
            width: heightmap.width,
            height: heightmap.height,
            base64: heightmap.to_base64(),
        }
    }
}

#[wasm_bindgen]
pub struct WasmMesh {
    positions: Vec<f32>,
    indices: Vec<u32>,
    colors: Vec<f32>,
    width_mm: f32,
    height_mm: f32,
}

#[wasm_bindgen]
impl WasmMesh {
    pub fn get_positions(&self) -> Vec<f32> {
        self.positions.clone()
    }
    pub fn get_indices(&self) -> Vec<u32> {
        self.indices.clone()
    }
    pub fn get_colors(&self) -> Vec<f32> {
        self.colors.clone()
    }
    pub fn width_mm(&self) -> f32 {
        self.width_mm
    }
    pub fn height_mm(&self) -> f32 {
        self.height_mm
    }
}

impl From<MeshPreview> for WasmMesh {
    fn from(preview: MeshPreview) -> Self {
        Self {
            width_mm: preview.mesh.dimensions.width,
            height_mm: preview.mesh.dimensions.height,
            positions: preview.mesh.positions,
            indices: preview.mesh.indices,
            colors: preview.colors,
        }
    }
}
