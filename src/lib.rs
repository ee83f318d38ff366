//! Lithoforge Library
//!
//! Turns a raster image into a multi-color lithophane: a depth field in
//! millimeters, a watertight relief mesh with backlit preview colors, and a
//! binary STL ready for slicing.
//!
//! ```no_run
//! use lithoforge::prelude::*;
//!
//! # fn main() -> lithoforge::Result<()> {
//! let settings = Settings::default();
//! let bytes = std::fs::read("portrait.png")?;
//! let heightmap = process_image_bytes(&ImageCodec::default(), &bytes, &settings.geometry)?;
//! let stl = export_stl(&heightmap, &settings.print)?;
//! std::fs::write("portrait.stl", stl)?;
//! # Ok(())
//! # }
//! ```

pub mod color;
pub mod colorize;
pub mod config;
pub mod decode;
pub mod depth;
pub mod error;
pub mod filter;
pub mod luminance;
pub mod mesh;
pub mod pipeline;
pub mod plan;
pub mod stl;
pub mod stops;

#[cfg(not(target_arch = "wasm32"))]
pub mod worker;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use error::{DecodeError, Error, ExportError, PlanError, Result, TransportError};

// Re-export key types for easy usage
pub use color::{LinearRgb, Rgb, Rgbf};
pub use colorize::{attenuation, preview_rgba, transmission_color, vertex_colors, ColorSpace};
#[cfg(feature = "native")]
pub use colorize::preview_image;
pub use config::{
    CurvePoint, GeometrySettings, LuminanceMethod, PrintSettings, Settings, SpikeRemoval, ToneMapping,
};
pub use decode::{Codec, ImageCodec, RasterImage};
pub use depth::{map_to_depth_mm, Heightmap, HeightmapPayload, HeightmapStats};
pub use mesh::{build_relief_mesh, MeshParams, MeshStats, ReliefMesh};
pub use pipeline::{build_preview, process_image_bytes, process_raster, MeshPreview, Recipe, Thumbnail};
pub use plan::{compute_swaps, SwapEntry, SwapPlan};
pub use stl::{export_mesh_stl, export_stl, export_stl_as, mesh_to_stl, write_ascii_stl, BorderFrame, StlFormat};
#[cfg(feature = "native")]
pub use stl::write_stl_file;
pub use stops::{active_stop, allocate_stops, ColorStop, Filament, StopAllocation, StopStrategy};

#[cfg(not(target_arch = "wasm32"))]
pub use worker::{Job, PipelineWorker, WorkerConfig, WorkerEvent};

pub mod prelude {
    pub use crate::colorize::ColorSpace;
    pub use crate::config::{GeometrySettings, PrintSettings, Settings};
    pub use crate::decode::{Codec, ImageCodec};
    pub use crate::depth::Heightmap;
    pub use crate::pipeline::{build_preview, process_image_bytes, process_raster};
    pub use crate::stl::export_stl;
    pub use crate::stops::{allocate_stops, ColorStop, Filament, StopStrategy};
}
