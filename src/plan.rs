//! Filament swap plan.
//!
//! Turns allocated color stops into the print layers where the printer must
//! pause for a filament change, and exports the plan as text or JSON.

use crate::config::{GeometrySettings, PrintSettings};
use crate::error::PlanError;
use crate::stops::{sort_stops, ColorStop, Filament};
use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(feature = "native")]
use std::path::Path;

pub const PLAN_VERSION: &str = "1.0";
pub const GENERATOR: &str = "lithoforge";

// Absorbs float error so a threshold sitting on a layer boundary keeps its layer
const LAYER_EPSILON: f64 = 1e-9;

/// A filament change at the start of a layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwapEntry {
    pub layer: u32,
    pub z_mm: f64,
    pub filament_id: String,
}

/// Ordered filament swaps, one per distinct layer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapPlan {
    pub swaps: Vec<SwapEntry>,
}

/// Serialized plan document
#[derive(Debug, Serialize, Deserialize)]
pub struct PlanDocument {
    pub version: String,
    pub generator: String,
    pub print_settings: PrintSettings,
    pub geometry_settings: GeometrySettings,
    pub filaments: Vec<Filament>,
    pub color_stops: Vec<ColorStop>,
    pub swaps: Vec<SwapEntry>,
}

#[inline]
fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Compute swaps for `stops` at the given layer height.
///
/// Each stop lands on `floor(threshold / layer_height)`; a stop landing on a
/// layer already taken is dropped.
pub fn compute_swaps(stops: &[ColorStop], layer_height_mm: f64) -> Result<SwapPlan, PlanError> {
    if !(layer_height_mm.is_finite() && layer_height_mm > 0.0) {
        return Err(PlanError::InvalidLayerHeight(layer_height_mm));
    }

    let mut sorted = stops.to_vec();
    sort_stops(&mut sorted);

    let mut swaps: Vec<SwapEntry> = Vec::with_capacity(sorted.len());
    for stop in sorted {
        let t = stop.threshold_depth_mm;
        if !t.is_finite() {
            log::warn!("Skipping stop {} with non-finite threshold", stop.filament_id);
            continue;
        }
        let layer = (t.max(0.0) / layer_height_mm + LAYER_EPSILON).floor() as u32;
        if swaps.last().is_some_and(|s| layer <= s.layer) {
            log::debug!("Stop {} shares layer {}, dropped", stop.filament_id, layer);
            continue;
        }
        swaps.push(SwapEntry {
            layer,
            z_mm: round3(layer as f64 * layer_height_mm),
            filament_id: stop.filament_id,
        });
    }

    Ok(SwapPlan { swaps })
}

impl SwapPlan {
    pub fn is_empty(&self) -> bool {
        self.swaps.is_empty()
    }

    /// Filament loaded while printing `layer`
    pub fn filament_at_layer(&self, layer: u32) -> Option<&str> {
        let first = self.swaps.first()?;
        let active = self
            .swaps
            .iter()
            .take_while(|s| s.layer <= layer)
            .last()
            .unwrap_or(first);
        Some(active.filament_id.as_str())
    }

    /// Human-readable print plan
    pub fn to_text(&self, filaments: &[Filament], print: &PrintSettings, geometry: &GeometrySettings) -> String {
        PlanText {
            plan: self,
            filaments,
            print,
            geometry,
        }
        .to_string()
    }

    pub fn to_document(
        &self,
        filaments: &[Filament],
        stops: &[ColorStop],
        print: &PrintSettings,
        geometry: &GeometrySettings,
    ) -> PlanDocument {
        let mut color_stops = stops.to_vec();
        sort_stops(&mut color_stops);
        PlanDocument {
            version: PLAN_VERSION.to_string(),
            generator: GENERATOR.to_string(),
            print_settings: print.clone(),
            geometry_settings: geometry.clone(),
            filaments: filaments.to_vec(),
            color_stops,
            swaps: self.swaps.clone(),
        }
    }

    /// Pretty-printed JSON plan document
    pub fn to_json(
        &self,
        filaments: &[Filament],
        stops: &[ColorStop],
        print: &PrintSettings,
        geometry: &GeometrySettings,
    ) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(&self.to_document(filaments, stops, print, geometry))?)
    }
}

/// Text rendering of a swap plan with its print context
struct PlanText<'a> {
    plan: &'a SwapPlan,
    filaments: &'a [Filament],
    print: &'a PrintSettings,
    geometry: &'a GeometrySettings,
}

impl PlanText<'_> {
    fn name_of(&self, id: &str) -> String {
        self.filaments
            .iter()
            .find(|f| f.id == id)
            .map_or_else(|| id.to_string(), |f| f.display_name().to_string())
    }
}

impl fmt::Display for PlanText<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (print, geometry) = (self.print, self.geometry);
        let rule = "=".repeat(40);
        let sub = "-".repeat(20);

        writeln!(out, "{}\nLITHOFORGE PRINT PLAN\n{}\n", rule, rule)?;
        writeln!(out, "MODEL SETTINGS\n{}", sub)?;
        writeln!(out, "Dimensions: {} x {} mm", print.width_mm, print.height_mm)?;
        writeln!(out, "Min Depth: {} mm", geometry.min_depth_mm)?;
        writeln!(out, "Max Depth: {} mm", geometry.max_depth_mm)?;
        writeln!(out, "Layer Height: {} mm", print.layer_height_mm)?;
        writeln!(out, "Base Layer: {} mm", print.base_layer_mm)?;
        writeln!(out, "Nozzle: {} mm\n", print.nozzle_diameter)?;

        if print.has_border {
            writeln!(out, "BORDER\n{}", sub)?;
            writeln!(out, "Width: {} mm", print.border_width_mm)?;
            writeln!(out, "Depth: {} mm\n", print.border_depth_mm)?;
        }

        writeln!(out, "FILAMENTS\n{}", sub)?;
        for (i, f) in self.filaments.iter().enumerate() {
            writeln!(
                out,
                "{}. {} ({}, Td={:.3}, d95={:.2} mm)",
                i + 1,
                f.display_name(),
                f.hex_color,
                f.attenuation_coefficient,
                f.d95_mm()
            )?;
        }

        writeln!(out, "\nSWAP PLAN\n{}", sub)?;
        match self.plan.swaps.split_first() {
            Some((start, rest)) => {
                writeln!(out, "Start: {}\n", self.name_of(&start.filament_id))?;
                for swap in rest {
                    writeln!(
                        out,
                        "Layer {} ({} mm): Switch to {}",
                        swap.layer,
                        swap.z_mm,
                        self.name_of(&swap.filament_id)
                    )?;
                }
            }
            None => writeln!(out, "No swaps defined")?,
        }

        write!(out, "\n{}\nGenerated by {}\n{}", rule, GENERATOR, rule)
    }
}

/// Write a text or JSON plan, picked by the `.json` extension
#[cfg(feature = "native")]
pub fn export_plan<P: AsRef<Path>>(
    path: P,
    plan: &SwapPlan,
    filaments: &[Filament],
    stops: &[ColorStop],
    print: &PrintSettings,
    geometry: &GeometrySettings,
) -> Result<(), PlanError> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let contents = if is_json {
        plan.to_json(filaments, stops, print, geometry)?
    } else {
        plan.to_text(filaments, print, geometry)
    };
    std::fs::write(path, contents)?;
    log::info!("Wrote swap plan ({} swaps) to {}", plan.swaps.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    fn stops() -> Vec<ColorStop> {
        vec![
            ColorStop::new("black", 2.24),
            ColorStop::new("white", 1.52),
            ColorStop::new("red", 2.0),
        ]
    }

    fn filaments() -> Vec<Filament> {
        vec![
            Filament::from_d95("white", Rgb::WHITE, 2.0).with_name("White PLA"),
            Filament::from_d95("red", Rgb::new(200, 0, 0), 1.0).with_name("Red PLA"),
            Filament::from_d95("black", Rgb::new(0, 0, 0), 0.4),
        ]
    }

    #[test]
    fn test_compute_swaps_layers() {
        let plan = compute_swaps(&stops(), 0.08).unwrap();
        let layers: Vec<u32> = plan.swaps.iter().map(|s| s.layer).collect();
        assert_eq!(layers, vec![19, 25, 28]);
        assert_eq!(plan.swaps[0].filament_id, "white");
        assert_eq!(plan.swaps[0].z_mm, 1.52);
        assert_eq!(plan.swaps[2].z_mm, 2.24);
    }

    #[test]
    fn test_same_layer_stops_dropped() {
        let stops = vec![ColorStop::new("a", 1.0), ColorStop::new("b", 1.02), ColorStop::new("c", 1.2)];
        let plan = compute_swaps(&stops, 0.08).unwrap();
        let ids: Vec<&str> = plan.swaps.iter().map(|s| s.filament_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_invalid_layer_height() {
        assert!(matches!(compute_swaps(&stops(), 0.0), Err(PlanError::InvalidLayerHeight(_))));
        assert!(matches!(compute_swaps(&stops(), f64::NAN), Err(PlanError::InvalidLayerHeight(_))));
    }

    #[test]
    fn test_filament_at_layer() {
        let plan = compute_swaps(&stops(), 0.08).unwrap();
        assert_eq!(plan.filament_at_layer(0), Some("white"));
        assert_eq!(plan.filament_at_layer(24), Some("white"));
        assert_eq!(plan.filament_at_layer(25), Some("red"));
        assert_eq!(plan.filament_at_layer(500), Some("black"));
        assert_eq!(SwapPlan::default().filament_at_layer(3), None);
    }

    #[test]
    fn test_text_export() {
        let plan = compute_swaps(&stops(), 0.08).unwrap();
        let text = plan.to_text(&filaments(), &PrintSettings::default(), &GeometrySettings::default());
        assert!(text.contains("Start: White PLA"));
        assert!(text.contains("Layer 25 (2 mm): Switch to Red PLA"));
        assert!(text.contains("Layer 28 (2.24 mm): Switch to black"));
        assert!(!text.contains("BORDER"));

        let empty = SwapPlan::default().to_text(&[], &PrintSettings::default(), &GeometrySettings::default());
        assert!(empty.contains("No swaps defined"));
    }

    #[test]
    #[cfg(feature = "native")]
    fn test_export_files() {
        let dir = tempfile::tempdir().unwrap();
        let plan = compute_swaps(&stops(), 0.08).unwrap();
        let print = PrintSettings::default();
        let geometry = GeometrySettings::default();

        let json_path = dir.path().join("plan.json");
        export_plan(&json_path, &plan, &filaments(), &stops(), &print, &geometry).unwrap();
        let doc: PlanDocument = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(doc.version, PLAN_VERSION);
        assert_eq!(doc.swaps, plan.swaps);
        assert_eq!(doc.color_stops[0].filament_id, "white");

        let txt_path = dir.path().join("plan.txt");
        export_plan(&txt_path, &plan, &filaments(), &stops(), &print, &geometry).unwrap();
        assert!(std::fs::read_to_string(&txt_path).unwrap().starts_with("===="));
    }
}
