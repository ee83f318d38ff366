//! Command-line interface for lithoforge
//!
//! Usage: lithoforge <COMMAND> [OPTIONS]

use clap::{Args, Parser, Subcommand};
use lithoforge::depth::HeightmapPayload;
use lithoforge::plan::{compute_swaps, export_plan};
use lithoforge::prelude::*;
use lithoforge::mesh::{build_relief_mesh, MeshParams};
use lithoforge::stl::{export_stl_as, write_stl_file, StlFormat};
use lithoforge::{HeightmapStats, LuminanceMethod, SpikeRemoval, ToneMapping};
use std::path::{Path, PathBuf};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-color lithophane generator")]
struct Cli {
    /// Settings JSON with `geometry` and `print` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a heightmap and write it as base64 JSON
    Heightmap {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        geometry: GeometryArgs,
    },
    /// Build the relief and write a binary STL
    Stl {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        geometry: GeometryArgs,
        #[command(flatten)]
        print: PrintArgs,
        /// Write ASCII STL instead of binary
        #[arg(long)]
        ascii: bool,
    },
    /// Render a backlit color preview PNG
    Preview {
        input: PathBuf,
        output: PathBuf,
        /// JSON array of filaments, most transparent first
        #[arg(short, long)]
        filaments: PathBuf,
        /// weighted or linear
        #[arg(long, default_value = "weighted")]
        strategy: String,
        #[command(flatten)]
        geometry: GeometryArgs,
    },
    /// Allocate color stops and print the filament swap plan
    Stops {
        #[arg(short, long)]
        filaments: PathBuf,
        #[arg(long, default_value = "weighted")]
        strategy: String,
        /// Write the plan to a file (.json for JSON, anything else for text)
        #[arg(long)]
        plan: Option<PathBuf>,
        #[command(flatten)]
        geometry: GeometryArgs,
        #[command(flatten)]
        print: PrintArgs,
    },
}

#[derive(Args, Debug)]
struct GeometryArgs {
    #[arg(long)]
    min_depth: Option<f64>,
    #[arg(long)]
    max_depth: Option<f64>,
    #[arg(long)]
    gamma: Option<f32>,
    #[arg(long)]
    contrast: Option<f32>,
    #[arg(long)]
    offset: Option<f32>,
    /// Gaussian smoothing sigma in pixels
    #[arg(long)]
    sigma: Option<f32>,
    /// none, light, medium, strong
    #[arg(long)]
    spike_removal: Option<String>,
    /// rec601, rec709, max_channel, scaled_max_channel, combo, color_aware, color_pop
    #[arg(long)]
    luminance: Option<String>,
    #[arg(long)]
    dynamic_depth: bool,
    #[arg(long)]
    invert: bool,
    /// Cap on the larger image side after decoding
    #[arg(long, default_value_t = lithoforge::decode::DEFAULT_MAX_DIM)]
    max_dim: u32,
}

#[derive(Args, Debug)]
struct PrintArgs {
    #[arg(long)]
    width_mm: Option<f64>,
    #[arg(long)]
    height_mm: Option<f64>,
    #[arg(long)]
    layer_height: Option<f64>,
    #[arg(long)]
    base_layer: Option<f64>,
    #[arg(long)]
    resolution: Option<u32>,
    #[arg(long)]
    border: bool,
    #[arg(long)]
    mirror_x: bool,
}

impl GeometryArgs {
    fn apply(&self, geometry: &mut GeometrySettings) -> CliResult<()> {
        if let Some(v) = self.min_depth {
            geometry.min_depth_mm = v;
        }
        if let Some(v) = self.max_depth {
            geometry.max_depth_mm = v;
        }
        if self.gamma.is_some() || self.contrast.is_some() || self.offset.is_some() {
            let (g, c, o) = match geometry.tone_mapping {
                ToneMapping::Gamma { gamma, contrast, offset } => (gamma, contrast, offset),
                ToneMapping::Curve { .. } => (1.0, 1.0, 0.0),
            };
            geometry.tone_mapping = ToneMapping::Gamma {
                gamma: self.gamma.unwrap_or(g),
                contrast: self.contrast.unwrap_or(c),
                offset: self.offset.unwrap_or(o),
            };
        }
        if let Some(v) = self.sigma {
            geometry.smoothing_sigma = v;
        }
        if let Some(name) = &self.spike_removal {
            geometry.spike_removal =
                SpikeRemoval::from_name(name).ok_or_else(|| format!("Unknown spike removal level: {}", name))?;
        }
        if let Some(name) = &self.luminance {
            geometry.luminance_method =
                LuminanceMethod::from_name(name).ok_or_else(|| format!("Unknown luminance method: {}", name))?;
        }
        geometry.dynamic_depth |= self.dynamic_depth;
        geometry.invert |= self.invert;
        Ok(())
    }
}

impl PrintArgs {
    fn apply(&self, print: &mut PrintSettings) {
        if let Some(v) = self.width_mm {
            print.width_mm = v;
        }
        if let Some(v) = self.height_mm {
            print.height_mm = v;
        }
        if let Some(v) = self.layer_height {
            print.layer_height_mm = v;
        }
        if let Some(v) = self.base_layer {
            print.base_layer_mm = v;
        }
        if let Some(v) = self.resolution {
            print.mesh_resolution = v;
        }
        print.has_border |= self.border;
        print.mirror_x |= self.mirror_x;
    }
}

fn parse_strategy(name: &str) -> CliResult<StopStrategy> {
    match name {
        "weighted" => Ok(StopStrategy::Weighted),
        "linear" => Ok(StopStrategy::Linear),
        _ => Err(format!("Unknown stop strategy: {}", name).into()),
    }
}

fn load_filaments(path: &Path) -> CliResult<Vec<Filament>> {
    let filaments: Vec<Filament> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    if filaments.is_empty() {
        return Err(format!("{} lists no filaments", path.display()).into());
    }
    Ok(filaments)
}

fn load_heightmap(input: &Path, geometry: &GeometrySettings, max_dim: u32) -> CliResult<Heightmap> {
    println!("Loading {}...", input.display());
    let bytes = std::fs::read(input)?;
    let start = std::time::Instant::now();
    let heightmap = process_image_bytes(&ImageCodec::with_max_dim(max_dim), &bytes, geometry)?;
    println!(
        "Heightmap {}x{} built in {:?}",
        heightmap.width,
        heightmap.height,
        start.elapsed()
    );
    if let Some(stats) = heightmap.stats() {
        print_stats(&stats);
    }
    Ok(heightmap)
}

fn print_stats(stats: &HeightmapStats) {
    println!(
        "Depth: min {:.3} mm, max {:.3} mm, mean {:.3} mm, std {:.3} mm",
        stats.min_mm, stats.max_mm, stats.mean_mm, stats.std_mm
    );
}

fn print_stops(allocation: &lithoforge::StopAllocation, filaments: &[Filament]) {
    println!("Color stops:");
    for stop in &allocation.stops {
        let name = filaments
            .iter()
            .find(|f| f.id == stop.filament_id)
            .map_or(stop.filament_id.as_str(), |f| f.display_name());
        println!("  {:>7.3} mm  {}", stop.threshold_depth_mm, name);
    }
    if allocation.had_collisions {
        println!("  (thresholds were clamped to fit the depth range)");
    }
}

fn main() -> CliResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match cli.command {
        Command::Heightmap { input, output, geometry } => {
            geometry.apply(&mut settings.geometry)?;
            let heightmap = load_heightmap(&input, &settings.geometry, geometry.max_dim)?;
            let payload: HeightmapPayload = heightmap.to_payload();
            std::fs::write(&output, serde_json::to_string(&payload)?)?;
            println!("Saved to {}", output.display());
        }
        Command::Stl { input, output, geometry, print, ascii } => {
            geometry.apply(&mut settings.geometry)?;
            print.apply(&mut settings.print);
            let heightmap = load_heightmap(&input, &settings.geometry, geometry.max_dim)?;
            let stats = build_relief_mesh(&heightmap, &MeshParams::from_print(&settings.print)).stats();
            println!(
                "Mesh: {} faces, {} vertices, bounds x {:.2}..{:.2}, y {:.2}..{:.2}, z {:.2}..{:.2} mm",
                stats.face_count,
                stats.vertex_count,
                stats.min[0],
                stats.max[0],
                stats.min[1],
                stats.max[1],
                stats.min[2],
                stats.max[2]
            );
            let format = if ascii { StlFormat::Ascii } else { StlFormat::Binary };
            let bytes = export_stl_as(&heightmap, &settings.print, format)?;
            write_stl_file(&output, &bytes)?;
            println!("Saved {} bytes to {}", bytes.len(), output.display());
        }
        Command::Preview { input, output, filaments, strategy, geometry } => {
            geometry.apply(&mut settings.geometry)?;
            let filaments = load_filaments(&filaments)?;
            let heightmap = load_heightmap(&input, &settings.geometry, geometry.max_dim)?;
            let allocation = allocate_stops(
                &filaments,
                settings.geometry.min_depth_mm,
                settings.geometry.max_depth_mm,
                settings.print.layer_height_mm,
                parse_strategy(&strategy)?,
            );
            print_stops(&allocation, &filaments);

            let img = lithoforge::preview_image(&heightmap, &allocation.stops, &filaments)
                .ok_or("Preview buffer does not match heightmap size")?;
            img.save(&output)?;
            println!("Saved to {}", output.display());
        }
        Command::Stops { filaments, strategy, plan, geometry, print } => {
            geometry.apply(&mut settings.geometry)?;
            print.apply(&mut settings.print);
            let filaments = load_filaments(&filaments)?;
            let allocation = allocate_stops(
                &filaments,
                settings.geometry.min_depth_mm,
                settings.geometry.max_depth_mm,
                settings.print.layer_height_mm,
                parse_strategy(&strategy)?,
            );
            print_stops(&allocation, &filaments);

            let swaps = compute_swaps(&allocation.stops, settings.print.layer_height_mm)?;
            println!();
            println!("{}", swaps.to_text(&filaments, &settings.print, &settings.geometry));
            if let Some(path) = plan {
                export_plan(&path, &swaps, &filaments, &allocation.stops, &settings.print, &settings.geometry)?;
                println!("Saved plan to {}", path.display());
            }
        }
    }

    Ok(())
}
