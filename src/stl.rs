//! STL serialization.
//!
//! Binary layout: 80-byte header, u32 triangle count, then 50 bytes per
//! triangle (normal, three vertices, u16 attribute), all little-endian. The
//! ASCII form writes the same facets as `solid`/`facet`/`endsolid` text.
//! Mesh space is Y-up; STL output is Z-up via `(x, y, z) -> (x, -z, y)`, a
//! proper rotation that keeps the winding outward.

use crate::config::PrintSettings;
use crate::depth::Heightmap;
use crate::error::ExportError;
use crate::mesh::{build_relief_mesh, expected_triangle_count, MeshParams, ReliefMesh};
use std::io::Write;
#[cfg(feature = "native")]
use std::path::Path;

pub const HEADER_LEN: usize = 80;
pub const TRIANGLE_RECORD_LEN: usize = 50;
pub const BORDER_BOX_COUNT: usize = 4;
pub const BOX_TRIANGLES: usize = 12;

const HEADER_TEXT: &[u8] = b"lithoforge binary STL";
const SOLID_NAME: &str = "lithoforge";
const DEGENERATE_NORMAL_EPSILON: f32 = 1e-12;

/// Frame around the relief, in mm
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BorderFrame {
    pub width_mm: f32,
    /// Height above the base layer
    pub depth_mm: f32,
    pub base_layer_mm: f32,
}

impl BorderFrame {
    pub fn from_print(print: &PrintSettings) -> Option<Self> {
        print.has_border.then(|| Self {
            width_mm: print.border_width_mm as f32,
            depth_mm: print.border_depth_mm as f32,
            base_layer_mm: print.base_layer_mm as f32,
        })
    }
}

/// Axis-aligned box in mesh space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BorderBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// STL encoding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StlFormat {
    #[default]
    Binary,
    Ascii,
}

// Corner index bits: 1 = x max, 2 = y max, 4 = z max
const BOX_FACES: [[usize; 3]; BOX_TRIANGLES] = [
    [0, 1, 4], [1, 5, 4], // -Y
    [2, 6, 3], [3, 6, 7], // +Y
    [0, 2, 1], [1, 2, 3], // -Z
    [4, 5, 6], [5, 7, 6], // +Z
    [0, 4, 2], [4, 6, 2], // -X
    [1, 3, 5], [5, 3, 7], // +X
];

impl BorderBox {
    fn corner(&self, i: usize) -> [f32; 3] {
        let pick = |bit: usize, axis: usize| if i & bit != 0 { self.max[axis] } else { self.min[axis] };
        [pick(1, 0), pick(2, 1), pick(4, 2)]
    }

    /// Twelve outward-wound triangles in mesh space
    pub fn triangles(&self) -> impl Iterator<Item = [[f32; 3]; 3]> + '_ {
        BOX_FACES
            .iter()
            .map(move |f| [self.corner(f[0]), self.corner(f[1]), self.corner(f[2])])
    }
}

/// Four boxes framing a `width × height` relief centered on the origin.
///
/// Front and back strips span the full outer width; the side strips fill the
/// gap between them.
pub fn border_boxes(width: f32, height: f32, border: &BorderFrame) -> [BorderBox; BORDER_BOX_COUNT] {
    let (hw, hh, bw) = (width / 2.0, height / 2.0, border.width_mm.max(0.0));
    let top = border.base_layer_mm + border.depth_mm;
    [
        BorderBox { min: [-hw - bw, 0.0, -hh - bw], max: [hw + bw, top, -hh] },
        BorderBox { min: [-hw - bw, 0.0, hh], max: [hw + bw, top, hh + bw] },
        BorderBox { min: [-hw - bw, 0.0, -hh], max: [-hw, top, hh] },
        BorderBox { min: [hw, 0.0, -hh], max: [hw + bw, top, hh] },
    ]
}

#[inline(always)]
fn to_stl_space(v: [f32; 3]) -> [f32; 3] {
    [v[0], -v[2], v[1]]
}

/// Unit facet normal, or zero for degenerate triangles
pub fn facet_normal(v: &[[f32; 3]; 3]) -> [f32; 3] {
    let u = [v[1][0] - v[0][0], v[1][1] - v[0][1], v[1][2] - v[0][2]];
    let w = [v[2][0] - v[0][0], v[2][1] - v[0][1], v[2][2] - v[0][2]];
    let n = [
        u[1] * w[2] - u[2] * w[1],
        u[2] * w[0] - u[0] * w[2],
        u[0] * w[1] - u[1] * w[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len < DEGENERATE_NORMAL_EPSILON || !len.is_finite() {
        [0.0; 3]
    } else {
        [n[0] / len, n[1] / len, n[2] / len]
    }
}

/// Append one 50-byte record for a mesh-space triangle
pub fn write_triangle(buf: &mut Vec<u8>, triangle: [[f32; 3]; 3]) {
    let v = triangle.map(to_stl_space);
    let normal = facet_normal(&v);
    for c in normal.iter().chain(v.iter().flatten()) {
        buf.extend_from_slice(&c.to_le_bytes());
    }
    buf.extend_from_slice(&0u16.to_le_bytes());
}

fn write_header(buf: &mut Vec<u8>, triangle_count: u32) {
    let mut header = [0u8; HEADER_LEN];
    header[..HEADER_TEXT.len()].copy_from_slice(HEADER_TEXT);
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&triangle_count.to_le_bytes());
}

/// Expected file size for a triangle count
pub fn stl_len(triangle_count: usize) -> usize {
    HEADER_LEN + 4 + TRIANGLE_RECORD_LEN * triangle_count
}

/// Relief triangles followed by the border boxes, in mesh space
fn facets<'a>(mesh: &'a ReliefMesh, border: Option<&BorderFrame>) -> impl Iterator<Item = [[f32; 3]; 3]> + 'a {
    let boxes = border.map(|b| border_boxes(mesh.dimensions.width, mesh.dimensions.height, b));
    let relief = mesh
        .indices
        .chunks_exact(3)
        .map(move |t| [mesh.position(t[0]), mesh.position(t[1]), mesh.position(t[2])]);
    let frame = boxes.into_iter().flatten().flat_map(|b| {
        BOX_FACES
            .iter()
            .map(move |f| [b.corner(f[0]), b.corner(f[1]), b.corner(f[2])])
    });
    relief.chain(frame)
}

fn facet_count(mesh: &ReliefMesh, border: Option<&BorderFrame>) -> usize {
    mesh.triangle_count() + border.map_or(0, |_| BORDER_BOX_COUNT * BOX_TRIANGLES)
}

/// Serialize a relief mesh, optionally framed by a border
pub fn mesh_to_stl(mesh: &ReliefMesh, border: Option<&BorderFrame>) -> Vec<u8> {
    let count = facet_count(mesh, border);
    let mut buf = Vec::with_capacity(stl_len(count));
    write_header(&mut buf, count as u32);
    for tri in facets(mesh, border) {
        write_triangle(&mut buf, tri);
    }
    buf
}

/// Stream a relief mesh as ASCII STL
pub fn write_ascii_stl<W: Write>(
    writer: &mut W,
    mesh: &ReliefMesh,
    border: Option<&BorderFrame>,
) -> std::io::Result<()> {
    writeln!(writer, "solid {}", SOLID_NAME)?;
    for tri in facets(mesh, border) {
        let v = tri.map(to_stl_space);
        let n = facet_normal(&v);
        writeln!(writer, "  facet normal {:e} {:e} {:e}", n[0], n[1], n[2])?;
        writeln!(writer, "    outer loop")?;
        for p in &v {
            writeln!(writer, "      vertex {:e} {:e} {:e}", p[0], p[1], p[2])?;
        }
        writeln!(writer, "    endloop")?;
        writeln!(writer, "  endfacet")?;
    }
    writeln!(writer, "endsolid {}", SOLID_NAME)
}

/// Serialize a caller-supplied mesh after checking its buffers agree with
/// its grid.
pub fn export_mesh_stl(
    mesh: &ReliefMesh,
    border: Option<&BorderFrame>,
    format: StlFormat,
) -> Result<Vec<u8>, ExportError> {
    if !mesh.is_consistent() {
        return Err(ExportError::SizeMismatch(format!(
            "mesh grid {}x{} does not match {} vertices / {} triangles (expected {})",
            mesh.segments_x,
            mesh.segments_y,
            mesh.vertex_count(),
            mesh.triangle_count(),
            expected_triangle_count(mesh.segments_x, mesh.segments_y)
        )));
    }
    encode(mesh, border, format)
}

fn encode(mesh: &ReliefMesh, border: Option<&BorderFrame>, format: StlFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        StlFormat::Binary => Ok(mesh_to_stl(mesh, border)),
        StlFormat::Ascii => {
            let mut buf = Vec::new();
            write_ascii_stl(&mut buf, mesh, border)?;
            Ok(buf)
        }
    }
}

/// Build the relief for `heightmap` and serialize it as binary STL.
///
/// Inconsistent inputs abort before any bytes are produced.
pub fn export_stl(heightmap: &Heightmap, print: &PrintSettings) -> Result<Vec<u8>, ExportError> {
    export_stl_as(heightmap, print, StlFormat::Binary)
}

/// [`export_stl`] with a choice of encoding
pub fn export_stl_as(heightmap: &Heightmap, print: &PrintSettings, format: StlFormat) -> Result<Vec<u8>, ExportError> {
    if heightmap.is_empty() {
        return Err(ExportError::EmptyHeightmap);
    }
    let expected = heightmap.width as usize * heightmap.height as usize;
    if heightmap.depths.len() != expected {
        return Err(ExportError::SizeMismatch(format!(
            "heightmap holds {} samples, expected {} for {}x{}",
            heightmap.depths.len(),
            expected,
            heightmap.width,
            heightmap.height
        )));
    }
    for (name, value) in [("width", print.width_mm), ("height", print.height_mm)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(ExportError::SizeMismatch(format!("print {} must be positive, got {}", name, value)));
        }
    }

    let mesh = build_relief_mesh(heightmap, &MeshParams::from_print(print));
    let border = BorderFrame::from_print(print);
    let bytes = encode(&mesh, border.as_ref(), format)?;
    log::info!(
        "STL export ({:?}): {} triangles, {} bytes{}",
        format,
        facet_count(&mesh, border.as_ref()),
        bytes.len(),
        if border.is_some() { " (with border)" } else { "" }
    );
    Ok(bytes)
}

/// Write STL bytes to disk (requires 'native' feature)
#[cfg(feature = "native")]
pub fn write_stl_file<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<(), ExportError> {
    std::fs::write(path.as_ref(), bytes)?;
    log::debug!("Wrote {} bytes to {}", bytes.len(), path.as_ref().display());
    Ok(())
}
