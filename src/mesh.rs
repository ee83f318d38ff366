//! Relief mesh construction.
//!
//! The heightmap is sampled on a regular `(segments_x + 1) × (segments_y + 1)`
//! grid and turned into a closed solid: relief surface on top, flat bottom at
//! y = 0 and four side walls. Mesh space is Y-up, centered on the origin in
//! X/Z, in millimeters.
//!
//! Vertex layout: top vertices first in row-major grid order, then the bottom
//! vertices in the same order, so bottom vertex `i` sits under top vertex `i`.

use crate::config::PrintSettings;
use crate::depth::Heightmap;
use serde::Serialize;

/// Physical footprint of the relief in mm
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshDimensions {
    pub width: f32,
    pub height: f32,
}

/// Triangulated relief solid
#[derive(Clone, Debug, PartialEq)]
pub struct ReliefMesh {
    /// xyz triples, top vertices then bottom vertices
    pub positions: Vec<f32>,
    /// Triangle vertex indices, counter-clockwise seen from outside
    pub indices: Vec<u32>,
    pub top_vertex_count: u32,
    pub segments_x: u32,
    pub segments_y: u32,
    /// Sampled depth per top vertex, excluding the base layer
    pub heights_mm: Vec<f32>,
    pub dimensions: MeshDimensions,
}

/// Face/vertex counts and the axis-aligned bounds of a mesh, in mesh space
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MeshStats {
    pub face_count: usize,
    pub vertex_count: usize,
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Mesh builder parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshParams {
    pub width_mm: f64,
    pub height_mm: f64,
    pub resolution: u32,
    pub base_layer_mm: f64,
    pub mirror_x: bool,
}

impl MeshParams {
    pub fn from_print(print: &PrintSettings) -> Self {
        Self {
            width_mm: print.width_mm,
            height_mm: print.height_mm,
            resolution: print.mesh_resolution,
            base_layer_mm: print.base_layer_mm,
            mirror_x: print.mirror_x,
        }
    }
}

impl ReliefMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn position(&self, index: u32) -> [f32; 3] {
        let i = index as usize * 3;
        [self.positions[i], self.positions[i + 1], self.positions[i + 2]]
    }

    /// Axis-aligned bounds of all vertices, `None` for an empty mesh
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let mut points = self.positions.chunks_exact(3);
        let first = points.next()?;
        let init = ([first[0], first[1], first[2]], [first[0], first[1], first[2]]);
        Some(points.fold(init, |(mut lo, mut hi), p| {
            for k in 0..3 {
                lo[k] = lo[k].min(p[k]);
                hi[k] = hi[k].max(p[k]);
            }
            (lo, hi)
        }))
    }

    pub fn stats(&self) -> MeshStats {
        let (min, max) = self.bounds().unwrap_or(([0.0; 3], [0.0; 3]));
        MeshStats {
            face_count: self.triangle_count(),
            vertex_count: self.vertex_count(),
            min,
            max,
        }
    }

    /// Check the buffers agree with the grid size
    pub fn is_consistent(&self) -> bool {
        let grid = (self.segments_x as usize + 1) * (self.segments_y as usize + 1);
        self.top_vertex_count as usize == grid
            && self.heights_mm.len() == grid
            && self.positions.len() == grid * 2 * 3
            && self.indices.len() == expected_triangle_count(self.segments_x, self.segments_y) * 3
            && self.indices.iter().all(|&i| (i as usize) < grid * 2)
    }
}

/// Vertex count for a grid: top and bottom copies of every grid point
pub fn expected_vertex_count(segments_x: u32, segments_y: u32) -> usize {
    2 * (segments_x as usize + 1) * (segments_y as usize + 1)
}

/// Triangle count: top and bottom surfaces plus the perimeter walls
pub fn expected_triangle_count(segments_x: u32, segments_y: u32) -> usize {
    let (sx, sy) = (segments_x as usize, segments_y as usize);
    4 * sx * sy + 4 * sx + 4 * sy
}

/// Fit the heightmap aspect ratio inside the requested footprint
pub fn fit_dimensions(hm_width: u32, hm_height: u32, width_mm: f64, height_mm: f64) -> MeshDimensions {
    if hm_width == 0 || hm_height == 0 || width_mm <= 0.0 || height_mm <= 0.0 {
        return MeshDimensions {
            width: width_mm.max(0.0) as f32,
            height: height_mm.max(0.0) as f32,
        };
    }
    let image_aspect = hm_width as f64 / hm_height as f64;
    let target_aspect = width_mm / height_mm;
    let (w, h) = if image_aspect >= target_aspect {
        (width_mm, width_mm / image_aspect)
    } else {
        (height_mm * image_aspect, height_mm)
    };
    MeshDimensions {
        width: w as f32,
        height: h as f32,
    }
}

/// Grid segments along an axis: the requested resolution, capped by the heightmap size
pub fn segments_for(resolution: u32, heightmap_dim: u32) -> u32 {
    resolution.min(heightmap_dim).max(1)
}

/// Build the closed relief solid for a heightmap
pub fn build_relief_mesh(heightmap: &Heightmap, params: &MeshParams) -> ReliefMesh {
    let segments_x = segments_for(params.resolution, heightmap.width);
    let segments_y = segments_for(params.resolution, heightmap.height);
    let cols = segments_x as usize + 1;
    let rows = segments_y as usize + 1;
    let top_count = cols * rows;
    let dimensions = fit_dimensions(heightmap.width, heightmap.height, params.width_mm, params.height_mm);
    let base = params.base_layer_mm as f32;

    let mut positions = vec![0.0f32; top_count * 2 * 3];
    let mut heights_mm = Vec::with_capacity(top_count);

    let max_col = heightmap.width.saturating_sub(1);
    let max_row = heightmap.height.saturating_sub(1);

    for gy in 0..rows {
        let v = gy as f32 / segments_y as f32;
        let z = -dimensions.height / 2.0 + v * dimensions.height;
        let row = ((v * max_row as f32).round() as u32).min(max_row);

        for gx in 0..cols {
            let u = gx as f32 / segments_x as f32;
            let x = -dimensions.width / 2.0 + u * dimensions.width;
            let mut col = ((u * max_col as f32).round() as u32).min(max_col);
            if params.mirror_x {
                col = max_col - col;
            }

            let depth = heightmap
                .depths
                .get(row as usize * heightmap.width as usize + col as usize)
                .copied()
                .filter(|d| d.is_finite())
                .unwrap_or(0.0);
            heights_mm.push(depth);

            let top = (gy * cols + gx) * 3;
            positions[top] = x;
            positions[top + 1] = depth + base;
            positions[top + 2] = z;

            let bottom = (top_count + gy * cols + gx) * 3;
            positions[bottom] = x;
            positions[bottom + 1] = 0.0;
            positions[bottom + 2] = z;
        }
    }

    let indices = build_indices(segments_x, segments_y);

    log::debug!(
        "Relief mesh {}x{} segments, {} vertices, {} triangles, {:.1}x{:.1} mm",
        segments_x,
        segments_y,
        top_count * 2,
        indices.len() / 3,
        dimensions.width,
        dimensions.height
    );

    ReliefMesh {
        positions,
        indices,
        top_vertex_count: top_count as u32,
        segments_x,
        segments_y,
        heights_mm,
        dimensions,
    }
}

/// Triangle indices for a closed grid solid
fn build_indices(segments_x: u32, segments_y: u32) -> Vec<u32> {
    let cols = segments_x + 1;
    let rows = segments_y + 1;
    let bottom_offset = cols * rows;
    let top = |gx: u32, gy: u32| gy * cols + gx;
    let bottom = |gx: u32, gy: u32| bottom_offset + gy * cols + gx;

    let mut indices = Vec::with_capacity(expected_triangle_count(segments_x, segments_y) * 3);

    // Top surface, normals +Y
    for gy in 0..segments_y {
        for gx in 0..segments_x {
            let (a, b, c, d) = (top(gx, gy), top(gx + 1, gy), top(gx, gy + 1), top(gx + 1, gy + 1));
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    // Bottom surface, normals -Y
    for gy in 0..segments_y {
        for gx in 0..segments_x {
            let (a, b, c, d) = (
                bottom(gx, gy),
                bottom(gx + 1, gy),
                bottom(gx, gy + 1),
                bottom(gx + 1, gy + 1),
            );
            indices.extend_from_slice(&[a, b, c, b, d, c]);
        }
    }

    // Front wall (z min), normals -Z
    for gx in 0..segments_x {
        let (t0, t1, b0, b1) = (top(gx, 0), top(gx + 1, 0), bottom(gx, 0), bottom(gx + 1, 0));
        indices.extend_from_slice(&[b0, t0, b1, b1, t0, t1]);
    }

    // Back wall (z max), normals +Z
    for gx in 0..segments_x {
        let gy = segments_y;
        let (t0, t1, b0, b1) = (top(gx, gy), top(gx + 1, gy), bottom(gx, gy), bottom(gx + 1, gy));
        indices.extend_from_slice(&[b0, b1, t0, b1, t1, t0]);
    }

    // Left wall (x min), normals -X
    for gy in 0..segments_y {
        let (t0, t1, b0, b1) = (top(0, gy), top(0, gy + 1), bottom(0, gy), bottom(0, gy + 1));
        indices.extend_from_slice(&[b0, b1, t0, b1, t1, t0]);
    }

    // Right wall (x max), normals +X
    for gy in 0..segments_y {
        let gx = segments_x;
        let (t0, t1, b0, b1) = (top(gx, gy), top(gx, gy + 1), bottom(gx, gy), bottom(gx, gy + 1));
        indices.extend_from_slice(&[b0, t0, b1, b1, t0, t1]);
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn params(resolution: u32, mirror_x: bool) -> MeshParams {
        MeshParams {
            width_mm: 100.0,
            height_mm: 100.0,
            resolution,
            base_layer_mm: 0.16,
            mirror_x,
        }
    }

    fn column_heightmap() -> Heightmap {
        let row = [1.0f32, 2.0, 3.0, 9.0];
        let depths = row.iter().cycle().take(16).copied().collect();
        Heightmap::new(4, 4, depths).unwrap()
    }

    fn cross(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> [f32; 3] {
        let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
        [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ]
    }

    #[test]
    fn test_constant_heightmap_counts() {
        let hm = Heightmap::new(4, 4, vec![1.0; 16]).unwrap();
        let mesh = build_relief_mesh(&hm, &params(3, false));
        assert_eq!(mesh.top_vertex_count, 16);
        assert_eq!(mesh.positions.len(), 32 * 3);
        assert_eq!(mesh.indices.len(), 180);
        assert_eq!(mesh.indices.len() % 3, 0);
        assert_eq!(mesh.heights_mm.len(), 16);
        assert!(mesh.is_consistent());
    }

    #[test]
    fn test_counts_follow_segments() {
        let hm = Heightmap::new(10, 6, vec![0.5; 60]).unwrap();
        let mesh = build_relief_mesh(&hm, &params(8, false));
        assert_eq!((mesh.segments_x, mesh.segments_y), (8, 6));
        assert_eq!(mesh.vertex_count(), expected_vertex_count(8, 6));
        assert_eq!(mesh.triangle_count(), expected_triangle_count(8, 6));
        assert_eq!(mesh.triangle_count(), 4 * 48 + 32 + 24);
    }

    #[test]
    fn test_mirror_x_flips_sampled_column() {
        let hm = column_heightmap();
        let plain = build_relief_mesh(&hm, &params(3, false));
        let mirrored = build_relief_mesh(&hm, &params(3, true));
        assert_relative_eq!(plain.heights_mm[0], 1.0);
        assert_relative_eq!(mirrored.heights_mm[0], 9.0);
        assert_relative_eq!(plain.position(0)[1], 1.16, epsilon = 1e-6);
        // Geometry stays in place, only sampling changes
        assert_eq!(plain.position(0)[0], mirrored.position(0)[0]);
    }

    #[test]
    fn test_bottom_mirrors_top() {
        let hm = column_heightmap();
        let mesh = build_relief_mesh(&hm, &params(3, false));
        let n = mesh.top_vertex_count;
        for i in 0..n {
            let top = mesh.position(i);
            let bottom = mesh.position(i + n);
            assert_eq!(top[0], bottom[0]);
            assert_eq!(top[2], bottom[2]);
            assert_eq!(bottom[1], 0.0);
        }
    }

    #[test]
    fn test_aspect_fit() {
        let wide = fit_dimensions(200, 100, 100.0, 100.0);
        assert_relative_eq!(wide.width, 100.0);
        assert_relative_eq!(wide.height, 50.0);

        let tall = fit_dimensions(100, 400, 80.0, 100.0);
        assert_relative_eq!(tall.width, 25.0);
        assert_relative_eq!(tall.height, 100.0);

        let hm = Heightmap::new(4, 2, vec![0.0; 8]).unwrap();
        let mesh = build_relief_mesh(&hm, &params(4, false));
        let xs: Vec<f32> = mesh.positions.chunks(3).map(|p| p[0]).collect();
        let zs: Vec<f32> = mesh.positions.chunks(3).map(|p| p[2]).collect();
        assert_relative_eq!(xs.iter().cloned().fold(f32::MIN, f32::max), 50.0);
        assert_relative_eq!(zs.iter().cloned().fold(f32::MIN, f32::max), 25.0);
        assert_relative_eq!(zs.iter().cloned().fold(f32::MAX, f32::min), -25.0);
    }

    #[test]
    fn test_watertight_edges() {
        let hm = column_heightmap();
        let mesh = build_relief_mesh(&hm, &params(3, false));
        // Every directed edge must be matched by its reverse exactly once
        let mut edges: HashMap<(u32, u32), i32> = HashMap::new();
        for tri in mesh.indices.chunks(3) {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                *edges.entry((a, b)).or_insert(0) += 1;
            }
        }
        for (&(a, b), &count) in &edges {
            assert_eq!(count, 1, "edge {}->{} used {} times", a, b, count);
            assert_eq!(edges.get(&(b, a)), Some(&1), "edge {}->{} unmatched", a, b);
        }
    }

    #[test]
    fn test_surface_orientation() {
        let hm = Heightmap::new(3, 3, vec![1.0; 9]).unwrap();
        let mesh = build_relief_mesh(&hm, &params(2, false));
        let cells = (mesh.segments_x * mesh.segments_y) as usize;
        for (t, tri) in mesh.indices.chunks(3).enumerate() {
            let n = cross(mesh.position(tri[0]), mesh.position(tri[1]), mesh.position(tri[2]));
            if t < cells * 2 {
                assert!(n[1] > 0.0, "top triangle {} faces {:?}", t, n);
            } else if t < cells * 4 {
                assert!(n[1] < 0.0, "bottom triangle {} faces {:?}", t, n);
            }
        }
    }

    #[test]
    fn test_positive_signed_volume() {
        let hm = column_heightmap();
        let mesh = build_relief_mesh(&hm, &params(3, false));
        let volume: f32 = mesh
            .indices
            .chunks(3)
            .map(|tri| {
                let (a, b, c) = (mesh.position(tri[0]), mesh.position(tri[1]), mesh.position(tri[2]));
                let bc = [
                    b[1] * c[2] - b[2] * c[1],
                    b[2] * c[0] - b[0] * c[2],
                    b[0] * c[1] - b[1] * c[0],
                ];
                (a[0] * bc[0] + a[1] * bc[1] + a[2] * bc[2]) / 6.0
            })
            .sum();
        assert!(volume > 0.0);
    }

    #[test]
    fn test_stats_and_bounds() {
        let hm = column_heightmap();
        let mesh = build_relief_mesh(&hm, &params(3, false));
        let stats = mesh.stats();
        assert_eq!(stats.face_count, 60);
        assert_eq!(stats.vertex_count, 32);
        assert_eq!(stats.min, [-50.0, 0.0, -50.0]);
        assert_eq!([stats.max[0], stats.max[2]], [50.0, 50.0]);
        assert!((stats.max[1] - 9.16).abs() < 1e-5);
        assert_eq!(mesh.bounds(), Some((stats.min, stats.max)));
    }

    #[test]
    fn test_zero_resolution_uses_one_segment() {
        let hm = Heightmap::new(4, 4, vec![1.0; 16]).unwrap();
        let mesh = build_relief_mesh(&hm, &params(0, false));
        assert_eq!((mesh.segments_x, mesh.segments_y), (1, 1));
        assert_eq!(mesh.triangle_count(), 12);
        assert!(mesh.is_consistent());
    }

    #[test]
    fn test_empty_mesh_has_no_bounds() {
        let mesh = ReliefMesh {
            positions: Vec::new(),
            indices: Vec::new(),
            top_vertex_count: 0,
            segments_x: 0,
            segments_y: 0,
            heights_mm: Vec::new(),
            dimensions: MeshDimensions { width: 0.0, height: 0.0 },
        };
        assert_eq!(mesh.bounds(), None);
        assert_eq!(mesh.stats().face_count, 0);
    }
}
