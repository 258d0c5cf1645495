//! Vertex/index streaming for structured-grid surfaces.
//!
//! The input is a U x V grid of 3D points (U fastest, row-major). Geometry is
//! emitted two-sided: every quad cell contributes two front triangles and two
//! back triangles, so the index count is 12(U-1)(V-1) in both shading modes.
//! Smooth shading shares vertices per grid point (2UV vertices, front copies
//! plus back copies with negated normals); faceted shading gives each front
//! triangle its own three vertices (6(U-1)(V-1)) so flat per-facet normals
//! never blend, and the back face indexes the same vertices in reverse.
//!
//! Colour assignment is decoupled from geometry: vertex colours come from a
//! cached palette-index array, so opacity or palette changes rewrite only the
//! colour channel of existing vertices.

use glam::{DMat4, DVec3, Vec3};
use tracing::debug;

use plot_interop::{
    BufferPool, CullMode, DeviceError, DrawCall, FillMode, IndexBufferId, NativeDevice,
    RenderStates, Topology, VertexBufferId,
};

use crate::colormap::ColourMap;
use crate::model::SceneModel;
use crate::vertex::{with_alpha, SurfaceVertex, SURFACE_VERTEX_STRIDE};

/// How the surface fill is shaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceShading {
    /// Per-grid-point normals accumulated from neighbouring triangles.
    Smooth,
    /// Flat per-facet normals; each triangle visually distinct.
    Faceted,
    /// No fill; only the mesh-line overlay is drawn. Geometry is kept in the
    /// smooth layout so toggling the fill back on is a rewrite, not a
    /// reallocation.
    None,
}

/// Wireframe overlay drawn on top of the shaded surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshLines {
    None,
    Triangles,
}

/// Depth bias applied to the wireframe overlay so it sits on the surface.
const MESH_LINE_DEPTH_BIAS: f32 = -1.0e-4;

/// Streams a structured grid into two-sided surface geometry.
pub struct SurfaceModel {
    length_u: usize,
    length_v: usize,
    model_points: Vec<DVec3>,
    /// Grid-point magnitudes (z values) driving the colour mapping.
    values: Vec<f64>,

    shading: SurfaceShading,
    mesh_lines: MeshLines,
    colour_map: ColourMap,
    colour_indices: Vec<u16>,
    opacity: u8,
    model_to_world: DMat4,

    vertices: Vec<SurfaceVertex>,
    indices: Vec<u32>,

    vertex_buffer: Option<VertexBufferId>,
    index_buffer: Option<IndexBufferId>,
    vertex_capacity: usize,
    index_capacity: usize,

    geometry_dirty: bool,
    colour_dirty: bool,
}

impl SurfaceModel {
    /// Build from coordinate vectors and a z matrix: `x` has `length_u`
    /// entries, `y` has `length_v`, and `z` is the full grid with u fastest.
    /// Dimension mismatches are rejected before any buffer work begins.
    pub fn from_vectors(
        x: &[f64],
        y: &[f64],
        z: &[f64],
        length_u: usize,
        length_v: usize,
    ) -> Result<Self, DeviceError> {
        validate_dimensions(length_u, length_v)?;
        if x.len() != length_u || y.len() != length_v {
            return Err(DeviceError::Validation(format!(
                "coordinate vector lengths ({}, {}) do not match grid dimensions ({length_u}, {length_v})",
                x.len(),
                y.len()
            )));
        }
        if z.len() != length_u * length_v {
            return Err(DeviceError::Validation(format!(
                "z grid has {} entries, expected {}",
                z.len(),
                length_u * length_v
            )));
        }
        let points = (0..length_v)
            .flat_map(|j| {
                (0..length_u).map(move |i| DVec3::new(x[i], y[j], z[j * length_u + i]))
            })
            .collect();
        Ok(Self::from_points(points, z.to_vec(), length_u, length_v))
    }

    /// Build from three full U x V coordinate grids, u fastest.
    pub fn from_grids(
        x: &[f64],
        y: &[f64],
        z: &[f64],
        length_u: usize,
        length_v: usize,
    ) -> Result<Self, DeviceError> {
        validate_dimensions(length_u, length_v)?;
        let expected = length_u * length_v;
        if x.len() != expected || y.len() != expected || z.len() != expected {
            return Err(DeviceError::Validation(format!(
                "coordinate grids have ({}, {}, {}) entries, expected {expected}",
                x.len(),
                y.len(),
                z.len()
            )));
        }
        let points = (0..expected)
            .map(|k| DVec3::new(x[k], y[k], z[k]))
            .collect();
        Ok(Self::from_points(points, z.to_vec(), length_u, length_v))
    }

    fn from_points(
        model_points: Vec<DVec3>,
        values: Vec<f64>,
        length_u: usize,
        length_v: usize,
    ) -> Self {
        let colour_map = ColourMap::default();
        let colour_indices = colour_map.indices_from_values(&values);
        Self {
            length_u,
            length_v,
            model_points,
            values,
            shading: SurfaceShading::Smooth,
            mesh_lines: MeshLines::None,
            colour_map,
            colour_indices,
            opacity: 0xFF,
            model_to_world: DMat4::IDENTITY,
            vertices: Vec::new(),
            indices: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            vertex_capacity: 0,
            index_capacity: 0,
            geometry_dirty: true,
            colour_dirty: false,
        }
    }

    pub fn grid_size(&self) -> (usize, usize) {
        (self.length_u, self.length_v)
    }

    pub fn shading(&self) -> SurfaceShading {
        self.shading
    }

    /// Changing the shading mode forces reallocation: the vertex count
    /// formulas differ between modes.
    pub fn set_shading(&mut self, shading: SurfaceShading) {
        if self.shading != shading {
            debug!(?shading, "surface shading switched, rebuilding geometry");
            self.shading = shading;
            self.geometry_dirty = true;
        }
    }

    pub fn mesh_lines(&self) -> MeshLines {
        self.mesh_lines
    }

    pub fn set_mesh_lines(&mut self, mesh_lines: MeshLines) {
        self.mesh_lines = mesh_lines;
    }

    /// Transparency in [0, 255]; 0 is opaque. Touches only colour bits.
    pub fn set_transparency(&mut self, transparency: u8) {
        self.opacity = 0xFF - transparency;
        self.colour_dirty = true;
    }

    pub fn set_colour_map(&mut self, colour_map: ColourMap) {
        self.colour_map = colour_map;
        self.colour_indices = self.colour_map.indices_from_values(&self.values);
        self.colour_dirty = true;
    }

    pub fn set_model_to_world(&mut self, transform: DMat4) {
        self.model_to_world = transform;
        self.geometry_dirty = true;
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertices(&self) -> &[SurfaceVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_buffer_id(&self) -> Option<VertexBufferId> {
        self.vertex_buffer
    }

    pub fn index_buffer_id(&self) -> Option<IndexBufferId> {
        self.index_buffer
    }

    fn quad_count(&self) -> usize {
        (self.length_u - 1) * (self.length_v - 1)
    }

    fn world_points(&self) -> Vec<Vec3> {
        self.model_points
            .iter()
            .map(|p| {
                let p = self.model_to_world.transform_point3(*p);
                Vec3::new(p.x as f32, p.y as f32, p.z as f32)
            })
            .collect()
    }

    /// Rebuild the CPU-side vertex and index arrays for the current shading
    /// mode, then apply colours.
    pub fn rebuild_geometry(&mut self) {
        let world = self.world_points();
        match self.shading {
            SurfaceShading::Smooth | SurfaceShading::None => self.build_smooth(&world),
            SurfaceShading::Faceted => self.build_faceted(&world),
        }
        self.apply_colours();
        self.geometry_dirty = false;
        self.colour_dirty = false;
    }

    /// Front copies of each grid point followed by back copies. Normals are
    /// accumulated per front triangle into the shared grid points, normalized,
    /// then negated for the back copies. Back-face triangles reverse the
    /// front winding so both sides wind outward.
    fn build_smooth(&mut self, world: &[Vec3]) {
        let (u, v) = (self.length_u, self.length_v);
        let grid = u * v;

        self.vertices.clear();
        self.vertices.resize(
            2 * grid,
            SurfaceVertex {
                position: [0.0; 3],
                normal: [0.0; 3],
                color: 0,
            },
        );
        for (k, p) in world.iter().enumerate() {
            self.vertices[k].position = p.to_array();
            self.vertices[grid + k].position = p.to_array();
        }

        self.indices.clear();
        self.indices.reserve(12 * self.quad_count());
        let mut normals = vec![Vec3::ZERO; grid];
        for j in 0..v - 1 {
            for i in 0..u - 1 {
                let p00 = (j * u + i) as u32;
                let p10 = p00 + 1;
                let p01 = p00 + u as u32;
                let p11 = p01 + 1;
                for triangle in [[p00, p10, p11], [p00, p11, p01]] {
                    self.indices.extend(triangle);
                    let [a, b, c] = triangle.map(|k| world[k as usize]);
                    let normal = (b - a).cross(c - a).normalize_or_zero();
                    for k in triangle {
                        normals[k as usize] += normal;
                    }
                }
            }
        }
        // Back face: same cells over the back vertex copies, reverse winding.
        let back = grid as u32;
        for j in 0..v - 1 {
            for i in 0..u - 1 {
                let p00 = back + (j * u + i) as u32;
                let p10 = p00 + 1;
                let p01 = p00 + u as u32;
                let p11 = p01 + 1;
                self.indices.extend([p11, p10, p00, p01, p11, p00]);
            }
        }

        for (k, normal) in normals.iter().enumerate() {
            let n = normal.normalize_or_zero();
            self.vertices[k].normal = n.to_array();
            self.vertices[grid + k].normal = (-n).to_array();
        }
    }

    /// Three unshared vertices per front triangle, all carrying the quad's
    /// flat normal (the normalized sum of its two triangle normals). The back
    /// face indexes the same vertices with reversed winding.
    fn build_faceted(&mut self, world: &[Vec3]) {
        let (u, v) = (self.length_u, self.length_v);
        self.vertices.clear();
        self.vertices.reserve(6 * self.quad_count());
        self.indices.clear();
        self.indices.reserve(12 * self.quad_count());

        for j in 0..v - 1 {
            for i in 0..u - 1 {
                let p00 = j * u + i;
                let p10 = p00 + 1;
                let p01 = p00 + u;
                let p11 = p01 + 1;

                let first = [p00, p10, p11];
                let second = [p00, p11, p01];
                let flat = (facet_normal(world, first) + facet_normal(world, second))
                    .normalize_or_zero()
                    .to_array();

                let base = self.vertices.len() as u32;
                for corner in first.into_iter().chain(second) {
                    self.vertices.push(SurfaceVertex {
                        position: world[corner].to_array(),
                        normal: flat,
                        color: 0,
                    });
                }
                self.indices.extend([base, base + 1, base + 2]);
                self.indices.extend([base + 3, base + 4, base + 5]);
                // Back face reuses the vertices in reverse.
                self.indices.extend([base + 2, base + 1, base]);
                self.indices.extend([base + 5, base + 4, base + 3]);
            }
        }
    }

    /// Recompute only the colour channel of the existing vertices from the
    /// cached palette indices. Positions and normals are untouched, so
    /// opacity and palette changes never trigger a geometry rebuild.
    pub fn set_color_from_indices(&mut self) {
        self.apply_colours();
        self.colour_dirty = false;
    }

    fn apply_colours(&mut self) {
        if self.vertices.is_empty() {
            return;
        }
        let opacity = self.opacity;
        match self.shading {
            SurfaceShading::Smooth | SurfaceShading::None => {
                let grid = self.length_u * self.length_v;
                for k in 0..grid {
                    let color =
                        with_alpha(self.colour_map.color_at(self.colour_indices[k]), opacity);
                    self.vertices[k].color = color;
                    self.vertices[grid + k].color = color;
                }
            }
            SurfaceShading::Faceted => {
                let (u, v) = (self.length_u, self.length_v);
                let mut vertex = 0;
                for j in 0..v - 1 {
                    for i in 0..u - 1 {
                        let p00 = j * u + i;
                        let p10 = p00 + 1;
                        let p01 = p00 + u;
                        let p11 = p01 + 1;
                        for corner in [p00, p10, p11, p00, p11, p01] {
                            self.vertices[vertex].color = with_alpha(
                                self.colour_map.color_at(self.colour_indices[corner]),
                                opacity,
                            );
                            vertex += 1;
                        }
                    }
                }
            }
        }
    }

    fn destroy_buffers(&mut self, device: &mut dyn NativeDevice) {
        if let Some(id) = self.vertex_buffer.take() {
            device.destroy_vertex_buffer(id);
        }
        if let Some(id) = self.index_buffer.take() {
            device.destroy_index_buffer(id);
        }
        self.vertex_capacity = 0;
        self.index_capacity = 0;
    }

    fn fill_buffers(
        &mut self,
        device: &mut dyn NativeDevice,
        pool: BufferPool,
    ) -> Result<(), DeviceError> {
        if self.vertex_buffer.is_none() || self.vertex_capacity != self.vertices.len() {
            if let Some(id) = self.vertex_buffer.take() {
                device.destroy_vertex_buffer(id);
            }
            self.vertex_buffer = Some(device.create_vertex_buffer(
                self.vertices.len() * SURFACE_VERTEX_STRIDE as usize,
                SURFACE_VERTEX_STRIDE,
                pool,
            )?);
            self.vertex_capacity = self.vertices.len();
        }
        if self.index_buffer.is_none() || self.index_capacity != self.indices.len() {
            if let Some(id) = self.index_buffer.take() {
                device.destroy_index_buffer(id);
            }
            self.index_buffer = Some(
                device.create_index_buffer(self.indices.len() * std::mem::size_of::<u32>(), pool)?,
            );
            self.index_capacity = self.indices.len();
        }

        if let Some(id) = self.vertex_buffer {
            device.write_vertex_buffer(id, bytemuck::cast_slice(&self.vertices))?;
        }
        if let Some(id) = self.index_buffer {
            device.write_index_buffer(id, bytemuck::cast_slice(&self.indices))?;
        }
        Ok(())
    }

    fn draw_pass(
        &self,
        device: &mut dyn NativeDevice,
        states: RenderStates,
    ) -> Result<(), DeviceError> {
        let (Some(vertex_buffer), Some(index_buffer)) = (self.vertex_buffer, self.index_buffer)
        else {
            return Ok(());
        };
        device.draw_indexed(&DrawCall {
            topology: Topology::TriangleList,
            vertex_buffer,
            index_buffer,
            vertex_stride: SURFACE_VERTEX_STRIDE,
            vertex_count: self.vertices.len() as u32,
            index_count: self.indices.len() as u32,
            states,
        })
    }
}

fn validate_dimensions(length_u: usize, length_v: usize) -> Result<(), DeviceError> {
    if length_u < 2 || length_v < 2 {
        return Err(DeviceError::Validation(format!(
            "surface grid must be at least 2x2, got {length_u}x{length_v}"
        )));
    }
    Ok(())
}

fn facet_normal(world: &[Vec3], triangle: [usize; 3]) -> Vec3 {
    let [a, b, c] = triangle.map(|k| world[k]);
    (b - a).cross(c - a).normalize_or_zero()
}

impl SceneModel for SurfaceModel {
    fn update_geometry(
        &mut self,
        device: &mut dyn NativeDevice,
        pool: BufferPool,
    ) -> Result<(), DeviceError> {
        if self.geometry_dirty || self.vertex_buffer.is_none() {
            self.rebuild_geometry();
            self.fill_buffers(device, pool)?;
        } else if self.colour_dirty {
            self.set_color_from_indices();
            if let Some(id) = self.vertex_buffer {
                device.write_vertex_buffer(id, bytemuck::cast_slice(&self.vertices))?;
            }
        }
        Ok(())
    }

    fn draw(&mut self, device: &mut dyn NativeDevice) -> Result<(), DeviceError> {
        if self.shading != SurfaceShading::None {
            self.draw_pass(
                device,
                RenderStates {
                    lighting: true,
                    alpha_blend: self.opacity != 0xFF,
                    cull: CullMode::CounterClockwise,
                    ..RenderStates::default()
                },
            )?;
        }
        if self.mesh_lines == MeshLines::Triangles {
            self.draw_pass(
                device,
                RenderStates {
                    fill: FillMode::Wireframe,
                    depth_bias: MESH_LINE_DEPTH_BIAS,
                    ..RenderStates::default()
                },
            )?;
        }
        Ok(())
    }

    fn release_device_resources(&mut self, device: &mut dyn NativeDevice) {
        self.destroy_buffers(device);
        self.geometry_dirty = true;
    }
}
