//! Vertex/index streaming for line collections.
//!
//! Two layouts exist. The hairline layout emits one vertex per point and
//! draws a line list; it is exact at one device-independent unit on a 96 dpi
//! display and needs no shader support. The thick layout emits a four-vertex
//! quad per point pair for screen-space extrusion in a vertex shader.
//! Switching layout discards all cached buffers since the strides differ;
//! within a layout, buffers are reallocated only when the element count
//! changes and overwritten in place otherwise.

use glam::{DMat4, DVec3};
use tracing::debug;

use plot_interop::{
    BufferPool, DeviceError, DrawCall, IndexBufferId, NativeDevice, RenderStates, Topology,
    VertexBufferId,
};

use crate::model::SceneModel;
use crate::vertex::{LineVertex, ThickLineVertex, LINE_VERTEX_STRIDE, THICK_LINE_VERTEX_STRIDE};

/// Reference dpi at which one device-independent unit is one pixel.
pub const REFERENCE_DPI: u32 = 96;

/// One polyline point with its packed colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePoint {
    pub position: DVec3,
    pub color: u32,
}

impl LinePoint {
    pub fn new(position: DVec3, color: u32) -> Self {
        Self { position, color }
    }
}

/// Which vertex layout the streamer is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLayout {
    Hairline,
    Thick,
}

/// Streams a point collection into line geometry buffers.
pub struct LineModel {
    points: Vec<LinePoint>,
    thickness: f64,
    dpi: u32,
    /// Whether the screen-space thickening shader is usable on this device.
    effect_available: bool,
    model_to_world: DMat4,
    layout: LineLayout,
    depth_bias: f32,

    hairline_vertices: Vec<LineVertex>,
    thick_vertices: Vec<ThickLineVertex>,
    indices: Vec<u32>,

    vertex_buffer: Option<VertexBufferId>,
    index_buffer: Option<IndexBufferId>,
    vertex_capacity: usize,
    index_capacity: usize,

    points_dirty: bool,
}

impl LineModel {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            thickness: 1.0,
            dpi: REFERENCE_DPI,
            effect_available: true,
            model_to_world: DMat4::IDENTITY,
            layout: LineLayout::Hairline,
            depth_bias: 0.0,
            hairline_vertices: Vec::new(),
            thick_vertices: Vec::new(),
            indices: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            vertex_capacity: 0,
            index_capacity: 0,
            points_dirty: false,
        }
    }

    /// Replace the point collection. Points are consumed pairwise in the
    /// thick layout: each pair is an independent segment, and an odd
    /// trailing point is ignored.
    pub fn set_points(&mut self, points: Vec<LinePoint>) {
        self.points = points;
        self.points_dirty = true;
    }

    pub fn set_thickness(&mut self, thickness: f64) {
        if self.thickness != thickness {
            self.thickness = thickness;
            self.points_dirty = true;
            self.refresh_layout();
        }
    }

    pub fn thickness(&self) -> f64 {
        self.thickness
    }

    /// Thickness in pixels at the current resolution, for the extrusion
    /// pipeline's width constant.
    pub fn screen_thickness(&self) -> f64 {
        self.thickness * f64::from(self.dpi) / f64::from(REFERENCE_DPI)
    }

    /// Thick-line shader availability, queried from the device capabilities.
    pub fn set_effect_available(&mut self, available: bool) {
        if self.effect_available != available {
            self.effect_available = available;
            self.refresh_layout();
        }
    }

    pub fn set_model_to_world(&mut self, transform: DMat4) {
        self.model_to_world = transform;
        self.points_dirty = true;
    }

    pub fn set_depth_bias(&mut self, bias: f32) {
        self.depth_bias = bias;
    }

    pub fn layout(&self) -> LineLayout {
        self.layout
    }

    pub fn vertex_count(&self) -> usize {
        match self.layout {
            LineLayout::Hairline => self.hairline_vertices.len(),
            LineLayout::Thick => self.thick_vertices.len(),
        }
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertex_buffer_id(&self) -> Option<VertexBufferId> {
        self.vertex_buffer
    }

    pub fn index_buffer_id(&self) -> Option<IndexBufferId> {
        self.index_buffer
    }

    /// Hairline iff the thickening effect is unavailable, or the line is one
    /// device-independent unit wide on a reference-resolution display.
    fn select_layout(&self) -> LineLayout {
        if !self.effect_available || (self.thickness == 1.0 && self.dpi == REFERENCE_DPI) {
            LineLayout::Hairline
        } else {
            LineLayout::Thick
        }
    }

    /// Re-evaluate the layout; a switch invalidates every cached buffer
    /// because the vertex strides differ.
    fn refresh_layout(&mut self) {
        let layout = self.select_layout();
        if layout != self.layout {
            debug!(?layout, "line layout switched, discarding buffers");
            self.layout = layout;
            self.hairline_vertices.clear();
            self.thick_vertices.clear();
            self.indices.clear();
            self.vertex_capacity = 0;
            self.index_capacity = 0;
            self.points_dirty = true;
        }
    }

    fn world_point(&self, point: &LinePoint) -> [f32; 3] {
        let p = self.model_to_world.transform_point3(point.position);
        [p.x as f32, p.y as f32, p.z as f32]
    }

    fn rebuild_cpu_arrays(&mut self) {
        self.indices.clear();
        match self.layout {
            LineLayout::Hairline => {
                self.hairline_vertices.clear();
                for point in &self.points {
                    self.hairline_vertices.push(LineVertex {
                        position: self.world_point(point),
                        color: point.color,
                    });
                }
                self.indices.extend(0..self.points.len() as u32);
            }
            LineLayout::Thick => {
                self.thick_vertices.clear();
                for pair in self.points.chunks_exact(2) {
                    let start = self.world_point(&pair[0]);
                    let end = self.world_point(&pair[1]);
                    let base = self.thick_vertices.len() as u32;
                    for corner in [[0.0, -0.5], [1.0, -0.5], [1.0, 0.5], [0.0, 0.5]] {
                        // The colour follows the endpoint the corner sits on.
                        let color = if corner[0] == 0.0 {
                            pair[0].color
                        } else {
                            pair[1].color
                        };
                        self.thick_vertices.push(ThickLineVertex {
                            start,
                            end,
                            corner,
                            color,
                        });
                    }
                    self.indices
                        .extend([base, base + 1, base + 2, base + 2, base + 3, base]);
                }
            }
        }
    }

    fn vertex_bytes(&self) -> &[u8] {
        match self.layout {
            LineLayout::Hairline => bytemuck::cast_slice(&self.hairline_vertices),
            LineLayout::Thick => bytemuck::cast_slice(&self.thick_vertices),
        }
    }

    fn vertex_stride(&self) -> u32 {
        match self.layout {
            LineLayout::Hairline => LINE_VERTEX_STRIDE,
            LineLayout::Thick => THICK_LINE_VERTEX_STRIDE,
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

    /// Create buffers if the element counts changed, then write contents.
    fn fill_buffers(
        &mut self,
        device: &mut dyn NativeDevice,
        pool: BufferPool,
    ) -> Result<(), DeviceError> {
        let vertex_count = self.vertex_count();
        let index_count = self.indices.len();
        let stride = self.vertex_stride();

        if self.vertex_buffer.is_none() || self.vertex_capacity != vertex_count {
            if let Some(id) = self.vertex_buffer.take() {
                device.destroy_vertex_buffer(id);
            }
            self.vertex_buffer =
                Some(device.create_vertex_buffer(vertex_count * stride as usize, stride, pool)?);
            self.vertex_capacity = vertex_count;
        }
        if self.index_buffer.is_none() || self.index_capacity != index_count {
            if let Some(id) = self.index_buffer.take() {
                device.destroy_index_buffer(id);
            }
            self.index_buffer = Some(
                device.create_index_buffer(index_count * std::mem::size_of::<u32>(), pool)?,
            );
            self.index_capacity = index_count;
        }

        if let Some(id) = self.vertex_buffer {
            device.write_vertex_buffer(id, self.vertex_bytes())?;
        }
        if let Some(id) = self.index_buffer {
            device.write_index_buffer(id, bytemuck::cast_slice(&self.indices))?;
        }
        Ok(())
    }
}

impl Default for LineModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneModel for LineModel {
    fn update_geometry(
        &mut self,
        device: &mut dyn NativeDevice,
        pool: BufferPool,
    ) -> Result<(), DeviceError> {
        if self.points.is_empty() {
            self.destroy_buffers(device);
            return Ok(());
        }
        if !self.points_dirty && self.vertex_buffer.is_some() {
            return Ok(());
        }
        self.rebuild_cpu_arrays();
        self.fill_buffers(device, pool)?;
        self.points_dirty = false;
        Ok(())
    }

    fn draw(&mut self, device: &mut dyn NativeDevice) -> Result<(), DeviceError> {
        let (Some(vertex_buffer), Some(index_buffer)) = (self.vertex_buffer, self.index_buffer)
        else {
            return Ok(());
        };
        if self.indices.is_empty() {
            return Ok(());
        }
        device.draw_indexed(&DrawCall {
            topology: match self.layout {
                LineLayout::Hairline => Topology::LineList,
                LineLayout::Thick => Topology::TriangleList,
            },
            vertex_buffer,
            index_buffer,
            vertex_stride: self.vertex_stride(),
            vertex_count: self.vertex_count() as u32,
            index_count: self.indices.len() as u32,
            states: RenderStates {
                depth_bias: self.depth_bias,
                alpha_blend: true,
                ..RenderStates::default()
            },
        })
    }

    fn release_device_resources(&mut self, device: &mut dyn NativeDevice) {
        self.destroy_buffers(device);
        self.points_dirty = true;
    }

    fn set_resolution(&mut self, dpi: u32) {
        if self.dpi != dpi {
            self.dpi = dpi;
            self.points_dirty = true;
            self.refresh_layout();
        }
    }
}
