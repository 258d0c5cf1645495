//! The [`NativeDevice`] contract.
//!
//! The engine never talks to a 3D API directly; everything flows through this
//! trait so that device generations are swappable and the whole lifecycle
//! machinery can be exercised against the software backend.

use std::any::Any;

use crate::error::DeviceError;
use crate::format::PixelFormat;

/// Which device variant was created.
///
/// The extended variant is tried first: it survives display-mode changes
/// without losing resources and uses the default buffer pool. The legacy
/// variant is the fallback and needs managed-pool buffers so they can be
/// restored after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceVariant {
    Extended,
    Legacy,
}

/// Result of the cooperative-level probe performed before each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Ready to render.
    Ok,
    /// Lost with no recovery possible this frame. Skip rendering.
    Lost,
    /// Lost but recoverable by a reset.
    NotReset,
}

/// Resource pool for buffer allocations, selected by device variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPool {
    Default,
    Managed,
}

/// Multisample sample counts the engine negotiates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SampleCount {
    One,
    Four,
    Eight,
}

impl SampleCount {
    pub fn samples(self) -> u32 {
        match self {
            SampleCount::One => 1,
            SampleCount::Four => 4,
            SampleCount::Eight => 8,
        }
    }
}

/// Description of a 2D texture allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub samples: SampleCount,
    /// Allocate with the cross-API sharing flag. Only shareable textures may
    /// be bridged to the presentation surface.
    pub shareable: bool,
}

macro_rules! resource_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

resource_id!(
    /// Opaque handle to a device texture.
    TextureId
);
resource_id!(
    /// Opaque handle to a device vertex buffer.
    VertexBufferId
);
resource_id!(
    /// Opaque handle to a device index buffer.
    IndexBufferId
);

/// Native surface handle as published to the host framework (e.g. the raw
/// pointer behind a shared texture, or the back buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);

impl SurfaceHandle {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Primitive topology for indexed draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    LineList,
    TriangleList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    CounterClockwise,
}

/// Fixed-function render state configured per draw call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderStates {
    pub fill: FillMode,
    pub cull: CullMode,
    pub depth_bias: f32,
    pub lighting: bool,
    pub alpha_blend: bool,
    pub multisample_antialias: bool,
}

impl Default for RenderStates {
    fn default() -> Self {
        Self {
            fill: FillMode::Solid,
            cull: CullMode::None,
            depth_bias: 0.0,
            lighting: false,
            alpha_blend: false,
            multisample_antialias: true,
        }
    }
}

/// One indexed draw: buffers, counts and render state.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub topology: Topology,
    pub vertex_buffer: VertexBufferId,
    pub index_buffer: IndexBufferId,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    pub states: RenderStates,
}

/// Common interface over the native 3D device.
///
/// Implementations exist for Direct3D 11 (Windows) and the software reference
/// backend. Lock/write/unlock buffer semantics are collapsed into single
/// write calls; render-state setters into [`RenderStates`].
pub trait NativeDevice: Send {
    /// Downcast to a concrete type, e.g. to reach backend-specific handles.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast to a concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn variant(&self) -> DeviceVariant;

    /// Cooperative-level probe. Called at the top of every frame.
    fn status(&self) -> DeviceStatus;

    /// Reallocate the back buffer at the given size and restore the device to
    /// [`DeviceStatus::Ok`]. Device-dependent resources must have been
    /// released by the caller beforehand.
    fn reset(&mut self, width: u32, height: u32) -> Result<(), DeviceError>;

    /// Current back-buffer dimensions.
    fn dimensions(&self) -> (u32, u32);

    /// Native handle of the back buffer, for hosts presenting it directly.
    fn back_buffer(&self) -> SurfaceHandle;

    /// Probe multisample support: `Some(quality_levels)` if the format
    /// supports the sample count, `None` otherwise.
    fn check_multisample(&self, format: PixelFormat, samples: SampleCount) -> Option<u32>;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError>;

    fn destroy_texture(&mut self, id: TextureId);

    /// Cross-API handle for a texture created with `shareable: true`.
    ///
    /// Bridging a non-shareable texture is a precondition violation and
    /// yields [`DeviceError::NotShareable`].
    fn shared_handle(&self, id: TextureId) -> Result<SurfaceHandle, DeviceError>;

    /// Resolve a multisampled texture into a non-multisampled one.
    fn resolve(
        &mut self,
        src: TextureId,
        dst: TextureId,
        format: PixelFormat,
    ) -> Result<(), DeviceError>;

    fn create_vertex_buffer(
        &mut self,
        len_bytes: usize,
        stride: u32,
        pool: BufferPool,
    ) -> Result<VertexBufferId, DeviceError>;

    fn create_index_buffer(
        &mut self,
        len_bytes: usize,
        pool: BufferPool,
    ) -> Result<IndexBufferId, DeviceError>;

    fn destroy_vertex_buffer(&mut self, id: VertexBufferId);

    fn destroy_index_buffer(&mut self, id: IndexBufferId);

    /// Overwrite buffer contents in place. `data` must not exceed the
    /// allocation made at creation time.
    fn write_vertex_buffer(&mut self, id: VertexBufferId, data: &[u8]) -> Result<(), DeviceError>;

    fn write_index_buffer(&mut self, id: IndexBufferId, data: &[u8]) -> Result<(), DeviceError>;

    fn set_viewport(&mut self, width: u32, height: u32);

    /// World, view and projection matrices (column-major 4x4).
    fn set_transforms(
        &mut self,
        world: [[f32; 4]; 4],
        view: [[f32; 4]; 4],
        projection: [[f32; 4]; 4],
    );

    /// Clear the render target (packed ARGB) and depth buffer.
    fn clear(&mut self, color: u32);

    fn draw_indexed(&mut self, call: &DrawCall) -> Result<(), DeviceError>;

    /// Present the frame. Failures here are expected to recur until the next
    /// successful reset; the caller swallows them at the present call site.
    fn present(&mut self) -> Result<(), DeviceError>;
}

/// Creates [`NativeDevice`] instances for a requested variant.
///
/// The device service tries [`DeviceVariant::Extended`] first and falls back
/// to [`DeviceVariant::Legacy`]; a factory returns an error for variants it
/// cannot provide.
pub trait DeviceFactory: Send {
    fn create(
        &self,
        variant: DeviceVariant,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn NativeDevice>, DeviceError>;
}
