//! CPU-side reference implementation of [`NativeDevice`].
//!
//! Backs every texture and buffer with a plain allocation and records draw
//! and present calls. Used on platforms without a native backend and by the
//! engine's tests, which also use the fault-injection hooks
//! ([`SoftDevice::inject_status`], [`SoftFactory::fail_variant`]) to drive the
//! reset protocol through its lost/not-reset paths.

use std::any::Any;
use std::collections::HashMap;

use tracing::debug;

use crate::device::{
    BufferPool, DeviceFactory, DeviceStatus, DeviceVariant, DrawCall, IndexBufferId, NativeDevice,
    SampleCount, SurfaceHandle, TextureDesc, TextureId, VertexBufferId,
};
use crate::error::DeviceError;
use crate::format::PixelFormat;

struct SoftTexture {
    desc: TextureDesc,
    /// Synthetic native handle, stable for the texture's lifetime.
    handle: u64,
}

struct SoftBuffer {
    data: Vec<u8>,
    stride: u32,
    #[allow(dead_code)]
    pool: BufferPool,
}

/// A recorded indexed draw, inspectable by tests.
#[derive(Debug, Clone, Copy)]
pub struct RecordedDraw {
    pub call: DrawCall,
}

/// Software reference device.
pub struct SoftDevice {
    variant: DeviceVariant,
    width: u32,
    height: u32,
    next_id: u64,
    textures: HashMap<u64, SoftTexture>,
    vertex_buffers: HashMap<u64, SoftBuffer>,
    index_buffers: HashMap<u64, SoftBuffer>,
    /// Sample counts reported as supported, with quality levels.
    multisample_support: Vec<(SampleCount, u32)>,
    injected_status: DeviceStatus,
    present_failures_remaining: u32,
    pub reset_count: u32,
    pub present_count: u32,
    draws: Vec<RecordedDraw>,
    transforms: ([[f32; 4]; 4], [[f32; 4]; 4], [[f32; 4]; 4]),
    viewport: (u32, u32),
}

impl SoftDevice {
    pub fn new(variant: DeviceVariant, width: u32, height: u32) -> Self {
        debug!(?variant, width, height, "software device created");
        Self {
            variant,
            width: width.max(1),
            height: height.max(1),
            next_id: 1,
            textures: HashMap::new(),
            vertex_buffers: HashMap::new(),
            index_buffers: HashMap::new(),
            multisample_support: vec![(SampleCount::Eight, 2), (SampleCount::Four, 2)],
            injected_status: DeviceStatus::Ok,
            present_failures_remaining: 0,
            reset_count: 0,
            present_count: 0,
            draws: Vec::new(),
            transforms: (identity(), identity(), identity()),
            viewport: (width.max(1), height.max(1)),
        }
    }

    // -----------------------------------------------------------------------
    // Fault injection and inspection (test hooks)
    // -----------------------------------------------------------------------

    /// Override the status returned by the next cooperative-level probes.
    pub fn inject_status(&mut self, status: DeviceStatus) {
        self.injected_status = status;
    }

    /// Restrict which sample counts the device claims to support.
    pub fn set_multisample_support(&mut self, support: &[(SampleCount, u32)]) {
        self.multisample_support = support.to_vec();
    }

    /// Make the next `n` present calls fail.
    pub fn fail_presents(&mut self, n: u32) {
        self.present_failures_remaining = n;
    }

    pub fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(&id.0).map(|t| t.desc)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn vertex_buffer_data(&self, id: VertexBufferId) -> Option<&[u8]> {
        self.vertex_buffers.get(&id.0).map(|b| b.data.as_slice())
    }

    pub fn vertex_buffer_stride(&self, id: VertexBufferId) -> Option<u32> {
        self.vertex_buffers.get(&id.0).map(|b| b.stride)
    }

    pub fn index_buffer_data(&self, id: IndexBufferId) -> Option<&[u8]> {
        self.index_buffers.get(&id.0).map(|b| b.data.as_slice())
    }

    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn identity() -> [[f32; 4]; 4] {
    let mut m = [[0.0f32; 4]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

impl NativeDevice for SoftDevice {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn variant(&self) -> DeviceVariant {
        self.variant
    }

    fn status(&self) -> DeviceStatus {
        self.injected_status
    }

    fn reset(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if self.injected_status == DeviceStatus::Lost {
            return Err(DeviceError::ResetFailed("device is lost".into()));
        }
        self.width = width.max(1);
        self.height = height.max(1);
        self.injected_status = DeviceStatus::Ok;
        self.reset_count += 1;
        debug!(width, height, "software device reset");
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn back_buffer(&self) -> SurfaceHandle {
        // Synthetic stable handle for the back buffer.
        SurfaceHandle(0xBACC_0000 | u64::from(self.reset_count))
    }

    fn check_multisample(&self, _format: PixelFormat, samples: SampleCount) -> Option<u32> {
        self.multisample_support
            .iter()
            .find(|(s, _)| *s == samples)
            .map(|(_, q)| *q)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        let id = self.alloc_id();
        let handle = 0x7E00_0000 | id;
        self.textures.insert(id, SoftTexture { desc: *desc, handle });
        Ok(TextureId(id))
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id.0);
    }

    fn shared_handle(&self, id: TextureId) -> Result<SurfaceHandle, DeviceError> {
        let texture = self
            .textures
            .get(&id.0)
            .ok_or_else(|| DeviceError::Backend(format!("unknown texture {id:?}")))?;
        if !texture.desc.shareable {
            debug_assert!(false, "shared_handle called on a non-shareable texture");
            return Err(DeviceError::NotShareable);
        }
        Ok(SurfaceHandle(texture.handle))
    }

    fn resolve(
        &mut self,
        src: TextureId,
        dst: TextureId,
        _format: PixelFormat,
    ) -> Result<(), DeviceError> {
        if !self.textures.contains_key(&src.0) || !self.textures.contains_key(&dst.0) {
            return Err(DeviceError::Backend("resolve on destroyed texture".into()));
        }
        Ok(())
    }

    fn create_vertex_buffer(
        &mut self,
        len_bytes: usize,
        stride: u32,
        pool: BufferPool,
    ) -> Result<VertexBufferId, DeviceError> {
        let id = self.alloc_id();
        self.vertex_buffers.insert(
            id,
            SoftBuffer {
                data: vec![0; len_bytes],
                stride,
                pool,
            },
        );
        Ok(VertexBufferId(id))
    }

    fn create_index_buffer(
        &mut self,
        len_bytes: usize,
        pool: BufferPool,
    ) -> Result<IndexBufferId, DeviceError> {
        let id = self.alloc_id();
        self.index_buffers.insert(
            id,
            SoftBuffer {
                data: vec![0; len_bytes],
                stride: 0,
                pool,
            },
        );
        Ok(IndexBufferId(id))
    }

    fn destroy_vertex_buffer(&mut self, id: VertexBufferId) {
        self.vertex_buffers.remove(&id.0);
    }

    fn destroy_index_buffer(&mut self, id: IndexBufferId) {
        self.index_buffers.remove(&id.0);
    }

    fn write_vertex_buffer(&mut self, id: VertexBufferId, data: &[u8]) -> Result<(), DeviceError> {
        let buffer = self
            .vertex_buffers
            .get_mut(&id.0)
            .ok_or_else(|| DeviceError::Backend(format!("unknown vertex buffer {id:?}")))?;
        if data.len() > buffer.data.len() {
            return Err(DeviceError::Backend("vertex buffer overflow".into()));
        }
        buffer.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn write_index_buffer(&mut self, id: IndexBufferId, data: &[u8]) -> Result<(), DeviceError> {
        let buffer = self
            .index_buffers
            .get_mut(&id.0)
            .ok_or_else(|| DeviceError::Backend(format!("unknown index buffer {id:?}")))?;
        if data.len() > buffer.data.len() {
            return Err(DeviceError::Backend("index buffer overflow".into()));
        }
        buffer.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn set_transforms(
        &mut self,
        world: [[f32; 4]; 4],
        view: [[f32; 4]; 4],
        projection: [[f32; 4]; 4],
    ) {
        self.transforms = (world, view, projection);
    }

    fn clear(&mut self, _color: u32) {}

    fn draw_indexed(&mut self, call: &DrawCall) -> Result<(), DeviceError> {
        if !self.vertex_buffers.contains_key(&call.vertex_buffer.0)
            || !self.index_buffers.contains_key(&call.index_buffer.0)
        {
            return Err(DeviceError::Backend("draw with destroyed buffer".into()));
        }
        self.draws.push(RecordedDraw { call: *call });
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        if self.present_failures_remaining > 0 {
            self.present_failures_remaining -= 1;
            return Err(DeviceError::Backend("present failed".into()));
        }
        if self.injected_status != DeviceStatus::Ok {
            return Err(DeviceError::Backend("present on unhealthy device".into()));
        }
        self.present_count += 1;
        Ok(())
    }
}

/// Factory for software devices, with per-variant failure injection.
#[derive(Default)]
pub struct SoftFactory {
    fail_extended: bool,
    fail_legacy: bool,
}

impl SoftFactory {
    /// Make the factory refuse to create the given variant.
    pub fn fail_variant(mut self, variant: DeviceVariant) -> Self {
        match variant {
            DeviceVariant::Extended => self.fail_extended = true,
            DeviceVariant::Legacy => self.fail_legacy = true,
        }
        self
    }
}

impl DeviceFactory for SoftFactory {
    fn create(
        &self,
        variant: DeviceVariant,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn NativeDevice>, DeviceError> {
        let refused = match variant {
            DeviceVariant::Extended => self.fail_extended,
            DeviceVariant::Legacy => self.fail_legacy,
        };
        if refused {
            return Err(DeviceError::Backend(format!(
                "variant {variant:?} unavailable"
            )));
        }
        Ok(Box::new(SoftDevice::new(variant, width, height)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_handle_requires_shareable_flag() {
        let mut device = SoftDevice::new(DeviceVariant::Extended, 64, 64);
        let desc = TextureDesc {
            width: 64,
            height: 64,
            format: PixelFormat::Bgra8,
            samples: SampleCount::One,
            shareable: false,
        };
        let id = device.create_texture(&desc).unwrap();
        // debug_assert fires in debug builds; check the release-path error.
        if !cfg!(debug_assertions) {
            assert!(matches!(
                device.shared_handle(id),
                Err(DeviceError::NotShareable)
            ));
        }
        let shareable = device
            .create_texture(&TextureDesc {
                shareable: true,
                samples: SampleCount::One,
                ..desc
            })
            .unwrap();
        assert!(!device.shared_handle(shareable).unwrap().is_null());
    }

    #[test]
    fn buffer_writes_are_in_place() {
        let mut device = SoftDevice::new(DeviceVariant::Extended, 4, 4);
        let vb = device
            .create_vertex_buffer(16, 16, BufferPool::Default)
            .unwrap();
        device.write_vertex_buffer(vb, &[1u8; 16]).unwrap();
        device.write_vertex_buffer(vb, &[2u8; 8]).unwrap();
        let data = device.vertex_buffer_data(vb).unwrap();
        assert_eq!(&data[..8], &[2u8; 8]);
        assert_eq!(&data[8..], &[1u8; 8]);
        assert!(device.write_vertex_buffer(vb, &[0u8; 32]).is_err());
    }

    #[test]
    fn reset_clears_not_reset_state() {
        let mut device = SoftDevice::new(DeviceVariant::Legacy, 32, 32);
        device.inject_status(DeviceStatus::NotReset);
        assert_eq!(device.status(), DeviceStatus::NotReset);
        device.reset(48, 48).unwrap();
        assert_eq!(device.status(), DeviceStatus::Ok);
        assert_eq!(device.dimensions(), (48, 48));
    }
}
