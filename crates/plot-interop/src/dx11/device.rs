//! D3D11 implementation of [`NativeDevice`].
//!
//! The extended variant maps to a hardware device, the legacy fallback to
//! WARP. Like the rest of this layer, the device carries no shader pipelines;
//! consumers bind their own before issuing draws, and the transform matrices
//! stored here are read back by whichever pipeline needs them.

use std::any::Any;
use std::collections::HashMap;

use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL_11_0,
    D3D_PRIMITIVE_TOPOLOGY_LINELIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32_UINT;

use tracing::{debug, error};

use crate::device::{
    BufferPool, DeviceFactory, DeviceStatus, DeviceVariant, DrawCall, IndexBufferId, NativeDevice,
    SampleCount, SurfaceHandle, TextureDesc, TextureId, Topology, VertexBufferId,
};
use crate::error::DeviceError;
use crate::format::PixelFormat;

use super::interop::{create_texture_2d, dxgi_format, shared_handle_of};

/// A D3D11 device with an immediate context, exposed through the
/// [`NativeDevice`] contract.
pub struct Dx11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    variant: DeviceVariant,
    width: u32,
    height: u32,
    /// Offscreen back buffer and its render-target view.
    back_buffer: Option<(ID3D11Texture2D, ID3D11RenderTargetView)>,
    next_id: u64,
    textures: HashMap<u64, ID3D11Texture2D>,
    vertex_buffers: HashMap<u64, (ID3D11Buffer, usize)>,
    index_buffers: HashMap<u64, (ID3D11Buffer, usize)>,
    transforms: [[[f32; 4]; 4]; 3],
}

// SAFETY: the device is driven from the single UI thread; COM pointers are
// only shipped across threads, never used concurrently.
unsafe impl Send for Dx11Device {}

impl Dx11Device {
    /// Create a device of the given variant: hardware for extended, WARP for
    /// the legacy fallback.
    pub fn new(variant: DeviceVariant, width: u32, height: u32) -> Result<Self, DeviceError> {
        let driver_type: D3D_DRIVER_TYPE = match variant {
            DeviceVariant::Extended => D3D_DRIVER_TYPE_HARDWARE,
            DeviceVariant::Legacy => D3D_DRIVER_TYPE_WARP,
        };

        let mut device = None;
        let mut context = None;
        let hr = unsafe {
            D3D11CreateDevice(
                None,
                driver_type,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT | D3D11_CREATE_DEVICE_SINGLETHREADED,
                Some(&[D3D_FEATURE_LEVEL_11_0]),
                D3D11_SDK_VERSION,
                Some(&mut device as *mut _),
                None,
                Some(&mut context as *mut _),
            )
        };
        if let Err(e) = hr {
            error!("D3D11CreateDevice failed for {variant:?}: {e}");
            return Err(DeviceError::Backend(format!(
                "D3D11CreateDevice ({variant:?}) failed: {e}"
            )));
        }
        let device = device.ok_or(DeviceError::NoCompatibleDevice)?;
        let context = context.ok_or(DeviceError::NoCompatibleDevice)?;
        debug!("D3D11 device created with driver type {:?}", driver_type);

        let mut this = Self {
            device,
            context,
            variant,
            width: width.max(1),
            height: height.max(1),
            back_buffer: None,
            next_id: 1,
            textures: HashMap::new(),
            vertex_buffers: HashMap::new(),
            index_buffers: HashMap::new(),
            transforms: [[[0.0; 4]; 4]; 3],
        };
        this.recreate_back_buffer()?;
        Ok(this)
    }

    /// Borrow the underlying `ID3D11Device`.
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    /// Borrow the immediate device context.
    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    /// Transforms last set by the engine (world, view, projection), for
    /// pipelines uploading them as shader constants.
    pub fn transforms(&self) -> &[[[f32; 4]; 4]; 3] {
        &self.transforms
    }

    fn recreate_back_buffer(&mut self) -> Result<(), DeviceError> {
        self.back_buffer = None;
        let desc = TextureDesc {
            width: self.width,
            height: self.height,
            format: PixelFormat::Bgra8,
            samples: SampleCount::One,
            shareable: true,
        };
        let texture = create_texture_2d(&self.device, &desc, 0)?;
        let mut rtv = None;
        unsafe {
            self.device
                .CreateRenderTargetView(&texture, None, Some(&mut rtv as *mut _))
        }
        .map_err(|e| DeviceError::Backend(format!("CreateRenderTargetView failed: {e}")))?;
        let rtv = rtv.ok_or_else(|| DeviceError::Backend("CreateRTV returned null".into()))?;
        self.back_buffer = Some((texture, rtv));
        Ok(())
    }

    fn create_buffer(
        &mut self,
        len_bytes: usize,
        bind: D3D11_BIND_FLAG,
    ) -> Result<ID3D11Buffer, DeviceError> {
        let desc = D3D11_BUFFER_DESC {
            ByteWidth: len_bytes as u32,
            Usage: D3D11_USAGE_DYNAMIC,
            BindFlags: bind.0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            ..Default::default()
        };
        let mut buf = None;
        unsafe { self.device.CreateBuffer(&desc, None, Some(&mut buf as *mut _)) }
            .map_err(|e| DeviceError::Backend(format!("CreateBuffer failed: {e}")))?;
        buf.ok_or_else(|| DeviceError::Backend("CreateBuffer returned null".into()))
    }

    /// Map-write-unmap with discard, the D3D11 equivalent of the classic
    /// lock/write/unlock buffer fill.
    fn write_buffer(&self, buffer: &ID3D11Buffer, capacity: usize, data: &[u8]) -> Result<(), DeviceError> {
        if data.len() > capacity {
            return Err(DeviceError::Backend("buffer write exceeds allocation".into()));
        }
        unsafe {
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
                .map_err(|e| DeviceError::Backend(format!("Map failed: {e}")))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.pData as *mut u8, data.len());
            self.context.Unmap(buffer, 0);
        }
        Ok(())
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl NativeDevice for Dx11Device {
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
        // D3D11 has no recoverable not-reset state; a removed device is lost
        // until the whole service is recreated.
        match unsafe { self.device.GetDeviceRemovedReason() } {
            Ok(()) => DeviceStatus::Ok,
            Err(_) => DeviceStatus::Lost,
        }
    }

    fn reset(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        self.width = width.max(1);
        self.height = height.max(1);
        self.recreate_back_buffer()
            .map_err(|e| DeviceError::ResetFailed(e.to_string()))?;
        debug!(width, height, "D3D11 back buffer reallocated");
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn back_buffer(&self) -> SurfaceHandle {
        self.back_buffer
            .as_ref()
            .and_then(|(texture, _)| shared_handle_of(texture).ok())
            .unwrap_or(SurfaceHandle(0))
    }

    fn check_multisample(&self, format: PixelFormat, samples: SampleCount) -> Option<u32> {
        let mut quality = 0u32;
        let hr = unsafe {
            self.device
                .CheckMultisampleQualityLevels(dxgi_format(format), samples.samples(), &mut quality)
        };
        if hr.is_ok() && quality > 0 {
            Some(quality)
        } else {
            None
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        let texture = create_texture_2d(&self.device, desc, 0)?;
        let id = self.alloc_id();
        self.textures.insert(id, texture);
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
        shared_handle_of(texture)
    }

    fn resolve(
        &mut self,
        src: TextureId,
        dst: TextureId,
        format: PixelFormat,
    ) -> Result<(), DeviceError> {
        let src = self
            .textures
            .get(&src.0)
            .ok_or_else(|| DeviceError::Backend("resolve: unknown source".into()))?;
        let dst = self
            .textures
            .get(&dst.0)
            .ok_or_else(|| DeviceError::Backend("resolve: unknown destination".into()))?;
        unsafe {
            self.context
                .ResolveSubresource(dst, 0, src, 0, dxgi_format(format));
        }
        Ok(())
    }

    fn create_vertex_buffer(
        &mut self,
        len_bytes: usize,
        _stride: u32,
        _pool: BufferPool,
    ) -> Result<VertexBufferId, DeviceError> {
        let buffer = self.create_buffer(len_bytes, D3D11_BIND_VERTEX_BUFFER)?;
        let id = self.alloc_id();
        self.vertex_buffers.insert(id, (buffer, len_bytes));
        Ok(VertexBufferId(id))
    }

    fn create_index_buffer(
        &mut self,
        len_bytes: usize,
        _pool: BufferPool,
    ) -> Result<IndexBufferId, DeviceError> {
        let buffer = self.create_buffer(len_bytes, D3D11_BIND_INDEX_BUFFER)?;
        let id = self.alloc_id();
        self.index_buffers.insert(id, (buffer, len_bytes));
        Ok(IndexBufferId(id))
    }

    fn destroy_vertex_buffer(&mut self, id: VertexBufferId) {
        self.vertex_buffers.remove(&id.0);
    }

    fn destroy_index_buffer(&mut self, id: IndexBufferId) {
        self.index_buffers.remove(&id.0);
    }

    fn write_vertex_buffer(&mut self, id: VertexBufferId, data: &[u8]) -> Result<(), DeviceError> {
        let (buffer, capacity) = self
            .vertex_buffers
            .get(&id.0)
            .cloned()
            .ok_or_else(|| DeviceError::Backend(format!("unknown vertex buffer {id:?}")))?;
        self.write_buffer(&buffer, capacity, data)
    }

    fn write_index_buffer(&mut self, id: IndexBufferId, data: &[u8]) -> Result<(), DeviceError> {
        let (buffer, capacity) = self
            .index_buffers
            .get(&id.0)
            .cloned()
            .ok_or_else(|| DeviceError::Backend(format!("unknown index buffer {id:?}")))?;
        self.write_buffer(&buffer, capacity, data)
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: width as f32,
            Height: height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        unsafe { self.context.RSSetViewports(Some(&[viewport])) };
    }

    fn set_transforms(
        &mut self,
        world: [[f32; 4]; 4],
        view: [[f32; 4]; 4],
        projection: [[f32; 4]; 4],
    ) {
        self.transforms = [world, view, projection];
    }

    fn clear(&mut self, color: u32) {
        if let Some((_, rtv)) = &self.back_buffer {
            let rgba = [
                ((color >> 16) & 0xFF) as f32 / 255.0,
                ((color >> 8) & 0xFF) as f32 / 255.0,
                (color & 0xFF) as f32 / 255.0,
                ((color >> 24) & 0xFF) as f32 / 255.0,
            ];
            unsafe {
                self.context
                    .OMSetRenderTargets(Some(&[Some(rtv.clone())]), None);
                self.context.ClearRenderTargetView(rtv, &rgba);
            }
        }
    }

    fn draw_indexed(&mut self, call: &DrawCall) -> Result<(), DeviceError> {
        let (vb, _) = self
            .vertex_buffers
            .get(&call.vertex_buffer.0)
            .ok_or_else(|| DeviceError::Backend("draw: unknown vertex buffer".into()))?;
        let (ib, _) = self
            .index_buffers
            .get(&call.index_buffer.0)
            .ok_or_else(|| DeviceError::Backend("draw: unknown index buffer".into()))?;

        let topology = match call.topology {
            Topology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
            Topology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        };
        let stride = call.vertex_stride;
        let offset = 0u32;
        unsafe {
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(vb.clone())),
                Some(&stride),
                Some(&offset),
            );
            self.context
                .IASetIndexBuffer(ib, DXGI_FORMAT_R32_UINT, 0);
            self.context.IASetPrimitiveTopology(topology);
            self.context.DrawIndexed(call.index_count, 0, 0);
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        // Offscreen composition: flush so the shared surface observes all
        // draws before the host framework samples it.
        unsafe { self.context.Flush() };
        match self.status() {
            DeviceStatus::Ok => Ok(()),
            _ => Err(DeviceError::Lost),
        }
    }
}

/// Factory creating D3D11 devices: hardware for the extended variant, WARP
/// for the legacy fallback.
pub struct Dx11Factory;

impl DeviceFactory for Dx11Factory {
    fn create(
        &self,
        variant: DeviceVariant,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn NativeDevice>, DeviceError> {
        Ok(Box::new(Dx11Device::new(variant, width, height)?))
    }
}
