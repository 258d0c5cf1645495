//! Shareable offscreen render target bridged to the host presentation layer.
//!
//! Frames are drawn into a multisampled offscreen texture and resolved into a
//! non-multisampled texture carrying the cross-API sharing flag; the host
//! opens the latter on its own device generation via the shared handle.
//! When the device renders without multisampling the two targets collapse
//! into one shareable texture and resolving is a no-op.

use tracing::debug;

use plot_interop::format::LegacyFormat;
use plot_interop::{
    DeviceError, NativeDevice, PixelFormat, SampleCount, SurfaceHandle, TextureDesc, TextureId,
};

/// Grow-only pair of render targets shared with the host framework.
pub struct SharedSurfaceBridge {
    format: PixelFormat,
    samples: SampleCount,
    quality: u32,
    width: u32,
    height: u32,
    /// Multisampled draw target. `None` when `samples == One`.
    offscreen: Option<TextureId>,
    /// Non-multisampled shareable resolve target.
    shareable: Option<TextureId>,
}

impl SharedSurfaceBridge {
    pub fn new(format: PixelFormat, samples: SampleCount, quality: u32) -> Self {
        Self {
            format,
            samples,
            quality,
            width: 0,
            height: 0,
            offscreen: None,
            shareable: None,
        }
    }

    /// Ensure the targets cover `width` x `height`.
    ///
    /// Idempotent and grow-only: a request that fits the current allocation
    /// is a no-op and returns `false`. Otherwise the old textures are
    /// released and new ones allocated at `max(requested, current) * 1.1`;
    /// returns `true` so the caller republishes handles.
    pub fn resize(
        &mut self,
        device: &mut dyn NativeDevice,
        width: u32,
        height: u32,
    ) -> Result<bool, DeviceError> {
        if self.shareable.is_some() && width <= self.width && height <= self.height {
            return Ok(false);
        }
        self.release(device);

        let padded = |requested: u32, current: u32| {
            ((f64::from(requested.max(current)) * 1.1).ceil() as u32).max(1)
        };
        self.width = padded(width, self.width);
        self.height = padded(height, self.height);
        debug!(
            width = self.width,
            height = self.height,
            samples = self.samples.samples(),
            "allocating shared surface"
        );

        if self.samples != SampleCount::One {
            self.offscreen = Some(device.create_texture(&TextureDesc {
                width: self.width,
                height: self.height,
                format: self.format,
                samples: self.samples,
                shareable: false,
            })?);
        }
        self.shareable = Some(device.create_texture(&TextureDesc {
            width: self.width,
            height: self.height,
            format: self.format,
            samples: SampleCount::One,
            shareable: true,
        })?);
        Ok(true)
    }

    /// The texture draw calls should target, also usable for mixed retained
    /// 2D drawing.
    pub fn draw_target(&self) -> Option<TextureId> {
        self.offscreen.or(self.shareable)
    }

    /// The non-multisampled shareable texture the host binds to.
    pub fn resolve_target(&self) -> Option<TextureId> {
        self.shareable
    }

    /// Cross-API handle of the shareable texture.
    pub fn shared_handle(&self, device: &dyn NativeDevice) -> Result<SurfaceHandle, DeviceError> {
        let id = self
            .shareable
            .ok_or_else(|| DeviceError::Validation("bridge has no allocation".into()))?;
        device.shared_handle(id)
    }

    /// Resolve the multisampled draw target into the shareable texture.
    /// Call after drawing, before the host samples the surface.
    pub fn resolve(&self, device: &mut dyn NativeDevice) -> Result<(), DeviceError> {
        match (self.offscreen, self.shareable) {
            (Some(src), Some(dst)) => device.resolve(src, dst, self.format),
            _ => Ok(()),
        }
    }

    /// The format a legacy-generation device opens the surface as.
    pub fn legacy_format(&self) -> Result<LegacyFormat, DeviceError> {
        self.format.translate()
    }

    pub fn allocated_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn sample_quality(&self) -> u32 {
        self.quality
    }

    /// Destroy both textures, e.g. ahead of a device reset. The next
    /// `resize` call reallocates.
    pub fn release(&mut self, device: &mut dyn NativeDevice) {
        if let Some(id) = self.offscreen.take() {
            device.destroy_texture(id);
        }
        if let Some(id) = self.shareable.take() {
            device.destroy_texture(id);
        }
        self.width = 0;
        self.height = 0;
    }
}
