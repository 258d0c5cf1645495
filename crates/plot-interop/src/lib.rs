//! Native 3D device abstraction for the plotting engine.
//!
//! This crate defines the [`NativeDevice`] trait, the common interface over
//! which the device service, surface bridge and geometry streamers drive an
//! immediate-mode 3D API. Two backends exist: a portable software reference
//! device (always compiled; used by tests and headless hosts) and a Direct3D
//! 11 device on Windows.

pub mod device;
pub mod error;
pub mod format;

pub use device::{
    BufferPool, CullMode, DeviceFactory, DeviceStatus, DeviceVariant, DrawCall, FillMode,
    IndexBufferId, NativeDevice, RenderStates, SampleCount, SurfaceHandle, TextureDesc, TextureId,
    Topology, VertexBufferId,
};
pub use error::DeviceError;
pub use format::PixelFormat;

// Platform-specific implementations.

pub mod soft;

#[cfg(target_os = "windows")]
pub mod dx11;

/// Factory for the best backend available on this platform.
///
/// On Windows this creates D3D11 devices (hardware for the extended variant,
/// WARP for the legacy fallback). Elsewhere it creates software reference
/// devices.
pub fn platform_factory() -> Box<dyn DeviceFactory> {
    #[cfg(target_os = "windows")]
    {
        Box::new(dx11::Dx11Factory)
    }
    #[cfg(not(target_os = "windows"))]
    {
        Box::new(soft::SoftFactory::default())
    }
}
