//! D3D11 texture plumbing: shareable allocations and handle derivation.

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::IDXGIResource;

use tracing::error;

use crate::device::{SampleCount, SurfaceHandle, TextureDesc};
use crate::error::DeviceError;
use crate::format::PixelFormat;

/// Map an engine pixel format to its DXGI equivalent.
pub fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Bgra8 => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::Rgb10A2 => DXGI_FORMAT_R10G10B10A2_UNORM,
        PixelFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        PixelFormat::Rgba8 => DXGI_FORMAT_R8G8B8A8_UNORM,
    }
}

/// Create a render-target texture, optionally multisampled, optionally with
/// the cross-device SHARED flag.
pub(crate) fn create_texture_2d(
    device: &ID3D11Device,
    desc: &TextureDesc,
    quality: u32,
) -> Result<ID3D11Texture2D, DeviceError> {
    // Shared resources cannot be multisampled; the bridge resolves into the
    // shareable target before publishing.
    debug_assert!(!(desc.shareable && desc.samples != SampleCount::One));

    let native_desc = D3D11_TEXTURE2D_DESC {
        Width: desc.width,
        Height: desc.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: dxgi_format(desc.format),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: desc.samples.samples(),
            Quality: quality,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: if desc.shareable {
            D3D11_RESOURCE_MISC_SHARED.0 as u32
        } else {
            0
        },
    };

    let mut texture = None;
    unsafe { device.CreateTexture2D(&native_desc, None, Some(&mut texture as *mut _)) }.map_err(
        |e| {
            error!("CreateTexture2D {}x{} failed: {e}", desc.width, desc.height);
            DeviceError::Backend(format!("CreateTexture2D failed: {e}"))
        },
    )?;
    texture.ok_or_else(|| DeviceError::Backend("CreateTexture2D returned null".into()))
}

/// Derive the cross-device handle of a texture created with the SHARED flag.
pub(crate) fn shared_handle_of(texture: &ID3D11Texture2D) -> Result<SurfaceHandle, DeviceError> {
    let resource: IDXGIResource = texture
        .cast()
        .map_err(|e| DeviceError::Backend(format!("texture is not a DXGI resource: {e}")))?;
    let handle = unsafe { resource.GetSharedHandle() }
        .map_err(|e| DeviceError::Backend(format!("GetSharedHandle failed: {e}")))?;
    if handle.is_invalid() {
        return Err(DeviceError::NotShareable);
    }
    Ok(SurfaceHandle(handle.0 as u64))
}
