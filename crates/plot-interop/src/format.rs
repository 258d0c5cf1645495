//! Pixel formats and the fixed cross-generation translation table.
//!
//! The shareable surface is allocated by the newer device generation and
//! opened by the presentation layer's older one, so only formats both sides
//! understand may be bridged. The mapping is a fixed table; anything outside
//! it is a configuration error.

use crate::error::DeviceError;

/// Pixel formats the engine allocates render targets in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit BGRA, the default presentation format.
    Bgra8,
    /// 10 bits per colour channel, 2-bit alpha.
    Rgb10A2,
    /// Half-float RGBA, for high-dynamic-range intermediates.
    Rgba16Float,
    /// 8-bit RGBA. Allocatable for offscreen work but not bridgeable.
    Rgba8,
}

/// Presentation-generation format identifiers, as understood by the host
/// framework's interop image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyFormat {
    A8R8G8B8,
    A2B10G10R10,
    A16B16G16R16F,
}

impl PixelFormat {
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgb10A2 | PixelFormat::Rgba8 => 32,
            PixelFormat::Rgba16Float => 64,
        }
    }

    /// Translate to the equivalent presentation-generation format.
    ///
    /// Returns [`DeviceError::UnmappedFormat`] for formats with no entry in
    /// the table; the caller treats this as a configuration error.
    pub fn translate(self) -> Result<LegacyFormat, DeviceError> {
        match self {
            PixelFormat::Bgra8 => Ok(LegacyFormat::A8R8G8B8),
            PixelFormat::Rgb10A2 => Ok(LegacyFormat::A2B10G10R10),
            PixelFormat::Rgba16Float => Ok(LegacyFormat::A16B16G16R16F),
            PixelFormat::Rgba8 => Err(DeviceError::UnmappedFormat(self)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridgeable_formats_translate() {
        assert_eq!(PixelFormat::Bgra8.translate().unwrap(), LegacyFormat::A8R8G8B8);
        assert_eq!(
            PixelFormat::Rgb10A2.translate().unwrap(),
            LegacyFormat::A2B10G10R10
        );
        assert_eq!(
            PixelFormat::Rgba16Float.translate().unwrap(),
            LegacyFormat::A16B16G16R16F
        );
    }

    #[test]
    fn unmapped_format_is_configuration_error() {
        let err = PixelFormat::Rgba8.translate().unwrap_err();
        assert!(err.is_configuration());
    }
}
