//! Device error taxonomy.
//!
//! Three broad classes, handled differently by the engine:
//!
//! - Configuration errors ([`DeviceError::NoCompatibleDevice`],
//!   [`DeviceError::NotShareable`], [`DeviceError::UnmappedFormat`]) are fatal
//!   to the affected control and reported once, never retried.
//! - [`DeviceError::NeedsReset`] is transient and recovered automatically by
//!   the device service's reset protocol.
//! - [`DeviceError::Lost`] aborts the current frame only; the next frame
//!   re-evaluates device health from scratch.

use thiserror::Error;

use crate::format::PixelFormat;

/// Errors surfaced by a [`NativeDevice`](crate::NativeDevice) or by the
/// lifecycle layers built on top of it.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device variant (extended or legacy) could be created.
    #[error("no compatible 3D device could be created")]
    NoCompatibleDevice,

    /// A texture without the cross-API sharing flag was passed to a bridge
    /// operation. This is a caller bug, not a runtime condition.
    #[error("texture was not allocated as shareable")]
    NotShareable,

    /// A pixel format with no cross-generation translation entry.
    #[error("pixel format {0:?} has no cross-device translation")]
    UnmappedFormat(PixelFormat),

    /// The device needs a reset before further rendering. Recoverable.
    #[error("device needs reset")]
    NeedsReset,

    /// The device is lost and cannot be recovered this frame.
    #[error("device lost")]
    Lost,

    /// A reset attempt failed. Carries a human-readable diagnostic that is
    /// propagated up the render call chain for display.
    #[error("device reset failed: {0}")]
    ResetFailed(String),

    /// Input rejected before any GPU resource was touched.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Backend-specific failure with no recovery policy of its own.
    #[error("native device failure: {0}")]
    Backend(String),
}

impl DeviceError {
    /// True for errors that are fatal to the affected control and must not be
    /// retried (as opposed to transient or per-frame conditions).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DeviceError::NoCompatibleDevice
                | DeviceError::NotShareable
                | DeviceError::UnmappedFormat(_)
        )
    }
}
