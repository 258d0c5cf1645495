//! Common contract for geometry models drawn into a plot.

use plot_interop::{BufferPool, DeviceError, NativeDevice};

/// A geometry model streamed into device buffers and drawn each frame.
///
/// Models own their vertex/index buffers exclusively and rebuild them lazily:
/// `update_geometry` is cheap when nothing changed. Around a device reset the
/// service calls `release_device_resources` first and models recreate their
/// buffers on the next `update_geometry`.
pub trait SceneModel: Send {
    fn update_geometry(
        &mut self,
        device: &mut dyn NativeDevice,
        pool: BufferPool,
    ) -> Result<(), DeviceError>;

    fn draw(&mut self, device: &mut dyn NativeDevice) -> Result<(), DeviceError>;

    /// Destroy device-held buffers ahead of a reset.
    fn release_device_resources(&mut self, device: &mut dyn NativeDevice);

    /// Display resolution changed. Models whose layout depends on dpi
    /// override this.
    fn set_resolution(&mut self, dpi: u32) {
        let _ = dpi;
    }
}
