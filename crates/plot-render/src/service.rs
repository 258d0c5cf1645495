//! Reference-counted ownership of the native device and its reset protocol.
//!
//! One [`DeviceService`] exists per device-API generation in the process; every
//! plot control holds a [`DeviceLease`] on it. The first lease creates the
//! device (extended variant first, legacy fallback) and performs the one-time
//! multisample negotiation; the last lease dropped destroys the device.
//!
//! The reset protocol runs in two ordered passes over the registered lifecycle
//! listeners: every listener releases its device-dependent resources before
//! the reset call, and recreation only begins after the reset has returned
//! successfully. Listeners run in registration order in both passes.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error};

use plot_interop::{
    BufferPool, DeviceError, DeviceFactory, DeviceStatus, DeviceVariant, NativeDevice, PixelFormat,
    SampleCount,
};

/// Phase of the device reset protocol delivered to lifecycle listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The device is about to reset. Release device-dependent resources now.
    Resetting,
    /// The reset completed. Device-dependent resources may be recreated.
    Reset,
}

/// Callback registered with [`DeviceService::register_lifecycle`].
pub type LifecycleCallback = Box<dyn FnMut(LifecycleEvent, &mut dyn NativeDevice) + Send>;

/// Buffer pool matching a device variant. The extended variant keeps default-
/// pool buffers across resets; the legacy variant needs the managed pool so
/// buffer contents survive.
pub fn pool_for(variant: DeviceVariant) -> BufferPool {
    match variant {
        DeviceVariant::Extended => BufferPool::Default,
        DeviceVariant::Legacy => BufferPool::Managed,
    }
}

/// What [`DeviceService::ensure_ready`] did to the device this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOutcome {
    /// A reset ran; dependents that bypass the lifecycle listeners must
    /// rebind native handles.
    pub did_reset: bool,
    pub width: u32,
    pub height: u32,
}

struct ServiceState {
    device: Option<Box<dyn NativeDevice>>,
    samples: SampleCount,
    quality: u32,
    antialiased: bool,
    listeners: Vec<(u64, LifecycleCallback)>,
    next_listener_id: u64,
    leases: usize,
}

/// Shared owner of the native device. Construct once, share via `Arc`.
pub struct DeviceService {
    factory: Box<dyn DeviceFactory>,
    /// Process-wide frame lock: serializes "lock surface, validate device,
    /// draw, publish" so a timer-driven redraw cannot interleave with a
    /// composition-driven one mid-frame.
    frame_lock: Mutex<()>,
    state: Mutex<ServiceState>,
}

impl DeviceService {
    pub fn new(factory: Box<dyn DeviceFactory>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            frame_lock: Mutex::new(()),
            state: Mutex::new(ServiceState {
                device: None,
                samples: SampleCount::One,
                quality: 0,
                antialiased: false,
                listeners: Vec::new(),
                next_listener_id: 1,
                leases: 0,
            }),
        })
    }

    /// Service backed by the best native backend for this platform.
    pub fn with_platform_factory() -> Arc<Self> {
        Self::new(plot_interop::platform_factory())
    }

    /// Take a lease on the device, creating it on the first acquisition.
    ///
    /// Creation tries the extended variant first and falls back to the legacy
    /// variant; if neither can be created this is a configuration failure and
    /// [`DeviceError::NoCompatibleDevice`] is returned. Multisampling is
    /// negotiated once per device creation: probe 8 samples, then 4, else
    /// render without multisampling.
    pub fn acquire(
        self: &Arc<Self>,
        width: u32,
        height: u32,
    ) -> Result<DeviceLease, DeviceError> {
        let mut state = self.state.lock();
        if state.device.is_none() {
            let device = match self.factory.create(DeviceVariant::Extended, width, height) {
                Ok(device) => device,
                Err(e) => {
                    debug!("extended device unavailable ({e}), trying legacy variant");
                    self.factory
                        .create(DeviceVariant::Legacy, width, height)
                        .map_err(|e| {
                            error!("no compatible device variant: {e}");
                            DeviceError::NoCompatibleDevice
                        })?
                }
            };

            let (samples, quality) = negotiate_multisampling(device.as_ref());
            state.samples = samples;
            state.quality = quality;
            state.antialiased = samples != SampleCount::One;
            debug!(
                variant = ?device.variant(),
                ?samples,
                quality,
                "device created"
            );
            state.device = Some(device);
        }
        state.leases += 1;
        Ok(DeviceLease {
            service: Arc::clone(self),
        })
    }

    /// Run a closure against the device. Fails if no lease has created one.
    pub fn with_device<R>(
        &self,
        f: impl FnOnce(&mut dyn NativeDevice) -> R,
    ) -> Result<R, DeviceError> {
        let mut state = self.state.lock();
        let device = state
            .device
            .as_deref_mut()
            .ok_or_else(|| DeviceError::Validation("no device acquired".into()))?;
        Ok(f(device))
    }

    /// Validate device health and back-buffer size before drawing.
    ///
    /// A lost device fails with [`DeviceError::Lost`]; the caller skips the
    /// frame and re-evaluates next time. A recoverable loss, a viewport larger
    /// than the back buffer, or a viewport shrunk below 90% of it triggers the
    /// two-pass reset protocol. Growth pads the new size by 10% to amortize
    /// repeated reallocation during interactive resizing.
    pub fn ensure_ready(
        &self,
        requested_width: u32,
        requested_height: u32,
    ) -> Result<ResetOutcome, DeviceError> {
        let state = &mut *self.state.lock();
        let device = state
            .device
            .as_deref_mut()
            .ok_or_else(|| DeviceError::Validation("no device acquired".into()))?;

        let mut needs_reset = match device.status() {
            DeviceStatus::Ok => false,
            DeviceStatus::NotReset => true,
            DeviceStatus::Lost => return Err(DeviceError::Lost),
        };

        let (current_width, current_height) = device.dimensions();
        let (new_width, grew_w) = resize_axis(current_width, requested_width);
        let (new_height, grew_h) = resize_axis(current_height, requested_height);
        needs_reset |= grew_w || grew_h;

        if !needs_reset {
            return Ok(ResetOutcome {
                did_reset: false,
                width: current_width,
                height: current_height,
            });
        }

        debug!(new_width, new_height, "resetting device");
        for (_, listener) in state.listeners.iter_mut() {
            listener(LifecycleEvent::Resetting, &mut *device);
        }
        device.reset(new_width, new_height).map_err(|e| {
            error!("device reset failed: {e}");
            e
        })?;
        for (_, listener) in state.listeners.iter_mut() {
            listener(LifecycleEvent::Reset, &mut *device);
        }

        Ok(ResetOutcome {
            did_reset: true,
            width: new_width,
            height: new_height,
        })
    }

    /// Register a resource-lifecycle listener. Listeners are invoked in
    /// registration order during each reset; dropping the returned token
    /// unregisters.
    pub fn register_lifecycle(self: &Arc<Self>, callback: LifecycleCallback) -> LifecycleToken {
        let mut state = self.state.lock();
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.push((id, callback));
        LifecycleToken {
            service: Arc::clone(self),
            id,
        }
    }

    /// Hold for the duration of one frame. See the field documentation.
    pub fn frame_lock(&self) -> MutexGuard<'_, ()> {
        self.frame_lock.lock()
    }

    pub fn variant(&self) -> Option<DeviceVariant> {
        self.state.lock().device.as_ref().map(|d| d.variant())
    }

    /// Negotiated multisample count, fixed for the device's lifetime.
    pub fn sample_count(&self) -> SampleCount {
        self.state.lock().samples
    }

    pub fn sample_quality(&self) -> u32 {
        self.state.lock().quality
    }

    pub fn is_antialiased(&self) -> bool {
        self.state.lock().antialiased
    }

    /// Current back-buffer dimensions, if a device exists.
    pub fn back_buffer_size(&self) -> Option<(u32, u32)> {
        self.state.lock().device.as_ref().map(|d| d.dimensions())
    }

    /// Buffer pool dependents should allocate from, per the device variant.
    pub fn buffer_pool(&self) -> BufferPool {
        match self.variant() {
            Some(variant) => pool_for(variant),
            None => BufferPool::Default,
        }
    }

    #[cfg(test)]
    fn lease_count(&self) -> usize {
        self.state.lock().leases
    }
}

/// Probe 8-sample support, then 4, else none. Quality is the highest level
/// the driver reports for the chosen count.
fn negotiate_multisampling(device: &dyn NativeDevice) -> (SampleCount, u32) {
    for samples in [SampleCount::Eight, SampleCount::Four] {
        if let Some(levels) = device.check_multisample(PixelFormat::Bgra8, samples) {
            if levels > 0 {
                return (samples, levels - 1);
            }
        }
    }
    (SampleCount::One, 0)
}

/// Per-axis resize decision: grow whenever the request exceeds the current
/// allocation, shrink only when it falls below 90% of it. Both directions pad
/// the new size by 10%.
fn resize_axis(current: u32, requested: u32) -> (u32, bool) {
    if requested > current {
        (padded(requested.max(current)), true)
    } else if requested < current * 9 / 10 {
        (padded(requested), true)
    } else {
        (current, false)
    }
}

fn padded(size: u32) -> u32 {
    ((f64::from(size) * 1.1).ceil() as u32).max(1)
}

/// Shared-ownership handle on the device. Dropping the last lease destroys
/// the underlying native device.
pub struct DeviceLease {
    service: Arc<DeviceService>,
}

impl DeviceLease {
    pub fn service(&self) -> &Arc<DeviceService> {
        &self.service
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        let mut state = self.service.state.lock();
        state.leases -= 1;
        if state.leases == 0 {
            debug!("last lease released, destroying device");
            state.device = None;
        }
    }
}

/// Unregisters its lifecycle listener on drop.
pub struct LifecycleToken {
    service: Arc<DeviceService>,
    id: u64,
}

impl Drop for LifecycleToken {
    fn drop(&mut self) {
        let mut state = self.service.state.lock();
        let id = self.id;
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plot_interop::soft::{SoftDevice, SoftFactory};

    /// Factory producing software devices with a restricted multisample table.
    struct RestrictedFactory(Vec<(SampleCount, u32)>);

    impl DeviceFactory for RestrictedFactory {
        fn create(
            &self,
            variant: DeviceVariant,
            width: u32,
            height: u32,
        ) -> Result<Box<dyn NativeDevice>, DeviceError> {
            let mut device = SoftDevice::new(variant, width, height);
            device.set_multisample_support(&self.0);
            Ok(Box::new(device))
        }
    }

    fn soft_service() -> Arc<DeviceService> {
        DeviceService::new(Box::new(SoftFactory::default()))
    }

    fn inject(service: &DeviceService, status: DeviceStatus) {
        service
            .with_device(|d| {
                d.as_any_mut()
                    .downcast_mut::<SoftDevice>()
                    .unwrap()
                    .inject_status(status)
            })
            .unwrap();
    }

    #[test]
    fn extended_variant_preferred_with_legacy_fallback() {
        let service = soft_service();
        let _lease = service.acquire(64, 64).unwrap();
        assert_eq!(service.variant(), Some(DeviceVariant::Extended));

        let fallback = DeviceService::new(Box::new(
            SoftFactory::default().fail_variant(DeviceVariant::Extended),
        ));
        let _lease = fallback.acquire(64, 64).unwrap();
        assert_eq!(fallback.variant(), Some(DeviceVariant::Legacy));
        assert_eq!(fallback.buffer_pool(), BufferPool::Managed);
    }

    #[test]
    fn no_variant_at_all_is_a_configuration_error() {
        let service = DeviceService::new(Box::new(
            SoftFactory::default()
                .fail_variant(DeviceVariant::Extended)
                .fail_variant(DeviceVariant::Legacy),
        ));
        assert!(matches!(
            service.acquire(64, 64),
            Err(DeviceError::NoCompatibleDevice)
        ));
    }

    #[test]
    fn multisample_negotiation_probes_eight_then_four_then_none() {
        let eight = DeviceService::new(Box::new(RestrictedFactory(vec![
            (SampleCount::Eight, 4),
            (SampleCount::Four, 4),
        ])));
        let _lease = eight.acquire(8, 8).unwrap();
        assert_eq!(eight.sample_count(), SampleCount::Eight);
        assert_eq!(eight.sample_quality(), 3);
        assert!(eight.is_antialiased());

        let four = DeviceService::new(Box::new(RestrictedFactory(vec![(SampleCount::Four, 1)])));
        let _lease = four.acquire(8, 8).unwrap();
        assert_eq!(four.sample_count(), SampleCount::Four);
        assert_eq!(four.sample_quality(), 0);

        let none = DeviceService::new(Box::new(RestrictedFactory(vec![])));
        let _lease = none.acquire(8, 8).unwrap();
        assert_eq!(none.sample_count(), SampleCount::One);
        assert!(!none.is_antialiased());
    }

    #[test]
    fn last_lease_destroys_the_device() {
        let service = soft_service();
        let first = service.acquire(32, 32).unwrap();
        let second = service.acquire(32, 32).unwrap();
        assert_eq!(service.lease_count(), 2);
        drop(first);
        assert!(service.variant().is_some());
        drop(second);
        assert!(service.variant().is_none());
        assert!(service.with_device(|_| ()).is_err());
    }

    #[test]
    fn ensure_ready_grows_with_slack_and_ignores_smaller_requests() {
        let service = soft_service();
        let _lease = service.acquire(100, 100).unwrap();

        let outcome = service.ensure_ready(120, 100).unwrap();
        assert!(outcome.did_reset);
        assert_eq!(outcome.width, 132); // ceil(120 * 1.1)
        assert_eq!(outcome.height, 100);

        // Within the allocation and above the 90% shrink threshold: no-op.
        let outcome = service.ensure_ready(125, 100).unwrap();
        assert!(!outcome.did_reset);
        assert_eq!((outcome.width, outcome.height), (132, 100));
    }

    #[test]
    fn ensure_ready_shrinks_below_ninety_percent() {
        let service = soft_service();
        let _lease = service.acquire(200, 200).unwrap();
        let outcome = service.ensure_ready(50, 50).unwrap();
        assert!(outcome.did_reset);
        assert_eq!((outcome.width, outcome.height), (55, 55));
    }

    #[test]
    fn lost_device_skips_the_frame() {
        let service = soft_service();
        let _lease = service.acquire(64, 64).unwrap();
        inject(&service, DeviceStatus::Lost);
        assert!(matches!(
            service.ensure_ready(64, 64),
            Err(DeviceError::Lost)
        ));
    }

    #[test]
    fn reset_runs_release_then_reset_then_recreate_in_registration_order() {
        let service = soft_service();
        let _lease = service.acquire(64, 64).unwrap();

        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut tokens = Vec::new();
        for name in ["a", "b"] {
            let log = Arc::clone(&log);
            tokens.push(service.register_lifecycle(Box::new(move |event, device| {
                let soft = device.as_any_mut().downcast_mut::<SoftDevice>().unwrap();
                let phase = match event {
                    LifecycleEvent::Resetting => {
                        // The reset must not have happened yet.
                        assert_eq!(soft.reset_count, 0);
                        "release"
                    }
                    LifecycleEvent::Reset => {
                        assert_eq!(soft.reset_count, 1);
                        "recreate"
                    }
                };
                log.lock().push(format!("{name}-{phase}"));
            })));
        }

        inject(&service, DeviceStatus::NotReset);
        let outcome = service.ensure_ready(64, 64).unwrap();
        assert!(outcome.did_reset);
        assert_eq!(
            *log.lock(),
            vec!["a-release", "b-release", "a-recreate", "b-recreate"]
        );
    }

    #[test]
    fn dropped_lifecycle_token_unregisters() {
        let service = soft_service();
        let _lease = service.acquire(64, 64).unwrap();
        let fired = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&fired);
        let token = service.register_lifecycle(Box::new(move |_, _| *counter.lock() += 1));
        drop(token);
        inject(&service, DeviceStatus::NotReset);
        service.ensure_ready(64, 64).unwrap();
        assert_eq!(*fired.lock(), 0);
    }
}
