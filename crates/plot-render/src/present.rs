//! Adapter between the device service and the host framework's interop image.
//!
//! The host image is a retained-mode primitive with lock/unlock semantics and
//! a front buffer that can vanish at any time (lock screen, display mode
//! change, secure desktop). The adapter is a small state machine over that
//! availability: while available, render requests flow through a scoped lock
//! and a device health check; while unavailable, draws stop, the per-frame
//! tick subscription is dropped, and any pending device reset is performed
//! eagerly so rendering can restart the instant availability returns.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use plot_interop::{DeviceError, DeviceStatus, DeviceVariant, NativeDevice, SurfaceHandle};

use crate::service::{DeviceLease, DeviceService};

/// Interval at which hosts should call [`PresentationSurfaceAdapter::poll_front_buffer`].
pub const FRONT_BUFFER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The host framework's interop image primitive.
pub trait HostImage {
    /// Begin mutating the surface. Paired with [`HostImage::unlock`].
    fn lock(&mut self);

    fn unlock(&mut self);

    /// Bind the image to a native surface, or detach it with `None`.
    fn set_back_buffer(&mut self, handle: Option<SurfaceHandle>);

    /// Invalidate the given region after drawing.
    fn add_dirty_rect(&mut self, width: u32, height: u32);

    fn is_front_buffer_available(&self) -> bool;

    /// Discard and recreate the underlying image object, used when the front
    /// buffer is gone for good and a fresh image must be acquired.
    fn recreate(&mut self);
}

/// Per-frame composition tick source the adapter subscribes to while frames
/// are worth producing.
pub trait RenderTick {
    fn subscribe(&mut self);
    fn unsubscribe(&mut self);
}

/// Outcome of one render request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameResult {
    Rendered,
    /// Front buffer unavailable or device creation failed; nothing drawn.
    SkippedUnavailable,
    /// Device lost with no recovery this frame; retried on the next request.
    SkippedDeviceLost,
}

pub struct PresentationSurfaceAdapter {
    service: Arc<DeviceService>,
    /// Keeps the device alive while this surface exists.
    lease: Option<DeviceLease>,
    image: Box<dyn HostImage>,
    tick: Box<dyn RenderTick>,
    available: bool,
    /// The image must be rebound to the device's back buffer before the next
    /// frame (set after resets and availability transitions).
    rebind_pending: bool,
    surface_width: u32,
    surface_height: u32,
    init_failure: Option<String>,
}

impl PresentationSurfaceAdapter {
    /// Create the adapter and take a device lease.
    ///
    /// A device creation failure is a configuration error: it is recorded as
    /// a diagnostic string rather than propagated, and the adapter degrades
    /// to skipping every frame so the host can display the message.
    pub fn new(
        service: Arc<DeviceService>,
        image: Box<dyn HostImage>,
        mut tick: Box<dyn RenderTick>,
        width: u32,
        height: u32,
    ) -> Self {
        let (lease, init_failure) = match service.acquire(width, height) {
            Ok(lease) => (Some(lease), None),
            Err(e) => {
                warn!("device acquisition failed: {e}");
                (None, Some(e.to_string()))
            }
        };
        if lease.is_some() {
            tick.subscribe();
        }
        Self {
            service,
            lease,
            image,
            tick,
            available: true,
            rebind_pending: true,
            surface_width: width.max(1),
            surface_height: height.max(1),
            init_failure,
        }
    }

    /// Human-readable reason the adapter cannot render, if any.
    pub fn init_failure(&self) -> Option<&str> {
        self.init_failure.as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Set the target surface size in pixels.
    pub fn set_surface_size(&mut self, width: u32, height: u32) {
        self.surface_width = width.max(1);
        self.surface_height = height.max(1);
    }

    /// Render one frame through `draw`.
    ///
    /// Acquires the process-wide frame lock, locks the image, validates and
    /// repairs the device, draws, presents, marks the dirty region and
    /// unlocks. A lost device skips the frame; a reset failure aborts it and
    /// records a diagnostic. Present failures are swallowed here, the single
    /// site allowed to do so, since they recur until the next successful
    /// reset.
    pub fn render_frame<F>(&mut self, draw: F) -> Result<FrameResult, DeviceError>
    where
        F: FnOnce(&mut dyn NativeDevice) -> Result<(), DeviceError>,
    {
        if self.lease.is_none() || self.init_failure.is_some() || !self.available {
            return Ok(FrameResult::SkippedUnavailable);
        }

        let frame_guard = self.service.frame_lock();
        self.image.lock();
        let (width, height) = (self.surface_width, self.surface_height);

        let outcome = match self.service.ensure_ready(width, height) {
            Ok(outcome) => outcome,
            Err(DeviceError::Lost) => {
                debug!("device lost, skipping frame");
                self.image.unlock();
                return Ok(FrameResult::SkippedDeviceLost);
            }
            Err(e) => {
                self.init_failure = Some(e.to_string());
                self.image.unlock();
                return Err(e);
            }
        };

        if outcome.did_reset || self.rebind_pending {
            let handle = self.service.with_device(|d| d.back_buffer())?;
            self.image.set_back_buffer(Some(handle));
            self.rebind_pending = false;
        }

        let drawn = self.service.with_device(|device| {
            device.set_viewport(width, height);
            draw(device)
        });
        if let Err(e) = drawn.and_then(|r| r) {
            // Abort the frame; the next one revalidates from scratch.
            self.image.unlock();
            return Err(e);
        }

        if let Err(e) = self.service.with_device(|d| d.present()).and_then(|r| r) {
            debug!("present failed, expecting recovery on a later reset: {e}");
        }
        self.image.add_dirty_rect(width, height);
        self.image.unlock();
        drop(frame_guard);
        Ok(FrameResult::Rendered)
    }

    /// Front-buffer availability notification from the host.
    pub fn set_front_buffer_available(&mut self, available: bool) {
        if available == self.available {
            return;
        }
        self.available = available;
        if available {
            debug!("front buffer back, resuming rendering");
            self.rebind_pending = true;
            self.tick.subscribe();
            return;
        }

        debug!("front buffer unavailable, pausing rendering");
        self.tick.unsubscribe();
        if self.service.variant() == Some(DeviceVariant::Legacy) {
            // Legacy surfaces do not survive the outage; detach now.
            self.image.set_back_buffer(None);
            self.rebind_pending = true;
        }
        // Reset eagerly while paused so the surface is ready the moment
        // availability returns.
        let needs_reset = self
            .service
            .with_device(|d| d.status() == DeviceStatus::NotReset)
            .unwrap_or(false);
        if needs_reset {
            if let Err(e) = self
                .service
                .ensure_ready(self.surface_width, self.surface_height)
            {
                debug!("eager reset while unavailable failed: {e}");
            }
        }
    }

    /// Defensive poll, run every [`FRONT_BUFFER_POLL_INTERVAL`]. Covers the
    /// case where the availability-changed notification itself was missed:
    /// if the image reports an unavailable front buffer, force a full
    /// re-acquisition of the surface.
    pub fn poll_front_buffer(&mut self) {
        if self.image.is_front_buffer_available() {
            if !self.available {
                self.set_front_buffer_available(true);
            }
            return;
        }

        debug!("front buffer lost without notification, re-acquiring surface");
        if self.available {
            self.set_front_buffer_available(false);
        }
        self.image.recreate();
        self.rebind_pending = true;
        if self.image.is_front_buffer_available() {
            self.set_front_buffer_available(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use plot_interop::soft::{SoftDevice, SoftFactory};

    /// Host image recording every call, with scriptable availability.
    #[derive(Clone, Default)]
    struct MockImage {
        log: Arc<Mutex<Vec<String>>>,
        front_buffer_ok: Arc<Mutex<bool>>,
    }

    impl MockImage {
        fn new() -> Self {
            let image = Self::default();
            *image.front_buffer_ok.lock() = true;
            image
        }
    }

    impl HostImage for MockImage {
        fn lock(&mut self) {
            self.log.lock().push("lock".into());
        }

        fn unlock(&mut self) {
            self.log.lock().push("unlock".into());
        }

        fn set_back_buffer(&mut self, handle: Option<SurfaceHandle>) {
            let entry = match handle {
                Some(_) => "bind".into(),
                None => "detach".to_string(),
            };
            self.log.lock().push(entry);
        }

        fn add_dirty_rect(&mut self, _width: u32, _height: u32) {
            self.log.lock().push("dirty".into());
        }

        fn is_front_buffer_available(&self) -> bool {
            *self.front_buffer_ok.lock()
        }

        fn recreate(&mut self) {
            self.log.lock().push("recreate".into());
            *self.front_buffer_ok.lock() = true;
        }
    }

    #[derive(Clone, Default)]
    struct MockTick {
        subscribed: Arc<Mutex<bool>>,
    }

    impl RenderTick for MockTick {
        fn subscribe(&mut self) {
            *self.subscribed.lock() = true;
        }

        fn unsubscribe(&mut self) {
            *self.subscribed.lock() = false;
        }
    }

    fn adapter_with_mocks() -> (PresentationSurfaceAdapter, MockImage, MockTick) {
        let service = DeviceService::new(Box::new(SoftFactory::default()));
        let image = MockImage::new();
        let tick = MockTick::default();
        let adapter = PresentationSurfaceAdapter::new(
            service,
            Box::new(image.clone()),
            Box::new(tick.clone()),
            64,
            64,
        );
        (adapter, image, tick)
    }

    fn inject(adapter: &PresentationSurfaceAdapter, status: DeviceStatus) {
        adapter
            .service
            .with_device(|d| {
                d.as_any_mut()
                    .downcast_mut::<SoftDevice>()
                    .unwrap()
                    .inject_status(status)
            })
            .unwrap();
    }

    #[test]
    fn frame_locks_binds_draws_and_publishes_in_order() {
        let (mut adapter, image, tick) = adapter_with_mocks();
        assert!(*tick.subscribed.lock());

        let result = adapter.render_frame(|device| {
            device.clear(0xFFFF_FFFF);
            Ok(())
        });
        assert_eq!(result.unwrap(), FrameResult::Rendered);
        assert_eq!(*image.log.lock(), vec!["lock", "bind", "dirty", "unlock"]);

        // Second frame: back buffer already bound.
        image.log.lock().clear();
        adapter.render_frame(|_| Ok(())).unwrap();
        assert_eq!(*image.log.lock(), vec!["lock", "dirty", "unlock"]);
    }

    #[test]
    fn unavailable_front_buffer_stops_draws_and_unsubscribes() {
        let (mut adapter, image, tick) = adapter_with_mocks();
        adapter.set_front_buffer_available(false);
        assert!(!*tick.subscribed.lock());

        image.log.lock().clear();
        let result = adapter.render_frame(|_| Ok(()));
        assert_eq!(result.unwrap(), FrameResult::SkippedUnavailable);
        assert!(image.log.lock().is_empty());

        adapter.set_front_buffer_available(true);
        assert!(*tick.subscribed.lock());
        assert_eq!(adapter.render_frame(|_| Ok(())).unwrap(), FrameResult::Rendered);
    }

    #[test]
    fn pending_reset_is_performed_eagerly_while_unavailable() {
        let (mut adapter, _image, _tick) = adapter_with_mocks();
        adapter.render_frame(|_| Ok(())).unwrap();
        inject(&adapter, DeviceStatus::NotReset);

        adapter.set_front_buffer_available(false);
        let reset_count = adapter
            .service
            .with_device(|d| d.as_any().downcast_ref::<SoftDevice>().unwrap().reset_count)
            .unwrap();
        assert_eq!(reset_count, 1);
    }

    #[test]
    fn lost_device_skips_the_frame_without_publishing() {
        let (mut adapter, image, _tick) = adapter_with_mocks();
        inject(&adapter, DeviceStatus::Lost);
        image.log.lock().clear();
        let result = adapter.render_frame(|_| Ok(()));
        assert_eq!(result.unwrap(), FrameResult::SkippedDeviceLost);
        // Locked and unlocked, but never bound or marked dirty.
        assert_eq!(*image.log.lock(), vec!["lock", "unlock"]);
    }

    #[test]
    fn present_failure_is_swallowed() {
        let (mut adapter, _image, _tick) = adapter_with_mocks();
        adapter
            .service
            .with_device(|d| {
                d.as_any_mut()
                    .downcast_mut::<SoftDevice>()
                    .unwrap()
                    .fail_presents(1)
            })
            .unwrap();
        assert_eq!(adapter.render_frame(|_| Ok(())).unwrap(), FrameResult::Rendered);
    }

    #[test]
    fn poll_recovers_a_silently_lost_front_buffer() {
        let (mut adapter, image, tick) = adapter_with_mocks();
        adapter.render_frame(|_| Ok(())).unwrap();

        // The availability-changed notification is missed; only the image
        // knows the front buffer is gone.
        *image.front_buffer_ok.lock() = false;
        assert!(adapter.is_available());

        adapter.poll_front_buffer();
        assert!(image.log.lock().contains(&"recreate".to_string()));
        assert!(adapter.is_available());
        assert!(*tick.subscribed.lock());

        // The image was recreated, so the back buffer is rebound next frame.
        image.log.lock().clear();
        adapter.render_frame(|_| Ok(())).unwrap();
        assert_eq!(*image.log.lock(), vec!["lock", "bind", "dirty", "unlock"]);
    }

    #[test]
    fn failed_device_creation_degrades_to_a_diagnostic() {
        let service = DeviceService::new(Box::new(
            SoftFactory::default()
                .fail_variant(plot_interop::DeviceVariant::Extended)
                .fail_variant(plot_interop::DeviceVariant::Legacy),
        ));
        let mut adapter = PresentationSurfaceAdapter::new(
            service,
            Box::new(MockImage::new()),
            Box::new(MockTick::default()),
            64,
            64,
        );
        assert!(adapter.init_failure().is_some());
        assert_eq!(
            adapter.render_frame(|_| Ok(())).unwrap(),
            FrameResult::SkippedUnavailable
        );
    }
}
