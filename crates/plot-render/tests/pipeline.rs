//! End-to-end frame pipeline against the software device: device creation,
//! surface allocation, geometry streaming, draw submission, resolve and
//! publish, plus recovery across a device reset.

use std::sync::Arc;

use anyhow::Result;
use glam::DVec3;
use parking_lot::Mutex;

use plot_interop::soft::{SoftDevice, SoftFactory};
use plot_interop::{DeviceStatus, NativeDevice, SampleCount, SurfaceHandle, Topology};
use plot_render::{
    DeviceService, FrameResult, HostImage, LineModel, LinePoint, PlotControl, RenderTick,
    SurfaceModel,
};

#[derive(Clone, Default)]
struct RecordingImage {
    bound: Arc<Mutex<Option<SurfaceHandle>>>,
    dirty_rects: Arc<Mutex<u32>>,
}

impl HostImage for RecordingImage {
    fn lock(&mut self) {}

    fn unlock(&mut self) {}

    fn set_back_buffer(&mut self, handle: Option<SurfaceHandle>) {
        *self.bound.lock() = handle;
    }

    fn add_dirty_rect(&mut self, _width: u32, _height: u32) {
        *self.dirty_rects.lock() += 1;
    }

    fn is_front_buffer_available(&self) -> bool {
        true
    }

    fn recreate(&mut self) {}
}

struct NullTick;

impl RenderTick for NullTick {
    fn subscribe(&mut self) {}
    fn unsubscribe(&mut self) {}
}

fn with_soft_device<R>(plot: &PlotControl, f: impl FnOnce(&mut SoftDevice) -> R) -> R {
    plot.service()
        .with_device(|d| f(d.as_any_mut().downcast_mut::<SoftDevice>().unwrap()))
        .unwrap()
}

fn populated_plot() -> Result<(PlotControl, RecordingImage)> {
    plot_render::init_logging();
    let service = DeviceService::new(Box::new(SoftFactory::default()));
    let image = RecordingImage::default();
    let mut plot = PlotControl::new(
        service,
        Box::new(image.clone()),
        Box::new(NullTick),
        100,
        100,
    );

    let surface = SurfaceModel::from_vectors(
        &[0.0, 1.0, 2.0],
        &[0.0, 1.0, 2.0],
        &[0.0, 1.0, 0.0, 1.0, 2.0, 1.0, 0.0, 1.0, 0.0],
        3,
        3,
    )?;
    plot.add_surface(surface);

    let line = plot.add_lines(LineModel::new());
    line.lock().set_points(vec![
        LinePoint::new(DVec3::new(0.0, 0.0, 0.0), 0xFF00_00FF),
        LinePoint::new(DVec3::new(1.0, 1.0, 1.0), 0xFF00_00FF),
        LinePoint::new(DVec3::new(2.0, 0.0, 1.0), 0xFF00_00FF),
        LinePoint::new(DVec3::new(2.0, 2.0, 2.0), 0xFF00_00FF),
    ]);
    Ok((plot, image))
}

#[test]
fn frame_streams_geometry_and_publishes() -> Result<()> {
    let (mut plot, image) = populated_plot()?;

    assert_eq!(plot.render()?, FrameResult::Rendered);
    assert!(image.bound.lock().is_some());
    assert_eq!(*image.dirty_rects.lock(), 1);

    with_soft_device(&plot, |device| {
        // One surface pass and one line pass.
        assert_eq!(device.draws().len(), 2);
        assert_eq!(device.draws()[0].call.topology, Topology::TriangleList);
        assert_eq!(device.draws()[1].call.topology, Topology::LineList);
        assert_eq!(device.present_count, 1);
        // Multisampled draw target plus the shareable resolve target.
        assert_eq!(device.texture_count(), 2);
    });

    // The bridge allocated with slack and negotiated multisampling.
    let bridge = plot.bridge().lock();
    let (w, h) = bridge.allocated_size();
    assert!(w >= 100 && h >= 100);
    drop(bridge);
    assert_eq!(plot.service().sample_count(), SampleCount::Eight);
    Ok(())
}

#[test]
fn steady_state_frames_do_not_reallocate_buffers() -> Result<()> {
    let (mut plot, _image) = populated_plot()?;
    plot.render()?;

    let snapshot = with_soft_device(&plot, |device| {
        let ids: Vec<_> = device
            .draws()
            .iter()
            .map(|d| (d.call.vertex_buffer, d.call.index_buffer))
            .collect();
        device.clear_draws();
        ids
    });

    plot.request_render();
    plot.render()?;
    with_soft_device(&plot, |device| {
        let after: Vec<_> = device
            .draws()
            .iter()
            .map(|d| (d.call.vertex_buffer, d.call.index_buffer))
            .collect();
        assert_eq!(snapshot, after);
    });
    Ok(())
}

#[test]
fn device_reset_releases_and_recreates_every_dependent() -> Result<()> {
    let (mut plot, _image) = populated_plot()?;
    plot.render()?;

    let before = with_soft_device(&plot, |device| {
        device.clear_draws();
        device.inject_status(DeviceStatus::NotReset);
        device.reset_count
    });
    assert_eq!(before, 0);

    plot.request_render();
    assert_eq!(plot.render()?, FrameResult::Rendered);

    with_soft_device(&plot, |device| {
        assert_eq!(device.reset_count, 1);
        // Geometry was re-streamed and drawn after the reset.
        assert_eq!(device.draws().len(), 2);
        // Old bridge textures were released; exactly one fresh pair exists.
        assert_eq!(device.texture_count(), 2);
    });
    Ok(())
}

#[test]
fn lost_device_skips_frames_until_it_recovers() -> Result<()> {
    let (mut plot, image) = populated_plot()?;
    plot.render()?;
    assert_eq!(*image.dirty_rects.lock(), 1);

    with_soft_device(&plot, |device| device.inject_status(DeviceStatus::Lost));
    plot.request_render();
    assert_eq!(plot.render()?, FrameResult::SkippedDeviceLost);
    assert_eq!(*image.dirty_rects.lock(), 1);

    // OS-level recovery flips the device back to needing a reset.
    with_soft_device(&plot, |device| device.inject_status(DeviceStatus::NotReset));
    assert_eq!(plot.render()?, FrameResult::Rendered);
    assert_eq!(*image.dirty_rects.lock(), 2);
    Ok(())
}

#[test]
fn growing_the_control_grows_device_and_bridge() -> Result<()> {
    let (mut plot, _image) = populated_plot()?;
    plot.render()?;
    let (w0, h0) = plot.bridge().lock().allocated_size();

    plot.set_size(300.0, 200.0);
    plot.render()?;

    let (w1, h1) = plot.bridge().lock().allocated_size();
    assert!(w1 > w0 && h1 > h0);
    assert!(w1 >= 300 && h1 >= 200);
    with_soft_device(&plot, |device| {
        let (dw, dh) = device.dimensions();
        assert!(dw >= 300 && dh >= 200);
    });
    Ok(())
}
