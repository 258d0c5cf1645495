//! Host-visible plot control: wires the device service, surface bridge,
//! presentation adapter and geometry models into one render pipeline.
//!
//! The host calls `request_render` from property changes and drives
//! `render` from its composition tick. Every property setter is a
//! pass-through trigger into the owning component; the control itself keeps
//! no geometry state.

use std::sync::Arc;

use glam::{DMat4, Mat4, Vec3};
use parking_lot::Mutex;
use tracing::debug;

use plot_interop::{DeviceError, PixelFormat};

use crate::bridge::SharedSurfaceBridge;
use crate::lines::LineModel;
use crate::model::SceneModel;
use crate::present::{FrameResult, HostImage, PresentationSurfaceAdapter, RenderTick};
use crate::service::{pool_for, DeviceService, LifecycleEvent, LifecycleToken};
use crate::surface::{MeshLines, SurfaceModel, SurfaceShading};

/// Projection mode of the plot camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { fov_y_radians: f32 },
    Orthographic { height: f32 },
}

/// Right-handed look-at camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(3.0, 3.0, 2.0),
            target: Vec3::ZERO,
            up: Vec3::Z,
            projection: Projection::Perspective {
                fov_y_radians: std::f32::consts::FRAC_PI_4,
            },
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov_y_radians } => {
                Mat4::perspective_rh(fov_y_radians, aspect, self.near, self.far)
            }
            Projection::Orthographic { height } => {
                let half_h = height / 2.0;
                let half_w = half_h * aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        }
    }
}

struct RegisteredModel {
    model: Arc<Mutex<dyn SceneModel>>,
    _lifecycle: LifecycleToken,
}

/// A plot rendered through the shared-surface pipeline.
pub struct PlotControl {
    service: Arc<DeviceService>,
    adapter: PresentationSurfaceAdapter,
    bridge: Arc<Mutex<SharedSurfaceBridge>>,
    _bridge_lifecycle: LifecycleToken,
    models: Vec<RegisteredModel>,
    lines: Vec<Arc<Mutex<LineModel>>>,
    surfaces: Vec<Arc<Mutex<SurfaceModel>>>,
    pub camera: Camera,
    dpi: u32,
    width: u32,
    height: u32,
    background: u32,
    render_requested: bool,
}

impl PlotControl {
    pub fn new(
        service: Arc<DeviceService>,
        image: Box<dyn HostImage>,
        tick: Box<dyn RenderTick>,
        width: u32,
        height: u32,
    ) -> Self {
        let adapter =
            PresentationSurfaceAdapter::new(Arc::clone(&service), image, tick, width, height);
        let bridge = Arc::new(Mutex::new(SharedSurfaceBridge::new(
            PixelFormat::Bgra8,
            service.sample_count(),
            service.sample_quality(),
        )));
        // The bridge's textures die with the device; release before each
        // reset and reallocate lazily on the next frame.
        let listener = Arc::clone(&bridge);
        let bridge_lifecycle = service.register_lifecycle(Box::new(move |event, device| {
            if event == LifecycleEvent::Resetting {
                listener.lock().release(device);
            }
        }));
        Self {
            service,
            adapter,
            bridge,
            _bridge_lifecycle: bridge_lifecycle,
            models: Vec::new(),
            lines: Vec::new(),
            surfaces: Vec::new(),
            camera: Camera::default(),
            dpi: crate::lines::REFERENCE_DPI,
            width: width.max(1),
            height: height.max(1),
            background: 0xFFFF_FFFF,
            render_requested: true,
        }
    }

    /// Diagnostic message to display instead of plot content, if device
    /// creation or reset failed.
    pub fn diagnostic(&self) -> Option<&str> {
        self.adapter.init_failure()
    }

    pub fn adapter_mut(&mut self) -> &mut PresentationSurfaceAdapter {
        &mut self.adapter
    }

    pub fn bridge(&self) -> &Arc<Mutex<SharedSurfaceBridge>> {
        &self.bridge
    }

    pub fn service(&self) -> &Arc<DeviceService> {
        &self.service
    }

    pub fn add_lines(&mut self, mut model: LineModel) -> Arc<Mutex<LineModel>> {
        model.set_resolution(self.dpi);
        model.set_effect_available(self.service.is_antialiased());
        let shared = Arc::new(Mutex::new(model));
        self.lines.push(Arc::clone(&shared));
        self.register(shared.clone() as Arc<Mutex<dyn SceneModel>>);
        shared
    }

    pub fn add_surface(&mut self, model: SurfaceModel) -> Arc<Mutex<SurfaceModel>> {
        let shared = Arc::new(Mutex::new(model));
        self.surfaces.push(Arc::clone(&shared));
        self.register(shared.clone() as Arc<Mutex<dyn SceneModel>>);
        shared
    }

    fn register(&mut self, model: Arc<Mutex<dyn SceneModel>>) {
        let listener = Arc::clone(&model);
        let token = self.service.register_lifecycle(Box::new(move |event, device| {
            let mut model = listener.lock();
            match event {
                LifecycleEvent::Resetting => model.release_device_resources(device),
                LifecycleEvent::Reset => {
                    let pool = pool_for(device.variant());
                    if let Err(e) = model.update_geometry(device, pool) {
                        debug!("buffer recreation after reset failed: {e}");
                    }
                }
            }
        }));
        self.models.push(RegisteredModel {
            model,
            _lifecycle: token,
        });
        self.request_render();
    }

    // -----------------------------------------------------------------------
    // Pass-through property setters
    // -----------------------------------------------------------------------

    pub fn set_resolution(&mut self, dpi: u32) {
        self.dpi = dpi.max(1);
        for model in &self.models {
            model.model.lock().set_resolution(self.dpi);
        }
        self.request_render();
    }

    /// Control size in device-independent units; converted to pixels at the
    /// current dpi.
    pub fn set_size(&mut self, width_dips: f64, height_dips: f64) {
        let scale = f64::from(self.dpi) / f64::from(crate::lines::REFERENCE_DPI);
        self.width = (width_dips * scale).ceil().max(1.0) as u32;
        self.height = (height_dips * scale).ceil().max(1.0) as u32;
        self.request_render();
    }

    pub fn set_line_thickness(&mut self, thickness: f64) {
        for line in &self.lines {
            line.lock().set_thickness(thickness);
        }
        self.request_render();
    }

    pub fn set_surface_shading(&mut self, shading: SurfaceShading) {
        for surface in &self.surfaces {
            surface.lock().set_shading(shading);
        }
        self.request_render();
    }

    pub fn set_mesh_lines(&mut self, mesh_lines: MeshLines) {
        for surface in &self.surfaces {
            surface.lock().set_mesh_lines(mesh_lines);
        }
        self.request_render();
    }

    pub fn set_transparency(&mut self, transparency: u8) {
        for surface in &self.surfaces {
            surface.lock().set_transparency(transparency);
        }
        self.request_render();
    }

    /// Background clear colour, packed ARGB.
    pub fn set_background(&mut self, color: u32) {
        self.background = color;
        self.request_render();
    }

    /// Mark the plot dirty; the next composition tick renders it.
    pub fn request_render(&mut self) {
        self.render_requested = true;
    }

    /// Render on this tick only if something changed since the last one.
    pub fn render_if_requested(&mut self) -> Result<FrameResult, DeviceError> {
        if !self.render_requested {
            return Ok(FrameResult::Rendered);
        }
        self.render()
    }

    /// Render one frame: validate the device, grow the shared surface, clear,
    /// stream geometry, draw, resolve into the shareable texture and publish.
    pub fn render(&mut self) -> Result<FrameResult, DeviceError> {
        let (width, height) = (self.width, self.height);
        self.adapter.set_surface_size(width, height);

        let aspect = width as f32 / height as f32;
        let view = self.camera.view_matrix().to_cols_array_2d();
        let projection = self.camera.projection_matrix(aspect).to_cols_array_2d();
        let world = DMat4::IDENTITY.as_mat4().to_cols_array_2d();
        let background = self.background;

        let bridge = &self.bridge;
        let models = &self.models;
        let result = self.adapter.render_frame(|device| {
            bridge.lock().resize(device, width, height)?;
            device.clear(background);
            device.set_transforms(world, view, projection);
            let pool = pool_for(device.variant());
            for entry in models {
                let mut model = entry.model.lock();
                model.update_geometry(device, pool)?;
                model.draw(device)?;
            }
            bridge.lock().resolve(device)
        })?;

        if result == FrameResult::Rendered {
            self.render_requested = false;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::{LineLayout, LinePoint};
    use glam::DVec3;
    use plot_interop::soft::SoftFactory;

    struct NullImage;

    impl HostImage for NullImage {
        fn lock(&mut self) {}
        fn unlock(&mut self) {}
        fn set_back_buffer(&mut self, _handle: Option<plot_interop::SurfaceHandle>) {}
        fn add_dirty_rect(&mut self, _width: u32, _height: u32) {}
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

    fn control() -> PlotControl {
        let service = DeviceService::new(Box::new(SoftFactory::default()));
        PlotControl::new(service, Box::new(NullImage), Box::new(NullTick), 64, 64)
    }

    #[test]
    fn property_setters_fan_out_to_models() {
        let mut plot = control();
        let line = plot.add_lines(LineModel::new());
        let surface = plot
            .add_surface(SurfaceModel::from_vectors(&[0.0, 1.0], &[0.0, 1.0], &[0.0; 4], 2, 2).unwrap());

        plot.set_line_thickness(2.5);
        assert_eq!(line.lock().thickness(), 2.5);
        assert_eq!(line.lock().layout(), LineLayout::Thick);

        plot.set_surface_shading(SurfaceShading::Faceted);
        assert_eq!(surface.lock().shading(), SurfaceShading::Faceted);

        plot.set_mesh_lines(MeshLines::Triangles);
        assert_eq!(surface.lock().mesh_lines(), MeshLines::Triangles);
    }

    #[test]
    fn resolution_propagates_to_line_layout() {
        let mut plot = control();
        let line = plot.add_lines(LineModel::new());
        assert_eq!(line.lock().layout(), LineLayout::Hairline);
        plot.set_resolution(192);
        assert_eq!(line.lock().layout(), LineLayout::Thick);
    }

    #[test]
    fn size_is_scaled_by_dpi() {
        let mut plot = control();
        plot.set_resolution(192);
        plot.set_size(100.0, 50.0);
        assert_eq!((plot.width, plot.height), (200, 100));
    }

    #[test]
    fn render_is_skipped_until_requested_again() {
        let mut plot = control();
        let line = plot.add_lines(LineModel::new());
        line.lock().set_points(vec![
            LinePoint::new(DVec3::ZERO, 0xFF00_0000),
            LinePoint::new(DVec3::X, 0xFF00_0000),
        ]);

        assert_eq!(plot.render_if_requested().unwrap(), FrameResult::Rendered);
        let presents = plot
            .service
            .with_device(|d| {
                d.as_any()
                    .downcast_ref::<plot_interop::soft::SoftDevice>()
                    .unwrap()
                    .present_count
            })
            .unwrap();

        // No new request: the tick does not re-render.
        plot.render_if_requested().unwrap();
        let presents_after = plot
            .service
            .with_device(|d| {
                d.as_any()
                    .downcast_ref::<plot_interop::soft::SoftDevice>()
                    .unwrap()
                    .present_count
            })
            .unwrap();
        assert_eq!(presents, presents_after);
    }
}
