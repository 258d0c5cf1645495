//! Device lifecycle, shared-surface compositing and geometry streaming for
//! plot controls hosted in a retained-mode UI framework.
//!
//! The pipeline per frame: the host's composition tick asks the
//! [`control::PlotControl`] to render; the [`present::PresentationSurfaceAdapter`]
//! locks the host image and has the [`service::DeviceService`] validate and
//! repair the device; the geometry models rebuild any dirty vertex/index
//! buffers; draw calls issue; the [`bridge::SharedSurfaceBridge`] resolves
//! the multisampled target into the shareable texture; the adapter publishes
//! the dirty region and unlocks.

pub mod bridge;
pub mod colormap;
pub mod control;
pub mod lines;
pub mod model;
pub mod present;
pub mod service;
pub mod surface;
pub mod vertex;

pub use bridge::SharedSurfaceBridge;
pub use colormap::{ColourMap, ColourMapKind};
pub use control::{Camera, PlotControl, Projection};
pub use lines::{LineLayout, LineModel, LinePoint};
pub use model::SceneModel;
pub use present::{
    FrameResult, HostImage, PresentationSurfaceAdapter, RenderTick, FRONT_BUFFER_POLL_INTERVAL,
};
pub use service::{DeviceLease, DeviceService, LifecycleEvent, LifecycleToken, ResetOutcome};
pub use surface::{MeshLines, SurfaceModel, SurfaceShading};

/// Initialize `tracing` output from the `RUST_LOG` environment variable.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
