//! Direct3D 11 backend (Windows).

mod device;
mod interop;

pub use device::{Dx11Device, Dx11Factory};
pub use interop::dxgi_format;
