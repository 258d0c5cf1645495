//! Software reference backend.

mod device;

pub use device::{SoftDevice, SoftFactory};
