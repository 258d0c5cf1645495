//! GPU vertex layouts streamed by the geometry models.
//!
//! All layouts are `repr(C)` and `Pod` so whole slices can be written into
//! device buffers with a single `cast_slice`. Colours are packed ARGB,
//! matching the presentation surface's byte order.

use bytemuck::{Pod, Zeroable};

/// Hairline vertex: one per polyline point.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: u32,
}

/// Thick-line vertex: four per segment.
///
/// Both segment endpoints travel with every vertex so a vertex shader can
/// extrude the screen-space quad; `corner` selects which quad corner this
/// vertex is, with x in {0, 1} along the segment and y in {-0.5, 0.5} across
/// it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ThickLineVertex {
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub corner: [f32; 2],
    pub color: u32,
}

/// Surface vertex with a lighting normal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SurfaceVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: u32,
}

pub const LINE_VERTEX_STRIDE: u32 = std::mem::size_of::<LineVertex>() as u32;
pub const THICK_LINE_VERTEX_STRIDE: u32 = std::mem::size_of::<ThickLineVertex>() as u32;
pub const SURFACE_VERTEX_STRIDE: u32 = std::mem::size_of::<SurfaceVertex>() as u32;

/// Pack ARGB channels into the wire colour format.
pub fn pack_argb(alpha: u8, red: u8, green: u8, blue: u8) -> u32 {
    (u32::from(alpha) << 24) | (u32::from(red) << 16) | (u32::from(green) << 8) | u32::from(blue)
}

/// Replace the alpha channel of a packed colour.
pub fn with_alpha(color: u32, alpha: u8) -> u32 {
    (color & 0x00FF_FFFF) | (u32::from(alpha) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_are_tightly_packed() {
        assert_eq!(LINE_VERTEX_STRIDE, 16);
        assert_eq!(THICK_LINE_VERTEX_STRIDE, 36);
        assert_eq!(SURFACE_VERTEX_STRIDE, 28);
    }

    #[test]
    fn colour_packing() {
        assert_eq!(pack_argb(0xFF, 0x10, 0x20, 0x30), 0xFF10_2030);
        assert_eq!(with_alpha(0xFF10_2030, 0x80), 0x8010_2030);
    }
}
