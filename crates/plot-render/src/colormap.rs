//! Magnitude-to-colour palettes for surface colouring.
//!
//! A palette is built once from piecewise-linear channel curves sampled at
//! pixel centres, then consumed as packed colours through a cached per-vertex
//! index array, so palette changes and opacity changes never force a geometry
//! rebuild.

use crate::vertex::pack_argb;

/// Built-in palettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourMapKind {
    Jet,
    Hsv,
    Gray,
    Cool,
    Hot,
}

/// An ordered palette of packed ARGB colours.
#[derive(Debug, Clone)]
pub struct ColourMap {
    kind: ColourMapKind,
    packed: Vec<u32>,
}

pub const DEFAULT_COLOUR_MAP_LENGTH: usize = 256;

impl Default for ColourMap {
    fn default() -> Self {
        Self::new(ColourMapKind::Jet, DEFAULT_COLOUR_MAP_LENGTH)
    }
}

impl ColourMap {
    pub fn new(kind: ColourMapKind, length: usize) -> Self {
        let length = length.max(2);
        let packed = (0..length)
            .map(|i| {
                // Colour at the pixel centre.
                let t = (i as f64 + 0.5) / length as f64;
                let (r, g, b) = match kind {
                    ColourMapKind::Jet => jet(t),
                    ColourMapKind::Hsv => hsv_ramp(t),
                    ColourMapKind::Gray => (t, t, t),
                    ColourMapKind::Cool => (t, 1.0 - t, 1.0),
                    ColourMapKind::Hot => hot(t),
                };
                pack_argb(0xFF, channel(r), channel(g), channel(b))
            })
            .collect();
        Self { kind, packed }
    }

    pub fn kind(&self) -> ColourMapKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.packed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packed.is_empty()
    }

    /// The palette as packed ARGB with opaque alpha.
    pub fn packed(&self) -> &[u32] {
        &self.packed
    }

    pub fn color_at(&self, index: u16) -> u32 {
        self.packed[(index as usize).min(self.packed.len() - 1)]
    }

    /// Quantize magnitudes into palette indices over the values' own range.
    /// NaN values and a degenerate (constant) range map to index 0.
    pub fn indices_from_values(&self, values: &[f64]) -> Vec<u16> {
        let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
        for &v in values {
            if v.is_nan() {
                continue;
            }
            min = min.min(v);
            max = max.max(v);
        }
        let span = max - min;
        if !span.is_finite() || span <= 0.0 {
            return vec![0; values.len()];
        }
        let top = (self.packed.len() - 1) as f64;
        values
            .iter()
            .map(|&v| {
                if v.is_nan() {
                    0
                } else {
                    (((v - min) / span) * top).round() as u16
                }
            })
            .collect()
    }
}

fn channel(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Piecewise-linear interpolation through (position, value) control points.
/// Positions must be ascending over [0, 1].
fn interp(points: &[(f64, f64)], x: f64) -> f64 {
    let first = points[0];
    if x <= first.0 {
        return first.1;
    }
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    points[points.len() - 1].1
}

/// Dark blue through cyan and yellow to dark red.
fn jet(t: f64) -> (f64, f64, f64) {
    let r = interp(
        &[
            (0.0, 0.0),
            (0.125, 0.0),
            (0.375, 0.0),
            (0.625, 1.0),
            (0.875, 1.0),
            (1.0, 0.5),
        ],
        t,
    );
    let g = interp(
        &[
            (0.0, 0.0),
            (0.125, 0.0),
            (0.375, 1.0),
            (0.625, 1.0),
            (0.875, 0.0),
            (1.0, 0.0),
        ],
        t,
    );
    let b = interp(
        &[
            (0.0, 0.5),
            (0.125, 1.0),
            (0.375, 1.0),
            (0.625, 0.0),
            (0.875, 0.0),
            (1.0, 0.0),
        ],
        t,
    );
    (r, g, b)
}

/// Full hue circle at maximum saturation and value.
fn hsv_ramp(t: f64) -> (f64, f64, f64) {
    let sector = (t * 6.0).floor();
    let f = t * 6.0 - sector;
    let p = 0.0;
    let q = 1.0 - f;
    let u = f;
    match sector as i32 {
        0 => (1.0, u, p),
        1 => (q, 1.0, p),
        2 => (p, 1.0, u),
        3 => (p, q, 1.0),
        4 => (u, p, 1.0),
        _ => (1.0, p, q),
    }
}

/// Black through red and yellow to white.
fn hot(t: f64) -> (f64, f64, f64) {
    let r = (t / 0.375).min(1.0);
    let g = ((t - 0.375) / 0.375).clamp(0.0, 1.0);
    let b = ((t - 0.75) / 0.25).clamp(0.0, 1.0);
    (r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jet_runs_blue_to_red() {
        let map = ColourMap::new(ColourMapKind::Jet, 256);
        assert_eq!(map.len(), 256);
        let first = map.color_at(0);
        let last = map.color_at(255);
        // Blue dominates the low end, red the high end.
        assert!(first & 0xFF > (first >> 16) & 0xFF);
        assert!((last >> 16) & 0xFF > last & 0xFF);
        // Mid-palette is fully saturated green-ish (cyan/yellow band).
        assert_eq!((map.color_at(128) >> 8) & 0xFF, 0xFF);
    }

    #[test]
    fn gray_is_monotone_and_neutral() {
        let map = ColourMap::new(ColourMapKind::Gray, 64);
        let mut previous = 0u32;
        for i in 0..64 {
            let c = map.color_at(i);
            let (r, g, b) = ((c >> 16) & 0xFF, (c >> 8) & 0xFF, c & 0xFF);
            assert_eq!(r, g);
            assert_eq!(g, b);
            assert!(r >= previous);
            previous = r;
        }
    }

    #[test]
    fn indices_span_the_value_range() {
        let map = ColourMap::new(ColourMapKind::Jet, 256);
        let indices = map.indices_from_values(&[0.0, 5.0, 10.0]);
        assert_eq!(indices, vec![0, 128, 255]);
    }

    #[test]
    fn nan_and_constant_ranges_map_to_zero() {
        let map = ColourMap::default();
        assert_eq!(map.indices_from_values(&[1.0, f64::NAN, 3.0])[1], 0);
        assert_eq!(map.indices_from_values(&[2.0, 2.0, 2.0]), vec![0, 0, 0]);
    }
}
