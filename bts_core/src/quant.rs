//! Fixed-point quantization between physical velocities and stored `i16` samples.
//!
//! Each component k has its own affine map:
//!
//! ```text
//! stored   = round(physical * scale[k] + offset[k])
//! physical = (stored - offset[k]) / scale[k]
//! ```
//!
//! `fit` chooses the coefficients so that the component's minimum lands on
//! `i16::MIN` and its maximum on `i16::MAX`. Coefficients are kept in `f32`
//! because that is how the header stores them; arithmetic on samples is done
//! in `f64` with the widened `f32` values, so encode and decode apply exactly
//! the same map.

use crate::error::BtsError;
use crate::field::VectorField;
use crate::format::{COMPONENTS, INT_MIN, INT_RANGE, SAMPLE_SIZE};

/// Per-component scale/offset pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
    pub scale: [f32; COMPONENTS],
    pub offset: [f32; COMPONENTS],
}

impl Default for Quantization {
    fn default() -> Self {
        Self {
            scale: [1.0; COMPONENTS],
            offset: [0.0; COMPONENTS],
        }
    }
}

impl Quantization {
    /// Fit coefficients to the union of the grid and tower samples.
    ///
    /// A component whose samples are all equal (or absent) gets `scale = 1`,
    /// so the offset alone carries the value. It decodes exactly when
    /// `-32768 - value` is an `f32`, otherwise to within half an `f32` ulp
    /// of the offset.
    pub fn fit(grid: &VectorField, tower: &VectorField) -> Self {
        let mut q = Self::default();
        for k in 0..COMPONENTS {
            let range = match (grid.component_range(k), tower.component_range(k)) {
                (Some(g), Some(t)) => Some((g.0.min(t.0), g.1.max(t.1))),
                (g, t) => g.or(t),
            };
            let (min, max) = range.unwrap_or((0.0, 0.0));
            (q.scale[k], q.offset[k]) = fit_range(min, max);
        }
        q
    }

    /// Physical resolution of component `k` (one integer step).
    pub fn step(&self, k: usize) -> f64 {
        1.0 / f64::from(self.scale[k])
    }

    #[inline]
    pub fn dequantize(&self, k: usize, raw: i16) -> f64 {
        (f64::from(raw) - f64::from(self.offset[k])) / f64::from(self.scale[k])
    }

    /// Scale and round `value`. A result outside the `i16` range means the
    /// coefficients do not cover the value and is reported, never wrapped.
    #[inline]
    pub fn quantize(&self, k: usize, value: f64) -> Result<i16, BtsError> {
        let q = scaled(self.scale[k], self.offset[k], value);
        if !in_range(q) {
            return Err(BtsError::QuantizationOverflow { component: k, value: q });
        }
        Ok(q as i16)
    }

    /// Decode a block of little-endian `i16` samples into `out`.
    ///
    /// The block must start on a component boundary: sample `i` belongs to
    /// component `i % 3`.
    pub fn dequantize_block(&self, raw: &[u8], out: &mut [f64]) {
        debug_assert_eq!(raw.len(), out.len() * SAMPLE_SIZE);
        for (i, (bytes, v)) in raw.chunks_exact(SAMPLE_SIZE).zip(out.iter_mut()).enumerate() {
            *v = self.dequantize(i % COMPONENTS, i16::from_le_bytes([bytes[0], bytes[1]]));
        }
    }

    /// Encode `values` as little-endian `i16` samples into `out`.
    pub fn quantize_block(&self, values: &[f64], out: &mut [u8]) -> Result<(), BtsError> {
        debug_assert_eq!(out.len(), values.len() * SAMPLE_SIZE);
        for (i, (v, bytes)) in values.iter().zip(out.chunks_exact_mut(SAMPLE_SIZE)).enumerate() {
            bytes.copy_from_slice(&self.quantize(i % COMPONENTS, *v)?.to_le_bytes());
        }
        Ok(())
    }
}

/// Coefficients mapping `[min, max]` onto the integer range.
///
/// Rounding the offset to `f32` can move it by many integer steps when
/// `|offset|` is large (a narrow range around a large mean). The usable
/// integer range is then narrowed by the offset's rounding margin on both
/// sides until `min` and `max` land inside it. If no scale resolves the
/// range at this magnitude, the component is stored like a constant one,
/// centred on the midpoint.
fn fit_range(min: f64, max: f64) -> (f32, f32) {
    let span = max - min;
    if span == 0.0 {
        return (1.0, (INT_MIN - min) as f32);
    }
    let mut usable = INT_RANGE;
    while usable >= 1.0 {
        let scale = (usable / span) as f32;
        let low = INT_MIN + (INT_RANGE - usable) / 2.0;
        let offset = (low - f64::from(scale) * min) as f32;
        if in_range(scaled(scale, offset, min)) && in_range(scaled(scale, offset, max)) {
            return (scale, offset);
        }
        usable -= 2.0 * f64::from(ulp(offset)).max(1.0);
    }
    (1.0, (-(min + max) / 2.0) as f32)
}

#[inline]
fn scaled(scale: f32, offset: f32, value: f64) -> f64 {
    (value * f64::from(scale) + f64::from(offset)).round()
}

#[inline]
fn in_range(q: f64) -> bool {
    (f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&q)
}

/// Distance from `|x|` to the next larger `f32`.
fn ulp(x: f32) -> f32 {
    let a = x.abs();
    f32::from_bits(a.to_bits() + 1) - a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_field() -> VectorField {
        // u in [5, 15], v in [-2, 2], w constant
        VectorField::from_fn(11, 2, 3, |k, it, iy, iz| match k {
            0 => 5.0 + it as f64,
            1 => -2.0 + 4.0 * ((iy + iz) as f64 / 3.0),
            _ => 0.25,
        })
    }

    #[test]
    fn fit_maps_extremes_onto_integer_range() {
        let grid = ramp_field();
        let q = Quantization::fit(&grid, &VectorField::tower(11, 0));
        assert_eq!(q.quantize(0, 5.0).unwrap(), i16::MIN);
        assert_eq!(q.quantize(0, 15.0).unwrap(), i16::MAX);
        assert_eq!(q.quantize(1, -2.0).unwrap(), i16::MIN);
        assert_eq!(q.quantize(1, 2.0).unwrap(), i16::MAX);
    }

    #[test]
    fn constant_component_has_unit_scale_and_exact_value() {
        let grid = ramp_field();
        let q = Quantization::fit(&grid, &VectorField::tower(11, 0));
        assert_eq!(q.scale[2], 1.0);
        let raw = q.quantize(2, 0.25).unwrap();
        assert_eq!(raw, i16::MIN);
        assert_eq!(q.dequantize(2, raw), 0.25);
    }

    #[test]
    fn tower_widens_the_range() {
        let grid = ramp_field();
        let tower = VectorField::from_fn(11, 2, 1, |k, _, _, _| if k == 0 { 25.0 } else { 0.0 });
        let q = Quantization::fit(&grid, &tower);
        assert_eq!(q.quantize(0, 25.0).unwrap(), i16::MAX);
        assert_eq!(q.quantize(0, 5.0).unwrap(), i16::MIN);
        assert!((q.step(0) - 20.0 / INT_RANGE).abs() < 1e-9);
    }

    #[test]
    fn every_sample_stays_in_range_and_within_one_step() {
        let grid = VectorField::from_fn(40, 4, 5, |k, it, iy, iz| {
            ((it * 7 + iy * 3 + iz) as f64 * 0.37 + k as f64).sin() * (k as f64 + 1.0) * 3.0 + 8.0
        });
        let q = Quantization::fit(&grid, &VectorField::tower(40, 0));
        for (i, v) in grid.as_slice().iter().enumerate() {
            let k = i % COMPONENTS;
            let raw = q.quantize(k, *v).expect("fitted coefficients cover every sample");
            assert!((q.dequantize(k, raw) - v).abs() <= q.step(k), "sample {i}");
        }
    }

    #[test]
    fn narrow_range_around_large_mean_is_covered() {
        for (mean, amp) in [(10.0, 1e-3), (100.0, 1e-2), (250.0, 1e-4), (10.0, 1e-9)] {
            let grid = VectorField::from_fn(50, 3, 3, |k, it, iy, iz| {
                mean + amp * ((it + 2 * iy + 3 * iz) as f64 * 0.3 + k as f64).sin()
            });
            let q = Quantization::fit(&grid, &VectorField::tower(50, 0));
            for (i, v) in grid.as_slice().iter().enumerate() {
                let k = i % COMPONENTS;
                let raw = q
                    .quantize(k, *v)
                    .unwrap_or_else(|e| panic!("mean {mean} amp {amp} sample {i}: {e}"));
                let err = (q.dequantize(k, raw) - v).abs();
                assert!(err <= q.step(k), "mean {mean} amp {amp} sample {i}: {err}");
            }
        }
    }

    #[test]
    fn unresolvable_range_falls_back_to_unit_scale() {
        let grid = VectorField::from_fn(4, 1, 1, |_, it, _, _| 10.0 + 1e-9 * it as f64);
        let q = Quantization::fit(&grid, &VectorField::tower(4, 0));
        assert_eq!(q.scale, [1.0; COMPONENTS]);
        assert_eq!(q.offset[0], -10.0);
    }

    #[test]
    fn non_dyadic_constant_is_within_half_an_offset_ulp() {
        // 12.3 has no exact f32 offset; -32780.3 rounds to a multiple of 1/256
        let grid = VectorField::from_fn(3, 2, 2, |_, _, _, _| 12.3);
        let q = Quantization::fit(&grid, &VectorField::tower(3, 0));
        assert_eq!(q.scale[0], 1.0);
        let decoded = q.dequantize(0, q.quantize(0, 12.3).unwrap());
        assert_eq!(decoded, 12.30078125);
        assert!((decoded - 12.3).abs() <= 1.0 / 512.0);
    }

    #[test]
    fn out_of_range_value_is_reported() {
        let q = Quantization::fit(&ramp_field(), &VectorField::tower(11, 0));
        let err = q.quantize(0, 30.0).unwrap_err();
        assert!(matches!(err, BtsError::QuantizationOverflow { component: 0, .. }));
        assert!(q.quantize(0, f64::NAN).is_err());
    }

    #[test]
    fn block_helpers_follow_component_interleave() {
        let q = Quantization {
            scale: [1.0, 2.0, 4.0],
            offset: [0.0, 10.0, -4.0],
        };
        let values = [3.0, 3.0, 3.0, -1.0, -1.0, -1.0];
        let mut bytes = [0u8; 12];
        q.quantize_block(&values, &mut bytes).unwrap();
        assert_eq!(&bytes[0..2], &3i16.to_le_bytes());
        assert_eq!(&bytes[2..4], &16i16.to_le_bytes());
        assert_eq!(&bytes[4..6], &8i16.to_le_bytes());
        let mut back = [0.0; 6];
        q.dequantize_block(&bytes, &mut back);
        assert_eq!(back, values);
    }
}
