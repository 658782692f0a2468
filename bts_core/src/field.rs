use rayon::prelude::*;

use crate::error::BtsError;
use crate::format::COMPONENTS;

/// Three-component velocity field sampled on an (nt, ny, nz) lattice.
///
/// Storage follows the BTS sample order: within a time step the component
/// index varies fastest, then y, then z (column-major over `(k, iy, iz)`),
/// and time steps follow one another. Each time step is therefore one
/// contiguous slice that maps 1:1 onto a grid block on disk.
///
/// A tower line is the same structure with `nz == 1`, `ny` holding the
/// number of tower points.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    nt: usize,
    ny: usize,
    nz: usize,
    data: Vec<f64>,
}

impl VectorField {
    pub fn zeros(nt: usize, ny: usize, nz: usize) -> Self {
        Self {
            nt,
            ny,
            nz,
            data: vec![0.0; COMPONENTS * nt * ny * nz],
        }
    }

    /// Empty-or-zero tower line of `n_points` points.
    pub fn tower(nt: usize, n_points: usize) -> Self {
        Self::zeros(nt, n_points, 1)
    }

    /// Build a field by evaluating `f(k, it, iy, iz)` at every sample.
    pub fn from_fn(
        nt: usize,
        ny: usize,
        nz: usize,
        mut f: impl FnMut(usize, usize, usize, usize) -> f64,
    ) -> Self {
        let mut data = Vec::with_capacity(COMPONENTS * nt * ny * nz);
        for it in 0..nt {
            for iz in 0..nz {
                for iy in 0..ny {
                    for k in 0..COMPONENTS {
                        data.push(f(k, it, iy, iz));
                    }
                }
            }
        }
        Self { nt, ny, nz, data }
    }

    /// Wrap samples that are already in storage order.
    pub fn from_vec(nt: usize, ny: usize, nz: usize, data: Vec<f64>) -> Result<Self, BtsError> {
        let expected = COMPONENTS * nt * ny * nz;
        if data.len() != expected {
            return Err(BtsError::invariant(format!(
                "field of shape (3, {nt}, {ny}, {nz}) needs {expected} samples, got {}",
                data.len()
            )));
        }
        Ok(Self { nt, ny, nz, data })
    }

    #[inline]
    pub fn nt(&self) -> usize {
        self.nt
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    #[inline]
    pub fn nz(&self) -> usize {
        self.nz
    }

    /// `[3, nt, ny, nz]`
    pub fn shape(&self) -> [usize; 4] {
        [COMPONENTS, self.nt, self.ny, self.nz]
    }

    /// Number of samples (all components) in one time step.
    #[inline]
    pub fn step_len(&self) -> usize {
        COMPONENTS * self.ny * self.nz
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn index(&self, k: usize, it: usize, iy: usize, iz: usize) -> usize {
        debug_assert!(k < COMPONENTS && it < self.nt && iy < self.ny && iz < self.nz);
        it * self.step_len() + (iz * self.ny + iy) * COMPONENTS + k
    }

    #[inline]
    pub fn get(&self, k: usize, it: usize, iy: usize, iz: usize) -> f64 {
        self.data[self.index(k, it, iy, iz)]
    }

    #[inline]
    pub fn set(&mut self, k: usize, it: usize, iy: usize, iz: usize, value: f64) {
        let i = self.index(k, it, iy, iz);
        self.data[i] = value;
    }

    /// All samples of time step `it`, in storage order.
    pub fn step(&self, it: usize) -> &[f64] {
        let len = self.step_len();
        &self.data[it * len..(it + 1) * len]
    }

    pub fn step_mut(&mut self, it: usize) -> &mut [f64] {
        let len = self.step_len();
        &mut self.data[it * len..(it + 1) * len]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Time series of component `k` at grid point `(iy, iz)`.
    pub fn time_series(&self, k: usize, iy: usize, iz: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.nt).map(move |it| self.get(k, it, iy, iz))
    }

    /// Minimum and maximum of component `k` over every time step and point,
    /// or `None` when the field holds no samples.
    pub fn component_range(&self, k: usize) -> Option<(f64, f64)> {
        self.data
            .par_chunks_exact(COMPONENTS)
            .map(|s| (s[k], s[k]))
            .reduce_with(|a, b| (a.0.min(b.0), a.1.max(b.1)))
    }

    /// Copy time steps `src` of `other` into this field starting at step `dst`.
    /// Both fields must share the same (ny, nz).
    pub(crate) fn copy_steps_from(
        &mut self,
        other: &VectorField,
        src: std::ops::Range<usize>,
        dst: usize,
    ) {
        let len = self.step_len();
        debug_assert_eq!(len, other.step_len());
        let count = src.len();
        self.data[dst * len..(dst + count) * len]
            .copy_from_slice(&other.data[src.start * len..src.end * len]);
    }
}
