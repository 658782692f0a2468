use rayon::prelude::*;
use serde::Serialize;

use crate::error::BtsError;
use crate::field::VectorField;
use crate::format::{BtsHeader, FORMAT_STANDARD};

/// A decoded turbulence box: the velocity field on a (y, z) grid over time,
/// an optional tower line below the grid, and the axes that place them.
///
/// Fields are public so that downstream code can read them by name. A box
/// assembled by hand should go through [`TurbulenceBox::new`] (and
/// [`TurbulenceBox::with_tower`]) or be checked with [`TurbulenceBox::validate`]
/// before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct TurbulenceBox {
    /// Format tag; [`FORMAT_STANDARD`] or [`crate::format::FORMAT_PERIODIC`].
    pub format_id: i16,
    /// Grid field, shape (3, nt, ny, nz).
    pub u: VectorField,
    /// Tower field, shape (3, nt, nTwr) stored with `nz == 1`. May hold zero points.
    pub u_twr: VectorField,
    /// Lateral coordinates, centred on zero.
    pub y: Vec<f64>,
    /// Vertical coordinates, ascending from the bottom grid row.
    pub z: Vec<f64>,
    /// Time stamps starting at zero.
    pub t: Vec<f64>,
    /// Tower point heights, descending from the bottom grid row.
    pub z_twr: Vec<f64>,
    /// Reference height as stored in the source, if any.
    pub z_hub: Option<f64>,
    /// Reference wind speed as stored in the source, if any.
    pub u_hub: Option<f64>,
    pub info: String,
}

/// Reference height and wind speed, each flagged as stored or derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HubValues {
    pub z_hub: f64,
    pub u_hub: f64,
    pub z_hub_stored: bool,
    pub u_hub_stored: bool,
}

impl TurbulenceBox {
    /// Assemble a box without a tower line from a field and its axes.
    pub fn new(u: VectorField, y: Vec<f64>, z: Vec<f64>, t: Vec<f64>) -> Result<Self, BtsError> {
        let nt = u.nt();
        let b = Self {
            format_id: FORMAT_STANDARD,
            u,
            u_twr: VectorField::tower(nt, 0),
            y,
            z,
            t,
            z_twr: Vec::new(),
            z_hub: None,
            u_hub: None,
            info: String::new(),
        };
        b.validate()?;
        Ok(b)
    }

    /// Attach a tower line. Tower heights are laid out below `z[0]` with the
    /// grid's vertical spacing.
    pub fn with_tower(mut self, u_twr: VectorField) -> Result<Self, BtsError> {
        let dz = spacing(&self.z);
        let z_bottom = self.z.first().copied().unwrap_or(0.0);
        self.z_twr = tower_axis(u_twr.ny(), dz, z_bottom);
        self.u_twr = u_twr;
        self.validate()?;
        Ok(self)
    }

    /// Build a box from a decoded header and its sample fields, deriving every
    /// axis from the header scalars.
    pub(crate) fn from_header(header: &BtsHeader, u: VectorField, u_twr: VectorField) -> Self {
        let dz = f64::from(header.dz);
        let z_bottom = f64::from(header.z_bottom);
        Self {
            format_id: header.format_id,
            u,
            u_twr,
            y: lateral_axis(header.ny, f64::from(header.dy)),
            z: vertical_axis(header.nz, dz, z_bottom),
            t: time_axis(header.nt, f64::from(header.dt)),
            z_twr: tower_axis(header.n_twr, dz, z_bottom),
            z_hub: Some(f64::from(header.z_hub)),
            u_hub: Some(f64::from(header.u_hub)),
            info: header.info.clone(),
        }
    }

    #[inline]
    pub fn nt(&self) -> usize {
        self.u.nt()
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.u.ny()
    }

    #[inline]
    pub fn nz(&self) -> usize {
        self.u.nz()
    }

    /// Number of tower points.
    #[inline]
    pub fn n_twr(&self) -> usize {
        if self.u_twr.step_len() == 0 {
            0
        } else {
            self.u_twr.ny()
        }
    }

    /// Check that the axes and tower agree with the grid field and that
    /// every sample is finite.
    pub fn validate(&self) -> Result<(), BtsError> {
        let [_, nt, ny, nz] = self.u.shape();
        let axes = [("y", self.y.len(), ny), ("z", self.z.len(), nz), ("t", self.t.len(), nt)];
        for (name, len, expected) in axes {
            if len != expected {
                return Err(BtsError::invariant(format!(
                    "axis {name} has {len} points but u has {expected}"
                )));
            }
        }
        if self.u_twr.step_len() > 0 {
            if self.u_twr.nt() != nt {
                return Err(BtsError::invariant(format!(
                    "tower field has {} time steps but u has {nt}",
                    self.u_twr.nt()
                )));
            }
            if self.u_twr.nz() != 1 {
                return Err(BtsError::invariant("tower field must be a single line (nz == 1)"));
            }
        }
        if self.z_twr.len() != self.n_twr() {
            return Err(BtsError::invariant(format!(
                "axis zTwr has {} points but the tower has {}",
                self.z_twr.len(),
                self.n_twr()
            )));
        }
        let finite = |f: &VectorField| f.as_slice().par_iter().all(|v| v.is_finite());
        if !finite(&self.u) || !finite(&self.u_twr) {
            return Err(BtsError::invariant("field holds non-finite samples"));
        }
        Ok(())
    }

    /// Nearest-neighbour indices `(iy, iz)` of the centre of the grid, or
    /// `None` for an empty grid.
    pub fn mid_indices(&self) -> Option<(usize, usize)> {
        let iy = nearest_index(&self.y, midpoint(&self.y)?)?;
        let iz = nearest_index(&self.z, midpoint(&self.z)?)?;
        Some((iy, iz))
    }

    /// Reference height and wind speed.
    ///
    /// Stored values always win. A missing `z_hub` becomes the grid height
    /// nearest the vertical midpoint; a missing `u_hub` becomes the mean
    /// streamwise velocity at the grid point nearest `(y midpoint, z_hub)`,
    /// where `z_hub` may itself be the derived one.
    pub fn hub_values(&self) -> Result<HubValues, BtsError> {
        let (z_hub, z_hub_stored) = match self.z_hub {
            Some(z) => (z, true),
            None => {
                let iz = midpoint(&self.z)
                    .and_then(|m| nearest_index(&self.z, m))
                    .ok_or_else(|| BtsError::invariant("cannot derive zHub from an empty z axis"))?;
                (self.z[iz], false)
            }
        };

        let (u_hub, u_hub_stored) = match self.u_hub {
            Some(u) => (u, true),
            None => {
                let iz = nearest_index(&self.z, z_hub);
                let iy = midpoint(&self.y).and_then(|m| nearest_index(&self.y, m));
                let (iy, iz) = iy
                    .zip(iz)
                    .filter(|_| self.nt() > 0)
                    .ok_or_else(|| BtsError::invariant("cannot derive uHub from an empty field"))?;
                let mean = self.u.time_series(0, iy, iz).sum::<f64>() / self.nt() as f64;
                (mean, false)
            }
        };

        Ok(HubValues {
            z_hub,
            u_hub,
            z_hub_stored,
            u_hub_stored,
        })
    }
}

// ── Axes ────────────────────────────────────────────────────────────────────

/// `ny` lateral coordinates with spacing `dy`, centred on zero.
///
/// Offsets are symmetric half-integer multiples of `dy`, so `y[i] == -y[ny-1-i]`.
pub fn lateral_axis(ny: usize, dy: f64) -> Vec<f64> {
    let centre = ny.saturating_sub(1) as f64 / 2.0;
    (0..ny).map(|i| (i as f64 - centre) * dy).collect()
}

pub fn vertical_axis(nz: usize, dz: f64, z_bottom: f64) -> Vec<f64> {
    (0..nz).map(|i| i as f64 * dz + z_bottom).collect()
}

pub fn time_axis(nt: usize, dt: f64) -> Vec<f64> {
    (0..nt).map(|i| i as f64 * dt).collect()
}

/// Tower heights: start at the bottom grid row and step down by `dz`.
pub fn tower_axis(n_twr: usize, dz: f64, z_bottom: f64) -> Vec<f64> {
    (0..n_twr).map(|i| z_bottom - i as f64 * dz).collect()
}

/// Spacing between the first two points, or 0 for axes shorter than two.
pub(crate) fn spacing(axis: &[f64]) -> f64 {
    match axis {
        [a, b, ..] => b - a,
        _ => 0.0,
    }
}

fn midpoint(axis: &[f64]) -> Option<f64> {
    Some((axis.first()? + axis.last()?) / 2.0)
}

/// Index of the first point closest to `target`.
fn nearest_index(axis: &[f64], target: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, v)| {
            let d = (v - target).abs();
            match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            }
        })
        .map(|(i, _)| i)
}
