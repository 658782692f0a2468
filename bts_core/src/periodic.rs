//! Periodic extension of a turbulence box and a statistical periodicity test.

use rayon::prelude::*;
use serde::Serialize;

use crate::error::BtsError;
use crate::field::VectorField;
use crate::format::FORMAT_PERIODIC;
use crate::turbulence_box::{time_axis, TurbulenceBox};

/// Thresholds for [`TurbulenceBox::check_periodic`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodicityTolerance {
    /// Bound on `|u_first - u_last| / sigma` at every grid point.
    pub sigma: f64,
    /// Bound on the grid-averaged `|u_first - u_last|`, in velocity units.
    pub abs: f64,
}

impl Default for PeriodicityTolerance {
    fn default() -> Self {
        Self { sigma: 1.5, abs: 0.5 }
    }
}

/// Outcome of a periodicity test on the streamwise component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodicityCheck {
    pub periodic: bool,
    /// Largest seam jump relative to the local temporal standard deviation.
    pub max_rel_sigma: f64,
    /// Seam jump averaged over the grid.
    pub mean_abs_diff: f64,
    /// Grid points left out of `max_rel_sigma` because their series is constant.
    pub zero_variance_points: usize,
}

impl TurbulenceBox {
    /// Mirror the box in time so that it can be repeated end to end.
    ///
    /// With `nt0` input steps the result has `2 * nt0 - 2`: the original series
    /// followed by its interior reversed (`u[nt0-2], ..., u[1]`), so neither
    /// seam sample is duplicated. The tower keeps its original steps and is
    /// zero over the mirrored part. `t` is rebuilt from the original `dt`
    /// and the format tag becomes [`FORMAT_PERIODIC`].
    ///
    /// New arrays are built before any field is replaced; on error the box is
    /// unchanged.
    pub fn make_periodic(&mut self) -> Result<(), BtsError> {
        self.validate()?;
        let nt0 = self.nt();
        if nt0 < 2 {
            return Err(BtsError::invariant(format!(
                "periodic extension needs at least 2 time steps, got {nt0}"
            )));
        }
        let nt = 2 * nt0 - 2;
        let dt = self.t[1] - self.t[0];

        let mut u = VectorField::zeros(nt, self.ny(), self.nz());
        u.copy_steps_from(&self.u, 0..nt0, 0);
        for (j, src) in (1..nt0 - 1).rev().enumerate() {
            u.copy_steps_from(&self.u, src..src + 1, nt0 + j);
        }

        let mut u_twr = VectorField::zeros(nt, self.u_twr.ny(), self.u_twr.nz());
        if self.n_twr() > 0 {
            u_twr.copy_steps_from(&self.u_twr, 0..nt0, 0);
        }

        self.u = u;
        self.u_twr = u_twr;
        self.t = time_axis(nt, dt);
        self.format_id = FORMAT_PERIODIC;
        Ok(())
    }

    /// Test whether the streamwise component wraps around smoothly.
    ///
    /// For every grid point the seam jump `|u[0] - u[nt-1]|` is compared with
    /// the point's temporal (population) standard deviation. The box passes
    /// when the largest relative jump is below `tol.sigma` and the mean jump
    /// is below `tol.abs`. A zero jump passes either bound, so an exact seam
    /// match is periodic for any non-negative tolerance.
    ///
    /// Points whose series is constant have a zero jump and no spread; they
    /// count towards the mean jump but are left out of the relative maximum.
    /// A box without time steps or grid points is never periodic.
    pub fn check_periodic(&self, tol: PeriodicityTolerance) -> PeriodicityCheck {
        let (nt, ny, nz) = (self.nt(), self.ny(), self.nz());
        let points = ny * nz;
        if self.u.is_empty() {
            return PeriodicityCheck {
                periodic: false,
                max_rel_sigma: f64::NAN,
                mean_abs_diff: f64::NAN,
                zero_variance_points: 0,
            };
        }

        let (max_rel_sigma, sum_diff, zero_variance_points) = (0..points)
            .into_par_iter()
            .map(|p| {
                let (iy, iz) = (p % ny, p / ny);
                let mean = self.u.time_series(0, iy, iz).sum::<f64>() / nt as f64;
                let var = self
                    .u
                    .time_series(0, iy, iz)
                    .map(|v| (v - mean).powi(2))
                    .sum::<f64>()
                    / nt as f64;
                let sig = var.sqrt();
                let diff = (self.u.get(0, 0, iy, iz) - self.u.get(0, nt - 1, iy, iz)).abs();
                if sig == 0.0 {
                    (0.0, diff, 1)
                } else {
                    (diff / sig, diff, 0)
                }
            })
            .reduce(|| (0.0, 0.0, 0), |a, b| (a.0.max(b.0), a.1 + b.1, a.2 + b.2));

        let mean_abs_diff = sum_diff / points as f64;
        let within = |v: f64, bound: f64| v == 0.0 || v < bound;
        PeriodicityCheck {
            periodic: within(max_rel_sigma, tol.sigma) && within(mean_abs_diff, tol.abs),
            max_rel_sigma,
            mean_abs_diff,
            zero_variance_points,
        }
    }
}
