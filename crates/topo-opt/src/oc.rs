//! Optimality-criteria density update.
//!
//! ```text
//! x_new = clip( x · (max(0, -dc) / (λ v̂))^η , x - m, x + m ), then clip to [ρ_min, 1]
//! ```
//!
//! `λ` is found by bisection in log space so that the volume measure of the
//! new field meets the target. The measure is supplied by the caller: the
//! plain weighted mean for sensitivity filtering, or the mean of the filtered
//! field for density filtering.

use crate::error::UpdateError;

/// Damping exponent η
pub const DAMPING: f64 = 0.5;
const MAX_BISECTIONS: usize = 40;
const LAMBDA_SPAN: f64 = 1e10;

/// Outcome of one update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcStep {
    /// Accepted Lagrange multiplier (the common scale factor for the fallback)
    pub lambda: f64,
    /// Volume measure of the updated field
    pub volume_fraction: f64,
    pub bisections: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcUpdater {
    pub move_limit: f64,
    pub rho_min: f64,
    pub volume_tolerance: f64,
}

impl OcUpdater {
    pub fn new(move_limit: f64, rho_min: f64, volume_tolerance: f64) -> Self {
        Self {
            move_limit,
            rho_min,
            volume_tolerance,
        }
    }

    /// Same updater with a different move limit
    pub fn with_move_limit(&self, move_limit: f64) -> Self {
        Self {
            move_limit,
            ..self.clone()
        }
    }

    fn candidate(&self, x: &[f64], dc: &[f64], dv: &[f64], lambda: f64, out: &mut [f64]) {
        for i in 0..x.len() {
            let ratio = (-dc[i]).max(0.0) / (lambda * dv[i]);
            let trial = x[i] * ratio.powf(DAMPING);
            let moved = trial.clamp(x[i] - self.move_limit, x[i] + self.move_limit);
            out[i] = moved.clamp(self.rho_min, 1.0);
        }
    }

    /// Update `x` in place.
    ///
    /// `dc` and `dv` are the objective and volume gradients with respect to
    /// `x`; `volume_of` maps a candidate field to its volume fraction.
    /// On error `x` is left unchanged.
    pub fn update(
        &self,
        x: &mut [f64],
        dc: &[f64],
        dv: &[f64],
        target: f64,
        volume_of: impl Fn(&[f64]) -> f64,
    ) -> Result<OcStep, UpdateError> {
        if x.is_empty() || dc.len() != x.len() || dv.len() != x.len() {
            return Err(UpdateError::Degenerate(format!(
                "gradient lengths {} / {} do not match {} design variables",
                dc.len(),
                dv.len(),
                x.len()
            )));
        }
        if let Some(bad) = dc.iter().chain(dv).find(|s| !s.is_finite()) {
            return Err(UpdateError::Degenerate(format!("non-finite sensitivity {bad}")));
        }
        let mean_dv = dv.iter().sum::<f64>() / dv.len() as f64;
        if !(mean_dv > 0.0) || dv.iter().any(|&v| v <= 0.0) {
            return Err(UpdateError::Degenerate(
                "volume gradient must be positive".to_string(),
            ));
        }
        let dv_hat: Vec<f64> = dv.iter().map(|v| v / mean_dv).collect();

        let scale = dc
            .iter()
            .zip(&dv_hat)
            .map(|(&c, &v)| -c / v)
            .fold(0.0, f64::max);
        if !(scale > 0.0) {
            return Err(UpdateError::Degenerate(
                "no element has a descent sensitivity".to_string(),
            ));
        }

        let mut trial = vec![0.0; x.len()];
        let mut lo = scale / LAMBDA_SPAN;
        let mut hi = scale * LAMBDA_SPAN;

        self.candidate(x, dc, &dv_hat, hi, &mut trial);
        let v_hi = volume_of(&trial);
        if v_hi > target + self.volume_tolerance {
            // even the most restrictive multiplier cannot reach the target within the move limit
            return Err(UpdateError::Degenerate(format!(
                "volume {v_hi:.6} stays above target {target:.6} at the move limit"
            )));
        }
        self.candidate(x, dc, &dv_hat, lo, &mut trial);
        let v_lo = volume_of(&trial);
        if v_lo < target - self.volume_tolerance {
            return Err(UpdateError::Degenerate(format!(
                "volume {v_lo:.6} stays below target {target:.6} at the move limit"
            )));
        }

        let mut bisections = 0;
        while bisections < MAX_BISECTIONS && hi / lo - 1.0 >= 1e-12 {
            bisections += 1;
            let mid = (lo * hi).sqrt();
            self.candidate(x, dc, &dv_hat, mid, &mut trial);
            if volume_of(&trial) > target {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        // the upper end keeps the volume at or below the target
        self.candidate(x, dc, &dv_hat, hi, &mut trial);
        let volume_fraction = volume_of(&trial);
        if (volume_fraction - target).abs() > self.volume_tolerance {
            return Err(UpdateError::Degenerate(format!(
                "multiplier search ended at volume {volume_fraction:.6}, target {target:.6}"
            )));
        }
        x.copy_from_slice(&trial);
        Ok(OcStep {
            lambda: hi,
            volume_fraction,
            bisections,
        })
    }

    /// Fallback: scale every design variable by a common factor so the
    /// clipped field meets the target. Ignores the move limit.
    pub fn uniform_scale(
        &self,
        x: &mut [f64],
        target: f64,
        volume_of: impl Fn(&[f64]) -> f64,
    ) -> Result<OcStep, UpdateError> {
        let smallest = x.iter().copied().filter(|&v| v > 0.0).fold(f64::INFINITY, f64::min);
        if !smallest.is_finite() {
            return Err(UpdateError::Degenerate("design field is empty".to_string()));
        }
        let scaled = |s: f64, out: &mut Vec<f64>| {
            out.clear();
            out.extend(x.iter().map(|&v| (s * v).clamp(self.rho_min, 1.0)));
        };

        let mut trial = Vec::with_capacity(x.len());
        let (mut lo, mut hi) = (0.0, 1.0 / smallest);
        scaled(lo, &mut trial);
        let v_min = volume_of(&trial);
        scaled(hi, &mut trial);
        let v_max = volume_of(&trial);
        if target < v_min - self.volume_tolerance || target > v_max + self.volume_tolerance {
            return Err(UpdateError::Infeasible {
                target,
                min: v_min,
                max: v_max,
            });
        }

        let mut bisections = 0;
        while bisections < 200 && hi - lo > 1e-14 * hi {
            bisections += 1;
            let mid = 0.5 * (lo + hi);
            scaled(mid, &mut trial);
            if volume_of(&trial) > target {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        scaled(lo, &mut trial);
        let volume_fraction = volume_of(&trial);
        x.copy_from_slice(&trial);
        Ok(OcStep {
            lambda: lo,
            volume_fraction,
            bisections,
        })
    }
}
