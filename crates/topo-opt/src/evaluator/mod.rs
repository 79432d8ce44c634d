//! FEA evaluator boundary.
//!
//! The optimizer asks an evaluator for the static response of the current
//! density field under one load case. Evaluators are read-only with respect
//! to the field and must be callable from several worker threads at once.
//!
//! Variants:
//! - [`InProcessEvaluator`]: hexahedral assembly and a PCG solve in this process
//! - [`ExternalEvaluator`]: XML descriptor → external program → XML result

pub mod external;
pub mod in_process;

pub use external::{ExternalEvaluator, ExternalSettings};
pub use in_process::InProcessEvaluator;

use nalgebra::DVector;

use crate::density::DensityField;
use crate::error::EvaluationError;
use crate::load_cases::LoadCase;

/// Stiffness multiplier floor applied inside the solver (×E₀)
pub const STIFFNESS_FLOOR: f64 = 1e-9;

/// Per-call solve settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOptions {
    /// SIMP penalty exponent p
    pub penalty: f64,
    /// Relative residual tolerance of the linear solve
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl SolveOptions {
    /// Same options with the tolerance multiplied by `factor`
    pub fn relaxed(&self, factor: f64) -> Self {
        Self {
            tolerance: self.tolerance * factor,
            ..*self
        }
    }
}

/// Response of the structure to one load case at one density field
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub load_case: String,
    /// Nodal displacements, 3 per node in mesh order [m]
    pub displacements: DVector<f64>,
    /// Fᵀu [J]
    pub compliance: f64,
    /// Von Mises stress per element, mesh order [Pa]
    pub von_mises: Vec<f64>,
    /// u_eᵀ k_e⁰ u_e per element at unit density
    pub strain_energies: Vec<f64>,
    pub converged: bool,
    pub solver_iterations: usize,
    pub residual: f64,
}

impl EvaluationResult {
    /// Largest element stress and the element index carrying it
    pub fn max_stress(&self) -> Option<(usize, f64)> {
        self.von_mises
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (e, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((e, s)),
            })
    }
}

/// Static response of a density field under a load case.
///
/// `SolveFailure` is the only recoverable error; the optimizer retries it.
pub trait FeaEvaluator: Send + Sync {
    fn evaluate(
        &self,
        density: &DensityField,
        load_case: &LoadCase,
        options: &SolveOptions,
    ) -> Result<EvaluationResult, EvaluationError>;

    /// Short label for logs and reports
    fn name(&self) -> &str;
}

/// SIMP interpolation E(ρ) = ρ^p · E₀
pub fn simp_modulus(rho: f64, penalty: f64, youngs_modulus: f64) -> f64 {
    rho.powf(penalty) * youngs_modulus
}

/// Per-element stiffness multipliers ρ^p, floored at [`STIFFNESS_FLOOR`]
pub fn stiffness_factors(density: &DensityField, penalty: f64) -> Vec<f64> {
    density
        .values()
        .iter()
        .map(|&rho| simp_modulus(rho, penalty, 1.0).max(STIFFNESS_FLOOR))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simp_modulus_decreases_with_penalty_below_full_density() {
        for rho in [0.1, 0.5, 0.9] {
            let mut last = f64::INFINITY;
            for p in [1.5, 2.0, 3.0, 4.0, 5.0] {
                let e = simp_modulus(rho, p, 200e9);
                assert!(e < last, "E({rho}) must decrease with p, got {e} after {last}");
                last = e;
            }
        }
        assert_eq!(simp_modulus(1.0, 3.0, 200e9), 200e9);
    }

    #[test]
    fn max_stress_picks_largest_element() {
        let result = EvaluationResult {
            load_case: "static".to_string(),
            displacements: DVector::zeros(3),
            compliance: 0.0,
            von_mises: vec![1.0, 7.0, 3.0],
            strain_energies: vec![0.0; 3],
            converged: true,
            solver_iterations: 1,
            residual: 0.0,
        };
        assert_eq!(result.max_stress(), Some((1, 7.0)));
        let relaxed = SolveOptions {
            penalty: 3.0,
            tolerance: 1e-8,
            max_iterations: 10,
        }
        .relaxed(100.0);
        assert!((relaxed.tolerance - 1e-6).abs() < 1e-20);
    }
}
