//! Compliance sensitivities and their combination across load cases.

use crate::config::CombinationRule;
use crate::density::DensityField;
use crate::error::ConfigurationError;
use crate::evaluator::EvaluationResult;
use crate::mesh::Mesh;

/// dC/dρ_e = −p ρ_e^(p−1) u_eᵀ k_e⁰ u_e for every design element,
/// in `mesh.design_elements()` order.
pub fn compliance_sensitivities(
    mesh: &Mesh,
    density: &DensityField,
    result: &EvaluationResult,
    penalty: f64,
) -> Vec<f64> {
    mesh.design_elements()
        .iter()
        .map(|&e| {
            let rho = density.get(e);
            -penalty * rho.powf(penalty - 1.0) * result.strain_energies[e]
        })
        .collect()
}

/// Combination rule resolved against the number of load cases
#[derive(Debug, Clone, PartialEq)]
pub enum SensitivityAggregator {
    WeightedSum(Vec<f64>),
    WorstCase,
}

impl SensitivityAggregator {
    pub fn new(rule: &CombinationRule, num_cases: usize) -> Result<Self, ConfigurationError> {
        rule.validate(num_cases)?;
        Ok(match rule {
            CombinationRule::WeightedSum { weights: Some(w) } => Self::WeightedSum(w.clone()),
            CombinationRule::WeightedSum { weights: None } => {
                Self::WeightedSum(vec![1.0 / num_cases as f64; num_cases])
            }
            CombinationRule::WorstCase => Self::WorstCase,
        })
    }

    /// Element-wise combination of per-case sensitivity vectors
    pub fn aggregate(&self, per_case: &[Vec<f64>]) -> Vec<f64> {
        let n = per_case.first().map_or(0, Vec::len);
        match self {
            Self::WeightedSum(weights) => {
                let mut out = vec![0.0; n];
                for (w, case) in weights.iter().zip(per_case) {
                    for (o, s) in out.iter_mut().zip(case) {
                        *o += w * s;
                    }
                }
                out
            }
            // value with the largest magnitude; the first case wins ties
            Self::WorstCase => (0..n)
                .map(|i| {
                    per_case
                        .iter()
                        .map(|case| case[i])
                        .fold(0.0, |best: f64, s| if s.abs() > best.abs() { s } else { best })
                })
                .collect(),
        }
    }

    /// Combined objective from per-case compliances
    pub fn objective(&self, compliances: &[f64]) -> f64 {
        match self {
            Self::WeightedSum(weights) => weights.iter().zip(compliances).map(|(w, c)| w * c).sum(),
            Self::WorstCase => compliances.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Region, fixtures};
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn result(energies: Vec<f64>) -> EvaluationResult {
        EvaluationResult {
            load_case: "case".to_string(),
            displacements: DVector::zeros(0),
            compliance: 0.0,
            von_mises: vec![0.0; energies.len()],
            strain_energies: energies,
            converged: true,
            solver_iterations: 0,
            residual: 0.0,
        }
    }

    #[test]
    fn sensitivities_cover_design_elements_only() {
        let mesh = fixtures::grid_with_regions(3, 1, 1, 1.0, |i, _, _| {
            if i == 0 { Region::Solid } else { Region::Design }
        });
        let density = DensityField::uniform(&mesh, 0.5, 1e-3);
        let dc = compliance_sensitivities(&mesh, &density, &result(vec![9.0, 2.0, 4.0]), 3.0);
        assert_eq!(dc.len(), 2);
        assert_relative_eq!(dc[0], -3.0 * 0.25 * 2.0, epsilon = 1e-12);
        assert_relative_eq!(dc[1], -3.0 * 0.25 * 4.0, epsilon = 1e-12);
        assert!(dc.iter().all(|&s| s <= 0.0));
    }

    #[test]
    fn default_weights_are_uniform() {
        let agg = SensitivityAggregator::new(&CombinationRule::default(), 4).unwrap();
        assert_eq!(agg, SensitivityAggregator::WeightedSum(vec![0.25; 4]));
        let combined = agg.aggregate(&[
            vec![-4.0, 0.0],
            vec![0.0, -4.0],
            vec![-4.0, -4.0],
            vec![0.0, 0.0],
        ]);
        assert_eq!(combined, vec![-2.0, -2.0]);
        assert_relative_eq!(agg.objective(&[1.0, 2.0, 3.0, 6.0]), 3.0);
    }

    #[test]
    fn worst_case_takes_largest_magnitude() {
        let agg = SensitivityAggregator::new(&CombinationRule::WorstCase, 2).unwrap();
        let combined = agg.aggregate(&[vec![-1.0, -5.0, 0.0], vec![-3.0, -2.0, 0.0]]);
        assert_eq!(combined, vec![-3.0, -5.0, 0.0]);
        assert_eq!(agg.objective(&[4.0, 7.5]), 7.5);
    }

    #[test]
    fn weight_count_must_match_cases() {
        let rule = CombinationRule::WeightedSum {
            weights: Some(vec![0.5, 0.5]),
        };
        assert!(SensitivityAggregator::new(&rule, 3).is_err());
    }
}
