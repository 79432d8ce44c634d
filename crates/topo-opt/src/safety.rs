//! Safety factors of the final design.
//!
//! The governing strength is the fatigue limit for fatigue cases and the
//! yield strength otherwise. A case passes when the observed factor reaches
//! the factor required by the load case.

use serde::{Deserialize, Serialize};

use crate::evaluator::EvaluationResult;
use crate::load_cases::{LoadCase, LoadType};
use crate::materials::MaterialProperties;
use crate::mesh::Mesh;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthLimit {
    Yield,
    Fatigue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub load_case: String,
    pub load_type: LoadType,
    /// Peak von Mises stress [Pa]
    pub max_stress: f64,
    /// Element id carrying the peak stress
    pub critical_element: Option<i32>,
    pub limit: StrengthLimit,
    /// [Pa]
    pub strength: f64,
    pub observed_safety_factor: f64,
    pub required_safety_factor: f64,
    /// observed − required
    pub margin: f64,
    pub passed: bool,
    /// ultimate strength / peak stress
    pub ultimate_safety_factor: f64,
    /// required / observed
    pub utilization: f64,
}

pub struct SafetyEvaluator<'a> {
    material: &'a MaterialProperties,
}

impl<'a> SafetyEvaluator<'a> {
    pub fn new(material: &'a MaterialProperties) -> Self {
        Self { material }
    }

    /// Verdict for one load case from its element stresses
    pub fn evaluate(&self, mesh: &Mesh, case: &LoadCase, result: &EvaluationResult) -> SafetyVerdict {
        let (limit, strength) = match case.load_type() {
            LoadType::Fatigue => (StrengthLimit::Fatigue, self.material.fatigue_limit),
            _ => (StrengthLimit::Yield, self.material.yield_strength),
        };
        let (critical_element, max_stress) = match result.max_stress() {
            Some((e, s)) if s > 0.0 => (Some(mesh.elements()[e].id), s),
            _ => (None, 0.0),
        };
        let factor = |capacity: f64| {
            if max_stress > 0.0 {
                capacity / max_stress
            } else {
                f64::INFINITY
            }
        };
        let observed = factor(strength);
        let required = case.required_safety_factor();

        SafetyVerdict {
            load_case: case.name().to_string(),
            load_type: case.load_type(),
            max_stress,
            critical_element,
            limit,
            strength,
            observed_safety_factor: observed,
            required_safety_factor: required,
            margin: observed - required,
            passed: observed >= required,
            ultimate_safety_factor: factor(self.material.ultimate_strength),
            utilization: required / observed,
        }
    }

    /// One verdict per load case, pairing cases and results by position
    pub fn evaluate_all(
        &self,
        mesh: &Mesh,
        cases: &[LoadCase],
        results: &[EvaluationResult],
    ) -> Vec<SafetyVerdict> {
        cases
            .iter()
            .zip(results)
            .map(|(case, result)| self.evaluate(mesh, case, result))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_cases::LoadCaseSpec;
    use crate::mesh::fixtures;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn case(load_type: LoadType, required: f64) -> LoadCase {
        LoadCase::new(LoadCaseSpec {
            name: format!("{load_type:?}"),
            load_type,
            force_magnitude: 100.0,
            force_direction: [0.0, 0.0, -1.0],
            required_safety_factor: required,
            cycles: None,
            frequency: None,
            description: String::new(),
            application_sets: vec!["LOAD".to_string()],
        })
        .unwrap()
    }

    fn result(stresses: Vec<f64>) -> EvaluationResult {
        EvaluationResult {
            load_case: "case".to_string(),
            displacements: DVector::zeros(0),
            compliance: 1.0,
            strain_energies: vec![0.0; stresses.len()],
            von_mises: stresses,
            converged: true,
            solver_iterations: 1,
            residual: 0.0,
        }
    }

    fn material() -> MaterialProperties {
        MaterialProperties {
            yield_strength: 250e6,
            fatigue_limit: 120e6,
            ultimate_strength: 400e6,
            ..MaterialProperties::steel()
        }
    }

    #[test]
    fn static_case_uses_yield_strength() {
        let mesh = fixtures::grid(2, 1, 1, 1.0);
        let material = material();
        let verdict = SafetyEvaluator::new(&material).evaluate(
            &mesh,
            &case(LoadType::Static, 2.0),
            &result(vec![10e6, 50e6]),
        );
        assert_eq!(verdict.limit, StrengthLimit::Yield);
        assert_relative_eq!(verdict.observed_safety_factor, 5.0);
        assert_relative_eq!(verdict.margin, 3.0);
        assert!(verdict.passed);
        assert_eq!(verdict.critical_element, Some(2));
        assert_relative_eq!(verdict.ultimate_safety_factor, 8.0);
        assert_relative_eq!(verdict.utilization, 0.4);
    }

    #[test]
    fn fatigue_case_uses_fatigue_limit() {
        let mesh = fixtures::grid(2, 1, 1, 1.0);
        let material = material();
        let verdict = SafetyEvaluator::new(&material).evaluate(
            &mesh,
            &case(LoadType::Fatigue, 5.0),
            &result(vec![60e6, 0.0]),
        );
        assert_eq!(verdict.limit, StrengthLimit::Fatigue);
        assert_relative_eq!(verdict.observed_safety_factor, 2.0);
        assert!(!verdict.passed);
        assert_relative_eq!(verdict.margin, -3.0);
    }

    #[test]
    fn zero_stress_passes_with_infinite_factor() {
        let mesh = fixtures::grid(2, 1, 1, 1.0);
        let material = material();
        let verdict = SafetyEvaluator::new(&material).evaluate(
            &mesh,
            &case(LoadType::Seismic, 3.0),
            &result(vec![0.0, 0.0]),
        );
        assert!(verdict.observed_safety_factor.is_infinite());
        assert!(verdict.passed);
        assert_eq!(verdict.critical_element, None);
        assert_eq!(verdict.utilization, 0.0);
    }
}
