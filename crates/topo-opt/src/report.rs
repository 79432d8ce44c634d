//! Run report: the single output document of a run.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{CombinationRule, FilterKind};
use crate::convergence::{ConvergenceState, IterationRecord, IterationWarning};
use crate::error::Result;
use crate::mesh::MeshStatistics;
use crate::optimizer::{Optimizer, RunOutcome};
use crate::safety::SafetyVerdict;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub state: ConvergenceState,
    pub iterations: usize,
    pub final_objective: f64,
    pub final_volume_fraction: f64,
    pub target_volume_fraction: f64,
    pub greyness: f64,
    pub filter: FilterKind,
    /// Absolute filter radius [m]
    pub filter_radius: f64,
    pub combination: CombinationRule,
    pub penalty: f64,
    pub evaluator: String,
    pub material: String,
    /// Σ ρ v · material density [kg]
    pub mass_kg: f64,
    pub cost: f64,
    pub mesh: MeshStatistics,
    pub history: Vec<IterationRecord>,
    pub safety: Vec<SafetyVerdict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub final_warnings: Vec<IterationWarning>,
    /// Final physical density by element id
    pub densities: BTreeMap<i32, f64>,
}

impl RunReport {
    pub fn new(optimizer: &Optimizer, outcome: &RunOutcome) -> Self {
        let problem = optimizer.problem();
        let params = optimizer.params();
        let mesh = &*problem.mesh;
        let field = &outcome.state.densities;
        let mass_kg = field.material_volume(mesh) * problem.material.density;

        Self {
            state: outcome.state.state,
            iterations: outcome.state.iteration,
            final_objective: outcome.state.objective,
            final_volume_fraction: field.volume_fraction(mesh),
            target_volume_fraction: params.volume_fraction,
            greyness: field.greyness(mesh),
            filter: params.filter_kind,
            filter_radius: optimizer.filter().radius(),
            combination: params.combination.clone(),
            penalty: params.penalty,
            evaluator: optimizer.evaluator_name().to_string(),
            material: problem.material.name.clone(),
            mass_kg,
            cost: mass_kg * problem.material.cost_per_kg,
            mesh: mesh.statistics(),
            history: outcome.history.clone(),
            safety: outcome.safety.clone(),
            final_warnings: outcome.warnings.clone(),
            densities: field.by_element_id(mesh).into_iter().collect(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        topo_io::save_json(path, self)?;
        Ok(())
    }

    /// `element_id,density` rows in id order
    pub fn write_density_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let rows: Vec<(i32, f64)> = self.densities.iter().map(|(&id, &rho)| (id, rho)).collect();
        topo_io::write_density_csv(path, &rows)?;
        Ok(())
    }

    /// Short human-readable summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("State: {}", self.state.as_str()),
            format!("Iterations: {}", self.iterations),
            format!("Objective: {:.6e}", self.final_objective),
            format!(
                "Volume fraction: {:.4} (target {:.4})",
                self.final_volume_fraction, self.target_volume_fraction
            ),
            format!("Mass: {:.3} kg, cost: {:.2}", self.mass_kg, self.cost),
        ];
        for verdict in &self.safety {
            lines.push(format!(
                "  {:<12} SF {:>8.2} / {:.2} {}",
                verdict.load_case,
                verdict.observed_safety_factor,
                verdict.required_safety_factor,
                if verdict.passed { "PASS" } else { "FAIL" }
            ));
        }
        lines.join("\n")
    }
}
