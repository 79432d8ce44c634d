//! In-process evaluator: sparse assembly of SIMP-scaled hexahedra and a
//! preconditioned CG solve.

use std::sync::Arc;

use rayon::prelude::*;

use super::{EvaluationResult, FeaEvaluator, SolveOptions, stiffness_factors};
use crate::assembly::{
    ElementStiffnessCache, SparseGlobalSystem, element_displacements, load_vector, support_dofs,
};
use crate::backend::{self, LinearSolver, SolverControls};
use crate::density::DensityField;
use crate::elements::Elasticity;
use crate::error::{ConfigurationError, EvaluationError, MeshTopologyError, Result};
use crate::load_cases::LoadCase;
use crate::materials::MaterialProperties;
use crate::mesh::Mesh;

pub struct InProcessEvaluator {
    mesh: Arc<Mesh>,
    elasticity: Elasticity,
    cache: ElementStiffnessCache,
    supports: Vec<usize>,
    backend: Box<dyn LinearSolver>,
}

impl InProcessEvaluator {
    /// Precompute unit-density element matrices and the supported DOFs
    pub fn new(mesh: Arc<Mesh>, material: &MaterialProperties, support_set: &str) -> Result<Self> {
        let elasticity = material.elasticity();
        let supports = support_dofs(&mesh, support_set)
            .ok_or_else(|| ConfigurationError::MissingNodeSet(support_set.to_string()))?;
        if supports.is_empty() {
            return Err(ConfigurationError::Invalid(format!(
                "support set '{support_set}' is empty"
            ))
            .into());
        }
        let cache = ElementStiffnessCache::build(&mesh, &elasticity)?;
        Ok(Self {
            mesh,
            elasticity,
            cache,
            supports,
            backend: backend::default_backend(),
        })
    }

    /// Swap the linear solver backend
    pub fn with_backend(mut self, backend: Box<dyn LinearSolver>) -> Self {
        self.backend = backend;
        self
    }
}

impl FeaEvaluator for InProcessEvaluator {
    fn evaluate(
        &self,
        density: &DensityField,
        load_case: &LoadCase,
        options: &SolveOptions,
    ) -> std::result::Result<EvaluationResult, EvaluationError> {
        let mesh = &*self.mesh;
        let input_error = |reason: String| EvaluationError::Mesh(MeshTopologyError::Input(reason));
        if density.len() != mesh.num_elements() {
            return Err(input_error(format!(
                "density field has {} values for {} elements",
                density.len(),
                mesh.num_elements()
            )));
        }

        let factors = stiffness_factors(density, options.penalty);
        let force = load_vector(mesh, load_case).map_err(input_error)?;
        let system = SparseGlobalSystem::assemble(mesh, &self.cache, &factors, &self.supports, force)
            .map_err(input_error)?;
        let applied = system.force.clone();

        let controls = SolverControls {
            tolerance: options.tolerance,
            max_iterations: options.max_iterations,
        };
        let solve_failure = |reason: String| EvaluationError::SolveFailure {
            load_case: load_case.name().to_string(),
            reason,
        };
        let (u, info) = self
            .backend
            .solve_linear(&system.into_linear_system_data(), &controls)
            .map_err(|e| solve_failure(e.0))?;
        if !info.converged {
            return Err(solve_failure(format!(
                "{} did not converge in {} iterations (relative residual {:.3e}, tolerance {:.1e})",
                info.solver_name, info.iterations, info.residual_norm, options.tolerance
            )));
        }

        let compliance = applied.dot(&u);
        let strain_energies = self.cache.strain_energies(mesh, &u);
        let von_mises = (0..mesh.num_elements())
            .into_par_iter()
            .map(|e| {
                let u_e = element_displacements(mesh, e, &u);
                mesh.element_geometry(e)
                    .centre_stress(&self.elasticity.scaled(factors[e]), &u_e)
                    .map(|s| s.mises())
                    .map_err(|reason| {
                        input_error(format!("element {}: {reason}", mesh.elements()[e].id))
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(EvaluationResult {
            load_case: load_case.name().to_string(),
            displacements: u,
            compliance,
            von_mises,
            strain_energies,
            converged: true,
            solver_iterations: info.iterations,
            residual: info.residual_norm,
        })
    }

    fn name(&self) -> &str {
        "in-process"
    }
}
