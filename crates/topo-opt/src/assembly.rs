//! Global matrix assembly for the SIMP-scaled hexahedral system.
//!
//! ## Assembly Process
//!
//! 1. Unit-density element matrices k_e⁰ are computed once per run
//!    ([`ElementStiffnessCache`])
//! 2. Every evaluation scales them by the element's SIMP factor and pushes
//!    the 24×24 blocks as COO triplets
//! 3. Rows and columns of supported DOFs are dropped and replaced by a unit
//!    diagonal; their load is zeroed
//! 4. COO is converted to CSR (duplicates are summed) for the solver

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

use crate::backend::LinearSystemData;
use crate::elements::{ElementMatrix, ElementVector, Elasticity};
use crate::error::MeshTopologyError;
use crate::load_cases::LoadCase;
use crate::mesh::Mesh;

/// Unit-density element stiffness matrices, indexed like `mesh.elements()`
#[derive(Debug, Clone)]
pub struct ElementStiffnessCache {
    matrices: Vec<ElementMatrix>,
}

impl ElementStiffnessCache {
    pub fn build(mesh: &Mesh, elasticity: &Elasticity) -> Result<Self, MeshTopologyError> {
        let matrices = (0..mesh.num_elements())
            .into_par_iter()
            .map(|e| {
                mesh.element_geometry(e)
                    .stiffness_matrix(elasticity)
                    .map_err(|reason| {
                        MeshTopologyError::Input(format!(
                            "element {}: {reason}",
                            mesh.elements()[e].id
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matrices })
    }

    pub fn get(&self, element: usize) -> &ElementMatrix {
        &self.matrices[element]
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    /// u_eᵀ k_e⁰ u_e for every element
    pub fn strain_energies(&self, mesh: &Mesh, displacements: &DVector<f64>) -> Vec<f64> {
        (0..self.matrices.len())
            .into_par_iter()
            .map(|e| {
                let u_e = element_displacements(mesh, e, displacements);
                u_e.dot(&(self.matrices[e] * u_e))
            })
            .collect()
    }
}

/// Gather the 24 nodal displacements of an element
pub fn element_displacements(mesh: &Mesh, element: usize, u: &DVector<f64>) -> ElementVector {
    let dofs = mesh.element_dofs(element);
    ElementVector::from_fn(|i, _| u[dofs[i]])
}

/// All three DOFs of every node in the support set
pub fn support_dofs(mesh: &Mesh, support_set: &str) -> Option<Vec<usize>> {
    let nodes = mesh.node_set(support_set)?;
    let mut dofs: Vec<usize> = nodes
        .iter()
        .flat_map(|&n| [n * 3, n * 3 + 1, n * 3 + 2])
        .collect();
    dofs.sort_unstable();
    dofs.dedup();
    Some(dofs)
}

/// Nodal load vector of a load case.
///
/// Each application set receives the full case force, split evenly over its
/// nodes.
pub fn load_vector(mesh: &Mesh, case: &LoadCase) -> Result<DVector<f64>, String> {
    let mut force = DVector::zeros(mesh.num_dofs());
    let f = case.force();
    for set in case.application_sets() {
        let nodes = mesh
            .node_set(set)
            .ok_or_else(|| format!("load set '{set}' is not defined in the mesh"))?;
        if nodes.is_empty() {
            return Err(format!("load set '{set}' is empty"));
        }
        let share = 1.0 / nodes.len() as f64;
        for &n in nodes {
            for d in 0..3 {
                force[n * 3 + d] += f[d] * share;
            }
        }
    }
    Ok(force)
}

/// Sparse global finite element system using CSR format
#[derive(Debug, Clone)]
pub struct SparseGlobalSystem {
    /// Global stiffness matrix in CSR format (supports eliminated)
    pub stiffness: CsrMatrix<f64>,
    /// Global force vector (zero at supports)
    pub force: DVector<f64>,
    pub num_dofs: usize,
    pub constrained_dofs: Vec<usize>,
}

impl SparseGlobalSystem {
    /// Assemble K = Σ factor_e · k_e⁰ with the given DOFs eliminated.
    ///
    /// `factors` holds one stiffness multiplier per element (SIMP factor,
    /// already floored by the caller).
    pub fn assemble(
        mesh: &Mesh,
        cache: &ElementStiffnessCache,
        factors: &[f64],
        constrained_dofs: &[usize],
        mut force: DVector<f64>,
    ) -> Result<Self, String> {
        let num_dofs = mesh.num_dofs();
        if factors.len() != mesh.num_elements() || cache.len() != mesh.num_elements() {
            return Err(format!(
                "{} stiffness factors and {} element matrices for {} elements",
                factors.len(),
                cache.len(),
                mesh.num_elements()
            ));
        }
        if force.len() != num_dofs {
            return Err(format!(
                "force vector has {} entries for {} DOFs",
                force.len(),
                num_dofs
            ));
        }

        let mut constrained = vec![false; num_dofs];
        for &dof in constrained_dofs {
            if dof >= num_dofs {
                return Err(format!("BC DOF index {dof} out of range (max {num_dofs})"));
            }
            constrained[dof] = true;
        }

        let capacity = mesh.num_elements() * 24 * 24 + constrained_dofs.len();
        let mut rows = Vec::with_capacity(capacity);
        let mut cols = Vec::with_capacity(capacity);
        let mut values = Vec::with_capacity(capacity);

        for (e, &factor) in factors.iter().enumerate() {
            let k_e = cache.get(e);
            let dofs = mesh.element_dofs(e);
            for (i_local, &i_global) in dofs.iter().enumerate() {
                if constrained[i_global] {
                    continue;
                }
                for (j_local, &j_global) in dofs.iter().enumerate() {
                    if constrained[j_global] {
                        continue;
                    }
                    rows.push(i_global);
                    cols.push(j_global);
                    values.push(factor * k_e[(i_local, j_local)]);
                }
            }
        }

        for (dof, &fixed) in constrained.iter().enumerate() {
            if fixed {
                rows.push(dof);
                cols.push(dof);
                values.push(1.0);
                force[dof] = 0.0;
            }
        }

        let coo = CooMatrix::try_from_triplets(num_dofs, num_dofs, rows, cols, values)
            .map_err(|e| format!("Failed to create COO matrix: {:?}", e))?;

        Ok(Self {
            stiffness: CsrMatrix::from(&coo),
            force,
            num_dofs,
            constrained_dofs: constrained_dofs.to_vec(),
        })
    }

    /// Hand the system to a solver backend
    pub fn into_linear_system_data(self) -> LinearSystemData {
        LinearSystemData {
            stiffness: self.stiffness,
            force: self.force,
            num_dofs: self.num_dofs,
            constrained_dofs: self.constrained_dofs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_cases::{LoadCaseSpec, LoadType};
    use crate::mesh::fixtures;
    use approx::assert_relative_eq;

    fn elasticity() -> Elasticity {
        Elasticity::new(1.0, 0.3)
    }

    fn case(sets: &[&str]) -> LoadCase {
        LoadCase::new(LoadCaseSpec {
            name: "down".to_string(),
            load_type: LoadType::Static,
            force_magnitude: 12.0,
            force_direction: [0.0, -1.0, 0.0],
            required_safety_factor: 2.0,
            cycles: None,
            frequency: None,
            description: String::new(),
            application_sets: sets.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn load_is_split_evenly_over_set_nodes() {
        let mesh = fixtures::grid(2, 1, 1, 1.0);
        let f = load_vector(&mesh, &case(&["TIP"])).unwrap();
        let tip = mesh.node_set("TIP").unwrap();
        assert_eq!(tip.len(), 2);
        for &n in tip {
            assert_relative_eq!(f[n * 3 + 1], -6.0, epsilon = 1e-12);
        }
        assert_relative_eq!(f.sum(), -12.0, epsilon = 1e-12);
        assert!(load_vector(&mesh, &case(&["NOPE"])).is_err());
    }

    #[test]
    fn supports_are_eliminated() {
        let mesh = fixtures::grid(1, 1, 1, 1.0);
        let cache = ElementStiffnessCache::build(&mesh, &elasticity()).unwrap();
        let fixed = support_dofs(&mesh, "FIXED_X0").unwrap();
        assert_eq!(fixed.len(), 12);

        let mut force = DVector::zeros(mesh.num_dofs());
        force[fixed[0]] = 5.0;
        let system =
            SparseGlobalSystem::assemble(&mesh, &cache, &[1.0], &fixed, force).unwrap();

        assert_eq!(system.force[fixed[0]], 0.0);
        for &dof in &fixed {
            let row = system.stiffness.row(dof);
            assert_eq!(row.col_indices(), &[dof]);
            assert_eq!(row.values(), &[1.0]);
        }
    }

    #[test]
    fn assembled_matrix_scales_with_factor() {
        let mesh = fixtures::grid(2, 1, 1, 1.0);
        let cache = ElementStiffnessCache::build(&mesh, &elasticity()).unwrap();
        let force = DVector::zeros(mesh.num_dofs());
        let full = SparseGlobalSystem::assemble(&mesh, &cache, &[1.0, 1.0], &[], force.clone())
            .unwrap();
        let half = SparseGlobalSystem::assemble(&mesh, &cache, &[0.5, 0.5], &[], force).unwrap();
        for (a, b) in full.stiffness.values().iter().zip(half.stiffness.values()) {
            assert_relative_eq!(0.5 * a, *b, epsilon = 1e-15);
        }
    }

    #[test]
    fn strain_energy_matches_quadratic_form() {
        let mesh = fixtures::grid(1, 1, 1, 1.0);
        let cache = ElementStiffnessCache::build(&mesh, &elasticity()).unwrap();
        // uniform stretch u_x = 0.01 x
        let mut u = DVector::zeros(mesh.num_dofs());
        for (n, node) in mesh.nodes().iter().enumerate() {
            u[n * 3] = 0.01 * node.x;
        }
        let energy = cache.strain_energies(&mesh, &u)[0];
        // ε_xx = 0.01 on a unit cube: uᵀKu = ε² E(1-ν)/((1+ν)(1-2ν))
        let c11 = (1.0 - 0.3) / ((1.0 + 0.3) * (1.0 - 0.6));
        assert_relative_eq!(energy, 1e-4 * c11, epsilon = 1e-12);
    }
}
