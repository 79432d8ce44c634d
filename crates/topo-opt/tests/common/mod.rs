//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::DVector;
use topo_opt::error::EvaluationError;
use topo_opt::mesh::ElementDef;
use topo_opt::{
    DensityField, EvaluationResult, FeaEvaluator, LoadCase, LoadCaseSet, LoadCaseSpec, LoadType,
    MaterialProperties, Mesh, Node, Problem, Region, SolveOptions,
};

fn node_id(nx: usize, ny: usize, i: usize, j: usize, k: usize) -> i32 {
    (1 + i + j * (nx + 1) + k * (nx + 1) * (ny + 1)) as i32
}

/// Cantilever brick grid: `SUPPORT` is the x = 0 face, `LOAD` the bottom
/// edge (y = 0) of the free end.
pub fn cantilever(nx: usize, ny: usize, nz: usize, h: f64) -> Mesh {
    let mut nodes = Vec::new();
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                nodes.push(Node::new(
                    node_id(nx, ny, i, j, k),
                    i as f64 * h,
                    j as f64 * h,
                    k as f64 * h,
                ));
            }
        }
    }
    let mut elements = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let n = |di, dj, dk| node_id(nx, ny, i + di, j + dj, k + dk);
                elements.push(ElementDef::new(
                    elements.len() as i32 + 1,
                    vec![
                        n(0, 0, 0),
                        n(1, 0, 0),
                        n(1, 1, 0),
                        n(0, 1, 0),
                        n(0, 0, 1),
                        n(1, 0, 1),
                        n(1, 1, 1),
                        n(0, 1, 1),
                    ],
                    Region::Design,
                ));
            }
        }
    }
    let mut sets = BTreeMap::new();
    sets.insert(
        "SUPPORT".to_string(),
        (0..=nz)
            .flat_map(|k| (0..=ny).map(move |j| node_id(nx, ny, 0, j, k)))
            .collect(),
    );
    sets.insert(
        "LOAD".to_string(),
        (0..=nz).map(|k| node_id(nx, ny, nx, 0, k)).collect(),
    );
    Mesh::from_parts(nodes, elements, sets).expect("cantilever grid is valid")
}

/// The same cantilever as an input deck
pub fn cantilever_inp(nx: usize, ny: usize, nz: usize, h: f64) -> String {
    let mut out = String::from("*NODE\n");
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                out.push_str(&format!(
                    "{}, {}, {}, {}\n",
                    node_id(nx, ny, i, j, k),
                    i as f64 * h,
                    j as f64 * h,
                    k as f64 * h
                ));
            }
        }
    }
    out.push_str("*ELEMENT, TYPE=C3D8, ELSET=EALL\n");
    let mut id = 1;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let n = |di, dj, dk| node_id(nx, ny, i + di, j + dj, k + dk);
                out.push_str(&format!(
                    "{id}, {}, {}, {}, {}, {}, {}, {}, {}\n",
                    n(0, 0, 0),
                    n(1, 0, 0),
                    n(1, 1, 0),
                    n(0, 1, 0),
                    n(0, 0, 1),
                    n(1, 0, 1),
                    n(1, 1, 1),
                    n(0, 1, 1)
                ));
                id += 1;
            }
        }
    }
    let support: Vec<String> = (0..=nz)
        .flat_map(|k| (0..=ny).map(move |j| node_id(nx, ny, 0, j, k).to_string()))
        .collect();
    out.push_str("*NSET, NSET=SUPPORT\n");
    out.push_str(&support.join(", "));
    out.push('\n');
    let load: Vec<String> = (0..=nz).map(|k| node_id(nx, ny, nx, 0, k).to_string()).collect();
    out.push_str("*NSET, NSET=LOAD\n");
    out.push_str(&load.join(", "));
    out.push('\n');
    out
}

pub fn load_case(name: &str, load_type: LoadType, required: f64) -> LoadCase {
    LoadCase::new(LoadCaseSpec {
        name: name.to_string(),
        load_type,
        force_magnitude: 1000.0,
        force_direction: [0.0, -1.0, 0.0],
        required_safety_factor: required,
        cycles: None,
        frequency: None,
        description: String::new(),
        application_sets: vec!["LOAD".to_string()],
    })
    .expect("valid load case")
}

pub fn problem(mesh: Mesh, cases: Vec<LoadCase>) -> Problem {
    Problem {
        mesh: Arc::new(mesh),
        material: MaterialProperties::steel(),
        load_cases: LoadCaseSet::new(cases).expect("valid load case set"),
    }
}

/// Test double: every element carries `energy` strain energy and `stress`
/// von Mises stress, per load case name.
pub struct UniformResponse {
    pub energy: f64,
    pub stress: Vec<(String, f64)>,
    pub calls: AtomicUsize,
}

impl UniformResponse {
    pub fn new(energy: f64) -> Self {
        Self {
            energy,
            stress: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_stress(mut self, load_case: &str, stress: f64) -> Self {
        self.stress.push((load_case.to_string(), stress));
        self
    }
}

impl FeaEvaluator for UniformResponse {
    fn evaluate(
        &self,
        density: &DensityField,
        load_case: &LoadCase,
        options: &SolveOptions,
    ) -> Result<EvaluationResult, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = density.len();
        let stress = self
            .stress
            .iter()
            .find(|(name, _)| name == load_case.name())
            .map_or(1e6, |(_, s)| *s);
        Ok(EvaluationResult {
            load_case: load_case.name().to_string(),
            displacements: DVector::zeros(3),
            compliance: density
                .values()
                .iter()
                .map(|r| r.powf(options.penalty) * self.energy)
                .sum(),
            von_mises: vec![stress; n],
            strain_energies: vec![self.energy; n],
            converged: true,
            solver_iterations: 1,
            residual: 0.0,
        })
    }

    fn name(&self) -> &str {
        "uniform-response"
    }
}
