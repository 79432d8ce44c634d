//! Out-of-process evaluator.
//!
//! Each call gets its own job directory under the work directory:
//!
//! ```text
//! <work_dir>/<seq>_<load case>/
//!   simulation.xml   descriptor (input)
//!   density.dat      element densities (input)
//!   result.xml       written by the program (output)
//!   solver.log       program stdout + stderr
//! ```
//!
//! The program is started as `<program> <args...> simulation.xml` inside the
//! job directory. A non-zero exit, a timeout or `converged="false"` is a
//! solve failure; a missing or unreadable result file is fatal.
//!
//! The job directory is removed once its result has been read, unless
//! `keep_jobs` is set. Failed jobs are left in place with their log.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nalgebra::DVector;
use topo_io::{DescriptorForce, DescriptorMaterial, SimulationDescriptor};

use super::{EvaluationResult, FeaEvaluator, SolveOptions, stiffness_factors};
use crate::assembly::ElementStiffnessCache;
use crate::density::DensityField;
use crate::error::{ConfigurationError, EvaluationError, Result};
use crate::load_cases::LoadCase;
use crate::materials::MaterialProperties;
use crate::mesh::Mesh;
use crate::mesh_builder::RegionSets;

const DESCRIPTOR_FILE: &str = "simulation.xml";
const DENSITY_FILE: &str = "density.dat";
const RESULT_FILE: &str = "result.xml";
const LOG_FILE: &str = "solver.log";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where and how to run the external program
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Per-evaluation wall-clock limit
    pub timeout: Duration,
    /// Mesh file referenced by the descriptor
    pub mesh_file: PathBuf,
    pub support_set: String,
    pub region_sets: RegionSets,
    /// Leave successful job directories on disk
    pub keep_jobs: bool,
}

pub struct ExternalEvaluator {
    mesh: Arc<Mesh>,
    material: MaterialProperties,
    settings: ExternalSettings,
    cache: ElementStiffnessCache,
    sequence: AtomicUsize,
}

impl ExternalEvaluator {
    pub fn new(
        mesh: Arc<Mesh>,
        material: &MaterialProperties,
        settings: ExternalSettings,
    ) -> Result<Self> {
        if mesh.node_set(&settings.support_set).is_none() {
            return Err(ConfigurationError::MissingNodeSet(settings.support_set.clone()).into());
        }
        fs::create_dir_all(&settings.work_dir).map_err(|e| {
            ConfigurationError::Invalid(format!(
                "cannot create work directory {}: {e}",
                settings.work_dir.display()
            ))
        })?;
        // unit-density matrices turn returned displacements into strain energies
        let cache = ElementStiffnessCache::build(&mesh, &material.elasticity())?;
        Ok(Self {
            mesh,
            material: material.clone(),
            settings,
            cache,
            sequence: AtomicUsize::new(0),
        })
    }

    fn descriptor(&self, job_name: &str, load_case: &LoadCase, options: &SolveOptions) -> SimulationDescriptor {
        SimulationDescriptor {
            job_name: job_name.to_string(),
            load_case: load_case.name().to_string(),
            load_type: load_case.load_type().as_str().to_string(),
            description: load_case.description().to_string(),
            required_safety_factor: load_case.required_safety_factor(),
            mesh_file: self.settings.mesh_file.display().to_string(),
            density_file: DENSITY_FILE.to_string(),
            result_file: RESULT_FILE.to_string(),
            design_region: self.settings.region_sets.design.clone(),
            fixed_regions: vec![
                self.settings.region_sets.solid.clone(),
                self.settings.region_sets.void.clone(),
            ],
            material: DescriptorMaterial {
                name: self.material.name.clone(),
                youngs_modulus: self.material.youngs_modulus,
                poisson_ratio: self.material.poisson_ratio,
                density: self.material.density,
            },
            penalty: options.penalty,
            solver_tolerance: options.tolerance,
            max_solver_iterations: options.max_iterations,
            supports: vec![self.settings.support_set.clone()],
            forces: load_case
                .application_sets()
                .iter()
                .map(|set| DescriptorForce {
                    node_set: set.clone(),
                    force: load_case.force(),
                })
                .collect(),
        }
    }

    /// Run the program in `job_dir`. `Ok(None)` on success, `Ok(Some(reason))`
    /// when the run counts as a solve failure.
    fn run_program(&self, job_dir: &Path) -> std::result::Result<Option<String>, EvaluationError> {
        let log = File::create(job_dir.join(LOG_FILE))?;
        let mut child = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .arg(DESCRIPTOR_FILE)
            .current_dir(job_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.settings.timeout {
                child.kill()?;
                child.wait()?;
                return Ok(Some(format!(
                    "timed out after {:.1} s",
                    self.settings.timeout.as_secs_f64()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Ok(Some(format!(
                "{} exited with {status}",
                self.settings.program.display()
            )));
        }
        Ok(None)
    }
}

impl FeaEvaluator for ExternalEvaluator {
    fn evaluate(
        &self,
        density: &DensityField,
        load_case: &LoadCase,
        options: &SolveOptions,
    ) -> std::result::Result<EvaluationResult, EvaluationError> {
        let mesh = &*self.mesh;
        let name = load_case.name();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let job_name = format!("{seq:05}_{}", sanitize(name));
        let job_dir = self.settings.work_dir.join(&job_name);
        fs::create_dir_all(&job_dir)?;

        topo_io::write_density_file(job_dir.join(DENSITY_FILE), &density.by_element_id(mesh))?;
        topo_io::write_descriptor(
            job_dir.join(DESCRIPTOR_FILE),
            &self.descriptor(&job_name, load_case, options),
        )?;

        if let Some(reason) = self.run_program(&job_dir)? {
            return Err(EvaluationError::SolveFailure {
                load_case: name.to_string(),
                reason,
            });
        }

        let malformed = |reason: String| EvaluationError::MalformedResult {
            load_case: name.to_string(),
            reason,
        };
        let raw = topo_io::read_evaluation_result(job_dir.join(RESULT_FILE))
            .map_err(|e| malformed(e.to_string()))?;
        if !raw.converged {
            return Err(EvaluationError::SolveFailure {
                load_case: name.to_string(),
                reason: format!(
                    "external solver reported non-convergence after {} iterations (residual {:.3e})",
                    raw.iterations, raw.residual
                ),
            });
        }

        let mut displacements = DVector::zeros(mesh.num_dofs());
        for (n, node) in mesh.nodes().iter().enumerate() {
            let u = raw
                .displacements
                .get(&node.id)
                .ok_or_else(|| malformed(format!("no displacement for node {}", node.id)))?;
            for d in 0..3 {
                displacements[n * 3 + d] = u[d];
            }
        }
        let von_mises = mesh
            .elements()
            .iter()
            .map(|e| {
                raw.stresses
                    .get(&e.id)
                    .copied()
                    .ok_or_else(|| malformed(format!("no stress for element {}", e.id)))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let strain_energies = self.cache.strain_energies(mesh, &displacements);
        let compliance = match raw.compliance {
            Some(c) => c,
            None => stiffness_factors(density, options.penalty)
                .iter()
                .zip(&strain_energies)
                .map(|(f, w)| f * w)
                .sum(),
        };

        if !self.settings.keep_jobs {
            fs::remove_dir_all(&job_dir)?;
        }

        Ok(EvaluationResult {
            load_case: name.to_string(),
            displacements,
            compliance,
            von_mises,
            strain_energies,
            converged: true,
            solver_iterations: raw.iterations,
            residual: raw.residual,
        })
    }

    fn name(&self) -> &str {
        "external"
    }
}

/// Load case names become directory names
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
