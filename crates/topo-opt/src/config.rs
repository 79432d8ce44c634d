//! Run configuration.
//!
//! A run is described by one JSON document. It is read once, validated once
//! and then passed by reference into the optimizer; nothing re-reads it
//! during the loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::load_cases::{LoadCase, LoadCaseSet, LoadCaseSpec};
use crate::mesh_builder::RegionSets;

/// Iteration budget and objective tolerance presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunProfile {
    /// Short exploratory run
    Quick,
    #[default]
    Standard,
    Production,
}

impl RunProfile {
    pub fn max_iterations(self) -> usize {
        match self {
            RunProfile::Quick => 10,
            RunProfile::Standard => 50,
            RunProfile::Production => 100,
        }
    }

    pub fn objective_tolerance(self) -> f64 {
        match self {
            RunProfile::Quick => 1e-3,
            RunProfile::Standard => 1e-4,
            RunProfile::Production => 1e-6,
        }
    }
}

/// What the neighborhood filter is applied to. Fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Sensitivity,
    #[default]
    Density,
}

impl FilterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterKind::Sensitivity => "sensitivity",
            FilterKind::Density => "density",
        }
    }
}

/// How per-load-case sensitivities are combined. Fixed for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CombinationRule {
    /// Σ w_k · dC_k; weights default to 1/N
    WeightedSum {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weights: Option<Vec<f64>>,
    },
    /// Element-wise value of largest magnitude across cases
    WorstCase,
}

impl Default for CombinationRule {
    fn default() -> Self {
        CombinationRule::WeightedSum { weights: None }
    }
}

impl CombinationRule {
    pub fn validate(&self, num_cases: usize) -> Result<(), ConfigurationError> {
        let CombinationRule::WeightedSum {
            weights: Some(weights),
        } = self
        else {
            return Ok(());
        };
        if weights.len() != num_cases {
            return Err(ConfigurationError::InvalidWeights(format!(
                "{} weights given for {num_cases} load cases",
                weights.len()
            )));
        }
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(ConfigurationError::InvalidWeights(
                "weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigurationError::InvalidWeights(
                "weights must have a positive sum".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_penalty() -> f64 {
    3.0
}
fn default_filter_radius() -> f64 {
    1.7
}
fn default_move_limit() -> f64 {
    0.2
}
fn default_rho_min() -> f64 {
    1e-9
}
fn default_design_tolerance() -> f64 {
    1e-3
}
fn default_volume_tolerance() -> f64 {
    1e-4
}

/// Parameters of the optimization loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationParams {
    /// Target fraction of the design volume. Required, no default.
    pub volume_fraction: f64,
    /// SIMP penalty exponent p
    #[serde(default = "default_penalty")]
    pub penalty: f64,
    /// Filter radius as a multiple of the longest element edge
    #[serde(default = "default_filter_radius")]
    pub filter_radius: f64,
    #[serde(default)]
    pub filter_kind: FilterKind,
    #[serde(default = "default_move_limit")]
    pub move_limit: f64,
    #[serde(default = "default_rho_min")]
    pub rho_min: f64,
    /// Max element-wise density change for convergence
    #[serde(default = "default_design_tolerance")]
    pub design_tolerance: f64,
    /// Relative objective change for convergence; profile value when absent
    #[serde(default)]
    pub objective_tolerance: Option<f64>,
    /// Profile value when absent
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub profile: RunProfile,
    #[serde(default)]
    pub combination: CombinationRule,
    /// Allowed deviation of the volume fraction from the target after an update
    #[serde(default = "default_volume_tolerance")]
    pub volume_tolerance: f64,
    /// Concurrent load-case evaluations; available parallelism when absent
    #[serde(default)]
    pub workers: Option<usize>,
}

impl OptimizationParams {
    /// Parameters with defaults for everything but the volume fraction
    pub fn with_volume_fraction(volume_fraction: f64) -> Self {
        Self {
            volume_fraction,
            penalty: default_penalty(),
            filter_radius: default_filter_radius(),
            filter_kind: FilterKind::default(),
            move_limit: default_move_limit(),
            rho_min: default_rho_min(),
            design_tolerance: default_design_tolerance(),
            objective_tolerance: None,
            max_iterations: None,
            profile: RunProfile::default(),
            combination: CombinationRule::default(),
            volume_tolerance: default_volume_tolerance(),
            workers: None,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
            .unwrap_or_else(|| self.profile.max_iterations())
    }

    pub fn objective_tolerance(&self) -> f64 {
        self.objective_tolerance
            .unwrap_or_else(|| self.profile.objective_tolerance())
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn validate(&self, num_load_cases: usize) -> Result<(), ConfigurationError> {
        check_range(
            "volume_fraction",
            self.volume_fraction,
            |v| v > 0.0 && v <= 1.0,
            "0 < v <= 1",
        )?;
        check_range(
            "penalty",
            self.penalty,
            |v| (1.5..=5.0).contains(&v),
            "1.5 <= p <= 5",
        )?;
        check_range("filter_radius", self.filter_radius, |v| v > 0.0, "> 0")?;
        check_range(
            "move_limit",
            self.move_limit,
            |v| v > 0.0 && v <= 1.0,
            "0 < m <= 1",
        )?;
        check_range(
            "rho_min",
            self.rho_min,
            |v| v > 0.0 && v < 1.0,
            "0 < rho_min < 1",
        )?;
        check_range(
            "design_tolerance",
            self.design_tolerance,
            |v| v > 0.0,
            "> 0",
        )?;
        check_range(
            "objective_tolerance",
            self.objective_tolerance(),
            |v| v > 0.0,
            "> 0",
        )?;
        check_range(
            "volume_tolerance",
            self.volume_tolerance,
            |v| v > 0.0 && v < 1.0,
            "0 < tol < 1",
        )?;
        if self.volume_fraction < self.rho_min {
            return Err(ConfigurationError::OutOfRange {
                name: "volume_fraction",
                value: self.volume_fraction,
                expected: ">= rho_min",
            });
        }
        if self.max_iterations() == 0 {
            return Err(ConfigurationError::OutOfRange {
                name: "max_iterations",
                value: 0.0,
                expected: ">= 1",
            });
        }
        if self.workers == Some(0) {
            return Err(ConfigurationError::OutOfRange {
                name: "workers",
                value: 0.0,
                expected: ">= 1",
            });
        }
        self.combination.validate(num_load_cases)
    }
}

fn check_range(
    name: &'static str,
    value: f64,
    ok: impl Fn(f64) -> bool,
    expected: &'static str,
) -> Result<(), ConfigurationError> {
    if value.is_finite() && ok(value) {
        Ok(())
    } else {
        Err(ConfigurationError::OutOfRange {
            name,
            value,
            expected,
        })
    }
}

fn default_solver_tolerance() -> f64 {
    1e-8
}
fn default_solver_max_iterations() -> usize {
    20_000
}
fn default_relax_factor() -> f64 {
    100.0
}

/// Linear solver controls handed to the evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverParams {
    /// Relative residual tolerance
    #[serde(default = "default_solver_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_solver_max_iterations")]
    pub max_iterations: usize,
    /// Tolerance multiplier for the single retry after a failed solve
    #[serde(default = "default_relax_factor")]
    pub relax_factor: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            tolerance: default_solver_tolerance(),
            max_iterations: default_solver_max_iterations(),
            relax_factor: default_relax_factor(),
        }
    }
}

impl SolverParams {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_range(
            "solver.tolerance",
            self.tolerance,
            |v| v > 0.0 && v < 1.0,
            "0 < tol < 1",
        )?;
        check_range(
            "solver.relax_factor",
            self.relax_factor,
            |v| v >= 1.0,
            ">= 1",
        )?;
        if self.max_iterations == 0 {
            return Err(ConfigurationError::OutOfRange {
                name: "solver.max_iterations",
                value: 0.0,
                expected: ">= 1",
            });
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    600
}

/// Which FEA evaluator backs the run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorConfig {
    /// Sparse assembly and PCG solve inside this process
    #[default]
    InProcess,
    /// External solver program fed with XML descriptors
    External {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        work_dir: PathBuf,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        /// Leave successful job directories under `work_dir`
        #[serde(default)]
        keep_jobs: bool,
    },
}

impl EvaluatorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            EvaluatorConfig::InProcess => None,
            EvaluatorConfig::External { timeout_secs, .. } => {
                Some(Duration::from_secs(*timeout_secs))
            }
        }
    }
}

fn default_solid_set() -> String {
    "SOLID".to_string()
}
fn default_void_set() -> String {
    "VOID".to_string()
}
fn default_design_set() -> String {
    "DESIGN".to_string()
}
fn default_support_set() -> String {
    "SUPPORT".to_string()
}

/// Mesh file and the names of its regions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshInput {
    pub path: PathBuf,
    #[serde(default = "default_solid_set")]
    pub solid_set: String,
    #[serde(default = "default_void_set")]
    pub void_set: String,
    /// Element set holding the design elements in the mesh file
    #[serde(default = "default_design_set")]
    pub design_set: String,
    /// Node set fixed in all three directions
    #[serde(default = "default_support_set")]
    pub support_set: String,
}

impl MeshInput {
    pub fn region_sets(&self) -> RegionSets {
        RegionSets {
            solid: self.solid_set.clone(),
            void: self.void_set.clone(),
            design: self.design_set.clone(),
        }
    }
}

/// Output file locations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub report: Option<PathBuf>,
    #[serde(default)]
    pub density_csv: Option<PathBuf>,
}

fn default_material() -> String {
    "steel".to_string()
}

/// Complete configuration of one optimization run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub mesh: MeshInput,
    #[serde(default = "default_material")]
    pub material: String,
    /// JSON array of extra materials
    #[serde(default)]
    pub materials_file: Option<PathBuf>,
    /// Explicit load cases. When empty, the four wall-mount scenarios are
    /// derived from `tv_mass_kg`.
    #[serde(default)]
    pub load_cases: Vec<LoadCaseSpec>,
    #[serde(default)]
    pub tv_mass_kg: Option<f64>,
    /// Application node sets of the derived wall-mount scenarios
    #[serde(default)]
    pub mount_sets: Vec<String>,
    pub optimization: OptimizationParams,
    #[serde(default)]
    pub solver: SolverParams,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Progress and warnings on stderr
    #[serde(default)]
    pub verbose: bool,
}

impl RunConfig {
    /// Read, resolve relative paths against the file's directory, validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let mut config: RunConfig = topo_io::load_json(path)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.mesh.path);
        if let Some(p) = self.materials_file.as_mut() {
            resolve(p);
        }
        if let EvaluatorConfig::External { work_dir, .. } = &mut self.evaluator {
            resolve(work_dir);
        }
        if let Some(p) = self.output.report.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.output.density_csv.as_mut() {
            resolve(p);
        }
    }

    /// Validated load case set
    pub fn load_cases(&self) -> Result<LoadCaseSet, ConfigurationError> {
        if !self.load_cases.is_empty() {
            let cases = self
                .load_cases
                .iter()
                .cloned()
                .map(LoadCase::new)
                .collect::<Result<Vec<_>, _>>()?;
            return LoadCaseSet::new(cases);
        }
        match self.tv_mass_kg {
            Some(mass) if mass.is_finite() && mass > 0.0 => {
                let sets = if self.mount_sets.is_empty() {
                    vec!["LOAD".to_string()]
                } else {
                    self.mount_sets.clone()
                };
                LoadCaseSet::tv_mount_defaults(mass, &sets)
            }
            Some(mass) => Err(ConfigurationError::OutOfRange {
                name: "tv_mass_kg",
                value: mass,
                expected: "> 0",
            }),
            None => Err(ConfigurationError::NoLoadCases),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let cases = self.load_cases()?;
        self.optimization.validate(cases.len())?;
        self.solver.validate()?;
        if let EvaluatorConfig::External { timeout_secs, .. } = &self.evaluator
            && *timeout_secs == 0
        {
            return Err(ConfigurationError::OutOfRange {
                name: "evaluator.timeout_secs",
                value: 0.0,
                expected: ">= 1",
            });
        }
        Ok(())
    }
}
