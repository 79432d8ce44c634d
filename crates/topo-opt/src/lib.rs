//! SIMP topology optimization of a wall-mount design domain.
//!
//! A hexahedral mesh split into design, solid and void regions is optimized
//! for minimum compliance under a set of load cases at a target volume
//! fraction. Each iteration evaluates every load case (in process, or through
//! an external FEA program), combines the compliance sensitivities, filters
//! them and updates the density field with the optimality-criteria rule.
//! The final design is checked against the strength limits of the material.

pub mod analysis;
pub mod assembly;
pub mod backend;
pub mod config;
pub mod convergence;
pub mod density;
pub mod elements;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod load_cases;
pub mod materials;
pub mod mesh;
pub mod mesh_builder;
pub mod oc;
pub mod optimizer;
pub mod report;
pub mod safety;
pub mod sensitivity;

pub use analysis::OptimizationPipeline;
pub use assembly::{ElementStiffnessCache, SparseGlobalSystem};
pub use backend::{JacobiPcg, LinearSolver, LinearSystemData, SolveInfo, default_backend};
pub use config::{
    CombinationRule, EvaluatorConfig, FilterKind, OptimizationParams, RunConfig, RunProfile,
    SolverParams,
};
pub use convergence::{ConvergenceMonitor, ConvergenceState, IterationRecord, IterationWarning};
pub use density::DensityField;
pub use error::{
    ConfigurationError, EvaluationError, MeshTopologyError, OptimizationError, Result,
    UpdateError,
};
pub use evaluator::{
    EvaluationResult, ExternalEvaluator, FeaEvaluator, InProcessEvaluator, SolveOptions,
};
pub use filter::DensityFilter;
pub use load_cases::{LoadCase, LoadCaseSet, LoadCaseSpec, LoadType};
pub use materials::{MaterialLibrary, MaterialProperties};
pub use mesh::{Element, Mesh, MeshStatistics, Node, Region};
pub use mesh_builder::{MeshBuilder, RegionSets};
pub use oc::OcUpdater;
pub use optimizer::{OptimizationState, Optimizer, Problem, RunOutcome, StopHandle};
pub use report::RunReport;
pub use safety::{SafetyEvaluator, SafetyVerdict};
pub use sensitivity::SensitivityAggregator;
