//! Error types for the optimizer.
//!
//! Recoverable conditions (`EvaluationError::SolveFailure`, `UpdateError::Degenerate`)
//! are handled inside the loop and surface as iteration warnings. Everything
//! else is fatal and ends up in [`OptimizationError`].

use thiserror::Error;

use crate::optimizer::OptimizationState;

pub type Result<T> = std::result::Result<T, OptimizationError>;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("unknown material '{0}'")]
    UnknownMaterial(String),

    #[error("load case set is empty")]
    NoLoadCases,

    #[error("load case set has no static case")]
    NoStaticLoadCase,

    #[error("duplicate load case '{0}'")]
    DuplicateLoadCase(String),

    #[error("load case '{name}': {reason}")]
    InvalidLoadCase { name: String, reason: String },

    #[error("parameter '{name}' = {value} is out of range ({expected})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("combination weights: {0}")]
    InvalidWeights(String),

    #[error("node set '{0}' is not defined in the mesh")]
    MissingNodeSet(String),

    #[error("filter was built for {built} filtering but applied as {requested}")]
    FilterVariantMismatch {
        built: &'static str,
        requested: &'static str,
    },

    #[error("failed to read configuration: {0}")]
    Io(#[from] topo_io::IoError),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshTopologyError {
    #[error("mesh has no nodes")]
    NoNodes,

    #[error("mesh has no elements")]
    NoElements,

    #[error("mesh has no design elements")]
    NoDesignElements,

    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: i32 },

    #[error("element {element} references non-existent node {node}")]
    MissingNode { element: i32, node: i32 },

    #[error("element {element} has {actual} nodes but expected {expected}")]
    WrongNodeCount {
        element: i32,
        actual: usize,
        expected: usize,
    },

    #[error("element {element} has unsupported type '{element_type}'")]
    UnsupportedElementType { element: i32, element_type: String },

    #[error("element {element} has a non-positive Jacobian determinant ({det_j:.3e})")]
    NonPositiveJacobian { element: i32, det_j: f64 },

    #[error("{0} node(s) are not referenced by any element (first: {1})")]
    OrphanNodes(usize, i32),

    #[error("mesh is disconnected into {0} element groups")]
    Disconnected(usize),

    #[error("set '{set}' references unknown {kind} {id}")]
    UnknownSetMember {
        set: String,
        kind: &'static str,
        id: i32,
    },

    #[error("invalid mesh input: {0}")]
    Input(String),
}

#[derive(Error, Debug)]
pub enum EvaluationError {
    /// The linear solve (in-process or external) did not converge
    #[error("solve failed for load case '{load_case}': {reason}")]
    SolveFailure { load_case: String, reason: String },

    #[error("malformed evaluation result for load case '{load_case}': {reason}")]
    MalformedResult { load_case: String, reason: String },

    #[error(transparent)]
    Mesh(#[from] MeshTopologyError),

    #[error("evaluator I/O failed: {0}")]
    Io(#[from] topo_io::IoError),

    #[error("evaluator process failed: {0}")]
    Process(#[from] std::io::Error),
}

impl EvaluationError {
    pub fn is_solve_failure(&self) -> bool {
        matches!(self, EvaluationError::SolveFailure { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpdateError {
    /// Bisection on the Lagrange multiplier could not bracket the volume target
    #[error("optimality-criteria update is degenerate: {0}")]
    Degenerate(String),

    #[error("volume target {target} cannot be met (achievable range {min}..{max})")]
    Infeasible { target: f64, min: f64, max: f64 },
}

#[derive(Error, Debug)]
pub enum OptimizationError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("mesh topology error: {0}")]
    MeshTopology(#[from] MeshTopologyError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("update error: {0}")]
    Update(#[from] UpdateError),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),

    #[error("failed to write output: {0}")]
    Output(#[from] topo_io::IoError),

    /// A fatal error inside the loop. The last fully converged state is kept
    /// for inspection when one exists.
    #[error("run aborted at iteration {iteration}: {source}")]
    Aborted {
        iteration: usize,
        #[source]
        source: Box<OptimizationError>,
        last_state: Option<Box<OptimizationState>>,
    },
}

impl OptimizationError {
    /// Last converged state carried by an aborted run
    pub fn last_state(&self) -> Option<&OptimizationState> {
        match self {
            OptimizationError::Aborted { last_state, .. } => last_state.as_deref(),
            _ => None,
        }
    }
}
