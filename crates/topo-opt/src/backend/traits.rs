//! Linear solver seam for the global system.
//!
//! Element-level computations stay in nalgebra (small, dense matrices); the
//! assembled system is handed to a backend as a CSR matrix.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// A solve the backend could not carry out
#[derive(Debug, Clone)]
pub struct BackendError(pub String);

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

/// A linear system ready for solving: K * u = F.
///
/// Boundary conditions are already applied: constrained rows and columns are
/// eliminated and carry a unit diagonal with zero load.
pub struct LinearSystemData {
    pub stiffness: CsrMatrix<f64>,
    pub force: DVector<f64>,
    pub num_dofs: usize,
    /// Indices of constrained DOFs (for diagnostics)
    pub constrained_dofs: Vec<usize>,
}

/// Termination controls for iterative backends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverControls {
    /// Relative residual ‖r‖/‖F‖ at which the solve is accepted
    pub tolerance: f64,
    pub max_iterations: usize,
}

/// Solver convergence and diagnostic info.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    pub iterations: usize,
    /// Final relative residual norm
    pub residual_norm: f64,
    pub converged: bool,
    /// Human-readable solver name (e.g., "jacobi-pcg")
    pub solver_name: String,
}

/// Trait for a linear solver backend.
///
/// A solve that stops at the iteration cap is not an error: it returns the
/// last iterate with `converged == false` and the caller decides.
pub trait LinearSolver: Send + Sync {
    fn solve_linear(
        &self,
        system: &LinearSystemData,
        controls: &SolverControls,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError>;

    /// Human-readable name of this backend.
    fn name(&self) -> &str;
}
