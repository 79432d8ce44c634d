//! Numerical backend abstraction layer.
//!
//! The assembly layer produces a [`LinearSystemData`]; any [`LinearSolver`]
//! can consume it.
//!
//! ```text
//! Element Library (nalgebra SMatrix, small and dense)
//!         │
//!         ▼
//! Assembly (COO triplets → CSR + force vector)
//!         │
//!         ▼
//! LinearSolver trait
//!         │
//!         ▼
//! JacobiPcg
//! ```

pub mod pcg;
pub mod traits;

pub use pcg::JacobiPcg;
pub use traits::*;

/// The solver used by the in-process evaluator.
pub fn default_backend() -> Box<dyn LinearSolver> {
    Box::new(JacobiPcg)
}
