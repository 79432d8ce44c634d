//! Jacobi-preconditioned conjugate gradient.
//!
//! The stiffness matrix is symmetric positive definite once the supports are
//! eliminated, so plain CG with a diagonal preconditioner is sufficient for
//! hexahedral meshes of the sizes handled here.

use super::traits::*;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

pub struct JacobiPcg;

/// y = A x, row-parallel
fn spmv(a: &CsrMatrix<f64>, x: &DVector<f64>, y: &mut DVector<f64>) {
    y.as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, yi)| {
            let row = a.row(i);
            *yi = row
                .col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &v)| v * x[j])
                .sum();
        });
}

fn inverse_diagonal(a: &CsrMatrix<f64>) -> Result<DVector<f64>, BackendError> {
    let mut inv = DVector::zeros(a.nrows());
    for (i, row) in a.row_iter().enumerate() {
        let diag = row
            .col_indices()
            .iter()
            .position(|&j| j == i)
            .map(|pos| row.values()[pos])
            .unwrap_or(0.0);
        if !(diag > 0.0) {
            return Err(BackendError(format!(
                "non-positive diagonal {diag} at DOF {i}"
            )));
        }
        inv[i] = 1.0 / diag;
    }
    Ok(inv)
}

impl LinearSolver for JacobiPcg {
    fn solve_linear(
        &self,
        system: &LinearSystemData,
        controls: &SolverControls,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError> {
        let n = system.num_dofs;
        let k = &system.stiffness;
        if k.nrows() != n || k.ncols() != n || system.force.len() != n {
            return Err(BackendError(format!(
                "dimension mismatch: K is {}x{}, F has {} entries, {} DOFs",
                k.nrows(),
                k.ncols(),
                system.force.len(),
                n
            )));
        }

        let f_norm = system.force.norm();
        let mut u = DVector::zeros(n);
        let info = |iterations, residual_norm, converged| SolveInfo {
            iterations,
            residual_norm,
            converged,
            solver_name: self.name().to_string(),
        };
        if f_norm == 0.0 {
            return Ok((u, info(0, 0.0, true)));
        }

        let m_inv = inverse_diagonal(k)?;
        let mut r = system.force.clone();
        let mut z = r.component_mul(&m_inv);
        let mut p = z.clone();
        let mut q = DVector::zeros(n);
        let mut rz = r.dot(&z);
        let mut residual = 1.0;

        for iteration in 1..=controls.max_iterations {
            spmv(k, &p, &mut q);
            let pq = p.dot(&q);
            if !(pq > 0.0) {
                return Err(BackendError(format!(
                    "CG breakdown at iteration {iteration}: pᵀKp = {pq}"
                )));
            }
            let alpha = rz / pq;
            u.axpy(alpha, &p, 1.0);
            r.axpy(-alpha, &q, 1.0);

            residual = r.norm() / f_norm;
            if residual <= controls.tolerance {
                return Ok((u, info(iteration, residual, true)));
            }

            z = r.component_mul(&m_inv);
            let rz_next = r.dot(&z);
            let beta = rz_next / rz;
            rz = rz_next;
            p.axpy(1.0, &z, beta);
        }

        Ok((u, info(controls.max_iterations, residual, false)))
    }

    fn name(&self) -> &str {
        "jacobi-pcg"
    }
}
