//! 8-node hexahedral (brick) element
//!
//! Provides the unit-density stiffness `k_e⁰` used both for assembly and for
//! the compliance sensitivities, the element volume used by the volume
//! constraint, and the centre-point stress used by the safety check.

use super::{Elasticity, StressState};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

pub type ElementMatrix = SMatrix<f64, 24, 24>;
pub type ElementVector = SVector<f64, 24>;

const GP: f64 = 0.577_350_269_189_625_8; // 1/√3

/// 2×2×2 Gauss points, all with unit weight
const GAUSS_POINTS: [(f64, f64, f64); 8] = [
    (-GP, -GP, -GP),
    (GP, -GP, -GP),
    (GP, GP, -GP),
    (-GP, GP, -GP),
    (-GP, -GP, GP),
    (GP, -GP, GP),
    (GP, GP, GP),
    (-GP, GP, GP),
];

/// C3D8: 8-node hexahedral (brick) element
///
/// Node ordering (CalculiX convention):
/// ```text
///        8----------7
///       /|         /|
///      / |        / |
///     5----------6  |
///     |  4-------|--3
///     | /        | /
///     |/         |/
///     1----------2
/// ```
///
/// - Bottom face: nodes 1,2,3,4 (ζ = -1)
/// - Top face: nodes 5,6,7,8 (ζ = +1)
/// - DOFs: 3 per node (ux, uy, uz), ordered node by node
#[derive(Debug, Clone, PartialEq)]
pub struct C3D8 {
    coords: [[f64; 3]; 8],
}

impl C3D8 {
    pub fn new(coords: [[f64; 3]; 8]) -> Self {
        Self { coords }
    }

    /// N_i = (1 + ξξ_i)(1 + ηη_i)(1 + ζζ_i) / 8
    fn shape_functions(xi: f64, eta: f64, zeta: f64) -> [f64; 8] {
        [
            (1.0 - xi) * (1.0 - eta) * (1.0 - zeta) / 8.0,
            (1.0 + xi) * (1.0 - eta) * (1.0 - zeta) / 8.0,
            (1.0 + xi) * (1.0 + eta) * (1.0 - zeta) / 8.0,
            (1.0 - xi) * (1.0 + eta) * (1.0 - zeta) / 8.0,
            (1.0 - xi) * (1.0 - eta) * (1.0 + zeta) / 8.0,
            (1.0 + xi) * (1.0 - eta) * (1.0 + zeta) / 8.0,
            (1.0 + xi) * (1.0 + eta) * (1.0 + zeta) / 8.0,
            (1.0 - xi) * (1.0 + eta) * (1.0 + zeta) / 8.0,
        ]
    }

    /// [dN/dξ, dN/dη, dN/dζ] for all 8 nodes
    fn shape_derivatives(xi: f64, eta: f64, zeta: f64) -> [[f64; 8]; 3] {
        let xi_n = [-1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0];
        let eta_n = [-1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
        let zeta_n = [-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];

        let mut d = [[0.0; 8]; 3];
        for i in 0..8 {
            d[0][i] = xi_n[i] * (1.0 + eta * eta_n[i]) * (1.0 + zeta * zeta_n[i]) / 8.0;
            d[1][i] = (1.0 + xi * xi_n[i]) * eta_n[i] * (1.0 + zeta * zeta_n[i]) / 8.0;
            d[2][i] = (1.0 + xi * xi_n[i]) * (1.0 + eta * eta_n[i]) * zeta_n[i] / 8.0;
        }
        d
    }

    /// J[r][c] = Σ dN_i/dξ_r · x_i,c
    fn jacobian(&self, xi: f64, eta: f64, zeta: f64) -> Matrix3<f64> {
        let d = Self::shape_derivatives(xi, eta, zeta);
        let mut j = Matrix3::zeros();
        for (i, x) in self.coords.iter().enumerate() {
            for r in 0..3 {
                for c in 0..3 {
                    j[(r, c)] += d[r][i] * x[c];
                }
            }
        }
        j
    }

    /// Strain-displacement matrix and det(J) at a natural point.
    ///
    /// Strain components (Voigt): [εxx, εyy, εzz, γxy, γyz, γzx]ᵀ
    fn strain_displacement_matrix(
        &self,
        xi: f64,
        eta: f64,
        zeta: f64,
    ) -> Result<(SMatrix<f64, 6, 24>, f64), String> {
        let d_natural = Self::shape_derivatives(xi, eta, zeta);
        let j = self.jacobian(xi, eta, zeta);
        let det_j = j.determinant();
        if det_j <= 0.0 {
            return Err(format!("Negative or zero Jacobian determinant: {det_j}"));
        }
        let j_inv = j
            .try_inverse()
            .ok_or_else(|| "Singular Jacobian matrix".to_string())?;

        let mut b = SMatrix::<f64, 6, 24>::zeros();
        for i in 0..8 {
            let g = j_inv * Vector3::new(d_natural[0][i], d_natural[1][i], d_natural[2][i]);
            let (dx, dy, dz) = (g[0], g[1], g[2]);
            let c = i * 3;

            b[(0, c)] = dx;
            b[(1, c + 1)] = dy;
            b[(2, c + 2)] = dz;
            b[(3, c)] = dy;
            b[(3, c + 1)] = dx;
            b[(4, c + 1)] = dz;
            b[(4, c + 2)] = dy;
            b[(5, c + 2)] = dx;
            b[(5, c)] = dz;
        }
        Ok((b, det_j))
    }

    /// Isotropic D matrix: {σ} = [D]{ε}
    fn constitutive_matrix(elasticity: &Elasticity) -> SMatrix<f64, 6, 6> {
        let e = elasticity.youngs_modulus;
        let nu = elasticity.poisson_ratio;
        let factor = e / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let diagonal = (1.0 - nu) * factor;
        let off = nu * factor;
        let shear = (1.0 - 2.0 * nu) / 2.0 * factor;

        let mut d = SMatrix::<f64, 6, 6>::zeros();
        for r in 0..3 {
            for c in 0..3 {
                d[(r, c)] = if r == c { diagonal } else { off };
            }
            d[(r + 3, r + 3)] = shear;
        }
        d
    }

    /// K_e = Σ B_iᵀ D B_i |J_i| over the 2×2×2 Gauss points
    pub fn stiffness_matrix(&self, elasticity: &Elasticity) -> Result<ElementMatrix, String> {
        let d = Self::constitutive_matrix(elasticity);
        let mut k = ElementMatrix::zeros();
        for &(xi, eta, zeta) in &GAUSS_POINTS {
            let (b, det_j) = self.strain_displacement_matrix(xi, eta, zeta)?;
            k += b.transpose() * d * b * det_j;
        }
        Ok(k)
    }

    /// Element volume by Gauss integration of det(J)
    pub fn volume(&self) -> Result<f64, String> {
        let mut volume = 0.0;
        for &(xi, eta, zeta) in &GAUSS_POINTS {
            let det_j = self.jacobian(xi, eta, zeta).determinant();
            if det_j <= 0.0 {
                return Err(format!("Negative or zero Jacobian determinant: {det_j}"));
            }
            volume += det_j;
        }
        Ok(volume)
    }

    /// Smallest det(J) over the Gauss points and the element centre
    pub fn min_jacobian_determinant(&self) -> f64 {
        GAUSS_POINTS
            .iter()
            .chain(std::iter::once(&(0.0, 0.0, 0.0)))
            .map(|&(xi, eta, zeta)| self.jacobian(xi, eta, zeta).determinant())
            .fold(f64::INFINITY, f64::min)
    }

    pub fn centroid(&self) -> [f64; 3] {
        let n = Self::shape_functions(0.0, 0.0, 0.0);
        let mut c = [0.0; 3];
        for (weight, x) in n.iter().zip(&self.coords) {
            for k in 0..3 {
                c[k] += weight * x[k];
            }
        }
        c
    }

    /// Longest of the 12 hexahedron edges
    pub fn max_edge_length(&self) -> f64 {
        const EDGES: [(usize, usize); 12] = [
            (0, 1),
            (1, 2),
            (2, 3),
            (3, 0),
            (4, 5),
            (5, 6),
            (6, 7),
            (7, 4),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
        ];
        EDGES
            .iter()
            .map(|&(a, b)| {
                let (p, q) = (self.coords[a], self.coords[b]);
                ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)).sqrt()
            })
            .fold(0.0, f64::max)
    }

    /// Stress at the element centre for the given nodal displacements
    pub fn centre_stress(
        &self,
        elasticity: &Elasticity,
        displacements: &ElementVector,
    ) -> Result<StressState, String> {
        let (b, _) = self.strain_displacement_matrix(0.0, 0.0, 0.0)?;
        let sigma = Self::constitutive_matrix(elasticity) * (b * displacements);
        Ok(StressState {
            sxx: sigma[0],
            syy: sigma[1],
            szz: sigma[2],
            sxy: sigma[3],
            syz: sigma[4],
            szx: sigma[5],
        })
    }
}
