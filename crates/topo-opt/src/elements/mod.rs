//! Finite element library for the design domain.
//!
//! Only the 8-node hexahedron is needed: the design domain is meshed with
//! bricks and every element shares one isotropic linear-elastic material.

pub mod solid;

pub use solid::{C3D8, ElementMatrix, ElementVector};

/// Isotropic linear elasticity at full density
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Elasticity {
    /// Young's modulus (E) [Pa]
    pub youngs_modulus: f64,
    /// Poisson's ratio (ν) [-]
    pub poisson_ratio: f64,
}

impl Elasticity {
    pub fn new(youngs_modulus: f64, poisson_ratio: f64) -> Self {
        Self {
            youngs_modulus,
            poisson_ratio,
        }
    }

    /// Same Poisson ratio, modulus scaled by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            youngs_modulus: self.youngs_modulus * factor,
            poisson_ratio: self.poisson_ratio,
        }
    }
}

/// Stress tensor components in Voigt order
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StressState {
    pub sxx: f64,
    pub syy: f64,
    pub szz: f64,
    pub sxy: f64,
    pub syz: f64,
    pub szx: f64,
}

impl StressState {
    /// Von Mises equivalent stress
    ///
    /// σ_vm = sqrt(0.5 * ((σxx-σyy)² + (σyy-σzz)² + (σzz-σxx)²) + 3 * (τxy² + τyz² + τzx²))
    pub fn mises(&self) -> f64 {
        let s = self;
        let normal = 0.5
            * ((s.sxx - s.syy).powi(2) + (s.syy - s.szz).powi(2) + (s.szz - s.sxx).powi(2));
        let shear = 3.0 * (s.sxy.powi(2) + s.syz.powi(2) + s.szx.powi(2));
        (normal + shear).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mises_of_uniaxial_stress_is_the_stress() {
        let s = StressState {
            sxx: 150e6,
            ..Default::default()
        };
        assert_relative_eq!(s.mises(), 150e6, max_relative = 1e-12);
    }

    #[test]
    fn mises_of_hydrostatic_stress_is_zero() {
        let s = StressState {
            sxx: -10e6,
            syy: -10e6,
            szz: -10e6,
            ..Default::default()
        };
        assert_relative_eq!(s.mises(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn mises_of_pure_shear() {
        let s = StressState {
            sxy: 1.0,
            ..Default::default()
        };
        assert_relative_eq!(s.mises(), 3f64.sqrt(), epsilon = 1e-12);
    }
}
