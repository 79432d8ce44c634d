//! Element density field.
//!
//! One value per mesh element, in mesh order. Design elements carry the
//! optimized value, `Solid` elements are pinned at 1 and `Void` elements at
//! `rho_min`. Volume measures only consider design elements.

use crate::error::ConfigurationError;
use crate::mesh::{Mesh, Region};

#[derive(Debug, Clone, PartialEq)]
pub struct DensityField {
    values: Vec<f64>,
    rho_min: f64,
}

impl DensityField {
    /// Uniform field over the design elements
    pub fn uniform(mesh: &Mesh, value: f64, rho_min: f64) -> Self {
        let value = value.clamp(rho_min, 1.0);
        let values = mesh
            .elements()
            .iter()
            .map(|e| match e.region {
                Region::Design => value,
                Region::Solid => 1.0,
                Region::Void => rho_min,
            })
            .collect();
        Self { values, rho_min }
    }

    /// Field from explicit per-element values; fixed regions are re-pinned
    pub fn from_values(
        mesh: &Mesh,
        values: Vec<f64>,
        rho_min: f64,
    ) -> Result<Self, ConfigurationError> {
        if values.len() != mesh.num_elements() {
            return Err(ConfigurationError::Invalid(format!(
                "density field has {} values for {} elements",
                values.len(),
                mesh.num_elements()
            )));
        }
        let mut field = Self::uniform(mesh, 1.0, rho_min);
        let design: Vec<f64> = mesh.design_elements().iter().map(|&e| values[e]).collect();
        field.set_design_values(mesh, &design)?;
        Ok(field)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, element: usize) -> f64 {
        self.values[element]
    }

    pub fn rho_min(&self) -> f64 {
        self.rho_min
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values of the design elements, in `mesh.design_elements()` order
    pub fn design_values(&self, mesh: &Mesh) -> Vec<f64> {
        mesh.design_elements()
            .iter()
            .map(|&e| self.values[e])
            .collect()
    }

    /// Overwrite the design elements. Every value must lie in `[rho_min, 1]`.
    pub fn set_design_values(
        &mut self,
        mesh: &Mesh,
        design: &[f64],
    ) -> Result<(), ConfigurationError> {
        let indices = mesh.design_elements();
        if design.len() != indices.len() {
            return Err(ConfigurationError::Invalid(format!(
                "{} design values for {} design elements",
                design.len(),
                indices.len()
            )));
        }
        // tolerate round-off from the filter
        let slack = 1e-12;
        for (&e, &rho) in indices.iter().zip(design) {
            if !(rho >= self.rho_min - slack && rho <= 1.0 + slack) {
                return Err(ConfigurationError::Invalid(format!(
                    "density {rho} of element {} is outside [{}, 1]",
                    mesh.elements()[e].id,
                    self.rho_min
                )));
            }
            self.values[e] = rho.clamp(self.rho_min, 1.0);
        }
        Ok(())
    }

    /// Σ ρ_e v_e / Σ v_e over design elements
    pub fn volume_fraction(&self, mesh: &Mesh) -> f64 {
        let (material, total) = mesh
            .design_elements()
            .iter()
            .map(|&e| (self.values[e], mesh.elements()[e].volume))
            .fold((0.0, 0.0), |(m, t), (rho, v)| (m + rho * v, t + v));
        if total > 0.0 { material / total } else { 0.0 }
    }

    /// 4 Σ ρ(1-ρ) v / Σ v over design elements: 0 for a 0/1 design, 1 for all 0.5
    pub fn greyness(&self, mesh: &Mesh) -> f64 {
        let (grey, total) = mesh
            .design_elements()
            .iter()
            .map(|&e| (self.values[e], mesh.elements()[e].volume))
            .fold((0.0, 0.0), |(g, t), (rho, v)| (g + rho * (1.0 - rho) * v, t + v));
        if total > 0.0 { 4.0 * grey / total } else { 0.0 }
    }

    /// Σ ρ_e v_e over all elements [m³]
    pub fn material_volume(&self, mesh: &Mesh) -> f64 {
        mesh.elements()
            .iter()
            .zip(&self.values)
            .map(|(e, rho)| rho * e.volume)
            .sum()
    }

    /// Largest absolute change of a design element
    pub fn max_change(&self, other: &DensityField, mesh: &Mesh) -> f64 {
        mesh.design_elements()
            .iter()
            .map(|&e| (self.values[e] - other.values[e]).abs())
            .fold(0.0, f64::max)
    }

    /// `(element id, density)` pairs in mesh order
    pub fn by_element_id(&self, mesh: &Mesh) -> Vec<(i32, f64)> {
        mesh.elements()
            .iter()
            .zip(&self.values)
            .map(|(e, &rho)| (e.id, rho))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::fixtures;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_field_pins_fixed_regions() {
        let mesh = fixtures::grid_with_regions(3, 1, 1, 1.0, |i, _, _| match i {
            0 => Region::Solid,
            2 => Region::Void,
            _ => Region::Design,
        });
        let field = DensityField::uniform(&mesh, 0.3, 1e-9);
        assert_eq!(field.values(), &[1.0, 0.3, 1e-9]);
        assert_relative_eq!(field.volume_fraction(&mesh), 0.3, epsilon = 1e-15);
        assert_eq!(field.design_values(&mesh), vec![0.3]);
        assert_relative_eq!(field.material_volume(&mesh), 1.3, epsilon = 1e-9);
    }

    #[test]
    fn greyness_bounds() {
        let mesh = fixtures::grid(2, 1, 1, 1.0);
        let half = DensityField::uniform(&mesh, 0.5, 1e-3);
        assert_relative_eq!(half.greyness(&mesh), 1.0, epsilon = 1e-12);
        let crisp = DensityField::from_values(&mesh, vec![1.0, 1e-3], 1e-3).unwrap();
        assert!(crisp.greyness(&mesh) < 5e-3);
        assert_relative_eq!(crisp.max_change(&half, &mesh), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn rejects_out_of_bounds_design_values() {
        let mesh = fixtures::grid(2, 1, 1, 1.0);
        let mut field = DensityField::uniform(&mesh, 0.5, 1e-3);
        assert!(field.set_design_values(&mesh, &[0.5, 1.5]).is_err());
        assert!(field.set_design_values(&mesh, &[0.0, 0.5]).is_err());
        assert!(field.set_design_values(&mesh, &[0.5]).is_err());
        field.set_design_values(&mesh, &[0.25, 0.75]).unwrap();
        assert_eq!(
            field.by_element_id(&mesh),
            vec![(1, 0.25), (2, 0.75)]
        );
    }
}
