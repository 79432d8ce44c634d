//! Material properties and the material database.
//!
//! One [`MaterialProperties`] instance is bound to the whole domain for a run.
//! SIMP scales its stiffness per element; the strengths feed the safety check.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::elements::Elasticity;
use crate::error::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialProperties {
    pub name: String,
    /// Young's modulus (E) [Pa]
    pub youngs_modulus: f64,
    /// Poisson's ratio (ν) [-]
    pub poisson_ratio: f64,
    /// Density [kg/m³]
    pub density: f64,
    /// [Pa]
    pub yield_strength: f64,
    /// [Pa]
    pub ultimate_strength: f64,
    /// Endurance limit for fully reversed cyclic loading [Pa]
    pub fatigue_limit: f64,
    /// [currency/kg]
    pub cost_per_kg: f64,
}

impl MaterialProperties {
    pub fn elasticity(&self) -> Elasticity {
        Elasticity::new(self.youngs_modulus, self.poisson_ratio)
    }

    /// Reject non-physical values before they reach the solver
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive = [
            ("youngs_modulus", self.youngs_modulus),
            ("density", self.density),
            ("yield_strength", self.yield_strength),
            ("ultimate_strength", self.ultimate_strength),
            ("fatigue_limit", self.fatigue_limit),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigurationError::Invalid(format!(
                    "material '{}': {name} must be positive, got {value}",
                    self.name
                )));
            }
        }
        if !(self.poisson_ratio > -1.0 && self.poisson_ratio < 0.5) {
            return Err(ConfigurationError::Invalid(format!(
                "material '{}': poisson_ratio must lie in (-1, 0.5), got {}",
                self.name, self.poisson_ratio
            )));
        }
        if !(self.cost_per_kg >= 0.0) {
            return Err(ConfigurationError::Invalid(format!(
                "material '{}': cost_per_kg must be non-negative",
                self.name
            )));
        }
        Ok(())
    }

    pub fn steel() -> Self {
        Self {
            name: "steel".to_string(),
            youngs_modulus: 200e9,
            poisson_ratio: 0.3,
            density: 7850.0,
            yield_strength: 250e6,
            ultimate_strength: 400e6,
            fatigue_limit: 120e6,
            cost_per_kg: 1.5,
        }
    }

    pub fn aluminum() -> Self {
        Self {
            name: "aluminum".to_string(),
            youngs_modulus: 70e9,
            poisson_ratio: 0.33,
            density: 2700.0,
            yield_strength: 276e6,
            ultimate_strength: 310e6,
            fatigue_limit: 90e6,
            cost_per_kg: 4.0,
        }
    }

    pub fn carbon_fiber() -> Self {
        Self {
            name: "carbon_fiber".to_string(),
            youngs_modulus: 150e9,
            poisson_ratio: 0.25,
            density: 1600.0,
            yield_strength: 800e6,
            ultimate_strength: 1000e6,
            fatigue_limit: 400e6,
            cost_per_kg: 50.0,
        }
    }
}

/// Materials by lower-cased name
#[derive(Debug, Clone)]
pub struct MaterialLibrary {
    materials: BTreeMap<String, MaterialProperties>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self {
            materials: BTreeMap::new(),
        }
    }

    /// Steel, aluminum and carbon fiber
    pub fn builtin() -> Self {
        let mut library = Self::new();
        library.add_material(MaterialProperties::steel());
        library.add_material(MaterialProperties::aluminum());
        library.add_material(MaterialProperties::carbon_fiber());
        library
    }

    /// Add (or replace) a material
    pub fn add_material(&mut self, material: MaterialProperties) {
        self.materials
            .insert(material.name.to_ascii_lowercase(), material);
    }

    /// Built-in materials extended by a JSON array of [`MaterialProperties`]
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let extra: Vec<MaterialProperties> = topo_io::load_json(path)?;
        let mut library = Self::builtin();
        for material in extra {
            material.validate()?;
            library.add_material(material);
        }
        Ok(library)
    }

    /// Case-insensitive lookup
    pub fn get_material(&self, name: &str) -> Option<&MaterialProperties> {
        self.materials.get(&name.to_ascii_lowercase())
    }

    /// Resolve the one material bound to a run
    pub fn resolve(&self, name: &str) -> Result<MaterialProperties, ConfigurationError> {
        self.get_material(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownMaterial(name.to_string()))
    }

    pub fn material_names(&self) -> Vec<String> {
        self.materials.values().map(|m| m.name.clone()).collect()
    }
}

impl Default for MaterialLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}
