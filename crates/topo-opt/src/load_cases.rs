//! Load cases: independent loading scenarios evaluated separately each iteration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Standard gravity [m/s²]
pub const GRAVITY: f64 = 9.81;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    Static,
    Dynamic,
    Seismic,
    Fatigue,
}

impl LoadType {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadType::Static => "static",
            LoadType::Dynamic => "dynamic",
            LoadType::Seismic => "seismic",
            LoadType::Fatigue => "fatigue",
        }
    }
}

fn default_application_sets() -> Vec<String> {
    vec!["LOAD".to_string()]
}

/// Serialized form of a load case. Validated into [`LoadCase`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadCaseSpec {
    pub name: String,
    pub load_type: LoadType,
    /// [N], applied to each application node set
    pub force_magnitude: f64,
    pub force_direction: [f64; 3],
    pub required_safety_factor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycles: Option<u64>,
    /// [Hz]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(default)]
    pub description: String,
    /// Node sets that receive the force
    #[serde(default = "default_application_sets")]
    pub application_sets: Vec<String>,
}

/// An immutable, validated load case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LoadCaseSpec", into = "LoadCaseSpec")]
pub struct LoadCase {
    spec: LoadCaseSpec,
}

impl LoadCase {
    /// Validate a spec. The direction is normalized to a unit vector.
    pub fn new(mut spec: LoadCaseSpec) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidLoadCase {
            name: spec.name.clone(),
            reason,
        };

        if spec.name.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "load case name must not be empty".to_string(),
            ));
        }
        if !(spec.force_magnitude.is_finite() && spec.force_magnitude > 0.0) {
            return Err(invalid(format!(
                "force magnitude must be positive, got {}",
                spec.force_magnitude
            )));
        }
        let norm = spec.force_direction.iter().map(|c| c * c).sum::<f64>().sqrt();
        if !(norm.is_finite() && norm > 1e-12) {
            return Err(invalid("force direction must be a non-zero vector".to_string()));
        }
        if !(spec.required_safety_factor.is_finite() && spec.required_safety_factor > 0.0) {
            return Err(invalid(format!(
                "required safety factor must be positive, got {}",
                spec.required_safety_factor
            )));
        }
        if spec.cycles.is_some() && spec.load_type != LoadType::Fatigue {
            return Err(invalid("cycle count is only meaningful for fatigue cases".to_string()));
        }
        match spec.frequency {
            Some(_) if spec.load_type != LoadType::Dynamic => {
                return Err(invalid(
                    "frequency is only meaningful for dynamic cases".to_string(),
                ));
            }
            Some(f) if !(f.is_finite() && f > 0.0) => {
                return Err(invalid(format!("frequency must be positive, got {f}")));
            }
            _ => {}
        }
        if spec.application_sets.is_empty() {
            return Err(invalid("at least one application node set is required".to_string()));
        }

        for c in &mut spec.force_direction {
            *c /= norm;
        }
        Ok(Self { spec })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn load_type(&self) -> LoadType {
        self.spec.load_type
    }

    pub fn force_magnitude(&self) -> f64 {
        self.spec.force_magnitude
    }

    /// Unit vector
    pub fn direction(&self) -> [f64; 3] {
        self.spec.force_direction
    }

    /// Force vector applied to each application set [N]
    pub fn force(&self) -> [f64; 3] {
        self.spec.force_direction.map(|c| c * self.spec.force_magnitude)
    }

    pub fn required_safety_factor(&self) -> f64 {
        self.spec.required_safety_factor
    }

    pub fn cycles(&self) -> Option<u64> {
        self.spec.cycles
    }

    pub fn frequency(&self) -> Option<f64> {
        self.spec.frequency
    }

    pub fn description(&self) -> &str {
        &self.spec.description
    }

    pub fn application_sets(&self) -> &[String] {
        &self.spec.application_sets
    }
}

impl TryFrom<LoadCaseSpec> for LoadCase {
    type Error = ConfigurationError;

    fn try_from(spec: LoadCaseSpec) -> Result<Self, Self::Error> {
        Self::new(spec)
    }
}

impl From<LoadCase> for LoadCaseSpec {
    fn from(case: LoadCase) -> Self {
        case.spec
    }
}

/// Non-empty set of uniquely named load cases with at least one static case
#[derive(Debug, Clone, PartialEq)]
pub struct LoadCaseSet {
    cases: Vec<LoadCase>,
}

impl LoadCaseSet {
    pub fn new(cases: Vec<LoadCase>) -> Result<Self, ConfigurationError> {
        if cases.is_empty() {
            return Err(ConfigurationError::NoLoadCases);
        }
        if !cases.iter().any(|c| c.load_type() == LoadType::Static) {
            return Err(ConfigurationError::NoStaticLoadCase);
        }
        for (i, case) in cases.iter().enumerate() {
            if cases[..i].iter().any(|c| c.name() == case.name()) {
                return Err(ConfigurationError::DuplicateLoadCase(case.name().to_string()));
            }
        }
        Ok(Self { cases })
    }

    /// The four wall-mount scenarios for a TV of `tv_mass_kg`, carried by
    /// four mounting points: full weight (static), 20 % at 10 Hz (dynamic),
    /// 40 % horizontal (seismic) and 10 % over 10⁶ cycles (fatigue).
    pub fn tv_mount_defaults(
        tv_mass_kg: f64,
        application_sets: &[String],
    ) -> Result<Self, ConfigurationError> {
        let per_point = tv_mass_kg * GRAVITY / 4.0;
        let case = |name: &str,
                    load_type: LoadType,
                    fraction: f64,
                    direction: [f64; 3],
                    safety: f64,
                    description: &str|
         -> LoadCaseSpec {
            LoadCaseSpec {
                name: name.to_string(),
                load_type,
                force_magnitude: per_point * fraction,
                force_direction: direction,
                required_safety_factor: safety,
                cycles: None,
                frequency: None,
                description: description.to_string(),
                application_sets: application_sets.to_vec(),
            }
        };

        let static_case = case(
            "static_tv_weight",
            LoadType::Static,
            1.0,
            [0.0, -1.0, 0.0],
            2.5,
            "Static load from TV weight",
        );
        let dynamic_case = LoadCaseSpec {
            frequency: Some(10.0),
            ..case(
                "dynamic_vibration",
                LoadType::Dynamic,
                0.2,
                [0.0, -1.0, 0.0],
                1.8,
                "Dynamic vibration loads",
            )
        };
        let seismic_case = case(
            "seismic_horizontal",
            LoadType::Seismic,
            0.4,
            [1.0, 0.0, 0.0],
            3.0,
            "Horizontal seismic loads",
        );
        let fatigue_case = LoadCaseSpec {
            cycles: Some(1_000_000),
            ..case(
                "fatigue_cycling",
                LoadType::Fatigue,
                0.1,
                [0.0, -1.0, 0.0],
                4.0,
                "Fatigue loading from TV on/off cycles",
            )
        };

        Self::new(
            [static_case, dynamic_case, seismic_case, fatigue_case]
                .into_iter()
                .map(LoadCase::new)
                .collect::<Result<_, _>>()?,
        )
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoadCase> {
        self.cases.iter()
    }

    pub fn cases(&self) -> &[LoadCase] {
        &self.cases
    }

    pub fn get(&self, name: &str) -> Option<&LoadCase> {
        self.cases.iter().find(|c| c.name() == name)
    }
}

impl<'a> IntoIterator for &'a LoadCaseSet {
    type Item = &'a LoadCase;
    type IntoIter = std::slice::Iter<'a, LoadCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spec(name: &str, load_type: LoadType) -> LoadCaseSpec {
        LoadCaseSpec {
            name: name.to_string(),
            load_type,
            force_magnitude: 100.0,
            force_direction: [0.0, -2.0, 0.0],
            required_safety_factor: 2.0,
            cycles: None,
            frequency: None,
            description: String::new(),
            application_sets: default_application_sets(),
        }
    }

    #[test]
    fn direction_is_normalized() {
        let case = LoadCase::new(LoadCaseSpec {
            force_direction: [3.0, 4.0, 0.0],
            ..spec("s", LoadType::Static)
        })
        .unwrap();
        assert_relative_eq!(case.direction()[0], 0.6, epsilon = 1e-15);
        assert_relative_eq!(case.force()[1], 80.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_invalid_cases() {
        let zero = LoadCaseSpec {
            force_direction: [0.0; 3],
            ..spec("z", LoadType::Static)
        };
        assert!(LoadCase::new(zero).is_err());

        let cycles_on_static = LoadCaseSpec {
            cycles: Some(10),
            ..spec("c", LoadType::Static)
        };
        assert!(LoadCase::new(cycles_on_static).is_err());

        let freq_on_fatigue = LoadCaseSpec {
            frequency: Some(5.0),
            ..spec("f", LoadType::Fatigue)
        };
        assert!(LoadCase::new(freq_on_fatigue).is_err());

        let no_safety = LoadCaseSpec {
            required_safety_factor: 0.0,
            ..spec("n", LoadType::Static)
        };
        assert!(LoadCase::new(no_safety).is_err());
    }

    #[test]
    fn set_requires_static_and_unique_names() {
        assert!(matches!(
            LoadCaseSet::new(vec![]),
            Err(ConfigurationError::NoLoadCases)
        ));
        let seismic = LoadCase::new(spec("quake", LoadType::Seismic)).unwrap();
        assert!(matches!(
            LoadCaseSet::new(vec![seismic.clone()]),
            Err(ConfigurationError::NoStaticLoadCase)
        ));
        let s = LoadCase::new(spec("quake", LoadType::Static)).unwrap();
        assert!(matches!(
            LoadCaseSet::new(vec![s, seismic]),
            Err(ConfigurationError::DuplicateLoadCase(_))
        ));
    }

    #[test]
    fn tv_mount_defaults_match_mounting_scenarios() {
        let set = LoadCaseSet::tv_mount_defaults(50.0, &["MOUNT".to_string()]).unwrap();
        assert_eq!(set.len(), 4);
        let factors: Vec<f64> = set.iter().map(LoadCase::required_safety_factor).collect();
        assert_eq!(factors, vec![2.5, 1.8, 3.0, 4.0]);
        let statik = set.get("static_tv_weight").unwrap();
        assert_relative_eq!(statik.force_magnitude(), 122.625, epsilon = 1e-9);
        assert_eq!(set.get("fatigue_cycling").unwrap().cycles(), Some(1_000_000));
        assert_eq!(set.get("dynamic_vibration").unwrap().frequency(), Some(10.0));
        assert_eq!(set.get("seismic_horizontal").unwrap().direction(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{"name":"s","load_type":"static","force_magnitude":10.0,
            "force_direction":[0.0,0.0,-5.0],"required_safety_factor":2.0}"#;
        let case: LoadCase = serde_json::from_str(json).unwrap();
        assert_eq!(case.direction(), [0.0, 0.0, -1.0]);
        assert_eq!(case.application_sets(), &["LOAD".to_string()]);

        let bad = json.replace("10.0", "-1.0");
        assert!(serde_json::from_str::<LoadCase>(&bad).is_err());
    }
}
