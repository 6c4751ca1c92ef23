//! Supports reading the scene and SCP parameters from YAML files (optional)

use std::path::Path;

use crate::environment::{Environment, SceneData};
use crate::error::{Result, TrajoptError};
use crate::params::ScpParam;

fn parse<T: serde::de::DeserializeOwned>(contents: &str, what: &str) -> Result<T> {
    serde_saphyr::from_str(contents).map_err(|e| TrajoptError::Parse(format!("{}: {}", what, e)))
}

impl SceneData {
    /// Parses the scene from YAML like this:
    /// ```yaml
    /// keep_in:
    ///   - box: { min: [-1.0, -5.0, -1.0], max: [11.0, 5.0, 3.0] }
    /// keep_out:
    ///   - sphere: { center: [5.0, 0.0, 1.0], radius: 1.0 }
    /// obstacles:
    ///   - box: { min: [2.0, 2.0, 0.0], max: [3.0, 3.0, 2.0] }
    /// ```
    /// Every list is optional.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        parse(contents, "scene")
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        SceneData::from_yaml_str(&contents)
    }
}

impl Environment {
    /// Reads and validates the scene. Malformed zones are rejected.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Environment::build(&SceneData::from_yaml_file(path)?)
    }
}

impl ScpParam {
    /// Parses parameters from YAML. Omitted fields keep their default values:
    /// ```yaml
    /// fixed_final_time: false
    /// obstacle_toggle_distance: 2.0
    /// final_time_bounds: [1.0, 30.0]
    /// trust_region:
    ///   initial_radius: 1.0
    /// algorithm:
    ///   gusto: { initial_penalty: 10.0, penalty_growth: 5.0, max_penalty: 1.0e5 }
    /// shooting:
    ///   enabled: false
    /// ```
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let param: ScpParam = parse(contents, "parameters")?;
        param.validate()?;
        Ok(param)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        ScpParam::from_yaml_str(&contents)
    }
}
