use std::{collections::HashMap, path::Path};

use crate::{error::SimulationError, floating_type_mod::FT, VF};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborhoodSearchAlgorithm {
    // hashed cell grid, rebuilt every frame (cell size = support radius)
    SpatialHash,
    // bulk loaded R*-tree, mostly useful to cross-check the spatial hash
    RStar,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    // the solver has no real time step: forces are position deltas per frame
    pub gravity: FT,

    // distance between particles of the initial block is `support_radius / 2`
    pub spacing: FT,
    pub support_radius: FT,

    // double density relaxation
    pub rest_density: FT,
    pub stiffness: FT,
    pub stiffness_near: FT,

    // velocity clamp of the integrator
    pub max_velocity: FT,
    pub velocity_clamp_factor: FT,

    // the domain is [-world_half_width, world_half_width] x [floor, inf)
    pub world_half_width: FT,
    pub floor: FT,
    pub boundary_stiffness: FT,

    pub attractor_radius: FT,
    pub attractor_stiffness: FT,

    // material coefficients every particle starts with
    pub viscosity_sigma: FT,
    pub viscosity_beta: FT,

    // magnitude of the random offset of the previous position at creation
    pub initial_jitter: FT,
    pub seed: u64,

    pub num_hash_buckets: usize,
    pub neighborhood_search_algorithm: NeighborhoodSearchAlgorithm,

    // validates all neighbor lists against a brute force scan after every search
    pub check_neighborhood: bool,
}

pub const DEFAULT_SPACING: FT = 2.;
pub const DEFAULT_WORLD_HALF_WIDTH: FT = 50.;

impl Default for SimulationParams {
    fn default() -> Self {
        let stiffness = DEFAULT_SPACING / 1000.;
        SimulationParams {
            gravity: 0.,
            spacing: DEFAULT_SPACING,
            support_radius: DEFAULT_SPACING * 1.25,
            rest_density: 3.,
            stiffness,
            stiffness_near: stiffness * 10.,
            max_velocity: 2.,
            velocity_clamp_factor: 0.5,
            world_half_width: DEFAULT_WORLD_HALF_WIDTH,
            floor: 0.,
            boundary_stiffness: 1. / 8.,
            attractor_radius: DEFAULT_WORLD_HALF_WIDTH / 4.,
            attractor_stiffness: 1. / 256.,
            viscosity_sigma: 3.,
            viscosity_beta: 4.,
            initial_jitter: 0.001,
            seed: 0,
            num_hash_buckets: 4093,
            neighborhood_search_algorithm: NeighborhoodSearchAlgorithm::SpatialHash,
            check_neighborhood: false,
        }
    }
}

fn require_finite(name: &'static str, value: FT) -> Result<(), SimulationError> {
    if !value.is_finite() {
        return Err(SimulationError::InvalidParameter {
            name,
            value,
            reason: "must be finite",
        });
    }
    Ok(())
}

fn require_positive(name: &'static str, value: FT) -> Result<(), SimulationError> {
    require_finite(name, value)?;
    if value <= 0. {
        return Err(SimulationError::InvalidParameter {
            name,
            value,
            reason: "must be positive",
        });
    }
    Ok(())
}

fn require_non_negative(name: &'static str, value: FT) -> Result<(), SimulationError> {
    require_finite(name, value)?;
    if value < 0. {
        return Err(SimulationError::InvalidParameter {
            name,
            value,
            reason: "must not be negative",
        });
    }
    Ok(())
}

impl SimulationParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        require_finite("gravity", self.gravity)?;
        require_positive("spacing", self.spacing)?;
        require_positive("support_radius", self.support_radius)?;
        require_non_negative("rest_density", self.rest_density)?;
        require_non_negative("stiffness", self.stiffness)?;
        require_non_negative("stiffness_near", self.stiffness_near)?;
        require_positive("max_velocity", self.max_velocity)?;
        require_positive("velocity_clamp_factor", self.velocity_clamp_factor)?;
        if self.velocity_clamp_factor > 1. {
            return Err(SimulationError::InvalidParameter {
                name: "velocity_clamp_factor",
                value: self.velocity_clamp_factor,
                reason: "must not be larger than 1",
            });
        }
        require_positive("world_half_width", self.world_half_width)?;
        require_finite("floor", self.floor)?;
        require_non_negative("boundary_stiffness", self.boundary_stiffness)?;
        require_non_negative("attractor_radius", self.attractor_radius)?;
        require_non_negative("attractor_stiffness", self.attractor_stiffness)?;
        require_non_negative("viscosity_sigma", self.viscosity_sigma)?;
        require_non_negative("viscosity_beta", self.viscosity_beta)?;
        require_non_negative("initial_jitter", self.initial_jitter)?;
        if self.num_hash_buckets == 0 {
            return Err(SimulationError::InvalidParameter {
                name: "num_hash_buckets",
                value: 0.,
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// Grid cell size of the spatial index. Equal to the support radius so that the
    /// 3x3 cell neighborhood covers every interaction partner.
    pub fn cell_size(&self) -> FT {
        self.support_radius
    }

    /// Half width of the initial fluid block.
    pub fn block_half_width(&self) -> FT {
        self.world_half_width / 4.
    }

    /// Distance between neighboring particles of the initial block.
    pub fn block_spacing(&self) -> FT {
        self.support_radius * 0.5
    }

    pub fn gravity_vector<const D: usize>(&self) -> VF<D> {
        let mut data: [FT; D] = [0.; D];
        data[1] = -self.gravity;
        VF::<D>::from_column_slice(&data)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<SimulationParams, SimulationError> {
        let mut params_serde = default_mapping()?;
        overwrite_entries(&mut params_serde, yaml)?;
        let params: SimulationParams = serde_yaml::from_value(serde_yaml::Value::Mapping(params_serde))?;
        params.validate()?;
        Ok(params)
    }

    /// Loads parameters from a YAML file. Keys missing from the file keep their default
    /// value. Every key of the optional overwrite file replaces the loaded value.
    pub fn load(path: &Path, overwrite_path: Option<&Path>) -> Result<SimulationParams, SimulationError> {
        let mut params_serde = default_mapping()?;
        overwrite_entries(&mut params_serde, &std::fs::read_to_string(path)?)?;

        if let Some(overwrite_path) = overwrite_path {
            overwrite_entries(&mut params_serde, &std::fs::read_to_string(overwrite_path)?)?;
        }

        let params: SimulationParams = serde_yaml::from_value(serde_yaml::Value::Mapping(params_serde))?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_yaml_string(&self) -> Result<String, SimulationError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn default_mapping() -> Result<serde_yaml::Mapping, SimulationError> {
    Ok(serde_yaml::from_value(serde_yaml::to_value(SimulationParams::default())?)?)
}

fn overwrite_entries(mapping: &mut serde_yaml::Mapping, yaml: &str) -> Result<(), SimulationError> {
    if yaml.trim().is_empty() {
        return Ok(());
    }

    let overwrite: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(yaml)?;
    for (k, v) in overwrite.into_iter() {
        match mapping.get_mut(&serde_yaml::Value::String(k.clone())) {
            Some(entry) => *entry = v,
            None => return Err(SimulationError::UnknownConfigKey(k)),
        }
    }
    Ok(())
}

#[test]
fn default_parameters_are_valid() {
    let params = SimulationParams::default();
    params.validate().unwrap();
    assert_eq!(params.cell_size(), 2.5);
    assert_eq!(params.block_spacing(), 1.25);
    assert_eq!(params.block_half_width(), 12.5);
    crate::assert_ft_approx_eq(params.stiffness_near, params.stiffness * 10., 1e-7, || {
        format!("near stiffness is ten times the far stiffness")
    });
}

#[test]
fn gravity_vector_points_down() {
    let mut params = SimulationParams::default();
    params.gravity = 0.25;
    assert_eq!(params.gravity_vector::<2>(), crate::vec2f(0., -0.25));
    assert_eq!(params.gravity_vector::<3>(), crate::vec3f(0., -0.25, 0.));
}

#[test]
fn partial_yaml_keeps_defaults() {
    let params = SimulationParams::from_yaml_str("gravity: 0.005\nrest_density: 4.0\n").unwrap();
    assert_eq!(params.gravity, 0.005);
    assert_eq!(params.rest_density, 4.);
    assert_eq!(params.support_radius, SimulationParams::default().support_radius);

    let params = SimulationParams::from_yaml_str("").unwrap();
    assert_eq!(params, SimulationParams::default());
}

#[test]
fn yaml_round_trip_of_defaults() {
    let yaml = SimulationParams::default().to_yaml_string().unwrap();
    let params = SimulationParams::from_yaml_str(&yaml).unwrap();
    assert_eq!(params, SimulationParams::default());
}

#[test]
fn unknown_keys_are_rejected() {
    match SimulationParams::from_yaml_str("kernel_radius: 1.0\n") {
        Err(SimulationError::UnknownConfigKey(k)) => assert_eq!(k, "kernel_radius"),
        other => panic!("expected unknown key error, got {:?}", other),
    }
}

#[test]
fn invalid_values_are_rejected() {
    match SimulationParams::from_yaml_str("support_radius: 0.0\n") {
        Err(SimulationError::InvalidParameter { name, .. }) => assert_eq!(name, "support_radius"),
        other => panic!("expected invalid parameter error, got {:?}", other),
    }

    let mut params = SimulationParams::default();
    params.num_hash_buckets = 0;
    assert!(params.validate().is_err());

    let mut params = SimulationParams::default();
    params.max_velocity = FT::NAN;
    assert!(params.validate().is_err());

    let mut params = SimulationParams::default();
    params.velocity_clamp_factor = 1.5;
    assert!(params.validate().is_err());
}

#[test]
fn load_applies_overwrite_file() {
    let dir = std::env::temp_dir().join(format!("double-density-sph-params-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let base = dir.join("base.yaml");
    let overwrite = dir.join("overwrite.yaml");
    std::fs::write(&base, "gravity: 0.01\nviscosity_sigma: 1.0\n").unwrap();
    std::fs::write(&overwrite, "viscosity_sigma: 2.0\nneighborhood_search_algorithm: RStar\n").unwrap();

    let params = SimulationParams::load(&base, Some(&overwrite)).unwrap();
    assert_eq!(params.gravity, 0.01);
    assert_eq!(params.viscosity_sigma, 2.);
    assert_eq!(params.neighborhood_search_algorithm, NeighborhoodSearchAlgorithm::RStar);

    std::fs::remove_dir_all(&dir).unwrap();
}
