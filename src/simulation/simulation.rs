use std::{
    fmt::{self, Display, Write},
    time::Instant,
};

use log::{debug, info, trace, warn};
use num_traits::Float;

#[cfg(not(any(target_arch = "wasm32", feature = "single-threaded")))]
use rayon::iter::ParallelIterator;

use crate::{
    concurrency::into_par_iter,
    counters::{write_counters, FrameStatistics, PerformanceCounters, ValueCounters},
    density::{apply_pressure_forces, compute_pressures},
    error::SimulationError,
    floating_type_mod::FT,
    integrator::{integrate, reset_derived_state, Attractor},
    neighborhood_search::{check_neighborhood, find_neighbors, Neighbor},
    particles::{add_fluid_block, Particle, ParticleStore},
    simulation_parameters::SimulationParams,
    spatial_hash::SpatialIndex,
    sph_kernels::{DimensionUtils, DimensionUtils2d},
    viscosity::apply_viscosity,
    Color, VF,
};

/// Double density relaxation fluid. One call to [`FluidSimulation::step`] advances the
/// particles by one frame.
pub struct FluidSimulation<DU: DimensionUtils<D>, const D: usize> {
    simulation_params: SimulationParams,
    particles: ParticleStore<D>,
    spatial_index: SpatialIndex,
    attractor: Attractor<D>,

    pcounters: PerformanceCounters,
    vcounters: ValueCounters,

    step_number: usize,

    _dimension_utils: std::marker::PhantomData<DU>,
}

pub type FluidSimulation2d = FluidSimulation<DimensionUtils2d, 2>;

fn check_particle_count(num_particles: usize) -> Result<(), SimulationError> {
    // particle ids are stored as u32
    if num_particles == 0 || num_particles > u32::MAX as usize {
        return Err(SimulationError::InvalidParticleCount(num_particles));
    }
    Ok(())
}

impl<DU: DimensionUtils<D>, const D: usize> FluidSimulation<DU, D> {
    fn new(
        simulation_params: SimulationParams,
        positions: Vec<VF<D>>,
        positions_old: Vec<VF<D>>,
    ) -> Result<Self, SimulationError> {
        simulation_params.validate()?;
        check_particle_count(positions.len())?;

        for p in positions.iter().chain(positions_old.iter()) {
            if let Some(&value) = p.iter().find(|x| !x.is_finite()) {
                return Err(SimulationError::InvalidParameter {
                    name: "position",
                    value,
                    reason: "must be finite",
                });
            }
        }

        let num_particles = positions.len();
        if simulation_params.num_hash_buckets < num_particles / 16 {
            warn!(
                "only {} hash buckets for {} particles, expect long collision chains",
                simulation_params.num_hash_buckets, num_particles
            );
        }

        let spatial_index = SpatialIndex::new(
            simulation_params.num_hash_buckets,
            simulation_params.cell_size(),
            DU::grid_neighborhood(),
        );

        info!(
            "initialized fluid with {} particles (cell size {}, {} hash buckets, {:?})",
            num_particles,
            spatial_index.cell_size(),
            spatial_index.num_buckets(),
            simulation_params.neighborhood_search_algorithm
        );

        Ok(FluidSimulation {
            particles: ParticleStore::new(positions, positions_old, &simulation_params),
            simulation_params,
            spatial_index,
            attractor: Attractor::default(),
            pcounters: PerformanceCounters::new(false),
            vcounters: ValueCounters::new(false),
            step_number: 0,
            _dimension_utils: std::marker::PhantomData,
        })
    }

    /**
     * Creates `num_particles` particles in a block above the floor. The previous positions
     * carry a small seeded random offset.
     */
    pub fn initialize(simulation_params: SimulationParams, num_particles: usize) -> Result<Self, SimulationError> {
        simulation_params.validate()?;
        check_particle_count(num_particles)?;

        if simulation_params.initial_jitter == 0. {
            warn!("initial jitter is zero, the fluid block stays perfectly symmetric");
        }

        let mut positions = Vec::new();
        let mut positions_old = Vec::new();
        add_fluid_block::<DU, D>(&simulation_params, num_particles, &mut positions, &mut positions_old);

        Self::new(simulation_params, positions, positions_old)
    }

    /// Creates particles at rest at the given positions.
    pub fn from_positions(simulation_params: SimulationParams, positions: Vec<VF<D>>) -> Result<Self, SimulationError> {
        let positions_old = positions.clone();
        Self::new(simulation_params, positions, positions_old)
    }

    pub fn step(&mut self) {
        let start = Instant::now();
        self.pcounters.begin("simulation-step");

        let simulation_params = self.simulation_params;
        let attractor = self.attractor;
        let hot = &mut self.particles.hot;
        let meta = &mut self.particles.meta;

        trace!("step {}: integrate", self.step_number);
        self.pcounters.begin("integrate");
        integrate(
            &mut hot.position,
            &mut hot.position_old,
            &mut meta.velocity,
            &mut meta.force,
            &attractor,
            &simulation_params,
        );
        reset_derived_state(&mut meta.density, &mut meta.density_near, &mut meta.neighbors);
        self.pcounters.end("integrate");
        debug_assert_finite(&hot.position, "position");

        trace!("step {}: rebuild spatial index", self.step_number);
        self.pcounters.begin("spatial-index");
        self.spatial_index.clear();
        for (i, p) in hot.position.iter().enumerate() {
            self.spatial_index.insert(&DU::to_vec3(p), i as u32);
        }
        self.pcounters.end("spatial-index");

        trace!("step {}: neighborhood", self.step_number);
        self.pcounters.begin("neighborhood");
        find_neighbors::<DU, D>(
            simulation_params.neighborhood_search_algorithm,
            &self.spatial_index,
            &hot.position,
            simulation_params.support_radius,
            &mut meta.neighbors,
            &mut meta.density,
            &mut meta.density_near,
        );
        self.pcounters.end("neighborhood");

        if simulation_params.check_neighborhood {
            check_neighborhood(&hot.position, &meta.neighbors, simulation_params.support_radius);
        }

        trace!("step {}: pressure", self.step_number);
        self.pcounters.begin("pressure");
        compute_pressures(
            &meta.density,
            &meta.density_near,
            &mut meta.pressure,
            &mut meta.pressure_near,
            &simulation_params,
        );
        apply_pressure_forces(
            &hot.position,
            &meta.neighbors,
            &meta.pressure,
            &meta.pressure_near,
            &mut meta.force,
        );
        self.pcounters.end("pressure");
        debug_assert_finite(&meta.force, "force");

        trace!("step {}: viscosity", self.step_number);
        self.pcounters.begin("viscosity");
        meta.velocity_temp.copy_from_slice(&meta.velocity);
        apply_viscosity(
            &hot.position,
            &meta.neighbors,
            &meta.density,
            &meta.sigma,
            &meta.beta,
            simulation_params.support_radius,
            &meta.velocity_temp,
            &mut meta.velocity,
            &mut meta.color,
        );
        self.pcounters.end("viscosity");

        self.pcounters.end("simulation-step");
        self.step_number += 1;

        if self.pcounters.enabled() {
            let statistics = self.statistics();
            self.vcounters.add_value("particle-count", statistics.num_particles as FT);
            self.vcounters.add_value("neighbor-count-avg", statistics.avg_neighbor_count);
            self.vcounters.add_value("density-max", statistics.max_density);
            self.vcounters.add_value("speed-max", statistics.max_speed);
        }

        debug!("step {} took {:?}", self.step_number, start.elapsed());
    }

    /// Moves the attractor. The new state is used from the next call to `step` on.
    pub fn set_attractor(&mut self, position: VF<D>, active: bool) {
        self.attractor = Attractor::new(position, active);
    }

    pub fn attractor(&self) -> Attractor<D> {
        self.attractor
    }

    pub fn positions(&self) -> &[VF<D>] {
        &self.particles.hot.position
    }

    pub fn debug_colors(&self) -> &[Color] {
        &self.particles.meta.color
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// Number of completed frames.
    pub fn step_number(&self) -> usize {
        self.step_number
    }

    pub fn params(&self) -> &SimulationParams {
        &self.simulation_params
    }

    pub fn particle(&self, i: usize) -> Particle<D> {
        self.particles.particle(i)
    }

    pub fn particles(&self) -> &ParticleStore<D> {
        &self.particles
    }

    pub fn neighbors(&self, i: usize) -> &[Neighbor] {
        &self.particles.meta.neighbors[i]
    }

    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.spatial_index
    }

    /// Enables the pass timings and the per-step value samples.
    pub fn enable_counters(&mut self, enabled: bool) {
        self.pcounters.set_enabled(enabled);
        self.vcounters = ValueCounters::new(enabled);
    }

    pub fn performance_counters(&self) -> &PerformanceCounters {
        &self.pcounters
    }

    pub fn value_counters(&self) -> &ValueCounters {
        &self.vcounters
    }

    pub fn statistics(&self) -> FrameStatistics {
        let meta = &self.particles.meta;
        let num_particles = self.num_particles();

        let total_neighbors: usize = into_par_iter(0..num_particles).map(|i| meta.neighbors[i].len()).sum();

        FrameStatistics {
            step_number: self.step_number,
            num_particles,
            avg_neighbor_count: total_neighbors as FT / num_particles.max(1) as FT,
            max_neighbor_count: meta.neighbors.iter().map(Vec::len).max().unwrap_or(0),
            min_density: meta.density.iter().cloned().fold(FT::INFINITY, FT::min),
            max_density: meta.density.iter().cloned().fold(0., FT::max),
            max_speed: meta.velocity.iter().map(|v| v.norm()).fold(0., FT::max),
            max_bucket_len: self.spatial_index.max_bucket_len(),
        }
    }

    /// Releases all particle storage. The simulation cannot be used afterwards.
    pub fn shutdown(mut self) {
        info!(
            "shutting down fluid with {} particles after {} steps",
            self.num_particles(),
            self.step_number
        );
        self.particles.release();
        self.spatial_index.clear();
    }
}

pub fn write_statistics<DU: DimensionUtils<D>, const D: usize>(
    fluid_simulation: &FluidSimulation<DU, D>,
) -> Result<String, fmt::Error> {
    let mut s = String::new();

    writeln!(s, "{}", fluid_simulation.statistics())?;
    writeln!(s)?;

    write_counters(
        &mut s,
        fluid_simulation.performance_counters(),
        fluid_simulation.value_counters(),
    )?;

    Ok(s)
}

fn assert_vector_non_nan<const D: usize>(v: &VF<D>, name: &str, i: usize) {
    for d in 0..D {
        assert!(v[d].is_finite(), "Assertion '{}[{}][{}].is_finite()' failed!", name, i, d);
    }
}

/// Panics on the first non-finite component. Does nothing in release builds.
fn debug_assert_finite<const D: usize>(values: &[VF<D>], name: &str) {
    if cfg!(debug_assertions) {
        for (i, v) in values.iter().enumerate() {
            assert_vector_non_nan(v, name, i);
        }
    }
}

pub fn is_ft_approx_eq<FT: Float>(a: FT, b: FT, tolerance: FT) -> bool {
    assert!(!a.is_nan());
    assert!(!b.is_nan());
    b <= a + tolerance && b >= a - tolerance
}

pub fn assert_ft_approx_eq<FT: Float + Display>(a: FT, b: FT, tolerance: FT, s: impl FnOnce() -> String) {
    if !is_ft_approx_eq(a, b, tolerance) {
        panic!(
            "{} value not equal with a tolerance of {}:\n\ta={}\n\tb={}\n",
            s(),
            tolerance,
            a,
            b
        );
    }
}

#[test]
fn invalid_particle_count_is_rejected() {
    let params = SimulationParams::default();
    assert!(matches!(
        FluidSimulation2d::initialize(params, 0),
        Err(SimulationError::InvalidParticleCount(0))
    ));
    assert!(matches!(
        FluidSimulation2d::from_positions(params, Vec::new()),
        Err(SimulationError::InvalidParticleCount(0))
    ));
}

#[test]
fn invalid_parameters_are_rejected() {
    let mut params = SimulationParams::default();
    params.support_radius = 0.;
    assert!(matches!(
        FluidSimulation2d::initialize(params, 10),
        Err(SimulationError::InvalidParameter {
            name: "support_radius",
            ..
        })
    ));

    let params = SimulationParams::default();
    let positions = vec![crate::vec2f(0., FT::NAN)];
    assert!(matches!(
        FluidSimulation2d::from_positions(params, positions),
        Err(SimulationError::InvalidParameter { name: "position", .. })
    ));
}

#[test]
fn initialize_creates_requested_particles() {
    let fluid = FluidSimulation2d::initialize(SimulationParams::default(), 441).unwrap();
    assert_eq!(fluid.num_particles(), 441);
    assert_eq!(fluid.positions().len(), 441);
    assert_eq!(fluid.debug_colors().len(), 441);
    assert_eq!(fluid.step_number(), 0);
    assert!(!fluid.attractor().active);
}

#[test]
fn steps_keep_particles_finite() {
    let mut params = SimulationParams::default();
    params.check_neighborhood = true;
    let mut fluid = FluidSimulation2d::initialize(params, 300).unwrap();

    for _ in 0..50 {
        fluid.step();
    }
    assert_eq!(fluid.step_number(), 50);

    for i in 0..fluid.num_particles() {
        let p = fluid.particle(i);
        assert!(p.position.iter().all(|x| x.is_finite()));
        assert!(p.velocity.iter().all(|x| x.is_finite()));
        assert!(p.density_near >= 0.);
        assert!(p.pressure_near >= 0.);
        assert!(fluid.neighbors(i).iter().all(|n| n.index() != i));
    }
    assert_eq!(fluid.spatial_index().len(), 300);
}

#[test]
fn identical_setups_are_deterministic() {
    let run = || {
        let mut fluid = FluidSimulation2d::initialize(SimulationParams::default(), 200).unwrap();
        for k in 0..30 {
            if k == 10 {
                fluid.set_attractor(crate::vec2f(0., 20.), true);
            }
            fluid.step();
        }
        fluid.positions().to_vec()
    };
    assert_eq!(run(), run());
}

#[test]
fn attractor_pulls_a_resting_particle() {
    let params = SimulationParams::default();
    let mut attracted = FluidSimulation2d::from_positions(params, vec![crate::vec2f(5., 20.)]).unwrap();
    let mut free = FluidSimulation2d::from_positions(params, vec![crate::vec2f(5., 20.)]).unwrap();

    attracted.set_attractor(crate::vec2f(0., 20.), true);
    for _ in 0..2 {
        attracted.step();
        free.step();
    }

    assert!(attracted.positions()[0].x < 5.);
    assert_eq!(free.positions()[0], crate::vec2f(5., 20.));
}

#[test]
fn particles_outside_the_domain_are_pushed_back() {
    let params = SimulationParams::default();
    let mut fluid = FluidSimulation2d::from_positions(params, vec![crate::vec2f(-70., 10.)]).unwrap();
    fluid.step();
    assert!(fluid.particle(0).force.x > 0.);
    fluid.step();
    assert!(fluid.positions()[0].x > -70.);
}

#[test]
fn far_away_particles_step_without_overflow() {
    let positions = vec![crate::vec2f(1e10, 10.), crate::vec2f(0., 10.)];
    let mut fluid = FluidSimulation2d::from_positions(SimulationParams::default(), positions).unwrap();
    for _ in 0..3 {
        fluid.step();
    }
    assert!(fluid.neighbors(0).is_empty());
    assert!(fluid.neighbors(1).is_empty());
    assert_eq!(fluid.positions()[1], crate::vec2f(0., 10.));
}

#[test]
fn gravity_pulls_particles_down() {
    let mut params = SimulationParams::default();
    params.gravity = 0.005;
    let mut fluid = FluidSimulation2d::from_positions(params, vec![crate::vec2f(0., 20.)]).unwrap();
    for _ in 0..3 {
        fluid.step();
    }
    assert!(fluid.positions()[0].y < 20.);
}

#[test]
fn statistics_and_counters() {
    let mut fluid = FluidSimulation2d::initialize(SimulationParams::default(), 100).unwrap();
    fluid.enable_counters(true);
    for _ in 0..3 {
        fluid.step();
    }

    let statistics = fluid.statistics();
    assert_eq!(statistics.step_number, 3);
    assert_eq!(statistics.num_particles, 100);
    assert!(statistics.avg_neighbor_count > 0.);
    assert!(statistics.max_density >= statistics.min_density);

    assert_eq!(fluid.performance_counters().get("simulation-step").unwrap().len(), 3);
    assert_eq!(fluid.value_counters().get("particle-count").unwrap().avg(), 100.);

    let s = write_statistics(&fluid).unwrap();
    assert!(s.contains("100 particles"));
    assert!(s.contains("viscosity: avg:"));
    assert!(s.contains("3 steps, last"));
}

#[test]
fn shutdown_consumes_the_simulation() {
    let mut fluid = FluidSimulation2d::initialize(SimulationParams::default(), 50).unwrap();
    fluid.step();
    fluid.shutdown();
}
