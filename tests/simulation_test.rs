//! End-to-end tests of the public simulation interface.

use double_density_sph::{
    neighborhood_search::check_neighborhood,
    simulation_parameters::{NeighborhoodSearchAlgorithm, SimulationParams},
    vec2f, FluidSimulation2d, V2,
};
use proptest::prelude::*;

const STEPS: usize = 30;

fn all_finite(fluid: &FluidSimulation2d) -> bool {
    fluid.positions().iter().all(|p| p.x.is_finite() && p.y.is_finite())
}

#[test]
fn scenario_neighbors_of_the_origin() {
    let mut params = SimulationParams::default();
    params.support_radius = 2.;

    let positions = vec![vec2f(0., 0.), vec2f(1., 0.), vec2f(0., 1.), vec2f(5., 5.)];
    let mut fluid = FluidSimulation2d::from_positions(params, positions).unwrap();

    // particles at rest with zero force do not move in the first step
    fluid.step();
    assert_eq!(fluid.positions()[0], vec2f(0., 0.));

    let neighbors: Vec<usize> = fluid.neighbors(0).iter().map(|n| n.index()).collect();
    assert!(neighbors.contains(&1));
    assert!(neighbors.contains(&2));
    assert!(!neighbors.contains(&3));
    assert!(fluid.neighbors(3).is_empty());
}

#[test]
fn reference_block_settles_without_blowing_up() {
    let mut fluid = FluidSimulation2d::initialize(SimulationParams::default(), 441).unwrap();
    for _ in 0..200 {
        fluid.step();
    }

    assert!(all_finite(&fluid));
    let params = *fluid.params();
    check_neighborhood(
        fluid.positions(),
        &(0..fluid.num_particles())
            .map(|i| fluid.neighbors(i).to_vec())
            .collect::<Vec<_>>(),
        params.support_radius,
    );

    let statistics = fluid.statistics();
    assert_eq!(statistics.num_particles, 441);
    assert!(statistics.max_speed.is_finite());
    assert!(statistics.avg_neighbor_count > 1.);
}

#[test]
fn falling_block_stays_above_the_floor_on_average() {
    let mut params = SimulationParams::default();
    params.gravity = 0.005;
    let mut fluid = FluidSimulation2d::initialize(params, 200).unwrap();

    for _ in 0..400 {
        fluid.step();
    }

    assert!(all_finite(&fluid));
    let mean_y: f64 = fluid.positions().iter().map(|p| p.y as f64).sum::<f64>() / fluid.num_particles() as f64;
    assert!(mean_y > -params.support_radius as f64, "mean height {}", mean_y);
    assert!(mean_y < 12.5, "the block did not fall (mean height {})", mean_y);
}

#[test]
fn rstar_and_spatial_hash_agree() {
    let run = |algorithm| {
        let mut params = SimulationParams::default();
        params.neighborhood_search_algorithm = algorithm;
        let mut fluid = FluidSimulation2d::initialize(params, 150).unwrap();
        for _ in 0..5 {
            fluid.step();
        }
        fluid.positions().to_vec()
    };

    let hash = run(NeighborhoodSearchAlgorithm::SpatialHash);
    let rstar = run(NeighborhoodSearchAlgorithm::RStar);
    for (a, b) in hash.iter().zip(rstar.iter()) {
        assert!((a - b).norm() < 1e-3, "{} != {}", a, b);
    }
}

#[test]
fn yaml_configuration_drives_the_simulation() {
    let params = SimulationParams::from_yaml_str("gravity: 0.002\nseed: 42\n").unwrap();
    let mut fluid = FluidSimulation2d::initialize(params, 64).unwrap();
    let start: Vec<V2> = fluid.positions().to_vec();
    for _ in 0..10 {
        fluid.step();
    }
    assert_ne!(start, fluid.positions().to_vec());
    fluid.shutdown();
}

fn attractor_command() -> impl Strategy<Value = (f32, f32, bool)> {
    (-60.0f32..60.0, -10.0f32..60.0, any::<bool>())
}

fn particle_cloud() -> impl Strategy<Value = Vec<(f32, f32)>> {
    prop::collection::vec((-20.0f32..20.0, 0.0f32..30.0), 2..80)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn random_attractor_sequences_keep_positions_finite(
        commands in prop::collection::vec(attractor_command(), STEPS)
    ) {
        let mut fluid = FluidSimulation2d::initialize(SimulationParams::default(), 120).unwrap();
        for (x, y, active) in commands {
            fluid.set_attractor(vec2f(x as _, y as _), active);
            fluid.step();
        }
        prop_assert!(all_finite(&fluid));
        for i in 0..fluid.num_particles() {
            prop_assert!(fluid.particle(i).density_near >= 0.);
        }
    }

    #[test]
    fn random_clouds_have_symmetric_neighborhoods(cloud in particle_cloud()) {
        let mut params = SimulationParams::default();
        params.check_neighborhood = true;
        let positions: Vec<V2> = cloud.iter().map(|&(x, y)| vec2f(x as _, y as _)).collect();
        let mut fluid = FluidSimulation2d::from_positions(params, positions).unwrap();

        for _ in 0..STEPS {
            fluid.step();
        }
        prop_assert!(all_finite(&fluid));

        for i in 0..fluid.num_particles() {
            for n in fluid.neighbors(i) {
                let back = fluid.neighbors(n.index()).iter().find(|m| m.index() == i);
                prop_assert!(back.is_some());
                prop_assert_eq!(back.map(|m| m.q), Some(n.q));
            }
        }
    }

    #[test]
    fn identical_setups_give_identical_positions(seed in any::<u64>()) {
        let run = || {
            let mut params = SimulationParams::default();
            params.seed = seed;
            let mut fluid = FluidSimulation2d::initialize(params, 100).unwrap();
            fluid.set_attractor(vec2f(0., 15.), true);
            for _ in 0..10 {
                fluid.step();
            }
            fluid.positions().to_vec()
        };
        prop_assert_eq!(run(), run());
    }
}
