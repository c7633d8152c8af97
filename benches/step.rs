//! Benchmarks for a single simulation step.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use double_density_sph::{
    simulation_parameters::{NeighborhoodSearchAlgorithm, SimulationParams},
    FluidSimulation2d,
};

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");

    for num_particles in [1024, 4096] {
        for (label, algorithm) in [
            ("spatial_hash", NeighborhoodSearchAlgorithm::SpatialHash),
            ("rstar", NeighborhoodSearchAlgorithm::RStar),
        ] {
            let mut params = SimulationParams::default();
            params.neighborhood_search_algorithm = algorithm;

            let mut fluid = FluidSimulation2d::initialize(params, num_particles).unwrap();
            // let the block leave its perfect grid layout
            for _ in 0..50 {
                fluid.step();
            }

            group.bench_with_input(BenchmarkId::new(label, num_particles), &num_particles, |b, _| {
                b.iter(|| {
                    fluid.step();
                    black_box(fluid.positions());
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
