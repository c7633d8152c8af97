use nalgebra::zero;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    floating_type_mod::FT, neighborhood_search::Neighbor, simulation_parameters::SimulationParams,
    sph_kernels::DimensionUtils, vec2f, Color, VF,
};

/// Initial capacity of every neighbor list. Lists grow beyond it when needed.
pub const NEIGHBOR_LIST_CAPACITY: usize = 64;

/**
 * Declares a structure-of-arrays container. Every field is a `Vec` with one entry per
 * particle and the particle id is the index into all of them. Entries are never
 * reordered or removed since neighbor lists refer to particles by index.
 */
macro_rules! decl_particle_vec {
    (pub struct $struct_name:ident<const D: usize> { $(pub $field_name:ident: Vec<$field_type:ty> | $default_value:expr),*$(,)?  }) => {
        pub struct $struct_name<const D: usize> {
            $(
                pub $field_name : Vec<$field_type>,
            )*
        }

        impl<const D: usize> $struct_name<D> {
            pub fn with_len(len: usize) -> Self {
                Self {
                    $(
                        $field_name: (0..len).map(|_| $default_value).collect::<Vec<$field_type>>(),
                    )*
                }
            }

            /// True if every array has exactly `len` entries.
            pub fn has_len(&self, len: usize) -> bool {
                true $(&& self.$field_name.len() == len)*
            }

            /// Frees the memory of all arrays.
            pub fn release(&mut self) {
                $(
                    self.$field_name = Vec::new();
                )*
            }
        }
    }
}

// hot data: read by every pass
decl_particle_vec! {
    pub struct ParticlePositions<const D: usize> {
        pub position: Vec<VF<D>> | zero(),
        pub position_old: Vec<VF<D>> | zero(),
    }
}

// cold data
decl_particle_vec! {
    pub struct ParticleMeta<const D: usize> {
        pub velocity: Vec<VF<D>> | zero(),
        // copy of `velocity` taken before the viscosity pass
        pub velocity_temp: Vec<VF<D>> | zero(),

        // accumulated displacement for the next frame (not an acceleration)
        pub force: Vec<VF<D>> | zero(),

        pub density: Vec<FT> | 0.,
        pub density_near: Vec<FT> | 0.,
        pub pressure: Vec<FT> | 0.,
        pub pressure_near: Vec<FT> | 0.,

        // linear and quadratic viscosity coefficients
        pub sigma: Vec<FT> | 0.,
        pub beta: Vec<FT> | 0.,

        pub neighbors: Vec<Vec<Neighbor>> | Vec::with_capacity(NEIGHBOR_LIST_CAPACITY),

        // for debugging/rendering only
        pub color: Vec<Color> | zero(),
    }
}

/// Copy of all attributes of a single particle.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle<const D: usize> {
    pub id: usize,
    pub position: VF<D>,
    pub position_old: VF<D>,
    pub velocity: VF<D>,
    pub force: VF<D>,
    pub density: FT,
    pub density_near: FT,
    pub pressure: FT,
    pub pressure_near: FT,
    pub sigma: FT,
    pub beta: FT,
    pub neighbor_count: usize,
    pub color: Color,
}

pub struct ParticleStore<const D: usize> {
    pub hot: ParticlePositions<D>,
    pub meta: ParticleMeta<D>,
}

impl<const D: usize> ParticleStore<D> {
    pub fn new(position: Vec<VF<D>>, position_old: Vec<VF<D>>, simulation_params: &SimulationParams) -> Self {
        assert_eq!(position.len(), position_old.len());
        let num_particles = position.len();

        let mut meta = ParticleMeta::<D>::with_len(num_particles);
        meta.sigma.fill(simulation_params.viscosity_sigma);
        meta.beta.fill(simulation_params.viscosity_beta);

        ParticleStore {
            hot: ParticlePositions { position, position_old },
            meta,
        }
    }

    pub fn len(&self) -> usize {
        self.hot.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hot.position.is_empty()
    }

    /// Checks the invariant that all arrays have one entry per particle.
    pub fn is_consistent(&self) -> bool {
        let len = self.len();
        self.hot.has_len(len) && self.meta.has_len(len)
    }

    pub fn particle(&self, i: usize) -> Particle<D> {
        Particle {
            id: i,
            position: self.hot.position[i],
            position_old: self.hot.position_old[i],
            velocity: self.meta.velocity[i],
            force: self.meta.force[i],
            density: self.meta.density[i],
            density_near: self.meta.density_near[i],
            pressure: self.meta.pressure[i],
            pressure_near: self.meta.pressure_near[i],
            sigma: self.meta.sigma[i],
            beta: self.meta.beta[i],
            neighbor_count: self.meta.neighbors[i].len(),
            color: self.meta.color[i],
        }
    }

    pub fn release(&mut self) {
        self.hot.release();
        self.meta.release();
    }
}

/**
 * Places `num_particles` particles on a grid with spacing `support_radius / 2`. The block
 * spans `[-W/4, W/4]` horizontally and starts `W/4` above the floor. Rows are filled from
 * the bottom until all particles are placed, so large counts make the block taller.
 *
 * The previous position of each particle is offset by a small random amount which gives
 * the block a tiny initial velocity and breaks the symmetry of the grid.
 */
pub fn add_fluid_block<DU: DimensionUtils<D>, const D: usize>(
    simulation_params: &SimulationParams,
    num_particles: usize,
    particle_positions: &mut Vec<VF<D>>,
    particle_positions_old: &mut Vec<VF<D>>,
) {
    let half_width = simulation_params.block_half_width();
    let spacing = simulation_params.block_spacing();
    let bottom = simulation_params.floor + half_width;
    let num_columns = (2. * half_width / spacing + 1.0e-3).floor() as usize + 1;

    let mut rng = StdRng::seed_from_u64(simulation_params.seed);

    particle_positions.reserve(num_particles);
    particle_positions_old.reserve(num_particles);

    let mut placed = 0;
    let mut row = 0;
    while placed < num_particles {
        for column in 0..num_columns {
            if placed == num_particles {
                break;
            }

            let p = vec2f(
                -half_width + column as FT * spacing,
                bottom + row as FT * spacing,
            );
            let jitter = vec2f(rng.gen::<FT>(), rng.gen::<FT>()) * simulation_params.initial_jitter;

            particle_positions.push(DU::from_vec2(p));
            particle_positions_old.push(DU::from_vec2(p + jitter));
            placed += 1;
        }
        row += 1;
    }
}

#[test]
fn fluid_block_has_exact_particle_count() {
    use crate::sph_kernels::DimensionUtils2d;

    let params = SimulationParams::default();
    for n in [1, 20, 21, 22, 441, 2048] {
        let mut positions = Vec::new();
        let mut positions_old = Vec::new();
        add_fluid_block::<DimensionUtils2d, 2>(&params, n, &mut positions, &mut positions_old);
        assert_eq!(positions.len(), n);
        assert_eq!(positions_old.len(), n);
    }
}

#[test]
fn fluid_block_layout() {
    use crate::sph_kernels::DimensionUtils2d;

    let params = SimulationParams::default();
    let mut positions = Vec::new();
    let mut positions_old = Vec::new();
    add_fluid_block::<DimensionUtils2d, 2>(&params, 441, &mut positions, &mut positions_old);

    // 21 columns from -12.5 to 12.5 with spacing 1.25
    assert_eq!(positions[0], vec2f(-12.5, 12.5));
    assert_eq!(positions[1], vec2f(-11.25, 12.5));
    crate::assert_ft_approx_eq(positions[20].x, 12.5, 1e-5, || format!("last column"));
    assert_eq!(positions[21], vec2f(-12.5, 13.75));

    for p in &positions {
        assert!(p.x >= -12.5 - 1e-5 && p.x <= 12.5 + 1e-5);
        assert!(p.y >= 12.5);
    }
    crate::assert_ft_approx_eq(positions[440].y, 37.5, 1e-4, || format!("top row"));

    for (p, p_old) in positions.iter().zip(positions_old.iter()) {
        let jitter = p_old - p;
        // tolerance for the rounding of `p + jitter`
        let eps = 1e-5;
        assert!(jitter.x >= -eps && jitter.x <= params.initial_jitter + eps);
        assert!(jitter.y >= -eps && jitter.y <= params.initial_jitter + eps);
    }
}

#[test]
fn fluid_block_jitter_is_seeded() {
    use crate::sph_kernels::DimensionUtils2d;

    let params = SimulationParams::default();
    let build = |params: &SimulationParams| {
        let mut positions = Vec::new();
        let mut positions_old = Vec::new();
        add_fluid_block::<DimensionUtils2d, 2>(params, 100, &mut positions, &mut positions_old);
        positions_old
    };
    assert_eq!(build(&params), build(&params));

    let mut other_seed = params;
    other_seed.seed = 1;
    assert_ne!(build(&params), build(&other_seed));
}

#[test]
fn store_assigns_default_material() {
    let params = SimulationParams::default();
    let positions = vec![vec2f(0., 0.), vec2f(1., 0.), vec2f(2., 0.)];
    let mut store = ParticleStore::<2>::new(positions.clone(), positions, &params);

    assert_eq!(store.len(), 3);
    assert!(store.is_consistent());
    for i in 0..store.len() {
        let p = store.particle(i);
        assert_eq!(p.id, i);
        assert_eq!(p.sigma, params.viscosity_sigma);
        assert_eq!(p.beta, params.viscosity_beta);
        assert_eq!(p.neighbor_count, 0);
        assert_eq!(p.density, 0.);
    }
    assert!(store.meta.neighbors.iter().all(|n| n.capacity() >= NEIGHBOR_LIST_CAPACITY));

    store.release();
    assert!(store.is_empty());
    assert!(store.is_consistent());
}
