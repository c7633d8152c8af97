use crate::{
    concurrency::{par_iter_mut3, par_iter_mut4},
    floating_type_mod::FT,
    neighborhood_search::Neighbor,
    simulation_parameters::SimulationParams,
    VF,
};

/// Point that pulls nearby particles towards itself while active.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attractor<const D: usize> {
    pub position: VF<D>,
    pub active: bool,
}

impl<const D: usize> Default for Attractor<D> {
    fn default() -> Self {
        Attractor {
            // far outside of the domain
            position: VF::<D>::repeat(999.),
            active: false,
        }
    }
}

impl<const D: usize> Attractor<D> {
    pub fn new(position: VF<D>, active: bool) -> Self {
        Attractor { position, active }
    }

    /// Spring force towards the attractor, zero if inactive or out of reach.
    pub fn force(&self, position: &VF<D>, radius: FT, stiffness: FT) -> VF<D> {
        if !self.active {
            return VF::<D>::zeros();
        }
        let diff = *position - self.position;
        if diff.norm_squared() >= radius * radius {
            return VF::<D>::zeros();
        }
        -diff * stiffness
    }
}

/// Linear springs that push particles back into `[-W, W] x [floor, inf)`.
pub fn boundary_force<const D: usize>(position: &VF<D>, simulation_params: &SimulationParams) -> VF<D> {
    let w = simulation_params.world_half_width;
    let k = simulation_params.boundary_stiffness;

    let mut f = VF::<D>::zeros();
    if position[0] < -w {
        f[0] -= (position[0] + w) * k;
    } else if position[0] > w {
        f[0] -= (position[0] - w) * k;
    }

    if position[1] < simulation_params.floor {
        f[1] -= (position[1] - simulation_params.floor) * k;
    }
    f
}

/**
 * Advances a single particle by one frame.
 *
 * The force of the previous frame is a position delta and is applied first. Afterwards
 * the velocity is derived from the position history, clamped once, and added to the
 * position a second time. The new force starts with gravity plus the boundary and
 * attractor springs evaluated at the final position.
 */
#[inline(always)]
pub fn integrate_particle<const D: usize>(
    position: &mut VF<D>,
    position_old: &mut VF<D>,
    velocity: &mut VF<D>,
    force: &mut VF<D>,
    attractor: &Attractor<D>,
    simulation_params: &SimulationParams,
) {
    *position += *force;
    *force = simulation_params.gravity_vector::<D>();

    *velocity = *position - *position_old;
    if velocity.norm_squared() > simulation_params.max_velocity * simulation_params.max_velocity {
        *velocity *= simulation_params.velocity_clamp_factor;
    }

    *position_old = *position;
    *position += *velocity;

    *force += boundary_force(position, simulation_params);
    *force += attractor.force(
        position,
        simulation_params.attractor_radius,
        simulation_params.attractor_stiffness,
    );
}

pub fn integrate<const D: usize>(
    position: &mut [VF<D>],
    position_old: &mut [VF<D>],
    velocity: &mut [VF<D>],
    force: &mut [VF<D>],
    attractor: &Attractor<D>,
    simulation_params: &SimulationParams,
) {
    par_iter_mut4(
        position,
        position_old,
        velocity,
        force,
        |_i, p_position, p_position_old, p_velocity, p_force| {
            integrate_particle(
                p_position,
                p_position_old,
                p_velocity,
                p_force,
                attractor,
                simulation_params,
            );
        },
    );
}

/// Clears the per-frame accumulators before the neighbor search.
pub fn reset_derived_state(density: &mut [FT], density_near: &mut [FT], neighbors: &mut [Vec<Neighbor>]) {
    par_iter_mut3(density, density_near, neighbors, |_i, p_density, p_density_near, p_neighs| {
        *p_density = 0.;
        *p_density_near = 0.;
        p_neighs.clear();
    });
}

#[cfg(test)]
fn integrate_single(
    position: crate::V2,
    position_old: crate::V2,
    force: crate::V2,
    attractor: &Attractor<2>,
    simulation_params: &SimulationParams,
) -> (crate::V2, crate::V2, crate::V2, crate::V2) {
    let mut position = position;
    let mut position_old = position_old;
    let mut velocity = crate::vec2f(0., 0.);
    let mut force = force;
    integrate_particle(
        &mut position,
        &mut position_old,
        &mut velocity,
        &mut force,
        attractor,
        simulation_params,
    );
    (position, position_old, velocity, force)
}

#[test]
fn velocity_is_added_twice_per_frame() {
    use crate::vec2f;

    let params = SimulationParams::default();
    let (p, p_old, v, f) = integrate_single(
        vec2f(1., 10.),
        vec2f(0.9, 10.),
        vec2f(0.2, 0.),
        &Attractor::default(),
        &params,
    );

    // position += force, then velocity from history, then position += velocity
    crate::assert_ft_approx_eq(v.x, 0.3, 1e-6, || format!("velocity"));
    crate::assert_ft_approx_eq(p_old.x, 1.2, 1e-6, || format!("old position"));
    crate::assert_ft_approx_eq(p.x, 1.5, 1e-6, || format!("position"));
    assert_eq!(p.y, 10.);
    assert_eq!(f, vec2f(0., 0.));
}

#[test]
fn fast_particles_are_clamped_once() {
    use crate::vec2f;

    let params = SimulationParams::default();
    let (p, _, v, _) = integrate_single(
        vec2f(0., 10.),
        vec2f(-4., 10.),
        vec2f(0., 0.),
        &Attractor::default(),
        &params,
    );
    assert_eq!(v, vec2f(2., 0.));
    assert_eq!(p, vec2f(2., 10.));

    // exactly at the limit: |v|^2 == max^2 is not clamped
    let (_, _, v, _) = integrate_single(
        vec2f(0., 10.),
        vec2f(-2., 10.),
        vec2f(0., 0.),
        &Attractor::default(),
        &params,
    );
    assert_eq!(v, vec2f(2., 0.));
}

#[test]
fn gravity_seeds_the_force() {
    use crate::vec2f;

    let mut params = SimulationParams::default();
    params.gravity = 0.005;
    let (_, _, _, f) = integrate_single(
        vec2f(0., 10.),
        vec2f(0., 10.),
        vec2f(0., 0.),
        &Attractor::default(),
        &params,
    );
    assert_eq!(f, vec2f(0., -0.005));
}

#[test]
fn boundary_pushes_particles_inwards() {
    use crate::vec2f;

    let params = SimulationParams::default();
    let w = params.world_half_width;

    let f = boundary_force(&vec2f(-w - 8., 5.), &params);
    crate::assert_ft_approx_eq(f.x, 1., 1e-6, || format!("left wall"));
    assert_eq!(f.y, 0.);

    let f = boundary_force(&vec2f(w + 16., 5.), &params);
    crate::assert_ft_approx_eq(f.x, -2., 1e-6, || format!("right wall"));

    let f = boundary_force(&vec2f(0., -4.), &params);
    assert_eq!(f.x, 0.);
    crate::assert_ft_approx_eq(f.y, 0.5, 1e-6, || format!("floor"));

    // no ceiling
    assert_eq!(boundary_force(&vec2f(0., 1.0e4), &params), vec2f(0., 0.));
    assert_eq!(boundary_force(&vec2f(w, params.floor), &params), vec2f(0., 0.));
}

#[test]
fn attractor_pulls_only_when_active_and_close() {
    use crate::vec2f;

    let params = SimulationParams::default();
    let r = params.attractor_radius;
    let k = params.attractor_stiffness;

    let active = Attractor::new(vec2f(0., 20.), true);
    let f = active.force(&vec2f(2.56, 20.), r, k);
    crate::assert_ft_approx_eq(f.x, -0.01, 1e-7, || format!("attractor force"));
    assert_eq!(f.y, 0.);

    assert_eq!(active.force(&vec2f(r + 1., 20.), r, k), vec2f(0., 0.));

    let inactive = Attractor::new(vec2f(0., 20.), false);
    assert_eq!(inactive.force(&vec2f(2.56, 20.), r, k), vec2f(0., 0.));

    assert!(!Attractor::<2>::default().active);
}

#[test]
fn reset_clears_accumulators() {
    let mut density = vec![1., 2.];
    let mut density_near = vec![3., 4.];
    let mut neighbors = vec![
        vec![Neighbor { j: 1, q: 0.5, q2: 0.25 }],
        vec![Neighbor { j: 0, q: 0.5, q2: 0.25 }],
    ];
    reset_derived_state(&mut density, &mut density_near, &mut neighbors);
    assert_eq!(density, vec![0., 0.]);
    assert_eq!(density_near, vec![0., 0.]);
    assert!(neighbors.iter().all(|n| n.is_empty() && n.capacity() >= 1));
}
