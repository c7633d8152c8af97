use crate::{
    concurrency::par_iter_mut2, floating_type_mod::FT, neighborhood_search::Neighbor, sph_kernels::direction_and_length,
    Color, VF,
};

/// Visualizes the velocity and density of a particle.
#[inline(always)]
pub fn debug_color<const D: usize>(velocity: &VF<D>, density: FT) -> Color {
    Color::new(
        0.3 + 20. * velocity[0].abs(),
        0.3 + 20. * velocity[1].abs(),
        0.3 + 0.1 * density,
    )
}

/**
 * Pairwise viscosity impulses. For an approaching pair (`u > 0`) the impulse is
 *
 * `I = (1 - l/h) (sigma_j u + beta_j u^2) n`
 *
 * and `I / 2` is subtracted from the velocity of `i`. `u` is the relative velocity
 * projected onto the unit vector `n` from `i` to `j`.
 *
 * The velocity of `i` accumulates the impulses of its neighbors in neighbor list order,
 * so each `u` sees the impulses applied before it. The neighbor velocities are read from
 * `velocity_temp`, which has to be a copy of `velocity` taken before the pass. The debug
 * colors are set from the velocities before any impulse is applied.
 */
#[allow(clippy::too_many_arguments)]
pub fn apply_viscosity<const D: usize>(
    positions: &[VF<D>],
    neighbors: &[Vec<Neighbor>],
    density: &[FT],
    sigma: &[FT],
    beta: &[FT],
    support_radius: FT,
    velocity_temp: &[VF<D>],
    velocity: &mut [VF<D>],
    color: &mut [Color],
) {
    assert_eq!(velocity_temp.len(), velocity.len());

    par_iter_mut2(velocity, color, |i, p_velocity, p_color| {
        *p_color = debug_color(&velocity_temp[i], density[i]);

        for n in &neighbors[i] {
            let j = n.index();
            let (dir, l) = match direction_and_length(positions[j] - positions[i]) {
                Some(x) => x,
                None => continue,
            };

            let q = l / support_radius;
            let u = (*p_velocity - velocity_temp[j]).dot(&dir);
            if u > 0. {
                let impulse = dir * ((1. - q) * (sigma[j] * u + beta[j] * u * u));
                *p_velocity -= impulse * 0.5;
            }
        }
    });
}

#[cfg(test)]
fn viscosity_pair(velocities: [crate::V2; 2], positions: [crate::V2; 2]) -> Vec<crate::V2> {
    let neighbors = vec![
        vec![Neighbor { j: 1, q: 0.5, q2: 0.25 }],
        vec![Neighbor { j: 0, q: 0.5, q2: 0.25 }],
    ];
    let velocity_temp = velocities.to_vec();
    let mut velocity = velocities.to_vec();
    let mut color = vec![Color::zeros(); 2];
    apply_viscosity(
        &positions,
        &neighbors,
        &[3., 3.],
        &[3., 3.],
        &[4., 4.],
        2.5,
        &velocity_temp,
        &mut velocity,
        &mut color,
    );
    velocity
}

#[test]
fn equal_velocities_get_no_impulse() {
    use crate::vec2f;

    let v = vec2f(0.3, -0.1);
    let velocity = viscosity_pair([v, v], [vec2f(0., 0.), vec2f(1., 0.)]);
    assert_eq!(velocity, vec![v, v]);
}

#[test]
fn approaching_particles_are_slowed_down() {
    use crate::vec2f;

    let velocity = viscosity_pair(
        [vec2f(0.1, 0.), vec2f(-0.1, 0.)],
        [vec2f(0., 0.), vec2f(1., 0.)],
    );

    // u = 0.2, q = 1 / 2.5, I = 0.6 * (3 * 0.2 + 4 * 0.04)
    let impulse = 0.6 * (3. * 0.2 + 4. * 0.04);
    crate::assert_ft_approx_eq(velocity[0].x, 0.1 - 0.5 * impulse, 1e-6, || format!("left velocity"));
    crate::assert_ft_approx_eq(velocity[1].x, -0.1 + 0.5 * impulse, 1e-6, || format!("right velocity"));

    // relative velocity shrinks, momentum is preserved
    assert!((velocity[0].x - velocity[1].x).abs() < 0.2);
    crate::assert_ft_approx_eq(velocity[0].x + velocity[1].x, 0., 1e-6, || format!("momentum"));
}

#[test]
fn impulses_accumulate_over_the_neighbor_list() {
    use crate::vec2f;

    let positions = vec![vec2f(0., 0.), vec2f(1., 0.), vec2f(1.5, 0.)];
    let neighbors = vec![
        vec![Neighbor { j: 1, q: 0.6, q2: 0.36 }, Neighbor { j: 2, q: 0.4, q2: 0.16 }],
        vec![Neighbor { j: 0, q: 0.6, q2: 0.36 }],
        vec![Neighbor { j: 0, q: 0.4, q2: 0.16 }],
    ];
    let velocity_temp = vec![vec2f(0.3, 0.), vec2f(-0.1, 0.), vec2f(-0.1, 0.)];
    let mut velocity = velocity_temp.clone();
    let mut color = vec![Color::zeros(); 3];
    apply_viscosity(
        &positions,
        &neighbors,
        &[3.; 3],
        &[3.; 3],
        &[4.; 3],
        2.5,
        &velocity_temp,
        &mut velocity,
        &mut color,
    );

    // in-place update of particle 0 alone, one neighbor after the other
    let mut v0 = velocity_temp[0];
    for j in [1, 2] {
        let r = positions[j] - positions[0];
        let l = r.norm();
        let dir = r / l;
        let u = (v0 - velocity_temp[j]).dot(&dir);
        if u > 0. {
            v0 -= dir * ((1. - l / 2.5) * (3. * u + 4. * u * u)) * 0.5;
        }
    }

    // u = 0.4 against the first neighbor, the second one is then receding
    crate::assert_ft_approx_eq(v0.x, 0.3 - 0.5 * 0.6 * (3. * 0.4 + 4. * 0.16), 1e-5, || format!("reference"));
    crate::assert_ft_approx_eq(velocity[0].x, v0.x, 1e-5, || format!("accumulated velocity"));
    crate::assert_ft_approx_eq(velocity[0].y, 0., 1e-6, || format!("accumulated velocity y"));
}

#[test]
fn receding_particles_are_unchanged() {
    use crate::vec2f;

    let v = [vec2f(-0.1, 0.), vec2f(0.1, 0.)];
    let velocity = viscosity_pair(v, [vec2f(0., 0.), vec2f(1., 0.)]);
    assert_eq!(velocity, v.to_vec());
}

#[test]
fn coincident_particles_are_skipped() {
    use crate::vec2f;

    let v = [vec2f(0.1, 0.), vec2f(-0.1, 0.)];
    let velocity = viscosity_pair(v, [vec2f(2., 2.), vec2f(2., 2.)]);
    assert_eq!(velocity, v.to_vec());
}

#[test]
fn colors_use_velocity_before_impulse() {
    use crate::vec2f;

    let c = debug_color(&vec2f(-0.01, 0.02), 3.);
    crate::assert_ft_approx_eq(c.x, 0.5, 1e-6, || format!("red"));
    crate::assert_ft_approx_eq(c.y, 0.7, 1e-6, || format!("green"));
    crate::assert_ft_approx_eq(c.z, 0.6, 1e-6, || format!("blue"));

    let positions = vec![vec2f(0., 0.), vec2f(1., 0.)];
    let neighbors = vec![
        vec![Neighbor { j: 1, q: 0.6, q2: 0.36 }],
        vec![Neighbor { j: 0, q: 0.6, q2: 0.36 }],
    ];
    let velocity_temp = vec![vec2f(0.1, 0.), vec2f(-0.1, 0.)];
    let mut velocity = velocity_temp.clone();
    let mut color = vec![Color::zeros(); 2];
    apply_viscosity(
        &positions,
        &neighbors,
        &[2., 2.],
        &[3., 3.],
        &[4., 4.],
        2.5,
        &velocity_temp,
        &mut velocity,
        &mut color,
    );
    assert_eq!(color[0], debug_color(&velocity_temp[0], 2.));
    assert_ne!(color[0], debug_color(&velocity[0], 2.));
}
