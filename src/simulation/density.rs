use crate::{
    concurrency::{par_iter_mut1, par_iter_mut2},
    floating_type_mod::FT,
    neighborhood_search::Neighbor,
    simulation_parameters::SimulationParams,
    sph_kernels::direction_and_length,
    VF,
};

/// Equation of state of double density relaxation. The far pressure becomes negative
/// below the rest density. The near pressure is never negative.
#[inline(always)]
pub fn pressures(density: FT, density_near: FT, simulation_params: &SimulationParams) -> (FT, FT) {
    (
        simulation_params.stiffness * (density - simulation_params.rest_density),
        simulation_params.stiffness_near * density_near,
    )
}

pub fn compute_pressures(
    density: &[FT],
    density_near: &[FT],
    pressure: &mut [FT],
    pressure_near: &mut [FT],
    simulation_params: &SimulationParams,
) {
    par_iter_mut2(pressure, pressure_near, |i, p_pressure, p_pressure_near| {
        let (p, pn) = pressures(density[i], density_near[i], simulation_params);
        *p_pressure = p;
        *p_pressure_near = pn;
    });
}

/**
 * Subtracts the pressure displacement of every particle from its force:
 *
 * `dX = sum_j normalize(x_j - x_i) * (q (p_i + p_j) + q^2 (pn_i + pn_j))`
 *
 * Only neighbor pressures are read, which are final after [`compute_pressures`].
 */
pub fn apply_pressure_forces<const D: usize>(
    positions: &[VF<D>],
    neighbors: &[Vec<Neighbor>],
    pressure: &[FT],
    pressure_near: &[FT],
    force: &mut [VF<D>],
) {
    par_iter_mut1(force, |i, p_force| {
        let mut dx = VF::<D>::zeros();

        for n in &neighbors[i] {
            let j = n.index();
            let (dir, _) = match direction_and_length(positions[j] - positions[i]) {
                Some(x) => x,
                None => continue,
            };

            let m = n.q * (pressure[i] + pressure[j]) + n.q2 * (pressure_near[i] + pressure_near[j]);
            dx += dir * m;
        }

        *p_force -= dx;
    });
}

#[test]
fn pressure_sign_follows_rest_density() {
    let params = SimulationParams::default();

    let (p, pn) = pressures(params.rest_density + 1., 0.5, &params);
    assert!(p > 0.);
    crate::assert_ft_approx_eq(p, params.stiffness, 1e-7, || format!("pressure"));
    crate::assert_ft_approx_eq(pn, 0.5 * params.stiffness_near, 1e-7, || format!("near pressure"));

    let (p, pn) = pressures(0., 0., &params);
    assert!(p < 0.);
    assert_eq!(pn, 0.);
}

#[test]
fn pressure_forces_are_symmetric() {
    use crate::vec2f;

    let positions = vec![vec2f(0., 0.), vec2f(1., 0.)];
    let neighbors = vec![
        vec![Neighbor { j: 1, q: 0.6, q2: 0.36 }],
        vec![Neighbor { j: 0, q: 0.6, q2: 0.36 }],
    ];
    let pressure = vec![0.01, 0.02];
    let pressure_near = vec![0.1, 0.1];
    let mut force = vec![vec2f(0., 0.); 2];

    apply_pressure_forces(&positions, &neighbors, &pressure, &pressure_near, &mut force);

    // m = 0.6 * 0.03 + 0.36 * 0.2
    let m = 0.6 * 0.03 + 0.36 * 0.2;
    crate::assert_ft_approx_eq(force[0].x, -m, 1e-6, || format!("force on the left particle"));
    crate::assert_ft_approx_eq(force[1].x, m, 1e-6, || format!("force on the right particle"));
    assert_eq!(force[0].y, 0.);
    assert_eq!(force[1].y, 0.);
}

#[test]
fn compressed_pair_is_pushed_apart() {
    use crate::vec2f;

    let params = SimulationParams::default();
    let positions = vec![vec2f(0., 0.), vec2f(0., 0.5)];
    let w = crate::sph_kernels::double_density_kernel(0.5, params.support_radius).unwrap();
    let neighbors = vec![
        vec![Neighbor { j: 1, q: w.q, q2: w.q2 }],
        vec![Neighbor { j: 0, q: w.q, q2: w.q2 }],
    ];

    let mut pressure = vec![0.; 2];
    let mut pressure_near = vec![0.; 2];
    // heavily compressed
    compute_pressures(&[10., 10.], &[5., 5.], &mut pressure, &mut pressure_near, &params);

    let mut force = vec![vec2f(0., 0.); 2];
    apply_pressure_forces(&positions, &neighbors, &pressure, &pressure_near, &mut force);
    assert!(force[0].y < 0.);
    assert!(force[1].y > 0.);
}

#[test]
fn coincident_particles_produce_no_nan() {
    use crate::vec2f;

    let positions = vec![vec2f(3., 3.), vec2f(3., 3.)];
    let neighbors = vec![
        vec![Neighbor { j: 1, q: 1., q2: 1. }],
        vec![Neighbor { j: 0, q: 1., q2: 1. }],
    ];
    let mut force = vec![vec2f(0.5, -0.5); 2];
    apply_pressure_forces(&positions, &neighbors, &[1., 1.], &[1., 1.], &mut force);
    assert_eq!(force, vec![vec2f(0.5, -0.5); 2]);
}
