use rstar::{primitives::GeomWithData, Point, RTree};

use crate::{
    concurrency::par_iter_mut3,
    floating_type_mod::FT,
    simulation_parameters::NeighborhoodSearchAlgorithm,
    spatial_hash::SpatialIndex,
    sph_kernels::{double_density_kernel, DimensionUtils},
    VF,
};

const MAX_NEIGHBOR_COUNT: usize = 20000;

/// Interaction partner of a particle together with the kernel weights of the pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub j: u32,
    pub q: FT,
    pub q2: FT,
}

impl Neighbor {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.j as usize
    }
}

/**
 * Adds `j` to the neighbor list of `i` if the two particles are closer than the support
 * radius. Returns the density contributions `(q^2, q^3)` of the pair.
 */
#[inline(always)]
fn add_neighbor_candidate<const D: usize>(
    i: usize,
    j: usize,
    positions: &[VF<D>],
    support_radius: FT,
    p_neighs: &mut Vec<Neighbor>,
) -> Option<(FT, FT)> {
    if j == i {
        // no interaction of a particle with itself
        return None;
    }

    let x_ij_sq = (positions[j] - positions[i]).norm_squared();
    if x_ij_sq >= support_radius * support_radius {
        return None;
    }

    let w = double_density_kernel(x_ij_sq.sqrt(), support_radius)?;

    if p_neighs.len() == MAX_NEIGHBOR_COUNT {
        panic!("exceeded maximum allowed number of {} neighbors", MAX_NEIGHBOR_COUNT);
    }
    p_neighs.push(Neighbor {
        j: j as u32,
        q: w.q,
        q2: w.q2,
    });

    Some((w.q2, w.q3))
}

/**
 * Rebuilds the neighbor lists from an up-to-date spatial index and sums up the far and
 * near densities of every particle.
 */
pub fn find_neighbors_spatial_hash<DU: DimensionUtils<D>, const D: usize>(
    index: &SpatialIndex,
    positions: &[VF<D>],
    support_radius: FT,
    neighbors: &mut [Vec<Neighbor>],
    density: &mut [FT],
    density_near: &mut [FT],
) {
    assert_eq!(index.len(), positions.len(), "spatial index is out of date");

    par_iter_mut3(neighbors, density, density_near, |i, p_neighs, p_density, p_density_near| {
        p_neighs.clear();

        let mut d = 0.;
        let mut dn = 0.;

        index.for_each_candidate(&DU::to_vec3(&positions[i]), |j| {
            if let Some((q2, q3)) = add_neighbor_candidate(i, j as usize, positions, support_radius, p_neighs) {
                d += q2;
                dn += q3;
            }
        });

        *p_density = d;
        *p_density_near = dn;
    });
}

#[derive(Debug, PartialEq, Clone, Copy)]
struct CustomRTreePoint<const D: usize> {
    p: VF<D>,
}

impl<const D: usize> Point for CustomRTreePoint<D> {
    type Scalar = FT;

    const DIMENSIONS: usize = D;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        CustomRTreePoint {
            p: VF::<D>::from_iterator((0..D).map(|d| generator(d))),
        }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        self.p[index]
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        &mut self.p[index]
    }
}

impl<const D: usize> From<VF<D>> for CustomRTreePoint<D> {
    fn from(p: VF<D>) -> Self {
        CustomRTreePoint { p }
    }
}

type CustomRTreeElem<const D: usize> = GeomWithData<CustomRTreePoint<D>, usize>;

/**
 * Same result as [`find_neighbors_spatial_hash`] (up to the order of the neighbor lists)
 * but uses a bulk loaded R*-tree instead of the hashed grid.
 */
pub fn find_neighbors_rstar<const D: usize>(
    positions: &[VF<D>],
    support_radius: FT,
    neighbors: &mut [Vec<Neighbor>],
    density: &mut [FT],
    density_near: &mut [FT],
) {
    let rtree_elems: Vec<_> = positions
        .iter()
        .enumerate()
        .map(|(idx, neigh_pos)| CustomRTreeElem::new(CustomRTreePoint::from(*neigh_pos), idx))
        .collect();

    let rtree = RTree::<CustomRTreeElem<D>>::bulk_load(rtree_elems);
    let max_dist_sq = support_radius * support_radius;

    par_iter_mut3(neighbors, density, density_near, |i, p_neighs, p_density, p_density_near| {
        p_neighs.clear();

        let mut d = 0.;
        let mut dn = 0.;

        for neigh_point in rtree.locate_within_distance(CustomRTreePoint::from(positions[i]), max_dist_sq) {
            if let Some((q2, q3)) = add_neighbor_candidate(i, neigh_point.data, positions, support_radius, p_neighs)
            {
                d += q2;
                dn += q3;
            }
        }

        *p_density = d;
        *p_density_near = dn;
    });
}

#[inline(always)]
pub fn find_neighbors<DU: DimensionUtils<D>, const D: usize>(
    algorithm: NeighborhoodSearchAlgorithm,
    index: &SpatialIndex,
    positions: &[VF<D>],
    support_radius: FT,
    neighbors: &mut [Vec<Neighbor>],
    density: &mut [FT],
    density_near: &mut [FT],
) {
    match algorithm {
        NeighborhoodSearchAlgorithm::SpatialHash => {
            find_neighbors_spatial_hash::<DU, D>(index, positions, support_radius, neighbors, density, density_near);
        }
        NeighborhoodSearchAlgorithm::RStar => {
            find_neighbors_rstar::<D>(positions, support_radius, neighbors, density, density_near);
        }
    }
}

/**
 * Slow consistency check of all neighbor lists. Panics if a list contains the particle
 * itself or duplicates, if the neighbor relation is not symmetric (with equal weights) or
 * if it differs from a brute force scan over all particle pairs.
 */
pub fn check_neighborhood<const D: usize>(positions: &[VF<D>], neighbors: &[Vec<Neighbor>], support_radius: FT) {
    let num_particles = positions.len();
    assert_eq!(neighbors.len(), num_particles);

    for i in 0..num_particles {
        assert!(
            neighbors[i].iter().all(|n| n.index() != i),
            "neighbor search bug: particle {} is its own neighbor",
            i
        );

        let mut neighs_i: Vec<usize> = neighbors[i].iter().map(Neighbor::index).collect();
        let neighs_i_len = neighs_i.len();
        neighs_i.sort_unstable();
        neighs_i.dedup();
        assert!(
            neighs_i_len == neighs_i.len(),
            "neighbor search bug: duplicate entries for particle {}",
            i
        );

        for n in &neighbors[i] {
            let back = neighbors[n.index()].iter().find(|m| m.index() == i);
            match back {
                Some(m) => assert!(
                    (m.q - n.q).abs() <= 1e-5,
                    "neighbor search bug: weights of pair ({}, {}) differ: {} != {}",
                    i,
                    n.j,
                    n.q,
                    m.q
                ),
                None => panic!("neighbor search bug: {} is neighbor of {} but not vice versa", n.j, i),
            }
        }
    }

    for i in 0..num_particles {
        for j in 0..num_particles {
            if i == j {
                continue;
            }
            let x_ij_sq = (positions[i] - positions[j]).norm_squared();
            let interact = x_ij_sq < support_radius * support_radius;
            let i_has_neighbor_j = neighbors[i].iter().any(|n| n.index() == j);
            if i_has_neighbor_j != interact {
                panic!(
                    "i_has_neighbor_j:{} != interact:{}  i:{} j:{} x_ij_sq:{}  sr_sq:{}",
                    i_has_neighbor_j,
                    interact,
                    i,
                    j,
                    x_ij_sq,
                    support_radius * support_radius
                );
            }
        }
    }
}

#[cfg(test)]
struct Resolved {
    neighbors: Vec<Vec<Neighbor>>,
    density: Vec<FT>,
    density_near: Vec<FT>,
}

#[cfg(test)]
fn resolve(positions: &[crate::V2], support_radius: FT, algorithm: NeighborhoodSearchAlgorithm) -> Resolved {
    use crate::sph_kernels::{DimensionUtils2d, GridNeighborhood};

    let mut index = SpatialIndex::new(4093, support_radius, GridNeighborhood::Planar);
    for (i, p) in positions.iter().enumerate() {
        index.insert(&DimensionUtils2d::to_vec3(p), i as u32);
    }

    let n = positions.len();
    let mut resolved = Resolved {
        neighbors: vec![Vec::new(); n],
        density: vec![-1.; n],
        density_near: vec![-1.; n],
    };
    find_neighbors::<DimensionUtils2d, 2>(
        algorithm,
        &index,
        positions,
        support_radius,
        &mut resolved.neighbors,
        &mut resolved.density,
        &mut resolved.density_near,
    );
    resolved
}

#[cfg(test)]
fn random_cloud(n: usize, extent: FT, seed: u64) -> Vec<crate::V2> {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| crate::vec2f(rng.gen_range(-extent..extent), rng.gen_range(-extent..extent)))
        .collect()
}

#[test]
fn four_particle_scenario() {
    let positions = vec![crate::vec2f(0., 0.), crate::vec2f(1., 0.), crate::vec2f(0., 1.), crate::vec2f(5., 5.)];
    let resolved = resolve(&positions, 2., NeighborhoodSearchAlgorithm::SpatialHash);

    let neighs_0: Vec<usize> = resolved.neighbors[0].iter().map(Neighbor::index).collect();
    assert!(neighs_0.contains(&1));
    assert!(neighs_0.contains(&2));
    assert!(!neighs_0.contains(&3));
    assert!(!neighs_0.contains(&0));

    // distance 1 with support radius 2 gives q = 0.5
    for n in &resolved.neighbors[0] {
        crate::assert_ft_approx_eq(n.q, 0.5, 1e-6, || format!("q of neighbor {}", n.j));
        crate::assert_ft_approx_eq(n.q2, 0.25, 1e-6, || format!("q2 of neighbor {}", n.j));
    }

    assert!(resolved.neighbors[3].is_empty());
    assert_eq!(resolved.density[3], 0.);
    assert_eq!(resolved.density_near[3], 0.);

    // particle 0: two neighbors with q = 0.5
    crate::assert_ft_approx_eq(resolved.density[0], 0.5, 1e-6, || format!("density"));
    crate::assert_ft_approx_eq(resolved.density_near[0], 0.25, 1e-6, || format!("near density"));
}

#[test]
fn neighborhood_is_symmetric_and_complete() {
    let positions = random_cloud(400, 15., 3);
    let support_radius = 2.5;
    let resolved = resolve(&positions, support_radius, NeighborhoodSearchAlgorithm::SpatialHash);
    check_neighborhood(&positions, &resolved.neighbors, support_radius);

    for i in 0..positions.len() {
        assert!(resolved.density_near[i] >= 0.);
        assert!(resolved.density[i] >= 0.);
        let d: FT = resolved.neighbors[i].iter().map(|n| n.q2).sum();
        crate::assert_ft_approx_eq(d, resolved.density[i], 1e-4, || format!("density of {}", i));
    }
}

#[test]
fn rstar_matches_spatial_hash() {
    let positions = random_cloud(300, 10., 11);
    let support_radius = 2.;
    let hash = resolve(&positions, support_radius, NeighborhoodSearchAlgorithm::SpatialHash);
    let rstar = resolve(&positions, support_radius, NeighborhoodSearchAlgorithm::RStar);
    check_neighborhood(&positions, &rstar.neighbors, support_radius);

    for i in 0..positions.len() {
        let mut a: Vec<usize> = hash.neighbors[i].iter().map(Neighbor::index).collect();
        let mut b: Vec<usize> = rstar.neighbors[i].iter().map(Neighbor::index).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b, "neighbor lists of particle {} differ", i);

        crate::assert_ft_approx_eq(hash.density[i], rstar.density[i], 1e-4, || format!("density of {}", i));
        crate::assert_ft_approx_eq(hash.density_near[i], rstar.density_near[i], 1e-4, || {
            format!("near density of {}", i)
        });
    }
}

#[test]
fn coincident_particles_are_neighbors_with_full_weight() {
    let positions = vec![crate::vec2f(1., 1.), crate::vec2f(1., 1.)];
    let resolved = resolve(&positions, 2., NeighborhoodSearchAlgorithm::SpatialHash);
    assert_eq!(resolved.neighbors[0].len(), 1);
    assert_eq!(resolved.neighbors[0][0].q, 1.);
    assert_eq!(resolved.density[0], 1.);
}

#[test]
#[should_panic(expected = "not vice versa")]
fn check_neighborhood_detects_asymmetry() {
    let positions = vec![crate::vec2f(0., 0.), crate::vec2f(1., 0.)];
    let mut resolved = resolve(&positions, 2., NeighborhoodSearchAlgorithm::SpatialHash);
    resolved.neighbors[1].clear();
    check_neighborhood(&positions, &resolved.neighbors, 2.);
}
