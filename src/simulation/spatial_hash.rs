//! Hashed uniform grid for neighbor queries.
//!
//! Particles are bucketed by their integer cell `floor(position / cell_size)`. The cell
//! coordinate is hashed with the XOR-of-primes function from "Optimized Spatial Hashing
//! for Collision Detection of Deformable Objects" (Teschner et al.) into a fixed number of
//! buckets. Each bucket entry keeps its cell coordinate, so hash collisions never leak
//! particles of unrelated cells into a query.
//!
//! The index is rebuilt from scratch every frame and is not meant to be mutated from
//! multiple threads. Queries only need `&self` and may run concurrently.

use crate::{floating_type_mod::FT, sph_kernels::GridNeighborhood, V3, VI};

const P1: u32 = 73856093;
const P2: u32 = 19349663;
const P3: u32 = 83492791;

pub fn teschner_hash(cell: &VI<3>) -> u32 {
    (cell.x as u32).wrapping_mul(P1) ^ (cell.y as u32).wrapping_mul(P2) ^ (cell.z as u32).wrapping_mul(P3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    cell: VI<3>,
    particle_id: u32,
}

pub struct SpatialIndex {
    buckets: Vec<Vec<Entry>>,
    inv_cell_size: FT,
    offsets: Vec<VI<3>>,
    num_entries: usize,
}

impl SpatialIndex {
    pub fn new(num_buckets: usize, cell_size: FT, neighborhood: GridNeighborhood) -> SpatialIndex {
        assert!(num_buckets > 0, "spatial index needs at least one bucket");
        assert!(
            cell_size > 0. && cell_size.is_finite(),
            "invalid cell size {} for spatial index",
            cell_size
        );

        SpatialIndex {
            buckets: (0..num_buckets).map(|_| Vec::new()).collect(),
            inv_cell_size: 1. / cell_size,
            offsets: neighborhood.offsets(),
            num_entries: 0,
        }
    }

    /// Returns the integer cell that contains `position`. Coordinates beyond the `i32` range
    /// saturate.
    pub fn discretize(&self, position: &V3) -> VI<3> {
        (*position * self.inv_cell_size).map(|x| x.floor() as i32)
    }

    fn bucket_index(&self, cell: &VI<3>) -> usize {
        teschner_hash(cell) as usize % self.buckets.len()
    }

    /// Removes all particles. The bucket allocations are kept for the next frame.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.num_entries = 0;
    }

    pub fn insert(&mut self, position: &V3, particle_id: u32) {
        let cell = self.discretize(position);
        let bucket_index = self.bucket_index(&cell);
        self.buckets[bucket_index].push(Entry { cell, particle_id });
        self.num_entries += 1;
    }

    /// Calls `f` for every particle in the cells around `position` (the cell of `position`
    /// included). The particle at `position` itself is reported as well.
    pub fn for_each_candidate(&self, position: &V3, mut f: impl FnMut(u32)) {
        let cell = self.discretize(position);
        for offset in &self.offsets {
            // saturated cells wrap around, the cell comparison drops what does not belong
            let neighbor_cell = cell.zip_map(offset, i32::wrapping_add);
            for entry in &self.buckets[self.bucket_index(&neighbor_cell)] {
                if entry.cell == neighbor_cell {
                    f(entry.particle_id);
                }
            }
        }
    }

    /// Appends all particles of the cell neighborhood of `position` to `ret`.
    pub fn query(&self, position: &V3, ret: &mut Vec<u32>) {
        self.for_each_candidate(position, |particle_id| ret.push(particle_id));
    }

    /// Number of inserted particles.
    pub fn len(&self) -> usize {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn cell_size(&self) -> FT {
        1. / self.inv_cell_size
    }

    pub fn num_offsets(&self) -> usize {
        self.offsets.len()
    }

    /// Longest collision chain. Useful to judge whether the bucket count is large enough.
    pub fn max_bucket_len(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[cfg(test)]
fn brute_force_query(index: &SpatialIndex, positions: &[V3], query_position: &V3) -> Vec<u32> {
    let cell = index.discretize(query_position);
    let mut result: Vec<u32> = positions
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            let d = index.discretize(p) - cell;
            d.x.abs() <= 1 && d.y.abs() <= 1 && d.z == 0
        })
        .map(|(i, _)| i as u32)
        .collect();
    result.sort_unstable();
    result
}

#[test]
fn query_finds_particles_within_support_radius() {
    use crate::vec3f;

    let positions = vec![
        vec3f(0., 0., 0.),
        vec3f(1., 0., 0.),
        vec3f(0., 1., 0.),
        vec3f(5., 5., 0.),
    ];
    let mut index = SpatialIndex::new(4093, 2., GridNeighborhood::Planar);
    for (i, p) in positions.iter().enumerate() {
        index.insert(p, i as u32);
    }

    let mut found = Vec::new();
    index.query(&positions[0], &mut found);
    assert!(found.contains(&0), "the querying particle is reported as well");
    assert!(found.contains(&1));
    assert!(found.contains(&2));
    assert!(!found.contains(&3));
}

#[test]
fn discretize_floors_negative_coordinates() {
    use crate::{vec3f, vec3i};

    let index = SpatialIndex::new(17, 2.5, GridNeighborhood::Planar);
    assert_eq!(index.discretize(&vec3f(0.1, 2.4, 0.)), vec3i(0, 0, 0));
    assert_eq!(index.discretize(&vec3f(-0.1, 2.5, 0.)), vec3i(-1, 1, 0));
    assert_eq!(index.discretize(&vec3f(-2.5, -2.6, 0.)), vec3i(-1, -2, 0));
}

#[test]
fn rebuilt_index_matches_brute_force_scan() {
    use crate::vec3f;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(7);
    let positions: Vec<V3> = (0..500)
        .map(|_| vec3f(rng.gen_range(-20. ..20.), rng.gen_range(-20. ..20.), 0.))
        .collect();

    // few buckets force plenty of hash collisions
    let mut index = SpatialIndex::new(31, 2.5, GridNeighborhood::Planar);

    // a stale frame must not leak into the rebuilt index
    for (i, p) in positions.iter().enumerate() {
        index.insert(&(*p * 3.), i as u32);
    }
    index.clear();
    assert!(index.is_empty());

    for (i, p) in positions.iter().enumerate() {
        index.insert(p, i as u32);
    }
    assert_eq!(index.len(), positions.len());

    for _ in 0..100 {
        let query_position = vec3f(rng.gen_range(-25. ..25.), rng.gen_range(-25. ..25.), 0.);
        let mut found = Vec::new();
        index.query(&query_position, &mut found);
        found.sort_unstable();

        let len_before_dedup = found.len();
        found.dedup();
        assert_eq!(len_before_dedup, found.len(), "query returned duplicates");

        assert_eq!(found, brute_force_query(&index, &positions, &query_position));
    }
}

#[test]
fn every_particle_is_stored_exactly_once() {
    use crate::vec3f;

    let mut index = SpatialIndex::new(13, 1., GridNeighborhood::Planar);
    let positions: Vec<V3> = (0..40).map(|i| vec3f(i as FT * 0.37, -(i as FT) * 0.21, 0.)).collect();
    for (i, p) in positions.iter().enumerate() {
        index.insert(p, i as u32);
    }

    for (i, p) in positions.iter().enumerate() {
        let mut count = 0;
        index.for_each_candidate(p, |j| {
            if j == i as u32 {
                count += 1;
            }
        });
        assert_eq!(count, 1, "particle {} found {} times", i, count);
    }
}

#[test]
fn volumetric_neighborhood_reaches_adjacent_layers() {
    use crate::vec3f;

    let mut planar = SpatialIndex::new(101, 1., GridNeighborhood::Planar);
    let mut volumetric = SpatialIndex::new(101, 1., GridNeighborhood::Volumetric);
    assert_eq!(planar.num_offsets(), 9);
    assert_eq!(volumetric.num_offsets(), 27);

    let above = vec3f(0.5, 0.5, 1.5);
    planar.insert(&above, 0);
    volumetric.insert(&above, 0);

    let mut found = Vec::new();
    planar.query(&vec3f(0.5, 0.5, 0.5), &mut found);
    assert!(found.is_empty());

    volumetric.query(&vec3f(0.5, 0.5, 0.5), &mut found);
    assert_eq!(found, vec![0]);
}

#[test]
fn far_away_particles_do_not_overflow_the_grid() {
    use crate::vec3f;

    let positions = vec![vec3f(1e10, 10., 0.), vec3f(-1e10, -1e10, 0.), vec3f(0., 10., 0.)];
    let mut index = SpatialIndex::new(4093, 2.5, GridNeighborhood::Planar);
    for (i, p) in positions.iter().enumerate() {
        index.insert(p, i as u32);
    }

    for (i, p) in positions.iter().enumerate() {
        let mut found = Vec::new();
        index.query(p, &mut found);
        assert!(found.contains(&(i as u32)), "particle {} not found in its own cell", i);
    }

    let mut found = Vec::new();
    index.query(&positions[2], &mut found);
    assert_eq!(found, vec![2]);
}

#[test]
fn teschner_hash_distinguishes_neighboring_cells() {
    use crate::vec3i;

    let h0 = teschner_hash(&vec3i(0, 0, 0));
    let hx = teschner_hash(&vec3i(1, 0, 0));
    let hy = teschner_hash(&vec3i(0, 1, 0));
    let hz = teschner_hash(&vec3i(0, 0, 1));
    assert_eq!(h0, 0);
    assert_eq!(hx, P1);
    assert_eq!(hy, P2);
    assert_eq!(hz, P3);
    assert_eq!(teschner_hash(&vec3i(-1, 0, 0)), (-1i32 as u32).wrapping_mul(P1));
}
