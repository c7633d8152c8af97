use crate::{floating_type_mod::FT, vec3f, vec3i, V2, V3, VF, VI};

/// Separations shorter than this have no usable direction.
pub const MIN_DIRECTION_LENGTH: FT = 1.0e-6;

/// Weights of the linear falloff kernel used by double density relaxation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelWeights {
    /// `1 - r/h`: one at zero distance, zero at the support radius.
    pub q: FT,
    pub q2: FT,
    pub q3: FT,
}

/**
 * r is the distance between the two particles.
 * h is the support radius.
 *
 * Returns `None` if the particles do not interact (`r >= h`).
 */
pub fn double_density_kernel(r: FT, h: FT) -> Option<KernelWeights> {
    if r >= h {
        return None;
    }
    let q = 1. - r / h;
    let q2 = q * q;
    Some(KernelWeights { q, q2, q3: q2 * q })
}

/**
 * Splits `diff` into its direction and length. Returns `None` for (nearly) coincident
 * particles, so that callers can skip the pair instead of producing NaN.
 */
pub fn direction_and_length<const D: usize>(diff: VF<D>) -> Option<(VF<D>, FT)> {
    let len = diff.norm();
    if len <= MIN_DIRECTION_LENGTH || !len.is_finite() {
        return None;
    }
    Some((diff / len, len))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridNeighborhood {
    // 3x3 cells in the xy-plane
    Planar,
    // 3x3x3 cells
    Volumetric,
}

impl GridNeighborhood {
    pub fn iterate_offsets(self, dist: i32, mut f: impl FnMut(VI<3>)) {
        match self {
            GridNeighborhood::Planar => {
                for x in -dist..=dist {
                    for y in -dist..=dist {
                        f(vec3i(x, y, 0));
                    }
                }
            }
            GridNeighborhood::Volumetric => {
                for x in -dist..=dist {
                    for y in -dist..=dist {
                        for z in -dist..=dist {
                            f(vec3i(x, y, z));
                        }
                    }
                }
            }
        }
    }

    pub fn offsets(self) -> Vec<VI<3>> {
        let mut offsets = Vec::new();
        self.iterate_offsets(1, |offset| offsets.push(offset));
        offsets
    }
}

// Sync is needed since we use this trait inside parallel iterators
pub trait DimensionUtils<const D: usize>: Sync {
    fn grid_neighborhood() -> GridNeighborhood;

    /// Embeds a position into the three dimensional cell space of the spatial index.
    fn to_vec3(v: &VF<D>) -> V3;

    /// Lifts a point of the (planar) initial layout into the simulation space.
    fn from_vec2(v: V2) -> VF<D>;
}

pub enum DimensionUtils2d {}
impl DimensionUtils<2> for DimensionUtils2d {
    fn grid_neighborhood() -> GridNeighborhood {
        GridNeighborhood::Planar
    }

    fn to_vec3(v: &VF<2>) -> V3 {
        vec3f(v.x, v.y, 0.)
    }

    fn from_vec2(v: V2) -> VF<2> {
        v
    }
}

pub enum DimensionUtils3d {}
impl DimensionUtils<3> for DimensionUtils3d {
    fn grid_neighborhood() -> GridNeighborhood {
        GridNeighborhood::Volumetric
    }

    fn to_vec3(v: &VF<3>) -> V3 {
        *v
    }

    fn from_vec2(v: V2) -> VF<3> {
        vec3f(v.x, v.y, 0.)
    }
}

#[test]
fn double_density_kernel_falloff() {
    let h = 2.5;

    let w = double_density_kernel(0., h).unwrap();
    assert_eq!(w.q, 1.);
    assert_eq!(w.q2, 1.);
    assert_eq!(w.q3, 1.);

    let w = double_density_kernel(1.25, h).unwrap();
    crate::assert_ft_approx_eq(w.q, 0.5, 1e-6, || format!("q at half the support radius"));
    crate::assert_ft_approx_eq(w.q2, 0.25, 1e-6, || format!("q2 at half the support radius"));
    crate::assert_ft_approx_eq(w.q3, 0.125, 1e-6, || format!("q3 at half the support radius"));

    assert!(double_density_kernel(h, h).is_none());
    assert!(double_density_kernel(3. * h, h).is_none());
}

#[test]
fn double_density_kernel_is_monotonic() {
    let h = 2.;
    let mut last = FT::INFINITY;
    for i in 0..200 {
        let r = i as FT * 0.01;
        let w = double_density_kernel(r, h).unwrap();
        assert!(w.q <= last);
        assert!((0. ..=1.).contains(&w.q));
        assert!(w.q3 <= w.q2 && w.q2 <= w.q);
        last = w.q;
    }
}

#[test]
fn direction_of_coincident_particles_is_rejected() {
    use crate::vec2f;

    assert!(direction_and_length(vec2f(0., 0.)).is_none());
    assert!(direction_and_length(vec2f(1e-9, 0.)).is_none());
    assert!(direction_and_length(vec2f(FT::NAN, 0.)).is_none());

    let (dir, len) = direction_and_length(vec2f(3., 4.)).unwrap();
    crate::assert_ft_approx_eq(len, 5., 1e-6, || format!("length"));
    crate::assert_ft_approx_eq(dir.norm(), 1., 1e-6, || format!("unit direction"));
}

#[test]
fn grid_neighborhood_offsets() {
    let planar = GridNeighborhood::Planar.offsets();
    assert_eq!(planar.len(), 9);
    assert!(planar.iter().all(|o| o.z == 0));
    assert!(planar.contains(&vec3i(0, 0, 0)));
    assert!(planar.contains(&vec3i(-1, 1, 0)));

    let volumetric = GridNeighborhood::Volumetric.offsets();
    assert_eq!(volumetric.len(), 27);
    assert!(volumetric.contains(&vec3i(1, -1, 1)));
}

#[test]
fn dimension_embedding() {
    use crate::vec2f;

    assert_eq!(DimensionUtils2d::to_vec3(&vec2f(1., 2.)), vec3f(1., 2., 0.));
    assert_eq!(DimensionUtils3d::from_vec2(vec2f(1., 2.)), vec3f(1., 2., 0.));
    assert_eq!(DimensionUtils3d::to_vec3(&vec3f(1., 2., 3.)), vec3f(1., 2., 3.));
}
