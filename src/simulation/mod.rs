pub mod concurrency;
pub mod counters;
pub mod density;
pub mod error;
pub mod integrator;
pub mod neighborhood_search;
pub mod particles;
pub mod simulation;
pub mod simulation_parameters;
pub mod spatial_hash;
pub mod sph_kernels;
pub mod viscosity;

pub type IT = i32;

#[cfg(feature = "double-precision")]
pub mod floating_type_mod {
    pub type FT = f64;
}

#[cfg(not(feature = "double-precision"))]
pub mod floating_type_mod {
    pub type FT = f32;
}

use floating_type_mod::FT;

use nalgebra::SVector;

pub type V<FT, const D: usize> = SVector<FT, D>;

pub type VF<const D: usize> = V<FT, D>;
pub type VI<const D: usize> = V<IT, D>;

pub type V2 = V<FT, 2>;
pub type V3 = V<FT, 3>;

/// Debug color of a particle (red, green, blue).
pub type Color = V<FT, 3>;

pub fn vec2f(x: FT, y: FT) -> V<FT, 2> {
    [x, y].into()
}

pub fn vec3f(x: FT, y: FT, z: FT) -> V<FT, 3> {
    [x, y, z].into()
}

pub fn vec3i(x: IT, y: IT, z: IT) -> V<IT, 3> {
    [x, y, z].into()
}

pub use simulation::*;
