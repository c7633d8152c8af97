/*!
Double density relaxation SPH (Clavet et al. 2005) on a hashed uniform grid.

```no_run
use double_density_sph::{simulation_parameters::SimulationParams, FluidSimulation2d};

let mut fluid = FluidSimulation2d::initialize(SimulationParams::default(), 441).unwrap();
for _ in 0..100 {
    fluid.step();
}
println!("{}", fluid.statistics());
```
*/

mod platform;
mod simulation;

pub use simulation::*;

pub use platform::start;
