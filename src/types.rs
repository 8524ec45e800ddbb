pub use units::todo::{Lengthf32, Ratiof32, Energyf32, Countsf32, Intensityf32, Attenuationf32};
pub use units::{Length, Ratio, Angle};

pub use crate::index::{BoxDim_u, Index1_u, Index3_u, SinoIndex_u, PlaneDim_u};

/// Energy of each of the two annihilation photons
pub const ANNIHILATION_KEV: Energyf32 = 511.0;
