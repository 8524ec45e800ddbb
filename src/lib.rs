//! Attenuation and scatter correction of 3D PET sinograms.

pub mod types;
pub mod index;
pub mod error;
pub mod arena;
pub mod matrix;
pub mod sinogram;
pub mod fov;
pub mod image;
pub mod gauss;
pub mod rebin;
pub mod engines;
pub mod attenuation;
pub mod scatter;
pub mod config;
pub mod io;
pub mod utils;

pub use error::{Error, Result};
pub use units::{Length, Ratio, Angle};
