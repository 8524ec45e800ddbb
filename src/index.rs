//! Row-major index helpers for the flat buffers behind sinograms and images.
//!
//! Sinograms are stored `plane -> angle -> radial bin` (bin fastest); images
//! are stored `z -> y -> x` (x fastest).

#[allow(non_camel_case_types)] pub type Index1_u    = usize;
#[allow(non_camel_case_types)] pub type Index3_u    = [usize; 3];
#[allow(non_camel_case_types)] pub type BoxDim_u    = [usize; 3];
/// `[plane, angle, bin]`
#[allow(non_camel_case_types)] pub type SinoIndex_u = [usize; 3];
/// `[angles, bins]`
#[allow(non_camel_case_types)] pub type PlaneDim_u  = [usize; 2];

use std::ops::{Add, Div, Mul, Rem};

pub fn index3_to_1<T>([ix, iy, iz]: [T; 3], [nx, ny, _nz]: [T; 3]) -> T
where
    T: Mul<Output = T> + Add<Output = T>
{
    ix + (iy + iz * ny) * nx
}

#[allow(clippy::many_single_char_names)]
pub fn index1_to_3<T>(i: T, [nx, ny, _nz]: [T; 3]) -> [T; 3]
where
    T: Mul<Output = T> +
    Div<Output = T> +
    Rem<Output = T> +
    Copy
{
    let z = i / (nx * ny);
    let r = i % (nx * ny);
    let y = r / nx;
    let x = r % nx;
    [x,y,z]
}

#[inline]
pub fn sino_index([plane, angle, bin]: SinoIndex_u, [angles, bins]: PlaneDim_u) -> Index1_u {
    (plane * angles + angle) * bins + bin
}

/// Range of flat indices occupied by `plane`
#[inline]
pub fn plane_range(plane: usize, [angles, bins]: PlaneDim_u) -> std::ops::Range<Index1_u> {
    let len = angles * bins;
    plane * len .. (plane + 1) * len
}
