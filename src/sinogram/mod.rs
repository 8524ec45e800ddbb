//! 3D sinograms: `axis -> plane -> (angle, radial bin)`.

pub mod axis;

pub use axis::Axes;

use ndarray::{ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3};
use units::{mm_, Length};

use crate::arena::{Buffer, BufferArena};
use crate::error::{RebinError, Result};
use crate::index::{plane_range, PlaneDim_u};

#[derive(Clone, Debug, PartialEq)]
pub struct SinogramGeometry {
    /// Number of radial bins
    pub bins: usize,
    /// Number of angles over the half-turn
    pub angles: usize,
    /// Radial bin width
    pub bin_size: Length,
    pub axes: Axes,
    /// Axial distance between adjacent direct planes
    pub plane_separation: Length,
}

impl SinogramGeometry {

    pub fn new(bins: usize, angles: usize, bin_size: Length, planes: Vec<usize>, plane_separation: Length) -> Self {
        Self { bins, angles, bin_size, axes: Axes::new(planes), plane_separation }
    }

    pub fn planes    (&self) -> usize      { self.axes.total_planes() }
    pub fn plane_dims(&self) -> PlaneDim_u { [self.angles, self.bins] }
    pub fn plane_len (&self) -> usize      { self.angles * self.bins }
    pub fn len       (&self) -> usize      { self.plane_len() * self.planes() }
    pub fn is_empty  (&self) -> bool       { self.len() == 0 }

    pub fn bin_size_mm(&self) -> f32 { mm_(self.bin_size) }

    /// Same axial structure, different in-plane sampling
    pub fn resampled(&self, bins: usize, angles: usize) -> Self {
        let bin_size = self.bin_size * (self.bins as f32 / bins as f32);
        Self { bins, angles, bin_size, ..self.clone() }
    }

    pub(crate) fn check_len(&self, actual: usize) -> std::result::Result<(), RebinError> {
        let expected = self.len();
        if actual == expected { return Ok(()) }
        Err(RebinError::Length { actual, expected, planes: self.planes(), angles: self.angles, bins: self.bins })
    }

    /// Fail unless both geometries have the same axial structure
    pub fn check_same_planes(&self, other: &Self) -> std::result::Result<(), RebinError> {
        if self.axes == other.axes { return Ok(()) }
        Err(RebinError::PlaneLayout(self.axes.planes_per_axis().to_vec(),
                                    other.axes.planes_per_axis().to_vec()))
    }

    /// Fail unless both geometries have the same planes and in-plane sampling
    pub fn check_same_shape(&self, other: &Self) -> std::result::Result<(), RebinError> {
        self.check_same_planes(other)?;
        if self.plane_dims() == other.plane_dims() { return Ok(()) }
        Err(RebinError::PlaneSize(self.plane_dims(), other.plane_dims()))
    }
}

#[derive(Debug)]
pub struct Sinogram {
    pub geometry: SinogramGeometry,
    data: Buffer,
}

impl Sinogram {

    pub fn zeros(arena: &BufferArena, geometry: SinogramGeometry, tag: &str) -> Result<Self> {
        let data = arena.create(geometry.len(), tag)?;
        Ok(Self { geometry, data })
    }

    pub fn from_buffer(geometry: SinogramGeometry, data: Buffer) -> Result<Self> {
        geometry.check_len(data.len())?;
        Ok(Self { geometry, data })
    }

    pub fn try_clone(&self, arena: &BufferArena, tag: &str) -> Result<Self> {
        let data = arena.copy_of(&self.data, tag)?;
        Ok(Self { geometry: self.geometry.clone(), data })
    }

    pub fn data    (&    self) -> &    [f32] { &    self.data }
    pub fn data_mut(&mut self) -> &mut [f32] { &mut self.data }

    pub fn into_buffer(self) -> Buffer { self.data }

    /// `(plane, angle, bin)` view of all planes
    pub fn view(&self) -> ArrayView3<'_, f32> {
        let shape = (self.geometry.planes(), self.geometry.angles, self.geometry.bins);
        ArrayView3::from_shape(shape, &self.data).expect("length checked at construction")
    }

    pub fn view_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        let shape = (self.geometry.planes(), self.geometry.angles, self.geometry.bins);
        ArrayViewMut3::from_shape(shape, &mut self.data).expect("length checked at construction")
    }

    /// `(angle, bin)` view of one plane
    pub fn plane(&self, plane: usize) -> ArrayView2<'_, f32> {
        let dims = self.geometry.plane_dims();
        ArrayView2::from_shape(dims, &self.data[plane_range(plane, dims)]).expect("plane within sinogram")
    }

    pub fn plane_mut(&mut self, plane: usize) -> ArrayViewMut2<'_, f32> {
        let dims = self.geometry.plane_dims();
        ArrayViewMut2::from_shape(dims, &mut self.data[plane_range(plane, dims)]).expect("plane within sinogram")
    }

    pub fn sum(&self) -> f64 { self.data.iter().map(|&x| x as f64).sum() }
}
