use crate::arena::{Buffer, BufferArena};
use crate::error::{RebinError, Result};
use crate::fov::Fov;
use crate::index::{index3_to_1, Index1_u, Index3_u};
use crate::types::Intensityf32;

/// A 3D voxel image: u-map (1/cm) or emission intensity
#[derive(Debug)]
pub struct Image {
    pub fov: Fov,
    data: Buffer,
}

impl Image {

    pub fn zeros(arena: &BufferArena, fov: Fov, tag: &str) -> Result<Self> {
        Ok(Self { fov, data: arena.create(fov.len(), tag)? })
    }

    pub fn from_buffer(fov: Fov, data: Buffer) -> Result<Self> {
        if data.len() != fov.len() {
            return Err(RebinError::ImageLength { actual: data.len(), dims: fov.n }.into())
        }
        Ok(Self { fov, data })
    }

    pub fn data    (&    self) -> &    [Intensityf32] { &    self.data }
    pub fn data_mut(&mut self) -> &mut [Intensityf32] { &mut self.data }

    pub fn into_buffer(self) -> Buffer { self.data }

    /// Voxels of axial slice `z`
    pub fn slice(&self, z: usize) -> &[Intensityf32] {
        let n = self.fov.voxels_per_slice();
        &self.data[z * n .. (z + 1) * n]
    }

    pub fn slice_mut(&mut self, z: usize) -> &mut [Intensityf32] {
        let n = self.fov.voxels_per_slice();
        &mut self.data[z * n .. (z + 1) * n]
    }

    pub fn scale(&mut self, factor: f32) {
        for v in self.data.iter_mut() { *v *= factor }
    }

    pub fn sum(&self) -> f64 { self.data.iter().map(|&x| x as f64).sum() }
}

impl core::ops::IndexMut<Index1_u> for Image {
    #[inline]
    fn index_mut(&mut self, i: Index1_u) -> &mut Self::Output { &mut self.data[i] }
}

impl core::ops::Index<Index1_u> for Image {
    type Output = Intensityf32;
    #[inline]
    fn index(&self, i: Index1_u) -> &Self::Output { &self.data[i] }
}

impl core::ops::IndexMut<Index3_u> for Image {
    fn index_mut(&mut self, i3: Index3_u) -> &mut Self::Output {
        let i1 = index3_to_1(i3, self.fov.n);
        &mut self.data[i1]
    }
}

impl core::ops::Index<Index3_u> for Image {
    type Output = Intensityf32;
    fn index(&self, i3: Index3_u) -> &Self::Output {
        let i1 = index3_to_1(i3, self.fov.n);
        &self.data[i1]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index3_addresses_slices() {
        let arena = BufferArena::new();
        let mut image = Image::zeros(&arena, Fov::isotropic([3, 2, 4], 1.0), "img").unwrap();
        image[[2, 1, 3]] = 5.0;
        assert_eq!(image.slice(3)[2 + 3], 5.0);
        image.scale(2.0);
        assert_eq!(image.sum(), 10.0);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let arena = BufferArena::new();
        let buffer = arena.create(5, "img").unwrap();
        assert!(Image::from_buffer(Fov::isotropic([2, 2, 2], 1.0), buffer).is_err());
    }
}
