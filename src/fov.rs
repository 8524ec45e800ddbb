/// The size and granularity of the Field of View (FOV) in which images are
/// reconstructed

use crate::types::Lengthf32;
use crate::index::{BoxDim_u, Index3_u, Index1_u, index1_to_3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fov {
    pub n: BoxDim_u,
    /// Voxel edge lengths in mm
    pub voxel_size: [Lengthf32; 3],
}

impl Fov {

    pub fn new(n: BoxDim_u, voxel_size: [Lengthf32; 3]) -> Self { Self { n, voxel_size } }

    /// Cubic voxels of edge `size` mm
    pub fn isotropic(n: BoxDim_u, size: Lengthf32) -> Self { Self::new(n, [size; 3]) }

    pub fn len(&self) -> usize { self.n.iter().product() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn voxels_per_slice(&self) -> usize { self.n[0] * self.n[1] }

    /// Full widths in mm
    pub fn full_size(&self) -> [Lengthf32; 3] {
        let [nx, ny, nz] = self.n;
        let [dx, dy, dz] = self.voxel_size;
        [nx as f32 * dx, ny as f32 * dy, nz as f32 * dz]
    }

    /// Centre of voxel with given 3D index, relative to the FOV centre
    pub fn voxel_centre(&self, i: Index3_u) -> [Lengthf32; 3] {
        let mut c = [0.0; 3];
        for d in 0..3 {
            c[d] = (i[d] as Lengthf32 + 0.5 - self.n[d] as Lengthf32 / 2.0) * self.voxel_size[d];
        }
        c
    }

    /// Centre of voxel with given 1D index
    pub fn voxel_centre1(&self, i: Index1_u) -> [Lengthf32; 3] {
        self.voxel_centre(index1_to_3(i, self.n))
    }

    /// Continuous voxel coordinates (voxel centres at integers) of a point
    /// given in mm relative to the FOV centre
    pub fn voxel_coordinates(&self, p: [Lengthf32; 3]) -> [Lengthf32; 3] {
        let mut v = [0.0; 3];
        for d in 0..3 {
            v[d] = p[d] / self.voxel_size[d] + self.n[d] as Lengthf32 / 2.0 - 0.5;
        }
        v
    }
}
