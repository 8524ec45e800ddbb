//! Axial structure of a 3D sinogram.
//!
//! Planes of equal obliqueness are grouped into *axes* (segments). Axis 0 is
//! the direct, un-tilted segment; oblique axes hold fewer planes, centred
//! axially on the direct ones.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axes {
    planes: Vec<usize>,
}

impl Axes {

    pub fn new(planes: Vec<usize>) -> Self { Self { planes } }

    pub fn len(&self) -> usize { self.planes.len() }
    pub fn is_empty(&self) -> bool { self.planes.is_empty() }

    pub fn planes_per_axis(&self) -> &[usize] { &self.planes }

    pub fn planes_in(&self, axis: usize) -> usize { self.planes[axis] }

    pub fn total_planes(&self) -> usize { self.planes.iter().sum() }

    /// Index of the first plane of `axis` in the whole plane stack
    pub fn first_plane(&self, axis: usize) -> usize { self.planes[..axis].iter().sum() }

    /// Range of plane indices occupied by `axis`
    pub fn plane_range(&self, axis: usize) -> std::ops::Range<usize> {
        let first = self.first_plane(axis);
        first .. first + self.planes[axis]
    }

    /// Axis containing the plane with global index `plane`, and the plane's
    /// index within that axis.
    pub fn locate(&self, plane: usize) -> Option<(usize, usize)> {
        let mut first = 0;
        for (axis, &n) in self.planes.iter().enumerate() {
            if plane < first + n { return Some((axis, plane - first)) }
            first += n;
        }
        None
    }

    /// Axial position of a plane, in units of direct-plane spacing, measured
    /// from the first direct plane.
    pub fn axial_position(&self, axis: usize, plane_in_axis: usize) -> f32 {
        let direct = self.planes.first().copied().unwrap_or(0);
        let offset = (direct as f32 - self.planes[axis] as f32) / 2.0;
        offset + plane_in_axis as f32
    }
}
