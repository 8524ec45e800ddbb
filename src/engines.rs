//! Interfaces to the reconstruction services used by the correction pipeline.
//!
//! Projection-based engines (OSEM, MAP-TR, attenuation-weighted OSEM) are
//! supplied by the caller. Single-slice rebinning is simple enough to be
//! provided here as [`Ssrb`]; the single-scatter simulation lives in
//! [`crate::scatter::sim`].

use serde::{Deserialize, Serialize};

use crate::arena::BufferArena;
use crate::error::Result;
use crate::fov::Fov;
use crate::image::Image;
use crate::scatter::sim::ScatterGrid;
use crate::sinogram::{Sinogram, SinogramGeometry};
use crate::types::Ratiof32;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OsemParams {
    pub iterations: usize,
    pub subsets: usize,
    /// Smoothing weight
    pub beta: Ratiof32,
}

/// Smoothing prior of the regularized transmission reconstruction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Prior {
    Gaussian,
    GemanMcClure,
}

/// Intensity prior: expected attenuation coefficients of the tissue classes
/// (1/cm), their spreads, and the boundaries between neighbouring classes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Segmentation {
    pub means: Vec<f32>,
    pub stds: Vec<f32>,
    pub boundaries: Vec<f32>,
}

impl Default for Segmentation {
    /// Air, lung, soft tissue, bone
    fn default() -> Self {
        Self {
            means:      vec![0.0,   0.03, 0.096, 0.12],
            stds:       vec![0.002, 0.01, 0.005, 0.02],
            boundaries: vec![0.015, 0.06, 0.11],
        }
    }
}

impl Segmentation {
    /// Mean of the class containing `mu`
    pub fn classify(&self, mu: f32) -> f32 {
        let class = self.boundaries.iter().take_while(|&&b| mu >= b).count();
        self.means.get(class).copied().unwrap_or(mu)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapTrParams<'a> {
    pub iterations: usize,
    pub subsets: usize,
    pub beta: Ratiof32,
    /// Weight of the intensity prior
    pub alpha: Ratiof32,
    pub prior: Prior,
    pub segmentation: &'a Segmentation,
}

/// Unregularized OSEM of line-integral sinograms
pub trait OsemEngine: Sync {
    fn reconstruct(&self, arena: &BufferArena, sinogram: &Sinogram, fov: &Fov, params: &OsemParams) -> Result<Image>;
}

/// Regularized transmission reconstruction from blank and transmission scans
pub trait MapTrEngine: Sync {
    fn reconstruct(&self, arena: &BufferArena, blank: &Sinogram, tx: &Sinogram, fov: &Fov, params: &MapTrParams) -> Result<Image>;
}

/// OSEM of attenuation-corrected emission data, weighted by the attenuation
/// correction factors `acf`
pub trait AttenuationWeightedOsem: Sync {
    fn reconstruct(&self, arena: &BufferArena, emission: &Sinogram, acf: &Sinogram, fov: &Fov, params: &OsemParams) -> Result<Image>;
}

/// Collapse of a 3D sinogram onto its direct planes
pub trait SingleSliceRebinner: Sync {
    fn rebin(&self, arena: &BufferArena, sinogram: &Sinogram) -> Result<Sinogram>;
}

/// Single-scatter simulation on a coarse sinogram grid.
///
/// `emission` and `umap` share one FOV. The result holds
/// `grid.axial_mm.len()` planes of `grid.angles_rad.len()` x
/// `grid.radial_mm.len()` samples, plane-major and bin-fastest.
pub trait ScatterSimulator: Sync {
    fn simulate(&self, arena: &BufferArena, emission: &Image, umap: &Image, grid: &ScatterGrid) -> Result<Vec<f32>>;
}

/// Single-slice rebinning: every oblique plane is added to the direct plane
/// nearest its axial centre, and each direct plane is divided by the number
/// of planes it received.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ssrb;

impl SingleSliceRebinner for Ssrb {
    fn rebin(&self, arena: &BufferArena, sinogram: &Sinogram) -> Result<Sinogram> {
        let g = &sinogram.geometry;
        let axes = &g.axes;
        let direct = axes.planes_per_axis().first().copied().unwrap_or(0);
        let geometry = SinogramGeometry::new(g.bins, g.angles, g.bin_size, vec![direct], g.plane_separation);
        let mut out = Sinogram::zeros(arena, geometry, "ssrb sinogram")?;
        let len = g.plane_len();
        let mut hits = vec![0_u32; direct];
        for axis in 0..axes.len() {
            for (p, plane) in axes.plane_range(axis).enumerate() {
                let target = axes.axial_position(axis, p).round() as usize;
                if target >= direct { continue }
                hits[target] += 1;
                let src = &sinogram.data()[plane * len .. (plane + 1) * len];
                let dst = &mut out.data_mut()[target * len .. (target + 1) * len];
                for (d, s) in dst.iter_mut().zip(src) { *d += s }
            }
        }
        for (plane, &n) in out.data_mut().chunks_mut(len).zip(&hits) {
            if n > 1 { for v in plane { *v /= n as f32 } }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use units::mm;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn ssrb_averages_planes_onto_direct_planes() {
        let arena = BufferArena::new();
        // 3 direct planes, one oblique axis of 1 plane centred on plane 1
        let g = SinogramGeometry::new(2, 1, mm(2.0), vec![3, 1], mm(2.0));
        let mut s = Sinogram::zeros(&arena, g, "3d").unwrap();
        s.data_mut().copy_from_slice(&[1.0, 1.0,   2.0, 2.0,   3.0, 3.0,   6.0, 8.0]);
        let out = Ssrb.rebin(&arena, &s).unwrap();
        assert_eq!(out.geometry.axes.planes_per_axis(), &[3]);
        assert_eq!(out.data(), &[1.0, 1.0,   4.0, 5.0,   3.0, 3.0]);
    }

    #[test]
    fn segmentation_picks_class_means() {
        let seg = Segmentation::default();
        assert_eq!(seg.classify(0.001), 0.0);
        assert_eq!(seg.classify(0.04), 0.03);
        assert_eq!(seg.classify(0.1), 0.096);
        assert_eq!(seg.classify(0.2), 0.12);
    }
}
