//! Gaussian smoothing of images.

use units::{mm_, Length};

use crate::arena::BufferArena;
use crate::error::Result;
use crate::image::Image;
use crate::types::{Lengthf32, Ratiof32};

/// sigma = FWHM / (2 sqrt(2 ln 2))
pub const FWHM_TO_SIGMA: Ratiof32 = 0.424_660_9;

fn make_gauss(sigma: Lengthf32, cutoff: Option<Ratiof32>) -> impl Fn(Lengthf32) -> Ratiof32 {
    let cutoff: Lengthf32 = cutoff.map_or(f32::INFINITY, |width| width * sigma);
    move |dx: Lengthf32| -> Ratiof32 {
        if dx.abs() < cutoff {
            let y = dx / sigma;
            (-0.5 * y * y).exp()
        } else {
            0.0
        }
    }
}

/// Normalised 1D kernel for a Gaussian of given `fwhm`, sampled at voxel
/// spacing `voxel` mm, truncated at 3 sigma. Index `len/2` is the centre.
pub fn gaussian_kernel(fwhm: Length, voxel: Lengthf32) -> Vec<f32> {
    let sigma = mm_(fwhm) * FWHM_TO_SIGMA;
    if !(sigma > 0.0) { return vec![1.0] }
    let half = (3.0 * sigma / voxel).floor() as isize;
    let gauss = make_gauss(sigma, Some(3.0 + 1e-3));
    let kernel: Vec<f32> = (-half..=half).map(|i| gauss(i as f32 * voxel)).collect();
    let sum: f32 = kernel.iter().sum();
    kernel.into_iter().map(|k| k / sum).collect()
}

/// Separable 3D smoothing; near the edges the kernel is renormalised over the
/// voxels that exist, so uniform images stay uniform.
pub fn smooth_image(arena: &BufferArena, image: &mut Image, fwhm: Length) -> Result<()> {
    let [nx, ny, nz] = image.fov.n;
    let strides = [1, nx, nx * ny];
    let mut scratch = arena.create(image.fov.len(), "gaussian smoothing scratch")?;
    for axis in 0..3 {
        let kernel = gaussian_kernel(fwhm, image.fov.voxel_size[axis]);
        if kernel.len() == 1 { continue }
        let half = (kernel.len() / 2) as isize;
        let n = image.fov.n[axis] as isize;
        let stride = strides[axis];
        let data = image.data();
        for (i, out) in scratch.iter_mut().enumerate() {
            let pos = ((i / stride) % n as usize) as isize;
            let (mut acc, mut norm) = (0.0, 0.0);
            for (k, &w) in kernel.iter().enumerate() {
                let q = pos + k as isize - half;
                if q < 0 || q >= n { continue }
                let j = (i as isize + (q - pos) * stride as isize) as usize;
                acc  += w * data[j];
                norm += w;
            }
            *out = if norm > 0.0 { acc / norm } else { 0.0 };
        }
        image.data_mut().copy_from_slice(&scratch);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fov::Fov;
    use float_eq::assert_float_eq;
    use units::mm;

    #[test]
    fn kernel_is_normalised_and_symmetric() {
        let k = gaussian_kernel(mm(10.0), 2.0);
        assert_eq!(k.len() % 2, 1);
        assert_float_eq!(k.iter().sum::<f32>(), 1.0, abs <= 1e-6);
        for i in 0..k.len() / 2 {
            assert_eq!(k[i], k[k.len() - 1 - i]);
        }
    }

    #[test]
    fn zero_width_does_nothing() {
        assert_eq!(gaussian_kernel(mm(0.0), 2.0), vec![1.0]);
    }

    #[test]
    fn smoothing_conserves_uniform_images() {
        let arena = BufferArena::new();
        let mut image = Image::zeros(&arena, Fov::isotropic([6, 5, 4], 2.0), "img").unwrap();
        for v in image.data_mut() { *v = 3.0 }
        smooth_image(&arena, &mut image, mm(8.0)).unwrap();
        for &v in image.data() { assert_float_eq!(v, 3.0, abs <= 1e-5) }
    }

    #[test]
    fn smoothing_spreads_a_point_and_keeps_its_total() {
        let arena = BufferArena::new();
        let mut image = Image::zeros(&arena, Fov::isotropic([21, 21, 21], 2.0), "img").unwrap();
        image[[10, 10, 10]] = 1000.0;
        smooth_image(&arena, &mut image, mm(6.0)).unwrap();
        assert!(image[[10, 10, 10]] < 1000.0);
        assert!(image[[11, 10, 10]] > 0.0);
        assert_float_eq!(image.sum(), 1000.0, r2nd <= 1e-4);
        assert_float_eq!(image[[11, 10, 10]], image[[9, 10, 10]], r2nd <= 1e-5);
    }
}
