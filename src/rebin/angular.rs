//! Resampling of the angular axis of a sinogram plane.
//!
//! The angles of a sinogram cover half a turn. A line at angle `theta + 180°`
//! and radius `r` is the line at `theta` and radius `-r`, so the angle axis is
//! extended by `pad` angles on each side with radially mirrored copies of the
//! opposite end of the plane. The cubic interpolator then never samples
//! outside the padded domain.

use crate::error::RebinError;

/// Keys cubic convolution kernel, `a = -0.5`
fn keys(x: f64) -> f64 {
    const A: f64 = -0.5;
    let x = x.abs();
    if x <= 1.0 {
        ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        ((A * x - 5.0 * A) * x + 8.0 * A) * x - 4.0 * A
    } else {
        0.0
    }
}

#[derive(Clone, Debug)]
pub struct AngularInterpolator {
    angles: usize,
    new_angles: usize,
    pad: usize,
    /// Per output angle: `(padded angle index, weight)`
    taps: Vec<Vec<(usize, f32)>>,
    scale: f32,
}

impl AngularInterpolator {

    pub fn new(angles: usize, new_angles: usize, preserve_values: bool) -> Result<Self, RebinError> {
        if angles == 0 || new_angles == 0 { return Err(RebinError::Empty("angles")) }
        let ratio = angles as f64 / new_angles as f64;
        // Widen the kernel when decimating, so every input angle contributes
        let stretch = ratio.max(1.0);
        let support = 2.0 * stretch;
        let pad = support.ceil() as usize + 1;
        if pad > angles { return Err(RebinError::Padding { pad, angles }) }

        let taps = (0..new_angles)
            .map(|k| {
                let p = k as f64 * ratio;
                let first = (p - support).floor() as isize;
                let last  = (p + support).ceil()  as isize;
                let mut taps: Vec<(usize, f64)> = (first..=last)
                    .map(|i| (i, keys((i as f64 - p) / stretch)))
                    .filter(|&(_, w)| w != 0.0)
                    .map(|(i, w)| ((i + pad as isize) as usize, w))
                    .collect();
                let norm: f64 = taps.iter().map(|&(_, w)| w).sum();
                for (_, w) in taps.iter_mut() { *w /= norm }
                taps.into_iter().map(|(i, w)| (i, w as f32)).collect()
            })
            .collect();

        let scale = if preserve_values { 1.0 } else { ratio as f32 };
        Ok(Self { angles, new_angles, pad, taps, scale })
    }

    pub fn pad(&self) -> usize { self.pad }

    /// Length of one padded angular line
    pub fn padded_len(&self) -> usize { self.angles + 2 * self.pad }

    /// Interpolate the padded, angle-major `padded` (`bins` lines of
    /// `padded_len`) into the bin-major plane `dst` (`new_angles x bins`).
    pub fn apply(&self, padded: &[f32], bins: usize, dst: &mut [f32]) {
        let len = self.padded_len();
        debug_assert_eq!(padded.len(), bins * len);
        debug_assert_eq!(dst.len(), bins * self.new_angles);
        for r in 0..bins {
            let line = &padded[r * len .. (r + 1) * len];
            for (k, taps) in self.taps.iter().enumerate() {
                let v: f32 = taps.iter().map(|&(i, w)| w * line[i]).sum();
                dst[k * bins + r] = v * self.scale;
            }
        }
    }
}

/// Transpose the plane `src` (`angles x bins`) into angle-major lines of
/// `angles + 2 * pad` samples, filling the padding from the opposite end of
/// the half-turn, radially mirrored.
pub fn pad_plane(src: &[f32], angles: usize, bins: usize, pad: usize, dst: &mut [f32]) {
    let len = angles + 2 * pad;
    debug_assert_eq!(src.len(), angles * bins);
    debug_assert_eq!(dst.len(), bins * len);
    debug_assert!(pad <= angles);
    // Radius r sits at r - bins/2, so its mirror image is bins - r; r = 0 has
    // no mirror inside the plane
    let mirror = |r: usize| bins - r;

    for r in 0..bins {
        let line = &mut dst[r * len .. (r + 1) * len];
        for a in 0..angles {
            line[pad + a] = src[a * bins + r];
        }
        if r == 0 { continue }
        let m = mirror(r);
        for a in 0..pad {
            // Angles below 0°: wrap from the end of the plane
            line[a] = src[(angles - pad + a) * bins + m];
            // 180° and beyond: the start of the plane
            line[pad + angles + a] = src[a * bins + m];
        }
    }
    // r = 0: extrapolate the padding from r = 1
    if bins > 1 {
        let (first, rest) = dst.split_at_mut(len);
        let second = &rest[..len];
        first[..pad]              .copy_from_slice(&second[..pad]);
        first[pad + angles..]     .copy_from_slice(&second[pad + angles..]);
    }
}
