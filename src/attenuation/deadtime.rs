//! Count-rate dependent loss of blank scan counts.
//!
//! A series of calibration frames of the transmission source, acquired at
//! decreasing singles rates, gives the relative efficiency of every
//! (plane, radial bin) as a function of the singles count: each frame divided
//! by the last, lowest-rate frame. A quadratic is fitted to each bin by least
//! squares and evaluated at the singles count of the transmission scan.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{RebinError, Result};
use crate::io::calibration::{read_database, CalibrationFrame};
use crate::matrix::Matrix;
use crate::rebin::{ArcCorrection, RadialKernel};
use crate::sinogram::Sinogram;

/// Polynomial coefficients per bin
const ORDER: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeadtimeConfig {
    /// Directory of the calibration database
    pub database: PathBuf,
    pub frames: usize,
}

/// Per-bin quadratic in normalised singles
#[derive(Clone, Debug, PartialEq)]
pub struct DeadtimeFit {
    planes: usize,
    bins: usize,
    /// Singles count mapped to 1 in the polynomial variable
    singles_scale: f64,
    /// `ORDER` coefficients per bin, constant term first
    coefficients: Vec<f64>,
}

/// Relative efficiency profiles: frames summed over angles, resampled to
/// `bins`, divided by the last frame
fn relative_profiles(frames: &[CalibrationFrame], planes: usize, bins: usize) -> Result<Vec<Vec<f64>>> {
    let profiles = frames.iter().map(|frame| -> Result<Vec<f64>> {
        let h = &frame.header;
        h.validate()?;
        let (f_planes, f_angles, f_bins) = (h.planes as usize, h.angles as usize, h.bins as usize);
        if f_planes != planes {
            return Err(RebinError::PlaneLayout(vec![f_planes], vec![planes]).into())
        }
        let kernel = RadialKernel::new(f_bins, bins, ArcCorrection::None, 0, 1.0, false)?;
        let mut summed = vec![0.0; f_bins];
        let mut resampled = vec![0.0; bins];
        let mut profile = Vec::with_capacity(planes * bins);
        for plane in frame.counts.chunks(f_angles * f_bins) {
            summed.iter_mut().for_each(|s| *s = 0.0);
            for row in plane.chunks(f_bins) {
                for (s, &c) in summed.iter_mut().zip(row) { *s += c }
            }
            kernel.apply(&summed, &mut resampled);
            profile.extend(resampled.iter().map(|&x| x as f64));
        }
        Ok(profile)
    }).collect::<Result<Vec<Vec<f64>>>>()?;

    let reference = profiles.last().cloned().unwrap_or_default();
    Ok(profiles.into_iter().map(|p| {
        p.into_iter().zip(&reference)
            .map(|(x, &r)| if r > 0.0 { x / r } else { 1.0 })
            .collect()
    }).collect())
}

impl DeadtimeFit {

    /// Fit every (plane, bin) of `frames`, resampled to `bins` radial bins.
    /// Returns `None` if the frames cannot determine a quadratic.
    pub fn new(frames: &[CalibrationFrame], planes: usize, bins: usize) -> Result<Option<Self>> {
        let singles: Vec<f64> = frames.iter().map(|f| f.header.singles).collect();
        let singles_scale = singles.iter().copied().fold(0.0, f64::max);
        if frames.len() < ORDER || !(singles_scale > 0.0) { return Ok(None) }

        // Design matrix of normalised singles powers, one row per frame
        let n = frames.len();
        let mut a = Matrix::zeros(n, ORDER);
        for (f, s) in singles.iter().enumerate() {
            let x = s / singles_scale;
            for k in 0..ORDER { a[(f, k)] = x.powi(k as i32) }
        }
        let at = a.transpose();
        let Some(normal_inv) = (&at * &a).invert() else { return Ok(None) };
        // (A^T A)^-1 A^T, shared by all bins
        let projector = &normal_inv * &at;

        let profiles = relative_profiles(frames, planes, bins)?;
        let mut coefficients = vec![0.0; planes * bins * ORDER];
        coefficients.par_chunks_mut(ORDER).enumerate().for_each(|(bin, c)| {
            let b: Vec<f64> = profiles.iter().map(|p| p[bin]).collect();
            c.copy_from_slice(&projector.apply(&b));
        });
        Ok(Some(Self { planes, bins, singles_scale, coefficients }))
    }

    pub fn planes(&self) -> usize { self.planes }
    pub fn bins  (&self) -> usize { self.bins }

    /// Fitted relative efficiency of one bin at `singles`, unclamped
    pub fn evaluate(&self, plane: usize, bin: usize, singles: f64) -> f64 {
        let x = singles / self.singles_scale;
        let c = &self.coefficients[(plane * self.bins + bin) * ORDER ..][..ORDER];
        c.iter().rev().fold(0.0, |acc, &k| acc * x + k)
    }

    /// Correction factors for all bins at `singles`. Values outside (0, 1]
    /// are replaced by 1.
    pub fn correction(&self, singles: f64) -> DeadtimeCorrection {
        let factors = (0..self.planes * self.bins).into_par_iter()
            .map(|i| {
                let v = self.evaluate(i / self.bins, i % self.bins, singles);
                if v > 0.0 && v <= 1.0 { v as f32 } else { 1.0 }
            })
            .collect();
        DeadtimeCorrection { planes: self.planes, bins: self.bins, factors }
    }
}

/// One multiplicative factor per (plane, radial bin)
#[derive(Clone, Debug, PartialEq)]
pub struct DeadtimeCorrection {
    planes: usize,
    bins: usize,
    factors: Vec<f32>,
}

impl DeadtimeCorrection {

    pub fn identity(planes: usize, bins: usize) -> Self {
        Self { planes, bins, factors: vec![1.0; planes * bins] }
    }

    pub fn factors(&self) -> &[f32] { &self.factors }

    /// Multiply every angle of every plane of `sinogram` by the factors
    pub fn apply(&self, sinogram: &mut Sinogram) -> Result<()> {
        let g = &sinogram.geometry;
        if [g.planes(), g.bins] != [self.planes, self.bins] {
            return Err(RebinError::PlaneSize([g.planes(), g.bins], [self.planes, self.bins]).into())
        }
        let (bins, plane_len) = (g.bins, g.plane_len());
        for (plane, data) in sinogram.data_mut().chunks_mut(plane_len).enumerate() {
            let factors = &self.factors[plane * bins .. (plane + 1) * bins];
            for row in data.chunks_mut(bins) {
                for (v, f) in row.iter_mut().zip(factors) { *v *= f }
            }
        }
        Ok(())
    }
}

/// Correction for a transmission scan with `singles` counts, from the first
/// `frames` frames of the database in `dir`
pub fn dead_time_correction(singles: f64, dir: &Path, frames: usize, planes: usize, bins: usize) -> Result<DeadtimeCorrection> {
    let database = read_database(dir, frames)?;
    Ok(match DeadtimeFit::new(&database, planes, bins)? {
        Some(fit) => {
            let correction = fit.correction(singles);
            let mean = correction.factors.iter().map(|&f| f as f64).sum::<f64>() / correction.factors.len().max(1) as f64;
            log::info!("deadtime correction at {singles:.3e} singles: mean factor {mean:.4}");
            correction
        },
        None => {
            log::warn!("deadtime calibration in {} cannot be fitted; no correction applied", dir.display());
            DeadtimeCorrection::identity(planes, bins)
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::BufferArena;
    use crate::io::calibration::{write_frame, FrameHeader};
    use crate::sinogram::SinogramGeometry;
    use float_eq::assert_float_eq;
    use tempfile::tempdir;
    use units::mm;

    // Relative efficiency of bin `r` at `s` million singles
    fn truth(r: usize, s: f64) -> f64 { 1.0 - 0.02 * s - (0.01 + 0.001 * r as f64) * s * s }

    fn frame(singles: f64, planes: u32, angles: u32, bins: u32) -> CalibrationFrame {
        let header = FrameHeader { singles: singles * 1e6, randoms: false, bins, angles, planes };
        let counts = (0..header.len())
            .map(|i| (1000.0 * truth(i % bins as usize, singles) / truth(i % bins as usize, 0.5)) as f32)
            .collect();
        CalibrationFrame { header, counts }
    }

    #[test]
    fn three_frames_of_a_quadratic_are_fitted_exactly() {
        let singles = [4.0, 2.0, 0.5];
        let frames: Vec<_> = singles.iter().map(|&s| frame(s, 2, 3, 6)).collect();
        let fit = DeadtimeFit::new(&frames, 2, 6).unwrap().unwrap();
        for plane in 0..2 {
            for r in 0..6 {
                // Sampled and extrapolated singles
                for s in [4.0, 2.0, 0.5, 1.0, 6.0] {
                    let expected = truth(r, s) / truth(r, 0.5);
                    assert_float_eq!(fit.evaluate(plane, r, s * 1e6), expected, abs <= 1e-5);
                }
            }
        }
    }

    #[test]
    fn correction_is_clamped() {
        let frames: Vec<_> = [4.0, 2.0, 0.5].iter().map(|&s| frame(s, 1, 2, 4)).collect();
        let fit = DeadtimeFit::new(&frames, 1, 4).unwrap().unwrap();
        // Below the reference rate the efficiency exceeds 1
        assert!(fit.correction(0.1e6).factors().iter().all(|&f| f == 1.0));
        // Far beyond the calibration the quadratic goes negative
        assert!(fit.correction(100.0e6).factors().iter().all(|&f| f == 1.0));
        assert!(fit.correction(3.0e6).factors().iter().all(|&f| f > 0.0 && f < 1.0));
    }

    #[test]
    fn too_few_frames_cannot_be_fitted() {
        let frames: Vec<_> = [2.0, 0.5].iter().map(|&s| frame(s, 1, 2, 4)).collect();
        assert_eq!(DeadtimeFit::new(&frames, 1, 4).unwrap(), None);
    }

    #[test]
    fn frames_are_resampled_to_the_blank_width() {
        let frames: Vec<_> = [4.0, 2.0, 0.5].iter().map(|&s| frame(s, 1, 2, 8)).collect();
        let fit = DeadtimeFit::new(&frames, 1, 4).unwrap().unwrap();
        assert_eq!(fit.bins(), 4);
    }

    #[test]
    fn correction_from_database_scales_every_angle() -> Result<()> {
        let dir = tempdir()?;
        for (i, s) in [4.0, 2.0, 0.5].into_iter().enumerate() {
            let f = frame(s, 1, 2, 4);
            write_frame(dir.path(), i, &f.header, &f.counts, None)?;
        }
        let correction = dead_time_correction(2.0e6, dir.path(), 3, 1, 4)?;
        let arena = BufferArena::new();
        let mut blank = Sinogram::zeros(&arena, SinogramGeometry::new(4, 2, mm(2.0), vec![1], mm(2.0)), "blank")?;
        for v in blank.data_mut() { *v = 100.0 }
        correction.apply(&mut blank)?;
        for a in 0..2 {
            for r in 0..4 {
                let expected = 100.0 * truth(r, 2.0) / truth(r, 0.5);
                assert_float_eq!(blank.view()[[0, a, r]] as f64, expected, abs <= 1e-3);
            }
        }
        Ok(())
    }

    #[test]
    fn frames_without_angles_are_an_error() -> Result<()> {
        let frames: Vec<_> = [4.0, 2.0, 0.5].iter().map(|&s| frame(s, 1, 0, 4)).collect();
        assert!(matches!(DeadtimeFit::new(&frames, 1, 4),
                         Err(crate::Error::Rebin(RebinError::Empty("calibration angles")))));

        let dir = tempdir()?;
        for (i, f) in frames.iter().enumerate() {
            write_frame(dir.path(), i, &f.header, &f.counts, None)?;
        }
        assert!(matches!(dead_time_correction(1.0e6, dir.path(), 3, 1, 4),
                         Err(crate::Error::Rebin(RebinError::Empty(_)))));
        Ok(())
    }

    #[test]
    fn missing_database_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(dead_time_correction(1.0, dir.path(), 3, 1, 4).is_err());
    }
}
