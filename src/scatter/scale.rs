//! Per-plane calibration of simulated scatter against measured emission.

use serde::{Deserialize, Serialize};

use crate::index::plane_range;
use crate::sinogram::axis::Axes;
use crate::sinogram::Sinogram;
use crate::types::Ratiof32;

/// Attenuation correction factor above which a bin is taken to cross the object
pub const DEFAULT_ATTENUATION_THRESHOLD: Ratiof32 = 1.03;
/// Radial bins on either side of the object that are not treated as tails
pub const DEFAULT_TAIL_MARGIN: usize = 2;
/// Empirical correction for the single-scatter approximation missing
/// multiple scatter
pub const DEFAULT_UNDERESTIMATE_FACTOR: Ratiof32 = 1.0;
pub const DEFAULT_MIN_SCALE: Ratiof32 = 0.0;
pub const DEFAULT_MAX_SCALE: Ratiof32 = 100.0;
pub const DEFAULT_BOXCAR_WIDTH: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScaleSettings {
    #[serde(default = "default_threshold")]     pub attenuation_threshold: Ratiof32,
    #[serde(default = "default_margin")]        pub tail_margin: usize,
    #[serde(default = "default_underestimate")] pub underestimate_factor: Ratiof32,
    #[serde(default = "default_min")]           pub min_scale: Ratiof32,
    #[serde(default = "default_max")]           pub max_scale: Ratiof32,
    #[serde(default = "default_boxcar")]        pub boxcar_width: usize,
}

fn default_threshold    () -> Ratiof32 { DEFAULT_ATTENUATION_THRESHOLD }
fn default_margin       () -> usize    { DEFAULT_TAIL_MARGIN }
fn default_underestimate() -> Ratiof32 { DEFAULT_UNDERESTIMATE_FACTOR }
fn default_min          () -> Ratiof32 { DEFAULT_MIN_SCALE }
fn default_max          () -> Ratiof32 { DEFAULT_MAX_SCALE }
fn default_boxcar       () -> usize    { DEFAULT_BOXCAR_WIDTH }

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            attenuation_threshold: DEFAULT_ATTENUATION_THRESHOLD,
            tail_margin:           DEFAULT_TAIL_MARGIN,
            underestimate_factor:  DEFAULT_UNDERESTIMATE_FACTOR,
            min_scale:             DEFAULT_MIN_SCALE,
            max_scale:             DEFAULT_MAX_SCALE,
            boxcar_width:          DEFAULT_BOXCAR_WIDTH,
        }
    }
}

/// Radial bins of one sinogram row that lie outside the object, which is
/// delimited by the first and last bins whose attenuation factor reaches
/// `threshold`, widened by `margin`. A row that never reaches the threshold
/// is all tail.
pub fn tail_bins(acf: &[f32], threshold: Ratiof32, margin: usize) -> impl Iterator<Item = usize> {
    let bins = acf.len();
    let object = acf.iter().position(|&a| a >= threshold)
        .zip(acf.iter().rposition(|&a| a >= threshold))
        .map(|(lo, hi)| (lo.saturating_sub(margin), (hi + margin).min(bins - 1)));
    (0..bins).filter(move |&r| object.map_or(true, |(lo, hi)| r < lo || r > hi))
}

/// Least-squares scale of `sim` to `measured` over the tail bins of one
/// plane, weighted by `sim`. A plane without simulated tail scatter has
/// scale 1.
pub fn plane_scale(sim: &[f32], measured: &[f32], acf: &[f32], bins: usize, settings: &ScaleSettings) -> Ratiof32 {
    let (mut num, mut den) = (0.0_f64, 0.0_f64);
    for ((s, m), a) in sim.chunks(bins).zip(measured.chunks(bins)).zip(acf.chunks(bins)) {
        for r in tail_bins(a, settings.attenuation_threshold, settings.tail_margin) {
            let s = s[r] as f64;
            num += s * s * m[r] as f64;
            den += s * s * s;
        }
    }
    if den == 0.0 { return 1.0 }
    let scale = settings.underestimate_factor as f64 * num / den;
    (scale as f32).clamp(settings.min_scale, settings.max_scale)
}

/// Moving average of odd `width` (even widths are widened by one); the
/// window shrinks at the ends so that constant sequences are unchanged.
pub fn boxcar(values: &[f32], width: usize) -> Vec<f32> {
    let half = width / 2;
    let n = values.len();
    (0..n).map(|i| {
        let window = &values[i.saturating_sub(half) .. (i + half + 1).min(n)];
        (window.iter().map(|&v| v as f64).sum::<f64>() / window.len() as f64) as f32
    }).collect()
}

/// One scale factor per sinogram plane
#[derive(Clone, Debug, PartialEq)]
pub struct ScaleFactorTable {
    factors: Vec<Ratiof32>,
}

impl ScaleFactorTable {

    /// Scale factors of every plane of `sim` against `measured`, using
    /// `acf` to find the tails. In each axis the `skip_outer_planes` planes
    /// at either end take the factor of the nearest plane that was fitted.
    pub fn compute(sim: &Sinogram, measured: &Sinogram, acf: &Sinogram, skip_outer_planes: usize, settings: &ScaleSettings) -> Self {
        let g = &sim.geometry;
        let bins = g.bins;
        let mut factors = vec![1.0; g.planes()];
        for (axis, range) in axis_ranges(&g.axes) {
            let n = range.len();
            let skip = if n > 2 * skip_outer_planes { skip_outer_planes } else { 0 };
            for p in skip..n - skip {
                let plane = range.start + p;
                let bins_of = plane_range(plane, g.plane_dims());
                factors[plane] = plane_scale(
                    &sim     .data()[bins_of.clone()],
                    &measured.data()[bins_of.clone()],
                    &acf     .data()[bins_of],
                    bins, settings);
            }
            for p in (0..skip).chain(n - skip..n) {
                let nearest = p.clamp(skip, n - 1 - skip);
                factors[range.start + p] = factors[range.start + nearest];
            }
            log::debug!("axis {axis}: fitted {} of {n} scatter scale factors", n - 2 * skip);
        }
        Self { factors }
    }

    pub fn from_factors(factors: Vec<Ratiof32>) -> Self { Self { factors } }

    pub fn factors(&self) -> &[Ratiof32] { &self.factors }

    /// Boxcar-smooth the factors of each axis separately
    pub fn smooth(&mut self, axes: &Axes, width: usize) {
        for (_, range) in axis_ranges(axes) {
            let smoothed = boxcar(&self.factors[range.clone()], width);
            self.factors[range].copy_from_slice(&smoothed);
        }
    }

    /// Multiply every plane of `sinogram` by its factor, consuming the table
    pub fn apply(self, sinogram: &mut Sinogram) {
        let len = sinogram.geometry.plane_len();
        for (plane, factor) in sinogram.data_mut().chunks_mut(len).zip(self.factors) {
            for v in plane { *v *= factor }
        }
    }
}

fn axis_ranges(axes: &Axes) -> impl Iterator<Item = (usize, std::ops::Range<usize>)> + '_ {
    (0..axes.len()).map(move |a| (a, axes.plane_range(a)))
}
