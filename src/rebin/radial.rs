//! Resampling of the radial axis of each sinogram row.
//!
//! Radial bin `i` of a row of `w` bins is centred at `i - w/2` source-bin
//! widths from the scanner axis. Without arc correction the source bins are
//! uniform; with arc correction their centres lie at
//! `(N/pi) sin((i - w/2) pi / N)` for a ring of `N` crystals, and are mapped
//! onto a uniform grid.

use serde::{Deserialize, Serialize};

use crate::error::RebinError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcCorrection {
    #[default]
    None,
    Apply,
}

/// Sparse resampling matrix: for each output bin, `(source bin, weight)` taps.
#[derive(Clone, Debug)]
pub struct RadialKernel {
    width: usize,
    new_width: usize,
    taps: Vec<Vec<(usize, f32)>>,
}

impl RadialKernel {

    pub fn new(
        width: usize,
        new_width: usize,
        arc: ArcCorrection,
        crystals_per_ring: usize,
        zoom: f32,
        preserve_values: bool,
    ) -> Result<Self, RebinError> {
        if width == 0 || new_width == 0 { return Err(RebinError::Empty("radial bins")) }
        if !(zoom > 0.0) { return Err(RebinError::Zoom(zoom)) }
        let edges = source_edges(width, arc, crystals_per_ring)?;

        // Output bins are uniform, centred like the source bins, spanning the
        // same number of source widths, shrunk by `zoom`
        let step = width as f64 / new_width as f64 / zoom as f64;
        let half = new_width as f64 / 2.0;
        let out_edge = |j: usize| (j as f64 - half - 0.5) * step;

        let taps = (0..new_width)
            .map(|j| {
                let (lo, hi) = (out_edge(j), out_edge(j + 1));
                if preserve_values { interpolation_taps(&edges, (lo + hi) / 2.0) }
                else               { overlap_taps(&edges, lo, hi) }
            })
            .collect();
        Ok(Self { width, new_width, taps })
    }

    pub fn width    (&self) -> usize { self.width }
    pub fn new_width(&self) -> usize { self.new_width }

    /// Resample one row of `width` bins into `dst` of `new_width` bins
    #[inline]
    pub fn apply(&self, src: &[f32], dst: &mut [f32]) {
        debug_assert_eq!(src.len(), self.width);
        debug_assert_eq!(dst.len(), self.new_width);
        for (out, taps) in dst.iter_mut().zip(&self.taps) {
            *out = taps.iter().map(|&(i, w)| w * src[i]).sum();
        }
    }
}

/// Positions of the `width + 1` source bin edges, in units of the width of
/// the central source bin
fn source_edges(width: usize, arc: ArcCorrection, crystals: usize) -> Result<Vec<f64>, RebinError> {
    let half = width as f64 / 2.0;
    let uniform = (0..=width).map(|i| i as f64 - half - 0.5);
    match arc {
        ArcCorrection::None  => Ok(uniform.collect()),
        ArcCorrection::Apply => {
            // Outermost edges at |x| = (width + 1) / 2 must stay within a
            // quarter turn of the ring for sin to be monotonic
            if crystals == 0 || width + 1 > crystals {
                return Err(RebinError::Arc { bins: width, crystals })
            }
            let n = crystals as f64;
            let pi = std::f64::consts::PI;
            Ok(uniform.map(|x| n / pi * (x * pi / n).sin()).collect())
        },
    }
}

/// Area-overlap weights: every source bin distributes its counts over the
/// output bins it overlaps.
fn overlap_taps(edges: &[f64], lo: f64, hi: f64) -> Vec<(usize, f32)> {
    edges.windows(2)
        .enumerate()
        .filter_map(|(i, e)| {
            let overlap = hi.min(e[1]) - lo.max(e[0]);
            (overlap > 0.0).then(|| (i, (overlap / (e[1] - e[0])) as f32))
        })
        .collect()
}

/// Linear interpolation between the two source bin centres bracketing `x`.
/// Positions inside the outermost half bins take the edge values; positions
/// outside the source row get nothing.
fn interpolation_taps(edges: &[f64], x: f64) -> Vec<(usize, f32)> {
    let width = edges.len() - 1;
    if x < edges[0] || x > edges[width] { return vec![] }
    let centre = |i: usize| (edges[i] + edges[i + 1]) / 2.0;
    if x <= centre(0)         { return vec![(0, 1.0)] }
    if x >= centre(width - 1) { return vec![(width - 1, 1.0)] }
    let i = (0..width - 1).find(|&i| x < centre(i + 1)).unwrap_or(width - 2);
    let t = (x - centre(i)) / (centre(i + 1) - centre(i));
    vec![(i, (1.0 - t) as f32), (i + 1, t as f32)]
}
