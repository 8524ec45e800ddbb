//! Resampling of sinogram planes to new radial and angular sampling.
//!
//! A [`RebinPlan`] describes one size change; a [`Rebinner`] precomputes the
//! radial and angular kernels for it once and then resamples any number of
//! planes, spreading contiguous slices of planes over a reusable pool of
//! worker threads. Every output plane depends only on its input plane, so the
//! result is identical whatever the number of threads.

pub mod radial;
pub mod angular;

pub use radial::{ArcCorrection, RadialKernel};
pub use angular::AngularInterpolator;

use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::arena::{Buffer, BufferArena};
use crate::error::{Error, RebinError, Result};
use crate::sinogram::Sinogram;

/// Immutable description of a resampling operation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebinPlan {
    /// Source radial bins
    pub width: usize,
    /// Source angles
    pub height: usize,
    pub new_width: usize,
    pub new_height: usize,
    #[serde(default)]
    pub arc_correction: ArcCorrection,
    #[serde(default)]
    pub crystals_per_ring: usize,
    /// Preserve point values (true) or integrated counts (false)
    pub preserve_values: bool,
}

impl RebinPlan {
    pub fn new(width: usize, height: usize, new_width: usize, new_height: usize, preserve_values: bool) -> Self {
        Self {
            width, height, new_width, new_height,
            arc_correction: ArcCorrection::None,
            crystals_per_ring: 0,
            preserve_values,
        }
    }

    pub fn with_arc_correction(self, crystals_per_ring: usize) -> Self {
        Self { arc_correction: ArcCorrection::Apply, crystals_per_ring, ..self }
    }

    pub fn plane_len    (&self) -> usize { self.width     * self.height     }
    pub fn new_plane_len(&self) -> usize { self.new_width * self.new_height }
}

/// Worker pool of `max_threads` threads (at least one), to be shared by the
/// rebinners and parallel stages of one pipeline component
pub fn worker_pool(max_threads: usize) -> Result<Arc<rayon::ThreadPool>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_threads.max(1))
        .thread_name(|i| format!("petacs-{i}"))
        .build()?;
    Ok(Arc::new(pool))
}

pub struct Rebinner {
    plan: RebinPlan,
    radial: RadialKernel,
    angular: Option<AngularInterpolator>,
    pool: Arc<rayon::ThreadPool>,
    max_threads: usize,
}

impl Rebinner {

    pub fn new(plan: RebinPlan, max_threads: usize) -> Result<Self> {
        Self::with_pool(plan, worker_pool(max_threads)?, max_threads)
    }

    /// Share an existing worker pool between rebinners
    pub fn with_pool(plan: RebinPlan, pool: Arc<rayon::ThreadPool>, max_threads: usize) -> Result<Self> {
        if plan.height == 0 || plan.new_height == 0 { return Err(RebinError::Empty("angles").into()) }
        let radial = kernel(&plan, 1.0)?;
        let angular = (plan.height != plan.new_height)
            .then(|| AngularInterpolator::new(plan.height, plan.new_height, plan.preserve_values))
            .transpose()?;
        log::debug!("rebin plan {}x{} -> {}x{}, angular padding {:?}",
                    plan.width, plan.height, plan.new_width, plan.new_height,
                    angular.as_ref().map(AngularInterpolator::pad));
        Ok(Self { plan, radial, angular, pool, max_threads: max_threads.max(1) })
    }

    pub fn plan(&self) -> &RebinPlan { &self.plan }

    pub fn pool(&self) -> Arc<rayon::ThreadPool> { Arc::clone(&self.pool) }

    fn needs_radial(&self) -> bool {
        self.plan.width != self.plan.new_width || self.plan.arc_correction != ArcCorrection::None
    }

    /// Resample `planes` consecutive planes held in `input`.
    ///
    /// `zoom`, if given, holds one radial magnification per plane. The result
    /// is a new buffer owned by the caller.
    pub fn rebin(&self, arena: &BufferArena, input: &[f32], planes: usize, zoom: Option<&[f32]>) -> Result<Buffer> {
        let plan = &self.plan;
        let expected = planes * plan.plane_len();
        if input.len() != expected {
            return Err(RebinError::Length {
                actual: input.len(), expected, planes, angles: plan.height, bins: plan.width
            }.into())
        }
        if let Some(zoom) = zoom {
            if zoom.len() != planes {
                return Err(RebinError::ZoomCount { zooms: zoom.len(), planes }.into())
            }
            if let Some(&bad) = zoom.iter().find(|&&z| !(z > 0.0)) {
                return Err(RebinError::Zoom(bad).into())
            }
        }

        if zoom.is_none() && !self.needs_radial() && self.angular.is_none() {
            return Ok(arena.copy_of(input, "rebinned sinogram")?)
        }

        let mut output = arena.create(planes * plan.new_plane_len(), "rebinned sinogram")?;
        let workers = self.max_threads.min(planes);
        if workers <= 1 {
            self.rebin_planes(arena, 0..planes, input, &mut output, zoom)?;
            return Ok(output)
        }

        let ranges = partition(planes, workers);
        log::debug!("rebinning {planes} planes on {workers} workers");
        let mut slices = Vec::with_capacity(ranges.len());
        let mut rest: &mut [f32] = &mut output;
        for range in &ranges {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len() * plan.new_plane_len());
            slices.push(head);
            rest = tail;
        }

        let results: Vec<Result<()>> = self.pool.install(|| {
            ranges.par_iter()
                .zip(slices.into_par_iter())
                .enumerate()
                .map(|(worker, (range, out))| {
                    self.rebin_planes(arena, range.clone(), input, out, zoom)
                        .map_err(|e| Error::Thread { worker, source: Box::new(e) })
                })
                .collect()
        });
        // All workers have finished: report the first failure in worker order
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(output)
    }

    /// Resample a whole sinogram, keeping its axial structure
    pub fn rebin_sinogram(&self, arena: &BufferArena, sinogram: &Sinogram, zoom: Option<&[f32]>) -> Result<Sinogram> {
        let g = &sinogram.geometry;
        if [g.bins, g.angles] != [self.plan.width, self.plan.height] {
            return Err(RebinError::PlaneSize([g.angles, g.bins], [self.plan.height, self.plan.width]).into())
        }
        let data = self.rebin(arena, sinogram.data(), g.planes(), zoom)?;
        Sinogram::from_buffer(g.resampled(self.plan.new_width, self.plan.new_height), data)
    }

    /// Work done by one worker: the planes in `range`, written to `out`
    fn rebin_planes(
        &self,
        arena: &BufferArena,
        range: Range<usize>,
        input: &[f32],
        out: &mut [f32],
        zoom: Option<&[f32]>,
    ) -> Result<()> {
        let RebinPlan { width, height, new_width, .. } = self.plan;
        let (in_len, out_len) = (self.plan.plane_len(), self.plan.new_plane_len());
        let mut radial_out = arena.create(height * new_width, "rebin radial scratch")?;
        let mut padded = self.angular.as_ref()
            .map(|a| arena.create(new_width * a.padded_len(), "rebin angular padding"))
            .transpose()?;
        // Kernel for the most recent non-unit zoom factor
        let mut zoomed: Option<(f32, RadialKernel)> = None;

        for (n, plane) in range.enumerate() {
            let src = &input[plane * in_len .. (plane + 1) * in_len];
            let dst = &mut out[n * out_len .. (n + 1) * out_len];

            let z = zoom.map_or(1.0, |z| z[plane]);
            let radial = if z == 1.0 {
                self.needs_radial().then_some(&self.radial)
            } else {
                if zoomed.as_ref().map_or(true, |(last, _)| *last != z) {
                    zoomed = Some((z, kernel(&self.plan, z)?));
                }
                zoomed.as_ref().map(|(_, k)| k)
            };

            let stage: &mut [f32] = if self.angular.is_some() { &mut radial_out } else { dst };
            match radial {
                Some(kernel) => {
                    for a in 0..height {
                        kernel.apply(&src[a * width .. (a + 1) * width],
                                     &mut stage[a * new_width .. (a + 1) * new_width]);
                    }
                },
                None => stage.copy_from_slice(src),
            }

            if let (Some(angular), Some(padded)) = (&self.angular, padded.as_mut()) {
                let dst = &mut out[n * out_len .. (n + 1) * out_len];
                angular::pad_plane(&radial_out, height, new_width, angular.pad(), padded);
                angular.apply(padded, new_width, dst);
            }
        }
        Ok(())
    }
}

fn kernel(plan: &RebinPlan, zoom: f32) -> Result<RadialKernel> {
    Ok(RadialKernel::new(plan.width, plan.new_width, plan.arc_correction,
                         plan.crystals_per_ring, zoom, plan.preserve_values)?)
}

/// Split `n` items into `parts` contiguous ranges whose lengths differ by at
/// most one, longer ranges first.
pub fn partition(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let (base, extra) = (n / parts, n % parts);
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start .. start + len;
            start += len;
            range
        })
        .filter(|r| !r.is_empty())
        .collect()
}
