//! Model-based scatter estimation.
//!
//! The emission data are reduced to a single 2D sinogram stack and
//! reconstructed on a coarse grid. Single scatter is simulated from that
//! image and the u-map on a sparse subset of LORs, interpolated to the full
//! sinogram with cubic b-splines, and finally calibrated plane by plane
//! against the measured counts in the scatter tails outside the object.

pub mod bspline;
pub mod qc;
pub mod scale;
pub mod sim;

use std::path::PathBuf;
use std::sync::Arc;

use units::{mm_, Length};

use crate::arena::BufferArena;
use crate::engines::{AttenuationWeightedOsem, OsemParams, ScatterSimulator, SingleSliceRebinner};
use crate::error::{BSplineError, Error, RebinError, Result};
use crate::fov::Fov;
use crate::gauss::smooth_image;
use crate::image::Image;
use crate::matrix::Matrix;
use crate::rebin::{worker_pool, RebinPlan, Rebinner};
use crate::sinogram::{Sinogram, SinogramGeometry};
use crate::types::{Energyf32, Ratiof32};

use bspline::{bspline, interpol};
use scale::{ScaleFactorTable, ScaleSettings};
use sim::{EnergyWindow, ScannerModel, ScatterGrid, SimulationSettings};

pub const DEFAULT_ITERATIONS: usize = 2;
pub const DEFAULT_SUBSETS: usize = 8;
pub const DEFAULT_SKIP_OUTER_PLANES: usize = 2;
pub const DEFAULT_SMOOTHING_FWHM_MM: f32 = 10.0;
pub const DEFAULT_RADIAL_STEP: usize = 8;
pub const DEFAULT_ANGULAR_STEP: usize = 8;
pub const DEFAULT_AXIAL_STEP: usize = 4;
pub const DEFAULT_SPLINE_PAD: usize = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct ScatterConfig {
    /// Emission sinogram sampling
    pub radial_bins: usize,
    pub bin_size: Length,
    pub angular_bins: usize,
    pub axis_slices: Vec<usize>,
    pub plane_separation: Length,
    /// In-plane voxels of the coarse emission image
    pub image_size: usize,

    pub iterations: usize,
    pub subsets: usize,
    /// Planes at each end of every axis whose scale factors are copied
    /// from their neighbours instead of being fitted
    pub skip_outer_planes: usize,
    /// Radial reduction of the 2D emission data before reconstruction
    pub radial_rebin_factor: usize,
    pub smoothing: Length,
    /// Multiplies the reconstructed activity density before simulation
    pub emission_scale: Ratiof32,

    /// Spacing, in sinogram elements, of the simulated LORs
    pub radial_step: usize,
    pub angular_step: usize,
    pub axial_step: usize,
    pub spline_pad: usize,

    pub scale: ScaleSettings,
    pub scanner: ScannerModel,
    /// Overrides the scanner's LLD offset
    pub lld_offset_kev: Option<Energyf32>,
    pub window: EnergyWindow,
    pub simulation: SimulationSettings,

    pub max_threads: usize,
    /// Directory for quality-control profiles
    pub qc: Option<PathBuf>,
}

impl ScatterConfig {
    pub fn new(
        radial_bins: usize,
        bin_size: Length,
        angular_bins: usize,
        axis_slices: Vec<usize>,
        image_size: usize,
        plane_separation: Length,
    ) -> Self {
        Self {
            radial_bins, bin_size, angular_bins, axis_slices, plane_separation, image_size,
            iterations:          DEFAULT_ITERATIONS,
            subsets:             DEFAULT_SUBSETS,
            skip_outer_planes:   DEFAULT_SKIP_OUTER_PLANES,
            radial_rebin_factor: 1,
            smoothing:           units::mm(DEFAULT_SMOOTHING_FWHM_MM),
            emission_scale:      1.0,
            radial_step:         DEFAULT_RADIAL_STEP,
            angular_step:        DEFAULT_ANGULAR_STEP,
            axial_step:          DEFAULT_AXIAL_STEP,
            spline_pad:          DEFAULT_SPLINE_PAD,
            scale:               ScaleSettings::default(),
            scanner:             ScannerModel::default(),
            lld_offset_kev:      None,
            window:              EnergyWindow::default(),
            simulation:          SimulationSettings::default(),
            max_threads:         default_threads(),
            qc:                  None,
        }
    }

    pub fn geometry(&self) -> SinogramGeometry {
        SinogramGeometry::new(self.radial_bins, self.angular_bins, self.bin_size,
                              self.axis_slices.clone(), self.plane_separation)
    }

    pub fn lld_offset(&self) -> Energyf32 {
        self.lld_offset_kev.unwrap_or_else(|| self.scanner.lld_offset_kev())
    }
}

pub fn default_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// External services used by the estimator
#[derive(Clone, Copy)]
pub struct ScatterServices<'a> {
    pub ssr: &'a dyn SingleSliceRebinner,
    pub osem: &'a dyn AttenuationWeightedOsem,
    pub simulator: &'a dyn ScatterSimulator,
}

/// Regularly spaced samples `offset + k * interval` of an axis of `elements`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sampling {
    pub samples: usize,
    pub interval: usize,
    pub offset: usize,
}

impl Sampling {

    /// Samples every `step` elements, centred on the axis
    pub fn spanning(elements: usize, step: usize) -> Self {
        if elements <= 1 { return Self { samples: elements, interval: 1, offset: 0 } }
        let interval = step.clamp(1, elements - 1);
        let samples = (elements - 1) / interval + 1;
        let offset = (elements - 1 - (samples - 1) * interval) / 2;
        Self { samples, interval, offset }
    }

    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.samples).map(move |k| self.offset + k * self.interval)
    }

    /// Interpolation from the samples to all `elements`
    pub fn spline(&self, elements: usize, pad: usize) -> std::result::Result<Matrix<f64>, BSplineError> {
        let pad = if self.samples > 1 { pad } else { 0 };
        bspline(elements, self.samples, self.interval, self.offset, pad)
    }
}

pub struct ScatterEstimator {
    config: ScatterConfig,
    pool: Arc<rayon::ThreadPool>,
}

impl ScatterEstimator {

    /// Builds a pool of `config.max_threads` workers for the rebinning and
    /// simulation stages of every estimate
    pub fn new(config: ScatterConfig) -> Result<Self> {
        let pool = worker_pool(config.max_threads)?;
        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(mut config: ScatterConfig, pool: Arc<rayon::ThreadPool>) -> Self {
        let requested = config.subsets;
        config.subsets = config.subsets.max(1);
        while config.angular_bins % config.subsets != 0 { config.subsets -= 1 }
        if config.subsets != requested {
            log::info!("using {} subsets: {requested} do not divide {} angles", config.subsets, config.angular_bins);
        }
        Self { config, pool }
    }

    pub fn config(&self) -> &ScatterConfig { &self.config }

    pub fn pool(&self) -> Arc<rayon::ThreadPool> { Arc::clone(&self.pool) }

    /// Built-in single-scatter simulation for the configured scanner and
    /// energy window
    pub fn simulator(&self) -> sim::SingleScatterSimulation {
        let c = &self.config;
        sim::SingleScatterSimulation::with_lld_offset(c.lld_offset(), c.window, c.simulation)
    }

    /// Scaled scatter sinogram with the geometry of `emission`.
    ///
    /// `attenuation` holds attenuation correction factors for the same
    /// planes as `emission`, at any in-plane sampling. `umap` is in 1/cm.
    /// Every stage, the external services included, runs on the estimator's
    /// pool.
    pub fn estimate_scatter(
        &self,
        arena: &BufferArena,
        services: ScatterServices,
        attenuation: &Sinogram,
        umap: &Image,
        emission: &Sinogram,
    ) -> Result<Sinogram> {
        self.pool.install(|| self.estimate_in_pool(arena, services, attenuation, umap, emission))
    }

    fn estimate_in_pool(
        &self,
        arena: &BufferArena,
        services: ScatterServices,
        attenuation: &Sinogram,
        umap: &Image,
        emission: &Sinogram,
    ) -> Result<Sinogram> {
        let c = &self.config;
        let g = emission.geometry.clone();
        g.check_same_shape(&c.geometry())?;
        g.check_same_planes(&attenuation.geometry)?;

        let matched;
        let acf = if attenuation.geometry.plane_dims() == g.plane_dims() { attenuation } else {
            log::debug!("resampling attenuation sinogram from {:?} to {:?}",
                        attenuation.geometry.plane_dims(), g.plane_dims());
            let plan = RebinPlan::new(attenuation.geometry.bins, attenuation.geometry.angles,
                                      g.bins, g.angles, true);
            matched = Rebinner::with_pool(plan, self.pool(), c.max_threads)?.rebin_sinogram(arena, attenuation, None)?;
            &matched
        };

        // 1. Attenuation-corrected 2D emission
        let (em2d, acf2d) = {
            let mut corrected = emission.try_clone(arena, "attenuation-corrected emission")?;
            for (e, a) in corrected.data_mut().iter_mut().zip(acf.data()) { *e *= a }
            let em2d  = services.ssr.rebin(arena, &corrected)?;
            let acf2d = services.ssr.rebin(arena, acf)?;
            self.reduce_radially(arena, em2d, acf2d)?
        };

        // 2. Coarse emission image
        let fov = self.coarse_fov(g.axes.planes_in(0));
        let params = OsemParams { iterations: c.iterations, subsets: c.subsets, beta: 0.0 };
        let mut activity = services.osem.reconstruct(arena, &em2d, &acf2d, &fov, &params)?;
        drop((em2d, acf2d));
        if activity.fov.n != fov.n { return Err(RebinError::ImageSize(activity.fov.n, fov.n).into()) }
        smooth_image(arena, &mut activity, c.smoothing)?;
        for v in activity.data_mut() { *v = v.max(0.0) }
        let voxel_volume: f32 = fov.voxel_size.iter().product();
        activity.scale(c.emission_scale / voxel_volume);

        // 3. u-map on the same grid
        let coarse_umap = resample_image(arena, umap, &fov)?;

        // 4. Simulation and interpolation to full resolution
        let sampling = [
            Sampling::spanning(g.bins,             c.radial_step),
            Sampling::spanning(g.angles,           c.angular_step),
            Sampling::spanning(g.axes.planes_in(0), c.axial_step),
        ];
        let grid = self.grid(&g, &sampling);
        let coarse = services.simulator.simulate(arena, &activity, &coarse_umap, &grid)?;
        if coarse.len() != grid.len() {
            return Err(Error::Engine(format!("scatter simulation returned {} values for {} LORs", coarse.len(), grid.len())))
        }
        drop((activity, coarse_umap));
        let mut scatter = self.upsample(arena, &coarse, &sampling, &g)?;

        // 5. Calibration against the measured tails
        let mut table = ScaleFactorTable::compute(&scatter, emission, acf, c.skip_outer_planes, &c.scale);
        table.smooth(&g.axes, c.scale.boxcar_width);
        log::debug!("scatter scale factors: {:?}", table.factors());

        // 6.
        table.apply(&mut scatter);
        let total = emission.sum();
        let fraction = if total > 0.0 { scatter.sum() / total } else { 0.0 };
        log::info!("scatter fraction {:.2}%", 100.0 * fraction);
        if let Some(dir) = &c.qc {
            qc::write_profiles(dir, emission, &scatter)?;
        }
        Ok(scatter)
    }

    fn reduce_radially(&self, arena: &BufferArena, em: Sinogram, acf: Sinogram) -> Result<(Sinogram, Sinogram)> {
        let factor = self.config.radial_rebin_factor;
        let g = &em.geometry;
        if factor <= 1 || g.bins / factor == 0 { return Ok((em, acf)) }
        let reduce = |s: &Sinogram, preserve_values| {
            let plan = RebinPlan::new(g.bins, g.angles, g.bins / factor, g.angles, preserve_values);
            Rebinner::with_pool(plan, self.pool(), self.config.max_threads)?.rebin_sinogram(arena, s, None)
        };
        Ok((reduce(&em, false)?, reduce(&acf, true)?))
    }

    /// Image grid of the 2D reconstruction: the transaxial field of view of
    /// the sinogram, one slice per direct plane
    fn coarse_fov(&self, direct: usize) -> Fov {
        let c = &self.config;
        let width = c.radial_bins as f32 * mm_(c.bin_size);
        let voxel = width / c.image_size.max(1) as f32;
        Fov::new([c.image_size, c.image_size, direct], [voxel, voxel, mm_(c.plane_separation)])
    }

    fn grid(&self, g: &SinogramGeometry, [radial, angular, axial]: &[Sampling; 3]) -> ScatterGrid {
        let bin = g.bin_size_mm();
        let sep = mm_(g.plane_separation);
        let direct = g.axes.planes_in(0) as f32;
        ScatterGrid {
            radial_mm:  radial .positions().map(|r| (r as f32 - g.bins as f32 / 2.0) * bin).collect(),
            angles_rad: angular.positions().map(|a| a as f32 * std::f32::consts::PI / g.angles as f32).collect(),
            axial_mm:   axial  .positions().map(|p| (p as f32 - (direct - 1.0) / 2.0) * sep).collect(),
            detector_area_mm2: bin * sep,
        }
    }

    /// Interpolate the coarse simulation to every direct plane with
    /// b-splines, then fill oblique planes from the direct planes at the
    /// same axial position.
    fn upsample(&self, arena: &BufferArena, coarse: &[f32], sampling: &[Sampling; 3], g: &SinogramGeometry) -> Result<Sinogram> {
        let pad = self.config.spline_pad;
        let direct = g.axes.planes_in(0);
        let [radial, angular, axial] = sampling;
        let radial_t = radial.spline(g.bins, pad)?.transpose();
        let angular  = angular.spline(g.angles, pad)?;
        let axial    = axial.spline(direct, pad)?;
        let (nr, na) = (radial_t.rows(), angular.columns());

        let planes: Vec<Matrix<f64>> = coarse.chunks(na * nr)
            .map(|c| {
                let samples = Matrix::from_vec(na, nr, c.iter().map(|&x| x as f64).collect());
                &(&angular * &samples) * &radial_t
            })
            .collect();

        let len = g.plane_len();
        let mut stack = arena.create(direct * len, "direct-plane scatter")?;
        for (p, out) in stack.chunks_mut(len).enumerate() {
            for (k, plane) in planes.iter().enumerate() {
                let w = axial[(p, k)];
                if w == 0.0 { continue }
                for a in 0..g.angles {
                    for (o, v) in out[a * g.bins .. (a + 1) * g.bins].iter_mut().zip(plane.row(a)) {
                        *o += (w * v) as f32;
                    }
                }
            }
        }
        for v in stack.iter_mut() { *v = v.max(0.0) }

        let mut scatter = Sinogram::zeros(arena, g.clone(), "scatter estimate")?;
        let direct_positions: Vec<f32> = (0..direct).map(|p| p as f32).collect();
        for axis in 0..g.axes.len() {
            let range = g.axes.plane_range(axis);
            let positions: Vec<f32> = (0..range.len()).map(|p| g.axes.axial_position(axis, p)).collect();
            let planes = interpol(&positions, &direct_positions, len, &stack);
            scatter.data_mut()[range.start * len .. range.end * len].copy_from_slice(&planes);
        }
        Ok(scatter)
    }
}

/// Resample `image` onto `fov`, both centred on the scanner axis: bilinear
/// in each slice (voxels outside the source are zero), then linear between
/// slices (positions beyond the source take its end slices).
pub fn resample_image(arena: &BufferArena, image: &Image, fov: &Fov) -> Result<Image> {
    let src = &image.fov;
    let [nx, ny, nz] = src.n;
    let slice_len = fov.voxels_per_slice();
    let mut slices = arena.create(nz * slice_len, "in-plane resampled image")?;
    let sample = |z: usize, x: f32, y: f32| -> f32 {
        if x < -0.5 || y < -0.5 || x > nx as f32 - 0.5 || y > ny as f32 - 0.5 { return 0.0 }
        let (x, y) = (x.clamp(0.0, (nx - 1) as f32), y.clamp(0.0, (ny - 1) as f32));
        let (x0, y0) = (x.floor() as usize, y.floor() as usize);
        let (x1, y1) = ((x0 + 1).min(nx - 1), (y0 + 1).min(ny - 1));
        let (tx, ty) = (x - x0 as f32, y - y0 as f32);
        let v = |x, y| image[[x, y, z]];
        (1.0 - ty) * ((1.0 - tx) * v(x0, y0) + tx * v(x1, y0))
            +  ty  * ((1.0 - tx) * v(x0, y1) + tx * v(x1, y1))
    };
    for (z, slice) in slices.chunks_mut(slice_len).enumerate() {
        for (i, out) in slice.iter_mut().enumerate() {
            let [x, y, _] = fov.voxel_centre1(i);
            let [vx, vy, _] = src.voxel_coordinates([x, y, 0.0]);
            *out = sample(z, vx, vy);
        }
    }
    let source_z: Vec<f32> = (0..nz).map(|z| src.voxel_centre([0, 0, z])[2]).collect();
    let target_z: Vec<f32> = (0..fov.n[2]).map(|z| fov.voxel_centre([0, 0, z])[2]).collect();
    let data = interpol(&target_z, &source_z, slice_len, &slices);
    Image::from_buffer(*fov, arena.adopt(data, "resampled image")?)
}

#[cfg(test)]
mod test {
    use super::*;
    use float_eq::assert_float_eq;
    use rstest::rstest;
    use units::mm;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    fn config(angles: usize, subsets: usize) -> ScatterConfig {
        let mut c = ScatterConfig::new(16, mm(4.0), angles, vec![5, 3, 3], 8, mm(4.0));
        c.subsets = subsets;
        c
    }

    #[rstest(/**/ angles, requested, expected,
             case(12, 8, 6),
             case(12, 12, 12),
             case(7, 4, 1),
             case(16, 0, 1),
    )]
    fn subsets_divide_angles(angles: usize, requested: usize, expected: usize) {
        assert_eq!(ScatterEstimator::new(config(angles, requested)).unwrap().config().subsets, expected);
    }

    #[rstest(/**/ elements, step, expected,
             case(16, 4, Sampling { samples: 4, interval: 4, offset: 1 }),
             case(17, 4, Sampling { samples: 5, interval: 4, offset: 0 }),
             case(5, 20, Sampling { samples: 2, interval: 4, offset: 0 }),
             case(1, 4, Sampling { samples: 1, interval: 1, offset: 0 }),
    )]
    fn sampling_spans_the_axis(elements: usize, step: usize, expected: Sampling) {
        let s = Sampling::spanning(elements, step);
        assert_eq!(s, expected);
        assert!(s.spline(elements, 2).is_ok());
    }

    #[test]
    fn upsampling_constant_simulation_is_constant() {
        let arena = BufferArena::new();
        let c = config(16, 4);
        let g = c.geometry();
        let estimator = ScatterEstimator::new(c).unwrap();
        let sampling = [Sampling::spanning(16, 5), Sampling::spanning(16, 5), Sampling::spanning(5, 2)];
        let n: usize = sampling.iter().map(|s| s.samples).product();
        let scatter = estimator.upsample(&arena, &vec![2.0; n], &sampling, &g).unwrap();
        assert_eq!(scatter.geometry, g);
        for &v in scatter.data() { assert_float_eq!(v, 2.0, abs <= 1e-4) }
        assert_eq!(arena.live_buffers(), 1);
    }

    #[test]
    fn grid_is_centred() {
        let c = config(16, 4);
        let g = c.geometry();
        let estimator = ScatterEstimator::new(c).unwrap();
        let sampling = [Sampling::spanning(16, 4), Sampling::spanning(16, 4), Sampling::spanning(5, 2)];
        let grid = estimator.grid(&g, &sampling);
        assert_eq!(grid.radial_mm, vec![-28.0, -12.0, 4.0, 20.0]);
        assert_eq!(grid.axial_mm, vec![-8.0, 0.0, 8.0]);
        let pi = std::f32::consts::PI;
        assert_float_eq!(grid.angles_rad[0],       pi / 16.0, ulps <= 1);
        assert_float_eq!(grid.angles_rad[1], 5.0 * pi / 16.0, ulps <= 1);
    }

    #[test]
    fn resampling_keeps_uniform_interior() {
        let arena = BufferArena::new();
        let mut umap = Image::zeros(&arena, Fov::isotropic([20, 20, 6], 2.0), "umap").unwrap();
        for v in umap.data_mut() { *v = 0.096 }
        let target = Fov::new([8, 8, 3], [4.0, 4.0, 4.0]);
        let coarse = resample_image(&arena, &umap, &target).unwrap();
        assert_eq!(coarse.fov, target);
        for &v in coarse.data() { assert_float_eq!(v, 0.096, abs <= 1e-6) }
    }

    #[test]
    fn resampling_zero_fills_outside_the_source() {
        let arena = BufferArena::new();
        let mut umap = Image::zeros(&arena, Fov::isotropic([4, 4, 1], 2.0), "umap").unwrap();
        for v in umap.data_mut() { *v = 1.0 }
        let target = Fov::new([8, 8, 1], [2.0, 2.0, 2.0]);
        let big = resample_image(&arena, &umap, &target).unwrap();
        assert_eq!(big[[0, 0, 0]], 0.0);
        assert_eq!(big[[4, 4, 0]], 1.0);
    }
}
