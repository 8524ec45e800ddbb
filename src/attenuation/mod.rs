//! Attenuation map (u-map) reconstruction from blank and transmission scans.
//!
//! Without an intensity prior (`alpha == 0`) the log ratio of blank to
//! transmission counts is reconstructed by plain OSEM. Otherwise blank and
//! transmission are normalised and handed to a regularized transmission
//! reconstruction. Either way the image is finally converted to 1/cm.

pub mod deadtime;

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Deserialize;
use units::cm_;

use crate::arena::BufferArena;
use crate::engines::{MapTrEngine, MapTrParams, OsemEngine, OsemParams, Prior, Segmentation};
use crate::error::{RebinError, Result};
use crate::fov::Fov;
use crate::image::Image;
use crate::io::qc::write_histograms;
use crate::rebin::{worker_pool, RebinPlan, Rebinner};
use crate::scatter::default_threads;
use crate::sinogram::Sinogram;
use crate::types::Ratiof32;

use deadtime::{dead_time_correction, DeadtimeConfig};

/// Amplification of the log ratio fed to unregularized OSEM
pub const DEFAULT_STRETCH_FACTOR: Ratiof32 = 1.5;
/// Width of the band of outermost radial bins, on each side, assumed to be
/// free of patient and bed
pub const UNDER_BED_BINS: usize = 8;
pub const DEFAULT_HISTOGRAM_BINS: usize = 100;

/// The `[attenuation]` configuration section; missing keys take their
/// defaults
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttenuationConfig {
    pub iterations: usize,
    pub subsets: usize,
    pub beta: Ratiof32,
    /// Weight of the intensity prior; zero selects unregularized OSEM
    pub alpha: Ratiof32,
    /// Gaussian rather than Geman-McClure smoothing prior
    pub gaussian_smoothing: bool,
    pub segmentation: Segmentation,

    pub stretch_factor: Ratiof32,
    pub scaling_factor: Ratiof32,
    pub radial_rebin: usize,
    pub angular_rebin: usize,
    /// Zero the first and last image planes
    pub cut_border_planes: bool,
    /// Transmission to blank scan duration; estimated under the bed if absent
    pub blank_factor: Option<Ratiof32>,
    pub under_bed_bins: usize,
    pub deadtime: Option<DeadtimeConfig>,

    /// Pre- and post-segmentation histogram output
    pub histogram: Option<PathBuf>,
    pub histogram_bins: usize,
    pub max_threads: usize,
}

impl Default for AttenuationConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            subsets: 8,
            beta: 0.0,
            alpha: 0.0,
            gaussian_smoothing: true,
            segmentation: Segmentation::default(),
            stretch_factor: DEFAULT_STRETCH_FACTOR,
            scaling_factor: 1.0,
            radial_rebin: 1,
            angular_rebin: 1,
            cut_border_planes: false,
            blank_factor: None,
            under_bed_bins: UNDER_BED_BINS,
            deadtime: None,
            histogram: None,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            max_threads: default_threads(),
        }
    }
}

/// Stretched log ratio of one blank / transmission bin pair, never negative
#[inline]
pub fn ratio_value(blank: f32, tx: f32, blank_factor: Ratiof32, stretch: Ratiof32) -> f32 {
    let bl = blank.max(1.0) * blank_factor;
    if tx < 1.0      { bl.ln().max(0.0) }
    else if bl <= tx { 0.0 }
    else             { stretch * (bl / tx).ln() }
}

pub fn calc_ratio(
    arena: &BufferArena,
    blank: &Sinogram,
    tx: &Sinogram,
    blank_factor: Ratiof32,
    stretch: Ratiof32,
) -> Result<Sinogram> {
    blank.geometry.check_same_shape(&tx.geometry)?;
    let mut ratio = Sinogram::zeros(arena, blank.geometry.clone(), "attenuation ratio")?;
    ratio.data_mut().par_iter_mut()
        .zip(blank.data().par_iter().zip(tx.data()))
        .for_each(|(r, (&b, &t))| *r = ratio_value(b, t, blank_factor, stretch));
    Ok(ratio)
}

/// Scale each plane of both scans so that the central radial bin of the
/// blank sums to the number of angles
pub fn normalize_blank_tx(blank: &mut Sinogram, tx: &mut Sinogram) -> Result<()> {
    blank.geometry.check_same_shape(&tx.geometry)?;
    let g = blank.geometry.clone();
    let (centre, len) = (g.bins / 2, g.plane_len());
    let blank_planes = blank.data_mut().chunks_mut(len);
    let tx_planes = tx.data_mut().chunks_mut(len);
    for (b, t) in blank_planes.zip(tx_planes) {
        let central: f64 = b.chunks(g.bins).map(|row| row[centre] as f64).sum();
        let factor = if central > 0.0 { (g.angles as f64 / central) as f32 } else { 1.0 };
        for v in b.iter_mut().chain(t.iter_mut()) { *v *= factor }
    }
    Ok(())
}

/// Total counts in the `width` outermost radial bins on both edges
pub fn sum_counts_under_bed(sinogram: &Sinogram, width: usize) -> f64 {
    let bins = sinogram.geometry.bins;
    let width = width.min(bins / 2);
    sinogram.data().chunks(bins)
        .map(|row| row[..width].iter().chain(&row[bins - width..]).map(|&x| x as f64).sum::<f64>())
        .sum()
}

/// Ratio of transmission to blank counts under the bed, 1 when the blank
/// has none
pub fn estimate_blank_factor(blank: &Sinogram, tx: &Sinogram, width: usize) -> Ratiof32 {
    let b = sum_counts_under_bed(blank, width);
    if b > 0.0 { (sum_counts_under_bed(tx, width) / b) as f32 } else { 1.0 }
}

/// External reconstruction engines for the two branches
#[derive(Clone, Copy)]
pub struct AttenuationEngines<'a> {
    pub osem: &'a dyn OsemEngine,
    pub map_tr: &'a dyn MapTrEngine,
}

pub struct AttenuationReconstructor {
    config: AttenuationConfig,
    pool: Arc<rayon::ThreadPool>,
}

impl AttenuationReconstructor {

    /// Builds a pool of `config.max_threads` workers, reused by every call
    /// to [`reconstruct`](Self::reconstruct)
    pub fn new(config: AttenuationConfig) -> Result<Self> {
        let pool = worker_pool(config.max_threads)?;
        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: AttenuationConfig, pool: Arc<rayon::ThreadPool>) -> Self { Self { config, pool } }

    pub fn pool(&self) -> Arc<rayon::ThreadPool> { Arc::clone(&self.pool) }

    pub fn config(&self) -> &AttenuationConfig { &self.config }

    /// u-map in 1/cm on `fov`. `tx_singles` is the singles count of the
    /// transmission scan, needed for deadtime correction of the blank.
    ///
    /// Runs on the reconstructor's pool, engines included.
    pub fn reconstruct(
        &self,
        arena: &BufferArena,
        engines: AttenuationEngines,
        blank: &Sinogram,
        tx: &Sinogram,
        fov: &Fov,
        tx_singles: Option<f64>,
    ) -> Result<Image> {
        self.pool.install(|| self.reconstruct_in_pool(arena, engines, blank, tx, fov, tx_singles))
    }

    fn reconstruct_in_pool(
        &self,
        arena: &BufferArena,
        engines: AttenuationEngines,
        blank: &Sinogram,
        tx: &Sinogram,
        fov: &Fov,
        tx_singles: Option<f64>,
    ) -> Result<Image> {
        let c = &self.config;
        blank.geometry.check_same_shape(&tx.geometry)?;
        let bin_size = blank.geometry.bin_size;
        let radial_rebin  = c.radial_rebin .max(1);
        let angular_rebin = c.angular_rebin.max(1);

        let (mut blank, mut tx) = if radial_rebin == 1 && angular_rebin == 1 {
            (blank.try_clone(arena, "blank")?, tx.try_clone(arena, "transmission")?)
        } else {
            let g = &blank.geometry;
            let plan = RebinPlan::new(g.bins, g.angles, g.bins / radial_rebin, g.angles / angular_rebin, false);
            log::debug!("rebinning blank and transmission to {} x {}", plan.new_height, plan.new_width);
            let rebinner = Rebinner::with_pool(plan, self.pool(), c.max_threads)?;
            (rebinner.rebin_sinogram(arena, blank, None)?, rebinner.rebin_sinogram(arena, tx, None)?)
        };

        if let Some(DeadtimeConfig { database, frames }) = &c.deadtime {
            match tx_singles {
                Some(singles) => {
                    let g = &blank.geometry;
                    dead_time_correction(singles, database, *frames, g.planes(), g.bins)?.apply(&mut blank)?;
                },
                None => log::warn!("no transmission singles count: blank not corrected for deadtime"),
            }
        }

        let blank_factor = c.blank_factor.unwrap_or_else(|| {
            estimate_blank_factor(&blank, &tx, (c.under_bed_bins / radial_rebin).max(1))
        });
        log::info!("blank factor {blank_factor:.4}");

        let mut image = if c.alpha == 0.0 {
            let ratio = calc_ratio(arena, &blank, &tx, blank_factor, c.stretch_factor)?;
            drop((blank, tx));
            let params = OsemParams { iterations: c.iterations, subsets: c.subsets, beta: c.beta };
            engines.osem.reconstruct(arena, &ratio, fov, &params)?
        } else {
            for v in blank.data_mut() { *v *= blank_factor }
            normalize_blank_tx(&mut blank, &mut tx)?;
            let params = MapTrParams {
                iterations: c.iterations,
                subsets: c.subsets,
                beta: c.beta,
                alpha: c.alpha,
                prior: if c.gaussian_smoothing { Prior::Gaussian } else { Prior::GemanMcClure },
                segmentation: &c.segmentation,
            };
            engines.map_tr.reconstruct(arena, &blank, &tx, fov, &params)?
        };
        if image.fov.n != fov.n { return Err(RebinError::ImageSize(image.fov.n, fov.n).into()) }

        let nz = fov.n[2];
        if c.cut_border_planes && nz > 0 {
            image.slice_mut(0).fill(0.0);
            image.slice_mut(nz - 1).fill(0.0);
        }

        let per_cm = cm_(bin_size) * radial_rebin as f32;
        image.scale(if per_cm > 0.0 { c.scaling_factor / per_cm } else { 1.0 });

        if let Some(path) = &c.histogram {
            let segmented: Vec<f32> = image.data().iter().map(|&mu| c.segmentation.classify(mu)).collect();
            write_histograms(path, "mu[1/cm] before after segmentation", image.data(), &segmented, c.histogram_bins.max(1))?;
        }
        Ok(image)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;
    use crate::sinogram::SinogramGeometry;
    use float_eq::assert_float_eq;
    use proptest::prelude::*;
    use rstest::rstest;
    use units::mm;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    const LN2: f32 = std::f32::consts::LN_2;

    fn filled(arena: &BufferArena, g: &SinogramGeometry, value: f32) -> Sinogram {
        let mut s = Sinogram::zeros(arena, g.clone(), "test").unwrap();
        s.data_mut().fill(value);
        s
    }

    /// Image uniformly filled with the mean of the sinogram
    #[derive(Default)]
    struct MeanOsem { seen: Mutex<Vec<[usize; 2]>>, threads: Mutex<Option<usize>> }

    impl OsemEngine for MeanOsem {
        fn reconstruct(&self, arena: &BufferArena, s: &Sinogram, fov: &Fov, _: &OsemParams) -> Result<Image> {
            self.seen.lock().unwrap().push(s.geometry.plane_dims());
            *self.threads.lock().unwrap() = Some(rayon::current_num_threads());
            let mut image = Image::zeros(arena, *fov, "mock osem")?;
            image.data_mut().fill((s.sum() / s.data().len() as f64) as f32);
            Ok(image)
        }
    }

    /// Image uniformly filled with the blank / tx count ratio
    #[derive(Default)]
    struct RatioMapTr { prior: Mutex<Option<Prior>> }

    impl MapTrEngine for RatioMapTr {
        fn reconstruct(&self, arena: &BufferArena, blank: &Sinogram, tx: &Sinogram, fov: &Fov, p: &MapTrParams) -> Result<Image> {
            *self.prior.lock().unwrap() = Some(p.prior);
            let mut image = Image::zeros(arena, *fov, "mock map-tr")?;
            image.data_mut().fill((blank.sum() / tx.sum()) as f32);
            Ok(image)
        }
    }

    fn geometry() -> SinogramGeometry { SinogramGeometry::new(8, 4, mm(5.0), vec![3], mm(2.0)) }
    fn fov() -> Fov { Fov::isotropic([4, 4, 3], 2.0) }

    #[rstest(/**/ blank, tx, factor, expected,
             case(  0.0,   0.0, 1.0, 0.0),
             case(100.0,   0.5, 1.0, 100_f32.ln()),
             case( 50.0, 100.0, 1.0, 0.0),
             case(100.0, 100.0, 1.0, 0.0),
             case(100.0,  50.0, 1.0, 1.5 * LN2),
             case(100.0,  50.0, 2.0, 1.5 * 2.0 * LN2),
             case(  0.5,   0.0, 0.5, 0.0),
    )]
    fn ratio_cases(blank: f32, tx: f32, factor: f32, expected: f32) {
        assert_float_eq!(ratio_value(blank, tx, factor, DEFAULT_STRETCH_FACTOR), expected, abs <= 1e-5);
    }

    proptest! {
        #[test]
        fn ratio_is_non_negative(blank in 0.0_f32..1e6, tx in 0.0_f32..1e6, factor in 0.01_f32..10.0) {
            prop_assert!(ratio_value(blank, tx, factor, DEFAULT_STRETCH_FACTOR) >= 0.0);
        }

        #[test]
        fn ratio_falls_as_transmission_rises(blank in 0.0_f32..1e6, a in 1.0_f32..1e6, b in 1.0_f32..1e6) {
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            let r = |tx| ratio_value(blank, tx, 1.0, DEFAULT_STRETCH_FACTOR);
            prop_assert!(r(lo) >= r(hi));
        }

        #[test]
        fn ratio_rises_with_blank(
            tx in prop_oneof![0.0_f32..1.0, 1.0_f32..1e6],
            a in 0.0_f32..1e6,
            b in 0.0_f32..1e6,
            factor in 0.01_f32..10.0,
        ) {
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            let r = |blank| ratio_value(blank, tx, factor, DEFAULT_STRETCH_FACTOR);
            prop_assert!(r(lo) <= r(hi));
        }
    }

    #[test]
    fn normalization_fixes_central_bin_sum() {
        let arena = BufferArena::new();
        let g = geometry();
        let mut blank = filled(&arena, &g, 0.0);
        let mut tx = filled(&arena, &g, 6.0);
        for (i, v) in blank.data_mut().iter_mut().enumerate() { *v = 1.0 + (i % 13) as f32 }
        normalize_blank_tx(&mut blank, &mut tx).unwrap();
        for p in 0..3 {
            let central: f32 = blank.plane(p).column(4).sum();
            assert_float_eq!(central, 4.0, abs <= 1e-5);
        }
        // Transmission planes scaled by the same factors
        let first_tx = tx.view()[[0, 0, 0]];
        assert!(tx.plane(0).iter().all(|&v| v == first_tx));
    }

    #[test]
    fn empty_central_bin_leaves_planes_alone() {
        let arena = BufferArena::new();
        let mut blank = filled(&arena, &geometry(), 0.0);
        let mut tx = filled(&arena, &geometry(), 3.0);
        normalize_blank_tx(&mut blank, &mut tx).unwrap();
        assert!(tx.data().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn under_bed_band_on_both_edges() {
        let arena = BufferArena::new();
        let g = SinogramGeometry::new(8, 2, mm(5.0), vec![1], mm(2.0));
        let mut s = filled(&arena, &g, 0.0);
        for (i, v) in s.data_mut().iter_mut().enumerate() { *v = (i % 8) as f32 }
        // Bins 0, 1, 6 and 7 of both angles
        assert_eq!(sum_counts_under_bed(&s, 2), 2.0 * 14.0);
        // Band wider than half the row is clamped
        assert_eq!(sum_counts_under_bed(&s, 9), 2.0 * 28.0);
    }

    #[test]
    fn blank_factor_from_tails() {
        let arena = BufferArena::new();
        let g = geometry();
        let blank = filled(&arena, &g, 200.0);
        let tx = filled(&arena, &g, 50.0);
        assert_float_eq!(estimate_blank_factor(&blank, &tx, 2), 0.25, abs <= 1e-6);
        let empty = filled(&arena, &g, 0.0);
        assert_eq!(estimate_blank_factor(&empty, &tx, 2), 1.0);
    }

    #[test]
    fn blank_factor_from_bands_under_the_bed() -> Result<()> {
        let (c_blank, c_tx) = (200.0, 50.0);
        let arena = BufferArena::new();
        let g = SinogramGeometry::new(32, 4, mm(5.0), vec![3], mm(2.0));
        let band = |c: f32| {
            let mut s = filled(&arena, &g, 0.0);
            for (i, v) in s.data_mut().iter_mut().enumerate() {
                let r = i % g.bins;
                if r < 8 || r >= g.bins - 8 { *v = c }
            }
            s
        };
        let (blank, tx) = (band(c_blank), band(c_tx));
        // Eight bins on each edge before rebinning, four after
        assert_float_eq!(estimate_blank_factor(&blank, &tx, 8), c_tx / c_blank, abs <= 1e-6);

        // The MAP-TR mock returns blank / tx: exactly 1 once the blank has
        // been scaled by the estimated factor
        let config = AttenuationConfig { alpha: 0.5, radial_rebin: 2, max_threads: 2, ..Default::default() };
        let (osem, map_tr) = (MeanOsem::default(), RatioMapTr::default());
        let engines = AttenuationEngines { osem: &osem, map_tr: &map_tr };
        let umap = AttenuationReconstructor::new(config)?.reconstruct(&arena, engines, &blank, &tx, &fov(), None)?;
        // 1 / (0.5 cm bins x 2)
        for &v in umap.data() { assert_float_eq!(v, 1.0, abs <= 1e-5) }
        Ok(())
    }

    #[test]
    fn engines_run_on_the_reconstructor_pool() -> Result<()> {
        let arena = BufferArena::new();
        let g = geometry();
        let (blank, tx) = (filled(&arena, &g, 100.0), filled(&arena, &g, 50.0));
        let config = AttenuationConfig { blank_factor: Some(1.0), radial_rebin: 2, max_threads: 3, ..Default::default() };
        let (osem, map_tr) = (MeanOsem::default(), RatioMapTr::default());
        let engines = AttenuationEngines { osem: &osem, map_tr: &map_tr };

        let reconstructor = AttenuationReconstructor::new(config)?;
        let pool = reconstructor.pool();
        assert_eq!(pool.current_num_threads(), 3);
        for _ in 0..2 {
            reconstructor.reconstruct(&arena, engines, &blank, &tx, &fov(), None)?;
            assert_eq!(*osem.threads.lock().unwrap(), Some(3));
        }
        let shared = AttenuationReconstructor::with_pool(reconstructor.config().clone(), Arc::clone(&pool));
        assert!(Arc::ptr_eq(&shared.pool(), &pool));
        Ok(())
    }

    #[test]
    fn osem_branch() -> Result<()> {
        let arena = BufferArena::new();
        let g = geometry();
        let (blank, tx) = (filled(&arena, &g, 100.0), filled(&arena, &g, 50.0));
        let config = AttenuationConfig { blank_factor: Some(1.0), cut_border_planes: true, max_threads: 2, ..Default::default() };
        let (osem, map_tr) = (MeanOsem::default(), RatioMapTr::default());
        let engines = AttenuationEngines { osem: &osem, map_tr: &map_tr };

        let umap = AttenuationReconstructor::new(config)?.reconstruct(&arena, engines, &blank, &tx, &fov(), None)?;
        // 1 / (0.5 cm bins)
        let expected = 2.0 * 1.5 * LN2;
        assert!(umap.slice(0).iter().chain(umap.slice(2)).all(|&v| v == 0.0));
        for &v in umap.slice(1) { assert_float_eq!(v, expected, abs <= 1e-5) }
        assert!(map_tr.prior.lock().unwrap().is_none());
        drop(umap);
        assert_eq!(arena.live_buffers(), 2);
        Ok(())
    }

    #[test]
    fn radial_rebinning_before_osem() -> Result<()> {
        let arena = BufferArena::new();
        let g = geometry();
        let (blank, tx) = (filled(&arena, &g, 100.0), filled(&arena, &g, 50.0));
        let config = AttenuationConfig { blank_factor: Some(1.0), radial_rebin: 2, max_threads: 2, ..Default::default() };
        let (osem, map_tr) = (MeanOsem::default(), RatioMapTr::default());
        let engines = AttenuationEngines { osem: &osem, map_tr: &map_tr };

        let umap = AttenuationReconstructor::new(config)?.reconstruct(&arena, engines, &blank, &tx, &fov(), None)?;
        assert_eq!(*osem.seen.lock().unwrap(), vec![[4, 4]]);
        // Bins twice as wide: 1 / (0.5 cm * 2)
        for &v in umap.data() { assert_float_eq!(v, 1.5 * LN2, abs <= 1e-5) }
        Ok(())
    }

    #[rstest(/**/ gaussian, prior,
             case(true,  Prior::Gaussian),
             case(false, Prior::GemanMcClure),
    )]
    fn map_tr_branch(gaussian: bool, prior: Prior) {
        let arena = BufferArena::new();
        let g = geometry();
        let (blank, tx) = (filled(&arena, &g, 100.0), filled(&arena, &g, 50.0));
        let config = AttenuationConfig { alpha: 0.5, gaussian_smoothing: gaussian, max_threads: 1, ..Default::default() };
        let (osem, map_tr) = (MeanOsem::default(), RatioMapTr::default());
        let engines = AttenuationEngines { osem: &osem, map_tr: &map_tr };

        let umap = AttenuationReconstructor::new(config).unwrap().reconstruct(&arena, engines, &blank, &tx, &fov(), None).unwrap();
        assert_eq!(*map_tr.prior.lock().unwrap(), Some(prior));
        assert!(osem.seen.lock().unwrap().is_empty());
        // Blank scaled by the under-bed factor 0.5 matches the transmission
        for &v in umap.data() { assert_float_eq!(v, 2.0, abs <= 1e-4) }
    }

    #[test]
    fn wrong_image_size_is_an_error() {
        struct Tiny;
        impl OsemEngine for Tiny {
            fn reconstruct(&self, arena: &BufferArena, _: &Sinogram, _: &Fov, _: &OsemParams) -> Result<Image> {
                Image::zeros(arena, Fov::isotropic([1, 1, 1], 2.0), "tiny")
            }
        }
        let arena = BufferArena::new();
        let g = geometry();
        let (blank, tx) = (filled(&arena, &g, 100.0), filled(&arena, &g, 50.0));
        let map_tr = RatioMapTr::default();
        let engines = AttenuationEngines { osem: &Tiny, map_tr: &map_tr };
        let result = AttenuationReconstructor::new(AttenuationConfig::default()).unwrap()
            .reconstruct(&arena, engines, &blank, &tx, &fov(), None);
        assert!(matches!(result, Err(crate::Error::Rebin(RebinError::ImageSize(..)))));
    }

    #[test]
    fn segmentation_histogram_is_written() -> Result<()> {
        let arena = BufferArena::new();
        let g = geometry();
        let (blank, tx) = (filled(&arena, &g, 100.0), filled(&arena, &g, 50.0));
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("umap_histogram.dat");
        let config = AttenuationConfig { histogram: Some(path.clone()), histogram_bins: 10, max_threads: 1, ..Default::default() };
        let (osem, map_tr) = (MeanOsem::default(), RatioMapTr::default());
        let engines = AttenuationEngines { osem: &osem, map_tr: &map_tr };
        AttenuationReconstructor::new(config)?.reconstruct(&arena, engines, &blank, &tx, &fov(), None)?;
        let text = std::fs::read_to_string(path)?;
        assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 10);
        Ok(())
    }
}
