//! Single-scatter simulation.
//!
//! For every line of response (LOR) of a coarse sinogram grid, the scatter
//! contribution is accumulated over a random sample of scatter points inside
//! the attenuating object: the annihilation photon pair is emitted along the
//! path from one detector to the scatter point, one photon Compton-scatters
//! there into the other detector. Each path contributes its emission line
//! integral, weighted by the Klein-Nishina cross section, the survival
//! probabilities of both photons and the probability that their energies
//! fall inside the acquisition window.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use scilib::math::basic::erf;

use crate::arena::BufferArena;
use crate::engines::ScatterSimulator;
use crate::error::{RebinError, Result};
use crate::image::Image;
use crate::index::index1_to_3;
use crate::types::{Attenuationf32, Energyf32, Lengthf32, Ratiof32, ANNIHILATION_KEV};

// Empirical lower-level-discriminator corrections, keV
pub const GENERIC_LLD_OFFSET_KEV: Energyf32 = 0.0;
pub const HRRT_LLD_OFFSET_KEV:    Energyf32 = 25.0;
pub const ECAT_LLD_OFFSET_KEV:    Energyf32 = 10.0;

/// Scanner families whose discriminators are known to trigger away from
/// their nominal settings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScannerModel {
    #[default]
    Generic,
    Hrrt,
    Ecat,
}

impl ScannerModel {
    pub fn lld_offset_kev(self) -> Energyf32 {
        match self {
            ScannerModel::Generic => GENERIC_LLD_OFFSET_KEV,
            ScannerModel::Hrrt    => HRRT_LLD_OFFSET_KEV,
            ScannerModel::Ecat    => ECAT_LLD_OFFSET_KEV,
        }
    }
}

/// Acquisition energy window
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnergyWindow {
    pub lld_kev: Energyf32,
    pub uld_kev: Energyf32,
    /// FWHM energy resolution at 511 keV, as a fraction of 511 keV
    pub resolution: Ratiof32,
}

impl Default for EnergyWindow {
    fn default() -> Self { Self { lld_kev: 400.0, uld_kev: 650.0, resolution: 0.17 } }
}

impl EnergyWindow {
    /// Probability that a photon of energy `e` is detected inside
    /// `[lld + offset, uld]`. Resolution scales as `1/sqrt(E)`.
    pub fn efficiency(&self, e: Energyf32, lld_offset: Energyf32) -> Ratiof32 {
        let fwhm = self.resolution * (ANNIHILATION_KEV * e).sqrt();
        let sigma = (fwhm / 2.354_82) as f64;
        if !(sigma > 0.0) {
            let inside = e >= self.lld_kev + lld_offset && e <= self.uld_kev;
            return if inside { 1.0 } else { 0.0 }
        }
        let phi = |x: f32| 0.5 * (1.0 + erf((x - e) as f64 / (sigma * std::f64::consts::SQRT_2)));
        (phi(self.uld_kev) - phi(self.lld_kev + lld_offset)).max(0.0) as f32
    }
}

/// Energy of a 511 keV photon after Compton scattering through `cos_theta`
pub fn scattered_energy(cos_theta: f32) -> Energyf32 { ANNIHILATION_KEV / (2.0 - cos_theta) }

/// Total Klein-Nishina cross section at energy `e`, in units of the
/// classical electron radius squared
pub fn klein_nishina_total(e: Energyf32) -> f64 {
    let k = e as f64 / ANNIHILATION_KEV as f64;
    let l = (1.0 + 2.0 * k).ln();
    2.0 * std::f64::consts::PI * (
        (1.0 + k) / (k * k) * (2.0 * (1.0 + k) / (1.0 + 2.0 * k) - l / k)
            + l / (2.0 * k)
            - (1.0 + 3.0 * k) / ((1.0 + 2.0 * k) * (1.0 + 2.0 * k))
    )
}

/// Klein-Nishina differential cross section of 511 keV photons, normalised
/// to the total cross section (1/sr), tabulated uniformly over cos(theta)
#[derive(Clone, Debug)]
pub struct KleinNishinaTable {
    values: Vec<f32>,
}

impl KleinNishinaTable {

    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        let differential = |c: f64| {
            let p = 1.0 / (2.0 - c);
            0.5 * p * p * (p + 1.0 / p - (1.0 - c * c))
        };
        let total = klein_nishina_total(ANNIHILATION_KEV);
        let values = (0..size)
            .map(|i| -1.0 + 2.0 * i as f64 / (size - 1) as f64)
            .map(|c| (differential(c) / total) as f32)
            .collect();
        Self { values }
    }

    pub fn lookup(&self, cos_theta: f32) -> f32 {
        let n = self.values.len() - 1;
        let x = ((cos_theta.clamp(-1.0, 1.0) + 1.0) / 2.0) * n as f32;
        let i = (x.floor() as usize).min(n - 1);
        let t = x - i as f32;
        self.values[i] * (1.0 - t) + self.values[i + 1] * t
    }
}

/// Sampling of the coarse sinogram on which scatter is simulated. LOR
/// `(plane, angle, bin)` lies at axial position `axial_mm[plane]`, at
/// distance `radial_mm[bin]` from the axis, perpendicular to the direction
/// `angles_rad[angle]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterGrid {
    pub radial_mm: Vec<Lengthf32>,
    pub angles_rad: Vec<f32>,
    pub axial_mm: Vec<Lengthf32>,
    /// Sensitive area of one detector element
    pub detector_area_mm2: f32,
}

impl ScatterGrid {
    pub fn len(&self) -> usize { self.radial_mm.len() * self.angles_rad.len() * self.axial_mm.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

pub const DEFAULT_SCATTER_POINTS: usize = 400;
/// 1/cm; voxels below this are not considered as scatter sites
pub const DEFAULT_SCATTER_POINT_THRESHOLD: Attenuationf32 = 0.01;
pub const DEFAULT_DETECTOR_RADIUS: Lengthf32 = 400.0;
pub const DEFAULT_SEED: u64 = 0x5ca7;
const KLEIN_NISHINA_TABLE_SIZE: usize = 1001;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationSettings {
    #[serde(default = "default_points")]    pub scatter_points: usize,
    #[serde(default = "default_threshold")] pub point_threshold: Attenuationf32,
    /// mm; raised to clear the image if necessary
    #[serde(default = "default_radius")]    pub detector_radius: Lengthf32,
    #[serde(default = "default_seed")]      pub seed: u64,
}

fn default_points   () -> usize          { DEFAULT_SCATTER_POINTS }
fn default_threshold() -> Attenuationf32 { DEFAULT_SCATTER_POINT_THRESHOLD }
fn default_radius   () -> Lengthf32      { DEFAULT_DETECTOR_RADIUS }
fn default_seed     () -> u64            { DEFAULT_SEED }

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            scatter_points:  DEFAULT_SCATTER_POINTS,
            point_threshold: DEFAULT_SCATTER_POINT_THRESHOLD,
            detector_radius: DEFAULT_DETECTOR_RADIUS,
            seed:            DEFAULT_SEED,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ScatterPoint {
    position: [Lengthf32; 3],
    /// 1/mm
    mu: f32,
}

#[derive(Clone, Debug)]
pub struct SingleScatterSimulation {
    pub window: EnergyWindow,
    pub lld_offset_kev: Energyf32,
    pub settings: SimulationSettings,
    table: KleinNishinaTable,
}

impl SingleScatterSimulation {

    pub fn new(scanner: ScannerModel, window: EnergyWindow, settings: SimulationSettings) -> Self {
        Self::with_lld_offset(scanner.lld_offset_kev(), window, settings)
    }

    pub fn with_lld_offset(lld_offset_kev: Energyf32, window: EnergyWindow, settings: SimulationSettings) -> Self {
        Self { window, lld_offset_kev, settings, table: KleinNishinaTable::new(KLEIN_NISHINA_TABLE_SIZE) }
    }

    /// Random sample of scatter sites and the volume each one stands for
    fn scatter_points(&self, umap: &Image) -> (Vec<ScatterPoint>, f32) {
        let candidates: Vec<usize> = umap.data().iter().enumerate()
            .filter(|&(_, &mu)| mu >= self.settings.point_threshold)
            .map(|(i, _)| i)
            .collect();
        let n = self.settings.scatter_points;
        if candidates.is_empty() || n == 0 { return (vec![], 0.0) }

        let fov = &umap.fov;
        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let points = (0..n).map(|_| {
            let voxel = candidates[rng.gen_range(0..candidates.len())];
            let mut position = fov.voxel_centre(index1_to_3(voxel, fov.n));
            for (p, size) in position.iter_mut().zip(fov.voxel_size) {
                *p += (rng.gen::<f32>() - 0.5) * size;
            }
            ScatterPoint { position, mu: umap[voxel] / 10.0 }
        }).collect();
        let voxel_volume: f32 = fov.voxel_size.iter().product();
        (points, candidates.len() as f32 * voxel_volume / n as f32)
    }
}

impl ScatterSimulator for SingleScatterSimulation {

    fn simulate(&self, _arena: &BufferArena, emission: &Image, umap: &Image, grid: &ScatterGrid) -> Result<Vec<f32>> {
        if emission.fov.n != umap.fov.n {
            return Err(RebinError::ImageSize(emission.fov.n, umap.fov.n).into())
        }
        let (points, volume) = self.scatter_points(umap);
        log::debug!("simulating single scatter from {} points on {} LORs", points.len(), grid.len());
        if points.is_empty() { return Ok(vec![0.0; grid.len()]) }

        let [hx, hy, _] = umap.fov.full_size().map(|s| s / 2.0);
        let radius = self.settings.detector_radius.max((hx * hx + hy * hy).sqrt() * 1.01);
        let eff_511 = self.window.efficiency(ANNIHILATION_KEV, self.lld_offset_kev);
        let sigma_511 = klein_nishina_total(ANNIHILATION_KEV);
        let geometric = grid.detector_area_mm2 * grid.detector_area_mm2 / (4.0 * std::f32::consts::PI);
        let (nb, na) = (grid.radial_mm.len(), grid.angles_rad.len());

        let values = (0..grid.len()).into_par_iter().map(|i| {
            let (z, a, b) = (i / (na * nb), (i / nb) % na, i % nb);
            let (s, phi) = (grid.radial_mm[b], grid.angles_rad[a]);
            if s.abs() >= radius { return 0.0 }
            let t = (radius * radius - s * s).sqrt();
            let (c, n) = (phi.cos(), phi.sin());
            let z = grid.axial_mm[z];
            let det_a = [s * c - t * n, s * n + t * c, z];
            let det_b = [s * c + t * n, s * n - t * c, z];

            let mut total = 0.0_f64;
            for point in &points {
                let sp = point.position;
                let da = sub(det_a, sp);
                let db = sub(det_b, sp);
                let (la2, lb2) = (dot(da, da), dot(db, db));
                if la2 == 0.0 || lb2 == 0.0 { continue }
                let cos_theta = -dot(da, db) / (la2 * lb2).sqrt();
                let energy = scattered_energy(cos_theta);
                let eff = self.window.efficiency(energy, self.lld_offset_kev);
                if eff == 0.0 { continue }
                // Scattered photons are attenuated more strongly
                let ratio = (klein_nishina_total(energy) / sigma_511) as f32;
                let (mu_a, em_a) = line_integrals(umap, emission, sp, det_a);
                let (mu_b, em_b) = line_integrals(umap, emission, sp, det_b);
                let i_a = em_a * (-(mu_a + mu_b * ratio)).exp();
                let i_b = em_b * (-(mu_a * ratio + mu_b)).exp();
                let weight = point.mu * self.table.lookup(cos_theta) / (la2 * lb2);
                total += (weight * eff_511 * eff * (i_a + i_b)) as f64;
            }
            (total * (volume * geometric) as f64) as f32
        }).collect();
        Ok(values)
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] { [a[0] - b[0], a[1] - b[1], a[2] - b[2]] }
fn dot(a: [f32; 3], b: [f32; 3]) -> f32 { a[0] * b[0] + a[1] * b[1] + a[2] * b[2] }

/// Integrals of attenuation (dimensionless, from 1/cm values) and emission
/// (per mm^2, from per-mm^3 values) along the segment `from -> to`, restricted
/// to the image box and sampled at half-voxel steps.
fn line_integrals(umap: &Image, emission: &Image, from: [f32; 3], to: [f32; 3]) -> (f32, f32) {
    let fov = &umap.fov;
    let half = fov.full_size().map(|s| s / 2.0);
    let d = sub(to, from);
    // Slab clipping against the image box
    let (mut t0, mut t1) = (0.0_f32, 1.0_f32);
    for k in 0..3 {
        if d[k] == 0.0 {
            if from[k].abs() > half[k] { return (0.0, 0.0) }
            continue
        }
        let (a, b) = ((-half[k] - from[k]) / d[k], (half[k] - from[k]) / d[k]);
        t0 = t0.max(a.min(b));
        t1 = t1.min(a.max(b));
    }
    if t1 <= t0 { return (0.0, 0.0) }

    let length = dot(d, d).sqrt() * (t1 - t0);
    let step = fov.voxel_size.iter().copied().fold(f32::INFINITY, f32::min) / 2.0;
    let steps = (length / step).ceil().max(1.0) as usize;
    let ds = length / steps as f32;
    let (mut mu, mut em) = (0.0, 0.0);
    for i in 0..steps {
        let t = t0 + (t1 - t0) * (i as f32 + 0.5) / steps as f32;
        let p = [from[0] + t * d[0], from[1] + t * d[1], from[2] + t * d[2]];
        let v = fov.voxel_coordinates(p);
        let mut index = [0; 3];
        let mut inside = true;
        for k in 0..3 {
            let r = v[k].round();
            if r < 0.0 || r >= fov.n[k] as f32 { inside = false; break }
            index[k] = r as usize;
        }
        if !inside { continue }
        mu += umap    [index] / 10.0 * ds;
        em += emission[index]        * ds;
    }
    (mu, em)
}
