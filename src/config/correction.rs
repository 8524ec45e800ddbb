//! Configuration file of the attenuation and scatter correction pipeline.
//!
//! ```toml
//! [sinogram]
//! bins = 336
//! angles = 336
//! bin_size = "2.25 mm"
//! planes = [207, 170, 170]
//! plane_separation = "2.425 mm"
//!
//! [rebin]
//! bins = 168
//! angles = 168
//!
//! [attenuation]
//! iterations = 10
//!
//! [scatter]
//! image_size = 128
//! smoothing = "1 cm"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use units::{mm, Length};

use crate::attenuation::AttenuationConfig;
use crate::error::Result;
use crate::rebin::{ArcCorrection, RebinPlan};
use crate::scatter::{self, default_threads, ScatterConfig};
use crate::scatter::scale::ScaleSettings;
use crate::scatter::sim::{EnergyWindow, ScannerModel, SimulationSettings};
use crate::sinogram::SinogramGeometry;
use crate::types::{Energyf32, Ratiof32};

use super::deserialize_uom;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub sinogram: SinogramSection,
    pub rebin: Option<RebinSettings>,
    #[serde(default)]
    pub attenuation: AttenuationConfig,
    #[serde(default)]
    pub scatter: ScatterSection,
}

/// Sampling of the measured sinograms
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SinogramSection {
    pub bins: usize,
    pub angles: usize,
    #[serde(deserialize_with = "deserialize_uom")]
    pub bin_size: Length,
    /// Planes in each axis, direct planes first
    pub planes: Vec<usize>,
    /// Spacing of the direct planes
    #[serde(deserialize_with = "deserialize_uom")]
    pub plane_separation: Length,
    #[serde(default)]
    pub crystals_per_ring: usize,
}

/// Target in-plane size of the `rebin` tool
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RebinSettings {
    pub bins: usize,
    pub angles: usize,
    #[serde(default)]
    pub preserve_values: bool,
    #[serde(default)]
    pub arc_correction: ArcCorrection,
    #[serde(default = "default_threads")]
    pub max_threads: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScatterSection {
    /// In-plane voxels of the coarse emission image
    pub image_size: usize,
    pub iterations: usize,
    pub subsets: usize,
    pub skip_outer_planes: usize,
    pub radial_rebin_factor: usize,
    /// FWHM of the smoothing of the coarse emission image
    #[serde(deserialize_with = "deserialize_uom")]
    pub smoothing: Length,
    pub emission_scale: Ratiof32,
    pub radial_step: usize,
    pub angular_step: usize,
    pub axial_step: usize,
    pub spline_pad: usize,
    pub scale: ScaleSettings,
    pub scanner: ScannerModel,
    pub lld_offset_kev: Option<Energyf32>,
    pub window: EnergyWindow,
    pub simulation: SimulationSettings,
    pub max_threads: usize,
    /// Directory for quality-control profiles
    pub qc: Option<PathBuf>,
}

pub const DEFAULT_IMAGE_SIZE: usize = 128;

impl Default for ScatterSection {
    fn default() -> Self {
        Self {
            image_size:          DEFAULT_IMAGE_SIZE,
            iterations:          scatter::DEFAULT_ITERATIONS,
            subsets:             scatter::DEFAULT_SUBSETS,
            skip_outer_planes:   scatter::DEFAULT_SKIP_OUTER_PLANES,
            radial_rebin_factor: 1,
            smoothing:           mm(scatter::DEFAULT_SMOOTHING_FWHM_MM),
            emission_scale:      1.0,
            radial_step:         scatter::DEFAULT_RADIAL_STEP,
            angular_step:        scatter::DEFAULT_ANGULAR_STEP,
            axial_step:          scatter::DEFAULT_AXIAL_STEP,
            spline_pad:          scatter::DEFAULT_SPLINE_PAD,
            scale:               ScaleSettings::default(),
            scanner:             ScannerModel::default(),
            lld_offset_kev:      None,
            window:              EnergyWindow::default(),
            simulation:          SimulationSettings::default(),
            max_threads:         default_threads(),
            qc:                  None,
        }
    }
}

impl Config {

    pub fn geometry(&self) -> SinogramGeometry {
        let s = &self.sinogram;
        SinogramGeometry::new(s.bins, s.angles, s.bin_size, s.planes.clone(), s.plane_separation)
    }

    /// Resampling requested by the `[rebin]` section
    pub fn rebin_plan(&self) -> Option<RebinPlan> {
        let (s, r) = (&self.sinogram, self.rebin.as_ref()?);
        let plan = RebinPlan::new(s.bins, s.angles, r.bins, r.angles, r.preserve_values);
        Some(match r.arc_correction {
            ArcCorrection::None  => plan,
            ArcCorrection::Apply => plan.with_arc_correction(s.crystals_per_ring),
        })
    }

    pub fn attenuation_config(&self) -> AttenuationConfig { self.attenuation.clone() }

    pub fn scatter_config(&self) -> ScatterConfig {
        let (s, c) = (&self.sinogram, &self.scatter);
        ScatterConfig {
            iterations:          c.iterations,
            subsets:             c.subsets,
            skip_outer_planes:   c.skip_outer_planes,
            radial_rebin_factor: c.radial_rebin_factor,
            smoothing:           c.smoothing,
            emission_scale:      c.emission_scale,
            radial_step:         c.radial_step,
            angular_step:        c.angular_step,
            axial_step:          c.axial_step,
            spline_pad:          c.spline_pad,
            scale:               c.scale,
            scanner:             c.scanner,
            lld_offset_kev:      c.lld_offset_kev,
            window:              c.window,
            simulation:          c.simulation,
            max_threads:         c.max_threads,
            qc:                  c.qc.clone(),
            ..ScatterConfig::new(s.bins, s.bin_size, s.angles, s.planes.clone(), c.image_size, s.plane_separation)
        }
    }
}

pub fn read_config_file(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::Segmentation;
    use units::cm;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    const MINIMAL: &str = r#"
        [sinogram]
        bins = 16
        angles = 12
        bin_size = "2 mm"
        planes = [5, 4]
        plane_separation = "2.5 mm"
    "#;

    fn parse(input: &str) -> Config { toml::from_str(input).unwrap() }

    fn with_minimal(extra: &str) -> Config { parse(&format!("{MINIMAL}\n{extra}")) }

    // ----- Test the example on-disk config file ----------------------------------------
    #[test]
    fn test_config_file() -> Result<()> {
        let config = read_config_file("correction-config.toml".as_ref())?;
        assert_eq!(config.sinogram.bins, 336);
        assert_eq!(config.sinogram.bin_size, mm(2.25));
        assert_eq!(config.geometry().planes(), 207 + 2 * 170);

        let plan = config.rebin_plan().unwrap();
        assert_eq!((plan.new_width, plan.new_height), (168, 168));
        assert_eq!(plan.arc_correction, ArcCorrection::Apply);
        assert_eq!(plan.crystals_per_ring, 576);
        let rebinner = crate::rebin::Rebinner::new(plan, 1)?;
        assert_eq!(rebinner.plan().new_width, 168);

        assert_eq!(config.attenuation.radial_rebin, 2);
        assert_eq!(config.attenuation.deadtime.as_ref().unwrap().frames, 5);
        assert_eq!(config.scatter.scanner, ScannerModel::Hrrt);
        assert_eq!(config.scatter.smoothing, cm(1.0));
        Ok(())
    }

    #[test]
    fn sections_default_when_missing() {
        let config = parse(MINIMAL);
        assert_eq!(config.rebin, None);
        assert_eq!(config.rebin_plan(), None);
        assert_eq!(config.attenuation.stretch_factor, 1.5);
        assert_eq!(config.attenuation.under_bed_bins, 8);
        assert_eq!(config.attenuation.segmentation, Segmentation::default());
        assert_eq!(config.scatter.image_size, DEFAULT_IMAGE_SIZE);
        assert_eq!(config.scatter.scale, ScaleSettings::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = with_minimal(r#"
            [attenuation]
            alpha = 0.3
            blank_factor = 0.5

            [scatter]
            smoothing = "8 mm"
            scale = { max_scale = 3.0 }
            window = { lld_kev = 425.0 }
        "#);
        assert_eq!(config.attenuation.alpha, 0.3);
        assert_eq!(config.attenuation.blank_factor, Some(0.5));
        assert_eq!(config.attenuation.iterations, AttenuationConfig::default().iterations);
        assert_eq!(config.scatter.smoothing, mm(8.0));
        assert_eq!(config.scatter.scale.max_scale, 3.0);
        assert_eq!(config.scatter.scale.boxcar_width, ScaleSettings::default().boxcar_width);
        assert_eq!(config.scatter.window.lld_kev, 425.0);
        assert_eq!(config.scatter.window.uld_kev, EnergyWindow::default().uld_kev);
    }

    #[test]
    fn scatter_config_carries_geometry() {
        let config = with_minimal(r#"
            [scatter]
            image_size = 32
            subsets = 5
            lld_offset_kev = 12.0
        "#);
        let s = config.scatter_config();
        assert_eq!(s.geometry(), config.geometry());
        assert_eq!(s.image_size, 32);
        assert_eq!(s.subsets, 5);
        assert_eq!(s.lld_offset(), 12.0);
    }

    #[test]
    fn reject_unknown_fields() {
        let bad = |extra: &str| toml::from_str::<Config>(&format!("{MINIMAL}\n{extra}")).is_err();
        assert!(bad("unknown_field = 666"));
        assert!(bad("[attenuation]\nstrech_factor = 2.0"));
        assert!(bad("[scatter.scale]\nmax = 3.0"));
    }

    #[test]
    fn lengths_need_units() {
        let bad = MINIMAL.replace(r#""2 mm""#, "2.0");
        assert!(toml::from_str::<Config>(&bad).is_err());
        let bad = MINIMAL.replace(r#""2 mm""#, r#""2 bananas""#);
        assert!(toml::from_str::<Config>(&bad).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_config_file("no/such/config.toml".as_ref()).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
