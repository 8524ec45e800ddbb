//! Radial profiles of measured emission against the scaled scatter estimate.

use std::fmt::Write as _;
use std::path::Path;

use crate::io::qc::{write_script, write_table};
use crate::sinogram::Sinogram;

/// Angles at which profiles are taken, as fractions of the half-turn
pub const QC_ANGLES: [f32; 4] = [0.0, 0.25, 0.5, 0.75];
/// Each axis is split into this many bands of planes, summed per profile
pub const QC_BANDS: usize = 3;

pub fn table_name(axis: usize) -> String { format!("scatter_qc_axis{axis}.dat") }
pub const SCRIPT_NAME: &str = "scatter_qc.gp";

/// Columns of one line: the radial bin, then an (emission, scatter) pair per
/// band and angle, angles varying fastest.
fn profiles(emission: &Sinogram, scatter: &Sinogram, axis: usize) -> Vec<Vec<f32>> {
    let g = &emission.geometry;
    let range = g.axes.plane_range(axis);
    let n = range.len();
    let (em, sc) = (emission.view(), scatter.view());
    (0..g.bins).map(|r| {
        let mut row = vec![r as f32];
        for band in 0..QC_BANDS {
            let planes = range.start + n * band / QC_BANDS .. range.start + n * (band + 1) / QC_BANDS;
            for fraction in QC_ANGLES {
                let a = ((fraction * g.angles as f32) as usize).min(g.angles.saturating_sub(1));
                let sum = |s: &ndarray::ArrayView3<f32>| planes.clone().map(|p| s[[p, a, r]]).sum::<f32>();
                row.push(sum(&em));
                row.push(sum(&sc));
            }
        }
        row
    }).collect()
}

fn plot_script(axes: usize) -> String {
    let mut s = String::from("set terminal pngcairo size 1600,1000\nset style data lines\n");
    for axis in 0..axes {
        let table = table_name(axis);
        let _ = writeln!(s, "\nset output 'scatter_qc_axis{axis}.png'");
        let _ = writeln!(s, "set multiplot layout {QC_BANDS},{} title 'axis {axis}'", QC_ANGLES.len());
        for band in 0..QC_BANDS {
            for (i, fraction) in QC_ANGLES.iter().enumerate() {
                let col = 2 + 2 * (band * QC_ANGLES.len() + i);
                let _ = writeln!(s, "set title 'band {band}, angle {fraction} pi'");
                let _ = writeln!(s, "plot '{table}' using 1:{col} title 'emission', '' using 1:{} title 'scatter'", col + 1);
            }
        }
        let _ = writeln!(s, "unset multiplot");
    }
    s
}

/// Write one profile table per axis and a gnuplot script showing them all
pub fn write_profiles(dir: &Path, emission: &Sinogram, scatter: &Sinogram) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let axes = emission.geometry.axes.len();
    for axis in 0..axes {
        let header = format!("axis {axis}: bin, then emission scatter per band {QC_BANDS} x angle {QC_ANGLES:?}");
        write_table(&dir.join(table_name(axis)), &header, profiles(emission, scatter, axis))?;
    }
    write_script(&dir.join(SCRIPT_NAME), &plot_script(axes))
}
