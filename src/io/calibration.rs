/// Deadtime calibration database: a directory of frames acquired at
/// decreasing count rates, each made of
///
/// + `frame_NN.hdr`: little-endian subheader, see [`FrameHeader`]
/// + `frame_NN.sino`: raw `f32` sinogram, `planes x angles x bins`
/// + `frame_NN.rnd`: raw `f32` randoms sinogram, present if flagged in the header

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use binrw::{binrw, BinRead, BinWrite};

use crate::error::{RebinError, Result};
use crate::io::raw;

#[binrw]
#[brw(little, magic = b"DTCF")]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameHeader {
    /// Total uncorrected singles count of the frame
    pub singles: f64,
    #[br(map = |x: u8| x != 0)]
    #[bw(map = |x: &bool| u8::from(*x))]
    pub randoms: bool,
    pub bins: u32,
    pub angles: u32,
    pub planes: u32,
}

impl FrameHeader {
    /// Every dimension of the frame must be non-zero
    pub fn validate(&self) -> std::result::Result<(), RebinError> {
        for (n, what) in [(self.bins, "calibration radial bins"), (self.angles, "calibration angles"), (self.planes, "calibration planes")] {
            if n == 0 { return Err(RebinError::Empty(what)) }
        }
        Ok(())
    }

    pub fn len(&self) -> usize { self.bins as usize * self.angles as usize * self.planes as usize }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// One calibration frame, randoms already subtracted
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationFrame {
    pub header: FrameHeader,
    pub counts: Vec<f32>,
}

fn frame_path(dir: &Path, index: usize, extension: &str) -> PathBuf {
    dir.join(format!("frame_{index:02}.{extension}"))
}

fn read_counts(path: &Path, header: &FrameHeader) -> Result<Vec<f32>> {
    let counts = raw::read(path)?.collect::<std::io::Result<Vec<f32>>>()?;
    if counts.len() != header.len() {
        return Err(RebinError::Length {
            actual: counts.len(), expected: header.len(),
            planes: header.planes as usize, angles: header.angles as usize, bins: header.bins as usize,
        }.into())
    }
    Ok(counts)
}

pub fn read_frame(dir: &Path, index: usize) -> Result<CalibrationFrame> {
    let mut reader = BufReader::new(File::open(frame_path(dir, index, "hdr"))?);
    let header = FrameHeader::read(&mut reader)?;
    header.validate()?;
    let mut counts = read_counts(&frame_path(dir, index, "sino"), &header)?;
    if header.randoms {
        let randoms = read_counts(&frame_path(dir, index, "rnd"), &header)?;
        for (c, r) in counts.iter_mut().zip(randoms) { *c -= r }
    }
    Ok(CalibrationFrame { header, counts })
}

/// Frames `0..frames` of the database in `dir`
pub fn read_database(dir: &Path, frames: usize) -> Result<Vec<CalibrationFrame>> {
    log::info!("reading {frames} deadtime calibration frames from {}", dir.display());
    (0..frames).map(|i| read_frame(dir, i)).collect()
}

pub fn write_frame(dir: &Path, index: usize, header: &FrameHeader, counts: &[f32], randoms: Option<&[f32]>) -> Result<()> {
    let header = FrameHeader { randoms: randoms.is_some(), ..*header };
    let mut writer = BufWriter::new(File::create(frame_path(dir, index, "hdr"))?);
    header.write(&mut writer)?;
    raw::write(counts.iter().copied(), &frame_path(dir, index, "sino"))?;
    if let Some(randoms) = randoms {
        raw::write(randoms.iter().copied(), &frame_path(dir, index, "rnd"))?;
    }
    Ok(())
}
