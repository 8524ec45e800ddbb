/// Read / write sinograms and images as raw little-endian `f32`

use std::fs::File;
use std::io::{Write, Read, BufWriter, BufReader};
use std::path::Path;

use crate::arena::BufferArena;
use crate::error::Result;
use crate::fov::Fov;
use crate::image::Image;
use crate::sinogram::{Sinogram, SinogramGeometry};

pub fn write(data: impl Iterator<Item = f32>, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut buf = BufWriter::new(file);
    for datum in data {
        buf.write_all(&datum.to_le_bytes())?;
    }
    buf.flush()
}

type IORes<T> = std::io::Result<T>;
pub fn read<'a>(path: &Path) -> IORes<impl Iterator<Item = IORes<f32>> + 'a> {
    let file = File::open(path)?;
    let mut buf = BufReader::new(file);
    let mut buffer = [0; 4];

    Ok(std::iter::from_fn(move || {
        use std::io::ErrorKind::{Interrupted, UnexpectedEof};
        let mut filled = 0;
        while filled < buffer.len() {
            match buf.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == Interrupted => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        match filled {
            0 => None,
            4 => Some(Ok(f32::from_le_bytes(buffer))),
            n => Some(Err(std::io::Error::new(UnexpectedEof, format!("file ends with {n} bytes of a truncated f32")))),
        }
    }))
}

fn read_into_arena(arena: &BufferArena, path: &Path, tag: &str) -> Result<crate::arena::Buffer> {
    let data = read(path)?.collect::<IORes<Vec<f32>>>()?;
    Ok(arena.adopt(data, tag)?)
}

/// Sinogram of known geometry; the file length must match it
pub fn read_sinogram(arena: &BufferArena, path: &Path, geometry: SinogramGeometry) -> Result<Sinogram> {
    Sinogram::from_buffer(geometry, read_into_arena(arena, path, "sinogram from file")?)
}

pub fn read_image(arena: &BufferArena, path: &Path, fov: Fov) -> Result<Image> {
    Image::from_buffer(fov, read_into_arena(arena, path, "image from file")?)
}

pub fn write_sinogram(sinogram: &Sinogram, path: &Path) -> std::io::Result<()> {
    write(sinogram.data().iter().copied(), path)
}

pub fn write_image(image: &Image, path: &Path) -> std::io::Result<()> {
    write(image.data().iter().copied(), path)
}
