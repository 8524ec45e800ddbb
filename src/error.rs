use crate::arena::BufferHandle;

/// Inconsistent sinogram dimensions for the requested operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RebinError {
    #[error("buffer holds {actual} values, but {planes} planes of {angles} x {bins} need {expected}")]
    Length { actual: usize, expected: usize, planes: usize, angles: usize, bins: usize },

    #[error("angular padding of {pad} exceeds the {angles} available angles")]
    Padding { pad: usize, angles: usize },

    #[error("{zooms} zoom factors supplied for {planes} planes")]
    ZoomCount { zooms: usize, planes: usize },

    #[error("{bins} radial bins cannot be arc-corrected on a ring of {crystals} crystals")]
    Arc { bins: usize, crystals: usize },

    #[error("zoom factor {0} is not strictly positive")]
    Zoom(f32),

    #[error("sinogram dimension `{0}` is zero")]
    Empty(&'static str),

    #[error("plane layouts differ: {0:?} vs {1:?}")]
    PlaneLayout(Vec<usize>, Vec<usize>),

    #[error("in-plane sizes differ: {0:?} vs {1:?}")]
    PlaneSize([usize; 2], [usize; 2]),

    #[error("buffer holds {actual} values, which do not fill an image of {dims:?} voxels")]
    ImageLength { actual: usize, dims: [usize; 3] },

    #[error("image dimensions differ: {0:?} vs {1:?}")]
    ImageSize([usize; 3], [usize; 3]),
}

/// Cubic b-spline construction is infeasible for the requested sampling.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BSplineError {
    #[error("{samples} samples spaced {interval} apart from offset {offset} do not fit in {elements} elements")]
    Infeasible { elements: usize, samples: usize, interval: usize, offset: usize },

    #[error("need at least {needed} samples, got {samples}")]
    TooFewSamples { samples: usize, needed: usize },

    #[error("spline coefficient matrix of order {0} is singular")]
    Singular(usize),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ArenaError {
    #[error("cannot allocate {requested} floats for `{tag}`: only {available} left")]
    Exhausted { requested: usize, available: usize, tag: String },

    #[error("no live buffer with handle {0:?}")]
    UnknownHandle(BufferHandle),

    #[error("arena registry lock poisoned")]
    Poisoned,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Rebin(#[from] RebinError),

    #[error(transparent)]
    BSpline(#[from] BSplineError),

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error("worker {worker} failed")]
    Thread { worker: usize, #[source] source: Box<Error> },

    #[error("could not build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad calibration subheader")]
    Calibration(#[from] binrw::Error),

    #[error("bad configuration")]
    Config(#[from] toml::de::Error),

    #[error("reconstruction engine: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, Error>;
