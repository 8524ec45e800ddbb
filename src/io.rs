pub mod raw;
pub mod calibration;
pub mod qc;
