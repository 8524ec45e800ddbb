/// Quantities which are simply type aliases for `f32` rather than having an
/// implementation as a `uom` `Quantity`.
///
/// These live in the inner loops of the resampling and correction code, where
/// the arithmetic is done on flat buffers of `f32` anyway, but we still want
/// some clues in the source as to what the numbers represent.

pub type Lengthf32      = f32; // mm
pub type Ratiof32       = f32;
pub type Energyf32      = f32; // keV. TODO uom Energy, once the scatter tables are uom-aware
pub type Countsf32      = f32;
pub type Intensityf32   = f32;
pub type Attenuationf32 = f32; // 1/cm
