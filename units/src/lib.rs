//! Physical quantities used in the correction pipeline.
//!
//! Configuration values (bin sizes, plane separations, ring radii, smoothing
//! widths) are `uom` quantities; the numerical kernels extract plain `f32`s
//! with the `*_` functions at their boundaries.

pub mod todo;

pub use uom;
pub use uom::si::Quantity;
pub use uom::si::f32::{Angle, Length, Ratio};

mod units {
  pub use uom::si::{length::{millimeter, centimeter},
                    ratio ::ratio,
                    angle ::radian,
  };
}

// Making values from float literals seems to be very long-winded, so provide
// some pithily-named convenience constructors.

/// Generate a function called NAME which returns QUANTITY by interpreting its
/// argument as UNIT
///
/// wrap!(NAME QUANTITY UNIT);
macro_rules! wrap {
  ($name:ident $quantity:ident $unit:ident ) => {
    pub fn $name(x: f32) -> $quantity { $quantity::new::<units::$unit>(x) }
  };
}

wrap!(cm     Length  centimeter);
wrap!(mm     Length  millimeter);
wrap!(ratio  Ratio        ratio);
wrap!(radian Angle       radian);

// Reverse direction of the above.
pub fn mm_(x: Length) -> f32 { x.get::<units::millimeter>() }
pub fn cm_(x: Length) -> f32 { x.get::<units::centimeter>() }

pub fn ratio_ (x: Ratio) -> f32 { x.get::<units::ratio>() }
pub fn radian_(x: Angle) -> f32 { x.get::<units::radian>() }

#[macro_export]
macro_rules! assert_uom_eq {
  ($unit:ident, $lhs:expr, $rhs:expr, $algo:ident <= $tol:expr) => {
    float_eq::assert_float_eq!($lhs.get::<$unit>(), $rhs.get::<$unit>(), $algo <= $tol)
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lengths_sum_across_units() {
    let v = vec![mm(1.0), cm(1.0)];
    let total: Length = v.into_iter().sum();
    use units::millimeter;
    assert_uom_eq!(millimeter, total, mm(11.0), ulps <= 1);
  }

  #[test]
  fn bin_size_in_cm() {
    float_eq::assert_float_eq!(cm_(mm(2.25)), 0.225, ulps <= 2);
  }

  #[test]
  fn parse_length_from_config_string() {
    let l: Length = "2.5 mm".parse().unwrap();
    float_eq::assert_float_eq!(mm_(l), 2.5, ulps <= 1);
    let l: Length = "1.5 cm".parse().unwrap();
    float_eq::assert_float_eq!(mm_(l), 15.0, ulps <= 1);
  }
}
