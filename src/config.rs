//! TOML configuration of the correction pipeline.
//!
//! Physical quantities are written with their units, as strings, for example
//! `bin_size = "2.25 mm"`, and parsed with `uom`'s `FromStr`.

pub mod correction;

pub use correction::{read_config_file, Config};

use std::str::FromStr;

use serde::{de, Deserialize, Deserializer};

pub(crate) fn deserialize_uom<'d, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    <&str>::deserialize(deserializer)?
        .parse::<T>()
        .map_err(de::Error::custom)
}
