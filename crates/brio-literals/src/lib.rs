//! Brio Literal Encoders
//!
//! Pure functions that pack compile-time-constant values into the dense byte
//! sequences embedded in a program image: bitmap literals and tagged
//! numeric/boolean constants. Encoding is deterministic and never produces
//! diagnostics; malformed inputs are caller contract violations.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod image;
pub mod tagged;

pub use image::{decode_image, encode_image, DecodedImage, ImageError, IMAGE_MAGIC};
pub use tagged::{decode_tagged, encode_tagged, fits_tagged_int, Tagged};
