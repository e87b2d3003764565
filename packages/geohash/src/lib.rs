#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geohash index for proximity queries.
//!
//! Encodes WGS84 points into base-32 geohash strings whose lexicographic
//! order approximates spatial locality, computes the set of hash ranges
//! covering a circle around a point (see [`bounding_ranges`]), and measures
//! great-circle distances for exact post-filtering.

mod bounds;

pub use bounds::{GeoHashRange, bounding_ranges};

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

/// Base-32 alphabet used by geohash strings.
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Number of bits encoded by a single geohash character.
pub(crate) const BITS_PER_CHAR: u32 = 5;

/// Precision used for stored marker position hashes.
pub const DEFAULT_PRECISION: usize = 10;

/// Longest geohash this crate will produce or decode.
pub const MAX_PRECISION: usize = 22;

/// Errors produced by geohash operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoHashError {
    /// Latitude outside `[-90, 90]` or longitude outside `[-180, 180]`.
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate {
        /// Offending latitude.
        latitude: f64,
        /// Offending longitude.
        longitude: f64,
    },

    /// Requested precision is zero or above [`MAX_PRECISION`].
    #[error("Invalid geohash precision {0}")]
    InvalidPrecision(usize),

    /// Hash contains a character outside the base-32 alphabet.
    #[error("Invalid geohash '{0}'")]
    InvalidHash(String),

    /// Query radius is negative, zero or not finite.
    #[error("Invalid radius {0} m")]
    InvalidRadius(f64),
}

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    /// Latitude in degrees, `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub longitude: f64,
}

impl GeoPoint {
    /// Creates a validated point.
    ///
    /// # Errors
    ///
    /// Returns [`GeoHashError::InvalidCoordinate`] if either component is out
    /// of range or not finite.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoHashError> {
        let point = Self {
            latitude,
            longitude,
        };
        point.validate()?;
        Ok(point)
    }

    /// Checks the coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`GeoHashError::InvalidCoordinate`] if either component is out
    /// of range or not finite.
    pub fn validate(&self) -> Result<(), GeoHashError> {
        if (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude) {
            Ok(())
        } else {
            Err(GeoHashError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }

    fn to_geo(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Approximate area covered by a geohash cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoHashCell {
    /// Southern latitude boundary.
    pub min_latitude: f64,
    /// Northern latitude boundary.
    pub max_latitude: f64,
    /// Western longitude boundary.
    pub min_longitude: f64,
    /// Eastern longitude boundary.
    pub max_longitude: f64,
}

impl GeoHashCell {
    /// Center of the cell.
    #[must_use]
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            latitude: f64::midpoint(self.min_latitude, self.max_latitude),
            longitude: f64::midpoint(self.min_longitude, self.max_longitude),
        }
    }

    /// Whether `point` falls inside the cell (edges inclusive).
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }
}

/// Encodes a point into a geohash of `precision` characters.
///
/// Deterministic: the same point and precision always give the same string.
///
/// # Errors
///
/// Returns [`GeoHashError::InvalidCoordinate`] for out-of-range points and
/// [`GeoHashError::InvalidPrecision`] for a precision of zero or above
/// [`MAX_PRECISION`].
pub fn encode(point: GeoPoint, precision: usize) -> Result<String, GeoHashError> {
    point.validate()?;
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GeoHashError::InvalidPrecision(precision));
    }
    Ok(encode_unchecked(point, precision))
}

/// Encodes a point known to be in range.
pub(crate) fn encode_unchecked(point: GeoPoint, precision: usize) -> String {
    let mut latitude_range = (-90.0_f64, 90.0_f64);
    let mut longitude_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut value = 0_usize;
    let mut bits = 0;
    let mut even = true;

    while hash.len() < precision {
        let (range, coordinate) = if even {
            (&mut longitude_range, point.longitude)
        } else {
            (&mut latitude_range, point.latitude)
        };
        let mid = f64::midpoint(range.0, range.1);
        if coordinate > mid {
            value = (value << 1) | 1;
            range.0 = mid;
        } else {
            value <<= 1;
            range.1 = mid;
        }
        even = !even;
        bits += 1;

        if bits == BITS_PER_CHAR {
            hash.push(char::from(BASE32[value]));
            value = 0;
            bits = 0;
        }
    }

    hash
}

/// Decodes a geohash into the cell it denotes.
///
/// # Errors
///
/// Returns [`GeoHashError::InvalidHash`] if the hash is empty, too long, or
/// contains characters outside the base-32 alphabet.
pub fn decode(hash: &str) -> Result<GeoHashCell, GeoHashError> {
    if hash.is_empty() || hash.len() > MAX_PRECISION {
        return Err(GeoHashError::InvalidHash(hash.to_string()));
    }

    let mut latitude_range = (-90.0_f64, 90.0_f64);
    let mut longitude_range = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for c in hash.chars() {
        let value = base32_value(c).ok_or_else(|| GeoHashError::InvalidHash(hash.to_string()))?;
        for shift in (0..BITS_PER_CHAR).rev() {
            let range = if even {
                &mut longitude_range
            } else {
                &mut latitude_range
            };
            let mid = f64::midpoint(range.0, range.1);
            if (value >> shift) & 1 == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }

    Ok(GeoHashCell {
        min_latitude: latitude_range.0,
        max_latitude: latitude_range.1,
        min_longitude: longitude_range.0,
        max_longitude: longitude_range.1,
    })
}

/// Great-circle (haversine) distance between two points, in meters.
#[must_use]
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    Haversine.distance(a.to_geo(), b.to_geo())
}

/// Numeric value of a base-32 geohash character.
pub(crate) fn base32_value(c: char) -> Option<u32> {
    let byte = u8::try_from(c).ok()?;
    BASE32
        .iter()
        .position(|&b| b == byte)
        .and_then(|idx| u32::try_from(idx).ok())
}

/// Base-32 character for a value in `0..32`.
pub(crate) fn base32_char(value: u32) -> char {
    char::from(BASE32[value as usize & 31])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint::new(latitude, longitude).unwrap()
    }

    #[test]
    fn encodes_known_hash() {
        assert_eq!(encode(point(57.64911, 10.40744), 11).unwrap(), "u4pruydqqvj");
        assert_eq!(encode(point(57.64911, 10.40744), 5).unwrap(), "u4pru");
    }

    #[test]
    fn encode_is_prefix_stable() {
        let p = point(44.0, 20.0);
        let long = encode(p, DEFAULT_PRECISION).unwrap();
        let short = encode(p, 6).unwrap();
        assert!(long.starts_with(&short));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(
            encode(GeoPoint { latitude: 91.0, longitude: 0.0 }, 5),
            Err(GeoHashError::InvalidCoordinate { .. })
        ));
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn rejects_bad_precision() {
        assert_eq!(
            encode(point(0.0, 0.0), 0),
            Err(GeoHashError::InvalidPrecision(0))
        );
        assert!(encode(point(0.0, 0.0), MAX_PRECISION + 1).is_err());
    }

    #[test]
    fn decoded_cell_contains_point() {
        let p = point(44.0123, 20.9876);
        let cell = decode(&encode(p, 8).unwrap()).unwrap();
        assert!(cell.contains(p));
        assert!(distance_meters(cell.center(), p) < 50.0);
    }

    #[test]
    fn decode_rejects_invalid_characters() {
        assert!(decode("u4pa").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn distance_is_zero_to_self_and_symmetric() {
        let a = point(44.0, 20.0);
        let b = point(44.09, 20.0);
        assert!(distance_meters(a, a).abs() < f64::EPSILON);
        assert!((distance_meters(a, b) - distance_meters(b, a)).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = distance_meters(point(0.0, 0.0), point(1.0, 0.0));
        assert!((111_000.0..111_400.0).contains(&d), "got {d}");
    }

    #[test]
    fn distance_respects_triangle_inequality() {
        let a = point(44.0, 20.0);
        let b = point(44.5, 20.3);
        let c = point(45.1, 19.7);
        assert!(distance_meters(a, c) <= distance_meters(a, b) + distance_meters(b, c) + 1e-6);
    }
}
