//! Query ranges covering a circle.
//!
//! A circle is covered by the cells around its center and its eight
//! compass extremes at a precision where each cell is at least as large as
//! the radius. Adjacent or overlapping ranges are merged, so the result is
//! a small list of `[start, end]` hash intervals. The cover over-approximates:
//! callers must re-check membership with [`crate::distance_meters`].

use crate::{
    BITS_PER_CHAR, GeoHashError, GeoPoint, MAX_PRECISION, base32_char, base32_value,
    encode_unchecked,
};

const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;
const EARTH_MERIDIONAL_CIRCUMFERENCE: f64 = 40_007_860.0;
const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;
const EARTH_ECCENTRICITY_SQUARED: f64 = 0.006_694_478_197_99;
const EPSILON: f64 = 1e-12;

/// Widens the cover slightly: the degree lengths below are ellipsoidal while
/// post-filtering uses spherical distances.
const COVER_MARGIN: f64 = 1.005;

/// Sorts after every base-32 character; closes a range over all longer hashes.
const RANGE_END_SENTINEL: char = '~';

#[allow(clippy::cast_possible_truncation)]
const MAX_BITS: u32 = MAX_PRECISION as u32 * BITS_PER_CHAR;

/// An inclusive interval of geohash strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeoHashRange {
    /// First hash in the interval.
    pub start: String,
    /// Last hash in the interval.
    pub end: String,
}

impl GeoHashRange {
    /// Creates a range from its bounds.
    #[must_use]
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Whether `hash` sorts within `[start, end]`.
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.start.as_str() <= hash && hash <= self.end.as_str()
    }

    /// `other` starts before `self` and ends inside it.
    fn is_prefix_of(&self, other: &Self) -> bool {
        other.end >= self.start && other.start < self.start && other.end < self.end
    }

    /// `other` fully covers `self`.
    fn is_covered_by(&self, other: &Self) -> bool {
        other.start <= self.start && other.end >= self.end
    }

    fn can_join(&self, other: &Self) -> bool {
        self.is_prefix_of(other)
            || other.is_prefix_of(self)
            || self.is_covered_by(other)
            || other.is_covered_by(self)
    }

    fn join(&self, other: &Self) -> Self {
        if other.is_prefix_of(self) {
            Self::new(self.start.clone(), other.end.clone())
        } else if self.is_prefix_of(other) {
            Self::new(other.start.clone(), self.end.clone())
        } else if self.is_covered_by(other) {
            other.clone()
        } else {
            self.clone()
        }
    }
}

/// Computes the hash ranges whose union covers every point within
/// `radius_meters` of `center`.
///
/// Ranges come back sorted and merged. Results over-cover the circle, so
/// matches must be post-filtered by exact distance.
///
/// # Errors
///
/// Returns [`GeoHashError::InvalidCoordinate`] for an out-of-range center
/// and [`GeoHashError::InvalidRadius`] for a radius that is not a positive
/// finite number.
pub fn bounding_ranges(
    center: GeoPoint,
    radius_meters: f64,
) -> Result<Vec<GeoHashRange>, GeoHashError> {
    center.validate()?;
    if !radius_meters.is_finite() || radius_meters <= 0.0 {
        return Err(GeoHashError::InvalidRadius(radius_meters));
    }

    let radius = radius_meters * COVER_MARGIN;
    let query_bits = bits_for_bounding_box(center, radius).max(1);
    let precision = query_bits.div_ceil(BITS_PER_CHAR) as usize;

    let latitude_degrees = radius / METERS_PER_DEGREE_LATITUDE;
    let north = center.latitude + latitude_degrees;
    let south = center.latitude - latitude_degrees;
    if north >= 90.0 || south <= -90.0 {
        // Every longitude is in reach once the circle contains a pole.
        return Ok(vec![GeoHashRange::new("0", format!("{RANGE_END_SENTINEL}"))]);
    }
    let longitude_delta =
        longitude_degrees(radius, north).max(longitude_degrees(radius, south));
    let west = wrap_longitude(center.longitude - longitude_delta);
    let east = wrap_longitude(center.longitude + longitude_delta);

    let mut ranges: Vec<GeoHashRange> = Vec::with_capacity(9);
    for latitude in [center.latitude, north, south] {
        for longitude in [center.longitude, west, east] {
            let hash = encode_unchecked(
                GeoPoint {
                    latitude,
                    longitude,
                },
                precision,
            );
            let range = range_for_hash(&hash, query_bits);
            if !ranges.contains(&range) {
                ranges.push(range);
            }
        }
    }

    while let Some((i, j)) = find_joinable(&ranges) {
        let joined = ranges[i].join(&ranges[j]);
        let (first, second) = (i.max(j), i.min(j));
        ranges.swap_remove(first);
        ranges.swap_remove(second);
        ranges.push(joined);
    }

    ranges.sort();
    Ok(ranges)
}

fn find_joinable(ranges: &[GeoHashRange]) -> Option<(usize, usize)> {
    for (i, a) in ranges.iter().enumerate() {
        for (j, b) in ranges.iter().enumerate() {
            if i != j && a.can_join(b) {
                return Some((i, j));
            }
        }
    }
    None
}

/// Range of all hashes sharing the first `bits` bits of `hash`.
fn range_for_hash(hash: &str, bits: u32) -> GeoHashRange {
    let precision = bits.div_ceil(BITS_PER_CHAR) as usize;
    if hash.len() < precision {
        return GeoHashRange::new(hash, format!("{hash}{RANGE_END_SENTINEL}"));
    }

    let hash = &hash[..precision];
    let base = &hash[..precision - 1];
    let last_value = hash
        .chars()
        .last()
        .and_then(base32_value)
        .unwrap_or_default();
    #[allow(clippy::cast_possible_truncation)]
    let significant_bits = bits - base.len() as u32 * BITS_PER_CHAR;
    let unused_bits = BITS_PER_CHAR - significant_bits;

    let start_value = (last_value >> unused_bits) << unused_bits;
    let end_value = start_value + (1 << unused_bits);

    let start = format!("{base}{}", base32_char(start_value));
    let end = if end_value > 31 {
        format!("{base}{RANGE_END_SENTINEL}")
    } else {
        format!("{base}{}", base32_char(end_value))
    };
    GeoHashRange::new(start, end)
}

/// Number of hash bits whose cells are at least `size` meters across.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bits_for_bounding_box(center: GeoPoint, size: f64) -> u32 {
    let latitude_delta = size / METERS_PER_DEGREE_LATITUDE;
    let north = (center.latitude + latitude_delta).min(90.0);
    let south = (center.latitude - latitude_delta).max(-90.0);

    let latitude_bits = latitude_bits_for_resolution(size).floor() as i64 * 2;
    let longitude_bits_north = longitude_bits_for_resolution(size, north).floor() as i64 * 2 - 1;
    let longitude_bits_south = longitude_bits_for_resolution(size, south).floor() as i64 * 2 - 1;

    latitude_bits
        .min(longitude_bits_north)
        .min(longitude_bits_south)
        .clamp(1, i64::from(MAX_BITS)) as u32
}

fn latitude_bits_for_resolution(resolution: f64) -> f64 {
    (EARTH_MERIDIONAL_CIRCUMFERENCE / 2.0 / resolution)
        .log2()
        .min(f64::from(MAX_BITS))
}

fn longitude_bits_for_resolution(resolution: f64, latitude: f64) -> f64 {
    let degrees = longitude_degrees(resolution, latitude);
    if degrees.abs() > 0.000_001 {
        (360.0 / degrees).log2().max(1.0)
    } else {
        1.0
    }
}

/// Degrees of longitude spanned by `distance` meters at `latitude`.
fn longitude_degrees(distance: f64, latitude: f64) -> f64 {
    let radians = latitude.to_radians();
    let numerator = radians.cos() * EARTH_EQUATORIAL_RADIUS * std::f64::consts::PI / 180.0;
    let denominator = 1.0 / (1.0 - EARTH_ECCENTRICITY_SQUARED * radians.sin().powi(2)).sqrt();
    let delta_degrees = numerator * denominator;
    if delta_degrees < EPSILON {
        if distance > 0.0 { 360.0 } else { 0.0 }
    } else {
        (distance / delta_degrees).min(360.0)
    }
}

fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}
