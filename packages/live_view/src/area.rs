//! One-shot proximity queries.

use std::collections::BTreeMap;

use animal_watch_geohash::{GeoPoint, bounding_ranges, distance_meters};
use animal_watch_marker_models::WatchMarker;
use animal_watch_store::{MarkerStore, RangeQuery};
use futures::future::try_join_all;

use crate::LiveViewError;

/// Distance within which a user may appraise or mark a sighting as seen.
pub const REACH_METERS: f64 = 200.0;

/// Active public markers within `radius_meters` of `center`, nearest first.
///
/// Queries every bounding range concurrently, merges the results by id and
/// drops the false positives of the geohash cover by exact distance.
///
/// # Errors
///
/// Returns [`LiveViewError::InvalidCoordinate`] for a bad center or radius
/// and [`LiveViewError::Store`] if any range query fails.
pub async fn markers_in_area(
    store: &dyn MarkerStore,
    center: GeoPoint,
    radius_meters: f64,
) -> Result<Vec<WatchMarker>, LiveViewError> {
    let queries: Vec<_> = bounding_ranges(center, radius_meters)?
        .into_iter()
        .map(RangeQuery::discoverable)
        .collect();

    let pages = try_join_all(queries.iter().map(|query| store.query_range(query))).await?;

    let merged: BTreeMap<String, WatchMarker> = pages
        .into_iter()
        .flatten()
        .filter(|marker| distance_meters(center, marker.position()) <= radius_meters)
        .map(|marker| (marker.id.clone(), marker))
        .collect();

    Ok(sort_by_distance(center, merged.into_values().collect()))
}

/// Number of markers [`markers_in_area`] would return.
///
/// # Errors
///
/// See [`markers_in_area`].
pub async fn count_in_area(
    store: &dyn MarkerStore,
    center: GeoPoint,
    radius_meters: f64,
) -> Result<usize, LiveViewError> {
    Ok(markers_in_area(store, center, radius_meters).await?.len())
}

/// Whether `observer` is close enough to `marker` to interact with it.
#[must_use]
pub fn within_reach(marker: &WatchMarker, observer: GeoPoint, max_meters: f64) -> bool {
    distance_meters(marker.position(), observer) <= max_meters
}

pub(crate) fn sort_by_distance(center: GeoPoint, mut markers: Vec<WatchMarker>) -> Vec<WatchMarker> {
    markers.sort_by(|a, b| {
        distance_meters(center, a.position())
            .total_cmp(&distance_meters(center, b.position()))
            .then_with(|| a.id.cmp(&b.id))
    });
    markers
}
