//! Folding change batches into the live marker map.

use std::collections::BTreeMap;

use animal_watch_geohash::{GeoPoint, distance_meters};
use animal_watch_marker_models::WatchMarker;
use animal_watch_store::{ChangeKind, MarkerChange};

/// Applies one change batch to `markers`.
///
/// A record that left the subscribed set, is no longer active and public,
/// or lies outside `radius_meters` of `center` removes its id from the map.
/// Any other record replaces the stored marker. Applying the same batch
/// twice leaves the map as applying it once.
pub fn apply_batch(
    markers: &mut BTreeMap<String, WatchMarker>,
    center: GeoPoint,
    radius_meters: f64,
    batch: &[MarkerChange],
) {
    for change in batch {
        let marker = &change.marker;
        let keep = change.kind != ChangeKind::Removed
            && marker.is_discoverable()
            && distance_meters(center, marker.position()) <= radius_meters;

        if keep {
            markers.insert(marker.id.clone(), marker.clone());
        } else if markers.remove(&marker.id).is_some() {
            log::trace!("Dropped marker {} from live view", marker.id);
        }
    }
}

/// Drops markers further than `radius_meters` from `center`.
pub fn retain_within(
    markers: &mut BTreeMap<String, WatchMarker>,
    center: GeoPoint,
    radius_meters: f64,
) {
    markers.retain(|_, marker| distance_meters(center, marker.position()) <= radius_meters);
}
