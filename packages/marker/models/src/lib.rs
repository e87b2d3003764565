#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Watch marker data model.
//!
//! A [`WatchMarker`] is one geotagged animal sighting. Markers form threads:
//! publishing an update creates a successor whose `base_marker_id` points at
//! the marker it supersedes. [`UserStats`] holds the per-contributor counters
//! that move together with marker lifecycle transitions.

pub mod tags;

use animal_watch_geohash::{DEFAULT_PRECISION, GeoHashError, GeoPoint};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Number of days a marker stays current after it is published.
pub const MARKER_LIFETIME_DAYS: i64 = 7;

/// How urgent a sighting is.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkerSeverity {
    /// Not chosen yet. Never valid on a published marker.
    #[default]
    Undefined,
    /// Informational sighting.
    Info,
    /// The animal may need attention.
    Warning,
    /// Immediate danger to the animal or to people.
    Danger,
}

impl MarkerSeverity {
    /// Severities a user can pick when publishing.
    #[must_use]
    pub const fn selectable() -> &'static [Self] {
        &[Self::Info, Self::Warning, Self::Danger]
    }
}

/// Lifecycle state of a marker.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkerState {
    /// Current head of its thread.
    #[default]
    Active,
    /// Superseded by a successor marker.
    Updated,
    /// Deleted by its owner. Terminal.
    Removed,
}

/// Who can see a marker.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkerVisibility {
    /// Participates in spatial queries.
    #[default]
    Public,
    /// Visible to the owner only.
    Private,
}

/// A single sighting report.
///
/// Equality and hashing use the `id` only. `position_hash` is derived from
/// `position` and can only change through [`WatchMarker::set_position`] or
/// [`WatchMarker::inherit_position`]. Deserializing recomputes it and rejects
/// a stored hash that disagrees with the position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StoredMarker")]
pub struct WatchMarker {
    /// Unique, immutable identifier.
    pub id: String,
    /// User id of the reporter.
    pub owner_id: String,
    /// Display name of the reporter at publishing time.
    pub owner_user_name: String,
    position: GeoPoint,
    position_hash: String,
    /// Short headline.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Tags from the [`tags`] catalog, in the order they were picked.
    pub tags: Vec<String>,
    /// Marker this one supersedes, if it is an update.
    pub base_marker_id: Option<String>,
    /// 1 for an original report, incremented along the thread.
    pub position_in_thread: u32,
    /// Whether a successor currently supersedes this marker.
    pub has_updates: bool,
    /// Number of live successors published on top of this marker.
    pub update_count: u32,
    /// Number of users that marked this sighting as seen.
    pub seen_count: u32,
    /// Number of users that appraised this sighting.
    pub appraisal_count: u32,
    /// Whether the text fields were edited after publishing.
    pub edited: bool,
    /// URL of the attached photo.
    pub image_uri: String,
    /// Publishing time.
    pub created_on: DateTime<Utc>,
    /// Removal time, set when the marker is removed.
    pub removed_on: Option<DateTime<Utc>>,
    /// When the sighting stops being current.
    pub expires_on: Option<DateTime<Utc>>,
    /// When a successor was last published.
    pub updated_on: Option<DateTime<Utc>>,
    /// Who can see the marker.
    pub visibility: MarkerVisibility,
    /// Lifecycle state.
    pub state: MarkerState,
    /// Urgency.
    pub severity: MarkerSeverity,
}

/// Error raised when a stored marker document is not self-consistent.
#[derive(Debug, thiserror::Error)]
pub enum MarkerDecodeError {
    #[error(transparent)]
    Position(#[from] GeoHashError),
    #[error("Stored position hash {stored} does not match position hash {expected}")]
    HashMismatch { stored: String, expected: String },
}

/// Wire shape of [`WatchMarker`]. `positionHash` is optional and checked.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMarker {
    id: String,
    owner_id: String,
    owner_user_name: String,
    position: GeoPoint,
    #[serde(default)]
    position_hash: Option<String>,
    title: String,
    description: String,
    tags: Vec<String>,
    base_marker_id: Option<String>,
    position_in_thread: u32,
    has_updates: bool,
    update_count: u32,
    seen_count: u32,
    appraisal_count: u32,
    edited: bool,
    image_uri: String,
    created_on: DateTime<Utc>,
    removed_on: Option<DateTime<Utc>>,
    expires_on: Option<DateTime<Utc>>,
    updated_on: Option<DateTime<Utc>>,
    visibility: MarkerVisibility,
    state: MarkerState,
    severity: MarkerSeverity,
}

impl TryFrom<StoredMarker> for WatchMarker {
    type Error = MarkerDecodeError;

    fn try_from(stored: StoredMarker) -> Result<Self, Self::Error> {
        let expected = animal_watch_geohash::encode(stored.position, DEFAULT_PRECISION)?;
        match stored.position_hash {
            Some(hash) if hash != expected => {
                return Err(MarkerDecodeError::HashMismatch {
                    stored: hash,
                    expected,
                });
            }
            _ => {}
        }
        Ok(Self {
            id: stored.id,
            owner_id: stored.owner_id,
            owner_user_name: stored.owner_user_name,
            position: stored.position,
            position_hash: expected,
            title: stored.title,
            description: stored.description,
            tags: stored.tags,
            base_marker_id: stored.base_marker_id,
            position_in_thread: stored.position_in_thread,
            has_updates: stored.has_updates,
            update_count: stored.update_count,
            seen_count: stored.seen_count,
            appraisal_count: stored.appraisal_count,
            edited: stored.edited,
            image_uri: stored.image_uri,
            created_on: stored.created_on,
            removed_on: stored.removed_on,
            expires_on: stored.expires_on,
            updated_on: stored.updated_on,
            visibility: stored.visibility,
            state: stored.state,
            severity: stored.severity,
        })
    }
}

impl WatchMarker {
    /// Creates an active, public, first-in-thread marker at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoHashError::InvalidCoordinate`] if `position` is out of
    /// range.
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        owner_user_name: impl Into<String>,
        position: GeoPoint,
        created_on: DateTime<Utc>,
    ) -> Result<Self, GeoHashError> {
        let position_hash = animal_watch_geohash::encode(position, DEFAULT_PRECISION)?;
        Ok(Self {
            id: id.into(),
            owner_id: owner_id.into(),
            owner_user_name: owner_user_name.into(),
            position,
            position_hash,
            title: String::new(),
            description: String::new(),
            tags: Vec::new(),
            base_marker_id: None,
            position_in_thread: 1,
            has_updates: false,
            update_count: 0,
            seen_count: 0,
            appraisal_count: 0,
            edited: false,
            image_uri: String::new(),
            created_on,
            removed_on: None,
            expires_on: Some(created_on + Duration::days(MARKER_LIFETIME_DAYS)),
            updated_on: None,
            visibility: MarkerVisibility::Public,
            state: MarkerState::Active,
            severity: MarkerSeverity::Undefined,
        })
    }

    /// Generates a fresh random marker id.
    #[must_use]
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Where the sighting happened.
    #[must_use]
    pub const fn position(&self) -> GeoPoint {
        self.position
    }

    /// Geohash of [`Self::position`].
    #[must_use]
    pub fn position_hash(&self) -> &str {
        &self.position_hash
    }

    /// Moves the marker and recomputes its position hash.
    ///
    /// # Errors
    ///
    /// Returns [`GeoHashError::InvalidCoordinate`] if `position` is out of
    /// range; the marker is left unchanged.
    pub fn set_position(&mut self, position: GeoPoint) -> Result<(), GeoHashError> {
        self.position_hash = animal_watch_geohash::encode(position, DEFAULT_PRECISION)?;
        self.position = position;
        Ok(())
    }

    /// Copies position and hash from `base`, as an update may not relocate
    /// the sighting.
    pub fn inherit_position(&mut self, base: &Self) {
        self.position = base.position;
        self.position_hash.clone_from(&base.position_hash);
    }

    /// Whether spatial queries should return this marker.
    #[must_use]
    pub fn is_discoverable(&self) -> bool {
        self.state == MarkerState::Active && self.visibility == MarkerVisibility::Public
    }

    /// Whether this marker supersedes another one.
    #[must_use]
    pub const fn is_update(&self) -> bool {
        self.base_marker_id.is_some()
    }

    /// Mutable access to one of the marker's counters.
    pub const fn counter_mut(&mut self, counter: MarkerCounter) -> &mut u32 {
        match counter {
            MarkerCounter::Appraisals => &mut self.appraisal_count,
            MarkerCounter::Seen => &mut self.seen_count,
            MarkerCounter::Updates => &mut self.update_count,
        }
    }
}

impl PartialEq for WatchMarker {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WatchMarker {}

impl std::hash::Hash for WatchMarker {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Counters stored on a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum MarkerCounter {
    /// `appraisalCount`.
    Appraisals,
    /// `seenCount`.
    Seen,
    /// `updateCount`.
    Updates,
}

/// User input for a new marker or an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerDraft {
    /// Headline.
    pub title: String,
    /// Description.
    pub description: String,
    /// Picked tags.
    pub tags: Vec<String>,
    /// Picked severity.
    pub severity: MarkerSeverity,
    /// Reference to the captured photo, once taken.
    pub image: Option<String>,
}

/// Partial update of marker fields applied inside a transaction.
///
/// `None` leaves a field untouched. For optional timestamps the outer
/// `Option` selects the field and the inner one is the new value, so
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerPatch {
    /// New lifecycle state.
    pub state: Option<MarkerState>,
    /// New `has_updates` flag.
    pub has_updates: Option<bool>,
    /// New `updated_on` value.
    pub updated_on: Option<Option<DateTime<Utc>>>,
    /// New `removed_on` value.
    pub removed_on: Option<Option<DateTime<Utc>>>,
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New tags.
    pub tags: Option<Vec<String>>,
    /// New `edited` flag.
    pub edited: Option<bool>,
}

impl MarkerPatch {
    /// Writes the selected fields into `marker`.
    pub fn apply(&self, marker: &mut WatchMarker) {
        if let Some(state) = self.state {
            marker.state = state;
        }
        if let Some(has_updates) = self.has_updates {
            marker.has_updates = has_updates;
        }
        if let Some(updated_on) = self.updated_on {
            marker.updated_on = updated_on;
        }
        if let Some(removed_on) = self.removed_on {
            marker.removed_on = removed_on;
        }
        if let Some(title) = &self.title {
            marker.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            marker.description.clone_from(description);
        }
        if let Some(tags) = &self.tags {
            marker.tags.clone_from(tags);
        }
        if let Some(edited) = self.edited {
            marker.edited = edited;
        }
    }
}

/// Per-user contribution counters.
///
/// `total` is the ranking score and always equals the sum of the other
/// three counters in any committed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    /// Markers published by the user.
    pub markers_created_count: u32,
    /// Updates published by the user.
    pub markers_updated_count: u32,
    /// Appraisals received on the user's markers.
    pub total_appraisals: u32,
    /// Sum of the three counters above.
    pub total: u32,
}

impl UserStats {
    /// Whether `total` matches the sum of the individual counters.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.markers_created_count as u64
            + self.markers_updated_count as u64
            + self.total_appraisals as u64
            == self.total as u64
    }

    /// Mutable access to one of the counters.
    pub const fn counter_mut(&mut self, counter: StatsCounter) -> &mut u32 {
        match counter {
            StatsCounter::MarkersCreated => &mut self.markers_created_count,
            StatsCounter::MarkersUpdated => &mut self.markers_updated_count,
            StatsCounter::TotalAppraisals => &mut self.total_appraisals,
            StatsCounter::Total => &mut self.total,
        }
    }
}

/// Counters stored on a [`UserStats`] document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum StatsCounter {
    #[strum(serialize = "markersCreatedCount")]
    MarkersCreated,
    #[strum(serialize = "markersUpdatedCount")]
    MarkersUpdated,
    #[strum(serialize = "totalAppraisals")]
    TotalAppraisals,
    #[strum(serialize = "total")]
    Total,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn marker(id: &str) -> WatchMarker {
        WatchMarker::new(
            id,
            "owner",
            "Owner",
            GeoPoint::new(44.0, 20.0).unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn new_marker_defaults() {
        let m = marker("a");
        assert_eq!(m.state, MarkerState::Active);
        assert_eq!(m.visibility, MarkerVisibility::Public);
        assert_eq!(m.position_in_thread, 1);
        assert_eq!(m.position_hash().len(), DEFAULT_PRECISION);
        assert_eq!(
            m.expires_on,
            Some(m.created_on + Duration::days(MARKER_LIFETIME_DAYS))
        );
        assert!(m.is_discoverable());
    }

    #[test]
    fn equality_is_by_id() {
        let a = marker("same");
        let mut b = marker("same");
        b.title = "different".to_string();
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b, marker("other")].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn set_position_recomputes_hash() {
        let mut m = marker("a");
        let before = m.position_hash().to_string();
        m.set_position(GeoPoint::new(45.0, 19.0).unwrap()).unwrap();
        assert_ne!(m.position_hash(), before);
        assert_eq!(
            m.position_hash(),
            animal_watch_geohash::encode(m.position(), DEFAULT_PRECISION).unwrap()
        );
    }

    #[test]
    fn rejected_position_leaves_marker_unchanged() {
        let mut m = marker("a");
        let hash = m.position_hash().to_string();
        assert!(
            m.set_position(GeoPoint {
                latitude: 100.0,
                longitude: 0.0
            })
            .is_err()
        );
        assert_eq!(m.position_hash(), hash);
    }

    #[test]
    fn patch_clears_optional_timestamp() {
        let mut m = marker("a");
        m.updated_on = Some(Utc::now());
        MarkerPatch {
            state: Some(MarkerState::Active),
            updated_on: Some(None),
            ..MarkerPatch::default()
        }
        .apply(&mut m);
        assert_eq!(m.updated_on, None);
    }

    #[test]
    fn serializes_camel_case_fields() {
        let json = serde_json::to_value(marker("a")).unwrap();
        assert!(json.get("positionHash").is_some());
        assert_eq!(json["state"], "ACTIVE");
        assert_eq!(json["severity"], "UNDEFINED");
    }

    #[test]
    fn decoding_recomputes_missing_hash() {
        let original = marker("a");
        let mut json = serde_json::to_value(&original).unwrap();
        json.as_object_mut().unwrap().remove("positionHash");

        let decoded: WatchMarker = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.position_hash(), original.position_hash());
    }

    #[test]
    fn decoding_rejects_hash_that_disagrees_with_position() {
        let mut json = serde_json::to_value(marker("a")).unwrap();
        json["positionHash"] = serde_json::Value::from("7zzzzzzzz");

        let err = serde_json::from_value::<WatchMarker>(json).unwrap_err();
        assert!(err.to_string().contains("does not match"), "{err}");
    }

    #[test]
    fn decoding_rejects_out_of_range_position() {
        let mut json = serde_json::to_value(marker("a")).unwrap();
        json["position"]["latitude"] = serde_json::Value::from(91.0);
        json.as_object_mut().unwrap().remove("positionHash");

        assert!(serde_json::from_value::<WatchMarker>(json).is_err());
    }

    #[test]
    fn stats_counter_names_match_stored_fields() {
        let json = serde_json::to_value(UserStats::default()).unwrap();
        for counter in [
            StatsCounter::MarkersCreated,
            StatsCounter::MarkersUpdated,
            StatsCounter::TotalAppraisals,
            StatsCounter::Total,
        ] {
            assert!(json.get(counter.as_ref()).is_some(), "{counter}");
        }
    }

    #[test]
    fn stats_consistency() {
        let mut stats = UserStats::default();
        *stats.counter_mut(StatsCounter::MarkersCreated) += 2;
        *stats.counter_mut(StatsCounter::Total) += 1;
        assert!(!stats.is_consistent());
        *stats.counter_mut(StatsCounter::Total) += 1;
        assert!(stats.is_consistent());
    }
}
