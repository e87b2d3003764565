#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Filtering of the live marker set.
//!
//! [`apply_filters`] is a pure function: it never reorders its input and
//! only drops markers that fail one of the [`FilterCriteria`] predicates.

use std::collections::BTreeSet;

use animal_watch_marker_models::{MarkerSeverity, WatchMarker};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Length of the default creation-date window.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Criteria a marker must satisfy to be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCriteria {
    /// Accepted severities. Empty accepts all.
    pub severities: BTreeSet<MarkerSeverity>,
    /// Case-insensitive substring of the owner's name. Blank accepts all.
    pub owner: String,
    /// Tags the marker must all carry. Empty accepts all.
    pub tags: BTreeSet<String>,
    /// Earliest accepted creation time, inclusive.
    pub created_after: DateTime<Utc>,
    /// Latest accepted creation time, inclusive.
    pub created_before: DateTime<Utc>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self::last_days(Utc::now(), DEFAULT_WINDOW_DAYS)
    }
}

impl FilterCriteria {
    /// No predicate besides a window of `days` ending at `now`.
    #[must_use]
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            severities: BTreeSet::new(),
            owner: String::new(),
            tags: BTreeSet::new(),
            created_after: now - Duration::days(days),
            created_before: now,
        }
    }

    /// Accepts only `severities`.
    #[must_use]
    pub fn with_severities(mut self, severities: impl IntoIterator<Item = MarkerSeverity>) -> Self {
        self.severities = severities.into_iter().collect();
        self
    }

    /// Accepts only owners whose name contains `owner`.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Requires every tag in `tags`.
    #[must_use]
    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `marker` passes every predicate.
    #[must_use]
    pub fn matches(&self, marker: &WatchMarker) -> bool {
        self.matches_severity(marker)
            && self.matches_owner(marker)
            && self.matches_tags(marker)
            && (self.created_after..=self.created_before).contains(&marker.created_on)
    }

    fn matches_severity(&self, marker: &WatchMarker) -> bool {
        self.severities.is_empty() || self.severities.contains(&marker.severity)
    }

    fn matches_owner(&self, marker: &WatchMarker) -> bool {
        self.owner.trim().is_empty()
            || marker
                .owner_user_name
                .to_lowercase()
                .contains(&self.owner.to_lowercase())
    }

    fn matches_tags(&self, marker: &WatchMarker) -> bool {
        self.tags.iter().all(|tag| marker.tags.contains(tag))
    }
}

/// Markers from `markers` that satisfy `criteria`, in input order.
#[must_use]
pub fn apply_filters(markers: &[WatchMarker], criteria: &FilterCriteria) -> Vec<WatchMarker> {
    markers
        .iter()
        .filter(|marker| criteria.matches(marker))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use animal_watch_geohash::GeoPoint;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn marker(
        id: &str,
        owner: &str,
        severity: MarkerSeverity,
        tags: &[&str],
        age_days: i64,
    ) -> WatchMarker {
        let mut m = WatchMarker::new(
            id,
            format!("{owner}-id"),
            owner,
            GeoPoint::new(44.0, 20.0).unwrap(),
            now() - Duration::days(age_days),
        )
        .unwrap();
        m.severity = severity;
        m.tags = tags.iter().map(ToString::to_string).collect();
        m
    }

    fn sample() -> Vec<WatchMarker> {
        vec![
            marker("a", "Ana", MarkerSeverity::Danger, &["Dog", "Wounded"], 1),
            marker("b", "Marko", MarkerSeverity::Info, &["Cat"], 2),
            marker("c", "Jovana", MarkerSeverity::Warning, &["Dog"], 3),
            marker("d", "Ana", MarkerSeverity::Warning, &["Bird"], 10),
        ]
    }

    fn ids(markers: &[WatchMarker]) -> Vec<&str> {
        markers.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn empty_criteria_keep_everything_in_order() {
        let markers = sample();
        let criteria = FilterCriteria::last_days(now(), 30);
        assert_eq!(apply_filters(&markers, &criteria), markers);
        assert_eq!(ids(&apply_filters(&markers, &criteria)), ["a", "b", "c", "d"]);
    }

    #[test]
    fn default_window_drops_old_markers() {
        let criteria = FilterCriteria::last_days(now(), DEFAULT_WINDOW_DAYS);
        assert_eq!(ids(&apply_filters(&sample(), &criteria)), ["a", "b", "c"]);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let m = marker("edge", "Ana", MarkerSeverity::Info, &[], 0);
        let mut criteria = FilterCriteria::last_days(now(), 1);
        assert!(criteria.matches(&m));
        criteria.created_before = now() - Duration::seconds(1);
        assert!(!criteria.matches(&m));
    }

    #[test]
    fn filters_by_severity() {
        let criteria = FilterCriteria::last_days(now(), 30).with_severities([MarkerSeverity::Warning]);
        assert_eq!(ids(&apply_filters(&sample(), &criteria)), ["c", "d"]);
    }

    #[test]
    fn owner_match_is_case_insensitive_substring() {
        let criteria = FilterCriteria::last_days(now(), 30).with_owner("AN");
        assert_eq!(ids(&apply_filters(&sample(), &criteria)), ["a", "c", "d"]);
    }

    #[test]
    fn owner_text_is_matched_as_typed() {
        let criteria = FilterCriteria::last_days(now(), 30).with_owner("ana ");
        assert!(apply_filters(&sample(), &criteria).is_empty());

        let blank = FilterCriteria::last_days(now(), 30).with_owner("   ");
        assert_eq!(apply_filters(&sample(), &blank).len(), 4);
    }

    #[test]
    fn tags_must_all_be_present() {
        let criteria = FilterCriteria::last_days(now(), 30).with_tags(["Dog", "Wounded"]);
        assert_eq!(ids(&apply_filters(&sample(), &criteria)), ["a"]);
    }

    #[test]
    fn sequential_severity_filters_equal_their_intersection() {
        let markers = sample();
        let base = FilterCriteria::last_days(now(), 30);
        let first = base
            .clone()
            .with_severities([MarkerSeverity::Info, MarkerSeverity::Warning]);
        let second = base
            .clone()
            .with_severities([MarkerSeverity::Warning, MarkerSeverity::Danger]);
        let combined = base.with_severities([MarkerSeverity::Warning]);

        let sequential = apply_filters(&apply_filters(&markers, &first), &second);
        assert_eq!(ids(&sequential), ids(&apply_filters(&markers, &combined)));
    }

    #[test]
    fn predicates_compose() {
        let criteria = FilterCriteria::last_days(now(), DEFAULT_WINDOW_DAYS)
            .with_owner("ana")
            .with_severities([MarkerSeverity::Warning]);
        assert_eq!(ids(&apply_filters(&sample(), &criteria)), ["c"]);
    }
}
