#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Live view of the watch markers around an observer.
//!
//! A [`LiveView`] turns the observer's position and search radius into a
//! set of geohash range subscriptions, reconciles the change batches they
//! stream into a marker map keyed by id, and re-subscribes when the
//! observer moves further than the movement threshold. Each subscription
//! generation carries an epoch; batches from an older epoch are dropped.
//!
//! One-shot area queries used by manual refresh and the background lookup
//! live in [`area`].

pub mod area;
pub mod engine;
pub mod reconcile;
pub mod subscriptions;
pub mod tracker;

pub use area::{count_in_area, markers_in_area, within_reach};
pub use engine::{LiveSnapshot, LiveView, ViewStatus};

use animal_watch_geohash::GeoHashError;
use animal_watch_store::StoreError;
use serde::{Deserialize, Serialize};

/// Errors surfaced by the live view.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LiveViewError {
    /// Center or radius rejected by the geohash index.
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(#[from] GeoHashError),

    /// Radius outside the configured bounds.
    #[error("Radius {radius} m outside [{min}, {max}]")]
    RadiusOutOfRange {
        /// Requested radius.
        radius: f64,
        /// Smallest accepted radius.
        min: f64,
        /// Largest accepted radius.
        max: f64,
    },

    /// The view was stopped and accepts no more updates.
    #[error("Live view stopped")]
    Stopped,

    /// A store query or subscription failed. The live map is unchanged.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A newer subscription generation started while this result was in
    /// flight, so the result was dropped.
    #[error("Result for epoch {epoch} discarded")]
    StaleResultDiscarded {
        /// Epoch the result belonged to.
        epoch: u64,
    },

    /// No observer position is known yet.
    #[error("Location unavailable: {message}")]
    LocationUnavailable {
        /// Why no position is known.
        message: String,
    },
}

/// Live view tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveViewConfig {
    /// Initial search radius in meters.
    pub radius_meters: f64,
    /// Smallest radius a user may pick.
    pub min_radius_meters: f64,
    /// Largest radius a user may pick.
    pub max_radius_meters: f64,
    /// Moves shorter than this do not trigger a re-subscription.
    pub movement_threshold_meters: f64,
    /// How often the location tracker polls the last known position.
    pub location_poll_secs: u64,
}

impl Default for LiveViewConfig {
    fn default() -> Self {
        Self {
            radius_meters: 3500.0,
            min_radius_meters: 200.0,
            max_radius_meters: 10_000.0,
            movement_threshold_meters: 100.0,
            location_poll_secs: 10,
        }
    }
}

impl LiveViewConfig {
    /// Checks `radius` against the configured bounds.
    ///
    /// # Errors
    ///
    /// Returns [`LiveViewError::RadiusOutOfRange`] if `radius` is outside
    /// `[min_radius_meters, max_radius_meters]`.
    pub fn check_radius(&self, radius: f64) -> Result<f64, LiveViewError> {
        if (self.min_radius_meters..=self.max_radius_meters).contains(&radius) {
            Ok(radius)
        } else {
            Err(LiveViewError::RadiusOutOfRange {
                radius,
                min: self.min_radius_meters,
                max: self.max_radius_meters,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_radius_is_within_bounds() {
        let config = LiveViewConfig::default();
        assert_eq!(config.check_radius(config.radius_meters), Ok(3500.0));
    }

    #[test]
    fn rejects_radius_outside_bounds() {
        let config = LiveViewConfig::default();
        assert!(matches!(
            config.check_radius(199.0),
            Err(LiveViewError::RadiusOutOfRange { .. })
        ));
        assert!(config.check_radius(10_001.0).is_err());
        assert!(config.check_radius(f64::NAN).is_err());
    }
}
