#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Marker lifecycle and contributor statistics.
//!
//! Markers move from `Active` to `Updated` when a successor is published on
//! top of them, and from `Active` to `Removed` when deleted. Every
//! transition is committed as one store transaction together with the
//! matching [`UserStats`](animal_watch_marker_models::UserStats) deltas, so
//! `total` always equals the sum of the other counters.
//!
//! [`transitions`] builds markers, patches and write lists without touching
//! the store. [`MarkerService`] runs them against a
//! [`MarkerStore`](animal_watch_store::MarkerStore) on behalf of the signed-in
//! user.

pub mod service;
pub mod transitions;

pub use service::{MarkerService, Toggle};

use animal_watch_geohash::GeoHashError;
use animal_watch_marker_models::{MARKER_LIFETIME_DAYS, MarkerState};
use animal_watch_platform::PlatformError;
use animal_watch_store::StoreError;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

/// A required draft field that is missing or blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, thiserror::Error)]
pub enum ValidationError {
    /// Title is blank.
    #[error("Title cannot be empty.")]
    Title,
    /// Description is blank.
    #[error("Description cannot be empty.")]
    Description,
    /// Severity was not chosen.
    #[error("Please select a marker severity.")]
    Severity,
    /// No photo was attached.
    #[error("Please take a picture.")]
    Image,
}

/// Errors returned by lifecycle operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    /// The draft is incomplete. Nothing was written.
    #[error("Invalid marker: {0}")]
    Validation(#[from] ValidationError),

    /// The store transaction failed. Nothing was written.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The marker's state does not allow the requested transition.
    #[error("Cannot {action} marker {marker_id} in state {state}")]
    InvalidTransition {
        /// Marker id.
        marker_id: String,
        /// Current state.
        state: MarkerState,
        /// Attempted action.
        action: &'static str,
    },

    /// Only the marker's owner may do this.
    #[error("User {user_id} does not own marker {marker_id}")]
    NotOwner {
        /// Marker id.
        marker_id: String,
        /// Acting user.
        user_id: String,
    },

    /// No user is signed in.
    #[error("Not signed in")]
    Unauthenticated,

    /// The marker position is invalid.
    #[error("Invalid position: {0}")]
    Position(#[from] GeoHashError),

    /// The photo upload failed. Nothing was written.
    #[error("Storage error: {0}")]
    Storage(#[from] PlatformError),
}

/// Rules applied to newly published markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerPolicy {
    /// Days until a new marker expires.
    pub expiry_days: i64,
}

impl Default for MarkerPolicy {
    fn default() -> Self {
        Self {
            expiry_days: MARKER_LIFETIME_DAYS,
        }
    }
}
