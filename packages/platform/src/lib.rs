#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Device and backend collaborators used by the marker feed.
//!
//! Authentication, photo upload, device location and user-facing
//! notifications are provided by the host platform. The core only sees the
//! traits defined here; [`local`] has simple in-process implementations.

pub mod local;

use animal_watch_geohash::GeoPoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

/// Errors returned by platform collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// No position fix could be obtained.
    #[error("Location unavailable: {message}")]
    LocationUnavailable {
        /// Why the fix failed.
        message: String,
    },

    /// Uploading an object failed.
    #[error("Upload of {destination} failed: {message}")]
    Upload {
        /// Destination object id.
        destination: String,
        /// Underlying failure.
        message: String,
    },
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    /// Stable user id.
    pub id: String,
    /// Name shown on markers and the leaderboard.
    pub display_name: String,
}

/// Identity of the current user.
pub trait AuthProvider: Send + Sync {
    /// The signed-in user, if any.
    fn current_user(&self) -> Option<AuthUser>;

    /// Id of the signed-in user, if any.
    fn current_user_id(&self) -> Option<String> {
        self.current_user().map(|user| user.id)
    }
}

/// Blob storage for marker photos.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` under `destination_id` and returns a download URL.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Upload`] if the object cannot be stored.
    async fn upload(&self, bytes: Vec<u8>, destination_id: &str) -> Result<String, PlatformError>;
}

/// Source of device positions.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Requests a fresh position fix.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::LocationUnavailable`] if no fix is
    /// obtainable.
    async fn current_position(&self) -> Result<GeoPoint, PlatformError>;

    /// Most recent cached fix, without requesting a new one.
    fn last_known_position(&self) -> Option<GeoPoint>;
}

/// User-facing event raised by the background lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum LookupEvent {
    /// Markers were found near the user.
    Nearby {
        /// How many.
        count: usize,
    },
    /// The position could not be determined.
    Degraded,
}

/// Delivers [`LookupEvent`]s to the user.
pub trait NotificationSink: Send + Sync {
    /// Shows `event`.
    fn notify(&self, event: LookupEvent);
}
