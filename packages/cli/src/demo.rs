//! In-memory world the driver commands run against.

use std::sync::Arc;

use animal_watch_geohash::{GeoHashError, GeoPoint};
use animal_watch_lifecycle::{LifecycleError, MarkerService};
use animal_watch_marker_models::{MarkerDraft, MarkerSeverity, WatchMarker, tags};
use animal_watch_platform::local::{MemoryObjectStorage, StaticAuth};
use animal_watch_platform::{AuthProvider, AuthUser, ObjectStorage};
use animal_watch_store::{MarkerStore, MemoryStore};

use crate::settings::Settings;

/// Sample sightings as (north m, east m, owner, title, severity, tags).
const SIGHTINGS: &[(f64, f64, &str, &str, MarkerSeverity, &[&str])] = &[
    (
        40.0,
        -25.0,
        "ana",
        "Dog limping by the bus stop",
        MarkerSeverity::Danger,
        &[tags::animal::DOG, tags::animal_state::WOUNDED],
    ),
    (
        -120.0,
        60.0,
        "marko",
        "Kittens under a parked car",
        MarkerSeverity::Warning,
        &[tags::animal::CAT, tags::animal_type::STRAY],
    ),
    (
        150.0,
        150.0,
        "jovana",
        "Friendly stray near the bakery",
        MarkerSeverity::Info,
        &[tags::animal::DOG, tags::behaviour::PLAYFUL],
    ),
    (
        900.0,
        -400.0,
        "ana",
        "Pigeon with a hurt wing",
        MarkerSeverity::Warning,
        &[tags::animal::BIRD, tags::animal_state::WOUNDED],
    ),
    (
        2500.0,
        1200.0,
        "marko",
        "Pack of dogs at the river bank",
        MarkerSeverity::Danger,
        &[tags::animal::DOG, tags::behaviour::AGGRESSIVE],
    ),
];

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Point `north` and `east` meters away from `origin`.
///
/// # Errors
///
/// Returns [`GeoHashError::InvalidCoordinate`] if the result is off the
/// globe.
pub fn offset(origin: GeoPoint, north: f64, east: f64) -> Result<GeoPoint, GeoHashError> {
    let latitude = origin.latitude + north / METERS_PER_DEGREE;
    let longitude =
        origin.longitude + east / (METERS_PER_DEGREE * origin.latitude.to_radians().cos());
    GeoPoint::new(latitude, longitude)
}

/// Store, collaborators and service wired together.
pub struct Demo {
    pub store: Arc<MemoryStore>,
    pub auth: Arc<StaticAuth>,
    pub service: MarkerService,
}

impl Demo {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let auth = Arc::new(StaticAuth::signed_out());
        let storage: Arc<dyn ObjectStorage> = Arc::new(MemoryObjectStorage::new());
        let service = MarkerService::new(
            Arc::clone(&store) as Arc<dyn MarkerStore>,
            Arc::clone(&auth) as Arc<dyn AuthProvider>,
            storage,
        )
        .with_policy(settings.policy);
        Self {
            store,
            auth,
            service,
        }
    }

    pub fn store(&self) -> Arc<dyn MarkerStore> {
        Arc::clone(&self.store) as Arc<dyn MarkerStore>
    }

    /// Signs in as `user_id`.
    pub fn act_as(&self, user_id: &str) {
        let mut name = user_id.to_string();
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        self.auth.set_user(Some(AuthUser {
            id: user_id.to_string(),
            display_name: name,
        }));
    }

    /// Publishes the sample sightings around `center`.
    ///
    /// # Errors
    ///
    /// Returns the first lifecycle error.
    pub async fn seed(&self, center: GeoPoint) -> Result<Vec<WatchMarker>, LifecycleError> {
        let mut markers = Vec::with_capacity(SIGHTINGS.len());
        for &(north, east, owner, title, severity, marker_tags) in SIGHTINGS {
            self.act_as(owner);
            let draft = MarkerDraft {
                title: title.to_string(),
                description: format!("Reported by {owner}"),
                tags: marker_tags.iter().map(ToString::to_string).collect(),
                severity,
                image: None,
            };
            let photo = title.as_bytes().to_vec();
            markers.push(
                self.service
                    .publish_marker(draft, photo, offset(center, north, east)?)
                    .await?,
            );
        }
        log::info!("Seeded {} marker(s)", markers.len());
        Ok(markers)
    }
}
