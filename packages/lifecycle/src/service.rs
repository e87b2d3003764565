//! Store-backed lifecycle operations for the signed-in user.

use std::sync::Arc;

use animal_watch_geohash::GeoPoint;
use animal_watch_marker_models::{MarkerDraft, MarkerSeverity, MarkerState, UserStats, WatchMarker};
use animal_watch_platform::{AuthProvider, AuthUser, ObjectStorage};
use animal_watch_store::{DocumentRef, MarkerStore, StoreError, TransactionReader, Write};
use chrono::Utc;
use strum_macros::{AsRefStr, Display};

use crate::transitions::{self, RecordKind};
use crate::{LifecycleError, MarkerPolicy, ValidationError};

/// Outcome of a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Toggle {
    /// The record now exists.
    On,
    /// The record was removed.
    Off,
}

/// Publishes, updates, removes and rates watch markers.
pub struct MarkerService {
    store: Arc<dyn MarkerStore>,
    auth: Arc<dyn AuthProvider>,
    storage: Arc<dyn ObjectStorage>,
    policy: MarkerPolicy,
}

impl MarkerService {
    /// Service acting as whoever `auth` reports as signed in.
    #[must_use]
    pub fn new(
        store: Arc<dyn MarkerStore>,
        auth: Arc<dyn AuthProvider>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            store,
            auth,
            storage,
            policy: MarkerPolicy::default(),
        }
    }

    /// Replaces the default publishing policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: MarkerPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn user(&self) -> Result<AuthUser, LifecycleError> {
        self.auth
            .current_user()
            .ok_or(LifecycleError::Unauthenticated)
    }

    async fn existing(&self, id: &str) -> Result<WatchMarker, LifecycleError> {
        self.store
            .get_marker(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(DocumentRef::Marker(id.to_string())).into())
    }

    /// Publishes a new marker whose draft already carries an image
    /// reference.
    ///
    /// # Errors
    ///
    /// * [`LifecycleError::Unauthenticated`] if nobody is signed in
    /// * [`LifecycleError::Validation`] if the draft is incomplete
    /// * [`LifecycleError::Persistence`] if the store rejects the write
    pub async fn create_marker(
        &self,
        draft: MarkerDraft,
        position: GeoPoint,
    ) -> Result<WatchMarker, LifecycleError> {
        self.create_with_id(WatchMarker::generate_id(), draft, position)
            .await
    }

    async fn create_with_id(
        &self,
        id: String,
        draft: MarkerDraft,
        position: GeoPoint,
    ) -> Result<WatchMarker, LifecycleError> {
        let owner = self.user()?;
        let marker =
            transitions::prepare_marker(id, &draft, &owner, position, Utc::now(), self.policy)?;

        self.store
            .commit(transitions::creation_writes(&marker))
            .await?;

        log::info!(
            "Marker {} created by {} at {}",
            marker.id,
            owner.id,
            marker.position_hash()
        );
        Ok(marker)
    }

    /// Uploads `photo` and publishes a new marker pointing at it.
    ///
    /// The draft's own image reference is ignored.
    ///
    /// # Errors
    ///
    /// As [`Self::create_marker`], plus [`LifecycleError::Storage`] if the
    /// upload fails. Nothing is written to the store in that case.
    pub async fn publish_marker(
        &self,
        draft: MarkerDraft,
        photo: Vec<u8>,
        position: GeoPoint,
    ) -> Result<WatchMarker, LifecycleError> {
        self.user()?;
        check_before_upload(&draft, &photo)?;

        let id = WatchMarker::generate_id();
        let image = self.storage.upload(photo, &id).await?;
        self.create_with_id(
            id,
            MarkerDraft {
                image: Some(image),
                ..draft
            },
            position,
        )
        .await
    }

    /// Publishes a successor on top of the active marker `base_id`.
    ///
    /// Any signed-in user may update any active marker. The successor keeps
    /// the base's position and title; the base becomes `Updated`.
    ///
    /// # Errors
    ///
    /// * [`LifecycleError::InvalidTransition`] if the base is not active
    /// * [`LifecycleError::Persistence`] if the base is missing, changed
    ///   concurrently, or the store rejects the write
    /// * as [`Self::create_marker`] otherwise
    pub async fn update_marker(
        &self,
        base_id: &str,
        draft: MarkerDraft,
    ) -> Result<WatchMarker, LifecycleError> {
        self.update_with_id(base_id, WatchMarker::generate_id(), draft)
            .await
    }

    async fn update_with_id(
        &self,
        base_id: &str,
        id: String,
        draft: MarkerDraft,
    ) -> Result<WatchMarker, LifecycleError> {
        let author = self.user()?;
        let base = self.existing(base_id).await?;
        let (successor, patch) =
            transitions::prepare_update(&base, id, &draft, &author, Utc::now(), self.policy)?;

        let base_id = base.id.clone();
        let staged = successor.clone();
        self.store
            .run_transaction(Box::new(move |tx: &dyn TransactionReader| {
                require_active(tx, &base_id)?;
                Ok(transitions::update_writes(&base_id, &staged, patch))
            }))
            .await?;

        log::info!(
            "Marker {} updated by {} as {}",
            base.id,
            author.id,
            successor.id
        );
        Ok(successor)
    }

    /// Uploads `photo` and publishes it as an update of `base_id`.
    ///
    /// # Errors
    ///
    /// As [`Self::update_marker`], plus [`LifecycleError::Storage`] if the
    /// upload fails.
    pub async fn publish_update(
        &self,
        base_id: &str,
        draft: MarkerDraft,
        photo: Vec<u8>,
    ) -> Result<WatchMarker, LifecycleError> {
        self.user()?;
        let base = self.existing(base_id).await?;
        transitions::ensure_active(&base, "update")?;
        check_before_upload(
            &MarkerDraft {
                title: base.title.clone(),
                ..draft.clone()
            },
            &photo,
        )?;

        let id = WatchMarker::generate_id();
        let image = self.storage.upload(photo, &id).await?;
        self.update_with_id(
            base_id,
            id,
            MarkerDraft {
                image: Some(image),
                ..draft
            },
        )
        .await
    }

    /// Removes the caller's active marker `id`.
    ///
    /// Removing an update restores its base to `Active`.
    ///
    /// # Errors
    ///
    /// * [`LifecycleError::NotOwner`] if the caller does not own the marker
    /// * [`LifecycleError::InvalidTransition`] if it is not active
    /// * [`LifecycleError::Persistence`] if it is missing or the write fails
    pub async fn remove_marker(&self, id: &str) -> Result<(), LifecycleError> {
        let user = self.user()?;
        let marker = self.existing(id).await?;
        ensure_owner(&marker, &user)?;
        transitions::ensure_active(&marker, "remove")?;

        let marker_id = marker.id.clone();
        self.store
            .run_transaction(Box::new(move |tx: &dyn TransactionReader| {
                let current = require_active(tx, &marker_id)?;
                transitions::removal_writes(&current, Utc::now()).map_err(|e| {
                    StoreError::Aborted {
                        message: e.to_string(),
                    }
                })
            }))
            .await?;

        log::info!("Marker {id} removed by {}", user.id);
        Ok(())
    }

    /// Replaces the text of the caller's active marker `id`.
    ///
    /// # Errors
    ///
    /// * [`LifecycleError::Validation`] for a blank title or description
    /// * [`LifecycleError::NotOwner`] if the caller does not own the marker
    /// * [`LifecycleError::InvalidTransition`] if it is not active
    pub async fn edit_marker(
        &self,
        id: &str,
        title: &str,
        description: &str,
        tags: Vec<String>,
    ) -> Result<(), LifecycleError> {
        let user = self.user()?;
        let patch = transitions::edit_patch(title, description, tags)?;
        let marker = self.existing(id).await?;
        ensure_owner(&marker, &user)?;
        transitions::ensure_active(&marker, "edit")?;

        let marker_id = marker.id.clone();
        self.store
            .run_transaction(Box::new(move |tx: &dyn TransactionReader| {
                require_active(tx, &marker_id)?;
                Ok(vec![Write::Update { marker_id, patch }])
            }))
            .await?;

        log::debug!("Marker {id} edited by {}", user.id);
        Ok(())
    }

    /// Adds the caller's appraisal to marker `id`, or takes it back.
    ///
    /// # Errors
    ///
    /// * [`LifecycleError::Unauthenticated`] if nobody is signed in
    /// * [`LifecycleError::Persistence`] if the marker is missing or the
    ///   write fails
    pub async fn appraise_marker(&self, id: &str) -> Result<Toggle, LifecycleError> {
        self.toggle(RecordKind::Appraisal, id).await
    }

    /// Marks marker `id` as seen by the caller, or clears the mark.
    ///
    /// # Errors
    ///
    /// As [`Self::appraise_marker`].
    pub async fn see_marker(&self, id: &str) -> Result<Toggle, LifecycleError> {
        self.toggle(RecordKind::Seen, id).await
    }

    async fn toggle(&self, kind: RecordKind, id: &str) -> Result<Toggle, LifecycleError> {
        let user = self.user()?;
        let marker_id = id.to_string();
        let user_id = user.id.clone();

        let applied = self
            .store
            .run_transaction(Box::new(move |tx: &dyn TransactionReader| {
                let marker = tx
                    .marker(&marker_id)
                    .ok_or_else(|| StoreError::NotFound(DocumentRef::Marker(marker_id.clone())))?;
                let present = tx.exists(&kind.reference(&marker_id, &user_id));
                Ok(transitions::toggle_writes(kind, &marker, &user_id, present))
            }))
            .await?;

        let toggle = if matches!(applied.first(), Some(Write::Delete(_))) {
            Toggle::Off
        } else {
            Toggle::On
        };
        log::debug!("{kind:?} on {id} by {} is now {toggle}", user.id);
        Ok(toggle)
    }

    /// Reads one marker.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Persistence`] if the read fails.
    pub async fn get_marker(&self, id: &str) -> Result<Option<WatchMarker>, LifecycleError> {
        Ok(self.store.get_marker(id).await?)
    }

    /// Statistics of `user_id`; all zero if they never contributed.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Persistence`] if the read fails.
    pub async fn stats_for(&self, user_id: &str) -> Result<UserStats, LifecycleError> {
        Ok(self.store.get_stats(user_id).await?.unwrap_or_default())
    }

    /// Statistics of the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Unauthenticated`] if nobody is signed in.
    pub async fn my_stats(&self) -> Result<UserStats, LifecycleError> {
        let user = self.user()?;
        self.stats_for(&user.id).await
    }

    /// Top `limit` contributors by total, highest first.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Persistence`] if the read fails.
    pub async fn top_contributors(
        &self,
        limit: usize,
    ) -> Result<Vec<(String, UserStats)>, LifecycleError> {
        Ok(self.store.top_stats(limit).await?)
    }
}

fn ensure_owner(marker: &WatchMarker, user: &AuthUser) -> Result<(), LifecycleError> {
    if marker.owner_id == user.id {
        Ok(())
    } else {
        Err(LifecycleError::NotOwner {
            marker_id: marker.id.clone(),
            user_id: user.id.clone(),
        })
    }
}

fn check_before_upload(draft: &MarkerDraft, photo: &[u8]) -> Result<(), ValidationError> {
    transitions::validate_text(&draft.title, &draft.description)?;
    if draft.severity == MarkerSeverity::Undefined {
        return Err(ValidationError::Severity);
    }
    if photo.is_empty() {
        return Err(ValidationError::Image);
    }
    Ok(())
}

/// Re-reads `id` inside a transaction and aborts unless it is still active.
fn require_active(tx: &dyn TransactionReader, id: &str) -> Result<WatchMarker, StoreError> {
    let marker = tx
        .marker(id)
        .ok_or_else(|| StoreError::NotFound(DocumentRef::Marker(id.to_string())))?;
    if marker.state == MarkerState::Active {
        Ok(marker)
    } else {
        Err(StoreError::Aborted {
            message: format!("marker {id} is {} (expected ACTIVE)", marker.state),
        })
    }
}
